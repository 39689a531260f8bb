//! Offline synthetic dataset: every class is a random prototype image and
//! its samples are the prototype plus uniform noise, clamped to `[0, 1]`.

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::ClassPool;

#[derive(Config, Debug)]
pub struct SyntheticConfig {
    /// Classes in the train, val and test splits.
    #[config(default = "[64, 16, 16]")]
    pub classes: [usize; 3],
    /// Samples generated per class.
    #[config(default = 20)]
    pub images_per_class: usize,
    /// Image side length.
    #[config(default = 28)]
    pub image_size: usize,
    /// Half-width of the uniform per-pixel noise.
    #[config(default = 0.1)]
    pub noise: f32,
}

/// Generate train/val/test pools with disjoint class ids.
pub fn generate_pools(config: &SyntheticConfig, seed: u64) -> [ClassPool; 3] {
    let mut rng = StdRng::seed_from_u64(seed);
    let pixels = config.image_size * config.image_size;
    let shape = [1, config.image_size, config.image_size];

    let mut next_class = 0u32;
    config.classes.map(|count| {
        let mut pool = ClassPool::new(shape);
        for _ in 0..count {
            let prototype: Vec<f32> = (0..pixels).map(|_| rng.gen::<f32>()).collect();
            for _ in 0..config.images_per_class {
                let image = prototype
                    .iter()
                    .map(|&p| (p + rng.gen_range(-config.noise..=config.noise)).clamp(0.0, 1.0))
                    .collect();
                pool.add(next_class, image);
            }
            next_class += 1;
        }
        pool
    })
}
