//! Run orchestration: dataset, model, training, and the last/best test
//! evaluations.

use burn::backend::ndarray::{NdArray, NdArrayDevice};
use burn::backend::Autodiff;
use burn::config::Config;
use burn::module::AutodiffModule;
use burn::optim::AdamConfig;
use burn::tensor::backend::AutodiffBackend;

use snail::{evaluate, train, DatasetSplits};

use crate::config::RunArgs;
use crate::results::RunResults;

/// Name of the model config written next to the checkpoints.
pub const SNAIL_CONFIG_FILE: &str = "snail_config.json";
/// Name of the run summary.
pub const RESULTS_FILE: &str = "results.json";

/// Validate `args`, pick the backend and run the experiment.
pub fn run(args: RunArgs) -> anyhow::Result<RunResults> {
    args.validate()?;
    std::fs::create_dir_all(&args.exp)
        .map_err(|e| anyhow::anyhow!("Failed to create {}: {e}", args.exp.display()))?;

    if args.cuda {
        #[cfg(feature = "wgpu")]
        {
            use burn::backend::wgpu::{Wgpu, WgpuDevice};
            tracing::info!("Using wgpu backend");
            return run_on::<Autodiff<Wgpu>>(&args, &WgpuDevice::default());
        }
        #[cfg(not(feature = "wgpu"))]
        anyhow::bail!("--cuda requested but snail-train was built without the `wgpu` feature");
    }

    // Only the build is known here; no device is probed.
    if cfg!(feature = "wgpu") {
        println!("WARNING: snail-train was built with accelerator support, so you should probably run with --cuda");
    }
    run_on::<Autodiff<NdArray<f32>>>(&args, &NdArrayDevice::Cpu)
}

/// The experiment on a concrete autodiff backend.
pub fn run_on<B: AutodiffBackend>(args: &RunArgs, device: &B::Device) -> anyhow::Result<RunResults> {
    let mut splits = DatasetSplits::load(&args.dataset_source(), &args.sampling_config(), args.seed)?;

    let snail_config = args.snail_config();
    let config_path = args.exp.join(SNAIL_CONFIG_FILE);
    snail_config
        .save(&config_path)
        .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", config_path.display()))?;

    let model = snail_config.init::<B>(device);
    let mut optimizer = AdamConfig::new().init();
    let training = args.training_config();

    tracing::info!(
        exp = %args.exp.display(),
        num_cls = args.num_cls,
        num_samples = args.num_samples,
        epochs = args.epochs,
        iterations = args.iterations,
        lr = args.lr,
        trainval = args.trainval,
        "Starting training"
    );

    let outcome = if args.trainval {
        train(&training, model, &mut optimizer, &mut splits.trainval, None, device)?
    } else {
        train(
            &training,
            model,
            &mut optimizer,
            &mut splits.train,
            Some(&mut splits.val),
            device,
        )?
    };

    println!("Testing with last model..");
    let last_test_acc = evaluate::<B::InnerBackend, _>(
        &outcome.last_model.valid(),
        &mut splits.test,
        args.num_support_test(),
        device,
    )?;

    let best_test_acc = match &outcome.best_model {
        Some(best) => {
            println!("Testing with best model..");
            Some(evaluate::<B::InnerBackend, _>(
                &best.valid(),
                &mut splits.test,
                args.num_support_test(),
                device,
            )?)
        }
        None => {
            tracing::warn!("No best-validation model was selected, skipping its evaluation");
            None
        }
    };

    let results = RunResults {
        num_cls: args.num_cls,
        num_samples: args.num_samples,
        best_val_acc: outcome.best_model.as_ref().map(|_| outcome.best_acc),
        last_test_acc,
        best_test_acc,
    };
    results.save(&args.exp.join(RESULTS_FILE))?;
    Ok(results)
}
