//! Summary of a finished run, written as `results.json`.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Accuracies of one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResults {
    /// Episode geometry the run was trained on.
    pub num_cls: usize,
    pub num_samples: usize,
    /// Best trailing-window validation accuracy; `None` without validation.
    pub best_val_acc: Option<f64>,
    /// Test accuracy of the end-of-training weights.
    pub last_test_acc: f64,
    /// Test accuracy of the best-validation weights, when they exist.
    pub best_test_acc: Option<f64>,
}

impl RunResults {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "Saved run results");
        Ok(())
    }
}
