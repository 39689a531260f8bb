//! Metric histories, trailing-window averages and best-accuracy tracking.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Per-run metric histories, appended in chronological order.
///
/// Training records one loss per batch; validation records one loss and
/// one accuracy per batch. `train_acc` is part of the persisted layout but
/// the training objective does not produce an accuracy, so it stays empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsHistory {
    pub train_loss: Vec<f64>,
    pub train_acc: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_acc: Vec<f64>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The four histories with the file stem each is saved under.
    pub fn named(&self) -> [(&'static str, &[f64]); 4] {
        [
            ("train_loss", self.train_loss.as_slice()),
            ("train_acc", self.train_acc.as_slice()),
            ("val_loss", self.val_loss.as_slice()),
            ("val_acc", self.val_acc.as_slice()),
        ]
    }

    /// Write `<name>.txt` for each history into `dir`, one value per line.
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        for (name, values) in self.named() {
            let path = dir.join(format!("{name}.txt"));
            let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
            for value in values {
                writeln!(file, "{value}")?;
            }
            file.flush()?;
            tracing::debug!(path = %path.display(), count = values.len(), "Wrote metric history");
        }
        Ok(())
    }
}

/// Mean of the last `window` values (all of them if there are fewer).
///
/// Returns `None` for an empty slice or a zero window.
pub fn window_mean(values: &[f64], window: usize) -> Option<f64> {
    if values.is_empty() || window == 0 {
        return None;
    }
    let tail = &values[values.len().saturating_sub(window)..];
    Some(tail.iter().sum::<f64>() / tail.len() as f64)
}

/// Best-so-far validation accuracy.
///
/// Starts at 0. A new value replaces the best when it is greater than *or
/// equal to* it, so ties move the best checkpoint forward to the later epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BestTracker {
    best: f64,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an epoch's accuracy; returns `true` if it becomes the best.
    pub fn observe(&mut self, accuracy: f64) -> bool {
        if accuracy >= self.best {
            self.best = accuracy;
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Console suffix for an epoch summary line.
    pub fn annotation(&self, accuracy: f64) -> String {
        if accuracy >= self.best {
            " (Best)".to_string()
        } else {
            format!(" (Best: {})", self.best)
        }
    }
}
