//! Episode batch type and the error enum shared by the data, model and
//! training modules.

/// Errors raised while turning an episode into tensors or scoring it.
#[derive(Debug, thiserror::Error)]
pub enum EpisodeError {
    /// The batch contains no items.
    #[error("episode batch is empty")]
    EmptyBatch,

    /// The batch has more distinct labels than the model has output classes.
    #[error("episode has {found} distinct labels but the model accepts at most {max}")]
    TooManyClasses { found: usize, max: usize },

    /// Inputs and labels disagree in length, or an image has the wrong size.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Every item was consumed as support; nothing left to classify.
    #[error("no query items with n_support={n_support}")]
    NoQueries { n_support: usize },

    /// The support-set size must be at least one.
    #[error("n_support must be > 0")]
    ZeroSupport,
}

/// One sampled few-shot task.
///
/// `inputs[i]` is a flattened `channels * height * width` image whose raw
/// class identifier is `labels[i]`. The last item is the query.
#[derive(Debug, Clone)]
pub struct EpisodeBatch {
    pub inputs: Vec<Vec<f32>>,
    pub labels: Vec<u32>,
    /// `[channels, height, width]` of every image in `inputs`.
    pub image_shape: [usize; 3],
}

impl EpisodeBatch {
    /// Build a batch, checking that inputs and labels line up.
    pub fn new(
        inputs: Vec<Vec<f32>>,
        labels: Vec<u32>,
        image_shape: [usize; 3],
    ) -> Result<Self, EpisodeError> {
        if inputs.is_empty() {
            return Err(EpisodeError::EmptyBatch);
        }
        if inputs.len() != labels.len() {
            return Err(EpisodeError::ShapeMismatch(format!(
                "{} inputs but {} labels",
                inputs.len(),
                labels.len()
            )));
        }
        let expected: usize = image_shape.iter().product();
        if let Some((i, bad)) = inputs.iter().enumerate().find(|(_, x)| x.len() != expected) {
            return Err(EpisodeError::ShapeMismatch(format!(
                "input {i} has {} values, expected {expected}",
                bad.len()
            )));
        }
        Ok(Self {
            inputs,
            labels,
            image_shape,
        })
    }

    /// Number of items (sequence length) in the episode.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}
