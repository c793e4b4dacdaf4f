use thiserror::Error;

pub type Result<T> = std::result::Result<T, SieveError>;

/// Everything that can abort a sieve run.
///
/// A failure anywhere in the pipeline aborts the whole run; the caller never
/// receives a partial prime set.
#[derive(Debug, Error)]
pub enum SieveError {
    /// The bound supplied at the boundary is negative or not a number.
    #[error("invalid limit {input:?}: {reason}")]
    InvalidInput { input: String, reason: String },

    /// Queue capacity must be at least one slot.
    #[error("invalid queue capacity {capacity}: must be at least 1")]
    Configuration { capacity: usize },

    /// A queue buffer, the result storage or a stage thread could not be allocated.
    #[error("out of resources allocating {what}: {detail}")]
    ResourceExhaustion { what: &'static str, detail: String },

    #[error("result sink is frozen")]
    SinkFrozen,

    /// Failure inside one stage, tagged with where it happened.
    #[error("stage {stage}{} failed: {source}", fmt_prime(.prime))]
    StageFailed {
        stage: usize,
        prime: Option<u64>,
        #[source]
        source: Box<SieveError>,
    },

    #[error("stage {stage} panicked")]
    StagePanicked { stage: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fmt_prime(prime: &Option<u64>) -> String {
    match prime {
        Some(p) => format!(" (prime {})", p),
        None => String::new(),
    }
}

impl SieveError {
    pub(crate) fn in_stage(self, stage: usize, prime: Option<u64>) -> Self {
        SieveError::StageFailed {
            stage,
            prime,
            source: Box::new(self),
        }
    }
}
