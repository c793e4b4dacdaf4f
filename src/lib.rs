//! Concurrent pipeline Sieve of Eratosthenes.
//!
//! Every discovered prime gets its own stage thread. A stage filters the
//! multiples of its prime out of the candidates it receives over a bounded
//! queue and forwards the survivors to a successor it spawns on demand. Once
//! a stage's prime squared exceeds the limit, it flushes everything still in
//! flight straight into the result sink and signals completion.
//!
//! ```no_run
//! let primes = pipesieve::primes_up_to(100)?;
//! assert_eq!(primes.len(), 25);
//! # Ok::<(), pipesieve::SieveError>(())
//! ```

pub mod error;
pub mod pipeline;
pub mod queue;
pub mod reference;
pub mod signal;
pub mod sink;
pub mod stage;
pub mod storage;

mod source;

pub use error::{Result, SieveError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineReport};
pub use queue::{BoundedQueue, DEFAULT_CAPACITY};
pub use signal::CompletionSignal;
pub use sink::{MemorySink, ResultSink};
pub use stage::{Candidate, exceeds_threshold};
pub use storage::SpoolSink;

use std::sync::Arc;

/// Every prime in [2, limit], ascending, using the default configuration.
pub fn primes_up_to(limit: u64) -> Result<Vec<u64>> {
    let sink = Arc::new(MemorySink::with_capacity(reference::prime_count_estimate(limit))?);
    let report = Pipeline::new(PipelineConfig::default())?.run_with_sink(limit, sink)?;
    Ok(report.into_sorted())
}

/// Parse a sieve limit at the program boundary.
///
/// Rejects negative and non-numeric input before any stage exists.
pub fn parse_limit(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if let Some(digits) = trimmed.strip_prefix('-') {
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(SieveError::InvalidInput {
                input: input.to_string(),
                reason: "limit must not be negative".to_string(),
            });
        }
    }
    trimmed.parse::<u64>().map_err(|e| SieveError::InvalidInput {
        input: input.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primes_up_to_is_sorted() {
        assert_eq!(primes_up_to(30).unwrap(), vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        assert!(primes_up_to(1).unwrap().is_empty());
    }

    #[test]
    fn test_parse_limit_accepts_plain_numbers() {
        assert_eq!(parse_limit("0").unwrap(), 0);
        assert_eq!(parse_limit(" 100 ").unwrap(), 100);
        assert_eq!(parse_limit("18446744073709551615").unwrap(), u64::MAX);
    }

    #[test]
    fn test_parse_limit_rejects_negative() {
        match parse_limit("-5") {
            Err(SieveError::InvalidInput { reason, .. }) => {
                assert_eq!(reason, "limit must not be negative");
            }
            other => panic!("expected invalid input, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_limit_rejects_non_numeric() {
        assert!(matches!(
            parse_limit("ten"),
            Err(SieveError::InvalidInput { .. })
        ));
        assert!(matches!(
            parse_limit(""),
            Err(SieveError::InvalidInput { .. })
        ));
        assert!(matches!(
            parse_limit("-"),
            Err(SieveError::InvalidInput { .. })
        ));
    }
}
