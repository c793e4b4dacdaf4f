use std::sync::{Mutex, PoisonError};

use crate::error::{Result, SieveError};

/// Append-only collector of discovered primes shared by every stage.
///
/// Appends may arrive from any number of stage threads at once. Order is
/// insertion order, not numeric order; sorting is up to whoever reads the
/// frozen result.
pub trait ResultSink: Send + Sync {
    fn append(&self, value: u64) -> Result<()>;

    /// Hand over everything appended so far. Works once; afterwards both
    /// `append` and `freeze` fail with [`SieveError::SinkFrozen`].
    fn freeze(&self) -> Result<Vec<u64>>;
}

/// In-process sink backed by a mutex-guarded `Vec`.
pub struct MemorySink {
    // None once frozen
    primes: Mutex<Option<Vec<u64>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink {
            primes: Mutex::new(Some(Vec::new())),
        }
    }

    /// Preallocate room for `hint` primes.
    pub fn with_capacity(hint: usize) -> Result<Self> {
        let mut primes = Vec::new();
        primes
            .try_reserve_exact(hint)
            .map_err(|e| SieveError::ResourceExhaustion {
                what: "result storage",
                detail: e.to_string(),
            })?;
        Ok(MemorySink {
            primes: Mutex::new(Some(primes)),
        })
    }

    pub fn len(&self) -> usize {
        self.primes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink for MemorySink {
    fn append(&self, value: u64) -> Result<()> {
        let mut guard = self.primes.lock().unwrap_or_else(PoisonError::into_inner);
        let primes = guard.as_mut().ok_or(SieveError::SinkFrozen)?;

        // Grow through try_reserve so an allocation failure surfaces as an error
        if primes.len() == primes.capacity() {
            primes
                .try_reserve(1)
                .map_err(|e| SieveError::ResourceExhaustion {
                    what: "result storage",
                    detail: e.to_string(),
                })?;
        }
        primes.push(value);
        Ok(())
    }

    fn freeze(&self) -> Result<Vec<u64>> {
        self.primes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(SieveError::SinkFrozen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_append_then_freeze_keeps_insertion_order() {
        let sink = MemorySink::new();
        for p in [7, 2, 5, 3] {
            sink.append(p).unwrap();
        }
        assert_eq!(sink.len(), 4);
        assert_eq!(sink.freeze().unwrap(), vec![7, 2, 5, 3]);
    }

    #[test]
    fn test_frozen_sink_rejects_appends_and_second_freeze() {
        let sink = MemorySink::new();
        sink.append(2).unwrap();
        sink.freeze().unwrap();

        assert!(matches!(sink.append(3), Err(SieveError::SinkFrozen)));
        assert!(matches!(sink.freeze(), Err(SieveError::SinkFrozen)));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_with_capacity_grows_past_hint() {
        let sink = MemorySink::with_capacity(2).unwrap();
        for p in 0..100 {
            sink.append(p).unwrap();
        }
        assert_eq!(sink.freeze().unwrap().len(), 100);
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let sink = Arc::new(MemorySink::new());

        let writers: Vec<_> = (0..8u64)
            .map(|w| {
                let sink = Arc::clone(&sink);
                thread::spawn(move || {
                    for i in 0..1000u64 {
                        sink.append(w * 1000 + i).unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let mut primes = sink.freeze().unwrap();
        primes.sort_unstable();
        assert_eq!(primes, (0..8000).collect::<Vec<u64>>());
    }
}
