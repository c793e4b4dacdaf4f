use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tracing::{info, warn};

use crate::error::{Result, SieveError};
use crate::queue::DEFAULT_CAPACITY;
use crate::signal::CompletionSignal;
use crate::sink::{MemorySink, ResultSink};
use crate::source::SourceStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Slots in every queue between two stages
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            queue_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// What a finished run hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Every prime up to the limit, in the order stages recorded them
    pub primes: Vec<u64>,
    /// Filter stages started during the run (terminal stage included)
    pub stages_spawned: usize,
    /// Filter stages still alive when the run returned
    pub stages_live: usize,
}

impl PipelineReport {
    pub fn into_sorted(self) -> Vec<u64> {
        let mut primes = self.primes;
        primes.sort_unstable();
        primes
    }
}

/// State shared by the source and every filter stage of one run.
pub(crate) struct RunContext {
    pub(crate) limit: u64,
    pub(crate) queue_capacity: usize,
    pub(crate) sink: Arc<dyn ResultSink>,
    pub(crate) done: CompletionSignal,
    spawned: AtomicUsize,
    live: AtomicUsize,
}

impl RunContext {
    pub(crate) fn new(limit: u64, queue_capacity: usize, sink: Arc<dyn ResultSink>) -> Self {
        RunContext {
            limit,
            queue_capacity,
            sink,
            done: CompletionSignal::new(),
            spawned: AtomicUsize::new(0),
            live: AtomicUsize::new(0),
        }
    }

    pub(crate) fn stage_created(&self) {
        self.live.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn stage_dropped(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn stage_spawned(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Runs the self-extending sieve: starts the source, sleeps until the stage
/// at the end of the chain signals completion, tears the chain down and
/// freezes the sink.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        if config.queue_capacity == 0 {
            return Err(SieveError::Configuration {
                capacity: config.queue_capacity,
            });
        }
        Ok(Pipeline { config })
    }

    pub fn config(&self) -> PipelineConfig {
        self.config
    }

    /// Sieve `limit` into an in-process sink.
    pub fn run(&self, limit: u64) -> Result<PipelineReport> {
        self.run_with_sink(limit, Arc::new(MemorySink::new()))
    }

    /// Sieve `limit` into `sink`. The sink must not have been frozen.
    ///
    /// Any stage failure aborts the run: every thread is still joined, the
    /// sink is left unfrozen and the error is returned.
    pub fn run_with_sink(&self, limit: u64, sink: Arc<dyn ResultSink>) -> Result<PipelineReport> {
        let start = Instant::now();
        info!(limit, capacity = self.config.queue_capacity, "starting sieve pipeline");

        let ctx = Arc::new(RunContext::new(limit, self.config.queue_capacity, sink));

        let source = SourceStage::start(&ctx)?;
        if source.is_none() {
            ctx.done.raise(Ok(()));
        }

        let outcome = ctx.done.wait();

        if let Some(source) = source {
            if source.join().is_err() && outcome.is_ok() {
                warn!("source stage panicked");
                return Err(SieveError::StagePanicked { stage: 0 });
            }
        }
        if let Err(e) = outcome {
            warn!(error = %e, "sieve pipeline aborted");
            return Err(e);
        }

        let primes = ctx.sink.freeze()?;
        let report = PipelineReport {
            primes,
            stages_spawned: ctx.spawned(),
            stages_live: ctx.live(),
        };

        info!(
            limit,
            primes = report.primes.len(),
            stages = report.stages_spawned,
            elapsed_us = start.elapsed().as_micros() as u64,
            "sieve pipeline finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference;
    use std::sync::Mutex;

    fn sieve(limit: u64) -> Vec<u64> {
        Pipeline::new(PipelineConfig::default())
            .unwrap()
            .run(limit)
            .unwrap()
            .into_sorted()
    }

    /// Fails every append after the first `allowed`.
    struct FailingSink {
        allowed: usize,
        seen: Mutex<usize>,
    }

    impl ResultSink for FailingSink {
        fn append(&self, _value: u64) -> Result<()> {
            let mut seen = self.seen.lock().unwrap();
            if *seen >= self.allowed {
                return Err(SieveError::ResourceExhaustion {
                    what: "result storage",
                    detail: "test quota reached".to_string(),
                });
            }
            *seen += 1;
            Ok(())
        }

        fn freeze(&self) -> Result<Vec<u64>> {
            Ok(Vec::new())
        }
    }

    /// Panics when asked to record `trigger`.
    struct PanickingSink {
        trigger: u64,
        recorded: Mutex<Vec<u64>>,
    }

    impl ResultSink for PanickingSink {
        fn append(&self, value: u64) -> Result<()> {
            if value == self.trigger {
                panic!("sink refused {}", value);
            }
            self.recorded.lock().unwrap().push(value);
            Ok(())
        }

        fn freeze(&self) -> Result<Vec<u64>> {
            Ok(std::mem::take(&mut *self.recorded.lock().unwrap()))
        }
    }

    #[test]
    fn test_zero_capacity_config_is_rejected() {
        let result = Pipeline::new(PipelineConfig { queue_capacity: 0 });
        assert!(matches!(
            result,
            Err(SieveError::Configuration { capacity: 0 })
        ));
    }

    #[test]
    fn test_limits_below_two_are_empty() {
        assert!(sieve(0).is_empty());
        assert!(sieve(1).is_empty());
    }

    #[test]
    fn test_limit_two_spawns_no_stage() {
        let report = Pipeline::new(PipelineConfig::default())
            .unwrap()
            .run(2)
            .unwrap();
        assert_eq!(report.primes, vec![2]);
        assert_eq!(report.stages_spawned, 0);
    }

    #[test]
    fn test_small_scenarios() {
        assert_eq!(sieve(3), vec![2, 3]);
        assert_eq!(sieve(10), vec![2, 3, 5, 7]);
        assert_eq!(sieve(30), vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn test_primes_below_one_hundred() {
        assert_eq!(
            sieve(100),
            vec![
                2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73,
                79, 83, 89, 97
            ]
        );
    }

    #[test]
    fn test_single_slot_queues_do_not_deadlock() {
        let pipeline = Pipeline::new(PipelineConfig { queue_capacity: 1 }).unwrap();
        let primes = pipeline.run(2000).unwrap().into_sorted();
        assert_eq!(primes, reference::primes_up_to(2000).unwrap());
    }

    #[test]
    fn test_repeated_runs_agree() {
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let first = pipeline.run(5000).unwrap().into_sorted();
        let second = pipeline.run(5000).unwrap().into_sorted();
        assert_eq!(first, second);
    }

    #[test]
    fn test_stress_run_tears_down_every_stage() {
        let limit = 100_000;
        let report = Pipeline::new(PipelineConfig::default())
            .unwrap()
            .run(limit)
            .unwrap();

        // One filtering stage per odd prime p with p*p <= limit, plus the terminal stage
        let filtering = reference::primes_up_to(316)
            .unwrap()
            .into_iter()
            .filter(|&p| p > 2)
            .count();
        assert_eq!(filtering, 64);
        assert_eq!(report.stages_spawned, filtering + 1);
        assert_eq!(report.stages_live, 0);

        let primes = report.into_sorted();
        assert_eq!(primes.len(), 9592);
        assert_eq!(primes, reference::primes_up_to(limit).unwrap());
    }

    #[test]
    fn test_sink_failure_aborts_with_stage_and_prime() {
        // 2 and 3 are accepted, stage 2 fails appending 5
        let sink = Arc::new(FailingSink {
            allowed: 2,
            seen: Mutex::new(0),
        });
        let result = Pipeline::new(PipelineConfig::default())
            .unwrap()
            .run_with_sink(1000, sink);

        match result {
            Err(SieveError::StageFailed {
                stage,
                prime,
                source,
            }) => {
                assert_eq!(stage, 2);
                assert_eq!(prime, Some(5));
                assert!(matches!(*source, SieveError::ResourceExhaustion { .. }));
            }
            other => panic!("expected stage failure, got {:?}", other),
        }
    }

    #[test]
    fn test_panicking_stage_aborts_the_run() {
        // Stage 2 binds 5 and panics while recording it
        let sink = Arc::new(PanickingSink {
            trigger: 5,
            recorded: Mutex::new(Vec::new()),
        });
        let result = Pipeline::new(PipelineConfig { queue_capacity: 2 })
            .unwrap()
            .run_with_sink(1000, Arc::clone(&sink) as Arc<dyn ResultSink>);

        assert!(matches!(result, Err(SieveError::StagePanicked { stage: 2 })));
        // Nothing downstream of the panicking stage recorded anything
        assert_eq!(sink.freeze().unwrap(), vec![2, 3]);
    }

    #[test]
    fn test_frozen_sink_is_rejected_before_streaming() {
        let sink = Arc::new(MemorySink::new());
        sink.freeze().unwrap();
        let result = Pipeline::new(PipelineConfig::default())
            .unwrap()
            .run_with_sink(50, sink);
        assert!(matches!(result, Err(SieveError::SinkFrozen)));
    }
}
