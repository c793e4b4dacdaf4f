use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, trace, warn};

use crate::error::{Result, SieveError};
use crate::pipeline::RunContext;
use crate::queue::BoundedQueue;

/// Value travelling between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Value(u64),
    /// No more candidates on this queue
    Sentinel,
}

/// True once `prime` is past the termination threshold: with `p*p > limit`
/// every value still in flight has no divisor left to test and is prime.
///
/// Integer arithmetic only; an overflowing square is past any `u64` limit.
pub fn exceeds_threshold(prime: u64, limit: u64) -> bool {
    prime
        .checked_mul(prime)
        .is_none_or(|square| square > limit)
}

/// Pipeline node bound to the first value it reads.
///
/// The stage owns its successor outright: it creates the successor's input
/// queue, spawns it on the first survivor, and joins it after forwarding the
/// sentinel. The chain is forward-only, so tearing down the source tears
/// down everything behind it.
pub(crate) struct FilterStage {
    index: usize,
    prime: Option<u64>,
    ctx: Arc<RunContext>,
    input: Arc<BoundedQueue<Candidate>>,
    drained: bool,
    successor: Option<Successor>,
}

struct Successor {
    queue: Arc<BoundedQueue<Candidate>>,
    handle: JoinHandle<()>,
}

enum Exit {
    /// Survivors went downstream; the successor decides when the run ends
    Forwarded,
    /// Nothing behind this stage, so it ends the run
    EndOfChain,
}

impl FilterStage {
    /// Start stage `index` on its own thread, reading from `input`.
    pub(crate) fn spawn(
        index: usize,
        ctx: &Arc<RunContext>,
        input: Arc<BoundedQueue<Candidate>>,
    ) -> Result<JoinHandle<()>> {
        ctx.stage_created();
        let stage = FilterStage {
            index,
            prime: None,
            ctx: Arc::clone(ctx),
            input,
            drained: false,
            successor: None,
        };

        let handle = thread::Builder::new()
            .name(format!("sieve-stage-{}", index))
            .spawn(move || stage.run())
            .map_err(|e| SieveError::ResourceExhaustion {
                what: "stage thread",
                detail: e.to_string(),
            })?;

        ctx.stage_spawned();
        trace!(stage = index, "spawned filter stage");
        Ok(handle)
    }

    fn run(mut self) {
        match self.sieve() {
            Ok(Exit::Forwarded) => {}
            Ok(Exit::EndOfChain) => {
                self.ctx.done.raise(Ok(()));
            }
            Err(e) => {
                let err = e.in_stage(self.index, self.prime);
                error!(error = %err, "stage failed, draining input");
                // Keep consuming so the predecessor never blocks on a full queue
                self.drain();
                self.ctx.done.raise(Err(err));
            }
        }
        self.release_successor();
    }

    fn sieve(&mut self) -> Result<Exit> {
        let Some(prime) = self.next() else {
            debug!(stage = self.index, "stage received no candidates");
            return Ok(Exit::EndOfChain);
        };
        self.prime = Some(prime);
        self.ctx.sink.append(prime)?;

        if exceeds_threshold(prime, self.ctx.limit) {
            let mut flushed = 1u64;
            while let Some(value) = self.next() {
                self.ctx.sink.append(value)?;
                flushed += 1;
            }
            debug!(stage = self.index, prime, flushed, "terminal stage flushed survivors");
            return Ok(Exit::EndOfChain);
        }

        let mut forwarded = 0u64;
        let mut discarded = 0u64;
        while let Some(value) = self.next() {
            if value % prime == 0 {
                discarded += 1;
                continue;
            }
            self.forward(value)?;
            forwarded += 1;
        }
        trace!(stage = self.index, prime, forwarded, discarded, "stage drained");

        Ok(if self.successor.is_some() {
            Exit::Forwarded
        } else {
            Exit::EndOfChain
        })
    }

    /// Next real candidate, or None once the sentinel has been read.
    fn next(&mut self) -> Option<u64> {
        if self.drained {
            return None;
        }
        match self.input.get() {
            Candidate::Value(value) => Some(value),
            Candidate::Sentinel => {
                self.drained = true;
                None
            }
        }
    }

    fn forward(&mut self, value: u64) -> Result<()> {
        if self.successor.is_none() {
            self.successor = Some(self.spawn_successor()?);
        }
        if let Some(successor) = &self.successor {
            successor.queue.put(Candidate::Value(value));
        }
        Ok(())
    }

    fn spawn_successor(&self) -> Result<Successor> {
        let queue = Arc::new(BoundedQueue::new(self.ctx.queue_capacity)?);
        let handle = FilterStage::spawn(self.index + 1, &self.ctx, Arc::clone(&queue))?;
        Ok(Successor { queue, handle })
    }

    fn drain(&mut self) {
        while self.next().is_some() {}
    }

    /// Forward the sentinel exactly once and wait for the successor to finish.
    fn release_successor(&mut self) {
        if let Some(successor) = self.successor.take() {
            successor.queue.put(Candidate::Sentinel);
            drop(successor.queue);
            if successor.handle.join().is_err() {
                warn!(stage = self.index + 1, "successor stage panicked");
            }
        }
    }
}

impl Drop for FilterStage {
    fn drop(&mut self) {
        if thread::panicking() {
            self.ctx
                .done
                .raise(Err(SieveError::StagePanicked { stage: self.index }));
            self.drain();
            self.release_successor();
        }
        self.ctx.stage_dropped();
    }
}
