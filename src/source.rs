use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::error::{Result, SieveError};
use crate::pipeline::RunContext;
use crate::queue::BoundedQueue;
use crate::stage::{Candidate, FilterStage};

/// Root of the pipeline: feeds odd candidates 3..=limit into stage 1.
pub(crate) struct SourceStage {
    ctx: Arc<RunContext>,
}

impl SourceStage {
    /// Seed the sink with 2 and start streaming.
    ///
    /// Returns `None` when the limit leaves nothing to stream (below 3);
    /// no filter stage exists in that case and the caller ends the run.
    pub(crate) fn start(ctx: &Arc<RunContext>) -> Result<Option<JoinHandle<()>>> {
        // 2 is the only even prime, so it never enters the stream
        if ctx.limit >= 2 {
            ctx.sink.append(2)?;
        }
        if ctx.limit < 3 {
            return Ok(None);
        }

        let source = SourceStage {
            ctx: Arc::clone(ctx),
        };
        let handle = thread::Builder::new()
            .name("sieve-source".to_string())
            .spawn(move || source.run())
            .map_err(|e| SieveError::ResourceExhaustion {
                what: "source thread",
                detail: e.to_string(),
            })?;
        Ok(Some(handle))
    }

    fn run(self) {
        let (queue, first) = match self.open_first_stage() {
            Ok(started) => started,
            Err(e) => {
                self.ctx.done.raise(Err(e.in_stage(0, None)));
                return;
            }
        };

        let limit = self.ctx.limit;
        for candidate in (3..=limit).step_by(2) {
            queue.put(Candidate::Value(candidate));
        }
        queue.put(Candidate::Sentinel);
        drop(queue);
        debug!(limit, "source finished streaming candidates");

        if first.join().is_err() {
            warn!(stage = 1, "first filter stage panicked");
        }
    }

    fn open_first_stage(&self) -> Result<(Arc<BoundedQueue<Candidate>>, JoinHandle<()>)> {
        let queue = Arc::new(BoundedQueue::new(self.ctx.queue_capacity)?);
        let first = FilterStage::spawn(1, &self.ctx, Arc::clone(&queue))?;
        Ok((queue, first))
    }
}

impl Drop for SourceStage {
    fn drop(&mut self) {
        if thread::panicking() {
            self.ctx
                .done
                .raise(Err(SieveError::StagePanicked { stage: 0 }));
        }
    }
}
