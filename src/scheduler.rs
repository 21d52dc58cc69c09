// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Submission of recorded work to the GPU queue.

There is one logical queue per [`Gpu`]; submission order is execution order.  Each submission
is tracked by a fresh [`FenceCycle`].
*/

use std::fmt::Debug;
use std::sync::Arc;

use crate::command::CommandBuffer;
use crate::error::Error;
use crate::fence::FenceCycle;
use crate::memory::Allocator;

/// Records commands for one submission.  The cycle is the one that will track the submission.
pub type Recorder<'a> = dyn FnMut(&mut CommandBuffer, &Arc<FenceCycle>) -> Result<(), Error> + 'a;

/// Submits command buffers to the GPU queue.
pub trait Scheduler: Send + Sync {
    /// Allocates a command buffer and a fresh cycle, lets `record` fill the buffer, submits it
    /// and returns the cycle that tracks it.
    ///
    /// When `record` fails, or the submission can't be made, nothing is submitted, the cycle is
    /// cancelled with [`FenceCycle::cancel`] and the error is returned.
    fn submit_with_cycle(&self, record: &mut Recorder<'_>) -> Result<Arc<FenceCycle>, Error>;

    /// Like [`Scheduler::submit_with_cycle`], for recorders that don't need the cycle.
    fn submit(
        &self,
        record: &mut dyn FnMut(&mut CommandBuffer) -> Result<(), Error>,
    ) -> Result<Arc<FenceCycle>, Error> {
        self.submit_with_cycle(&mut |commands: &mut CommandBuffer, _cycle: &Arc<FenceCycle>| {
            record(commands)
        })
    }
}

/// The GPU services a texture needs.
///
/// Cloning is cheap; clones share the same scheduler and allocator.
#[derive(Clone)]
pub struct Gpu {
    scheduler: Arc<dyn Scheduler>,
    allocator: Arc<dyn Allocator>,
}

impl Gpu {
    pub fn new(scheduler: Arc<dyn Scheduler>, allocator: Arc<dyn Allocator>) -> Self {
        Gpu {
            scheduler,
            allocator,
        }
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        &*self.scheduler
    }

    pub fn allocator(&self) -> &dyn Allocator {
        &*self.allocator
    }

    pub fn submit_with_cycle<F>(&self, mut record: F) -> Result<Arc<FenceCycle>, Error>
    where
        F: FnMut(&mut CommandBuffer, &Arc<FenceCycle>) -> Result<(), Error>,
    {
        self.scheduler.submit_with_cycle(&mut record)
    }

    pub fn submit<F>(&self, mut record: F) -> Result<Arc<FenceCycle>, Error>
    where
        F: FnMut(&mut CommandBuffer) -> Result<(), Error>,
    {
        self.scheduler.submit(&mut record)
    }
}

impl Debug for Gpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpu").finish_non_exhaustive()
    }
}
