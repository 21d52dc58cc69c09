// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! The software GPU queue: a thread that executes submissions in order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use logwise::context::Context;

use super::device::Device;
use crate::command::CommandBuffer;
use crate::error::Error;
use crate::fence::FenceCycle;
use crate::scheduler::{Recorder, Scheduler};

struct Submission {
    commands: CommandBuffer,
    cycle: Arc<FenceCycle>,
}

pub(crate) struct Queue {
    sender: Option<Sender<Submission>>,
    thread: Option<JoinHandle<()>>,
    submissions: AtomicUsize,
}

impl Queue {
    pub(crate) fn spawn(device: Arc<Device>) -> Result<Queue, Error> {
        let (sender, receiver) = mpsc::channel();
        let parent = Context::current();
        let thread = thread::Builder::new()
            .name("soft_gpu_queue".to_string())
            .spawn(move || run(device, receiver, parent))
            .map_err(|e| Error::Device(format!("failed to spawn queue thread: {e}")))?;
        Ok(Queue {
            sender: Some(sender),
            thread: Some(thread),
            submissions: AtomicUsize::new(0),
        })
    }

    pub(crate) fn submission_count(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }
}

fn run(device: Arc<Device>, receiver: Receiver<Submission>, parent: Context) {
    let context = Context::new_task(Some(parent), "soft_gpu_queue".to_string());
    let id = context.context_id();
    context.set_current();
    for Submission { commands, cycle } in receiver {
        logwise::trace_sync!(
            "Executing {count} commands for cycle {cycle}",
            count = commands.len(),
            cycle = cycle.id()
        );
        device.execute(commands.into_commands());
        cycle.signal();
    }
    Context::pop(id);
}

impl Scheduler for Queue {
    fn submit_with_cycle(&self, record: &mut Recorder<'_>) -> Result<Arc<FenceCycle>, Error> {
        let cycle = FenceCycle::new();
        let mut commands = CommandBuffer::new();
        if let Err(error) = record(&mut commands, &cycle) {
            cycle.cancel();
            return Err(error);
        }
        let Some(sender) = self.sender.as_ref() else {
            cycle.cancel();
            return Err(Error::Device(String::from("queue is shut down")));
        };
        self.submissions.fetch_add(1, Ordering::Relaxed);
        let submission = Submission {
            commands,
            cycle: cycle.clone(),
        };
        if sender.send(submission).is_err() {
            self.submissions.fetch_sub(1, Ordering::Relaxed);
            cycle.cancel();
            return Err(Error::Device(String::from("queue thread exited")));
        }
        Ok(cycle)
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain what's left and exit.
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            // The last reference may be released by a completion on the queue thread itself.
            if thread.thread().id() == thread::current().id() {
                return;
            }
            if thread.join().is_err() {
                logwise::error_sync!("Soft GPU queue thread panicked");
            }
        }
    }
}
