// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Batches work against a set of textures into a single submission.

Each registered texture is brought up to date with the guest before any recorded work runs, and
written back to the guest once the batch has executed.  All of it shares one [`FenceCycle`].
*/

use std::sync::Arc;

use crate::command::CommandBuffer;
use crate::error::Error;
use crate::fence::FenceCycle;
use crate::scheduler::Gpu;
use crate::texture::Texture;

type Function = Box<dyn FnOnce(&mut CommandBuffer, &Arc<FenceCycle>) -> Result<(), Error> + Send>;

/// Collects textures and recording functions, then submits them together.
pub struct CommandExecutor {
    gpu: Gpu,
    textures: Vec<Arc<Texture>>,
    functions: Vec<Function>,
}

impl CommandExecutor {
    pub fn new(gpu: Gpu) -> Self {
        CommandExecutor {
            gpu,
            textures: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Registers a texture the batch reads or writes.  Registering it again has no effect.
    pub fn add_texture(&mut self, texture: Arc<Texture>) {
        if !self.textures.iter().any(|t| Arc::ptr_eq(t, &texture)) {
            self.textures.push(texture);
        }
    }

    /// Queues `function` to record into the batch, after every texture has been uploaded.
    pub fn add_function<F>(&mut self, function: F)
    where
        F: FnOnce(&mut CommandBuffer, &Arc<FenceCycle>) -> Result<(), Error> + Send + 'static,
    {
        self.functions.push(Box::new(function));
    }

    /// Whether nothing has been registered since the last execution.
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty() && self.functions.is_empty()
    }

    /// Submits everything registered so far and blocks until the GPU has finished it and the
    /// guest copies are written back.
    ///
    /// The executor is empty afterwards, even if recording failed.  A failed batch submits
    /// nothing, writes nothing back, and leaves each registered texture in the layout it had.
    pub fn execute(&mut self) -> Result<(), Error> {
        if self.is_empty() {
            return Ok(());
        }
        let textures = std::mem::take(&mut self.textures);
        let mut functions = std::mem::take(&mut self.functions);
        logwise::trace_sync!(
            "Executing batch over {textures} textures with {functions} functions",
            textures = textures.len(),
            functions = functions.len()
        );
        let cycle = self.gpu.submit_with_cycle(|commands, cycle| {
            for texture in &textures {
                texture.synchronize_host_with_buffer(commands, cycle)?;
            }
            for function in functions.drain(..) {
                function(commands, cycle)?;
            }
            for texture in &textures {
                texture.synchronize_guest_with_buffer(commands, cycle)?;
            }
            Ok(())
        })?;
        cycle.wait();
        Ok(())
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("textures", &self.textures.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}
