// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
A software GPU.

[`SoftGpu`] implements [`crate::scheduler::Scheduler`] and [`crate::memory::Allocator`] on the
CPU.  Images live in host memory, one span per subresource.  A dedicated thread plays the part
of the GPU queue, executing submissions in order and signaling their cycles.

Every barrier is checked against the layout the image is really in, and every copy against the
layout it names, the way a validation layer would.  Mistakes don't fail the submission; they are
collected and can be read back with [`SoftGpu::validation_errors`].

```
use guest_textures::soft::SoftGpu;
use guest_textures::texture::{Texture, TextureBuilder};
use guest_textures::format::{self, Dimensions};
use guest_textures::command::ImageLayout;

let soft = SoftGpu::new().unwrap();
let texture = Texture::freeform(
    soft.gpu(),
    TextureBuilder::new(Dimensions::new_2d(4, 4), format::R8G8B8A8_UNORM)
        .with_initial_layout(ImageLayout::General),
).unwrap();
texture.wait_on_fence().unwrap();
assert_eq!(soft.submission_count(), 1);
assert!(soft.validation_errors().is_empty());
```
*/

mod device;
mod queue;

use std::sync::Arc;

use crate::command::ImageLayout;
use crate::error::Error;
use crate::memory::ImageHandle;
use crate::scheduler::Gpu;
use device::Device;
use queue::Queue;

/// An in-process GPU.  Clones share the same device.
#[derive(Clone)]
pub struct SoftGpu {
    device: Arc<Device>,
    queue: Arc<Queue>,
}

impl SoftGpu {
    pub fn new() -> Result<SoftGpu, Error> {
        let device = Device::new();
        let queue = Arc::new(Queue::spawn(device.clone())?);
        logwise::info_sync!("Soft GPU started");
        Ok(SoftGpu { device, queue })
    }

    /// The context textures are created against.
    pub fn gpu(&self) -> Gpu {
        Gpu::new(self.queue.clone(), self.device.clone())
    }

    /// Every validation message recorded so far, oldest first.
    pub fn validation_errors(&self) -> Vec<String> {
        self.device.validation_errors()
    }

    /// How many command buffers have been submitted.
    pub fn submission_count(&self) -> usize {
        self.queue.submission_count()
    }

    /// The layout `level`/`layer` of `image` is in after every executed command.
    pub fn image_layout(&self, image: ImageHandle, level: u32, layer: u32) -> Option<ImageLayout> {
        self.device.image_layout(image, level, layer)
    }

    /// The bytes of `level`/`layer` of `image`, packed linearly.
    pub fn image_contents(&self, image: ImageHandle, level: u32, layer: u32) -> Option<Vec<u8>> {
        self.device.image_contents(image, level, layer)
    }

    /// Images that have not been released yet.
    pub fn image_count(&self) -> usize {
        self.device.image_count()
    }

    /// Staging buffers that have not been released yet.
    pub fn buffer_count(&self) -> usize {
        self.device.buffer_count()
    }

    /// Views whose image has not been released yet.
    pub fn view_count(&self) -> usize {
        self.device.view_count()
    }
}

impl std::fmt::Debug for SoftGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftGpu")
            .field("submissions", &self.submission_count())
            .finish_non_exhaustive()
    }
}
