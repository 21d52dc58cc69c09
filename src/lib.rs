/*! guest_textures is the texture-resource engine of a console emulator.

A guest console keeps its textures in its own memory, tiled in whatever arrangement its GPU
prefers.  The host renders with its own GPU, which wants images of its own.  This crate keeps the
two in step:

| Direction     | Operation                              | Path                                                         |
|---------------|----------------------------------------|--------------------------------------------------------------|
| Guest to host | [`texture::Texture::synchronize_host`] | Untile into mapped image memory, or into a staging buffer + GPU copy |
| Host to guest | [`texture::Texture::synchronize_guest`]| Read mapped image memory, or GPU copy + deferred write-back  |
| Host to host  | [`texture::Texture::copy_from`]        | GPU image copy                                               |

# Tiling

Guest textures come in three arrangements, handled by the codecs in [`copy`]:

* **Linear**: packed rows.
* **Pitch-linear**: rows separated by a fixed stride.
* **Block-linear**: 64-byte by 8-line GOBs, stacked into blocks a configurable number of GOBs tall.

# Synchronization

Nothing here talks to a device directly.  Work is recorded into a [`command::CommandBuffer`] and
submitted through a [`scheduler::Scheduler`]; each submission is tracked by a
[`fence::FenceCycle`] that keeps its resources alive and runs deferred work once the GPU is
done.  Memory comes from a [`memory::Allocator`].  Both are bundled into a [`scheduler::Gpu`]
context that textures are created against.

The `backend_soft` feature (on by default) provides [`soft::SoftGpu`], a CPU implementation
of both contracts which validates every barrier it executes.

```
use guest_textures::command::ImageLayout;
use guest_textures::format::{self, Dimensions};
use guest_textures::guest::{GuestMapping, GuestTexture, TileConfig};
use guest_textures::soft::SoftGpu;
use guest_textures::texture::Texture;

let soft = SoftGpu::new().unwrap();
let memory: &'static mut [u8] = Box::leak(vec![7u8; 16 * 16 * 4].into_boxed_slice());
let guest = GuestTexture::new(
    Dimensions::new_2d(16, 16),
    format::R8G8B8A8_UNORM,
    TileConfig::Block { block_height: 2 },
    vec![GuestMapping::from_static(memory)],
);
let texture = Texture::from_guest(soft.gpu(), guest).unwrap();
texture.synchronize_host().unwrap();
texture.synchronize_guest().unwrap();
texture.wait_on_fence().unwrap();
assert_eq!(texture.layout().unwrap(), ImageLayout::General);
assert!(soft.validation_errors().is_empty());
```
*/

pub mod command;
pub mod copy;
pub mod error;
pub mod executor;
pub mod fence;
pub mod format;
pub mod guest;
pub mod memory;
pub mod scheduler;
#[cfg(feature = "backend_soft")]
pub mod soft;
pub mod texture;

pub use error::Error;
pub use executor::CommandExecutor;
pub use fence::FenceCycle;
pub use guest::GuestTexture;
pub use scheduler::Gpu;
pub use texture::{Texture, TextureView};
