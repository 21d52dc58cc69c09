// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
GPU memory objects and the allocator contract.

A texture's storage is a [`Backing`]: nothing yet, an image whose memory the host can map
([`MappedImage`]), or an opaque device image ([`DeviceImage`]).  Host-visible memory is shared
between the host and the device through [`HostMemory`].

Images and buffers release themselves through an optional hook when the last clone is dropped,
so an allocator can reclaim them once every in-flight submission referencing them has let go.
*/

use std::fmt::Debug;
use std::sync::Arc;

use crate::command::ImageLayout;
use crate::error::Error;
use crate::format::{Dimensions, Format, ImageType};
use crate::texture::view::ViewDescriptor;

/// Identifies an image on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageHandle(u64);

/// Identifies a buffer on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u64);

/// Identifies an image view on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ViewHandle(u64);

macro_rules! raw_handle {
    ($name:ident) => {
        impl $name {
            pub const fn new(raw: u64) -> Self {
                $name(raw)
            }
            pub const fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}
raw_handle!(ImageHandle);
raw_handle!(BufferHandle);
raw_handle!(ViewHandle);

bitflags::bitflags! {
    /// What an image may be used for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ImageUsage: u32 {
        const TRANSFER_SRC = 1 << 0;
        const TRANSFER_DST = 1 << 1;
        const SAMPLED = 1 << 2;
        const STORAGE = 1 << 3;
        const COLOR_ATTACHMENT = 1 << 4;
        const DEPTH_STENCIL_ATTACHMENT = 1 << 5;
        const INPUT_ATTACHMENT = 1 << 6;
    }
}

/// How texels are arranged in an image's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageTiling {
    /// Device-specific arrangement; the host cannot address texels directly.
    Optimal,
    /// Row-major; the host can address texels when the memory is mapped.
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SampleCount {
    #[default]
    S1,
    S2,
    S4,
    S8,
    S16,
}

/// Everything needed to allocate an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageCreateInfo {
    pub image_type: ImageType,
    pub format: Format,
    pub extent: Dimensions,
    pub mip_levels: u32,
    pub array_layers: u32,
    pub samples: SampleCount,
    pub tiling: ImageTiling,
    pub usage: ImageUsage,
    pub initial_layout: ImageLayout,
}

/// Memory visible to both the host and the device.
///
/// Clones share the same bytes.
#[derive(Clone)]
pub struct HostMemory {
    bytes: Arc<wasm_safe_mutex::Mutex<Box<[u8]>>>,
    len: usize,
}

impl HostMemory {
    pub fn new(len: usize) -> Self {
        HostMemory {
            bytes: Arc::new(wasm_safe_mutex::Mutex::new(vec![0u8; len].into_boxed_slice())),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let guard = self.bytes.lock_sync();
        f(&guard)
    }

    pub fn write<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.bytes.lock_sync();
        f(&mut guard)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.read(|bytes| bytes.to_vec())
    }

    /// Whether both values refer to the same allocation.
    pub fn same_memory(&self, other: &HostMemory) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

impl Debug for HostMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMemory").field("len", &self.len).finish()
    }
}

type Release<H> = Box<dyn FnOnce(H) + Send + Sync>;

/// A host-visible buffer used to shuttle texel data to or from an image.
pub struct StagingBuffer {
    handle: BufferHandle,
    memory: HostMemory,
    release: Option<Release<BufferHandle>>,
}

impl StagingBuffer {
    pub fn new(handle: BufferHandle, memory: HostMemory) -> Self {
        StagingBuffer {
            handle,
            memory,
            release: None,
        }
    }

    /// Creates a buffer that calls `release` once it is dropped.
    pub fn with_release(
        handle: BufferHandle,
        memory: HostMemory,
        release: impl FnOnce(BufferHandle) + Send + Sync + 'static,
    ) -> Self {
        StagingBuffer {
            handle,
            memory,
            release: Some(Box::new(release)),
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn memory(&self) -> &HostMemory {
        &self.memory
    }
}

impl Drop for StagingBuffer {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.handle);
        }
    }
}

impl Debug for StagingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingBuffer")
            .field("handle", &self.handle)
            .field("memory", &self.memory)
            .finish()
    }
}

struct ImageResource {
    handle: ImageHandle,
    info: ImageCreateInfo,
    release: Option<Release<ImageHandle>>,
}

impl Drop for ImageResource {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.handle);
        }
    }
}

/// An image allocated on the device.
///
/// Clones refer to the same image, which is released when the last clone is dropped.
#[derive(Clone)]
pub struct DeviceImage(Arc<ImageResource>);

impl DeviceImage {
    pub fn new(handle: ImageHandle, info: ImageCreateInfo) -> Self {
        DeviceImage(Arc::new(ImageResource {
            handle,
            info,
            release: None,
        }))
    }

    pub fn with_release(
        handle: ImageHandle,
        info: ImageCreateInfo,
        release: impl FnOnce(ImageHandle) + Send + Sync + 'static,
    ) -> Self {
        DeviceImage(Arc::new(ImageResource {
            handle,
            info,
            release: Some(Box::new(release)),
        }))
    }

    pub fn handle(&self) -> ImageHandle {
        self.0.handle
    }

    pub fn info(&self) -> &ImageCreateInfo {
        &self.0.info
    }
}

impl Debug for DeviceImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceImage")
            .field("handle", &self.0.handle)
            .field("info", &self.0.info)
            .finish()
    }
}

/// A linearly tiled image whose memory is mapped into the host address space.
///
/// On unified memory the host reads and writes texels in place instead of staging them.
#[derive(Debug, Clone)]
pub struct MappedImage {
    image: DeviceImage,
    memory: HostMemory,
}

impl MappedImage {
    pub fn new(image: DeviceImage, memory: HostMemory) -> Self {
        MappedImage { image, memory }
    }

    pub fn handle(&self) -> ImageHandle {
        self.image.handle()
    }

    pub fn image(&self) -> &DeviceImage {
        &self.image
    }

    pub fn memory(&self) -> &HostMemory {
        &self.memory
    }
}

/// The storage currently underlying a texture.
#[derive(Debug, Clone, Default)]
pub enum Backing {
    /// Not available yet; see `Texture::wait_on_backing`.
    #[default]
    None,
    Mapped(MappedImage),
    Device(DeviceImage),
}

impl Backing {
    pub fn image(&self) -> Option<ImageHandle> {
        match self {
            Backing::None => None,
            Backing::Mapped(mapped) => Some(mapped.handle()),
            Backing::Device(image) => Some(image.handle()),
        }
    }

    pub fn is_present(&self) -> bool {
        match self {
            Backing::None => false,
            Backing::Mapped(_) | Backing::Device(_) => true,
        }
    }

    /// How the backing image was created, if there is one.
    pub fn info(&self) -> Option<&ImageCreateInfo> {
        match self {
            Backing::None => None,
            Backing::Mapped(mapped) => Some(mapped.image().info()),
            Backing::Device(image) => Some(image.info()),
        }
    }

    /// The host mapping of the backing, if it has one.
    pub fn mapped_memory(&self) -> Option<&HostMemory> {
        match self {
            Backing::Mapped(mapped) => Some(mapped.memory()),
            Backing::None | Backing::Device(_) => None,
        }
    }
}

impl From<DeviceImage> for Backing {
    fn from(image: DeviceImage) -> Self {
        Backing::Device(image)
    }
}

impl From<MappedImage> for Backing {
    fn from(image: MappedImage) -> Self {
        Backing::Mapped(image)
    }
}

/// Allocates device memory objects.  One instance serves one GPU context.
pub trait Allocator: Send + Sync {
    /// A host-visible buffer of `size` bytes.
    fn allocate_staging_buffer(&self, size: usize) -> Result<Arc<StagingBuffer>, Error>;
    /// An image the host cannot map.
    fn allocate_image(&self, info: &ImageCreateInfo) -> Result<DeviceImage, Error>;
    /// An image whose memory the host can map.
    fn allocate_mapped_image(&self, info: &ImageCreateInfo) -> Result<MappedImage, Error>;
    fn create_view(&self, descriptor: &ViewDescriptor) -> Result<ViewHandle, Error>;
}
