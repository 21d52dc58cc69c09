// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The host side of a guest texture.

A [`Texture`] owns the host GPU image standing in for a region of guest texture memory, tracks
the layout that image is in, and moves texels between the two representations.  It is always
shared through an [`Arc`]: submitted work keeps the texture alive until the GPU is done with
it, while the texture only remembers its latest submission weakly.

# Ordering

Every operation that touches the image first waits for a backing to exist and for the latest
submission to retire, then changes the texture under its state lock.  The lock is not held while
waiting, so completion tasks may query the texture.  This gives all operations on one texture a
total order.  The exceptions are the `*_with_buffer` variants, which record into a caller's
batch and do not wait on a submission that belongs to that same batch.  Should that batch be
cancelled instead of submitted, the layout they recorded is rolled back.
*/

mod builder;
mod sync;
pub mod view;
mod writeback;

pub use builder::TextureBuilder;
pub use view::{ComponentMapping, ComponentSwizzle, ImageViewType, TextureView, ViewDescriptor};

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use crate::command::{Access, ImageBarrier, ImageCopy, ImageLayout, PipelineStage, SubresourceLayers, SubresourceRange};
use crate::error::Error;
use crate::fence::FenceCycle;
use crate::format::{Dimensions, Format};
use crate::guest::{GuestTexture, TileMode};
use crate::memory::{Backing, ImageCreateInfo, ImageHandle, ImageTiling, ImageUsage, SampleCount, ViewHandle};
use crate::scheduler::Gpu;

/// Host-side properties of a texture built around an existing backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureInfo {
    pub dimensions: Dimensions,
    pub format: Format,
    /// The layout the backing is in right now.
    pub layout: ImageLayout,
    pub tiling: ImageTiling,
    pub mip_levels: u32,
    pub layer_count: u32,
    pub samples: SampleCount,
}

impl TextureInfo {
    /// A single-level, single-layer, optimally tiled image in the undefined layout.
    pub fn new(dimensions: Dimensions, format: Format) -> Self {
        TextureInfo {
            dimensions,
            format,
            layout: ImageLayout::Undefined,
            tiling: ImageTiling::Optimal,
            mip_levels: 1,
            layer_count: 1,
            samples: SampleCount::S1,
        }
    }

    pub fn with_layout(mut self, layout: ImageLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_tiling(mut self, tiling: ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_layer_count(mut self, layer_count: u32) -> Self {
        self.layer_count = layer_count;
        self
    }
}

struct TextureState {
    backing: Backing,
    layout: ImageLayout,
    /// The latest submission touching the image.
    cycle: Weak<FenceCycle>,
}

/// A host GPU image mirroring (optionally) a guest texture.
pub struct Texture {
    gpu: Gpu,
    this: Weak<Texture>,
    dimensions: Dimensions,
    format: Format,
    tiling: ImageTiling,
    mip_levels: u32,
    layer_count: u32,
    samples: SampleCount,
    guest: Option<GuestTexture>,
    state: Mutex<TextureState>,
    backing_changed: Condvar,
    views: wasm_safe_mutex::Mutex<HashMap<ViewDescriptor, ViewHandle>>,
}

impl Texture {
    fn assemble(gpu: Gpu, backing: Backing, guest: Option<GuestTexture>, info: TextureInfo) -> Arc<Texture> {
        Arc::new_cyclic(|this| Texture {
            gpu,
            this: this.clone(),
            dimensions: info.dimensions,
            format: info.format,
            tiling: info.tiling,
            mip_levels: info.mip_levels,
            layer_count: info.layer_count,
            samples: info.samples,
            guest,
            state: Mutex::new(TextureState {
                backing,
                layout: info.layout,
                cycle: Weak::new(),
            }),
            backing_changed: Condvar::new(),
            views: wasm_safe_mutex::Mutex::new(HashMap::new()),
        })
    }

    /// Creates a texture over `backing` that mirrors `guest`.
    ///
    /// When the backing is already present the guest contents are uploaded straight away.
    pub fn new(gpu: Gpu, backing: Backing, guest: GuestTexture, info: TextureInfo) -> Result<Arc<Texture>, Error> {
        check_backing(&backing, &info)?;
        let upload = backing.is_present();
        let texture = Texture::assemble(gpu, backing, Some(guest), info);
        if upload {
            texture.synchronize_host()?;
        }
        Ok(texture)
    }

    /// Creates a host-only texture over `backing`.
    pub fn from_backing(gpu: Gpu, backing: Backing, info: TextureInfo) -> Result<Arc<Texture>, Error> {
        check_backing(&backing, &info)?;
        Ok(Texture::assemble(gpu, backing, None, info))
    }

    /// Allocates an image suitable for holding `guest` and returns it in the general layout.
    ///
    /// Block-linear guests get an optimally tiled image.  Everything else gets a linear image
    /// the host can map, so synchronization can skip the staging buffer.  Contents are not
    /// uploaded; call [`Texture::synchronize_host`] for that.
    pub fn from_guest(gpu: Gpu, guest: GuestTexture) -> Result<Arc<Texture>, Error> {
        let tiling = match guest.tile_config.mode() {
            TileMode::Block => ImageTiling::Optimal,
            TileMode::Pitch | TileMode::Linear => ImageTiling::Linear,
        };
        let create_info = ImageCreateInfo {
            image_type: guest.dimensions.image_type(),
            format: guest.format,
            extent: guest.dimensions,
            mip_levels: 1,
            array_layers: guest.layer_count,
            samples: SampleCount::S1,
            tiling,
            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
            initial_layout: ImageLayout::Undefined,
        };
        let backing = match tiling {
            ImageTiling::Optimal => Backing::from(gpu.allocator().allocate_image(&create_info)?),
            ImageTiling::Linear => Backing::from(gpu.allocator().allocate_mapped_image(&create_info)?),
        };
        let info = TextureInfo {
            dimensions: guest.dimensions,
            format: guest.format,
            layout: ImageLayout::Undefined,
            tiling,
            mip_levels: 1,
            layer_count: guest.layer_count,
            samples: SampleCount::S1,
        };
        logwise::trace_sync!(
            "Allocating texture for guest {guest}",
            guest = logwise::privacy::LogIt(&guest.tile_config)
        );
        let texture = Texture::assemble(gpu, backing, Some(guest), info);
        texture.transition_layout(ImageLayout::General)?;
        Ok(texture)
    }

    /// Allocates a host-only texture as configured by `builder`.
    pub fn freeform(gpu: Gpu, builder: TextureBuilder) -> Result<Arc<Texture>, Error> {
        let allocation_layout = match builder.initial_layout() {
            ImageLayout::Preinitialized => ImageLayout::Preinitialized,
            _ => ImageLayout::Undefined,
        };
        let create_info = ImageCreateInfo {
            image_type: builder.dimensions().image_type(),
            format: builder.format(),
            extent: builder.dimensions(),
            mip_levels: builder.mip_levels(),
            array_layers: builder.layer_count(),
            samples: builder.samples(),
            tiling: builder.tiling(),
            usage: builder.usage() | ImageUsage::TRANSFER_SRC | ImageUsage::TRANSFER_DST,
            initial_layout: allocation_layout,
        };
        let backing = match builder.tiling() {
            ImageTiling::Optimal => Backing::from(gpu.allocator().allocate_image(&create_info)?),
            ImageTiling::Linear => Backing::from(gpu.allocator().allocate_mapped_image(&create_info)?),
        };
        let info = TextureInfo {
            dimensions: builder.dimensions(),
            format: builder.format(),
            layout: allocation_layout,
            tiling: builder.tiling(),
            mip_levels: builder.mip_levels(),
            layer_count: builder.layer_count(),
            samples: builder.samples(),
        };
        let texture = Texture::assemble(gpu, backing, None, info);
        if builder.initial_layout() != allocation_layout {
            texture.transition_layout(builder.initial_layout())?;
        }
        Ok(texture)
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn tiling(&self) -> ImageTiling {
        self.tiling
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    pub fn samples(&self) -> SampleCount {
        self.samples
    }

    pub fn guest(&self) -> Option<&GuestTexture> {
        self.guest.as_ref()
    }

    /// The layout the image will be in once every recorded operation has executed.
    pub fn layout(&self) -> Result<ImageLayout, Error> {
        Ok(self.state.lock()?.layout)
    }

    /// The image currently backing the texture, or `None` if it isn't ready yet.
    pub fn backing(&self) -> Result<Option<ImageHandle>, Error> {
        Ok(self.state.lock()?.backing.image())
    }

    /// Blocks until the texture has a backing.
    ///
    /// Returns whether it had to wait.
    pub fn wait_on_backing(&self) -> Result<bool, Error> {
        let state = self.state.lock()?;
        if state.backing.is_present() {
            return Ok(false);
        }
        let _perf = logwise::perfwarn_begin!("Texture::wait_on_backing");
        let _state = self
            .backing_changed
            .wait_while(state, |state| !state.backing.is_present())?;
        Ok(true)
    }

    /// Blocks until the latest submission touching the image has completed.
    pub fn wait_on_fence(&self) -> Result<(), Error> {
        self.lock_settled(None, false)?;
        Ok(())
    }

    /// Replaces the backing, which is in `layout`, once the GPU is done with the old one.
    ///
    /// The backing must match the texture's dimensions, format, level and layer counts.
    pub fn swap_backing(&self, backing: Backing, layout: ImageLayout) -> Result<(), Error> {
        check_backing(&backing, &self.info(layout))?;
        let mut state = self.lock_settled(None, false)?;
        let present = backing.is_present();
        state.backing = backing;
        state.layout = layout;
        drop(state);
        if present {
            self.backing_changed.notify_all();
        }
        Ok(())
    }

    /// Moves the image into `layout`.
    ///
    /// Does nothing, and submits nothing, when the image is already in `layout`.
    pub fn transition_layout(&self, layout: ImageLayout) -> Result<(), Error> {
        let mut state = self.lock_settled(None, true)?;
        if state.layout == layout {
            return Ok(());
        }
        let image = state.backing.image().ok_or(Error::NoBacking)?;
        let barrier = self.layout_barrier(image, state.layout, layout);
        let cycle = self.gpu.submit_with_cycle(|commands, cycle| {
            commands.pipeline_barrier(barrier);
            self.attach_to(cycle);
            Ok(())
        })?;
        state.layout = layout;
        state.cycle = Arc::downgrade(&cycle);
        Ok(())
    }

    /// Copies `range` of `source` into the same subresources of this texture.
    ///
    /// Both textures must share dimensions and format, `source` must hold defined contents, and
    /// `range`, resolved against this texture, must exist in both.
    pub fn copy_from(&self, source: &Arc<Texture>, range: SubresourceRange) -> Result<(), Error> {
        if std::ptr::eq(self, Arc::as_ptr(source)) {
            return Err(Error::CopySelf);
        }
        self.wait_on_backing()?;
        source.wait_on_backing()?;
        let (mut destination, mut source_state) = loop {
            // Lock in address order so that concurrent copies in opposite directions can't deadlock.
            let (destination, source_state) = if (self as *const Texture) < Arc::as_ptr(source) {
                let destination = self.state.lock()?;
                (destination, source.state.lock()?)
            } else {
                let source_state = source.state.lock()?;
                (self.state.lock()?, source_state)
            };
            let pending = [&destination.cycle, &source_state.cycle]
                .into_iter()
                .find_map(|cycle| cycle.upgrade().filter(|cycle| !cycle.poll()));
            match pending {
                Some(cycle) => {
                    drop(destination);
                    drop(source_state);
                    cycle.wait();
                }
                None => break (destination, source_state),
            }
        };

        if source_state.layout == ImageLayout::Undefined {
            return Err(Error::CopyFromUndefined);
        }
        if source.dimensions != self.dimensions {
            return Err(Error::CopyDimensionMismatch);
        }
        if source.format != self.format {
            return Err(Error::CopyFormatMismatch);
        }
        let range = range.resolve(self.mip_levels, self.layer_count);
        if !range_fits(&range, self.mip_levels, self.layer_count) || !range_fits(&range, source.mip_levels, source.layer_count) {
            return Err(Error::CopyRangeOutOfBounds(range));
        }
        let src_image = source_state.backing.image().ok_or(Error::NoBacking)?;
        let dst_image = destination.backing.image().ok_or(Error::NoBacking)?;
        let src_layout = source_state.layout;
        let dst_layout = destination.layout;

        let cycle = self.gpu.submit_with_cycle(|commands, cycle| {
            if src_layout != ImageLayout::TransferSrcOptimal {
                commands.pipeline_barrier(transfer_barrier(src_image, range, src_layout, ImageLayout::TransferSrcOptimal));
            }
            if dst_layout != ImageLayout::TransferDstOptimal {
                commands.pipeline_barrier(transfer_barrier(dst_image, range, dst_layout, ImageLayout::TransferDstOptimal));
            }
            for level in range.base_mip_level..range.base_mip_level + range.level_count {
                let subresource = SubresourceLayers {
                    aspect: range.aspect,
                    mip_level: level,
                    base_array_layer: range.base_array_layer,
                    layer_count: range.layer_count,
                };
                commands.copy_image(
                    src_image,
                    ImageLayout::TransferSrcOptimal,
                    dst_image,
                    ImageLayout::TransferDstOptimal,
                    ImageCopy {
                        src_subresource: subresource,
                        dst_subresource: subresource,
                        extent: self.dimensions.mip(level),
                    },
                );
            }
            if src_layout != ImageLayout::TransferSrcOptimal {
                commands.pipeline_barrier(restore_barrier(src_image, range, ImageLayout::TransferSrcOptimal, src_layout));
            }
            if dst_layout != ImageLayout::TransferDstOptimal && dst_layout != ImageLayout::Undefined {
                commands.pipeline_barrier(restore_barrier(dst_image, range, ImageLayout::TransferDstOptimal, dst_layout));
            }
            source.attach_to(cycle);
            self.attach_to(cycle);
            Ok(())
        })?;

        if dst_layout == ImageLayout::Undefined {
            destination.layout = ImageLayout::TransferDstOptimal;
        }
        destination.cycle = Arc::downgrade(&cycle);
        source_state.cycle = Arc::downgrade(&cycle);
        Ok(())
    }

    /// Returns the cached view matching `descriptor`, creating it on first use.
    pub(crate) fn view_for(&self, descriptor: ViewDescriptor) -> Result<ViewHandle, Error> {
        let mut views = self.views.lock_sync();
        if let Some(view) = views.get(&descriptor) {
            return Ok(*view);
        }
        let view = self.gpu.allocator().create_view(&descriptor)?;
        views.insert(descriptor, view);
        Ok(view)
    }

    /// Takes the state lock once a backing exists.
    fn lock_with_backing(&self) -> Result<MutexGuard<'_, TextureState>, Error> {
        let state = self.state.lock()?;
        if state.backing.is_present() {
            return Ok(state);
        }
        let _perf = logwise::perfwarn_begin!("Texture::lock_with_backing");
        Ok(self
            .backing_changed
            .wait_while(state, |state| !state.backing.is_present())?)
    }

    /// Takes the state lock once the latest submission has completed, unless it is `current`,
    /// the batch being recorded.  With `backing` set, also waits for a backing to exist.
    ///
    /// The lock is released while waiting on a fence and retaken afterwards.
    fn lock_settled(&self, current: Option<&Arc<FenceCycle>>, backing: bool) -> Result<MutexGuard<'_, TextureState>, Error> {
        let mut state = self.state.lock()?;
        loop {
            if backing && !state.backing.is_present() {
                let _perf = logwise::perfwarn_begin!("Texture::lock_settled");
                state = self
                    .backing_changed
                    .wait_while(state, |state| !state.backing.is_present())?;
            }
            let pending = state.cycle.upgrade();
            match pending {
                Some(cycle) if current.is_some_and(|current| Arc::ptr_eq(current, &cycle)) => return Ok(state),
                Some(cycle) if !cycle.poll() => {
                    drop(state);
                    cycle.wait();
                    state = self.state.lock()?;
                }
                _ => {
                    state.cycle = Weak::new();
                    return Ok(state);
                }
            }
        }
    }

    /// Makes `cycle`, still being recorded, the latest submission touching the image.  If the
    /// cycle is cancelled the image goes back to `previous`.
    fn track(&self, state: &mut TextureState, cycle: &Arc<FenceCycle>, previous: ImageLayout) {
        state.cycle = Arc::downgrade(cycle);
        let texture = self.this.clone();
        let recorded = Arc::downgrade(cycle);
        cycle.on_cancel(move || {
            if let Some(texture) = texture.upgrade() {
                texture.undo(&recorded, previous);
            }
        });
    }

    fn undo(&self, cycle: &Weak<FenceCycle>, layout: ImageLayout) {
        match self.state.lock() {
            Ok(mut state) => {
                if Weak::ptr_eq(&state.cycle, cycle) {
                    state.layout = layout;
                }
            }
            Err(_) => {
                logwise::error_sync!("Texture state poisoned; cannot roll back a cancelled recording");
            }
        }
    }

    fn info(&self, layout: ImageLayout) -> TextureInfo {
        TextureInfo {
            dimensions: self.dimensions,
            format: self.format,
            layout,
            tiling: self.tiling,
            mip_levels: self.mip_levels,
            layer_count: self.layer_count,
            samples: self.samples,
        }
    }

    /// Keeps this texture alive until `cycle` completes.
    fn attach_to(&self, cycle: &Arc<FenceCycle>) {
        if let Some(this) = self.this.upgrade() {
            cycle.attach(this);
        }
    }

    fn whole_range(&self) -> SubresourceRange {
        SubresourceRange {
            aspect: self.format.aspect,
            base_mip_level: 0,
            level_count: self.mip_levels,
            base_array_layer: 0,
            layer_count: self.layer_count,
        }
    }

    fn layout_barrier(&self, image: ImageHandle, old_layout: ImageLayout, new_layout: ImageLayout) -> ImageBarrier {
        ImageBarrier {
            image,
            src_stage: PipelineStage::TOP_OF_PIPE,
            dst_stage: PipelineStage::BOTTOM_OF_PIPE,
            src_access: Access::empty(),
            dst_access: Access::empty(),
            old_layout,
            new_layout,
            range: self.whole_range(),
        }
    }
}

/// Rejects a backing whose image can't hold what `info` describes.
fn check_backing(backing: &Backing, info: &TextureInfo) -> Result<(), Error> {
    let Some(image) = backing.info() else {
        return Ok(());
    };
    if image.extent != info.dimensions {
        return Err(Error::BackingMismatch("extent"));
    }
    if image.format != info.format {
        return Err(Error::BackingMismatch("format"));
    }
    if image.mip_levels != info.mip_levels {
        return Err(Error::BackingMismatch("mip level count"));
    }
    if image.array_layers != info.layer_count {
        return Err(Error::BackingMismatch("layer count"));
    }
    if let Some(memory) = backing.mapped_memory() {
        if memory.len() < info.format.size(info.dimensions) * info.layer_count as usize {
            return Err(Error::BackingMismatch("mapping size"));
        }
    }
    Ok(())
}

fn range_fits(range: &SubresourceRange, mip_levels: u32, layer_count: u32) -> bool {
    let levels = range.base_mip_level.checked_add(range.level_count);
    let layers = range.base_array_layer.checked_add(range.layer_count);
    range.level_count > 0
        && range.layer_count > 0
        && levels.is_some_and(|end| end <= mip_levels)
        && layers.is_some_and(|end| end <= layer_count)
}

/// Moves `range` into a transfer layout ahead of a copy.
fn transfer_barrier(image: ImageHandle, range: SubresourceRange, old_layout: ImageLayout, new_layout: ImageLayout) -> ImageBarrier {
    let dst_access = match new_layout {
        ImageLayout::TransferSrcOptimal => Access::TRANSFER_READ,
        _ => Access::TRANSFER_WRITE,
    };
    ImageBarrier {
        image,
        src_stage: PipelineStage::TOP_OF_PIPE,
        dst_stage: PipelineStage::TRANSFER,
        src_access: Access::MEMORY_READ | Access::MEMORY_WRITE,
        dst_access,
        old_layout,
        new_layout,
        range,
    }
}

/// Returns `range` to its logical layout after a copy.
fn restore_barrier(image: ImageHandle, range: SubresourceRange, old_layout: ImageLayout, new_layout: ImageLayout) -> ImageBarrier {
    let src_access = match old_layout {
        ImageLayout::TransferSrcOptimal => Access::TRANSFER_READ,
        _ => Access::TRANSFER_WRITE,
    };
    ImageBarrier {
        image,
        src_stage: PipelineStage::TRANSFER,
        dst_stage: PipelineStage::BOTTOM_OF_PIPE,
        src_access,
        dst_access: Access::MEMORY_READ | Access::MEMORY_WRITE,
        old_layout,
        new_layout,
        range,
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        match self.state.get_mut() {
            Ok(state) => {
                if let Some(cycle) = state.cycle.upgrade() {
                    cycle.wait();
                }
            }
            Err(_) => {
                logwise::error_sync!("Texture state poisoned during teardown; not waiting on its fence");
            }
        }
    }
}

impl Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("dimensions", &self.dimensions)
            .field("format", &self.format)
            .field("tiling", &self.tiling)
            .field("mip_levels", &self.mip_levels)
            .field("layer_count", &self.layer_count)
            .field("guest", &self.guest)
            .finish_non_exhaustive()
    }
}
