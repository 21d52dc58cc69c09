// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
GPU views of a texture.

Views are created lazily and cached on their texture, keyed by everything that goes into
creating one.  Two [`TextureView`]s that describe the same view of the same image share one
device object.

The cache is keyed by image handle, so views created before [`super::Texture::swap_backing`]
stay in the cache after it.  A [`TextureView`] that already resolved its view keeps returning
the old handle; callers that swap backings must build fresh views.
*/

use std::sync::Arc;

use super::Texture;
use crate::command::SubresourceRange;
use crate::error::Error;
use crate::format::{Format, ImageType};
use crate::memory::{ImageHandle, ViewHandle};

/// How a view interprets its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageViewType {
    D1,
    D2,
    D3,
    Cube,
    D1Array,
    D2Array,
    CubeArray,
}

impl ImageViewType {
    /// The view type for `layer_count` layers of an image of `image_type`.
    ///
    /// More than one layer selects the array variant.  3D images have no array variant.
    pub fn derive(image_type: ImageType, layer_count: u32) -> Self {
        match (image_type, layer_count > 1) {
            (ImageType::D1, false) => ImageViewType::D1,
            (ImageType::D1, true) => ImageViewType::D1Array,
            (ImageType::D2, false) => ImageViewType::D2,
            (ImageType::D2, true) => ImageViewType::D2Array,
            (ImageType::D3, _) => ImageViewType::D3,
        }
    }
}

/// Where a view reads one component from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ComponentSwizzle {
    #[default]
    Identity,
    Zero,
    One,
    R,
    G,
    B,
    A,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ComponentMapping {
    pub r: ComponentSwizzle,
    pub g: ComponentSwizzle,
    pub b: ComponentSwizzle,
    pub a: ComponentSwizzle,
}

/// Everything needed to create a view.  Views are deduplicated by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDescriptor {
    pub image: ImageHandle,
    pub view_type: ImageViewType,
    pub format: Format,
    pub components: ComponentMapping,
    pub range: SubresourceRange,
}

/// A view of some subresources of a texture.
pub struct TextureView {
    texture: Arc<Texture>,
    format: Option<Format>,
    components: ComponentMapping,
    range: SubresourceRange,
    view: wasm_safe_mutex::Mutex<Option<ViewHandle>>,
}

impl TextureView {
    /// Describes a view of `range`.
    ///
    /// `format` reinterprets the texels; `None` keeps the texture's format.
    pub fn new(
        texture: Arc<Texture>,
        format: Option<Format>,
        components: ComponentMapping,
        range: SubresourceRange,
    ) -> Self {
        TextureView {
            texture,
            format,
            components,
            range,
            view: wasm_safe_mutex::Mutex::new(None),
        }
    }

    pub fn texture(&self) -> &Arc<Texture> {
        &self.texture
    }

    pub fn format(&self) -> Format {
        self.format.unwrap_or(self.texture.format())
    }

    pub fn range(&self) -> SubresourceRange {
        self.range
    }

    /// The descriptor this view is created from, against the texture's current backing.
    pub fn descriptor(&self) -> Result<ViewDescriptor, Error> {
        let image = self.texture.backing()?.ok_or(Error::NoBacking)?;
        let range = self
            .range
            .resolve(self.texture.mip_levels(), self.texture.layer_count());
        Ok(ViewDescriptor {
            image,
            view_type: ImageViewType::derive(self.texture.dimensions().image_type(), range.layer_count),
            format: self.format(),
            components: self.components,
            range,
        })
    }

    /// The device view, created on first use and cached afterwards.
    pub fn view(&self) -> Result<ViewHandle, Error> {
        let mut view = self.view.lock_sync();
        if let Some(view) = *view {
            return Ok(view);
        }
        let created = self.texture.view_for(self.descriptor()?)?;
        *view = Some(created);
        Ok(created)
    }
}

impl std::fmt::Debug for TextureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureView")
            .field("format", &self.format)
            .field("components", &self.components)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}
