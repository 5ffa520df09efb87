//! Lookup (indirection) texture
//!
//! One texel per mip-0 page. Each texel names the atlas tile that backs the
//! page at the finest resident mip, so a shader resolves a virtual UV with a
//! single fetch. Texels are `(tile_x, tile_y, mip, 255)`; `(0, 0, 0, 0)` means
//! nothing is mapped.
//!
//! The texture is rebuilt from a batch of [`LookupDraw`]s ordered coarse to
//! fine. Finer pages are always nested inside their ancestors, so drawing in
//! that order lets fine pages overwrite the coarse region beneath them.

use bytemuck::{Pod, Zeroable};
use glam::UVec2;
use vtex_core::IRect;

use crate::VirtualTextureConfig;

/// One page to rasterize into the lookup texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupDraw {
    /// Table-space rect, offset undone, inside `[0, table_size)`
    pub rect: IRect,
    /// Atlas tile coordinate of the backing slot
    pub tile: UVec2,
    pub mip: u8,
}

impl LookupDraw {
    /// Texel value written for this page
    pub fn texel(&self) -> [u8; 4] {
        [self.tile.x as u8, self.tile.y as u8, self.mip, u8::MAX]
    }
}

/// Per-instance data for the GPU lookup pass: a unit quad transform plus the
/// texel payload in normalized form.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LookupInstance {
    /// Column-major matrix mapping `[0, 1]²` onto the page's UV rect
    pub transform: [[f32; 4]; 4],
    /// `(tile_x, tile_y, mip, 1) / 255` for an `Rgba8Unorm` target
    pub payload: [f32; 4],
}

impl LookupInstance {
    pub fn new(draw: &LookupDraw, table_size: u32) -> Self {
        let texel = draw.texel();
        Self {
            transform: draw.rect.unit_quad_transform(table_size as i32).to_cols_array_2d(),
            payload: texel.map(|c| c as f32 / 255.0),
        }
    }
}

/// Shader-global virtual texture parameters
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShaderParams {
    /// `(table_size, 1 / table_size, max_mip, 0)`
    pub table: [f32; 4],
    /// `(tile_size, padding_size, region_x, region_y)`
    pub atlas: [f32; 4],
}

impl ShaderParams {
    pub fn from_config(config: &VirtualTextureConfig) -> Self {
        let table_size = config.table_size as f32;
        Self {
            table: [table_size, 1.0 / table_size, config.max_mip() as f32, 0.0],
            atlas: [
                config.tile_size as f32,
                config.padding_size as f32,
                config.region_size.x as f32,
                config.region_size.y as f32,
            ],
        }
    }
}

/// CPU copy of the lookup texture
#[derive(Debug, Clone)]
pub struct LookupTexture {
    size: u32,
    texels: Vec<[u8; 4]>,
}

impl LookupTexture {
    /// Create a cleared `size × size` texture
    pub fn new(size: u32) -> Self {
        Self {
            size,
            texels: vec![[0; 4]; (size * size) as usize],
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Texel at table coordinate `(x, y)`
    pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
        self.texels[(y * self.size + x) as usize]
    }

    pub fn texels(&self) -> &[[u8; 4]] {
        &self.texels
    }

    /// Raw RGBA8 rows for upload
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    /// Clear and rasterize `draws` in order
    pub fn rasterize(&mut self, draws: &[LookupDraw]) {
        self.texels.fill([0; 4]);

        let bounds = IRect::square(0, 0, self.size as i32);
        for draw in draws {
            debug_assert!(bounds.contains_rect(&draw.rect), "lookup rect out of bounds");
            let texel = draw.texel();
            let min = draw.rect.min().max(bounds.min());
            let max = draw.rect.max().min(bounds.max());
            for y in min.y..max.y {
                let row = (y as u32 * self.size) as usize;
                self.texels[row + min.x as usize..row + max.x as usize].fill(texel);
            }
        }
    }
}
