// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-generation composite engines.
//!
//! Each hardware generation implements the same four-step interface:
//! `check` decides whether the operation can run on the GPU at all,
//! `prepare` pins the pictures and emits destination state, `execute` draws
//! one rectangle and `finish` closes the operation. The engine is picked once
//! from the configured generation.

pub mod i830;
pub mod i915;
pub mod i965;

use intelddx_common::error::{AccelError, AccelResult};
use intelddx_common::Generation;

use crate::batch::BatchBuffer;
use crate::bufmgr::BufferObject;
use crate::regs::{PRIM3D_INLINE, PRIM3D_RECTLIST};

use self::i830::I830Composite;
use self::i915::I915Composite;
use self::i965::I965Composite;

// ── Generation limits ───────────────────────────────────────────────────────

/// Surface constraints of the 2D and 3D engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationLimits {
    /// Required alignment of a surface's byte offset.
    pub offset_align: u32,
    /// Required alignment of a surface's pitch.
    pub pitch_align: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl GenerationLimits {
    pub fn for_generation(generation: Generation) -> Self {
        if generation.is_i965() {
            Self {
                offset_align: 8,
                pitch_align: 16,
                max_x: 8192,
                max_y: 8192,
            }
        } else {
            Self {
                offset_align: 4,
                pitch_align: 16,
                max_x: 2048,
                max_y: 2048,
            }
        }
    }

    pub fn surface_aligned(&self, offset: u32, pitch: u32) -> bool {
        offset % self.offset_align == 0 && pitch % self.pitch_align == 0
    }

    pub fn fits(&self, width: u32, height: u32) -> bool {
        width <= self.max_x && height <= self.max_y
    }
}

// ── Picture description ─────────────────────────────────────────────────────

/// Render extension picture operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOp {
    Clear,
    Src,
    Dst,
    Over,
    OverReverse,
    In,
    InReverse,
    Out,
    OutReverse,
    Atop,
    AtopReverse,
    Xor,
    Add,
    Saturate,
}

impl CompositeOp {
    pub fn from_raw(op: u8) -> Option<Self> {
        use CompositeOp::*;
        const OPS: [CompositeOp; 14] = [
            Clear,
            Src,
            Dst,
            Over,
            OverReverse,
            In,
            InReverse,
            Out,
            OutReverse,
            Atop,
            AtopReverse,
            Xor,
            Add,
            Saturate,
        ];
        OPS.get(op as usize).copied()
    }

    /// Whether the destination blend factor reads source alpha.
    pub fn dst_uses_src_alpha(self) -> bool {
        matches!(
            self,
            Self::Over
                | Self::InReverse
                | Self::OutReverse
                | Self::Atop
                | Self::AtopReverse
                | Self::Xor
        )
    }
}

/// Picture pixel formats the engines know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictFormat {
    A8R8G8B8,
    X8R8G8B8,
    A8B8G8R8,
    X8B8G8R8,
    R5G6B5,
    A1R5G5B5,
    X1R5G5B5,
    A8,
}

impl PictFormat {
    pub fn bpp(self) -> u32 {
        match self {
            Self::A8R8G8B8 | Self::X8R8G8B8 | Self::A8B8G8R8 | Self::X8B8G8R8 => 32,
            Self::R5G6B5 | Self::A1R5G5B5 | Self::X1R5G5B5 => 16,
            Self::A8 => 8,
        }
    }
}

/// A picture bound to its backing buffer.
#[derive(Debug, Clone)]
pub struct Picture {
    pub bo: BufferObject,
    pub format: PictFormat,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    /// Byte offset of the picture within `bo`.
    pub offset: u32,
    pub tiled: bool,
    pub component_alpha: bool,
    pub transformed: bool,
}

impl Picture {
    pub fn new(bo: &BufferObject, format: PictFormat, width: u32, height: u32, pitch: u32) -> Self {
        Self {
            bo: bo.clone(),
            format,
            width,
            height,
            pitch,
            offset: 0,
            tiled: false,
            component_alpha: false,
            transformed: false,
        }
    }
}

/// One composite rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompositeRect {
    pub src_x: i32,
    pub src_y: i32,
    pub mask_x: i32,
    pub mask_y: i32,
    pub dst_x: i32,
    pub dst_y: i32,
    pub width: u32,
    pub height: u32,
}

/// Checks shared by every generation.
pub(crate) fn check_common(
    limits: &GenerationLimits,
    op: CompositeOp,
    src: &Picture,
    mask: Option<&Picture>,
    dst: &Picture,
) -> AccelResult<()> {
    if op == CompositeOp::Saturate {
        return Err(AccelError::Fallback("unsupported composite operator"));
    }
    // Component alpha needs per-channel source alpha in the blender.
    if mask.is_some_and(|m| m.component_alpha) && op.dst_uses_src_alpha() {
        return Err(AccelError::Fallback("component alpha with source-alpha blend"));
    }
    for pict in std::iter::once(src).chain(mask).chain(std::iter::once(dst)) {
        if pict.width == 0 || pict.height == 0 {
            return Err(AccelError::Fallback("empty picture"));
        }
        if !limits.fits(pict.width, pict.height) {
            return Err(AccelError::Fallback("picture exceeds 3D size limit"));
        }
    }
    Ok(())
}

/// Reject surfaces the 3D engine cannot address.
pub(crate) fn check_alignment(limits: &GenerationLimits, pict: &Picture) -> AccelResult<()> {
    if !limits.surface_aligned(pict.offset, pict.pitch) {
        log::debug!(
            "composite: bad alignment offset=0x{:X} pitch={}",
            pict.offset,
            pict.pitch
        );
        return Err(AccelError::Fallback("picture offset or pitch misaligned"));
    }
    Ok(())
}

/// Texture coordinate of `pos` within a `size`-long edge, as float bits.
pub(crate) fn texcoord(pos: i32, size: u32) -> u32 {
    (pos as f32 / size.max(1) as f32).to_bits()
}

/// Emit a three-vertex inline rectangle list covering `rect`.
///
/// Each vertex carries the destination position followed by one normalized
/// texture coordinate pair per bound texture.
pub(crate) fn emit_inline_rectlist(
    batch: &mut BatchBuffer,
    rect: &CompositeRect,
    src: (u32, u32),
    mask: Option<(u32, u32)>,
) -> AccelResult<()> {
    let per_vertex = if mask.is_some() { 6 } else { 4 };
    let count = 3 * per_vertex;
    let (w, h) = (rect.width as i32, rect.height as i32);

    batch.begin(1 + count)?;
    batch.out(PRIM3D_INLINE | PRIM3D_RECTLIST | (count as u32 - 1))?;
    for (dx, dy) in [(w, h), (0, h), (0, 0)] {
        batch.out(((rect.dst_x + dx) as f32).to_bits())?;
        batch.out(((rect.dst_y + dy) as f32).to_bits())?;
        batch.out(texcoord(rect.src_x + dx, src.0))?;
        batch.out(texcoord(rect.src_y + dy, src.1))?;
        if let Some((mw, mh)) = mask {
            batch.out(texcoord(rect.mask_x + dx, mw))?;
            batch.out(texcoord(rect.mask_y + dy, mh))?;
        }
    }
    batch.advance();
    Ok(())
}

// ── Engine interface ────────────────────────────────────────────────────────

/// Shared interface of the per-generation composite paths.
pub trait Composite {
    fn check(
        &self,
        op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
    ) -> AccelResult<()>;

    fn prepare(
        &mut self,
        batch: &mut BatchBuffer,
        op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
    ) -> AccelResult<()>;

    fn execute(&mut self, batch: &mut BatchBuffer, rect: &CompositeRect) -> AccelResult<()>;

    /// End the operation. Returns true when a cache flush must precede the
    /// next operation that reads the destination.
    fn finish(&mut self) -> bool;
}

/// Composite engine selected by hardware generation.
pub enum CompositeEngine {
    I830(I830Composite),
    I915(I915Composite),
    I965(I965Composite),
}

impl CompositeEngine {
    pub fn for_generation(generation: Generation) -> Self {
        let limits = GenerationLimits::for_generation(generation);
        match generation {
            Generation::I830 => Self::I830(I830Composite::new(limits)),
            Generation::I915 => Self::I915(I915Composite::new(limits)),
            Generation::I965 => Self::I965(I965Composite::new(limits)),
        }
    }

    pub fn generation(&self) -> Generation {
        match self {
            Self::I830(_) => Generation::I830,
            Self::I915(_) => Generation::I915,
            Self::I965(_) => Generation::I965,
        }
    }

    fn inner(&self) -> &dyn Composite {
        match self {
            Self::I830(e) => e,
            Self::I915(e) => e,
            Self::I965(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Composite {
        match self {
            Self::I830(e) => e,
            Self::I915(e) => e,
            Self::I965(e) => e,
        }
    }
}

impl Composite for CompositeEngine {
    fn check(
        &self,
        op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
    ) -> AccelResult<()> {
        self.inner().check(op, src, mask, dst)
    }

    fn prepare(
        &mut self,
        batch: &mut BatchBuffer,
        op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
    ) -> AccelResult<()> {
        self.inner().check(op, src, mask, dst)?;
        self.inner_mut().prepare(batch, op, src, mask, dst)
    }

    fn execute(&mut self, batch: &mut BatchBuffer, rect: &CompositeRect) -> AccelResult<()> {
        self.inner_mut().execute(batch, rect)
    }

    fn finish(&mut self) -> bool {
        self.inner_mut().finish()
    }
}
