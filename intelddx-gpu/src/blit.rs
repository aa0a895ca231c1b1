// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! 2D blitter: solid fills and screen-to-screen copies.
//!
//! Follows the prepare / draw / done pattern of the acceleration
//! architecture. `prepare_*` validates the surfaces and latches the raster
//! operation; each draw call emits one blit command.

use intelddx_common::error::{AccelError, AccelResult};
use intelddx_common::Generation;

use crate::batch::BatchBuffer;
use crate::bufmgr::BufferObject;
use crate::engines::GenerationLimits;
use crate::regs::{
    Domain, BR13_565, BR13_8888, COPY_ROP, PATTERN_ROP, XY_COLOR_BLT_CMD, XY_COLOR_BLT_TILED,
    XY_COLOR_BLT_WRITE_ALPHA, XY_COLOR_BLT_WRITE_RGB, XY_SRC_COPY_BLT_CMD,
    XY_SRC_COPY_BLT_DST_TILED, XY_SRC_COPY_BLT_SRC_TILED, XY_SRC_COPY_BLT_WRITE_ALPHA,
    XY_SRC_COPY_BLT_WRITE_RGB,
};

/// A pixmap as seen by the blitter.
#[derive(Debug, Clone)]
pub struct Surface {
    pub bo: BufferObject,
    pub pitch: u32,
    pub bpp: u32,
    /// Byte offset of the pixmap within `bo`.
    pub offset: u32,
    /// Whether the surface must be addressed with tiled blits.
    pub tiled: bool,
}

impl Surface {
    pub fn new(bo: &BufferObject, pitch: u32, bpp: u32) -> Self {
        Self {
            bo: bo.clone(),
            pitch,
            bpp,
            offset: 0,
            tiled: false,
        }
    }
}

struct SolidState {
    dst: Surface,
    br13: u32,
    color: u32,
}

struct CopyState {
    src: Surface,
    dst: Surface,
    br13: u32,
}

pub struct Blitter {
    generation: Generation,
    limits: GenerationLimits,
    solid: Option<SolidState>,
    copy: Option<CopyState>,
}

/// All bits of a `bpp`-deep pixel.
fn full_mask(bpp: u32) -> u32 {
    if bpp >= 32 {
        u32::MAX
    } else {
        (1 << bpp) - 1
    }
}

fn depth_bits(bpp: u32) -> u32 {
    match bpp {
        32 => BR13_8888,
        16 => BR13_565,
        _ => 0,
    }
}

fn coords(x: i32, y: i32) -> u32 {
    ((y as u32) << 16) | (x as u32 & 0xffff)
}

impl Blitter {
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            limits: GenerationLimits::for_generation(generation),
            solid: None,
            copy: None,
        }
    }

    fn check_surface(&self, surface: &Surface, planemask: u32) -> AccelResult<()> {
        if planemask & full_mask(surface.bpp) != full_mask(surface.bpp) {
            return Err(AccelError::Fallback("planemask is not solid"));
        }
        if surface.bpp == 24 {
            return Err(AccelError::Fallback("24bpp surfaces are not blittable"));
        }
        if !self.limits.surface_aligned(surface.offset, surface.pitch) {
            log::debug!(
                "blit: misaligned surface offset=0x{:X} pitch={}",
                surface.offset,
                surface.pitch
            );
            return Err(AccelError::Fallback("surface offset or pitch misaligned"));
        }
        Ok(())
    }

    /// Destination pitch field and tiled flag for `surface`.
    fn pitch_field(&self, surface: &Surface) -> (u32, bool) {
        if self.generation.is_i965() && surface.tiled {
            (surface.pitch >> 2, true)
        } else {
            (surface.pitch, false)
        }
    }

    // ── Solid fill ──────────────────────────────────────────────────────────

    pub fn prepare_solid(
        &mut self,
        dst: &Surface,
        alu: u8,
        planemask: u32,
        fg: u32,
    ) -> AccelResult<()> {
        self.check_surface(dst, planemask)?;
        self.solid = Some(SolidState {
            dst: dst.clone(),
            br13: (PATTERN_ROP[(alu & 0xf) as usize] << 16) | depth_bits(dst.bpp),
            color: fg,
        });
        Ok(())
    }

    /// Fill `[x1,x2) x [y1,y2)`.
    pub fn solid(&self, batch: &mut BatchBuffer, x1: i32, y1: i32, x2: i32, y2: i32) -> AccelResult<()> {
        let state = self
            .solid
            .as_ref()
            .ok_or(AccelError::Fallback("solid fill without prepare"))?;

        let mut cmd = XY_COLOR_BLT_CMD;
        if state.dst.bpp == 32 {
            cmd |= XY_COLOR_BLT_WRITE_ALPHA | XY_COLOR_BLT_WRITE_RGB;
        }
        let (pitch, tiled) = self.pitch_field(&state.dst);
        if tiled {
            cmd |= XY_COLOR_BLT_TILED;
        }

        batch.begin(6)?;
        batch.out(cmd)?;
        batch.out(state.br13 | pitch)?;
        batch.out(coords(x1, y1))?;
        batch.out(coords(x2, y2))?;
        batch.out_reloc(&state.dst.bo, Domain::RENDER, Domain::RENDER, state.dst.offset)?;
        batch.out(state.color)?;
        batch.advance();
        Ok(())
    }

    pub fn done_solid(&mut self) {
        self.solid = None;
    }

    // ── Copy ────────────────────────────────────────────────────────────────

    pub fn prepare_copy(
        &mut self,
        src: &Surface,
        dst: &Surface,
        alu: u8,
        planemask: u32,
    ) -> AccelResult<()> {
        self.check_surface(src, planemask)?;
        self.check_surface(dst, planemask)?;
        self.copy = Some(CopyState {
            src: src.clone(),
            dst: dst.clone(),
            br13: (COPY_ROP[(alu & 0xf) as usize] << 16) | depth_bits(dst.bpp),
        });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn copy(
        &self,
        batch: &mut BatchBuffer,
        src_x: i32,
        src_y: i32,
        dst_x: i32,
        dst_y: i32,
        width: i32,
        height: i32,
    ) -> AccelResult<()> {
        let state = self
            .copy
            .as_ref()
            .ok_or(AccelError::Fallback("copy without prepare"))?;

        let mut cmd = XY_SRC_COPY_BLT_CMD;
        if state.dst.bpp == 32 {
            cmd |= XY_SRC_COPY_BLT_WRITE_ALPHA | XY_SRC_COPY_BLT_WRITE_RGB;
        }
        let (dst_pitch, dst_tiled) = self.pitch_field(&state.dst);
        let (src_pitch, src_tiled) = self.pitch_field(&state.src);
        if dst_tiled {
            cmd |= XY_SRC_COPY_BLT_DST_TILED;
        }
        if src_tiled {
            cmd |= XY_SRC_COPY_BLT_SRC_TILED;
        }

        batch.begin(8)?;
        batch.out(cmd)?;
        batch.out(state.br13 | dst_pitch)?;
        batch.out(coords(dst_x, dst_y))?;
        batch.out(coords(dst_x + width, dst_y + height))?;
        batch.out_reloc(&state.dst.bo, Domain::RENDER, Domain::RENDER, state.dst.offset)?;
        batch.out(coords(src_x, src_y))?;
        batch.out(src_pitch)?;
        batch.out_reloc(&state.src.bo, Domain::RENDER, Domain::empty(), state.src.offset)?;
        batch.advance();
        Ok(())
    }

    pub fn done_copy(&mut self) {
        self.copy = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim_backend::SimDevice;
    use crate::bufmgr::{BufferManager, Residency, TilingMode};
    use crate::regs::*;

    fn surface(bm: &BufferManager, pitch: u32, bpp: u32) -> Surface {
        let bo = bm
            .allocate("surf", (pitch * 64) as u64, TilingMode::None, 4096, Residency::GpuLocal)
            .unwrap();
        Surface::new(&bo, pitch, bpp)
    }

    fn setup() -> (BufferManager, BatchBuffer, SimDevice) {
        let bm = BufferManager::new(64 * 1024 * 1024);
        let batch = BatchBuffer::new(&bm, 512).unwrap();
        (bm, batch, SimDevice::new())
    }

    #[test]
    fn test_solid_fill_words() {
        let (bm, mut batch, dev) = setup();
        let dst = surface(&bm, 256, 32);
        let mut blt = Blitter::new(Generation::I915);
        blt.prepare_solid(&dst, GX_COPY, u32::MAX, 0xFF00FF00).unwrap();
        blt.solid(&mut batch, 1, 2, 11, 12).unwrap();
        blt.done_solid();
        batch.flush(&dev, false).unwrap();

        let words = dev.last_batch().unwrap().words;
        assert_eq!(
            words[0],
            XY_COLOR_BLT_CMD | XY_COLOR_BLT_WRITE_ALPHA | XY_COLOR_BLT_WRITE_RGB
        );
        assert_eq!(words[1], (ROP_P << 16) | BR13_8888 | 256);
        assert_eq!(words[2], (2 << 16) | 1);
        assert_eq!(words[3], (12 << 16) | 11);
        assert_eq!(words[5], 0xFF00FF00);
        assert!(blt.solid(&mut batch, 0, 0, 1, 1).is_err());
    }

    #[test]
    fn test_prepare_fallbacks() {
        let (bm, _batch, _dev) = setup();
        let mut blt = Blitter::new(Generation::I965);

        let dst = surface(&bm, 256, 16);
        assert!(blt.prepare_solid(&dst, GX_COPY, 0xFFFF, 0).is_ok());
        assert_eq!(
            blt.prepare_solid(&dst, GX_COPY, 0x00FF, 0),
            Err(AccelError::Fallback("planemask is not solid"))
        );

        let dst24 = surface(&bm, 192, 24);
        assert!(blt.prepare_solid(&dst24, GX_COPY, u32::MAX, 0).is_err());

        let mut odd = surface(&bm, 256, 32);
        odd.offset = 4;
        assert!(blt.prepare_solid(&odd, GX_COPY, u32::MAX, 0).is_err());
        // Pre-965 only needs 4-byte offsets.
        let mut old = Blitter::new(Generation::I830);
        assert!(old.prepare_solid(&odd, GX_COPY, u32::MAX, 0).is_ok());
    }

    #[test]
    fn test_copy_tiled_on_965() {
        let (bm, mut batch, dev) = setup();
        let mut src = surface(&bm, 4096, 32);
        src.tiled = true;
        let dst = surface(&bm, 1024, 32);

        let mut blt = Blitter::new(Generation::I965);
        blt.prepare_copy(&src, &dst, GX_COPY, u32::MAX).unwrap();
        blt.copy(&mut batch, 5, 6, 7, 8, 10, 20).unwrap();
        batch.flush(&dev, false).unwrap();

        let batch_words = dev.last_batch().unwrap();
        let w = &batch_words.words;
        assert_eq!(w[0] & XY_SRC_COPY_BLT_SRC_TILED, XY_SRC_COPY_BLT_SRC_TILED);
        assert_eq!(w[0] & XY_SRC_COPY_BLT_DST_TILED, 0);
        assert_eq!(w[1] & 0xffff, 1024);
        assert_eq!(w[3], (28 << 16) | 17);
        assert_eq!(w[5], (6 << 16) | 5);
        assert_eq!(w[6], 1024);
        assert_eq!(batch_words.relocs[1].write_domain, Domain::empty());
    }

    #[test]
    fn test_copy_untiled_before_965() {
        let (bm, mut batch, dev) = setup();
        let mut src = surface(&bm, 4096, 16);
        src.tiled = true;
        let dst = surface(&bm, 1024, 16);

        let mut blt = Blitter::new(Generation::I915);
        blt.prepare_copy(&src, &dst, 6, 0xFFFF).unwrap();
        blt.copy(&mut batch, 0, 0, 0, 0, 1, 1).unwrap();
        blt.done_copy();
        batch.flush(&dev, false).unwrap();

        let w = dev.last_batch().unwrap().words;
        assert_eq!(w[0], XY_SRC_COPY_BLT_CMD);
        assert_eq!(w[1], (ROP_DSX << 16) | BR13_565 | 1024);
        assert_eq!(w[6], 4096);
    }
}
