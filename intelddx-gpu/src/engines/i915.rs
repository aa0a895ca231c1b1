// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! i915/i945/G33 composite path.
//!
//! Shares the inline rectangle list with i830 but binds all textures with a
//! single sampler map packet.

use intelddx_common::error::{AccelError, AccelResult};

use super::{
    check_alignment, check_common, emit_inline_rectlist, Composite, CompositeOp, CompositeRect,
    GenerationLimits, PictFormat, Picture,
};
use crate::batch::BatchBuffer;
use crate::regs::{
    Domain, BUF_3D_ID_COLOR_BACK, BUF_3D_TILED_SURFACE, STATE3D_BUF_INFO_CMD, STATE3D_MAP_STATE,
};

const MAPSURF_8BIT: u32 = 1 << 7;
const MAPSURF_16BIT: u32 = 2 << 7;
const MAPSURF_32BIT: u32 = 3 << 7;
const MT_8BIT_A8: u32 = 4 << 3;
const MT_16BIT_RGB565: u32 = 0;
const MT_16BIT_ARGB1555: u32 = 1 << 3;
const MT_32BIT_ARGB8888: u32 = 0;
const MT_32BIT_ABGR8888: u32 = 1 << 3;
const MT_32BIT_XRGB8888: u32 = 2 << 3;
const MT_32BIT_XBGR8888: u32 = 3 << 3;

const MS3_HEIGHT_SHIFT: u32 = 21;
const MS3_WIDTH_SHIFT: u32 = 10;
const MS4_PITCH_SHIFT: u32 = 21;

fn texture_format(format: PictFormat) -> u32 {
    match format {
        PictFormat::A8R8G8B8 => MAPSURF_32BIT | MT_32BIT_ARGB8888,
        PictFormat::X8R8G8B8 => MAPSURF_32BIT | MT_32BIT_XRGB8888,
        PictFormat::A8B8G8R8 => MAPSURF_32BIT | MT_32BIT_ABGR8888,
        PictFormat::X8B8G8R8 => MAPSURF_32BIT | MT_32BIT_XBGR8888,
        PictFormat::R5G6B5 => MAPSURF_16BIT | MT_16BIT_RGB565,
        PictFormat::A1R5G5B5 | PictFormat::X1R5G5B5 => MAPSURF_16BIT | MT_16BIT_ARGB1555,
        PictFormat::A8 => MAPSURF_8BIT | MT_8BIT_A8,
    }
}

pub struct I915Composite {
    limits: GenerationLimits,
    bound: Option<((u32, u32), Option<(u32, u32)>)>,
}

impl I915Composite {
    pub fn new(limits: GenerationLimits) -> Self {
        Self {
            limits,
            bound: None,
        }
    }
}

impl Composite for I915Composite {
    fn check(
        &self,
        op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
    ) -> AccelResult<()> {
        check_common(&self.limits, op, src, mask, dst)?;
        // Tiled render targets need a power-of-two pitch.
        if dst.tiled && !dst.pitch.is_power_of_two() {
            return Err(AccelError::Fallback("tiled destination pitch not a power of two"));
        }
        for pict in std::iter::once(src).chain(mask) {
            if pict.pitch > 8192 {
                return Err(AccelError::Fallback("texture pitch exceeds 8KiB"));
            }
        }
        Ok(())
    }

    fn prepare(
        &mut self,
        batch: &mut BatchBuffer,
        _op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
    ) -> AccelResult<()> {
        check_alignment(&self.limits, dst)?;
        check_alignment(&self.limits, src)?;
        if let Some(m) = mask {
            check_alignment(&self.limits, m)?;
        }

        let maps: Vec<&Picture> = std::iter::once(src).chain(mask).collect();
        let n = maps.len() as u32;
        batch.begin(3 + 2 + 3 * maps.len())?;

        let tiled = if dst.tiled { BUF_3D_TILED_SURFACE } else { 0 };
        batch.out(STATE3D_BUF_INFO_CMD)?;
        batch.out(BUF_3D_ID_COLOR_BACK | tiled | dst.pitch)?;
        batch.out_reloc(&dst.bo, Domain::RENDER, Domain::RENDER, dst.offset)?;

        batch.out(STATE3D_MAP_STATE | (3 * n))?;
        batch.out((1 << n) - 1)?;
        for pict in &maps {
            batch.out_reloc(&pict.bo, Domain::SAMPLER, Domain::empty(), pict.offset)?;
            batch.out(
                ((pict.height - 1) << MS3_HEIGHT_SHIFT)
                    | ((pict.width - 1) << MS3_WIDTH_SHIFT)
                    | texture_format(pict.format),
            )?;
            batch.out((pict.pitch / 4 - 1) << MS4_PITCH_SHIFT)?;
        }
        batch.advance();

        self.bound = Some(((src.width, src.height), mask.map(|m| (m.width, m.height))));
        Ok(())
    }

    fn execute(&mut self, batch: &mut BatchBuffer, rect: &CompositeRect) -> AccelResult<()> {
        let (src, mask) = self
            .bound
            .ok_or(AccelError::Fallback("composite without prepare"))?;
        emit_inline_rectlist(batch, rect, src, mask)
    }

    fn finish(&mut self) -> bool {
        self.bound.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::sim_backend::SimDevice;
    use crate::bufmgr::BufferManager;
    use crate::engines::test_util::picture;
    use intelddx_common::Generation;

    fn engine() -> I915Composite {
        I915Composite::new(GenerationLimits::for_generation(Generation::I915))
    }

    #[test]
    fn test_map_state_packet() {
        let bm = BufferManager::new(64 * 1024 * 1024);
        let dev = SimDevice::new();
        let mut batch = BatchBuffer::new(&bm, 256).unwrap();
        let src = picture(&bm, PictFormat::X8R8G8B8, 16, 8);
        let dst = picture(&bm, PictFormat::A8, 16, 8);

        let mut e = engine();
        e.check(CompositeOp::Src, &src, None, &dst).unwrap();
        e.prepare(&mut batch, CompositeOp::Src, &src, None, &dst).unwrap();
        e.execute(
            &mut batch,
            &CompositeRect {
                width: 16,
                height: 8,
                ..Default::default()
            },
        )
        .unwrap();
        assert!(e.finish());
        batch.flush(&dev, false).unwrap();

        let submitted = dev.last_batch().unwrap();
        let cmds = submitted.commands();
        assert_eq!(cmds[1].header, STATE3D_MAP_STATE | 3);
        assert_eq!(cmds[1].dwords.len(), 5);
        assert_eq!(cmds[1].dwords[1], 1);
        assert_eq!(cmds[1].dwords[3] & 0x3ff, MAPSURF_32BIT | MT_32BIT_XRGB8888);
        assert_eq!(submitted.relocs.len(), 2);
        assert_eq!(submitted.relocs[1].read_domains, Domain::SAMPLER);
    }

    #[test]
    fn test_tiled_destination_needs_pot_pitch() {
        let bm = BufferManager::new(64 * 1024 * 1024);
        let src = picture(&bm, PictFormat::A8R8G8B8, 16, 16);
        let mut dst = picture(&bm, PictFormat::A8R8G8B8, 300, 16);
        dst.tiled = true;
        dst.pitch = 1536;
        assert!(matches!(
            engine().check(CompositeOp::Over, &src, None, &dst),
            Err(AccelError::Fallback(_))
        ));
        dst.pitch = 2048;
        assert!(engine().check(CompositeOp::Over, &src, None, &dst).is_ok());
    }

    #[test]
    fn test_component_alpha_fallback() {
        let bm = BufferManager::new(64 * 1024 * 1024);
        let src = picture(&bm, PictFormat::A8R8G8B8, 16, 16);
        let mut mask = picture(&bm, PictFormat::A8R8G8B8, 16, 16);
        mask.component_alpha = true;
        let dst = picture(&bm, PictFormat::A8R8G8B8, 16, 16);
        assert!(engine()
            .check(CompositeOp::Over, &src, Some(&mask), &dst)
            .is_err());
        assert!(engine()
            .check(CompositeOp::Add, &src, Some(&mask), &dst)
            .is_ok());
    }
}
