// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! i830/i845 composite path.
//!
//! Textures are loaded with immediate state packets, one per unit.

use intelddx_common::error::{AccelError, AccelResult};

use super::{
    check_alignment, check_common, emit_inline_rectlist, Composite, CompositeOp, CompositeRect,
    GenerationLimits, PictFormat, Picture,
};
use crate::batch::BatchBuffer;
use crate::regs::{
    load_texture_map, Domain, BUF_3D_ID_COLOR_BACK, BUF_3D_TILED_SURFACE,
    STATE3D_BUF_INFO_CMD, STATE3D_LOAD_STATE_IMMEDIATE_2,
};

// Texture map formats (MAP_INFO)
const MAPSURF_8BIT: u32 = 1 << 6;
const MAPSURF_16BIT: u32 = 2 << 6;
const MAPSURF_32BIT: u32 = 3 << 6;
const MT_8BIT_A8: u32 = 4 << 2;
const MT_16BIT_RGB565: u32 = 0;
const MT_16BIT_ARGB1555: u32 = 1 << 2;
const MT_32BIT_ARGB8888: u32 = 0;
const MT_32BIT_ABGR8888: u32 = 1 << 2;

fn texture_format(format: PictFormat) -> u32 {
    match format {
        PictFormat::A8R8G8B8 | PictFormat::X8R8G8B8 => MAPSURF_32BIT | MT_32BIT_ARGB8888,
        PictFormat::A8B8G8R8 | PictFormat::X8B8G8R8 => MAPSURF_32BIT | MT_32BIT_ABGR8888,
        PictFormat::R5G6B5 => MAPSURF_16BIT | MT_16BIT_RGB565,
        PictFormat::A1R5G5B5 | PictFormat::X1R5G5B5 => MAPSURF_16BIT | MT_16BIT_ARGB1555,
        PictFormat::A8 => MAPSURF_8BIT | MT_8BIT_A8,
    }
}

/// Texture dimensions bound by `prepare`.
#[derive(Debug, Clone, Copy)]
struct Bound {
    src: (u32, u32),
    mask: Option<(u32, u32)>,
}

pub struct I830Composite {
    limits: GenerationLimits,
    bound: Option<Bound>,
}

impl I830Composite {
    pub fn new(limits: GenerationLimits) -> Self {
        Self {
            limits,
            bound: None,
        }
    }
}

impl Composite for I830Composite {
    fn check(
        &self,
        op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
    ) -> AccelResult<()> {
        check_common(&self.limits, op, src, mask, dst)?;
        if dst.format == PictFormat::A8 {
            return Err(AccelError::Fallback("i830 cannot render to a8"));
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

        let textures: Vec<&Picture> = std::iter::once(src).chain(mask).collect();
        batch.begin(3 + 6 * textures.len())?;

        let tiled = if dst.tiled { BUF_3D_TILED_SURFACE } else { 0 };
        batch.out(STATE3D_BUF_INFO_CMD)?;
        batch.out(BUF_3D_ID_COLOR_BACK | tiled | dst.pitch)?;
        batch.out_reloc(&dst.bo, Domain::RENDER, Domain::RENDER, dst.offset)?;

        for (unit, pict) in textures.iter().enumerate() {
            batch.out(STATE3D_LOAD_STATE_IMMEDIATE_2 | load_texture_map(unit as u32) | 4)?;
            batch.out_reloc(&pict.bo, Domain::SAMPLER, Domain::empty(), pict.offset)?;
            batch.out(
                ((pict.height - 1) << 21) | ((pict.width - 1) << 10) | texture_format(pict.format),
            )?;
            batch.out((pict.pitch / 4 - 1) << 21)?;
            batch.out(0)?;
            batch.out(0)?;
        }
        batch.advance();

        self.bound = Some(Bound {
            src: (src.width, src.height),
            mask: mask.map(|m| (m.width, m.height)),
        });
        Ok(())
    }

    fn execute(&mut self, batch: &mut BatchBuffer, rect: &CompositeRect) -> AccelResult<()> {
        let bound = self
            .bound
            .ok_or(AccelError::Fallback("composite without prepare"))?;
        emit_inline_rectlist(batch, rect, bound.src, bound.mask)
    }

    fn finish(&mut self) -> bool {
        self.bound.take().is_some()
    }
}
