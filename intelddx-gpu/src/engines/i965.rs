// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! i965 composite path.
//!
//! Surfaces are addressed through the state base address packet; each
//! rectangle is drawn as a drawing-rectangle clip plus a sequential
//! RECTLIST primitive.

use intelddx_common::error::{AccelError, AccelResult};
use intelddx_common::TILED_PITCH_ALIGN;

use super::{
    check_alignment, check_common, Composite, CompositeOp, CompositeRect, GenerationLimits,
    Picture,
};
use crate::batch::BatchBuffer;
use crate::regs::{
    Domain, BASE_ADDRESS_MODIFY, BRW_3DPRIMITIVE, BRW_3DPRIMITIVE_TOPOLOGY_SHIFT,
    BRW_3DPRIMITIVE_VERTEX_SEQUENTIAL, BRW_3DPRIM_RECTLIST, BRW_3DSTATE_DRAWING_RECTANGLE,
    BRW_STATE_BASE_ADDRESS,
};

pub struct I965Composite {
    limits: GenerationLimits,
    prepared: bool,
    /// First vertex of the next rectangle.
    next_vertex: u32,
}

impl I965Composite {
    pub fn new(limits: GenerationLimits) -> Self {
        Self {
            limits,
            prepared: false,
            next_vertex: 0,
        }
    }
}

impl Composite for I965Composite {
    fn check(
        &self,
        op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
    ) -> AccelResult<()> {
        check_common(&self.limits, op, src, mask, dst)?;
        let pictures = std::iter::once(src).chain(mask).chain(std::iter::once(dst));
        for pict in pictures {
            if pict.tiled && pict.pitch % TILED_PITCH_ALIGN != 0 {
                return Err(AccelError::Fallback("tiled surface pitch not 512-byte aligned"));
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

        batch.begin(6 + 4)?;
        batch.out(BRW_STATE_BASE_ADDRESS)?;
        batch.out(BASE_ADDRESS_MODIFY)?;
        batch.out_reloc(
            &dst.bo,
            Domain::RENDER,
            Domain::RENDER,
            dst.offset | BASE_ADDRESS_MODIFY,
        )?;
        batch.out_reloc(
            &src.bo,
            Domain::SAMPLER,
            Domain::empty(),
            src.offset | BASE_ADDRESS_MODIFY,
        )?;
        match mask {
            Some(m) => batch.out_reloc(
                &m.bo,
                Domain::SAMPLER,
                Domain::empty(),
                m.offset | BASE_ADDRESS_MODIFY,
            )?,
            None => batch.out(BASE_ADDRESS_MODIFY)?,
        }
        batch.out(BASE_ADDRESS_MODIFY)?;

        batch.out(BRW_3DSTATE_DRAWING_RECTANGLE)?;
        batch.out(0)?;
        batch.out(((dst.height - 1) << 16) | (dst.width - 1))?;
        batch.out(0)?;
        batch.advance();

        self.prepared = true;
        self.next_vertex = 0;
        Ok(())
    }

    fn execute(&mut self, batch: &mut BatchBuffer, rect: &CompositeRect) -> AccelResult<()> {
        if !self.prepared {
            return Err(AccelError::Fallback("composite without prepare"));
        }
        if rect.width == 0 || rect.height == 0 {
            return Ok(());
        }
        let x1 = rect.dst_x.max(0) as u32;
        let y1 = rect.dst_y.max(0) as u32;
        let x2 = x1 + rect.width - 1;
        let y2 = y1 + rect.height - 1;

        batch.begin(4 + 6)?;
        batch.out(BRW_3DSTATE_DRAWING_RECTANGLE)?;
        batch.out((y1 << 16) | x1)?;
        batch.out((y2 << 16) | x2)?;
        batch.out(0)?;

        batch.out(
            BRW_3DPRIMITIVE
                | BRW_3DPRIMITIVE_VERTEX_SEQUENTIAL
                | (BRW_3DPRIM_RECTLIST << BRW_3DPRIMITIVE_TOPOLOGY_SHIFT)
                | 4,
        )?;
        batch.out(3)?;
        batch.out(self.next_vertex)?;
        batch.out(1)?;
        batch.out(0)?;
        batch.out(0)?;
        batch.advance();

        self.next_vertex += 3;
        Ok(())
    }

    fn finish(&mut self) -> bool {
        std::mem::replace(&mut self.prepared, false)
    }
}
