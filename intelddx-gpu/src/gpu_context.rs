// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Central acceleration context.
//!
//! Owns the buffer manager, the active batch, the 2D blitter and the
//! composite engine of the configured generation, plus the device handle all
//! of them submit through. Lifetime matches the open device: creating the
//! context is the one step whose failure disables acceleration entirely.

use std::sync::Arc;

use intelddx_common::error::{AccelError, AccelResult};
use intelddx_common::{BoxRect, Generation, Pipe, Settings};

use crate::backend::DrmDevice;
use crate::batch::BatchBuffer;
use crate::blit::{Blitter, Surface};
use crate::bufmgr::{BufferManager, BufferObject};
use crate::engines::{Composite, CompositeEngine, CompositeOp, CompositeRect, GenerationLimits, Picture};
use crate::fence::Fence;
use crate::regs::{
    MI_LOAD_SCAN_LINES_DISPLAY_PIPEA, MI_LOAD_SCAN_LINES_DISPLAY_PIPEB, MI_LOAD_SCAN_LINES_INCL,
    MI_WAIT_FOR_EVENT, MI_WAIT_FOR_PIPEA_SCAN_LINE_WINDOW, MI_WAIT_FOR_PIPEB_SCAN_LINE_WINDOW,
};

/// How `map_buffer` treats a buffer the GPU still uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    /// Flush and wait for the GPU to finish with the buffer.
    Blocking,
    /// Fail with `Busy` instead of waiting.
    NonBlocking,
}

/// Run an emission closure, flushing once and retrying if the batch is full.
///
/// Emitters reserve space before writing anything, so a failed attempt
/// leaves no partial command behind.
fn retry_on_overflow(
    batch: &mut BatchBuffer,
    device: &dyn DrmDevice,
    mut emit: impl FnMut(&mut BatchBuffer) -> AccelResult<()>,
) -> AccelResult<()> {
    match emit(batch) {
        Err(AccelError::Overflow { .. }) => {
            batch.flush(device, false)?;
            emit(batch)
        }
        other => other,
    }
}

pub struct GpuContext {
    bufmgr: BufferManager,
    batch: BatchBuffer,
    device: Arc<dyn DrmDevice>,
    generation: Generation,
    limits: GenerationLimits,
    blitter: Blitter,
    composite: CompositeEngine,
    always_sync: bool,
    /// A render-cache flush is owed before the next dependent operation.
    need_mi_flush: bool,
}

impl GpuContext {
    /// Open the acceleration context on `device`.
    ///
    /// Fails only if the batch buffer cannot be allocated; the caller then
    /// runs without acceleration.
    pub fn new(settings: &Settings, device: Arc<dyn DrmDevice>) -> AccelResult<Self> {
        let bufmgr = BufferManager::new(settings.aperture_size);
        let batch = BatchBuffer::new(&bufmgr, settings.batch_capacity_words).map_err(|e| {
            log::error!("gpu: batch buffer allocation failed ({}), acceleration disabled", e);
            e
        })?;
        let generation = settings.generation;

        log::info!(
            "gpu: {} context on '{}', aperture {} MiB, batch {} words",
            generation,
            device.name(),
            settings.aperture_size >> 20,
            batch.capacity()
        );

        Ok(Self {
            bufmgr,
            batch,
            device,
            generation,
            limits: GenerationLimits::for_generation(generation),
            blitter: Blitter::new(generation),
            composite: CompositeEngine::for_generation(generation),
            always_sync: settings.always_sync,
            need_mi_flush: false,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn bufmgr(&self) -> &BufferManager {
        &self.bufmgr
    }

    pub fn batch(&self) -> &BatchBuffer {
        &self.batch
    }

    pub fn batch_mut(&mut self) -> &mut BatchBuffer {
        &mut self.batch
    }

    pub fn device(&self) -> &Arc<dyn DrmDevice> {
        &self.device
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn limits(&self) -> &GenerationLimits {
        &self.limits
    }

    pub fn needs_mi_flush(&self) -> bool {
        self.need_mi_flush
    }

    /// Blitter view of `bo`, with tiling derived from the registry.
    pub fn surface(&self, bo: &BufferObject, pitch: u32, bpp: u32) -> Surface {
        let mut surface = Surface::new(bo, pitch, bpp);
        surface.tiled = self.bufmgr.is_tiled(bo);
        surface
    }

    // ── Submission ──────────────────────────────────────────────────────────

    /// Submit the current batch. `sync` waits for it to complete.
    pub fn flush(&mut self, sync: bool) -> AccelResult<Fence> {
        let fence = self
            .batch
            .flush(self.device.as_ref(), sync || self.always_sync)?;
        self.batch.retire(self.device.as_ref());
        Ok(fence)
    }

    /// Drain all outstanding work.
    pub fn sync(&mut self) -> AccelResult<()> {
        self.batch.flush(self.device.as_ref(), true)?;
        self.batch.wait_idle(self.device.as_ref())
    }

    /// Bound the GPU work this client has queued.
    pub fn throttle(&self) -> AccelResult<()> {
        self.device.throttle()
    }

    /// Emit a render-cache flush.
    pub fn emit_flush(&mut self) -> AccelResult<()> {
        let generation = self.generation;
        retry_on_overflow(&mut self.batch, self.device.as_ref(), |b| {
            b.emit_flush(generation)
        })?;
        self.need_mi_flush = false;
        Ok(())
    }

    fn settle_pending_flush(&mut self) -> AccelResult<()> {
        if self.need_mi_flush {
            self.emit_flush()?;
        }
        Ok(())
    }

    /// Stall the command stream until `pipe` scans outside rows `[y1, y2]`.
    ///
    /// The scan-line load is emitted twice; the hardware requires the pair.
    pub fn emit_scanline_wait(&mut self, pipe: Pipe, y1: u32, y2: u32) -> AccelResult<()> {
        let (load, event) = match pipe {
            Pipe::A => (MI_LOAD_SCAN_LINES_DISPLAY_PIPEA, MI_WAIT_FOR_PIPEA_SCAN_LINE_WINDOW),
            Pipe::B => (MI_LOAD_SCAN_LINES_DISPLAY_PIPEB, MI_WAIT_FOR_PIPEB_SCAN_LINE_WINDOW),
        };
        let window = (y1 << 16) | (y2 & 0xffff);
        retry_on_overflow(&mut self.batch, self.device.as_ref(), |b| {
            b.begin(5)?;
            b.out(MI_LOAD_SCAN_LINES_INCL | load)?;
            b.out(window)?;
            b.out(MI_LOAD_SCAN_LINES_INCL | load)?;
            b.out(window)?;
            b.out(MI_WAIT_FOR_EVENT | event)?;
            b.advance();
            Ok(())
        })
    }

    // ── CPU access ──────────────────────────────────────────────────────────

    /// Map `bo` for CPU access, synchronizing with the GPU as `mode` allows.
    pub fn map_buffer(&mut self, bo: &BufferObject, writable: bool, mode: MapMode) -> AccelResult<usize> {
        let device = self.device.as_ref();

        if self.batch.references(bo) {
            if mode == MapMode::NonBlocking {
                return Err(AccelError::Busy { handle: bo.handle() });
            }
            self.batch.flush(device, false)?;
        }

        if bo.is_pinned() {
            self.batch.retire(device);
        }
        if bo.is_pinned() {
            if mode == MapMode::NonBlocking {
                return Err(AccelError::Busy { handle: bo.handle() });
            }
            let fence = self
                .batch
                .fence_for(bo)
                .unwrap_or_else(|| self.batch.last_fence());
            log::debug!("gpu: map of handle={} waits on {}", bo.handle(), fence);
            device.wait_fence(fence)?;
            self.batch.retire(device);
        }

        self.bufmgr.map(bo, writable)
    }

    /// Make `bo` safe for CPU writes: flush, wait, then map.
    pub fn prepare_access(&mut self, bo: &BufferObject) -> AccelResult<usize> {
        self.map_buffer(bo, true, MapMode::Blocking)
    }

    pub fn finish_access(&mut self, bo: &BufferObject) {
        self.bufmgr.unmap(bo);
    }

    // ── 2D ──────────────────────────────────────────────────────────────────

    /// Fill `boxes` of `dst` with `fg` using raster op `alu`.
    pub fn solid_fill(
        &mut self,
        dst: &Surface,
        alu: u8,
        planemask: u32,
        fg: u32,
        boxes: &[BoxRect],
    ) -> AccelResult<()> {
        self.blitter.prepare_solid(dst, alu, planemask, fg)?;
        self.settle_pending_flush()?;

        let blitter = &self.blitter;
        for b in boxes.iter().filter(|b| !b.is_empty()) {
            retry_on_overflow(&mut self.batch, self.device.as_ref(), |batch| {
                blitter.solid(batch, b.x1, b.y1, b.x2, b.y2)
            })?;
        }
        self.blitter.done_solid();
        self.done_operation()
    }

    /// Copy each of `boxes` (destination coordinates) from `src`, reading at
    /// the box translated by `(dx, dy)`.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_boxes(
        &mut self,
        src: &Surface,
        dst: &Surface,
        alu: u8,
        planemask: u32,
        boxes: &[BoxRect],
        dx: i32,
        dy: i32,
    ) -> AccelResult<()> {
        self.blitter.prepare_copy(src, dst, alu, planemask)?;
        self.settle_pending_flush()?;

        let blitter = &self.blitter;
        for b in boxes.iter().filter(|b| !b.is_empty()) {
            retry_on_overflow(&mut self.batch, self.device.as_ref(), |batch| {
                blitter.copy(batch, b.x1 + dx, b.y1 + dy, b.x1, b.y1, b.width(), b.height())
            })?;
        }
        self.blitter.done_copy();
        self.done_operation()
    }

    // ── Composite ───────────────────────────────────────────────────────────

    /// Composite `rects` through the generation's 3D engine.
    pub fn composite(
        &mut self,
        op: CompositeOp,
        src: &Picture,
        mask: Option<&Picture>,
        dst: &Picture,
        rects: &[CompositeRect],
    ) -> AccelResult<()> {
        self.composite.check(op, src, mask, dst)?;
        self.settle_pending_flush()?;

        let device = self.device.as_ref();
        let engine = &mut self.composite;
        retry_on_overflow(&mut self.batch, device, |batch| {
            engine.prepare(batch, op, src, mask, dst)
        })?;

        for rect in rects {
            match engine.execute(&mut self.batch, rect) {
                Err(AccelError::Overflow { .. }) => {
                    // State does not survive into a new batch.
                    self.batch.flush(device, false)?;
                    engine.prepare(&mut self.batch, op, src, mask, dst)?;
                    engine.execute(&mut self.batch, rect)?;
                }
                other => other?,
            }
        }

        if engine.finish() {
            self.need_mi_flush = true;
        }
        self.done_operation()
    }

    fn done_operation(&mut self) -> AccelResult<()> {
        if self.always_sync {
            self.sync()?;
        }
        Ok(())
    }
}
