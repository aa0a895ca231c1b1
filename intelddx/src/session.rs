// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Headless presentation session.
//!
//! Drives one full-screen window through the DRI2 path frame by frame:
//! render into the back buffer, schedule the swap for the next vblank, and
//! present by page flip or, when the flip is refused, by copy.

use std::sync::Arc;

use anyhow::{Context, Result};
use intelddx_common::error::AccelError;
use intelddx_common::{BoxRect, Pipe, Settings};
use intelddx_dri::{
    Attachment, Completion, Drawable, Dri2Screen, PresentationBuffer, RequestKind, Scheduled,
};
use intelddx_gpu::backend::sim_backend::SimDevice;
use intelddx_gpu::engines::{CompositeOp, CompositeRect, PictFormat, Picture};
use intelddx_gpu::regs::GX_COPY;
use intelddx_gpu::{BufferObject, GpuContext, TilingMode};
use log::{debug, info, warn};

const DEVICE_PATH: &str = "/dev/dri/card0";
/// DRI2 module version the simulated server reports.
const SERVER_DRI2_VERSION: (u32, u32) = (1, 2);
const CURSOR_SIZE: u32 = 64;
const WINDOW_ID: u32 = 1;

/// Counters reported at the end of a session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionStats {
    pub frames: u32,
    pub flips: u32,
    pub copies: u32,
    pub unsynchronized: u32,
    pub composite_fallbacks: u32,
}

pub struct Session {
    device: Arc<SimDevice>,
    screen: Dri2Screen,
    window: Drawable,
    front: PresentationBuffer,
    back: PresentationBuffer,
    cursor: BufferObject,
    stats: SessionStats,
    next_token: u64,
}

impl Session {
    pub fn new(settings: &Settings, width: u32, height: u32) -> Result<Self> {
        let device = Arc::new(SimDevice::new().with_crtc(
            Pipe::A,
            BoxRect::from_xywh(0, 0, width, height),
            false,
        ));

        let ctx = GpuContext::new(settings, device.clone())
            .context("Failed to open acceleration context")?;
        let mut screen = Dri2Screen::new(
            settings,
            ctx,
            device.clone(),
            width,
            height,
            DEVICE_PATH,
            SERVER_DRI2_VERSION,
        )
        .context("Failed to initialise DRI2")?;

        let window = screen.window(WINDOW_ID, 0, 0, width, height);
        let front = screen
            .create_buffer(&window, Attachment::FrontLeft, 0)
            .context("Failed to create front buffer")?;
        let back = screen
            .create_buffer(&window, Attachment::BackLeft, 0)
            .context("Failed to create back buffer")?;
        let cursor = screen
            .context()
            .bufmgr()
            .allocate_surface(
                "cursor",
                CURSOR_SIZE,
                CURSOR_SIZE,
                32,
                TilingMode::None,
                settings.generation,
            )
            .context("Failed to allocate cursor image")?;

        info!(
            "Session: {}x{} window, front name={}, back name={}",
            width, height, front.name, back.name
        );

        Ok(Self {
            device,
            screen,
            window,
            front,
            back,
            cursor,
            stats: SessionStats::default(),
            next_token: 1,
        })
    }

    pub fn screen(&self) -> &Dri2Screen {
        &self.screen
    }

    pub fn device(&self) -> &Arc<SimDevice> {
        &self.device
    }

    /// Run `frames` frames.
    pub fn run(&mut self, frames: u32) -> Result<()> {
        for frame in 0..frames {
            self.render(frame)?;
            self.schedule_present()?;
            self.stats.frames += 1;
        }
        self.screen
            .context_mut()
            .sync()
            .context("Failed to drain GPU work")?;
        Ok(())
    }

    /// Draw frame `frame` into the back buffer: clear, a moving band, and
    /// the cursor image blended on top.
    fn render(&mut self, frame: u32) -> Result<()> {
        let width = self.window.width;
        let height = self.window.height;
        let bo = self.back.bo();
        let pixmap = self.back.pixmap.clone();

        let ctx = self.screen.context_mut();
        let surface = ctx.surface(&bo, pixmap.pitch(), pixmap.bpp());
        let band_y = ((frame * 8) % height.max(1)) as i32;
        ctx.solid_fill(
            &surface,
            GX_COPY,
            u32::MAX,
            0xff20_2020,
            &[BoxRect::from_xywh(0, 0, width, height)],
        )?;
        ctx.solid_fill(
            &surface,
            GX_COPY,
            u32::MAX,
            0xff80_c0ff,
            &[BoxRect::from_xywh(0, band_y, width, height.min(8))],
        )?;

        let src = Picture::new(
            &self.cursor,
            PictFormat::A8R8G8B8,
            CURSOR_SIZE,
            CURSOR_SIZE,
            self.cursor.pitch(),
        );
        let mut dst = Picture::new(&bo, PictFormat::X8R8G8B8, width, height, pixmap.pitch());
        dst.tiled = ctx.bufmgr().is_tiled(&bo);
        let rect = CompositeRect {
            dst_x: (frame * 4 % width.max(1)) as i32,
            dst_y: (frame * 2 % height.max(1)) as i32,
            width: CURSOR_SIZE.min(width),
            height: CURSOR_SIZE.min(height),
            ..Default::default()
        };
        match ctx.composite(CompositeOp::Over, &src, None, &dst, &[rect]) {
            Ok(()) => {}
            Err(AccelError::Fallback(reason)) => {
                debug!("Session: composite fallback: {}", reason);
                self.stats.composite_fallbacks += 1;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Ask for a swap at the next frame and present once it is due.
    fn schedule_present(&mut self) -> Result<()> {
        let token = self.next_token;
        self.next_token += 1;

        let (_, msc) = self.screen.get_msc(&self.window).unwrap_or((0, 0));
        match self.screen.setup_swap(&self.window, msc + 1, 0, 0, token) {
            Ok(Scheduled::Immediate(done)) => self.present(&done),
            Ok(Scheduled::Pending { event_msc }) => {
                debug!("Session: swap token={} waits for msc={}", token, event_msc);
                let events = self.device.advance_vblank(Pipe::A, 1);
                let done: Vec<Completion> = events
                    .iter()
                    .flat_map(|e| self.screen.handle_vblank_event(e))
                    .collect();
                for completion in done.iter().filter(|c| c.kind == RequestKind::Swap) {
                    self.present(completion)?;
                }
                Ok(())
            }
            Err(e) => {
                if self.stats.unsynchronized == 0 {
                    warn!("Session: presenting without vblank sync ({})", e);
                }
                self.stats.unsynchronized += 1;
                self.device.advance_vblank(Pipe::A, 1);
                self.present_now(token)
            }
        }
    }

    fn present(&mut self, done: &Completion) -> Result<()> {
        debug!(
            "Session: present token={} at msc={} ust={}",
            done.token, done.msc, done.ust
        );
        self.present_now(done.token)
    }

    fn present_now(&mut self, token: u64) -> Result<()> {
        // Rendering into the back buffer must reach the GPU before it scans out.
        self.screen
            .context_mut()
            .flush(false)
            .context("Failed to submit frame")?;
        if self.screen.swap_buffers(&mut self.front, &mut self.back, token) {
            self.stats.flips += 1;
            return Ok(());
        }
        let full = self.window.local_bounds();
        self.screen
            .copy_region(&self.window, &[full], &self.front, &self.back)
            .context("Copy presentation failed")?;
        self.stats.copies += 1;
        Ok(())
    }

    /// Release the window's buffers and report.
    pub fn finish(mut self) -> SessionStats {
        let cancelled = self.screen.drawable_gone(&self.window);
        if !cancelled.is_empty() {
            debug!("Session: {} swap(s) cancelled", cancelled.len());
        }
        let Session {
            mut screen,
            front,
            back,
            stats,
            device,
            ..
        } = self;
        screen.destroy_buffers(vec![front, back]);
        info!(
            "Session: {} frames, {} flips, {} copies, {} batches, {} KiB in use",
            stats.frames,
            stats.flips,
            stats.copies,
            device.batch_count(),
            screen.context().bufmgr().bytes_in_use() >> 10
        );
        stats
    }
}
