// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! DRI2 screen: buffer exchange between the server and direct-rendering
//! clients.
//!
//! Buffers are created per attachment and handed out by exported name.
//! Presentation either copies back to front through the blitter (with an
//! optional scan-line wait to avoid tearing) or, when the back buffer can
//! replace the whole screen, swaps buffer bindings and page-flips.

use std::sync::Arc;

use intelddx_common::error::{AccelError, AccelResult};
use intelddx_common::{extents, BoxRect, Pipe, Settings};
use intelddx_gpu::backend::{DisplayLayer, VblankEvent};
use intelddx_gpu::bufmgr::TilingMode;
use intelddx_gpu::regs::GX_COPY;
use intelddx_gpu::{BufferObject, GpuContext};

use crate::buffer::{Attachment, PresentationBuffer, TilingPolicy};
use crate::caps::Dri2Capabilities;
use crate::drawable::{bpp_for_depth, Drawable, Pixmap};
use crate::vblank::{Completion, RequestKind, Scheduled, VblankRequest, VblankScheduler};

/// Depth of the screen pixmap.
pub const SCREEN_DEPTH: u32 = 24;

/// Scan-line window `(y1, y2)` of `region` relative to the CRTC's first row,
/// clamped to the CRTC's visible rows.
pub fn scanline_window(region: &BoxRect, crtc: &BoxRect) -> (u32, u32) {
    let y1 = if crtc.y1 <= region.y1 {
        region.y1 - crtc.y1
    } else {
        0
    };
    let y2 = if region.y2 <= crtc.y2 {
        region.y2 - crtc.y1
    } else {
        crtc.y2 - crtc.y1
    };
    (y1.max(0) as u32, y2.max(0) as u32)
}

pub struct Dri2Screen {
    ctx: GpuContext,
    display: Arc<dyn DisplayLayer>,
    caps: Dri2Capabilities,
    policy: TilingPolicy,
    screen_pixmap: Pixmap,
    vblank: VblankScheduler,
    swapbuffers_wait: bool,
    shadow: bool,
    next_pixmap_id: u32,
}

impl Dri2Screen {
    /// Set up DRI2 on a `width`x`height` screen.
    ///
    /// `server_version` is the server's DRI2 module version; modules older
    /// than the capability set requires are refused.
    pub fn new(
        settings: &Settings,
        ctx: GpuContext,
        display: Arc<dyn DisplayLayer>,
        width: u32,
        height: u32,
        device_path: &str,
        server_version: (u32, u32),
    ) -> AccelResult<Self> {
        let caps = Dri2Capabilities::for_version(
            settings.dri2_version,
            settings.generation,
            settings.use_swap_buffers,
            device_path,
        );
        caps.check_server(server_version.0, server_version.1)?;

        let tiling = if settings.tiling {
            TilingMode::X
        } else {
            TilingMode::None
        };
        let front = ctx.bufmgr().allocate_surface(
            "front buffer",
            width,
            height,
            bpp_for_depth(SCREEN_DEPTH),
            tiling,
            settings.generation,
        )?;
        ctx.bufmgr().set_scanout(Some(&front));
        let screen_pixmap = Pixmap::new(1, width, height, SCREEN_DEPTH, front);

        log::info!(
            "dri2: driver '{}' on {}, version {}, {:?} create, features {:?}",
            caps.driver_name,
            caps.device_path,
            caps.version,
            caps.create,
            caps.features
        );

        Ok(Self {
            ctx,
            display,
            caps,
            policy: TilingPolicy {
                generation: settings.generation,
                tiling: settings.tiling,
                kernel_exec_fencing: settings.kernel_exec_fencing,
            },
            screen_pixmap,
            vblank: VblankScheduler::new(settings.max_pending_vblanks),
            swapbuffers_wait: settings.swapbuffers_wait,
            shadow: settings.shadow,
            next_pixmap_id: 2,
        })
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn caps(&self) -> &Dri2Capabilities {
        &self.caps
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut GpuContext {
        &mut self.ctx
    }

    pub fn screen_pixmap(&self) -> &Pixmap {
        &self.screen_pixmap
    }

    pub fn vblank(&self) -> &VblankScheduler {
        &self.vblank
    }

    /// A window on the screen pixmap.
    pub fn window(&self, id: u32, x: i32, y: i32, width: u32, height: u32) -> Drawable {
        Drawable::window(id, x, y, width, height, &self.screen_pixmap)
    }

    /// Allocate an offscreen pixmap.
    pub fn create_pixmap(
        &mut self,
        width: u32,
        height: u32,
        depth: u32,
        tiling: TilingMode,
    ) -> AccelResult<Pixmap> {
        let id = self.next_pixmap_id;
        let bo = self.ctx.bufmgr().allocate_surface(
            &format!("pixmap {}", id),
            width,
            height,
            bpp_for_depth(depth),
            tiling,
            self.policy.generation,
        )?;
        self.next_pixmap_id += 1;
        Ok(Pixmap::new(id, width, height, depth, bo))
    }

    // ── Buffer lifecycle ────────────────────────────────────────────────────

    /// Create the buffer for one attachment of `drawable`.
    ///
    /// The front-left buffer aliases the drawable's own pixmap; every other
    /// attachment gets a new pixmap, at depth `format` when non-zero.
    pub fn create_buffer(
        &mut self,
        drawable: &Drawable,
        attachment: Attachment,
        format: u32,
    ) -> AccelResult<PresentationBuffer> {
        let pixmap = if attachment == Attachment::FrontLeft {
            drawable.pixmap.clone()
        } else {
            let depth = if format != 0 { format } else { drawable.depth };
            self.create_pixmap(
                drawable.width,
                drawable.height,
                depth,
                self.policy.hint(attachment),
            )?
        };
        Ok(self.named_buffer(attachment, format, pixmap))
    }

    /// Create buffers for a whole attachment list. A stencil attachment
    /// that follows a depth attachment shares the depth pixmap.
    pub fn create_buffers(
        &mut self,
        drawable: &Drawable,
        attachments: &[Attachment],
    ) -> AccelResult<Vec<PresentationBuffer>> {
        let mut buffers = Vec::with_capacity(attachments.len());
        let mut depth_pixmap: Option<Pixmap> = None;

        for &attachment in attachments {
            let shared = match (attachment, &depth_pixmap) {
                (Attachment::Stencil, Some(depth)) => Some(depth.clone()),
                _ => None,
            };
            let buffer = match shared {
                Some(pixmap) => self.named_buffer(attachment, 0, pixmap),
                None => self.create_buffer(drawable, attachment, 0)?,
            };
            if attachment == Attachment::Depth {
                depth_pixmap = Some(buffer.pixmap.clone());
            }
            buffers.push(buffer);
        }
        Ok(buffers)
    }

    fn named_buffer(
        &self,
        attachment: Attachment,
        format: u32,
        pixmap: Pixmap,
    ) -> PresentationBuffer {
        let name = match self.ctx.bufmgr().export_name(&pixmap.backing()) {
            Ok(name) => name,
            Err(e) => {
                log::warn!(
                    "dri2: cannot name {:?} buffer of pixmap {}: {}",
                    attachment,
                    pixmap.id(),
                    e
                );
                0
            }
        };
        log::debug!(
            "dri2: {:?} buffer name={} pixmap={} {}x{} depth={}",
            attachment,
            name,
            pixmap.id(),
            pixmap.width(),
            pixmap.height(),
            pixmap.depth()
        );
        PresentationBuffer::new(attachment, format, pixmap, name)
    }

    /// Release a buffer. An aliased front buffer only drops its reference.
    pub fn destroy_buffer(&mut self, buffer: PresentationBuffer) {
        log::trace!(
            "dri2: destroy {:?} buffer name={} (pixmap refs {})",
            buffer.attachment,
            buffer.name,
            buffer.pixmap.refcount()
        );
        drop(buffer);
    }

    pub fn destroy_buffers(&mut self, buffers: Vec<PresentationBuffer>) {
        for buffer in buffers {
            self.destroy_buffer(buffer);
        }
    }

    // ── Presentation ────────────────────────────────────────────────────────

    /// Pipe scanning out `drawable` straight from the front buffer.
    pub fn drawable_pipe(&self, drawable: &Drawable) -> Option<Pipe> {
        self.display.covering_pipe(&drawable.screen_bounds())
    }

    /// Pixmap and drawable-to-pixmap offset a buffer resolves to.
    fn resolve(drawable: &Drawable, buffer: &PresentationBuffer) -> (Pixmap, (i32, i32)) {
        if buffer.attachment == Attachment::FrontLeft {
            (drawable.pixmap.clone(), drawable.pixmap_offset())
        } else {
            (buffer.pixmap.clone(), (0, 0))
        }
    }

    /// Copy `region` (drawable coordinates) from `src` to `dst`.
    pub fn copy_region(
        &mut self,
        drawable: &Drawable,
        region: &[BoxRect],
        dst: &PresentationBuffer,
        src: &PresentationBuffer,
    ) -> AccelResult<()> {
        let (src_pixmap, src_off) = Self::resolve(drawable, src);
        let (dst_pixmap, dst_off) = Self::resolve(drawable, dst);

        let bounds = drawable.local_bounds();
        let clip: Vec<BoxRect> = region
            .iter()
            .map(|b| b.intersect(&bounds))
            .filter(|b| !b.is_empty())
            .map(|b| b.translate(dst_off.0, dst_off.1))
            .collect();
        if clip.is_empty() {
            return Ok(());
        }

        let dst_bo = dst_pixmap.backing();
        let src_bo = src_pixmap.backing();

        if self.swapbuffers_wait && self.ctx.bufmgr().is_scanout(&dst_bo) {
            let box_extents = extents(&clip);
            match self
                .display
                .covering_crtc(&box_extents)
                .filter(|c| !c.rotated)
            {
                Some(crtc) => {
                    let (y1, y2) = scanline_window(&box_extents, &crtc.crtc_box);
                    log::trace!("dri2: scan-line wait pipe {:?} rows {}..{}", crtc.pipe, y1, y2);
                    self.ctx.emit_scanline_wait(crtc.pipe, y1, y2)?;
                }
                None => log::trace!("dri2: copy region not on an unrotated crtc, no wait"),
            }
        }

        let src_surface = self.ctx.surface(&src_bo, src_pixmap.pitch(), src_pixmap.bpp());
        let dst_surface = self.ctx.surface(&dst_bo, dst_pixmap.pitch(), dst_pixmap.bpp());
        self.ctx.copy_boxes(
            &src_surface,
            &dst_surface,
            GX_COPY,
            u32::MAX,
            &clip,
            src_off.0 - dst_off.0,
            src_off.1 - dst_off.1,
        )?;

        self.ctx.emit_flush()?;
        self.ctx.flush(false)?;
        self.ctx.throttle()
    }

    /// Exchange front and back by page flip. `false` asks the caller to
    /// present with `copy_region` instead.
    pub fn swap_buffers(
        &mut self,
        front: &mut PresentationBuffer,
        back: &mut PresentationBuffer,
        token: u64,
    ) -> bool {
        if !self.caps.swap_buffers() {
            log::debug!("dri2: swap buffers not exposed");
            return false;
        }
        if self.shadow {
            log::debug!("dri2: shadow surface active, no flip");
            return false;
        }
        if !front.pixmap.same_pixmap(&self.screen_pixmap) {
            log::debug!("dri2: front pixmap {} is not the screen", front.pixmap.id());
            return false;
        }
        if !back.pixmap.matches_geometry(&front.pixmap) {
            log::debug!(
                "dri2: back {}x{}@{} does not match screen",
                back.pixmap.width(),
                back.pixmap.height(),
                back.pixmap.depth()
            );
            return false;
        }

        let old_front = front.pixmap.backing();
        let old_back = back.pixmap.backing();
        self.exchange(front, back, &old_back, &old_front);

        if !self.display.page_flip(&old_back, &old_front, token) {
            log::debug!("dri2: page flip failed, restoring bindings");
            self.exchange(front, back, &old_front, &old_back);
            return false;
        }
        log::trace!(
            "dri2: flipped to handle={} token={}",
            old_back.handle(),
            token
        );
        true
    }

    fn exchange(
        &self,
        front: &mut PresentationBuffer,
        back: &mut PresentationBuffer,
        new_front: &BufferObject,
        new_back: &BufferObject,
    ) {
        std::mem::swap(&mut front.name, &mut back.name);
        front.pixmap.set_backing(new_front.clone());
        back.pixmap.set_backing(new_back.clone());
        front.pitch = front.pixmap.pitch();
        back.pitch = back.pixmap.pitch();
        self.ctx.bufmgr().set_scanout(Some(new_front));
    }

    // ── Frame counters ──────────────────────────────────────────────────────

    fn require_vblank(&self) -> AccelResult<()> {
        if self.caps.vblank() {
            Ok(())
        } else {
            Err(AccelError::Fallback("vblank hooks not exposed"))
        }
    }

    /// Current `(ust, msc)` of the drawable's pipe; zeros when it has none.
    pub fn get_msc(&mut self, drawable: &Drawable) -> AccelResult<(u64, u64)> {
        self.require_vblank()?;
        let Some(pipe) = self.drawable_pipe(drawable) else {
            return Ok((0, 0));
        };
        let reply = self.vblank.query(self.ctx.device().as_ref(), pipe)?;
        Ok((reply.ust(), reply.sequence))
    }

    /// Schedule a swap for the frame satisfying the request.
    pub fn setup_swap(
        &mut self,
        drawable: &Drawable,
        target_msc: u64,
        divisor: u64,
        remainder: u64,
        token: u64,
    ) -> AccelResult<Scheduled> {
        self.schedule(drawable, RequestKind::Swap, target_msc, divisor, remainder, token)
    }

    /// Schedule a client wake-up for the frame satisfying the request.
    pub fn setup_wait_msc(
        &mut self,
        drawable: &Drawable,
        target_msc: u64,
        divisor: u64,
        remainder: u64,
        token: u64,
    ) -> AccelResult<Scheduled> {
        self.schedule(drawable, RequestKind::WaitMsc, target_msc, divisor, remainder, token)
    }

    fn schedule(
        &mut self,
        drawable: &Drawable,
        kind: RequestKind,
        target_msc: u64,
        divisor: u64,
        remainder: u64,
        token: u64,
    ) -> AccelResult<Scheduled> {
        self.require_vblank()?;
        // Off-screen drawables are timed against the first pipe.
        let pipe = self.drawable_pipe(drawable).unwrap_or(Pipe::A);
        let request = VblankRequest {
            target_msc,
            divisor,
            remainder,
            pipe,
        };
        self.vblank
            .schedule(self.ctx.device().as_ref(), drawable.id, kind, request, token)
    }

    /// Resolve the requests a delivered vblank event satisfies.
    pub fn handle_vblank_event(&mut self, event: &VblankEvent) -> Vec<Completion> {
        self.vblank.handle_event(event)
    }

    /// Resolve a destroyed drawable's pending requests.
    pub fn drawable_gone(&mut self, drawable: &Drawable) -> Vec<Completion> {
        self.vblank.cancel_drawable(drawable.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::CreateForm;
    use intelddx_common::{Generation, PAGE_SIZE};
    use intelddx_gpu::backend::sim_backend::SimDevice;
    use intelddx_gpu::command_processor::Client;
    use intelddx_gpu::regs::*;

    fn sim() -> Arc<SimDevice> {
        Arc::new(
            SimDevice::new()
                .with_crtc(Pipe::A, BoxRect::new(0, 0, 640, 480), false)
                .with_crtc(Pipe::B, BoxRect::new(640, 0, 1280, 480), true),
        )
    }

    fn screen_with(settings: &Settings) -> (Dri2Screen, Arc<SimDevice>) {
        let dev = sim();
        let ctx = GpuContext::new(settings, dev.clone()).unwrap();
        let screen =
            Dri2Screen::new(settings, ctx, dev.clone(), 1280, 480, "/dev/dri/card0", (1, 1))
                .unwrap();
        (screen, dev)
    }

    fn screen() -> (Dri2Screen, Arc<SimDevice>) {
        screen_with(&Settings::default())
    }

    fn blits(dev: &SimDevice, opcode: u32) -> Vec<intelddx_gpu::command_processor::Command> {
        dev.batches()
            .iter()
            .flat_map(|b| b.commands())
            .filter(|c| c.client == Client::Blt && c.blt_opcode() == opcode)
            .collect()
    }

    #[test]
    fn test_init_rejects_old_server() {
        let settings = Settings::default();
        let dev = sim();
        let ctx = GpuContext::new(&settings, dev.clone()).unwrap();
        let result = Dri2Screen::new(&settings, ctx, dev, 640, 480, "card0", (1, 0));
        assert!(matches!(result, Err(AccelError::Fallback(_))));
    }

    #[test]
    fn test_front_buffer_aliases_screen() {
        let (mut scr, _dev) = screen();
        let live = scr.context().bufmgr().live_objects();
        let win = scr.window(10, 0, 0, 300, 200);
        let before = scr.screen_pixmap().refcount();

        let front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();
        assert!(front.pixmap.same_pixmap(scr.screen_pixmap()));
        assert_eq!(scr.screen_pixmap().refcount(), before + 1);
        assert_ne!(front.name, 0);
        assert_eq!(scr.context().bufmgr().live_objects(), live);

        scr.destroy_buffer(front);
        assert_eq!(scr.screen_pixmap().refcount(), before);
        assert!(scr
            .context()
            .bufmgr()
            .is_scanout(&scr.screen_pixmap().backing()));
    }

    #[test]
    fn test_back_buffer_allocation() {
        let (mut scr, _dev) = screen();
        let win = scr.window(10, 0, 0, 300, 200);
        let live = scr.context().bufmgr().live_objects();

        let back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();
        assert_eq!(back.bo().tiling(), TilingMode::X);
        assert_eq!(back.pitch % 512, 0);
        assert_eq!(back.cpp, 4);
        assert_eq!(back.flags, 0);
        assert!(back.is_named());
        assert_eq!((back.pixmap.width(), back.pixmap.height()), (300, 200));
        assert_eq!(scr.context().bufmgr().live_objects(), live + 1);

        scr.destroy_buffer(back);
        assert_eq!(scr.context().bufmgr().live_objects(), live);
    }

    #[test]
    fn test_depth_format_override() {
        let (mut scr, _dev) = screen();
        let win = scr.window(10, 0, 0, 64, 64);
        let depth = scr.create_buffer(&win, Attachment::Depth, 16).unwrap();
        assert_eq!(depth.pixmap.depth(), 16);
        assert_eq!(depth.cpp, 2);
        assert_eq!(depth.format, 16);
        assert_eq!(depth.bo().tiling(), TilingMode::Y);
    }

    #[test]
    fn test_untiled_without_exec_fencing() {
        let settings = Settings {
            generation: Generation::I915,
            kernel_exec_fencing: false,
            ..Settings::default()
        };
        let (mut scr, _dev) = screen_with(&settings);
        let win = scr.window(10, 0, 0, 64, 64);
        let back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();
        assert_eq!(back.bo().tiling(), TilingMode::None);
        assert_eq!(back.bo().size() % PAGE_SIZE, 0);
    }

    #[test]
    fn test_plural_create_shares_stencil() {
        let settings = Settings {
            dri2_version: 1,
            ..Settings::default()
        };
        let (mut scr, _dev) = screen_with(&settings);
        assert_eq!(scr.caps().create, CreateForm::Plural);
        let win = scr.window(3, 0, 0, 128, 128);

        let buffers = scr
            .create_buffers(
                &win,
                &[
                    Attachment::FrontLeft,
                    Attachment::BackLeft,
                    Attachment::Depth,
                    Attachment::Stencil,
                ],
            )
            .unwrap();
        assert_eq!(buffers.len(), 4);
        assert!(buffers[3].pixmap.same_pixmap(&buffers[2].pixmap));
        assert_eq!(buffers[3].name, buffers[2].name);
        assert_eq!(buffers[2].pixmap.refcount(), 2);

        let live = scr.context().bufmgr().live_objects();
        scr.destroy_buffers(buffers);
        // Back and the shared depth/stencil pixmap are released.
        assert_eq!(scr.context().bufmgr().live_objects(), live - 2);
    }

    #[test]
    fn test_copy_region_waits_for_scanline() {
        let (mut scr, dev) = screen();
        let win = scr.window(10, 20, 100, 200, 100);
        let front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();
        let back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();

        scr.copy_region(&win, &[BoxRect::new(0, 0, 200, 100)], &front, &back)
            .unwrap();

        let words = dev.last_batch().unwrap().words;
        assert_eq!(
            &words[..5],
            &[
                MI_LOAD_SCAN_LINES_INCL | MI_LOAD_SCAN_LINES_DISPLAY_PIPEA,
                (100 << 16) | 200,
                MI_LOAD_SCAN_LINES_INCL | MI_LOAD_SCAN_LINES_DISPLAY_PIPEA,
                (100 << 16) | 200,
                MI_WAIT_FOR_EVENT | MI_WAIT_FOR_PIPEA_SCAN_LINE_WINDOW,
            ]
        );
        let copies = blits(&dev, 0x53);
        assert_eq!(copies.len(), 1);
        // Destination at the window origin, source at the back buffer origin.
        assert_eq!(copies[0].dwords[2], (100 << 16) | 20);
        assert_eq!(copies[0].dwords[3], (200 << 16) | 220);
        assert_eq!(copies[0].dwords[5], 0);
        assert_eq!(copies[0].header & XY_SRC_COPY_BLT_DST_TILED, XY_SRC_COPY_BLT_DST_TILED);
        assert_eq!(dev.throttle_count(), 1);
        assert!(!scr.context().needs_mi_flush());
    }

    #[test]
    fn test_scanline_window_clamps() {
        let crtc = BoxRect::new(0, 100, 640, 580);
        assert_eq!(scanline_window(&BoxRect::new(0, 50, 10, 700), &crtc), (0, 480));
        assert_eq!(scanline_window(&BoxRect::new(0, 150, 10, 200), &crtc), (50, 100));
    }

    #[test]
    fn test_copy_region_rotated_crtc_skips_wait() {
        let (mut scr, dev) = screen();
        let win = scr.window(10, 700, 0, 100, 100);
        let front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();
        let back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();

        scr.copy_region(&win, &[BoxRect::new(0, 0, 100, 100)], &front, &back)
            .unwrap();
        let cmds = dev.last_batch().unwrap().commands();
        assert_eq!(cmds[0].client, Client::Blt);
        assert_eq!(blits(&dev, 0x53).len(), 1);
    }

    #[test]
    fn test_copy_to_fake_front_has_no_wait() {
        let (mut scr, dev) = screen();
        let win = scr.window(10, 0, 0, 64, 64);
        let fake = scr
            .create_buffer(&win, Attachment::FakeFrontLeft, 0)
            .unwrap();
        let front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();

        // Region is clipped to the drawable.
        scr.copy_region(&win, &[BoxRect::new(-5, -5, 100, 32)], &fake, &front)
            .unwrap();
        let cmds = dev.last_batch().unwrap().commands();
        assert_eq!(cmds[0].client, Client::Blt);
        let copy = &blits(&dev, 0x53)[0];
        assert_eq!(copy.dwords[3], (32 << 16) | 64);
    }

    #[test]
    fn test_swap_buffers_exchanges_bindings() {
        let (mut scr, dev) = screen();
        let win = scr.window(10, 0, 0, 1280, 480);
        let mut front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();
        let mut back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();
        let (front_name, back_name) = (front.name, back.name);
        let (front_bo, back_bo) = (front.bo(), back.bo());

        assert!(scr.swap_buffers(&mut front, &mut back, 77));
        assert_eq!((front.name, back.name), (back_name, front_name));
        assert!(scr.screen_pixmap().backing().same_object(&back_bo));
        assert!(back.bo().same_object(&front_bo));
        assert!(scr.context().bufmgr().is_scanout(&back_bo));

        let flips = dev.flips();
        assert_eq!(flips.len(), 1);
        assert_eq!(flips[0].front, back_bo.handle());
        assert_eq!(flips[0].back, front_bo.handle());
        assert_eq!(flips[0].token, 77);
    }

    #[test]
    fn test_swap_rejected_with_shadow() {
        let settings = Settings {
            shadow: true,
            ..Settings::default()
        };
        let (mut scr, dev) = screen_with(&settings);
        let win = scr.window(10, 0, 0, 1280, 480);
        let mut front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();
        let mut back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();
        let name = front.name;
        assert!(!scr.swap_buffers(&mut front, &mut back, 1));
        assert_eq!(front.name, name);
        assert!(dev.flips().is_empty());
    }

    #[test]
    fn test_swap_rejected_for_partial_window() {
        let (mut scr, _dev) = screen();
        let win = scr.window(10, 0, 0, 300, 200);
        let mut front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();
        let mut back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();
        assert!(!scr.swap_buffers(&mut front, &mut back, 1));
    }

    #[test]
    fn test_swap_rejected_for_offscreen_front() {
        let (mut scr, _dev) = screen();
        let pixmap = scr.create_pixmap(1280, 480, 24, TilingMode::None).unwrap();
        let drawable = Drawable::from_pixmap(20, &pixmap);
        let mut front = scr
            .create_buffer(&drawable, Attachment::FrontLeft, 0)
            .unwrap();
        let mut back = scr
            .create_buffer(&drawable, Attachment::BackLeft, 0)
            .unwrap();
        assert!(!scr.swap_buffers(&mut front, &mut back, 1));
    }

    #[test]
    fn test_failed_flip_restores_bindings() {
        let (mut scr, dev) = screen();
        dev.set_flip_failure(true);
        let win = scr.window(10, 0, 0, 1280, 480);
        let mut front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();
        let mut back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();
        let (front_name, front_bo) = (front.name, front.bo());

        assert!(!scr.swap_buffers(&mut front, &mut back, 5));
        assert_eq!(front.name, front_name);
        assert!(front.bo().same_object(&front_bo));
        assert!(scr.context().bufmgr().is_scanout(&front_bo));
    }

    #[test]
    fn test_swap_not_exposed_without_flag() {
        let settings = Settings {
            use_swap_buffers: false,
            ..Settings::default()
        };
        let (mut scr, _dev) = screen_with(&settings);
        let win = scr.window(10, 0, 0, 1280, 480);
        let mut front = scr.create_buffer(&win, Attachment::FrontLeft, 0).unwrap();
        let mut back = scr.create_buffer(&win, Attachment::BackLeft, 0).unwrap();
        assert!(!scr.caps().swap_buffers());
        assert!(!scr.swap_buffers(&mut front, &mut back, 1));
    }

    #[test]
    fn test_drawable_pipe() {
        let (scr, _dev) = screen();
        assert_eq!(scr.drawable_pipe(&scr.window(1, 10, 10, 50, 50)), Some(Pipe::A));
        // Pipe B is rotated.
        assert_eq!(scr.drawable_pipe(&scr.window(2, 700, 10, 50, 50)), None);
        assert_eq!(scr.drawable_pipe(&scr.window(3, 2000, 10, 50, 50)), None);
    }

    #[test]
    fn test_get_msc() {
        let (mut scr, dev) = screen();
        dev.set_msc(Pipe::A, 42);
        let (ust, msc) = scr.get_msc(&scr.window(1, 0, 0, 10, 10)).unwrap();
        assert_eq!(msc, 42);
        assert!(ust > 0);
        assert_eq!(scr.get_msc(&scr.window(2, 3000, 0, 10, 10)).unwrap(), (0, 0));
    }

    #[test]
    fn test_vblank_hooks_need_version_four() {
        let settings = Settings {
            dri2_version: 3,
            ..Settings::default()
        };
        let (mut scr, _dev) = screen_with(&settings);
        let win = scr.window(1, 0, 0, 10, 10);
        assert!(matches!(scr.get_msc(&win), Err(AccelError::Fallback(_))));
        assert!(scr.setup_wait_msc(&win, 1, 0, 0, 1).is_err());
    }

    #[test]
    fn test_setup_swap_and_event() {
        let (mut scr, dev) = screen();
        dev.set_msc(Pipe::A, 100);
        let win = scr.window(1, 0, 0, 640, 480);

        assert_eq!(
            scr.setup_swap(&win, 0, 5, 2, 9).unwrap(),
            Scheduled::Pending { event_msc: 102 }
        );
        match scr.setup_wait_msc(&win, 0, 5, 0, 10).unwrap() {
            Scheduled::Immediate(c) => assert_eq!(c.msc, 100),
            other => panic!("expected immediate, got {:?}", other),
        }

        let events = dev.advance_vblank(Pipe::A, 2);
        let done: Vec<_> = events
            .iter()
            .flat_map(|e| scr.handle_vblank_event(e))
            .collect();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].token, 9);
        assert_eq!(done[0].kind, RequestKind::Swap);
        assert_eq!(done[0].msc, 102);
    }

    #[test]
    fn test_drawable_gone_resolves_pending() {
        let (mut scr, _dev) = screen();
        let win = scr.window(4, 0, 0, 64, 64);
        scr.setup_wait_msc(&win, 50, 0, 0, 3).unwrap();
        let done = scr.drawable_gone(&win);
        assert_eq!(done.len(), 1);
        assert_eq!((done[0].ust, done[0].msc), (0, 0));
        assert_eq!(scr.vblank().pending_count(), 0);
    }
}
