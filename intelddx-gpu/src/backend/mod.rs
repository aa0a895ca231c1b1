// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Device and display collaborator interfaces.
//!
//! `DrmDevice` is the ioctl surface the acceleration layer drives: batch
//! submission, fence waits, throttling and the vblank counter. `DisplayLayer`
//! is the mode-setting side: which CRTC covers a region, and page flips.
//! Both take `&self`; implementations use interior mutability.

pub mod sim_backend;

use intelddx_common::error::AccelResult;
use intelddx_common::{BoxRect, Handle, Pipe};

use crate::bufmgr::BufferObject;
use crate::fence::Fence;
use crate::regs::Domain;

/// Deferred address patch: write `target`'s GPU address plus `delta` into
/// batch word `offset` once the device has placed the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub offset: usize,
    pub target: Handle,
    pub target_size: u64,
    pub target_alignment: u64,
    pub delta: u32,
    pub read_domains: Domain,
    pub write_domain: Domain,
}

/// Result of a batch submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitReply {
    pub fence: Fence,
    /// GPU addresses the device chose for each relocation target.
    pub offsets: Vec<(Handle, u64)>,
}

/// Current scanout counter of a pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VblankReply {
    pub sequence: u64,
    pub tv_sec: u64,
    pub tv_usec: u64,
}

impl VblankReply {
    /// Unadjusted system time in microseconds.
    pub fn ust(&self) -> u64 {
        self.tv_sec * 1_000_000 + self.tv_usec
    }
}

/// A vblank event delivered by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankEvent {
    pub pipe: Pipe,
    pub sequence: u64,
    pub tv_sec: u64,
    pub tv_usec: u64,
    pub token: u64,
}

impl VblankEvent {
    pub fn ust(&self) -> u64 {
        self.tv_sec * 1_000_000 + self.tv_usec
    }
}

/// Kernel device ioctl layer.
pub trait DrmDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Submit a batch. Words referenced by `relocs` are patched by the device.
    fn submit_batch(&self, words: &[u32], relocs: &[Relocation]) -> AccelResult<SubmitReply>;

    fn fence_signaled(&self, fence: Fence) -> bool;

    /// Block until `fence` has signalled.
    fn wait_fence(&self, fence: Fence) -> AccelResult<()>;

    /// Bound the amount of outstanding GPU work queued by this client.
    fn throttle(&self) -> AccelResult<()>;

    /// Read the current scanout sequence counter of `pipe`.
    fn query_vblank(&self, pipe: Pipe) -> AccelResult<VblankReply>;

    /// Arm a one-shot event at absolute `sequence`. Returns the sequence the
    /// event will report.
    fn queue_vblank_event(&self, pipe: Pipe, sequence: u64, token: u64) -> AccelResult<u64>;
}

/// CRTC covering a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrtcCoverage {
    pub pipe: Pipe,
    /// Visible area of the CRTC in screen coordinates.
    pub crtc_box: BoxRect,
    /// Rotated CRTCs scan out of a shadow buffer, not the front buffer.
    pub rotated: bool,
}

/// Mode-setting collaborator.
pub trait DisplayLayer: Send + Sync {
    /// CRTC with the largest overlap with `region`.
    fn covering_crtc(&self, region: &BoxRect) -> Option<CrtcCoverage>;

    /// Swap scanout from `back` to `front`. `token` is returned with the
    /// completion event.
    fn page_flip(&self, front: &BufferObject, back: &BufferObject, token: u64) -> bool;

    /// Pipe scanning out `region` directly from the front buffer.
    fn covering_pipe(&self, region: &BoxRect) -> Option<Pipe> {
        self.covering_crtc(region)
            .filter(|c| !c.rotated)
            .map(|c| c.pipe)
    }
}
