// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Simulated device: an in-process stand-in for the kernel driver and the
//! mode-setting layer.
//!
//! Submitted batches are validated with the command parser, relocations are
//! patched against a bump-allocated aperture and the result is recorded so
//! callers can inspect the exact command stream. Batches stay outstanding
//! until something waits on them or the test calls [`SimDevice::complete_all`].
//! Each pipe has a frame counter advanced explicitly with
//! [`SimDevice::advance_vblank`].

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;

use intelddx_common::error::{errno, AccelError, AccelResult};
use intelddx_common::{align_up, BoxRect, Handle, Pipe};

use super::{
    CrtcCoverage, DisplayLayer, DrmDevice, Relocation, SubmitReply, VblankEvent, VblankReply,
};
use crate::bufmgr::BufferObject;
use crate::command_processor::{self, Command};
use crate::fence::Fence;

/// Base of the simulated graphics aperture.
const GTT_BASE: u64 = 0x0010_0000;

/// Frame period of the simulated display (60 Hz), in microseconds.
pub const FRAME_USEC: u64 = 16_667;

/// A batch as the device executed it, relocations applied.
#[derive(Debug, Clone)]
pub struct SubmittedBatch {
    pub fence: Fence,
    pub words: Vec<u32>,
    pub relocs: Vec<Relocation>,
}

impl SubmittedBatch {
    /// Parsed commands; the batch was validated on submission.
    pub fn commands(&self) -> Vec<Command> {
        command_processor::parse_batch(&self.words).unwrap_or_default()
    }
}

/// A page flip accepted by the display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlipRecord {
    pub front: Handle,
    pub back: Handle,
    pub token: u64,
}

#[derive(Debug, Clone, Copy)]
struct PipeClock {
    msc: u64,
    ust: u64,
}

impl Default for PipeClock {
    fn default() -> Self {
        Self {
            msc: 0,
            ust: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ArmedEvent {
    pipe: Pipe,
    sequence: u64,
    token: u64,
}

struct SimState {
    next_seqno: u32,
    completed: u32,
    next_gtt: u64,
    bindings: HashMap<Handle, u64>,
    batches: Vec<SubmittedBatch>,
    throttles: u32,
    submit_errno: Option<i32>,
    clocks: [PipeClock; 2],
    vblank_fail: bool,
    armed: Vec<ArmedEvent>,
    delivered: VecDeque<VblankEvent>,
    crtcs: Vec<CrtcCoverage>,
    flips: Vec<FlipRecord>,
    flip_fail: bool,
}

impl SimState {
    fn bind(&mut self, reloc: &Relocation) -> u64 {
        if let Some(&offset) = self.bindings.get(&reloc.target) {
            return offset;
        }
        let offset = align_up(self.next_gtt, reloc.target_alignment.max(1));
        self.next_gtt = offset + reloc.target_size;
        self.bindings.insert(reloc.target, offset);
        log::trace!("sim: bind handle={} at 0x{:X}", reloc.target, offset);
        offset
    }

    fn last_submitted(&self) -> u32 {
        self.next_seqno.wrapping_sub(1)
    }

    fn deliver(&mut self, armed: ArmedEvent) {
        let clock = self.clocks[armed.pipe.index()];
        self.delivered.push_back(VblankEvent {
            pipe: armed.pipe,
            sequence: clock.msc,
            tv_sec: clock.ust / 1_000_000,
            tv_usec: clock.ust % 1_000_000,
            token: armed.token,
        });
    }
}

/// Simulated DRM device and display layer.
pub struct SimDevice {
    state: Mutex<SimState>,
}

impl SimDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_seqno: 1,
                completed: 0,
                next_gtt: GTT_BASE,
                bindings: HashMap::new(),
                batches: Vec::new(),
                throttles: 0,
                submit_errno: None,
                clocks: [PipeClock::default(); 2],
                vblank_fail: false,
                armed: Vec::new(),
                delivered: VecDeque::new(),
                crtcs: Vec::new(),
                flips: Vec::new(),
                flip_fail: false,
            }),
        }
    }

    /// Add a CRTC scanning out `crtc_box` on `pipe`.
    pub fn with_crtc(self, pipe: Pipe, crtc_box: BoxRect, rotated: bool) -> Self {
        self.state.lock().crtcs.push(CrtcCoverage {
            pipe,
            crtc_box,
            rotated,
        });
        self
    }

    // ── Batch inspection ───────────────────────────────────────────────────

    pub fn batches(&self) -> Vec<SubmittedBatch> {
        self.state.lock().batches.clone()
    }

    pub fn batch_count(&self) -> usize {
        self.state.lock().batches.len()
    }

    pub fn last_batch(&self) -> Option<SubmittedBatch> {
        self.state.lock().batches.last().cloned()
    }

    pub fn throttle_count(&self) -> u32 {
        self.state.lock().throttles
    }

    pub fn completed_seqno(&self) -> u32 {
        self.state.lock().completed
    }

    /// Aperture offset the device chose for `handle`, once bound.
    pub fn bound_offset(&self, handle: Handle) -> Option<u64> {
        self.state.lock().bindings.get(&handle).copied()
    }

    /// Retire every submitted batch.
    pub fn complete_all(&self) {
        let mut st = self.state.lock();
        st.completed = st.last_submitted();
    }

    /// Make subsequent submissions fail with `errno`.
    pub fn set_submit_failure(&self, code: Option<i32>) {
        self.state.lock().submit_errno = code;
    }

    // ── Vblank control ─────────────────────────────────────────────────────

    pub fn set_vblank_failure(&self, fail: bool) {
        self.state.lock().vblank_fail = fail;
    }

    pub fn set_msc(&self, pipe: Pipe, msc: u64) {
        self.state.lock().clocks[pipe.index()].msc = msc;
    }

    pub fn msc(&self, pipe: Pipe) -> u64 {
        self.state.lock().clocks[pipe.index()].msc
    }

    /// Events armed but not yet fired.
    pub fn armed_events(&self) -> usize {
        self.state.lock().armed.len()
    }

    /// Run `frames` vertical blanks on `pipe` and return every event that
    /// became deliverable.
    pub fn advance_vblank(&self, pipe: Pipe, frames: u64) -> Vec<VblankEvent> {
        {
            let mut st = self.state.lock();
            for _ in 0..frames {
                let clock = &mut st.clocks[pipe.index()];
                clock.msc += 1;
                clock.ust += FRAME_USEC;
                let msc = clock.msc;

                let (due, waiting): (Vec<_>, Vec<_>) = st
                    .armed
                    .drain(..)
                    .partition(|e| e.pipe == pipe && e.sequence <= msc);
                st.armed = waiting;
                for event in due {
                    st.deliver(event);
                }
            }
        }
        self.poll_events()
    }

    /// Drain events delivered so far.
    pub fn poll_events(&self) -> Vec<VblankEvent> {
        self.state.lock().delivered.drain(..).collect()
    }

    // ── Display control ────────────────────────────────────────────────────

    pub fn flips(&self) -> Vec<FlipRecord> {
        self.state.lock().flips.clone()
    }

    pub fn set_flip_failure(&self, fail: bool) {
        self.state.lock().flip_fail = fail;
    }
}

impl Default for SimDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DrmDevice for SimDevice {
    fn name(&self) -> &str {
        "sim"
    }

    fn submit_batch(&self, words: &[u32], relocs: &[Relocation]) -> AccelResult<SubmitReply> {
        const IOCTL: &str = "I915_GEM_EXECBUFFER";
        let mut st = self.state.lock();

        if let Some(code) = st.submit_errno {
            return Err(AccelError::Device {
                ioctl: IOCTL,
                errno: code,
            });
        }

        let commands = command_processor::parse_batch(words).map_err(|e| {
            log::warn!("sim: rejected batch: {}", e);
            AccelError::Device {
                ioctl: IOCTL,
                errno: errno::EINVAL,
            }
        })?;
        let terminated = commands.iter().any(Command::is_batch_end);
        if !terminated || relocs.iter().any(|r| r.offset >= words.len()) {
            log::warn!(
                "sim: rejected batch ({} words, terminated={})",
                words.len(),
                terminated
            );
            return Err(AccelError::Device {
                ioctl: IOCTL,
                errno: errno::EINVAL,
            });
        }

        let mut patched = words.to_vec();
        let mut offsets = Vec::with_capacity(relocs.len());
        for reloc in relocs {
            let base = st.bind(reloc);
            patched[reloc.offset] = (base + reloc.delta as u64) as u32;
            if !offsets.iter().any(|&(h, _)| h == reloc.target) {
                offsets.push((reloc.target, base));
            }
        }

        let fence = Fence(st.next_seqno);
        st.next_seqno = st.next_seqno.wrapping_add(1).max(1);
        st.batches.push(SubmittedBatch {
            fence,
            words: patched,
            relocs: relocs.to_vec(),
        });
        log::trace!(
            "sim: exec {} words, {} relocs -> {}",
            words.len(),
            relocs.len(),
            fence
        );
        Ok(SubmitReply { fence, offsets })
    }

    fn fence_signaled(&self, fence: Fence) -> bool {
        fence.passed(self.state.lock().completed)
    }

    fn wait_fence(&self, fence: Fence) -> AccelResult<()> {
        let mut st = self.state.lock();
        if !fence.passed(st.last_submitted()) {
            return Err(AccelError::Device {
                ioctl: "I915_GEM_WAIT",
                errno: errno::EINVAL,
            });
        }
        if !fence.passed(st.completed) {
            st.completed = fence.seqno();
        }
        Ok(())
    }

    fn throttle(&self) -> AccelResult<()> {
        self.state.lock().throttles += 1;
        Ok(())
    }

    fn query_vblank(&self, pipe: Pipe) -> AccelResult<VblankReply> {
        let st = self.state.lock();
        if st.vblank_fail {
            return Err(AccelError::Device {
                ioctl: "DRM_IOCTL_WAIT_VBLANK",
                errno: errno::EINVAL,
            });
        }
        let clock = st.clocks[pipe.index()];
        Ok(VblankReply {
            sequence: clock.msc,
            tv_sec: clock.ust / 1_000_000,
            tv_usec: clock.ust % 1_000_000,
        })
    }

    fn queue_vblank_event(&self, pipe: Pipe, sequence: u64, token: u64) -> AccelResult<u64> {
        let mut st = self.state.lock();
        if st.vblank_fail {
            return Err(AccelError::Device {
                ioctl: "DRM_IOCTL_WAIT_VBLANK",
                errno: errno::EINVAL,
            });
        }
        let armed = ArmedEvent {
            pipe,
            sequence,
            token,
        };
        let msc = st.clocks[pipe.index()].msc;
        if sequence <= msc {
            // Already passed: the kernel fires on the next event read.
            st.deliver(armed);
            Ok(msc)
        } else {
            st.armed.push(armed);
            Ok(sequence)
        }
    }
}

impl DisplayLayer for SimDevice {
    fn covering_crtc(&self, region: &BoxRect) -> Option<CrtcCoverage> {
        let st = self.state.lock();
        st.crtcs
            .iter()
            .filter_map(|c| {
                let area = c.crtc_box.intersect(region).area();
                (area > 0).then_some((area, *c))
            })
            .max_by_key(|(area, _)| *area)
            .map(|(_, c)| c)
    }

    fn page_flip(&self, front: &BufferObject, back: &BufferObject, token: u64) -> bool {
        let mut st = self.state.lock();
        if st.flip_fail {
            log::debug!("sim: page flip refused");
            return false;
        }
        st.flips.push(FlipRecord {
            front: front.handle(),
            back: back.handle(),
            token,
        });
        true
    }
}
