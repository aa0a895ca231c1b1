// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command batch emitter.
//!
//! Commands are accumulated into a bounded buffer under explicit
//! reservations: `begin(n)` reserves `n` words, `out`/`out_reloc` consume
//! them and `advance` closes the reservation. `flush` terminates the batch,
//! hands it to the device and returns the fence covering everything emitted
//! so far.
//!
//! Buffers referenced through relocations are pinned from the moment they
//! are emitted until the fence of the batch that carried them retires.

use std::collections::VecDeque;

use byteorder::{ByteOrder, LittleEndian};

use intelddx_common::error::{AccelError, AccelResult};
use intelddx_common::{Generation, PAGE_SIZE};

use crate::backend::{DrmDevice, Relocation};
use crate::bufmgr::{BufferManager, BufferObject, Residency, TilingMode};
use crate::command_processor;
use crate::fence::Fence;
use crate::regs::{
    Domain, MI_BATCH_BUFFER_END, MI_FLUSH, MI_INVALIDATE_MAP_CACHE, MI_NOOP, MI_WRITE_DIRTY_STATE,
};

/// Words kept free for `MI_BATCH_BUFFER_END` and its padding.
const TAIL_WORDS: usize = 2;

/// Emitter state between flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Idle,
    /// `begin(reserved)` called, nothing emitted yet.
    Reserving { reserved: usize },
    Appending { reserved: usize, used: usize },
}

pub struct BatchBuffer {
    bufmgr: BufferManager,
    bo: BufferObject,
    capacity: usize,
    words: Vec<u32>,
    relocs: Vec<Relocation>,
    /// Buffers referenced by the batch under construction.
    pinned: Vec<BufferObject>,
    state: BatchState,
    in_flight: VecDeque<(Fence, Vec<BufferObject>)>,
    last_fence: Fence,
    submissions: u64,
}

impl BatchBuffer {
    /// Allocate a batch of `capacity` words and map it for writing.
    pub fn new(bufmgr: &BufferManager, capacity: usize) -> AccelResult<Self> {
        let capacity = capacity.max(TAIL_WORDS + 2);
        let bo = bufmgr.allocate(
            "batch",
            (capacity * 4) as u64,
            TilingMode::None,
            PAGE_SIZE,
            Residency::GpuLocal,
        )?;
        bufmgr.map(&bo, true)?;
        log::debug!("batch: {} words, handle={}", capacity, bo.handle());

        Ok(Self {
            bufmgr: bufmgr.clone(),
            bo,
            capacity,
            words: Vec::with_capacity(capacity),
            relocs: Vec::new(),
            pinned: Vec::new(),
            state: BatchState::Idle,
            in_flight: VecDeque::new(),
            last_fence: Fence::NONE,
            submissions: 0,
        })
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Words emitted since the last flush.
    pub fn used(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Words still available to a new reservation.
    pub fn space(&self) -> usize {
        self.capacity
            .saturating_sub(self.words.len())
            .saturating_sub(TAIL_WORDS)
    }

    pub fn last_fence(&self) -> Fence {
        self.last_fence
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn bo(&self) -> &BufferObject {
        &self.bo
    }

    /// Whether the unsubmitted batch references `bo`.
    pub fn references(&self, bo: &BufferObject) -> bool {
        self.pinned.iter().any(|p| p.same_object(bo))
    }

    /// Most recent in-flight fence whose batch referenced `bo`.
    pub fn fence_for(&self, bo: &BufferObject) -> Option<Fence> {
        self.in_flight
            .iter()
            .rev()
            .find(|(_, set)| set.iter().any(|p| p.same_object(bo)))
            .map(|(fence, _)| *fence)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    // ── Emission ────────────────────────────────────────────────────────────

    /// Reserve `n` words.
    pub fn begin(&mut self, n: usize) -> AccelResult<()> {
        if self.state != BatchState::Idle {
            log::warn!("batch: begin({}) with reservation still open: {:?}", n, self.state);
        }
        let available = self.space();
        if n > available {
            return Err(AccelError::Overflow {
                requested: n,
                available,
            });
        }
        self.state = BatchState::Reserving { reserved: n };
        Ok(())
    }

    fn consume(&mut self) -> AccelResult<()> {
        let (reserved, used) = match self.state {
            BatchState::Idle => {
                return Err(AccelError::Overflow {
                    requested: 1,
                    available: 0,
                })
            }
            BatchState::Reserving { reserved } => (reserved, 0),
            BatchState::Appending { reserved, used } => (reserved, used),
        };
        if used >= reserved {
            return Err(AccelError::Overflow {
                requested: used + 1,
                available: reserved,
            });
        }
        self.state = BatchState::Appending {
            reserved,
            used: used + 1,
        };
        Ok(())
    }

    pub fn out(&mut self, word: u32) -> AccelResult<()> {
        self.consume()?;
        self.words.push(word);
        Ok(())
    }

    /// Emit the GPU address of `bo` plus `delta`, patched by the device.
    ///
    /// The word carries the last known address as a presumed value.
    pub fn out_reloc(
        &mut self,
        bo: &BufferObject,
        read_domains: Domain,
        write_domain: Domain,
        delta: u32,
    ) -> AccelResult<()> {
        self.consume()?;
        self.relocs.push(Relocation {
            offset: self.words.len(),
            target: bo.handle(),
            target_size: bo.size(),
            target_alignment: bo.alignment(),
            delta,
            read_domains,
            write_domain,
        });
        let presumed = bo.offset().map(|o| o + delta as u64).unwrap_or(delta as u64);
        self.words.push(presumed as u32);

        if !self.references(bo) {
            bo.pin();
            self.pinned.push(bo.clone());
        }
        Ok(())
    }

    /// Close the current reservation.
    pub fn advance(&mut self) {
        match self.state {
            BatchState::Appending { reserved, used } if used == reserved => {}
            BatchState::Idle => log::warn!("batch: advance without begin"),
            other => log::warn!("batch: reservation closed short: {:?}", other),
        }
        self.state = BatchState::Idle;
    }

    /// Cache flush between dependent operations.
    pub fn emit_flush(&mut self, generation: Generation) -> AccelResult<()> {
        let word = if generation.is_i965() {
            MI_FLUSH
        } else {
            MI_FLUSH | MI_WRITE_DIRTY_STATE | MI_INVALIDATE_MAP_CACHE
        };
        self.begin(1)?;
        self.out(word)?;
        self.advance();
        Ok(())
    }

    // ── Submission ──────────────────────────────────────────────────────────

    /// Submit the batch. With `sync` the call returns only once the GPU has
    /// consumed it.
    pub fn flush(&mut self, device: &dyn DrmDevice, sync: bool) -> AccelResult<Fence> {
        if self.state != BatchState::Idle {
            log::error!("batch: flush with reservation open: {:?}", self.state);
            self.state = BatchState::Idle;
        }

        if self.words.is_empty() {
            if sync {
                self.wait_idle(device)?;
            }
            return Ok(self.last_fence);
        }

        self.words.push(MI_BATCH_BUFFER_END);
        if self.words.len() % 2 != 0 {
            self.words.push(MI_NOOP);
        }
        self.mirror();

        if log::log_enabled!(log::Level::Trace) {
            log::trace!("batch: submit\n{}", command_processor::dump_batch(&self.words));
        }

        let reply = match device.submit_batch(&self.words, &self.relocs) {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("batch: submission of {} words failed: {}", self.words.len(), e);
                self.discard();
                return Err(e);
            }
        };

        for (handle, offset) in &reply.offsets {
            self.bufmgr.set_offset(*handle, *offset);
        }
        log::trace!(
            "batch: {} words, {} relocs -> {}",
            self.words.len(),
            self.relocs.len(),
            reply.fence
        );

        let pinned = std::mem::take(&mut self.pinned);
        self.in_flight.push_back((reply.fence, pinned));
        self.last_fence = reply.fence;
        self.words.clear();
        self.relocs.clear();
        self.submissions += 1;

        if sync {
            device.wait_fence(reply.fence)?;
            self.retire(device);
        }
        Ok(reply.fence)
    }

    /// Unpin the buffers of every batch whose fence has signalled.
    pub fn retire(&mut self, device: &dyn DrmDevice) -> usize {
        let mut retired = 0;
        while let Some((fence, _)) = self.in_flight.front() {
            if !device.fence_signaled(*fence) {
                break;
            }
            if let Some((_, set)) = self.in_flight.pop_front() {
                set.iter().for_each(BufferObject::unpin);
            }
            retired += 1;
        }
        retired
    }

    /// Wait for all submitted work and retire it.
    pub fn wait_idle(&mut self, device: &dyn DrmDevice) -> AccelResult<()> {
        if self.last_fence != Fence::NONE {
            device.wait_fence(self.last_fence)?;
        }
        self.retire(device);
        Ok(())
    }

    /// Copy the words into the batch buffer's pages.
    fn mirror(&self) {
        let len = self.words.len() * 4;
        let written = self.bo.with_mapping(|bytes| {
            LittleEndian::write_u32_into(&self.words, &mut bytes[..len]);
        });
        if written.is_none() {
            log::warn!("batch: backing buffer not mapped");
        }
    }

    /// Drop the unsubmitted batch.
    fn discard(&mut self) {
        self.pinned.drain(..).for_each(|bo| bo.unpin());
        self.words.clear();
        self.relocs.clear();
        self.state = BatchState::Idle;
    }
}

impl Drop for BatchBuffer {
    fn drop(&mut self) {
        self.discard();
        self.bufmgr.unmap(&self.bo);
    }
}
