// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Vblank-synchronized scheduling of swaps and MSC waits.
//!
//! A request either resolves on the call that creates it (the frame
//! condition already holds) or arms a one-shot device event and waits in a
//! per-pipe pending list until `handle_event` or `cancel_drawable` resolves
//! it. Each request resolves exactly once.

use intelddx_common::error::{errno, AccelError, AccelResult};
use intelddx_common::Pipe;
use intelddx_gpu::backend::{DrmDevice, VblankEvent, VblankReply};

/// Frame condition a client asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankRequest {
    pub target_msc: u64,
    pub divisor: u64,
    pub remainder: u64,
    pub pipe: Pipe,
}

/// When a request can be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The condition holds at the current frame.
    Immediate,
    /// Arm an event at this absolute frame count.
    At(u64),
}

/// Where a request resolves, given the pipe's current frame count.
///
/// With a divisor the next frame satisfying `msc % divisor == remainder` is
/// chosen, and a result not strictly in the future moves on by one period.
/// Swaps and MSC waits share this rule. A remainder that no frame can
/// satisfy, or a target past the end of the counter, is refused.
pub fn compute_target(
    current: u64,
    target_msc: u64,
    divisor: u64,
    remainder: u64,
) -> AccelResult<Target> {
    if divisor == 0 {
        return Ok(Target::At(target_msc));
    }
    if remainder >= divisor {
        return Err(AccelError::Fallback("vblank remainder not below divisor"));
    }
    if current % divisor == remainder {
        return Ok(Target::Immediate);
    }
    let overflow = || AccelError::Fallback("vblank target past the frame counter");
    let mut next = (current - current % divisor)
        .checked_add(remainder)
        .ok_or_else(overflow)?;
    if next <= current {
        next = next.checked_add(divisor).ok_or_else(overflow)?;
    }
    Ok(Target::At(next))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Swap,
    WaitMsc,
}

/// A resolved request, reported to the server exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub token: u64,
    pub drawable: u32,
    pub kind: RequestKind,
    pub ust: u64,
    pub msc: u64,
}

/// Result of scheduling a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    Immediate(Completion),
    /// An event was armed; it reports this frame count.
    Pending { event_msc: u64 },
}

#[derive(Debug, Clone, Copy)]
struct PendingRequest {
    token: u64,
    drawable: u32,
    kind: RequestKind,
    event_msc: u64,
}

pub struct VblankScheduler {
    pending: [Vec<PendingRequest>; 2],
    max_pending: usize,
    /// Cleared after the first device failure.
    enabled: bool,
}

impl VblankScheduler {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: [Vec::new(), Vec::new()],
            max_pending,
            enabled: true,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pending_count(&self) -> usize {
        self.pending.iter().map(Vec::len).sum()
    }

    pub fn pending_on(&self, pipe: Pipe) -> usize {
        self.pending[pipe.index()].len()
    }

    /// Read the current frame counter of `pipe`.
    pub fn query(&mut self, device: &dyn DrmDevice, pipe: Pipe) -> AccelResult<VblankReply> {
        if !self.enabled {
            return Err(Self::disabled_error());
        }
        device.query_vblank(pipe).map_err(|e| self.device_failed(e))
    }

    /// Resolve `request` now or arm an event for it.
    pub fn schedule(
        &mut self,
        device: &dyn DrmDevice,
        drawable: u32,
        kind: RequestKind,
        request: VblankRequest,
        token: u64,
    ) -> AccelResult<Scheduled> {
        let pipe = request.pipe;
        let current = self.query(device, pipe)?;
        match compute_target(
            current.sequence,
            request.target_msc,
            request.divisor,
            request.remainder,
        )? {
            Target::Immediate => {
                log::trace!(
                    "vblank: {:?} token={} satisfied at msc={}",
                    kind,
                    token,
                    current.sequence
                );
                Ok(Scheduled::Immediate(Completion {
                    token,
                    drawable,
                    kind,
                    ust: current.ust(),
                    msc: current.sequence,
                }))
            }
            Target::At(sequence) => {
                if self.pending_count() >= self.max_pending {
                    log::debug!(
                        "vblank: {} requests pending, refusing token={}",
                        self.pending_count(),
                        token
                    );
                    return Err(AccelError::Busy { handle: drawable });
                }
                let event_msc = device
                    .queue_vblank_event(pipe, sequence, token)
                    .map_err(|e| self.device_failed(e))?;
                self.pending[pipe.index()].push(PendingRequest {
                    token,
                    drawable,
                    kind,
                    event_msc,
                });
                log::trace!(
                    "vblank: {:?} token={} armed on pipe {:?} at msc={} (now {})",
                    kind,
                    token,
                    pipe,
                    event_msc,
                    current.sequence
                );
                Ok(Scheduled::Pending { event_msc })
            }
        }
    }

    /// Resolve every request on the event's pipe whose frame has been reached.
    pub fn handle_event(&mut self, event: &VblankEvent) -> Vec<Completion> {
        let list = &mut self.pending[event.pipe.index()];
        let (due, waiting): (Vec<_>, Vec<_>) = list
            .drain(..)
            .partition(|p| p.token == event.token || p.event_msc <= event.sequence);
        *list = waiting;

        if due.is_empty() {
            log::debug!(
                "vblank: event token={} on pipe {:?} has no pending request",
                event.token,
                event.pipe
            );
        }
        due.into_iter()
            .map(|p| Completion {
                token: p.token,
                drawable: p.drawable,
                kind: p.kind,
                ust: event.ust(),
                msc: event.sequence,
            })
            .collect()
    }

    /// Resolve the drawable's pending requests with zeroed timestamps. Its
    /// armed events later arrive with nothing left to resolve.
    pub fn cancel_drawable(&mut self, drawable: u32) -> Vec<Completion> {
        let mut cancelled = Vec::new();
        for list in self.pending.iter_mut() {
            let (gone, kept): (Vec<_>, Vec<_>) =
                list.drain(..).partition(|p| p.drawable == drawable);
            *list = kept;
            cancelled.extend(gone.into_iter().map(|p| Completion {
                token: p.token,
                drawable,
                kind: p.kind,
                ust: 0,
                msc: 0,
            }));
        }
        if !cancelled.is_empty() {
            log::debug!(
                "vblank: drawable {} gone, {} request(s) resolved empty",
                drawable,
                cancelled.len()
            );
        }
        cancelled
    }

    fn device_failed(&mut self, e: AccelError) -> AccelError {
        if self.enabled {
            log::warn!(
                "vblank: frame counter unavailable ({}), synchronized presentation disabled",
                e
            );
            self.enabled = false;
        } else {
            log::debug!("vblank: device error while disabled: {}", e);
        }
        e
    }

    fn disabled_error() -> AccelError {
        AccelError::Device {
            ioctl: "DRM_IOCTL_WAIT_VBLANK",
            errno: errno::ENODEV,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use intelddx_gpu::backend::sim_backend::SimDevice;

    fn request(target_msc: u64, divisor: u64, remainder: u64) -> VblankRequest {
        VblankRequest {
            target_msc,
            divisor,
            remainder,
            pipe: Pipe::A,
        }
    }

    #[test]
    fn test_compute_target() {
        assert_eq!(compute_target(100, 0, 5, 2).unwrap(), Target::At(102));
        assert_eq!(compute_target(103, 0, 5, 3).unwrap(), Target::Immediate);
        // Remainder already passed in this period.
        assert_eq!(compute_target(104, 0, 5, 2).unwrap(), Target::At(107));
        assert_eq!(compute_target(101, 0, 5, 0).unwrap(), Target::At(105));
        assert_eq!(compute_target(50, 120, 0, 0).unwrap(), Target::At(120));
    }

    #[test]
    fn test_compute_target_rejects_extreme_values() {
        assert!(matches!(
            compute_target(100, 0, 5, u64::MAX),
            Err(AccelError::Fallback(_))
        ));
        assert!(matches!(
            compute_target(100, 0, 5, 5),
            Err(AccelError::Fallback(_))
        ));
        // The period after frame 1 lies beyond the counter.
        assert!(matches!(
            compute_target(100, 0, u64::MAX, 1),
            Err(AccelError::Fallback(_))
        ));
        assert_eq!(
            compute_target(100, 0, u64::MAX, 101).unwrap(),
            Target::At(101)
        );
        // The next matching frame lies beyond the counter.
        assert!(matches!(
            compute_target(u64::MAX - 1, 0, u64::MAX - 2, 0),
            Err(AccelError::Fallback(_))
        ));
    }

    #[test]
    fn test_out_of_range_request_leaves_nothing_pending() {
        let dev = SimDevice::new();
        dev.set_msc(Pipe::A, 100);
        let mut sched = VblankScheduler::new(8);
        assert!(matches!(
            sched.schedule(&dev, 1, RequestKind::Swap, request(0, 5, u64::MAX), 3),
            Err(AccelError::Fallback(_))
        ));
        assert_eq!(sched.pending_count(), 0);
        assert_eq!(dev.armed_events(), 0);
        assert!(sched.is_enabled());
    }

    #[test]
    fn test_immediate_resolution() {
        let dev = SimDevice::new();
        dev.set_msc(Pipe::A, 103);
        let mut sched = VblankScheduler::new(8);
        let result = sched
            .schedule(&dev, 1, RequestKind::Swap, request(0, 5, 3), 42)
            .unwrap();
        match result {
            Scheduled::Immediate(c) => {
                assert_eq!(c.msc, 103);
                assert_eq!(c.token, 42);
                assert!(c.ust > 0);
            }
            other => panic!("expected immediate, got {:?}", other),
        }
        assert_eq!(dev.armed_events(), 0);
        assert_eq!(sched.pending_count(), 0);
    }

    #[test]
    fn test_pending_resolves_once() {
        let dev = SimDevice::new();
        dev.set_msc(Pipe::A, 100);
        let mut sched = VblankScheduler::new(8);
        let result = sched
            .schedule(&dev, 1, RequestKind::WaitMsc, request(0, 5, 2), 7)
            .unwrap();
        assert_eq!(result, Scheduled::Pending { event_msc: 102 });

        assert!(dev.advance_vblank(Pipe::A, 1).is_empty());
        let events = dev.advance_vblank(Pipe::A, 1);
        assert_eq!(events.len(), 1);

        let done = sched.handle_event(&events[0]);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].msc, 102);
        assert_eq!(done[0].kind, RequestKind::WaitMsc);
        assert!(sched.handle_event(&events[0]).is_empty());
    }

    #[test]
    fn test_independent_requests_per_pipe() {
        let dev = SimDevice::new();
        let mut sched = VblankScheduler::new(8);
        sched
            .schedule(&dev, 1, RequestKind::Swap, request(2, 0, 0), 1)
            .unwrap();
        sched
            .schedule(&dev, 2, RequestKind::WaitMsc, request(4, 0, 0), 2)
            .unwrap();
        let mut on_b = request(1, 0, 0);
        on_b.pipe = Pipe::B;
        sched
            .schedule(&dev, 3, RequestKind::WaitMsc, on_b, 3)
            .unwrap();
        assert_eq!(sched.pending_on(Pipe::A), 2);
        assert_eq!(sched.pending_on(Pipe::B), 1);

        let events = dev.advance_vblank(Pipe::A, 2);
        let done: Vec<_> = events.iter().flat_map(|e| sched.handle_event(e)).collect();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].token, 1);
        assert_eq!(sched.pending_on(Pipe::A), 1);
        assert_eq!(sched.pending_on(Pipe::B), 1);
    }

    #[test]
    fn test_pending_cap() {
        let dev = SimDevice::new();
        let mut sched = VblankScheduler::new(2);
        for token in 0..2 {
            sched
                .schedule(&dev, 1, RequestKind::WaitMsc, request(10, 0, 0), token)
                .unwrap();
        }
        assert!(matches!(
            sched.schedule(&dev, 1, RequestKind::WaitMsc, request(10, 0, 0), 9),
            Err(AccelError::Busy { .. })
        ));
    }

    #[test]
    fn test_pending_cap_spares_immediate_requests() {
        let dev = SimDevice::new();
        dev.set_msc(Pipe::A, 103);
        let mut sched = VblankScheduler::new(1);
        sched
            .schedule(&dev, 1, RequestKind::WaitMsc, request(200, 0, 0), 1)
            .unwrap();
        let result = sched
            .schedule(&dev, 2, RequestKind::Swap, request(0, 5, 3), 2)
            .unwrap();
        assert!(matches!(result, Scheduled::Immediate(c) if c.msc == 103));
        assert_eq!(sched.pending_count(), 1);
    }

    #[test]
    fn test_cancel_drawable() {
        let dev = SimDevice::new();
        let mut sched = VblankScheduler::new(8);
        sched
            .schedule(&dev, 5, RequestKind::Swap, request(3, 0, 0), 11)
            .unwrap();
        sched
            .schedule(&dev, 6, RequestKind::Swap, request(30, 0, 0), 12)
            .unwrap();

        let cancelled = sched.cancel_drawable(5);
        assert_eq!(cancelled.len(), 1);
        assert_eq!((cancelled[0].ust, cancelled[0].msc), (0, 0));

        // The armed event still fires but resolves nothing.
        let events = dev.advance_vblank(Pipe::A, 3);
        assert_eq!(events.len(), 1);
        assert!(sched.handle_event(&events[0]).is_empty());
        assert_eq!(sched.pending_count(), 1);
    }

    #[test]
    fn test_device_failure_disables() {
        let dev = SimDevice::new();
        dev.set_vblank_failure(true);
        let mut sched = VblankScheduler::new(8);
        assert!(matches!(
            sched.schedule(&dev, 1, RequestKind::Swap, request(0, 1, 0), 1),
            Err(AccelError::Device { .. })
        ));
        assert!(!sched.is_enabled());

        dev.set_vblank_failure(false);
        assert!(matches!(
            sched.query(&dev, Pipe::A),
            Err(AccelError::Device { errno: errno::ENODEV, .. })
        ));
    }
}
