// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error taxonomy shared by the buffer, batch, presentation and vblank layers.
//!
//! None of these are fatal to the server. Each variant names the fallback the
//! caller is expected to take.

use thiserror::Error;

/// Errors returned by acceleration-layer operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccelError {
    /// Backing memory pool exhausted. Retry smaller/untiled or report OOM.
    #[error("allocation of {requested:#X} bytes failed ({available:#X} available)")]
    Allocation { requested: u64, available: u64 },

    /// Buffer is pinned by an in-flight batch. Retry after a fence wait.
    #[error("buffer {handle} is busy (pinned by an in-flight batch)")]
    Busy { handle: u32 },

    /// The allocation backend refused to export a shareable name.
    #[error("buffer {handle} cannot be named: {reason}")]
    Name { handle: u32, reason: &'static str },

    /// Batch capacity or reservation exceeded. Flush and resubmit.
    #[error("batch overflow: requested {requested} words, {available} available")]
    Overflow { requested: usize, available: usize },

    /// A device ioctl failed.
    #[error("device ioctl {ioctl} failed: errno {errno}")]
    Device { ioctl: &'static str, errno: i32 },

    /// The hardware path declined the operation; use the software path.
    #[error("acceleration fallback: {0}")]
    Fallback(&'static str),

    /// Handle does not name a live object.
    #[error("invalid handle {0}")]
    InvalidHandle(u32),
}

/// Result alias for acceleration-layer operations.
pub type AccelResult<T> = Result<T, AccelError>;

impl AccelError {
    /// Whether retrying after a flush or fence wait can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::Overflow { .. })
    }
}

/// Common errno values reported by the simulated and real ioctl layers.
pub mod errno {
    pub const EINVAL: i32 = 22;
    pub const EBUSY: i32 = 16;
    pub const ENOMEM: i32 = 12;
    pub const ENODEV: i32 = 19;
    pub const EIO: i32 = 5;
}
