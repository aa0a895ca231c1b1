// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! DRI2 presentation for the intelddx acceleration layer.
//!
//! [`dri2::Dri2Screen`] hands buffers to direct-rendering clients and
//! presents them by blit or page flip; [`vblank::VblankScheduler`] times
//! swaps and waits against the display pipes' frame counters.

pub mod buffer;
pub mod caps;
pub mod drawable;
pub mod dri2;
pub mod vblank;

pub use buffer::{Attachment, PresentationBuffer};
pub use caps::{CreateForm, Dri2Capabilities, Dri2Features};
pub use drawable::{Drawable, Pixmap};
pub use dri2::Dri2Screen;
pub use vblank::{Completion, RequestKind, Scheduled, VblankScheduler};
