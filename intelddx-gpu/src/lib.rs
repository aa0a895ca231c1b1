// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU memory and command submission for early Intel integrated graphics.
//!
//! The buffer manager owns every GPU allocation; the batch emitter turns
//! blits and composites into command streams submitted through a
//! [`backend::DrmDevice`]. [`gpu_context::GpuContext`] ties them together
//! for one open device.

pub mod backend;
pub mod batch;
pub mod blit;
pub mod bufmgr;
pub mod command_processor;
pub mod engines;
pub mod fence;
pub mod gpu_context;
pub mod regs;

pub use backend::{DisplayLayer, DrmDevice};
pub use bufmgr::{BufferManager, BufferObject, Residency, TilingMode};
pub use fence::Fence;
pub use gpu_context::{GpuContext, MapMode};
