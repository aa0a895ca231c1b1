// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! DRI2 attachments and the buffers handed to clients for them.

use intelddx_common::{BufferName, Generation};
use intelddx_gpu::{BufferObject, TilingMode};

use crate::drawable::Pixmap;

/// DRI2 buffer attachment points, in protocol numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    FrontLeft = 0,
    BackLeft = 1,
    FrontRight = 2,
    BackRight = 3,
    Depth = 4,
    Stencil = 5,
    Accum = 6,
    FakeFrontLeft = 7,
    FakeFrontRight = 8,
    DepthStencil = 9,
}

impl Attachment {
    pub fn from_raw(raw: u32) -> Option<Self> {
        Some(match raw {
            0 => Self::FrontLeft,
            1 => Self::BackLeft,
            2 => Self::FrontRight,
            3 => Self::BackRight,
            4 => Self::Depth,
            5 => Self::Stencil,
            6 => Self::Accum,
            7 => Self::FakeFrontLeft,
            8 => Self::FakeFrontRight,
            9 => Self::DepthStencil,
            _ => return None,
        })
    }

    pub fn raw(self) -> u32 {
        self as u32
    }

    /// Tiling the hardware prefers for this role, before policy is applied.
    pub fn preferred_tiling(self, generation: Generation) -> TilingMode {
        match self {
            Self::Depth | Self::DepthStencil => {
                if generation.supports_y_tiling() {
                    TilingMode::Y
                } else {
                    TilingMode::X
                }
            }
            Self::FakeFrontLeft | Self::FakeFrontRight | Self::BackLeft | Self::BackRight => {
                TilingMode::X
            }
            _ => TilingMode::None,
        }
    }
}

/// Inputs that decide whether a tiling hint survives.
#[derive(Debug, Clone, Copy)]
pub struct TilingPolicy {
    pub generation: Generation,
    pub tiling: bool,
    pub kernel_exec_fencing: bool,
}

impl TilingPolicy {
    /// Pre-965 parts need the kernel to manage fence registers for tiled
    /// buffers shared with clients.
    pub fn hint(&self, attachment: Attachment) -> TilingMode {
        if !self.tiling || (!self.generation.is_i965() && !self.kernel_exec_fencing) {
            return TilingMode::None;
        }
        attachment.preferred_tiling(self.generation)
    }
}

/// A buffer handed to a DRI2 client for one attachment of a drawable.
#[derive(Debug, Clone)]
pub struct PresentationBuffer {
    pub attachment: Attachment,
    /// Exported name; 0 when naming failed.
    pub name: BufferName,
    pub pitch: u32,
    pub cpp: u32,
    pub format: u32,
    pub flags: u32,
    pub pixmap: Pixmap,
}

impl PresentationBuffer {
    pub fn new(attachment: Attachment, format: u32, pixmap: Pixmap, name: BufferName) -> Self {
        Self {
            attachment,
            name,
            pitch: pixmap.pitch(),
            cpp: pixmap.bpp() / 8,
            format,
            flags: 0,
            pixmap,
        }
    }

    /// Buffer object currently bound to the buffer's pixmap.
    pub fn bo(&self) -> BufferObject {
        self.pixmap.backing()
    }

    pub fn is_named(&self) -> bool {
        self.name != 0
    }
}
