// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Driver settings, populated from the config INI and command line.
#[derive(Debug, Clone)]
pub struct Settings {
    // Driver
    pub generation: Generation,
    pub tiling: bool,
    pub kernel_exec_fencing: bool,
    pub swapbuffers_wait: bool,
    pub use_swap_buffers: bool,
    pub shadow: bool,
    pub dri2_version: u32,

    // Memory
    pub aperture_size: u64,
    pub batch_capacity_words: usize,
    pub max_pending_vblanks: usize,

    // Debug
    pub always_sync: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            generation: Generation::I965,
            tiling: true,
            kernel_exec_fencing: true,
            swapbuffers_wait: true,
            use_swap_buffers: true,
            shadow: false,
            dri2_version: 4,
            aperture_size: 256 * 1024 * 1024,
            batch_capacity_words: 4096,
            max_pending_vblanks: 64,
            always_sync: false,
        }
    }
}

/// Hardware generation of the integrated GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generation {
    /// i830, i845, i855, i865.
    I830,
    /// i915, i945, G33.
    I915,
    /// i965, G35, GM45, G45.
    I965,
}

impl Generation {
    /// Parse a chipset or generation name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "i830" | "i845" | "i855" | "i865" | "830" | "2" => Some(Self::I830),
            "i915" | "i945" | "g33" | "915" | "3" => Some(Self::I915),
            "i965" | "g35" | "gm45" | "g45" | "965" | "4" => Some(Self::I965),
            _ => None,
        }
    }

    pub fn from_str_or_default(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::I965)
    }

    /// Driver name handed to direct-rendering clients.
    pub fn driver_name(self) -> &'static str {
        match self {
            Self::I965 => "i965",
            Self::I830 | Self::I915 => "i915",
        }
    }

    pub fn is_i965(self) -> bool {
        self == Self::I965
    }

    /// Y tiling is only usable for rendering from 965 on.
    pub fn supports_y_tiling(self) -> bool {
        self.is_i965()
    }
}

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::I830 => write!(f, "i830"),
            Self::I915 => write!(f, "i915"),
            Self::I965 => write!(f, "i965"),
        }
    }
}

/// Parse an INI-style boolean ("1", "true", "yes", "on").
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
