// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! DRI2 capability descriptor.
//!
//! Callers query the descriptor for which hooks exist instead of
//! branching on the protocol version themselves.

use bitflags::bitflags;
use intelddx_common::error::{AccelError, AccelResult};
use intelddx_common::Generation;

/// Buffer creation entry point the server calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateForm {
    /// One call per attachment (DRI2 1.1 and later).
    Singular,
    /// One call for the whole attachment list.
    Plural,
}

bitflags! {
    /// Optional hooks exposed to the server.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Dri2Features: u32 {
        const COPY_REGION  = 0x01;
        /// Page-flip swap.
        const SWAP_BUFFERS = 0x02;
        /// SetupSwap, GetMSC and SetupWaitMSC.
        const VBLANK       = 0x04;
    }
}

/// Highest info-record version this driver fills in.
pub const MAX_VERSION: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dri2Capabilities {
    pub version: u32,
    pub driver_name: &'static str,
    pub device_path: String,
    pub create: CreateForm,
    pub features: Dri2Features,
}

impl Dri2Capabilities {
    /// Descriptor for info-record `version` (clamped to 1..=4).
    pub fn for_version(
        version: u32,
        generation: Generation,
        use_swap_buffers: bool,
        device_path: &str,
    ) -> Self {
        let version = version.clamp(1, MAX_VERSION);
        let create = if version == 1 {
            CreateForm::Plural
        } else {
            CreateForm::Singular
        };

        let mut features = Dri2Features::COPY_REGION;
        if version >= 4 {
            features |= Dri2Features::VBLANK;
            if use_swap_buffers {
                features |= Dri2Features::SWAP_BUFFERS;
            }
        }

        Self {
            version,
            driver_name: generation.driver_name(),
            device_path: device_path.to_string(),
            create,
            features,
        }
    }

    pub fn swap_buffers(&self) -> bool {
        self.features.contains(Dri2Features::SWAP_BUFFERS)
    }

    pub fn vblank(&self) -> bool {
        self.features.contains(Dri2Features::VBLANK)
    }

    /// Reject a server DRI2 module too old for the singular create hooks.
    pub fn check_server(&self, major: u32, minor: u32) -> AccelResult<()> {
        if self.create == CreateForm::Singular && (major, minor) < (1, 1) {
            log::error!(
                "dri2: server module {}.{} too old, 1.1 or later required",
                major,
                minor
            );
            return Err(AccelError::Fallback("DRI2 server module older than 1.1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_one_is_plural_copy_only() {
        let caps = Dri2Capabilities::for_version(1, Generation::I915, true, "/dev/dri/card0");
        assert_eq!(caps.create, CreateForm::Plural);
        assert_eq!(caps.features, Dri2Features::COPY_REGION);
        assert_eq!(caps.driver_name, "i915");
        assert!(caps.check_server(1, 0).is_ok());
    }

    #[test]
    fn test_singular_versions() {
        for v in [2, 3] {
            let caps = Dri2Capabilities::for_version(v, Generation::I965, true, "card0");
            assert_eq!(caps.create, CreateForm::Singular);
            assert!(!caps.vblank());
            assert!(!caps.swap_buffers());
        }
    }

    #[test]
    fn test_version_four_hooks() {
        let caps = Dri2Capabilities::for_version(4, Generation::I965, true, "card0");
        assert!(caps.vblank() && caps.swap_buffers());
        assert_eq!(caps.driver_name, "i965");

        let no_flip = Dri2Capabilities::for_version(7, Generation::I965, false, "card0");
        assert_eq!(no_flip.version, MAX_VERSION);
        assert!(no_flip.vblank());
        assert!(!no_flip.swap_buffers());
    }

    #[test]
    fn test_old_server_rejected() {
        let caps = Dri2Capabilities::for_version(3, Generation::I915, false, "card0");
        assert!(matches!(caps.check_server(1, 0), Err(AccelError::Fallback(_))));
        assert!(caps.check_server(1, 1).is_ok());
        assert!(caps.check_server(2, 0).is_ok());
    }
}
