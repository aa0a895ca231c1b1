// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command-stream encodings for the MI, 2D (BLT) and 3D clients.
//!
//! ## Command header (32 bits)
//!
//! | Bits    | Field                                |
//! |---------|--------------------------------------|
//! | 31:29   | Client (0 = MI, 2 = 2D, 3 = 3D)      |
//! | 28:23   | MI opcode                            |
//! | 28:22   | 2D opcode                            |
//! | 7:0     | Length (dwords - 2) for 2D/3D        |

use bitflags::bitflags;

// ── MI client ───────────────────────────────────────────────────────────────

pub const MI_NOOP: u32 = 0;
pub const MI_WAIT_FOR_EVENT: u32 = 0x03 << 23;
pub const MI_FLUSH: u32 = 0x04 << 23;
pub const MI_BATCH_BUFFER_END: u32 = 0x0A << 23;
pub const MI_LOAD_SCAN_LINES_INCL: u32 = 0x12 << 23;

// MI_FLUSH flags
pub const MI_WRITE_DIRTY_STATE: u32 = 1 << 4;
pub const MI_INVALIDATE_MAP_CACHE: u32 = 1 << 0;

// MI_LOAD_SCAN_LINES pipe select
pub const MI_LOAD_SCAN_LINES_DISPLAY_PIPEA: u32 = 0;
pub const MI_LOAD_SCAN_LINES_DISPLAY_PIPEB: u32 = 1 << 20;

// MI_WAIT_FOR_EVENT events
pub const MI_WAIT_FOR_PIPEB_SVBLANK: u32 = 1 << 18;
pub const MI_WAIT_FOR_PIPEA_SVBLANK: u32 = 1 << 17;
pub const MI_WAIT_FOR_PIPEB_VBLANK: u32 = 1 << 7;
pub const MI_WAIT_FOR_PIPEB_SCAN_LINE_WINDOW: u32 = 1 << 5;
pub const MI_WAIT_FOR_PIPEA_VBLANK: u32 = 1 << 3;
pub const MI_WAIT_FOR_PIPEA_SCAN_LINE_WINDOW: u32 = 1 << 1;

// ── 2D client ───────────────────────────────────────────────────────────────

pub const XY_COLOR_BLT_CMD: u32 = (2 << 29) | (0x50 << 22) | 4;
pub const XY_COLOR_BLT_WRITE_ALPHA: u32 = 1 << 21;
pub const XY_COLOR_BLT_WRITE_RGB: u32 = 1 << 20;
pub const XY_COLOR_BLT_TILED: u32 = 1 << 11;

pub const XY_SRC_COPY_BLT_CMD: u32 = (2 << 29) | (0x53 << 22) | 6;
pub const XY_SRC_COPY_BLT_WRITE_ALPHA: u32 = 1 << 21;
pub const XY_SRC_COPY_BLT_WRITE_RGB: u32 = 1 << 20;
pub const XY_SRC_COPY_BLT_SRC_TILED: u32 = 1 << 15;
pub const XY_SRC_COPY_BLT_DST_TILED: u32 = 1 << 11;

// BR13 colour depth
pub const BR13_565: u32 = 1 << 24;
pub const BR13_8888: u32 = (1 << 24) | (1 << 25);

// ── 3D client ───────────────────────────────────────────────────────────────

/// i830/i915 inline primitive; low 16 bits are dword count - 1.
pub const PRIM3D_INLINE: u32 = (3 << 29) | (0x1f << 24);
pub const PRIM3D_RECTLIST: u32 = 0x7 << 18;

/// i830/i915 destination buffer description.
pub const STATE3D_BUF_INFO_CMD: u32 = (3 << 29) | (0x1d << 24) | (0x8e << 16) | 1;
pub const BUF_3D_ID_COLOR_BACK: u32 = 0x3 << 24;
pub const BUF_3D_TILED_SURFACE: u32 = 1 << 22;

/// i830 immediate texture load; OR in `LOAD_TEXTURE_MAP(unit)`.
pub const STATE3D_LOAD_STATE_IMMEDIATE_2: u32 = (3 << 29) | (0x1d << 24) | (0x03 << 16);
pub const fn load_texture_map(unit: u32) -> u32 {
    1 << (unit + 11)
}

/// i915 sampler map state; low bits are 3 * number of maps.
pub const STATE3D_MAP_STATE: u32 = (3 << 29) | (0x1d << 24) | (0x00 << 16);

/// i965 3DPRIMITIVE (GFXPIPE 3.3.0).
pub const BRW_3DPRIMITIVE: u32 = (3 << 29) | (3 << 27) | (3 << 24);
pub const BRW_3DPRIMITIVE_VERTEX_SEQUENTIAL: u32 = 0 << 15;
pub const BRW_3DPRIMITIVE_TOPOLOGY_SHIFT: u32 = 10;
pub const BRW_3DPRIM_RECTLIST: u32 = 0x0f;

/// i965 surface state base pointer for the render target.
pub const BRW_STATE_BASE_ADDRESS: u32 = (3 << 29) | (0 << 27) | (1 << 24) | (1 << 16) | 4;
pub const BASE_ADDRESS_MODIFY: u32 = 1;

/// i965 drawing rectangle (GFXPIPE 3.1.0).
pub const BRW_3DSTATE_DRAWING_RECTANGLE: u32 = (3 << 29) | (3 << 27) | (1 << 24) | 2;

// ── Relocation domains ──────────────────────────────────────────────────────

bitflags! {
    /// GEM read/write domains attached to a relocation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Domain: u32 {
        const CPU         = 0x01;
        const RENDER      = 0x02;
        const SAMPLER     = 0x04;
        const COMMAND     = 0x08;
        const INSTRUCTION = 0x10;
        const VERTEX      = 0x20;
        const GTT         = 0x40;
    }
}

// ── Raster operations ───────────────────────────────────────────────────────

pub const ROP_0: u32 = 0x00;
pub const ROP_DSA: u32 = 0x88;
pub const ROP_SDNA: u32 = 0x44;
pub const ROP_S: u32 = 0xCC;
pub const ROP_DSNA: u32 = 0x22;
pub const ROP_D: u32 = 0xAA;
pub const ROP_DSX: u32 = 0x66;
pub const ROP_DSO: u32 = 0xEE;
pub const ROP_DSON: u32 = 0x11;
pub const ROP_DSXN: u32 = 0x99;
pub const ROP_DN: u32 = 0x55;
pub const ROP_SDNO: u32 = 0xDD;
pub const ROP_SN: u32 = 0x33;
pub const ROP_DSNO: u32 = 0xBB;
pub const ROP_DSAN: u32 = 0x77;
pub const ROP_1: u32 = 0xFF;

pub const ROP_DPA: u32 = 0xA0;
pub const ROP_PDNA: u32 = 0x50;
pub const ROP_P: u32 = 0xF0;
pub const ROP_DPNA: u32 = 0x0A;
pub const ROP_DPX: u32 = 0x5A;
pub const ROP_DPO: u32 = 0xFA;
pub const ROP_DPON: u32 = 0x05;
pub const ROP_PDXN: u32 = 0xA5;
pub const ROP_PDNO: u32 = 0xF5;
pub const ROP_PN: u32 = 0x0F;
pub const ROP_DPNO: u32 = 0xAF;
pub const ROP_DPAN: u32 = 0x5F;

/// Source-copy ROP, indexed by X11 GX alu code.
pub const COPY_ROP: [u32; 16] = [
    ROP_0,    // GXclear
    ROP_DSA,  // GXand
    ROP_SDNA, // GXandReverse
    ROP_S,    // GXcopy
    ROP_DSNA, // GXandInverted
    ROP_D,    // GXnoop
    ROP_DSX,  // GXxor
    ROP_DSO,  // GXor
    ROP_DSON, // GXnor
    ROP_DSXN, // GXequiv
    ROP_DN,   // GXinvert
    ROP_SDNO, // GXorReverse
    ROP_SN,   // GXcopyInverted
    ROP_DSNO, // GXorInverted
    ROP_DSAN, // GXnand
    ROP_1,    // GXset
];

/// Pattern ROP for solid fills, indexed by X11 GX alu code.
pub const PATTERN_ROP: [u32; 16] = [
    ROP_0, ROP_DPA, ROP_PDNA, ROP_P, ROP_DPNA, ROP_D, ROP_DPX, ROP_DPO, ROP_DPON, ROP_PDXN,
    ROP_DN, ROP_PDNO, ROP_PN, ROP_DPNO, ROP_DPAN, ROP_1,
];

/// X11 GXcopy.
pub const GX_COPY: u8 = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blt_lengths() {
        // Length field is dwords - 2.
        assert_eq!(XY_COLOR_BLT_CMD & 0xff, 4);
        assert_eq!(XY_SRC_COPY_BLT_CMD & 0xff, 6);
        assert_eq!(XY_SRC_COPY_BLT_CMD >> 29, 2);
    }

    #[test]
    fn test_3d_packet_lengths() {
        assert_eq!(STATE3D_BUF_INFO_CMD & 0xff, 1);
        assert_eq!(BRW_STATE_BASE_ADDRESS & 0xff, 4);
        assert_eq!(BRW_3DSTATE_DRAWING_RECTANGLE & 0xff, 2);
        assert_eq!(load_texture_map(1), 1 << 12);
    }

    #[test]
    fn test_rop_tables() {
        assert_eq!(COPY_ROP[GX_COPY as usize], ROP_S);
        assert_eq!(PATTERN_ROP[GX_COPY as usize], ROP_P);
        assert_eq!(COPY_ROP[15], 0xFF);
        assert_eq!(PATTERN_ROP[0], 0x00);
    }

    #[test]
    fn test_mi_opcodes() {
        assert_eq!(MI_BATCH_BUFFER_END, 0x0500_0000);
        assert_eq!(MI_LOAD_SCAN_LINES_INCL, 0x0900_0000);
        assert_eq!(MI_WAIT_FOR_EVENT, 0x0180_0000);
    }
}
