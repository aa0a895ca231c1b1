// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// GEM object handle.
pub type Handle = u32;

/// Process-shareable buffer name (flink token).
pub type BufferName = u32;

/// GPU page size (4 KiB).
pub const PAGE_SIZE: u64 = 0x1000;

/// Pitch alignment required by tiled surfaces.
pub const TILED_PITCH_ALIGN: u32 = 512;

/// Pitch alignment for linear surfaces.
pub const LINEAR_PITCH_ALIGN: u32 = 64;

/// Align a value up to the given power-of-two alignment.
#[inline]
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

/// Display pipe index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pipe {
    A,
    B,
}

impl Pipe {
    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

/// Axis-aligned box with exclusive lower-right corner, in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoxRect {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoxRect {
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub const fn from_xywh(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x1: x,
            y1: y,
            x2: x + width as i32,
            y2: y + height as i32,
        }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width() as i64 * self.height() as i64
        }
    }

    pub fn intersect(&self, other: &BoxRect) -> BoxRect {
        let r = BoxRect {
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
            x2: self.x2.min(other.x2),
            y2: self.y2.min(other.y2),
        };
        if r.is_empty() {
            BoxRect::default()
        } else {
            r
        }
    }

    pub fn translate(&self, dx: i32, dy: i32) -> BoxRect {
        BoxRect {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }
}

/// Bounding box of a set of rectangles.
pub fn extents(rects: &[BoxRect]) -> BoxRect {
    let mut iter = rects.iter().filter(|r| !r.is_empty());
    let Some(first) = iter.next() else {
        return BoxRect::default();
    };
    iter.fold(*first, |acc, r| BoxRect {
        x1: acc.x1.min(r.x1),
        y1: acc.y1.min(r.y1),
        x2: acc.x2.max(r.x2),
        y2: acc.y2.max(r.y2),
    })
}
