// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Pixmaps and drawables as the windowing server hands them to the driver.
//!
//! A `Pixmap` is shared: cloning it is the server's refcnt++, and the
//! backing buffer object can be rebound in place, which is how a swap
//! exchanges front and back without copying pixels.

use std::sync::Arc;

use intelddx_common::BoxRect;
use intelddx_gpu::BufferObject;
use parking_lot::RwLock;

/// Bits per pixel for a drawable depth.
pub fn bpp_for_depth(depth: u32) -> u32 {
    match depth {
        0..=8 => 8,
        9..=16 => 16,
        _ => 32,
    }
}

struct PixmapInner {
    id: u32,
    width: u32,
    height: u32,
    depth: u32,
    backing: RwLock<BufferObject>,
}

/// Reference-counted server pixmap backed by a buffer object.
#[derive(Clone)]
pub struct Pixmap(Arc<PixmapInner>);

impl Pixmap {
    pub fn new(id: u32, width: u32, height: u32, depth: u32, backing: BufferObject) -> Self {
        Self(Arc::new(PixmapInner {
            id,
            width,
            height,
            depth,
            backing: RwLock::new(backing),
        }))
    }

    pub fn id(&self) -> u32 {
        self.0.id
    }

    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn depth(&self) -> u32 {
        self.0.depth
    }

    pub fn bpp(&self) -> u32 {
        bpp_for_depth(self.0.depth)
    }

    /// Row stride of the current backing buffer.
    pub fn pitch(&self) -> u32 {
        self.0.backing.read().pitch()
    }

    /// Current backing buffer (a new reference).
    pub fn backing(&self) -> BufferObject {
        self.0.backing.read().clone()
    }

    /// Rebind the pixmap to `bo`, returning the previous backing.
    pub fn set_backing(&self, bo: BufferObject) -> BufferObject {
        std::mem::replace(&mut *self.0.backing.write(), bo)
    }

    /// Server-side references to this pixmap.
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn same_pixmap(&self, other: &Pixmap) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Whether `other` has the same size and depth.
    pub fn matches_geometry(&self, other: &Pixmap) -> bool {
        self.width() == other.width()
            && self.height() == other.height()
            && self.depth() == other.depth()
    }
}

impl std::fmt::Debug for Pixmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pixmap")
            .field("id", &self.0.id)
            .field("width", &self.0.width)
            .field("height", &self.0.height)
            .field("depth", &self.0.depth)
            .field("handle", &self.0.backing.read().handle())
            .finish()
    }
}

/// A window or pixmap the client renders to.
#[derive(Debug, Clone)]
pub struct Drawable {
    pub id: u32,
    /// Position in screen coordinates (zero for pixmaps).
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Pixmap the drawable's pixels live in: the screen pixmap for a
    /// window, the pixmap itself otherwise.
    pub pixmap: Pixmap,
    pub is_window: bool,
}

impl Drawable {
    /// A window at `(x, y)` drawn into the screen pixmap.
    pub fn window(id: u32, x: i32, y: i32, width: u32, height: u32, screen: &Pixmap) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
            depth: screen.depth(),
            pixmap: screen.clone(),
            is_window: true,
        }
    }

    /// An offscreen pixmap used directly as a drawable.
    pub fn from_pixmap(id: u32, pixmap: &Pixmap) -> Self {
        Self {
            id,
            x: 0,
            y: 0,
            width: pixmap.width(),
            height: pixmap.height(),
            depth: pixmap.depth(),
            pixmap: pixmap.clone(),
            is_window: false,
        }
    }

    /// Drawable-relative bounds.
    pub fn local_bounds(&self) -> BoxRect {
        BoxRect::from_xywh(0, 0, self.width, self.height)
    }

    /// Bounds in screen coordinates.
    pub fn screen_bounds(&self) -> BoxRect {
        BoxRect::from_xywh(self.x, self.y, self.width, self.height)
    }

    /// Offset from drawable coordinates to coordinates in its pixmap.
    pub fn pixmap_offset(&self) -> (i32, i32) {
        if self.is_window {
            (self.x, self.y)
        } else {
            (0, 0)
        }
    }
}
