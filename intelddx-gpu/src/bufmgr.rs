// SPDX-FileCopyrightText: 2025 intelddx contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Buffer object registry.
//!
//! Owns every GPU allocation made by the driver: its size, tiling mode, pitch,
//! exported name and aperture accounting. Handles are reference counted;
//! cloning a [`BufferObject`] takes a reference and dropping the last clone
//! releases the allocation back to the pool exactly once.
//!
//! CPU access goes through an anonymous mapping that serves as the object's
//! backing store. The GPU-side address of an object is unknown until the device
//! binds it during batch submission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use memmap2::MmapMut;
use parking_lot::Mutex;

use intelddx_common::error::{AccelError, AccelResult};
use intelddx_common::{
    align_up, BufferName, Generation, Handle, LINEAR_PITCH_ALIGN, PAGE_SIZE, TILED_PITCH_ALIGN,
};

use crate::engines::GenerationLimits;

/// Memory layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TilingMode {
    None,
    X,
    Y,
}

impl TilingMode {
    pub fn is_tiled(self) -> bool {
        self != Self::None
    }

    /// Row alignment of the allocation height.
    pub fn height_align(self) -> u32 {
        match self {
            Self::None => 2,
            Self::X => 8,
            Self::Y => 32,
        }
    }

    pub fn pitch_align(self) -> u32 {
        match self {
            Self::None => LINEAR_PITCH_ALIGN,
            Self::X | Self::Y => TILED_PITCH_ALIGN,
        }
    }
}

/// Where the backing pages live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Residency {
    /// Cached system pages, CPU-side only until bound.
    System,
    /// Pages bound into the graphics aperture.
    GpuLocal,
}

/// Registry-side record for a live allocation.
struct BoRecord {
    label: String,
    size: u64,
    alignment: u64,
    tiling: TilingMode,
    pitch: u32,
    residency: Residency,
    name: Option<BufferName>,
    gtt_offset: Option<u64>,
    object: Weak<BoShared>,
}

struct Registry {
    aperture_size: u64,
    used: u64,
    records: HashMap<Handle, BoRecord>,
    names: HashMap<BufferName, Handle>,
    next_handle: Handle,
    next_name: BufferName,
    scanout: Option<Handle>,
    deallocations: u64,
}

impl Registry {
    fn release(&mut self, handle: Handle) {
        let Some(record) = self.records.remove(&handle) else {
            log::error!("bufmgr: release of unknown handle {}", handle);
            return;
        };
        self.used -= record.size;
        if let Some(name) = record.name {
            self.names.remove(&name);
        }
        if self.scanout == Some(handle) {
            log::debug!("bufmgr: scanout buffer {} released", handle);
            self.scanout = None;
        }
        self.deallocations += 1;
        log::trace!(
            "bufmgr: free handle={} '{}' size=0x{:X} (in use 0x{:X})",
            handle,
            record.label,
            record.size,
            self.used
        );
    }
}

/// CPU view of a buffer.
#[derive(Default)]
struct CpuMapping {
    backing: Option<MmapMut>,
    mapped: bool,
    writable: bool,
}

struct BoShared {
    handle: Handle,
    size: u64,
    registry: Arc<Mutex<Registry>>,
    pins: AtomicU32,
    cpu: Mutex<CpuMapping>,
}

impl Drop for BoShared {
    fn drop(&mut self) {
        let cpu = self.cpu.get_mut();
        if cpu.mapped {
            log::warn!("bufmgr: buffer {} destroyed while mapped", self.handle);
            cpu.mapped = false;
        }
        cpu.backing = None;
        self.registry.lock().release(self.handle);
    }
}

/// Reference-counted handle to a GPU buffer.
///
/// `clone()` is a reference, `drop()` an unreference.
#[derive(Clone)]
pub struct BufferObject(Arc<BoShared>);

impl BufferObject {
    pub fn handle(&self) -> Handle {
        self.0.handle
    }

    pub fn size(&self) -> u64 {
        self.0.size
    }

    /// Take an additional reference.
    pub fn reference(&self) -> BufferObject {
        self.clone()
    }

    /// Drop this reference. The allocation is released with the last one.
    pub fn unreference(self) {
        drop(self);
    }

    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Whether both handles name the same allocation.
    pub fn same_object(&self, other: &BufferObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_pinned(&self) -> bool {
        self.0.pins.load(Ordering::Acquire) > 0
    }

    pub(crate) fn pin(&self) {
        self.0.pins.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn unpin(&self) {
        let prev = self.0.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unbalanced unpin of buffer {}", self.0.handle);
    }

    pub fn tiling(&self) -> TilingMode {
        self.with_record(|r| r.tiling).unwrap_or(TilingMode::None)
    }

    pub fn pitch(&self) -> u32 {
        self.with_record(|r| r.pitch).unwrap_or(0)
    }

    pub fn residency(&self) -> Residency {
        self.with_record(|r| r.residency).unwrap_or(Residency::System)
    }

    pub fn alignment(&self) -> u64 {
        self.with_record(|r| r.alignment).unwrap_or(PAGE_SIZE)
    }

    /// Exported name, if any.
    pub fn name(&self) -> Option<BufferName> {
        self.with_record(|r| r.name).flatten()
    }

    /// Last GPU address assigned by the device, if the buffer was ever bound.
    pub fn offset(&self) -> Option<u64> {
        self.with_record(|r| r.gtt_offset).flatten()
    }

    pub fn label(&self) -> String {
        self.with_record(|r| r.label.clone()).unwrap_or_default()
    }

    pub fn is_mapped(&self) -> bool {
        self.0.cpu.lock().mapped
    }

    /// Process-local address while mapped.
    pub fn virtual_address(&self) -> Option<usize> {
        let cpu = self.0.cpu.lock();
        if !cpu.mapped {
            return None;
        }
        cpu.backing.as_ref().map(|m| m.as_ptr() as usize)
    }

    /// Run `f` over the mapped pages. Returns `None` if the buffer is not
    /// mapped, or mapped read-only.
    pub fn with_mapping<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut cpu = self.0.cpu.lock();
        if !cpu.mapped || !cpu.writable {
            return None;
        }
        cpu.backing.as_mut().map(|m| f(&mut m[..]))
    }

    /// Read-only view of the mapped pages.
    pub fn with_mapping_ref<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let cpu = self.0.cpu.lock();
        if !cpu.mapped {
            return None;
        }
        cpu.backing.as_ref().map(|m| f(&m[..]))
    }

    fn with_record<R>(&self, f: impl FnOnce(&BoRecord) -> R) -> Option<R> {
        let reg = self.0.registry.lock();
        reg.records.get(&self.0.handle).map(f)
    }
}

impl std::fmt::Debug for BufferObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferObject")
            .field("handle", &self.0.handle)
            .field("size", &self.0.size)
            .field("refcount", &self.refcount())
            .field("pins", &self.0.pins.load(Ordering::Relaxed))
            .finish()
    }
}

/// Buffer object registry. Cheap to clone; all clones share one pool.
#[derive(Clone)]
pub struct BufferManager {
    registry: Arc<Mutex<Registry>>,
}

impl BufferManager {
    pub fn new(aperture_size: u64) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                aperture_size,
                used: 0,
                records: HashMap::new(),
                names: HashMap::new(),
                next_handle: 1,
                next_name: 1,
                scanout: None,
                deallocations: 0,
            })),
        }
    }

    /// Allocate a buffer of at least `size` bytes.
    ///
    /// The caller owns the single reference returned.
    pub fn allocate(
        &self,
        label: &str,
        size: u64,
        tiling: TilingMode,
        alignment: u64,
        residency: Residency,
    ) -> AccelResult<BufferObject> {
        let alignment = alignment.max(PAGE_SIZE);
        let mut reg = self.registry.lock();
        let available = reg.aperture_size - reg.used;
        if !alignment.is_power_of_two() {
            log::debug!(
                "bufmgr: alloc '{}' rejected, alignment 0x{:X} is not a power of two",
                label,
                alignment
            );
            return Err(AccelError::Allocation {
                requested: size,
                available,
            });
        }
        let size = size
            .max(1)
            .checked_next_multiple_of(PAGE_SIZE)
            .ok_or(AccelError::Allocation {
                requested: size,
                available,
            })?;
        if size > available {
            log::debug!(
                "bufmgr: alloc '{}' size=0x{:X} failed, 0x{:X} available",
                label,
                size,
                available
            );
            return Err(AccelError::Allocation {
                requested: size,
                available,
            });
        }

        let handle = reg.next_handle;
        reg.next_handle += 1;
        reg.used += size;

        let shared = Arc::new(BoShared {
            handle,
            size,
            registry: self.registry.clone(),
            pins: AtomicU32::new(0),
            cpu: Mutex::new(CpuMapping::default()),
        });
        reg.records.insert(
            handle,
            BoRecord {
                label: label.to_string(),
                size,
                alignment,
                tiling,
                pitch: 0,
                residency,
                name: None,
                gtt_offset: None,
                object: Arc::downgrade(&shared),
            },
        );

        log::trace!(
            "bufmgr: alloc '{}' handle={} size=0x{:X} tiling={:?} align=0x{:X}",
            label,
            handle,
            size,
            tiling,
            alignment
        );
        Ok(BufferObject(shared))
    }

    /// Allocate a 2D surface, choosing pitch and height alignment for `tiling`.
    ///
    /// A tiled request that cannot be satisfied is retried untiled.
    pub fn allocate_surface(
        &self,
        label: &str,
        width: u32,
        height: u32,
        bpp: u32,
        tiling: TilingMode,
        generation: Generation,
    ) -> AccelResult<BufferObject> {
        if !GenerationLimits::for_generation(generation).fits(width, height) {
            let requested = width as u64 * height as u64 * bpp.div_ceil(8) as u64;
            log::debug!(
                "bufmgr: surface '{}' {}x{} exceeds the {} limits",
                label,
                width,
                height,
                generation
            );
            return Err(AccelError::Allocation {
                requested,
                available: self.bytes_available(),
            });
        }
        if tiling.is_tiled() {
            match self.try_allocate_surface(label, width, height, bpp, tiling, generation) {
                Ok(bo) => return Ok(bo),
                Err(e) => {
                    log::info!(
                        "bufmgr: tiled alloc '{}' {}x{} failed ({}), retrying untiled",
                        label,
                        width,
                        height,
                        e
                    );
                }
            }
        }
        self.try_allocate_surface(label, width, height, bpp, TilingMode::None, generation)
    }

    fn try_allocate_surface(
        &self,
        label: &str,
        width: u32,
        height: u32,
        bpp: u32,
        tiling: TilingMode,
        generation: Generation,
    ) -> AccelResult<BufferObject> {
        let pitch = surface_pitch(width, bpp, tiling, generation).ok_or(AccelError::Allocation {
            requested: width as u64 * bpp.div_ceil(8) as u64,
            available: self.bytes_available(),
        })?;
        let rows = align_up(height.max(1) as u64, tiling.height_align() as u64);
        let mut size = pitch as u64 * rows;
        let mut alignment = PAGE_SIZE;

        // Pre-965 fence registers cover power-of-two regions aligned to their size.
        if tiling.is_tiled() && !generation.is_i965() {
            let min_fence: u64 = match generation {
                Generation::I830 => 512 * 1024,
                _ => 1024 * 1024,
            };
            size = size.max(min_fence).next_power_of_two();
            alignment = size;
        }

        let residency = Residency::GpuLocal;
        let bo = self.allocate(label, size, tiling, alignment, residency)?;
        self.set_tiling(&bo, tiling, pitch)?;
        Ok(bo)
    }

    /// Record the layout of a buffer.
    pub fn set_tiling(&self, bo: &BufferObject, tiling: TilingMode, pitch: u32) -> AccelResult<()> {
        if tiling.is_tiled() && pitch % TILED_PITCH_ALIGN != 0 {
            return Err(AccelError::Fallback("tiled pitch not 512-byte aligned"));
        }
        let mut reg = self.registry.lock();
        let record = reg
            .records
            .get_mut(&bo.handle())
            .ok_or(AccelError::InvalidHandle(bo.handle()))?;
        record.tiling = tiling;
        record.pitch = pitch;
        Ok(())
    }

    /// Map a buffer for CPU access without waiting on the GPU.
    ///
    /// Fails with `Busy` while an in-flight batch pins the buffer. Mapping an
    /// already-mapped buffer returns the same address.
    pub fn map(&self, bo: &BufferObject, writable: bool) -> AccelResult<usize> {
        if bo.is_pinned() {
            return Err(AccelError::Busy {
                handle: bo.handle(),
            });
        }

        let mut cpu = bo.0.cpu.lock();
        if cpu.backing.is_none() {
            let mapping = MmapMut::map_anon(bo.size() as usize).map_err(|e| {
                log::warn!("bufmgr: map of buffer {} failed: {}", bo.handle(), e);
                AccelError::Allocation {
                    requested: bo.size(),
                    available: 0,
                }
            })?;
            cpu.backing = Some(mapping);
        }
        cpu.mapped = true;
        cpu.writable |= writable;

        let addr = cpu.backing.as_ref().map(|m| m.as_ptr() as usize).unwrap_or(0);
        log::trace!("bufmgr: map handle={} -> 0x{:X}", bo.handle(), addr);
        Ok(addr)
    }

    /// Drop the CPU mapping. Contents survive in the backing store.
    pub fn unmap(&self, bo: &BufferObject) {
        let mut cpu = bo.0.cpu.lock();
        if cpu.mapped {
            cpu.mapped = false;
            cpu.writable = false;
            log::trace!("bufmgr: unmap handle={}", bo.handle());
        }
    }

    /// Export a process-shareable name. Repeated calls return the same name.
    pub fn export_name(&self, bo: &BufferObject) -> AccelResult<BufferName> {
        let mut reg = self.registry.lock();
        let next_name = reg.next_name;
        let record = reg
            .records
            .get_mut(&bo.handle())
            .ok_or(AccelError::InvalidHandle(bo.handle()))?;

        if let Some(name) = record.name {
            return Ok(name);
        }
        if record.residency == Residency::System {
            return Err(AccelError::Name {
                handle: bo.handle(),
                reason: "system-domain buffers cannot be named",
            });
        }

        record.name = Some(next_name);
        reg.next_name += 1;
        reg.names.insert(next_name, bo.handle());
        log::debug!("bufmgr: flink handle={} -> name={}", bo.handle(), next_name);
        Ok(next_name)
    }

    /// Open an exported name, returning a new reference.
    pub fn lookup_name(&self, name: BufferName) -> AccelResult<BufferObject> {
        let reg = self.registry.lock();
        let object = reg
            .names
            .get(&name)
            .and_then(|handle| reg.records.get(handle))
            .and_then(|record| record.object.upgrade());
        drop(reg);
        object.map(BufferObject).ok_or(AccelError::InvalidHandle(name))
    }

    /// Designate the screen's primary surface.
    pub fn set_scanout(&self, bo: Option<&BufferObject>) {
        let mut reg = self.registry.lock();
        reg.scanout = bo.map(|b| b.handle());
    }

    pub fn scanout_handle(&self) -> Option<Handle> {
        self.registry.lock().scanout
    }

    pub fn is_scanout(&self, bo: &BufferObject) -> bool {
        self.registry.lock().scanout == Some(bo.handle())
    }

    /// Whether blits to `bo` must use tiled addressing.
    ///
    /// Only the scanout surface is ever drawn tiled, so this is true exactly
    /// when `bo` is the designated scanout and its recorded tiling is not none.
    pub fn is_tiled(&self, bo: &BufferObject) -> bool {
        let reg = self.registry.lock();
        reg.scanout == Some(bo.handle())
            && reg
                .records
                .get(&bo.handle())
                .map(|r| r.tiling.is_tiled())
                .unwrap_or(false)
    }

    pub(crate) fn set_offset(&self, handle: Handle, offset: u64) {
        let mut reg = self.registry.lock();
        if let Some(record) = reg.records.get_mut(&handle) {
            record.gtt_offset = Some(offset);
        }
    }

    pub fn live_objects(&self) -> usize {
        self.registry.lock().records.len()
    }

    pub fn bytes_in_use(&self) -> u64 {
        self.registry.lock().used
    }

    pub fn bytes_available(&self) -> u64 {
        let reg = self.registry.lock();
        reg.aperture_size - reg.used
    }

    pub fn deallocations(&self) -> u64 {
        self.registry.lock().deallocations
    }
}

/// Pitch in bytes of a `width`-pixel row, or `None` if it does not fit the
/// 32-bit pitch field.
pub fn surface_pitch(
    width: u32,
    bpp: u32,
    tiling: TilingMode,
    generation: Generation,
) -> Option<u32> {
    let cpp = bpp.div_ceil(8).max(1) as u64;
    let pitch = align_up(width.max(1) as u64 * cpp, tiling.pitch_align() as u64);
    let pitch = if tiling.is_tiled() && !generation.is_i965() {
        pitch.checked_next_power_of_two()?
    } else {
        pitch
    };
    u32::try_from(pitch).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn mgr() -> BufferManager {
        BufferManager::new(64 * MIB)
    }

    #[test]
    fn test_allocate_rounds_to_pages() {
        let bm = mgr();
        let bo = bm
            .allocate("test", 100, TilingMode::None, 4096, Residency::GpuLocal)
            .unwrap();
        assert_eq!(bo.size(), PAGE_SIZE);
        assert_eq!(bo.refcount(), 1);
        assert_eq!(bm.bytes_in_use(), PAGE_SIZE);
        assert_eq!(bm.live_objects(), 1);
    }

    #[test]
    fn test_allocation_exhaustion() {
        let bm = BufferManager::new(8 * PAGE_SIZE);
        let _a = bm
            .allocate("a", 6 * PAGE_SIZE, TilingMode::None, 0, Residency::GpuLocal)
            .unwrap();
        let err = bm
            .allocate("b", 4 * PAGE_SIZE, TilingMode::None, 0, Residency::GpuLocal)
            .unwrap_err();
        assert_eq!(
            err,
            AccelError::Allocation {
                requested: 4 * PAGE_SIZE,
                available: 2 * PAGE_SIZE
            }
        );
    }

    #[test]
    fn test_reference_unreference_deallocates_once() {
        let bm = mgr();
        let bo = bm
            .allocate("rc", 4096, TilingMode::X, 4096, Residency::GpuLocal)
            .unwrap();
        let n = 5;
        let refs: Vec<BufferObject> = (0..n).map(|_| bo.reference()).collect();
        assert_eq!(bo.refcount(), n + 1);
        for r in refs {
            r.unreference();
        }
        assert_eq!(bo.refcount(), 1);
        assert_eq!(bm.deallocations(), 0);

        bo.unreference();
        assert_eq!(bm.deallocations(), 1);
        assert_eq!(bm.live_objects(), 0);
        assert_eq!(bm.bytes_in_use(), 0);
    }

    #[test]
    fn test_export_name_idempotent() {
        let bm = mgr();
        let bo = bm
            .allocate("named", 4096, TilingMode::X, 4096, Residency::GpuLocal)
            .unwrap();
        let name = bm.export_name(&bo).unwrap();
        assert_eq!(bm.export_name(&bo).unwrap(), name);
        assert_eq!(bo.name(), Some(name));

        let other = bm.lookup_name(name).unwrap();
        assert!(other.same_object(&bo));
        assert_eq!(bo.refcount(), 2);
    }

    #[test]
    fn test_export_name_rejects_system_domain() {
        let bm = mgr();
        let bo = bm
            .allocate("sys", 4096, TilingMode::None, 4096, Residency::System)
            .unwrap();
        assert!(matches!(bm.export_name(&bo), Err(AccelError::Name { .. })));
    }

    #[test]
    fn test_name_dies_with_object() {
        let bm = mgr();
        let bo = bm
            .allocate("gone", 4096, TilingMode::None, 4096, Residency::GpuLocal)
            .unwrap();
        let name = bm.export_name(&bo).unwrap();
        drop(bo);
        assert_eq!(bm.lookup_name(name).unwrap_err(), AccelError::InvalidHandle(name));
    }

    #[test]
    fn test_map_idempotent_and_unmap() {
        let bm = mgr();
        let bo = bm
            .allocate("map", 8192, TilingMode::None, 4096, Residency::GpuLocal)
            .unwrap();
        let a = bm.map(&bo, true).unwrap();
        let b = bm.map(&bo, true).unwrap();
        assert_eq!(a, b);
        assert_eq!(bo.virtual_address(), Some(a));

        bo.with_mapping(|px| px[0] = 0x5A).unwrap();
        bm.unmap(&bo);
        assert!(!bo.is_mapped());
        assert!(bo.virtual_address().is_none());
        bm.unmap(&bo);

        // Contents survive unmap.
        bm.map(&bo, false).unwrap();
        assert_eq!(bo.with_mapping_ref(|px| px[0]), Some(0x5A));
        assert!(bo.with_mapping(|_| ()).is_none());
    }

    #[test]
    fn test_map_pinned_is_busy() {
        let bm = mgr();
        let bo = bm
            .allocate("pinned", 4096, TilingMode::None, 4096, Residency::GpuLocal)
            .unwrap();
        bo.pin();
        assert_eq!(bm.map(&bo, true), Err(AccelError::Busy { handle: bo.handle() }));
        bo.unpin();
        assert!(bm.map(&bo, true).is_ok());
    }

    #[test]
    fn test_destroy_while_mapped() {
        let bm = mgr();
        let bo = bm
            .allocate("mapped", 4096, TilingMode::None, 4096, Residency::GpuLocal)
            .unwrap();
        bm.map(&bo, true).unwrap();
        drop(bo);
        assert_eq!(bm.deallocations(), 1);
    }

    #[test]
    fn test_is_tiled_tracks_scanout_and_tiling() {
        let bm = mgr();
        let front = bm
            .allocate_surface("front", 1024, 768, 32, TilingMode::X, Generation::I965)
            .unwrap();
        let back = bm
            .allocate_surface("back", 1024, 768, 32, TilingMode::X, Generation::I965)
            .unwrap();

        // Not the scanout yet.
        assert!(!bm.is_tiled(&front));
        bm.set_scanout(Some(&front));
        assert!(bm.is_tiled(&front));
        assert!(!bm.is_tiled(&back));

        bm.export_name(&front).unwrap();
        assert!(bm.is_tiled(&front));

        bm.set_tiling(&front, TilingMode::None, front.pitch()).unwrap();
        assert!(!bm.is_tiled(&front));

        bm.set_tiling(&front, TilingMode::X, front.pitch()).unwrap();
        assert!(bm.is_tiled(&front));
        drop(front);
        assert_eq!(bm.scanout_handle(), None);
    }

    #[test]
    fn test_surface_pitch() {
        let pitch = |w, bpp, tiling, gen| surface_pitch(w, bpp, tiling, gen).unwrap();
        assert_eq!(pitch(1024, 32, TilingMode::None, Generation::I965), 4096);
        assert_eq!(pitch(1000, 32, TilingMode::X, Generation::I965), 4096);
        assert_eq!(pitch(100, 16, TilingMode::None, Generation::I965), 256);
        assert_eq!(pitch(1280, 32, TilingMode::X, Generation::I965), 5120);
        // Pre-965 tiled pitches are powers of two.
        assert_eq!(pitch(1280, 32, TilingMode::X, Generation::I915), 8192);
    }

    #[test]
    fn test_surface_pitch_too_wide() {
        assert_eq!(surface_pitch(1 << 30, 32, TilingMode::None, Generation::I965), None);
        assert_eq!(surface_pitch(u32::MAX, 32, TilingMode::X, Generation::I915), None);
    }

    #[test]
    fn test_oversized_surface_rejected() {
        let bm = mgr();
        assert!(matches!(
            bm.allocate_surface("huge", 1 << 30, 16, 32, TilingMode::None, Generation::I965),
            Err(AccelError::Allocation { .. })
        ));
        // 4096 fits the 965 engines but not the older ones.
        assert!(matches!(
            bm.allocate_surface("wide", 4096, 16, 32, TilingMode::None, Generation::I915),
            Err(AccelError::Allocation { .. })
        ));
        assert!(bm
            .allocate_surface("wide", 4096, 16, 32, TilingMode::None, Generation::I965)
            .is_ok());
    }

    #[test]
    fn test_alignment_must_be_power_of_two() {
        let bm = mgr();
        let err = bm
            .allocate("odd", 4096, TilingMode::None, 3 * PAGE_SIZE, Residency::GpuLocal)
            .unwrap_err();
        assert!(matches!(err, AccelError::Allocation { requested: 4096, .. }));
        assert_eq!(bm.live_objects(), 0);
    }

    #[test]
    fn test_allocate_size_near_limit() {
        let bm = mgr();
        assert!(matches!(
            bm.allocate("max", u64::MAX, TilingMode::None, 0, Residency::GpuLocal),
            Err(AccelError::Allocation { .. })
        ));
    }

    #[test]
    fn test_tiled_pitch_alignment_enforced() {
        let bm = mgr();
        let bo = bm
            .allocate("bad", 4096, TilingMode::None, 4096, Residency::GpuLocal)
            .unwrap();
        assert!(bm.set_tiling(&bo, TilingMode::X, 1000).is_err());
        assert!(bm.set_tiling(&bo, TilingMode::X, 1024).is_ok());
        assert_eq!(bo.tiling(), TilingMode::X);
        assert_eq!(bo.pitch(), 1024);
    }

    #[test]
    fn test_tiled_surface_falls_back_untiled() {
        // Pre-965 X tiling needs a 1 MiB fence region; the pool only has 512 KiB.
        let bm = BufferManager::new(512 * 1024);
        let bo = bm
            .allocate_surface("small", 64, 64, 32, TilingMode::X, Generation::I915)
            .unwrap();
        assert_eq!(bo.tiling(), TilingMode::None);
        assert_eq!(bo.pitch(), 256);
    }
}
