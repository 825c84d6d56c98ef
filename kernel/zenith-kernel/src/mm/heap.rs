//! Byte-granular kernel heap.
//!
//! First-fit free list with header-prefixed blocks. Each allocated block is
//! preceded by a `{magic, size}` header; the magic doubles as a corruption
//! detector and is verified on free (a mismatch is fatal). The heap grows by
//! requesting consecutive pages from the page-frame allocator and never
//! shrinks. No coalescing on free.

use zenith_core::sync::SpinLock;
use zenith_core::{PAGE_SIZE, align_up};

use super::pfa::PageFrameAllocator;

/// Header magic: `"ZHEA"`.
const HEAP_MAGIC: u64 = 0x5A48_4541;

/// Magic marking a padding header for over-aligned allocations; `size` holds
/// the backward offset to the real header.
const PAD_MAGIC: u64 = 0x5A50_4144; // "ZPAD"

/// Minimum block alignment and granularity.
const MIN_ALIGN: usize = 16;

/// Header preceding every allocated block.
#[repr(C)]
struct Header {
    magic: u64,
    size: u64,
}

const HEADER_SIZE: usize = core::mem::size_of::<Header>();

/// Free-list node stored in the first bytes of each free block.
#[repr(C)]
struct FreeNode {
    size: usize,
    next: usize,
}

struct HeapInner {
    /// Virtual address of the first free node (0 terminates).
    head: usize,
    /// HHDM offset used when turning fresh physical pages into heap blocks.
    hhdm_offset: u64,
}

/// The kernel heap allocator.
pub struct HeapAllocator {
    inner: SpinLock<HeapInner>,
}

impl HeapAllocator {
    /// Creates a heap seeded with `initial_pages` consecutive pages from `pfa`.
    ///
    /// # Panics
    ///
    /// Panics if the page pool cannot supply the initial pages; heap
    /// bootstrap failure is fatal.
    #[must_use]
    pub fn new(pfa: &PageFrameAllocator, hhdm_offset: u64, initial_pages: usize) -> Self {
        let heap = Self {
            inner: SpinLock::new(HeapInner { head: 0, hhdm_offset }),
        };
        heap.grow(pfa, initial_pages)
            .expect("heap bootstrap: page pool exhausted");
        heap
    }

    /// Pulls `pages` consecutive pages from the PFA and inserts them as one
    /// free block.
    fn grow(&self, pfa: &PageFrameAllocator, pages: usize) -> Result<(), super::pfa::PfaError> {
        let base = pfa.alloc_consecutive(pages)?;
        let mut inner = self.inner.lock();
        let virt = (inner.hhdm_offset + base.as_u64()) as usize;
        let size = pages * PAGE_SIZE;
        // SAFETY: The pages were just allocated for us and are reachable
        // through the HHDM.
        unsafe { insert_free(&mut inner, virt, size) };
        Ok(())
    }

    /// Allocates `size` bytes, growing the heap once if no block fits.
    ///
    /// Sizes are rounded up to 16 bytes so every block (and every split
    /// remainder) stays 16-byte aligned.
    pub fn request(&self, size: usize, pfa: &PageFrameAllocator) -> Option<*mut u8> {
        let size = align_up(size.max(1) as u64, MIN_ALIGN as u64) as usize;

        if let Some(block) = self.take_fit(size) {
            return Some(block);
        }

        // No fit: grow by exactly what the request needs and retry once.
        let pages = (size + HEADER_SIZE).div_ceil(PAGE_SIZE);
        self.grow(pfa, pages).ok()?;
        self.take_fit(size)
    }

    /// First-fit search; unlinks a block, stamps the header, splits the tail.
    fn take_fit(&self, size: usize) -> Option<*mut u8> {
        let mut inner = self.inner.lock();
        let needed = size + HEADER_SIZE;

        let mut prev: usize = 0;
        let mut current = inner.head;
        while current != 0 {
            // SAFETY: `current` is a free-list node owned by the heap.
            let node = unsafe { &mut *(current as *mut FreeNode) };
            let (node_size, node_next) = (node.size, node.next);

            if node_size >= needed {
                // Unlink.
                if prev == 0 {
                    inner.head = node_next;
                } else {
                    // SAFETY: `prev` is the preceding free-list node.
                    unsafe { (*(prev as *mut FreeNode)).next = node_next };
                }

                // Stamp the header over the node.
                // SAFETY: The block is at least `needed` bytes.
                unsafe {
                    let header = current as *mut Header;
                    (*header).magic = HEAP_MAGIC;
                    (*header).size = size as u64;
                }

                // Split off the remainder if any.
                let rest = node_size - needed;
                if rest > 0 {
                    // SAFETY: The tail lies inside the unlinked block.
                    unsafe { insert_free(&mut inner, current + needed, rest) };
                }

                return Some((current + HEADER_SIZE) as *mut u8);
            }

            prev = current;
            current = node_next;
        }
        None
    }

    /// Reallocates `ptr` to `size` bytes, copying the smaller of the two sizes.
    pub fn realloc(&self, ptr: *mut u8, size: usize, pfa: &PageFrameAllocator) -> Option<*mut u8> {
        let new_block = self.request(size, pfa)?;
        if !ptr.is_null() {
            let old_size = self.block_size(ptr);
            // SAFETY: Both blocks are live heap allocations of at least
            // `min(old_size, size)` bytes.
            unsafe {
                core::ptr::copy_nonoverlapping(ptr, new_block, old_size.min(size));
            }
            self.free(ptr);
        }
        Some(new_block)
    }

    /// Returns the usable size of an allocated block.
    ///
    /// # Panics
    ///
    /// Panics on a corrupt header.
    #[must_use]
    pub fn block_size(&self, ptr: *mut u8) -> usize {
        let header = Self::header_of(ptr);
        // SAFETY: `ptr` is an allocation from this heap, so a header
        // precedes it.
        let header = unsafe { &*header };
        assert!(header.magic == HEAP_MAGIC, "heap header corrupt (block size)");
        header.size as usize
    }

    /// Frees a block previously returned by [`request`](Self::request) or
    /// [`realloc`](Self::realloc).
    ///
    /// # Panics
    ///
    /// Panics if the header magic does not verify — either the pointer never
    /// came from this heap or something scribbled over the header.
    pub fn free(&self, ptr: *mut u8) {
        let header_ptr = Self::header_of(ptr);
        // SAFETY: `ptr` is an allocation from this heap.
        let header = unsafe { &*header_ptr };
        assert!(header.magic == HEAP_MAGIC, "bad magic in heap header");
        let size = header.size as usize;

        let mut inner = self.inner.lock();
        // SAFETY: The header plus block form a contiguous region we own again.
        unsafe { insert_free(&mut inner, header_ptr as usize, size + HEADER_SIZE) };
    }

    /// Resolves the header for `ptr`, stepping over a padding header if the
    /// allocation was over-aligned.
    fn header_of(ptr: *mut u8) -> *mut Header {
        let candidate = (ptr as usize - HEADER_SIZE) as *mut Header;
        // SAFETY: Every heap pointer has a header (real or padding) directly
        // before it.
        let magic = unsafe { (*candidate).magic };
        if magic == PAD_MAGIC {
            // SAFETY: Padding headers store the backward offset to the real
            // block start.
            let back = unsafe { (*candidate).size } as usize;
            (ptr as usize - back - HEADER_SIZE) as *mut Header
        } else {
            candidate
        }
    }

    /// Allocates with an alignment larger than the native 16 bytes.
    ///
    /// Over-allocates, then records the adjustment in a padding header so
    /// [`free`](Self::free) can find the real block.
    pub fn request_aligned(
        &self,
        size: usize,
        align: usize,
        pfa: &PageFrameAllocator,
    ) -> Option<*mut u8> {
        if align <= MIN_ALIGN {
            return self.request(size, pfa);
        }

        let raw = self.request(size + align, pfa)?;
        let addr = raw as usize;
        let aligned = align_up(addr as u64, align as u64) as usize;
        if aligned == addr {
            return Some(raw);
        }
        let aligned = if aligned - addr < HEADER_SIZE {
            aligned + align
        } else {
            aligned
        };
        // SAFETY: `aligned` is at least HEADER_SIZE past the block start and
        // the block has `align` spare bytes.
        unsafe {
            let pad = (aligned - HEADER_SIZE) as *mut Header;
            (*pad).magic = PAD_MAGIC;
            (*pad).size = (aligned - addr) as u64;
        }
        Some(aligned as *mut u8)
    }

    /// Logs the free list, one line per node.
    pub fn walk(&self) {
        let inner = self.inner.lock();
        let mut current = inner.head;
        let mut i = 0;
        while current != 0 {
            // SAFETY: Free-list nodes are valid while the lock is held.
            let node = unsafe { &*(current as *const FreeNode) };
            crate::kdebug!("heap: node {} at {:#x}, {} bytes", i, current, node.size);
            current = node.next;
            i += 1;
        }
    }
}

/// Pushes a free block onto the list head.
///
/// # Safety
///
/// `[addr, addr + size)` must be exclusively owned memory, writable, with
/// `size >= size_of::<FreeNode>()`.
unsafe fn insert_free(inner: &mut HeapInner, addr: usize, size: usize) {
    let prev_head = inner.head;
    // SAFETY: Forwarded caller contract.
    let node = unsafe { &mut *(addr as *mut FreeNode) };
    node.size = size;
    node.next = prev_head;
    inner.head = addr;
}

// ---------------------------------------------------------------------------
// Kernel-level heap glue: GlobalAlloc over the PFA-backed heap
// ---------------------------------------------------------------------------

/// Global heap, installed by [`init`].
static HEAP: SpinLock<Option<HeapAllocator>> = SpinLock::new(None);

/// Pages pulled from the page pool when the heap is first created.
pub const INITIAL_HEAP_PAGES: usize = 50;

/// Creates the global heap. Must run after the PFA is seeded.
pub fn init(hhdm_offset: u64) {
    let heap = super::pfa::with_pfa(|pfa| HeapAllocator::new(pfa, hhdm_offset, INITIAL_HEAP_PAGES));
    let mut slot = HEAP.lock();
    assert!(slot.is_none(), "heap already initialized");
    *slot = Some(heap);
}

/// Runs a closure with a reference to the global heap.
///
/// # Panics
///
/// Panics if the heap has not been initialized.
pub fn with_heap<R>(f: impl FnOnce(&HeapAllocator) -> R) -> R {
    let heap = HEAP.lock();
    f(heap.as_ref().expect("heap not initialized"))
}

/// `#[global_allocator]` facade over the global heap.
#[cfg(target_os = "none")]
pub struct KernelHeap;

#[cfg(target_os = "none")]
// SAFETY: Allocation and deallocation are mediated by the heap free list,
// which hands out exclusive, correctly sized and aligned blocks.
unsafe impl core::alloc::GlobalAlloc for KernelHeap {
    unsafe fn alloc(&self, layout: core::alloc::Layout) -> *mut u8 {
        let result = with_heap(|heap| {
            super::pfa::with_pfa(|pfa| heap.request_aligned(layout.size(), layout.align(), pfa))
        });
        result.unwrap_or(core::ptr::null_mut())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: core::alloc::Layout) {
        with_heap(|heap| heap.free(ptr));
    }
}

/// The kernel's global allocator instance.
#[cfg(all(target_os = "none", not(test)))]
#[global_allocator]
static GLOBAL_HEAP: KernelHeap = KernelHeap;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::pfa::{FreeRegion, PageFrameAllocator};
    use core::alloc::Layout;
    use zenith_core::PhysAddr;

    struct Arena {
        ptr: *mut u8,
        layout: Layout,
        base: u64,
    }

    impl Arena {
        fn new(pages: usize) -> Self {
            let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
            // SAFETY: non-zero size.
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            Self { ptr, layout, base: 0x1000_0000 }
        }

        fn hhdm_offset(&self) -> u64 {
            (self.ptr as u64).wrapping_sub(self.base)
        }

        fn pfa(&self) -> PageFrameAllocator {
            let region = FreeRegion {
                base: PhysAddr::new(self.base),
                size: self.layout.size() as u64,
            };
            // SAFETY: The arena backs the region for the test's lifetime.
            unsafe { PageFrameAllocator::new(region, self.hhdm_offset()) }
        }
    }

    impl Drop for Arena {
        fn drop(&mut self) {
            // SAFETY: ptr/layout from alloc_zeroed.
            unsafe { std::alloc::dealloc(self.ptr, self.layout) };
        }
    }

    #[test]
    fn request_and_free_roundtrip() {
        let arena = Arena::new(64);
        let pfa = arena.pfa();
        let heap = HeapAllocator::new(&pfa, arena.hhdm_offset(), 16);

        let p = heap.request(100, &pfa).unwrap();
        assert_eq!(p as usize % 16, 0);
        // SAFETY: 100-byte live allocation.
        unsafe { core::ptr::write_bytes(p, 0xCD, 100) };
        heap.free(p);

        let q = heap.request(16, &pfa).unwrap();
        assert_eq!(q as usize % 16, 0);
        heap.free(q);
    }

    #[test]
    fn grows_beyond_initial_seed() {
        // Seed 16 pages, then ask for far more than that in one request: the
        // heap must expand out of the page pool and still satisfy it.
        let arena = Arena::new(600);
        let pfa = arena.pfa();
        let heap = HeapAllocator::new(&pfa, arena.hhdm_offset(), 16);
        let before = pfa.free_bytes();

        let big = 512 * PAGE_SIZE; // 2 MiB
        let p = heap.request(big, &pfa).unwrap();
        assert_eq!(p as usize % 16, 0);
        assert!(pfa.free_bytes() < before, "heap did not grow out of the PFA");

        heap.free(p);
        let q = heap.request(16, &pfa).unwrap();
        assert!(!q.is_null());
    }

    #[test]
    fn split_leaves_usable_remainder() {
        let arena = Arena::new(64);
        let pfa = arena.pfa();
        let heap = HeapAllocator::new(&pfa, arena.hhdm_offset(), 16);

        let a = heap.request(32, &pfa).unwrap();
        let b = heap.request(32, &pfa).unwrap();
        // Both carved from the same seeded block, adjacent modulo headers.
        assert_eq!(b as usize, a as usize + 32 + HEADER_SIZE);
        heap.free(a);
        heap.free(b);
    }

    #[test]
    #[should_panic(expected = "bad magic")]
    fn free_of_foreign_pointer_panics() {
        let arena = Arena::new(64);
        let pfa = arena.pfa();
        let heap = HeapAllocator::new(&pfa, arena.hhdm_offset(), 16);

        let p = heap.request(64, &pfa).unwrap();
        // An interior pointer has no header in front of it.
        // SAFETY: Pointer stays inside the live allocation.
        let interior = unsafe { p.add(32) };
        heap.free(interior);
    }

    #[test]
    #[should_panic(expected = "bad magic")]
    fn double_free_panics() {
        let arena = Arena::new(64);
        let pfa = arena.pfa();
        let heap = HeapAllocator::new(&pfa, arena.hhdm_offset(), 16);

        let p = heap.request(48, &pfa).unwrap();
        heap.free(p);
        // The free overwrote the header with a free-list node.
        heap.free(p);
    }

    #[test]
    fn realloc_preserves_contents() {
        let arena = Arena::new(64);
        let pfa = arena.pfa();
        let heap = HeapAllocator::new(&pfa, arena.hhdm_offset(), 16);

        let p = heap.request(32, &pfa).unwrap();
        // SAFETY: 32-byte live allocation.
        unsafe {
            for i in 0..32 {
                *p.add(i) = i as u8;
            }
        }
        let q = heap.realloc(p, 128, &pfa).unwrap();
        // SAFETY: 128-byte live allocation, first 32 bytes copied.
        unsafe {
            for i in 0..32 {
                assert_eq!(*q.add(i), i as u8);
            }
        }
        heap.free(q);
    }

    #[test]
    fn aligned_request_honors_alignment() {
        let arena = Arena::new(64);
        let pfa = arena.pfa();
        let heap = HeapAllocator::new(&pfa, arena.hhdm_offset(), 16);

        let p = heap.request_aligned(100, 256, &pfa).unwrap();
        assert_eq!(p as usize % 256, 0);
        // SAFETY: live allocation of 100 bytes.
        unsafe { core::ptr::write_bytes(p, 0xEE, 100) };
        heap.free(p);

        // Heap still consistent afterwards.
        let q = heap.request(16, &pfa).unwrap();
        heap.free(q);
    }

    #[test]
    fn block_size_reports_rounded_size() {
        let arena = Arena::new(64);
        let pfa = arena.pfa();
        let heap = HeapAllocator::new(&pfa, arena.hhdm_offset(), 16);
        let p = heap.request(100, &pfa).unwrap();
        assert_eq!(heap.block_size(p), 112); // rounded up to 16
        heap.free(p);
    }
}
