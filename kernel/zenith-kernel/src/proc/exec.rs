//! ELF program loading into user address spaces.
//!
//! Segments are copied through the HHDM into freshly allocated user pages,
//! `p_flags` become PTE permissions, the user stack is mapped just below
//! the user-space ceiling, and the argv blob lands in the first page of the
//! process heap region.

use core::fmt;

use zenith_core::{PAGE_SIZE, PhysAddr, VirtAddr};
use zenith_elf::{ElfFile, PF_W};

use crate::mm::layout::{USER_HEAP_BASE, USER_STACK_SIZE, USER_STACK_TOP};
use crate::mm::paging::{PageTableFlags, PageWalker, user_flags};

/// Errors from program loading and spawning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// VFS failure while reading the binary.
    Fs(crate::fs::FsError),
    /// The binary is not a loadable ELF executable.
    Elf(zenith_elf::ElfError),
    /// Out of physical pages.
    OutOfMemory,
    /// The process table is full.
    TableFull,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fs(e) => write!(f, "spawn: {e}"),
            Self::Elf(e) => write!(f, "spawn: {e}"),
            Self::OutOfMemory => write!(f, "spawn: out of memory"),
            Self::TableFull => write!(f, "spawn: process table full"),
        }
    }
}

impl From<crate::fs::FsError> for SpawnError {
    fn from(e: crate::fs::FsError) -> Self {
        Self::Fs(e)
    }
}

impl From<zenith_elf::ElfError> for SpawnError {
    fn from(e: zenith_elf::ElfError) -> Self {
        Self::Elf(e)
    }
}

/// Result of loading a binary into an address space.
#[derive(Debug, Clone, Copy)]
pub struct LoadedImage {
    /// Program entry point.
    pub entry: u64,
    /// Initial user stack pointer.
    pub user_stack_top: u64,
    /// User virtual address of the argv blob.
    pub argv_ptr: u64,
    /// First unused page of the process heap region.
    pub heap_next: u64,
}

/// Maps one anonymous zeroed user page at `virt`, returning its frame.
fn map_user_page(
    walker: &PageWalker,
    pml4: PhysAddr,
    virt: VirtAddr,
    flags: PageTableFlags,
    hhdm_offset: u64,
    alloc: &mut dyn FnMut() -> PhysAddr,
) -> PhysAddr {
    let frame = alloc();
    // SAFETY: The frame was just allocated for this mapping and is reachable
    // through the HHDM.
    unsafe {
        core::ptr::write_bytes((hhdm_offset + frame.as_u64()) as *mut u8, 0, PAGE_SIZE);
        walker.map(pml4, virt, frame, flags, alloc);
    }
    frame
}

/// Loads `elf_data` into the address space rooted at `pml4`.
///
/// `argv` is the NUL-terminated argument blob copied into the first heap
/// page. `alloc` must hand out exclusive HHDM-reachable frames.
///
/// # Errors
///
/// Returns [`SpawnError::Elf`] for malformed binaries.
pub fn load_into(
    walker: &PageWalker,
    pml4: PhysAddr,
    elf_data: &[u8],
    argv: &[u8],
    hhdm_offset: u64,
    alloc: &mut dyn FnMut() -> PhysAddr,
) -> Result<LoadedImage, SpawnError> {
    let elf = ElfFile::parse(elf_data)?;

    for segment in elf.load_segments() {
        let segment = segment?;

        let mut flags = user_flags();
        if segment.flags & PF_W == 0 {
            flags -= PageTableFlags::WRITABLE;
        }

        let start = VirtAddr::new_truncate(segment.vaddr).align_down(PAGE_SIZE as u64);
        let end = VirtAddr::new_truncate(segment.vaddr + segment.memsz).align_up(PAGE_SIZE as u64);

        let mut page = start;
        while page < end {
            // Map writable regardless of the final permissions so the copy
            // below goes through the HHDM alias, not the user mapping.
            let frame = map_user_page(walker, pml4, page, flags | PageTableFlags::WRITABLE, hhdm_offset, alloc);

            // Copy the slice of file data overlapping this page.
            let page_base = page.as_u64();
            let seg_offset = page_base.max(segment.vaddr) - segment.vaddr;
            if seg_offset < segment.data.len() as u64 {
                let src_start = seg_offset as usize;
                let src_len = (segment.data.len() - src_start).min(PAGE_SIZE - (segment.vaddr.max(page_base) - page_base) as usize);
                let dst_offset = (segment.vaddr.max(page_base) - page_base) as usize;
                // SAFETY: Destination is the freshly mapped frame's HHDM
                // alias; ranges were clamped to one page.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        segment.data.as_ptr().add(src_start),
                        (hhdm_offset + frame.as_u64() + dst_offset as u64) as *mut u8,
                        src_len,
                    );
                }
            }

            // Restore the intended permissions for read-only segments.
            if !flags.contains(PageTableFlags::WRITABLE) {
                // SAFETY: Remapping the same frame with reduced permissions.
                unsafe { walker.map(pml4, page, frame, flags, alloc) };
            }

            page = page + PAGE_SIZE as u64;
        }
    }

    // User stack, growing down from the ceiling.
    let stack_pages = USER_STACK_SIZE / PAGE_SIZE as u64;
    for i in 0..stack_pages {
        let virt = VirtAddr::new_truncate(USER_STACK_TOP - (i + 1) * PAGE_SIZE as u64);
        map_user_page(walker, pml4, virt, user_flags(), hhdm_offset, alloc);
    }

    // Argv blob in the first heap page.
    let argv_frame = map_user_page(
        walker,
        pml4,
        VirtAddr::new_truncate(USER_HEAP_BASE),
        user_flags(),
        hhdm_offset,
        alloc,
    );
    let copy_len = argv.len().min(PAGE_SIZE);
    // SAFETY: The argv page was just allocated and zeroed.
    unsafe {
        core::ptr::copy_nonoverlapping(
            argv.as_ptr(),
            (hhdm_offset + argv_frame.as_u64()) as *mut u8,
            copy_len,
        );
    }

    Ok(LoadedImage {
        entry: elf.entry_point(),
        user_stack_top: USER_STACK_TOP,
        argv_ptr: USER_HEAP_BASE,
        heap_next: USER_HEAP_BASE + PAGE_SIZE as u64,
    })
}

// ---------------------------------------------------------------------------
// Kernel spawn path
// ---------------------------------------------------------------------------

/// Reads `path` from the VFS, builds a user address space, and enqueues the
/// new process `Ready`.
///
/// Returns the child pid.
///
/// # Errors
///
/// Propagates VFS and ELF failures; the partially built address space is
/// torn down on error.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn spawn(path: &str, args: &str, parent: u32, redirected: bool) -> Result<u32, SpawnError> {
    use alloc::vec;

    use super::{ChildIo, ProcState, Process, sched};
    use crate::mm::{hhdm, pfa, vmm};

    // Read the whole binary.
    let elf_data = crate::fs::vfs::with_vfs(|vfs| -> Result<alloc::vec::Vec<u8>, SpawnError> {
        let handle = vfs.open(path)?;
        let size = vfs.size(handle)? as usize;
        let mut data = vec![0u8; size];
        let read = vfs.read(handle, &mut data, 0)?;
        vfs.close(handle)?;
        data.truncate(read);
        Ok(data)
    })?;

    let hhdm_offset = hhdm::offset();
    let walker = PageWalker::new(hhdm_offset);

    let name = path.rsplit('/').next().unwrap_or(path);

    let (pid, entry, user_stack_top) = pfa::with_pfa(|pool| -> Result<_, SpawnError> {
        let mut alloc = || {
            pool.allocate()
                .expect("page pool exhausted while building a user address space")
        };

        // New PML4 sharing the kernel half.
        // SAFETY: The kernel PML4 is live; alloc returns exclusive frames.
        let pml4 = unsafe { walker.create_user_pml4(vmm::kernel_pml4(), &mut alloc) };

        let mut process = Process::new(0, parent, name, pml4);
        process.set_argv(args);

        let image = load_into(&walker, pml4, &elf_data, process.argv.as_slice(), hhdm_offset, &mut alloc)?;
        process.entry = image.entry;
        process.user_stack_top = image.user_stack_top;
        process.argv_user_ptr = image.argv_ptr;
        process.heap_next = image.heap_next;
        if redirected {
            process.child_io = Some(ChildIo::new());
        }

        // Kernel stack with a parked first-entry context.
        let mut stack = vec![0u8; crate::mm::layout::KERNEL_STACK_SIZE].into_boxed_slice();
        let stack_top = zenith_core::align_down(
            stack.as_mut_ptr() as u64 + crate::mm::layout::KERNEL_STACK_SIZE as u64,
            16,
        );
        process.context.rsp =
            crate::arch::x86_64::context::prepare_initial_stack(stack_top);
        process.kernel_stack = Some(stack);
        process.kernel_stack_top = stack_top;
        process.state = ProcState::Ready;

        let pid = sched::with_sched(|scheduler| scheduler.table.insert(process))
            .ok_or(SpawnError::TableFull)?;
        Ok((pid, image.entry, image.user_stack_top))
    })?;

    crate::kinfo!("spawn: pid {pid} '{name}' entry {entry:#x} stack {user_stack_top:#x}");
    Ok(pid)
}

/// Reclaims a terminated child: frees its user pages and kernel stack and
/// releases the table slot. Returns the exit code.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn reap(pid: u32) -> Option<i32> {
    use super::sched;
    use crate::mm::{hhdm, pfa};

    let process = sched::with_sched(|scheduler| {
        match scheduler.table.get(pid) {
            Some(p) if p.state == super::ProcState::Terminated => scheduler.table.remove(pid),
            _ => None,
        }
    })?;

    // Return every window and user frame to the pool.
    let reclaimed_windows = crate::winsrv::with_windows(|windows| windows.destroy_owned_by(pid));
    let walker = PageWalker::new(hhdm::offset());
    pfa::with_pfa(|pool| {
        for frames in &reclaimed_windows {
            for &frame in frames {
                pool.free(frame);
            }
        }
        // SAFETY: The process is reaped: nothing runs in this address
        // space and the parent's CR3 is active, so the tree is exclusively
        // ours to dismantle.
        unsafe {
            walker.free_user_space(process.pml4, &mut |frame| pool.free(frame));
        }
    });
    // The kernel stack Box drops here.
    Some(process.exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::alloc::Layout;
    use std::cell::Cell;

    /// Page arena doubling as physical memory and allocation counter.
    struct Arena {
        ptr: *mut u8,
        layout: Layout,
        base: u64,
        next: Cell<usize>,
        pages: usize,
    }

    impl Arena {
        fn new(pages: usize) -> Self {
            let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
            // SAFETY: non-zero size.
            let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
            assert!(!ptr.is_null());
            Self { ptr, layout, base: 0x0400_0000, next: Cell::new(0), pages }
        }

        fn hhdm_offset(&self) -> u64 {
            (self.ptr as u64).wrapping_sub(self.base)
        }

        fn alloc_fn(&self) -> impl FnMut() -> PhysAddr + '_ {
            move || {
                let i = self.next.get();
                assert!(i < self.pages, "arena exhausted");
                self.next.set(i + 1);
                PhysAddr::new(self.base + (i * PAGE_SIZE) as u64)
            }
        }

        fn read(&self, phys: PhysAddr, len: usize) -> Vec<u8> {
            // SAFETY: phys is inside the arena.
            unsafe {
                core::slice::from_raw_parts((self.hhdm_offset() + phys.as_u64()) as *const u8, len)
                    .to_vec()
            }
        }
    }

    impl Drop for Arena {
        fn drop(&mut self) {
            // SAFETY: from alloc_zeroed.
            unsafe { std::alloc::dealloc(self.ptr, self.layout) };
        }
    }

    /// Builds a two-segment ELF: R+X text at 0x40_0000 and R+W data with
    /// bss at 0x60_0000.
    fn sample_elf() -> Vec<u8> {
        const EHDR: usize = 64;
        const PHDR: usize = 56;
        let mut elf = vec![0u8; EHDR + 2 * PHDR];

        elf[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
        elf[4] = 2; // 64-bit
        elf[5] = 1; // little-endian
        elf[6] = 1;
        elf[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        elf[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        elf[24..32].copy_from_slice(&0x40_0000u64.to_le_bytes()); // entry
        elf[32..40].copy_from_slice(&(EHDR as u64).to_le_bytes());
        elf[54..56].copy_from_slice(&(PHDR as u16).to_le_bytes());
        elf[56..58].copy_from_slice(&2u16.to_le_bytes());

        let text = b"\x48\xc7\xc0\x3c\x00\x00\x00\x0f\x05"; // mov rax, 60; syscall
        let data = b"zenith-data";
        let text_off = elf.len() as u64;
        elf.extend_from_slice(text);
        let data_off = elf.len() as u64;
        elf.extend_from_slice(data);

        // phdr 0: text, R+X.
        let p = EHDR;
        elf[p..p + 4].copy_from_slice(&1u32.to_le_bytes());
        elf[p + 4..p + 8].copy_from_slice(&5u32.to_le_bytes()); // R|X
        elf[p + 8..p + 16].copy_from_slice(&text_off.to_le_bytes());
        elf[p + 16..p + 24].copy_from_slice(&0x40_0000u64.to_le_bytes());
        elf[p + 32..p + 40].copy_from_slice(&(text.len() as u64).to_le_bytes());
        elf[p + 40..p + 48].copy_from_slice(&(text.len() as u64).to_le_bytes());

        // phdr 1: data + bss, R+W.
        let p = EHDR + PHDR;
        elf[p..p + 4].copy_from_slice(&1u32.to_le_bytes());
        elf[p + 4..p + 8].copy_from_slice(&6u32.to_le_bytes()); // R|W
        elf[p + 8..p + 16].copy_from_slice(&data_off.to_le_bytes());
        elf[p + 16..p + 24].copy_from_slice(&0x60_0000u64.to_le_bytes());
        elf[p + 32..p + 40].copy_from_slice(&(data.len() as u64).to_le_bytes());
        elf[p + 40..p + 48].copy_from_slice(&0x2000u64.to_le_bytes()); // bss past data

        elf
    }

    #[test]
    fn load_maps_segments_stack_and_argv() {
        let arena = Arena::new(128);
        let walker = PageWalker::new(arena.hhdm_offset());
        let mut alloc = arena.alloc_fn();
        let pml4 = alloc();

        let image = load_into(
            &walker,
            pml4,
            &sample_elf(),
            b"0:/os/init.elf\0",
            arena.hhdm_offset(),
            &mut alloc,
        )
        .unwrap();

        assert_eq!(image.entry, 0x40_0000);
        assert_eq!(image.user_stack_top, USER_STACK_TOP);
        assert_eq!(image.argv_ptr, USER_HEAP_BASE);
        assert_eq!(image.heap_next, USER_HEAP_BASE + PAGE_SIZE as u64);

        unsafe {
            // Text page: mapped, user-visible, read-only.
            let text_phys = walker.translate(pml4, VirtAddr::new(0x40_0000)).unwrap();
            assert_eq!(arena.read(text_phys, 9), b"\x48\xc7\xc0\x3c\x00\x00\x00\x0f\x05");

            // Data page carries the file bytes; bss page exists and is zero.
            let data_phys = walker.translate(pml4, VirtAddr::new(0x60_0000)).unwrap();
            assert_eq!(arena.read(data_phys, 11), b"zenith-data");
            let bss_phys = walker.translate(pml4, VirtAddr::new(0x60_1000)).unwrap();
            assert!(arena.read(bss_phys, PAGE_SIZE).iter().all(|b| *b == 0));

            // Stack pages are mapped below the ceiling.
            assert!(walker.translate(pml4, VirtAddr::new(USER_STACK_TOP - 0x1000)).is_some());
            assert!(
                walker
                    .translate(pml4, VirtAddr::new(USER_STACK_TOP - USER_STACK_SIZE))
                    .is_some()
            );

            // Argv blob is in place.
            let argv_phys = walker.translate(pml4, VirtAddr::new(USER_HEAP_BASE)).unwrap();
            assert_eq!(arena.read(argv_phys, 15), b"0:/os/init.elf\0");
        }
    }

    #[test]
    fn text_pages_are_not_writable() {
        let arena = Arena::new(128);
        let walker = PageWalker::new(arena.hhdm_offset());
        let mut alloc = arena.alloc_fn();
        let pml4 = alloc();

        load_into(&walker, pml4, &sample_elf(), b"\0", arena.hhdm_offset(), &mut alloc).unwrap();

        // Inspect the leaf entry for the text page.
        let text = VirtAddr::new(0x40_0000);
        let leaf_flags = unsafe {
            let mut table = pml4;
            for index in [text.pml4_index(), text.pdpt_index(), text.pd_index()] {
                let t = &*((arena.hhdm_offset() + table.as_u64()) as *const crate::mm::paging::PageTable);
                table = t.entries[index].address();
            }
            let t = &*((arena.hhdm_offset() + table.as_u64()) as *const crate::mm::paging::PageTable);
            t.entries[text.pt_index()].flags()
        };
        assert!(leaf_flags.contains(PageTableFlags::USER));
        assert!(!leaf_flags.contains(PageTableFlags::WRITABLE));

        let data_flags = unsafe {
            let data = VirtAddr::new(0x60_0000);
            let mut table = pml4;
            for index in [data.pml4_index(), data.pdpt_index(), data.pd_index()] {
                let t = &*((arena.hhdm_offset() + table.as_u64()) as *const crate::mm::paging::PageTable);
                table = t.entries[index].address();
            }
            let t = &*((arena.hhdm_offset() + table.as_u64()) as *const crate::mm::paging::PageTable);
            t.entries[data.pt_index()].flags()
        };
        assert!(data_flags.contains(PageTableFlags::WRITABLE));
    }

    #[test]
    fn malformed_elf_is_rejected() {
        let arena = Arena::new(16);
        let walker = PageWalker::new(arena.hhdm_offset());
        let mut alloc = arena.alloc_fn();
        let pml4 = alloc();

        let result = load_into(&walker, pml4, b"not an elf", b"\0", arena.hhdm_offset(), &mut alloc);
        assert!(matches!(result, Err(SpawnError::Elf(_))));
    }

    #[test]
    fn teardown_frees_every_allocated_frame() {
        let arena = Arena::new(128);
        let walker = PageWalker::new(arena.hhdm_offset());
        let mut alloc = arena.alloc_fn();
        let pml4 = alloc();

        load_into(&walker, pml4, &sample_elf(), b"\0", arena.hhdm_offset(), &mut alloc).unwrap();
        let allocated = arena.next.get();

        let mut freed = std::collections::HashSet::new();
        // SAFETY: The arena-backed tree is exclusively this test's.
        unsafe {
            walker.free_user_space(pml4, &mut |frame| {
                assert!(freed.insert(frame.as_u64()), "double free of {frame}");
            });
        }
        // Everything the arena handed out belongs to the user tree here.
        assert_eq!(freed.len(), allocated);
    }
}
