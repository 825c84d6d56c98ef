//! Memory syscalls: the user heap bump allocator and framebuffer mapping.

use zenith_core::{PAGE_SIZE, PhysAddr, VirtAddr};

use crate::mm::paging::{self, PageWalker};
use crate::mm::{hhdm, pfa};
use crate::proc::sched;
use crate::syscall::abi::FbInfo;
use crate::syscall::errno::{EFAULT, ENOMEM};
use crate::syscall::userptr::UserPtr;

/// Maps `pages` fresh zeroed pages at the calling process's heap cursor and
/// bumps it. Returns the user virtual base address.
pub(crate) fn alloc_user_pages(pages: usize) -> Result<u64, isize> {
    map_frames_at_heap(pages, None, paging::user_flags())
}

/// Maps `pages` pages at the heap cursor. When `frames` is `None`, fresh
/// zeroed frames are allocated; otherwise the given frames are mapped (used
/// for window buffers and the framebuffer).
pub(crate) fn map_frames_at_heap(
    pages: usize,
    frames: Option<&[PhysAddr]>,
    flags: paging::PageTableFlags,
) -> Result<u64, isize> {
    if pages == 0 {
        return Err(-EFAULT);
    }
    let walker = PageWalker::new(hhdm::offset());

    let (pml4, base) = sched::with_sched(|sched| {
        let current = sched.current as u32;
        let process = sched.table.get_mut(current).expect("current process is live");
        let base = process.heap_next;
        process.heap_next += (pages * PAGE_SIZE) as u64;
        (process.pml4, base)
    });

    pfa::with_pfa(|pool| {
        for i in 0..pages {
            let frame = match frames {
                Some(frames) => *frames.get(i).ok_or(-EFAULT)?,
                None => pool.allocate_zeroed().map_err(|_| -ENOMEM)?,
            };
            let virt = VirtAddr::new_truncate(base + (i * PAGE_SIZE) as u64);
            let mut alloc = || {
                pool.allocate_zeroed()
                    .expect("page pool exhausted while extending a user heap")
            };
            // SAFETY: The target PML4 belongs to the current process; the
            // frames are exclusively owned by this mapping.
            unsafe { walker.map(pml4, virt, frame, flags, &mut alloc) };
        }
        Ok(())
    })?;

    // The mapping targets the live address space.
    paging::flush_tlb();
    Ok(base)
}

/// `SYS_ALLOC`: rounds up to whole pages, maps them, returns the user VA
/// (0 on failure, matching the original contract).
pub fn sys_alloc(size: usize) -> isize {
    let size = size.max(1);
    let pages = size.div_ceil(PAGE_SIZE);
    match alloc_user_pages(pages) {
        Ok(va) => va as isize,
        Err(_) => 0,
    }
}

/// `SYS_FREE`: intentionally a no-op — user pages are reclaimed only at
/// process teardown.
pub fn sys_free(_ptr: usize) -> isize {
    0
}

/// `SYS_FBINFO`: fills the caller's [`FbInfo`] with the boot framebuffer
/// geometry.
pub fn sys_fbinfo(info_ptr: usize) -> isize {
    let Ok(user_info) = UserPtr::<FbInfo>::new(info_ptr) else {
        return -EFAULT;
    };
    let Some(fb) = crate::boot::framebuffer() else {
        return -EFAULT;
    };
    let fb_user_base = sched::with_sched(|sched| {
        let current = sched.current as u32;
        sched.table.get(current).map_or(0, |p| p.fb_user_base)
    });

    let info = FbInfo {
        width: u64::from(fb.width),
        height: u64::from(fb.height),
        pitch: u64::from(fb.pitch),
        bpp: u64::from(fb.bpp),
        user_addr: fb_user_base,
    };
    // SAFETY: Pointer validated; the caller's address space is active.
    unsafe { user_info.write(info) };
    0
}

/// `SYS_FBMAP`: maps the framebuffer into the caller write-combined and
/// returns the user VA.
pub fn sys_fbmap() -> isize {
    // Already mapped? Hand back the same address.
    let existing = sched::with_sched(|sched| {
        let current = sched.current as u32;
        sched.table.get(current).map_or(0, |p| p.fb_user_base)
    });
    if existing != 0 {
        return existing as isize;
    }

    let Some(fb) = crate::boot::framebuffer() else {
        return -EFAULT;
    };
    let bytes = fb.pitch as usize * fb.height as usize;
    let pages = bytes.div_ceil(PAGE_SIZE);

    let frames: alloc::vec::Vec<PhysAddr> = (0..pages)
        .map(|i| fb.phys_base + (i * PAGE_SIZE) as u64)
        .collect();

    match map_frames_at_heap(pages, Some(&frames), paging::user_flags() | paging::wc_flags()) {
        Ok(va) => {
            sched::with_sched(|sched| {
                let current = sched.current as u32;
                if let Some(process) = sched.table.get_mut(current) {
                    process.fb_user_base = va;
                }
            });
            va as isize
        }
        Err(e) => e,
    }
}
