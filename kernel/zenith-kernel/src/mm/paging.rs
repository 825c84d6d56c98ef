//! 4-level page tables and the virtual memory walker.
//!
//! [`PageWalker`] builds and walks PML4 → PDPT → PD → PT hierarchies through
//! the HHDM: intermediate helpers take and return *physical* table
//! addresses, translating to virtual only at the moment of access. Four
//! attribute profiles are used (normal kernel, MMIO, write-combining, user);
//! the WC profile selects PAT entry 1, which boot reprograms from
//! Write-Through to Write-Combining so framebuffer stores burst.

use zenith_core::{PAGE_SIZE, PhysAddr, VirtAddr};

/// Physical address mask of a page table entry: bits 12..51.
pub const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

bitflags::bitflags! {
    /// Page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageTableFlags: u64 {
        /// Entry is present.
        const PRESENT       = 1 << 0;
        /// Page is writable.
        const WRITABLE      = 1 << 1;
        /// Page is accessible from ring 3.
        const USER          = 1 << 2;
        /// Write-through caching (PWT).
        const WRITE_THROUGH = 1 << 3;
        /// Cache disable (PCD).
        const CACHE_DISABLE = 1 << 4;
        /// Set by the CPU on access.
        const ACCESSED      = 1 << 5;
        /// Set by the CPU on write.
        const DIRTY         = 1 << 6;
        /// PS bit in directories; PAT low bit in a 4 KiB PTE.
        const PAGE_SIZE     = 1 << 7;
        /// Global page.
        const GLOBAL        = 1 << 8;
        /// No-execute (requires EFER.NXE).
        const NO_EXECUTE    = 1 << 63;
    }
}

bitflags::bitflags! {
    /// Page-fault error code pushed by the CPU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultCode: u64 {
        /// 1 = protection violation, 0 = non-present page.
        const PRESENT           = 1 << 0;
        /// Fault was caused by a write.
        const WRITE             = 1 << 1;
        /// Fault occurred in user mode.
        const USER              = 1 << 2;
        /// A reserved bit was set in a paging structure.
        const RESERVED_WRITE    = 1 << 3;
        /// Fault was an instruction fetch.
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

/// Flag profile for normal kernel mappings: cacheable, supervisor, writable.
#[must_use]
pub fn kernel_flags() -> PageTableFlags {
    PageTableFlags::PRESENT | PageTableFlags::WRITABLE
}

/// Flag profile for device registers: cache-disable + write-through selects
/// PAT entry 3 (UC).
#[must_use]
pub fn mmio_flags() -> PageTableFlags {
    PageTableFlags::PRESENT
        | PageTableFlags::WRITABLE
        | PageTableFlags::CACHE_DISABLE
        | PageTableFlags::WRITE_THROUGH
}

/// Flag profile for the framebuffer: write-through alone selects PAT entry 1,
/// which boot reprograms to Write-Combining.
#[must_use]
pub fn wc_flags() -> PageTableFlags {
    PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::WRITE_THROUGH
}

/// Flag profile for user pages.
#[must_use]
pub fn user_flags() -> PageTableFlags {
    PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER
}

/// A single 64-bit page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// An empty (non-present) entry.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates an entry pointing at `phys` with `flags`.
    #[must_use]
    pub const fn new(phys: PhysAddr, flags: PageTableFlags) -> Self {
        Self((phys.as_u64() & ADDR_MASK) | flags.bits())
    }

    /// Returns `true` if the present bit is set.
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0 & 1 != 0
    }

    /// Returns the physical address stored in the entry.
    #[must_use]
    pub const fn address(self) -> PhysAddr {
        // SAFETY: The masked value fits in 52 bits by construction.
        unsafe { PhysAddr::new_unchecked(self.0 & ADDR_MASK) }
    }

    /// Returns the flag bits of the entry.
    #[must_use]
    pub const fn flags(self) -> PageTableFlags {
        PageTableFlags::from_bits_truncate(self.0 & !ADDR_MASK)
    }
}

/// A 4 KiB-aligned table of 512 entries.
#[repr(C, align(4096))]
pub struct PageTable {
    /// The table's 512 entries.
    pub entries: [PageTableEntry; 512],
}

impl PageTable {
    /// Clears every entry.
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::empty());
    }
}

/// Builds and walks page tables through the HHDM.
///
/// Frame allocation is injected so the walker stays independent of the
/// global PFA (and host-testable against an arena).
pub struct PageWalker {
    hhdm_offset: u64,
}

impl PageWalker {
    /// Creates a walker using `hhdm_offset` for physical access.
    #[must_use]
    pub fn new(hhdm_offset: u64) -> Self {
        Self { hhdm_offset }
    }

    /// Returns a mutable reference to the table at physical `phys`.
    ///
    /// # Safety
    ///
    /// `phys` must be a 4 KiB-aligned page table reachable through the HHDM,
    /// with no aliasing references live.
    #[allow(clippy::mut_from_ref)]
    unsafe fn table_at(&self, phys: PhysAddr) -> &mut PageTable {
        unsafe { &mut *((self.hhdm_offset + phys.as_u64()) as *mut PageTable) }
    }

    /// Allocates a fresh zeroed table via `alloc`.
    fn new_table(&self, alloc: &mut dyn FnMut() -> PhysAddr) -> PhysAddr {
        let frame = alloc();
        // SAFETY: The frame was just allocated for us; zeroing prevents
        // stale bytes from reading as present entries.
        unsafe {
            core::ptr::write_bytes((self.hhdm_offset + frame.as_u64()) as *mut u8, 0, PAGE_SIZE);
        }
        frame
    }

    /// Ensures `table[index]` points at a next-level table, creating one if
    /// absent. Returns the next level's physical address.
    ///
    /// Existing entries have any missing `intermediate` flags OR'd in, so a
    /// user mapping under a formerly kernel-only subtree becomes reachable.
    unsafe fn handle_level(
        &self,
        table_phys: PhysAddr,
        index: usize,
        intermediate: PageTableFlags,
        alloc: &mut dyn FnMut() -> PhysAddr,
    ) -> PhysAddr {
        // SAFETY: Caller passes a valid table; the reference dies before we
        // recurse into the next level.
        let table = unsafe { self.table_at(table_phys) };
        let entry = table.entries[index];

        if entry.is_present() {
            let combined = entry.flags() | intermediate;
            if combined != entry.flags() {
                table.entries[index] = PageTableEntry::new(entry.address(), combined);
            }
            entry.address()
        } else {
            let frame = self.new_table(alloc);
            table.entries[index] = PageTableEntry::new(frame, intermediate);
            frame
        }
    }

    /// Derives intermediate-table flags from a leaf profile: always present
    /// and writable, user-visible iff the leaf is.
    fn intermediate_for(flags: PageTableFlags) -> PageTableFlags {
        let mut intermediate = PageTableFlags::PRESENT | PageTableFlags::WRITABLE;
        if flags.contains(PageTableFlags::USER) {
            intermediate |= PageTableFlags::USER;
        }
        intermediate
    }

    /// Maps the 4 KiB page at `virt` to `phys` in the hierarchy rooted at
    /// `pml4_phys`, creating intermediate tables as needed.
    ///
    /// # Panics
    ///
    /// Panics if either address is not page-aligned; that is a programming
    /// error, not a recoverable condition.
    ///
    /// # Safety
    ///
    /// - `pml4_phys` must be a valid PML4 reachable through the HHDM.
    /// - `alloc` must return exclusive, HHDM-reachable 4 KiB frames.
    /// - The caller is responsible for TLB invalidation on live trees.
    pub unsafe fn map(
        &self,
        pml4_phys: PhysAddr,
        virt: VirtAddr,
        phys: PhysAddr,
        flags: PageTableFlags,
        alloc: &mut dyn FnMut() -> PhysAddr,
    ) {
        assert!(
            virt.is_aligned(PAGE_SIZE as u64) && phys.is_aligned(PAGE_SIZE as u64),
            "unaligned address passed to PageWalker::map"
        );

        let intermediate = Self::intermediate_for(flags);
        // SAFETY: Each level's table address comes from the validated parent.
        let pdpt = unsafe { self.handle_level(pml4_phys, virt.pml4_index(), intermediate, alloc) };
        let pd = unsafe { self.handle_level(pdpt, virt.pdpt_index(), intermediate, alloc) };
        let pt = unsafe { self.handle_level(pd, virt.pd_index(), intermediate, alloc) };

        // SAFETY: `pt` is the leaf table for this address.
        let leaf = unsafe { self.table_at(pt) };
        leaf.entries[virt.pt_index()] = PageTableEntry::new(phys, flags);
    }

    /// Translates `virt` through the hierarchy rooted at `pml4_phys`.
    ///
    /// Returns the physical address (frame plus page offset) or `None` if
    /// any level is non-present.
    ///
    /// # Safety
    ///
    /// `pml4_phys` must be a valid PML4 reachable through the HHDM.
    #[must_use]
    pub unsafe fn translate(&self, pml4_phys: PhysAddr, virt: VirtAddr) -> Option<PhysAddr> {
        let mut table_phys = pml4_phys;
        for index in [virt.pml4_index(), virt.pdpt_index(), virt.pd_index()] {
            // SAFETY: Walks only through validated present entries.
            let table = unsafe { self.table_at(table_phys) };
            let entry = table.entries[index];
            if !entry.is_present() {
                return None;
            }
            table_phys = entry.address();
        }

        // SAFETY: `table_phys` is the present leaf table.
        let leaf = unsafe { self.table_at(table_phys) };
        let entry = leaf.entries[virt.pt_index()];
        if !entry.is_present() {
            return None;
        }
        Some(PhysAddr::new(entry.address().as_u64() + virt.page_offset()))
    }

    /// Creates a user PML4 whose entries 256..511 alias the kernel half of
    /// `kernel_pml4`; the user half starts empty.
    ///
    /// # Safety
    ///
    /// `kernel_pml4` must be the live kernel PML4 and `alloc` must return
    /// exclusive, HHDM-reachable frames.
    pub unsafe fn create_user_pml4(
        &self,
        kernel_pml4: PhysAddr,
        alloc: &mut dyn FnMut() -> PhysAddr,
    ) -> PhysAddr {
        let new_pml4 = self.new_table(alloc);
        // SAFETY: Both tables are valid and distinct.
        let src = unsafe { self.table_at(kernel_pml4) };
        let dst = unsafe { self.table_at(new_pml4) };
        for i in crate::mm::layout::KERNEL_PML4_FIRST..512 {
            dst.entries[i] = src.entries[i];
        }
        new_pml4
    }

    /// Tears down the user half of the hierarchy rooted at `pml4_phys`,
    /// handing every mapped leaf frame, every intermediate table, and
    /// finally the PML4 itself to `free`, deepest first. Entries 256..511
    /// — the shared kernel half — are neither walked nor freed.
    ///
    /// # Safety
    ///
    /// - `pml4_phys` must root a user hierarchy (built by
    ///   [`Self::create_user_pml4`] and this walker's `map`) whose user
    ///   half the caller owns exclusively.
    /// - The hierarchy must not be the active CR3.
    pub unsafe fn free_user_space(&self, pml4_phys: PhysAddr, free: &mut dyn FnMut(PhysAddr)) {
        // SAFETY: The caller owns the tree; every table is read before it
        // is handed to `free`.
        let pml4 = unsafe { self.table_at(pml4_phys) };
        for pml4_slot in 0..crate::mm::layout::KERNEL_PML4_FIRST {
            let pdpt_entry = pml4.entries[pml4_slot];
            if !pdpt_entry.is_present() {
                continue;
            }
            // SAFETY: Present entries of an owned hierarchy point at valid
            // tables reachable through the HHDM.
            let pdpt = unsafe { self.table_at(pdpt_entry.address()) };
            for pdpt_slot in 0..512 {
                let pd_entry = pdpt.entries[pdpt_slot];
                if !pd_entry.is_present() {
                    continue;
                }
                // SAFETY: As above.
                let pd = unsafe { self.table_at(pd_entry.address()) };
                for pd_slot in 0..512 {
                    let pt_entry = pd.entries[pd_slot];
                    if !pt_entry.is_present() {
                        continue;
                    }
                    // SAFETY: As above.
                    let pt = unsafe { self.table_at(pt_entry.address()) };
                    for pt_slot in 0..512 {
                        let leaf = pt.entries[pt_slot];
                        if leaf.is_present() {
                            free(leaf.address());
                        }
                    }
                    free(pt_entry.address());
                }
                free(pd_entry.address());
            }
            free(pdpt_entry.address());
        }
        free(pml4_phys);
    }
}

// ---------------------------------------------------------------------------
// CR3 / TLB instructions (kernel target only)
// ---------------------------------------------------------------------------

/// Loads `pml4_phys` into CR3, switching address spaces and flushing
/// non-global TLB entries.
///
/// # Safety
///
/// The hierarchy must map all code and data the CPU touches next, including
/// the current instruction stream and stack.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub unsafe fn load_cr3(pml4_phys: PhysAddr) {
    // SAFETY: Forwarded caller contract.
    unsafe {
        core::arch::asm!("mov cr3, {}", in(reg) pml4_phys.as_u64(), options(nostack, preserves_flags));
    }
}

/// Reads the current CR3 (physical address of the active PML4).
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
#[must_use]
pub fn current_cr3() -> PhysAddr {
    let value: u64;
    // SAFETY: Reading CR3 has no side effects.
    unsafe {
        core::arch::asm!("mov {}, cr3", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    PhysAddr::new(value & ADDR_MASK)
}

/// Flushes the whole TLB by reloading CR3. The only invalidation used; there
/// are no shootdowns because only the boot CPU runs.
#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub fn flush_tlb() {
    // SAFETY: Rewriting CR3 with its current value only drops TLB entries.
    unsafe {
        core::arch::asm!(
            "mov rax, cr3",
            "mov cr3, rax",
            out("rax") _,
            options(nostack, preserves_flags)
        );
    }
}
