//! GDT and TSS.
//!
//! The selector order is load-bearing: `SYSRET` derives its selectors from
//! `STAR[63:48]` as SS = base + 8 and CS = base + 16, so user *data* must
//! sit just below user *code*:
//!
//! | selector | segment |
//! |----------|---------|
//! | 0x08 | kernel code |
//! | 0x10 | kernel data |
//! | 0x18 | user data |
//! | 0x20 | user code |
//! | 0x28 | TSS (16-byte descriptor) |

use core::cell::UnsafeCell;

use zenith_core::sync::LazyLock;

/// Kernel code selector.
pub const KERNEL_CS: u16 = 0x08;

/// Kernel data selector.
pub const KERNEL_DS: u16 = 0x10;

/// User data selector (RPL 3).
pub const USER_DS: u16 = 0x18 | 3;

/// User code selector (RPL 3).
pub const USER_CS: u16 = 0x20 | 3;

/// TSS selector.
pub const TSS_SEL: u16 = 0x28;

// 64-bit segment descriptors (base/limit ignored in long mode).
const KERNEL_CODE_DESC: u64 = 0x00209B00_00000000;
const KERNEL_DATA_DESC: u64 = 0x00009300_00000000;
const USER_DATA_DESC: u64 = 0x0000F300_00000000;
const USER_CODE_DESC: u64 = 0x0020FB00_00000000;

/// 64-bit Task State Segment.
#[derive(Debug, Clone, Copy)]
#[repr(C, packed(4))]
pub struct TaskStateSegment {
    reserved_0: u32,
    /// Stack pointers loaded on ring transitions (RSP0..RSP2).
    pub privilege_stack_table: [u64; 3],
    reserved_1: u64,
    /// Interrupt stack table (IST1..IST7).
    pub interrupt_stack_table: [u64; 7],
    reserved_2: u64,
    reserved_3: u16,
    /// Offset of the I/O permission bitmap; pointing it at the TSS size
    /// disables per-port permissions entirely.
    pub iopb_offset: u16,
}

impl TaskStateSegment {
    /// A zeroed TSS with the I/O bitmap disabled.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            reserved_0: 0,
            privilege_stack_table: [0; 3],
            reserved_1: 0,
            interrupt_stack_table: [0; 7],
            reserved_2: 0,
            reserved_3: 0,
            iopb_offset: core::mem::size_of::<TaskStateSegment>() as u16,
        }
    }
}

impl Default for TaskStateSegment {
    fn default() -> Self {
        Self::new()
    }
}

struct SyncTss(UnsafeCell<TaskStateSegment>);

// SAFETY: RSP0 is the only mutated field, written with interrupts disabled
// during context switches; the CPU reads the TSS from memory on ring
// transitions and does not race with those writes.
unsafe impl Sync for SyncTss {}

static TSS: SyncTss = SyncTss(UnsafeCell::new(TaskStateSegment::new()));

/// The GDT image: null, four segments, and a 16-byte TSS descriptor.
#[repr(C, align(8))]
struct Gdt {
    entries: [u64; 7],
}

static GDT: LazyLock<Gdt> = LazyLock::new(|| {
    let tss_base = TSS.0.get() as u64;
    let tss_limit = (core::mem::size_of::<TaskStateSegment>() - 1) as u64;

    // 16-byte system descriptor, type 0x9 (available 64-bit TSS).
    let tss_low = tss_limit
        | ((tss_base & 0xFF_FFFF) << 16)
        | (0x89u64 << 40)
        | (((tss_base >> 24) & 0xFF) << 56);
    let tss_high = tss_base >> 32;

    Gdt {
        entries: [
            0,
            KERNEL_CODE_DESC,
            KERNEL_DATA_DESC,
            USER_DATA_DESC,
            USER_CODE_DESC,
            tss_low,
            tss_high,
        ],
    }
});

#[repr(C, packed)]
struct DescriptorTablePointer {
    limit: u16,
    base: u64,
}

/// Loads the GDT, reloads every segment register, and loads the task
/// register.
///
/// # Safety
///
/// Must run once during early boot with interrupts disabled; the far
/// return to reload CS assumes the selector layout above.
pub unsafe fn init() {
    let pointer = DescriptorTablePointer {
        limit: (core::mem::size_of::<Gdt>() - 1) as u16,
        base: GDT.entries.as_ptr() as u64,
    };

    // SAFETY: The GDT is 'static and the selectors match its layout.
    unsafe {
        core::arch::asm!(
            "lgdt [{ptr}]",
            // Reload CS via far return.
            "lea {tmp}, [rip + 2f]",
            "push {cs}",
            "push {tmp}",
            "retfq",
            "2:",
            // Data segments.
            "mov ds, {ds:x}",
            "mov es, {ds:x}",
            "mov ss, {ds:x}",
            "xor eax, eax",
            "mov fs, ax",
            "mov gs, ax",
            // Task register.
            "ltr {tss:x}",
            ptr = in(reg) &pointer,
            tmp = out(reg) _,
            cs = in(reg) u64::from(KERNEL_CS),
            ds = in(reg) u32::from(KERNEL_DS),
            tss = in(reg) u32::from(TSS_SEL),
            out("rax") _,
        );
    }

    crate::kdebug!("gdt: loaded, tss at selector {TSS_SEL:#x}");
}

/// Updates RSP0, the stack the CPU switches to on a ring 3 → 0 transition.
/// Takes effect immediately; no TR reload is needed.
///
/// # Safety
///
/// `rsp` must be the top of a mapped kernel stack; call with interrupts
/// disabled.
pub unsafe fn set_tss_rsp0(rsp: u64) {
    // SAFETY: See `SyncTss`.
    unsafe {
        (*TSS.0.get()).privilege_stack_table[0] = rsp;
    }
}
