//! Page Attribute Table programming.
//!
//! Entry 1 (selected by a PTE with PWT set and PCD clear) is repointed from
//! its power-on Write-Through type to Write-Combining, which is what the
//! `map_wc` page profile relies on for fast framebuffer stores.

use super::msr;

const PAT_UC: u64 = 0x00;
const PAT_WC: u64 = 0x01;
const PAT_WT: u64 = 0x04;
const PAT_WB: u64 = 0x06;
const PAT_UC_MINUS: u64 = 0x07;

/// Programs the PAT: entry 1 becomes WC, the rest keep their conventional
/// types.
///
/// # Safety
///
/// Must run after paging init and before the first WC mapping is touched;
/// changing memory types under live mappings requires a TLB flush, which
/// the caller performs.
pub unsafe fn init() {
    let pat = PAT_WB
        | (PAT_WC << 8) // entry 1: WC (power-on default is WT)
        | (PAT_UC_MINUS << 16)
        | (PAT_UC << 24)
        | (PAT_WB << 32)
        | (PAT_WT << 40)
        | (PAT_UC_MINUS << 48)
        | (PAT_UC << 56);
    // SAFETY: Forwarded caller contract; the value encodes valid types.
    unsafe { msr::wrmsr(msr::IA32_PAT, pat) };
    crate::kinfo!("pat: entry 1 reprogrammed to write-combining");
}
