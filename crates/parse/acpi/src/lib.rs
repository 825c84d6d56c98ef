//! `zenith-acpi` — a standalone, `no_std` ACPI table parser.
//!
//! Parses the discovery chain the kernel needs during early boot:
//! RSDP → XSDT → per-signature SDTs, and the MADT interrupt topology.
//! Tables are read through an [`AcpiHandler`] that maps physical memory on
//! demand (identity map, HHDM, or a test arena — the crate is agnostic).
//!
//! Packed firmware structures are never transmuted; every field is read
//! through explicit little-endian byte accessors so the parser is safe on
//! arbitrary input.

#![cfg_attr(not(test), no_std)]

pub mod madt;
pub mod sdt;

pub use madt::{Madt, MadtEntry};
pub use sdt::SdtHeader;

/// Errors that can occur during ACPI table parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcpiError {
    /// A table or RSDP checksum did not sum to zero.
    InvalidChecksum,
    /// A table signature did not match the expected value.
    InvalidSignature,
    /// The RSDP reports revision < 2 (RSDT-only firmware, not supported).
    UnsupportedRevision,
    /// No table with the requested signature exists in the XSDT.
    TableNotFound,
    /// A table or structure was too short for the expected data.
    TruncatedData,
}

impl core::fmt::Display for AcpiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidChecksum => write!(f, "table checksum invalid"),
            Self::InvalidSignature => write!(f, "table signature mismatch"),
            Self::UnsupportedRevision => write!(f, "RSDP revision < 2 (no XSDT)"),
            Self::TableNotFound => write!(f, "table not present in XSDT"),
            Self::TruncatedData => write!(f, "table truncated"),
        }
    }
}

/// Maps physical memory regions so ACPI tables can be read.
///
/// # Safety
///
/// Implementors must return a slice that is valid and readable for the
/// requested `size` bytes and remains valid for `'static`.
pub unsafe trait AcpiHandler {
    /// Map `size` bytes of physical memory starting at `phys`.
    ///
    /// # Safety
    ///
    /// The caller guarantees `phys` is an ACPI-reported physical address.
    unsafe fn map_physical_region(&self, phys: u64, size: usize) -> &'static [u8];
}

/// Byte offset of the XSDT address field inside the RSDP.
const RSDP_XSDT_ADDR_OFFSET: usize = 24;
/// Length of the ACPI 1.0 part of the RSDP covered by the first checksum.
const RSDP_V1_LEN: usize = 20;
/// Length of the ACPI 2.0+ RSDP covered by the extended checksum.
const RSDP_V2_LEN: usize = 36;

/// Collection of ACPI tables discovered via the RSDP.
#[derive(Debug)]
pub struct AcpiTables<H: AcpiHandler> {
    handler: H,
    xsdt_addr: u64,
}

impl<H: AcpiHandler> AcpiTables<H> {
    /// Discover and validate the table hierarchy starting from the RSDP.
    ///
    /// Validates both RSDP checksums and requires revision ≥ 2 so that the
    /// 64-bit XSDT pointer is present.
    ///
    /// # Errors
    ///
    /// Returns an [`AcpiError`] if the RSDP is malformed or pre-2.0.
    pub fn new(rsdp_phys: u64, handler: H) -> Result<Self, AcpiError> {
        // SAFETY: rsdp_phys comes from the bootloader's RSDP report.
        let rsdp = unsafe { handler.map_physical_region(rsdp_phys, RSDP_V2_LEN) };
        if rsdp.len() < RSDP_V2_LEN {
            return Err(AcpiError::TruncatedData);
        }
        if &rsdp[0..8] != b"RSD PTR " {
            return Err(AcpiError::InvalidSignature);
        }
        if !sdt::validate_checksum(&rsdp[..RSDP_V1_LEN]) {
            return Err(AcpiError::InvalidChecksum);
        }
        let revision = rsdp[15];
        if revision < 2 {
            return Err(AcpiError::UnsupportedRevision);
        }
        if !sdt::validate_checksum(&rsdp[..RSDP_V2_LEN]) {
            return Err(AcpiError::InvalidChecksum);
        }
        let xsdt_addr = sdt::read_u64(rsdp, RSDP_XSDT_ADDR_OFFSET).ok_or(AcpiError::TruncatedData)?;

        // Validate the XSDT itself up front; entries are walked lazily.
        sdt::load_table(&handler, xsdt_addr, b"XSDT")?;

        Ok(Self { handler, xsdt_addr })
    }

    /// Searches the XSDT for a table with the given 4-byte signature.
    ///
    /// Each candidate's own header signature is compared; the physical
    /// address of the first match is returned.
    #[must_use]
    pub fn find_table(&self, signature: &[u8; 4]) -> Option<u64> {
        let xsdt = sdt::load_table(&self.handler, self.xsdt_addr, b"XSDT").ok()?;
        let entries = &xsdt.data[SdtHeader::SIZE..];
        for chunk in entries.chunks_exact(8) {
            let phys = u64::from_le_bytes(chunk.try_into().ok()?);
            // SAFETY: The address comes from the validated XSDT entry list.
            let header_data = unsafe { self.handler.map_physical_region(phys, SdtHeader::SIZE) };
            if let Some(header) = SdtHeader::read(header_data) {
                if &header.signature == signature {
                    return Some(phys);
                }
            }
        }
        None
    }

    /// Parses and returns the MADT (Multiple APIC Description Table).
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::TableNotFound`] if no MADT exists, or another
    /// variant if the table is malformed.
    pub fn madt(&self) -> Result<Madt, AcpiError> {
        let phys = self
            .find_table(madt::MADT_SIGNATURE)
            .ok_or(AcpiError::TableNotFound)?;
        Madt::parse(&self.handler, phys)
    }

    /// Returns the physical address of the XSDT.
    #[must_use]
    pub fn xsdt_addr(&self) -> u64 {
        self.xsdt_addr
    }

    /// Returns a reference to the underlying [`AcpiHandler`].
    #[must_use]
    pub fn handler(&self) -> &H {
        &self.handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test handler: "physical" addresses index into a leaked arena.
    #[derive(Debug)]
    struct ArenaHandler(&'static [u8]);

    // SAFETY: The arena is leaked, so slices into it are 'static.
    unsafe impl AcpiHandler for ArenaHandler {
        unsafe fn map_physical_region(&self, phys: u64, size: usize) -> &'static [u8] {
            let start = usize::try_from(phys).unwrap();
            &self.0[start..(start + size).min(self.0.len())]
        }
    }

    fn checksum_fix(table: &mut [u8], checksum_at: usize) {
        table[checksum_at] = 0;
        let sum: u8 = table.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        table[checksum_at] = (!sum).wrapping_add(1);
    }

    fn build_sdt(signature: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut table = vec![0u8; SdtHeader::SIZE + payload.len()];
        table[0..4].copy_from_slice(signature);
        let len = u32::try_from(table.len()).unwrap();
        table[4..8].copy_from_slice(&len.to_le_bytes());
        table[8] = 2; // revision
        table[SdtHeader::SIZE..].copy_from_slice(payload);
        checksum_fix(&mut table, 9);
        table
    }

    /// Builds an arena with RSDP at 0, XSDT at 0x100, and one SDT at 0x200.
    fn build_arena(sdt_sig: &[u8; 4], sdt_payload: &[u8]) -> &'static [u8] {
        let mut arena = vec![0u8; 0x1000];

        // RSDP at offset 0.
        arena[0..8].copy_from_slice(b"RSD PTR ");
        arena[15] = 2; // revision
        arena[24..32].copy_from_slice(&0x100u64.to_le_bytes());
        // First checksum covers bytes 0..20, extended covers 0..36.
        let sum20: u8 = arena[..20].iter().fold(0u8, |a, b| a.wrapping_add(*b));
        arena[8] = (!sum20).wrapping_add(1);
        let sum36: u8 = arena[..36].iter().fold(0u8, |a, b| a.wrapping_add(*b));
        arena[32] = (!sum36).wrapping_add(1);

        // XSDT at 0x100 with one entry pointing at 0x200.
        let xsdt = build_sdt(b"XSDT", &0x200u64.to_le_bytes());
        arena[0x100..0x100 + xsdt.len()].copy_from_slice(&xsdt);

        // The SDT under test at 0x200.
        let sdt = build_sdt(sdt_sig, sdt_payload);
        arena[0x200..0x200 + sdt.len()].copy_from_slice(&sdt);

        Vec::leak(arena)
    }

    #[test]
    fn rsdp_discovery_finds_table() {
        let arena = build_arena(b"APIC", &[0u8; 8]);
        let tables = AcpiTables::new(0, ArenaHandler(arena)).unwrap();
        assert_eq!(tables.xsdt_addr(), 0x100);
        assert_eq!(tables.find_table(b"APIC"), Some(0x200));
        assert_eq!(tables.find_table(b"HPET"), None);
    }

    #[test]
    fn rsdp_rejects_revision_1() {
        let arena = build_arena(b"APIC", &[0u8; 8]).to_vec();
        let mut arena = arena;
        arena[15] = 0;
        let sum20: u8 = arena[..20]
            .iter()
            .enumerate()
            .fold(0u8, |a, (i, b)| if i == 8 { a } else { a.wrapping_add(*b) });
        arena[8] = (!sum20).wrapping_add(1);
        let err = AcpiTables::new(0, ArenaHandler(Vec::leak(arena))).unwrap_err();
        assert_eq!(err, AcpiError::UnsupportedRevision);
    }

    #[test]
    fn rsdp_rejects_bad_signature() {
        let arena = build_arena(b"APIC", &[0u8; 8]).to_vec();
        let mut arena = arena;
        arena[0] = b'X';
        let err = AcpiTables::new(0, ArenaHandler(Vec::leak(arena))).unwrap_err();
        assert_eq!(err, AcpiError::InvalidSignature);
    }

    #[test]
    fn rsdp_rejects_bad_checksum() {
        let arena = build_arena(b"APIC", &[0u8; 8]).to_vec();
        let mut arena = arena;
        arena[16] = arena[16].wrapping_add(1); // corrupt OEM id byte
        let err = AcpiTables::new(0, ArenaHandler(Vec::leak(arena))).unwrap_err();
        assert_eq!(err, AcpiError::InvalidChecksum);
    }

    #[test]
    fn madt_parses_topology() {
        // MADT payload: lapic address + flags, then entries.
        let mut payload = Vec::new();
        payload.extend_from_slice(&0xFEE0_0000u32.to_le_bytes());
        payload.extend_from_slice(&1u32.to_le_bytes()); // PCAT_COMPAT
        // Type 0: Local APIC (processor 0, apic id 0, enabled).
        payload.extend_from_slice(&[0, 8, 0, 0, 1, 0, 0, 0]);
        // Type 1: I/O APIC (id 1, addr 0xFEC0_0000, gsi base 0).
        payload.extend_from_slice(&[1, 12, 1, 0]);
        payload.extend_from_slice(&0xFEC0_0000u32.to_le_bytes());
        payload.extend_from_slice(&0u32.to_le_bytes());
        // Type 2: ISO (bus 0, irq 0 -> gsi 2, flags 0).
        payload.extend_from_slice(&[2, 10, 0, 0]);
        payload.extend_from_slice(&2u32.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());

        let arena = build_arena(b"APIC", &payload);
        let tables = AcpiTables::new(0, ArenaHandler(arena)).unwrap();
        let madt = tables.madt().unwrap();
        assert_eq!(madt.local_apic_address, 0xFEE0_0000);

        let entries: Vec<_> = madt.entries().collect();
        assert_eq!(entries.len(), 3);
        assert!(matches!(
            entries[0],
            MadtEntry::LocalApic { apic_id: 0, flags: 1, .. }
        ));
        assert!(matches!(
            entries[1],
            MadtEntry::IoApic { io_apic_address: 0xFEC0_0000, gsi_base: 0, .. }
        ));
        assert!(matches!(
            entries[2],
            MadtEntry::InterruptSourceOverride { source: 0, gsi: 2, .. }
        ));
    }
}
