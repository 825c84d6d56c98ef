//! Multiple APIC Description Table (MADT) parsing.
//!
//! The MADT enumerates the interrupt controller topology: local APICs,
//! I/O APICs, ISA interrupt source overrides, and NMI wiring.

use crate::sdt::{self, SdtHeader};
use crate::{AcpiError, AcpiHandler};

/// MADT table signature.
pub const MADT_SIGNATURE: &[u8; 4] = b"APIC";

/// Size of the fixed MADT fields after the SDT header (LAPIC address + flags).
const MADT_FIELDS_SIZE: usize = 8;

/// Parsed MADT table.
pub struct Madt {
    /// Physical address of the local APIC register block.
    pub local_apic_address: u32,
    /// MADT flags (bit 0: dual 8259 PICs installed).
    pub flags: u32,
    /// Byte slice covering the variable entry records.
    entries_data: &'static [u8],
}

impl Madt {
    /// Parses a MADT from the given physical address.
    ///
    /// # Errors
    ///
    /// Returns [`AcpiError::InvalidChecksum`], [`AcpiError::InvalidSignature`],
    /// or [`AcpiError::TruncatedData`] if the table is malformed.
    pub fn parse(handler: &impl AcpiHandler, phys: u64) -> Result<Self, AcpiError> {
        let table = sdt::load_table(handler, phys, MADT_SIGNATURE)?;

        let local_apic_address =
            sdt::read_u32(table.data, SdtHeader::SIZE).ok_or(AcpiError::TruncatedData)?;
        let flags =
            sdt::read_u32(table.data, SdtHeader::SIZE + 4).ok_or(AcpiError::TruncatedData)?;

        let entries_offset = SdtHeader::SIZE + MADT_FIELDS_SIZE;
        let entries_data = table.data.get(entries_offset..).unwrap_or(&[]);

        Ok(Self {
            local_apic_address,
            flags,
            entries_data,
        })
    }

    /// Returns an iterator over the interrupt controller entries.
    #[must_use]
    pub fn entries(&self) -> MadtEntryIter<'_> {
        MadtEntryIter {
            data: self.entries_data,
        }
    }
}

/// A single MADT interrupt controller structure entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MadtEntry {
    /// Type 0: Processor Local APIC.
    LocalApic {
        /// ACPI processor UID.
        acpi_processor_id: u8,
        /// The processor's local APIC ID.
        apic_id: u8,
        /// Flags (bit 0: enabled, bit 1: online capable).
        flags: u32,
    },
    /// Type 1: I/O APIC.
    IoApic {
        /// The I/O APIC ID.
        io_apic_id: u8,
        /// Physical address of the I/O APIC registers.
        io_apic_address: u32,
        /// Global System Interrupt base served by this I/O APIC.
        gsi_base: u32,
    },
    /// Type 2: Interrupt Source Override (ISA IRQ → GSI remap).
    InterruptSourceOverride {
        /// Bus (always 0, ISA).
        bus: u8,
        /// ISA source IRQ number.
        source: u8,
        /// Global System Interrupt this source is routed to.
        gsi: u32,
        /// MPS INTI flags (polarity bits 0-1, trigger mode bits 2-3).
        flags: u16,
    },
    /// Type 4: Local APIC NMI.
    LocalApicNmi {
        /// ACPI processor UID (0xFF = all processors).
        acpi_processor_id: u8,
        /// MPS INTI flags.
        flags: u16,
        /// Local APIC LINT pin (0 or 1).
        lint: u8,
    },
    /// Type 5: Local APIC Address Override (64-bit LAPIC base).
    LocalApicAddressOverride {
        /// 64-bit physical address of the local APIC.
        address: u64,
    },
    /// An entry type we do not decode.
    Unknown {
        /// The entry type byte.
        entry_type: u8,
        /// Total entry length including the 2-byte header.
        length: u8,
    },
}

/// Iterator over MADT entry records.
pub struct MadtEntryIter<'a> {
    data: &'a [u8],
}

impl Iterator for MadtEntryIter<'_> {
    type Item = MadtEntry;

    fn next(&mut self) -> Option<MadtEntry> {
        if self.data.len() < 2 {
            return None;
        }
        let entry_type = self.data[0];
        let length = self.data[1] as usize;
        // A zero or short length would loop forever; stop parsing instead.
        if length < 2 || length > self.data.len() {
            self.data = &[];
            return None;
        }

        let record = &self.data[..length];
        self.data = &self.data[length..];

        let entry = match entry_type {
            0 if length >= 8 => MadtEntry::LocalApic {
                acpi_processor_id: record[2],
                apic_id: record[3],
                flags: sdt::read_u32(record, 4)?,
            },
            1 if length >= 12 => MadtEntry::IoApic {
                io_apic_id: record[2],
                io_apic_address: sdt::read_u32(record, 4)?,
                gsi_base: sdt::read_u32(record, 8)?,
            },
            2 if length >= 10 => MadtEntry::InterruptSourceOverride {
                bus: record[2],
                source: record[3],
                gsi: sdt::read_u32(record, 4)?,
                flags: sdt::read_u16(record, 8)?,
            },
            4 if length >= 6 => MadtEntry::LocalApicNmi {
                acpi_processor_id: record[2],
                flags: sdt::read_u16(record, 3)?,
                lint: record[5],
            },
            5 if length >= 12 => MadtEntry::LocalApicAddressOverride {
                address: sdt::read_u64(record, 4)?,
            },
            _ => MadtEntry::Unknown {
                entry_type,
                length: length as u8,
            },
        };
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iter(data: &[u8]) -> MadtEntryIter<'_> {
        MadtEntryIter { data }
    }

    #[test]
    fn empty_entries() {
        assert_eq!(iter(&[]).count(), 0);
    }

    #[test]
    fn zero_length_terminates() {
        // A corrupt zero-length record must not loop forever.
        let data = [0u8, 0, 1, 2, 3];
        assert_eq!(iter(&data).count(), 0);
    }

    #[test]
    fn lapic_address_override() {
        let mut data = vec![5u8, 12, 0, 0];
        data.extend_from_slice(&0x0000_000F_EE00_0000u64.to_le_bytes());
        let entries: Vec<_> = iter(&data).collect();
        assert_eq!(
            entries,
            vec![MadtEntry::LocalApicAddressOverride {
                address: 0x0000_000F_EE00_0000
            }]
        );
    }

    #[test]
    fn unknown_type_skipped_by_length() {
        // Type 9 (x2APIC) is not decoded but must be skipped correctly.
        let mut data = vec![9u8, 16];
        data.extend_from_slice(&[0u8; 14]);
        data.extend_from_slice(&[4, 6, 0xFF, 0x05, 0x00, 1]); // LocalApicNmi
        let entries: Vec<_> = iter(&data).collect();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], MadtEntry::Unknown { entry_type: 9, length: 16 }));
        assert_eq!(
            entries[1],
            MadtEntry::LocalApicNmi {
                acpi_processor_id: 0xFF,
                flags: 5,
                lint: 1
            }
        );
    }

    #[test]
    fn truncated_record_stops() {
        // Claimed length exceeds remaining bytes.
        let data = [1u8, 12, 0, 0];
        assert_eq!(iter(&data).count(), 0);
    }
}
