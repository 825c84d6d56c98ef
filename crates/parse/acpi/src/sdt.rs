//! System Description Table header, checksum, and field-access utilities.

use crate::{AcpiError, AcpiHandler};

/// Reads a little-endian `u16` at `offset`, if in bounds.
#[must_use]
pub fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Reads a little-endian `u32` at `offset`, if in bounds.
#[must_use]
pub fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads a little-endian `u64` at `offset`, if in bounds.
#[must_use]
pub fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    let bytes = data.get(offset..offset + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Some(u64::from_le_bytes(raw))
}

/// Standard 36-byte ACPI System Description Table header.
#[derive(Debug, Clone, Copy)]
pub struct SdtHeader {
    /// 4-byte ASCII signature identifying the table type.
    pub signature: [u8; 4],
    /// Total length of the table (header included) in bytes.
    pub length: u32,
    /// Revision of the table structure.
    pub revision: u8,
    /// Checksum byte; the whole table must sum to zero.
    pub checksum: u8,
}

impl SdtHeader {
    /// The size of an SDT header in bytes.
    pub const SIZE: usize = 36;

    /// Reads an [`SdtHeader`] from the start of a byte slice.
    ///
    /// Returns `None` if the slice is shorter than [`SdtHeader::SIZE`].
    #[must_use]
    pub fn read(data: &[u8]) -> Option<Self> {
        if data.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            signature: [data[0], data[1], data[2], data[3]],
            length: read_u32(data, 4)?,
            revision: data[8],
            checksum: data[9],
        })
    }
}

/// A mapped, checksum-validated ACPI table.
pub struct ValidatedTable {
    /// The validated header.
    pub header: SdtHeader,
    /// The full table data including the header.
    pub data: &'static [u8],
}

/// Maps and validates an ACPI table at `phys`.
///
/// Standard sequence: map the header to learn the length, verify the
/// signature, map the full table, validate the checksum.
///
/// # Errors
///
/// Returns [`AcpiError::TruncatedData`], [`AcpiError::InvalidSignature`], or
/// [`AcpiError::InvalidChecksum`].
pub fn load_table(
    handler: &impl AcpiHandler,
    phys: u64,
    expected_signature: &[u8; 4],
) -> Result<ValidatedTable, AcpiError> {
    // SAFETY: The caller provides a table address from the RSDP/XSDT chain.
    let header_data = unsafe { handler.map_physical_region(phys, SdtHeader::SIZE) };
    let header = SdtHeader::read(header_data).ok_or(AcpiError::TruncatedData)?;

    if &header.signature != expected_signature {
        return Err(AcpiError::InvalidSignature);
    }

    let total_len = header.length as usize;
    if total_len < SdtHeader::SIZE {
        return Err(AcpiError::TruncatedData);
    }

    // SAFETY: total_len comes from the header we just read.
    let data = unsafe { handler.map_physical_region(phys, total_len) };
    if data.len() < total_len {
        return Err(AcpiError::TruncatedData);
    }

    if !validate_checksum(&data[..total_len]) {
        return Err(AcpiError::InvalidChecksum);
    }

    Ok(ValidatedTable {
        header,
        data: &data[..total_len],
    })
}

/// Validates an ACPI checksum: all bytes must sum to zero (mod 256).
#[must_use]
pub fn validate_checksum(data: &[u8]) -> bool {
    data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_zero_sum() {
        assert!(validate_checksum(&[0, 0, 0]));
        assert!(validate_checksum(&[1, 255]));
        assert!(!validate_checksum(&[1, 2, 3]));
    }

    #[test]
    fn header_too_short() {
        assert!(SdtHeader::read(&[0u8; 35]).is_none());
    }

    #[test]
    fn header_fields() {
        let mut raw = [0u8; 36];
        raw[0..4].copy_from_slice(b"APIC");
        raw[4..8].copy_from_slice(&44u32.to_le_bytes());
        raw[8] = 3;
        let header = SdtHeader::read(&raw).unwrap();
        assert_eq!(&header.signature, b"APIC");
        assert_eq!(header.length, 44);
        assert_eq!(header.revision, 3);
    }

    #[test]
    fn le_readers() {
        let data = [0x34, 0x12, 0x78, 0x56, 0, 0, 0, 0, 0xAA];
        assert_eq!(read_u16(&data, 0), Some(0x1234));
        assert_eq!(read_u32(&data, 0), Some(0x5678_1234));
        assert_eq!(read_u64(&data, 0), Some(0x0000_0000_5678_1234));
        assert_eq!(read_u64(&data, 2), None);
        assert_eq!(read_u16(&data, 8), None);
    }
}
