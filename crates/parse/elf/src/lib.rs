//! Minimal ELF64 executable parser for the ZenithOS program loader.
//!
//! Parses the ELF64 file header and `PT_LOAD` program headers from a raw
//! byte slice using safe little-endian field extraction. Only static
//! `ET_EXEC` binaries for `EM_X86_64` are accepted; that is the contract
//! between the kernel loader and the userspace build.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

use core::fmt;

/// ELF magic bytes: `\x7fELF`.
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class byte: 64-bit.
const ELFCLASS64: u8 = 2;

/// ELF data encoding byte: little-endian.
const ELFDATA2LSB: u8 = 1;

/// ELF type: static executable.
const ET_EXEC: u16 = 2;

/// ELF machine: x86-64.
const EM_X86_64: u16 = 62;

/// Program header type: loadable segment.
const PT_LOAD: u32 = 1;

/// Size of the ELF64 file header.
const EHDR_SIZE: usize = 64;

/// Size of an ELF64 program header entry.
const PHDR_SIZE: usize = 56;

/// Segment flag: executable.
pub const PF_X: u32 = 1;
/// Segment flag: writable.
pub const PF_W: u32 = 2;
/// Segment flag: readable.
pub const PF_R: u32 = 4;

fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn le_u64(data: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&data[off..off + 8]);
    u64::from_le_bytes(raw)
}

/// Errors that can occur when parsing an ELF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// The file does not start with `\x7fELF`.
    BadMagic,
    /// Not a 64-bit ELF file.
    UnsupportedClass,
    /// Not little-endian.
    UnsupportedEncoding,
    /// Machine is not `EM_X86_64`.
    UnsupportedMachine,
    /// Type is not `ET_EXEC`.
    UnsupportedType,
    /// The input is too short for the declared structure.
    Truncated,
    /// A header offset or size points outside the file.
    InvalidOffset,
}

impl fmt::Display for ElfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadMagic => write!(f, "invalid ELF magic"),
            Self::UnsupportedClass => write!(f, "not a 64-bit ELF"),
            Self::UnsupportedEncoding => write!(f, "not little-endian"),
            Self::UnsupportedMachine => write!(f, "not an x86-64 binary"),
            Self::UnsupportedType => write!(f, "not a static executable"),
            Self::Truncated => write!(f, "file truncated"),
            Self::InvalidOffset => write!(f, "header offset out of bounds"),
        }
    }
}

/// A parsed ELF64 executable, borrowing the underlying file data.
#[derive(Debug)]
pub struct ElfFile<'a> {
    data: &'a [u8],
    entry: u64,
    phoff: usize,
    phnum: usize,
    phentsize: usize,
}

/// A single `PT_LOAD` segment ready for mapping.
#[derive(Debug, Clone, Copy)]
pub struct LoadSegment<'a> {
    /// Virtual address where the segment must be mapped.
    pub vaddr: u64,
    /// File-backed portion of the segment.
    pub data: &'a [u8],
    /// Total in-memory size; bytes past `data.len()` are zero-filled.
    pub memsz: u64,
    /// Segment permission flags ([`PF_R`] | [`PF_W`] | [`PF_X`]).
    pub flags: u32,
}

impl<'a> ElfFile<'a> {
    /// Parses and validates an ELF64 executable.
    ///
    /// # Errors
    ///
    /// Returns an [`ElfError`] if the file is not a well-formed static
    /// x86-64 executable or a header points outside the file.
    pub fn parse(data: &'a [u8]) -> Result<Self, ElfError> {
        if data.len() < EHDR_SIZE {
            return Err(ElfError::Truncated);
        }
        if data[..4] != ELF_MAGIC {
            return Err(ElfError::BadMagic);
        }
        if data[4] != ELFCLASS64 {
            return Err(ElfError::UnsupportedClass);
        }
        if data[5] != ELFDATA2LSB {
            return Err(ElfError::UnsupportedEncoding);
        }
        if le_u16(data, 16) != ET_EXEC {
            return Err(ElfError::UnsupportedType);
        }
        if le_u16(data, 18) != EM_X86_64 {
            return Err(ElfError::UnsupportedMachine);
        }

        let entry = le_u64(data, 24);
        let phoff = le_u64(data, 32);
        let phentsize = usize::from(le_u16(data, 54));
        let phnum = usize::from(le_u16(data, 56));

        if phnum > 0 && phentsize < PHDR_SIZE {
            return Err(ElfError::InvalidOffset);
        }
        let table_len = (phnum as u64)
            .checked_mul(phentsize as u64)
            .ok_or(ElfError::InvalidOffset)?;
        let table_end = phoff.checked_add(table_len).ok_or(ElfError::InvalidOffset)?;
        if table_end > data.len() as u64 {
            return Err(ElfError::InvalidOffset);
        }

        Ok(Self {
            data,
            entry,
            phoff: usize::try_from(phoff).map_err(|_| ElfError::InvalidOffset)?,
            phnum,
            phentsize,
        })
    }

    /// Returns the program entry point virtual address.
    #[must_use]
    pub fn entry_point(&self) -> u64 {
        self.entry
    }

    /// Returns an iterator over the `PT_LOAD` segments.
    ///
    /// Segments whose file ranges fall outside the file are yielded as
    /// [`ElfError::InvalidOffset`] so the loader can reject the binary.
    pub fn load_segments(&self) -> impl Iterator<Item = Result<LoadSegment<'a>, ElfError>> + '_ {
        let data = self.data;
        (0..self.phnum).filter_map(move |i| {
            let off = self.phoff + i * self.phentsize;
            let phdr = &data[off..off + PHDR_SIZE];
            if le_u32(phdr, 0) != PT_LOAD {
                return None;
            }
            let flags = le_u32(phdr, 4);
            let file_off = le_u64(phdr, 8);
            let vaddr = le_u64(phdr, 16);
            let filesz = le_u64(phdr, 32);
            let memsz = le_u64(phdr, 40);

            if memsz < filesz {
                return Some(Err(ElfError::InvalidOffset));
            }
            let end = match file_off.checked_add(filesz) {
                Some(end) if end <= data.len() as u64 => end,
                _ => return Some(Err(ElfError::InvalidOffset)),
            };
            let file_off = usize::try_from(file_off).ok()?;
            let end = usize::try_from(end).ok()?;

            Some(Ok(LoadSegment {
                vaddr,
                data: &data[file_off..end],
                memsz,
                flags,
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal valid ELF64 executable header.
    fn make_header(entry: u64) -> Vec<u8> {
        let mut buf = vec![0u8; EHDR_SIZE];
        buf[0..4].copy_from_slice(&ELF_MAGIC);
        buf[4] = ELFCLASS64;
        buf[5] = ELFDATA2LSB;
        buf[6] = 1;
        buf[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        buf[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        buf[20..24].copy_from_slice(&1u32.to_le_bytes());
        buf[24..32].copy_from_slice(&entry.to_le_bytes());
        buf[32..40].copy_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
        buf[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        buf[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        buf
    }

    /// Appends a program header and bumps `e_phnum`.
    fn push_phdr(buf: &mut Vec<u8>, p_type: u32, flags: u32, off: u64, vaddr: u64, filesz: u64, memsz: u64) {
        let start = buf.len();
        buf.resize(start + PHDR_SIZE, 0);
        buf[start..start + 4].copy_from_slice(&p_type.to_le_bytes());
        buf[start + 4..start + 8].copy_from_slice(&flags.to_le_bytes());
        buf[start + 8..start + 16].copy_from_slice(&off.to_le_bytes());
        buf[start + 16..start + 24].copy_from_slice(&vaddr.to_le_bytes());
        buf[start + 32..start + 40].copy_from_slice(&filesz.to_le_bytes());
        buf[start + 40..start + 48].copy_from_slice(&memsz.to_le_bytes());
        let phnum = le_u16(buf, 56) + 1;
        buf[56..58].copy_from_slice(&phnum.to_le_bytes());
    }

    #[test]
    fn parse_header() {
        let buf = make_header(0x40_1000);
        let elf = ElfFile::parse(&buf).unwrap();
        assert_eq!(elf.entry_point(), 0x40_1000);
        assert_eq!(elf.load_segments().count(), 0);
    }

    #[test]
    fn reject_bad_magic() {
        let mut buf = make_header(0);
        buf[1] = b'X';
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::BadMagic);
    }

    #[test]
    fn reject_shared_object() {
        let mut buf = make_header(0);
        buf[16..18].copy_from_slice(&3u16.to_le_bytes()); // ET_DYN
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::UnsupportedType);
    }

    #[test]
    fn reject_wrong_machine() {
        let mut buf = make_header(0);
        buf[18..20].copy_from_slice(&40u16.to_le_bytes()); // EM_ARM
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::UnsupportedMachine);
    }

    #[test]
    fn reject_truncated_phdr_table() {
        let mut buf = make_header(0);
        buf[56..58].copy_from_slice(&4u16.to_le_bytes()); // claims 4 phdrs past EOF
        assert_eq!(ElfFile::parse(&buf).unwrap_err(), ElfError::InvalidOffset);
    }

    #[test]
    fn load_segment_with_bss() {
        let mut buf = make_header(0x40_1000);
        push_phdr(&mut buf, PT_LOAD, PF_R | PF_X, 0, 0x40_0000, 0, 0);
        // Segment data lives right after the phdr table.
        let data_off = buf.len() as u64;
        buf.extend_from_slice(b"\x90\x90\xC3");
        // Patch the segment to cover the appended bytes plus 5 bytes of bss.
        let ph = EHDR_SIZE;
        buf[ph + 8..ph + 16].copy_from_slice(&data_off.to_le_bytes());
        buf[ph + 32..ph + 40].copy_from_slice(&3u64.to_le_bytes());
        buf[ph + 40..ph + 48].copy_from_slice(&8u64.to_le_bytes());

        let elf = ElfFile::parse(&buf).unwrap();
        let segs: Vec<_> = elf.load_segments().collect::<Result<_, _>>().unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].vaddr, 0x40_0000);
        assert_eq!(segs[0].data, b"\x90\x90\xC3");
        assert_eq!(segs[0].memsz, 8);
        assert!(segs[0].flags & PF_X != 0);
        assert!(segs[0].flags & PF_W == 0);
    }

    #[test]
    fn non_load_segments_skipped() {
        let mut buf = make_header(0x40_1000);
        push_phdr(&mut buf, 4, 0, 0, 0, 0, 0); // PT_NOTE
        push_phdr(&mut buf, PT_LOAD, PF_R, 0, 0x40_0000, 0, 0x1000);
        let elf = ElfFile::parse(&buf).unwrap();
        assert_eq!(elf.load_segments().count(), 1);
    }

    #[test]
    fn segment_past_eof_rejected() {
        let mut buf = make_header(0x40_1000);
        push_phdr(&mut buf, PT_LOAD, PF_R, 0x10_0000, 0x40_0000, 0x1000, 0x1000);
        let elf = ElfFile::parse(&buf).unwrap();
        let seg = elf.load_segments().next().unwrap();
        assert_eq!(seg.unwrap_err(), ElfError::InvalidOffset);
    }
}
