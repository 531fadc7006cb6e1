// CLASSIFICATION: COMMUNITY
// Filename: image.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! On-disk layout of the executable images accepted by the loader.
//!
//! Only 64-bit little-endian ELF is understood. Decoding goes through
//! `xmas-elf`, which reads its structures in place; every buffer handed to
//! it is an [`ImageBuf`] and every offset is checked here first so that a
//! malformed image yields an [`ImageError`] rather than a panic.

use std::slice;

use serde::Serialize;
use thiserror::Error;
use xmas_elf::header::{self, Class, Data};
use xmas_elf::program::{Flags, ProgramHeader, Type};
use xmas_elf::ElfFile;

/// Size of the ELF64 file header.
pub const EHDR_SIZE: usize = 64;
/// Size of one ELF64 program-header entry.
pub const PHDR_SIZE: usize = 56;

const TABLE_ALIGN: u64 = 8;

/// Errors raised while decoding an image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("not an ELF image: {0}")]
    Header(&'static str),
    #[error("unsupported ELF class {0:?}")]
    UnsupportedClass(Class),
    #[error("unsupported ELF data encoding {0:?}")]
    UnsupportedEncoding(Data),
    #[error("unexpected program header entry size {0}")]
    EntrySize(u16),
    #[error("program header table offset 0x{0:x} is invalid")]
    TableOffset(u64),
    #[error("program header table ends at 0x{end:x} but only 0x{available:x} bytes are present")]
    Truncated { end: u64, available: usize },
    #[error("program header {index}: {reason}")]
    ProgramHeader { index: u16, reason: &'static str },
    #[error("segment {index}: file size 0x{filesz:x} exceeds memory size 0x{memsz:x}")]
    SegmentSize { index: usize, filesz: u64, memsz: u64 },
}

/// Zero-initialised bytes with the 8-byte alignment `xmas-elf` expects.
#[derive(Debug, Clone)]
pub struct ImageBuf {
    words: Vec<u64>,
    len: usize,
}

impl ImageBuf {
    pub fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = Self::zeroed(bytes.len());
        buf.as_mut_bytes().copy_from_slice(bytes);
        buf
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: `words` holds at least `len` initialised bytes.
        unsafe { slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.len) }
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        // SAFETY: as above, and the borrow of `self` is exclusive.
        unsafe { slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), self.len) }
    }
}

/// The parts of the file header the loader acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutableHeader {
    /// Entry point as declared by the image (unbiased).
    pub entry: u64,
    pub ph_offset: u64,
    pub ph_entry_size: u16,
    pub ph_count: u16,
}

impl ExecutableHeader {
    /// Decode and validate the file header at the start of `raw`.
    pub fn parse(raw: &ImageBuf) -> Result<Self, ImageError> {
        let elf = header::parse_header(raw.as_bytes()).map_err(ImageError::Header)?;
        match elf.pt1.class() {
            Class::SixtyFour => {}
            other => return Err(ImageError::UnsupportedClass(other)),
        }
        match elf.pt1.data() {
            Data::LittleEndian => {}
            other => return Err(ImageError::UnsupportedEncoding(other)),
        }
        let parsed = Self {
            entry: elf.pt2.entry_point(),
            ph_offset: elf.pt2.ph_offset(),
            ph_entry_size: elf.pt2.ph_entry_size(),
            ph_count: elf.pt2.ph_count(),
        };
        // An empty table may carry any offset and entry size.
        if parsed.ph_count > 0 {
            if parsed.ph_entry_size as usize != PHDR_SIZE {
                return Err(ImageError::EntrySize(parsed.ph_entry_size));
            }
            if parsed.ph_offset == 0 || parsed.ph_offset % TABLE_ALIGN != 0 {
                return Err(ImageError::TableOffset(parsed.ph_offset));
            }
            if parsed.ph_table_end().is_none() {
                return Err(ImageError::TableOffset(parsed.ph_offset));
            }
        }
        Ok(parsed)
    }

    /// Byte length of the program-header table.
    pub fn ph_table_len(&self) -> usize {
        self.ph_count as usize * PHDR_SIZE
    }

    /// File offset just past the program-header table.
    pub fn ph_table_end(&self) -> Option<u64> {
        self.ph_offset.checked_add(self.ph_table_len() as u64)
    }
}

/// One decoded program-header entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeaderEntry {
    /// `None` for type values outside every known range.
    pub kind: Option<Type>,
    pub flags: u32,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
}

impl ProgramHeaderEntry {
    fn from_xmas(ph: &ProgramHeader<'_>) -> Self {
        Self {
            kind: ph.get_type().ok(),
            flags: ph.flags().0,
            offset: ph.offset(),
            vaddr: ph.virtual_addr(),
            filesz: ph.file_size(),
            memsz: ph.mem_size(),
        }
    }

    pub fn is_load(&self) -> bool {
        self.kind == Some(Type::Load)
    }
}

/// Decode the program-header table of an image whose first bytes, up to at
/// least the end of the table, are held in `image`.
///
/// Loadable entries whose file size exceeds their memory size are rejected;
/// entries of any other type are decoded but never validated.
pub fn parse_program_headers(
    image: &ImageBuf,
    header: &ExecutableHeader,
) -> Result<Vec<ProgramHeaderEntry>, ImageError> {
    if header.ph_count == 0 {
        return Ok(Vec::new());
    }
    let end = header
        .ph_table_end()
        .ok_or(ImageError::TableOffset(header.ph_offset))?;
    if end > image.len() as u64 {
        return Err(ImageError::Truncated {
            end,
            available: image.len(),
        });
    }
    let elf = ElfFile::new(image.as_bytes()).map_err(ImageError::Header)?;
    let mut entries = Vec::with_capacity(header.ph_count as usize);
    for index in 0..header.ph_count {
        let ph = elf
            .program_header(index)
            .map_err(|reason| ImageError::ProgramHeader { index, reason })?;
        let entry = ProgramHeaderEntry::from_xmas(&ph);
        if entry.is_load() && entry.filesz > entry.memsz {
            return Err(ImageError::SegmentSize {
                index: index as usize,
                filesz: entry.filesz,
                memsz: entry.memsz,
            });
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Program header as reported by [`inspect`].
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSummary {
    pub kind: &'static str,
    pub offset: u64,
    pub vaddr: u64,
    pub filesz: u64,
    pub memsz: u64,
    pub flags: String,
}

/// Whole-image summary used by the `info` command.
#[derive(Debug, Clone, Serialize)]
pub struct ImageSummary {
    pub entry: u64,
    pub segments: Vec<SegmentSummary>,
}

fn type_name(ty: Option<Type>) -> &'static str {
    match ty {
        Some(Type::Null) => "NULL",
        Some(Type::Load) => "LOAD",
        Some(Type::Dynamic) => "DYNAMIC",
        Some(Type::Interp) => "INTERP",
        Some(Type::Note) => "NOTE",
        Some(Type::ShLib) => "SHLIB",
        Some(Type::Phdr) => "PHDR",
        Some(Type::Tls) => "TLS",
        Some(Type::GnuRelro) => "GNU_RELRO",
        Some(_) => "OTHER",
        None => "INVALID",
    }
}

fn flag_string(raw: u32) -> String {
    let flags = Flags(raw);
    format!(
        "{}{}{}",
        if flags.is_read() { 'R' } else { '-' },
        if flags.is_write() { 'W' } else { '-' },
        if flags.is_execute() { 'X' } else { '-' },
    )
}

/// Parse a complete image held in memory and summarize its segments.
pub fn inspect(data: &[u8]) -> Result<ImageSummary, ImageError> {
    let buf = ImageBuf::from_bytes(data);
    let header = ExecutableHeader::parse(&buf)?;
    let segments = parse_program_headers(&buf, &header)?
        .into_iter()
        .map(|ph| SegmentSummary {
            kind: type_name(ph.kind),
            offset: ph.offset,
            vaddr: ph.vaddr,
            filesz: ph.filesz,
            memsz: ph.memsz,
            flags: flag_string(ph.flags),
        })
        .collect();
    Ok(ImageSummary {
        entry: header.entry,
        segments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(entry: u64, phoff: u64, phnum: u16) -> Vec<u8> {
        let mut h = vec![0u8; EHDR_SIZE];
        h[..4].copy_from_slice(&header::MAGIC);
        h[4] = 2;
        h[5] = 1;
        h[6] = 1;
        h[24..32].copy_from_slice(&entry.to_le_bytes());
        h[32..40].copy_from_slice(&phoff.to_le_bytes());
        h[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        h[56..58].copy_from_slice(&phnum.to_le_bytes());
        h
    }

    fn phdr_bytes(kind: u32, filesz: u64, memsz: u64) -> Vec<u8> {
        let mut p = vec![0u8; PHDR_SIZE];
        p[0..4].copy_from_slice(&kind.to_le_bytes());
        p[16..24].copy_from_slice(&0x1000u64.to_le_bytes());
        p[32..40].copy_from_slice(&filesz.to_le_bytes());
        p[40..48].copy_from_slice(&memsz.to_le_bytes());
        p
    }

    fn image(phnum: u16, table: &[u8]) -> ImageBuf {
        let mut bytes = header_bytes(0x1000, EHDR_SIZE as u64, phnum);
        bytes.extend_from_slice(table);
        ImageBuf::from_bytes(&bytes)
    }

    #[test]
    fn header_fields_decode() {
        let h = ExecutableHeader::parse(&image(2, &[])).unwrap();
        assert_eq!(h.entry, 0x1000);
        assert_eq!(h.ph_offset, 64);
        assert_eq!(h.ph_count, 2);
        assert_eq!(h.ph_table_len(), 2 * PHDR_SIZE);
        assert_eq!(h.ph_table_end(), Some(64 + 2 * PHDR_SIZE as u64));
    }

    #[test]
    fn header_rejects_wrong_magic_and_class() {
        let mut h = header_bytes(0, 64, 1);
        h[0] = 0;
        assert!(matches!(
            ExecutableHeader::parse(&ImageBuf::from_bytes(&h)),
            Err(ImageError::Header(_))
        ));
        let mut h = header_bytes(0, 64, 1);
        h[4] = 1;
        assert_eq!(
            ExecutableHeader::parse(&ImageBuf::from_bytes(&h)),
            Err(ImageError::UnsupportedClass(Class::ThirtyTwo))
        );
        let mut h = header_bytes(0, 64, 1);
        h[5] = 2;
        assert_eq!(
            ExecutableHeader::parse(&ImageBuf::from_bytes(&h)),
            Err(ImageError::UnsupportedEncoding(Data::BigEndian))
        );
    }

    #[test]
    fn table_offset_must_be_aligned_and_nonzero() {
        for phoff in [0u64, 65, u64::MAX - 7] {
            let h = header_bytes(0, phoff, 1);
            assert_eq!(
                ExecutableHeader::parse(&ImageBuf::from_bytes(&h)),
                Err(ImageError::TableOffset(phoff))
            );
        }
        // No table, nothing to validate.
        let h = header_bytes(0, 0, 0);
        assert!(ExecutableHeader::parse(&ImageBuf::from_bytes(&h)).is_ok());
    }

    #[test]
    fn table_past_buffer_is_truncated() {
        let buf = image(1, &phdr_bytes(1, 0, 0)[..20]);
        let header = ExecutableHeader::parse(&buf).unwrap();
        assert_eq!(
            parse_program_headers(&buf, &header),
            Err(ImageError::Truncated {
                end: 120,
                available: 84
            })
        );
    }

    #[test]
    fn oversized_file_segment_is_invalid() {
        let buf = image(1, &phdr_bytes(1, 0x2000, 0x1000));
        let header = ExecutableHeader::parse(&buf).unwrap();
        assert!(matches!(
            parse_program_headers(&buf, &header),
            Err(ImageError::SegmentSize { index: 0, .. })
        ));
        // Non-loadable entries are ignored by validation.
        let buf = image(1, &phdr_bytes(4, 0x2000, 0x1000));
        let entries = parse_program_headers(&buf, &header).unwrap();
        assert_eq!(entries[0].kind, Some(Type::Note));
        assert!(!entries[0].is_load());
    }

    #[test]
    fn unknown_segment_type_decodes() {
        let buf = image(1, &phdr_bytes(0x1234, 0, 0));
        let header = ExecutableHeader::parse(&buf).unwrap();
        let entries = parse_program_headers(&buf, &header).unwrap();
        assert_eq!(entries[0].kind, None);
        assert_eq!(type_name(entries[0].kind), "INVALID");
    }

    #[test]
    fn flags_render_like_readelf() {
        assert_eq!(flag_string(4 | 1), "R-X");
        assert_eq!(flag_string(4 | 2), "RW-");
    }
}
