// CLASSIFICATION: COMMUNITY
// Filename: loader.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Segment loader: maps every loadable segment of an image at its
//! virtual address plus a relocation bias and reports the biased entry.

use std::fmt;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::{debug, info, warn};
use thiserror::Error;

use crate::abi::ProgramEntry;
use crate::image::{
    parse_program_headers, ExecutableHeader, ImageBuf, ImageError, ProgramHeaderEntry, EHDR_SIZE,
};
use crate::memory::{self, MapError, MemoryMapper, Placement, Protection, PAGE_SIZE};
use crate::region::{MappedRegion, RegionTracker};

/// An address inside a loaded image, relocation bias already applied.
///
/// Only the loader creates these, so biased and unbiased addresses cannot
/// be mixed up elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RelocatedAddr(usize);

impl RelocatedAddr {
    fn relocate(vaddr: u64, bias: u64) -> Result<Self, LoaderError> {
        vaddr
            .checked_add(bias)
            .and_then(|addr| usize::try_from(addr).ok())
            .map(RelocatedAddr)
            .ok_or(LoaderError::AddressOverflow { vaddr, bias })
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for RelocatedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read ELF header ({read} of {expected} bytes)")]
    ShortHeader { read: usize, expected: usize },
    #[error("Failed to read program headers ({read} of {expected} bytes)")]
    ShortProgramHeaders { read: usize, expected: usize },
    #[error("Failed to read segment {segment} ({read} of {expected} bytes)")]
    ShortSegment {
        segment: usize,
        read: usize,
        expected: usize,
    },
    #[error("Failed to seek to {what}: {source}")]
    Seek {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    #[error("malformed image: {0}")]
    Image(#[from] ImageError),
    #[error("mmap failed for segment {segment}: {source}")]
    Map {
        segment: usize,
        #[source]
        source: MapError,
    },
    #[error("address 0x{vaddr:x} + bias 0x{bias:x} is not addressable")]
    AddressOverflow { vaddr: u64, bias: u64 },
}

/// Result of a successful load: the biased entry point and the regions
/// that now hold the image.
#[derive(Debug)]
pub struct LoadedImage {
    entry: RelocatedAddr,
    bias: u64,
    header: ExecutableHeader,
    regions: RegionTracker,
}

impl LoadedImage {
    pub fn entry(&self) -> RelocatedAddr {
        self.entry
    }

    pub fn bias(&self) -> u64 {
        self.bias
    }

    pub fn header(&self) -> &ExecutableHeader {
        &self.header
    }

    pub fn regions(&self) -> &RegionTracker {
        &self.regions
    }

    pub fn regions_mut(&mut self) -> &mut RegionTracker {
        &mut self.regions
    }

    pub fn into_regions(self) -> RegionTracker {
        self.regions
    }

    /// The entry point as a callable program entry.
    ///
    /// # Safety
    /// The image must contain code for the host call ABI at its entry and its
    /// regions must stay mapped while the returned function can run.
    pub unsafe fn program_entry(&self) -> ProgramEntry {
        std::mem::transmute::<usize, ProgramEntry>(self.entry.get())
    }
}

/// Read until `buf` is full or the source is exhausted.
fn read_fully<R: Read>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

fn usize_of(value: u64, vaddr: u64, bias: u64) -> Result<usize, LoaderError> {
    usize::try_from(value).map_err(|_| LoaderError::AddressOverflow { vaddr, bias })
}

/// Maps images through a [`MemoryMapper`].
pub struct SegmentLoader<'m, M: MemoryMapper> {
    mapper: &'m M,
    page_size: usize,
}

impl<'m, M: MemoryMapper> SegmentLoader<'m, M> {
    pub fn new(mapper: &'m M) -> Self {
        Self {
            mapper,
            page_size: PAGE_SIZE,
        }
    }

    /// Use a different mapping granularity (a power of two).
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Open `path`, load it at `bias` and close the file again.
    pub fn load_path(&self, path: &Path, bias: u64) -> Result<LoadedImage, LoaderError> {
        let mut file = File::open(path).map_err(|source| LoaderError::Open {
            path: path.display().to_string(),
            source,
        })?;
        info!("Loading ELF from {} at bias 0x{bias:x}", path.display());
        self.load(&mut file, bias)
    }

    /// Load the image behind `file` with every address shifted by `bias`.
    ///
    /// Nothing is mapped until the header and the program-header table have
    /// been read and validated. A failure after some segments were mapped
    /// leaves those mappings in place.
    pub fn load<R: Read + Seek>(&self, file: &mut R, bias: u64) -> Result<LoadedImage, LoaderError> {
        file.seek(SeekFrom::Start(0))
            .map_err(|source| LoaderError::Seek {
                what: "ELF header",
                source,
            })?;
        let mut raw_header = ImageBuf::zeroed(EHDR_SIZE);
        let read = read_fully(file, raw_header.as_mut_bytes()).map_err(LoaderError::Read)?;
        if read != EHDR_SIZE {
            return Err(LoaderError::ShortHeader {
                read,
                expected: EHDR_SIZE,
            });
        }
        let header = ExecutableHeader::parse(&raw_header)?;
        let entries = self.read_program_headers(file, &header)?;

        let mut regions = RegionTracker::new();
        for (index, ph) in entries.iter().enumerate().filter(|(_, ph)| ph.is_load()) {
            if ph.memsz == 0 {
                debug!("segment {index} has no memory size; skipped");
                continue;
            }
            let start = RelocatedAddr::relocate(ph.vaddr, bias)?.get();
            let memsz = usize_of(ph.memsz, ph.vaddr, bias)?;
            let filesz = usize_of(ph.filesz, ph.vaddr, bias)?;
            let map_start = memory::round_down(start, self.page_size);
            let end = start
                .checked_add(memsz)
                .ok_or(LoaderError::AddressOverflow { vaddr: ph.vaddr, bias })?;
            let map_len = memory::round_up(end - map_start, self.page_size)
                .ok_or(LoaderError::AddressOverflow { vaddr: ph.vaddr, bias })?;

            let base = self
                .mapper
                .map(Placement::Fixed(map_start), map_len, Protection::all())
                .map_err(|source| LoaderError::Map {
                    segment: index,
                    source,
                })?;
            log_segment_map(start, map_len, ph.filesz, ph.memsz);
            let region = regions.record(MappedRegion::new(base, map_len, index));

            file.seek(SeekFrom::Start(ph.offset))
                .map_err(|source| LoaderError::Seek {
                    what: "segment",
                    source,
                })?;
            // The tail past `filesz` is already zero: mappings start zeroed.
            let skew = start - map_start;
            let dst = &mut region.as_mut_slice()[skew..skew + filesz];
            let read = read_fully(file, dst).map_err(LoaderError::Read)?;
            if read != filesz {
                return Err(LoaderError::ShortSegment {
                    segment: index,
                    read,
                    expected: filesz,
                });
            }
        }

        let entry = RelocatedAddr::relocate(header.entry, bias)?;
        if regions.find(entry.get()).is_none() {
            warn!("entry point {entry} lies outside every loaded segment");
        }
        Ok(LoadedImage {
            entry,
            bias,
            header,
            regions,
        })
    }

    /// Read the image from its start through the end of the program-header
    /// table and decode the table. The file length is checked first so a
    /// bogus table offset never sizes the buffer.
    fn read_program_headers<R: Read + Seek>(
        &self,
        file: &mut R,
        header: &ExecutableHeader,
    ) -> Result<Vec<ProgramHeaderEntry>, LoaderError> {
        if header.ph_count == 0 {
            return Ok(Vec::new());
        }
        let expected = header.ph_table_len();
        let file_len = file
            .seek(SeekFrom::End(0))
            .map_err(|source| LoaderError::Seek {
                what: "end of image",
                source,
            })?;
        let available = file_len.saturating_sub(header.ph_offset);
        if available < expected as u64 {
            return Err(LoaderError::ShortProgramHeaders {
                read: available as usize,
                expected,
            });
        }
        let end = header
            .ph_table_end()
            .and_then(|end| usize::try_from(end).ok())
            .ok_or(ImageError::TableOffset(header.ph_offset))?;

        file.seek(SeekFrom::Start(0))
            .map_err(|source| LoaderError::Seek {
                what: "program headers",
                source,
            })?;
        let mut prefix = ImageBuf::zeroed(end);
        let read = read_fully(file, prefix.as_mut_bytes()).map_err(LoaderError::Read)?;
        if read != end {
            return Err(LoaderError::ShortProgramHeaders {
                read: read.saturating_sub(end - expected),
                expected,
            });
        }
        Ok(parse_program_headers(&prefix, header)?)
    }
}

fn log_segment_map(addr: usize, len: usize, filesz: u64, memsz: u64) {
    info!("[Loader] Loaded segment virt=0x{addr:x} len=0x{len:x} filesz=0x{filesz:x} memsz=0x{memsz:x}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn relocation_adds_bias() {
        let addr = RelocatedAddr::relocate(0x1000, 0x8000_0000).unwrap();
        assert_eq!(addr.get(), 0x8000_1000);
        assert_eq!(addr.to_string(), "0x80001000");
        assert!(RelocatedAddr::relocate(u64::MAX, 1).is_err());
    }

    #[test]
    fn short_header_is_rejected() {
        let mapper = crate::memory::LibcMapper;
        let loader = SegmentLoader::new(&mapper);
        let mut file = Cursor::new(vec![0x7f, b'E', b'L', b'F']);
        match loader.load(&mut file, 0) {
            Err(LoaderError::ShortHeader { read, expected }) => {
                assert_eq!(read, 4);
                assert_eq!(expected, EHDR_SIZE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
