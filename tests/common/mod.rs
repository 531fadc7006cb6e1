// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::rc::Rc;

use twinload::memory::{LibcMapper, MapError, MemoryMapper, Placement, Protection};
use twinload::Host;

pub const EM_X86_64: u16 = 0x3e;

/// One program-header entry of a synthetic image.
pub struct Segment {
    pub kind: u32,
    pub vaddr: u64,
    pub data: Vec<u8>,
    pub memsz: u64,
}

impl Segment {
    pub fn load(vaddr: u64, data: &[u8], memsz: u64) -> Self {
        Self {
            kind: 1,
            vaddr,
            data: data.to_vec(),
            memsz,
        }
    }
}

/// x86-64 program: print "<letter>\n", yield once, then exit with `status`.
pub fn print_yield_exit(letter: u8, status: u8) -> Vec<u8> {
    vec![
        0x53, // push rbx
        0x48, 0x89, 0xfb, // mov rbx, rdi
        0x48, 0x8d, 0x35, 0x17, 0x00, 0x00, 0x00, // lea rsi, [rip+msg]
        0x48, 0x89, 0xdf, // mov rdi, rbx
        0xff, 0x53, 0x08, // call [rbx+8]
        0x48, 0x89, 0xdf, // mov rdi, rbx
        0xff, 0x53, 0x18, // call [rbx+24]
        0x48, 0x89, 0xdf, // mov rdi, rbx
        0xbe, status, 0x00, 0x00, 0x00, // mov esi, status
        0xff, 0x53, 0x20, // call [rbx+32]
        letter, b'\n', 0,
    ]
}

/// Builds minimal little-endian ELF64 executables.
pub struct ElfBuilder {
    entry: u64,
    segments: Vec<Segment>,
}

impl ElfBuilder {
    pub fn new(entry: u64) -> Self {
        Self {
            entry,
            segments: Vec::new(),
        }
    }

    pub fn segment(mut self, seg: Segment) -> Self {
        self.segments.push(seg);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let phoff = 64u64;
        let mut data_off = phoff + 56 * self.segments.len() as u64;
        let mut out = Vec::new();
        out.extend_from_slice(&[0x7f, b'E', b'L', b'F', 2, 1, 1, 0]);
        out.extend_from_slice(&[0u8; 8]);
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&EM_X86_64.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&self.entry.to_le_bytes());
        out.extend_from_slice(&phoff.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&56u16.to_le_bytes());
        out.extend_from_slice(&(self.segments.len() as u16).to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(out.len(), 64);

        for seg in &self.segments {
            out.extend_from_slice(&seg.kind.to_le_bytes());
            out.extend_from_slice(&7u32.to_le_bytes());
            out.extend_from_slice(&data_off.to_le_bytes());
            out.extend_from_slice(&seg.vaddr.to_le_bytes());
            out.extend_from_slice(&seg.vaddr.to_le_bytes());
            out.extend_from_slice(&(seg.data.len() as u64).to_le_bytes());
            out.extend_from_slice(&seg.memsz.to_le_bytes());
            out.extend_from_slice(&0x1000u64.to_le_bytes());
            data_off += seg.data.len() as u64;
        }
        for seg in &self.segments {
            out.extend_from_slice(&seg.data);
        }
        out
    }

    pub fn write_to(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(&self.build()).unwrap();
        path
    }
}

/// Output stream that can be inspected after the host is done with it.
#[derive(Clone, Default)]
pub struct Sink(pub Rc<RefCell<Vec<u8>>>);

impl Sink {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub fn host_with_input(input: &str) -> (Host, Sink) {
    let sink = Sink::default();
    let host = Host::new(
        Box::new(Cursor::new(input.as_bytes().to_vec())),
        Box::new(sink.clone()),
    );
    (host, sink)
}

/// Forwards to [`LibcMapper`] and counts calls.
#[derive(Default)]
pub struct CountingMapper {
    pub maps: Cell<usize>,
    pub unmaps: Cell<usize>,
}

impl MemoryMapper for CountingMapper {
    fn map(
        &self,
        placement: Placement,
        len: usize,
        prot: Protection,
    ) -> Result<NonNull<u8>, MapError> {
        self.maps.set(self.maps.get() + 1);
        LibcMapper.map(placement, len, prot)
    }

    unsafe fn unmap(&self, addr: NonNull<u8>, len: usize) -> Result<(), MapError> {
        self.unmaps.set(self.unmaps.get() + 1);
        LibcMapper.unmap(addr, len)
    }

    unsafe fn protect(
        &self,
        addr: NonNull<u8>,
        len: usize,
        prot: Protection,
    ) -> Result<(), MapError> {
        LibcMapper.protect(addr, len, prot)
    }
}
