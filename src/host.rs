// CLASSIFICATION: COMMUNITY
// Filename: host.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19
// SPDX-License-Identifier: MIT

//! Host services reachable from loaded programs.
//!
//! A [`Host`] owns the input and output streams and the current argument
//! vector. [`Host::call_table`] produces the table given to programs; each
//! slot recovers the `Host` from the table it is called with, so no
//! process-wide state is involved.

use std::cell::{Cell, RefCell};
use std::ffi::{c_char, c_int, c_void, CStr};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::ptr;
use std::slice;

use log::{debug, warn};

use crate::abi::{HostCallError, HostCallTable, HostCallTableBuilder};
use crate::args::ArgVector;
use crate::scheduler::Contexts;

/// Outcome of one read-line request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRead {
    /// Bytes stored before the terminator.
    pub len: usize,
    /// Input ended before a newline was seen.
    pub eof: bool,
}

/// Streams, arguments and scheduler hookup shared by all host calls.
pub struct Host {
    input: RefCell<Box<dyn BufRead>>,
    output: RefCell<Box<dyn Write>>,
    args: RefCell<ArgVector>,
    contexts: Cell<*const Contexts>,
}

impl Host {
    pub fn new(input: Box<dyn BufRead>, output: Box<dyn Write>) -> Self {
        Self {
            input: RefCell::new(input),
            output: RefCell::new(output),
            args: RefCell::new(ArgVector::new()),
            contexts: Cell::new(ptr::null()),
        }
    }

    /// Host bound to the process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(
            Box::new(BufReader::new(io::stdin())),
            Box::new(io::stdout()),
        )
    }

    /// Build the call table for this host.
    ///
    /// The table refers back to `self`; it must not be used after the host
    /// is dropped.
    pub fn call_table(&self) -> Result<HostCallTable, HostCallError> {
        let mut builder = HostCallTableBuilder::new(self as *const Host as *const c_void);
        builder
            .bind_read_line(host_read_line)?
            .bind_print(host_print)?
            .bind_get_arg(host_get_arg)?
            .bind_yield(host_yield)?
            .bind_exit(host_exit)?;
        builder.build()
    }

    /// Replace the argument vector seen by programs.
    pub fn set_args(&self, args: ArgVector) {
        *self.args.borrow_mut() = args;
    }

    pub fn args(&self) -> ArgVector {
        self.args.borrow().clone()
    }

    /// Read one line into `buf`, always NUL-terminating it.
    ///
    /// Stops at a newline (not stored), at end of input, or when
    /// `buf.len() - 1` bytes are stored. An empty buffer is left untouched.
    pub fn read_line(&self, buf: &mut [u8]) -> LineRead {
        let Some(limit) = buf.len().checked_sub(1) else {
            return LineRead { len: 0, eof: false };
        };
        let mut input = self.input.borrow_mut();
        let mut len = 0;
        let mut eof = false;
        while len < limit {
            let mut byte = [0u8; 1];
            match input.read(&mut byte) {
                Ok(0) => {
                    eof = true;
                    break;
                }
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => {
                    buf[len] = byte[0];
                    len += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!("read-line input error treated as end of input: {err}");
                    eof = true;
                    break;
                }
            }
        }
        buf[len] = 0;
        LineRead { len, eof }
    }

    /// Write `bytes` to the output stream.
    pub fn print(&self, bytes: &[u8]) {
        if let Err(err) = self.output.borrow_mut().write_all(bytes) {
            warn!("output stream write failed: {err}");
        }
        self.flush_output();
    }

    /// Push buffered output through; failures are logged, never raised.
    pub fn flush_output(&self) {
        if let Err(err) = self.output.borrow_mut().flush() {
            warn!("output stream flush failed: {err}");
        }
    }

    /// Pointer to the `index`-th argument, or null when out of range.
    pub fn arg_ptr(&self, index: i64) -> *const c_char {
        self.args
            .borrow()
            .get(index)
            .map_or(ptr::null(), CStr::as_ptr)
    }

    pub(crate) fn attach(&self, contexts: &Contexts) -> AttachGuard<'_> {
        self.contexts.set(contexts as *const Contexts);
        AttachGuard { host: self }
    }

    fn attached(&self) -> Option<&Contexts> {
        // SAFETY: the pointer is set only while an `AttachGuard` borrowing the
        // contexts is alive.
        unsafe { self.contexts.get().as_ref() }
    }

    /// Switch to the other user context, if there is one.
    pub fn yield_now(&self) {
        match self.attached() {
            Some(contexts) => contexts.yield_to_other(),
            None => debug!("yield with no scheduler attached ignored"),
        }
    }

    /// Leave the calling context for good.
    ///
    /// Without an attached scheduler the whole process exits with `status`.
    pub fn exit_to_supervisor(&self, status: i32) -> ! {
        match self.attached() {
            Some(contexts) => contexts.exit_to_supervisor(status),
            None => {
                self.flush_output();
                std::process::exit(status)
            }
        }
    }
}

/// Detaches the scheduler from the host when dropped.
pub(crate) struct AttachGuard<'a> {
    host: &'a Host,
}

impl Drop for AttachGuard<'_> {
    fn drop(&mut self) {
        self.host.contexts.set(ptr::null());
    }
}

unsafe fn host_of<'a>(table: *const HostCallTable) -> Option<&'a Host> {
    table.as_ref().and_then(|t| (t.host() as *const Host).as_ref())
}

unsafe extern "C" fn host_read_line(table: *const HostCallTable, buf: *mut c_char, max: c_int) {
    let Some(host) = host_of(table) else { return };
    if buf.is_null() || max <= 0 {
        return;
    }
    let dst = slice::from_raw_parts_mut(buf.cast::<u8>(), max as usize);
    host.read_line(dst);
}

unsafe extern "C" fn host_print(table: *const HostCallTable, msg: *const c_char) {
    let Some(host) = host_of(table) else { return };
    if msg.is_null() {
        return;
    }
    host.print(CStr::from_ptr(msg).to_bytes());
}

unsafe extern "C" fn host_get_arg(table: *const HostCallTable, index: c_int) -> *const c_char {
    match host_of(table) {
        Some(host) => host.arg_ptr(i64::from(index)),
        None => ptr::null(),
    }
}

unsafe extern "C" fn host_yield(table: *const HostCallTable) {
    if let Some(host) = host_of(table) {
        host.yield_now();
    }
}

unsafe extern "C" fn host_exit(table: *const HostCallTable, status: c_int) -> ! {
    match host_of(table) {
        Some(host) => host.exit_to_supervisor(status),
        None => std::process::exit(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::io::Cursor;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Sink(Rc<RefCell<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn host_with(input: &str) -> (Host, Sink) {
        let sink = Sink::default();
        let host = Host::new(
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(sink.clone()),
        );
        (host, sink)
    }

    #[test]
    fn read_line_through_table() {
        let (host, _) = host_with("hello\nworld");
        let table = host.call_table().unwrap();
        let mut buf = [0xffu8; 16];
        unsafe { table.call_read_line(&mut buf) };
        assert_eq!(&buf[..6], b"hello\0");
        unsafe { table.call_read_line(&mut buf) };
        assert_eq!(&buf[..6], b"world\0");
    }

    #[test]
    fn read_line_truncates_and_terminates() {
        let (host, _) = host_with("abcdef\n");
        let mut buf = [0xffu8; 4];
        let got = host.read_line(&mut buf);
        assert_eq!(got, LineRead { len: 3, eof: false });
        assert_eq!(&buf, b"abc\0");

        let mut one = [0xffu8; 1];
        assert_eq!(host.read_line(&mut one).len, 0);
        assert_eq!(one, [0]);
    }

    #[test]
    fn read_line_reports_end_of_input() {
        let (host, _) = host_with("");
        let mut buf = [0u8; 8];
        assert_eq!(host.read_line(&mut buf), LineRead { len: 0, eof: true });
    }

    #[test]
    fn print_and_args_through_table() {
        let (host, sink) = host_with("");
        host.set_args(ArgVector::from_words(["prog", "x"]));
        let table = host.call_table().unwrap();
        let msg = CString::new("hi there\n").unwrap();
        unsafe { table.call_print(&msg) };
        assert_eq!(sink.0.borrow().as_slice(), b"hi there\n");

        let arg = unsafe { table.call_get_arg(1) }.unwrap();
        assert_eq!(arg.to_bytes(), b"x");
        assert!(unsafe { table.call_get_arg(2) }.is_none());
        assert!(unsafe { table.call_get_arg(-3) }.is_none());
    }

    struct Broken {
        flushes: Rc<Cell<usize>>,
    }

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
        fn flush(&mut self) -> io::Result<()> {
            self.flushes.set(self.flushes.get() + 1);
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }
    }

    #[test]
    fn output_failures_are_not_fatal() {
        let flushes = Rc::new(Cell::new(0));
        let host = Host::new(
            Box::new(Cursor::new(Vec::new())),
            Box::new(Broken {
                flushes: flushes.clone(),
            }),
        );
        host.print(b"lost\n");
        host.flush_output();
        assert_eq!(flushes.get(), 2);
    }

    #[test]
    fn detached_yield_returns() {
        let (host, _) = host_with("");
        let table = host.call_table().unwrap();
        unsafe { table.call_yield() };
    }
}
