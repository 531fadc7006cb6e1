// CLASSIFICATION: COMMUNITY
// Filename: abi.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19
// SPDX-License-Identifier: MIT

//! Host call table handed to loaded programs.
//!
//! A program's entry point is called as `entry(table)`. Every slot holds a
//! C-ABI function whose first argument is that same table pointer:
//!
//! | slot | call | signature |
//! |---|---|---|
//! | 0 | read-line | `(table, buf, max)` |
//! | 1 | print | `(table, str)` |
//! | 2 | get-argument | `(table, i) -> str` (null when out of range) |
//! | 3 | yield-to-other | `(table)` |
//! | 4 | exit-to-supervisor | `(table, status)`, never returns |

use std::ffi::{c_char, c_int, c_void, CStr};
use std::fmt;

use thiserror::Error;

pub type ProgramEntry = unsafe extern "C" fn(table: *const HostCallTable);
pub type ReadLineFn = unsafe extern "C" fn(*const HostCallTable, *mut c_char, c_int);
pub type PrintFn = unsafe extern "C" fn(*const HostCallTable, *const c_char);
pub type GetArgFn = unsafe extern "C" fn(*const HostCallTable, c_int) -> *const c_char;
pub type YieldFn = unsafe extern "C" fn(*const HostCallTable);
pub type ExitFn = unsafe extern "C" fn(*const HostCallTable, c_int) -> !;

/// Slot numbers of the host call table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum HostCall {
    ReadLine = 0,
    Print = 1,
    GetArg = 2,
    YieldToOther = 3,
    ExitToSupervisor = 4,
}

pub const SLOT_COUNT: usize = 5;

impl HostCall {
    pub const ALL: [HostCall; SLOT_COUNT] = [
        HostCall::ReadLine,
        HostCall::Print,
        HostCall::GetArg,
        HostCall::YieldToOther,
        HostCall::ExitToSupervisor,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for HostCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HostCall::ReadLine => "read-line",
            HostCall::Print => "print",
            HostCall::GetArg => "get-argument",
            HostCall::YieldToOther => "yield-to-other",
            HostCall::ExitToSupervisor => "exit-to-supervisor",
        };
        write!(f, "{name} (slot {})", self.index())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostCallError {
    #[error("host call {0} was never bound")]
    Unbound(HostCall),
    #[error("host call {0} is already bound")]
    AlreadyBound(HostCall),
}

/// Fully populated table of host entry points.
///
/// The layout is part of the program ABI: `SLOT_COUNT` function pointers
/// starting at offset 0, then an opaque pointer owned by the host.
#[repr(C)]
#[derive(Debug)]
pub struct HostCallTable {
    slots: [usize; SLOT_COUNT],
    host: *const c_void,
}

impl HostCallTable {
    /// Raw address bound to `call`.
    pub fn slot(&self, call: HostCall) -> usize {
        self.slots[call.index()]
    }

    pub(crate) fn host(&self) -> *const c_void {
        self.host
    }

    // The call_* helpers dispatch through the slots exactly as a loaded
    // program would. Each slot was bound through its typed builder method,
    // so the transmutes restore the original function type.

    /// # Safety
    /// Must follow the ABI contract of the read-line slot.
    pub unsafe fn call_read_line(&self, buf: &mut [u8]) {
        let f = std::mem::transmute::<usize, ReadLineFn>(self.slot(HostCall::ReadLine));
        let max = c_int::try_from(buf.len()).unwrap_or(c_int::MAX);
        f(self, buf.as_mut_ptr().cast(), max)
    }

    /// # Safety
    /// Must follow the ABI contract of the print slot.
    pub unsafe fn call_print(&self, msg: &CStr) {
        let f = std::mem::transmute::<usize, PrintFn>(self.slot(HostCall::Print));
        f(self, msg.as_ptr())
    }

    /// # Safety
    /// The returned string is only valid until the host replaces its
    /// argument vector.
    pub unsafe fn call_get_arg<'a>(&self, index: c_int) -> Option<&'a CStr> {
        let f = std::mem::transmute::<usize, GetArgFn>(self.slot(HostCall::GetArg));
        let raw = f(self, index);
        if raw.is_null() {
            None
        } else {
            Some(CStr::from_ptr(raw))
        }
    }

    /// # Safety
    /// Must be called from a context run by the cooperative scheduler, or
    /// while no scheduler is attached.
    pub unsafe fn call_yield(&self) {
        let f = std::mem::transmute::<usize, YieldFn>(self.slot(HostCall::YieldToOther));
        f(self)
    }

    /// # Safety
    /// As for [`HostCallTable::call_yield`].
    pub unsafe fn call_exit(&self, status: c_int) -> ! {
        let f = std::mem::transmute::<usize, ExitFn>(self.slot(HostCall::ExitToSupervisor));
        f(self, status)
    }
}

/// Binds every slot exactly once, then freezes the table.
#[derive(Debug)]
pub struct HostCallTableBuilder {
    slots: [Option<usize>; SLOT_COUNT],
    host: *const c_void,
}

impl HostCallTableBuilder {
    pub fn new(host: *const c_void) -> Self {
        Self {
            slots: [None; SLOT_COUNT],
            host,
        }
    }

    fn bind(&mut self, call: HostCall, addr: usize) -> Result<&mut Self, HostCallError> {
        let slot = &mut self.slots[call.index()];
        if slot.is_some() {
            return Err(HostCallError::AlreadyBound(call));
        }
        *slot = Some(addr);
        Ok(self)
    }

    pub fn bind_read_line(&mut self, f: ReadLineFn) -> Result<&mut Self, HostCallError> {
        self.bind(HostCall::ReadLine, f as usize)
    }

    pub fn bind_print(&mut self, f: PrintFn) -> Result<&mut Self, HostCallError> {
        self.bind(HostCall::Print, f as usize)
    }

    pub fn bind_get_arg(&mut self, f: GetArgFn) -> Result<&mut Self, HostCallError> {
        self.bind(HostCall::GetArg, f as usize)
    }

    pub fn bind_yield(&mut self, f: YieldFn) -> Result<&mut Self, HostCallError> {
        self.bind(HostCall::YieldToOther, f as usize)
    }

    pub fn bind_exit(&mut self, f: ExitFn) -> Result<&mut Self, HostCallError> {
        self.bind(HostCall::ExitToSupervisor, f as usize)
    }

    pub fn build(&self) -> Result<HostCallTable, HostCallError> {
        let mut slots = [0usize; SLOT_COUNT];
        for call in HostCall::ALL {
            slots[call.index()] = self.slots[call.index()].ok_or(HostCallError::Unbound(call))?;
        }
        Ok(HostCallTable {
            slots,
            host: self.host,
        })
    }
}
