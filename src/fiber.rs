// CLASSIFICATION: COMMUNITY
// Filename: fiber.rs v0.2
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Stack-switching fibers.
//!
//! A [`Fiber`] owns a fixed-size stack and the stack pointer at which it is
//! suspended. Stacks are anonymous mappings with an inaccessible guard page
//! below them, so running off the end faults instead of corrupting memory. The only way to move between fibers is
//! [`Fiber::suspend_and_resume`]; raw stack pointers never leave this module.
//!
//! The switch routine pushes the callee-saved registers onto the running
//! stack, stores the stack pointer, loads the other fiber's stack pointer
//! and pops its registers. Everything else is preserved by the ordinary
//! call discipline of whoever called the switch.

use std::cell::Cell;
use std::ptr::NonNull;

use log::warn;
use thiserror::Error;

use crate::memory::{self, LibcMapper, MapError, MemoryMapper, Placement, Protection, PAGE_SIZE};

/// Smallest stack a fiber may be given. Host calls, logging included, run
/// on the fiber stack.
pub const MIN_STACK_SIZE: usize = 16 * 1024;

const GUARD_SIZE: usize = PAGE_SIZE;

/// Function a new fiber starts in. It receives the argument given to
/// [`Fiber::new`] and must never return.
pub type FiberEntry = extern "C" fn(arg: usize) -> !;

#[derive(Debug, Error)]
pub enum FiberError {
    #[error("stack of {0} bytes is below the minimum of {MIN_STACK_SIZE}")]
    StackTooSmall(usize),
    #[error("stack of {0} bytes cannot be mapped")]
    StackSize(usize),
    #[error("could not map a fiber stack: {0}")]
    StackMap(#[source] MapError),
    #[error("stack switching is not supported on this target")]
    Unsupported,
}

/// Guard page followed by the usable stack, unmapped on drop.
#[derive(Debug)]
struct FiberStack {
    base: NonNull<u8>,
    len: usize,
}

impl FiberStack {
    fn map(usable: usize) -> Result<Self, FiberError> {
        let len = usable
            .checked_add(GUARD_SIZE)
            .ok_or(FiberError::StackSize(usable))?;
        let base = LibcMapper
            .map(Placement::Anywhere, len, Protection::READ | Protection::WRITE)
            .map_err(FiberError::StackMap)?;
        let stack = Self { base, len };
        // SAFETY: the guard page is the lowest page of the mapping just made
        // and nothing refers to it yet.
        unsafe { LibcMapper.protect(base, GUARD_SIZE, Protection::empty()) }
            .map_err(FiberError::StackMap)?;
        Ok(stack)
    }

    fn usable(&self) -> usize {
        self.len - GUARD_SIZE
    }

    fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.len
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        // SAFETY: the fiber owning this stack can no longer be resumed.
        if let Err(err) = unsafe { LibcMapper.unmap(self.base, self.len) } {
            warn!("failed to release fiber stack: {err}");
        }
    }
}

/// An independently stacked execution context.
#[derive(Debug)]
pub struct Fiber {
    sp: Cell<usize>,
    stack: Option<FiberStack>,
}

impl Fiber {
    /// The context of the calling thread. Its stack pointer is captured the
    /// first time it is suspended.
    pub fn current() -> Self {
        Self {
            sp: Cell::new(0),
            stack: None,
        }
    }

    /// Allocate a stack and prepare it so that the first resume enters
    /// `entry(arg)`.
    pub fn new(stack_size: usize, entry: FiberEntry, arg: usize) -> Result<Self, FiberError> {
        if !arch::SUPPORTED {
            return Err(FiberError::Unsupported);
        }
        if stack_size < MIN_STACK_SIZE {
            return Err(FiberError::StackTooSmall(stack_size));
        }
        let usable =
            memory::round_up(stack_size, PAGE_SIZE).ok_or(FiberError::StackSize(stack_size))?;
        let stack = FiberStack::map(usable)?;
        // The top of a mapping is page aligned, which covers the 16-byte
        // alignment the first call expects.
        // SAFETY: the frame lies within the freshly mapped stack.
        let sp = unsafe { arch::initial_frame(stack.top(), entry, arg) };
        Ok(Self {
            sp: Cell::new(sp),
            stack: Some(stack),
        })
    }

    /// Usable size of the owned stack, guard page excluded; zero for
    /// [`Fiber::current`].
    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, FiberStack::usable)
    }

    /// Whether the fiber holds a resumable stack pointer.
    pub fn is_resumable(&self) -> bool {
        self.sp.get() != 0
    }

    /// Suspend the running context into `self` and resume `other`.
    ///
    /// Returns once some context resumes `self` again.
    ///
    /// # Safety
    /// `self` must describe the context that is executing right now, `other`
    /// must be resumable and both must stay alive until `self` is resumed.
    pub unsafe fn suspend_and_resume(&self, other: &Fiber) {
        debug_assert!(other.is_resumable(), "resuming a fiber with no saved stack");
        arch::switch_stack(self.sp.as_ptr(), other.sp.get());
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "linux"))]
mod arch {
    use super::FiberEntry;
    use std::arch::global_asm;

    pub const SUPPORTED: bool = true;

    // twinload_switch_stack(save: *mut usize, next: usize)
    //   rdi = slot receiving the current stack pointer
    //   rsi = stack pointer to resume
    //
    // twinload_fiber_start
    //   first return target of a new fiber; r12 = entry, r13 = argument
    global_asm!(
        ".text",
        ".global twinload_switch_stack",
        ".type twinload_switch_stack, @function",
        "twinload_switch_stack:",
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "mov [rdi], rsp",
        "mov rsp, rsi",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
        ".size twinload_switch_stack, . - twinload_switch_stack",
        "",
        ".global twinload_fiber_start",
        ".type twinload_fiber_start, @function",
        "twinload_fiber_start:",
        "mov rdi, r13",
        "call r12",
        "ud2",
        ".size twinload_fiber_start, . - twinload_fiber_start",
    );

    extern "C" {
        fn twinload_switch_stack(save: *mut usize, next: usize);
        fn twinload_fiber_start();
    }

    /// Lay out the frame `twinload_switch_stack` pops for a new fiber:
    /// r15, r14, r13 (arg), r12 (entry), rbx, rbp, then the start routine as
    /// return address. `top` is 16-byte aligned so the entry call sees the
    /// usual alignment.
    pub unsafe fn initial_frame(top: usize, entry: FiberEntry, arg: usize) -> usize {
        let words: [usize; 7] = [
            0,
            0,
            arg,
            entry as usize,
            0,
            0,
            twinload_fiber_start as usize,
        ];
        let sp = top - words.len() * std::mem::size_of::<usize>();
        std::ptr::copy_nonoverlapping(words.as_ptr(), sp as *mut usize, words.len());
        sp
    }

    pub unsafe fn switch_stack(save: *mut usize, next: usize) {
        twinload_switch_stack(save, next);
    }
}

#[cfg(not(all(target_arch = "x86_64", target_os = "linux")))]
mod arch {
    use super::FiberEntry;

    pub const SUPPORTED: bool = false;

    pub unsafe fn initial_frame(top: usize, _entry: FiberEntry, _arg: usize) -> usize {
        top
    }

    pub unsafe fn switch_stack(_save: *mut usize, _next: usize) {
        // No fiber can be created on this target.
        std::process::abort();
    }
}
