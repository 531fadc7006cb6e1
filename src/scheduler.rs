// CLASSIFICATION: COMMUNITY
// Filename: scheduler.rs v0.1
// Author: Lukas Bower
// Date Modified: 2026-10-19

//! Cooperative scheduler for two loaded programs.
//!
//! Three contexts exist: the supervisor (the thread that calls
//! [`Scheduler::run`]) and user contexts A and B. Exactly one runs at a
//! time. Control moves only when a program calls yield-to-other or
//! exit-to-supervisor through its host call table, or returns from its
//! entry point (treated as exit with status 0).

use std::cell::{Cell, RefCell};

use log::{debug, info};
use thiserror::Error;

use crate::abi::{HostCallError, HostCallTable, ProgramEntry};
use crate::fiber::{Fiber, FiberError};
use crate::host::Host;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    Supervisor,
    A,
    B,
}

impl ContextId {
    fn user_index(self) -> Option<usize> {
        match self {
            ContextId::Supervisor => None,
            ContextId::A => Some(0),
            ContextId::B => Some(1),
        }
    }

    /// The user context a yield from `self` switches to.
    pub fn other(self) -> Option<ContextId> {
        match self {
            ContextId::Supervisor => None,
            ContextId::A => Some(ContextId::B),
            ContextId::B => Some(ContextId::A),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Invalid stack pointer: {0}")]
    StackSetup(#[from] FiberError),
    #[error("host call table incomplete: {0}")]
    HostCall(#[from] HostCallError),
    #[error("{0:?} is not a user context")]
    NotUserContext(ContextId),
    #[error("context {0:?} already has a program")]
    AlreadySpawned(ContextId),
    #[error("no program in context A")]
    NothingToRun,
    #[error("scheduler already ran to completion")]
    Finished,
}

/// How a cooperative run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    /// Context that exited to the supervisor.
    pub context: ContextId,
    pub status: i32,
    /// Context switches performed, including the first and the last.
    pub transfers: u64,
}

/// Saved state of every context. Shared by the supervisor and the host
/// calls made from inside user contexts.
pub(crate) struct Contexts {
    supervisor: Fiber,
    users: [Option<Fiber>; 2],
    current: Cell<ContextId>,
    transfers: Cell<u64>,
    trace: RefCell<Vec<ContextId>>,
    exited: Cell<Option<(ContextId, i32)>>,
}

impl Contexts {
    fn new() -> Self {
        Self {
            supervisor: Fiber::current(),
            users: [None, None],
            current: Cell::new(ContextId::Supervisor),
            transfers: Cell::new(0),
            trace: RefCell::new(Vec::new()),
            exited: Cell::new(None),
        }
    }

    fn fiber(&self, id: ContextId) -> Option<&Fiber> {
        match id.user_index() {
            Some(i) => self.users[i].as_ref(),
            None => Some(&self.supervisor),
        }
    }

    /// Suspend `from` and resume `to`. Returns when `from` is resumed.
    unsafe fn switch(&self, from: ContextId, to: ContextId) {
        let (Some(src), Some(dst)) = (self.fiber(from), self.fiber(to)) else {
            return;
        };
        debug!("switch {from:?} -> {to:?}");
        self.current.set(to);
        self.transfers.set(self.transfers.get() + 1);
        self.trace.borrow_mut().push(to);
        src.suspend_and_resume(dst);
    }

    pub(crate) fn yield_to_other(&self) {
        let me = self.current.get();
        let Some(other) = me.other() else {
            return;
        };
        if self.fiber(other).is_none() {
            // Sole user context: nothing to yield to.
            return;
        }
        // SAFETY: `me` is the running context and both fibers live as long as
        // the scheduler that attached these contexts.
        unsafe { self.switch(me, other) }
    }

    pub(crate) fn exit_to_supervisor(&self, status: i32) -> ! {
        let me = self.current.get();
        self.exited.set(Some((me, status)));
        // SAFETY: as in `yield_to_other`. The supervisor never resumes `me`.
        unsafe { self.switch(me, ContextId::Supervisor) };
        // Only reachable if exit is requested from the supervisor itself.
        std::process::exit(status)
    }
}

/// What a new user fiber needs to enter its program.
struct StartRecord {
    entry: ProgramEntry,
    table: *const HostCallTable,
    contexts: *const Contexts,
}

extern "C" fn user_main(arg: usize) -> ! {
    // SAFETY: `arg` is a `StartRecord` owned by the scheduler, which outlives
    // every fiber it created.
    let start = unsafe { &*(arg as *const StartRecord) };
    unsafe { (start.entry)(start.table) };
    let contexts = unsafe { &*start.contexts };
    debug!("{:?} returned from its entry point", contexts.current.get());
    contexts.exit_to_supervisor(0)
}

/// Runs up to two programs cooperatively on behalf of one [`Host`].
pub struct Scheduler<'h> {
    host: &'h Host,
    table: Box<HostCallTable>,
    contexts: Box<Contexts>,
    /// Owns the records the user fibers read their entry from; never read
    /// here.
    _starts: [Option<Box<StartRecord>>; 2],
    stack_size: usize,
    finished: Cell<bool>,
}

impl<'h> Scheduler<'h> {
    pub fn new(host: &'h Host, stack_size: usize) -> Result<Self, SchedulerError> {
        Ok(Self {
            host,
            table: Box::new(host.call_table()?),
            contexts: Box::new(Contexts::new()),
            _starts: [None, None],
            stack_size,
            finished: Cell::new(false),
        })
    }

    /// The table handed to every program this scheduler starts.
    pub fn table(&self) -> &HostCallTable {
        &self.table
    }

    /// Prepare `context` to start at `entry` when it is first resumed.
    pub fn spawn(&mut self, context: ContextId, entry: ProgramEntry) -> Result<(), SchedulerError> {
        let index = context
            .user_index()
            .ok_or(SchedulerError::NotUserContext(context))?;
        if self.contexts.users[index].is_some() {
            return Err(SchedulerError::AlreadySpawned(context));
        }
        let start = Box::new(StartRecord {
            entry,
            table: &*self.table,
            contexts: &*self.contexts,
        });
        let fiber = Fiber::new(
            self.stack_size,
            user_main,
            &*start as *const StartRecord as usize,
        )?;
        self._starts[index] = Some(start);
        self.contexts.users[index] = Some(fiber);
        debug!("{context:?} ready with a {} byte stack", self.stack_size);
        Ok(())
    }

    /// Enter context A and return once a context exits to the supervisor.
    pub fn run(&self) -> Result<ExitReport, SchedulerError> {
        if self.finished.get() {
            return Err(SchedulerError::Finished);
        }
        if self.contexts.users[0].is_none() {
            return Err(SchedulerError::NothingToRun);
        }
        self.finished.set(true);
        {
            let _attached = self.host.attach(&self.contexts);
            // SAFETY: the supervisor is running; A holds a fresh frame.
            unsafe { self.contexts.switch(ContextId::Supervisor, ContextId::A) };
        }
        let (context, status) = self.contexts.exited.get().unwrap_or((ContextId::A, 0));
        let report = ExitReport {
            context,
            status,
            transfers: self.contexts.transfers.get(),
        };
        info!(
            "{:?} exited with status {} after {} transfers",
            report.context, report.status, report.transfers
        );
        Ok(report)
    }

    /// Every context entered so far, in order.
    pub fn trace(&self) -> Vec<ContextId> {
        self.contexts.trace.borrow().clone()
    }
}
