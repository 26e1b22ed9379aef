use nix::libc;
use nix::unistd::Pid;

/// How the debuggee terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationStatus {
    /// Normal exit with the given code.
    Exited { code: i32 },

    /// Killed by the given signal.
    Signaled { signal: i32 },
}

/// Event describing a state change reported by the debuggee.
///
/// Immutable once constructed; every variant carries the process and
/// reporting thread it originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DebugEvent {
    /// A thread stopped on a signal other than the trace trap.
    Stopped { signal: i32, pid: Pid, tid: Pid },

    /// A thread stopped on the trace trap (breakpoint, single-step,
    /// post-exec stop).
    Trap { pid: Pid, tid: Pid },

    /// A thread stopped at a syscall boundary (only reported when
    /// syscall tracing is enabled).
    Syscall { pid: Pid, tid: Pid },

    /// The process is gone.
    Terminated { status: TerminationStatus, pid: Pid },
}

impl DebugEvent {
    /// The thread that reported the event (the principal thread for
    /// terminations).
    pub fn tid(&self) -> Pid {
        match *self {
            Self::Stopped { tid, .. } | Self::Trap { tid, .. } | Self::Syscall { tid, .. } => tid,
            Self::Terminated { pid, .. } => pid,
        }
    }

    pub fn pid(&self) -> Pid {
        match *self {
            Self::Stopped { pid, .. }
            | Self::Trap { pid, .. }
            | Self::Syscall { pid, .. }
            | Self::Terminated { pid, .. } => pid,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated { .. })
    }
}

// Stop signal value reported for a syscall boundary when the tracer
// requested syscall-stop marking.
const SYSCALL_TRACE_MARK: i32 = libc::SIGTRAP | 0x80;

/// Classifies a raw wait status into a typed event.
///
/// Rules are evaluated in order: exited, signaled, trace trap, plain
/// stop. Every status accepted by `waitpid` falls in exactly one case.
pub fn classify(status: i32, pid: Pid, tid: Pid) -> DebugEvent {
    if libc::WIFEXITED(status) {
        DebugEvent::Terminated {
            status: TerminationStatus::Exited {
                code: libc::WEXITSTATUS(status),
            },
            pid,
        }
    } else if libc::WIFSIGNALED(status) {
        DebugEvent::Terminated {
            status: TerminationStatus::Signaled {
                signal: libc::WTERMSIG(status),
            },
            pid,
        }
    } else if libc::WIFSTOPPED(status) && libc::WSTOPSIG(status) == libc::SIGTRAP {
        DebugEvent::Trap { pid, tid }
    } else if libc::WIFSTOPPED(status) && libc::WSTOPSIG(status) == SYSCALL_TRACE_MARK {
        DebugEvent::Syscall { pid, tid }
    } else {
        debug_assert!(libc::WIFSTOPPED(status));

        DebugEvent::Stopped {
            signal: libc::WSTOPSIG(status),
            pid,
            tid,
        }
    }
}
