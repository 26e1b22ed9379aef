pub mod maps;
pub mod proc_list;
pub mod regs;

use std::fs::File;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::libc;
use nix::unistd::Pid;

use crate::{Error, Result};

/// Granularity of the timed-wait poll loop.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Size of one ptrace data transfer.
pub const WORD_SIZE: usize = core::mem::size_of::<libc::c_long>();

#[cfg(target_os = "linux")]
type RawRequest = libc::c_uint;
#[cfg(target_os = "freebsd")]
type RawRequest = libc::c_int;

/// The ptrace opcodes used by the debugger, named independently of the
/// host's constant set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtraceRequest {
    TraceMe,
    Attach,
    Detach,
    Continue,
    SingleStep,
    Kill,
    ReadData,
    WriteData,
    GetRegs,
    SetRegs,
    GetFpRegs,
    SetFpRegs,
}

impl PtraceRequest {
    #[cfg(target_os = "linux")]
    fn raw(self) -> RawRequest {
        match self {
            Self::TraceMe => libc::PTRACE_TRACEME as RawRequest,
            Self::Attach => libc::PTRACE_ATTACH as RawRequest,
            Self::Detach => libc::PTRACE_DETACH as RawRequest,
            Self::Continue => libc::PTRACE_CONT as RawRequest,
            Self::SingleStep => libc::PTRACE_SINGLESTEP as RawRequest,
            Self::Kill => libc::PTRACE_KILL as RawRequest,
            Self::ReadData => libc::PTRACE_PEEKDATA as RawRequest,
            Self::WriteData => libc::PTRACE_POKEDATA as RawRequest,
            Self::GetRegs => libc::PTRACE_GETREGS as RawRequest,
            Self::SetRegs => libc::PTRACE_SETREGS as RawRequest,
            Self::GetFpRegs => libc::PTRACE_GETFPREGS as RawRequest,
            Self::SetFpRegs => libc::PTRACE_SETFPREGS as RawRequest,
        }
    }

    #[cfg(target_os = "freebsd")]
    fn raw(self) -> RawRequest {
        match self {
            Self::TraceMe => libc::PT_TRACE_ME,
            Self::Attach => libc::PT_ATTACH,
            Self::Detach => libc::PT_DETACH,
            Self::Continue => libc::PT_CONTINUE,
            Self::SingleStep => libc::PT_STEP,
            Self::Kill => libc::PT_KILL,
            Self::ReadData => libc::PT_IO,
            Self::WriteData => libc::PT_IO,
            Self::GetRegs => libc::PT_GETREGS,
            Self::SetRegs => libc::PT_SETREGS,
            Self::GetFpRegs => libc::PT_GETFPREGS,
            Self::SetFpRegs => libc::PT_SETFPREGS,
        }
    }
}

/// Issues one ptrace request and surfaces the OS error code unchanged.
///
/// A `-1` return with `errno` left clear is valid peek data, not an
/// error.
#[cfg(target_os = "linux")]
pub(crate) fn ptrace_checked(
    request: PtraceRequest,
    tid: Pid,
    addr: *mut libc::c_void,
    data: *mut libc::c_void,
) -> Result<libc::c_long> {
    Errno::clear();

    let ret = unsafe { libc::ptrace(request.raw(), tid.as_raw(), addr, data) };

    if ret == -1 {
        match Errno::last() {
            Errno::UnknownErrno => Ok(ret),
            errno => Err(Error::Os(errno)),
        }
    } else {
        Ok(ret)
    }
}

#[cfg(target_os = "freebsd")]
pub(crate) fn ptrace_checked(
    request: PtraceRequest,
    tid: Pid,
    addr: *mut libc::c_void,
    data: *mut libc::c_void,
) -> Result<libc::c_long> {
    Errno::clear();

    let ret = unsafe {
        libc::ptrace(
            request.raw(),
            tid.as_raw(),
            addr.cast::<libc::c_char>(),
            data as libc::c_int,
        )
    };

    if ret == -1 {
        match Errno::last() {
            Errno::UnknownErrno => Ok(ret as libc::c_long),
            errno => Err(Error::Os(errno)),
        }
    } else {
        Ok(ret as libc::c_long)
    }
}

/// Marks the calling process as traced by its parent.
///
/// Only meaningful from a `pre_exec` closure of the future debuggee.
pub fn trace_me() -> io::Result<()> {
    Errno::clear();

    let ret = unsafe {
        #[cfg(target_os = "linux")]
        {
            libc::ptrace(
                PtraceRequest::TraceMe.raw(),
                0,
                core::ptr::null_mut::<libc::c_void>(),
                core::ptr::null_mut::<libc::c_void>(),
            )
        }
        #[cfg(target_os = "freebsd")]
        {
            libc::ptrace(PtraceRequest::TraceMe.raw(), 0, core::ptr::null_mut(), 0) as libc::c_long
        }
    };

    if ret == -1 {
        Err(io::Error::from_raw_os_error(Errno::last() as i32))
    } else {
        Ok(())
    }
}

pub fn attach(pid: Pid) -> Result<()> {
    ptrace_checked(
        PtraceRequest::Attach,
        pid,
        core::ptr::null_mut(),
        core::ptr::null_mut(),
    )
    .map(drop)
}

pub fn detach(pid: Pid) -> Result<()> {
    ptrace_checked(
        PtraceRequest::Detach,
        pid,
        resume_addr(),
        core::ptr::null_mut(),
    )
    .map(drop)
}

pub fn kill(pid: Pid) -> Result<()> {
    let res = ptrace_checked(
        PtraceRequest::Kill,
        pid,
        core::ptr::null_mut(),
        core::ptr::null_mut(),
    );

    // The kill request only takes effect from a signal stop; the raw
    // signal covers a tracee that is currently running.
    let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);

    match res {
        Err(Error::Os(Errno::ESRCH)) => Ok(()),
        other => other.map(drop),
    }
}

/// Resumes the given thread, re-injecting `signal` (0 for none).
pub fn resume(tid: Pid, signal: i32) -> Result<()> {
    ptrace_checked(
        PtraceRequest::Continue,
        tid,
        resume_addr(),
        signal as usize as *mut libc::c_void,
    )
    .map(drop)
}

/// Single-steps the given thread, re-injecting `signal` (0 for none).
pub fn single_step(tid: Pid, signal: i32) -> Result<()> {
    ptrace_checked(
        PtraceRequest::SingleStep,
        tid,
        resume_addr(),
        signal as usize as *mut libc::c_void,
    )
    .map(drop)
}

// The BSD continue/step/detach requests take the resume address in
// `addr`, with `1` meaning "wherever the thread stopped". Linux ignores
// the field.
fn resume_addr() -> *mut libc::c_void {
    #[cfg(target_os = "linux")]
    {
        core::ptr::null_mut()
    }
    #[cfg(target_os = "freebsd")]
    {
        1 as *mut libc::c_void
    }
}

/// Reads one machine word from the debuggee.
///
/// Returns `Ok(None)` when the address is not mapped; callers often
/// probe.
#[cfg(target_os = "linux")]
pub fn read_word(pid: Pid, addr: crate::Address) -> Result<Option<u64>> {
    match ptrace_checked(
        PtraceRequest::ReadData,
        pid,
        addr as *mut libc::c_void,
        core::ptr::null_mut(),
    ) {
        Ok(word) => Ok(Some(word as u64)),
        Err(Error::Os(Errno::EIO)) | Err(Error::Os(Errno::EFAULT)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Overwrites one machine word in the debuggee.
#[cfg(target_os = "linux")]
pub fn write_word(pid: Pid, addr: crate::Address, word: u64) -> Result<()> {
    ptrace_checked(
        PtraceRequest::WriteData,
        pid,
        addr as *mut libc::c_void,
        word as usize as *mut libc::c_void,
    )
    .map(drop)
}

#[cfg(target_os = "freebsd")]
pub fn read_word(pid: Pid, addr: crate::Address) -> Result<Option<u64>> {
    let mut word = 0u64;

    match ptrace_io(pid, libc::PIOD_READ_D, addr, &mut word as *mut u64 as *mut _) {
        Ok(()) => Ok(Some(word)),
        Err(Error::Os(Errno::EIO)) | Err(Error::Os(Errno::EFAULT)) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(target_os = "freebsd")]
pub fn write_word(pid: Pid, addr: crate::Address, word: u64) -> Result<()> {
    let mut word = word;

    ptrace_io(pid, libc::PIOD_WRITE_D, addr, &mut word as *mut u64 as *mut _)
}

#[cfg(target_os = "freebsd")]
fn ptrace_io(
    pid: Pid,
    op: libc::c_int,
    addr: crate::Address,
    local: *mut libc::c_void,
) -> Result<()> {
    let mut desc = libc::ptrace_io_desc {
        piod_op: op,
        piod_offs: addr as *mut libc::c_void,
        piod_addr: local,
        piod_len: WORD_SIZE,
    };

    ptrace_checked(
        PtraceRequest::ReadData,
        pid,
        &mut desc as *mut libc::ptrace_io_desc as *mut _,
        core::ptr::null_mut(),
    )?;

    if desc.piod_len != WORD_SIZE {
        return Err(Error::AddressUnmapped(addr));
    }

    Ok(())
}

/// Spawns a new child process under trace.
///
/// The child installs self-trace, optionally redirects its stdio to
/// `tty`, then execs; the post-exec trap is left pending for the caller
/// to reap.
pub fn spawn_traced(
    path: &Path,
    cwd: Option<&Path>,
    args: &[String],
    tty: Option<&Path>,
) -> Result<Pid> {
    let mut command = Command::new(path);
    command.args(args);

    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    if let Some(tty) = tty {
        let tty = File::options()
            .read(true)
            .write(true)
            .open(tty)
            .map_err(|e| Error::Spawn(path.to_owned(), e))?;

        command
            .stdin(Stdio::from(tty.try_clone().map_err(Error::Io)?))
            .stdout(Stdio::from(tty.try_clone().map_err(Error::Io)?))
            .stderr(Stdio::from(tty));
    }

    // On this family, if a `pre_exec` closure is specified, `rust-std`
    // spawns the process with `fork`+`exec` rather than `posix_spawn`,
    // which is what self-tracing requires.
    unsafe { command.pre_exec(trace_me) };

    let child = command
        .spawn()
        .map_err(|e| Error::Spawn(path.to_owned(), e))?;

    Ok(Pid::from_raw(child.id() as i32))
}

/// Outcome of a timed wait.
#[derive(Clone, Copy, Debug)]
pub enum WaitOutcome {
    /// A thread reported a raw wait status.
    Event { tid: Pid, status: i32 },

    /// The deadline elapsed with nothing pending.
    TimedOut,
}

/// Waits for a wait status from `pid`, polling at [`POLL_INTERVAL`]
/// granularity until `timeout` elapses.
pub fn waitpid_timeout(pid: Pid, timeout: Duration) -> Result<WaitOutcome> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some((tid, status)) = waitpid_raw(pid, libc::WNOHANG)? {
            return Ok(WaitOutcome::Event { tid, status });
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(WaitOutcome::TimedOut);
        }

        std::thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Blocks until `pid` reports a wait status.
pub fn waitpid_blocking(pid: Pid) -> Result<(Pid, i32)> {
    loop {
        if let Some(event) = waitpid_raw(pid, 0)? {
            return Ok(event);
        }
    }
}

fn waitpid_raw(pid: Pid, flags: libc::c_int) -> Result<Option<(Pid, i32)>> {
    #[cfg(target_os = "linux")]
    let flags = flags | libc::__WALL;

    let mut status = 0;

    let ret = unsafe { libc::waitpid(pid.as_raw(), &mut status, flags) };

    match ret {
        -1 => Err(Error::Os(Errno::last())),
        0 => Ok(None),
        tid => Ok(Some((Pid::from_raw(tid), status))),
    }
}

/// Size of a page on this host.
pub fn page_size() -> Result<u64> {
    use nix::unistd::{sysconf, SysconfVar};

    match sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) => Ok(size as u64),
        Ok(None) => Err(Error::Os(Errno::EINVAL)),
        Err(errno) => Err(Error::Os(errno)),
    }
}
