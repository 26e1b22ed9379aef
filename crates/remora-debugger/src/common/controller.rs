use std::path::Path;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use super::event::{classify, DebugEvent};
use crate::sys::{self, WaitOutcome, WORD_SIZE};
use crate::{
    Address, BreakpointRegistry, Error, NoBreakpoints, ProcessRecord, Region, RegistersSnapshot,
    Result, ThreadRegistry,
};

/// Run state of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// No debuggee; only open/attach/enumerate are legal.
    Detached,

    /// Attached, debuggee running; only `wait_event` is legal.
    Running,

    /// Attached, active thread stopped; memory, register and resume
    /// operations are legal.
    Stopped,
}

/// What to do with the active thread's pending signal when advancing it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResumeDisposition {
    /// Leave the debuggee paused; no request is issued.
    Stop,

    /// Resume with no signal.
    Continue,

    /// Resume re-injecting the signal that caused the last stop.
    PassSignal,
}

/// Owning controller of one debuggee process.
///
/// The controller drives a single pid through the ptrace channel under
/// a stop-the-world discipline: every operation that touches registers
/// or memory presumes the active thread is stopped. It never spins a
/// background thread; [`Controller::wait_event`] is the only blocking
/// operation and its block is bounded by the caller's timeout.
pub struct Controller {
    run_state: RunState,
    pid: Option<Pid>,
    active: Option<Pid>,
    threads: ThreadRegistry,
    breakpoints: Box<dyn BreakpointRegistry>,
    page_size: u64,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    pub fn new() -> Self {
        Self {
            run_state: RunState::Detached,
            pid: None,
            active: None,
            threads: ThreadRegistry::new(),
            breakpoints: Box::new(NoBreakpoints),
            page_size: sys::page_size().unwrap_or(4096),
        }
    }

    /// Wires in the breakpoint registry collaborator, cleared before
    /// the ptrace channel is released.
    pub fn with_breakpoints(mut self, breakpoints: Box<dyn BreakpointRegistry>) -> Self {
        self.breakpoints = breakpoints;
        self
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn attached(&self) -> bool {
        self.run_state != RunState::Detached
    }

    /// Process ID of the debuggee, when attached.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// Thread targeted by resume/step/register operations.
    pub fn active_thread(&self) -> Option<Pid> {
        self.active
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// Size of a page on this host.
    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Spawns `path` under trace and waits for its post-exec stop.
    ///
    /// On success the controller is stopped on the principal thread;
    /// any other first event rolls the controller back to detached.
    pub fn open(
        &mut self,
        path: &Path,
        cwd: Option<&Path>,
        args: &[String],
        tty: Option<&Path>,
    ) -> Result<Pid> {
        self.ensure_detached()?;

        let pid = sys::spawn_traced(path, cwd, args, tty)?;

        let (_, status) = match sys::waitpid_blocking(pid) {
            Ok(event) => event,
            Err(e) => {
                let _ = sys::kill(pid);
                return Err(e);
            }
        };

        // The very first event must be the post-exec trace trap.
        if !matches!(classify(status, pid, pid), DebugEvent::Trap { .. }) {
            if !nix::libc::WIFEXITED(status) && !nix::libc::WIFSIGNALED(status) {
                let _ = sys::detach(pid);
            }
            return Err(Error::UnexpectedFirstEvent(status));
        }

        self.register_principal(pid, status, RunState::Stopped);

        tracing::debug!(pid = pid.as_raw(), path = %path.display(), "debuggee spawned");

        Ok(pid)
    }

    /// Attaches to a running process.
    ///
    /// Only the principal thread is registered here; other threads are
    /// registered on first sight of their stop events.
    pub fn attach(&mut self, pid: Pid) -> Result<()> {
        self.ensure_detached()?;

        sys::attach(pid)?;

        self.register_principal(pid, 0, RunState::Running);

        tracing::debug!(pid = pid.as_raw(), "attached");

        Ok(())
    }

    /// Releases the debuggee and lets it run free.
    ///
    /// Always legal; a detached controller stays detached. The
    /// transition happens even if the OS rejects the request.
    pub fn detach(&mut self) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        self.breakpoints.clear_all();

        let res = sys::detach(pid);
        self.reset();

        tracing::debug!(pid = pid.as_raw(), "detached");

        res
    }

    /// Kills the debuggee and reaps the zombie.
    pub fn kill(&mut self) -> Result<()> {
        let Some(pid) = self.pid else {
            return Ok(());
        };

        self.breakpoints.clear_all();

        let res = sys::kill(pid);
        let _ = sys::waitpid_blocking(pid);
        self.reset();

        tracing::debug!(pid = pid.as_raw(), "killed");

        res
    }

    /// Waits for the next debug event, at most `timeout`.
    ///
    /// A non-timeout return registers the reporting thread, stores its
    /// raw status and makes it the active thread. A timeout leaves the
    /// controller unchanged.
    pub fn wait_event(&mut self, timeout: Duration) -> Result<DebugEvent> {
        let pid = self.pid.ok_or(Error::NotAttached)?;

        let (tid, status) = match sys::waitpid_timeout(pid, timeout)? {
            WaitOutcome::Event { tid, status } => (tid, status),
            WaitOutcome::TimedOut => return Err(Error::Timeout),
        };

        let event = classify(status, pid, tid);

        if event.is_terminal() {
            // Nothing left to control; the zombie was reaped by the
            // wait itself.
            self.reset();
        } else {
            self.threads.observe(tid, status);
            self.threads.set_active(tid);
            self.active = Some(tid);
            self.run_state = RunState::Stopped;
        }

        Ok(event)
    }

    /// Resumes the active thread.
    ///
    /// Other threads stay wherever they are. The debuggee must be in
    /// its stopped interval; the OS rejects the request otherwise.
    pub fn resume(&mut self, disposition: ResumeDisposition) -> Result<()> {
        self.advance(disposition, sys::resume)
    }

    /// Single-steps the active thread.
    pub fn step(&mut self, disposition: ResumeDisposition) -> Result<()> {
        self.advance(disposition, sys::single_step)
    }

    fn advance(
        &mut self,
        disposition: ResumeDisposition,
        op: fn(Pid, i32) -> Result<()>,
    ) -> Result<()> {
        if !self.attached() {
            return Err(Error::NotAttached);
        }

        let signal = match disposition {
            ResumeDisposition::Stop => return Ok(()),
            ResumeDisposition::Continue => 0,
            ResumeDisposition::PassSignal => self
                .active
                .map(|tid| self.threads.resume_signal(tid))
                .unwrap_or(0),
        };

        let tid = self.active.ok_or(Error::NotAttached)?;

        op(tid, signal)?;

        self.run_state = RunState::Running;

        Ok(())
    }

    /// Sends SIGSTOP to every registered thread. Does not wait; the
    /// stops surface through [`Controller::wait_event`].
    pub fn pause(&mut self) -> Result<()> {
        if !self.attached() {
            return Err(Error::NotAttached);
        }

        for tid in self.threads.tids() {
            signal::kill(tid, Signal::SIGSTOP)?;
        }

        Ok(())
    }

    /// Selects the thread targeted by resume/step/register operations.
    pub fn set_active_thread(&mut self, tid: Pid) -> Result<()> {
        if !self.threads.set_active(tid) {
            return Err(Error::UnknownThread(tid.as_raw()));
        }

        self.active = Some(tid);

        Ok(())
    }

    /// Reads one machine word; `Ok(None)` when the address is not
    /// mapped (callers often probe).
    pub fn read_word(&self, addr: Address) -> Result<Option<u64>> {
        let pid = self.pid.ok_or(Error::NotAttached)?;

        sys::read_word(pid, addr)
    }

    /// Overwrites one whole machine word.
    pub fn write_word(&mut self, addr: Address, word: u64) -> Result<()> {
        let pid = self.pid.ok_or(Error::NotAttached)?;

        sys::write_word(pid, addr, word)
    }

    /// Reads `buf.len()` bytes, stitched from word transfers.
    pub fn read_memory(&self, addr: Address, buf: &mut [u8]) -> Result<()> {
        let pid = self.pid.ok_or(Error::NotAttached)?;

        let mut word_addr = addr & !(WORD_SIZE as u64 - 1);
        let mut filled = 0usize;

        while filled < buf.len() {
            let word = sys::read_word(pid, word_addr)?
                .ok_or(Error::AddressUnmapped(word_addr))?
                .to_ne_bytes();

            let skip = (addr + filled as u64 - word_addr) as usize;
            let take = (WORD_SIZE - skip).min(buf.len() - filled);

            buf[filled..filled + take].copy_from_slice(&word[skip..skip + take]);

            filled += take;
            word_addr += WORD_SIZE as u64;
        }

        Ok(())
    }

    /// Writes `buf` into the debuggee, stitched from word transfers.
    ///
    /// Partially covered words at either edge are read back first so
    /// that neighbouring bytes survive.
    pub fn write_memory(&mut self, addr: Address, buf: &[u8]) -> Result<()> {
        let pid = self.pid.ok_or(Error::NotAttached)?;

        let mut word_addr = addr & !(WORD_SIZE as u64 - 1);
        let mut written = 0usize;

        while written < buf.len() {
            let skip = (addr + written as u64 - word_addr) as usize;
            let take = (WORD_SIZE - skip).min(buf.len() - written);

            let word = if take == WORD_SIZE {
                let mut word = [0u8; WORD_SIZE];
                word.copy_from_slice(&buf[written..written + WORD_SIZE]);
                word
            } else {
                let mut word = sys::read_word(pid, word_addr)?
                    .ok_or(Error::AddressUnmapped(word_addr))?
                    .to_ne_bytes();
                word[skip..skip + take].copy_from_slice(&buf[written..written + take]);
                word
            };

            sys::write_word(pid, word_addr, u64::from_ne_bytes(word))?;

            written += take;
            word_addr += WORD_SIZE as u64;
        }

        Ok(())
    }

    /// Copies the register bank of the active thread.
    ///
    /// A detached controller reports an all-zero snapshot.
    pub fn get_state(&self) -> Result<RegistersSnapshot> {
        let Some(tid) = self.active.filter(|_| self.attached()) else {
            return Ok(RegistersSnapshot::zeroed());
        };

        sys::regs::get_registers(tid)
    }

    /// Writes the register bank of the active thread; takes effect on
    /// the next resume or step.
    pub fn set_state(&mut self, snapshot: &RegistersSnapshot) -> Result<()> {
        let tid = self.active.filter(|_| self.attached()).ok_or(Error::NotAttached)?;

        sys::regs::set_registers(tid, snapshot)
    }

    /// Enumerates the debuggee's memory map.
    pub fn memory_regions(&self) -> Result<Vec<Region>> {
        let pid = self.pid.ok_or(Error::NotAttached)?;

        sys::maps::memory_regions(pid)
    }

    /// Lists every process visible on the host.
    pub fn enumerate_processes(&self) -> Result<Vec<ProcessRecord>> {
        sys::proc_list::enumerate_processes()
    }

    /// Executable name of an arbitrary process, copied out of the
    /// kernel record.
    pub fn process_exe(&self, pid: Pid) -> Result<String> {
        sys::proc_list::process_exe(pid)
    }

    /// Parent of an arbitrary process.
    pub fn parent_pid(&self, pid: Pid) -> Result<Pid> {
        sys::proc_list::parent_pid(pid)
    }

    fn ensure_detached(&self) -> Result<()> {
        match self.pid {
            Some(pid) => Err(Error::AlreadyAttached(pid.as_raw())),
            None => Ok(()),
        }
    }

    fn register_principal(&mut self, pid: Pid, status: i32, run_state: RunState) {
        self.threads.clear();
        self.threads.observe(pid, status);
        self.threads.set_active(pid);
        self.pid = Some(pid);
        self.active = Some(pid);
        self.run_state = run_state;
    }

    fn reset(&mut self) {
        self.threads.clear();
        self.pid = None;
        self.active = None;
        self.run_state = RunState::Detached;
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.attached() {
            let _ = self.detach();
        }
    }
}
