use std::collections::HashMap;

use nix::libc;
use nix::unistd::Pid;

/// Last-seen state of one debuggee thread.
#[derive(Clone, Copy, Debug)]
pub struct ThreadState {
    /// ID of the thread.
    pub tid: Pid,

    /// Raw wait status of the thread's most recent stop.
    pub last_status: i32,

    /// Whether resume/step/register operations target this thread.
    pub active: bool,
}

/// Registry of every thread observed on the current debuggee.
///
/// Threads are created on first observation (attach or stop event) and
/// removed on exit; the registry never discovers threads on its own.
#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: HashMap<Pid, ThreadState>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a stop status for `tid`, inserting the thread if it was
    /// not seen before.
    pub fn observe(&mut self, tid: Pid, status: i32) {
        self.threads
            .entry(tid)
            .or_insert(ThreadState {
                tid,
                last_status: 0,
                active: false,
            })
            .last_status = status;
    }

    /// Marks `tid` as the active thread. Returns false if unknown.
    pub fn set_active(&mut self, tid: Pid) -> bool {
        if !self.threads.contains_key(&tid) {
            return false;
        }

        for state in self.threads.values_mut() {
            state.active = state.tid == tid;
        }

        true
    }

    pub fn get(&self, tid: Pid) -> Option<&ThreadState> {
        self.threads.get(&tid)
    }

    pub fn contains(&self, tid: Pid) -> bool {
        self.threads.contains_key(&tid)
    }

    pub fn remove(&mut self, tid: Pid) {
        self.threads.remove(&tid);
    }

    pub fn clear(&mut self) {
        self.threads.clear();
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// IDs of every registered thread.
    pub fn tids(&self) -> Vec<Pid> {
        let mut tids: Vec<Pid> = self.threads.keys().copied().collect();
        tids.sort();
        tids
    }

    /// Signal to re-inject when resuming `tid` with its last stop
    /// passed through: the termination signal if it was killed, the
    /// stop signal if it was stopped, 0 otherwise.
    pub fn resume_signal(&self, tid: Pid) -> i32 {
        let Some(state) = self.threads.get(&tid) else {
            return 0;
        };

        if libc::WIFSIGNALED(state.last_status) {
            libc::WTERMSIG(state.last_status)
        } else if libc::WIFSTOPPED(state.last_status) {
            libc::WSTOPSIG(state.last_status)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use nix::libc;
    use nix::unistd::Pid;

    use super::ThreadRegistry;

    const TID: Pid = Pid::from_raw(42);
    const OTHER: Pid = Pid::from_raw(43);

    #[test]
    fn observe_inserts_then_updates() {
        let mut registry = ThreadRegistry::new();

        registry.observe(TID, (libc::SIGTRAP << 8) | 0x7f);
        assert_eq!(registry.len(), 1);

        registry.observe(TID, (libc::SIGINT << 8) | 0x7f);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(TID).unwrap().last_status, (libc::SIGINT << 8) | 0x7f);
    }

    #[test]
    fn set_active_is_exclusive() {
        let mut registry = ThreadRegistry::new();
        registry.observe(TID, 0);
        registry.observe(OTHER, 0);

        assert!(registry.set_active(TID));
        assert!(registry.set_active(OTHER));

        assert!(!registry.get(TID).unwrap().active);
        assert!(registry.get(OTHER).unwrap().active);

        assert!(!registry.set_active(Pid::from_raw(99)));
    }

    #[test]
    fn resume_signal_from_stop_status() {
        let mut registry = ThreadRegistry::new();

        registry.observe(TID, (libc::SIGSEGV << 8) | 0x7f);
        assert_eq!(registry.resume_signal(TID), libc::SIGSEGV);

        // Normal exits re-inject nothing.
        registry.observe(TID, 0);
        assert_eq!(registry.resume_signal(TID), 0);

        assert_eq!(registry.resume_signal(OTHER), 0);
    }
}
