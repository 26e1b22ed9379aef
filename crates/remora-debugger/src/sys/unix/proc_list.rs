//! Host process listing.
//!
//! Records are copied out of the kernel tables before the query handle
//! is released; nothing borrowed from the kernel survives these calls.

use nix::errno::Errno;
use nix::unistd::Pid;

use crate::{Error, Result};

/// One entry of the host process table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: i32,
    pub ppid: i32,
    pub uid: u32,
    /// Command name, copied out of the kernel record.
    pub name: String,
}

/// Lists every process visible to the caller.
pub fn enumerate_processes() -> Result<Vec<ProcessRecord>> {
    imp::enumerate_processes()
}

/// Returns the executable name of the given process.
pub fn process_exe(pid: Pid) -> Result<String> {
    imp::process_exe(pid)
}

/// Returns the parent of the given process.
///
/// A query matching zero records is an OS error, not an empty result.
pub fn parent_pid(pid: Pid) -> Result<Pid> {
    let record = imp::find_process(pid)?.ok_or(Error::Os(Errno::ESRCH))?;

    Ok(Pid::from_raw(record.ppid))
}

#[cfg(target_os = "linux")]
mod imp {
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    use nix::errno::Errno;
    use nix::unistd::Pid;

    use super::ProcessRecord;
    use crate::{Error, Result};

    pub fn enumerate_processes() -> Result<Vec<ProcessRecord>> {
        let mut records = Vec::new();

        for entry in std::fs::read_dir("/proc")? {
            let entry = entry?;

            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse().ok()) else {
                continue;
            };

            // A process may exit between the directory scan and the
            // record read; skip it rather than fail the listing.
            if let Ok(Some(record)) = read_record(pid) {
                records.push(record);
            }
        }

        records.sort_by_key(|r| r.pid);

        Ok(records)
    }

    pub fn find_process(pid: Pid) -> Result<Option<ProcessRecord>> {
        read_record(pid.as_raw())
    }

    pub fn process_exe(pid: Pid) -> Result<String> {
        let link = format!("/proc/{}/exe", pid.as_raw());

        match std::fs::read_link(&link) {
            Ok(path) => Ok(path.to_string_lossy().into_owned()),
            // The link is unreadable for processes we cannot trace;
            // fall back to the command name from the process record.
            Err(_) => find_process(pid)?
                .map(|r| r.name)
                .ok_or(Error::Os(Errno::ESRCH)),
        }
    }

    fn read_record(pid: i32) -> Result<Option<ProcessRecord>> {
        let dir = format!("/proc/{pid}");

        let stat = match std::fs::read_to_string(format!("{dir}/stat")) {
            Ok(stat) => stat,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // `stat` reads `pid (comm) state ppid …`; the command name may
        // itself contain spaces or parentheses, so split on the last
        // closing parenthesis.
        let (head, tail) = stat.rsplit_once(')').ok_or(Error::Os(Errno::EINVAL))?;
        let name = head
            .split_once('(')
            .map(|(_, comm)| comm.to_owned())
            .ok_or(Error::Os(Errno::EINVAL))?;

        let ppid = tail
            .split_whitespace()
            .nth(1)
            .and_then(|f| f.parse().ok())
            .ok_or(Error::Os(Errno::EINVAL))?;

        let uid = std::fs::metadata(Path::new(&dir))?.uid();

        Ok(Some(ProcessRecord {
            pid,
            ppid,
            uid,
            name,
        }))
    }
}

#[cfg(target_os = "freebsd")]
mod imp {
    use std::ffi::CStr;

    use nix::errno::Errno;
    use nix::libc;
    use nix::unistd::Pid;

    use super::ProcessRecord;
    use crate::{Error, Result};

    pub fn enumerate_processes() -> Result<Vec<ProcessRecord>> {
        let mut records = kinfo_query(&[
            libc::CTL_KERN,
            libc::KERN_PROC,
            libc::KERN_PROC_PROC,
            0,
        ])?
        .iter()
        .map(record_from_kinfo)
        .collect::<Vec<_>>();

        records.sort_by_key(|r| r.pid);

        Ok(records)
    }

    pub fn find_process(pid: Pid) -> Result<Option<ProcessRecord>> {
        let procs = kinfo_query(&[
            libc::CTL_KERN,
            libc::KERN_PROC,
            libc::KERN_PROC_PID,
            pid.as_raw(),
        ])?;

        Ok(procs.first().map(record_from_kinfo))
    }

    pub fn process_exe(pid: Pid) -> Result<String> {
        let mib = [
            libc::CTL_KERN,
            libc::KERN_PROC,
            libc::KERN_PROC_PATHNAME,
            pid.as_raw(),
        ];

        let mut buf = vec![0u8; libc::PATH_MAX as usize];
        let mut len = buf.len();

        let ret = unsafe {
            libc::sysctl(
                mib.as_ptr(),
                mib.len() as libc::c_uint,
                buf.as_mut_ptr().cast(),
                &mut len,
                core::ptr::null(),
                0,
            )
        };

        if ret == -1 {
            return Err(Error::Os(Errno::last()));
        }

        buf.truncate(len.saturating_sub(1));

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn record_from_kinfo(ki: &libc::kinfo_proc) -> ProcessRecord {
        let name = unsafe { CStr::from_ptr(ki.ki_comm.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        ProcessRecord {
            pid: ki.ki_pid,
            ppid: ki.ki_ppid,
            uid: ki.ki_uid,
            name,
        }
    }

    fn kinfo_query(mib: &[libc::c_int]) -> Result<Vec<libc::kinfo_proc>> {
        let mut len = 0usize;

        let ret = unsafe {
            libc::sysctl(
                mib.as_ptr(),
                mib.len() as libc::c_uint,
                core::ptr::null_mut(),
                &mut len,
                core::ptr::null(),
                0,
            )
        };

        if ret == -1 {
            return Err(Error::Os(Errno::last()));
        }

        let mut procs =
            Vec::<libc::kinfo_proc>::with_capacity(len / core::mem::size_of::<libc::kinfo_proc>());

        let mut byte_len = procs.capacity() * core::mem::size_of::<libc::kinfo_proc>();

        let ret = unsafe {
            libc::sysctl(
                mib.as_ptr(),
                mib.len() as libc::c_uint,
                procs.as_mut_ptr().cast(),
                &mut byte_len,
                core::ptr::null(),
                0,
            )
        };

        if ret == -1 {
            return Err(Error::Os(Errno::last()));
        }

        unsafe { procs.set_len(byte_len / core::mem::size_of::<libc::kinfo_proc>()) };

        Ok(procs)
    }
}
