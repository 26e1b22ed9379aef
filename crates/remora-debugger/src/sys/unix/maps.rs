//! Enumeration of the debuggee's memory map.

use nix::unistd::Pid;

use crate::{Region, Result};

/// Lists the memory regions of the given process, ordered by start
/// address.
pub fn memory_regions(pid: Pid) -> Result<Vec<Region>> {
    imp::memory_regions(pid)
}

#[cfg(target_os = "linux")]
mod imp {
    use nix::errno::Errno;
    use nix::unistd::Pid;

    use crate::{Error, Permissions, Region, Result};

    pub fn memory_regions(pid: Pid) -> Result<Vec<Region>> {
        let maps = std::fs::read_to_string(format!("/proc/{}/maps", pid.as_raw()))?;

        maps.lines().map(parse_line).collect()
    }

    // One line reads `start-end perms offset dev inode [path]`.
    fn parse_line(line: &str) -> Result<Region> {
        let mut fields = line.split_whitespace();

        let range = fields.next().ok_or(Error::Os(Errno::EINVAL))?;
        let perms = fields.next().ok_or(Error::Os(Errno::EINVAL))?;
        let offset = fields.next().ok_or(Error::Os(Errno::EINVAL))?;

        let name = fields.nth(2).unwrap_or("").to_owned();

        let (start, end) = range.split_once('-').ok_or(Error::Os(Errno::EINVAL))?;

        let start = u64::from_str_radix(start, 16).map_err(|_| Error::Os(Errno::EINVAL))?;
        let end = u64::from_str_radix(end, 16).map_err(|_| Error::Os(Errno::EINVAL))?;
        let offset = u64::from_str_radix(offset, 16).map_err(|_| Error::Os(Errno::EINVAL))?;

        let mut perm_flags = perms.bytes();
        let permissions = Permissions {
            read: perm_flags.next() == Some(b'r'),
            write: perm_flags.next() == Some(b'w'),
            execute: perm_flags.next() == Some(b'x'),
        };

        Ok(Region {
            start,
            end,
            base: start.saturating_sub(offset),
            name,
            permissions,
        })
    }

    #[cfg(test)]
    mod tests {
        use super::parse_line;

        #[test]
        fn parse_file_backed_line() {
            let region =
                parse_line("55d000-55e000 r-xp 00001000 08:01 393304    /usr/bin/cat").unwrap();

            assert_eq!(region.start, 0x55d000);
            assert_eq!(region.end, 0x55e000);
            assert_eq!(region.base, 0x55c000);
            assert_eq!(region.name, "/usr/bin/cat");
            assert!(region.permissions.read);
            assert!(!region.permissions.write);
            assert!(region.permissions.execute);
        }

        #[test]
        fn parse_anonymous_line() {
            let region = parse_line("7f0000-7f1000 rw-p 00000000 00:00 0").unwrap();

            assert_eq!(region.name, "");
            assert_eq!(region.base, region.start);
            assert!(region.permissions.write);
            assert!(!region.permissions.execute);
        }
    }
}

#[cfg(target_os = "freebsd")]
mod imp {
    use std::ffi::CStr;

    use nix::errno::Errno;
    use nix::libc;
    use nix::unistd::Pid;

    use crate::{Error, Permissions, Region, Result};

    pub fn memory_regions(pid: Pid) -> Result<Vec<Region>> {
        let mib = [
            libc::CTL_KERN,
            libc::KERN_PROC,
            libc::KERN_PROC_VMMAP,
            pid.as_raw(),
        ];

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

        // The map may have grown between the two calls.
        len = len * 4 / 3;
        let mut buf = vec![0u8; len];

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

        let mut regions = Vec::new();
        let mut cursor = &buf[..len];

        // Entries are variable-length: `kve_structsize` bytes each.
        while cursor.len() >= core::mem::size_of::<libc::c_int>() {
            let entry = cursor.as_ptr().cast::<libc::kinfo_vmentry>();

            let structsize = unsafe { (*entry).kve_structsize } as usize;
            if structsize == 0 || structsize > cursor.len() {
                break;
            }

            regions.push(region_from_vmentry(unsafe { &*entry }));
            cursor = &cursor[structsize..];
        }

        Ok(regions)
    }

    fn region_from_vmentry(entry: &libc::kinfo_vmentry) -> Region {
        let name = unsafe { CStr::from_ptr(entry.kve_path.as_ptr().cast()) }
            .to_string_lossy()
            .into_owned();

        let start = entry.kve_start as u64;

        Region {
            start,
            end: entry.kve_end as u64,
            base: start.saturating_sub(entry.kve_offset as u64),
            name,
            permissions: Permissions {
                read: entry.kve_protection & libc::KVME_PROT_READ != 0,
                write: entry.kve_protection & libc::KVME_PROT_WRITE != 0,
                execute: entry.kve_protection & libc::KVME_PROT_EXEC != 0,
            },
        }
    }
}
