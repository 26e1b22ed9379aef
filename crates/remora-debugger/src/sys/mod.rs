#[cfg(any(target_os = "linux", target_os = "freebsd"))]
mod unix;
#[cfg(any(target_os = "linux", target_os = "freebsd"))]
pub use self::unix::*;

#[cfg(not(any(target_os = "linux", target_os = "freebsd")))]
compile_error!("No debugger implementation is available for this platform.");
