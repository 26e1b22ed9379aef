use std::path::PathBuf;

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested operation needs an attached debuggee.
    #[error("not attached to a debuggee")]
    NotAttached,

    /// The controller already owns a debuggee.
    #[error("already attached to process {0}")]
    AlreadyAttached(i32),

    /// OS error, surfaced verbatim.
    #[error("os error: {0}")]
    Os(#[from] nix::errno::Errno),

    /// Spawning the debuggee failed before the first stop.
    #[error("failed to spawn {0}: {1}")]
    Spawn(PathBuf, std::io::Error),

    /// The first event after a spawn was not the post-exec trap.
    #[error("unexpected first debug event (raw status {0:#x})")]
    UnexpectedFirstEvent(i32),

    /// The thread is not registered with the controller.
    #[error("unknown thread {0}")]
    UnknownThread(i32),

    /// The address is not mapped in the debuggee.
    #[error("address {0:#x} is not mapped")]
    AddressUnmapped(crate::Address),

    /// The wait deadline elapsed with no pending event.
    #[error("wait timed out")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
