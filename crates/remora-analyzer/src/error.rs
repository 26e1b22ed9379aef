use remora_debugger::Address;

/// Error type of this crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No instruction could be decoded at the given address.
    #[error("disassembly failed at {0:#x}")]
    Disassembly(Address),

    /// The address is not mapped in the analyzed image.
    #[error("address {0:#x} is not mapped")]
    AddressUnmapped(Address),

    /// Error from the [capstone] disassembler backend.
    #[error(transparent)]
    Capstone(#[from] capstone::Error),

    /// Error from the process control core.
    #[error(transparent)]
    Debugger(#[from] remora_debugger::Error),

    /// A persisted function-start entry did not parse as an address.
    #[error("invalid address literal {0:?}")]
    BadAddressLiteral(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type of this crate.
pub type Result<T> = core::result::Result<T, Error>;
