//! Symbol and binary-info collaborators.
//!
//! Symbol loading lives outside the analyzer; these traits are the
//! narrow seam it consumes. Implementations are provided by the front
//! end (typically from the debuggee's object file).

use remora_debugger::{Address, Region};

/// Kind of a looked-up symbol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Object,
    Other,
}

/// One symbol of the debuggee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SymbolRecord {
    pub name: String,
    pub address: Address,
    pub size: u64,
    pub kind: SymbolKind,
}

/// Streams the symbols overlapping a region.
pub trait SymbolProvider {
    fn lookup_in(&self, region: &Region) -> Vec<SymbolRecord>;
}

/// Static facts about the debuggee's binary.
pub trait BinaryInfo {
    /// The binary's recorded entry point, if known.
    fn entry_point(&self) -> Option<Address>;

    /// The address of the program's `main`, if identifiable.
    fn main_symbol(&self) -> Option<Address>;
}

/// Collaborator used when no symbol source is wired in.
#[derive(Debug, Default)]
pub struct NoSymbols;

impl SymbolProvider for NoSymbols {
    fn lookup_in(&self, _region: &Region) -> Vec<SymbolRecord> {
        Vec::new()
    }
}

impl BinaryInfo for NoSymbols {
    fn entry_point(&self) -> Option<Address> {
        None
    }

    fn main_symbol(&self) -> Option<Address> {
        None
    }
}
