use std::collections::btree_set;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use remora_debugger::{Address, Region};

use crate::{Error, Result};

/// Function map of one analyzed region, ordered by entry address.
pub type FunctionMap = BTreeMap<Address, Function>;

/// How a recovered function was categorized.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionKind {
    /// Ordinary function with a walked extent.
    Standard,

    /// One-instruction indirect-jump trampoline.
    Thunk,

    /// The walk was abandoned before a terminator was found.
    Unknown,
}

/// One recovered function.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Function {
    /// Entry address.
    pub entry: Address,

    /// One past the last byte of the function.
    pub end: Address,

    pub kind: FunctionKind,

    /// Number of call sites referencing the entry within the analyzed
    /// region.
    pub references: u32,
}

impl Function {
    pub fn contains(&self, addr: Address) -> bool {
        self.entry <= addr && addr < self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.entry
    }

    pub fn is_empty(&self) -> bool {
        self.entry == self.end
    }
}

/// Classification of an arbitrary address against the recovered
/// function maps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddressCategory {
    NotFunction,
    FunctionStart,
    FunctionBody,
    FunctionEnd,
}

/// User-curated set of addresses forcibly treated as function starts.
///
/// The set persists across analyses, and on disk as a sorted list of
/// hex addresses, one per line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpecifiedFunctions {
    addrs: BTreeSet<Address>,
}

impl SpecifiedFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: Address) -> bool {
        self.addrs.insert(addr)
    }

    pub fn remove(&mut self, addr: Address) -> bool {
        self.addrs.remove(&addr)
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.addrs.contains(&addr)
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, Address> {
        self.addrs.iter()
    }

    /// The specified addresses falling inside `region`, in address
    /// order.
    pub fn in_region<'a>(&'a self, region: &Region) -> impl Iterator<Item = Address> + 'a {
        self.addrs.range(region.start..region.end).copied()
    }

    /// Loads the set from its on-disk form.
    pub fn load(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;

        let mut addrs = BTreeSet::new();

        for line in BufReader::new(file).lines() {
            let line = line?;
            let literal = line.trim();

            if literal.is_empty() {
                continue;
            }

            let addr = literal
                .strip_prefix("0x")
                .and_then(|hex| Address::from_str_radix(hex, 16).ok())
                .ok_or_else(|| Error::BadAddressLiteral(literal.to_owned()))?;

            addrs.insert(addr);
        }

        Ok(Self { addrs })
    }

    /// Writes the set in its on-disk form.
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::File::create(path)?;

        for addr in &self.addrs {
            writeln!(file, "{addr:#x}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::SpecifiedFunctions;

    #[test]
    fn persists_as_sorted_hex_lines() {
        let mut specified = SpecifiedFunctions::new();
        specified.insert(0x4010);
        specified.insert(0x1000);
        specified.insert(0xdead_beef);

        let file = tempfile::NamedTempFile::new().unwrap();
        specified.save(file.path()).unwrap();

        let on_disk = std::fs::read_to_string(file.path()).unwrap();
        assert_eq!(on_disk, "0x1000\n0x4010\n0xdeadbeef\n");

        let reloaded = SpecifiedFunctions::load(file.path()).unwrap();
        assert_eq!(reloaded, specified);
    }

    #[test]
    fn load_rejects_garbage_entries() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "0x1000\nnot-an-address\n").unwrap();

        assert!(SpecifiedFunctions::load(file.path()).is_err());
    }
}
