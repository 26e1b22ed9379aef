use remora_debugger::{Address, Controller, Region, RunState};

use crate::{Error, Result};

/// The analyzer's view of the debuggee's memory.
///
/// The analyzer never touches the ptrace channel itself; everything it
/// reads flows through this trait, which lets analyses run against a
/// paused debuggee or a plain byte buffer alike.
pub trait MemoryImage {
    /// Reads `buf.len()` bytes starting at `addr`.
    fn read(&self, addr: Address, buf: &mut [u8]) -> Result<()>;

    /// Whether the underlying memory is guaranteed quiescent right now.
    ///
    /// An analysis that observes `false` at any point is marked fuzzy
    /// and never reused from cache.
    fn is_quiescent(&self) -> bool {
        true
    }
}

impl MemoryImage for Controller {
    fn read(&self, addr: Address, buf: &mut [u8]) -> Result<()> {
        self.read_memory(addr, buf).map_err(|e| match e {
            remora_debugger::Error::AddressUnmapped(addr) => Error::AddressUnmapped(addr),
            e => Error::Debugger(e),
        })
    }

    fn is_quiescent(&self) -> bool {
        self.run_state() == RunState::Stopped
    }
}

/// Byte-buffer image, used by tests and offline analyses.
#[derive(Clone, Debug)]
pub struct SliceImage<'a> {
    base: Address,
    bytes: &'a [u8],
}

impl<'a> SliceImage<'a> {
    pub fn new(base: Address, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }
}

impl MemoryImage for SliceImage<'_> {
    fn read(&self, addr: Address, buf: &mut [u8]) -> Result<()> {
        let offset = addr
            .checked_sub(self.base)
            .ok_or(Error::AddressUnmapped(addr))? as usize;

        let end = offset
            .checked_add(buf.len())
            .filter(|end| *end <= self.bytes.len())
            .ok_or(Error::AddressUnmapped(addr))?;

        buf.copy_from_slice(&self.bytes[offset..end]);

        Ok(())
    }
}

/// In-memory snapshot of one region, loaded once per analysis so every
/// pass decodes the same bytes.
pub(crate) struct RegionBytes {
    pub start: Address,
    pub bytes: Vec<u8>,
}

impl RegionBytes {
    /// Number of bytes read per image access.
    const CHUNK: usize = core::mem::size_of::<u64>();

    pub fn load(image: &dyn MemoryImage, region: &Region) -> Result<Self> {
        let mut bytes = vec![0u8; region.len() as usize];

        for (index, chunk) in bytes.chunks_mut(Self::CHUNK).enumerate() {
            image.read(region.start + (index * Self::CHUNK) as Address, chunk)?;
        }

        Ok(Self {
            start: region.start,
            bytes,
        })
    }

    pub fn end(&self) -> Address {
        self.start + self.bytes.len() as Address
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.start <= addr && addr < self.end()
    }

    /// The bytes from `addr` to the end of the region; empty when out
    /// of range.
    pub fn slice_from(&self, addr: Address) -> &[u8] {
        if !self.contains(addr) {
            return &[];
        }

        &self.bytes[(addr - self.start) as usize..]
    }
}
