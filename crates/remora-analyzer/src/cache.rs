use indexmap::IndexMap;

use remora_debugger::{Address, Region};

use crate::function::FunctionMap;

/// Finished analysis of one region.
#[derive(Clone, Debug)]
pub struct RegionAnalysis {
    /// The region the analysis was computed over.
    pub region: Region,

    /// Content fingerprint of the region at analysis time.
    pub md5: [u8; 16],

    /// Recovered functions, ordered by entry.
    pub functions: FunctionMap,

    /// Whether the analysis ran while the debuggee was not guaranteed
    /// quiescent. Fuzzy results are never served from cache.
    pub fuzzy: bool,
}

/// Per-region memoization of analyses, keyed by region start.
#[derive(Debug, Default)]
pub(crate) struct AnalysisCache {
    entries: IndexMap<Address, RegionAnalysis>,
}

impl AnalysisCache {
    /// The cached analysis for the region starting at `start`, if it is
    /// authoritative for the given fingerprint.
    pub fn lookup(&self, start: Address, md5: &[u8; 16]) -> Option<&RegionAnalysis> {
        self.entries
            .get(&start)
            .filter(|analysis| !analysis.fuzzy && analysis.md5 == *md5)
    }

    pub fn get(&self, start: Address) -> Option<&RegionAnalysis> {
        self.entries.get(&start)
    }

    /// Stores (or overwrites) the analysis for its region.
    pub fn store(&mut self, analysis: RegionAnalysis) {
        self.entries.insert(analysis.region.start, analysis);
    }

    pub fn invalidate(&mut self, start: Address) -> bool {
        self.entries.shift_remove(&start).is_some()
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    /// The cached analysis whose region contains `addr`.
    pub fn containing(&self, addr: Address) -> Option<&RegionAnalysis> {
        self.entries
            .values()
            .find(|analysis| analysis.region.contains(addr))
    }
}

#[cfg(test)]
mod tests {
    use remora_debugger::{Permissions, Region};

    use super::{AnalysisCache, RegionAnalysis};
    use crate::function::FunctionMap;

    fn analysis(start: u64, md5: [u8; 16], fuzzy: bool) -> RegionAnalysis {
        RegionAnalysis {
            region: Region {
                start,
                end: start + 0x1000,
                base: start,
                name: String::new(),
                permissions: Permissions::default(),
            },
            md5,
            functions: FunctionMap::new(),
            fuzzy,
        }
    }

    #[test]
    fn lookup_requires_matching_fingerprint() {
        let mut cache = AnalysisCache::default();
        cache.store(analysis(0x1000, [1; 16], false));

        assert!(cache.lookup(0x1000, &[1; 16]).is_some());
        assert!(cache.lookup(0x1000, &[2; 16]).is_none());
        assert!(cache.lookup(0x2000, &[1; 16]).is_none());
    }

    #[test]
    fn fuzzy_analyses_are_never_served() {
        let mut cache = AnalysisCache::default();
        cache.store(analysis(0x1000, [1; 16], true));

        assert!(cache.lookup(0x1000, &[1; 16]).is_none());
        // Still retrievable for inspection, just not authoritative.
        assert!(cache.get(0x1000).is_some());
    }

    #[test]
    fn invalidation_drops_entries() {
        let mut cache = AnalysisCache::default();
        cache.store(analysis(0x1000, [1; 16], false));
        cache.store(analysis(0x3000, [2; 16], false));

        assert!(cache.invalidate(0x1000));
        assert!(!cache.invalidate(0x1000));
        assert!(cache.get(0x3000).is_some());

        cache.invalidate_all();
        assert!(cache.get(0x3000).is_none());
    }

    #[test]
    fn containing_finds_by_address() {
        let mut cache = AnalysisCache::default();
        cache.store(analysis(0x1000, [1; 16], false));

        assert!(cache.containing(0x1800).is_some());
        assert!(cache.containing(0x2800).is_none());
    }
}
