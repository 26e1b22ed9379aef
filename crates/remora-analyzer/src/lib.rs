//! This crate implements the static code analyzer of the `remora`
//! debugger.
//!
//! The analyzer ingests a memory region of the (paused) debuggee and
//! recovers a function map: the set of function entry addresses in the
//! region, their extents, and a categorization of every byte. Results
//! are memoized per region, keyed by a content fingerprint, so
//! re-analyzing unchanged memory is free.
//!
//! The debuggee is only reached through the [`MemoryImage`] trait, and
//! instructions only through the [`InstructionDecoder`] trait; the
//! analyzer itself never touches the ptrace channel or the
//! disassembler internals.

mod cache;
mod disasm;
mod error;
mod fingerprint;
mod function;
mod image;
mod overlap;
mod seeds;
mod symbols;
mod walker;

pub use self::cache::RegionAnalysis;
pub use self::disasm::{CapstoneDecoder, DecodedInsn, InsnClass, InstructionDecoder};
pub use self::error::{Error, Result};
pub use self::fingerprint::region_md5;
pub use self::function::{
    AddressCategory, Function, FunctionKind, FunctionMap, SpecifiedFunctions,
};
pub use self::image::{MemoryImage, SliceImage};
pub use self::symbols::{BinaryInfo, NoSymbols, SymbolKind, SymbolProvider, SymbolRecord};

pub use remora_debugger::{Address, Permissions, Region};

use self::cache::AnalysisCache;
use self::image::RegionBytes;

/// Receives coarse progress of an analysis pass, in percent.
pub trait ProgressObserver {
    fn on_progress(&mut self, percent: u8);
}

/// The analyzer façade.
///
/// Composes fingerprinting, seeding, walking and overlap resolution,
/// and memoizes finished analyses per region.
pub struct Analyzer {
    decoder: Box<dyn InstructionDecoder>,
    symbols: Box<dyn SymbolProvider>,
    binary: Box<dyn BinaryInfo>,
    progress: Option<Box<dyn ProgressObserver>>,
    specified: SpecifiedFunctions,
    cache: AnalysisCache,
    max_passes: usize,
}

impl Analyzer {
    /// Default cap on walker passes per analysis.
    pub const DEFAULT_MAX_PASSES: usize = 64;

    pub fn new(decoder: Box<dyn InstructionDecoder>) -> Self {
        Self {
            decoder,
            symbols: Box::new(NoSymbols),
            binary: Box::new(NoSymbols),
            progress: None,
            specified: SpecifiedFunctions::new(),
            cache: AnalysisCache::default(),
            max_passes: Self::DEFAULT_MAX_PASSES,
        }
    }

    /// Wires in the symbol provider collaborator.
    pub fn with_symbols(mut self, symbols: Box<dyn SymbolProvider>) -> Self {
        self.symbols = symbols;
        self
    }

    /// Wires in the binary-info collaborator.
    pub fn with_binary_info(mut self, binary: Box<dyn BinaryInfo>) -> Self {
        self.binary = binary;
        self
    }

    /// Subscribes a progress observer.
    pub fn with_progress(mut self, progress: Box<dyn ProgressObserver>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Seeds the user-curated function starts.
    pub fn with_specified_functions(mut self, specified: SpecifiedFunctions) -> Self {
        self.specified = specified;
        self
    }

    pub fn with_max_passes(mut self, max_passes: usize) -> Self {
        self.max_passes = max_passes.max(1);
        self
    }

    pub fn specified_functions(&self) -> &SpecifiedFunctions {
        &self.specified
    }

    /// Forces `addr` to be treated as a function start in future
    /// analyses.
    pub fn mark_function_start(&mut self, addr: Address) -> bool {
        self.specified.insert(addr)
    }

    pub fn unmark_function_start(&mut self, addr: Address) -> bool {
        self.specified.remove(addr)
    }

    /// Analyzes `region`, reusing the cached result when the region's
    /// fingerprint is unchanged and the cached analysis is
    /// authoritative.
    ///
    /// The result is retrieved through [`Analyzer::analysis`] or
    /// [`Analyzer::functions`].
    pub fn analyze(&mut self, image: &dyn MemoryImage, region: &Region) -> Result<()> {
        let mut fuzzy = !image.is_quiescent();

        let md5 = fingerprint::region_md5(image, region)?;

        if self.cache.lookup(region.start, &md5).is_some() {
            tracing::debug!(
                region = format_args!("{:#x}", region.start),
                "analysis served from cache"
            );

            return Ok(());
        }

        if let Some(observer) = self.progress.as_deref_mut() {
            observer.on_progress(0);
        }

        let bytes = RegionBytes::load(image, region)?;

        let seeds = seeds::collect_seeds(
            region,
            &bytes,
            self.decoder.as_ref(),
            &self.specified,
            self.symbols.as_ref(),
            self.binary.as_ref(),
        );

        let progress = &mut self.progress;
        let mut functions = walker::walk_region(
            &bytes,
            self.decoder.as_ref(),
            &seeds,
            self.max_passes,
            &mut |percent| {
                if let Some(observer) = progress.as_deref_mut() {
                    observer.on_progress(percent);
                }
            },
        );

        overlap::fix_overlaps(&mut functions);

        fuzzy |= !image.is_quiescent();

        if let Some(observer) = self.progress.as_deref_mut() {
            observer.on_progress(100);
        }

        tracing::debug!(
            region = format_args!("{:#x}", region.start),
            functions = functions.len(),
            fuzzy,
            "analysis done"
        );

        self.cache.store(RegionAnalysis {
            region: region.clone(),
            md5,
            functions,
            fuzzy,
        });

        Ok(())
    }

    /// The analysis last computed for `region`, if any.
    pub fn analysis(&self, region: &Region) -> Option<&RegionAnalysis> {
        self.cache.get(region.start)
    }

    /// The function map last computed for `region`, if any.
    pub fn functions(&self, region: &Region) -> Option<&FunctionMap> {
        self.cache.get(region.start).map(|a| &a.functions)
    }

    /// Categorizes an address against the cached analyses.
    pub fn category(&self, addr: Address) -> AddressCategory {
        let Some(analysis) = self.cache.containing(addr) else {
            return AddressCategory::NotFunction;
        };

        // The innermost function claiming the address wins, so a
        // contained thunk shadows its caller's body.
        let function = analysis
            .functions
            .range(..=addr)
            .rev()
            .map(|(_, f)| f)
            .find(|f| f.contains(addr));

        match function {
            Some(f) if f.entry == addr => AddressCategory::FunctionStart,
            Some(f) if f.end - 1 == addr => AddressCategory::FunctionEnd,
            Some(_) => AddressCategory::FunctionBody,
            None => AddressCategory::NotFunction,
        }
    }

    /// Drops the cached analysis of `region`.
    ///
    /// Callers observing a write into an executable region are expected
    /// to invalidate it here before the next [`Analyzer::analyze`].
    pub fn invalidate_analysis(&mut self, region: &Region) {
        self.cache.invalidate(region.start);
    }

    /// Drops every cached analysis.
    pub fn invalidate_all_analyses(&mut self) {
        self.cache.invalidate_all();
    }
}
