// Once clippy takes `clippy.toml` into account (for `tests` targets),
// we can remove these.
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(missing_docs)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use test_log::test;

use remora_analyzer::{
    AddressCategory, Analyzer, CapstoneDecoder, DecodedInsn, FunctionKind, InstructionDecoder,
    MemoryImage, Permissions, ProgressObserver, Region,
};

const BASE: u64 = 0x1000;

/// Test image over an owned buffer, with read accounting and a
/// quiescence flag.
struct TestImage {
    base: u64,
    bytes: RefCell<Vec<u8>>,
    reads: Cell<usize>,
    quiescent: bool,
}

impl TestImage {
    fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self {
            base,
            bytes: RefCell::new(bytes),
            reads: Cell::new(0),
            quiescent: true,
        }
    }

    fn poke(&self, offset: usize, value: u8) {
        self.bytes.borrow_mut()[offset] = value;
    }
}

impl MemoryImage for TestImage {
    fn read(&self, addr: u64, buf: &mut [u8]) -> remora_analyzer::Result<()> {
        self.reads.set(self.reads.get() + 1);

        let bytes = self.bytes.borrow();
        let offset = (addr - self.base) as usize;

        buf.copy_from_slice(&bytes[offset..offset + buf.len()]);

        Ok(())
    }

    fn is_quiescent(&self) -> bool {
        self.quiescent
    }
}

/// Decoder wrapper counting every decode request.
struct CountingDecoder {
    inner: CapstoneDecoder,
    decodes: Rc<Cell<usize>>,
}

impl InstructionDecoder for CountingDecoder {
    fn decode(&self, bytes: &[u8], addr: u64) -> DecodedInsn {
        self.decodes.set(self.decodes.get() + 1);
        self.inner.decode(bytes, addr)
    }
}

struct LastProgress(Rc<Cell<u8>>);

impl ProgressObserver for LastProgress {
    fn on_progress(&mut self, percent: u8) {
        self.0.set(percent);
    }
}

/// Two frame-setup functions, the first calling the second, plus an
/// indirect-jump thunk.
fn sample_program() -> Vec<u8> {
    let mut bytes = Vec::new();

    // 0x1000: push rbp; mov rbp, rsp; call 0x1020; pop rbp; ret
    bytes.extend_from_slice(&[0x55, 0x48, 0x89, 0xe5]);
    bytes.extend_from_slice(&[0xe8, 0x17, 0x00, 0x00, 0x00]);
    bytes.extend_from_slice(&[0x5d, 0xc3]);

    // pad to 0x1020
    bytes.resize(0x20, 0x90);

    // 0x1020: push rbp; mov rbp, rsp; pop rbp; ret
    bytes.extend_from_slice(&[0x55, 0x48, 0x89, 0xe5, 0x5d, 0xc3]);

    // pad to 0x1030
    bytes.resize(0x30, 0x90);

    // 0x1030: jmp qword ptr [rip] (one-instruction trampoline)
    bytes.extend_from_slice(&[0xff, 0x25, 0x00, 0x00, 0x00, 0x00]);

    // the indirection slot
    bytes.resize(0x40, 0x00);

    bytes
}

fn sample_region(len: u64) -> Region {
    Region {
        start: BASE,
        end: BASE + len,
        base: BASE,
        name: "[sample]".to_owned(),
        permissions: Permissions {
            read: true,
            write: false,
            execute: true,
        },
    }
}

fn analyzer_with_counter() -> (Analyzer, Rc<Cell<usize>>) {
    let decodes = Rc::new(Cell::new(0));

    let decoder = CountingDecoder {
        inner: CapstoneDecoder::new_x86_64().unwrap(),
        decodes: decodes.clone(),
    };

    (Analyzer::new(Box::new(decoder)), decodes)
}

#[test]
fn recovers_functions_and_their_extents() {
    let bytes = sample_program();
    let image = TestImage::new(BASE, bytes.clone());
    let region = sample_region(bytes.len() as u64);

    let mut analyzer = Analyzer::new(Box::new(CapstoneDecoder::new_x86_64().unwrap()));
    analyzer.mark_function_start(BASE + 0x30);

    analyzer.analyze(&image, &region).expect("analyze");

    let analysis = analyzer.analysis(&region).expect("analysis");
    assert!(!analysis.fuzzy);

    let f_outer = &analysis.functions[&BASE];
    assert_eq!(f_outer.kind, FunctionKind::Standard);
    assert_eq!(f_outer.end, BASE + 0xb);

    let f_inner = &analysis.functions[&(BASE + 0x20)];
    assert_eq!(f_inner.kind, FunctionKind::Standard);
    assert_eq!(f_inner.end, BASE + 0x26);
    assert_eq!(f_inner.references, 1);

    let thunk = &analysis.functions[&(BASE + 0x30)];
    assert_eq!(thunk.kind, FunctionKind::Thunk);
    assert_eq!(thunk.end, BASE + 0x36);
}

#[test]
fn entries_are_pairwise_distinct_and_disjoint() {
    let bytes = sample_program();
    let image = TestImage::new(BASE, bytes.clone());
    let region = sample_region(bytes.len() as u64);

    let mut analyzer = Analyzer::new(Box::new(CapstoneDecoder::new_x86_64().unwrap()));
    analyzer.analyze(&image, &region).expect("analyze");

    let analysis = analyzer.analysis(&region).expect("analysis");
    let functions: Vec<_> = analysis.functions.values().collect();

    for (i, f1) in functions.iter().enumerate() {
        for f2 in &functions[i + 1..] {
            assert_ne!(f1.entry, f2.entry);
            assert!(
                f1.end <= f2.entry || (f2.kind == FunctionKind::Thunk && f2.end <= f1.end),
                "{f1:?} overlaps {f2:?}"
            );
        }
    }
}

#[test]
fn addresses_categorize_against_the_function_map() {
    let bytes = sample_program();
    let image = TestImage::new(BASE, bytes.clone());
    let region = sample_region(bytes.len() as u64);

    let mut analyzer = Analyzer::new(Box::new(CapstoneDecoder::new_x86_64().unwrap()));
    analyzer.analyze(&image, &region).expect("analyze");

    assert_eq!(analyzer.category(BASE), AddressCategory::FunctionStart);
    assert_eq!(analyzer.category(BASE + 0x4), AddressCategory::FunctionBody);
    assert_eq!(analyzer.category(BASE + 0xa), AddressCategory::FunctionEnd);

    // The nop pad belongs to no function, and neither does anything
    // outside the analyzed region.
    assert_eq!(analyzer.category(BASE + 0x10), AddressCategory::NotFunction);
    assert_eq!(analyzer.category(0x9999_0000), AddressCategory::NotFunction);
}

#[test]
fn unchanged_memory_is_served_from_cache() {
    let bytes = sample_program();
    let image = TestImage::new(BASE, bytes.clone());
    let region = sample_region(bytes.len() as u64);

    let (mut analyzer, decodes) = analyzer_with_counter();

    analyzer.analyze(&image, &region).expect("analyze");
    let first = analyzer.functions(&region).expect("functions").clone();

    let decodes_after_first = decodes.get();
    let reads_after_first = image.reads.get();
    assert!(decodes_after_first > 0);

    analyzer.analyze(&image, &region).expect("analyze");
    let second = analyzer.functions(&region).expect("functions").clone();

    // The fingerprint was recomputed, the heuristics were not.
    assert!(image.reads.get() > reads_after_first);
    assert_eq!(decodes.get(), decodes_after_first);
    assert_eq!(first, second);
}

#[test]
fn changed_memory_invalidates_the_cache() {
    let bytes = sample_program();
    let image = TestImage::new(BASE, bytes.clone());
    let region = sample_region(bytes.len() as u64);

    let (mut analyzer, decodes) = analyzer_with_counter();

    analyzer.analyze(&image, &region).expect("analyze");
    let decodes_after_first = decodes.get();

    // Turn the inner function's `pop rbp` into a nop: same length,
    // different fingerprint.
    image.poke(0x24, 0x90);

    analyzer.analyze(&image, &region).expect("analyze");
    assert!(decodes.get() > decodes_after_first);
}

#[test]
fn explicit_invalidation_forces_a_recompute() {
    let bytes = sample_program();
    let image = TestImage::new(BASE, bytes.clone());
    let region = sample_region(bytes.len() as u64);

    let (mut analyzer, decodes) = analyzer_with_counter();

    analyzer.analyze(&image, &region).expect("analyze");
    let decodes_after_first = decodes.get();

    analyzer.invalidate_analysis(&region);
    assert!(analyzer.functions(&region).is_none());

    analyzer.analyze(&image, &region).expect("analyze");
    assert!(decodes.get() > decodes_after_first);
}

#[test]
fn non_quiescent_analyses_are_fuzzy_and_not_reused() {
    let bytes = sample_program();
    let mut image = TestImage::new(BASE, bytes.clone());
    image.quiescent = false;
    let region = sample_region(bytes.len() as u64);

    let (mut analyzer, decodes) = analyzer_with_counter();

    analyzer.analyze(&image, &region).expect("analyze");
    assert!(analyzer.analysis(&region).expect("analysis").fuzzy);

    let decodes_after_first = decodes.get();

    // Identical memory, but a fuzzy result is never authoritative.
    analyzer.analyze(&image, &region).expect("analyze");
    assert!(decodes.get() > decodes_after_first);
}

#[test]
fn progress_reaches_completion() {
    let bytes = sample_program();
    let image = TestImage::new(BASE, bytes.clone());
    let region = sample_region(bytes.len() as u64);

    let last = Rc::new(Cell::new(0u8));

    let mut analyzer = Analyzer::new(Box::new(CapstoneDecoder::new_x86_64().unwrap()))
        .with_progress(Box::new(LastProgress(last.clone())));

    analyzer.analyze(&image, &region).expect("analyze");

    assert_eq!(last.get(), 100);
}
