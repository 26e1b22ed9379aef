//! Heuristic seeders.
//!
//! Each seeder contributes candidate function entries to the walker's
//! worklist. They run in a fixed order, and the first seeder to claim
//! an address wins the tie.

use remora_debugger::{Address, Region};

use crate::disasm::{InsnClass, InstructionDecoder};
use crate::function::SpecifiedFunctions;
use crate::image::RegionBytes;
use crate::symbols::{BinaryInfo, SymbolKind, SymbolProvider};

// Function-prologue sentinel: the call-to-here landing pad emitted by
// control-flow-integrity toolchains (endbr64 / endbr32).
const MARKED_SENTINELS: [&[u8]; 2] = [&[0xf3, 0x0f, 0x1e, 0xfa], &[0xf3, 0x0f, 0x1e, 0xfb]];

// push bp
const FRAME_PUSH: u8 = 0x55;

// mov bp, sp in its canonical encodings, 64- and 32-bit.
const FRAME_MOVES: [&[u8]; 4] = [
    &[0x48, 0x89, 0xe5],
    &[0x89, 0xe5],
    &[0x48, 0x8b, 0xec],
    &[0x8b, 0xec],
];

/// Collects every seed for one region, in precedence order, first
/// claim winning.
pub(crate) fn collect_seeds(
    region: &Region,
    bytes: &RegionBytes,
    decoder: &dyn InstructionDecoder,
    specified: &SpecifiedFunctions,
    symbols: &dyn SymbolProvider,
    binary: &dyn BinaryInfo,
) -> Vec<Address> {
    let mut seeds = Vec::new();

    let mut push = |addr: Address| {
        if region.contains(addr) && !seeds.contains(&addr) {
            seeds.push(addr);
        }
    };

    for addr in specified.in_region(region) {
        push(addr);
    }

    if let Some(entry) = binary.entry_point() {
        push(entry);
    }

    if let Some(main) = binary.main_symbol() {
        push(main);
    }

    for symbol in symbols.lookup_in(region) {
        if symbol.kind == SymbolKind::Function {
            push(symbol.address);
        }
    }

    for addr in marked_prologues(bytes, decoder) {
        push(addr);
    }

    for addr in stack_frame_setups(bytes, decoder) {
        push(addr);
    }

    tracing::debug!(
        region = format_args!("{:#x}", region.start),
        seeds = seeds.len(),
        "seed collection done"
    );

    seeds
}

/// Addresses bearing the prologue sentinel, confirmed to decode.
fn marked_prologues(bytes: &RegionBytes, decoder: &dyn InstructionDecoder) -> Vec<Address> {
    let mut found = Vec::new();

    for offset in 0..bytes.bytes.len() {
        let window = &bytes.bytes[offset..];

        if !MARKED_SENTINELS.iter().any(|s| window.starts_with(s)) {
            continue;
        }

        let addr = bytes.start + offset as Address;

        let insn = decoder.decode(window, addr);
        if insn.class != InsnClass::Invalid {
            found.push(addr);
        }
    }

    found
}

/// Addresses whose first two instructions form the canonical frame
/// setup (push bp; mov bp, sp), confirmed via the disassembler.
fn stack_frame_setups(bytes: &RegionBytes, decoder: &dyn InstructionDecoder) -> Vec<Address> {
    let mut found = Vec::new();

    for offset in 0..bytes.bytes.len() {
        if bytes.bytes[offset] != FRAME_PUSH {
            continue;
        }

        let window = &bytes.bytes[offset + 1..];
        if !FRAME_MOVES.iter().any(|m| window.starts_with(m)) {
            continue;
        }

        let addr = bytes.start + offset as Address;

        // Both instructions must actually decode at this position.
        let push_insn = decoder.decode(bytes.slice_from(addr), addr);
        if push_insn.class == InsnClass::Invalid || push_insn.len != 1 {
            continue;
        }

        let mov_insn = decoder.decode(bytes.slice_from(addr + 1), addr + 1);
        if mov_insn.class == InsnClass::Invalid {
            continue;
        }

        found.push(addr);
    }

    found
}
