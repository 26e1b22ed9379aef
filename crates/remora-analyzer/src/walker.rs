//! Function walker.
//!
//! Walks seeds linearly, discovering new entries through direct call
//! targets, until the worklist reaches a fixed point. Popular call
//! targets are promoted before single-reference ones so that they win
//! when extents later collide.

use std::collections::{BTreeMap, VecDeque};

use remora_debugger::Address;

use crate::disasm::{InsnClass, InstructionDecoder};
use crate::function::{Function, FunctionKind, FunctionMap};
use crate::image::RegionBytes;

/// Call-site count that lets a candidate into a high-reference pass.
pub(crate) const HIGH_REFERENCE_THRESHOLD: u32 = 2;

/// Call-site count that lets a candidate into a low-reference pass.
pub(crate) const LOW_REFERENCE_THRESHOLD: u32 = 1;

/// Walks the region from the given seeds and returns the recovered
/// function map, reference counts filled in.
pub(crate) fn walk_region(
    bytes: &RegionBytes,
    decoder: &dyn InstructionDecoder,
    seeds: &[Address],
    max_passes: usize,
    progress: &mut dyn FnMut(u8),
) -> FunctionMap {
    let mut functions = FunctionMap::new();
    let mut call_sites: BTreeMap<Address, u32> = BTreeMap::new();

    let mut worklist: VecDeque<Address> = seeds.iter().copied().collect();
    let mut walked = 0usize;

    for pass in 0..max_passes {
        if worklist.is_empty() {
            break;
        }

        while let Some(entry) = worklist.pop_front() {
            if functions.contains_key(&entry) {
                continue;
            }

            let (function, calls) = walk_function(bytes, decoder, entry, &functions);
            functions.insert(entry, function);

            for target in calls {
                *call_sites.entry(target).or_default() += 1;
            }

            walked += 1;
            let total = walked + worklist.len();
            progress((walked * 100 / total.max(1)) as u8);
        }

        // High-reference candidates are promoted first; the
        // single-reference stragglers only once no popular target is
        // left.
        let mut promoted = promote(&call_sites, &functions, HIGH_REFERENCE_THRESHOLD);
        if promoted.is_empty() {
            promoted = promote(&call_sites, &functions, LOW_REFERENCE_THRESHOLD);
        }

        tracing::trace!(pass, promoted = promoted.len(), "walker pass");

        worklist.extend(promoted);
    }

    for (entry, function) in functions.iter_mut() {
        function.references = call_sites.get(entry).copied().unwrap_or(0);
    }

    functions
}

fn promote(
    call_sites: &BTreeMap<Address, u32>,
    functions: &FunctionMap,
    threshold: u32,
) -> Vec<Address> {
    call_sites
        .iter()
        .filter(|(addr, count)| **count >= threshold && !functions.contains_key(*addr))
        .map(|(addr, _)| *addr)
        .collect()
}

/// Linearly walks one presumed function, returning its extent and the
/// in-region entry candidates it references (direct call targets, plus
/// tail jumps landing before the entry).
fn walk_function(
    bytes: &RegionBytes,
    decoder: &dyn InstructionDecoder,
    entry: Address,
    known: &FunctionMap,
) -> (Function, Vec<Address>) {
    let mut calls = Vec::new();

    let mut addr = entry;
    // Highest in-function address some forward branch is known to
    // reach; a terminator below it does not end the function.
    let mut end_hint = entry;
    let mut first = true;

    loop {
        if addr >= bytes.end() {
            return (finish(entry, bytes.end(), FunctionKind::Standard), calls);
        }

        let insn = decoder.decode(bytes.slice_from(addr), addr);

        if insn.class == InsnClass::Invalid || insn.len == 0 {
            // One past the last valid byte; the seed is abandoned.
            return (finish(entry, addr, FunctionKind::Unknown), calls);
        }

        let next = addr + insn.len as Address;

        if first && insn.class == InsnClass::Jump && insn.targets.is_empty() {
            return (finish(entry, next, FunctionKind::Thunk), calls);
        }

        let mut terminates = false;

        match insn.class {
            InsnClass::Call => {
                if let Some(target) = insn.direct_target() {
                    if bytes.contains(target) {
                        calls.push(target);
                    }
                }
            }
            InsnClass::CondJump => {
                if let Some(target) = insn.direct_target() {
                    if bytes.contains(target) && target > addr {
                        end_hint = end_hint.max(target);
                    }
                }
            }
            InsnClass::Jump => match insn.direct_target() {
                Some(target)
                    if bytes.contains(target)
                        && target >= entry
                        && !known.contains_key(&target) =>
                {
                    if target > addr {
                        // Forward jump within the function: its body
                        // continues at least up to the target.
                        end_hint = end_hint.max(target);
                    } else {
                        // Bottom of a loop.
                        terminates = true;
                    }
                }
                Some(target) if bytes.contains(target) && !known.contains_key(&target) => {
                    // Tail jump to an unknown target before the entry:
                    // a new function start, registered through the
                    // same reference counting as a call site.
                    calls.push(target);
                    terminates = true;
                }
                // Out of region, to a known function, or indirect.
                _ => terminates = true,
            },
            InsnClass::Return | InsnClass::Trap => terminates = true,
            InsnClass::Normal | InsnClass::Invalid => {}
        }

        if terminates && end_hint <= next {
            return (finish(entry, next, FunctionKind::Standard), calls);
        }

        first = false;
        addr = next;
    }
}

fn finish(entry: Address, end: Address, kind: FunctionKind) -> Function {
    Function {
        entry,
        end: end.max(entry),
        kind,
        references: 0,
    }
}

#[cfg(test)]
mod tests {
    use remora_debugger::Address;

    use super::{walk_region, HIGH_REFERENCE_THRESHOLD};
    use crate::disasm::{DecodedInsn, InsnClass, InstructionDecoder};
    use crate::function::FunctionKind;
    use crate::image::RegionBytes;

    // Toy single-byte ISA for deterministic walking:
    //   0x01       normal
    //   0x02 tt    call tt (absolute low byte, region-relative)
    //   0x03 tt    jmp tt
    //   0x04       ret
    //   0x05       jmp [indirect]
    //   0x06 tt    jcc tt
    struct ToyDecoder {
        base: Address,
    }

    impl InstructionDecoder for ToyDecoder {
        fn decode(&self, bytes: &[u8], _addr: Address) -> DecodedInsn {
            let target = |bytes: &[u8]| {
                bytes
                    .get(1)
                    .map(|t| vec![self.base + *t as Address])
                    .unwrap_or_default()
            };

            match bytes.first() {
                Some(0x01) => DecodedInsn {
                    class: InsnClass::Normal,
                    len: 1,
                    targets: vec![],
                },
                Some(0x02) => DecodedInsn {
                    class: InsnClass::Call,
                    len: 2,
                    targets: target(bytes),
                },
                Some(0x03) => DecodedInsn {
                    class: InsnClass::Jump,
                    len: 2,
                    targets: target(bytes),
                },
                Some(0x04) => DecodedInsn {
                    class: InsnClass::Return,
                    len: 1,
                    targets: vec![],
                },
                Some(0x05) => DecodedInsn {
                    class: InsnClass::Jump,
                    len: 1,
                    targets: vec![],
                },
                Some(0x06) => DecodedInsn {
                    class: InsnClass::CondJump,
                    len: 2,
                    targets: target(bytes),
                },
                _ => DecodedInsn::invalid(),
            }
        }
    }

    const BASE: Address = 0x1000;

    fn walk(bytes: &[u8], seeds: &[Address]) -> crate::FunctionMap {
        let region = RegionBytes {
            start: BASE,
            bytes: bytes.to_vec(),
        };

        walk_region(&region, &ToyDecoder { base: BASE }, seeds, 64, &mut |_| {})
    }

    #[test]
    fn linear_walk_ends_at_return() {
        let map = walk(&[0x01, 0x01, 0x04, 0x01], &[BASE]);

        let f = &map[&BASE];
        assert_eq!(f.end, BASE + 3);
        assert_eq!(f.kind, FunctionKind::Standard);
    }

    #[test]
    fn call_target_becomes_a_function() {
        // 0: call 4; ret; 3: pad; 4: ret
        let map = walk(&[0x02, 0x04, 0x04, 0x01, 0x04], &[BASE]);

        assert!(map.contains_key(&(BASE + 4)));
        assert_eq!(map[&(BASE + 4)].references, 1);
        assert_eq!(map[&(BASE + 4)].end, BASE + 5);
    }

    #[test]
    fn thunk_is_a_single_indirect_jump() {
        let map = walk(&[0x05, 0x04], &[BASE]);

        let f = &map[&BASE];
        assert_eq!(f.kind, FunctionKind::Thunk);
        assert_eq!(f.end, BASE + 1);
    }

    #[test]
    fn forward_jump_extends_the_function_past_a_return() {
        // 0: jmp 5; 2: ret (dead); 3..: walked through to the ret at 6
        let map = walk(&[0x03, 0x05, 0x04, 0x01, 0x01, 0x01, 0x04], &[BASE]);

        let f = &map[&BASE];
        assert_eq!(f.kind, FunctionKind::Standard);
        assert_eq!(f.end, BASE + 7);
    }

    #[test]
    fn backward_jump_terminates_the_function() {
        // 0: normal; 1: jmp 0 (loop bottom)
        let map = walk(&[0x01, 0x03, 0x00], &[BASE]);

        assert_eq!(map[&BASE].end, BASE + 3);
    }

    #[test]
    fn tail_jump_before_the_entry_seeds_a_new_function() {
        // 0: ret (the tail-called function); 1: pad
        // 2: jmp 0 (tail jump landing before the seed entry)
        let map = walk(&[0x04, 0x01, 0x03, 0x00], &[BASE + 2]);

        let tail = &map[&(BASE + 2)];
        assert_eq!(tail.kind, FunctionKind::Standard);
        assert_eq!(tail.end, BASE + 4);

        let target = &map[&BASE];
        assert_eq!(target.end, BASE + 1);
        assert_eq!(target.references, 1);
    }

    #[test]
    fn decode_failure_abandons_the_seed() {
        let map = walk(&[0x01, 0xff, 0x04], &[BASE]);

        let f = &map[&BASE];
        assert_eq!(f.kind, FunctionKind::Unknown);
        assert_eq!(f.end, BASE + 1);
    }

    #[test]
    fn popular_targets_are_promoted_before_single_references() {
        // Two seeds both call 8; one also calls 10.
        // 0: call 8; call 10; ret
        // 5: call 8; ret
        // 8: ret; 9: pad; 10: ret
        let bytes = [
            0x02, 0x08, 0x02, 0x0a, 0x04, // seed A
            0x02, 0x08, 0x04, // seed B
            0x04, // popular target
            0x01, // pad
            0x04, // single-reference target
        ];

        let map = walk(&bytes, &[BASE, BASE + 5]);

        let popular = &map[&(BASE + 8)];
        assert!(popular.references >= HIGH_REFERENCE_THRESHOLD);

        let single = &map[&(BASE + 10)];
        assert_eq!(single.references, 1);
    }

    #[test]
    fn walk_is_bounded_by_the_region() {
        // Function runs off the end of the region without a terminator.
        let map = walk(&[0x01, 0x01, 0x01], &[BASE]);

        assert_eq!(map[&BASE].end, BASE + 3);
    }
}
