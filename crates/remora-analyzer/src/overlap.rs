//! Overlap resolution.
//!
//! After walking, extents may collide: a walked-through extent can
//! cover a later entry. The resolution pass partitions every body,
//! with one exception: a thunk fully contained in its caller is kept
//! as-is.

use crate::function::{FunctionKind, FunctionMap};

/// Resolves overlapping extents in entry order.
pub(crate) fn fix_overlaps(functions: &mut FunctionMap) {
    let mut list: Vec<_> = functions.values().cloned().collect();

    for i in 0..list.len() {
        for j in (i + 1)..list.len() {
            if list[i].end <= list[j].entry {
                break;
            }

            let contained_thunk =
                list[j].kind == FunctionKind::Thunk && list[j].end <= list[i].end;

            if !contained_thunk {
                list[i].end = list[j].entry;
                break;
            }
        }
    }

    functions.clear();
    functions.extend(list.into_iter().map(|f| (f.entry, f)));
}

#[cfg(test)]
mod tests {
    use remora_debugger::Address;

    use super::fix_overlaps;
    use crate::function::{Function, FunctionKind, FunctionMap};

    fn map(functions: &[(Address, Address, FunctionKind)]) -> FunctionMap {
        functions
            .iter()
            .map(|&(entry, end, kind)| {
                (
                    entry,
                    Function {
                        entry,
                        end,
                        kind,
                        references: 0,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn contained_thunk_is_kept() {
        let mut functions = map(&[
            (0x1000, 0x1040, FunctionKind::Standard),
            (0x1020, 0x1030, FunctionKind::Thunk),
        ]);

        fix_overlaps(&mut functions);

        assert_eq!(functions[&0x1000].end, 0x1040);
        assert_eq!(functions[&0x1020].end, 0x1030);
    }

    #[test]
    fn standard_overlap_truncates_the_earlier_extent() {
        let mut functions = map(&[
            (0x1000, 0x1040, FunctionKind::Standard),
            (0x1020, 0x1030, FunctionKind::Standard),
        ]);

        fix_overlaps(&mut functions);

        assert_eq!(functions[&0x1000].end, 0x1020);
        assert_eq!(functions[&0x1020].end, 0x1030);
    }

    #[test]
    fn resolution_partitions_every_pair() {
        let mut functions = map(&[
            (0x1000, 0x1100, FunctionKind::Standard),
            (0x1010, 0x1018, FunctionKind::Thunk),
            (0x1020, 0x1080, FunctionKind::Standard),
            (0x1060, 0x1070, FunctionKind::Standard),
        ]);

        fix_overlaps(&mut functions);

        // The thunk survived inside the first function; everything
        // else was truncated to the next entry.
        assert_eq!(functions[&0x1000].end, 0x1020);
        assert_eq!(functions[&0x1010].end, 0x1018);
        assert_eq!(functions[&0x1020].end, 0x1060);
        assert_eq!(functions[&0x1060].end, 0x1070);

        // No two non-thunk extents overlap afterwards.
        let list: Vec<_> = functions.values().collect();
        for (i, f1) in list.iter().enumerate() {
            for f2 in &list[i + 1..] {
                assert!(
                    f1.end <= f2.entry
                        || (f2.kind == FunctionKind::Thunk && f2.end <= f1.end),
                    "{f1:?} overlaps {f2:?}"
                );
            }
        }
    }

    #[test]
    fn disjoint_map_is_untouched() {
        let mut functions = map(&[
            (0x1000, 0x1010, FunctionKind::Standard),
            (0x1010, 0x1020, FunctionKind::Standard),
        ]);

        let before = functions.clone();
        fix_overlaps(&mut functions);

        assert_eq!(functions, before);
    }
}
