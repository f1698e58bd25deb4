//! Per-tile merge of multi-fragment cell ranges.
//!
//! Input: the unsorted cell ranges every fragment contributes to the
//! current tile. Output: a totally ordered, non-overlapping list in
//! which the newest fragment owns every cell it stores and older
//! fragments keep only the cells nothing newer covers.
//!
//! The sweep runs a min-heap keyed on range start (cell order) with a
//! "newer fragment first" tie-break. Popping the earliest range and
//! comparing it against the next heap top decides everything locally:
//! older ranges starting inside the popped one are discarded or
//! head-trimmed, a newer range starting inside it splits it, and
//! multi-cell sparse ranges that collide with anything are expanded
//! one stored cell at a time.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use fragment::Fragment;
use schema::{ArraySchema, CellPosRange, CellRange, DenseCoord};

use crate::ReadError;

/// A cell range attributed to one fragment. `None` marks a range no
/// fragment covers: the streamer fills it with the attribute's fill
/// value.
#[derive(Debug, Clone)]
pub(crate) struct FragmentCellRange<T> {
    pub fragment: Option<usize>,
    pub range: CellRange<T>,
}

/// One entry of a per-tile plan: a run of cell positions to copy from
/// one fragment (or to fill).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlanEntry {
    pub fragment: Option<usize>,
    pub range: CellPosRange,
}

/// Heap adapter realizing the merge order.
struct HeapEntry<'a, T: DenseCoord> {
    schema: &'a ArraySchema<T>,
    fcr: FragmentCellRange<T>,
}

impl<T: DenseCoord> PartialEq for HeapEntry<'_, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T: DenseCoord> Eq for HeapEntry<'_, T> {}

impl<T: DenseCoord> PartialOrd for HeapEntry<'_, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: DenseCoord> Ord for HeapEntry<'_, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; we want the range with the earliest
        // start first, so reverse the cell-order comparison. On equal
        // starts the newer fragment must pop first — that tie-break is
        // what makes trimming remove older cells, never newer ones.
        // `None` (fill) sorts below every real fragment.
        match self
            .schema
            .cell_order_cmp(self.fcr.range.first(), other.fcr.range.first())
        {
            Ordering::Less => Ordering::Greater,
            Ordering::Greater => Ordering::Less,
            Ordering::Equal => self.fcr.fragment.cmp(&other.fcr.fragment),
        }
    }
}

/// Merges the unsorted per-tile ranges into a precedence-correct
/// ordered list. `tile_rect` is the tile's global cell rectangle; cell
/// successor/predecessor steps are bounded to it.
pub(crate) fn merge_cell_ranges<T: DenseCoord>(
    schema: &ArraySchema<T>,
    fragments: &[Fragment<T>],
    tile_rect: &[(T, T)],
    unsorted: Vec<FragmentCellRange<T>>,
) -> Result<Vec<FragmentCellRange<T>>, ReadError> {
    let tile_end: Vec<T> = tile_rect.iter().map(|r| r.1).collect();
    let mut heap: BinaryHeap<HeapEntry<'_, T>> = unsorted
        .into_iter()
        .map(|fcr| HeapEntry { schema, fcr })
        .collect();
    let mut out: Vec<FragmentCellRange<T>> = Vec::new();

    while let Some(entry) = heap.pop() {
        let mut popped = entry.fcr;

        if heap.is_empty() {
            // Last range standing. Dense, fill and multi-cell sparse
            // ranges pass through; a unary sparse range only survives
            // if its cell is actually stored.
            let keep = match popped.fragment {
                None => true,
                Some(i) => {
                    fragments[i].dense()
                        || !popped.range.is_unary()
                        || fragments[i].coords_exist(popped.range.first())
                }
            };
            if keep {
                out.push(popped);
            }
            break;
        }

        match popped.fragment {
            Some(_) if !is_dense(fragments, popped.fragment) && !popped.range.is_unary() => {
                // MULTI-CELL SPARSE: pass through if nothing else starts
                // inside it, otherwise expand one stored cell at a time.
                let overlaps_top = heap.peek().is_some_and(|top| {
                    schema.cell_order_cmp(top.fcr.range.first(), popped.range.last())
                        != Ordering::Greater
                });
                if !overlaps_top {
                    out.push(popped);
                } else {
                    expand_sparse(schema, fragments, &tile_end, popped, &mut heap)?;
                }
            }
            _ => {
                // DENSE OR UNARY: the popped range owns its cells unless
                // a newer range claims some of them.
                if let Some(fi) = popped.fragment {
                    if !fragments[fi].dense()
                        && !fragments[fi].coords_exist(popped.range.first())
                    {
                        continue;
                    }
                }

                // Older tops starting inside the popped range lose those
                // cells: fully-contained ones are dropped, partially-
                // overlapping ones restart just past the popped end.
                while let Some(top) = heap.peek() {
                    let t = &top.fcr;
                    let starts_inside = t.fragment < popped.fragment
                        && schema.cell_order_cmp(t.range.first(), popped.range.first())
                            != Ordering::Less
                        && schema.cell_order_cmp(t.range.first(), popped.range.last())
                            != Ordering::Greater;
                    if !starts_inside {
                        break;
                    }
                    if schema.cell_order_cmp(t.range.last(), popped.range.last())
                        == Ordering::Greater
                    {
                        let mut trimmed =
                            CellRange::new(popped.range.last(), t.range.last());
                        schema.next_cell_in(tile_rect, trimmed.first_mut());
                        let fragment = t.fragment;
                        heap.pop();
                        heap.push(HeapEntry {
                            schema,
                            fcr: FragmentCellRange {
                                fragment,
                                range: trimmed,
                            },
                        });
                    } else {
                        heap.pop();
                    }
                }

                // A newer top starting inside the popped range splits
                // it: the tail past the newer range is requeued, the
                // popped range ends just before the newer one starts.
                let newer_top = heap.peek().map(|top| {
                    (
                        top.fcr.fragment,
                        top.fcr.range.first().to_vec(),
                        top.fcr.range.last().to_vec(),
                    )
                });
                if let Some((t_fragment, t_first, t_last)) = newer_top {
                    if t_fragment > popped.fragment
                        && schema.cell_order_cmp(&t_first, popped.range.last())
                            != Ordering::Greater
                    {
                        // A newer multi-cell sparse range may only claim
                        // the cells it actually stores: expand it first
                        // and reconsider the popped range afterwards.
                        if !is_dense(fragments, t_fragment) && t_first != t_last {
                            if let Some(top) = heap.pop() {
                                expand_sparse(schema, fragments, &tile_end, top.fcr, &mut heap)?;
                            }
                            heap.push(HeapEntry { schema, fcr: popped });
                            continue;
                        }

                        if schema.cell_order_cmp(&t_last, popped.range.last())
                            == Ordering::Less
                        {
                            let mut tail = CellRange::new(&t_last, popped.range.last());
                            schema.next_cell_in(tile_rect, tail.first_mut());
                            heap.push(HeapEntry {
                                schema,
                                fcr: FragmentCellRange {
                                    fragment: popped.fragment,
                                    range: tail,
                                },
                            });
                        }
                        popped.range.last_mut().copy_from_slice(&t_first);
                        schema.prev_cell_in(tile_rect, popped.range.last_mut());
                    }
                }

                out.push(popped);
            }
        }
    }

    debug_assert!(heap.is_empty());
    Ok(out)
}

/// Whether a range source behaves densely: real dense fragments, and
/// fill ranges (every cell of the range exists by definition).
fn is_dense<T: DenseCoord>(fragments: &[Fragment<T>], fragment: Option<usize>) -> bool {
    match fragment {
        None => true,
        Some(i) => fragments[i].dense(),
    }
}

/// Expands a multi-cell sparse range into its first stored in-range
/// cell (requeued as a unary range) plus the remainder after it, both
/// bounded by the tile domain end. Hollow ranges vanish.
fn expand_sparse<'a, T: DenseCoord>(
    schema: &'a ArraySchema<T>,
    fragments: &[Fragment<T>],
    tile_end: &[T],
    mut fcr: FragmentCellRange<T>,
    heap: &mut BinaryHeap<HeapEntry<'a, T>>,
) -> Result<(), ReadError> {
    let Some(fi) = fcr.fragment else {
        return Ok(());
    };
    let Some((first, second)) = fragments[fi].first_two_coords(fcr.range.first())? else {
        return Ok(());
    };
    if schema.cell_order_cmp(&first, tile_end) == Ordering::Greater {
        return Ok(());
    }
    heap.push(HeapEntry {
        schema,
        fcr: FragmentCellRange {
            fragment: fcr.fragment,
            range: CellRange::unary(&first),
        },
    });
    if let Some(second) = second {
        if schema.cell_order_cmp(&second, tile_end) != Ordering::Greater {
            fcr.range.first_mut().copy_from_slice(&second);
            heap.push(HeapEntry { schema, fcr });
        }
    }
    Ok(())
}

/// Converts merged cell ranges into the per-tile plan: dense and fill
/// ranges normalize against the tile origin and map their endpoints
/// through the in-tile linearization; sparse ranges expand through the
/// fragment into runs of stored-cell positions.
pub(crate) fn ranges_to_positions<T: DenseCoord>(
    schema: &ArraySchema<T>,
    fragments: &[Fragment<T>],
    tile_rect: &[(T, T)],
    merged: Vec<FragmentCellRange<T>>,
) -> Result<Vec<PlanEntry>, ReadError> {
    let dim = schema.dim_num();
    let mut plan = Vec::with_capacity(merged.len());
    for fcr in merged {
        match fcr.fragment {
            Some(i) if !fragments[i].dense() => {
                for range in fragments[i].sparse_pos_ranges(&fcr.range)? {
                    plan.push(PlanEntry {
                        fragment: Some(i),
                        range,
                    });
                }
            }
            fragment => {
                let mut rel = vec![T::ZERO; dim];
                for d in 0..dim {
                    rel[d] = fcr.range.first()[d] - tile_rect[d].0;
                }
                let first = schema.cell_pos(&rel);
                for d in 0..dim {
                    rel[d] = fcr.range.last()[d] - tile_rect[d].0;
                }
                let last = schema.cell_pos(&rel);
                plan.push(PlanEntry {
                    fragment,
                    range: CellPosRange::new(first, last),
                });
            }
        }
    }
    Ok(plan)
}
