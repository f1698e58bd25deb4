//! # Query — the multi-fragment read path
//!
//! Reads a sub-rectangle of a dense tiled array by merging every
//! fragment cell-by-cell, newest fragment winning, and streaming the
//! result into caller buffers in global cell order.
//!
//! ## Architecture
//!
//! ```text
//! ArrayReadState::read(buffers, sizes)
//!   |
//!   |  per requested attribute
//!   v
//! ┌──────────────────────────────────────────────────────────────┐
//! │ copy.rs   resume / copy current per-tile plan                │
//! │              |  (no plan queued?)                            │
//! │              v                                               │
//! │ lib.rs    next_tile()                                        │
//! │   tiles.rs    advance TileCursor, classify overlap           │
//! │   lib.rs      position fragments, pick max-overlap backbone, │
//! │               gather unsorted fragment cell ranges           │
//! │   merge.rs    heap sweep (newest wins) → ordered ranges      │
//! │               → cell-position plan, appended to the queue    │
//! │              |                                               │
//! │              v                                               │
//! │ copy.rs   copy the new plan; overflow pauses, next call      │
//! │           resumes at the exact cell                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A plan describes one tile for *every* attribute; attributes consume
//! the plan queue at their own pace (buffers fill at different rates)
//! and fully-consumed plans are garbage-collected. Overflow is not an
//! error: the call succeeds with partial output and the next call
//! continues exactly where it stopped.

mod copy;
mod merge;
mod tiles;

pub use tiles::TileOverlap;

use std::sync::Arc;

use fragment::{Fragment, FragmentError};
use schema::{ArraySchema, DenseCoord};
use thiserror::Error;

use merge::{FragmentCellRange, PlanEntry};
use tiles::{compute_tile_overlap, TileCursor};

/// Errors from the read path.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The operation is exposed but not implemented by this read path
    /// (sparse top-level dispatch, variable-size attribute streaming).
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// The query range is malformed or outside the array domain.
    #[error("invalid query range: {0}")]
    InvalidRange(String),

    /// An attribute id is out of range or requested twice.
    #[error("invalid attribute id {0}")]
    InvalidAttribute(usize),

    /// Caller buffers do not match the requested attributes.
    #[error("expected {need} buffers for the requested attributes, got {got}")]
    BufferMismatch { need: usize, got: usize },

    /// A fragment operation failed; the current tile was abandoned.
    #[error(transparent)]
    Fragment(#[from] FragmentError),
}

/// Outcome of a successful read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Every requested attribute has been streamed to the end of the
    /// query range.
    Done,
    /// At least one attribute filled its buffer; call again with
    /// emptied buffers to continue.
    Overflow,
}

/// An array opened for reading: an immutable schema plus its fragments
/// ordered oldest to newest (higher index = more recent, and wins
/// cell-level conflicts).
#[derive(Debug)]
pub struct Array<T: DenseCoord> {
    schema: Arc<ArraySchema<T>>,
    fragments: Vec<Fragment<T>>,
}

impl<T: DenseCoord> Array<T> {
    pub fn new(
        schema: Arc<ArraySchema<T>>,
        fragments: Vec<Fragment<T>>,
    ) -> Result<Self, ReadError> {
        for f in &fragments {
            if !Arc::ptr_eq(f.schema(), &schema) {
                return Err(FragmentError::SchemaMismatch(
                    "fragment was built against a different schema".into(),
                )
                .into());
            }
        }
        Ok(Self { schema, fragments })
    }

    pub fn schema(&self) -> &Arc<ArraySchema<T>> {
        &self.schema
    }

    pub fn fragments(&self) -> &[Fragment<T>] {
        &self.fragments
    }

    pub fn fragment_num(&self) -> usize {
        self.fragments.len()
    }

    /// Starts a read over `range` for the given attribute ids (the
    /// coordinates pseudo-attribute id is allowed). Validates the
    /// range and ids and positions every fragment's read cursor; no
    /// tile work happens until the first [`ArrayReadState::read`].
    ///
    /// The read state borrows the array's fragments mutably for its
    /// lifetime, so only one read can be active per array at a time.
    pub fn read_state(
        &mut self,
        range: &[(T, T)],
        attribute_ids: &[usize],
    ) -> Result<ArrayReadState<'_, T>, ReadError> {
        let schema = self.schema.clone();
        if range.len() != schema.dim_num() {
            return Err(ReadError::InvalidRange(format!(
                "{} dimensions, array has {}",
                range.len(),
                schema.dim_num()
            )));
        }
        for (i, &(lo, hi)) in range.iter().enumerate() {
            let (dlo, dhi) = schema.domain()[i];
            if lo > hi {
                return Err(ReadError::InvalidRange(format!(
                    "dimension {i}: low exceeds high"
                )));
            }
            if lo < dlo || hi > dhi {
                return Err(ReadError::InvalidRange(format!(
                    "dimension {i}: [{lo}, {hi}] outside domain [{dlo}, {dhi}]"
                )));
            }
        }
        for (n, &id) in attribute_ids.iter().enumerate() {
            if id > schema.coords_attribute_id() || attribute_ids[..n].contains(&id) {
                return Err(ReadError::InvalidAttribute(id));
            }
        }

        for f in self.fragments.iter_mut() {
            f.begin_read(range);
        }

        let slots = schema.attribute_num() + 1;
        let tile_cursor = TileCursor::new(&schema, range);
        let fragment_num = self.fragments.len();
        tracing::debug!(
            array = schema.name(),
            fragments = fragment_num,
            attributes = attribute_ids.len(),
            "read state initialized"
        );
        Ok(ArrayReadState {
            schema,
            fragments: &mut self.fragments,
            range: range.to_vec(),
            attribute_ids: attribute_ids.to_vec(),
            tile_cursor,
            fragment_tile_coords: vec![None; fragment_num],
            plans: Vec::new(),
            plan_pos: vec![0; slots],
            range_pos: vec![0; slots],
            cell_offset: vec![0; slots],
            tile_done: vec![true; slots],
            overflow: vec![false; slots],
            done: false,
        })
    }
}

/// The plan for one tile: how to materialize its cells for every
/// attribute, as runs of cell positions attributed to fragments.
#[derive(Debug)]
struct TilePlan<T> {
    tile_coords: Vec<T>,
    entries: Vec<PlanEntry>,
}

/// Incremental, overflow-safe cursor over the merged content of the
/// query range.
#[derive(Debug)]
pub struct ArrayReadState<'a, T: DenseCoord> {
    schema: Arc<ArraySchema<T>>,
    fragments: &'a mut [Fragment<T>],
    range: Vec<(T, T)>,
    attribute_ids: Vec<usize>,

    tile_cursor: TileCursor<T>,
    /// Mirror of each fragment's current tile coordinates.
    fragment_tile_coords: Vec<Option<Vec<T>>>,

    /// Queue of per-tile plans, oldest first.
    plans: Vec<TilePlan<T>>,
    /// Per attribute (last slot: coordinates): next unconsumed plan.
    plan_pos: Vec<usize>,
    /// Per attribute: next entry within the current plan.
    range_pos: Vec<usize>,
    /// Per attribute: cells of that entry already copied.
    cell_offset: Vec<u64>,
    /// Per attribute: whether the current plan has been fully copied.
    tile_done: Vec<bool>,
    overflow: Vec<bool>,
    done: bool,
}

impl<T: DenseCoord> ArrayReadState<'_, T> {
    /// Streams the next chunk of the query result into the caller's
    /// buffers, one buffer per fixed-size attribute (variable-size
    /// attributes would take two and are not yet streamable).
    ///
    /// On success each `sizes[i]` is rewritten to the bytes produced
    /// into `buffers[i]`; [`ReadStatus::Overflow`] means at least one
    /// attribute has more data and the next call resumes at the exact
    /// cell it stopped at. On error no size is written.
    pub fn read(
        &mut self,
        buffers: &mut [&mut [u8]],
        sizes: &mut [usize],
    ) -> Result<ReadStatus, ReadError> {
        if !self.schema.dense() {
            return Err(ReadError::Unsupported("sparse top-level read"));
        }
        let schema = self.schema.clone();
        let mut need = 0usize;
        for &id in &self.attribute_ids {
            let var = schema.attribute(id).map(|a| a.var_size()).unwrap_or(false);
            need += if var { 2 } else { 1 };
        }
        if buffers.len() != need || sizes.len() != need {
            return Err(ReadError::BufferMismatch {
                need,
                got: buffers.len().min(sizes.len()),
            });
        }

        self.overflow.fill(false);
        self.done = false;
        for f in self.fragments.iter_mut() {
            f.reset_overflow();
        }

        let ids = self.attribute_ids.clone();
        let mut produced = vec![0usize; need];
        let mut slot = 0;
        for &id in &ids {
            if schema.attribute(id).map(|a| a.var_size()).unwrap_or(false) {
                return Err(ReadError::Unsupported(
                    "variable-size attribute streaming",
                ));
            }
            produced[slot] = self.read_attribute(id, buffers[slot])?;
            slot += 1;
        }

        for (size, bytes) in sizes.iter_mut().zip(&produced) {
            *size = *bytes;
        }
        let status = if ids.iter().any(|&id| self.overflow[id]) {
            ReadStatus::Overflow
        } else {
            ReadStatus::Done
        };
        tracing::debug!(?status, bytes = produced.iter().sum::<usize>(), "read call");
        Ok(status)
    }

    /// Whether the tile stream is exhausted (set by the call that
    /// consumed the last tile).
    pub fn done(&self) -> bool {
        self.done
    }

    /// Whether the given attribute overflowed in the last call.
    pub fn overflow(&self, attribute_id: usize) -> bool {
        self.overflow[attribute_id]
    }

    /// Streams one attribute until its buffer fills or the tile stream
    /// ends. Returns the bytes produced.
    fn read_attribute(
        &mut self,
        attribute_id: usize,
        buf: &mut [u8],
    ) -> Result<usize, ReadError> {
        let mut offset = 0usize;
        loop {
            // finish the plan a previous call left half-copied
            if !self.tile_done[attribute_id] {
                self.copy_cell_ranges(attribute_id, buf, &mut offset)?;
                if self.overflow[attribute_id] {
                    return Ok(offset);
                }
            }

            // out of queued plans: compute the next tile's plan; the
            // stream may be over even if another attribute finished it
            if self.plan_pos[attribute_id] >= self.plans.len() {
                self.next_tile()?;
                if self.done {
                    return Ok(offset);
                }
            }

            self.copy_cell_ranges(attribute_id, buf, &mut offset)?;
            if self.overflow[attribute_id] {
                return Ok(offset);
            }
        }
    }

    /// Advances the range tile cursor, repositions fragments, merges
    /// the new tile and appends its plan to the queue. Sets `done`
    /// instead when the cursor is exhausted.
    fn next_tile(&mut self) -> Result<(), ReadError> {
        let schema = self.schema.clone();
        let first = !self.tile_cursor.started();
        let prev = self.tile_cursor.current().map(|c| c.to_vec());
        let current = match self.tile_cursor.advance(&schema) {
            Some(c) => c.to_vec(),
            None => {
                self.done = true;
                return Ok(());
            }
        };

        if first {
            // position every fragment on its first overlapping tile
            for i in 0..self.fragments.len() {
                self.fragments[i].advance_tile();
                self.fragment_tile_coords[i] =
                    self.fragments[i].tile_coords().map(|c| c.to_vec());
            }
        } else if let Some(prev) = prev {
            // advance only the fragments that were on the previous tile
            for i in 0..self.fragments.len() {
                if self.fragment_tile_coords[i].as_deref() == Some(prev.as_slice()) {
                    self.fragments[i].advance_tile();
                    self.fragment_tile_coords[i] =
                        self.fragments[i].tile_coords().map(|c| c.to_vec());
                }
            }
        }

        let overlap = compute_tile_overlap(&schema, &current, &self.range);

        // newest fragment on this tile that fully covers the
        // intersection; its ranges form the merge backbone
        let mut backbone = None;
        for i in (0..self.fragments.len()).rev() {
            if self.fragment_tile_coords[i].as_deref() == Some(current.as_slice())
                && self.fragments[i].covers(&overlap.global)
            {
                backbone = Some(i);
                break;
            }
        }

        let tile_rect = schema.tile_cell_rect(&current);
        let mut unsorted: Vec<FragmentCellRange<T>> = schema
            .cell_ranges_of_rect(&overlap.global, &tile_rect)
            .into_iter()
            .map(|range| FragmentCellRange {
                fragment: backbone,
                range,
            })
            .collect();

        // fragments newer than the backbone contribute their own ranges
        let newer_from = backbone.map_or(0, |i| i + 1);
        for i in newer_from..self.fragments.len() {
            if self.fragment_tile_coords[i].as_deref() == Some(current.as_slice()) {
                for range in self.fragments[i].cell_ranges() {
                    unsorted.push(FragmentCellRange {
                        fragment: Some(i),
                        range,
                    });
                }
            }
        }

        tracing::trace!(
            tile = ?current,
            kind = ?overlap.kind,
            rect = ?overlap.rect,
            backbone = ?backbone,
            ranges = unsorted.len(),
            "merging tile"
        );
        let merged = merge::merge_cell_ranges(&schema, self.fragments, &tile_rect, unsorted)?;
        let entries = merge::ranges_to_positions(&schema, self.fragments, &tile_rect, merged)?;
        self.plans.push(TilePlan {
            tile_coords: current,
            entries,
        });

        self.gc_plans();
        Ok(())
    }

    /// Drops the prefix of plans every requested attribute has moved
    /// past, shifting the per-attribute positions accordingly.
    fn gc_plans(&mut self) {
        let min_pos = self
            .attribute_ids
            .iter()
            .map(|&id| self.plan_pos[id])
            .min()
            .unwrap_or(0);
        if min_pos == 0 {
            return;
        }
        self.plans.drain(..min_pos);
        for pos in self.plan_pos.iter_mut() {
            if *pos != 0 {
                *pos -= min_pos;
            }
        }
    }
}

#[cfg(test)]
mod tests;
