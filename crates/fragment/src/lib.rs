//! # Fragment — immutable array snapshots
//!
//! A fragment is one timestamped batch of writes to an array: either a
//! *dense* rectangle of cells (every cell of a sub-rectangle has a
//! value) or a *sparse* set of individual cells. Fragments are
//! *write-once, read-many* — once produced they are never modified,
//! and a read over the array merges all fragments newest-wins.
//!
//! ## File layout (`.tsf`)
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ HEADER                                                       │
//! │ coord_type (u8) | dense (u8) | dim_num (u16) | attr_num (u16)│
//! │ per dim:  lo (i64) | hi (i64)      -- fragment domain        │
//! │ per attr: cell_size (u32)                                    │
//! ├──────────────────────────────────────────────────────────────┤
//! │ BODY                                                         │
//! │ dense:  per attr, cells * cell_size bytes in cell order      │
//! │         over the fragment domain                             │
//! │ sparse: cell_num (u64) | coords (cell_num * dim_num * i64)   │
//! │         | per attr, cell_num * cell_size bytes               │
//! ├──────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 8 bytes)                                 │
//! │ crc32 of header+body (u32 LE) | magic "TSF1" (u32 LE)        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian; coordinates are widened to `i64` on
//! disk regardless of the schema's coordinate type. The CRC32 detects
//! silent corruption on open.
//!
//! ## Read cursor
//!
//! A read installs a cursor with [`Fragment::begin_read`]: the ordered
//! sequence of array tiles in which this fragment has data overlapping
//! the query range. The merge engine advances the cursor tile by tile
//! ([`advance_tile`](Fragment::advance_tile)) and interrogates the
//! current tile through [`covers`](Fragment::covers),
//! [`cell_ranges`](Fragment::cell_ranges),
//! [`coords_exist`](Fragment::coords_exist),
//! [`first_two_coords`](Fragment::first_two_coords) and
//! [`sparse_pos_ranges`](Fragment::sparse_pos_ranges), then copies
//! cells out with [`copy_cells`](Fragment::copy_cells). Sparse lookups
//! only ever see stored cells that fall inside the query range.

mod format;
mod reader;
mod writer;

pub use writer::FragmentWriter;

use std::cmp::Ordering;
use std::io;
use std::sync::Arc;

use schema::{
    cell_order_cmp, linearize, rect_contains, rect_intersect, ArraySchema, CellPosRange,
    CellRange, DenseCoord, TileWalk,
};
use thiserror::Error;

/// Errors from fragment I/O and fragment read operations.
#[derive(Debug, Error)]
pub enum FragmentError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The file failed size, magic, CRC or bounds validation.
    #[error("corrupt fragment: {0}")]
    Corrupt(String),

    /// The file disagrees with the array schema it was opened against.
    #[error("fragment does not match schema: {0}")]
    SchemaMismatch(String),

    /// Sparse coordinates are not strictly sorted in global order.
    #[error("sparse coordinates out of order at cell {0}")]
    Unsorted(usize),

    /// The fragment's cells extend outside the array domain.
    #[error("fragment extends outside the array domain")]
    OutOfDomain,

    /// A read operation was invoked without an installed read cursor.
    #[error("fragment has no active read cursor")]
    NoCursor,
}

#[derive(Debug)]
enum FragmentData<T> {
    Dense {
        /// Inclusive rectangle this fragment stores, contained in the
        /// array domain.
        domain: Vec<(T, T)>,
        /// Per attribute: one value per cell, in cell order over
        /// `domain`.
        attrs: Vec<Vec<u8>>,
    },
    Sparse {
        /// Flattened cell coordinates (`cell_num * dim_num`), strictly
        /// sorted in global order (tile order, then cell order).
        coords: Vec<T>,
        /// Per attribute: one value per stored cell.
        attrs: Vec<Vec<u8>>,
    },
}

/// One array tile containing stored sparse cells, with the stored-cell
/// slice it maps to. Cell positions for sparse fragments index into
/// this slice.
#[derive(Debug, Clone)]
struct SparseTile<T> {
    tile_coords: Vec<T>,
    lo: usize,
    hi: usize,
}

#[derive(Debug)]
enum CursorKind<T> {
    Dense(TileWalk<T>),
    Sparse {
        tiles: Vec<SparseTile<T>>,
        pos: usize,
        started: bool,
    },
}

#[derive(Debug)]
struct ReadCursor<T> {
    /// The query range this read was initialized with; every sparse
    /// lookup is filtered against it.
    range: Vec<(T, T)>,
    kind: CursorKind<T>,
}

/// An immutable snapshot of writes to one array.
#[derive(Debug)]
pub struct Fragment<T: DenseCoord> {
    schema: Arc<ArraySchema<T>>,
    data: FragmentData<T>,
    cursor: Option<ReadCursor<T>>,
    /// Per-attribute overflow flags (last slot: coordinates).
    overflow: Vec<bool>,
    /// Per-attribute count of tiles fully streamed (last slot:
    /// coordinates). Surfaced by engine stats.
    tiles_done: Vec<u64>,
}

impl<T: DenseCoord> Fragment<T> {
    /// Builds an in-memory dense fragment covering `domain`, with one
    /// buffer per schema attribute holding the cell values in cell
    /// order over the rectangle.
    pub fn new_dense(
        schema: Arc<ArraySchema<T>>,
        domain: Vec<(T, T)>,
        attrs: Vec<Vec<u8>>,
    ) -> Result<Self, FragmentError> {
        if domain.len() != schema.dim_num() {
            return Err(FragmentError::SchemaMismatch(format!(
                "domain has {} dimensions, schema has {}",
                domain.len(),
                schema.dim_num()
            )));
        }
        for (i, &(lo, hi)) in domain.iter().enumerate() {
            let (dlo, dhi) = schema.domain()[i];
            if lo > hi {
                return Err(FragmentError::Corrupt(format!(
                    "dimension {i}: inverted fragment domain"
                )));
            }
            if lo < dlo || hi > dhi {
                return Err(FragmentError::OutOfDomain);
            }
        }
        let cells: u64 = domain
            .iter()
            .map(|&(lo, hi)| (hi - lo + T::ONE).as_u64())
            .product();
        Self::check_attr_sizes(&schema, &attrs, cells)?;
        Ok(Self::assemble(
            schema,
            FragmentData::Dense { domain, attrs },
        ))
    }

    /// Builds an in-memory sparse fragment from flattened coordinates
    /// (strictly sorted in global order) and per-attribute values.
    pub fn new_sparse(
        schema: Arc<ArraySchema<T>>,
        coords: Vec<T>,
        attrs: Vec<Vec<u8>>,
    ) -> Result<Self, FragmentError> {
        let dim = schema.dim_num();
        if coords.len() % dim != 0 {
            return Err(FragmentError::Corrupt(format!(
                "coordinate count {} is not a multiple of {} dimensions",
                coords.len(),
                dim
            )));
        }
        let cells = (coords.len() / dim) as u64;
        for cell in coords.chunks_exact(dim) {
            if !rect_contains(schema.domain(), cell) {
                return Err(FragmentError::OutOfDomain);
            }
        }
        for (i, pair) in coords.chunks_exact(dim).collect::<Vec<_>>().windows(2).enumerate() {
            if global_order_cmp(&schema, pair[0], pair[1]) != Ordering::Less {
                return Err(FragmentError::Unsorted(i + 1));
            }
        }
        Self::check_attr_sizes(&schema, &attrs, cells)?;
        Ok(Self::assemble(
            schema,
            FragmentData::Sparse { coords, attrs },
        ))
    }

    fn check_attr_sizes(
        schema: &ArraySchema<T>,
        attrs: &[Vec<u8>],
        cells: u64,
    ) -> Result<(), FragmentError> {
        if attrs.len() != schema.attribute_num() {
            return Err(FragmentError::SchemaMismatch(format!(
                "{} attribute buffers, schema has {}",
                attrs.len(),
                schema.attribute_num()
            )));
        }
        for (a, buf) in schema.attributes().iter().zip(attrs) {
            let want = cells * a.cell_size() as u64;
            if buf.len() as u64 != want {
                return Err(FragmentError::SchemaMismatch(format!(
                    "attribute {:?}: {} bytes, expected {}",
                    a.name(),
                    buf.len(),
                    want
                )));
            }
        }
        Ok(())
    }

    fn assemble(schema: Arc<ArraySchema<T>>, data: FragmentData<T>) -> Self {
        let slots = schema.attribute_num() + 1;
        Self {
            schema,
            data,
            cursor: None,
            overflow: vec![false; slots],
            tiles_done: vec![0; slots],
        }
    }

    pub fn schema(&self) -> &Arc<ArraySchema<T>> {
        &self.schema
    }

    /// Whether this fragment stores a dense rectangle.
    pub fn dense(&self) -> bool {
        matches!(self.data, FragmentData::Dense { .. })
    }

    /// Number of stored cells: the rectangle volume for dense
    /// fragments, the stored-cell count for sparse ones.
    pub fn cell_count(&self) -> u64 {
        match &self.data {
            FragmentData::Dense { domain, .. } => domain
                .iter()
                .map(|&(lo, hi)| (hi - lo + T::ONE).as_u64())
                .product(),
            FragmentData::Sparse { coords, .. } => {
                (coords.len() / self.schema.dim_num()) as u64
            }
        }
    }

    /// Installs the read cursor for a query over `range`: the ordered
    /// tiles in which this fragment has data overlapping the range.
    /// Clears overflow flags and tile counters.
    pub fn begin_read(&mut self, range: &[(T, T)]) {
        let kind = match &self.data {
            FragmentData::Dense { domain, .. } => {
                let walk = match rect_intersect(domain, range)
                    .and_then(|rect| self.schema.tile_rect_of(&rect))
                {
                    Some(tile_rect) => TileWalk::new(tile_rect),
                    None => TileWalk::exhausted(),
                };
                CursorKind::Dense(walk)
            }
            FragmentData::Sparse { coords, .. } => {
                let tiles = self.sparse_tiles(coords, range);
                CursorKind::Sparse {
                    tiles,
                    pos: 0,
                    started: false,
                }
            }
        };
        self.cursor = Some(ReadCursor {
            range: range.to_vec(),
            kind,
        });
        self.overflow.fill(false);
        self.tiles_done.fill(0);
        tracing::debug!(dense = self.dense(), "fragment read cursor installed");
    }

    /// Groups the sorted stored cells by array tile and keeps the tiles
    /// holding at least one in-range cell.
    fn sparse_tiles(&self, coords: &[T], range: &[(T, T)]) -> Vec<SparseTile<T>> {
        let dim = self.schema.dim_num();
        let n = coords.len() / dim;
        let mut tiles = Vec::new();
        let mut i = 0;
        while i < n {
            let tile = self.tile_of(&coords[i * dim..(i + 1) * dim]);
            let mut j = i + 1;
            while j < n && self.tile_of(&coords[j * dim..(j + 1) * dim]) == tile {
                j += 1;
            }
            let any_in_range = (i..j)
                .any(|k| rect_contains(range, &coords[k * dim..(k + 1) * dim]));
            if any_in_range {
                tiles.push(SparseTile {
                    tile_coords: tile,
                    lo: i,
                    hi: j,
                });
            }
            i = j;
        }
        tiles
    }

    fn tile_of(&self, cell: &[T]) -> Vec<T> {
        self.schema
            .domain()
            .iter()
            .zip(self.schema.tile_extents())
            .zip(cell)
            .map(|((&(dlo, _), &e), &c)| (c - dlo) / e)
            .collect()
    }

    /// Advances the cursor to the fragment's next tile overlapping the
    /// query range. The first call positions it on the first such tile.
    pub fn advance_tile(&mut self) {
        let schema = self.schema.clone();
        if let Some(cursor) = self.cursor.as_mut() {
            match &mut cursor.kind {
                CursorKind::Dense(walk) => {
                    walk.advance(&schema);
                }
                CursorKind::Sparse { pos, started, .. } => {
                    if !*started {
                        *started = true;
                    } else {
                        *pos += 1;
                    }
                }
            }
        }
    }

    /// Tile coordinates of the cursor's current tile, `None` when the
    /// fragment has no further overlapping tiles.
    pub fn tile_coords(&self) -> Option<&[T]> {
        match &self.cursor.as_ref()?.kind {
            CursorKind::Dense(walk) => walk.current(),
            CursorKind::Sparse {
                tiles,
                pos,
                started,
            } => {
                if !*started {
                    None
                } else {
                    tiles.get(*pos).map(|t| t.tile_coords.as_slice())
                }
            }
        }
    }

    /// Stored cells of the current sparse tile as `(slice, dim)`.
    fn tile_slice(&self) -> Option<(&[T], usize)> {
        let dim = self.schema.dim_num();
        let cursor = self.cursor.as_ref()?;
        match (&cursor.kind, &self.data) {
            (
                CursorKind::Sparse {
                    tiles,
                    pos,
                    started,
                },
                FragmentData::Sparse { coords, .. },
            ) if *started => tiles
                .get(*pos)
                .map(|t| (&coords[t.lo * dim..t.hi * dim], dim)),
            _ => None,
        }
    }

    /// Whether the fragment's stored data fully covers the global
    /// rectangle `rect` (the query's intersection with the current
    /// tile).
    pub fn covers(&self, rect: &[(T, T)]) -> bool {
        match &self.data {
            FragmentData::Dense { domain, .. } => rect
                .iter()
                .zip(domain)
                .all(|(&(lo, hi), &(flo, fhi))| flo <= lo && hi <= fhi),
            FragmentData::Sparse { .. } => {
                let Some((slice, dim)) = self.tile_slice() else {
                    return false;
                };
                let volume: u64 = rect
                    .iter()
                    .map(|&(lo, hi)| (hi - lo + T::ONE).as_u64())
                    .product();
                let stored = slice
                    .chunks_exact(dim)
                    .filter(|c| rect_contains(rect, c))
                    .count() as u64;
                stored == volume
            }
        }
    }

    /// Whether a stored cell exists at exactly `coords` in the current
    /// tile. Dense fragments store every cell of their rectangle.
    pub fn coords_exist(&self, coords: &[T]) -> bool {
        match &self.data {
            FragmentData::Dense { domain, .. } => rect_contains(domain, coords),
            FragmentData::Sparse { .. } => {
                let Some((slice, dim)) = self.tile_slice() else {
                    return false;
                };
                let order = self.schema.cell_order();
                slice
                    .chunks_exact(dim)
                    .any(|c| cell_order_cmp(order, c, coords) == Ordering::Equal)
            }
        }
    }

    /// First stored in-range cell at or after `start` (cell order) in
    /// the current tile, together with the one after it. `None` when no
    /// such cell remains. Sparse fragments only.
    #[allow(clippy::type_complexity)]
    pub fn first_two_coords(
        &self,
        start: &[T],
    ) -> Result<Option<(Vec<T>, Option<Vec<T>>)>, FragmentError> {
        let cursor = self.cursor.as_ref().ok_or(FragmentError::NoCursor)?;
        let range = cursor.range.clone();
        let Some((slice, dim)) = self.tile_slice() else {
            return Ok(None);
        };
        let order = self.schema.cell_order();
        let mut found = slice.chunks_exact(dim).filter(|c| {
            cell_order_cmp(order, c, start) != Ordering::Less && rect_contains(&range, c)
        });
        match found.next() {
            None => Ok(None),
            Some(first) => Ok(Some((
                first.to_vec(),
                found.next().map(|c| c.to_vec()),
            ))),
        }
    }

    /// The cell ranges this fragment contributes to the current tile,
    /// clipped to the query range: cell-order-contiguous slabs of
    /// `domain ∩ tile ∩ range` for dense fragments, one tight range
    /// spanning the first to last in-range stored cell for sparse ones.
    pub fn cell_ranges(&self) -> Vec<CellRange<T>> {
        let Some(cursor) = self.cursor.as_ref() else {
            return Vec::new();
        };
        let Some(tile) = self.tile_coords() else {
            return Vec::new();
        };
        let tile_rect = self.schema.tile_cell_rect(tile);
        match &self.data {
            FragmentData::Dense { domain, .. } => {
                let rect = rect_intersect(domain, &tile_rect)
                    .and_then(|r| rect_intersect(&r, &cursor.range));
                match rect {
                    Some(rect) => self.schema.cell_ranges_of_rect(&rect, &tile_rect),
                    None => Vec::new(),
                }
            }
            FragmentData::Sparse { .. } => {
                let (slice, dim) = match self.tile_slice() {
                    Some(s) => s,
                    None => return Vec::new(),
                };
                let mut in_range = slice
                    .chunks_exact(dim)
                    .filter(|c| rect_contains(&cursor.range, c));
                match in_range.next() {
                    None => Vec::new(),
                    Some(first) => {
                        let last = in_range.last().unwrap_or(first);
                        vec![CellRange::new(first, last)]
                    }
                }
            }
        }
    }

    /// Expands a merged sparse cell range into runs of stored-cell
    /// positions in the current tile: consecutive stored indices whose
    /// cells fall inside both the cell-order interval and the query
    /// range. Interior out-of-range cells split the result into
    /// multiple runs.
    pub fn sparse_pos_ranges(
        &self,
        range: &CellRange<T>,
    ) -> Result<Vec<CellPosRange>, FragmentError> {
        let cursor = self.cursor.as_ref().ok_or(FragmentError::NoCursor)?;
        let (slice, dim) = self
            .tile_slice()
            .ok_or_else(|| FragmentError::Corrupt("sparse expansion outside a tile".into()))?;
        let order = self.schema.cell_order();
        let mut out: Vec<CellPosRange> = Vec::new();
        for (p, cell) in slice.chunks_exact(dim).enumerate() {
            let inside = cell_order_cmp(order, cell, range.first()) != Ordering::Less
                && cell_order_cmp(order, cell, range.last()) != Ordering::Greater
                && rect_contains(&cursor.range, cell);
            if !inside {
                continue;
            }
            let p = p as u64;
            match out.last_mut() {
                Some(run) if run.last + 1 == p => run.last = p,
                _ => out.push(CellPosRange::new(p, p)),
            }
        }
        Ok(out)
    }

    /// Copies the cells of `range` for one attribute into `buf` at
    /// `offset`, whole cells only. When the buffer cannot hold the full
    /// range, copies what fits and raises the attribute's overflow
    /// flag.
    ///
    /// `tile_coords` names the array tile the positions refer to —
    /// which may trail the fragment's own cursor when one attribute of
    /// a multi-attribute read lags behind another. Positions index that
    /// tile's cell-order linearization (dense) or its stored-cell
    /// slice (sparse).
    pub fn copy_cells(
        &mut self,
        attribute_id: usize,
        tile_coords: &[T],
        buf: &mut [u8],
        offset: &mut usize,
        range: &CellPosRange,
    ) -> Result<(), FragmentError> {
        let schema = self.schema.clone();
        let coords_id = schema.coords_attribute_id();
        let cell_size = schema.cell_size_of(attribute_id);

        let want = range.count();
        let fit = ((buf.len() - *offset) / cell_size) as u64;
        let copy = want.min(fit);

        match &self.data {
            FragmentData::Dense { domain, attrs } => {
                let tile_rect = schema.tile_cell_rect(tile_coords);
                let spans: Vec<T> = domain.iter().map(|&(lo, hi)| hi - lo + T::ONE).collect();
                let dim = schema.dim_num();
                let coord_size = std::mem::size_of::<T>();
                let mut rel = vec![T::ZERO; dim];
                for k in 0..copy {
                    schema.cell_coords_of_pos(range.first + k, &mut rel);
                    let mut global = vec![T::ZERO; dim];
                    for d in 0..dim {
                        global[d] = tile_rect[d].0 + rel[d];
                    }
                    if attribute_id == coords_id {
                        for (d, &g) in global.iter().enumerate() {
                            let at = *offset + d * coord_size;
                            g.write_le(&mut buf[at..at + coord_size]);
                        }
                    } else {
                        let mut frag_rel = vec![T::ZERO; dim];
                        for d in 0..dim {
                            frag_rel[d] = global[d] - domain[d].0;
                        }
                        let idx =
                            linearize(schema.cell_order(), &frag_rel, &spans) as usize;
                        let src = &attrs[attribute_id][idx * cell_size..(idx + 1) * cell_size];
                        buf[*offset..*offset + cell_size].copy_from_slice(src);
                    }
                    *offset += cell_size;
                }
            }
            FragmentData::Sparse { coords, attrs } => {
                let cursor = self.cursor.as_ref().ok_or(FragmentError::NoCursor)?;
                let base = match &cursor.kind {
                    CursorKind::Sparse { tiles, .. } => tiles
                        .iter()
                        .find(|t| {
                            cell_order_cmp(schema.tile_order(), &t.tile_coords, tile_coords)
                                == Ordering::Equal
                        })
                        .ok_or_else(|| {
                            FragmentError::Corrupt("copy addresses a tile without data".into())
                        })?
                        .lo,
                    CursorKind::Dense(_) => unreachable!("sparse data with dense cursor"),
                };
                let dim = schema.dim_num();
                let coord_size = std::mem::size_of::<T>();
                for k in 0..copy {
                    let stored = base + (range.first + k) as usize;
                    if attribute_id == coords_id {
                        let cell = &coords[stored * dim..(stored + 1) * dim];
                        for (d, &c) in cell.iter().enumerate() {
                            let at = *offset + d * coord_size;
                            c.write_le(&mut buf[at..at + coord_size]);
                        }
                    } else {
                        let src =
                            &attrs[attribute_id][stored * cell_size..(stored + 1) * cell_size];
                        buf[*offset..*offset + cell_size].copy_from_slice(src);
                    }
                    *offset += cell_size;
                }
            }
        }

        if copy < want {
            self.overflow[attribute_id] = true;
        }
        Ok(())
    }

    /// Whether the last copy for this attribute ran out of buffer
    /// space.
    pub fn overflow(&self, attribute_id: usize) -> bool {
        self.overflow[attribute_id]
    }

    /// Clears all overflow flags. Invoked at the start of every read
    /// call.
    pub fn reset_overflow(&mut self) {
        self.overflow.fill(false);
    }

    /// Notification that the current tile has been fully streamed for
    /// one attribute.
    pub fn tile_done(&mut self, attribute_id: usize) {
        self.tiles_done[attribute_id] += 1;
    }

    /// Tiles fully streamed for one attribute since `begin_read`.
    pub fn tiles_done_count(&self, attribute_id: usize) -> u64 {
        self.tiles_done[attribute_id]
    }
}

/// Global order over cells: tile order on tile coordinates, then cell
/// order within the tile.
fn global_order_cmp<T: DenseCoord>(schema: &ArraySchema<T>, a: &[T], b: &[T]) -> Ordering {
    let tile = |cell: &[T]| -> Vec<T> {
        schema
            .domain()
            .iter()
            .zip(schema.tile_extents())
            .zip(cell)
            .map(|((&(dlo, _), &e), &c)| (c - dlo) / e)
            .collect()
    };
    cell_order_cmp(schema.tile_order(), &tile(a), &tile(b))
        .then_with(|| cell_order_cmp(schema.cell_order(), a, b))
}

#[cfg(test)]
mod tests;
