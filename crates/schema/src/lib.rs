//! # Schema — array layout and cell-order math
//!
//! Defines the immutable [`ArraySchema`] shared by every component of the
//! Tessera array engine, and the coordinate arithmetic the read path is
//! built on: cell-order comparison, domain-bounded successor/predecessor,
//! tile-grid projection, in-tile linearization, and slab splitting of
//! rectangles that are not contiguous in cell order.
//!
//! An array is a *D*-dimensional grid of cells over an inclusive per-
//! dimension domain, partitioned into fixed-extent tiles. Cells within a
//! tile are totally ordered by the schema's [`CellOrder`]; tiles are
//! ordered by the tile order over tile coordinates. All read-path merge
//! decisions reduce to comparisons and steps in these orders.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

use thiserror::Error;

/// Coordinate element types accepted by the ordering comparator.
///
/// Implemented for `i32`, `i64`, `f32` and `f64`. The floating-point
/// impls exist for comparison only — the dense read path requires
/// [`DenseCoord`].
pub trait Coord: Copy + PartialOrd + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Total ordering over coordinate values.
    fn total_cmp(&self, other: &Self) -> Ordering;
}

impl Coord for i32 {
    fn total_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl Coord for i64 {
    fn total_cmp(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }
}

impl Coord for f32 {
    fn total_cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(self, other)
    }
}

impl Coord for f64 {
    fn total_cmp(&self, other: &Self) -> Ordering {
        f64::total_cmp(self, other)
    }
}

/// Integer coordinate types supported by the dense read path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordType {
    Int32,
    Int64,
}

impl fmt::Display for CoordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordType::Int32 => write!(f, "int32"),
            CoordType::Int64 => write!(f, "int64"),
        }
    }
}

/// Coordinate types the dense read path instantiates for (`i32`, `i64`).
///
/// Adds the integer arithmetic the tile-grid projections and in-tile
/// linearization need on top of [`Coord`].
pub trait DenseCoord:
    Coord
    + Ord
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
{
    const ZERO: Self;
    const ONE: Self;
    /// Runtime tag used by file formats and entry-point dispatch.
    const COORD_TYPE: CoordType;

    /// Widens to `u64`. Callers only invoke this on non-negative values
    /// (normalized, domain-relative coordinates).
    fn as_u64(self) -> u64;
    fn from_u64(v: u64) -> Self;
    fn to_i64(self) -> i64;
    /// Narrowing conversion used when decoding widened on-disk coords.
    fn from_i64(v: i64) -> Option<Self>;
    /// Writes the value little-endian into `out` (exactly
    /// `size_of::<Self>()` bytes). Coordinate tuples delivered to
    /// caller buffers use this encoding.
    fn write_le(self, out: &mut [u8]);
    fn read_le(src: &[u8]) -> Self;
}

impl DenseCoord for i32 {
    const ZERO: Self = 0;
    const ONE: Self = 1;
    const COORD_TYPE: CoordType = CoordType::Int32;

    fn as_u64(self) -> u64 {
        self as u64
    }
    fn from_u64(v: u64) -> Self {
        v as i32
    }
    fn to_i64(self) -> i64 {
        self as i64
    }
    fn from_i64(v: i64) -> Option<Self> {
        i32::try_from(v).ok()
    }
    fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }
    fn read_le(src: &[u8]) -> Self {
        i32::from_le_bytes(src.try_into().unwrap())
    }
}

impl DenseCoord for i64 {
    const ZERO: Self = 0;
    const ONE: Self = 1;
    const COORD_TYPE: CoordType = CoordType::Int64;

    fn as_u64(self) -> u64 {
        self as u64
    }
    fn from_u64(v: u64) -> Self {
        v as i64
    }
    fn to_i64(self) -> i64 {
        self
    }
    fn from_i64(v: i64) -> Option<Self> {
        Some(v)
    }
    fn write_le(self, out: &mut [u8]) {
        out.copy_from_slice(&self.to_le_bytes());
    }
    fn read_le(src: &[u8]) -> Self {
        i64::from_le_bytes(src.try_into().unwrap())
    }
}

/// Total order on cells within a tile, lifted to the whole array via the
/// tile order over tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellOrder {
    /// Last dimension varies fastest.
    RowMajor,
    /// First dimension varies fastest.
    ColumnMajor,
}

/// Compares two coordinate tuples in the given cell order.
///
/// Row-major compares dimensions first-to-last (dimension 0 most
/// significant); column-major compares last-to-first.
pub fn cell_order_cmp<T: Coord>(order: CellOrder, a: &[T], b: &[T]) -> Ordering {
    debug_assert_eq!(a.len(), b.len());
    match order {
        CellOrder::RowMajor => {
            for i in 0..a.len() {
                match a[i].total_cmp(&b[i]) {
                    Ordering::Equal => continue,
                    ord => return ord,
                }
            }
        }
        CellOrder::ColumnMajor => {
            for i in (0..a.len()).rev() {
                match a[i].total_cmp(&b[i]) {
                    Ordering::Equal => continue,
                    ord => return ord,
                }
            }
        }
    }
    Ordering::Equal
}

/// An inclusive axis-aligned run of cells, stored as its two corner
/// coordinates in one owned allocation (`first` then `last`).
///
/// The merge interprets a range as the cell-order interval between its
/// endpoints within a tile, so every range handed to it must be
/// contiguous in cell order (a slab, or a full/contiguous intersection).
#[derive(Debug, Clone, PartialEq)]
pub struct CellRange<T> {
    coords: Box<[T]>,
}

impl<T: Coord> CellRange<T> {
    pub fn new(first: &[T], last: &[T]) -> Self {
        debug_assert_eq!(first.len(), last.len());
        let mut coords = Vec::with_capacity(first.len() * 2);
        coords.extend_from_slice(first);
        coords.extend_from_slice(last);
        Self {
            coords: coords.into_boxed_slice(),
        }
    }

    /// A single-cell range (`first == last`).
    pub fn unary(cell: &[T]) -> Self {
        Self::new(cell, cell)
    }

    pub fn dim(&self) -> usize {
        self.coords.len() / 2
    }

    pub fn first(&self) -> &[T] {
        &self.coords[..self.dim()]
    }

    pub fn last(&self) -> &[T] {
        let d = self.dim();
        &self.coords[d..]
    }

    pub fn first_mut(&mut self) -> &mut [T] {
        let d = self.dim();
        &mut self.coords[..d]
    }

    pub fn last_mut(&mut self) -> &mut [T] {
        let d = self.dim();
        &mut self.coords[d..]
    }

    pub fn is_unary(&self) -> bool {
        self.first() == self.last()
    }
}

/// Inclusive pair of linearized cell positions inside one tile.
///
/// For dense sources positions index the tile's cell-order
/// linearization; for sparse sources they index the tile's stored-cell
/// slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPosRange {
    pub first: u64,
    pub last: u64,
}

impl CellPosRange {
    pub fn new(first: u64, last: u64) -> Self {
        debug_assert!(first <= last);
        Self { first, last }
    }

    pub fn count(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// A fixed- or variable-size attribute of an array.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    cell_size: usize,
    var_size: bool,
    fill: Vec<u8>,
}

impl Attribute {
    /// A fixed-size attribute with an all-zero fill value.
    pub fn fixed(name: impl Into<String>, cell_size: usize) -> Self {
        Self {
            name: name.into(),
            cell_size,
            var_size: false,
            fill: vec![0u8; cell_size],
        }
    }

    /// A variable-size attribute. Streaming for these is exposed but not
    /// yet implemented by the read path.
    pub fn var(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cell_size: std::mem::size_of::<u64>(),
            var_size: true,
            fill: Vec::new(),
        }
    }

    /// Replaces the fill value written for cells no fragment covers.
    /// Must be exactly `cell_size` bytes (validated at schema build).
    pub fn with_fill(mut self, fill: Vec<u8>) -> Self {
        self.fill = fill;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    pub fn var_size(&self) -> bool {
        self.var_size
    }

    pub fn fill(&self) -> &[u8] {
        &self.fill
    }
}

/// Errors from schema construction.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("array must have at least one dimension")]
    NoDimensions,

    #[error("tile extent count {extents} does not match dimension count {dims}")]
    ExtentMismatch { dims: usize, extents: usize },

    #[error("dimension {dim}: domain low exceeds domain high")]
    InvertedDomain { dim: usize },

    #[error("dimension {dim}: tile extent must be positive")]
    BadExtent { dim: usize },

    #[error("tile cell count overflows u64")]
    TileTooLarge,

    #[error("attribute {name:?}: fill value must be {cell_size} bytes, got {got}")]
    BadFill {
        name: String,
        cell_size: usize,
        got: usize,
    },

    #[error("attribute {name:?}: cell size must be positive")]
    ZeroCellSize { name: String },

    #[error("duplicate attribute {name:?}")]
    DuplicateAttribute { name: String },
}

/// Immutable description of an array: domain, tiling, orders, attributes.
///
/// Shared via `Arc` between the array handle, its fragments, and the
/// read state. All coordinate math used by the read path lives here.
#[derive(Debug)]
pub struct ArraySchema<T: DenseCoord> {
    name: String,
    dense: bool,
    domain: Vec<(T, T)>,
    tile_extents: Vec<T>,
    cell_order: CellOrder,
    tile_order: CellOrder,
    attributes: Vec<Attribute>,
}

impl<T: DenseCoord> ArraySchema<T> {
    /// Builds a dense-array schema. The tile order defaults to the cell
    /// order.
    pub fn new(
        name: impl Into<String>,
        domain: Vec<(T, T)>,
        tile_extents: Vec<T>,
        cell_order: CellOrder,
        attributes: Vec<Attribute>,
    ) -> Result<Self, SchemaError> {
        Self::build(name.into(), true, domain, tile_extents, cell_order, attributes)
    }

    /// Builds a sparse-array schema. The top-level sparse read dispatch
    /// is exposed but unsupported by the current read path.
    pub fn new_sparse(
        name: impl Into<String>,
        domain: Vec<(T, T)>,
        tile_extents: Vec<T>,
        cell_order: CellOrder,
        attributes: Vec<Attribute>,
    ) -> Result<Self, SchemaError> {
        Self::build(name.into(), false, domain, tile_extents, cell_order, attributes)
    }

    fn build(
        name: String,
        dense: bool,
        domain: Vec<(T, T)>,
        tile_extents: Vec<T>,
        cell_order: CellOrder,
        attributes: Vec<Attribute>,
    ) -> Result<Self, SchemaError> {
        if domain.is_empty() {
            return Err(SchemaError::NoDimensions);
        }
        if tile_extents.len() != domain.len() {
            return Err(SchemaError::ExtentMismatch {
                dims: domain.len(),
                extents: tile_extents.len(),
            });
        }
        for (i, &(lo, hi)) in domain.iter().enumerate() {
            if lo > hi {
                return Err(SchemaError::InvertedDomain { dim: i });
            }
        }
        let mut cells = 1u64;
        for (i, &e) in tile_extents.iter().enumerate() {
            if e <= T::ZERO {
                return Err(SchemaError::BadExtent { dim: i });
            }
            cells = cells
                .checked_mul(e.as_u64())
                .ok_or(SchemaError::TileTooLarge)?;
        }
        for (i, attr) in attributes.iter().enumerate() {
            if attr.cell_size == 0 {
                return Err(SchemaError::ZeroCellSize {
                    name: attr.name.clone(),
                });
            }
            if !attr.var_size && attr.fill.len() != attr.cell_size {
                return Err(SchemaError::BadFill {
                    name: attr.name.clone(),
                    cell_size: attr.cell_size,
                    got: attr.fill.len(),
                });
            }
            if attributes[..i].iter().any(|a| a.name == attr.name) {
                return Err(SchemaError::DuplicateAttribute {
                    name: attr.name.clone(),
                });
            }
        }
        Ok(Self {
            name,
            dense,
            domain,
            tile_extents,
            cell_order,
            tile_order: cell_order,
            attributes,
        })
    }

    pub fn with_tile_order(mut self, order: CellOrder) -> Self {
        self.tile_order = order;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dense(&self) -> bool {
        self.dense
    }

    pub fn dim_num(&self) -> usize {
        self.domain.len()
    }

    pub fn domain(&self) -> &[(T, T)] {
        &self.domain
    }

    pub fn tile_extents(&self) -> &[T] {
        &self.tile_extents
    }

    pub fn cell_order(&self) -> CellOrder {
        self.cell_order
    }

    pub fn tile_order(&self) -> CellOrder {
        self.tile_order
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, id: usize) -> Option<&Attribute> {
        self.attributes.get(id)
    }

    pub fn attribute_num(&self) -> usize {
        self.attributes.len()
    }

    /// Id of the coordinates pseudo-attribute (one past the last real
    /// attribute).
    pub fn coords_attribute_id(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute_id(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    /// Size in bytes of one coordinate tuple.
    pub fn coords_size(&self) -> usize {
        self.dim_num() * std::mem::size_of::<T>()
    }

    /// Cell size in bytes of an attribute, the coordinates
    /// pseudo-attribute included.
    pub fn cell_size_of(&self, attribute_id: usize) -> usize {
        if attribute_id == self.coords_attribute_id() {
            self.coords_size()
        } else {
            self.attributes[attribute_id].cell_size
        }
    }

    pub fn cell_order_cmp(&self, a: &[T], b: &[T]) -> Ordering {
        cell_order_cmp(self.cell_order, a, b)
    }

    pub fn tile_order_cmp(&self, a: &[T], b: &[T]) -> Ordering {
        cell_order_cmp(self.tile_order, a, b)
    }

    /// Steps `coords` to the next cell in cell order within `rect`,
    /// wrapping inner axes. The slowest axis is unbounded; callers
    /// detect exhaustion by comparing against the rectangle.
    pub fn next_cell_in(&self, rect: &[(T, T)], coords: &mut [T]) {
        let d = coords.len();
        match self.cell_order {
            CellOrder::RowMajor => {
                let mut i = d - 1;
                coords[i] = coords[i] + T::ONE;
                while i > 0 && coords[i] > rect[i].1 {
                    coords[i] = rect[i].0;
                    i -= 1;
                    coords[i] = coords[i] + T::ONE;
                }
            }
            CellOrder::ColumnMajor => {
                let mut i = 0;
                coords[i] = coords[i] + T::ONE;
                while i < d - 1 && coords[i] > rect[i].1 {
                    coords[i] = rect[i].0;
                    i += 1;
                    coords[i] = coords[i] + T::ONE;
                }
            }
        }
    }

    /// Steps `coords` to the previous cell in cell order within `rect`.
    pub fn prev_cell_in(&self, rect: &[(T, T)], coords: &mut [T]) {
        let d = coords.len();
        match self.cell_order {
            CellOrder::RowMajor => {
                let mut i = d - 1;
                coords[i] = coords[i] - T::ONE;
                while i > 0 && coords[i] < rect[i].0 {
                    coords[i] = rect[i].1;
                    i -= 1;
                    coords[i] = coords[i] - T::ONE;
                }
            }
            CellOrder::ColumnMajor => {
                let mut i = 0;
                coords[i] = coords[i] - T::ONE;
                while i < d - 1 && coords[i] < rect[i].0 {
                    coords[i] = rect[i].1;
                    i += 1;
                    coords[i] = coords[i] - T::ONE;
                }
            }
        }
    }

    /// Steps tile coordinates to the next tile in tile order within
    /// `rect` (same stepping as cells, keyed on the tile order).
    pub fn next_tile_in(&self, rect: &[(T, T)], coords: &mut [T]) {
        let d = coords.len();
        match self.tile_order {
            CellOrder::RowMajor => {
                let mut i = d - 1;
                coords[i] = coords[i] + T::ONE;
                while i > 0 && coords[i] > rect[i].1 {
                    coords[i] = rect[i].0;
                    i -= 1;
                    coords[i] = coords[i] + T::ONE;
                }
            }
            CellOrder::ColumnMajor => {
                let mut i = 0;
                coords[i] = coords[i] + T::ONE;
                while i < d - 1 && coords[i] > rect[i].1 {
                    coords[i] = rect[i].0;
                    i += 1;
                    coords[i] = coords[i] + T::ONE;
                }
            }
        }
    }

    /// Number of cells in one tile.
    pub fn cells_per_tile(&self) -> u64 {
        self.tile_extents.iter().map(|e| e.as_u64()).product()
    }

    /// Linearized position of tile-relative coordinates under the cell
    /// order. `rel` must be non-negative and within the tile extents.
    pub fn cell_pos(&self, rel: &[T]) -> u64 {
        linearize(self.cell_order, rel, &self.tile_extents)
    }

    /// Inverse of [`cell_pos`](Self::cell_pos).
    pub fn cell_coords_of_pos(&self, pos: u64, out: &mut [T]) {
        delinearize(self.cell_order, pos, &self.tile_extents, out);
    }

    /// The array's tile grid as a rectangle in tile coordinates:
    /// `[0, ceil(span / extent) - 1]` per dimension.
    pub fn tile_grid(&self) -> Vec<(T, T)> {
        self.domain
            .iter()
            .zip(&self.tile_extents)
            .map(|(&(lo, hi), &e)| (T::ZERO, (hi - lo) / e))
            .collect()
    }

    /// Projects a cell-space rectangle into tile coordinates, clamped to
    /// the array's tile grid. Returns `None` when the projection is
    /// empty. The rectangle must lie at or above the domain low corner.
    pub fn tile_rect_of(&self, rect: &[(T, T)]) -> Option<Vec<(T, T)>> {
        let grid = self.tile_grid();
        let mut out = Vec::with_capacity(rect.len());
        for i in 0..rect.len() {
            let (dlo, _) = self.domain[i];
            let e = self.tile_extents[i];
            let lo = ((rect[i].0 - dlo) / e).max(grid[i].0);
            let hi = ((rect[i].1 - dlo) / e).min(grid[i].1);
            if lo > hi {
                return None;
            }
            out.push((lo, hi));
        }
        Some(out)
    }

    /// The global cell rectangle covered by the tile at `tile_coords`.
    pub fn tile_cell_rect(&self, tile_coords: &[T]) -> Vec<(T, T)> {
        self.domain
            .iter()
            .zip(&self.tile_extents)
            .zip(tile_coords)
            .map(|((&(dlo, _), &e), &t)| {
                let lo = dlo + t * e;
                (lo, lo + e - T::ONE)
            })
            .collect()
    }

    /// Whether `rect` is a single contiguous run in cell order within
    /// `tile_rect`: full span on every axis except possibly the slowest
    /// one (the first for row-major, the last for column-major).
    pub fn contiguous_in_tile(&self, rect: &[(T, T)], tile_rect: &[(T, T)]) -> bool {
        let d = rect.len();
        let full = |i: usize| rect[i].0 == tile_rect[i].0 && rect[i].1 == tile_rect[i].1;
        match self.cell_order {
            CellOrder::RowMajor => (1..d).all(full),
            CellOrder::ColumnMajor => (0..d.saturating_sub(1)).all(full),
        }
    }

    /// Splits a global-coordinate rectangle into cell-order-contiguous
    /// ranges relative to `tile_rect`: a single range when the rectangle
    /// is contiguous, otherwise one range per slab along the
    /// fastest-varying axis.
    pub fn cell_ranges_of_rect(
        &self,
        rect: &[(T, T)],
        tile_rect: &[(T, T)],
    ) -> Vec<CellRange<T>> {
        let d = rect.len();
        let lo: Vec<T> = rect.iter().map(|r| r.0).collect();
        let hi: Vec<T> = rect.iter().map(|r| r.1).collect();
        if self.contiguous_in_tile(rect, tile_rect) {
            return vec![CellRange::new(&lo, &hi)];
        }

        let mut out = Vec::new();
        let mut coords = lo.clone();
        match self.cell_order {
            CellOrder::RowMajor => {
                // one slab per fixed prefix, spanning the last axis
                while coords[0] <= hi[0] {
                    let mut first = coords.clone();
                    let mut last = coords.clone();
                    first[d - 1] = lo[d - 1];
                    last[d - 1] = hi[d - 1];
                    out.push(CellRange::new(&first, &last));

                    let mut i = d - 2;
                    coords[i] = coords[i] + T::ONE;
                    while i > 0 && coords[i] > hi[i] {
                        coords[i] = lo[i];
                        i -= 1;
                        coords[i] = coords[i] + T::ONE;
                    }
                }
            }
            CellOrder::ColumnMajor => {
                while coords[d - 1] <= hi[d - 1] {
                    let mut first = coords.clone();
                    let mut last = coords.clone();
                    first[0] = lo[0];
                    last[0] = hi[0];
                    out.push(CellRange::new(&first, &last));

                    let mut i = 1;
                    coords[i] = coords[i] + T::ONE;
                    while i < d - 1 && coords[i] > hi[i] {
                        coords[i] = lo[i];
                        i += 1;
                        coords[i] = coords[i] + T::ONE;
                    }
                }
            }
        }
        out
    }
}

/// Linearizes non-negative coordinates relative to a box of the given
/// extents under `order`.
pub fn linearize<T: DenseCoord>(order: CellOrder, rel: &[T], extents: &[T]) -> u64 {
    let d = rel.len();
    let mut pos = 0u64;
    match order {
        CellOrder::RowMajor => {
            let mut stride = 1u64;
            for i in (0..d).rev() {
                pos += rel[i].as_u64() * stride;
                stride *= extents[i].as_u64();
            }
        }
        CellOrder::ColumnMajor => {
            let mut stride = 1u64;
            for i in 0..d {
                pos += rel[i].as_u64() * stride;
                stride *= extents[i].as_u64();
            }
        }
    }
    pos
}

/// Inverse of [`linearize`].
pub fn delinearize<T: DenseCoord>(order: CellOrder, pos: u64, extents: &[T], out: &mut [T]) {
    let d = extents.len();
    let mut rem = pos;
    match order {
        CellOrder::RowMajor => {
            for i in (0..d).rev() {
                let e = extents[i].as_u64();
                out[i] = T::from_u64(rem % e);
                rem /= e;
            }
        }
        CellOrder::ColumnMajor => {
            for i in 0..d {
                let e = extents[i].as_u64();
                out[i] = T::from_u64(rem % e);
                rem /= e;
            }
        }
    }
}

/// Whether `coords` lies inside the inclusive rectangle.
pub fn rect_contains<T: DenseCoord>(rect: &[(T, T)], coords: &[T]) -> bool {
    rect.iter()
        .zip(coords)
        .all(|(&(lo, hi), &c)| c >= lo && c <= hi)
}

/// Intersection of two inclusive rectangles, `None` when disjoint.
pub fn rect_intersect<T: DenseCoord>(a: &[(T, T)], b: &[(T, T)]) -> Option<Vec<(T, T)>> {
    let mut out = Vec::with_capacity(a.len());
    for (&(alo, ahi), &(blo, bhi)) in a.iter().zip(b) {
        let lo = alo.max(blo);
        let hi = ahi.min(bhi);
        if lo > hi {
            return None;
        }
        out.push((lo, hi));
    }
    Some(out)
}

/// Walks the tile coordinates of a rectangle in tile order.
///
/// The first [`advance`](TileWalk::advance) yields the low corner;
/// subsequent calls step through the rectangle and return `None` once
/// it is exhausted (permanently).
#[derive(Debug, Clone)]
pub struct TileWalk<T> {
    rect: Vec<(T, T)>,
    coords: Option<Vec<T>>,
    started: bool,
}

impl<T: DenseCoord> TileWalk<T> {
    pub fn new(rect: Vec<(T, T)>) -> Self {
        Self {
            rect,
            coords: None,
            started: false,
        }
    }

    /// A walk that is exhausted from the start (empty projection).
    pub fn exhausted() -> Self {
        Self {
            rect: Vec::new(),
            coords: None,
            started: true,
        }
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn current(&self) -> Option<&[T]> {
        self.coords.as_deref()
    }

    pub fn advance(&mut self, schema: &ArraySchema<T>) -> Option<&[T]> {
        if !self.started {
            self.started = true;
            if !self.rect.is_empty() {
                self.coords = Some(self.rect.iter().map(|r| r.0).collect());
            }
        } else if let Some(coords) = self.coords.as_mut() {
            schema.next_tile_in(&self.rect, coords);
            if !rect_contains(&self.rect, coords) {
                self.coords = None;
            }
        }
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_2d() -> ArraySchema<i64> {
        ArraySchema::new(
            "t",
            vec![(0, 9), (0, 9)],
            vec![5, 5],
            CellOrder::RowMajor,
            vec![Attribute::fixed("a", 4)],
        )
        .unwrap()
    }

    #[test]
    fn cmp_row_and_column_major() {
        let a = [1i64, 9];
        let b = [2i64, 0];
        assert_eq!(cell_order_cmp(CellOrder::RowMajor, &a, &b), Ordering::Less);
        assert_eq!(
            cell_order_cmp(CellOrder::ColumnMajor, &a, &b),
            Ordering::Greater
        );
        assert_eq!(cell_order_cmp(CellOrder::RowMajor, &a, &a), Ordering::Equal);
    }

    #[test]
    fn float_comparator() {
        let a = [1.0f64, 2.0];
        let b = [1.0f64, 3.0];
        assert_eq!(cell_order_cmp(CellOrder::RowMajor, &a, &b), Ordering::Less);
    }

    #[test]
    fn next_cell_wraps_inner_axis() {
        let s = schema_2d();
        let rect = [(0i64, 4), (0i64, 4)];
        let mut c = [0i64, 4];
        s.next_cell_in(&rect, &mut c);
        assert_eq!(c, [1, 0]);

        // slowest axis is unbounded
        let mut c = [4i64, 4];
        s.next_cell_in(&rect, &mut c);
        assert_eq!(c, [5, 0]);
    }

    #[test]
    fn prev_cell_wraps_inner_axis() {
        let s = schema_2d();
        let rect = [(0i64, 4), (0i64, 4)];
        let mut c = [1i64, 0];
        s.prev_cell_in(&rect, &mut c);
        assert_eq!(c, [0, 4]);
    }

    #[test]
    fn cell_pos_roundtrip() {
        let s = schema_2d();
        assert_eq!(s.cell_pos(&[0, 0]), 0);
        assert_eq!(s.cell_pos(&[0, 4]), 4);
        assert_eq!(s.cell_pos(&[1, 0]), 5);
        assert_eq!(s.cell_pos(&[4, 4]), 24);

        let mut out = [0i64; 2];
        for pos in 0..25 {
            s.cell_coords_of_pos(pos, &mut out);
            assert_eq!(s.cell_pos(&out), pos);
        }
    }

    #[test]
    fn column_major_linearization() {
        let s = ArraySchema::new(
            "t",
            vec![(0i64, 9), (0, 9)],
            vec![5, 5],
            CellOrder::ColumnMajor,
            vec![Attribute::fixed("a", 4)],
        )
        .unwrap();
        assert_eq!(s.cell_pos(&[0, 0]), 0);
        assert_eq!(s.cell_pos(&[4, 0]), 4);
        assert_eq!(s.cell_pos(&[0, 1]), 5);
    }

    #[test]
    fn tile_grid_and_cell_rect() {
        let s = schema_2d();
        assert_eq!(s.tile_grid(), vec![(0, 1), (0, 1)]);
        assert_eq!(s.tile_cell_rect(&[1, 0]), vec![(5, 9), (0, 4)]);
    }

    #[test]
    fn tile_rect_projection_clamps() {
        let s = schema_2d();
        assert_eq!(
            s.tile_rect_of(&[(0, 9), (0, 9)]),
            Some(vec![(0, 1), (0, 1)])
        );
        assert_eq!(
            s.tile_rect_of(&[(1, 3), (2, 4)]),
            Some(vec![(0, 0), (0, 0)])
        );
        assert_eq!(
            s.tile_rect_of(&[(6, 9), (0, 2)]),
            Some(vec![(1, 1), (0, 0)])
        );
    }

    #[test]
    fn contiguity_classification() {
        let s = schema_2d();
        let tile = [(0i64, 4), (0i64, 4)];
        // full rows are contiguous in row-major order
        assert!(s.contiguous_in_tile(&[(1, 3), (0, 4)], &tile));
        // partial columns are not
        assert!(!s.contiguous_in_tile(&[(1, 3), (2, 4)], &tile));
    }

    #[test]
    fn slab_split_of_noncontiguous_rect() {
        let s = schema_2d();
        let tile = [(0i64, 4), (0i64, 4)];
        let ranges = s.cell_ranges_of_rect(&[(1, 3), (2, 4)], &tile);
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].first(), &[1, 2]);
        assert_eq!(ranges[0].last(), &[1, 4]);
        assert_eq!(ranges[2].first(), &[3, 2]);
        assert_eq!(ranges[2].last(), &[3, 4]);
    }

    #[test]
    fn contiguous_rect_is_single_range() {
        let s = schema_2d();
        let tile = [(0i64, 4), (0i64, 4)];
        let ranges = s.cell_ranges_of_rect(&[(1, 3), (0, 4)], &tile);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].first(), &[1, 0]);
        assert_eq!(ranges[0].last(), &[3, 4]);
    }

    #[test]
    fn tile_walk_covers_rect_in_order() {
        let s = schema_2d();
        let mut walk = TileWalk::new(vec![(0i64, 1), (0i64, 1)]);
        let mut seen = Vec::new();
        while let Some(t) = walk.advance(&s) {
            seen.push(t.to_vec());
        }
        assert_eq!(
            seen,
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        // stays exhausted
        assert_eq!(walk.advance(&s), None);
    }

    #[test]
    fn schema_validation() {
        assert!(matches!(
            ArraySchema::<i64>::new("t", vec![], vec![], CellOrder::RowMajor, vec![]),
            Err(SchemaError::NoDimensions)
        ));
        assert!(matches!(
            ArraySchema::new(
                "t",
                vec![(0i64, 9)],
                vec![0],
                CellOrder::RowMajor,
                vec![Attribute::fixed("a", 4)],
            ),
            Err(SchemaError::BadExtent { dim: 0 })
        ));
        assert!(matches!(
            ArraySchema::new(
                "t",
                vec![(0i64, 9)],
                vec![5],
                CellOrder::RowMajor,
                vec![Attribute::fixed("a", 4).with_fill(vec![0; 3])],
            ),
            Err(SchemaError::BadFill { .. })
        ));
    }
}
