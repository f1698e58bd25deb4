//! Tile enumeration and per-tile overlap geometry for the query range.

use schema::{ArraySchema, DenseCoord, TileWalk};

/// How the query range intersects one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOverlap {
    /// The intersection is the whole tile.
    Full,
    /// A proper subset that is still one contiguous run in cell order.
    PartialContig,
    /// A proper subset spanning multiple cell-order runs.
    PartialNonContig,
}

/// Walks the tiles of the query range in global tile order.
///
/// Construction projects the query into tile coordinates, clamped to
/// the array's tile grid; an empty projection leaves the cursor
/// exhausted from the start.
#[derive(Debug)]
pub(crate) struct TileCursor<T> {
    walk: TileWalk<T>,
}

impl<T: DenseCoord> TileCursor<T> {
    pub(crate) fn new(schema: &ArraySchema<T>, range: &[(T, T)]) -> Self {
        let walk = match schema.tile_rect_of(range) {
            Some(rect) => TileWalk::new(rect),
            None => TileWalk::exhausted(),
        };
        Self { walk }
    }

    pub(crate) fn started(&self) -> bool {
        self.walk.started()
    }

    pub(crate) fn current(&self) -> Option<&[T]> {
        self.walk.current()
    }

    pub(crate) fn advance(&mut self, schema: &ArraySchema<T>) -> Option<&[T]> {
        self.walk.advance(schema)
    }
}

/// The query's intersection with the current tile.
#[derive(Debug)]
pub(crate) struct TileOverlapInfo<T> {
    /// Intersection relative to the tile origin, inclusive.
    pub rect: Vec<(T, T)>,
    /// The same intersection in global coordinates.
    pub global: Vec<(T, T)>,
    pub kind: TileOverlap,
}

/// Intersects the query range with the tile at `tile_coords` and
/// classifies the result.
pub(crate) fn compute_tile_overlap<T: DenseCoord>(
    schema: &ArraySchema<T>,
    tile_coords: &[T],
    range: &[(T, T)],
) -> TileOverlapInfo<T> {
    let tile_rect = schema.tile_cell_rect(tile_coords);
    let extents = schema.tile_extents();
    let dim = schema.dim_num();

    let mut rect = Vec::with_capacity(dim);
    let mut global = Vec::with_capacity(dim);
    for i in 0..dim {
        let origin = tile_rect[i].0;
        let lo = (range[i].0 - origin).max(T::ZERO);
        let hi = (range[i].1 - origin).min(extents[i] - T::ONE);
        rect.push((lo, hi));
        global.push((origin + lo, origin + hi));
    }

    let full = (0..dim)
        .all(|i| rect[i].0 == T::ZERO && rect[i].1 == extents[i] - T::ONE);
    let kind = if full {
        TileOverlap::Full
    } else if schema.contiguous_in_tile(&global, &tile_rect) {
        TileOverlap::PartialContig
    } else {
        TileOverlap::PartialNonContig
    };

    TileOverlapInfo { rect, global, kind }
}
