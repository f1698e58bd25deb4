//! Per-attribute streaming of per-tile plans into caller buffers.
//!
//! Copying is resumable at cell granularity: for every attribute the
//! read state remembers which entry of the current plan it is on and
//! how many of that entry's cells are already out. A full buffer stops
//! the copy mid-entry; the next call picks up at the exact cell where
//! the previous one stopped.

use schema::{CellPosRange, DenseCoord};

use crate::{ArrayReadState, ReadError};

impl<T: DenseCoord> ArrayReadState<'_, T> {
    /// Copies the plan at `plan_pos[attribute_id]` for one attribute,
    /// resuming where the previous call paused. On completion advances
    /// the plan position, notifies fragments still positioned on the
    /// plan's tile, and marks the tile done; on overflow records the
    /// resume point and raises the attribute's overflow flag.
    pub(crate) fn copy_cell_ranges(
        &mut self,
        attribute_id: usize,
        buf: &mut [u8],
        offset: &mut usize,
    ) -> Result<(), ReadError> {
        let schema = self.schema.clone();
        let coords_id = schema.coords_attribute_id();
        let cell_size = schema.cell_size_of(attribute_id);

        let plan_idx = self.plan_pos[attribute_id];
        debug_assert!(plan_idx < self.plans.len());
        let tile_coords = self.plans[plan_idx].tile_coords.clone();
        let entry_num = self.plans[plan_idx].entries.len();

        let mut i = self.range_pos[attribute_id];
        while i < entry_num {
            let entry = self.plans[plan_idx].entries[i];
            let skipped = self.cell_offset[attribute_id];
            let sub = CellPosRange::new(entry.range.first + skipped, entry.range.last);
            let want = sub.count();

            let before = *offset;
            match entry.fragment {
                None => self.copy_fill(attribute_id, &tile_coords, buf, offset, &sub)?,
                Some(f) => {
                    if attribute_id == coords_id && self.fragments[f].dense() {
                        // coordinates of dense cells are implied by the
                        // tile position, no fragment data needed
                        self.copy_synthesized_coords(&tile_coords, buf, offset, &sub);
                    } else {
                        self.fragments[f].copy_cells(
                            attribute_id,
                            &tile_coords,
                            buf,
                            offset,
                            &sub,
                        )?;
                    }
                }
            }

            let copied = ((*offset - before) / cell_size) as u64;
            if copied < want {
                self.cell_offset[attribute_id] = skipped + copied;
                self.overflow[attribute_id] = true;
                self.tile_done[attribute_id] = false;
                return Ok(());
            }
            self.cell_offset[attribute_id] = 0;
            i += 1;
            self.range_pos[attribute_id] = i;
        }

        // The whole plan is out for this attribute: let fragments still
        // sitting on its tile release tile-level state, then advance.
        for fi in 0..self.fragments.len() {
            if self.fragment_tile_coords[fi].as_deref() == Some(tile_coords.as_slice()) {
                self.fragments[fi].tile_done(attribute_id);
            }
        }
        self.plan_pos[attribute_id] += 1;
        self.range_pos[attribute_id] = 0;
        self.tile_done[attribute_id] = true;
        Ok(())
    }

    /// Writes the attribute's fill value for every cell of `range`
    /// (cells no fragment covers). Coordinate reads synthesize the cell
    /// coordinates instead.
    fn copy_fill(
        &mut self,
        attribute_id: usize,
        tile_coords: &[T],
        buf: &mut [u8],
        offset: &mut usize,
        range: &CellPosRange,
    ) -> Result<(), ReadError> {
        let schema = self.schema.clone();
        if attribute_id == schema.coords_attribute_id() {
            self.copy_synthesized_coords(tile_coords, buf, offset, range);
            return Ok(());
        }
        let attr = schema
            .attribute(attribute_id)
            .ok_or(ReadError::InvalidAttribute(attribute_id))?;
        let fill = attr.fill();
        let cell_size = attr.cell_size();

        let want = range.count();
        let fit = ((buf.len() - *offset) / cell_size) as u64;
        let copy = want.min(fit);
        for _ in 0..copy {
            buf[*offset..*offset + cell_size].copy_from_slice(fill);
            *offset += cell_size;
        }
        Ok(())
    }

    /// Materializes cell coordinates for a run of tile positions:
    /// the tile origin plus the delinearized in-tile offset, written
    /// little-endian per dimension.
    fn copy_synthesized_coords(
        &mut self,
        tile_coords: &[T],
        buf: &mut [u8],
        offset: &mut usize,
        range: &CellPosRange,
    ) {
        let schema = self.schema.clone();
        let dim = schema.dim_num();
        let coord_size = std::mem::size_of::<T>();
        let cell_size = schema.coords_size();
        let tile_rect = schema.tile_cell_rect(tile_coords);

        let want = range.count();
        let fit = ((buf.len() - *offset) / cell_size) as u64;
        let copy = want.min(fit);

        let mut rel = vec![T::ZERO; dim];
        for k in 0..copy {
            schema.cell_coords_of_pos(range.first + k, &mut rel);
            for d in 0..dim {
                let at = *offset + d * coord_size;
                (tile_rect[d].0 + rel[d]).write_le(&mut buf[at..at + coord_size]);
            }
            *offset += cell_size;
        }
    }
}
