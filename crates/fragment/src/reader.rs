//! Opens `.tsf` snapshot files into in-memory [`Fragment`]s.

use byteorder::{LittleEndian, ReadBytesExt};
use schema::{ArraySchema, DenseCoord};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;

use crate::format::{checked_body, coord_tag};
use crate::{Fragment, FragmentError};

impl<T: DenseCoord> Fragment<T> {
    /// Opens a fragment snapshot and validates it against `schema`.
    ///
    /// # Validation
    ///
    /// - Footer magic and body CRC32.
    /// - Coordinate-type tag must match `T`.
    /// - Dimension count, attribute count and cell sizes must match the
    ///   schema.
    /// - The fragment domain must lie inside the array domain; sparse
    ///   coordinates must be strictly sorted in global order.
    ///
    /// # Errors
    ///
    /// [`FragmentError::Corrupt`] for structural damage,
    /// [`FragmentError::SchemaMismatch`] for schema disagreement, plus
    /// any underlying I/O error.
    pub fn open(
        path: impl AsRef<Path>,
        schema: Arc<ArraySchema<T>>,
    ) -> Result<Self, FragmentError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let body = checked_body(&bytes)?;
        let mut r = Cursor::new(body);

        let tag = r.read_u8()?;
        if tag != coord_tag(T::COORD_TYPE) {
            return Err(FragmentError::SchemaMismatch(format!(
                "coordinate type tag {tag} does not match schema coordinate type {}",
                T::COORD_TYPE
            )));
        }
        let dense = match r.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(FragmentError::Corrupt(format!(
                    "bad dense flag {other}"
                )))
            }
        };
        let dim = r.read_u16::<LittleEndian>()? as usize;
        if dim != schema.dim_num() {
            return Err(FragmentError::SchemaMismatch(format!(
                "{dim} dimensions, schema has {}",
                schema.dim_num()
            )));
        }
        let attr_num = r.read_u16::<LittleEndian>()? as usize;
        if attr_num != schema.attribute_num() {
            return Err(FragmentError::SchemaMismatch(format!(
                "{attr_num} attributes, schema has {}",
                schema.attribute_num()
            )));
        }

        let mut domain = Vec::with_capacity(dim);
        for _ in 0..dim {
            let lo = decode_coord::<T>(r.read_i64::<LittleEndian>()?)?;
            let hi = decode_coord::<T>(r.read_i64::<LittleEndian>()?)?;
            domain.push((lo, hi));
        }
        for attr in schema.attributes() {
            let size = r.read_u32::<LittleEndian>()? as usize;
            if size != attr.cell_size() {
                return Err(FragmentError::SchemaMismatch(format!(
                    "attribute {:?}: cell size {size}, schema says {}",
                    attr.name(),
                    attr.cell_size()
                )));
            }
        }

        let fragment = if dense {
            let mut cells = 1u64;
            for &(lo, hi) in &domain {
                if lo > hi {
                    return Err(FragmentError::Corrupt(
                        "inverted fragment domain".into(),
                    ));
                }
                cells = cells
                    .checked_mul((hi - lo + T::ONE).as_u64())
                    .ok_or_else(|| FragmentError::Corrupt("domain volume overflow".into()))?;
            }
            let attrs = read_attr_buffers(&mut r, &schema, cells)?;
            Self::new_dense(schema, domain, attrs)?
        } else {
            let cell_num = r.read_u64::<LittleEndian>()?;
            let coord_bytes = cell_num
                .checked_mul(dim as u64)
                .and_then(|n| n.checked_mul(8))
                .ok_or_else(|| FragmentError::Corrupt("cell count overflow".into()))?;
            if coord_bytes > remaining(&r) {
                return Err(FragmentError::Corrupt(format!(
                    "cell count {cell_num} exceeds file size"
                )));
            }
            let mut coords = Vec::with_capacity((cell_num as usize) * dim);
            for _ in 0..cell_num * dim as u64 {
                coords.push(decode_coord::<T>(r.read_i64::<LittleEndian>()?)?);
            }
            let attrs = read_attr_buffers(&mut r, &schema, cell_num)?;
            Self::new_sparse(schema, coords, attrs)?
        };

        if remaining(&r) != 0 {
            return Err(FragmentError::Corrupt("trailing bytes".into()));
        }
        tracing::debug!(
            path = %path.display(),
            dense,
            cells = fragment.cell_count(),
            "fragment opened"
        );
        Ok(fragment)
    }
}

fn decode_coord<T: DenseCoord>(v: i64) -> Result<T, FragmentError> {
    T::from_i64(v)
        .ok_or_else(|| FragmentError::Corrupt(format!("coordinate {v} out of type range")))
}

fn remaining(r: &Cursor<&[u8]>) -> u64 {
    r.get_ref().len() as u64 - r.position()
}

fn read_attr_buffers<T: DenseCoord>(
    r: &mut Cursor<&[u8]>,
    schema: &ArraySchema<T>,
    cells: u64,
) -> Result<Vec<Vec<u8>>, FragmentError> {
    let mut attrs = Vec::with_capacity(schema.attribute_num());
    for attr in schema.attributes() {
        let want = cells
            .checked_mul(attr.cell_size() as u64)
            .ok_or_else(|| FragmentError::Corrupt("attribute size overflow".into()))?;
        if want > remaining(r) {
            return Err(FragmentError::Corrupt(format!(
                "attribute {:?}: truncated data",
                attr.name()
            )));
        }
        let mut buf = vec![0u8; want as usize];
        r.read_exact(&mut buf)?;
        attrs.push(buf);
    }
    Ok(attrs)
}
