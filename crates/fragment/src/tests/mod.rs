
use schema::{ArraySchema, Attribute, CellOrder};
use std::sync::Arc;

use crate::Fragment;

/// 2D test schema: domain `[0,9]×[0,9]`, 5×5 tiles, one `i32` attribute
/// `a`, row-major.
pub(crate) fn schema_2d() -> Arc<ArraySchema<i64>> {
    Arc::new(
        ArraySchema::new(
            "grid",
            vec![(0, 9), (0, 9)],
            vec![5, 5],
            CellOrder::RowMajor,
            vec![Attribute::fixed("a", 4)],
        )
        .unwrap(),
    )
}

/// Dense fragment over `rect` with cell `(r, c)` valued `base + 10r + c`.
pub(crate) fn dense_fragment(
    schema: &Arc<ArraySchema<i64>>,
    rect: [(i64, i64); 2],
    base: i32,
) -> Fragment<i64> {
    let mut values = Vec::new();
    for r in rect[0].0..=rect[0].1 {
        for c in rect[1].0..=rect[1].1 {
            values.extend_from_slice(&(base + (10 * r + c) as i32).to_le_bytes());
        }
    }
    Fragment::new_dense(schema.clone(), rect.to_vec(), vec![values]).unwrap()
}

/// Sparse fragment from `(row, col, value)` triples, which must already
/// be in global order.
pub(crate) fn sparse_fragment(
    schema: &Arc<ArraySchema<i64>>,
    cells: &[(i64, i64, i32)],
) -> Fragment<i64> {
    let mut coords = Vec::new();
    let mut values = Vec::new();
    for &(r, c, v) in cells {
        coords.push(r);
        coords.push(c);
        values.extend_from_slice(&v.to_le_bytes());
    }
    Fragment::new_sparse(schema.clone(), coords, vec![values]).unwrap()
}

pub(crate) fn i32_at(buf: &[u8], cell: usize) -> i32 {
    i32::from_le_bytes(buf[cell * 4..cell * 4 + 4].try_into().unwrap())
}

pub(crate) fn i64_at(buf: &[u8], idx: usize) -> i64 {
    i64::from_le_bytes(buf[idx * 8..idx * 8 + 8].try_into().unwrap())
}
