mod merge_tests;
mod property_tests;

use std::sync::Arc;

use fragment::Fragment;
use schema::{ArraySchema, Attribute, CellOrder};

use crate::{Array, ReadStatus};

/// Fill value used by the test schemas for uncovered cells.
pub(crate) const FILL: i32 = -1;

/// 2D test schema: domain `[0,9]×[0,9]`, 5×5 tiles, one `i32`
/// attribute `a`, row-major.
pub(crate) fn schema_2d() -> Arc<ArraySchema<i64>> {
    Arc::new(
        ArraySchema::new(
            "grid",
            vec![(0, 9), (0, 9)],
            vec![5, 5],
            CellOrder::RowMajor,
            vec![Attribute::fixed("a", 4).with_fill(FILL.to_le_bytes().to_vec())],
        )
        .unwrap(),
    )
}

/// Same grid with a second `i64` attribute `b` holding twice the `a`
/// value per cell.
pub(crate) fn schema_2d_two_attrs() -> Arc<ArraySchema<i64>> {
    Arc::new(
        ArraySchema::new(
            "grid",
            vec![(0, 9), (0, 9)],
            vec![5, 5],
            CellOrder::RowMajor,
            vec![
                Attribute::fixed("a", 4).with_fill(FILL.to_le_bytes().to_vec()),
                Attribute::fixed("b", 8).with_fill((FILL as i64).to_le_bytes().to_vec()),
            ],
        )
        .unwrap(),
    )
}

/// Dense fragment over `rect`: attribute `a` holds `base + 10r + c`,
/// attribute `b` (when the schema has one) twice that.
pub(crate) fn dense_fragment(
    schema: &Arc<ArraySchema<i64>>,
    rect: [(i64, i64); 2],
    base: i32,
) -> Fragment<i64> {
    let mut a = Vec::new();
    let mut b = Vec::new();
    for r in rect[0].0..=rect[0].1 {
        for c in rect[1].0..=rect[1].1 {
            let v = base + (10 * r + c) as i32;
            a.extend_from_slice(&v.to_le_bytes());
            b.extend_from_slice(&(2 * v as i64).to_le_bytes());
        }
    }
    let attrs = match schema.attribute_num() {
        1 => vec![a],
        2 => vec![a, b],
        n => panic!("unexpected attribute count {n}"),
    };
    Fragment::new_dense(schema.clone(), rect.to_vec(), attrs).unwrap()
}

/// Sparse fragment from `(row, col, value)` triples in global order.
pub(crate) fn sparse_fragment(
    schema: &Arc<ArraySchema<i64>>,
    cells: &[(i64, i64, i32)],
) -> Fragment<i64> {
    let mut coords = Vec::new();
    let mut a = Vec::new();
    let mut b = Vec::new();
    for &(r, c, v) in cells {
        coords.push(r);
        coords.push(c);
        a.extend_from_slice(&v.to_le_bytes());
        b.extend_from_slice(&(2 * v as i64).to_le_bytes());
    }
    let attrs = match schema.attribute_num() {
        1 => vec![a],
        2 => vec![a, b],
        n => panic!("unexpected attribute count {n}"),
    };
    Fragment::new_sparse(schema.clone(), coords, attrs).unwrap()
}

/// Drives a read to completion with a fixed per-attribute buffer
/// capacity, concatenating everything produced.
pub(crate) fn read_all(
    array: &mut Array<i64>,
    range: &[(i64, i64)],
    attribute_ids: &[usize],
    buffer_bytes: &[usize],
) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut state = array.read_state(range, attribute_ids)?;
    let mut out = vec![Vec::new(); attribute_ids.len()];
    loop {
        let mut bufs: Vec<Vec<u8>> =
            buffer_bytes.iter().map(|&n| vec![0u8; n]).collect();
        let mut sizes = vec![0usize; attribute_ids.len()];
        let mut refs: Vec<&mut [u8]> =
            bufs.iter_mut().map(|b| b.as_mut_slice()).collect();
        let status = state.read(&mut refs, &mut sizes)?;
        for (o, (buf, &size)) in out.iter_mut().zip(bufs.iter().zip(&sizes)) {
            o.extend_from_slice(&buf[..size]);
        }
        if status == ReadStatus::Done {
            break;
        }
    }
    Ok(out)
}

pub(crate) fn i32s(bytes: &[u8]) -> Vec<i32> {
    bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

pub(crate) fn i64s(bytes: &[u8]) -> Vec<i64> {
    bytes
        .chunks_exact(8)
        .map(|c| i64::from_le_bytes(c.try_into().unwrap()))
        .collect()
}

/// The cells of `range` in the array's global order: 5×5 tiles visited
/// row-major, cells row-major within each tile.
pub(crate) fn global_order_cells(range: [(i64, i64); 2]) -> Vec<(i64, i64)> {
    let mut out = Vec::new();
    for tr in 0..2i64 {
        for tc in 0..2i64 {
            let rlo = range[0].0.max(tr * 5);
            let rhi = range[0].1.min(tr * 5 + 4);
            let clo = range[1].0.max(tc * 5);
            let chi = range[1].1.min(tc * 5 + 4);
            if rlo > rhi || clo > chi {
                continue;
            }
            for r in rlo..=rhi {
                for c in clo..=chi {
                    out.push((r, c));
                }
            }
        }
    }
    out
}
