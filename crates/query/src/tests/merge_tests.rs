//! Unit tests for the per-tile heap sweep, driving it directly with
//! hand-built range lists.

use super::*;
use anyhow::Result;
use schema::{CellPosRange, CellRange};

use crate::merge::{merge_cell_ranges, ranges_to_positions, FragmentCellRange};

fn fcr(fragment: Option<usize>, first: [i64; 2], last: [i64; 2]) -> FragmentCellRange<i64> {
    FragmentCellRange {
        fragment,
        range: CellRange::new(&first, &last),
    }
}

fn tile0(schema: &ArraySchema<i64>) -> Vec<(i64, i64)> {
    schema.tile_cell_rect(&[0, 0])
}

#[test]
fn newer_range_inside_older_splits_it() -> Result<()> {
    let schema = schema_2d();
    let f0 = dense_fragment(&schema, [(0, 9), (0, 9)], 0);
    let f1 = dense_fragment(&schema, [(0, 9), (0, 9)], 1000);
    let fragments = vec![f0, f1];
    let tile = tile0(&schema);

    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![
            fcr(Some(0), [0, 0], [4, 4]),
            fcr(Some(1), [1, 0], [1, 4]),
        ],
    )?;

    assert_eq!(merged.len(), 3);
    assert_eq!((merged[0].fragment, merged[0].range.first(), merged[0].range.last()),
        (Some(0), &[0i64, 0][..], &[0i64, 4][..]));
    assert_eq!((merged[1].fragment, merged[1].range.first(), merged[1].range.last()),
        (Some(1), &[1i64, 0][..], &[1i64, 4][..]));
    assert_eq!((merged[2].fragment, merged[2].range.first(), merged[2].range.last()),
        (Some(0), &[2i64, 0][..], &[4i64, 4][..]));
    Ok(())
}

#[test]
fn older_range_overlapping_past_the_end_is_head_trimmed() -> Result<()> {
    let schema = schema_2d();
    let f0 = dense_fragment(&schema, [(0, 9), (0, 9)], 0);
    let f1 = dense_fragment(&schema, [(0, 9), (0, 9)], 1000);
    let fragments = vec![f0, f1];
    let tile = tile0(&schema);

    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![
            fcr(Some(1), [0, 0], [1, 4]),
            fcr(Some(0), [0, 2], [2, 4]),
        ],
    )?;

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].fragment, Some(1));
    assert_eq!(merged[0].range.last(), &[1, 4]);
    // the older range restarts right after the newer one ends
    assert_eq!(merged[1].fragment, Some(0));
    assert_eq!(merged[1].range.first(), &[2, 0]);
    assert_eq!(merged[1].range.last(), &[2, 4]);
    Ok(())
}

#[test]
fn fully_contained_older_range_is_discarded() -> Result<()> {
    let schema = schema_2d();
    let f0 = dense_fragment(&schema, [(0, 9), (0, 9)], 0);
    let f1 = dense_fragment(&schema, [(0, 9), (0, 9)], 1000);
    let fragments = vec![f0, f1];
    let tile = tile0(&schema);

    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![
            fcr(Some(1), [0, 0], [4, 4]),
            fcr(Some(0), [2, 1], [2, 3]),
        ],
    )?;

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].fragment, Some(1));
    assert_eq!(merged[0].range.first(), &[0, 0]);
    assert_eq!(merged[0].range.last(), &[4, 4]);
    Ok(())
}

#[test]
fn equal_starts_pop_the_newer_fragment_first() -> Result<()> {
    let schema = schema_2d();
    let f0 = dense_fragment(&schema, [(0, 9), (0, 9)], 0);
    let f1 = dense_fragment(&schema, [(0, 9), (0, 9)], 1000);
    let fragments = vec![f0, f1];
    let tile = tile0(&schema);

    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![
            fcr(Some(0), [0, 0], [4, 4]),
            fcr(Some(1), [0, 0], [2, 4]),
        ],
    )?;

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].fragment, Some(1));
    assert_eq!(merged[0].range.last(), &[2, 4]);
    assert_eq!(merged[1].fragment, Some(0));
    assert_eq!(merged[1].range.first(), &[3, 0]);
    assert_eq!(merged[1].range.last(), &[4, 4]);
    Ok(())
}

#[test]
fn fill_backbone_survives_only_where_uncovered() -> Result<()> {
    let schema = schema_2d();
    let f0 = dense_fragment(&schema, [(0, 9), (0, 9)], 0);
    let fragments = vec![f0];
    let tile = tile0(&schema);

    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![
            fcr(None, [0, 0], [4, 4]),
            fcr(Some(0), [1, 0], [1, 4]),
        ],
    )?;

    assert_eq!(merged.len(), 3);
    assert_eq!(merged[0].fragment, None);
    assert_eq!(merged[0].range.last(), &[0, 4]);
    assert_eq!(merged[1].fragment, Some(0));
    assert_eq!(merged[2].fragment, None);
    assert_eq!(merged[2].range.first(), &[2, 0]);
    Ok(())
}

#[test]
fn sparse_range_expands_cell_by_cell_under_overlap() -> Result<()> {
    let schema = schema_2d();
    let mut f0 = sparse_fragment(&schema, &[(0, 1, 1), (0, 3, 2)]);
    f0.begin_read(&[(0, 9), (0, 9)]);
    f0.advance_tile();
    let f1 = dense_fragment(&schema, [(0, 9), (0, 9)], 1000);
    let fragments = vec![f0, f1];
    let tile = tile0(&schema);

    // f1's unary range collides with f0's span, forcing expansion;
    // f0's stored cells survive around it
    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![
            fcr(Some(0), [0, 1], [0, 3]),
            fcr(Some(1), [0, 2], [0, 2]),
        ],
    )?;

    assert_eq!(merged.len(), 3);
    assert_eq!((merged[0].fragment, merged[0].range.first()), (Some(0), &[0i64, 1][..]));
    assert!(merged[0].range.is_unary());
    assert_eq!((merged[1].fragment, merged[1].range.first()), (Some(1), &[0i64, 2][..]));
    assert_eq!((merged[2].fragment, merged[2].range.first()), (Some(0), &[0i64, 3][..]));
    Ok(())
}

#[test]
fn sparse_span_does_not_swallow_dense_cells_under_it() -> Result<()> {
    let schema = schema_2d();
    let f0 = dense_fragment(&schema, [(0, 9), (0, 9)], 0);
    let mut f1 = sparse_fragment(&schema, &[(1, 0, 1), (1, 4, 2)]);
    f1.begin_read(&[(0, 9), (0, 9)]);
    f1.advance_tile();
    let fragments = vec![f0, f1];
    let tile = tile0(&schema);

    // f1's tight range spans the whole row but stores only its ends;
    // the dense cells between them must survive
    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![
            fcr(Some(0), [0, 0], [4, 4]),
            fcr(Some(1), [1, 0], [1, 4]),
        ],
    )?;

    let shape: Vec<(Option<usize>, Vec<i64>, Vec<i64>)> = merged
        .iter()
        .map(|m| (m.fragment, m.range.first().to_vec(), m.range.last().to_vec()))
        .collect();
    assert_eq!(
        shape,
        vec![
            (Some(0), vec![0, 0], vec![0, 4]),
            (Some(1), vec![1, 0], vec![1, 0]),
            (Some(0), vec![1, 1], vec![1, 3]),
            (Some(1), vec![1, 4], vec![1, 4]),
            (Some(0), vec![2, 0], vec![4, 4]),
        ]
    );
    Ok(())
}

#[test]
fn hollow_sparse_range_is_dropped() -> Result<()> {
    let schema = schema_2d();
    let mut f0 = sparse_fragment(&schema, &[(0, 1, 1)]);
    f0.begin_read(&[(0, 9), (0, 9)]);
    f0.advance_tile();
    let f1 = dense_fragment(&schema, [(0, 9), (0, 9)], 1000);
    let fragments = vec![f0, f1];
    let tile = tile0(&schema);

    // the sparse range claims [0,2]..[0,4] but stores nothing there
    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![
            fcr(Some(0), [0, 2], [0, 4]),
            fcr(Some(1), [0, 3], [0, 3]),
        ],
    )?;

    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].fragment, Some(1));
    Ok(())
}

#[test]
fn nonexistent_unary_sparse_cell_is_dropped() -> Result<()> {
    let schema = schema_2d();
    let mut f0 = sparse_fragment(&schema, &[(0, 1, 1)]);
    f0.begin_read(&[(0, 9), (0, 9)]);
    f0.advance_tile();
    let fragments = vec![f0];
    let tile = tile0(&schema);

    let merged = merge_cell_ranges(
        &schema,
        &fragments,
        &tile,
        vec![fcr(Some(0), [2, 2], [2, 2])],
    )?;
    assert!(merged.is_empty());
    Ok(())
}

#[test]
fn positions_normalize_against_the_tile_origin() -> Result<()> {
    let schema = schema_2d();
    let f0 = dense_fragment(&schema, [(0, 9), (0, 9)], 0);
    let fragments = vec![f0];
    let tile = schema.tile_cell_rect(&[1, 1]);

    let plan = ranges_to_positions(
        &schema,
        &fragments,
        &tile,
        vec![fcr(Some(0), [5, 5], [6, 7])],
    )?;
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].range, CellPosRange::new(0, 7));
    Ok(())
}

#[test]
fn sparse_positions_expand_through_the_fragment() -> Result<()> {
    let schema = schema_2d();
    let mut f0 = sparse_fragment(&schema, &[(0, 1, 1), (0, 3, 2), (1, 2, 3)]);
    f0.begin_read(&[(0, 9), (0, 9)]);
    f0.advance_tile();
    let fragments = vec![f0];
    let tile = tile0(&schema);

    let plan = ranges_to_positions(
        &schema,
        &fragments,
        &tile,
        vec![fcr(Some(0), [0, 1], [1, 2])],
    )?;
    // the three stored cells are consecutive positions 0..=2
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].range, CellPosRange::new(0, 2));
    Ok(())
}
