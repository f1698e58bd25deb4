//! Randomized properties checked against a brute-force per-cell model:
//! for every cell of the query range, the newest fragment storing it
//! wins, otherwise the fill value; cells stream in global order; and
//! chunked reads concatenate to the one-shot result.

use super::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum FragSpec {
    Dense { rect: [(i64, i64); 2] },
    Sparse { cells: Vec<(i64, i64)> },
}

impl FragSpec {
    /// Value of cell `(r, c)` in fragment `index`, when stored.
    fn value(index: usize, r: i64, c: i64) -> i32 {
        (1000 * index as i32) + (10 * r + c) as i32
    }

    fn stores(&self, r: i64, c: i64) -> bool {
        match self {
            FragSpec::Dense { rect } => {
                (rect[0].0..=rect[0].1).contains(&r) && (rect[1].0..=rect[1].1).contains(&c)
            }
            FragSpec::Sparse { cells } => cells.contains(&(r, c)),
        }
    }

    fn build(&self, index: usize, schema: &Arc<ArraySchema<i64>>) -> Fragment<i64> {
        match self {
            FragSpec::Dense { rect } => {
                let mut values = Vec::new();
                for r in rect[0].0..=rect[0].1 {
                    for c in rect[1].0..=rect[1].1 {
                        values.extend_from_slice(&Self::value(index, r, c).to_le_bytes());
                    }
                }
                Fragment::new_dense(schema.clone(), rect.to_vec(), vec![values]).unwrap()
            }
            FragSpec::Sparse { cells } => {
                // global order: tile row-major, then cell row-major
                let mut sorted = cells.clone();
                sorted.sort_by_key(|&(r, c)| (r / 5, c / 5, r, c));
                let mut coords = Vec::new();
                let mut values = Vec::new();
                for (r, c) in sorted {
                    coords.push(r);
                    coords.push(c);
                    values.extend_from_slice(&Self::value(index, r, c).to_le_bytes());
                }
                Fragment::new_sparse(schema.clone(), coords, vec![values]).unwrap()
            }
        }
    }
}

fn arb_rect() -> impl Strategy<Value = [(i64, i64); 2]> {
    (0i64..10, 0i64..10, 0i64..10, 0i64..10)
        .prop_map(|(a, b, c, d)| [(a.min(b), a.max(b)), (c.min(d), c.max(d))])
}

fn arb_fragment() -> impl Strategy<Value = FragSpec> {
    prop_oneof![
        arb_rect().prop_map(|rect| FragSpec::Dense { rect }),
        proptest::collection::btree_set((0i64..10, 0i64..10), 1..8)
            .prop_map(|cells| FragSpec::Sparse {
                cells: cells.into_iter().collect(),
            }),
    ]
}

/// Newest covering fragment wins, fill otherwise — per cell, in global
/// order.
fn reference(specs: &[FragSpec], range: [(i64, i64); 2]) -> Vec<i32> {
    global_order_cells(range)
        .iter()
        .map(|&(r, c)| {
            specs
                .iter()
                .enumerate()
                .rev()
                .find(|(_, s)| s.stores(r, c))
                .map(|(i, _)| FragSpec::value(i, r, c))
                .unwrap_or(FILL)
        })
        .collect()
}

fn engine_output(
    specs: &[FragSpec],
    range: [(i64, i64); 2],
    buffer_bytes: usize,
) -> Vec<i32> {
    let schema = schema_2d();
    let fragments = specs
        .iter()
        .enumerate()
        .map(|(i, s)| s.build(i, &schema))
        .collect();
    let mut array = Array::new(schema, fragments).unwrap();
    let out = read_all(&mut array, &range, &[0], &[buffer_bytes]).unwrap();
    i32s(&out[0])
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn merged_output_matches_the_per_cell_model(
        specs in proptest::collection::vec(arb_fragment(), 1..4),
        range in arb_rect(),
    ) {
        let got = engine_output(&specs, range, 4096);
        let want = reference(&specs, range);
        prop_assert_eq!(got, want);
    }

    #[test]
    fn chunked_reads_concatenate_to_the_one_shot_result(
        specs in proptest::collection::vec(arb_fragment(), 1..4),
        range in arb_rect(),
        cells_per_call in 1usize..30,
    ) {
        let chunked = engine_output(&specs, range, cells_per_call * 4);
        let one_shot = engine_output(&specs, range, 4096);
        prop_assert_eq!(chunked, one_shot);
    }
}
