//! Column placement maps.
//!
//! A [`ColumnMap`] records, for every logical column of a table, which tile
//! of a tilegroup holds it and at which position. The table's *default
//! partition* is the layout newly created tilegroups get; individual
//! tilegroups may diverge until a layout transformation folds them back.

use crate::schema::{Column, Schema};
use itertools::Itertools;
use mica_primitives::ColId;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Placement of one logical column: which tile, and which column within it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TileColumn {
    pub tile: u32,
    pub column: u32,
}

/// Maps logical column -> [`TileColumn`] for one tilegroup layout.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ColumnMap {
    entries: Vec<TileColumn>,
}

impl ColumnMap {
    /// `entries[i]` is the placement of logical column `i`.
    ///
    /// The placements must form a bijection onto `{0..tile_count} x
    /// {0..columns_in_tile}` with both ranges dense.
    pub fn new(entries: Vec<TileColumn>) -> Self {
        let map = Self { entries };
        debug_assert!(map.placements_are_dense(), "column map is not a dense bijection");
        map
    }

    /// The single-tile layout: all columns in tile 0, schema order.
    pub fn row(column_count: usize) -> Self {
        Self {
            entries: (0..column_count as u32)
                .map(|i| TileColumn { tile: 0, column: i })
                .collect(),
        }
    }

    pub fn locate(&self, col: ColId) -> TileColumn {
        self.entries[col.idx()]
    }

    pub fn column_count(&self) -> usize {
        self.entries.len()
    }

    pub fn tile_count(&self) -> usize {
        self.entries
            .iter()
            .map(|tc| tc.tile as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Fraction of logical columns in `[0, 1]` whose placement differs from
    /// `other`. Both maps must cover the same columns.
    pub fn divergence(&self, other: &ColumnMap) -> f64 {
        assert_eq!(self.column_count(), other.column_count());
        if self.entries.is_empty() {
            return 0.0;
        }
        let moved = self
            .entries
            .iter()
            .zip(&other.entries)
            .filter(|(a, b)| a != b)
            .count();
        moved as f64 / self.entries.len() as f64
    }

    /// For each tile, the logical columns it holds, in tile-column order.
    pub fn tile_columns(&self) -> Vec<SmallVec<[ColId; 16]>> {
        let mut per_tile: Vec<SmallVec<[ColId; 16]>> = vec![SmallVec::new(); self.tile_count()];
        for (logical, tc) in self
            .entries
            .iter()
            .enumerate()
            .sorted_by_key(|(_, tc)| (tc.tile, tc.column))
        {
            per_tile[tc.tile as usize].push(ColId(logical as u32));
        }
        per_tile
    }

    /// Splits `schema` into one column list per tile.
    pub fn tile_schemas(&self, schema: &Schema) -> Vec<Vec<Column>> {
        assert_eq!(self.column_count(), schema.column_count());
        self.tile_columns()
            .into_iter()
            .map(|cols| cols.into_iter().map(|c| schema.column(c).clone()).collect())
            .collect()
    }

    /// Per-tile column counts, keyed by tile offset.
    pub fn column_map_stats(&self) -> BTreeMap<u32, u32> {
        let mut stats = BTreeMap::new();
        for tc in &self.entries {
            *stats.entry(tc.tile).or_insert(0u32) += 1;
        }
        stats
    }

    fn placements_are_dense(&self) -> bool {
        let stats = self.column_map_stats();
        // Tiles numbered 0..n with no gaps.
        if !stats.keys().copied().eq(0..stats.len() as u32) {
            return false;
        }
        // Within each tile, columns numbered 0..count with no duplicates.
        stats.iter().all(|(&tile, &count)| {
            self.entries
                .iter()
                .filter(|tc| tc.tile == tile)
                .map(|tc| tc.column)
                .sorted()
                .eq(0..count)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;

    fn two_tile_map() -> ColumnMap {
        // Columns 0 and 2 in tile 0; column 1 alone in tile 1.
        ColumnMap::new(vec![
            TileColumn { tile: 0, column: 0 },
            TileColumn { tile: 1, column: 0 },
            TileColumn { tile: 0, column: 1 },
        ])
    }

    #[test]
    fn row_layout_is_single_tile() {
        let map = ColumnMap::row(4);
        assert_eq!(map.tile_count(), 1);
        assert_eq!(map.column_map_stats(), BTreeMap::from([(0, 4)]));
        assert_eq!(map.divergence(&ColumnMap::row(4)), 0.0);
    }

    #[test]
    fn divergence_counts_moved_columns() {
        let map = two_tile_map();
        let row = ColumnMap::row(3);
        // Column 0 stays put; columns 1 and 2 move.
        let diff = map.divergence(&row);
        assert!((diff - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        /// A random dense two-tile column map over `columns` columns.
        /// Column 0 is pinned to tile 0 so the tile numbering stays dense.
        fn column_map(columns: usize) -> impl Strategy<Value = ColumnMap> {
            proptest::sample::subsequence((1..columns).collect::<Vec<_>>(), 0..columns).prop_map(
                move |in_tile_one| {
                    let mut next = [0u32; 2];
                    ColumnMap::new(
                        (0..columns)
                            .map(|col| {
                                let tile = (col != 0 && in_tile_one.contains(&col)) as u32;
                                let column = next[tile as usize];
                                next[tile as usize] += 1;
                                TileColumn { tile, column }
                            })
                            .collect(),
                    )
                },
            )
        }

        proptest! {
            #[test]
            fn divergence_is_a_normalized_distance(a in column_map(6), b in column_map(6)) {
                let d = a.divergence(&b);
                prop_assert!((0.0..=1.0).contains(&d));
                prop_assert_eq!(a.divergence(&a), 0.0);
                prop_assert_eq!(a.divergence(&b), b.divergence(&a));
            }

            #[test]
            fn tile_columns_partition_the_schema(map in column_map(6)) {
                let mut seen: Vec<ColId> = map.tile_columns().into_iter().flatten().collect();
                seen.sort();
                let all: Vec<ColId> = (0..6u32).map(ColId).collect();
                prop_assert_eq!(seen, all);
            }
        }
    }

    #[test]
    fn tile_schemas_follow_the_map() {
        let schema = Schema::new(vec![
            Column::new("a", ColumnType::Int),
            Column::new("b", ColumnType::Text),
            Column::new("c", ColumnType::Bool),
        ]);
        let tiles = two_tile_map().tile_schemas(&schema);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0].iter().map(|c| c.name()).collect::<Vec<_>>(), ["a", "c"]);
        assert_eq!(tiles[1].iter().map(|c| c.name()).collect::<Vec<_>>(), ["b"]);
    }
}
