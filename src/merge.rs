use std::collections::BTreeMap;

use crate::{station::Station, table::AggregateTable};

/// Final per-key aggregates, ordered by key bytes
pub type Stations = BTreeMap<Box<[u8]>, Station>;

/// Folds every worker's table into one map, matching keys by their bytes.
/// min/max/sum/count all combine associatively, so the result doesn't depend on
/// which worker saw which chunk.
pub fn merge_tables(tables: impl IntoIterator<Item = AggregateTable>) -> Stations {
    tables
        .into_iter()
        .fold(Stations::new(), |mut merged, table| {
            for (key, stats) in table.into_entries() {
                merged
                    .entry(key)
                    .and_modify(|e| e.merge(&stats))
                    .or_insert(stats);
            }
            merged
        })
}

#[cfg(test)]
mod test {
    use super::merge_tables;
    use crate::{config::SlotPolicy, station::Station, table::AggregateTable};

    fn table(records: &[(&str, i16)]) -> AggregateTable {
        let mut table = AggregateTable::new(32, SlotPolicy::Probe);
        for (key, m) in records {
            table.record(key.as_bytes(), *m).unwrap();
        }
        table
    }

    #[test]
    fn combines_matching_keys() {
        let merged = merge_tables([
            table(&[("A", 10), ("B", -25)]),
            table(&[("A", 30)]),
            table(&[]),
            table(&[("C", 0), ("A", -5)]),
        ]);
        let entries = merged
            .iter()
            .map(|(k, v)| (std::str::from_utf8(k).unwrap(), *v))
            .collect::<Vec<_>>();
        assert_eq!(
            entries,
            [
                (
                    "A",
                    Station {
                        min: -5,
                        max: 30,
                        sum: 35,
                        count: 3,
                    }
                ),
                ("B", Station::new(-25)),
                ("C", Station::new(0)),
            ]
        );
    }

    #[test]
    fn order_of_tables_is_irrelevant() {
        let build = || [table(&[("k", 1), ("j", 7)]), table(&[("k", -4)]), table(&[("j", 2)])];
        let forward = merge_tables(build());
        let backward = merge_tables(build().into_iter().rev());
        assert_eq!(forward, backward);
    }

    #[test]
    fn empty_input() {
        assert!(merge_tables(Vec::new()).is_empty());
    }
}
