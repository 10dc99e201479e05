use std::ops::Bound;

use imbl::OrdMap;
use trellis_proto::{Column, ColumnOrSuperColumn, SlicePredicate, SliceRange, SuperColumn};

pub(crate) type Columns = OrdMap<String, Column>;

#[derive(Debug, Clone, Default)]
pub(crate) struct Row {
    pub columns: Columns,
    pub super_columns: OrdMap<String, Columns>,
}

pub(crate) type Family = OrdMap<String, Row>;
pub(crate) type Keyspace = OrdMap<String, Family>;

impl Row {
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.super_columns.is_empty()
    }

    pub fn is_super(&self) -> bool {
        !self.super_columns.is_empty()
    }

    pub fn put(&mut self, super_column: Option<&str>, column: Column) {
        match super_column {
            None => put_column(&mut self.columns, column),
            Some(sc) => {
                let mut columns = self.super_columns.get(sc).cloned().unwrap_or_default();
                put_column(&mut columns, column);
                self.super_columns.insert(sc.to_string(), columns);
            }
        }
    }

    pub fn put_super(&mut self, super_column: SuperColumn) {
        for column in super_column.columns {
            self.put(Some(&super_column.name), column);
        }
    }

    pub fn delete_column(&mut self, super_column: Option<&str>, name: &str) {
        match super_column {
            None => {
                self.columns.remove(name);
            }
            Some(sc) => {
                let Some(mut columns) = self.super_columns.get(sc).cloned() else {
                    return;
                };
                columns.remove(name);
                if columns.is_empty() {
                    self.super_columns.remove(sc);
                } else {
                    self.super_columns.insert(sc.to_string(), columns);
                }
            }
        }
    }

    pub fn delete_super(&mut self, name: &str) {
        self.super_columns.remove(name);
    }

    pub fn clear(&mut self) {
        *self = Row::default();
    }

    /// A super column is addressed by `super_column`; otherwise a row holding
    /// only super columns slices over their names.
    pub fn slice(&self, super_column: Option<&str>, predicate: &SlicePredicate) -> Vec<ColumnOrSuperColumn> {
        match super_column {
            Some(sc) => self
                .super_columns
                .get(sc)
                .map(|columns| slice_columns(columns, predicate))
                .unwrap_or_default()
                .into_iter()
                .map(Into::into)
                .collect(),
            None if self.columns.is_empty() && self.is_super() => {
                select(&self.super_columns, predicate)
                    .into_iter()
                    .map(|(name, columns)| {
                        SuperColumn {
                            name: name.clone(),
                            columns: columns.iter().map(|(_, c)| c.clone()).collect(),
                        }
                        .into()
                    })
                    .collect()
            }
            None => slice_columns(&self.columns, predicate)
                .into_iter()
                .map(Into::into)
                .collect(),
        }
    }
}

fn put_column(columns: &mut Columns, column: Column) {
    match columns.get(&column.name) {
        Some(existing) if existing.timestamp > column.timestamp => {}
        _ => {
            columns.insert(column.name.clone(), column);
        }
    }
}

fn slice_columns(columns: &Columns, predicate: &SlicePredicate) -> Vec<Column> {
    select(columns, predicate)
        .into_iter()
        .map(|(_, column)| column.clone())
        .collect()
}

fn select<'a, V: Clone>(
    map: &'a OrdMap<String, V>,
    predicate: &'a SlicePredicate,
) -> Vec<(&'a String, &'a V)> {
    match predicate {
        SlicePredicate::ColumnNames(names) => {
            let mut wanted: Vec<&String> = names.iter().collect();
            wanted.sort();
            wanted.dedup();
            wanted
                .into_iter()
                .filter_map(|name| map.get(name).map(|v| (name, v)))
                .collect()
        }
        SlicePredicate::Range(range) => select_range(map, range),
    }
}

/// Inclusive on both ends; an empty bound is open.
pub(crate) fn select_range<'a, V: Clone>(map: &'a OrdMap<String, V>, range: &SliceRange) -> Vec<(&'a String, &'a V)> {
    let bound = |s: &String| {
        if s.is_empty() {
            Bound::Unbounded
        } else {
            Bound::Included(s.clone())
        }
    };
    let finish = range.finish.as_str();
    if range.reversed {
        map.range((Bound::Unbounded, bound(&range.start)))
            .rev()
            .take_while(|(name, _)| finish.is_empty() || name.as_str() >= finish)
            .take(range.count)
            .collect()
    } else {
        map.range((bound(&range.start), Bound::Unbounded))
            .take_while(|(name, _)| finish.is_empty() || name.as_str() <= finish)
            .take(range.count)
            .collect()
    }
}

/// Copy-on-write edit of one row. Empty rows and families are dropped.
pub(crate) fn update_row(keyspace: &mut Keyspace, family: &str, key: &str, f: impl FnOnce(&mut Row)) {
    let mut rows = keyspace.get(family).cloned().unwrap_or_default();
    let mut row = rows.get(key).cloned().unwrap_or_default();
    f(&mut row);
    if row.is_empty() {
        rows.remove(key);
    } else {
        rows.insert(key.to_string(), row);
    }
    if rows.is_empty() {
        keyspace.remove(family);
    } else {
        keyspace.insert(family.to_string(), rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(names: &[&str]) -> Row {
        let mut row = Row::default();
        for name in names {
            row.put(None, Column::new(*name, format!("v-{name}"), 1));
        }
        row
    }

    fn names(items: Vec<ColumnOrSuperColumn>) -> Vec<String> {
        items.iter().map(|c| c.name().to_string()).collect()
    }

    #[test]
    fn range_is_inclusive_and_sorted() {
        let row = row(&["d", "a", "c", "b", "e"]);
        let range = SlicePredicate::Range(SliceRange::new("b", "d", false, 100));
        assert_eq!(names(row.slice(None, &range)), ["b", "c", "d"]);
    }

    #[test]
    fn reversed_range_walks_down_from_start() {
        let row = row(&["a", "b", "c", "d", "e"]);
        let all = SlicePredicate::Range(SliceRange::new("", "", true, 2));
        assert_eq!(names(row.slice(None, &all)), ["e", "d"]);
        let from_c = SlicePredicate::Range(SliceRange::new("c", "b", true, 10));
        assert_eq!(names(row.slice(None, &from_c)), ["c", "b"]);
    }

    #[test]
    fn names_skip_missing() {
        let row = row(&["a", "b"]);
        let predicate = SlicePredicate::names(["b", "zz", "a"]);
        assert_eq!(names(row.slice(None, &predicate)), ["a", "b"]);
    }

    #[test]
    fn older_write_loses() {
        let mut row = Row::default();
        row.put(None, Column::new("a", "new", 10));
        row.put(None, Column::new("a", "old", 5));
        assert_eq!(row.columns.get("a").map(|c| c.value.as_str()), Some("new"));
    }

    #[test]
    fn super_rows_slice_by_super_name() {
        let mut row = Row::default();
        row.put(Some("s1"), Column::new("x", "1", 1));
        row.put(Some("s2"), Column::new("y", "2", 1));
        let all = row.slice(None, &SlicePredicate::all());
        assert_eq!(names(all), ["s1", "s2"]);
        let inner = row.slice(Some("s2"), &SlicePredicate::all());
        assert_eq!(names(inner), ["y"]);

        row.delete_column(Some("s2"), "y");
        assert!(row.super_columns.get("s2").is_none());
    }
}
