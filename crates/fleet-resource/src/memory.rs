//! In-process [`Store`] implementation.

use crate::store::{Filter, Row, Stamp, Store, StoreError, StoreResult, TableSchema};
use parking_lot::RwLock;
use std::collections::BTreeMap;

struct Table<R> {
    schema: TableSchema,
    rows: BTreeMap<String, R>,
}

/// A single-table store held in memory.
///
/// Behaves like a relational table with a unique primary key: the table
/// must be created before use, inserts reject duplicate keys, and markers
/// are stamped under the table's write lock.
pub struct MemoryStore<R> {
    table: RwLock<Option<Table<R>>>,
}

impl<R> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(None),
        }
    }
}

impl<R> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_table() -> StoreError {
    StoreError::UndefinedTable("table not created".to_string())
}

#[async_trait::async_trait]
impl<R: Row> Store<R> for MemoryStore<R> {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_table(&self, schema: &TableSchema) -> StoreResult<()> {
        let mut table = self.table.write();
        match table.as_ref() {
            Some(existing) if existing.schema.table != schema.table => {
                Err(StoreError::Backend(format!(
                    "store already holds table \"{}\"",
                    existing.schema.table
                )))
            }
            Some(_) => Ok(()),
            None => {
                tracing::debug!(table = schema.table, "creating table");
                *table = Some(Table {
                    schema: schema.clone(),
                    rows: BTreeMap::new(),
                });
                Ok(())
            }
        }
    }

    async fn query(&self, filter: &Filter) -> StoreResult<Vec<R>> {
        let guard = self.table.read();
        let table = guard.as_ref().ok_or_else(missing_table)?;
        if let Some(p) = filter
            .predicates()
            .iter()
            .find(|p| !table.schema.has_column(&p.column))
        {
            return Err(StoreError::UndefinedColumn(p.column.clone()));
        }
        Ok(table
            .rows
            .values()
            .filter(|row| filter.matches(*row))
            .cloned()
            .collect())
    }

    async fn query_one(&self, key: &str) -> StoreResult<R> {
        let guard = self.table.read();
        let table = guard.as_ref().ok_or_else(missing_table)?;
        table.rows.get(key).cloned().ok_or(StoreError::NoRows)
    }

    async fn query_marker(&self, key: &str) -> StoreResult<i64> {
        let guard = self.table.read();
        let table = guard.as_ref().ok_or_else(missing_table)?;
        table.rows.get(key).map(Row::marker).ok_or(StoreError::NoRows)
    }

    async fn insert(&self, mut row: R, stamp: &Stamp<'_>) -> StoreResult<R> {
        let mut guard = self.table.write();
        let table = guard.as_mut().ok_or_else(missing_table)?;
        if table.rows.contains_key(row.key()) {
            return Err(StoreError::UniqueViolation {
                table: table.schema.table.to_string(),
                key: row.key().to_string(),
            });
        }
        row.set_marker(stamp(None));
        table.rows.insert(row.key().to_string(), row.clone());
        Ok(row)
    }

    async fn update(&self, key: &str, mut row: R, stamp: &Stamp<'_>) -> StoreResult<Option<R>> {
        let mut guard = self.table.write();
        let table = guard.as_mut().ok_or_else(missing_table)?;
        match table.rows.get_mut(key) {
            Some(existing) => {
                row.set_marker(stamp(Some(existing.marker())));
                *existing = row.clone();
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<u64> {
        let mut guard = self.table.write();
        let table = guard.as_mut().ok_or_else(missing_table)?;
        Ok(table.rows.remove(key).map_or(0, |_| 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Plate {
        number: String,
        state: String,
        issued: i64,
    }

    impl Row for Plate {
        fn key(&self) -> &str {
            &self.number
        }

        fn marker(&self) -> i64 {
            self.issued
        }

        fn set_marker(&mut self, marker: i64) {
            self.issued = marker;
        }

        fn column(&self, name: &str) -> Option<String> {
            match name {
                "number" => Some(self.number.clone()),
                "state" => Some(self.state.clone()),
                _ => None,
            }
        }
    }

    const PLATES: TableSchema = TableSchema {
        table: "plates",
        key_column: "number",
        columns: &["state"],
    };

    fn plate(number: &str, state: &str) -> Plate {
        Plate {
            number: number.to_string(),
            state: state.to_string(),
            issued: 10,
        }
    }

    fn next_issue(previous: Option<i64>) -> i64 {
        previous.map_or(10, |p| p + 1)
    }

    async fn store() -> MemoryStore<Plate> {
        let store = MemoryStore::new();
        store.create_table(&PLATES).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_requires_table() {
        let store = MemoryStore::<Plate>::new();
        assert!(matches!(
            store.query(&Filter::all()).await,
            Err(StoreError::UndefinedTable(_))
        ));
        assert!(matches!(
            store.insert(plate("ABC", "CA"), &next_issue).await,
            Err(StoreError::UndefinedTable(_))
        ));
    }

    #[tokio::test]
    async fn test_create_table_is_idempotent() {
        let store = store().await;
        store.insert(plate("ABC", "CA"), &next_issue).await.unwrap();
        store.create_table(&PLATES).await.unwrap();
        assert_eq!(store.query(&Filter::all()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_key() {
        let store = store().await;
        assert_eq!(
            store.insert(plate("ABC", "CA"), &next_issue).await,
            Ok(plate("ABC", "CA"))
        );
        assert_eq!(
            store.insert(plate("ABC", "NV"), &next_issue).await,
            Err(StoreError::UniqueViolation {
                table: "plates".into(),
                key: "ABC".into()
            })
        );
        assert_eq!(store.query_one("ABC").await.unwrap().state, "CA");
    }

    #[tokio::test]
    async fn test_update_and_delete_report_missing_rows() {
        let store = store().await;
        store.insert(plate("ABC", "CA"), &next_issue).await.unwrap();

        assert_eq!(
            store.update("XYZ", plate("XYZ", "CA"), &next_issue).await,
            Ok(None)
        );
        let updated = store
            .update("ABC", plate("ABC", "OR"), &next_issue)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.state, "OR");
        assert_eq!(store.query_one("ABC").await.unwrap(), updated);

        assert_eq!(store.delete("ABC").await, Ok(1));
        assert_eq!(store.delete("ABC").await, Ok(0));
        assert_eq!(store.query_one("ABC").await, Err(StoreError::NoRows));
        assert_eq!(store.query_marker("ABC").await, Err(StoreError::NoRows));
    }

    #[tokio::test]
    async fn test_stamp_sees_previous_marker() {
        let store = store().await;
        let mut row = plate("ABC", "CA");
        row.issued = 0;
        let inserted = store.insert(row, &next_issue).await.unwrap();
        assert_eq!(inserted.issued, 10);

        // The caller's marker is ignored; the stamp decides.
        let mut row = plate("ABC", "WA");
        row.issued = 99;
        let updated = store
            .update("ABC", row, &next_issue)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.issued, 11);
        assert_eq!(store.query_marker("ABC").await, Ok(11));
    }

    #[tokio::test]
    async fn test_query_filters_and_orders_by_key() {
        let store = store().await;
        for (number, state) in [("C", "CA"), ("A", "NV"), ("B", "CA")] {
            store.insert(plate(number, state), &next_issue).await.unwrap();
        }

        let all: Vec<_> = store
            .query(&Filter::all())
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.number)
            .collect();
        assert_eq!(all, vec!["A", "B", "C"]);

        let ca = store
            .query(&Filter::all().and_in("state", vec!["CA".into()]))
            .await
            .unwrap();
        assert_eq!(ca.len(), 2);

        assert_eq!(
            store
                .query(&Filter::all().and_in("color", vec!["red".into()]))
                .await,
            Err(StoreError::UndefinedColumn("color".into()))
        );
    }
}
