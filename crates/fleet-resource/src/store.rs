//! Storage collaborator interface.
//!
//! Resources talk to their rows through [`Store`]. The trait keeps storage
//! failures structured: a missing row is [`StoreError::NoRows`] and a
//! duplicate primary key is [`StoreError::UniqueViolation`], so callers
//! classify errors by variant instead of by message text.

use std::future::Future;
use std::time::Duration;

/// A row that can live in a [`Store`] table.
pub trait Row: Clone + Send + Sync + 'static {
    /// Primary key.
    fn key(&self) -> &str;

    /// Last-modification marker.
    fn marker(&self) -> i64;

    fn set_marker(&mut self, marker: i64);

    /// Textual value of a column, used for filter matching.
    fn column(&self, name: &str) -> Option<String>;
}

/// Table layout declared by a resource when it creates its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: &'static str,
    pub key_column: &'static str,
    pub columns: &'static [&'static str],
}

impl TableSchema {
    pub fn has_column(&self, name: &str) -> bool {
        self.key_column == name || self.columns.contains(&name)
    }
}

/// `column IN (values...)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    pub values: Vec<String>,
}

/// Conjunction of predicates. An empty filter selects every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    predicates: Vec<Predicate>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn and_in(mut self, column: impl Into<String>, values: Vec<String>) -> Self {
        self.predicates.push(Predicate {
            column: column.into(),
            values,
        });
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn matches<R: Row>(&self, row: &R) -> bool {
        self.predicates.iter().all(|p| {
            row.column(&p.column)
                .is_some_and(|value| p.values.iter().any(|v| *v == value))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("no rows in result set")]
    NoRows,

    #[error("duplicate key value violates unique constraint on {table} ({key})")]
    UniqueViolation { table: String, key: String },

    #[error("relation \"{0}\" does not exist")]
    UndefinedTable(String),

    #[error("column \"{0}\" does not exist")]
    UndefinedColumn(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("store error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Computes the marker of a row being written from the marker of the row it
/// replaces (`None` on insert).
///
/// Stores call it while holding their write lock on the row, so markers for
/// one key are assigned in the order the writes are applied.
pub type Stamp<'a> = dyn Fn(Option<i64>) -> i64 + Send + Sync + 'a;

/// Storage handle for one table of rows.
///
/// Implementations own their connection pooling and locking; the handle is
/// shared by every request task.
#[async_trait::async_trait]
pub trait Store<R: Row>: Send + Sync {
    /// Check the store is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Create the table if it does not exist yet.
    async fn create_table(&self, schema: &TableSchema) -> StoreResult<()>;

    /// Rows matching `filter`, ordered by key.
    async fn query(&self, filter: &Filter) -> StoreResult<Vec<R>>;

    /// The row with primary key `key`, or [`StoreError::NoRows`].
    async fn query_one(&self, key: &str) -> StoreResult<R>;

    /// Only the marker of row `key`, or [`StoreError::NoRows`].
    async fn query_marker(&self, key: &str) -> StoreResult<i64>;

    /// Insert a new row with the marker from `stamp`. Returns the row as stored.
    async fn insert(&self, row: R, stamp: &Stamp<'_>) -> StoreResult<R>;

    /// Replace row `key`, marking it with `stamp`. Returns the row as
    /// stored, or `None` when no row has that key.
    async fn update(&self, key: &str, row: R, stamp: &Stamp<'_>) -> StoreResult<Option<R>>;

    /// Remove row `key`. Returns rows affected (0 when absent).
    async fn delete(&self, key: &str) -> StoreResult<u64>;
}

/// Connect to a store, retrying while the store refuses connections.
///
/// Makes at most `retries + 1` attempts, sleeping `backoff` between them.
/// Errors other than [`StoreError::ConnectionRefused`] are returned at once.
pub async fn connect_with_retry<S, F, Fut>(
    retries: u32,
    backoff: Duration,
    mut connect: F,
) -> StoreResult<S>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<S>>,
{
    let mut attempt = 0;
    loop {
        match connect().await {
            Ok(store) => {
                tracing::debug!(attempt, "store connection established");
                return Ok(store);
            }
            Err(StoreError::ConnectionRefused(reason)) if attempt < retries => {
                attempt += 1;
                tracing::warn!(attempt, retries, %reason, "store refused connection, retrying");
                tokio::time::sleep(backoff).await;
            }
            Err(StoreError::ConnectionRefused(reason)) => {
                tracing::error!(attempts = attempt + 1, "store connection failed");
                return Err(StoreError::ConnectionRefused(format!(
                    "connection failed after {} attempts: {}",
                    attempt + 1,
                    reason
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct Car {
        vin: String,
        color: String,
    }

    impl Row for Car {
        fn key(&self) -> &str {
            &self.vin
        }

        fn marker(&self) -> i64 {
            1
        }

        fn set_marker(&mut self, _marker: i64) {}

        fn column(&self, name: &str) -> Option<String> {
            match name {
                "vin" => Some(self.vin.clone()),
                "color" => Some(self.color.clone()),
                _ => None,
            }
        }
    }

    #[test]
    fn test_filter_is_conjunction_of_in_predicates() {
        let car = Car {
            vin: "V1".into(),
            color: "red".into(),
        };
        assert!(Filter::all().matches(&car));
        assert!(Filter::all()
            .and_in("color", vec!["blue".into(), "red".into()])
            .matches(&car));
        assert!(!Filter::all()
            .and_in("color", vec!["red".into()])
            .and_in("vin", vec!["V2".into()])
            .matches(&car));
        assert!(!Filter::all()
            .and_in("wheels", vec!["4".into()])
            .matches(&car));
    }

    #[tokio::test]
    async fn test_connect_retries_refused_connections() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result = connect_with_retry(3, Duration::from_millis(1), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::ConnectionRefused("not yet".into()))
                } else {
                    Ok("connected")
                }
            }
        })
        .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_bounded_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: StoreResult<()> = connect_with_retry(2, Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::ConnectionRefused("down".into())) }
        })
        .await;

        assert!(matches!(result, Err(StoreError::ConnectionRefused(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_does_not_retry_other_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: StoreResult<()> = connect_with_retry(5, Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Backend("bad credentials".into())) }
        })
        .await;

        assert_eq!(result, Err(StoreError::Backend("bad credentials".into())));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
