use anyhow::Result;
use tracing::{error, info, warn};

use crate::cluster::{cluster_latest, BLOB_SCHEME};
use crate::config::Config;
use crate::error::SyncError;
use crate::plan;
use crate::schema::infer_columns;
use crate::store::ObjectStore;
use crate::warehouse::Warehouse;

/// Counts for one run, for the caller's logs.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tables_provisioned: usize,
    pub tables_failed: usize,
}

/// One full sync: list the container, cluster to the latest snapshot per
/// (database, table), ensure the shared stage, then provision each table.
///
/// A listing failure aborts the run; any per-table failure (download, schema
/// read, statement rejection) is logged and the loop continues. Statements
/// within one table stop at the first failure, leaving that table for the
/// next run — every statement is either re-runnable or replace-semantics, so
/// a partial table is never corrupt.
pub async fn run_once(
    store: &dyn ObjectStore,
    warehouse: &dyn Warehouse,
    cfg: &Config,
) -> Result<RunSummary> {
    let keys = store.list_keys().await?;
    info!(blobs = keys.len(), container = %cfg.container_name, "listed container");

    let clusters = cluster_latest(&keys);
    let table_count: usize = clusters.values().map(|t| t.len()).sum();
    if table_count == 0 {
        info!("no attributable snapshots; nothing to do");
        return Ok(RunSummary::default());
    }
    info!(tables = table_count, "clustered latest snapshots");

    // Stage is table-independent; issue it once up front.
    let stage = plan::ensure_stage(
        &cfg.snowflake_database,
        &cfg.schema_name,
        &cfg.stage_name,
        &cfg.storage_url,
        &cfg.sas_token,
    );
    warehouse.execute(&stage).await?;

    let mut summary = RunSummary::default();
    for (database, tables) in &clusters {
        for (table, latest_key) in tables {
            match provision_table(store, warehouse, cfg, database, table, latest_key).await {
                Ok(()) => {
                    info!(%database, %table, "provisioned");
                    summary.tables_provisioned += 1;
                }
                Err(e) => {
                    error!(%database, %table, error = %e, "table skipped");
                    summary.tables_failed += 1;
                }
            }
        }
    }

    if summary.tables_failed > 0 {
        warn!(
            failed = summary.tables_failed,
            ok = summary.tables_provisioned,
            "run finished with failures"
        );
    } else {
        info!(ok = summary.tables_provisioned, "run finished");
    }
    Ok(summary)
}

async fn provision_table(
    store: &dyn ObjectStore,
    warehouse: &dyn Warehouse,
    cfg: &Config,
    database: &str,
    table: &str,
    latest_key: &str,
) -> Result<(), SyncError> {
    let blob_name = latest_key.strip_prefix(BLOB_SCHEME).unwrap_or(latest_key);
    let bytes = store.fetch(blob_name).await?;
    let columns = infer_columns(blob_name, bytes)?;

    let statements = plan::plan_table(
        database,
        &cfg.schema_name,
        table,
        &cfg.stage_name,
        latest_key,
        &columns,
    );
    for stmt in &statements {
        warehouse.execute(stmt).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Statement, StatementKind};
    use anyhow::anyhow;
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parquet::arrow::ArrowWriter;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::Mutex;

    fn parquet_with_columns(names: &[&str]) -> Bytes {
        let fields: Vec<Field> = names
            .iter()
            .map(|n| Field::new(*n, DataType::Int64, false))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let arrays: Vec<arrow::array::ArrayRef> = names
            .iter()
            .map(|_| Arc::new(Int64Array::from(vec![1])) as arrow::array::ArrayRef)
            .collect();
        let batch = RecordBatch::try_new(schema.clone(), arrays).unwrap();

        let mut buf = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        Bytes::from(buf)
    }

    struct FakeStore {
        keys: Vec<String>,
        blobs: HashMap<String, Bytes>,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn list_keys(&self) -> Result<Vec<String>, SyncError> {
            Ok(self.keys.clone())
        }

        async fn fetch(&self, key: &str) -> Result<Bytes, SyncError> {
            self.blobs
                .get(key)
                .cloned()
                .ok_or_else(|| SyncError::Fetch {
                    key: key.to_string(),
                    source: anyhow!("no such blob").into(),
                })
        }
    }

    /// Records every executed statement; optionally rejects one kind to
    /// simulate warehouse-side failures.
    struct FakeWarehouse {
        executed: Mutex<Vec<Statement>>,
        reject: Option<StatementKind>,
    }

    impl FakeWarehouse {
        fn new() -> Self {
            FakeWarehouse {
                executed: Mutex::new(Vec::new()),
                reject: None,
            }
        }

        fn rejecting(kind: StatementKind) -> Self {
            FakeWarehouse {
                executed: Mutex::new(Vec::new()),
                reject: Some(kind),
            }
        }

        fn kinds(&self) -> Vec<StatementKind> {
            self.executed.lock().unwrap().iter().map(|s| s.kind).collect()
        }
    }

    #[async_trait]
    impl Warehouse for FakeWarehouse {
        async fn execute(&self, stmt: &Statement) -> Result<(), SyncError> {
            if self.reject == Some(stmt.kind) {
                return Err(SyncError::Statement {
                    kind: stmt.kind.as_str(),
                    message: "rejected by test".to_string(),
                });
            }
            self.executed.lock().unwrap().push(stmt.clone());
            Ok(())
        }
    }

    fn test_config() -> Config {
        Config {
            snowflake_account: "acct".into(),
            snowflake_user: "u".into(),
            snowflake_password: "p".into(),
            snowflake_database: "salesdb".into(),
            schema_name: "public".into(),
            stage_name: "landing".into(),
            container_name: "snapshots".into(),
            snowflake_role: "loader".into(),
            snowflake_warehouse: "wh".into(),
            storage_url: "https://acct.blob.core.windows.net/snapshots".into(),
            sas_token: "sv=tok".into(),
            connection_string: "conn".into(),
        }
    }

    #[tokio::test]
    async fn provisions_latest_snapshot_per_table() {
        let store = FakeStore {
            keys: vec![
                "salesdb/orders/p1/orders_20240101_a.parquet".into(),
                "salesdb/orders/p1/orders_20240202_b.parquet".into(),
                "salesdb/customers/p1/customers_20240101_c.parquet".into(),
            ],
            blobs: HashMap::from([
                (
                    "salesdb/orders/p1/orders_20240202_b.parquet".to_string(),
                    parquet_with_columns(&["order_id", "total"]),
                ),
                (
                    "salesdb/customers/p1/customers_20240101_c.parquet".to_string(),
                    parquet_with_columns(&["customer_id"]),
                ),
            ]),
        };
        let warehouse = FakeWarehouse::new();

        let summary = run_once(&store, &warehouse, &test_config()).await.unwrap();
        assert_eq!(summary.tables_provisioned, 2);
        assert_eq!(summary.tables_failed, 0);

        // One stage statement, then the four-statement plan per table,
        // customers before orders (cluster map is ordered).
        assert_eq!(
            warehouse.kinds(),
            vec![
                StatementKind::EnsureStage,
                StatementKind::EnsureTable,
                StatementKind::ReplacePipe,
                StatementKind::UnpausePipe,
                StatementKind::RefreshPipe,
                StatementKind::EnsureTable,
                StatementKind::ReplacePipe,
                StatementKind::UnpausePipe,
                StatementKind::RefreshPipe,
            ]
        );

        // The superseded 20240101 orders file never reaches the pipe.
        let executed = warehouse.executed.lock().unwrap();
        assert!(executed
            .iter()
            .any(|s| s.sql.contains("orders_20240202_b.parquet")));
        assert!(!executed
            .iter()
            .any(|s| s.sql.contains("orders_20240101_a.parquet")));
    }

    #[tokio::test]
    async fn unattributable_keys_produce_no_actions() {
        let store = FakeStore {
            keys: vec!["malformed.parquet".into()],
            blobs: HashMap::new(),
        };
        let warehouse = FakeWarehouse::new();

        let summary = run_once(&store, &warehouse, &test_config()).await.unwrap();
        assert_eq!(summary, RunSummary::default());
        assert!(warehouse.kinds().is_empty());
    }

    #[tokio::test]
    async fn existing_table_still_gets_pipe_replaced_and_refreshed() {
        // CREATE TABLE IF NOT EXISTS is a warehouse-side no-op when the table
        // exists; from here that is indistinguishable from a create, so the
        // pipe statements must follow either way.
        let store = FakeStore {
            keys: vec!["salesdb/orders/p1/orders_20240303_d.parquet".into()],
            blobs: HashMap::from([(
                "salesdb/orders/p1/orders_20240303_d.parquet".to_string(),
                parquet_with_columns(&["order_id"]),
            )]),
        };
        let warehouse = FakeWarehouse::new();

        run_once(&store, &warehouse, &test_config()).await.unwrap();
        let kinds = warehouse.kinds();
        assert!(kinds.contains(&StatementKind::ReplacePipe));
        assert!(kinds.contains(&StatementKind::RefreshPipe));
    }

    #[tokio::test]
    async fn one_bad_table_does_not_stop_the_rest() {
        // orders has no blob behind it; customers must still be provisioned.
        let store = FakeStore {
            keys: vec![
                "salesdb/orders/p1/orders_20240101_a.parquet".into(),
                "salesdb/customers/p1/customers_20240101_c.parquet".into(),
            ],
            blobs: HashMap::from([(
                "salesdb/customers/p1/customers_20240101_c.parquet".to_string(),
                parquet_with_columns(&["customer_id"]),
            )]),
        };
        let warehouse = FakeWarehouse::new();

        let summary = run_once(&store, &warehouse, &test_config()).await.unwrap();
        assert_eq!(summary.tables_provisioned, 1);
        assert_eq!(summary.tables_failed, 1);
        assert!(warehouse
            .executed
            .lock()
            .unwrap()
            .iter()
            .any(|s| s.sql.contains("customers")));
    }

    #[tokio::test]
    async fn statement_rejection_fails_only_that_table() {
        let store = FakeStore {
            keys: vec!["salesdb/orders/p1/orders_20240101_a.parquet".into()],
            blobs: HashMap::from([(
                "salesdb/orders/p1/orders_20240101_a.parquet".to_string(),
                parquet_with_columns(&["order_id"]),
            )]),
        };
        let warehouse = FakeWarehouse::rejecting(StatementKind::ReplacePipe);

        let summary = run_once(&store, &warehouse, &test_config()).await.unwrap();
        assert_eq!(summary.tables_provisioned, 0);
        assert_eq!(summary.tables_failed, 1);

        // Statements after the rejected one were not attempted.
        assert_eq!(
            warehouse.kinds(),
            vec![StatementKind::EnsureStage, StatementKind::EnsureTable]
        );
    }

    #[tokio::test]
    async fn listing_failure_is_fatal() {
        struct BrokenStore;

        #[async_trait]
        impl ObjectStore for BrokenStore {
            async fn list_keys(&self) -> Result<Vec<String>, SyncError> {
                Err(SyncError::Listing {
                    container: "snapshots".to_string(),
                    source: anyhow!("connection refused").into(),
                })
            }
            async fn fetch(&self, _key: &str) -> Result<Bytes, SyncError> {
                unreachable!("fetch without a listing")
            }
        }

        let warehouse = FakeWarehouse::new();
        let err = run_once(&BrokenStore, &warehouse, &test_config())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("snapshots"));
        assert!(warehouse.kinds().is_empty());
    }
}
