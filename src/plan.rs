use crate::cluster::BLOB_SCHEME;
use crate::schema::Column;

/// What a statement is for. `ReplacePipe` is deliberately not a no-op on
/// re-run: the pipe is a disposable pointer to the latest snapshot, recreated
/// every run so auto-ingest picks up the new file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    EnsureStage,
    EnsureTable,
    ReplacePipe,
    UnpausePipe,
    RefreshPipe,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::EnsureStage => "ensure-stage",
            StatementKind::EnsureTable => "ensure-table",
            StatementKind::ReplacePipe => "replace-pipe",
            StatementKind::UnpausePipe => "unpause-pipe",
            StatementKind::RefreshPipe => "refresh-pipe",
        }
    }
}

/// One warehouse statement of a provisioning plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub sql: String,
}

/// External stage creation. Table-independent, so the coordinator issues it
/// once per run rather than once per table.
pub fn ensure_stage(
    db: &str,
    schema: &str,
    stage: &str,
    storage_url: &str,
    sas_token: &str,
) -> Statement {
    Statement {
        kind: StatementKind::EnsureStage,
        sql: format!(
            "CREATE STAGE IF NOT EXISTS {db}.{schema}.{stage} \
             URL='{storage_url}' \
             CREDENTIALS=(AZURE_SAS_TOKEN='{sas_token}')"
        ),
    }
}

/// Statements provisioning one table from its latest snapshot, in execution
/// order: ensure table, replace pipe, unpause, refresh.
///
/// Pure and deterministic; the caller owns execution and error handling.
pub fn plan_table(
    db: &str,
    schema: &str,
    table: &str,
    stage: &str,
    latest_key: &str,
    columns: &[Column],
) -> Vec<Statement> {
    let blob_name = latest_key.strip_prefix(BLOB_SCHEME).unwrap_or(latest_key);
    let pipe = format!("{table}_pipe");

    let column_defs = columns
        .iter()
        .map(|c| format!("{} {}", c.name, c.sql_type))
        .collect::<Vec<_>>()
        .join(",");

    let projection = columns
        .iter()
        .map(|c| format!("$1:{}", c.name))
        .collect::<Vec<_>>()
        .join(", ");

    vec![
        Statement {
            kind: StatementKind::EnsureTable,
            sql: format!("CREATE TABLE IF NOT EXISTS {db}.{schema}.{table} ({column_defs})"),
        },
        Statement {
            kind: StatementKind::ReplacePipe,
            sql: format!(
                "CREATE OR REPLACE PIPE {db}.{schema}.{pipe} AS \
                 COPY INTO {table} FROM (SELECT {projection} FROM @{stage}/{blob_name}) \
                 FILE_FORMAT=(TYPE='PARQUET')"
            ),
        },
        Statement {
            kind: StatementKind::UnpausePipe,
            sql: format!("ALTER PIPE {db}.{schema}.{pipe} SET PIPE_EXECUTION_PAUSED=false"),
        },
        Statement {
            kind: StatementKind::RefreshPipe,
            sql: format!("ALTER PIPE {db}.{schema}.{pipe} REFRESH"),
        },
    ]
}
