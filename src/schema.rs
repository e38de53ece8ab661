use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::SyncError;

/// Warehouse type every inferred column is declared as. Coercing everything
/// to text is the current loading policy, not an inference shortfall: the
/// COPY INTO projection reads parquet values through `$1:<col>` and Snowflake
/// casts on the way in.
pub const SQL_TYPE: &str = "STRING";

/// One column of the target table, in file-declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub sql_type: &'static str,
}

/// Reads the parquet footer of `bytes` and returns the declared columns.
///
/// Only the schema section is touched; row data is never materialized.
/// Empty or non-parquet input fails with [`SyncError::SchemaRead`].
pub fn infer_columns(key: &str, bytes: Bytes) -> Result<Vec<Column>, SyncError> {
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(bytes).map_err(|e| SyncError::SchemaRead {
            key: key.to_string(),
            source: e.into(),
        })?;

    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|field| Column {
            name: field.name().clone(),
            sql_type: SQL_TYPE,
        })
        .collect();

    Ok(columns)
}
