use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::SyncError;
use crate::plan::Statement;

/// Statement execution against the destination warehouse. Everything the job
/// issues is DDL/DML text; result rows are never read back.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn execute(&self, stmt: &Statement) -> Result<(), SyncError>;
}

/// Snowflake over its REST session protocol: one login at construction, then
/// one query-request per statement.
pub struct SnowflakeWarehouse {
    client: Client,
    base_url: String,
    session_token: String,
}

#[derive(Deserialize)]
struct SessionResponse {
    success: bool,
    message: Option<String>,
    data: Option<SessionData>,
}

#[derive(Deserialize)]
struct SessionData {
    token: String,
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    #[serde(rename = "sqlText")]
    sql_text: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    success: bool,
    message: Option<String>,
}

/// Session parameters for [`SnowflakeWarehouse::connect`].
pub struct SessionParams<'a> {
    pub account: &'a str,
    pub user: &'a str,
    pub password: &'a str,
    pub warehouse: &'a str,
    pub database: &'a str,
    pub schema: &'a str,
    pub role: &'a str,
}

impl SnowflakeWarehouse {
    pub async fn connect(client: Client, params: SessionParams<'_>) -> Result<Self> {
        let base_url = format!("https://{}.snowflakecomputing.com", params.account);
        let login_url = format!(
            "{base_url}/session/v1/login-request\
             ?warehouse={}&databaseName={}&schemaName={}&roleName={}",
            params.warehouse, params.database, params.schema, params.role
        );

        let body = json!({
            "data": {
                "ACCOUNT_NAME": params.account,
                "LOGIN_NAME": params.user,
                "PASSWORD": params.password,
                "CLIENT_APP_ID": env!("CARGO_PKG_NAME"),
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
            }
        });

        let resp: SessionResponse = client
            .post(&login_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .context("snowflake login response was not JSON")?;

        if !resp.success {
            return Err(anyhow!(
                "snowflake login failed: {}",
                resp.message.unwrap_or_else(|| "no message".to_string())
            ));
        }
        let token = resp
            .data
            .ok_or_else(|| anyhow!("snowflake login succeeded without session data"))?
            .token;

        info!(account = params.account, "snowflake session established");
        Ok(SnowflakeWarehouse {
            client,
            base_url,
            session_token: token,
        })
    }
}

#[async_trait]
impl Warehouse for SnowflakeWarehouse {
    async fn execute(&self, stmt: &Statement) -> Result<(), SyncError> {
        let url = format!(
            "{}/queries/v1/query-request?requestId={}",
            self.base_url,
            Uuid::new_v4()
        );
        debug!(kind = stmt.kind.as_str(), "executing statement");

        let outcome = async {
            let resp: QueryResponse = self
                .client
                .post(&url)
                .header(
                    reqwest::header::AUTHORIZATION,
                    format!("Snowflake Token=\"{}\"", self.session_token),
                )
                .json(&QueryRequest { sql_text: &stmt.sql })
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, anyhow::Error>(resp)
        }
        .await
        .map_err(|e| SyncError::Statement {
            kind: stmt.kind.as_str(),
            message: e.to_string(),
        })?;

        if !outcome.success {
            return Err(SyncError::Statement {
                kind: stmt.kind.as_str(),
                message: outcome
                    .message
                    .unwrap_or_else(|| "statement rejected".to_string()),
            });
        }
        Ok(())
    }
}
