use anyhow::Result;

use crate::secrets::SecretSource;

/// Everything one run needs, resolved up front from the secret source.
#[derive(Debug, Clone)]
pub struct Config {
    pub snowflake_account: String,
    pub snowflake_user: String,
    pub snowflake_password: String,
    pub snowflake_database: String,
    pub schema_name: String,
    pub stage_name: String,
    pub container_name: String,
    pub snowflake_role: String,
    pub snowflake_warehouse: String,
    pub storage_url: String,
    pub sas_token: String,
    pub connection_string: String,
}

impl Config {
    /// Resolves the run configuration. Secret names match the vault entries
    /// the deployment already provisions.
    pub async fn load(secrets: &dyn SecretSource) -> Result<Self> {
        Ok(Config {
            snowflake_account: secrets.get_secret("snowflakeaccountname").await?,
            snowflake_user: secrets.get_secret("snowflakeusername").await?,
            snowflake_password: secrets.get_secret("snowflakepassword").await?,
            snowflake_database: secrets.get_secret("snowflakedatabase").await?,
            schema_name: secrets.get_secret("schemaname").await?,
            stage_name: secrets.get_secret("stagename").await?,
            container_name: secrets.get_secret("containername").await?,
            snowflake_role: secrets.get_secret("snowflakerole").await?,
            snowflake_warehouse: secrets.get_secret("snowflakewarehouse").await?,
            storage_url: secrets.get_secret("azureblobstorageurl").await?,
            sas_token: secrets.get_secret("azuresastoken").await?,
            connection_string: secrets.get_secret("blobconnectionstring").await?,
        })
    }
}
