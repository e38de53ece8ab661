use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

/// Where run credentials come from. The job itself never persists a secret;
/// everything is resolved fresh at startup.
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<String>;
}

/// Secrets from environment variables, keyed by the uppercased secret name.
/// Used for local runs and tests.
pub struct EnvSecrets;

#[async_trait]
impl SecretSource for EnvSecrets {
    async fn get_secret(&self, name: &str) -> Result<String> {
        std::env::var(name.to_ascii_uppercase())
            .with_context(|| format!("secret `{name}` not set in environment"))
    }
}

const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token\
                              ?api-version=2018-02-01&resource=https://vault.azure.net";

/// Azure Key Vault, authorized by the VM/function managed identity via IMDS.
pub struct KeyVaultSecrets {
    client: Client,
    vault_url: String,
    token: OnceCell<String>,
}

#[derive(Deserialize)]
struct ImdsToken {
    access_token: String,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
}

impl KeyVaultSecrets {
    pub fn new(client: Client, vault_url: &str) -> Self {
        KeyVaultSecrets {
            client,
            vault_url: vault_url.trim_end_matches('/').to_string(),
            token: OnceCell::new(),
        }
    }

    async fn bearer_token(&self) -> Result<&str> {
        self.token
            .get_or_try_init(|| async {
                debug!("requesting managed identity token from IMDS");
                let token: ImdsToken = self
                    .client
                    .get(IMDS_TOKEN_URL)
                    .header("Metadata", "true")
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                Ok::<_, anyhow::Error>(token.access_token)
            })
            .await
            .map(String::as_str)
            .context("managed identity token request failed")
    }
}

#[async_trait]
impl SecretSource for KeyVaultSecrets {
    async fn get_secret(&self, name: &str) -> Result<String> {
        let token = self.bearer_token().await?;
        let url = format!("{}/secrets/{}?api-version=7.4", self.vault_url, name);
        let bundle: SecretBundle = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
            .with_context(|| format!("fetching secret `{name}` from key vault"))?;
        Ok(bundle.value)
    }
}
