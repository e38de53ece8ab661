use anyhow::Result;
use reqwest::Client;
use snowsync::{
    config::Config,
    run::run_once,
    secrets::{EnvSecrets, KeyVaultSecrets, SecretSource},
    store::AzureBlobStore,
    warehouse::{SessionParams, SnowflakeWarehouse},
};
use std::{env, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,snowsync=info"));
    fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) resolve secrets → config ─────────────────────────────────
    let client = Client::new();
    let secrets: Box<dyn SecretSource> = match env::var("KEYVAULT_URL") {
        Ok(vault) => {
            info!(vault = %vault, "using key vault secrets");
            Box::new(KeyVaultSecrets::new(client.clone(), &vault))
        }
        Err(_) => {
            info!("KEYVAULT_URL not set; using environment secrets");
            Box::new(EnvSecrets)
        }
    };
    let cfg = Config::load(secrets.as_ref()).await?;

    // ─── 3) build collaborators ──────────────────────────────────────
    let store = AzureBlobStore::new(
        client.clone(),
        &cfg.storage_url,
        &cfg.container_name,
        &cfg.sas_token,
    )?;
    let warehouse = SnowflakeWarehouse::connect(
        client,
        SessionParams {
            account: &cfg.snowflake_account,
            user: &cfg.snowflake_user,
            password: &cfg.snowflake_password,
            warehouse: &cfg.snowflake_warehouse,
            database: &cfg.snowflake_database,
            schema: &cfg.schema_name,
            role: &cfg.snowflake_role,
        },
    )
    .await?;

    // ─── 4) run once, or on a timer ──────────────────────────────────
    // Runs are awaited back to back, so invocations never overlap.
    match env::var("SYNC_INTERVAL_SECS").ok().and_then(|s| s.parse().ok()) {
        None => {
            run_once(&store, &warehouse, &cfg).await?;
        }
        Some(secs) => {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            info!(interval_secs = secs, "timer loop");
            loop {
                ticker.tick().await;
                if let Err(e) = run_once(&store, &warehouse, &cfg).await {
                    error!(error = %e, "run failed");
                }
            }
        }
    }

    info!("all done");
    Ok(())
}
