pub mod cluster;
pub mod config;
pub mod error;
pub mod plan;
pub mod run;
pub mod schema;
pub mod secrets;
pub mod store;
pub mod warehouse;

pub use cluster::cluster_latest;
pub use config::Config;
pub use error::SyncError;
pub use schema::{infer_columns, Column};
