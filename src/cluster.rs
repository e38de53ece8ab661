use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::warn;

/// Scheme marker prepended to every retained key, signalling a
/// storage-resident reference rather than a bare path.
pub const BLOB_SCHEME: &str = "blob://";

/// Two-level map of `database -> table -> latest blob key`.
pub type ClusterMap = BTreeMap<String, BTreeMap<String, String>>;

/// Groups blob keys of the form `database/table/.../filename` and keeps, per
/// (database, table), the key whose filename date token sorts greatest.
///
/// Keys with fewer than three `/` segments cannot be attributed to a table
/// and are skipped. Retained keys come back prefixed with [`BLOB_SCHEME`].
pub fn cluster_latest(keys: &[String]) -> ClusterMap {
    let mut clusters: ClusterMap = BTreeMap::new();

    for key in keys {
        let parts: Vec<&str> = key.split('/').collect();
        if parts.len() < 3 {
            continue;
        }
        let db = parts[0];
        let table = parts[1];

        let slot = clusters
            .entry(db.to_string())
            .or_default()
            .entry(table.to_string());

        match slot {
            Entry::Vacant(v) => {
                v.insert(key.clone());
            }
            Entry::Occupied(mut o) => {
                if replaces(o.get(), key) {
                    o.insert(key.clone());
                }
            }
        }
    }

    for tables in clusters.values_mut() {
        for latest in tables.values_mut() {
            *latest = format!("{BLOB_SCHEME}{latest}");
        }
    }

    clusters
}

/// Whether `candidate` should displace the stored `incumbent`.
///
/// Tokens compare lexicographically; the upstream naming convention
/// (`<table>_<yyyymmdd>_<suffix>.parquet`) keeps that sortable. Strict `>`
/// only, so equal tokens keep the first-seen key. A key without a date token
/// is unordered: it never displaces anything, and any dated key beats it.
fn replaces(incumbent: &str, candidate: &str) -> bool {
    match (date_token(incumbent), date_token(candidate)) {
        (Some(old), Some(new)) => new > old,
        (None, Some(_)) => true,
        _ => false,
    }
}

/// Extracts the date token from a key's filename: last `/` segment, split on
/// `_`, element 1. `None` when the filename has no second `_` field.
pub fn date_token(key: &str) -> Option<&str> {
    let filename = key.rsplit('/').next()?;
    let token = filename.split('_').nth(1);
    if token.is_none() {
        warn!(key, "filename has no date token; treating as unordered");
    }
    token
}
