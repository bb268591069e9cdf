//! Layered node configuration: built-in defaults, an optional TOML file,
//! then environment variable overrides. CLI flags (parsed in the binary)
//! take final priority over everything here.

use std::path::Path;

use config::{Config, File};
use serde::Deserialize;

use crate::error::{Error, Result};

fn default_port() -> u16 {
    8000
}

fn default_store_file() -> String {
    "kv_store.wal".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_store_file")]
    pub store_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self { port: default_port(), store_file: default_store_file() }
    }
}

/// Loads settings from `config_file` (if given) layered over defaults, then
/// applies the `KV_SERVER_PORT` / `KV_STORE_FILE` environment overrides.
pub fn load(config_file: Option<&Path>) -> Result<Settings> {
    let mut builder = Config::builder()
        .set_default("port", default_port() as i64)
        .map_err(|e| Error::Internal(format!("config error: {e}")))?
        .set_default("store_file", default_store_file())
        .map_err(|e| Error::Internal(format!("config error: {e}")))?;
    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.to_path_buf()).required(false));
    }
    let built = builder.build().map_err(|e| Error::Internal(format!("config error: {e}")))?;
    let mut settings: Settings =
        built.try_deserialize().map_err(|e| Error::Internal(format!("config error: {e}")))?;

    if let Ok(port) = std::env::var("KV_SERVER_PORT") {
        settings.port =
            port.parse().map_err(|_| Error::Internal(format!("invalid KV_SERVER_PORT '{port}'")))?;
    }
    if let Ok(store_file) = std::env::var("KV_STORE_FILE") {
        settings.store_file = store_file;
    }
    Ok(settings)
}

/// Rejects peer addresses that aren't plausibly `host:port`.
pub fn validate_peers(peers: &[String]) -> Result<()> {
    for peer in peers {
        let mut parts = peer.splitn(2, ':');
        let host = parts.next().unwrap_or("");
        let port = parts.next();
        if host.is_empty() || port.is_none_or(|p| p.parse::<u16>().is_err()) {
            return Err(Error::Internal(format!("invalid peer address '{peer}', expected host:port")));
        }
    }
    Ok(())
}

/// Derives a node-scoped path by inserting `id` before the file's
/// extension, e.g. `kv_store.wal` + `node1` → `kv_store_node1.wal`.
pub fn node_scoped_path(base: &str, id: &str) -> std::path::PathBuf {
    let path = Path::new(base);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("kv_store");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("wal");
    let filename = format!("{stem}_{id}.{ext}");
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(dir) => dir.join(filename),
        None => std::path::PathBuf::from(filename),
    }
}
