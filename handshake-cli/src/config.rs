use anyhow::Context;
use handshake_pairing::DEFAULT_EXCHANGE_URL;
use std::path::PathBuf;

pub const DB_ENV: &str = "HANDSHAKE_DB";
pub const EXCHANGE_URL_ENV: &str = "HANDSHAKE_EXCHANGE_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub db_path: PathBuf,
    pub exchange_url: String,
}

impl HandshakeConfig {
    /// Command line flags win over the environment, which wins over defaults.
    pub fn resolve(db: Option<PathBuf>, exchange_url: Option<String>) -> anyhow::Result<Self> {
        let db_path = match db.or_else(|| std::env::var_os(DB_ENV).map(PathBuf::from)) {
            Some(p) => p,
            None => default_db_path()?,
        };
        let exchange_url = exchange_url
            .or_else(|| std::env::var(EXCHANGE_URL_ENV).ok())
            .unwrap_or_else(|| DEFAULT_EXCHANGE_URL.to_string());

        Ok(Self {
            db_path,
            exchange_url: exchange_url.trim_end_matches('/').to_string(),
        })
    }
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let data_dir = dirs_next::data_dir().context("no data directory for this platform")?;
    Ok(data_dir.join("triple-handshake").join("handshake.db"))
}
