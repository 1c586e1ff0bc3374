use anyhow::Result;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:5001".into(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared with the CRUD backend that issues the tokens.
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: generate_random_hex(64),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Base URL of the conversation store's internal REST surface. Empty
    /// means the in-memory dev store.
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub service_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Origin-server identifier stamped on every published envelope. Empty
    /// means a random id per process start.
    #[serde(default)]
    pub instance_id: String,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let mut config = if std::path::Path::new(path).exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!("Config file not found at '{}', generating defaults...", path);
            let config = Config::default();
            if let Some(parent) = std::path::Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, toml::to_string_pretty(&config)?)?;
            let _ = harden_secret_file_permissions(path);
            tracing::info!("Generated default config at '{}'", path);
            config
        };

        // Environment variable overrides
        if let Ok(value) = std::env::var("PAWLINK_BIND_ADDRESS") {
            config.server.bind_address = value;
        }
        if let Ok(value) = std::env::var("PAWLINK_JWT_SECRET") {
            config.auth.jwt_secret = value;
        }
        if let Ok(value) = std::env::var("PAWLINK_STORE_URL") {
            config.store.base_url = value;
        }
        if let Ok(value) = std::env::var("PAWLINK_STORE_TOKEN") {
            config.store.service_token = Some(value);
        }
        if let Ok(value) = std::env::var("PAWLINK_INSTANCE_ID") {
            config.broker.instance_id = value;
        }

        if config.auth.jwt_secret.is_empty() {
            anyhow::bail!("auth.jwt_secret must not be empty");
        }
        Ok(config)
    }
}

fn generate_random_hex(len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

fn harden_secret_file_permissions(path: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
