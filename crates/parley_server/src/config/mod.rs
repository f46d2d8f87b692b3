#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use serde::Deserialize;
use tracing::info;

/// Default config path: `~/.parley/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".parley").join("config.toml"))
}

/// Load the server config from TOML and env overrides.
#[allow(dead_code)]
pub fn load_server_config() -> anyhow::Result<ServerConfig> {
	let path = default_config_path()?;
	load_server_config_from_path(&path)
}

/// Same as `load_server_config` but with an explicit config path.
pub fn load_server_config_from_path(path: &Path) -> anyhow::Result<ServerConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = ServerConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// Server config (v1).
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSettings,
	pub persistence: PersistenceSettings,
	pub gateway: GatewaySettings,
}

/// Server settings loaded by the server.
#[derive(Debug, Clone)]
pub struct ServerSettings {
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Session inactivity expiry.
	pub session_ttl: Duration,
}

/// Persistence settings loaded by the server.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
	/// Database URL (sqlite:).
	pub database_url: String,
}

/// Realtime gateway settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
	/// Window for credential resolution on a websocket upgrade.
	pub handshake_timeout: Duration,
	/// Maximum number of queued frames per connection.
	pub subscriber_queue_capacity: usize,
	/// Number of messages returned in a `message_history` snapshot.
	pub history_limit: u32,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self::from_file(FileConfig::default())
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	#[serde(default)]
	server: FileServerSettings,

	#[serde(default)]
	persistence: FilePersistenceSettings,

	#[serde(default)]
	gateway: FileGatewaySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileServerSettings {
	metrics_bind: Option<String>,
	session_ttl_minutes: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FilePersistenceSettings {
	database_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileGatewaySettings {
	handshake_timeout_ms: Option<u64>,
	subscriber_queue_capacity: Option<usize>,
	history_limit: Option<u32>,
}

impl ServerConfig {
	fn from_file(file: FileConfig) -> Self {
		Self {
			server: ServerSettings {
				metrics_bind: file.server.metrics_bind.filter(|s| !s.trim().is_empty()),
				session_ttl: Duration::from_secs(file.server.session_ttl_minutes.filter(|v| *v > 0).unwrap_or(60) * 60),
			},
			persistence: PersistenceSettings {
				database_url: file
					.persistence
					.database_url
					.filter(|s| !s.trim().is_empty())
					.unwrap_or_else(|| "sqlite::memory:".to_string()),
			},
			gateway: GatewaySettings {
				handshake_timeout: Duration::from_millis(file.gateway.handshake_timeout_ms.filter(|v| *v > 0).unwrap_or(10_000)),
				subscriber_queue_capacity: file.gateway.subscriber_queue_capacity.filter(|v| *v > 0).unwrap_or(256),
				history_limit: file.gateway.history_limit.filter(|v| *v > 0).unwrap_or(50),
			},
		}
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut ServerConfig) {
	if let Ok(v) = std::env::var("PARLEY_DATABASE_URL") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.persistence.database_url = v;
			info!("persistence: database_url overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLEY_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.server.metrics_bind = Some(v);
			info!("server config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("PARLEY_SESSION_TTL_MINUTES")
		&& let Ok(minutes) = v.trim().parse::<u64>()
		&& minutes > 0
	{
		cfg.server.session_ttl = Duration::from_secs(minutes * 60);
		info!(minutes, "server config: session_ttl overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_HANDSHAKE_TIMEOUT_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
		&& ms > 0
	{
		cfg.gateway.handshake_timeout = Duration::from_millis(ms);
		info!(ms, "gateway config: handshake_timeout overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_SUBSCRIBER_QUEUE_CAPACITY")
		&& let Ok(capacity) = v.trim().parse::<usize>()
		&& capacity > 0
	{
		cfg.gateway.subscriber_queue_capacity = capacity;
		info!(capacity, "gateway config: subscriber_queue_capacity overridden by env");
	}

	if let Ok(v) = std::env::var("PARLEY_HISTORY_LIMIT")
		&& let Ok(limit) = v.trim().parse::<u32>()
		&& limit > 0
	{
		cfg.gateway.history_limit = limit;
		info!(limit, "gateway config: history_limit overridden by env");
	}
}
