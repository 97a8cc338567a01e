//! Server configuration.
//!
//! Sources, lowest precedence first: built-in defaults, a TOML file,
//! environment variables, then command-line flags (applied by the binary).

use std::path::{Path, PathBuf};

use beebo_llm::LlmConfig;
use beebo_memory::{EmbeddingConfig, FeedConfig, MemoryConfig};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub summary: SummaryConfig,

    #[serde(default)]
    pub stream: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret for every route except /ping, /version and /healthz
    #[serde(default, skip_serializing)]
    pub token: Option<String>,

    /// Allowed CORS origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            token: None,
            cors_origins: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Digest generation for stream subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryConfig {
    /// Digests are only attempted when enabled and an API key resolves
    #[serde(default = "default_summary_enabled")]
    pub enabled: bool,

    #[serde(default = "default_summary_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub llm: LlmConfig,
}

fn default_summary_enabled() -> bool {
    true
}

fn default_summary_max_tokens() -> u32 {
    200
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            enabled: default_summary_enabled(),
            max_tokens: default_summary_max_tokens(),
            llm: LlmConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix the file is rejected if it is world-writable, or world-readable
    /// while holding a secret.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        validate_config_file_permissions(path)?;

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;

        if config.summary.llm.api_key.is_some() || config.embedding.api_key.is_some() {
            warn!(
                "API key found in config file '{}'. Prefer the OPENAI_API_KEY environment variable.",
                path.display()
            );
        }

        Ok(config)
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides from `lookup`. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("BEEBO_TOKEN").or_else(|| get("MCP_BRIDGE_TOKEN")) {
            self.server.token = Some(token);
        }
        if let Some(path) = get("BEEBO_DB_PATH") {
            self.memory.db_path = PathBuf::from(path);
        }
        if let Some(bind) = get("BEEBO_BIND_ADDR") {
            self.server.bind = bind;
        }
        if let Some(port) = get("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!(value = %port, "Ignoring invalid PORT"),
            }
        }
        if let Some(tz) = get("BEEBO_TIMEZONE") {
            self.memory.timezone = tz;
        }
        if let Some(origins) = get("BEEBO_CORS_ORIGINS") {
            self.server.cors_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.summary.llm.api_key.get_or_insert_with(|| key.clone());
            self.embedding.api_key.get_or_insert(key);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.memory.validate()?;
        if self.server.max_body_bytes == 0 {
            anyhow::bail!("server.max_body_bytes must be positive");
        }
        if self.server.token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            anyhow::bail!("server.token must not be blank");
        }
        Ok(())
    }
}

#[cfg(unix)]
fn validate_config_file_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::metadata(path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;

    if !metadata.is_file() {
        anyhow::bail!("Config path '{}' is not a regular file.", path.display());
    }

    let permission_bits = metadata.permissions().mode() & 0o777;

    if permission_bits & 0o002 != 0 {
        anyhow::bail!(
            "Config file '{}' is world-writable (mode {:04o}). Fix with: chmod o-w {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    let content = std::fs::read_to_string(path).unwrap_or_default();
    let has_secret = content.lines().any(|line| {
        let line = line.trim_start();
        line.starts_with("api_key") || line.starts_with("token")
    });

    if has_secret && permission_bits & 0o004 != 0 {
        anyhow::bail!(
            "Config file '{}' contains a secret but is world-readable (mode {:04o}). Fix with: chmod 600 {}",
            path.display(),
            permission_bits,
            path.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use beebo_memory::DedupPolicy;
    use std::collections::HashMap;

    #[test]
    fn defaults_from_empty_toml() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert!(config.server.token.is_none());
        assert_eq!(config.memory.dedup_policy, DedupPolicy::Upsert);
        assert_eq!(config.stream.default_limit, 50);
        assert_eq!(config.summary.llm.model, "gpt-4.1");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_sections() {
        let config: ServerConfig = toml::from_str(
            r#"
            [server]
            port = 9000
            token = "s3cret"

            [memory]
            db_path = "/var/lib/beebo/memories.db"
            dedup_policy = "reject"
            semantic_threshold = 0.85
            timezone = "Europe/Berlin"

            [embedding]
            provider = "none"

            [stream]
            interval_ms = 5000
            resummarize_on_change = true
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.token.as_deref(), Some("s3cret"));
        assert_eq!(config.memory.dedup_policy, DedupPolicy::Reject);
        assert_eq!(config.memory.timezone, "Europe/Berlin");
        assert_eq!(config.embedding.provider, "none");
        assert!(config.stream.resummarize_on_change);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MCP_BRIDGE_TOKEN", "legacy"),
            ("PORT", "10000"),
            ("BEEBO_DB_PATH", "/tmp/beebo.db"),
            ("BEEBO_TIMEZONE", "America/New_York"),
            ("OPENAI_API_KEY", "sk-test"),
            ("BEEBO_BIND_ADDR", ""),
        ]);
        let mut config = ServerConfig::default();
        config.apply_env_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.server.token.as_deref(), Some("legacy"));
        assert_eq!(config.server.port, 10000);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.memory.db_path, PathBuf::from("/tmp/beebo.db"));
        assert_eq!(config.memory.timezone, "America/New_York");
        assert_eq!(config.summary.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.embedding.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn beebo_token_wins_over_legacy_name() {
        let mut config = ServerConfig::default();
        config.apply_env_from(|k| match k {
            "BEEBO_TOKEN" => Some("primary".into()),
            "MCP_BRIDGE_TOKEN" => Some("legacy".into()),
            _ => None,
        });
        assert_eq!(config.server.token.as_deref(), Some("primary"));
    }

    #[test]
    fn invalid_port_is_ignored() {
        let mut config = ServerConfig::default();
        config.apply_env_from(|k| (k == "PORT").then(|| "eighty".to_string()));
        assert_eq!(config.server.port, 3000);
    }

    #[cfg(unix)]
    #[test]
    fn rejects_world_writable_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("beebo.toml");
        std::fs::write(&path, "[server]\nport = 3001\n").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o666)).unwrap();
        assert!(ServerConfig::from_file(&path).is_err());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert_eq!(ServerConfig::from_file(&path).unwrap().server.port, 3001);
    }

    #[cfg(unix)]
    #[test]
    fn rejects_world_readable_secret() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("beebo.toml");
        std::fs::write(&path, "[server]\ntoken = \"hunter2\"\n").unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(ServerConfig::from_file(&path).is_err());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(ServerConfig::from_file(&path).is_ok());
    }
}
