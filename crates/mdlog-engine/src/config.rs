use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use mdlog_core::{BoardOptions, Error, DEFAULT_IDEMPOTENCY_TTL_SECS, DEFAULT_LEASE_SECS, DEFAULT_STALE_AFTER_SECS};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub leases: LeaseConfig,
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub idempotency: IdempotencyConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Relative paths resolve against the project root; `~` is expanded.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: ".mdlog/mdlog.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LeaseConfig {
    pub default_seconds: i64,
    pub min_seconds: i64,
    pub max_seconds: i64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            default_seconds: DEFAULT_LEASE_SECS,
            min_seconds: 30,
            max_seconds: 24 * 60 * 60,
        }
    }
}

impl LeaseConfig {
    /// Absolute deadline for a lease of `requested` seconds starting at `now_unix`.
    pub fn deadline(&self, now_unix: i64, requested: Option<i64>) -> Result<i64, Error> {
        let secs = requested.unwrap_or(self.default_seconds);
        if secs < self.min_seconds || secs > self.max_seconds {
            return Err(Error::invalid_request(format!(
                "lease must be between {} and {} seconds",
                self.min_seconds, self.max_seconds
            )));
        }
        Ok(now_unix + secs)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub stale_after_seconds: i64,
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            stale_after_seconds: DEFAULT_STALE_AFTER_SECS,
            default_limit: 50,
            max_limit: 200,
        }
    }
}

impl BoardConfig {
    pub fn options(&self) -> BoardOptions {
        BoardOptions {
            stale_after_secs: self.stale_after_seconds,
            default_limit: self.default_limit,
            max_limit: self.max_limit,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyConfig {
    pub ttl_seconds: i64,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: DEFAULT_IDEMPOTENCY_TTL_SECS,
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| "parse mdlog.toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let l = &self.leases;
        if !(0 < l.min_seconds && l.min_seconds <= l.default_seconds && l.default_seconds <= l.max_seconds) {
            anyhow::bail!("leases: expected 0 < min_seconds <= default_seconds <= max_seconds");
        }
        if self.board.max_limit == 0 || self.board.default_limit == 0 {
            anyhow::bail!("board: limits must be positive");
        }
        if self.idempotency.ttl_seconds <= 0 {
            anyhow::bail!("idempotency: ttl_seconds must be positive");
        }
        Ok(())
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".mdlog").join("mdlog.toml")
    }

    pub fn db_path(&self, root: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.storage.db_path).to_string());
        if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        }
    }
}
