//! Config file parsing for `~/.config/booksearch/config.toml`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const APP_DIR: &str = "booksearch";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sites: SitesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_true")]
    pub strict_isbn: bool,
    #[serde(default = "default_true")]
    pub fetch_front_cover: bool,
    #[serde(default)]
    pub fetch_back_cover: bool,
    pub covers_dir: Option<String>,
    #[serde(default = "default_connectivity_url")]
    pub connectivity_url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
fn default_connectivity_url() -> String {
    "https://www.example.com/".to_string()
}
fn default_connect_timeout() -> u64 {
    5
}

/// Upper bound applied to `connect_timeout_secs`.
pub const MAX_CONNECT_TIMEOUT_SECS: u64 = 300;

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strict_isbn: true,
            fetch_front_cover: true,
            fetch_back_cover: false,
            covers_dir: None,
            connectivity_url: default_connectivity_url(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl SearchConfig {
    /// Clamped to [`MAX_CONNECT_TIMEOUT_SECS`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.min(MAX_CONNECT_TIMEOUT_SECS))
    }

    /// Where downloaded cover candidates are written.
    pub fn covers_dir(&self) -> PathBuf {
        match &self.covers_dir {
            Some(dir) => PathBuf::from(dir),
            None => dirs::cache_dir()
                .map(|p| p.join(APP_DIR).join("covers"))
                .unwrap_or_else(|| std::env::temp_dir().join(APP_DIR).join("covers")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SitesConfig {
    pub state_file: Option<String>,
}

impl SitesConfig {
    /// File holding per-site enablement and order.
    pub fn state_path(&self) -> Option<PathBuf> {
        match &self.state_file {
            Some(p) => Some(PathBuf::from(p)),
            None => app_config_dir().map(|p| p.join("sites.toml")),
        }
    }
}

fn app_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_DIR))
}

/// Load config from the default path (`~/.config/booksearch/config.toml`).
pub fn load_config() -> AppConfig {
    let path = match config_path() {
        Some(p) => p,
        None => return AppConfig::default(),
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(_) => return AppConfig::default(),
    };

    match toml::from_str::<AppConfig>(&content) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("Ignoring malformed config {}: {}", path.display(), e);
            AppConfig::default()
        }
    }
}

/// Return the default config file path (for init and show).
pub fn config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let cfg: AppConfig = toml::from_str("").unwrap();
        assert!(cfg.search.strict_isbn);
        assert!(cfg.search.fetch_front_cover);
        assert!(!cfg.search.fetch_back_cover);
        assert_eq!(cfg.search.connect_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn huge_timeout_is_clamped() {
        let cfg: AppConfig = toml::from_str("[search]\nconnect_timeout_secs = 9223372036854775807\n").unwrap();
        assert_eq!(
            cfg.search.connect_timeout(),
            Duration::from_secs(MAX_CONNECT_TIMEOUT_SECS)
        );
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: AppConfig = toml::from_str("[search]\nstrict_isbn = false\ncovers_dir = \"/tmp/c\"\n").unwrap();
        assert!(!cfg.search.strict_isbn);
        assert!(cfg.search.fetch_front_cover);
        assert_eq!(cfg.search.covers_dir(), PathBuf::from("/tmp/c"));
    }

    #[test]
    fn explicit_state_file_wins() {
        let sites = SitesConfig {
            state_file: Some("/tmp/sites.toml".to_string()),
        };
        assert_eq!(sites.state_path(), Some(PathBuf::from("/tmp/sites.toml")));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = AppConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.search.connectivity_url, cfg.search.connectivity_url);
    }
}
