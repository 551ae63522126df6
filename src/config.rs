use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

const CONFIG_FILE: &str = "threadview.toml";
const DATABASE_URL_ENV: &str = "THREADVIEW_DATABASE_URL";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub log_level: String,
    pub render: RenderOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Spaces per reply level.
    pub indent: usize,
    pub show_content: bool,
    pub date_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite:threadview.db?mode=rwc".to_string(),
            log_level: "info".to_string(),
            render: RenderOptions::default(),
        }
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            indent: 2,
            show_content: true,
            date_format: "%Y-%m-%d %H:%M".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let mut config = Self::load_from(CONFIG_FILE);
        if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
            config.database_url = url;
        }
        config
    }

    /// Reads a config file, falling back to defaults when it is missing or invalid.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        use std::fs;
        let path = path.as_ref();
        let config = match fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<Config>(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        };
        config.validated()
    }

    /// Replaces settings that would fail later with their defaults.
    pub fn validated(mut self) -> Self {
        if !is_valid_date_format(&self.render.date_format) {
            let fallback = RenderOptions::default().date_format;
            warn!(
                date_format = %self.render.date_format,
                fallback = %fallback,
                "invalid render.date_format, using default"
            );
            self.render.date_format = fallback;
        }
        self
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}

fn is_valid_date_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}
