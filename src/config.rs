use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fs;
use std::path::PathBuf;

use crate::cache::DEFAULT_HEADER_SIZE;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub github: GithubConfig,
    pub card: CardConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GithubConfig {
    /// Login of the tracked account.
    pub username: String,
    /// Fallback token; the ACCESS_TOKEN / GITHUB_TOKEN environment
    /// variables take precedence so the file can stay secret-free.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CardConfig {
    /// Account birthday for the age line; omit to leave the age element
    /// untouched.
    #[serde(default)]
    pub birthday: Option<NaiveDate>,
    /// SVG templates rewritten in place on every run.
    pub templates: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    pub directory: PathBuf,
    /// Passthrough comment lines at the top of the cache file.
    pub header_size: usize,
    /// Static archive of contributions to deleted repositories; merged only
    /// when the file exists.
    #[serde(default)]
    pub archive: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            github: GithubConfig {
                username: "".to_string(),
                token: None,
            },
            card: CardConfig {
                birthday: None,
                templates: vec![
                    PathBuf::from("dark_mode.svg"),
                    PathBuf::from("light_mode.svg"),
                ],
            },
            cache: CacheConfig {
                directory: PathBuf::from("cache"),
                header_size: DEFAULT_HEADER_SIZE,
                archive: Some(PathBuf::from("cache/repository_archive.txt")),
            },
        }
    }
}

thread_local! {
    static TEST_CONFIG_PATH: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

#[cfg(test)]
pub fn set_test_config_path(path: PathBuf) {
    TEST_CONFIG_PATH.with(|p| *p.borrow_mut() = Some(path));
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        #[cfg(test)]
        {
            if let Some(path) = TEST_CONFIG_PATH.with(|p| p.borrow().clone()) {
                return Ok(path);
            }
        }

        Ok(dirs::home_dir()
            .context("Could not find home directory")?
            .join(".octocard.toml"))
    }

    pub fn load() -> Result<Option<Config>> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Some(config))
    }

    pub fn save(&self, silent: bool) -> Result<()> {
        let config_path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, content).context("Failed to write config file")?;

        if !silent {
            println!("✅ Configuration saved to: {}", config_path.display());
        }

        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.github.username.is_empty()
    }

    /// Environment first so the config file can be committed without a
    /// secret in it.
    pub fn resolve_token(&self) -> Result<String> {
        for var in ["ACCESS_TOKEN", "GITHUB_TOKEN"] {
            if let Ok(token) = std::env::var(var) {
                if !token.is_empty() {
                    return Ok(token);
                }
            }
        }
        self.github
            .token
            .clone()
            .filter(|token| !token.is_empty())
            .context("No GitHub token found. Set ACCESS_TOKEN (or GITHUB_TOKEN), or `octocard config set token ...`")
    }
}

// CLI helper functions
pub fn create_default_config(overwrite: bool) -> Result<()> {
    let config = Config::default();
    if !std::fs::exists(Config::config_path()?)? || overwrite {
        config.save(true)?;

        println!("📝 Created default configuration file.");
        println!("📍 Set your GitHub username:");
        println!("   octocard config set username ...");
        println!("and export ACCESS_TOKEN with a fine-grained personal access token.");
    } else {
        println!("Configuration already exists.  Pass `--overwrite` to overwrite.");
    }

    Ok(())
}

pub fn show_config() -> Result<()> {
    match Config::load()? {
        Some(config) => {
            println!("🔧 Current configuration:");
            println!(
                "   Username: {}",
                if config.github.username.is_empty() {
                    "Not set"
                } else {
                    &config.github.username
                }
            );
            println!(
                "   Token: {}",
                if config.resolve_token().is_ok() {
                    "Set"
                } else {
                    "Not set"
                }
            );
            println!(
                "   Birthday: {}",
                config
                    .card
                    .birthday
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "Not set".to_string())
            );
            println!("   Templates: {}", config.card.templates.len());
            println!("   Cache directory: {}", config.cache.directory.display());
            println!("   Header size: {}", config.cache.header_size);
            println!(
                "   Archive: {}",
                config
                    .cache
                    .archive
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "Disabled".to_string())
            );
        }
        None => {
            println!("❌ No configuration file found.");
            println!("   Run 'octocard config init' to create one.");
        }
    }
    Ok(())
}

pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let mut config = Config::load()?.unwrap_or_default();

    match key {
        "username" => config.github.username = value.to_string(),
        "token" => config.github.token = Some(value.to_string()),
        "birthday" => {
            let date = value
                .parse::<NaiveDate>()
                .context("Invalid date. Use YYYY-MM-DD")?;
            config.card.birthday = Some(date);
        }
        "cache-dir" => config.cache.directory = PathBuf::from(value),
        "header-size" => {
            let size = value.parse::<usize>().context("Invalid number value")?;
            config.cache.header_size = size;
        }
        "archive" => {
            config.cache.archive = if value.is_empty() {
                None
            } else {
                Some(PathBuf::from(value))
            };
        }
        _ => anyhow::bail!("Unknown config key: {}", key),
    }

    config.save(false)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup_test_config() -> (TempDir, PathBuf) {
        let dir = TempDir::new().expect("tempdir");
        let config_path = dir.path().join(".octocard.toml");
        set_test_config_path(config_path.clone());
        (dir, config_path)
    }

    #[test]
    fn default_config_round_trip() {
        let (_dir, _path) = setup_test_config();
        create_default_config(true).expect("create_default_config");

        let loaded = Config::load()
            .expect("load config")
            .expect("config should exist");

        assert_eq!(loaded.github.username, "");
        assert_eq!(loaded.github.token, None);
        assert_eq!(loaded.card.birthday, None);
        assert_eq!(loaded.card.templates.len(), 2);
        assert_eq!(loaded.cache.header_size, DEFAULT_HEADER_SIZE);
        assert!(!loaded.is_configured());
    }

    #[test]
    fn set_config_value_behaviour() {
        let (_dir, _path) = setup_test_config();
        create_default_config(true).expect("create_default_config");

        set_config_value("username", "octocat").expect("set username");
        set_config_value("token", "TEST_TOKEN").expect("set token");
        set_config_value("birthday", "2020-08-25").expect("set birthday");
        set_config_value("cache-dir", "/tmp/octocard-cache").expect("set cache-dir");
        set_config_value("header-size", "9").expect("set header-size");
        set_config_value("archive", "").expect("clear archive");

        let cfg = Config::load()
            .expect("load config")
            .expect("config should exist");

        assert_eq!(cfg.github.username, "octocat");
        assert_eq!(cfg.github.token.as_deref(), Some("TEST_TOKEN"));
        assert_eq!(
            cfg.card.birthday,
            NaiveDate::from_ymd_opt(2020, 8, 25)
        );
        assert_eq!(cfg.cache.directory, PathBuf::from("/tmp/octocard-cache"));
        assert_eq!(cfg.cache.header_size, 9);
        assert_eq!(cfg.cache.archive, None);
        assert!(cfg.is_configured());

        let err = set_config_value("unknown-key", "value").unwrap_err();
        let msg = format!("{err}");
        assert!(
            msg.contains("Unknown config key"),
            "unexpected error message: {msg}"
        );
        let err = set_config_value("birthday", "not-a-date").unwrap_err();
        let msg = format!("{err}");
        assert!(
            msg.contains("Invalid date"),
            "unexpected error message: {msg}"
        );
    }

    #[test]
    fn token_resolution_prefers_environment() {
        let (_dir, _path) = setup_test_config();

        let mut config = Config::default();
        config.github.token = Some("FILE_TOKEN".to_string());

        // Setting environment variables is unsafe in Rust 2024.
        unsafe {
            std::env::set_var("ACCESS_TOKEN", "ENV_TOKEN");
        }
        assert_eq!(config.resolve_token().expect("token"), "ENV_TOKEN");

        unsafe {
            std::env::remove_var("ACCESS_TOKEN");
            std::env::remove_var("GITHUB_TOKEN");
        }
        assert_eq!(config.resolve_token().expect("token"), "FILE_TOKEN");

        config.github.token = None;
        assert!(config.resolve_token().is_err());
    }
}
