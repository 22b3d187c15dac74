use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use dojo_client::SupabaseConfig;
use dojo_core::time::parse_timezone;

use crate::state::ensure_dojo_home;

pub const URL_ENV: &str = "DOJO_SUPABASE_URL";
pub const ANON_KEY_ENV: &str = "DOJO_SUPABASE_ANON_KEY";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendSection,
    pub display: DisplaySection,
    pub session: SessionSection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    /// Project URL of the hosted backend.
    pub url: String,
    pub anon_key: String,
    /// Where the OAuth provider sends the browser back to.
    pub redirect_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySection {
    /// IANA name; kata times are read and shown in this zone.
    pub timezone: String,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub init_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            init_timeout_secs: 5,
        }
    }
}

impl Config {
    pub fn timezone(&self) -> Result<Tz> {
        parse_timezone(&self.display.timezone).context("[display] timezone")
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.session.init_timeout_secs)
    }

    pub fn backend_configured(&self) -> bool {
        !self.backend.url.trim().is_empty() && !self.backend.anon_key.trim().is_empty()
    }

    pub fn supabase(&self) -> SupabaseConfig {
        SupabaseConfig::new(self.backend.url.trim(), self.backend.anon_key.trim())
    }

    /// Environment wins over the file for backend coordinates.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.backend.url = url;
        }
        if let Some(key) = lookup(ANON_KEY_ENV).filter(|v| !v.trim().is_empty()) {
            self.backend.anon_key = key;
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_dojo_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let p = config_path()?;
    let mut cfg = if p.exists() {
        let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
        toml::from_str(&s).with_context(|| format!("parse {}", p.display()))?
    } else {
        Config::default()
    };
    cfg.apply_env(|name| std::env::var(name).ok());
    Ok(cfg)
}

pub fn save_config(cfg: &Config) -> Result<()> {
    let p = config_path()?;
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config(&Config::default())?;
    println!("Wrote {}", p.display());
    println!("Fill in [backend] url and anon_key, or set {URL_ENV} / {ANON_KEY_ENV}.");
    Ok(())
}

pub fn show_config() -> Result<()> {
    let mut cfg = load_config()?;
    if !cfg.backend.anon_key.is_empty() {
        cfg.backend.anon_key = mask(&cfg.backend.anon_key);
    }
    println!("# {}", config_path()?.display());
    print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
    Ok(())
}

fn mask(secret: &str) -> String {
    let head: String = secret.chars().take(6).collect();
    format!("{head}…")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [backend]
            url = "https://abcd.supabase.co"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend.url, "https://abcd.supabase.co");
        assert_eq!(cfg.display.timezone, "UTC");
        assert_eq!(cfg.init_timeout(), Duration::from_secs(5));
        assert!(!cfg.backend_configured());
    }

    #[test]
    fn env_overrides_file() {
        let mut cfg = Config::default();
        cfg.backend.url = "https://file.example".to_string();
        cfg.apply_env(|name| match name {
            URL_ENV => Some("https://env.example".to_string()),
            ANON_KEY_ENV => Some("anon".to_string()),
            _ => None,
        });
        assert_eq!(cfg.backend.url, "https://env.example");
        assert!(cfg.backend_configured());
    }

    #[test]
    fn blank_env_is_ignored() {
        let mut cfg = Config::default();
        cfg.backend.url = "https://file.example".to_string();
        cfg.apply_env(|_| Some("  ".to_string()));
        assert_eq!(cfg.backend.url, "https://file.example");
    }

    #[test]
    fn bad_timezone_is_reported() {
        let mut cfg = Config::default();
        cfg.display.timezone = "Mars/Olympus".to_string();
        assert!(cfg.timezone().is_err());
        cfg.display.timezone = "Asia/Tokyo".to_string();
        assert_eq!(cfg.timezone().unwrap(), chrono_tz::Asia::Tokyo);
    }

    #[test]
    fn secrets_are_masked() {
        assert_eq!(mask("eyJhbGciOiJIUzI1NiJ9"), "eyJhbG…");
    }
}
