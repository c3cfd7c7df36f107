use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "tibiadex/0.2";
pub const DEFAULT_WIKI_URL: &str = "https://tibia.fandom.com";
pub const DEFAULT_STATIC_URL: &str = "https://static.tibia.com";
pub const DEFAULT_CHARACTER_MIRROR: &str =
    "https://www.tibia.com/community/?subtopic=characters&name={name}";
pub const DEFAULT_DETAIL_DELAY_MS: u64 = 500;
pub const DEFAULT_PAGE_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_IMAGE_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct TibiadexConfig {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub scrape: ScrapeSection,
    #[serde(default)]
    pub character: CharacterSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub url: Option<String>,
    pub static_url: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ScrapeSection {
    pub detail_delay_ms: Option<u64>,
    pub page_timeout_ms: Option<u64>,
    pub image_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CharacterSection {
    /// URL templates with a `{name}` query value, e.g. `?name={name}`.
    #[serde(default)]
    pub mirrors: Vec<String>,
}

/// Fully resolved settings: env > config > default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub wiki_url: String,
    pub static_url: String,
    pub user_agent: String,
    pub detail_delay_ms: u64,
    pub page_timeout_ms: u64,
    pub image_timeout_ms: u64,
    pub character_mirrors: Vec<String>,
}

impl TibiadexConfig {
    pub fn settings(&self) -> Settings {
        self.settings_with_lookup(|key| env::var(key).ok())
    }

    pub fn settings_with_lookup<F>(&self, lookup_env: F) -> Settings
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, configured: Option<&String>, default: &str| -> String {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .or_else(|| configured.cloned())
                .unwrap_or_else(|| default.to_string())
        };
        let millis = |key: &str, configured: Option<u64>, default: u64| -> u64 {
            lookup_env(key)
                .and_then(|value| value.trim().parse::<u64>().ok())
                .or(configured)
                .unwrap_or(default)
        };

        let character_mirrors = match lookup_env("TIBIADEX_CHARACTER_MIRRORS") {
            Some(value) if !value.trim().is_empty() => value
                .split(',')
                .map(|mirror| mirror.trim().to_string())
                .filter(|mirror| !mirror.is_empty())
                .collect(),
            _ if !self.character.mirrors.is_empty() => self.character.mirrors.clone(),
            _ => vec![DEFAULT_CHARACTER_MIRROR.to_string()],
        };

        Settings {
            wiki_url: text("TIBIADEX_WIKI_URL", self.wiki.url.as_ref(), DEFAULT_WIKI_URL)
                .trim_end_matches('/')
                .to_string(),
            static_url: text(
                "TIBIADEX_STATIC_URL",
                self.wiki.static_url.as_ref(),
                DEFAULT_STATIC_URL,
            )
            .trim_end_matches('/')
            .to_string(),
            user_agent: text(
                "TIBIADEX_USER_AGENT",
                self.wiki.user_agent.as_ref(),
                DEFAULT_USER_AGENT,
            ),
            detail_delay_ms: millis(
                "TIBIADEX_DETAIL_DELAY_MS",
                self.scrape.detail_delay_ms,
                DEFAULT_DETAIL_DELAY_MS,
            ),
            page_timeout_ms: millis(
                "TIBIADEX_PAGE_TIMEOUT_MS",
                self.scrape.page_timeout_ms,
                DEFAULT_PAGE_TIMEOUT_MS,
            ),
            image_timeout_ms: millis(
                "TIBIADEX_IMAGE_TIMEOUT_MS",
                self.scrape.image_timeout_ms,
                DEFAULT_IMAGE_TIMEOUT_MS,
            ),
            character_mirrors,
        }
    }
}

/// Load and parse the config file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<TibiadexConfig> {
    if !config_path.exists() {
        return Ok(TibiadexConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: TibiadexConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, TibiadexConfig::default());
    }

    #[test]
    fn load_config_parses_all_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[wiki]
url = "https://wiki.example.org/"
user_agent = "test-agent/1.0"

[scrape]
detail_delay_ms = 0
image_timeout_ms = 2500

[character]
mirrors = ["https://mirror.example.org/char?name={name}"]
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        let settings = config.settings_with_lookup(|_| None);
        assert_eq!(settings.wiki_url, "https://wiki.example.org");
        assert_eq!(settings.static_url, DEFAULT_STATIC_URL);
        assert_eq!(settings.user_agent, "test-agent/1.0");
        assert_eq!(settings.detail_delay_ms, 0);
        assert_eq!(settings.page_timeout_ms, DEFAULT_PAGE_TIMEOUT_MS);
        assert_eq!(settings.image_timeout_ms, 2500);
        assert_eq!(
            settings.character_mirrors,
            vec!["https://mirror.example.org/char?name={name}".to_string()]
        );
    }

    #[test]
    fn load_config_tolerates_partial_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[paths]\nproject_root = \"/foo\"\n").expect("write config");

        let config = load_config(&config_path).expect("load config");
        assert!(config.wiki.url.is_none());
        assert!(config.character.mirrors.is_empty());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[wiki\nurl = \"oops\"").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }

    #[test]
    fn env_overrides_config_and_defaults() {
        let config = TibiadexConfig {
            wiki: WikiSection {
                user_agent: Some("from-config".to_string()),
                ..WikiSection::default()
            },
            scrape: ScrapeSection {
                detail_delay_ms: Some(900),
                ..ScrapeSection::default()
            },
            ..TibiadexConfig::default()
        };
        let env = HashMap::from([
            ("TIBIADEX_USER_AGENT".to_string(), "from-env".to_string()),
            ("TIBIADEX_DETAIL_DELAY_MS".to_string(), "not-a-number".to_string()),
            (
                "TIBIADEX_CHARACTER_MIRRORS".to_string(),
                "https://a/?n={name}, https://b/?n={name}".to_string(),
            ),
        ]);

        let settings = config.settings_with_lookup(|key| env.get(key).cloned());
        assert_eq!(settings.user_agent, "from-env");
        assert_eq!(settings.detail_delay_ms, 900);
        assert_eq!(settings.wiki_url, DEFAULT_WIKI_URL);
        assert_eq!(settings.character_mirrors.len(), 2);
    }

    #[test]
    fn defaults_include_official_character_page() {
        let settings = TibiadexConfig::default().settings_with_lookup(|_| None);
        assert_eq!(settings.detail_delay_ms, DEFAULT_DETAIL_DELAY_MS);
        assert_eq!(
            settings.character_mirrors,
            vec![DEFAULT_CHARACTER_MIRROR.to_string()]
        );
    }
}
