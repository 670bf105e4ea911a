use anyhow::{Context, Result};
use directories::ProjectDirs;
use kairos_ipc::DEFAULT_SOCKET_PATH;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub socket_path: PathBuf,
    pub data_dir: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub notifications: bool,
    pub log_level: String,
    pub ai: AiConfig,
    pub engine: EngineConfig,
    pub sessions: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AiConfig {
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_timeout_secs: u64,
    pub simulated_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub reminder_at_secs: u64,
    pub engagement_offset_secs: u64,
    pub engagement_delay_secs: u64,
    pub clarify_threshold_chars: usize,
}

/// What to do with a completed work period when no session is active.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    AutoCreate,
    Reject,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    pub orphan_policy: OrphanPolicy,
    pub export_success_clear_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            data_dir: None,
            export_dir: None,
            notifications: true,
            log_level: "info".to_string(),
            ai: AiConfig::default(),
            engine: EngineConfig::default(),
            sessions: SessionConfig::default(),
        }
    }
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: "KAIROS_API_KEY".to_string(),
            api_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 300,
            temperature: 0.7,
            request_timeout_secs: 20,
            simulated_delay_ms: 800,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reminder_at_secs: 120,
            engagement_offset_secs: 30,
            engagement_delay_secs: 5,
            clarify_threshold_chars: 10,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            orphan_policy: OrphanPolicy::AutoCreate,
            export_success_clear_secs: 3,
        }
    }
}

impl AiConfig {
    /// The configured key, else the one in `api_key_env`. Blank keys count as absent.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|key| !key.trim().is_empty())
    }
}

impl Config {
    pub fn data_dir(&self) -> Option<PathBuf> {
        self.data_dir.clone().or_else(|| {
            ProjectDirs::from("com", "pabloagn", "Kairos").map(|d| d.data_dir().to_path_buf())
        })
    }

    pub fn export_dir(&self) -> Option<PathBuf> {
        self.export_dir
            .clone()
            .or_else(|| self.data_dir().map(|dir| dir.join("exports")))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("com", "pabloagn", "Kairos").map(|d| d.config_dir().join("kairos.toml"))
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => path,
        None => return Ok(Config::default()),
    };
    if !path.exists() {
        return Ok(Config::default());
    }
    let config_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file at {:?}", path))?;
    parse_config(&config_str).with_context(|| format!("Failed to parse config file at {:?}", path))
}

pub fn parse_config(config_str: &str) -> Result<Config> {
    Ok(toml::from_str(config_str)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.socket_path, PathBuf::from(DEFAULT_SOCKET_PATH));
        assert_eq!(config.engine.reminder_at_secs, 120);
        assert_eq!(config.sessions.orphan_policy, OrphanPolicy::AutoCreate);
        assert!(config.notifications);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = parse_config(
            r#"
            notifications = false

            [ai]
            model = "gpt-4o"

            [sessions]
            orphan_policy = "reject"
            "#,
        )
        .unwrap();
        assert!(!config.notifications);
        assert_eq!(config.ai.model, "gpt-4o");
        assert_eq!(config.ai.max_tokens, 300);
        assert_eq!(config.sessions.orphan_policy, OrphanPolicy::Reject);
        assert_eq!(config.sessions.export_success_clear_secs, 3);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let ai = AiConfig {
            api_key: Some("   ".into()),
            api_key_env: "KAIROS_TEST_UNSET_KEY_VAR".into(),
            ..AiConfig::default()
        };
        assert_eq!(ai.resolve_api_key(), None);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn export_dir_defaults_under_data_dir() {
        let config = Config {
            data_dir: Some(PathBuf::from("/var/kairos")),
            ..Config::default()
        };
        assert_eq!(config.export_dir(), Some(PathBuf::from("/var/kairos/exports")));
    }
}
