use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Multiplier for `test=<n>`: the target becomes now + n x 10 s.
const TEST_UNIT_MS: f64 = 10_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: f32,
    pub height: f32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub room_id: String,
    pub target_time: DateTime<Utc>,
    pub fetch_limit: usize,
    pub blessings_channel: String,
    pub presence_channel: String,
    pub arrived_label: String,
    pub window: WindowConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            room_id: "global".to_owned(),
            target_time: default_target_time(),
            fetch_limit: 20,
            blessings_channel: "blessings-global".to_owned(),
            presence_channel: "presence-happy-newyear-2026".to_owned(),
            arrived_label: "Happy New Year 2026".to_owned(),
            window: WindowConfig::default(),
        }
    }
}

fn default_target_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-01-01T00:00:00+09:00")
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or_default()
}

impl AppConfig {
    pub fn load_or_create() -> Result<(Self, PathBuf)> {
        let config_dir = dirs::config_dir()
            .context("unable to locate OS config directory")?
            .join("blessing-countdown");
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("failed creating config dir at {}", config_dir.display()))?;

        let config_path = config_dir.join("config.json");
        if !config_path.exists() {
            let default = Self::default();
            default.save(&config_path)?;
            return Ok((default, config_path));
        }

        let text = fs::read_to_string(&config_path)
            .with_context(|| format!("failed reading {}", config_path.display()))?;
        let config = serde_json::from_str::<Self>(&text)
            .with_context(|| format!("invalid json in {}", config_path.display()))?;
        Ok((config, config_path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let payload = serde_json::to_string_pretty(self).context("failed serializing config")?;
        fs::write(path, payload).with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub url: String,
    pub anon_key: String,
}

impl RemoteCredentials {
    /// Reads credentials from the environment, then from a `.env` fallback.
    /// `None` means countdown-only mode.
    pub fn discover() -> Option<Self> {
        let dotenv = load_dotenv_fallback();
        Self::from_sources(&dotenv)
    }

    fn from_sources(dotenv: &HashMap<String, String>) -> Option<Self> {
        let url = env_or_dotenv("SUPABASE_URL", dotenv)
            .or_else(|| env_or_dotenv("NEXT_PUBLIC_SUPABASE_URL", dotenv))?;
        let anon_key = env_or_dotenv("SUPABASE_ANON_KEY", dotenv)
            .or_else(|| env_or_dotenv("NEXT_PUBLIC_SUPABASE_ANON_KEY", dotenv))?;
        Some(Self { url, anon_key })
    }
}

/// Query-string switches used to rehearse the celebration.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LaunchOverrides {
    pub test_multiplier: Option<f64>,
    pub presence_enabled: bool,
}

impl LaunchOverrides {
    /// Looks for a query string in the CLI arguments, then `BLESSING_QUERY`.
    pub fn from_env() -> Self {
        let query = std::env::args()
            .skip(1)
            .find(|arg| arg.starts_with('?') || arg.contains('='))
            .or_else(|| std::env::var("BLESSING_QUERY").ok());
        query.as_deref().map(Self::parse).unwrap_or_default()
    }

    pub fn parse(query: &str) -> Self {
        let mut overrides = Self::default();
        for pair in query.trim_start_matches('?').split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            match key.trim() {
                "test" => {
                    overrides.test_multiplier = value
                        .trim()
                        .parse::<f64>()
                        .ok()
                        .filter(|multiplier| multiplier.is_finite() && *multiplier > 0.0);
                }
                "presence" => overrides.presence_enabled = value.trim() == "1",
                _ => {}
            }
        }
        overrides
    }

    /// Accelerated target when `test` is set, otherwise the configured one.
    /// An offset outside chrono's range keeps the configured target.
    pub fn resolve_target(&self, configured: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
        let Some(multiplier) = self.test_multiplier else {
            return configured;
        };
        let offset_ms = (multiplier * TEST_UNIT_MS).round();
        let target = (offset_ms < i64::MAX as f64)
            .then(|| TimeDelta::try_milliseconds(offset_ms as i64))
            .flatten()
            .and_then(|offset| now.checked_add_signed(offset));
        match target {
            Some(target) => target,
            None => {
                warn!(multiplier, "test multiplier out of range; using configured target");
                configured
            }
        }
    }
}

fn env_or_dotenv(key: &str, dotenv: &HashMap<String, String>) -> Option<String> {
    std::env::var(key)
        .ok()
        .or_else(|| dotenv.get(key).cloned())
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn load_dotenv_fallback() -> HashMap<String, String> {
    for path in dotenv_candidate_paths() {
        if !path.is_file() {
            continue;
        }
        match parse_dotenv_file(&path) {
            Ok(values) => {
                info!(path = %path.display(), entries = values.len(), "loaded .env fallback");
                return values;
            }
            Err(err) => {
                warn!(?err, path = %path.display(), "failed parsing .env fallback file");
            }
        }
    }
    HashMap::new()
}

fn dotenv_candidate_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        paths.push(cwd.join(".env.local"));
        paths.push(cwd.join(".env"));
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            paths.push(exe_dir.join(".env"));
            paths.push(exe_dir.join("..").join(".env"));
        }
    }
    paths
}

fn parse_dotenv_file(path: &Path) -> Result<HashMap<String, String>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    Ok(parse_dotenv(&text))
}

fn parse_dotenv(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim().trim_matches('"').trim_matches('\'').to_owned();
        out.insert(key.to_owned(), value);
    }
    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeDelta, TimeZone, Utc};

    use super::{parse_dotenv, AppConfig, LaunchOverrides, RemoteCredentials};

    #[test]
    fn parses_partial_config_with_defaults() {
        let raw = r#"{ "room_id": "family" }"#;
        let parsed: AppConfig = serde_json::from_str(raw).expect("config should parse");
        assert_eq!(parsed.room_id, "family");
        assert_eq!(parsed.fetch_limit, 20);
        assert_eq!(parsed.presence_channel, "presence-happy-newyear-2026");
        assert_eq!(
            parsed.target_time,
            Utc.with_ymd_and_hms(2025, 12, 31, 15, 0, 0)
                .single()
                .expect("valid timestamp")
        );
    }

    #[test]
    fn parses_query_overrides() {
        let parsed = LaunchOverrides::parse("?test=3&presence=1");
        assert_eq!(parsed.test_multiplier, Some(3.0));
        assert!(parsed.presence_enabled);

        let parsed = LaunchOverrides::parse("test=abc&presence=yes");
        assert_eq!(parsed, LaunchOverrides::default());

        assert_eq!(LaunchOverrides::parse("test=-2").test_multiplier, None);
        assert_eq!(LaunchOverrides::parse("test=0").test_multiplier, None);
    }

    #[test]
    fn test_multiplier_accelerates_target() {
        let now = Utc
            .with_ymd_and_hms(2025, 6, 1, 0, 0, 0)
            .single()
            .expect("valid timestamp");
        let configured = AppConfig::default().target_time;
        let overrides = LaunchOverrides::parse("test=1.5");
        assert_eq!(
            overrides.resolve_target(configured, now),
            now + TimeDelta::seconds(15)
        );
        assert_eq!(
            LaunchOverrides::default().resolve_target(configured, now),
            configured
        );
    }

    #[test]
    fn huge_test_multiplier_keeps_configured_target() {
        let now = Utc::now();
        let configured = AppConfig::default().target_time;
        let overrides = LaunchOverrides::parse("test=1e12");
        assert_eq!(overrides.test_multiplier, Some(1e12));
        assert_eq!(overrides.resolve_target(configured, now), configured);
        assert_eq!(
            LaunchOverrides::parse("test=1e300").resolve_target(configured, now),
            configured
        );
    }

    #[test]
    fn dotenv_parsing_strips_quotes_and_exports() {
        let parsed = parse_dotenv(
            "# comment\nexport SUPABASE_URL=\"https://abc.supabase.co\"\nSUPABASE_ANON_KEY='k'\nbroken\n",
        );
        assert_eq!(
            parsed.get("SUPABASE_URL").map(String::as_str),
            Some("https://abc.supabase.co")
        );
        assert_eq!(parsed.get("SUPABASE_ANON_KEY").map(String::as_str), Some("k"));
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn credentials_need_both_values() {
        let mut dotenv = parse_dotenv("NEXT_PUBLIC_SUPABASE_URL=https://x.supabase.co\n");
        if std::env::var("SUPABASE_ANON_KEY").is_err()
            && std::env::var("NEXT_PUBLIC_SUPABASE_ANON_KEY").is_err()
        {
            assert!(RemoteCredentials::from_sources(&dotenv).is_none());
        }
        dotenv.insert("NEXT_PUBLIC_SUPABASE_ANON_KEY".to_owned(), "anon".to_owned());
        assert!(RemoteCredentials::from_sources(&dotenv).is_some());
    }
}
