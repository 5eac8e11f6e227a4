use crate::backoff::ReconnectConfig;
use crate::endpoint::{EnvToken, StaticToken, TokenSource, UpstreamCredentials};
use crate::errors::{GoldFeedError, Result};
use crate::normalizer::EnvelopeConfig;
use crate::pricing::DEFAULT_PREFERRED_INSTRUMENTS;

use config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const CONFIG_FILE: &str = "config.toml";
pub const CONFIG_DIR_ENV: &str = "GOLDFEED_CONFIG_DIR";
const ENV_PREFIX: &str = "GOLDFEED";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub quote: QuoteFeedConfig,
    pub notification: NotificationFeedConfig,
    pub reconnect: ReconnectConfig,
    pub envelope: EnvelopeConfig,
    pub logging: LoggingConfig,
    /// 워커 쓰레드 수. 0 또는 미설정이면 런타임 기본값
    pub runtime_threads: Option<usize>,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteFeedConfig {
    pub enabled: bool,
    pub url: String,
    /// 첫 번째 시세 항목으로 넘어가기 전에 순서대로 시도하는 종목 코드
    pub preferred_instruments: Vec<String>,
    pub connect_timeout_ms: u64,
    /// 0 또는 미설정이면 idle watchdog 비활성화
    pub idle_timeout_ms: Option<u64>,
    pub stale_after_secs: u64,
    pub credentials: Option<UpstreamCredentials>,
}

impl Default for QuoteFeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://localhost:8080/ws/quote".to_string(),
            preferred_instruments: DEFAULT_PREFERRED_INSTRUMENTS.iter().map(|s| s.to_string()).collect(),
            connect_timeout_ms: 5000,
            idle_timeout_ms: None,
            stale_after_secs: 300,
            credentials: None,
        }
    }
}

impl QuoteFeedConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.idle_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationFeedConfig {
    pub enabled: bool,
    pub url: String,
    /// 고정 토큰. 미설정이면 연결할 때마다 `token_env`에서 읽음
    pub token: Option<String>,
    pub token_env: String,
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: Option<u64>,
}

impl Default for NotificationFeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://localhost:8080/ws/notification".to_string(),
            token: None,
            token_env: "GOLDFEED_ACCESS_TOKEN".to_string(),
            connect_timeout_ms: 5000,
            idle_timeout_ms: None,
        }
    }
}

impl NotificationFeedConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.idle_timeout_ms)
    }

    pub fn token_source(&self) -> Arc<dyn TokenSource> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Arc::new(StaticToken::new(token)),
            _ => Arc::new(EnvToken::new(self.token_env.clone())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: 5,
        }
    }
}

fn non_zero_millis(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|v| *v > 0).map(Duration::from_millis)
}

impl Config {
    /// 검색 경로에서 `config.toml` 로드. 파일이 없으면 기본값 사용
    /// (환경변수 override는 그대로 적용)
    pub fn load() -> Result<Self> {
        let (config, source) = Self::load_with_source()?;
        if source.is_none() {
            log::warn!("{} not found, using defaults", CONFIG_FILE);
        }
        Ok(config)
    }

    /// [`Config::load`]와 같지만 읽은 파일 경로도 반환 (기본값이면 `None`).
    /// 로거가 준비되기 전에 설정을 읽는 호출자용
    pub fn load_with_source() -> Result<(Self, Option<PathBuf>)> {
        match find_config_file(CONFIG_FILE) {
            Some(path) => {
                let config = Self::from_toml_str(&fs::read_to_string(&path)?)?;
                Ok((config, Some(path)))
            }
            None => Ok((Self::from_toml_str("")?, None)),
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::info!("📋 reading {}", path.display());
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// TOML 텍스트에 `GOLDFEED__SECTION__KEY` 환경변수 override를 얹어 파싱
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.quote.url)?;
        Url::parse(&self.notification.url)?;

        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(GoldFeedError::Other(format!(
                "reconnect.base_delay_ms ({}) exceeds reconnect.max_delay_ms ({})",
                self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        if self.envelope.type_field.is_empty() {
            return Err(GoldFeedError::Other("envelope.type_field must not be empty".to_string()));
        }
        Ok(())
    }
}

/// 후보 위치에서 설정 파일을 순서대로 찾음:
/// 1) `$GOLDFEED_CONFIG_DIR/<name>`
/// 2) `./config/<name>`
/// 3) `<exe_dir>/config/<name>`
/// 4) `<exe_dir>/../../config/<name>` (target/{debug,release}에서 프로젝트 루트로)
pub fn find_config_file(name: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Ok(custom_dir) = env::var(CONFIG_DIR_ENV) {
        candidates.push(Path::new(&custom_dir).join(name));
    }

    candidates.push(Path::new("config").join(name));

    if let Ok(exe) = env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            candidates.push(exe_dir.join("config").join(name));
            if let Some(project_root) = exe_dir.parent().and_then(Path::parent) {
                candidates.push(project_root.join("config").join(name));
            }
        }
    }

    candidates.into_iter().find(|p| p.exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();

        assert!(config.quote.enabled);
        assert_eq!(config.quote.url, "ws://localhost:8080/ws/quote");
        assert_eq!(config.quote.preferred_instruments, vec!["AU", "AU9999", "XAU"]);
        assert_eq!(config.quote.stale_after(), Duration::from_secs(300));
        assert_eq!(config.quote.idle_timeout(), None);
        assert!(config.quote.credentials.is_none());
        assert_eq!(config.notification.url, "ws://localhost:8080/ws/notification");
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.envelope, EnvelopeConfig::default());
        assert_eq!(config.logging.level, "info");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_full_file() {
        let toml = r#"
            runtime_threads = 2

            [quote]
            url = "wss://quote.example.com/ws"
            preferred_instruments = ["AU9999", "AU"]
            idle_timeout_ms = 45000
            stale_after_secs = 120

            [quote.credentials]
            demp_code = "D001"
            secret = "s3cr3t"
            user_id = 42

            [notification]
            enabled = false
            token = "abc"

            [reconnect]
            base_delay_ms = 500
            max_delay_ms = 8000
            max_attempts = 4

            [envelope]
            heartbeat_type = "ping"

            [metrics]
            enabled = true
            interval_secs = 10
        "#;
        let config = Config::from_toml_str(toml).unwrap();

        assert_eq!(config.runtime_threads, Some(2));
        assert_eq!(config.quote.url, "wss://quote.example.com/ws");
        assert_eq!(config.quote.preferred_instruments, vec!["AU9999", "AU"]);
        assert_eq!(config.quote.idle_timeout(), Some(Duration::from_secs(45)));
        assert_eq!(config.quote.stale_after(), Duration::from_secs(120));

        let creds = config.quote.credentials.unwrap();
        assert_eq!(creds.demp_code, "D001");
        assert_eq!(creds.user_id, 42);
        assert_eq!(creds.channel, "channel");
        assert_eq!(creds.subscription_type, "all");

        assert!(!config.notification.enabled);
        assert_eq!(config.notification.token_source().token().as_deref(), Some("abc"));

        assert_eq!(config.reconnect.max_attempts, 4);
        assert_eq!(config.reconnect.delay_for(10), Duration::from_millis(8000));
        assert_eq!(config.envelope.heartbeat_type, "ping");
        assert_eq!(config.envelope.content_field, "content");
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.interval_secs, 10);
    }

    #[test]
    fn test_zero_idle_timeout_disables_watchdog() {
        let config = Config::from_toml_str("[quote]\nidle_timeout_ms = 0\n").unwrap();
        assert_eq!(config.quote.idle_timeout(), None);
    }

    #[test]
    fn test_token_falls_back_to_environment() {
        let config = Config::from_toml_str(
            "[notification]\ntoken = \"  \"\ntoken_env = \"GOLDFEED_TEST_TOKEN_FALLBACK\"\n",
        )
        .unwrap();
        let tokens = config.notification.token_source();
        assert_eq!(tokens.token(), None);

        env::set_var("GOLDFEED_TEST_TOKEN_FALLBACK", "from-env");
        assert_eq!(tokens.token().as_deref(), Some("from-env"));
        env::remove_var("GOLDFEED_TEST_TOKEN_FALLBACK");
    }

    #[test]
    fn test_environment_override() {
        env::set_var("GOLDFEED__LOGGING__FILE_PATH", "/tmp/gold-feed-test.log");
        let config = Config::from_toml_str("[logging]\nlevel = \"debug\"\n").unwrap();
        env::remove_var("GOLDFEED__LOGGING__FILE_PATH");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.file_path.as_deref(), Some("/tmp/gold-feed-test.log"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            Config::from_toml_str("[quote]\nurl = \"not a url\"\n"),
            Err(GoldFeedError::UrlParseError(_))
        ));
        assert!(Config::from_toml_str("[reconnect]\nbase_delay_ms = 5000\nmax_delay_ms = 1000\n").is_err());
        assert!(matches!(
            Config::from_toml_str("[reconnect]\nmax_attempts = \"many\"\n"),
            Err(GoldFeedError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[quote]\nurl = \"ws://10.0.0.5:9000/ws/quote\"").unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.quote.url, "ws://10.0.0.5:9000/ws/quote");

        assert!(matches!(
            Config::load_from("/definitely/not/here.toml"),
            Err(GoldFeedError::IoError(_))
        ));
    }

    #[test]
    fn test_find_config_file_in_custom_dir() {
        let dir = tempfile::tempdir().unwrap();
        let name = "gold-feed-find-test.toml";
        fs::write(dir.path().join(name), "").unwrap();
        fs::write(dir.path().join(CONFIG_FILE), "[quote]\nurl = \"ws://10.1.1.1:7000/ws/quote\"\n").unwrap();

        // 디렉터리 환경변수는 이 테스트에서만 사용 (병렬 테스트 간섭 방지)
        env::set_var(CONFIG_DIR_ENV, dir.path());
        let found = find_config_file(name);
        let loaded = Config::load_with_source();
        env::remove_var(CONFIG_DIR_ENV);

        assert_eq!(found, Some(dir.path().join(name)));
        assert_eq!(find_config_file("gold-feed-missing.toml"), None);

        let (config, source) = loaded.unwrap();
        assert_eq!(source, Some(dir.path().join(CONFIG_FILE)));
        assert_eq!(config.quote.url, "ws://10.1.1.1:7000/ws/quote");
    }
}
