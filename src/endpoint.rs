//! 접속 주소 결정과 업스트림 인증 정보.

use crate::errors::{GoldFeedError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// 인증 피드용 bearer 토큰 제공
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Option<String>;
}

#[derive(Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// 매번 환경변수에서 토큰을 읽으므로 시작 후 받은 토큰도
/// 다음 `connect()`에서 반영됨
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl TokenSource for EnvToken {
    fn token(&self) -> Option<String> {
        env::var(&self.var).ok()
    }
}

#[derive(Clone)]
pub enum Endpoint {
    /// 고정 업스트림 주소 (시세 피드)
    Fixed(Url),
    /// 기본 주소 + `token=<token>` (알림 피드)
    Authenticated { base: Url, tokens: Arc<dyn TokenSource> },
}

impl Endpoint {
    pub fn fixed(url: &str) -> Result<Self> {
        Ok(Endpoint::Fixed(Url::parse(url)?))
    }

    pub fn authenticated(base: &str, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        Ok(Endpoint::Authenticated {
            base: Url::parse(base)?,
            tokens,
        })
    }

    /// 접속할 주소 생성. 토큰이 필요한데 없으면 `None`
    pub fn resolve(&self) -> Option<Url> {
        match self {
            Endpoint::Fixed(url) => Some(url.clone()),
            Endpoint::Authenticated { base, tokens } => {
                let token = tokens.token().filter(|t| !t.trim().is_empty())?;
                let mut url = base.clone();
                url.query_pairs_mut().append_pair("token", &token);
                Some(url)
            }
        }
    }

    /// 쿼리 문자열을 뺀 주소 (로그 출력용)
    pub fn describe(&self) -> String {
        let base = match self {
            Endpoint::Fixed(url) => url,
            Endpoint::Authenticated { base, .. } => base,
        };
        let port = base.port().map(|p| format!(":{}", p)).unwrap_or_default();
        format!("{}://{}{}{}", base.scheme(), base.host_str().unwrap_or(""), port, base.path())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Fixed(_) => write!(f, "Endpoint::Fixed({})", self.describe()),
            Endpoint::Authenticated { .. } => write!(f, "Endpoint::Authenticated({})", self.describe()),
        }
    }
}

/// 시세 업스트림이 구독 프레임에서 요구하는 인증 정보
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamCredentials {
    pub demp_code: String,
    pub secret: String,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_client_ip")]
    pub client_ip: String,
    #[serde(default)]
    pub user_id: u64,
    #[serde(default = "default_subscription_type")]
    pub subscription_type: String,
}

fn default_channel() -> String {
    "channel".to_string()
}

fn default_client_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_subscription_type() -> String {
    "all".to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    userid: u64,
    demp_code: &'a str,
    channel: &'a str,
    client_ip: &'a str,
    secret: &'a str,
    session_id: String,
    subscription_type: &'a str,
    time: String,
}

impl UpstreamCredentials {
    pub fn new(demp_code: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            demp_code: demp_code.into(),
            secret: secret.into(),
            channel: default_channel(),
            client_ip: default_client_ip(),
            user_id: 0,
            subscription_type: default_subscription_type(),
        }
    }

    /// 채널이 열린 직후 보내는 JSON 구독 프레임
    pub fn subscribe_frame(&self, now: NaiveDateTime) -> Result<String> {
        let request = SubscribeRequest {
            userid: self.user_id,
            demp_code: &self.demp_code,
            channel: &self.channel,
            client_ip: &self.client_ip,
            secret: &self.secret,
            session_id: now.format("%Y%m%d%H%M%S").to_string(),
            subscription_type: &self.subscription_type,
            time: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        serde_json::to_string(&request).map_err(|e| GoldFeedError::SerializationError(e.to_string()))
    }
}

impl fmt::Debug for UpstreamCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamCredentials")
            .field("demp_code", &self.demp_code)
            .field("secret", &"***")
            .field("channel", &self.channel)
            .field("client_ip", &self.client_ip)
            .field("user_id", &self.user_id)
            .field("subscription_type", &self.subscription_type)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_fixed_endpoint_resolves_as_is() {
        let endpoint = Endpoint::fixed("wss://push.example.com/ws").unwrap();
        assert_eq!(endpoint.resolve().unwrap().as_str(), "wss://push.example.com/ws");
    }

    #[test]
    fn test_token_appended_as_query_parameter() {
        let endpoint =
            Endpoint::authenticated("ws://localhost:8080/ws/notification", Arc::new(StaticToken::new("abc.def-1"))).unwrap();
        assert_eq!(
            endpoint.resolve().unwrap().as_str(),
            "ws://localhost:8080/ws/notification?token=abc.def-1"
        );
    }

    #[test]
    fn test_token_is_urlencoded_and_joins_existing_query() {
        let endpoint =
            Endpoint::authenticated("ws://localhost/ws/notification?lang=zh", Arc::new(StaticToken::new("a b/c"))).unwrap();
        assert_eq!(
            endpoint.resolve().unwrap().as_str(),
            "ws://localhost/ws/notification?lang=zh&token=a+b%2Fc"
        );
    }

    #[test]
    fn test_missing_or_empty_token_suppresses_address() {
        let none = Endpoint::authenticated("ws://localhost/ws", Arc::new(StaticToken::none())).unwrap();
        assert!(none.resolve().is_none());

        let empty = Endpoint::authenticated("ws://localhost/ws", Arc::new(StaticToken::new("  "))).unwrap();
        assert!(empty.resolve().is_none());
    }

    #[test]
    fn test_describe_hides_token() {
        let endpoint =
            Endpoint::authenticated("ws://localhost:8080/ws/notification", Arc::new(StaticToken::new("secret"))).unwrap();
        assert_eq!(endpoint.describe(), "ws://localhost:8080/ws/notification");
        assert!(!format!("{:?}", endpoint).contains("secret"));
    }

    #[test]
    fn test_subscribe_frame_fields() {
        let creds = UpstreamCredentials::new("demp", "s3cr3t");
        let now = NaiveDate::from_ymd_opt(2025, 11, 3).unwrap().and_hms_opt(9, 30, 5).unwrap();
        let frame = creds.subscribe_frame(now).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(parsed["userid"], 0);
        assert_eq!(parsed["dempCode"], "demp");
        assert_eq!(parsed["channel"], "channel");
        assert_eq!(parsed["clientIp"], "127.0.0.1");
        assert_eq!(parsed["secret"], "s3cr3t");
        assert_eq!(parsed["sessionId"], "20251103093005");
        assert_eq!(parsed["subscriptionType"], "all");
        assert_eq!(parsed["time"], "2025-11-03 09:30:05");
        assert!(!format!("{:?}", creds).contains("s3cr3t"));
    }
}
