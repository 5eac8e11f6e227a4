//! 범용 클라이언트로 조립한 플랫폼의 두 피드.

use crate::config::Config;
use crate::connection_manager::{FeedClient, FeedSettings};
use crate::endpoint::{Endpoint, TokenSource};
use crate::errors::Result;
use crate::events::FeedKind;
use crate::normalizer::MessageNormalizer;
use crate::pricing::{PriceHealth, PriceState, PriceTracker};
use crate::transport::{Transport, WsTransport};

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// 시세 스트림과 파생 가격 read model
pub struct QuoteFeed {
    client: FeedClient,
    prices: Arc<PriceTracker>,
    stale_after: Duration,
}

impl QuoteFeed {
    /// 가격 트래커를 다른 소비자보다 먼저 등록하므로
    /// 이후 구독한 핸들러는 갱신된 가격을 봄
    pub fn start(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        let settings = FeedSettings {
            kind: FeedKind::Quote,
            endpoint: Endpoint::fixed(&config.quote.url)?,
            reconnect: config.reconnect.clone(),
            normalizer: MessageNormalizer::quote(config.envelope.clone()),
            idle_timeout: config.quote.idle_timeout(),
            credentials: config.quote.credentials.clone(),
        };

        let prices = Arc::new(PriceTracker::new(config.quote.preferred_instruments.as_slice()));
        let client = FeedClient::start(settings, transport);
        client.subscribe(prices.handler());

        Ok(Self {
            client,
            prices,
            stale_after: config.quote.stale_after(),
        })
    }

    /// 실제 WebSocket 위의 [`QuoteFeed::start`]
    pub fn start_ws(config: &Config) -> Result<Self> {
        Self::start(config, Arc::new(WsTransport::new(config.quote.connect_timeout())))
    }

    pub fn client(&self) -> &FeedClient {
        &self.client
    }

    pub fn prices(&self) -> Arc<PriceTracker> {
        Arc::clone(&self.prices)
    }

    pub fn snapshot(&self) -> PriceState {
        self.prices.snapshot()
    }

    pub fn health(&self) -> PriceHealth {
        self.prices.snapshot().health(Utc::now(), self.stale_after)
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}

/// 인증된 알림 스트림. 페이로드는 그대로 전달
pub struct NotificationFeed {
    client: FeedClient,
}

impl NotificationFeed {
    pub fn start(config: &Config, transport: Arc<dyn Transport>, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let settings = FeedSettings {
            kind: FeedKind::Notification,
            endpoint: Endpoint::authenticated(&config.notification.url, tokens)?,
            reconnect: config.reconnect.clone(),
            normalizer: MessageNormalizer::notification(config.envelope.clone()),
            idle_timeout: config.notification.idle_timeout(),
            credentials: None,
        };

        Ok(Self {
            client: FeedClient::start(settings, transport),
        })
    }

    pub fn start_ws(config: &Config) -> Result<Self> {
        Self::start(
            config,
            Arc::new(WsTransport::new(config.notification.connect_timeout())),
            config.notification.token_source(),
        )
    }

    pub fn client(&self) -> &FeedClient {
        &self.client
    }

    pub async fn shutdown(self) {
        self.client.shutdown().await;
    }
}
