//! 연결 관리자.
//!
//! 피드 하나의 소켓 생명주기(연결, 프레임 수신, 에러/종료 처리, 재연결)를 담당.
//! 전이 규칙은 소켓과 타이머를 모르는 [`Lifecycle`]에 있고,
//! driver 태스크가 채널 이벤트, 타이머 만료, API 명령을 하나씩 넘겨줌.

use crate::backoff::{ReconnectConfig, ReconnectPolicy};
use crate::dispatcher::{Dispatcher, Handler};
use crate::endpoint::{Endpoint, UpstreamCredentials};
use crate::errors::Result;
use crate::events::{ConnectionState, ConnectionStatus, FeedKind};
use crate::normalizer::MessageNormalizer;
use crate::stats::{FeedStats, FeedStatsSnapshot};
use crate::transport::{Channel, ChannelEvent, OutboundFrame, Transport};

use chrono::Local;
use futures_util::future::BoxFuture;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// 요청된 종료이거나 이미 처리됨. 할 일 없음
    Ignored,
    /// 지연 후 재연결
    Retry(Duration),
    /// 재연결 횟수 소진. 피드 종료 상태
    Exhausted,
}

/// 피드 연결의 전이 규칙
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
    policy: ReconnectPolicy,
}

impl Lifecycle {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            policy: ReconnectPolicy::new(config),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.policy.attempts()
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts()
    }

    /// 채널을 이미 여는 중이거나 보유 중이면 false.
    /// `Idle`이나 `Terminated`에서의 연결은 수동 개입으로 보고
    /// 재연결 횟수를 복구
    pub fn request_connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Degraded => false,
            ConnectionState::Idle | ConnectionState::Terminated => {
                self.policy.reset();
                self.state = ConnectionState::Connecting;
                true
            }
            ConnectionState::Reconnecting | ConnectionState::Closing => {
                self.state = ConnectionState::Connecting;
                true
            }
        }
    }

    /// 주소를 만들 수 없음. 재시도 없이 idle 유지
    pub fn address_unavailable(&mut self) {
        self.state = ConnectionState::Idle;
    }

    pub fn opened(&mut self) -> bool {
        if self.state != ConnectionState::Connecting {
            return false;
        }
        self.policy.reset();
        self.state = ConnectionState::Open;
        true
    }

    pub fn errored(&mut self) {
        if self.state.is_active() {
            self.state = ConnectionState::Degraded;
        }
    }

    /// 채널이 닫혔거나 열기에 실패함
    pub fn closed(&mut self) -> CloseOutcome {
        if !self.state.is_active() {
            return CloseOutcome::Ignored;
        }

        match self.policy.schedule() {
            Some(delay) => {
                self.state = ConnectionState::Reconnecting;
                CloseOutcome::Retry(delay)
            }
            None => {
                self.state = ConnectionState::Terminated;
                CloseOutcome::Exhausted
            }
        }
    }

    /// 수동 연결 해제. 정리할 것이 없으면 false
    pub fn disconnect(&mut self) -> bool {
        match self.state {
            ConnectionState::Idle | ConnectionState::Terminated => false,
            _ => {
                self.state = ConnectionState::Closing;
                true
            }
        }
    }

    /// 수동 연결 해제 후 채널 참조가 해제됨
    pub fn released(&mut self) {
        if self.state == ConnectionState::Closing {
            self.state = ConnectionState::Idle;
        }
    }

    /// 재연결 타이머 만료. 예약 이후 상태가 바뀌지 않았을 때만 진행
    pub fn reconnect_due(&mut self) -> bool {
        if self.state != ConnectionState::Reconnecting {
            return false;
        }
        self.state = ConnectionState::Connecting;
        true
    }
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub kind: FeedKind,
    pub endpoint: Endpoint,
    pub reconnect: ReconnectConfig,
    pub normalizer: MessageNormalizer,
    /// 이 시간 동안 프레임이 없으면 채널이 죽은 것으로 간주
    pub idle_timeout: Option<Duration>,
    /// 연결 직후 보내는 구독 프레임
    pub credentials: Option<UpstreamCredentials>,
}

#[derive(Debug)]
enum Command {
    Connect,
    Disconnect,
}

struct Driver {
    settings: FeedSettings,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<FeedStats>,
    status: watch::Sender<ConnectionStatus>,
    lifecycle: Lifecycle,
    channel: Option<Channel>,
    pending_open: Option<BoxFuture<'static, Result<Channel>>>,
    reconnect_at: Option<Instant>,
    last_activity: Instant,
}

async fn next_open(pending: &mut Option<BoxFuture<'static, Result<Channel>>>) -> Result<Channel> {
    match pending {
        Some(open) => open.await,
        None => std::future::pending().await,
    }
}

async fn next_event(channel: &mut Option<Channel>) -> ChannelEvent {
    match channel {
        Some(channel) => channel.next_event().await,
        None => std::future::pending().await,
    }
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let kind = self.settings.kind;
        debug!("{} feed driver started", kind);

        loop {
            let idle_deadline = self.settings.idle_timeout.map(|t| self.last_activity + t);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Disconnect) => self.disconnect(),
                    None => {
                        self.disconnect();
                        break;
                    }
                },
                result = next_open(&mut self.pending_open), if self.pending_open.is_some() => {
                    self.pending_open = None;
                    self.on_open_result(result);
                }
                event = next_event(&mut self.channel), if self.channel.is_some() => {
                    self.on_channel_event(event);
                }
                _ = time::sleep_until(self.reconnect_at.unwrap_or_else(Instant::now)), if self.reconnect_at.is_some() => {
                    self.reconnect_at = None;
                    self.on_reconnect_timer();
                }
                _ = time::sleep_until(idle_deadline.unwrap_or_else(Instant::now)), if self.channel.is_some() && idle_deadline.is_some() => {
                    self.on_idle_timeout();
                }
            }
        }

        debug!("{} feed driver stopped", kind);
    }

    fn connect(&mut self) {
        if !self.lifecycle.request_connect() {
            debug!("{} feed is {}, connect ignored", self.settings.kind, self.lifecycle.state());
            return;
        }
        self.begin_open();
    }

    fn begin_open(&mut self) {
        let kind = self.settings.kind;
        let Some(url) = self.settings.endpoint.resolve() else {
            warn!("⚠️ {} feed has no usable address (token missing?), not connecting", kind);
            self.lifecycle.address_unavailable();
            self.publish();
            return;
        };

        info!(
            "🔌 {} feed connecting to {} (attempt #{}/{})",
            kind,
            self.settings.endpoint.describe(),
            self.lifecycle.attempts(),
            self.lifecycle.max_attempts()
        );
        self.publish();
        self.pending_open = Some(self.transport.open(url));
    }

    fn on_open_result(&mut self, result: Result<Channel>) {
        let kind = self.settings.kind;
        match result {
            Ok(channel) => {
                if !self.lifecycle.opened() {
                    let _ = channel.send(OutboundFrame::Close);
                    return;
                }
                info!("✅ {} feed connected", kind);

                if let Some(credentials) = &self.settings.credentials {
                    let sent = credentials
                        .subscribe_frame(Local::now().naive_local())
                        .and_then(|frame| channel.send(OutboundFrame::Text(frame)));
                    match sent {
                        Ok(()) => info!("📨 {} feed subscribe frame sent", kind),
                        Err(e) => warn!("⚠️ {} feed subscribe frame not sent: {}", kind, e),
                    }
                }

                self.channel = Some(channel);
                self.last_activity = Instant::now();
                self.publish();
            }
            Err(e) => {
                error!("❌ {} feed connect failed: {}", kind, e);
                self.handle_close();
            }
        }
    }

    fn on_channel_event(&mut self, event: ChannelEvent) {
        let kind = self.settings.kind;
        match event {
            ChannelEvent::Frame(text) => {
                self.last_activity = Instant::now();
                self.process_frame(text);
            }
            ChannelEvent::Error(e) => {
                warn!("⚠️ {} feed channel error: {}", kind, e);
                self.lifecycle.errored();
                self.publish();
            }
            ChannelEvent::Closed => {
                info!("🔌 {} feed connection closed", kind);
                self.handle_close();
            }
        }
    }

    fn process_frame(&mut self, text: String) {
        self.stats.record_frame(text.len());

        match self.settings.normalizer.normalize_bytes(text.into_bytes()) {
            Ok(Some(message)) => {
                let report = self.dispatcher.dispatch(&message);
                self.stats.record_dispatch(report);
            }
            Ok(None) => self.stats.record_heartbeat(),
            Err(e) => {
                warn!("❌ {} feed frame dropped: {}", self.settings.kind, e);
                self.stats.record_drop();
            }
        }
    }

    fn handle_close(&mut self) {
        let kind = self.settings.kind;
        if let Some(channel) = self.channel.take() {
            let _ = channel.send(OutboundFrame::Close);
        }

        match self.lifecycle.closed() {
            CloseOutcome::Ignored => {}
            CloseOutcome::Retry(delay) => {
                self.stats.record_reconnect();
                warn!(
                    "🔄 {} feed reconnecting in {:.1}s (attempt {}/{})",
                    kind,
                    delay.as_secs_f64(),
                    self.lifecycle.attempts(),
                    self.lifecycle.max_attempts()
                );
                self.reconnect_at = Some(Instant::now() + delay);
            }
            CloseOutcome::Exhausted => {
                error!(
                    "💀 {} feed gave up after {} reconnect attempts; waiting for a manual connect",
                    kind,
                    self.lifecycle.max_attempts()
                );
            }
        }
        self.publish();
    }

    fn on_reconnect_timer(&mut self) {
        if self.lifecycle.reconnect_due() {
            self.begin_open();
        } else {
            debug!("{} feed is {}, stale reconnect timer ignored", self.settings.kind, self.lifecycle.state());
        }
    }

    fn on_idle_timeout(&mut self) {
        warn!(
            "⏱️ {} feed silent for {:?}, dropping connection",
            self.settings.kind,
            self.settings.idle_timeout.unwrap_or_default()
        );
        self.lifecycle.errored();
        self.handle_close();
    }

    fn disconnect(&mut self) {
        let kind = self.settings.kind;
        if !self.lifecycle.disconnect() {
            debug!("{} feed is {}, disconnect ignored", kind, self.lifecycle.state());
            return;
        }
        self.publish();

        self.pending_open = None;
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.send(OutboundFrame::Close) {
                debug!("{} feed close frame not queued: {}", kind, e);
            }
        }

        self.lifecycle.released();
        info!("{} feed disconnected", kind);
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(ConnectionStatus::new(
            self.settings.kind,
            self.lifecycle.state(),
            self.lifecycle.attempts(),
            self.lifecycle.max_attempts(),
        ));
    }
}

/// 실행 중인 피드 하나의 핸들.
///
/// [`FeedClient::start`]로 생성하고 [`FeedClient::shutdown`]으로 정리.
/// 핸들을 drop해도 driver가 멈춤
pub struct FeedClient {
    kind: FeedKind,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ConnectionStatus>,
    dispatcher: Arc<Dispatcher>,
    stats: Arc<FeedStats>,
    task: JoinHandle<()>,
}

impl FeedClient {
    /// driver 태스크 생성. tokio 런타임 안에서 호출해야 함
    pub fn start(settings: FeedSettings, transport: Arc<dyn Transport>) -> Self {
        let kind = settings.kind;
        let lifecycle = Lifecycle::new(settings.reconnect.clone());
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::new(
            kind,
            lifecycle.state(),
            lifecycle.attempts(),
            lifecycle.max_attempts(),
        ));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new());
        let stats = Arc::new(FeedStats::new());

        let driver = Driver {
            settings,
            transport,
            dispatcher: Arc::clone(&dispatcher),
            stats: Arc::clone(&stats),
            status: status_tx,
            lifecycle,
            channel: None,
            pending_open: None,
            reconnect_at: None,
            last_activity: Instant::now(),
        };
        let task = tokio::spawn(driver.run(commands_rx));

        Self {
            kind,
            commands: commands_tx,
            status: status_rx,
            dispatcher,
            stats,
            task,
        }
    }

    pub fn kind(&self) -> FeedKind {
        self.kind
    }

    /// 이미 연결되어 있거나 연결 중이면 아무것도 안 함
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// 채널을 닫아 해제하고 자동 재연결을 멈춤
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("{} feed driver is not running", self.kind);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status.borrow().state == ConnectionState::Open
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn subscribe(&self, handler: Handler) {
        self.dispatcher.subscribe(handler);
    }

    pub fn unsubscribe(&self, handler: &Handler) -> bool {
        self.dispatcher.unsubscribe(handler)
    }

    pub fn stats(&self) -> FeedStatsSnapshot {
        self.stats.snapshot()
    }

    /// 공유 카운터 (클라이언트 borrow보다 오래 사는 리포터용)
    pub fn stats_handle(&self) -> Arc<FeedStats> {
        Arc::clone(&self.stats)
    }

    /// 연결을 해제하고 driver 태스크 종료를 기다림
    pub async fn shutdown(self) {
        let Self { kind, commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            error!("{} feed driver ended abnormally: {}", kind, e);
        }
    }
}
