//! 연결 생명주기 상태와 운영자에게 공개하는 상태 레코드.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 플랫폼의 두 스트리밍 클라이언트
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedKind {
    Quote,
    Notification,
}

impl FeedKind {
    pub fn name(&self) -> &'static str {
        match self {
            FeedKind::Quote => "quote",
            FeedKind::Notification => "notification",
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 피드 연결의 생명주기 상태.
///
/// `Terminated`는 재연결 횟수를 다 쓴 경우에만 도달하며
/// 수동 `connect()`로만 벗어남
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle = 0,
    Connecting = 1,
    Open = 2,
    Degraded = 3,
    Reconnecting = 4,
    Closing = 5,
    Terminated = 6,
}

impl ConnectionState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 채널을 여는 중이거나 보유 중
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Degraded)
    }

    pub fn name(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closing => "closing",
            ConnectionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 상태 전이마다 공개되는 스냅샷
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub feed: FeedKind,
    pub state: ConnectionState,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl ConnectionStatus {
    pub fn new(feed: FeedKind, state: ConnectionState, attempts: u32, max_attempts: u32) -> Self {
        Self {
            feed,
            state,
            attempts,
            max_attempts,
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ConnectionState::Terminated
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} feed {} (attempt {}/{})", self.feed, self.state, self.attempts, self.max_attempts)
    }
}
