//! 연결 관리자와 소켓 사이의 채널 추상화.
//!
//! 관리자는 큐 한 쌍만 봄. `WsTransport`는 연결마다 pump 태스크 하나로
//! 실제 WebSocket과 연결하고, 테스트는 메모리 내 transport를 사용.

use crate::errors::{GoldFeedError, Result};

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

const CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Frame(String),
    Error(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// 열린 연결의 관리자 쪽 끝
#[derive(Debug)]
pub struct Channel {
    pub inbound: mpsc::Receiver<ChannelEvent>,
    pub outbound: mpsc::Sender<OutboundFrame>,
}

/// 열린 연결의 소켓 쪽 끝
#[derive(Debug)]
pub struct ChannelPeer {
    pub events: mpsc::Sender<ChannelEvent>,
    pub outbound: mpsc::Receiver<OutboundFrame>,
}

impl Channel {
    pub fn pair(buffer: usize) -> (Channel, ChannelPeer) {
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let (out_tx, out_rx) = mpsc::channel(buffer);
        (
            Channel {
                inbound: events_rx,
                outbound: out_tx,
            },
            ChannelPeer {
                events: events_tx,
                outbound: out_rx,
            },
        )
    }

    /// 다음 이벤트. peer가 drop되면 `Closed`
    pub async fn next_event(&mut self) -> ChannelEvent {
        self.inbound.recv().await.unwrap_or(ChannelEvent::Closed)
    }

    /// 대기 없이 프레임을 큐에 넣음
    pub fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.outbound.try_send(frame).map_err(|_| GoldFeedError::ChannelClosed)
    }
}

pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<Channel>>;
}

#[derive(Debug, Clone)]
pub struct WsTransport {
    connect_timeout: Duration,
}

impl WsTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Transport for WsTransport {
    fn open(&self, url: Url) -> BoxFuture<'static, Result<Channel>> {
        let connect_timeout = self.connect_timeout;
        async move {
            let (ws_stream, response) = tokio::time::timeout(connect_timeout, connect_async(url.as_str()))
                .await
                .map_err(|_| GoldFeedError::ConnectTimeout(connect_timeout))??;

            info!("🤝 WebSocket handshake done ({}{}, status: {})", url.host_str().unwrap_or(""), url.path(), response.status());

            let (channel, peer) = Channel::pair(CHANNEL_BUFFER);
            tokio::spawn(pump(ws_stream, peer));
            Ok(channel)
        }
        .boxed()
    }
}

/// 어느 한쪽이 사라질 때까지 소켓과 채널 큐 사이에서 프레임을 옮김.
/// 항상 `Closed` 이벤트로 끝남
async fn pump(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>, peer: ChannelPeer) {
    let (mut write, mut read) = ws_stream.split();
    let ChannelPeer { events, mut outbound } = peer;

    loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    debug!("📨 text frame: {} bytes", text.len());
                    if events.send(ChannelEvent::Frame(text)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                    Ok(text) => {
                        if events.send(ChannelEvent::Frame(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("binary frame is not UTF-8, dropped: {}", e),
                },
                Some(Ok(Message::Ping(payload))) => {
                    debug!("🏓 ping received, answering pong");
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        error!("❌ pong failed: {}", e);
                        let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) => debug!("🏓 pong received"),
                Some(Ok(Message::Frame(_))) => debug!("🔧 raw frame ignored"),
                Some(Ok(Message::Close(frame))) => {
                    info!("🔒 closed by remote: {:?}", frame);
                    break;
                }
                Some(Err(e)) => {
                    error!("❌ WebSocket read error: {}", e);
                    let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                    break;
                }
                None => break,
            },
            frame = outbound.recv() => match frame {
                Some(OutboundFrame::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        error!("❌ WebSocket write error: {}", e);
                        let _ = events.send(ChannelEvent::Error(e.to_string())).await;
                        break;
                    }
                }
                Some(OutboundFrame::Close) | None => {
                    debug!("closing WebSocket on request");
                    let _ = write.send(Message::Close(None)).await;
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }

    let _ = events.send(ChannelEvent::Closed).await;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_pair_round_trip() {
        let (mut channel, mut peer) = Channel::pair(4);

        peer.events.send(ChannelEvent::Frame("{}".into())).await.unwrap();
        assert_eq!(channel.next_event().await, ChannelEvent::Frame("{}".into()));

        channel.send(OutboundFrame::Text("hello".into())).unwrap();
        assert_eq!(peer.outbound.recv().await, Some(OutboundFrame::Text("hello".into())));
    }

    #[tokio::test]
    async fn test_dropped_peer_reads_as_closed() {
        let (mut channel, peer) = Channel::pair(4);
        drop(peer);
        assert_eq!(channel.next_event().await, ChannelEvent::Closed);
        assert!(matches!(channel.send(OutboundFrame::Close), Err(GoldFeedError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_pump_forwards_frames_and_answers_pings() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"a":1}"#.to_string())).await.unwrap();
            ws.send(Message::Binary(br#"{"b":2}"#.to_vec())).await.unwrap();
            ws.send(Message::Ping(vec![7])).await.unwrap();

            let mut pong = false;
            let mut text = None;
            while !pong || text.is_none() {
                match ws.next().await {
                    Some(Ok(Message::Pong(payload))) => {
                        assert_eq!(payload, vec![7]);
                        pong = true;
                    }
                    Some(Ok(Message::Text(t))) => text = Some(t),
                    Some(Ok(_)) => {}
                    other => panic!("unexpected server read: {:?}", other),
                }
            }
            let _ = ws.close(None).await;
            (pong, text)
        });

        let url = Url::parse(&format!("ws://{}/ws/quote", addr)).unwrap();
        let mut channel = WsTransport::new(Duration::from_secs(5)).open(url).await.unwrap();
        channel.send(OutboundFrame::Text("sub".into())).unwrap();

        assert_eq!(channel.next_event().await, ChannelEvent::Frame(r#"{"a":1}"#.into()));
        assert_eq!(channel.next_event().await, ChannelEvent::Frame(r#"{"b":2}"#.into()));

        let (pong, text) = server.await.unwrap();
        assert!(pong);
        assert_eq!(text.as_deref(), Some("sub"));

        assert_eq!(channel.next_event().await, ChannelEvent::Closed);
    }

    #[tokio::test]
    async fn test_dropping_channel_closes_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.next().await
        });

        let url = Url::parse(&format!("ws://{}/ws/quote", addr)).unwrap();
        let channel = WsTransport::new(Duration::from_secs(5)).open(url).await.unwrap();
        drop(channel);

        let received = server.await.unwrap();
        assert!(matches!(received, Some(Ok(Message::Close(_)))), "server saw {:?}", received);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_to_open() {
        let transport = WsTransport::new(Duration::from_secs(2));
        // localhost의 9번 포트(discard)는 WebSocket을 말하지 않음
        let url = Url::parse("ws://127.0.0.1:9/ws").unwrap();
        assert!(transport.open(url).await.is_err());
    }
}
