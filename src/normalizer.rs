//! 메시지 정규화.
//!
//! 업스트림 프록시가 페이로드에 씌운 봉투를 벗겨냄. 배포마다 일부 단계가
//! 없을 수 있어 각 unwrap 단계는 독립 함수로 둠.

use crate::errors::{GoldFeedError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 소비자에게 전달되는 완전히 벗겨진 페이로드
pub type CanonicalMessage = Value;

/// 봉투 계층의 필드명
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub type_field: String,
    pub heartbeat_type: String,
    pub content_field: String,
    pub items_field: String,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            type_field: "type".to_string(),
            heartbeat_type: "p".to_string(),
            content_field: "content".to_string(),
            items_field: "items".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapStep {
    /// `{type: <heartbeat>}` 프레임 제거
    Heartbeat,
    /// 문자열로 인코딩된 페이로드 필드를 한 단계 파싱
    NestedContent,
    /// `items` 객체 풀기
    Items,
}

#[derive(Debug, Clone)]
pub struct MessageNormalizer {
    envelope: EnvelopeConfig,
    steps: Vec<UnwrapStep>,
}

impl MessageNormalizer {
    pub fn new(envelope: EnvelopeConfig, steps: Vec<UnwrapStep>) -> Self {
        Self { envelope, steps }
    }

    /// heartbeat -> nested content -> items
    pub fn quote(envelope: EnvelopeConfig) -> Self {
        Self::new(envelope, vec![UnwrapStep::Heartbeat, UnwrapStep::NestedContent, UnwrapStep::Items])
    }

    /// 알림은 내용을 해석하지 않음: heartbeat만 제거
    pub fn notification(envelope: EnvelopeConfig) -> Self {
        Self::new(envelope, vec![UnwrapStep::Heartbeat])
    }

    pub fn steps(&self) -> &[UnwrapStep] {
        &self.steps
    }

    /// 텍스트 프레임 하나를 정규화.
    ///
    /// `Ok(None)`은 heartbeat 프레임이라 전달할 것이 없다는 뜻.
    /// 파싱 실패는 모두 `MalformedFrame`이며 프레임이 부분 적용되는 일은 없음
    pub fn normalize(&self, raw: &str) -> Result<Option<CanonicalMessage>> {
        self.normalize_bytes(raw.as_bytes().to_vec())
    }

    pub fn normalize_bytes(&self, mut data: Vec<u8>) -> Result<Option<CanonicalMessage>> {
        let mut value = parse_frame(&mut data)?;

        for step in &self.steps {
            value = match step {
                UnwrapStep::Heartbeat => {
                    if is_heartbeat(&value, &self.envelope) {
                        debug!("heartbeat frame dropped");
                        return Ok(None);
                    }
                    value
                }
                UnwrapStep::NestedContent => unwrap_nested_content(value, &self.envelope)?,
                UnwrapStep::Items => unwrap_items(value, &self.envelope),
            };
        }

        Ok(Some(value))
    }
}

/// simd-json으로 원본 프레임 1차 파싱
pub fn parse_frame(data: &mut [u8]) -> Result<Value> {
    let len = data.len();
    simd_json::from_slice::<Value>(data).map_err(|e| {
        GoldFeedError::MalformedFrame(format!("frame is not valid JSON ({} bytes): {}", len, e))
    })
}

pub fn is_heartbeat(value: &Value, envelope: &EnvelopeConfig) -> bool {
    value
        .get(&envelope.type_field)
        .and_then(Value::as_str)
        .map_or(false, |t| t == envelope.heartbeat_type)
}

/// `{type: "messageevent", content: "<json>"}` -> 파싱된 `<json>`.
///
/// 문자열 content 필드가 없으면 그대로 통과
pub fn unwrap_nested_content(value: Value, envelope: &EnvelopeConfig) -> Result<Value> {
    let inner = match value.get(&envelope.content_field).and_then(Value::as_str) {
        Some(content) => serde_json::from_str::<Value>(content).map_err(|e| {
            GoldFeedError::MalformedFrame(format!("nested {} is not valid JSON: {}", envelope.content_field, e))
        })?,
        None => return Ok(value),
    };

    Ok(inner)
}

/// `{items: {...}}` -> `{...}`. items 객체가 없으면 그대로 통과
pub fn unwrap_items(value: Value, envelope: &EnvelopeConfig) -> Value {
    match value {
        Value::Object(mut map) if map.get(&envelope.items_field).map_or(false, Value::is_object) => {
            map.remove(&envelope.items_field).unwrap_or_default()
        }
        other => other,
    }
}
