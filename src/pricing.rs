//! 파생 가격 상태.
//!
//! 시세 레코드는 `code -> {Buy, Sell}` 맵으로 들어오며 정확한 형태는
//! 업스트림 제공자에 따라 다름. 순서가 정해진 추출기 목록을 차례로 실행해
//! 양수 매수가를 처음 돌려주는 추출기의 값을 채택.

use crate::dispatcher::{handler, Handler};
use crate::normalizer::CanonicalMessage;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

const BUY_FIELDS: &[&str] = &["Buy", "buy", "buyPrice"];
const SELL_FIELDS: &[&str] = &["Sell", "sell", "sellPrice"];

/// 첫 번째 시세 항목으로 넘어가기 전에 시도하는 종목 코드
pub const DEFAULT_PREFERRED_INSTRUMENTS: &[&str] = &["AU", "AU9999", "XAU"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSample {
    pub buy: f64,
    pub sell: f64,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct InstrumentQuote {
    pub buy_price: f64,
    pub sell_price: f64,
}

/// JSON 숫자 또는 숫자 문자열
fn number_like(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn field<'a>(entry: &'a Value, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| entry.get(*name))
}

/// 종목 항목의 매수/매도 쌍 (둘 다 있고 음수가 아닐 때만)
pub fn instrument_quote(entry: &Value) -> Option<InstrumentQuote> {
    let buy_price = field(entry, BUY_FIELDS).and_then(number_like)?;
    let sell_price = field(entry, SELL_FIELDS).and_then(number_like)?;
    if buy_price < 0.0 || sell_price < 0.0 {
        return None;
    }
    Some(InstrumentQuote { buy_price, sell_price })
}

fn sample_from(code: &str, entry: &Value) -> Option<PriceSample> {
    let quote = instrument_quote(entry)?;
    (quote.buy_price > 0.0).then(|| PriceSample {
        buy: quote.buy_price,
        sell: quote.sell_price,
        source: code.to_string(),
    })
}

/// 가격 추출 전략. 부수효과 없어야 함
pub trait PriceExtractor: Send + Sync {
    fn name(&self) -> String;
    fn extract(&self, message: &CanonicalMessage) -> Option<PriceSample>;
}

/// 고정된 종목 코드를 읽음
#[derive(Debug, Clone)]
pub struct InstrumentKey(pub String);

impl PriceExtractor for InstrumentKey {
    fn name(&self) -> String {
        format!("instrument:{}", self.0)
    }

    fn extract(&self, message: &CanonicalMessage) -> Option<PriceSample> {
        message.get(&self.0).and_then(|entry| sample_from(&self.0, entry))
    }
}

/// 문서 순서상 사용 가능한 매수/매도 쌍을 가진 첫 번째 항목
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstQuoted;

impl PriceExtractor for FirstQuoted {
    fn name(&self) -> String {
        "first-quoted".to_string()
    }

    fn extract(&self, message: &CanonicalMessage) -> Option<PriceSample> {
        message
            .as_object()?
            .iter()
            .find_map(|(code, entry)| sample_from(code, entry))
    }
}

/// 선호 코드를 순서대로 시도한 뒤 [`FirstQuoted`]
pub fn default_extractors<S: AsRef<str>>(preferred: &[S]) -> Vec<Box<dyn PriceExtractor>> {
    let mut extractors: Vec<Box<dyn PriceExtractor>> = preferred
        .iter()
        .map(|code| Box::new(InstrumentKey(code.as_ref().to_string())) as Box<dyn PriceExtractor>)
        .collect();
    extractors.push(Box::new(FirstQuoted));
    extractors
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceDirection {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PriceHealth {
    /// 아직 유효한 가격을 받지 못함
    NoData,
    Live,
    /// 가격은 받았지만 staleness 구간 안의 것이 없음
    Stale,
}

/// 표시 계층이 읽는 read model
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PriceState {
    pub current_buy: f64,
    pub current_sell: f64,
    pub previous_buy: f64,
    pub change: f64,
    pub change_percent: f64,
    pub source: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PriceState {
    /// 샘플 적용. 0 이하 매수가는 상태를 건드리지 않고 거부.
    /// 변동 필드는 이전 가격이 양수일 때만 다시 계산
    pub fn apply(&mut self, sample: PriceSample, at: DateTime<Utc>) -> bool {
        if sample.buy <= 0.0 {
            return false;
        }

        let previous = self.current_buy;
        self.previous_buy = previous;
        self.current_buy = sample.buy;
        self.current_sell = sample.sell;
        self.source = Some(sample.source);
        self.updated_at = Some(at);

        if previous > 0.0 {
            self.change = self.current_buy - previous;
            self.change_percent = self.change / previous * 100.0;
        }
        true
    }

    pub fn has_price(&self) -> bool {
        self.current_buy > 0.0
    }

    pub fn direction(&self) -> PriceDirection {
        if self.change > 0.0 {
            PriceDirection::Up
        } else if self.change < 0.0 {
            PriceDirection::Down
        } else {
            PriceDirection::Flat
        }
    }

    pub fn price_display(&self) -> String {
        if self.has_price() {
            format!("{:.2}", self.current_buy)
        } else {
            "-.--".to_string()
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.updated_at {
            Some(at) => match (now - at).to_std() {
                Ok(age) => age > max_age,
                Err(_) => false, // 미래 시각의 업데이트
            },
            None => true,
        }
    }

    pub fn health(&self, now: DateTime<Utc>, max_age: Duration) -> PriceHealth {
        if !self.has_price() {
            PriceHealth::NoData
        } else if self.is_stale(now, max_age) {
            PriceHealth::Stale
        } else {
            PriceHealth::Live
        }
    }
}

/// 가격 read model의 공유 소유자
pub struct PriceTracker {
    state: RwLock<PriceState>,
    extractors: Vec<Box<dyn PriceExtractor>>,
}

impl PriceTracker {
    pub fn new<S: AsRef<str>>(preferred: &[S]) -> Self {
        Self::with_extractors(default_extractors(preferred))
    }

    pub fn with_extractors(extractors: Vec<Box<dyn PriceExtractor>>) -> Self {
        Self {
            state: RwLock::new(PriceState::default()),
            extractors,
        }
    }

    /// 우선순위 순서로 추출기 실행
    pub fn extract(&self, message: &CanonicalMessage) -> Option<PriceSample> {
        self.extractors.iter().find_map(|extractor| {
            let sample = extractor.extract(message)?;
            debug!("price extracted by {}: buy={} sell={}", extractor.name(), sample.buy, sample.sell);
            Some(sample)
        })
    }

    pub fn update(&self, message: &CanonicalMessage) -> bool {
        self.update_at(message, Utc::now())
    }

    pub fn update_at(&self, message: &CanonicalMessage, at: DateTime<Utc>) -> bool {
        let Some(sample) = self.extract(message) else {
            warn!("quote frame carries no usable price, state unchanged");
            return false;
        };

        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.apply(sample, at)
    }

    pub fn snapshot(&self) -> PriceState {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 트래커를 디스패처 소비자로 등록
    pub fn handler(self: &Arc<Self>) -> Handler {
        let tracker = Arc::clone(self);
        handler(move |message| {
            tracker.update(message);
            Ok(())
        })
    }
}

impl Default for PriceTracker {
    fn default() -> Self {
        Self::new(DEFAULT_PREFERRED_INSTRUMENTS)
    }
}

/// 시세 레코드의 모든 종목을 문서 순서대로 느슨하게 읽은 뷰
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuoteBoard {
    pub instruments: Vec<(String, InstrumentQuote)>,
}

impl QuoteBoard {
    pub fn from_message(message: &CanonicalMessage) -> Self {
        let instruments = message
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(code, entry)| instrument_quote(entry).map(|q| (code.clone(), q)))
                    .collect()
            })
            .unwrap_or_default();
        Self { instruments }
    }

    pub fn get(&self, code: &str) -> Option<&InstrumentQuote> {
        self.instruments.iter().find(|(c, _)| c == code).map(|(_, q)| q)
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}
