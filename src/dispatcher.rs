//! 정규화된 메시지를 등록된 소비자에게 fan-out.

use crate::normalizer::CanonicalMessage;
use log::{debug, error};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};

/// 소비자 콜백. 클라이언트는 참조만 보관하고 소비자 자체는 소유하지 않음
pub type Handler = Arc<dyn Fn(&CanonicalMessage) -> anyhow::Result<()> + Send + Sync>;

/// 클로저를 [`Handler`]로 감쌈
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&CanonicalMessage) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: Mutex<Vec<Handler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// `handler` 추가. 같은 핸들러를 두 번 등록하면 두 번 전달됨
    pub fn subscribe(&self, handler: Handler) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        handlers.push(handler);
        debug!("handler subscribed ({} registered)", handlers.len());
    }

    /// `handler`의 첫 번째 등록을 제거 (identity 기준)
    pub fn unsubscribe(&self, handler: &Handler) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        match handlers.iter().position(|h| Arc::ptr_eq(h, handler)) {
            Some(idx) => {
                handlers.remove(idx);
                debug!("handler unsubscribed ({} registered)", handlers.len());
                true
            }
            None => false,
        }
    }

    /// 등록 순서대로 모든 핸들러 호출
    ///
    /// 에러를 내거나 panic한 핸들러는 로그만 남기고 건너뛰며 나머지는 계속 실행.
    /// 레지스트리를 먼저 스냅샷하므로 콜백 안에서 구독/해제해도
    /// 변경은 다음 메시지부터 적용됨
    pub fn dispatch(&self, message: &CanonicalMessage) -> DispatchReport {
        let snapshot: Vec<Handler> = self.handlers.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut report = DispatchReport::default();

        for (idx, handler) in snapshot.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!("message handler #{} failed: {:#}", idx, e);
                }
                Err(payload) => {
                    report.failed += 1;
                    error!("message handler #{} panicked: {}", idx, panic_message(payload.as_ref()));
                }
            }
        }

        report
    }

    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
