//! Mock HTTP 传输（用于测试，无需网络）
//!
//! 按入队顺序返回预设响应，队列空时返回 200 "{}"；记录收到的每个请求。
//! `in_flight()` 统计尚未返回的调用数，调用 future 被丢弃时也会减一，便于断言取消生效。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::tools::transport::{HttpTransport, ToolHttpRequest, TransportError, TransportResponse};

#[derive(Debug, Default)]
pub struct MockTransport {
    responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    requests: Mutex<Vec<ToolHttpRequest>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 每次调用先等待 `delay` 再返回
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_ok(&self, body: &str) {
        self.push_status(200, body);
    }

    pub fn push_status(&self, status: u16, body: &str) {
        self.push(Ok(TransportResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_err(&self, err: TransportError) {
        self.push(Err(err));
    }

    fn push(&self, item: Result<TransportResponse, TransportError>) {
        if let Ok(mut q) = self.responses.lock() {
            q.push_back(item);
        }
    }

    pub fn requests(&self) -> Vec<ToolHttpRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// 同时在途调用数的峰值
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

/// 离开作用域（正常返回或 future 被丢弃）时计数减一
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: ToolHttpRequest) -> Result<TransportResponse, TransportError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());
        if let Ok(mut r) = self.requests.lock() {
            r.push(request);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.responses.lock().ok().and_then(|mut q| q.pop_front());
        next.unwrap_or_else(|| {
            Ok(TransportResponse {
                status: 200,
                body: "{}".to_string(),
            })
        })
    }
}
