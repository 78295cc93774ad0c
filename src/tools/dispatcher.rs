//! 工具分发器
//!
//! `dispatch(name, raw)` 是工具层对外的唯一入口：查表 → 参数规范化 → 鉴权注入 → 有界重试 → 产出 ToolCallRecord。
//! 任何失败都不会向外抛出，只会落成 failed / timeout 记录；每次调用输出一条 JSON 审计日志。
//! 分发器不持有跨请求状态，可在并发请求间共享。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::core::ToolError;
use crate::tools::definition::{NormalizedParams, RetryPolicy};
use crate::tools::record::{ToolCallRecord, ToolOutcome};
use crate::tools::registry::ToolRegistry;
use crate::tools::transport::{HttpTransport, ToolHttpRequest, TransportError, TransportResponse};

const TRUNCATION_SUFFIX: &str = "...[truncated]";

/// 单次尝试的失败分类
#[derive(Debug)]
enum AttemptFailure {
    Timeout,
    Transient(String),
    Permanent(String),
}

impl AttemptFailure {
    fn classify(result: Result<TransportResponse, TransportError>) -> Result<String, AttemptFailure> {
        match result {
            Ok(resp) if resp.is_success() => Ok(resp.body),
            Ok(resp) => {
                let detail = format!("HTTP {}: {}", resp.status, preview(&resp.body, 200));
                // 5xx 与 429 可重试，其余 4xx 立即失败
                if resp.status >= 500 || resp.status == 429 {
                    Err(AttemptFailure::Transient(detail))
                } else {
                    Err(AttemptFailure::Permanent(detail))
                }
            }
            Err(TransportError::Timeout) => Err(AttemptFailure::Timeout),
            Err(TransportError::Connect(e)) => Err(AttemptFailure::Transient(e)),
            Err(TransportError::Other(e)) => Err(AttemptFailure::Permanent(e)),
        }
    }

    fn detail(&self) -> String {
        match self {
            AttemptFailure::Timeout => "request timed out".to_string(),
            AttemptFailure::Transient(d) | AttemptFailure::Permanent(d) => d.clone(),
        }
    }
}

/// 已通过校验、可以发出的调用
struct PreparedCall {
    name: String,
    params: NormalizedParams,
    request: ToolHttpRequest,
    retry: RetryPolicy,
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    transport: Arc<dyn HttpTransport>,
    attempt_timeout: Duration,
    output_max_chars: usize,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        transport: Arc<dyn HttpTransport>,
        attempt_timeout: Duration,
        output_max_chars: usize,
    ) -> Self {
        Self {
            registry,
            transport,
            attempt_timeout,
            output_max_chars,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// 调用一个工具；总是返回终态记录
    pub async fn dispatch(&self, name: &str, raw: &Value) -> ToolCallRecord {
        let start = Instant::now();
        let empty = serde_json::Map::new();
        let raw_params = raw.as_object().unwrap_or(&empty);

        let record = match self.prepare(name, raw_params) {
            Ok(call) => self.invoke(call, start).await,
            Err((params, err)) => failed_record(name, params, &err, 0, start.elapsed()),
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": record.name,
            "ok": record.is_success(),
            "outcome": record.outcome,
            "attempts": record.attempts,
            "duration_ms": record.duration_ms(),
            "args_preview": preview(&raw.to_string(), 200),
        });
        tracing::info!(audit = %audit, "tool");
        record
    }

    /// 网络请求前的全部校验：未知工具、缺参数、缺密钥都在这里短路
    fn prepare(
        &self,
        name: &str,
        raw: &serde_json::Map<String, Value>,
    ) -> Result<PreparedCall, (NormalizedParams, ToolError)> {
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| (NormalizedParams::new(), ToolError::ToolNotFound(name.to_string())))?;
        let def = &tool.definition;
        let params = def.normalize(raw).map_err(|e| (NormalizedParams::new(), e))?;
        let request = def
            .build_request(&params, tool.secret(), self.attempt_timeout)
            .map_err(|e| (params.clone(), e))?;
        Ok(PreparedCall {
            name: def.name.clone(),
            params,
            request,
            retry: def.retry.clone(),
        })
    }

    /// 有界重试循环：尝试次数与每次等待时间都由 RetryPolicy 显式给出
    async fn invoke(&self, call: PreparedCall, start: Instant) -> ToolCallRecord {
        let PreparedCall {
            name,
            params,
            request,
            retry,
        } = call;
        let max_attempts = retry.attempts();
        let mut last_failure = AttemptFailure::Permanent("no attempt made".to_string());
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(retry.backoff(attempt - 1)).await;
            }
            attempts = attempt;
            let result = match tokio::time::timeout(self.attempt_timeout, self.transport.send(request.clone())).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout),
            };
            match AttemptFailure::classify(result) {
                Ok(body) => {
                    return ToolCallRecord {
                        name,
                        parameters: params,
                        outcome: ToolOutcome::Success,
                        duration: start.elapsed(),
                        attempts,
                        output: Some(self.format_output(&body)),
                        error: None,
                    };
                }
                Err(failure) => {
                    tracing::warn!(
                        tool = %name,
                        attempt,
                        max_attempts,
                        error = %failure.detail(),
                        "tool attempt failed"
                    );
                    let retryable = !matches!(failure, AttemptFailure::Permanent(_));
                    last_failure = failure;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let err = ToolError::ToolInvocationFailed {
            tool: name.clone(),
            attempts,
            detail: last_failure.detail(),
        };
        let mut record = failed_record(&name, params, &err, attempts, start.elapsed());
        if matches!(last_failure, AttemptFailure::Timeout) {
            record.outcome = ToolOutcome::Timeout;
        }
        record
    }

    /// 可解析为 JSON 时压缩输出，超长截断
    fn format_output(&self, body: &str) -> String {
        let compact = serde_json::from_str::<Value>(body)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| body.trim().to_string());
        if compact.chars().count() > self.output_max_chars {
            let mut out: String = compact.chars().take(self.output_max_chars).collect();
            out.push_str(TRUNCATION_SUFFIX);
            out
        } else {
            compact
        }
    }
}

fn failed_record(
    name: &str,
    params: NormalizedParams,
    err: &ToolError,
    attempts: u32,
    duration: Duration,
) -> ToolCallRecord {
    ToolCallRecord {
        name: name.to_string(),
        parameters: params,
        outcome: ToolOutcome::Failed,
        duration,
        attempts,
        output: None,
        error: Some(err.diagnostic()),
    }
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::definition::{AuthMode, ParameterSpec, ToolDefinition};
    use crate::tools::mock::MockTransport;
    use crate::tools::transport::HttpMethod;
    use serde_json::json;

    fn weather_def(retry: RetryPolicy) -> ToolDefinition {
        ToolDefinition {
            name: "weather".into(),
            description: "current weather".into(),
            method: HttpMethod::Get,
            endpoint: "https://weather.example.com/v1/current.json".into(),
            parameters: vec![ParameterSpec::required("q", &["city", "location", "place", "query"])],
            auth: AuthMode::QueryKey {
                param: "key".into(),
                key_env: "WEATHER_API_KEY".into(),
            },
            retry,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            multiplier: 2.0,
            max_backoff_ms: 5,
        }
    }

    fn dispatcher(def: ToolDefinition, transport: Arc<MockTransport>) -> Dispatcher {
        let registry = ToolRegistry::from_definitions(vec![def], |_| Some("weather-secret-key".to_string()));
        Dispatcher::new(Arc::new(registry), transport, Duration::from_millis(200), 4000)
    }

    #[tokio::test]
    async fn test_city_normalizes_to_location_param() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(r#"{ "temp_c": 21.5 }"#);
        let d = dispatcher(weather_def(fast_retry(3)), transport.clone());

        let record = d.dispatch("weather", &json!({ "city": "Chicago" })).await;
        assert_eq!(record.name, "weather");
        assert_eq!(record.outcome, ToolOutcome::Success);
        assert_eq!(record.parameters.get("q"), Some(&json!("Chicago")));
        assert_eq!(record.output.as_deref(), Some(r#"{"temp_c":21.5}"#));

        let sent = transport.requests();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].query.contains(&("q".to_string(), "Chicago".to_string())));
        assert!(sent[0].query.contains(&("key".to_string(), "weather-secret-key".to_string())));
    }

    #[tokio::test]
    async fn test_builtin_weather_accepts_every_query_key() {
        let transport = Arc::new(MockTransport::new());
        let registry = ToolRegistry::from_definitions(crate::tools::default_definitions(), |_| {
            Some("weather-secret-key".to_string())
        });
        let d = Dispatcher::new(Arc::new(registry), transport.clone(), Duration::from_millis(200), 4000);

        for key in ["q", "query", "search"] {
            let record = d.dispatch("WeatherAPI", &json!({ key: "Chicago" })).await;
            assert_eq!(record.name, "WeatherAPI");
            assert_eq!(record.outcome, ToolOutcome::Success, "key {key}");
            assert_eq!(record.parameters.get("q"), Some(&json!("Chicago")), "key {key}");
        }
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failed_record() {
        let transport = Arc::new(MockTransport::new());
        let d = dispatcher(weather_def(fast_retry(3)), transport.clone());
        let record = d.dispatch("stocks", &json!({})).await;
        assert_eq!(record.outcome, ToolOutcome::Failed);
        assert_eq!(record.error.unwrap().code, "TOOL001");
        assert_eq!(record.attempts, 0);
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_parameter_never_reaches_network() {
        let transport = Arc::new(MockTransport::new());
        let d = dispatcher(weather_def(fast_retry(3)), transport.clone());
        let record = d.dispatch("weather", &json!({ "units": "metric" })).await;
        assert_eq!(record.outcome, ToolOutcome::Failed);
        assert_eq!(record.error.unwrap().code, "PARAM001");
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_missing_credential_never_reaches_network() {
        let transport = Arc::new(MockTransport::new());
        let registry = ToolRegistry::from_definitions(vec![weather_def(fast_retry(3))], |_| None);
        let d = Dispatcher::new(Arc::new(registry), transport.clone(), Duration::from_millis(200), 4000);
        let record = d.dispatch("weather", &json!({ "city": "Oslo" })).await;
        assert_eq!(record.error.unwrap().code, "AUTH001");
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_retried_until_success() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(503, "unavailable");
        transport.push_err(TransportError::Connect("reset by peer".into()));
        transport.push_ok("sunny");
        let d = dispatcher(weather_def(fast_retry(3)), transport.clone());

        let record = d.dispatch("weather", &json!({ "q": "Paris" })).await;
        assert_eq!(record.outcome, ToolOutcome::Success);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.output.as_deref(), Some("sunny"));
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(401, "bad key");
        transport.push_ok("never used");
        let d = dispatcher(weather_def(fast_retry(3)), transport.clone());

        let record = d.dispatch("weather", &json!({ "q": "Paris" })).await;
        assert_eq!(record.outcome, ToolOutcome::Failed);
        assert_eq!(record.attempts, 1);
        let diag = record.error.unwrap();
        assert_eq!(diag.code, "NET001");
        assert!(diag.message.contains("HTTP 401"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.push_status(429, "slow down");
        transport.push_ok("ok");
        let d = dispatcher(weather_def(fast_retry(2)), transport.clone());
        let record = d.dispatch("weather", &json!({ "q": "Rome" })).await;
        assert!(record.is_success());
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausted_timeouts_yield_timeout_outcome() {
        let transport = Arc::new(MockTransport::new());
        transport.push_err(TransportError::Timeout);
        transport.push_err(TransportError::Timeout);
        let d = dispatcher(weather_def(fast_retry(2)), transport.clone());
        let record = d.dispatch("weather", &json!({ "q": "Lima" })).await;
        assert_eq!(record.outcome, ToolOutcome::Timeout);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.outcome.wire_status(), "failed");
    }

    #[tokio::test]
    async fn test_hung_transport_hits_attempt_timeout() {
        let transport = Arc::new(MockTransport::new().with_delay(Duration::from_secs(5)));
        transport.push_ok("too late");
        let d = dispatcher(weather_def(RetryPolicy::no_retry()), transport);
        let record = d.dispatch("weather", &json!({ "q": "Kyiv" })).await;
        assert_eq!(record.outcome, ToolOutcome::Timeout);
        assert!(record.duration >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let transport = Arc::new(MockTransport::new());
        transport.push_ok(&"x".repeat(50));
        let registry = ToolRegistry::from_definitions(vec![weather_def(fast_retry(1))], |_| Some("weather-secret-key".into()));
        let d = Dispatcher::new(Arc::new(registry), transport, Duration::from_millis(200), 10);
        let record = d.dispatch("weather", &json!({ "q": "Bern" })).await;
        assert_eq!(record.output.as_deref(), Some("xxxxxxxxxx...[truncated]"));
    }
}
