//! 工具定义：端点模板、参数别名表、鉴权方式、重试策略
//!
//! ToolDefinition 在进程启动时从配置加载进 ToolRegistry，运行期只读。
//! 不同服务商的参数命名和鉴权方式差异都收敛在这里：
//! `normalize` 把调用方任意大小写/同义的参数名映射到规范名，
//! `build_request` 按 AuthMode 注入密钥并生成 HTTP 请求。

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;
use crate::tools::transport::{HttpMethod, ToolHttpRequest};

/// 规范化后的参数：规范名 -> 标量值（字符串 / 数字 / 布尔）
pub type NormalizedParams = BTreeMap<String, Value>;

/// 密钥最短长度，短于此视为无效（绝大多数服务商的 key 都更长）
const MIN_SECRET_LEN: usize = 10;

/// 单个参数：规范名（服务商期望的名字）+ 别名 + 是否必填
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(name: &str, aliases: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            required: true,
        }
    }

    pub fn optional(name: &str, aliases: &[&str]) -> Self {
        Self {
            required: false,
            ..Self::required(name, aliases)
        }
    }

    fn is_alias(&self, key: &str) -> bool {
        self.aliases.iter().any(|a| a.eq_ignore_ascii_case(key))
    }

    /// 键名（忽略大小写）是规范名或别名之一
    pub fn matches(&self, key: &str) -> bool {
        self.name.eq_ignore_ascii_case(key) || self.is_alias(key)
    }
}

/// 鉴权方式（封闭集合，按 mode 标签区分）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum AuthMode {
    #[default]
    None,
    /// Authorization: Bearer <key>
    Bearer { key_env: String },
    /// ?<param>=<key>
    QueryKey { param: String, key_env: String },
    /// <header>: <key>
    Header { header: String, key_env: String },
    /// 写入 JSON 请求体的 <field>
    BodyEmbedded { field: String, key_env: String },
}

impl AuthMode {
    /// 需要密钥时返回其环境变量名
    pub fn key_env(&self) -> Option<&str> {
        match self {
            AuthMode::None => None,
            AuthMode::Bearer { key_env }
            | AuthMode::QueryKey { key_env, .. }
            | AuthMode::Header { key_env, .. }
            | AuthMode::BodyEmbedded { key_env, .. } => Some(key_env),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Bearer { .. } => "bearer",
            AuthMode::QueryKey { .. } => "query-key",
            AuthMode::Header { .. } => "header",
            AuthMode::BodyEmbedded { .. } => "body-embedded",
        }
    }
}

/// 重试策略：总尝试次数 + 指数退避
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// 第 `retry` 次重试前的等待时间（retry 从 1 开始）
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exp = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let ms = self.initial_backoff_ms as f64 * self.multiplier.powi(exp);
        Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
    }

    /// 至少尝试一次
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// 一个可调用的外部能力（数据 API）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// 端点模板，`{param}` 占位符用规范化后的参数替换（并从查询串中移除）
    pub endpoint: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub auth: AuthMode,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl ToolDefinition {
    pub fn required_parameters(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }

    /// 参数规范化：键名小写后匹配规范名或别名；未知键、空值、非标量直接丢弃；缺必填参数返回 MissingParameter
    ///
    /// 规范名的精确匹配优先于别名，多个别名同时出现时按键名字典序取第一个。
    pub fn normalize(&self, raw: &serde_json::Map<String, Value>) -> Result<NormalizedParams, ToolError> {
        let mut out = NormalizedParams::new();
        let mut entries: Vec<(String, &Value)> = raw
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        for (key, value) in &entries {
            let Some(scalar) = scalar_value(value) else {
                continue;
            };
            if let Some(spec) = self.parameters.iter().find(|p| p.name.eq_ignore_ascii_case(key)) {
                out.insert(spec.name.clone(), scalar);
            }
        }
        for (key, value) in &entries {
            let Some(spec) = self.parameters.iter().find(|p| p.is_alias(key)) else {
                if !self.parameters.iter().any(|p| p.matches(key)) {
                    tracing::debug!(tool = %self.name, key = %key, "dropping unknown parameter");
                }
                continue;
            };
            if out.contains_key(&spec.name) {
                continue;
            }
            if let Some(scalar) = scalar_value(value) {
                out.insert(spec.name.clone(), scalar);
            }
        }

        if let Some(missing) = self
            .parameters
            .iter()
            .find(|p| p.required && !out.contains_key(&p.name))
        {
            return Err(ToolError::MissingParameter {
                tool: self.name.clone(),
                param: missing.name.clone(),
            });
        }
        Ok(out)
    }

    /// 实际使用的 HTTP 方法：密钥写在请求体里时总是 POST
    pub fn effective_method(&self) -> HttpMethod {
        match self.auth {
            AuthMode::BodyEmbedded { .. } => HttpMethod::Post,
            _ => self.method,
        }
    }

    /// 由规范化参数与密钥生成 HTTP 请求；需要鉴权却没有有效密钥时返回 MissingCredential
    pub fn build_request(
        &self,
        params: &NormalizedParams,
        secret: Option<&str>,
        timeout: Duration,
    ) -> Result<ToolHttpRequest, ToolError> {
        let secret = match self.auth.key_env() {
            None => None,
            Some(env) => match secret.map(str::trim) {
                Some(s) if s.len() >= MIN_SECRET_LEN => Some(s.to_string()),
                _ => {
                    return Err(ToolError::MissingCredential {
                        tool: self.name.clone(),
                        env: env.to_string(),
                    })
                }
            },
        };

        let mut remaining = params.clone();
        let url = self.render_endpoint(&mut remaining);

        let method = self.effective_method();
        let mut request = ToolHttpRequest {
            method,
            url,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout,
        };

        if method == HttpMethod::Post {
            let mut body = serde_json::Map::new();
            for (k, v) in remaining {
                body.insert(k, v);
            }
            request.body = Some(Value::Object(body));
        } else {
            request.query = remaining
                .into_iter()
                .map(|(k, v)| (k, scalar_to_string(&v)))
                .collect();
        }

        if let Some(key) = secret {
            match &self.auth {
                AuthMode::None => {}
                AuthMode::Bearer { .. } => {
                    request.headers.push(("Authorization".into(), format!("Bearer {key}")));
                }
                AuthMode::QueryKey { param, .. } => {
                    request.query.push((param.clone(), key));
                }
                AuthMode::Header { header, .. } => {
                    request.headers.push((header.clone(), key));
                }
                AuthMode::BodyEmbedded { field, .. } => {
                    if let Some(Value::Object(body)) = request.body.as_mut() {
                        body.insert(field.clone(), Value::String(key));
                    }
                }
            }
        }
        Ok(request)
    }

    fn render_endpoint(&self, params: &mut NormalizedParams) -> String {
        let mut url = self.endpoint.clone();
        let keys: Vec<String> = params.keys().cloned().collect();
        for key in keys {
            let placeholder = format!("{{{key}}}");
            if url.contains(&placeholder) {
                if let Some(value) = params.remove(&key) {
                    let encoded = urlencoding::encode(&scalar_to_string(&value)).into_owned();
                    url = url.replace(&placeholder, &encoded);
                }
            }
        }
        url
    }
}

fn scalar_value(value: &Value) -> Option<Value> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| Value::String(s.to_string()))
        }
        Value::Number(_) | Value::Bool(_) => Some(value.clone()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn news() -> ToolDefinition {
        ToolDefinition {
            name: "news".into(),
            description: "news search".into(),
            method: HttpMethod::Get,
            endpoint: "https://news.example.com/v2/everything".into(),
            parameters: vec![
                ParameterSpec::required("q", &["query", "search", "topic"]),
                ParameterSpec::optional("pageSize", &["limit", "page_size"]),
            ],
            auth: AuthMode::Header {
                header: "X-Api-Key".into(),
                key_env: "NEWS_API_KEY".into(),
            },
            retry: RetryPolicy::default(),
        }
    }

    fn map(v: Value) -> serde_json::Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_query_aliases_share_canonical_key() {
        let def = news();
        for key in ["query", "q", "search", "QUERY", "Search"] {
            let params = def.normalize(&map(json!({ key: "rust" }))).unwrap();
            assert_eq!(params.get("q"), Some(&json!("rust")), "alias {key}");
            assert_eq!(params.len(), 1);
        }
    }

    #[test]
    fn test_unknown_and_non_scalar_dropped() {
        let def = news();
        let params = def
            .normalize(&map(json!({
                "q": "ai",
                "color": "blue",
                "limit": [1, 2],
                "page_size": null
            })))
            .unwrap();
        assert_eq!(params.len(), 1);
        assert!(params.contains_key("q"));
    }

    #[test]
    fn test_canonical_name_wins_over_alias() {
        let def = news();
        let params = def
            .normalize(&map(json!({ "search": "alias", "q": "canonical" })))
            .unwrap();
        assert_eq!(params["q"], json!("canonical"));
    }

    #[test]
    fn test_missing_required_parameter() {
        let def = news();
        let err = def.normalize(&map(json!({ "limit": 5 }))).unwrap_err();
        assert_eq!(
            err,
            ToolError::MissingParameter {
                tool: "news".into(),
                param: "q".into()
            }
        );
        // 空字符串视为未提供
        assert!(def.normalize(&map(json!({ "q": "   " }))).is_err());
    }

    #[test]
    fn test_header_auth_injected() {
        let def = news();
        let params = def.normalize(&map(json!({ "q": "ai", "limit": 5 }))).unwrap();
        let req = def
            .build_request(&params, Some("abcdefghij123"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(req.headers, vec![("X-Api-Key".to_string(), "abcdefghij123".to_string())]);
        assert!(req.query.contains(&("q".to_string(), "ai".to_string())));
        assert!(req.query.contains(&("pageSize".to_string(), "5".to_string())));
        assert!(req.body.is_none());
    }

    #[test]
    fn test_missing_or_short_credential() {
        let def = news();
        let params = def.normalize(&map(json!({ "q": "ai" }))).unwrap();
        let err = def.build_request(&params, None, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ToolError::MissingCredential { .. }));
        let err = def.build_request(&params, Some("short"), Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ToolError::MissingCredential { .. }));
    }

    #[test]
    fn test_body_embedded_auth_and_path_placeholder() {
        let def = ToolDefinition {
            name: "quote".into(),
            description: String::new(),
            method: HttpMethod::Get,
            endpoint: "https://market.example.com/quote/{symbol}".into(),
            parameters: vec![ParameterSpec::required("symbol", &["ticker"])],
            auth: AuthMode::BodyEmbedded {
                field: "api_key".into(),
                key_env: "MARKET_KEY".into(),
            },
            retry: RetryPolicy::default(),
        };
        let params = def.normalize(&map(json!({ "Ticker": "BRK B" }))).unwrap();
        let req = def
            .build_request(&params, Some("0123456789abc"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(req.url, "https://market.example.com/quote/BRK%20B");
        assert_eq!(req.body, Some(json!({ "api_key": "0123456789abc" })));
    }

    #[test]
    fn test_body_embedded_auth_on_get_definition_is_sent_as_post() {
        let mut def = news();
        def.auth = AuthMode::BodyEmbedded {
            field: "apiKey".into(),
            key_env: "NEWS_API_KEY".into(),
        };
        assert_eq!(def.method, HttpMethod::Get);
        assert_eq!(def.effective_method(), HttpMethod::Post);

        let params = def.normalize(&map(json!({ "q": "ai" }))).unwrap();
        let req = def
            .build_request(&params, Some("0123456789abc"), Duration::from_secs(5))
            .unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert!(req.query.is_empty());
        assert_eq!(req.body, Some(json!({ "q": "ai", "apiKey": "0123456789abc" })));

        // 其它鉴权方式保持声明的方法
        def.auth = AuthMode::None;
        assert_eq!(def.effective_method(), HttpMethod::Get);
    }

    #[test]
    fn test_bearer_and_query_key() {
        let mut def = news();
        def.auth = AuthMode::Bearer { key_env: "K".into() };
        let params = def.normalize(&map(json!({ "q": "x" }))).unwrap();
        let req = def.build_request(&params, Some("secret-token-1"), Duration::from_secs(1)).unwrap();
        assert_eq!(req.headers[0].1, "Bearer secret-token-1");

        def.auth = AuthMode::QueryKey { param: "key".into(), key_env: "K".into() };
        let req = def.build_request(&params, Some("secret-token-1"), Duration::from_secs(1)).unwrap();
        assert!(req.query.contains(&("key".to_string(), "secret-token-1".to_string())));
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_retry_backoff_exponential_and_capped() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff_ms: 100,
            multiplier: 2.0,
            max_backoff_ms: 300,
        };
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(RetryPolicy { max_attempts: 0, ..policy }.attempts(), 1);
    }

    #[test]
    fn test_auth_mode_deserialize() {
        let def: ToolDefinition = from_json(
            r#"{
                "name": "w",
                "endpoint": "https://w.example.com",
                "auth": { "mode": "query-key", "param": "key", "key_env": "WEATHER_API_KEY" }
            }"#,
        );
        assert_eq!(def.auth.tag(), "query-key");
        assert_eq!(def.auth.key_env(), Some("WEATHER_API_KEY"));
        assert_eq!(def.retry, RetryPolicy::default());
    }

    fn from_json(s: &str) -> ToolDefinition {
        serde_json::from_str(s).unwrap()
    }
}
