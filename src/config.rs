//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE_RESEARCH__*` 覆盖（双下划线表示嵌套，如 `BEE_RESEARCH__SERVER__PORT=9000`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::research::ControllerSettings;
use crate::tools::{default_definitions, ToolDefinition};

pub const ENV_PREFIX: &str = "BEE_RESEARCH";

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub upstream: UpstreamSection,
    pub session: SessionSection,
    pub capture: CaptureSection,
    pub tools: ToolsSection,
}

/// [server] 段：监听地址与 CORS 来源
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8001
}

fn default_allowed_origins() -> Vec<String> {
    (3000..=3002).map(|p| format!("http://localhost:{p}")).collect()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

/// [upstream] 段：推理进程命令行、模型与超时
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSection {
    #[serde(default = "default_program")]
    pub program: String,
    /// 支持 `{query}` / `{model}` 占位符
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    #[serde(default = "default_model")]
    pub default_model: String,
    /// 允许的模型列表，为空表示不限制
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default = "default_turn_timeout_secs")]
    pub turn_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,
    #[serde(default = "default_stderr_max_chars")]
    pub stderr_max_chars: usize,
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["research_agent.py".to_string(), "--model".to_string(), "{model}".to_string()]
}

fn default_model() -> String {
    "gpt-4.1".to_string()
}

fn default_turn_timeout_secs() -> u64 {
    120
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_kill_grace_ms() -> u64 {
    2000
}

fn default_stderr_max_chars() -> usize {
    4000
}

impl Default for UpstreamSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            default_model: default_model(),
            models: Vec::new(),
            turn_timeout_secs: default_turn_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            kill_grace_ms: default_kill_grace_ms(),
            stderr_max_chars: default_stderr_max_chars(),
        }
    }
}

impl UpstreamSection {
    /// 请求未指定模型时用默认模型；不在允许列表中返回 None
    pub fn resolve_model(&self, requested: Option<&str>) -> Option<String> {
        let model = requested
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.default_model);
        if self.models.is_empty() || self.models.iter().any(|m| m == model) {
            Some(model.to_string())
        } else {
            None
        }
    }
}

/// [session] 段：会话记忆容量与过期
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_max_exchanges")]
    pub max_exchanges: usize,
    /// 空闲会话过期小时数，0 表示不过期
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u64,
    /// 渲染进上游输入的历史条数
    #[serde(default = "default_context_exchanges")]
    pub context_exchanges: usize,
    #[serde(default = "default_response_preview_chars")]
    pub response_preview_chars: usize,
}

fn default_max_exchanges() -> usize {
    10
}

fn default_ttl_hours() -> u64 {
    0
}

fn default_context_exchanges() -> usize {
    5
}

fn default_response_preview_chars() -> usize {
    200
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            max_exchanges: default_max_exchanges(),
            ttl_hours: default_ttl_hours(),
            context_exchanges: default_context_exchanges(),
            response_preview_chars: default_response_preview_chars(),
        }
    }
}

/// [capture] 段
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSection {
    /// 报告内容累积到多少字符时提前输出
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

fn default_flush_threshold() -> usize {
    200
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
        }
    }
}

/// [tools] 段：并发、调用上限、超时与工具定义
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// 单次请求内工具调用总数上限
    #[serde(default = "default_max_invocations")]
    pub max_invocations: usize,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_output_max_chars")]
    pub output_max_chars: usize,
    /// 未配置时使用内置数据源
    #[serde(default)]
    pub definitions: Option<Vec<ToolDefinition>>,
}

fn default_max_concurrency() -> usize {
    3
}

fn default_max_invocations() -> usize {
    8
}

fn default_attempt_timeout_secs() -> u64 {
    10
}

fn default_output_max_chars() -> usize {
    4000
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_invocations: default_max_invocations(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            output_max_chars: default_output_max_chars(),
            definitions: None,
        }
    }
}

impl ToolsSection {
    pub fn effective_definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone().unwrap_or_else(default_definitions)
    }
}

impl AppConfig {
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            max_invocations: self.tools.max_invocations,
            turn_timeout: Duration::from_secs(self.upstream.turn_timeout_secs),
            request_timeout: Duration::from_secs(self.upstream.request_timeout_secs),
            kill_grace: Duration::from_millis(self.upstream.kill_grace_ms),
            flush_threshold: self.capture.flush_threshold,
            context_exchanges: self.session.context_exchanges,
            response_preview_chars: self.session.response_preview_chars,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// 从 config 目录加载配置，环境变量 BEE_RESEARCH__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE_RESEARCH__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
