//! 工具注册表
//!
//! 进程启动时由配置中的 ToolDefinition 构建一次，之后只读、在请求间共享（Arc）。
//! 密钥在构建时按 AuthMode 中的环境变量名解析，不写入定义本身，也不会出现在 /api/tools 输出中。

use std::collections::HashMap;

use serde::Serialize;

use crate::tools::definition::ToolDefinition;

/// 定义 + 构建时解析出的密钥
#[derive(Debug, Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    secret: Option<String>,
}

impl RegisteredTool {
    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

/// 供 /api/tools 展示的工具元数据（不含密钥）
#[derive(Debug, Clone, Serialize)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
    pub required_parameters: Vec<String>,
    pub auth: &'static str,
    pub credential_configured: bool,
}

/// 只读工具注册表：按名称（忽略大小写）查找
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由定义列表构建，密钥通过 `lookup(env_name)` 解析（生产环境为 std::env::var）
    pub fn from_definitions<F>(definitions: Vec<ToolDefinition>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut registry = Self::new();
        for definition in definitions {
            let secret = definition.auth.key_env().and_then(|env| {
                let value = lookup(env).filter(|v| !v.trim().is_empty());
                if value.is_none() {
                    tracing::warn!(tool = %definition.name, env = %env, "API key not found in environment");
                }
                value
            });
            registry.register(definition, secret);
        }
        registry
    }

    pub fn from_env(definitions: Vec<ToolDefinition>) -> Self {
        Self::from_definitions(definitions, |env| std::env::var(env).ok())
    }

    pub fn register(&mut self, definition: ToolDefinition, secret: Option<String>) {
        let key = definition.name.trim().to_lowercase();
        if self.tools.contains_key(&key) {
            tracing::warn!(tool = %definition.name, "duplicate tool definition replaces earlier one");
        }
        self.tools.insert(key, RegisteredTool { definition, secret });
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(&name.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 工具名（排序后，保证输出稳定）
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .values()
            .map(|t| t.definition.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn summaries(&self) -> Vec<ToolSummary> {
        let mut out: Vec<ToolSummary> = self
            .tools
            .values()
            .map(|t| ToolSummary {
                name: t.definition.name.clone(),
                description: t.definition.description.clone(),
                required_parameters: t
                    .definition
                    .required_parameters()
                    .into_iter()
                    .map(String::from)
                    .collect(),
                auth: t.definition.auth.tag(),
                credential_configured: t.definition.auth.key_env().is_none() || t.secret.is_some(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
