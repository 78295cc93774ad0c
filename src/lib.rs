//! Bee Research - 流式研究智能体服务
//!
//! 模块划分：
//! - **capture**: 上游输出捕获状态机（报告标记、思考步骤、工具调用请求）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类与优雅关闭
//! - **memory**: 有界会话记忆、会话统计、上下文渲染
//! - **observability**: tracing 初始化
//! - **research**: 对外事件、请求指标与会话控制器
//! - **tools**: 外部数据源工具定义、注册表、重试分发与有界并发调度
//! - **upstream**: 上游推理进程（子进程实现与脚本化测试实现）
//! - **web**: axum 路由（SSE 研究流、会话历史、健康检查）

pub mod capture;
pub mod config;
pub mod core;
pub mod memory;
pub mod observability;
pub mod research;
pub mod tools;
pub mod upstream;
pub mod web;
