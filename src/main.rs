//! Bee Research 服务入口
//!
//! 用法：`bee-research [config.toml]`。初始化日志与配置，启动 HTTP 服务，Ctrl+C / SIGTERM 优雅关闭。

use std::sync::Arc;

use anyhow::Context;
use bee_research::config::load_config;
use bee_research::core::ShutdownManager;
use bee_research::observability;
use bee_research::tools::ReqwestTransport;
use bee_research::upstream::ProcessUpstream;
use bee_research::web::{build_state, router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(Into::into);
    let config = load_config(config_path).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let upstream = ProcessUpstream::new(config.upstream.program.clone(), config.upstream.args.clone())
        .with_working_dir(config.upstream.working_dir.clone())
        .with_stderr_max_chars(config.upstream.stderr_max_chars);
    let state = build_state(
        &config,
        Arc::new(ReqwestTransport::new()),
        Arc::new(upstream),
        Arc::clone(&shutdown),
    );
    tracing::info!(tools = ?state.registry().tool_names(), "tool registry ready");
    let app = router(state, &config.server.allowed_origins);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(%addr, "Bee Research listening");

    let signal = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { signal.wait_for_shutdown().await })
        .await
        .context("Server error")?;

    tracing::info!("Bee Research stopped");
    Ok(())
}
