//! 会话控制器：一次研究请求的完整生命周期
//!
//! initializing → running → (tool loop)* → finalizing → closed
//!
//! - initializing：从会话存储取历史（未知会话按空上下文处理），启动上游推理进程
//! - running：逐块读取上游输出，经捕获状态机转成事件并按到达顺序转发
//! - tool loop：解析工具调用、有界并发分发、逐条发出 tool 事件、把结果按请求顺序回写上游
//! - finalizing：持久化本次问答，发出 intelligence，再发出 complete
//!
//! 请求级错误（上游失败、超时、工具循环超限）只发一个 error 再强制 complete；
//! 客户端断开时不再发送任何事件，终止上游进程并丢弃在途工具调用，不持久化。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capture::{CaptureEvent, CaptureMachine};
use crate::core::ResearchError;
use crate::memory::{render_context, Exchange, SessionStore};
use crate::research::events::OutboundEvent;
use crate::research::metrics::RequestMetrics;
use crate::research::sink::EventSink;
use crate::research::tool_call::parse_tool_calls;
use crate::tools::{Dispatcher, ToolCallRecord, ToolScheduler};
use crate::upstream::{ReasoningProcess, UpstreamExit, UpstreamInput, UpstreamRun};

/// 一次研究请求
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchRequest {
    pub query: String,
    pub session_id: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// 单次请求内工具调用总数上限
    pub max_invocations: usize,
    /// 上游单轮上限：从请求开始或上一次回写工具结果起计时
    pub turn_timeout: Duration,
    /// 整体请求硬上限
    pub request_timeout: Duration,
    /// 上游退出的等待宽限，超时则强制终止
    pub kill_grace: Duration,
    pub flush_threshold: usize,
    /// 渲染进上游输入的历史条数
    pub context_exchanges: usize,
    pub response_preview_chars: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            max_invocations: 8,
            turn_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(600),
            kill_grace: Duration::from_millis(2000),
            flush_threshold: 200,
            context_exchanges: 5,
            response_preview_chars: 200,
        }
    }
}

/// 请求的结束方式
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    Failed(ResearchError),
    Cancelled,
}

/// 单个请求运行期间的可变状态
struct RequestState {
    machine: CaptureMachine,
    metrics: RequestMetrics,
    records: Vec<ToolCallRecord>,
    invocations: usize,
    deadline: Instant,
    turn_deadline: Instant,
}

pub struct SessionController {
    dispatcher: Arc<Dispatcher>,
    scheduler: ToolScheduler,
    store: Arc<dyn SessionStore>,
    upstream: Arc<dyn ReasoningProcess>,
    settings: ControllerSettings,
}

impl SessionController {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        scheduler: ToolScheduler,
        store: Arc<dyn SessionStore>,
        upstream: Arc<dyn ReasoningProcess>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            dispatcher,
            scheduler,
            store,
            upstream,
            settings,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// 运行一次请求，事件写入 `sink`；返回时 sink 上要么已有 complete，要么客户端已断开
    pub async fn run(&self, request: ResearchRequest, sink: &mut EventSink, cancel: CancellationToken) -> RunOutcome {
        tracing::info!(
            session_id = %request.session_id,
            model = %request.model,
            max_concurrency = self.scheduler.max_concurrency(),
            "research started"
        );
        let tool_count = self.dispatcher.registry().len();
        if sink
            .emit(OutboundEvent::status(format!("Starting research with {tool_count} tools...")))
            .is_err()
        {
            return RunOutcome::Cancelled;
        }

        let input = UpstreamInput {
            query: request.query.clone(),
            model: request.model.clone(),
            session_id: request.session_id.clone(),
            context: self.load_context(&request.session_id).await,
        };
        let mut run = match self.upstream.start(&input).await {
            Ok(run) => run,
            Err(e) => return self.fail(&request, sink, e),
        };

        let result = self.drive(&request, run.as_mut(), sink, &cancel).await;
        let outcome = match result {
            Ok(()) => {
                tracing::info!(session_id = %request.session_id, "research completed");
                RunOutcome::Completed
            }
            Err(ResearchError::Cancelled) => {
                tracing::info!(session_id = %request.session_id, "research cancelled by client");
                RunOutcome::Cancelled
            }
            Err(e) => self.fail(&request, sink, e),
        };
        self.reap(run.as_mut(), &outcome).await;
        debug_assert!(
            sink.is_completed() || sink.is_disconnected() || matches!(outcome, RunOutcome::Cancelled),
            "run ended without complete"
        );
        outcome
    }

    async fn load_context(&self, session_id: &str) -> String {
        match self.store.get(session_id).await {
            Ok(exchanges) => render_context(
                &exchanges,
                self.settings.context_exchanges,
                self.settings.response_preview_chars,
            ),
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "no prior context");
                String::new()
            }
        }
    }

    async fn drive(
        &self,
        request: &ResearchRequest,
        run: &mut dyn UpstreamRun,
        sink: &mut EventSink,
        cancel: &CancellationToken,
    ) -> Result<(), ResearchError> {
        let started = Instant::now();
        let mut state = RequestState {
            machine: CaptureMachine::new(self.settings.flush_threshold),
            metrics: RequestMetrics::new(&request.model),
            records: Vec::new(),
            invocations: 0,
            deadline: started + self.settings.request_timeout,
            turn_deadline: started + self.settings.turn_timeout,
        };

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResearchError::Cancelled),
                _ = tokio::time::sleep_until(state.deadline) => return Err(self.request_timeout()),
                _ = tokio::time::sleep_until(state.turn_deadline) => return Err(self.turn_timeout()),
                chunk = run.next_chunk() => chunk?,
            };

            let events = match chunk {
                Some(chunk) => state.machine.feed(&chunk),
                None => {
                    let exit = self.await_exit(run).await;
                    tracing::debug!(code = ?exit.code, "reasoning process exited");
                    state.machine.finish(&exit)
                }
            };

            for event in events {
                match event {
                    CaptureEvent::Status(message) => sink.emit(OutboundEvent::status(message))?,
                    CaptureEvent::Content(data) => {
                        state.metrics.record_content(&data);
                        sink.emit(OutboundEvent::content(data))?;
                    }
                    CaptureEvent::Thinking(step) => {
                        state.metrics.record_thinking(&step);
                        sink.emit(OutboundEvent::thinking(step))?;
                    }
                    CaptureEvent::Debug(message) => {
                        tracing::debug!(upstream = %message, "upstream output");
                        sink.emit(OutboundEvent::debug(message))?;
                    }
                    CaptureEvent::ToolRequest(payload) => {
                        self.tool_turn(&payload, run, sink, cancel, &mut state).await?;
                    }
                    CaptureEvent::Failed(message) => return Err(ResearchError::UpstreamProcessFailed(message)),
                    CaptureEvent::Complete => return self.finalize(request, sink, cancel, state).await,
                }
            }
        }
    }

    /// 一轮工具调用；结果按请求顺序回写上游
    async fn tool_turn(
        &self,
        payload: &str,
        run: &mut dyn UpstreamRun,
        sink: &mut EventSink,
        cancel: &CancellationToken,
        state: &mut RequestState,
    ) -> Result<(), ResearchError> {
        let calls = match parse_tool_calls(payload) {
            Ok(calls) => calls,
            Err(e) => {
                tracing::warn!(error = %e, "malformed tool call from reasoning process");
                sink.emit(OutboundEvent::debug(format!("Ignoring malformed tool call: {e}")))?;
                let reply = serde_json::json!({ "tool_results": [], "error": e.to_string() });
                run.send_line(&reply.to_string()).await?;
                state.turn_deadline = Instant::now() + self.settings.turn_timeout;
                return Ok(());
            }
        };

        state.invocations += calls.len();
        if state.invocations > self.settings.max_invocations {
            return Err(ResearchError::ToolLoopExceeded {
                limit: self.settings.max_invocations,
            });
        }

        let records = tokio::select! {
            _ = tokio::time::sleep_until(state.deadline) => return Err(self.request_timeout()),
            records = self.scheduler.run_turn(&self.dispatcher, &calls, cancel) => records?,
        };

        for record in &records {
            state.metrics.record_tool(record);
            sink.emit(OutboundEvent::tool(record))?;
        }
        let results: Vec<_> = records.iter().map(ToolCallRecord::to_result_json).collect();
        let reply = serde_json::json!({ "tool_results": results });
        run.send_line(&reply.to_string()).await?;
        state.records.extend(records);
        // 上游开始新的一轮
        state.turn_deadline = Instant::now() + self.settings.turn_timeout;
        Ok(())
    }

    /// 持久化 → intelligence → complete
    async fn finalize(
        &self,
        request: &ResearchRequest,
        sink: &mut EventSink,
        cancel: &CancellationToken,
        state: RequestState,
    ) -> Result<(), ResearchError> {
        if cancel.is_cancelled() || sink.is_disconnected() {
            return Err(ResearchError::Cancelled);
        }
        let report = state.metrics.report();

        let mut exchange = Exchange::new(
            request.query.clone(),
            response_text(state.metrics.content()),
            request.model.clone(),
        );
        exchange.tool_calls = state.records;
        exchange.reasoning_steps = state.metrics.thinking_steps().to_vec();
        self.store.append(&request.session_id, exchange).await;

        sink.emit(OutboundEvent::Intelligence { content: report })?;
        sink.emit(OutboundEvent::Complete)
    }

    fn fail(&self, request: &ResearchRequest, sink: &mut EventSink, err: ResearchError) -> RunOutcome {
        debug_assert!(err.is_request_fatal(), "non-fatal error reached fail(): {err}");
        tracing::warn!(session_id = %request.session_id, error = %err, "research failed");
        // 客户端已断开时发送失败可以忽略
        let _ = sink.emit(OutboundEvent::error(err.to_string()));
        let _ = sink.emit(OutboundEvent::Complete);
        RunOutcome::Failed(err)
    }

    fn turn_timeout(&self) -> ResearchError {
        ResearchError::StreamTimeout(format!(
            "reasoning process turn exceeded {}ms",
            self.settings.turn_timeout.as_millis()
        ))
    }

    fn request_timeout(&self) -> ResearchError {
        ResearchError::StreamTimeout(format!(
            "request exceeded {}s",
            self.settings.request_timeout.as_secs()
        ))
    }

    /// stdout 关闭后等待进程退出；超过宽限期则强制终止
    async fn await_exit(&self, run: &mut dyn UpstreamRun) -> UpstreamExit {
        match tokio::time::timeout(self.settings.kill_grace, run.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                tracing::warn!("reasoning process did not exit after closing stdout, killing");
                run.kill().await;
                run.wait().await
            }
        }
    }

    /// 请求结束后回收上游进程：正常完成给予宽限期，其余情况立即终止
    async fn reap(&self, run: &mut dyn UpstreamRun, outcome: &RunOutcome) {
        if *outcome == RunOutcome::Completed
            && tokio::time::timeout(self.settings.kill_grace, run.wait()).await.is_ok()
        {
            return;
        }
        run.kill().await;
        if tokio::time::timeout(self.settings.kill_grace, run.wait()).await.is_err() {
            tracing::warn!("reasoning process still running after kill");
        }
    }
}

/// 入库的回复正文：去掉只由 `=` 组成的分隔线
fn response_text(content: &str) -> String {
    content
        .lines()
        .filter(|line| {
            let t = line.trim();
            t.is_empty() || !t.chars().all(|c| c == '=')
        })
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemorySessionStore;
    use crate::tools::{MockTransport, ToolRegistry};
    use crate::upstream::ScriptedUpstream;

    fn controller(upstream: ScriptedUpstream, store: Arc<InMemorySessionStore>) -> SessionController {
        let registry = Arc::new(ToolRegistry::from_definitions(
            crate::tools::default_definitions(),
            |_| Some("test-key-0123456789".to_string()),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            Arc::new(MockTransport::new()),
            Duration::from_secs(1),
            4000,
        ));
        SessionController::new(
            dispatcher,
            ToolScheduler::new(3),
            store,
            Arc::new(upstream),
            ControllerSettings::default(),
        )
    }

    fn request() -> ResearchRequest {
        ResearchRequest {
            query: "What is Rust".into(),
            session_id: "s1".into(),
            model: "gpt-4.1".into(),
        }
    }

    async fn collect(ctrl: &SessionController) -> (RunOutcome, Vec<OutboundEvent>) {
        let (mut sink, mut rx) = EventSink::channel();
        let outcome = ctrl.run(request(), &mut sink, CancellationToken::new()).await;
        drop(sink);
        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        (outcome, events)
    }

    #[test]
    fn test_response_text_strips_rules() {
        let raw = format!("\n{r}\nBody\n\nMore\n{r}", r = "=".repeat(50));
        assert_eq!(response_text(&raw), "Body\n\nMore");
    }

    #[tokio::test]
    async fn test_happy_path_persists_exchange() {
        let store = Arc::new(InMemorySessionStore::default());
        let upstream = ScriptedUpstream::new(vec![
            "📊 Final Research Report:\n".to_string(),
            "Rust is a language.\n".to_string(),
            "=".repeat(50),
        ]);
        let (outcome, events) = collect(&controller(upstream, store.clone())).await;
        assert_eq!(outcome, RunOutcome::Completed);
        let kinds: Vec<_> = events.iter().map(OutboundEvent::kind).collect();
        assert_eq!(kinds, vec!["status", "status", "content", "intelligence", "complete"]);

        let saved = store.get("s1").await.unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].response, "Rust is a language.");
    }

    #[tokio::test]
    async fn test_start_failure_is_error_then_complete() {
        let store = Arc::new(InMemorySessionStore::default());
        let upstream = ScriptedUpstream::new(Vec::<String>::new()).fail_to_start("spawn failed");
        let (outcome, events) = collect(&controller(upstream, store.clone())).await;
        assert!(matches!(outcome, RunOutcome::Failed(ResearchError::UpstreamProcessFailed(_))));
        let kinds: Vec<_> = events.iter().map(OutboundEvent::kind).collect();
        assert_eq!(kinds, vec!["status", "error", "complete"]);
        assert!(store.get("s1").await.is_err());
    }
}
