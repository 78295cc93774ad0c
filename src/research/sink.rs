//! 事件出口：有序、只追加，保证恰好一个 complete
//!
//! 接收端（SSE 流）被丢弃即视为客户端断开，之后的 emit 返回 Cancelled。

use tokio::sync::mpsc;

use crate::core::ResearchError;
use crate::research::events::OutboundEvent;

pub struct EventSink {
    tx: mpsc::UnboundedSender<OutboundEvent>,
    completed: bool,
    disconnected: bool,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<OutboundEvent>) -> Self {
        Self {
            tx,
            completed: false,
            disconnected: false,
        }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// 发送一个事件；complete 之后的事件被丢弃
    pub fn emit(&mut self, event: OutboundEvent) -> Result<(), ResearchError> {
        if self.disconnected {
            return Err(ResearchError::Cancelled);
        }
        if self.completed {
            tracing::debug!(kind = event.kind(), "event after complete dropped");
            return Ok(());
        }
        let terminal = event.is_terminal();
        if self.tx.send(event).is_err() {
            self.disconnected = true;
            return Err(ResearchError::Cancelled);
        }
        self.completed = terminal;
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected || self.tx.is_closed()
    }
}
