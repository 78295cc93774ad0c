//! 会话存储抽象层
//!
//! SessionStore 是控制器与会话记忆之间的窄接口：追加、读取、清空、统计。
//! 内存实现按会话加锁，不同会话的并发请求互不争用。
//! 默认只按条数上限淘汰；配置了 TTL（ttl_hours > 0）时，空闲超过 TTL 的会话在追加时被惰性清理。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock};

use crate::core::ResearchError;
use crate::memory::session::{Exchange, Session, SessionSummary};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 追加一条记录（会话不存在时创建）
    async fn append(&self, session_id: &str, exchange: Exchange);

    /// 按时间顺序返回会话记录；未知会话返回 SessionNotFound
    async fn get(&self, session_id: &str) -> Result<Vec<Exchange>, ResearchError>;

    /// 清空会话；返回会话此前是否存在
    async fn clear(&self, session_id: &str) -> bool;

    /// 会话统计（未知会话返回空统计）
    async fn summary(&self, session_id: &str) -> SessionSummary {
        match self.get(session_id).await {
            Ok(exchanges) => SessionSummary::from_exchanges(session_id, &exchanges),
            Err(_) => SessionSummary::empty(session_id),
        }
    }
}

pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    max_exchanges: usize,
    /// None 表示永不过期
    ttl: Option<chrono::Duration>,
}

impl InMemorySessionStore {
    /// `ttl_hours` 为 0 时不做过期清理
    pub fn new(max_exchanges: usize, ttl_hours: u64) -> Self {
        let ttl = (ttl_hours > 0).then(|| {
            let hours = i64::try_from(ttl_hours).unwrap_or(i64::MAX / 3600);
            chrono::Duration::hours(hours)
        });
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_exchanges: max_exchanges.max(1),
            ttl,
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// 清理空闲超过 TTL 的会话，返回清理数量
    pub async fn purge_expired(&self) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let mut expired = Vec::new();
        for (id, session) in sessions.iter() {
            // 正在被写入的会话一定是活跃的
            if let Ok(s) = session.try_lock() {
                if s.idle_for(now) > ttl {
                    expired.push(id.clone());
                }
            }
        }
        for id in &expired {
            sessions.remove(id);
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "purged expired sessions");
        }
        expired.len()
    }

    async fn session(&self, session_id: &str) -> Option<Arc<Mutex<Session>>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn session_or_create(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(session) = self.session(session_id).await {
            return session;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Session::new(session_id, self.max_exchanges))))
            .clone()
    }
}

impl Default for InMemorySessionStore {
    fn default() -> Self {
        Self::new(10, 0)
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(&self, session_id: &str, exchange: Exchange) {
        self.purge_expired().await;
        let session = self.session_or_create(session_id).await;
        let mut session = session.lock().await;
        let evicted = session.push(exchange);
        tracing::debug!(session_id = %session_id, total = session.len(), evicted, "exchange appended");
    }

    async fn get(&self, session_id: &str) -> Result<Vec<Exchange>, ResearchError> {
        let session = self
            .session(session_id)
            .await
            .ok_or_else(|| ResearchError::SessionNotFound(session_id.to_string()))?;
        let session = session.lock().await;
        Ok(session.exchanges())
    }

    async fn clear(&self, session_id: &str) -> bool {
        let removed = self.sessions.write().await.remove(session_id).is_some();
        tracing::info!(session_id = %session_id, removed, "session cleared");
        removed
    }
}
