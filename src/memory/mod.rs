//! 会话记忆：有界的对话历史、会话统计、上下文渲染与 token 估算

pub mod session;
pub mod store;
pub mod token;

pub use session::{extract_topics, render_context, Exchange, Session, SessionSummary};
pub use store::{InMemorySessionStore, SessionStore};
pub use token::TokenEstimator;
