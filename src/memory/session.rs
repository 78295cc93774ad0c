//! 会话与对话记录
//!
//! Session 只由会话存储持有；Exchange 追加后不可变，只能整会话清空或因容量上限被淘汰。

use std::collections::{BTreeSet, VecDeque};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::tools::ToolCallRecord;

/// 一次完成的问答及其工具 / 推理元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub query: String,
    pub response: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
}

impl Exchange {
    pub fn new(query: impl Into<String>, response: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            model: model.into(),
            timestamp: Utc::now(),
            tool_calls: Vec::new(),
            reasoning_steps: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    exchanges: VecDeque<Exchange>,
    max_exchanges: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(id: impl Into<String>, max_exchanges: usize) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            exchanges: VecDeque::new(),
            max_exchanges: max_exchanges.max(1),
            created_at: now,
            last_activity: now,
        }
    }

    /// 追加一条记录，超过上限时淘汰最旧的；返回被淘汰的条数
    pub fn push(&mut self, exchange: Exchange) -> usize {
        self.last_activity = Utc::now();
        self.exchanges.push_back(exchange);
        let mut evicted = 0;
        while self.exchanges.len() > self.max_exchanges {
            self.exchanges.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.exchanges.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_activity
    }
}

/// 会话统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub total_exchanges: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub duration_minutes: i64,
    pub models_used: Vec<String>,
    pub topics: Vec<String>,
}

impl SessionSummary {
    pub fn empty(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            total_exchanges: 0,
            start_time: None,
            last_activity: None,
            duration_minutes: 0,
            models_used: Vec::new(),
            topics: Vec::new(),
        }
    }

    pub fn from_exchanges(session_id: &str, exchanges: &[Exchange]) -> Self {
        let (Some(first), Some(last)) = (exchanges.first(), exchanges.last()) else {
            return Self::empty(session_id);
        };
        let models: BTreeSet<String> = exchanges.iter().map(|e| e.model.clone()).collect();
        Self {
            session_id: session_id.to_string(),
            total_exchanges: exchanges.len(),
            start_time: Some(first.timestamp),
            last_activity: Some(last.timestamp),
            duration_minutes: (last.timestamp - first.timestamp).num_minutes(),
            models_used: models.into_iter().collect(),
            topics: extract_topics(exchanges),
        }
    }
}

const MAX_TOPICS: usize = 5;

/// 从提问中提取主题：首字母大写且长度大于 3 的词，以及它与后一个大写词组成的短语
pub fn extract_topics(exchanges: &[Exchange]) -> Vec<String> {
    let mut topics = BTreeSet::new();
    for exchange in exchanges {
        let words: Vec<&str> = exchange.query.split_whitespace().collect();
        for (i, word) in words.iter().enumerate() {
            if !starts_upper(word) || word.chars().count() <= 3 {
                continue;
            }
            topics.insert(word.to_string());
            if let Some(next) = words.get(i + 1).filter(|w| starts_upper(w)) {
                topics.insert(format!("{word} {next}"));
            }
        }
    }
    topics.into_iter().take(MAX_TOPICS).collect()
}

fn starts_upper(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
}

/// 把最近的对话渲染成上游输入的上下文文本
///
/// ```text
/// [14:02:11] User: <query>
/// [14:02:11] Assistant: <response 前 N 个字符>...
/// ```
pub fn render_context(exchanges: &[Exchange], limit: usize, preview_chars: usize) -> String {
    let start = exchanges.len().saturating_sub(limit);
    let mut lines = Vec::new();
    for exchange in &exchanges[start..] {
        let ts = exchange.timestamp.with_timezone(&Local).format("%H:%M:%S");
        let preview: String = exchange.response.chars().take(preview_chars).collect();
        lines.push(format!("[{ts}] User: {}", exchange.query));
        lines.push(format!("[{ts}] Assistant: {preview}..."));
        lines.push(String::new());
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_evicts_oldest() {
        let mut session = Session::new("s1", 3);
        for i in 0..5 {
            session.push(Exchange::new(format!("q{i}"), "r", "gpt-4.1"));
        }
        let queries: Vec<_> = session.exchanges().into_iter().map(|e| e.query).collect();
        assert_eq!(queries, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_extract_topics() {
        let exchanges = vec![
            Exchange::new("What is the weather in New York today", "", "m"),
            Exchange::new("Latest news about Tesla", "", "m"),
        ];
        let topics = extract_topics(&exchanges);
        // "New" 只有 3 个字符，不计入
        assert_eq!(topics, vec!["Latest", "Tesla", "What", "York"]);
    }

    #[test]
    fn test_topics_include_two_word_phrases() {
        let exchanges = vec![Exchange::new("compare Federal Reserve policy", "", "m")];
        assert_eq!(
            extract_topics(&exchanges),
            vec!["Federal".to_string(), "Federal Reserve".to_string(), "Reserve".to_string()]
        );
    }

    #[test]
    fn test_summary_from_exchanges() {
        let mut a = Exchange::new("Bitcoin price", "r1", "gpt-4.1");
        let mut b = Exchange::new("and Ethereum", "r2", "o3");
        a.timestamp = Utc::now() - chrono::Duration::minutes(12);
        b.timestamp = Utc::now();
        let summary = SessionSummary::from_exchanges("s1", &[a, b]);
        assert_eq!(summary.total_exchanges, 2);
        assert_eq!(summary.duration_minutes, 12);
        assert_eq!(summary.models_used, vec!["gpt-4.1".to_string(), "o3".to_string()]);
        assert_eq!(summary.topics, vec!["Bitcoin".to_string(), "Ethereum".to_string()]);

        let empty = SessionSummary::from_exchanges("s2", &[]);
        assert_eq!(empty.total_exchanges, 0);
        assert!(empty.start_time.is_none());
    }

    #[test]
    fn test_render_context_limits_and_previews() {
        let exchanges: Vec<_> = (0..4)
            .map(|i| Exchange::new(format!("query {i}"), "x".repeat(300), "m"))
            .collect();
        let text = render_context(&exchanges, 2, 200);
        assert!(!text.contains("query 1"));
        assert!(text.contains("User: query 2"));
        assert!(text.contains("User: query 3"));
        assert!(text.contains(&format!("Assistant: {}...", "x".repeat(200))));
        assert!(!text.contains(&"x".repeat(201)));
        assert_eq!(render_context(&[], 5, 200), "");
    }
}
