//! 上游 stdout 中的文本标记

/// 开始最终报告
pub const REPORT_BEGIN: &str = "📊 Final Research Report:";
/// 运行成功
pub const RUN_SUCCEEDED: &str = "✅ Research complete!";
/// 推理步骤前缀
pub const THINKING_PREFIX: &str = "🧠 [THINKING]";
/// 工具调用请求前缀，后接 JSON
pub const TOOL_CALLS_PREFIX: &str = "🔧 [TOOL_CALLS]";

/// 终止分隔线长度
pub const TERMINAL_RULE_LEN: usize = 50;
/// 节分隔线最短长度
pub const SECTION_RULE_MIN_LEN: usize = 10;

const RULE_CHAR: char = '=';

/// 是否包含一段至少 10 个 `=` 的分隔线
pub fn contains_rule(text: &str) -> bool {
    let mut run = 0;
    for c in text.chars() {
        if c == RULE_CHAR {
            run += 1;
            if run >= SECTION_RULE_MIN_LEN {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// 去掉首尾空白后恰好是 50 个 `=`
pub fn is_terminal_rule(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.len() == TERMINAL_RULE_LEN && trimmed.chars().all(|c| c == RULE_CHAR)
}

/// 行首为 `prefix` 时返回其后的内容（已去除首尾空白）
pub fn strip_marker<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.trim_start().strip_prefix(prefix).map(str::trim)
}
