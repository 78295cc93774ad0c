//! Token 估算（简单的字符计数近似）

/// 英文约 4 字符/token，中日韩等非 ASCII 字符约 1.5 字符/token
pub struct TokenEstimator;

impl TokenEstimator {
    pub fn estimate(text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        let (ascii, other) = text
            .chars()
            .fold((0usize, 0usize), |(a, o), c| if c.is_ascii() { (a + 1, o) } else { (a, o + 1) });
        let tokens = ascii / 4 + (other as f64 / 1.5).ceil() as usize;
        tokens.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_estimator_english() {
        assert_eq!(TokenEstimator::estimate("Hello world, this is a test."), 7);
        assert_eq!(TokenEstimator::estimate("hi"), 1);
    }

    #[test]
    fn test_token_estimator_chinese() {
        assert_eq!(TokenEstimator::estimate("你好世界"), 3);
    }

    #[test]
    fn test_empty_text_has_no_tokens() {
        assert_eq!(TokenEstimator::estimate(""), 0);
    }
}
