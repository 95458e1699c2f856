//! 从模型的自由文本回复中截取JSON对象

use regex::Regex;
use std::sync::LazyLock;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*\n?(.*?)```").expect("valid fenced block regex")
});

/// 提取候选JSON文本
///
/// 优先使用 ```json 代码块中的内容，否则取第一个 `{` 到最后一个 `}` 之间的片段。
pub fn extract_json_object(content: &str) -> Option<&str> {
    let candidate = FENCED_BLOCK
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content);

    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end < start {
        return None;
    }
    Some(candidate[start..=end].trim())
}
