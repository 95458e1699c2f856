//! 自然语言生成SQL的只读校验

use regex::Regex;
use std::sync::LazyLock;

use crate::error::DataAccessError;

/// 注释、字符串字面量与反引号标识符，按出现顺序一次性抹掉
static OPAQUE_SPAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*"|`[^`]*`|--[^\n]*|#[^\n]*|/\*.*?\*/"#)
        .expect("valid opaque span regex")
});

static LEADING_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\(*\s*(SELECT|WITH)\b").expect("valid leading regex"));

static FORBIDDEN_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|MERGE|UPSERT|DROP|CREATE|ALTER|TRUNCATE|GRANT|REVOKE|CALL|EXECUTE|EXPORT|LOAD|DECLARE|SET|BEGIN|COMMIT|ROLLBACK|TRANSACTION|ASSERT|RAISE|LOOP|WHILE)\b",
    )
    .expect("valid forbidden keyword regex")
});

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:sql|SQL)?\s*\n?(.*?)```").expect("valid fence regex")
});

/// 去掉模型回复中的 ```sql 代码块包装
pub fn strip_fences(content: &str) -> String {
    FENCE
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content)
        .trim()
        .to_string()
}

/// 只允许单条 SELECT / WITH 语句，返回去掉结尾分号后的SQL
pub fn ensure_read_only(sql: &str) -> Result<String, DataAccessError> {
    let statement = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if statement.is_empty() {
        return Err(DataAccessError::Rejected("empty query".to_string()));
    }

    let sanitized = OPAQUE_SPAN.replace_all(statement, " '' ");
    let sanitized = sanitized.trim();

    if sanitized.contains(';') {
        return Err(DataAccessError::Rejected(
            "multiple statements are not allowed".to_string(),
        ));
    }
    if !LEADING_KEYWORD.is_match(sanitized) {
        return Err(DataAccessError::Rejected(
            "only SELECT or WITH queries are allowed".to_string(),
        ));
    }
    if let Some(keyword) = FORBIDDEN_KEYWORD.find(sanitized) {
        return Err(DataAccessError::Rejected(format!(
            "keyword '{}' is not allowed in read-only queries",
            keyword.as_str().to_uppercase()
        )));
    }

    Ok(statement.to_string())
}
