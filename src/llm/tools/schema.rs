//! 工具参数的JSON Schema校验（object、required、type、enum）

use serde_json::Value;

use crate::error::ToolResolutionError;

fn invalid(tool: &str, reason: String) -> ToolResolutionError {
    ToolResolutionError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 按参数schema校验工具参数
pub fn validate_arguments(
    tool: &str,
    schema: &Value,
    arguments: &Value,
) -> Result<(), ToolResolutionError> {
    let Some(args) = arguments.as_object() else {
        return Err(invalid(
            tool,
            format!("arguments must be an object, got {}", value_kind(arguments)),
        ));
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(invalid(tool, format!("missing required field: '{}'", field)));
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (name, value) in args {
        let Some(property) = properties.get(name) else {
            continue;
        };

        // type 可以是字符串，也可以是字符串数组（联合类型）
        let accepted: Vec<&str> = match property.get("type") {
            Some(Value::String(t)) => vec![t.as_str()],
            Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !accepted.is_empty() && !accepted.iter().any(|t| type_matches(t, value)) {
            return Err(invalid(
                tool,
                format!(
                    "field '{}' must be {}, got {}",
                    name,
                    accepted.join(" or "),
                    value_kind(value)
                ),
            ));
        }

        if let Some(allowed) = property.get("enum").and_then(Value::as_array) {
            if !allowed.contains(value) {
                return Err(invalid(
                    tool,
                    format!(
                        "field '{}' must be one of {}, got {}",
                        name,
                        Value::Array(allowed.clone()),
                        value
                    ),
                ));
            }
        }
    }

    Ok(())
}
