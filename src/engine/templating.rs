use serde_json::Value;

/// Replaces every `{{path}}` in `s` with the value found at `path` in `ctx`.
/// Unknown paths render as the empty string; an unterminated `{{` is kept.
pub(crate) fn render(s: &str, ctx: &Value) -> String {
    let mut out = String::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let (head, tail) = rest.split_at(start);
        out.push_str(head);
        if let Some(end_rel) = tail.find("}}") {
            let (expr_with, new_rest) = tail.split_at(end_rel + 2);
            let expr = expr_with
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim();
            let val = lookup_str(expr, ctx).unwrap_or_default();
            out.push_str(&val);
            rest = new_rest;
        } else {
            out.push_str(tail);
            rest = "";
            break;
        }
    }
    out.push_str(rest);
    out
}

/// Renders every string inside `value`, keeping the JSON shape.
pub(crate) fn render_value(value: &Value, ctx: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(render(s, ctx)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

pub(crate) fn lookup_str(path: &str, ctx: &Value) -> Option<String> {
    lookup_path(ctx, path).map(|v| match v {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Dotted path lookup; numeric segments index into arrays.
pub(crate) fn lookup_path(context: &Value, path: &str) -> Option<Value> {
    let mut current = context;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(arr) => {
                let idx: usize = part.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

/// Reads user-entered text as JSON when it parses, otherwise as a string with
/// one level of surrounding quotes removed.
pub(crate) fn parse_flexible_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(json_val) = serde_json::from_str::<Value>(trimmed) {
        return json_val;
    }
    if trimmed.len() >= 2
        && ((trimmed.starts_with('"') && trimmed.ends_with('"'))
            || (trimmed.starts_with('\'') && trimmed.ends_with('\'')))
    {
        let inner = &trimmed[1..trimmed.len() - 1];
        return Value::String(inner.replace("\\\"", "\"").replace("\\'", "'"));
    }
    Value::String(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_nested_paths_and_array_indexes() {
        let ctx = json!({
            "trigger": {"user": {"name": "Ada"}},
            "fetch": {"items": [{"id": 7}]}
        });
        assert_eq!(
            render("Hi {{ trigger.user.name }}, item {{fetch.items.0.id}}", &ctx),
            "Hi Ada, item 7"
        );
    }

    #[test]
    fn unknown_paths_render_empty_and_unterminated_braces_survive() {
        let ctx = json!({});
        assert_eq!(render("a{{missing}}b", &ctx), "ab");
        assert_eq!(render("open {{ never closed", &ctx), "open {{ never closed");
    }

    #[test]
    fn render_value_keeps_shape() {
        let ctx = json!({"trigger": {"n": 3}});
        let rendered = render_value(&json!({"a": ["{{trigger.n}}", 1], "b": true}), &ctx);
        assert_eq!(rendered, json!({"a": ["3", 1], "b": true}));
    }

    #[test]
    fn flexible_values() {
        assert_eq!(parse_flexible_value("42"), json!(42));
        assert_eq!(parse_flexible_value("'quoted'"), json!("quoted"));
        assert_eq!(parse_flexible_value("plain text"), json!("plain text"));
        assert_eq!(parse_flexible_value("   "), Value::Null);
    }
}
