//! ABOUTME: Repair and validation for untrusted LLM JSON output
//! ABOUTME: Strips control chars, fences, and prose; validates against a schema

use jsonschema::JSONSchema;
use serde_json::Value;
use thiserror::Error;

/// Errors from the repair/validate path.
#[derive(Debug, Error)]
pub enum RepairError {
    #[error("unparseable json: {message}")]
    Unparseable { message: String },
    #[error("schema mismatch: {message}")]
    Shape { message: String },
}

/// Clean a model response for parsing: remove C0 control characters (except
/// `\t`, `\n`, `\r`), strip markdown fences, and slice out the `{...}` body
/// if the model wrapped the JSON in commentary.
pub fn clean(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| (*c as u32) >= 0x20 || matches!(c, '\t' | '\n' | '\r'))
        .collect();

    let defenced = strip_fences(stripped.trim());

    match (defenced.find('{'), defenced.rfind('}')) {
        (Some(start), Some(end)) if end > start => defenced[start..=end].to_string(),
        _ => defenced.to_string(),
    }
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.trim_end();
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Parse a model response: direct parse first, then one clean-and-retry.
/// Deterministic, so repeated calls on the same input are stable.
pub fn parse(text: &str) -> Result<Value, RepairError> {
    match serde_json::from_str(text) {
        Ok(value) => Ok(value),
        Err(first) => {
            let cleaned = clean(text);
            serde_json::from_str(&cleaned).map_err(|second| RepairError::Unparseable {
                message: format!("direct parse: {first}; after repair: {second}"),
            })
        }
    }
}

/// Coerce scalars that arrived as numbers or booleans into strings wherever
/// the schema declares a string (e.g. a marker value of `14` becomes `"14"`).
pub fn coerce_declared_strings(value: &mut Value, schema: &Value) {
    let types = declared_types(schema);

    if types.contains(&"string") {
        if let Some(coerced) = scalar_to_string(value) {
            *value = Value::String(coerced);
        }
    }
    if types.contains(&"object") {
        if let (Some(properties), Some(map)) = (
            schema.get("properties").and_then(Value::as_object),
            value.as_object_mut(),
        ) {
            for (key, subschema) in properties {
                if let Some(field) = map.get_mut(key) {
                    coerce_declared_strings(field, subschema);
                }
            }
        }
    }
    if types.contains(&"array") {
        if let (Some(items), Some(elements)) = (schema.get("items"), value.as_array_mut()) {
            for element in elements {
                coerce_declared_strings(element, items);
            }
        }
    }
}

fn declared_types(schema: &Value) -> Vec<&str> {
    match schema.get("type") {
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(types)) => types.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Validate a value against a compiled schema.
pub fn validate_shape(value: &Value, compiled: &JSONSchema) -> Result<(), RepairError> {
    if let Err(errors) = compiled.validate(value) {
        let message = errors
            .take(3)
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(RepairError::Shape { message });
    }
    Ok(())
}

/// The full path used by both agents: parse (with repair), coerce declared
/// strings, validate.
pub fn parse_validated(
    text: &str,
    schema_doc: &Value,
    compiled: &JSONSchema,
) -> Result<Value, RepairError> {
    let mut value = parse(text)?;
    coerce_declared_strings(&mut value, schema_doc);
    validate_shape(&value, compiled)?;
    Ok(value)
}

/// A trimmed, non-empty string field of a JSON object, if present.
pub fn string_field(object: &Value, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clean_strips_control_characters() {
        let dirty = "{\"a\": \"b\u{0007}c\"}";
        assert_eq!(clean(dirty), "{\"a\": \"bc\"}");
    }

    #[test]
    fn clean_keeps_tabs_and_newlines() {
        let text = "{\n\t\"a\": 1\n}";
        assert_eq!(clean(text), text);
    }

    #[test]
    fn clean_strips_markdown_fences() {
        assert_eq!(clean("```json{\"markers\":[]}```"), "{\"markers\":[]}");
        assert_eq!(clean("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
    }

    #[test]
    fn clean_slices_json_out_of_prose() {
        let wrapped = "Here is the extraction you asked for:\n{\"markers\": []}\nLet me know!";
        assert_eq!(clean(wrapped), "{\"markers\": []}");
    }

    #[test]
    fn parse_recovers_fenced_json() {
        let value = parse("```json{\"markers\":[]}```").unwrap();
        assert_eq!(value, json!({"markers": []}));
    }

    #[test]
    fn parse_is_idempotent() {
        let raw = "noise before {\"a\": \"b\"} noise after";
        let first = parse(raw).unwrap();
        let second = parse(raw).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn parse_reports_both_failures() {
        let err = parse("not json at all").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("direct parse"));
        assert!(message.contains("after repair"));
    }

    #[test]
    fn coercion_turns_numbers_into_declared_strings() {
        let schema = json!({
            "type": "object",
            "properties": {
                "value": {"type": "string"},
                "count": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        });
        let mut value = json!({"value": 14, "count": 2, "tags": [1, "a"]});
        coerce_declared_strings(&mut value, &schema);
        assert_eq!(value, json!({"value": "14", "count": 2, "tags": ["1", "a"]}));
    }

    #[test]
    fn coercion_handles_nullable_strings() {
        let schema = json!({
            "type": "object",
            "properties": {"unit": {"type": ["string", "null"]}}
        });
        let mut value = json!({"unit": 5});
        coerce_declared_strings(&mut value, &schema);
        assert_eq!(value, json!({"unit": "5"}));

        let mut null_value = json!({"unit": null});
        coerce_declared_strings(&mut null_value, &schema);
        assert_eq!(null_value, json!({"unit": null}));
    }

    #[test]
    fn validate_rejects_missing_required_keys() {
        let schema_doc = json!({
            "type": "object",
            "properties": {"markers": {"type": "array"}},
            "required": ["markers"]
        });
        let compiled = JSONSchema::compile(&schema_doc).unwrap();
        let err = validate_shape(&json!({"other": 1}), &compiled).unwrap_err();
        assert!(matches!(err, RepairError::Shape { .. }));
    }
}
