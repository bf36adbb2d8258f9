//! Recovery of tool calls written as tags in plain assistant text.
//!
//! Some models answer with pseudo-markup instead of structured calls:
//!
//! ```text
//! <function=execute_command>
//! <parameter=command>ls -la</parameter>
//! </function>
//!
//! <tool_call id="x"><function>read_file</function><parameter=path>a.rs</parameter></tool_call>
//! ```
//!
//! [`parse_fallback_tool_calls`] is only consulted when a turn produced no
//! structured calls. Extraction is best-effort and never fails the turn.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::types::ToolCall;

static TOOL_CALL_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<tool_call(?:\s+id\s*=\s*"([^"]*)")?\s*>(.*?)</tool_call>"#).unwrap()
});

static FUNCTION_INLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<function=([\w.-]+)>(.*?)</function>").unwrap());

static NESTED_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:function|name)>\s*([\w.-]+)\s*</(?:function|name)>").unwrap());

static PARAMETER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<parameter(?:=|\s+name\s*=\s*")(\w+)"?\s*>(.*?)</parameter>"#).unwrap()
});

static PARAMETERS_BODY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(parameters|arguments)>(.*?)</(?:parameters|arguments)>").unwrap()
});

static KEY_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*:\s*(.+)$").unwrap());

/// Quick check for any markup shape the parser understands.
pub fn contains_tool_markup(text: &str) -> bool {
    text.contains("<function=") || text.contains("<tool_call")
}

/// Extract tool calls from finalized assistant text, in order of appearance.
///
/// Calls without an explicit id get `fallback_{turn}_{n}`.
pub fn parse_fallback_tool_calls(text: &str, turn: u64) -> Vec<ToolCall> {
    let mut found: Vec<(usize, Option<String>, String, String)> = Vec::new();
    let mut covered = Vec::new();

    for caps in TOOL_CALL_BLOCK_RE.captures_iter(text) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        covered.push(whole.range());
        let explicit_id = caps
            .get(1)
            .map(|m| m.as_str().trim().to_string())
            .filter(|id| !id.is_empty());
        if let Some((name, arguments)) = parse_block(body.as_str()) {
            found.push((whole.start(), explicit_id, name, arguments));
        }
    }

    for caps in FUNCTION_INLINE_RE.captures_iter(text) {
        let (Some(whole), Some(name), Some(body)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        if covered.iter().any(|range| range.contains(&whole.start())) {
            continue;
        }
        let arguments = extract_arguments(name.as_str(), body.as_str());
        found.push((whole.start(), None, name.as_str().to_string(), arguments));
    }

    found.sort_by_key(|(start, ..)| *start);
    let calls: Vec<ToolCall> = found
        .into_iter()
        .enumerate()
        .map(|(n, (_, id, name, arguments))| {
            let id = id.unwrap_or_else(|| format!("fallback_{turn}_{n}"));
            ToolCall::new(id, name, arguments)
        })
        .collect();
    if !calls.is_empty() {
        debug!(count = calls.len(), turn, "recovered tool calls from text markup");
    }
    calls
}

/// Name and arguments of one `<tool_call>` body.
fn parse_block(body: &str) -> Option<(String, String)> {
    if let Some(caps) = FUNCTION_INLINE_RE.captures(body) {
        let name = caps.get(1)?.as_str();
        let inner = caps.get(2).map_or("", |m| m.as_str());
        return Some((name.to_string(), extract_arguments(name, inner)));
    }

    if let Some(caps) = NESTED_NAME_RE.captures(body) {
        let name = caps.get(1)?.as_str().to_string();
        let rest = NESTED_NAME_RE.replace(body, "");
        let rest = match PARAMETERS_BODY_RE.captures(&rest) {
            Some(params) if !PARAMETER_RE.is_match(&rest) => {
                params.get(2).map_or(String::new(), |m| m.as_str().to_string())
            }
            _ => rest.to_string(),
        };
        let arguments = extract_arguments(&name, &rest);
        return Some((name, arguments));
    }

    // `{"name": ..., "arguments": {...}}` bodies.
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    let name = value.get("name")?.as_str()?.to_string();
    let arguments = match value.get("arguments").or_else(|| value.get("parameters")) {
        Some(Value::String(raw)) => extract_arguments(&name, raw),
        Some(args @ Value::Object(_)) => args.to_string(),
        _ => "{}".to_string(),
    };
    Some((name, arguments))
}

/// Turn a tag body into a JSON arguments object.
///
/// In priority order: a JSON object passes through unchanged; parameter tags
/// collect into an object; `key: value` lines collect into an object; any
/// other text becomes the tool's single implicit parameter. Empty is `{}`.
pub fn extract_arguments(tool_name: &str, body: &str) -> String {
    let content = body.trim();
    if content.is_empty() {
        return "{}".to_string();
    }

    if matches!(serde_json::from_str::<Value>(content), Ok(Value::Object(_))) {
        return content.to_string();
    }

    let mut params = Map::new();
    for caps in PARAMETER_RE.captures_iter(content) {
        if let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) {
            params.insert(key.as_str().to_string(), scalar(value.as_str().trim()));
        }
    }
    if !params.is_empty() {
        return Value::Object(params).to_string();
    }

    for line in content.lines() {
        if let Some(caps) = KEY_VALUE_RE.captures(line.trim()) {
            if let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) {
                params.insert(key.as_str().to_string(), scalar(value.as_str().trim()));
            }
        }
    }
    if !params.is_empty() {
        return Value::Object(params).to_string();
    }

    params.insert(
        implicit_parameter(tool_name).to_string(),
        Value::String(content.to_string()),
    );
    Value::Object(params).to_string()
}

/// Parameter name bare text is assigned to.
fn implicit_parameter(tool_name: &str) -> &'static str {
    match tool_name {
        "execute_command" => "command",
        "read_file" | "list_directory" => "path",
        "git_grep" => "pattern",
        _ => "value",
    }
}

fn scalar(raw: &str) -> Value {
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(call: &ToolCall) -> Value {
        serde_json::from_str(&call.function.arguments).unwrap()
    }

    // Verifies the canonical inline function shape with one parameter.
    #[test]
    fn inline_function_with_parameter_tag() {
        let text = "Let me look.\n<function=execute_command><parameter=command>ls -la</parameter></function>";
        let calls = parse_fallback_tool_calls(text, 3);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name(), "execute_command");
        assert_eq!(args(&calls[0]), json!({"command": "ls -la"}));
        assert_eq!(calls[0].id, "fallback_3_0");
    }

    // Verifies a function tag with no parameters yields `{}`.
    #[test]
    fn inline_function_without_parameters_is_empty_object() {
        let calls = parse_fallback_tool_calls("<function=list_tools></function>", 1);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments, "{}");
    }

    // Verifies multi-line bodies and several parameters are collected.
    #[test]
    fn multiline_parameters_collect_into_object() {
        let text = "<function=write_file>\n<parameter=path>out.txt</parameter>\n<parameter=content>line one\nline two</parameter>\n</function>";
        let calls = parse_fallback_tool_calls(text, 0);
        assert_eq!(
            args(&calls[0]),
            json!({"path": "out.txt", "content": "line one\nline two"})
        );
    }

    // Verifies JSON bodies pass through byte-for-byte.
    #[test]
    fn json_body_passes_through_unchanged() {
        let text = r#"<function=read_file>{"path": "src/lib.rs"}</function>"#;
        let calls = parse_fallback_tool_calls(text, 0);
        assert_eq!(calls[0].function.arguments, r#"{"path": "src/lib.rs"}"#);
    }

    // Verifies "key: value" lines are the third choice.
    #[test]
    fn key_value_lines_become_object() {
        let text = "<function=git_grep>\npattern: TODO\ncase_insensitive: true\n</function>";
        let calls = parse_fallback_tool_calls(text, 0);
        assert_eq!(
            args(&calls[0]),
            json!({"pattern": "TODO", "case_insensitive": true})
        );
    }

    // Verifies bare text becomes the tool's implicit parameter.
    #[test]
    fn bare_text_uses_implicit_parameter() {
        let calls = parse_fallback_tool_calls("<function=execute_command>cargo --version</function>", 0);
        assert_eq!(args(&calls[0]), json!({"command": "cargo --version"}));
        let calls = parse_fallback_tool_calls("<function=custom_tool>hello there</function>", 0);
        assert_eq!(args(&calls[0]), json!({"value": "hello there"}));
    }

    // Verifies the wrapping tool_call shape with a nested name and explicit id.
    #[test]
    fn tool_call_block_with_nested_name_and_id() {
        let text = r#"<tool_call id="abc"><function>read_file</function><parameter=path>Cargo.toml</parameter></tool_call>"#;
        let calls = parse_fallback_tool_calls(text, 0);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "abc");
        assert_eq!(calls[0].name(), "read_file");
        assert_eq!(args(&calls[0]), json!({"path": "Cargo.toml"}));
    }

    // Verifies parameters are scoped to their own block.
    #[test]
    fn block_parameters_do_not_leak_between_blocks() {
        let text = "<tool_call><function>read_file</function><parameter=path>a</parameter></tool_call>\n<tool_call><function>read_file</function><parameter=path>b</parameter></tool_call>";
        let calls = parse_fallback_tool_calls(text, 2);
        assert_eq!(calls.len(), 2);
        assert_eq!(args(&calls[0]), json!({"path": "a"}));
        assert_eq!(args(&calls[1]), json!({"path": "b"}));
        assert_eq!(calls[1].id, "fallback_2_1");
    }

    // Verifies inline function tags inside a block are not counted twice.
    #[test]
    fn function_inside_tool_call_block_counted_once() {
        let text = "<tool_call>\n<function=execute_command>\n<parameter=command>pwd</parameter>\n</function>\n</tool_call>";
        let calls = parse_fallback_tool_calls(text, 0);
        assert_eq!(calls.len(), 1);
        assert_eq!(args(&calls[0]), json!({"command": "pwd"}));
    }

    // Verifies JSON-bodied tool_call blocks are understood.
    #[test]
    fn json_tool_call_block() {
        let text = r#"<tool_call>{"name": "list_directory", "arguments": {"path": "."}}</tool_call>"#;
        let calls = parse_fallback_tool_calls(text, 0);
        assert_eq!(calls[0].name(), "list_directory");
        assert_eq!(args(&calls[0]), json!({"path": "."}));
    }

    // Verifies the <parameters> wrapper is unwrapped before extraction.
    #[test]
    fn parameters_wrapper_body() {
        let text = r#"<tool_call><function>git_grep</function><parameters>{"pattern":"fn main"}</parameters></tool_call>"#;
        let calls = parse_fallback_tool_calls(text, 0);
        assert_eq!(args(&calls[0]), json!({"pattern": "fn main"}));
    }

    // Verifies mixed shapes come back in text order.
    #[test]
    fn calls_are_ordered_by_position() {
        let text = "<function=list_tools></function> then <tool_call><function>read_file</function><parameter=path>x</parameter></tool_call> then <function=execute_command>ls</function>";
        let names: Vec<String> = parse_fallback_tool_calls(text, 0)
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        assert_eq!(names, vec!["list_tools", "read_file", "execute_command"]);
    }

    // Verifies plain prose yields nothing.
    #[test]
    fn plain_text_has_no_calls() {
        assert!(!contains_tool_markup("just an answer"));
        assert!(parse_fallback_tool_calls("just an answer: nothing to run", 0).is_empty());
    }

    // Verifies an unterminated tag is ignored rather than failing.
    #[test]
    fn unterminated_tag_is_ignored() {
        assert!(parse_fallback_tool_calls("<function=read_file><parameter=path>x", 0).is_empty());
    }
}
