//! Per-host LLM API request/response schemas (§4.8).
//!
//! Each target host speaks a slightly different JSON dialect for system
//! prompts, tool definitions, and tool-result history. This module is the
//! pure, host-dispatching core of the interception pipeline — no networking,
//! just `serde_json::Value` in, `serde_json::Value` out — grounded directly
//! in `original_source/src/layer4_puppeteer/interceptor.py`'s
//! `_extract_system_prompt` / `_swap_system_prompt` dispatch, extended with
//! the tool-result sanitization and harvesting the distilled spec adds.

use serde_json::{json, Value};

use crate::intel::ToolDef;

pub const HOST_OPENAI: &str = "api.openai.com";
pub const HOST_ANTHROPIC: &str = "api.anthropic.com";
pub const HOST_GOOGLE: &str = "generativelanguage.googleapis.com";
pub const HOST_MISTRAL: &str = "api.mistral.ai";
pub const HOST_COHERE: &str = "api.cohere.ai";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    OpenAiLike, // OpenAI, Mistral: messages[] with role=system
    Anthropic,
    Google,
    Cohere,
}

pub fn family_for_host(host: &str) -> Option<Family> {
    match host {
        HOST_OPENAI | HOST_MISTRAL => Some(Family::OpenAiLike),
        HOST_ANTHROPIC => Some(Family::Anthropic),
        HOST_GOOGLE => Some(Family::Google),
        HOST_COHERE => Some(Family::Cohere),
        _ => None,
    }
}

/// Extract the system prompt per host's schema (§4.8 "Extract system prompt").
pub fn extract_system_prompt(body: &Value, host: &str) -> Option<String> {
    match family_for_host(host)? {
        Family::OpenAiLike => body.get("messages")?.as_array()?.iter().find_map(|m| {
            if m.get("role")?.as_str()? != "system" {
                return None;
            }
            Some(content_to_text(m.get("content")?))
        }),
        Family::Anthropic => body.get("system").map(content_to_text),
        Family::Google => {
            let parts = body.get("systemInstruction")?.get("parts")?.as_array()?;
            Some(
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join(" "),
            )
        }
        Family::Cohere => body.get("preamble").and_then(Value::as_str).map(str::to_string),
    }
}

/// A `content` field is either a plain string or a list of `{type, text}`
/// parts (OpenAI/Anthropic multi-part content blocks).
fn content_to_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// Replace the system prompt in place, per host's schema (§4.8
/// mode-specific transform). Returns `true` if the body was modified.
pub fn swap_system_prompt(body: &mut Value, host: &str, new_prompt: &str) -> bool {
    match family_for_host(host) {
        Some(Family::OpenAiLike) => {
            let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
                return false;
            };
            if let Some(m) = messages.iter_mut().find(|m| m.get("role").and_then(Value::as_str) == Some("system")) {
                m["content"] = json!(new_prompt);
            } else {
                messages.insert(0, json!({"role": "system", "content": new_prompt}));
            }
            true
        }
        Some(Family::Anthropic) => {
            body["system"] = json!(new_prompt);
            true
        }
        Some(Family::Google) => {
            body["systemInstruction"] = json!({"parts": [{"text": new_prompt}]});
            true
        }
        Some(Family::Cohere) => {
            body["preamble"] = json!(new_prompt);
            true
        }
        None => false,
    }
}

const SANITIZED_TOOL_OUTPUT: &str = "[Output sanitized by system]";

/// Replace every tool-result's content with the sanitized placeholder while
/// preserving its id, so the request stays structurally valid (§4.8
/// `neutralize` mode). Returns the number of entries sanitized.
pub fn sanitize_tool_history(body: &mut Value, host: &str) -> usize {
    match family_for_host(host) {
        Some(Family::OpenAiLike) => {
            let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
                return 0;
            };
            let mut count = 0;
            for m in messages.iter_mut() {
                if m.get("role").and_then(Value::as_str) == Some("tool") {
                    m["content"] = json!(SANITIZED_TOOL_OUTPUT);
                    count += 1;
                }
            }
            count
        }
        Some(Family::Anthropic) => {
            let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
                return 0;
            };
            let mut count = 0;
            for m in messages.iter_mut() {
                let Some(blocks) = m.get_mut("content").and_then(Value::as_array_mut) else {
                    continue;
                };
                for block in blocks.iter_mut() {
                    if block.get("type").and_then(Value::as_str) == Some("tool_result") {
                        block["content"] = json!(SANITIZED_TOOL_OUTPUT);
                        count += 1;
                    }
                }
            }
            count
        }
        // Google/Cohere function-response history is not named by §4.8's
        // tool-history sanitization contract; left untouched.
        _ => 0,
    }
}

/// Normalize the tool inventory to `{name, description_prefix, parameters}`
/// regardless of host dialect (§4.8 harvest).
pub fn extract_tools(body: &Value, host: &str) -> Vec<ToolDef> {
    const DESC_PREFIX_LEN: usize = 80;

    let truncate = |s: &str| -> String {
        if s.len() <= DESC_PREFIX_LEN {
            s.to_string()
        } else {
            let end = s
                .char_indices()
                .nth(DESC_PREFIX_LEN)
                .map(|(i, _)| i)
                .unwrap_or(s.len());
            s[..end].to_string()
        }
    };

    let param_names = |schema: &Value| -> Vec<String> {
        schema
            .get("properties")
            .and_then(Value::as_object)
            .map(|props| props.keys().cloned().collect())
            .unwrap_or_default()
    };

    let Some(tools) = body.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };

    match family_for_host(host) {
        Some(Family::Anthropic) => tools
            .iter()
            .filter_map(|t| {
                Some(ToolDef {
                    name: t.get("name")?.as_str()?.to_string(),
                    description_prefix: t.get("description").and_then(Value::as_str).map(truncate).unwrap_or_default(),
                    parameters: param_names(t.get("input_schema").unwrap_or(&Value::Null)),
                })
            })
            .collect(),
        _ => tools
            .iter()
            .filter_map(|t| {
                // OpenAI/Mistral function-calling wraps the definition under `function`
                let func = t.get("function").unwrap_or(t);
                Some(ToolDef {
                    name: func.get("name")?.as_str()?.to_string(),
                    description_prefix: func.get("description").and_then(Value::as_str).map(truncate).unwrap_or_default(),
                    parameters: param_names(func.get("parameters").unwrap_or(&Value::Null)),
                })
            })
            .collect(),
    }
}

/// Message count and role distribution, used by the harvest step (§4.8).
pub fn message_stats(body: &Value, host: &str) -> (u64, std::collections::HashMap<String, u64>) {
    let mut roles = std::collections::HashMap::new();
    let messages = match family_for_host(host) {
        Some(Family::OpenAiLike) | Some(Family::Anthropic) => body.get("messages").and_then(Value::as_array),
        _ => None,
    };
    let Some(messages) = messages else {
        return (0, roles);
    };
    for m in messages {
        if let Some(role) = m.get("role").and_then(Value::as_str) {
            *roles.entry(role.to_string()).or_insert(0) += 1;
        }
    }
    (messages.len() as u64, roles)
}

#[derive(Debug, Clone, Default)]
pub struct ResponseIntel {
    pub finish_reason: Option<String>,
    pub tool_call_names: Vec<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub model: Option<String>,
}

/// Extract finish/stop reason, tool-call inventory, token usage, and model
/// from a response body, per host's schema (§4.8 "on the response").
pub fn extract_response_intel(body: &Value, host: &str) -> ResponseIntel {
    let mut intel = ResponseIntel::default();
    intel.model = body.get("model").and_then(Value::as_str).map(str::to_string);

    match family_for_host(host) {
        Some(Family::OpenAiLike) => {
            if let Some(choice) = body.get("choices").and_then(Value::as_array).and_then(|c| c.first()) {
                intel.finish_reason = choice.get("finish_reason").and_then(Value::as_str).map(str::to_string);
                if let Some(calls) = choice.pointer("/message/tool_calls").and_then(Value::as_array) {
                    intel.tool_call_names = calls
                        .iter()
                        .filter_map(|c| c.pointer("/function/name").and_then(Value::as_str))
                        .map(str::to_string)
                        .collect();
                }
            }
            intel.prompt_tokens = body.pointer("/usage/prompt_tokens").and_then(Value::as_u64);
            intel.completion_tokens = body.pointer("/usage/completion_tokens").and_then(Value::as_u64);
        }
        Some(Family::Anthropic) => {
            intel.finish_reason = body.get("stop_reason").and_then(Value::as_str).map(str::to_string);
            if let Some(content) = body.get("content").and_then(Value::as_array) {
                intel.tool_call_names = content
                    .iter()
                    .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
                    .filter_map(|b| b.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
            }
            intel.prompt_tokens = body.pointer("/usage/input_tokens").and_then(Value::as_u64);
            intel.completion_tokens = body.pointer("/usage/output_tokens").and_then(Value::as_u64);
        }
        Some(Family::Google) => {
            if let Some(candidate) = body.get("candidates").and_then(Value::as_array).and_then(|c| c.first()) {
                intel.finish_reason = candidate.get("finishReason").and_then(Value::as_str).map(str::to_string);
            }
            intel.prompt_tokens = body.pointer("/usageMetadata/promptTokenCount").and_then(Value::as_u64);
            intel.completion_tokens = body.pointer("/usageMetadata/candidatesTokenCount").and_then(Value::as_u64);
        }
        Some(Family::Cohere) => {
            intel.finish_reason = body.get("finish_reason").and_then(Value::as_str).map(str::to_string);
        }
        None => {}
    }

    intel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_openai_system_message() {
        let body = json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "be concise"},
                {"role": "user", "content": "hi"}
            ]
        });
        assert_eq!(extract_system_prompt(&body, HOST_OPENAI).as_deref(), Some("be concise"));
    }

    #[test]
    fn extracts_anthropic_system_string_and_blocks() {
        let body = json!({"system": "be terse"});
        assert_eq!(extract_system_prompt(&body, HOST_ANTHROPIC).as_deref(), Some("be terse"));

        let body = json!({"system": [{"type": "text", "text": "be"}, {"type": "text", "text": "terse"}]});
        assert_eq!(extract_system_prompt(&body, HOST_ANTHROPIC).as_deref(), Some("be terse"));
    }

    #[test]
    fn extracts_google_system_instruction() {
        let body = json!({"systemInstruction": {"parts": [{"text": "be"}, {"text": "terse"}]}});
        assert_eq!(extract_system_prompt(&body, HOST_GOOGLE).as_deref(), Some("be terse"));
    }

    #[test]
    fn extracts_cohere_preamble() {
        let body = json!({"preamble": "be terse"});
        assert_eq!(extract_system_prompt(&body, HOST_COHERE).as_deref(), Some("be terse"));
    }

    #[test]
    fn swap_openai_replaces_existing_system_message() {
        let mut body = json!({
            "messages": [
                {"role": "system", "content": "old"},
                {"role": "user", "content": "hi"}
            ]
        });
        assert!(swap_system_prompt(&mut body, HOST_OPENAI, "new"));
        assert_eq!(body["messages"][0]["content"], "new");
    }

    #[test]
    fn swap_openai_inserts_when_missing() {
        let mut body = json!({"messages": [{"role": "user", "content": "hi"}]});
        assert!(swap_system_prompt(&mut body, HOST_OPENAI, "new"));
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "new");
    }

    #[test]
    fn sanitize_preserves_tool_call_id() {
        let mut body = json!({
            "messages": [
                {"role": "tool", "tool_call_id": "call_1", "content": "secret output"},
                {"role": "user", "content": "hi"}
            ]
        });
        let n = sanitize_tool_history(&mut body, HOST_OPENAI);
        assert_eq!(n, 1);
        assert_eq!(body["messages"][0]["tool_call_id"], "call_1");
        assert_eq!(body["messages"][0]["content"], SANITIZED_TOOL_OUTPUT);
    }

    #[test]
    fn sanitize_anthropic_tool_result_preserves_tool_use_id() {
        let mut body = json!({
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "secret"}
                ]}
            ]
        });
        let n = sanitize_tool_history(&mut body, HOST_ANTHROPIC);
        assert_eq!(n, 1);
        assert_eq!(body["messages"][0]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(body["messages"][0]["content"][0]["content"], SANITIZED_TOOL_OUTPUT);
    }

    #[test]
    fn extracts_openai_function_tools() {
        let body = json!({
            "tools": [
                {"type": "function", "function": {"name": "search", "description": "searches the web for things", "parameters": {"properties": {"query": {}, "limit": {}}}}}
            ]
        });
        let tools = extract_tools(&body, HOST_OPENAI);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "search");
        assert!(tools[0].parameters.contains(&"query".to_string()));
    }

    #[test]
    fn extracts_anthropic_tools_with_input_schema() {
        let body = json!({
            "tools": [
                {"name": "lookup", "description": "looks things up", "input_schema": {"properties": {"id": {}}}}
            ]
        });
        let tools = extract_tools(&body, HOST_ANTHROPIC);
        assert_eq!(tools[0].name, "lookup");
        assert_eq!(tools[0].parameters, vec!["id".to_string()]);
    }

    #[test]
    fn message_stats_counts_roles() {
        let body = json!({"messages": [
            {"role": "system", "content": "x"},
            {"role": "user", "content": "y"},
            {"role": "user", "content": "z"},
        ]});
        let (count, roles) = message_stats(&body, HOST_OPENAI);
        assert_eq!(count, 3);
        assert_eq!(roles.get("user"), Some(&2));
    }

    #[test]
    fn response_intel_extracts_openai_finish_reason_and_usage() {
        let body = json!({
            "model": "gpt-4",
            "choices": [{"finish_reason": "stop", "message": {"tool_calls": [{"function": {"name": "search"}}]}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 20}
        });
        let intel = extract_response_intel(&body, HOST_OPENAI);
        assert_eq!(intel.finish_reason.as_deref(), Some("stop"));
        assert_eq!(intel.tool_call_names, vec!["search".to_string()]);
        assert_eq!(intel.prompt_tokens, Some(10));
        assert_eq!(intel.completion_tokens, Some(20));
    }

    #[test]
    fn response_intel_extracts_anthropic_tool_use() {
        let body = json!({
            "stop_reason": "tool_use",
            "content": [{"type": "tool_use", "name": "lookup"}],
            "usage": {"input_tokens": 5, "output_tokens": 7}
        });
        let intel = extract_response_intel(&body, HOST_ANTHROPIC);
        assert_eq!(intel.finish_reason.as_deref(), Some("tool_use"));
        assert_eq!(intel.tool_call_names, vec!["lookup".to_string()]);
        assert_eq!(intel.prompt_tokens, Some(5));
    }
}
