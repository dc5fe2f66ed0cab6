// System-instruction assembly
// The peer gets the full profile snapshot and a recent history window in
// its instruction string on every connect, so context survives reconnects
// and restarts.

use serde_json::Value;

use crate::memory::{HistoryEntry, MemoryProfile};

const BASE_PROMPT: &str = "You are a helpful voice assistant. Keep answers short and conversational; \
you are speaking out loud. When the user shares a fact worth remembering, \
persist it with the update_user_memory tool.";

pub fn build_system_instruction(profile: &MemoryProfile, history: &[HistoryEntry]) -> String {
    let mut out = String::from(BASE_PROMPT);

    if !profile.is_empty() {
        out.push_str("\n\nKnown facts about the user:\n");
        for (key, value) in profile {
            out.push_str(&format!("- {}: {}\n", key, render_value(value)));
        }
    }

    if !history.is_empty() {
        out.push_str("\nRecent conversation:\n");
        for entry in history {
            out.push_str(&format!("{}: {}\n", entry.role, entry.text));
        }
    }

    out
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::memory::Role;

    #[test]
    fn test_bare_prompt_without_memory() {
        let instruction = build_system_instruction(&MemoryProfile::new(), &[]);
        assert_eq!(instruction, BASE_PROMPT);
    }

    #[test]
    fn test_profile_and_history_rendered() {
        let mut profile = MemoryProfile::new();
        profile.insert("name".to_string(), json!("Ada"));
        profile.insert("pets".to_string(), json!(["cat", "dog"]));

        let history = vec![
            HistoryEntry {
                role: Role::User,
                text: "hi".to_string(),
                timestamp: Utc::now(),
            },
            HistoryEntry {
                role: Role::Model,
                text: "hello Ada".to_string(),
                timestamp: Utc::now(),
            },
        ];

        let instruction = build_system_instruction(&profile, &history);
        assert!(instruction.contains("- name: Ada"));
        assert!(instruction.contains("- pets: [\"cat\",\"dog\"]"));
        assert!(instruction.contains("user: hi"));
        assert!(instruction.contains("model: hello Ada"));
    }
}
