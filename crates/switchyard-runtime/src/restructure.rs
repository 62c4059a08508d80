//! Reshape client history into provider request shapes.

use std::fmt::Write;

use crate::types::{ChatMessage, Role};

/// A bare role/content pair, as accepted by turn-structured providers.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// History stripped to role/content, with the current prompt appended as the last user turn.
pub fn flatten(history: &[ChatMessage], current: &str) -> Vec<Turn> {
    history
        .iter()
        .map(|m| Turn {
            role: m.role,
            content: m.content.clone(),
        })
        .chain(std::iter::once(Turn {
            role: Role::User,
            content: current.to_string(),
        }))
        .collect()
}

/// History rendered as one numbered transcript for providers that take a single prompt string.
pub fn transcribe(history: &[ChatMessage], current: &str) -> String {
    let mut out = String::new();
    for (i, m) in history.iter().enumerate() {
        // Writing to a String cannot fail.
        let _ = write!(
            out,
            "MessageNo: {}\nRole: {}\nContent: {}\n",
            i + 1,
            m.role.as_str(),
            m.content
        );
    }
    let _ = write!(out, "Current-User-Message: {}", current);
    out
}
