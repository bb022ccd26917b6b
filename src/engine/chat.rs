//! Chat prompt assembly
//!
//! Prompts are built from role-delimited segments in the ChatML layout the
//! model was trained on. The assistant segment is left open so the model
//! continues it; the turn-end marker doubles as a textual stop condition
//! alongside the native end-of-sequence token.

/// Marker closing a chat turn. Matched against accumulated output text
/// during generation, not against single token ids, because the marker can
/// span a token boundary.
pub const TURN_END: &str = "<|im_end|>";

const TURN_START: &str = "<|im_start|>";

/// Speaker of a chat segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn tag(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One segment of a dialog.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn system<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant<S: Into<String>>(content: S) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Renders a dialog into the fixed textual template, leaving the final
/// assistant segment open for the model to continue.
pub fn format_chat(turns: &[ChatTurn]) -> String {
    let mut prompt = String::with_capacity(
        turns.iter().map(|t| t.content.len() + 32).sum::<usize>() + 32,
    );
    for turn in turns {
        prompt.push_str(TURN_START);
        prompt.push_str(turn.role.tag());
        prompt.push('\n');
        prompt.push_str(&turn.content);
        prompt.push_str(TURN_END);
        prompt.push('\n');
    }
    prompt.push_str(TURN_START);
    prompt.push_str(Role::Assistant.tag());
    prompt.push('\n');
    prompt
}

/// If `marker` occurs in `text`, truncates `text` just before it.
///
/// Returns true when a hit was found. Plain substring search over the
/// accumulated output, so markers assembled from several tokens still match.
pub fn trim_at_marker(text: &mut String, marker: &str) -> bool {
    match text.find(marker) {
        Some(idx) => {
            text.truncate(idx);
            true
        }
        None => false,
    }
}
