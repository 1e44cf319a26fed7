//! Conversation history normalization.
//!
//! Stateful chat backends reject a history that does not open with a user
//! turn. Client history is untrusted: entries may be half-filled, roles may
//! be anything, and the visible transcript usually opens with an assistant
//! greeting. [`normalize_history`] derives a sequence that is either empty or
//! starts with a user turn. Role alternation beyond the first turn is not
//! enforced.

use crate::types::{ChatRole, ChatTurn, RawTurn};

/// Keep only the most recent `window` raw turns.
pub fn trailing_window(history: &[RawTurn], window: usize) -> &[RawTurn] {
    let start = history.len().saturating_sub(window);
    &history[start..]
}

/// Clean client history into turns the generation backend accepts.
///
/// - entries without a role or with blank content are dropped
/// - content is trimmed
/// - every role other than `user` becomes `assistant`
/// - leading assistant turns are discarded; no user turn at all yields an
///   empty history
pub fn normalize_history(raw: &[RawTurn]) -> Vec<ChatTurn> {
    let turns: Vec<ChatTurn> = raw
        .iter()
        .filter_map(|turn| {
            let role = turn.role.as_deref()?;
            let content = turn.content.as_deref()?.trim();
            if role.is_empty() || content.is_empty() {
                return None;
            }
            Some(ChatTurn {
                role: ChatRole::from_client(role),
                content: content.to_string(),
            })
        })
        .collect();

    let dropped = raw.len() - turns.len();
    if dropped > 0 {
        tracing::debug!("Dropped {} incomplete history entries", dropped);
    }

    match turns.iter().position(|t| t.role == ChatRole::User) {
        Some(0) => turns,
        Some(first_user) => {
            tracing::debug!(
                "Discarding {} leading non-user turns from history",
                first_user
            );
            turns.into_iter().skip(first_user).collect()
        }
        None => {
            if !turns.is_empty() {
                tracing::debug!("History has no user turn; starting fresh");
            }
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_history() {
        assert!(normalize_history(&[]).is_empty());
    }

    #[test]
    fn test_leading_assistant_greeting_is_dropped() {
        let raw = vec![
            RawTurn::new("assistant", "Hello! Ask me anything."),
            RawTurn::new("user", "How do I apply for a masters?"),
            RawTurn::new("assistant", "Start with the admission portal."),
        ];

        let turns = normalize_history(&raw);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], ChatTurn::user("How do I apply for a masters?"));
        assert_eq!(turns[1].role, ChatRole::Assistant);
    }

    #[test]
    fn test_no_user_turn_yields_empty() {
        let raw = vec![
            RawTurn::new("assistant", "Hello!"),
            RawTurn::new("model", "Anything else?"),
        ];
        assert!(normalize_history(&raw).is_empty());
    }

    #[test]
    fn test_incomplete_entries_are_dropped_and_content_trimmed() {
        let raw = vec![
            RawTurn {
                role: None,
                content: Some("orphan".to_string()),
            },
            RawTurn {
                role: Some("user".to_string()),
                content: None,
            },
            RawTurn::new("user", "   "),
            RawTurn::new("user", "  real question \n"),
        ];

        let turns = normalize_history(&raw);
        assert_eq!(turns, vec![ChatTurn::user("real question")]);
    }

    #[test]
    fn test_non_user_roles_become_assistant() {
        let raw = vec![
            RawTurn::new("user", "q1"),
            RawTurn::new("model", "a1"),
            RawTurn::new("system", "a2"),
        ];

        let turns = normalize_history(&raw);
        assert!(turns[1..].iter().all(|t| t.role == ChatRole::Assistant));
    }

    #[test]
    fn test_interior_order_is_preserved() {
        let raw = vec![
            RawTurn::new("user", "q1"),
            RawTurn::new("user", "q2"),
            RawTurn::new("assistant", "a1"),
        ];

        let turns = normalize_history(&raw);
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "q2", "a1"]);
    }

    #[test]
    fn test_result_is_empty_or_starts_with_user() {
        let roles = ["user", "assistant", "model", "", "system"];
        // Every history of length <= 3 over the role alphabet
        for a in roles {
            for b in roles {
                for c in roles {
                    let raw = vec![
                        RawTurn::new(a, "x"),
                        RawTurn::new(b, "y"),
                        RawTurn::new(c, "z"),
                    ];
                    let turns = normalize_history(&raw);
                    assert!(turns.is_empty() || turns[0].role == ChatRole::User);
                }
            }
        }
    }

    #[test]
    fn test_trailing_window() {
        let raw: Vec<RawTurn> = (0..10)
            .map(|i| RawTurn::new("user", format!("q{}", i)))
            .collect();

        let window = trailing_window(&raw, 6);
        assert_eq!(window.len(), 6);
        assert_eq!(window[0].content.as_deref(), Some("q4"));
        assert_eq!(trailing_window(&raw[..2], 6).len(), 2);
    }
}
