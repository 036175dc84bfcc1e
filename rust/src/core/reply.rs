use crate::state::{Message, ReplyPreview};

const EXCERPT_CHARS: usize = 80;

/// Find the reply target among loaded messages. Missing targets are not fetched.
pub fn resolve<'a>(
    reply_to_id: &str,
    window: impl IntoIterator<Item = &'a Message>,
) -> Option<&'a Message> {
    window.into_iter().find(|m| m.id == reply_to_id)
}

pub fn reply_preview<'a>(
    reply_to_id: &str,
    window: impl IntoIterator<Item = &'a Message>,
) -> ReplyPreview {
    match resolve(reply_to_id, window) {
        Some(target) => ReplyPreview::Resolved {
            message_id: target.id.clone(),
            sender_id: target.sender_id.clone(),
            sender_name: target.sender_name.clone(),
            excerpt: excerpt(target),
        },
        None => ReplyPreview::Unavailable {
            message_id: reply_to_id.to_string(),
        },
    }
}

fn excerpt(message: &Message) -> String {
    let text = message.content.trim();
    if text.is_empty() && message.image_url.is_some() {
        return "Photo".to_string();
    }
    let mut out: String = text.chars().take(EXCERPT_CHARS).collect();
    if text.chars().count() > EXCERPT_CHARS {
        out.push('…');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConversationKey;

    fn msg(id: &str, content: &str) -> Message {
        Message {
            id: id.into(),
            conversation_key: ConversationKey::group("g1"),
            sender_id: "alice".into(),
            sender_name: Some("Alice".into()),
            content: content.into(),
            image_url: None,
            created_at: 1,
            is_edited: false,
            reply_to_id: None,
            client_token: None,
        }
    }

    #[test]
    fn resolves_loaded_target() {
        let window = vec![msg("a", "first"), msg("b", "second")];
        match reply_preview("b", &window) {
            ReplyPreview::Resolved {
                message_id,
                sender_name,
                excerpt,
                ..
            } => {
                assert_eq!(message_id, "b");
                assert_eq!(sender_name.as_deref(), Some("Alice"));
                assert_eq!(excerpt, "second");
            }
            other => panic!("expected resolved, got {other:?}"),
        }
    }

    #[test]
    fn missing_target_is_unavailable() {
        let window = vec![msg("a", "first")];
        assert_eq!(
            reply_preview("gone", &window),
            ReplyPreview::Unavailable {
                message_id: "gone".into()
            }
        );
    }

    #[test]
    fn long_and_image_only_excerpts() {
        let long = "x".repeat(200);
        let mut image = msg("img", "");
        image.image_url = Some("https://cdn.example/p.png".into());
        let window = vec![msg("long", &long), image];

        let ReplyPreview::Resolved { excerpt, .. } = reply_preview("long", &window) else {
            panic!("expected resolved");
        };
        assert_eq!(excerpt.chars().count(), EXCERPT_CHARS + 1);
        assert!(excerpt.ends_with('…'));

        let ReplyPreview::Resolved { excerpt, .. } = reply_preview("img", &window) else {
            panic!("expected resolved");
        };
        assert_eq!(excerpt, "Photo");
    }
}
