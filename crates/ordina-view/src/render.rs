//! Pure rendering helpers: derived from view state, never stateful.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use ordina_types::models::{EMOJI_PALETTE, Message};

static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|\s)@([\w.-]+)").expect("mention pattern is valid"));

/// Wrap `@name` tokens in bold emphasis before the body is handed to the
/// markdown/LaTeX renderer. Only tokens preceded by start-of-string or
/// whitespace count; `a@b` is left alone.
pub fn format_mentions(body: &str) -> String {
    MENTION.replace_all(body, "$1**@$2**").into_owned()
}

/// One palette entry's rendered state under a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionBadge {
    pub emoji: &'static str,
    pub count: usize,
    /// The current user is among the reactors; the control renders
    /// highlighted.
    pub reacted: bool,
}

/// Per-palette-emoji reaction counts for a message.
pub fn reaction_summary(message: &Message, current_user: Uuid) -> Vec<ReactionBadge> {
    EMOJI_PALETTE
        .iter()
        .map(|&emoji| {
            let count = message
                .reactions
                .iter()
                .filter(|r| r.emoji == emoji)
                .count();
            ReactionBadge {
                emoji,
                count,
                reacted: message.has_reaction(current_user, emoji),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ordina_types::models::Reaction;

    #[test]
    fn mentions_at_start_and_after_whitespace() {
        assert_eq!(format_mentions("@ada hi"), "**@ada** hi");
        assert_eq!(format_mentions("ping @grace.h-2 now"), "ping **@grace.h-2** now");
    }

    #[test]
    fn mention_marker_inside_a_word_is_untouched() {
        assert_eq!(format_mentions("mail me at ada@lab.org"), "mail me at ada@lab.org");
    }

    #[test]
    fn multiple_mentions_in_one_body() {
        assert_eq!(
            format_mentions("@ada see @grace"),
            "**@ada** see **@grace**"
        );
    }

    fn message_with_reactions(reactions: Vec<Reaction>) -> Message {
        Message {
            id: Uuid::new_v4(),
            channel_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            body: "hi".to_string(),
            created_at: Utc::now(),
            reply_to_id: None,
            thread_root_id: None,
            is_pinned: false,
            author: None,
            reactions,
        }
    }

    #[test]
    fn summary_counts_follow_palette_order() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let message = message_with_reactions(vec![
            Reaction { emoji: "👍".into(), user_id: other },
            Reaction { emoji: "👍".into(), user_id: me },
            Reaction { emoji: "🧪".into(), user_id: other },
        ]);

        let summary = reaction_summary(&message, me);
        assert_eq!(summary.len(), EMOJI_PALETTE.len());

        assert_eq!(summary[0].emoji, "👍");
        assert_eq!(summary[0].count, 2);
        assert!(summary[0].reacted);

        assert_eq!(summary[2].emoji, "🧪");
        assert_eq!(summary[2].count, 1);
        assert!(!summary[2].reacted);

        assert_eq!(summary[1].count, 0);
        assert!(!summary[1].reacted);
    }
}
