use std::collections::HashSet;

use crate::adapter::Identity;
use crate::state::Reaction;

pub const REACTION_DISPLAY_LIMIT: usize = 5;
const SAMPLE_NAMES: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionGroup {
    pub emoji: String,
    pub count: u32,
    pub reacted_by_viewer: bool,
    /// Up to three reactor names for a "who reacted" hint.
    pub sample_names: Vec<String>,
}

/// Group raw reactions by emoji, most popular first. Ties keep first-seen order.
/// A user reacting twice with the same emoji counts once.
pub fn aggregate(reactions: &[Reaction], viewer_id: &str) -> Vec<ReactionGroup> {
    let mut seen: HashSet<(&str, &str)> = HashSet::new();
    let mut groups: Vec<ReactionGroup> = Vec::new();
    for r in reactions {
        if !seen.insert((r.user_id.as_str(), r.emoji.as_str())) {
            continue;
        }
        let idx = match groups.iter().position(|g| g.emoji == r.emoji) {
            Some(i) => i,
            None => {
                groups.push(ReactionGroup {
                    emoji: r.emoji.clone(),
                    count: 0,
                    reacted_by_viewer: false,
                    sample_names: vec![],
                });
                groups.len() - 1
            }
        };
        let g = &mut groups[idx];
        g.count += 1;
        if r.user_id == viewer_id {
            g.reacted_by_viewer = true;
        }
        if g.sample_names.len() < SAMPLE_NAMES {
            g.sample_names
                .push(r.user_name.clone().unwrap_or_else(|| r.user_id.clone()));
        }
    }
    // `sort_by` is stable, so equal counts stay in first-seen order.
    groups.sort_by(|a, b| b.count.cmp(&a.count));
    groups
}

/// Collapsed presentation of a message's reactions: the first few groups plus "+N".
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionStrip {
    groups: Vec<ReactionGroup>,
    expanded: bool,
    limit: usize,
}

impl ReactionStrip {
    pub fn new(groups: Vec<ReactionGroup>) -> Self {
        Self::with_limit(groups, REACTION_DISPLAY_LIMIT)
    }

    pub fn with_limit(groups: Vec<ReactionGroup>, limit: usize) -> Self {
        Self {
            groups,
            expanded: false,
            limit,
        }
    }

    pub fn visible(&self) -> &[ReactionGroup] {
        if self.expanded || self.groups.len() <= self.limit {
            &self.groups
        } else {
            &self.groups[..self.limit]
        }
    }

    pub fn hidden_count(&self) -> usize {
        if self.expanded {
            0
        } else {
            self.groups.len().saturating_sub(self.limit)
        }
    }

    pub fn overflow_label(&self) -> Option<String> {
        match self.hidden_count() {
            0 => None,
            n => Some(format!("+{n}")),
        }
    }

    pub fn is_expanded(&self) -> bool {
        self.expanded
    }

    pub fn toggle_expanded(&mut self) {
        self.expanded = !self.expanded;
    }
}

/// What a single tap on an emoji changes. Exactly one side is non-empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub added: Option<Reaction>,
    pub removed: Vec<Reaction>,
}

impl ToggleOutcome {
    pub fn is_add(&self) -> bool {
        self.added.is_some()
    }
}

/// Add the viewer's `emoji` if absent, otherwise remove every viewer row for it.
pub fn toggle(
    reactions: &[Reaction],
    message_id: &str,
    viewer: &Identity,
    emoji: &str,
) -> ToggleOutcome {
    let removed: Vec<Reaction> = reactions
        .iter()
        .filter(|r| r.message_id == message_id && r.user_id == viewer.user_id && r.emoji == emoji)
        .cloned()
        .collect();
    if !removed.is_empty() {
        return ToggleOutcome {
            added: None,
            removed,
        };
    }
    ToggleOutcome {
        added: Some(Reaction {
            id: format!("local-{}", uuid::Uuid::new_v4()),
            message_id: message_id.to_string(),
            user_id: viewer.user_id.clone(),
            user_name: Some(viewer.display_name.clone()),
            emoji: emoji.to_string(),
        }),
        removed: vec![],
    }
}

/// Apply a toggle to a reaction list. Rows are matched on `(message_id, user_id, emoji)`
/// rather than id, so the outcome can be replayed over a refreshed server list.
pub fn apply_toggle(reactions: &mut Vec<Reaction>, outcome: &ToggleOutcome) {
    if !outcome.removed.is_empty() {
        reactions.retain(|r| !outcome.removed.iter().any(|x| same_slot(x, r)));
    }
    if let Some(added) = &outcome.added {
        if !reactions.iter().any(|r| same_slot(r, added)) {
            reactions.push(added.clone());
        }
    }
}

fn same_slot(a: &Reaction, b: &Reaction) -> bool {
    a.message_id == b.message_id && a.user_id == b.user_id && a.emoji == b.emoji
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(id: &str, user: &str, emoji: &str) -> Reaction {
        Reaction {
            id: id.into(),
            message_id: "m1".into(),
            user_id: user.into(),
            user_name: Some(user.to_uppercase()),
            emoji: emoji.into(),
        }
    }

    fn sample() -> Vec<Reaction> {
        let mut out = vec![r("f1", "u1", "🔥")];
        for i in 0..3 {
            out.push(r(&format!("t{i}"), &format!("t{i}"), "👍"));
        }
        for i in 0..5 {
            out.push(r(&format!("p{i}"), &format!("p{i}"), "🙏"));
        }
        out
    }

    #[test]
    fn groups_sorted_by_count_descending() {
        let mut reactions = sample();
        reactions.push(r("v1", "me", "🙏"));
        let groups = aggregate(&reactions, "me");
        let summary: Vec<(&str, u32)> = groups.iter().map(|g| (g.emoji.as_str(), g.count)).collect();
        assert_eq!(summary, vec![("🙏", 6), ("👍", 3), ("🔥", 1)]);
        assert!(groups[0].reacted_by_viewer);
        assert!(!groups[1].reacted_by_viewer);
        assert_eq!(groups[0].sample_names.len(), 3);
    }

    #[test]
    fn duplicate_user_emoji_counts_once() {
        let reactions = vec![r("a", "u1", "👍"), r("b", "u1", "👍"), r("c", "u2", "👍")];
        let groups = aggregate(&reactions, "me");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].count, 2);
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let reactions = vec![r("a", "u1", "😂"), r("b", "u2", "👍")];
        let groups = aggregate(&reactions, "me");
        assert_eq!(groups[0].emoji, "😂");
        assert_eq!(groups[1].emoji, "👍");
    }

    #[test]
    fn toggle_add_then_remove_restores_exact_set() {
        let me = Identity::new("me", "Me");
        let original = sample();
        let mut reactions = original.clone();

        let first = toggle(&reactions, "m1", &me, "🔥");
        assert!(first.is_add());
        apply_toggle(&mut reactions, &first);
        assert!(aggregate(&reactions, "me")
            .iter()
            .any(|g| g.emoji == "🔥" && g.reacted_by_viewer && g.count == 2));

        let second = toggle(&reactions, "m1", &me, "🔥");
        assert!(!second.is_add());
        apply_toggle(&mut reactions, &second);
        assert_eq!(reactions, original);
    }

    #[test]
    fn toggle_remove_then_add_restores_group_counts() {
        let me = Identity::new("me", "Me");
        let mut reactions = vec![r("a", "me", "👍"), r("b", "u1", "😂")];
        let before = aggregate(&reactions, "me");

        for _ in 0..2 {
            let outcome = toggle(&reactions, "m1", &me, "👍");
            apply_toggle(&mut reactions, &outcome);
        }

        // Re-adding moves the viewer's row to the end, which can reorder equal-count
        // groups; compare as multisets.
        let mut after = aggregate(&reactions, "me");
        let mut before = before;
        let key = |g: &ReactionGroup| (g.emoji.clone(), g.count, g.reacted_by_viewer);
        before.sort_by_key(key);
        after.sort_by_key(key);
        let strip = |v: Vec<ReactionGroup>| v.into_iter().map(|g| key(&g)).collect::<Vec<_>>();
        assert_eq!(strip(before), strip(after));
    }

    #[test]
    fn strip_shows_overflow_and_expands() {
        let emojis = ["😀", "😂", "😍", "👍", "🔥", "🙏", "🎉"];
        let reactions: Vec<Reaction> = emojis
            .iter()
            .enumerate()
            .map(|(i, e)| r(&i.to_string(), &format!("u{i}"), e))
            .collect();
        let mut strip = ReactionStrip::new(aggregate(&reactions, "me"));
        assert_eq!(strip.visible().len(), 5);
        assert_eq!(strip.overflow_label().as_deref(), Some("+2"));

        strip.toggle_expanded();
        assert_eq!(strip.visible().len(), 7);
        assert_eq!(strip.overflow_label(), None);
    }
}
