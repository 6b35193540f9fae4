use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Reactors per emoji for one message.
///
/// An emoji whose reactor set is empty counts as absent: it is never
/// enumerated, although its key may linger internally.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ReactionSet {
    by_emoji: BTreeMap<String, BTreeSet<String>>,
}

impl ReactionSet {
    /// Add `reactor` under `emoji`, or remove it if already present.
    ///
    /// Returns `true` when the reactor is present afterwards.
    pub fn toggle(&mut self, emoji: &str, reactor: &str) -> bool {
        let reactors = self.by_emoji.entry(emoji.to_string()).or_default();
        if reactors.remove(reactor) {
            false
        } else {
            reactors.insert(reactor.to_string());
            true
        }
    }

    pub fn reactors(&self, emoji: &str) -> Option<&BTreeSet<String>> {
        self.by_emoji.get(emoji).filter(|r| !r.is_empty())
    }

    pub fn contains(&self, emoji: &str, reactor: &str) -> bool {
        self.reactors(emoji).is_some_and(|r| r.contains(reactor))
    }

    /// Emojis with at least one reactor, with their counts.
    pub fn summary(&self) -> Vec<(&str, usize)> {
        self.by_emoji
            .iter()
            .filter(|(_, r)| !r.is_empty())
            .map(|(e, r)| (e.as_str(), r.len()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.by_emoji.values().all(BTreeSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_toggle_is_a_noop() {
        let mut set = ReactionSet::default();
        assert!(set.toggle("👍", "u1"));
        assert!(!set.toggle("👍", "u1"));
        assert!(!set.contains("👍", "u1"));
        assert!(set.reactors("👍").is_none());
        assert!(set.summary().is_empty());
        assert!(set.is_empty());
    }

    #[test]
    fn emojis_are_independent() {
        let mut set = ReactionSet::default();
        set.toggle("👍", "u1");
        set.toggle("🔥", "u1");
        set.toggle("🔥", "u2");
        set.toggle("👍", "u1");

        assert_eq!(set.summary(), vec![("🔥", 2)]);
        assert!(set.contains("🔥", "u1"));
    }
}
