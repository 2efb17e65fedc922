//! Admission control for free-text events.
//!
//! Two ordered checks. The blocklist runs first and is absolute: a blocked
//! author is dropped regardless of content. Otherwise an event is admitted
//! when its text contains one of the configured keywords or its category
//! equals the always-admit category. Rejections are silent.

use std::collections::{BTreeSet, HashSet};

use regex::RegexSet;

use crate::error::ConfigError;
use crate::event::{payload, Event, EventKind};

/// Outcome of the admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterDecision {
    /// Relevant content from a non-blocked author.
    Admit,
    /// Author is on the blocklist.
    Blocked,
    /// Neither keyword nor category matched.
    Irrelevant,
    /// The event's kind is not subject to filtering.
    Bypass,
}

impl FilterDecision {
    /// True if the event proceeds downstream.
    #[must_use]
    pub const fn admits(self) -> bool {
        matches!(self, Self::Admit | Self::Bypass)
    }
}

/// Blocklist + relevance filter.
#[derive(Debug, Clone)]
pub struct Filter {
    enabled: bool,
    kinds: BTreeSet<EventKind>,
    blocklist: HashSet<String>,
    keywords: RegexSet,
    always_admit_category: Option<String>,
}

impl Filter {
    /// Builds a filter. Keywords match as literal, case-sensitive substrings.
    ///
    /// # Errors
    ///
    /// `EmptyKeywordSet` when enabled without keywords, `BlankKeyword` for
    /// whitespace-only keywords.
    pub fn new<'a>(
        enabled: bool,
        kinds: impl IntoIterator<Item = EventKind>,
        blocklist: impl IntoIterator<Item = &'a str>,
        keywords: impl IntoIterator<Item = &'a str>,
        always_admit_category: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let keywords: Vec<&str> = keywords.into_iter().collect();
        if keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::BlankKeyword);
        }
        if enabled && keywords.is_empty() {
            return Err(ConfigError::EmptyKeywordSet);
        }

        let keywords = RegexSet::new(keywords.iter().map(|k| regex::escape(k))).map_err(|e| {
            ConfigError::InvalidKeywordPattern {
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            enabled,
            kinds: kinds.into_iter().collect(),
            blocklist: blocklist.into_iter().map(str::to_string).collect(),
            keywords,
            always_admit_category: always_admit_category
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    /// A filter that lets everything through.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            kinds: BTreeSet::new(),
            blocklist: HashSet::new(),
            keywords: RegexSet::empty(),
            always_admit_category: None,
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// True if the event proceeds downstream.
    #[must_use]
    pub fn admit(&self, event: &Event) -> bool {
        self.decide(event).admits()
    }

    /// Full admission decision.
    #[must_use]
    pub fn decide(&self, event: &Event) -> FilterDecision {
        if !self.enabled || !self.kinds.contains(&event.kind) {
            return FilterDecision::Bypass;
        }

        if self.blocklist.contains(event.entity_key.as_str()) {
            return FilterDecision::Blocked;
        }

        let keyword_hit = event
            .opt_str(payload::TEXT)
            .is_some_and(|text| self.keywords.is_match(text));
        let category_hit = match (&self.always_admit_category, event.opt_str(payload::TOPIC)) {
            (Some(always), Some(topic)) => always == topic,
            _ => false,
        };

        if keyword_hit || category_hit {
            FilterDecision::Admit
        } else {
            FilterDecision::Irrelevant
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;

    fn filter() -> Filter {
        Filter::new(
            true,
            [EventKind::Message],
            ["@user_1234", "@bot_999"],
            ["#AI", "#Python", "Tech"],
            Some("Tech"),
        )
        .unwrap()
    }

    fn message(user: &str, topic: &str, text: &str) -> Event {
        Event::new(user, EventKind::Message, Timestamp::EPOCH)
            .with("text", text)
            .with("topic", topic)
    }

    #[test]
    fn test_keyword_admits() {
        let f = filter();
        let ev = message("@ai_researcher", "Science", "New LLM models are changing everything #AI");
        assert_eq!(f.decide(&ev), FilterDecision::Admit);
        assert!(f.admit(&ev));
    }

    #[test]
    fn test_blocklist_beats_keywords() {
        let f = filter();
        let ev = message("@bot_999", "Tech", "Learning #Python is awesome for #AI");
        assert_eq!(f.decide(&ev), FilterDecision::Blocked);
        assert!(!f.admit(&ev));
    }

    #[test]
    fn test_category_admits_without_keyword() {
        let f = filter();
        let ev = message("@dev_guy", "Tech", "shipping a release today");
        assert_eq!(f.decide(&ev), FilterDecision::Admit);
    }

    #[test]
    fn test_irrelevant_dropped() {
        let f = filter();
        assert_eq!(f.decide(&message("@user_1", "K-Pop", "I love BTS! #Music")), FilterDecision::Irrelevant);
        // Matching is case-sensitive.
        assert_eq!(f.decide(&message("@user_1", "Misc", "#ai is lowercase")), FilterDecision::Irrelevant);
    }

    #[test]
    fn test_keywords_are_literal() {
        let f = Filter::new(true, [EventKind::Message], [], ["C++", "a.b"], None).unwrap();
        assert!(f.admit(&message("u", "x", "I write C++")));
        assert!(!f.admit(&message("u", "x", "axb")));
    }

    #[test]
    fn test_other_kinds_bypass() {
        let f = filter();
        let ev = Event::new("@bot_999", EventKind::Interaction, Timestamp::EPOCH);
        assert_eq!(f.decide(&ev), FilterDecision::Bypass);
        assert!(Filter::disabled().admit(&message("@bot_999", "x", "y")));
    }

    #[test]
    fn test_construction_errors() {
        assert_eq!(
            Filter::new(true, [EventKind::Message], [], [], None).unwrap_err(),
            ConfigError::EmptyKeywordSet
        );
        assert_eq!(
            Filter::new(true, [EventKind::Message], [], ["  "], None).unwrap_err(),
            ConfigError::BlankKeyword
        );
        assert!(Filter::new(false, [EventKind::Message], [], [], None).is_ok());
    }
}
