//! Semantic tagging of occurrences.

use crate::config::{ConfiguredSource, KeywordSets};
use crate::occurrence::{EventKind, Occurrence};

/// iCalendar PRIORITY values treated as "important" (1 is highest).
const IMPORTANT_PRIORITIES: std::ops::RangeInclusive<u8> = 1..=4;

/// Tags occurrences as birthday/anniversary/holiday/regular and fills in the
/// profile colour.
#[derive(Debug, Clone)]
pub struct Classifier {
    birthday: Vec<String>,
    anniversary: Vec<String>,
    holiday: Vec<String>,
    important: Vec<String>,
}

impl Classifier {
    pub fn new(keywords: &KeywordSets) -> Self {
        fn lower(list: &[String]) -> Vec<String> {
            list.iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        }
        Classifier {
            birthday: lower(&keywords.birthday),
            anniversary: lower(&keywords.anniversary),
            holiday: lower(&keywords.holiday),
            important: lower(&keywords.important),
        }
    }

    /// The most specific kind any keyword set or the source hint points at.
    pub fn kind_for(
        &self,
        title: &str,
        categories: &[String],
        hint: Option<EventKind>,
    ) -> EventKind {
        let haystacks = haystacks(title, categories);
        let matches = |keywords: &[String]| {
            keywords
                .iter()
                .any(|k| haystacks.iter().any(|h| h.contains(k.as_str())))
        };

        let mut kind = hint.unwrap_or(EventKind::Regular);
        for (candidate, keywords) in [
            (EventKind::Holiday, &self.holiday),
            (EventKind::Anniversary, &self.anniversary),
            (EventKind::Birthday, &self.birthday),
        ] {
            if candidate > kind && matches(keywords.as_slice()) {
                kind = candidate;
            }
        }
        kind
    }

    pub fn is_important(&self, title: &str, categories: &[String], priority: Option<u8>) -> bool {
        if priority.is_some_and(|p| IMPORTANT_PRIORITIES.contains(&p)) {
            return true;
        }
        let haystacks = haystacks(title, categories);
        self.important
            .iter()
            .any(|k| haystacks.iter().any(|h| h.contains(k.as_str())))
    }

    pub fn classify(&self, mut occurrence: Occurrence, source: &ConfiguredSource) -> Occurrence {
        occurrence.kind = self.kind_for(&occurrence.title, &occurrence.categories, source.kind);
        occurrence.important =
            self.is_important(&occurrence.title, &occurrence.categories, occurrence.priority);
        if occurrence.color.is_none() {
            occurrence.color = Some(source.profile_color.clone());
        }
        occurrence
    }

    pub fn classify_all(
        &self,
        occurrences: Vec<Occurrence>,
        source: &ConfiguredSource,
    ) -> Vec<Occurrence> {
        occurrences
            .into_iter()
            .map(|o| self.classify(o, source))
            .collect()
    }
}

fn haystacks(title: &str, categories: &[String]) -> Vec<String> {
    std::iter::once(title)
        .chain(categories.iter().map(String::as_str))
        .map(str::to_lowercase)
        .collect()
}
