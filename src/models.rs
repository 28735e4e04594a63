//! Core data models used throughout Forage.
//!
//! These types represent the posts, replies, and enrichment records that flow
//! through the harvesting and persistence pipeline.

use serde::{Deserialize, Serialize};

/// One harvested post, as produced by a content origin.
///
/// Identity (`id`) is assigned once at discovery and never changes. A post
/// discovered in two overlapping windows collapses to a single record
/// (first-seen wins). Enrichment mutates `enrichment` and `facts` in place,
/// never the raw fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub source: String,
    pub title: String,
    pub body: String,
    pub score: i64,
    pub num_comments: i64,
    pub created_utc: i64,
    /// Human-readable form of `created_utc` (`%Y-%m-%d %H:%M:%S`), when known.
    pub created_at: Option<String>,
    pub author: Option<String>,
    pub url: String,
    pub upvote_ratio: f64,
    pub top_reply: Option<TopReply>,
    pub enrichment: Option<Enrichment>,
    pub facts: Option<FinancialFacts>,
}

/// The single highest-ranked reply to a post, fetched as a secondary lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopReply {
    pub id: String,
    pub body: String,
    pub score: i64,
    pub author: Option<String>,
}

/// AI-derived metadata attached to a post by the enrichment pipeline.
///
/// `category` is always a member of the closed vocabulary; anything the
/// model invents outside it is coerced to the default catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrichment {
    pub category: String,
    pub tags: Vec<String>,
    pub summary: String,
    pub consensus: String,
    pub key_advice: String,
}

/// Structured numeric facts extracted deterministically from post text.
///
/// Field names follow the persisted record columns. All extraction is
/// regex-based and independent of the AI call, so these survive any
/// enrichment failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialFacts {
    /// All plausible monetary amounts found, deduplicated, sorted descending.
    pub amounts: Vec<i64>,
    pub patrimoine: Option<i64>,
    pub revenus_annuels: Option<i64>,
    pub revenus_mensuels: Option<i64>,
    pub epargne_mensuelle: Option<i64>,
    pub age: Option<i64>,
    pub duree_annees: Option<i64>,
}

/// A named time range used to scope one retrieval pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub key: WindowKey,
}

/// The closed set of window keys the origins understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKey {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl WindowKey {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "hour" => Some(Self::Hour),
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Wire value used by the listing endpoints (`?t=...`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Year => "year",
            Self::All => "all",
        }
    }

    /// Span of the window in seconds, `None` for the unbounded `all` range.
    pub fn span_secs(&self) -> Option<i64> {
        match self {
            Self::Hour => Some(3_600),
            Self::Day => Some(86_400),
            Self::Week => Some(7 * 86_400),
            Self::Month => Some(30 * 86_400),
            Self::Year => Some(365 * 86_400),
            Self::All => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Hour => "Last hour",
            Self::Day => "Last 24 hours",
            Self::Week => "Last week",
            Self::Month => "Last month",
            Self::Year => "Last year",
            Self::All => "All time",
        }
    }
}

/// An ordered, finite sequence of windows, freshest first.
///
/// Fixed at configuration time and shared by all sources. A source whose
/// checkpoint index has moved past the last entry is fully backfilled.
#[derive(Debug, Clone)]
pub struct WindowSchedule {
    windows: Vec<Window>,
}

impl WindowSchedule {
    pub fn new(windows: Vec<Window>) -> Self {
        Self { windows }
    }

    /// The default backfill schedule: one year of history, coarsest-recent first.
    pub fn standard() -> Self {
        Self::new(
            [WindowKey::Day, WindowKey::Week, WindowKey::Month, WindowKey::Year]
                .into_iter()
                .map(|key| Window { key })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Window> {
        self.windows.get(index)
    }

    /// The freshest window, walked on every steady-state run.
    pub fn freshest(&self) -> &Window {
        &self.windows[0]
    }
}

/// How a listing pass orders candidates.
///
/// Freshest retrieval uses a lower score floor than ranked retrieval since
/// new content has not yet accumulated votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    Fresh,
    Ranked,
}

/// Counters produced by one scheduler invocation. Logged, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fetched: u64,
    pub skipped_duplicates: u64,
    pub pushed: u64,
    pub skipped_at_push: u64,
    pub errors: u64,
    /// True when the re-entrancy guard turned the run into a no-op.
    pub already_ran: bool,
}

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "épargne 500€";
        let cut = truncate_chars(text, 7);
        assert_eq!(cut, "épargne");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn window_keys_roundtrip() {
        for key in ["hour", "day", "week", "month", "year", "all"] {
            assert_eq!(WindowKey::parse(key).unwrap().as_str(), key);
        }
        assert!(WindowKey::parse("decade").is_none());
    }

    #[test]
    fn standard_schedule_is_freshest_first() {
        let schedule = WindowSchedule::standard();
        assert_eq!(schedule.len(), 4);
        assert_eq!(schedule.freshest().key, WindowKey::Day);
        assert_eq!(schedule.get(3).unwrap().key, WindowKey::Year);
        assert!(schedule.get(4).is_none());
    }

    #[test]
    fn window_spans_are_ordered() {
        let schedule = WindowSchedule::standard();
        let spans: Vec<i64> = (0..schedule.len())
            .map(|i| schedule.get(i).unwrap().key.span_secs().unwrap())
            .collect();
        let mut sorted = spans.clone();
        sorted.sort();
        assert_eq!(spans, sorted);
    }
}
