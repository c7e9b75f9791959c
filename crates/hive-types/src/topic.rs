//! Topic grammar, reserved tokens, and canonical topic construction.
//!
//! A topic is an ordered tuple of segments joined by `/`. The first segment
//! always names the sender; the broker strips it before dispatching, so
//! callbacks are registered against the remaining *route*.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Reserved segment tokens. None of these is ever a valid identifier.
pub mod token {
    /// The field is inapplicable for this topic.
    pub const NONE: &str = "-";
    /// The broadcast/root value of the field.
    pub const ALL: &str = "0";
    /// Any concrete value, never [`ALL`].
    pub const ANY_EXCLUSIVE: &str = "*";
    /// Any value, including [`ALL`].
    pub const ANY_INCLUSIVE: &str = "+";
    /// Resolved against the relationship oracle at evaluation time.
    pub const QUERY: &str = "?";

    /// Every reserved token.
    pub const RESERVED: [&str; 5] = [NONE, ALL, ANY_EXCLUSIVE, ANY_INCLUSIVE, QUERY];
}

/// Segment separator.
pub const SEPARATOR: char = '/';

/// Index of the sender segment in both grammars.
pub const SENDER: usize = 0;
/// Index of the authority segment in both grammars.
pub const AUTHORITY: usize = 1;
/// Index of the host segment in both grammars.
pub const HOST: usize = 2;

/// Returns `true` if `segment` is one of the reserved tokens.
pub fn is_reserved(segment: &str) -> bool {
    token::RESERVED.contains(&segment)
}

/// Returns `true` if `value` may be used as an identifier inside a topic.
pub fn is_identifier(value: &str) -> bool {
    !value.is_empty() && !is_reserved(value) && !has_forbidden_char(value)
}

fn has_forbidden_char(value: &str) -> bool {
    value
        .chars()
        .any(|c| c == SEPARATOR || c == '#' || c.is_whitespace())
}

/// The two coexisting topic grammars.
///
/// Producers and consumers must agree on the grammar per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grammar {
    /// `{sender}/{authority}/{host}/{agent}`
    Flat,
    /// `{sender}/{authority}/{host}/{agency}/{agent}`
    #[default]
    Nested,
}

impl Grammar {
    /// Number of segments a well-formed topic has under this grammar.
    pub fn segment_count(self) -> usize {
        match self {
            Self::Flat => 4,
            Self::Nested => 5,
        }
    }

    /// Index of the agency segment, if the grammar has one.
    pub fn agency_index(self) -> Option<usize> {
        match self {
            Self::Flat => None,
            Self::Nested => Some(3),
        }
    }

    /// Index of the agent segment.
    pub fn agent_index(self) -> usize {
        match self {
            Self::Flat => 3,
            Self::Nested => 4,
        }
    }

    /// Returns the canonical string label for this grammar.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Nested => "nested",
        }
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Grammar {
    type Err = TopicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(Self::Flat),
            "nested" => Ok(Self::Nested),
            other => Err(TopicError::UnknownGrammar(other.to_string())),
        }
    }
}

/// Errors produced while parsing or building topics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    /// The raw topic string was empty.
    #[error("topic is empty")]
    Empty,

    /// The topic does not have the grammar's segment count.
    #[error("expected {expected} topic segments, found {found}")]
    SegmentCount {
        /// Segment count required by the grammar.
        expected: usize,
        /// Segment count actually present.
        found: usize,
    },

    /// A segment was empty.
    #[error("topic segment {0} is empty")]
    EmptySegment(usize),

    /// A segment contained `#` or whitespace.
    #[error("topic segment {index} is invalid: {segment:?}")]
    InvalidSegment {
        /// Position of the offending segment.
        index: usize,
        /// The offending segment.
        segment: String,
    },

    /// A value used to build a topic is not a valid identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// The requested topic cannot be expressed in this grammar.
    #[error("the {0} grammar has no agency segment")]
    NoAgencySegment(Grammar),

    /// Unknown grammar label.
    #[error("unknown topic grammar: {0}")]
    UnknownGrammar(String),
}

/// A well-formed topic under a specific grammar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic {
    grammar: Grammar,
    segments: Vec<String>,
}

impl Topic {
    /// Parses a raw `/`-joined topic.
    ///
    /// # Errors
    ///
    /// Returns `TopicError` if the topic is empty, has the wrong number of
    /// segments, or contains an empty or invalid segment. Malformed topics
    /// are rejected whole, never partially matched.
    pub fn parse(raw: &str, grammar: Grammar) -> Result<Self, TopicError> {
        if raw.is_empty() {
            return Err(TopicError::Empty);
        }
        let segments = raw.split(SEPARATOR).map(str::to_string).collect();
        Self::from_segments(grammar, segments)
    }

    /// Builds a topic from owned segments, validating shape and characters.
    ///
    /// # Errors
    ///
    /// Returns `TopicError` under the same conditions as [`Topic::parse`].
    pub fn from_segments(grammar: Grammar, segments: Vec<String>) -> Result<Self, TopicError> {
        if segments.len() != grammar.segment_count() {
            return Err(TopicError::SegmentCount {
                expected: grammar.segment_count(),
                found: segments.len(),
            });
        }
        for (index, segment) in segments.iter().enumerate() {
            if segment.is_empty() {
                return Err(TopicError::EmptySegment(index));
            }
            if segment.contains('#') || segment.chars().any(char::is_whitespace) {
                return Err(TopicError::InvalidSegment {
                    index,
                    segment: segment.clone(),
                });
            }
        }
        Ok(Self { grammar, segments })
    }

    /// The grammar this topic was parsed under.
    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    /// All segments in order.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The segment at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the grammar's segment count.
    pub fn segment(&self, index: usize) -> &str {
        &self.segments[index]
    }

    pub fn sender(&self) -> &str {
        &self.segments[SENDER]
    }

    pub fn authority(&self) -> &str {
        &self.segments[AUTHORITY]
    }

    pub fn host(&self) -> &str {
        &self.segments[HOST]
    }

    /// The agency segment, or `None` under the flat grammar.
    pub fn agency(&self) -> Option<&str> {
        self.grammar
            .agency_index()
            .map(|index| self.segments[index].as_str())
    }

    pub fn agent(&self) -> &str {
        &self.segments[self.grammar.agent_index()]
    }

    /// The topic without its sender segment.
    pub fn route(&self) -> String {
        self.segments[SENDER + 1..].join("/")
    }

    /// The topic with the sender replaced by `+`: the subscription pattern
    /// for "this conversation, any sender".
    pub fn pattern(&self) -> String {
        self.with_sender(token::ANY_INCLUSIVE).to_string()
    }

    /// Returns a copy of this topic with a different sender segment.
    pub fn with_sender(&self, sender: &str) -> Topic {
        let mut segments = self.segments.clone();
        segments[SENDER] = sender.to_string();
        Topic {
            grammar: self.grammar,
            segments,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Strips the sender segment from a raw topic or pattern.
///
/// Returns `None` if there is no separator.
pub fn strip_sender(raw: &str) -> Option<&str> {
    raw.split_once(SEPARATOR).map(|(_, rest)| rest)
}

/// Segment-wise match of a pattern against a concrete topic or route.
///
/// `+` in the pattern matches any single segment; everything else must match
/// literally. Both sides must have the same number of segments.
pub fn route_matches(pattern: &str, route: &str) -> bool {
    let mut pattern_segments = pattern.split(SEPARATOR);
    let mut route_segments = route.split(SEPARATOR);
    loop {
        match (pattern_segments.next(), route_segments.next()) {
            (None, None) => return true,
            (Some(p), Some(r)) => {
                if p != token::ANY_INCLUSIVE && p != r {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

/// Builds the canonical topics of one authority's deployment.
///
/// ```text
/// authority inbox   {s}/{auth}/-/-[/-]
/// host topic        {s}/{auth}/{host}/-[/-]
/// all hosts         {s}/{auth}/0/-[/-]
/// agency topic      {s}/{auth}/-/{agency}/-        (nested only)
/// agent topic       {s}/{auth}/-/{agency}/{agent}  (flat: {s}/{auth}/-/{agent})
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    grammar: Grammar,
    authority_id: String,
}

impl TopicScheme {
    /// Creates a scheme for the given authority.
    ///
    /// # Errors
    ///
    /// Returns `TopicError::InvalidIdentifier` if `authority_id` cannot be
    /// used inside a topic.
    pub fn new(grammar: Grammar, authority_id: impl Into<String>) -> Result<Self, TopicError> {
        let authority_id = authority_id.into();
        if !is_identifier(&authority_id) {
            return Err(TopicError::InvalidIdentifier(authority_id));
        }
        Ok(Self {
            grammar,
            authority_id,
        })
    }

    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    pub fn authority_id(&self) -> &str {
        &self.authority_id
    }

    fn build(&self, sender: &str, host: &str, agency: &str, agent: &str) -> Topic {
        let mut segments = vec![
            sender.to_string(),
            self.authority_id.clone(),
            host.to_string(),
        ];
        if self.grammar == Grammar::Nested {
            segments.push(agency.to_string());
        }
        segments.push(agent.to_string());
        Topic {
            grammar: self.grammar,
            segments,
        }
    }

    /// Messages addressed to the authority itself.
    pub fn authority(&self, sender: &str) -> Topic {
        self.build(sender, token::NONE, token::NONE, token::NONE)
    }

    /// Messages addressed to one host.
    pub fn host(&self, sender: &str, host_id: &str) -> Topic {
        self.build(sender, host_id, token::NONE, token::NONE)
    }

    /// Broadcast to every host of the authority.
    pub fn all_hosts(&self, sender: &str) -> Topic {
        self.build(sender, token::ALL, token::NONE, token::NONE)
    }

    /// Messages addressed to an agency.
    ///
    /// # Errors
    ///
    /// Returns `TopicError::NoAgencySegment` under the flat grammar.
    pub fn agency(&self, sender: &str, agency_id: &str) -> Result<Topic, TopicError> {
        if self.grammar.agency_index().is_none() {
            return Err(TopicError::NoAgencySegment(self.grammar));
        }
        Ok(self.build(sender, token::NONE, agency_id, token::NONE))
    }

    /// Messages addressed to one agent. The agency is ignored under the flat
    /// grammar.
    pub fn agent(&self, sender: &str, agency_id: &str, agent_id: &str) -> Topic {
        self.build(sender, token::NONE, agency_id, agent_id)
    }
}
