//! Topic masks granted to each role.
//!
//! A mask has the same shape as a topic. Segment tokens:
//!
//! | Token | Matches |
//! |-------|---------|
//! | `+` | any segment, wildcards included |
//! | `*` | any concrete identifier |
//! | `?` | any concrete identifier, then confirmed by the relationship oracle |
//! | `0` | the literal all-hosts token |
//! | `-` | the literal "not addressed" token |
//! | other | the same literal |

use crate::error::AclError;
use hive_types::topic::{is_identifier, token, SENDER};
use hive_types::{AccessType, Grammar, Role, Topic};
use std::fmt;

/// One access pattern granted to a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    segments: Vec<String>,
}

impl Mask {
    fn new(segments: &[&str]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn sender(&self) -> &str {
        &self.segments[SENDER]
    }

    /// Whether matching this mask requires an oracle call.
    pub fn has_query(&self) -> bool {
        self.segments.iter().any(|s| s == token::QUERY)
    }

    /// Per-segment comparison of `topic` against this mask, before any
    /// oracle call.
    ///
    /// The sender segment is only compared for WRITE: readers and
    /// subscribers do not choose the sender of what they receive.
    pub fn static_match(&self, topic: &Topic, access: AccessType) -> bool {
        if self.segments.len() != topic.segments().len() {
            return false;
        }
        self.segments
            .iter()
            .zip(topic.segments())
            .enumerate()
            .all(|(index, (mask, value))| {
                if index == SENDER && access != AccessType::Write {
                    true
                } else {
                    segment_matches(mask, value)
                }
            })
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn segment_matches(mask: &str, value: &str) -> bool {
    match mask {
        token::ANY_INCLUSIVE => true,
        token::ANY_EXCLUSIVE | token::QUERY => is_identifier(value),
        _ => mask == value,
    }
}

/// Masks granted to `role` for `access` under `grammar`.
///
/// READ and SUBSCRIBE share one table. READ_WRITE is never granted.
///
/// # Errors
///
/// Returns `AclError::MissingHostId` for the host role without a host id.
pub fn masks_for(
    grammar: Grammar,
    role: Role,
    access: AccessType,
    authority_id: &str,
    host_id: Option<&str>,
) -> Result<Vec<Mask>, AclError> {
    use token::{ALL as ALL_HOSTS, ANY_INCLUSIVE as ANY, NONE, QUERY};
    let auth = authority_id;

    let masks = match (role, grammar, access) {
        (_, _, AccessType::ReadWrite) => Vec::new(),

        (Role::Authority, Grammar::Flat, AccessType::Read | AccessType::Subscribe) => {
            vec![Mask::new(&[ANY, auth, NONE, NONE])]
        }
        (Role::Authority, Grammar::Flat, AccessType::Write) => {
            vec![Mask::new(&[auth, auth, ANY, NONE])]
        }
        (Role::Authority, Grammar::Nested, AccessType::Read | AccessType::Subscribe) => {
            vec![Mask::new(&[ANY, auth, NONE, NONE, NONE])]
        }
        (Role::Authority, Grammar::Nested, AccessType::Write) => {
            vec![Mask::new(&[auth, auth, ANY, NONE, NONE])]
        }

        (Role::Host, grammar, access) => {
            let h = host_id.ok_or(AclError::MissingHostId)?;
            match (grammar, access) {
                (Grammar::Flat, AccessType::Write) => vec![
                    Mask::new(&[h, auth, NONE, NONE]),
                    Mask::new(&[QUERY, auth, NONE, QUERY]),
                ],
                (Grammar::Flat, _) => vec![
                    Mask::new(&[ANY, auth, h, NONE]),
                    Mask::new(&[ANY, auth, ALL_HOSTS, NONE]),
                    Mask::new(&[ANY, auth, NONE, QUERY]),
                ],
                (Grammar::Nested, AccessType::Write) => vec![
                    Mask::new(&[h, auth, NONE, NONE, NONE]),
                    Mask::new(&[QUERY, auth, NONE, QUERY, NONE]),
                    Mask::new(&[QUERY, auth, NONE, QUERY, QUERY]),
                ],
                (Grammar::Nested, _) => vec![
                    Mask::new(&[ANY, auth, h, NONE, NONE]),
                    Mask::new(&[ANY, auth, ALL_HOSTS, NONE, NONE]),
                    Mask::new(&[ANY, auth, NONE, QUERY, NONE]),
                    Mask::new(&[ANY, auth, NONE, QUERY, QUERY]),
                ],
            }
        }
    };
    Ok(masks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(masks: &[Mask]) -> Vec<String> {
        masks.iter().map(Mask::to_string).collect()
    }

    #[test]
    fn nested_host_tables() {
        let read = masks_for(Grammar::Nested, Role::Host, AccessType::Read, "auth", Some("h1"))
            .expect("host id present");
        assert_eq!(
            rendered(&read),
            ["+/auth/h1/-/-", "+/auth/0/-/-", "+/auth/-/?/-", "+/auth/-/?/?"]
        );

        let write = masks_for(Grammar::Nested, Role::Host, AccessType::Write, "auth", Some("h1"))
            .expect("host id present");
        assert_eq!(
            rendered(&write),
            ["h1/auth/-/-/-", "?/auth/-/?/-", "?/auth/-/?/?"]
        );
    }

    #[test]
    fn flat_authority_tables() {
        let subscribe = masks_for(Grammar::Flat, Role::Authority, AccessType::Subscribe, "auth", None)
            .expect("no host id needed");
        assert_eq!(rendered(&subscribe), ["+/auth/-/-"]);

        let write = masks_for(Grammar::Flat, Role::Authority, AccessType::Write, "auth", None)
            .expect("no host id needed");
        assert_eq!(rendered(&write), ["auth/auth/+/-"]);
    }

    #[test]
    fn read_write_grants_nothing() {
        let masks = masks_for(Grammar::Nested, Role::Host, AccessType::ReadWrite, "auth", None)
            .expect("read_write never needs a host id");
        assert!(masks.is_empty());
    }

    #[test]
    fn host_role_requires_host_id() {
        assert_eq!(
            masks_for(Grammar::Flat, Role::Host, AccessType::Read, "auth", None),
            Err(AclError::MissingHostId)
        );
    }

    #[test]
    fn segment_tokens() {
        assert!(segment_matches("+", "+"));
        assert!(segment_matches("*", "a1"));
        assert!(!segment_matches("*", "+"));
        assert!(!segment_matches("?", "-"));
        assert!(segment_matches("0", "0"));
        assert!(!segment_matches("0", "h1"));
        assert!(segment_matches("-", "-"));
        assert!(!segment_matches("h1", "h2"));
    }

    #[test]
    fn sender_is_only_compared_on_write() {
        let mask = Mask::new(&["h1", "auth", "-", "-", "-"]);
        let topic = Topic::parse("h2/auth/-/-/-", Grammar::Nested).expect("valid topic");
        assert!(mask.static_match(&topic, AccessType::Read));
        assert!(!mask.static_match(&topic, AccessType::Write));
    }
}
