//! Access types and caller roles presented to the access-control evaluator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The operation a transport client requests on a topic.
///
/// Serialized as its numeric code, which is what broker authorization hooks
/// send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum AccessType {
    /// Receive a message published on a topic.
    Read = 1,
    /// Publish to a topic.
    Write = 2,
    /// Combined read and write. Never granted.
    ReadWrite = 3,
    /// Register a subscription pattern.
    Subscribe = 4,
}

impl AccessType {
    /// Returns the numeric code for this access type.
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Attempts to convert a numeric code to an `AccessType`.
    ///
    /// Returns `None` if the code does not correspond to a known access type.
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::ReadWrite),
            4 => Some(Self::Subscribe),
            _ => None,
        }
    }

    /// Returns the string label for this access type.
    pub fn label(self) -> &'static str {
        match self {
            Self::Read => "READ",
            Self::Write => "WRITE",
            Self::ReadWrite => "READ_WRITE",
            Self::Subscribe => "SUBSCRIBE",
        }
    }
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Error returned for an unknown numeric access code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown access type code: {0}")]
pub struct InvalidAccessType(pub u8);

impl TryFrom<u8> for AccessType {
    type Error = InvalidAccessType;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_u8(code).ok_or(InvalidAccessType(code))
    }
}

impl From<AccessType> for u8 {
    fn from(access: AccessType) -> Self {
        access.as_u8()
    }
}

/// Roles a transport client can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The authority service.
    Authority,
    /// A host process, identified by its host id.
    Host,
}

impl Role {
    /// Returns the canonical string label for this role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authority => "authority",
            Self::Host => "host",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authority" => Ok(Self::Authority),
            "host" => Ok(Self::Host),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown role string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(pub String);
