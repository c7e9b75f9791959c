//! Provenance records.
//!
//! An [`Information`] tracks one unit of work an agent performed: the input
//! it started from, the output it produced, and the function that produced
//! it. Records link to the record they were derived from through
//! `parent_id`, forming the causal chain stored by the history graph.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A timestamped piece of data.
///
/// Data and timestamp always travel together, so a snapshot is written as a
/// unit and can never be observed half-populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSnapshot {
    /// Arbitrary JSON payload.
    pub data: serde_json::Value,
    /// Trusted timestamp at which the data was captured.
    pub timestamp: String,
}

impl DataSnapshot {
    pub fn new(data: serde_json::Value, timestamp: impl Into<String>) -> Self {
        Self {
            data,
            timestamp: timestamp.into(),
        }
    }
}

/// A content-identified provenance record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Information {
    /// Unique identifier, generated once at creation.
    pub id: Uuid,
    /// The record this one was derived from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Input the work started from.
    #[serde(default)]
    pub input: Option<DataSnapshot>,
    /// Output the work produced.
    #[serde(default)]
    pub output: Option<DataSnapshot>,
    /// Identifier of the function that produced the output.
    #[serde(default)]
    pub function_id: Option<String>,
}

/// Errors raised by the record lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InformationError {
    /// The record already carries an output.
    #[error("information {0} is already completed")]
    AlreadyCompleted(Uuid),
}

impl Information {
    /// Creates an empty record with a fresh identifier.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            input: None,
            output: None,
            function_id: None,
        }
    }

    /// Starts a record from an input.
    pub fn begin(input: serde_json::Value, timestamp: impl Into<String>) -> Self {
        Self {
            input: Some(DataSnapshot::new(input, timestamp)),
            ..Self::new()
        }
    }

    /// Starts a record derived from `parent`.
    pub fn child_of(
        parent: &Information,
        input: serde_json::Value,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            parent_id: Some(parent.id),
            ..Self::begin(input, timestamp)
        }
    }

    /// Completes the record with its output.
    ///
    /// The function id is only written if it was not already set.
    ///
    /// # Errors
    ///
    /// Returns `InformationError::AlreadyCompleted` if an output is already
    /// present; outputs are never overwritten.
    pub fn complete(
        &mut self,
        output: serde_json::Value,
        timestamp: impl Into<String>,
        function_id: Option<String>,
    ) -> Result<(), InformationError> {
        if self.output.is_some() {
            return Err(InformationError::AlreadyCompleted(self.id));
        }
        self.output = Some(DataSnapshot::new(output, timestamp));
        if self.function_id.is_none() {
            self.function_id = function_id;
        }
        Ok(())
    }

    /// Returns `true` once an output has been recorded.
    pub fn is_complete(&self) -> bool {
        self.output.is_some()
    }
}

impl Default for Information {
    fn default() -> Self {
        Self::new()
    }
}
