//! Structured pipeline errors.
//!
//! Every variant names the record or entity it concerns so batch passes can
//! report partial failures instead of aborting on the first bad row.

use crate::model::{EntityId, GroupKey, SurrogateId, TransactionId};
use std::fmt;

/// Which input a malformed record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Interval,
    Transaction,
    User,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Interval => write!(f, "interval"),
            RecordKind::Transaction => write!(f, "transaction"),
            RecordKind::User => write!(f, "user"),
        }
    }
}

/// Why a version chain failed its ordering precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderingFault {
    /// A version starts before its predecessor.
    OutOfOrder,
    /// A version starts before its predecessor ends.
    Overlap,
    /// Days between two versions are not covered.
    Gap,
    /// An open-ended version is followed by another version.
    OpenEndNotLast,
    /// A version belongs to a different entity than the chain.
    ForeignEntity,
    /// A version overlaps the chain of another entity in the same group.
    GroupOverlap,
}

impl fmt::Display for OrderingFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderingFault::OutOfOrder => write!(f, "version starts before its predecessor"),
            OrderingFault::Overlap => write!(f, "version overlaps its predecessor"),
            OrderingFault::Gap => write!(f, "gap between consecutive versions"),
            OrderingFault::OpenEndNotLast => write!(f, "open-ended version is not last"),
            OrderingFault::ForeignEntity => write!(f, "version belongs to another entity"),
            OrderingFault::GroupOverlap => {
                write!(f, "version overlaps another entity of the same group")
            }
        }
    }
}

/// Pipeline error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// An entity's chain is not sorted and contiguous. Fatal for that entity only.
    InputOrderingViolation {
        entity_id: EntityId,
        surrogate_id: SurrogateId,
        fault: OrderingFault,
    },
    /// A transaction references a group with no interval chain. Never fatal.
    UnknownGroupReference {
        transaction_id: TransactionId,
        group_key: GroupKey,
    },
    /// A field could not be parsed. Fatal for that record only.
    MalformedRecord {
        kind: RecordKind,
        record_id: String,
        field: String,
        value: String,
        reason: String,
    },
    /// The input as a whole could not be read. Aborts the pass.
    Source { message: String },
}

impl PipelineError {
    pub fn malformed(
        kind: RecordKind,
        record_id: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl fmt::Display,
    ) -> Self {
        PipelineError::MalformedRecord {
            kind,
            record_id: record_id.into(),
            field: field.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    /// Systemic errors abort a pass; everything else is recorded per record.
    pub fn is_systemic(&self) -> bool {
        matches!(self, PipelineError::Source { .. })
    }

    /// Identifier of the offending record or entity, when there is one.
    pub fn subject(&self) -> Option<String> {
        match self {
            PipelineError::InputOrderingViolation { entity_id, .. } => Some(entity_id.to_string()),
            PipelineError::UnknownGroupReference { transaction_id, .. } => {
                Some(transaction_id.to_string())
            }
            PipelineError::MalformedRecord { record_id, .. } => Some(record_id.clone()),
            PipelineError::Source { .. } => None,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::InputOrderingViolation {
                entity_id,
                surrogate_id,
                fault,
            } => write!(
                f,
                "input ordering violation for entity {entity_id} at {surrogate_id}: {fault}"
            ),
            PipelineError::UnknownGroupReference {
                transaction_id,
                group_key,
            } => write!(
                f,
                "transaction {transaction_id} references unknown group {group_key}"
            ),
            PipelineError::MalformedRecord {
                kind,
                record_id,
                field,
                value,
                reason,
            } => write!(
                f,
                "malformed {kind} record {record_id}: field `{field}` = {value:?} ({reason})"
            ),
            PipelineError::Source { message } => write!(f, "input source failed: {message}"),
        }
    }
}

impl std::error::Error for PipelineError {}
