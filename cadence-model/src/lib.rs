//! Core data model definitions shared across Cadence crates.

pub mod error;
pub mod ids;
pub mod quota;
pub mod remote;
pub mod sync;

pub use error::{ModelError, Result as ModelResult};
pub use ids::{IssueKey, PersonId, QueueEntryId, SquadId, TaskId};
pub use quota::{QuotaRule, QuotaUsage};
pub use remote::{
    RemoteComment, RemoteIssue, RemoteLink, RemoteWorklog, WorklogOrigin,
};
pub use sync::{
    CallRecord, OperationType, QueueEntry, QueueState, SyncCounters, SyncMode,
    SyncState, SyncStatusRecord, TransportMethod,
};
