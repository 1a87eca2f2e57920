// ── Filter predicates for record streams ──
//
// Lets consumers narrow snapshots without another REST round-trip.

use crate::model::{AssignmentStatus, RecordId, RequestItem, RequestStatus, TaskAssignment};

/// A predicate over one record type, applied to store snapshots.
pub trait RecordFilter<T> {
    fn matches(&self, record: &T) -> bool;
}

impl<T, F: Fn(&T) -> bool> RecordFilter<T> for F {
    fn matches(&self, record: &T) -> bool {
        self(record)
    }
}

/// Filter predicate for request collections.
pub enum RequestFilter {
    All,
    ByStatus(RequestStatus),
    Open,
    ForEmployee(RecordId),
    Custom(Box<dyn Fn(&RequestItem) -> bool + Send + Sync>),
}

impl RecordFilter<RequestItem> for RequestFilter {
    fn matches(&self, request: &RequestItem) -> bool {
        match self {
            Self::All => true,
            Self::ByStatus(status) => request.status == *status,
            Self::Open => request.status == RequestStatus::Pending,
            Self::ForEmployee(id) => request.employee_id.as_ref() == Some(id),
            Self::Custom(f) => f(request),
        }
    }
}

/// Filter predicate for assignment collections.
pub enum AssignmentFilter {
    All,
    ByStatus(AssignmentStatus),
    ForTask(RecordId),
    Custom(Box<dyn Fn(&TaskAssignment) -> bool + Send + Sync>),
}

impl RecordFilter<TaskAssignment> for AssignmentFilter {
    fn matches(&self, assignment: &TaskAssignment) -> bool {
        match self {
            Self::All => true,
            Self::ByStatus(status) => assignment.status == *status,
            Self::ForTask(id) => assignment.task_id.as_ref() == Some(id),
            Self::Custom(f) => f(assignment),
        }
    }
}
