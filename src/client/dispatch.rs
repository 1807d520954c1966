//! Two-tier outcome of a mutating facade call.

use crate::queue::JobReceipt;

/// How a mutating call was carried out.
///
/// `Applied` means the server has processed the operation. `Accepted` only
/// means the job is durably stored; the server effect happens later, and a
/// failure at that point is reported through queue events, not to this
/// caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched<T> {
    Applied(T),
    Accepted(JobReceipt),
}

impl<T> Dispatched<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The server result, if the call ran synchronously
    pub fn applied(self) -> Option<T> {
        match self {
            Self::Applied(value) => Some(value),
            Self::Accepted(_) => None,
        }
    }

    /// The job receipt, if the call was queued
    pub fn receipt(&self) -> Option<&JobReceipt> {
        match self {
            Self::Accepted(receipt) => Some(receipt),
            Self::Applied(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Dispatched<U> {
        match self {
            Self::Applied(value) => Dispatched::Applied(f(value)),
            Self::Accepted(receipt) => Dispatched::Accepted(receipt),
        }
    }
}
