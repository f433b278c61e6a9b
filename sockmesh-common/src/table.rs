//! The shared tables the hook writes, as seen by the core.
//!
//! Both tables are owned by the kernel and written with `BPF_NOEXIST`. The
//! hook never updates, deletes or iterates entries.

use crate::flow::{SockKey, SockOps};

/// `BPF_NOEXIST` map update flag.
pub const BPF_NOEXIST: u64 = 1;
/// `EEXIST`, returned negated by map updates when the key is present.
pub const EEXIST: i64 = 17;

/// Result of a single insert-if-absent write.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertOutcome {
    /// This invocation won the race and the entry is now present.
    Inserted,
    /// The key was already present. Under concurrent classification of both
    /// sides this is the losing side of the race.
    Exists,
    /// The kernel rejected the write for another reason (e.g. the table is
    /// full). Carries the negative errno.
    Failed(i64),
}

impl InsertOutcome {
    /// Classifies the return of a kernel map update helper.
    #[inline(always)]
    pub const fn from_ret(ret: Result<(), i64>) -> Self {
        match ret {
            Ok(()) => InsertOutcome::Inserted,
            Err(e) if e == -EEXIST => InsertOutcome::Exists,
            Err(e) => InsertOutcome::Failed(e),
        }
    }

    /// True when this write created the entry.
    #[inline(always)]
    pub const fn won(self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }

    /// Negative errno of a write that did not create the entry, 0 otherwise.
    #[inline(always)]
    pub const fn errno(self) -> i64 {
        match self {
            InsertOutcome::Inserted => 0,
            InsertOutcome::Exists => -EEXIST,
            InsertOutcome::Failed(err) => err,
        }
    }
}

/// Translation table consumed by the fast-path mover (`SockKey -> SockKey`).
pub trait RedirectTable {
    fn insert_if_absent(&self, key: &SockKey, value: &SockKey) -> InsertOutcome;
}

/// Connection table (`SOCKHASH`) mapping a flow to the socket `S` it was
/// observed on.
pub trait ConnectionTable<S: SockOps + ?Sized> {
    fn insert_if_absent(&self, sock: &S, key: &SockKey) -> InsertOutcome;
}
