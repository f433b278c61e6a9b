//! Registers the observed socket in the connection table so the mover can
//! redirect into it.

use crate::flow::{SockKey, SockOps};
use crate::hook::{Diagnostic, Trace};
use crate::table::{ConnectionTable, InsertOutcome};

/// `BPF_SOCK_OPS_STATE_CB_FLAG`
pub const BPF_SOCK_OPS_STATE_CB_FLAG: i32 = 1 << 2;

/// Inserts `key -> sock` if absent. A socket that made it into the table also
/// gets state-change callbacks enabled, so its teardown reaches the hook.
///
/// Failures are traced and leave the connection on the regular stack path.
#[inline(always)]
pub fn register<S, C, T>(table: &C, trace: &T, sock: &S, key: &SockKey) -> InsertOutcome
where
    S: SockOps + ?Sized,
    C: ConnectionTable<S> + ?Sized,
    T: Trace + ?Sized,
{
    let outcome = table.insert_if_absent(sock, key);
    if !outcome.won() {
        trace.emit(Diagnostic::ConnectionInsertFailed {
            key: *key,
            err: outcome.errno(),
        });
        return outcome;
    }

    trace.emit(Diagnostic::Registered {
        key: *key,
        op: sock.op(),
    });
    if let Err(err) = sock.set_cb_flags(BPF_SOCK_OPS_STATE_CB_FLAG) {
        trace.emit(Diagnostic::CbFlagsFailed(err));
    }
    outcome
}
