//! Translation entries that let the mover splice a backend connection with
//! the service identity its client dialed.
//!
//! For a flow `S -> D` observed on a backend socket `S` that fronts service
//! `V`, two entries are written:
//!
//! ```text
//! reverse:  (D -> S)  =>  (D -> V)   return traffic is made to look like V
//! service:  (V -> D)  =>  (S -> D)   traffic addressed to V reaches S
//! ```

use crate::endpoint::ServiceAddr;
use crate::flow::SockKey;
use crate::hook::{Diagnostic, Trace};
use crate::table::{InsertOutcome, RedirectTable};

/// One translation entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Entry {
    pub key: SockKey,
    pub value: SockKey,
}

/// The pair of entries published for one classified connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Entries {
    pub reverse: Entry,
    pub service: Entry,
}

impl Entries {
    /// `None` when `flow` carries an unsupported family tag.
    #[inline(always)]
    pub fn build(flow: &SockKey, service: &ServiceAddr) -> Option<Self> {
        let src = flow.src_addr()?;
        let dst = flow.dst_addr()?;
        let svc = service.addr(flow.family)?;

        let reverse = Entry {
            key: flow.reversed(),
            value: SockKey::new(dst, flow.dport, svc, service.port),
        };
        let towards_service = Entry {
            key: SockKey::new(svc, service.port, dst, flow.dport),
            value: SockKey::new(src, flow.sport, dst, flow.dport),
        };

        Some(Entries {
            reverse,
            service: towards_service,
        })
    }
}

/// Writes both entries for `flow` with insert-if-absent semantics.
///
/// A key that is already present means the peer socket classified the same
/// connection first; that is dropped without a trace. Any other failure is
/// traced. Nothing is retried.
#[inline(always)]
pub fn publish<R, T>(
    table: &R,
    trace: &T,
    flow: &SockKey,
    service: &ServiceAddr,
) -> [InsertOutcome; 2]
where
    R: RedirectTable + ?Sized,
    T: Trace + ?Sized,
{
    let Some(entries) = Entries::build(flow, service) else {
        trace.emit(Diagnostic::UnsupportedFamily(flow.family as u32));
        return [InsertOutcome::Failed(0); 2];
    };

    [
        insert(table, trace, &entries.reverse),
        insert(table, trace, &entries.service),
    ]
}

#[inline(always)]
fn insert<R, T>(table: &R, trace: &T, entry: &Entry) -> InsertOutcome
where
    R: RedirectTable + ?Sized,
    T: Trace + ?Sized,
{
    let outcome = table.insert_if_absent(&entry.key, &entry.value);
    if let InsertOutcome::Failed(err) = outcome {
        trace.emit(Diagnostic::RedirectInsertFailed { key: entry.key, err });
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::FlowAddr;
    use crate::port_key;

    fn ip4(a: u8, b: u8, c: u8, d: u8) -> FlowAddr {
        FlowAddr::V4(u32::from_ne_bytes([a, b, c, d]))
    }

    fn key(src: (FlowAddr, u16), dst: (FlowAddr, u16)) -> SockKey {
        SockKey::new(src.0, port_key(src.1 as u32), dst.0, port_key(dst.1 as u32))
    }

    #[test]
    fn entries_follow_the_translation_rule() {
        let s = (ip4(10, 0, 0, 9), 8080);
        let d = (ip4(10, 0, 0, 5), 41000);
        let v = (ip4(10, 0, 0, 1), 80);
        let service = ServiceAddr {
            ip: v.0.words(),
            pad: 0,
            port: port_key(80),
        };

        let entries = Entries::build(&key(s, d), &service).unwrap();

        assert_eq!(entries.reverse.key, key(d, s));
        assert_eq!(entries.reverse.value, key(d, v));
        assert_eq!(entries.service.key, key(v, d));
        assert_eq!(entries.service.value, key(s, d));
    }

    #[test]
    fn service_value_is_the_original_flow() {
        let flow = key((ip4(192, 168, 1, 10), 5432), (ip4(192, 168, 1, 20), 60000));
        let service = ServiceAddr {
            ip: ip4(10, 96, 0, 12).words(),
            pad: 0,
            port: port_key(5432),
        };

        let entries = Entries::build(&flow, &service).unwrap();
        assert_eq!(entries.service.value, flow);
    }

    #[test]
    fn only_the_ipv4_word_of_the_service_is_used() {
        let flow = key((ip4(10, 0, 0, 9), 8080), (ip4(10, 0, 0, 5), 41000));
        let service = ServiceAddr {
            ip: [u32::from_ne_bytes([10, 0, 0, 1]), 0xdead, 0xbeef, 0xf00d],
            pad: 0,
            port: port_key(80),
        };

        let entries = Entries::build(&flow, &service).unwrap();
        assert_eq!(entries.service.key.src, ip4(10, 0, 0, 1).words());
        assert_eq!(entries.reverse.value.dst, ip4(10, 0, 0, 1).words());
    }

    #[test]
    fn unknown_family_builds_nothing() {
        let flow = SockKey {
            family: 0,
            ..SockKey::default()
        };
        assert_eq!(Entries::build(&flow, &ServiceAddr::default()), None);
    }
}
