#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{map, sock_ops},
    maps::{HashMap, SockHash},
    programs::SockOpsContext,
};
use aya_log_ebpf::{debug, info, warn};
use sockmesh_common::table::BPF_NOEXIST;
use sockmesh_common::{
    AF_INET, CONNECTION_TABLE_ENTRIES, ConnectionTable, Diagnostic, ENDPOINT_TABLE_ENTRIES,
    EndpointIndex, EndpointKey, InsertOutcome, REDIRECT_TABLE_ENTRIES, RedirectTable,
    ServiceAddr, SockKey, SockOps, SockOpsHook, Trace,
};

// Tables are pinned by name under the loader's pin directory, so the control
// plane and the sk_msg mover attach to them independently of this program.

/// Connection table: flow -> socket, read by the mover to redirect into.
#[map(name = "sock_ops_map")]
static SOCK_OPS_MAP: SockHash<SockKey> = SockHash::pinned(CONNECTION_TABLE_ENTRIES, 0);

/// Translation table: flow -> flow it should be rewritten to.
#[map(name = "sock_ops_aux_map")]
static SOCK_OPS_AUX_MAP: HashMap<SockKey, SockKey> = HashMap::pinned(REDIRECT_TABLE_ENTRIES, 0);

/// Written by the control plane only.
#[map(name = "endpoints_to_service_map")]
static ENDPOINTS_TO_SERVICE_MAP: HashMap<EndpointKey, ServiceAddr> =
    HashMap::pinned(ENDPOINT_TABLE_ENTRIES, 0);

struct Sock<'a>(&'a SockOpsContext);

impl SockOps for Sock<'_> {
    #[inline(always)]
    fn op(&self) -> u32 {
        self.0.op()
    }

    #[inline(always)]
    fn family(&self) -> u32 {
        self.0.family()
    }

    #[inline(always)]
    fn local_ip4(&self) -> u32 {
        self.0.local_ip4()
    }

    #[inline(always)]
    fn remote_ip4(&self) -> u32 {
        self.0.remote_ip4()
    }

    #[inline(always)]
    fn local_ip6(&self) -> [u32; 4] {
        self.0.local_ip6()
    }

    #[inline(always)]
    fn remote_ip6(&self) -> [u32; 4] {
        self.0.remote_ip6()
    }

    #[inline(always)]
    fn local_port(&self) -> u32 {
        self.0.local_port()
    }

    #[inline(always)]
    fn remote_port(&self) -> u32 {
        // Full 32-bit load; older kernels reject narrower ctx reads here.
        unsafe { core::ptr::read_volatile(&(*self.0.ops).remote_port) }
    }

    #[inline(always)]
    fn arg(&self, n: usize) -> u32 {
        self.0.arg(n)
    }

    #[inline(always)]
    fn set_cb_flags(&self, flags: i32) -> Result<(), i64> {
        self.0.set_cb_flags(flags)
    }
}

struct EndpointsToService;

impl EndpointIndex for EndpointsToService {
    #[inline(always)]
    fn lookup(&self, key: &EndpointKey) -> Option<ServiceAddr> {
        unsafe { ENDPOINTS_TO_SERVICE_MAP.get(key).copied() }
    }
}

struct Redirects;

impl RedirectTable for Redirects {
    #[inline(always)]
    fn insert_if_absent(&self, key: &SockKey, value: &SockKey) -> InsertOutcome {
        InsertOutcome::from_ret(SOCK_OPS_AUX_MAP.insert(key, value, BPF_NOEXIST))
    }
}

struct Connections;

impl ConnectionTable<Sock<'_>> for Connections {
    #[inline(always)]
    fn insert_if_absent(&self, sock: &Sock<'_>, key: &SockKey) -> InsertOutcome {
        let mut key = *key;
        // SAFETY: `ops` comes from the live SockOpsContext of this invocation.
        let ops = unsafe { &mut *sock.0.ops };
        InsertOutcome::from_ret(SOCK_OPS_MAP.update(&mut key, ops, BPF_NOEXIST))
    }
}

struct Log<'a>(&'a SockOpsContext);

#[inline(always)]
fn port(key_port: u32) -> u16 {
    u16::from_be(key_port as u16)
}

#[inline(always)]
fn ip6(words: [u32; 4]) -> [u8; 16] {
    unsafe { core::mem::transmute::<[u32; 4], [u8; 16]>(words) }
}

impl Trace for Log<'_> {
    #[inline(always)]
    fn emit(&self, diagnostic: Diagnostic) {
        let ctx = self.0;
        match diagnostic {
            Diagnostic::EndpointResolved { key, service } => debug!(
                ctx,
                "endpoint {:i}:{} fronts service {:i}:{}",
                u32::from_be(key.src[0]),
                port(key.sport),
                u32::from_be(service.ip[0]),
                port(service.port)
            ),
            Diagnostic::EndpointMissing { key } => debug!(
                ctx,
                "{:i}:{} is not an endpoint",
                u32::from_be(key.src[0]),
                port(key.sport)
            ),
            Diagnostic::RedirectInsertFailed { key, err } => warn!(
                ctx,
                "sock_ops_aux_map insert {}->{} failed: {}",
                port(key.sport),
                port(key.dport),
                err
            ),
            Diagnostic::Registered { key, op } if key.family == AF_INET => info!(
                ctx,
                "op {} registered {:i}:{} -> {:i}:{}",
                op,
                u32::from_be(key.src[0]),
                port(key.sport),
                u32::from_be(key.dst[0]),
                port(key.dport)
            ),
            Diagnostic::Registered { key, op } => info!(
                ctx,
                "op {} registered [{:i}]:{} -> [{:i}]:{}",
                op,
                ip6(key.src),
                port(key.sport),
                ip6(key.dst),
                port(key.dport)
            ),
            Diagnostic::ConnectionInsertFailed { key, err } => warn!(
                ctx,
                "sock_ops_map insert {}->{} failed: {}",
                port(key.sport),
                port(key.dport),
                err
            ),
            Diagnostic::CbFlagsFailed(err) => {
                warn!(ctx, "bpf_sock_ops_cb_flags_set failed: {}", err)
            }
            Diagnostic::Teardown {
                old_state,
                new_state,
            } => info!(ctx, "tcp state {} -> {}", old_state, new_state),
            Diagnostic::UnsupportedFamily(family) => debug!(ctx, "unsupported family {}", family),
            Diagnostic::UnsupportedOp(op) => debug!(ctx, "unsupported op {}", op),
        }
    }
}

#[sock_ops]
pub fn sockmesh(ctx: SockOpsContext) -> u32 {
    let hook = SockOpsHook::new(&EndpointsToService, &Redirects, &Connections);
    hook.handle(&Sock(&ctx), &Log(&ctx))
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
