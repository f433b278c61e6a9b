use std::{fs::File, path::PathBuf};

use anyhow::Context as _;
use aya::{
    Ebpf, EbpfLoader, include_bytes_aligned,
    programs::{CgroupAttachMode, SockOps},
};
use aya_log::EbpfLogger;
use clap::Parser;
use log::{debug, info, warn};
use sockmesh_common::{CONNECTION_TABLE, ENDPOINT_TABLE, REDIRECT_TABLE};
use tokio::signal;

const PROGRAM: &str = "sockmesh";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// cgroup v2 directory the sock_ops program attaches to
    #[clap(long, default_value = "/sys/fs/cgroup")]
    cgroup: PathBuf,
    /// bpffs directory the tables are pinned in (or reused from)
    #[clap(long, default_value = "/sys/fs/bpf")]
    pin_path: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        unsafe { std::env::set_var("RUST_LOG", "info") };
    }
    env_logger::init();
    let opt = Args::parse();

    // 1. Lift the locked memory limit (RLIMIT_MEMLOCK)
    // Older kernels account map memory against it.
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {ret}");
    }

    // 2. Load the object, creating or reusing the pinned tables
    let mut bpf = load(&opt)?;

    // Forward aya-log records from the hook to env_logger
    if let Err(e) = EbpfLogger::init(&mut bpf) {
        warn!("failed to initialize eBPF logger: {}", e);
    }

    // The control plane fills endpoints_to_service_map through its pin;
    // the other two are written by the hook and read by the mover.
    for table in [CONNECTION_TABLE, REDIRECT_TABLE, ENDPOINT_TABLE] {
        info!("table {table} pinned at {}", opt.pin_path.join(table).display());
    }

    // 3. Attach sock_ops to the cgroup
    // Every TCP socket created below this cgroup reaches the hook.
    let cgroup = File::open(&opt.cgroup)
        .with_context(|| format!("failed to open cgroup {}", opt.cgroup.display()))?;
    let program: &mut SockOps = bpf
        .program_mut(PROGRAM)
        .with_context(|| format!("program {PROGRAM} not found"))?
        .try_into()
        .context("sock_ops program has wrong type")?;
    program.load().context("failed to load sock_ops program")?;
    let link = program
        .attach(cgroup, CgroupAttachMode::Single)
        .with_context(|| format!("failed to attach sock_ops to {}", opt.cgroup.display()))?;

    // 4. Wait for shutdown
    info!("sock_ops attached to {}. Ctrl-C to detach.", opt.cgroup.display());
    signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;

    // 5. Detach. Pinned tables stay in bpffs for the next run.
    info!("Detaching...");
    program.detach(link).context("failed to detach sock_ops program")?;
    Ok(())
}

/// Loads the embedded object. Tables declared as pinned are created under
/// `pin_path`, or reused when a previous run (or the control plane) already
/// pinned them there.
fn load(opt: &Args) -> anyhow::Result<Ebpf> {
    std::fs::create_dir_all(&opt.pin_path)
        .with_context(|| format!("failed to create {}", opt.pin_path.display()))?;

    #[allow(deprecated)]
    let bpf = EbpfLoader::new()
        .map_pin_path(&opt.pin_path)
        .load(include_bytes_aligned!(concat!(env!("OUT_DIR"), "/sockmesh")))
        .context("failed to load eBPF object")?;
    Ok(bpf)
}
