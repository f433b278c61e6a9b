use anyhow::{Context as _, anyhow};
use aya_build::Toolchain;

const EBPF_PACKAGE: &str = "sockmesh-ebpf";
const COMMON_PACKAGE: &str = "sockmesh-common";

fn main() -> anyhow::Result<()> {
    // 1. Workspace packages, without resolving registry dependencies.
    let cargo_metadata::Metadata { packages, .. } = cargo_metadata::MetadataCommand::new()
        .no_deps()
        .exec()
        .context("MetadataCommand::exec")?;

    let root_of = |wanted: &str| -> anyhow::Result<String> {
        let package = packages
            .iter()
            .find(|cargo_metadata::Package { name, .. }| name.as_str() == wanted)
            .ok_or_else(|| anyhow!("{wanted} package not found"))?;
        let dir = package
            .manifest_path
            .parent()
            .ok_or_else(|| anyhow!("no parent for {}", package.manifest_path))?;
        Ok(dir.to_string())
    };

    // 2. The program crate, and the crate holding the hook it runs.
    let ebpf_root = root_of(EBPF_PACKAGE)?;
    let common_root = root_of(COMMON_PACKAGE)?;

    // 3. aya-build only watches the program crate. The classification core
    // is compiled into the same object, so edits there must rebuild it too.
    println!("cargo:rerun-if-changed={common_root}/src");
    println!("cargo:rerun-if-changed={common_root}/Cargo.toml");

    // 4. Build for bpfel and leave the object in OUT_DIR as `sockmesh`,
    // where main.rs embeds it.
    let ebpf_package = aya_build::Package {
        name: EBPF_PACKAGE,
        root_dir: &ebpf_root,
        ..Default::default()
    };
    aya_build::build_ebpf([ebpf_package], Toolchain::default())
}
