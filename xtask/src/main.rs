//! Build helper for igmp-snoop.
//!
//! The eBPF crate targets `bpfel-unknown-none` and needs a nightly toolchain
//! with `build-std`, so it lives outside the workspace and is built here.
//!
//! Usage:
//!   cargo xtask build-ebpf [--release]
//!   cargo xtask build [--release]
//!   cargo xtask run [--release] [--runner "sudo -E"] -- <daemon args>

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::Parser;

const DAEMON: &str = "igmp-snoop";
const EBPF_CRATE: &str = "igmp-snoop-ebpf";
const EBPF_TARGET: &str = "bpfel-unknown-none";

#[derive(Parser)]
enum Cli {
    /// Build the XDP programs only.
    BuildEbpf {
        #[arg(long)]
        release: bool,
    },
    /// Build the XDP programs and the daemon.
    Build {
        #[arg(long)]
        release: bool,
    },
    /// Build everything and run the daemon.
    Run {
        #[arg(long)]
        release: bool,
        /// Command prefix for the daemon; attaching XDP needs CAP_NET_ADMIN.
        #[arg(long, default_value = "sudo -E")]
        runner: String,
        /// Arguments to pass to igmp-snoop.
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn main() -> Result<()> {
    let root = workspace_root()?;

    match Cli::parse() {
        Cli::BuildEbpf { release } => {
            build_ebpf(&root, release)?;
        }
        Cli::Build { release } => {
            build_ebpf(&root, release)?;
            build_daemon(&root, release)?;
        }
        Cli::Run {
            release,
            runner,
            args,
        } => {
            let ebpf = build_ebpf(&root, release)?;
            build_daemon(&root, release)?;
            run_daemon(&root, release, &runner, &ebpf, &args)?;
        }
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask has no parent directory")
}

fn profile(release: bool) -> &'static str {
    if release {
        "release"
    } else {
        "debug"
    }
}

fn status(mut cmd: Command, what: &str) -> Result<()> {
    let status = cmd
        .status()
        .with_context(|| format!("spawning {:?}", cmd))?;
    if !status.success() {
        bail!("{} failed ({})", what, status);
    }
    Ok(())
}

/// Compile the XDP object and copy it to `target/igmp-snoop-ebpf`.
///
/// Requires `bpf-linker` (`cargo install bpf-linker`) and a nightly toolchain
/// with the `rust-src` component.
fn build_ebpf(root: &Path, release: bool) -> Result<PathBuf> {
    let ebpf_dir = root.join(EBPF_CRATE);
    println!("=> Building XDP programs ({})", profile(release));

    let mut cmd = Command::new("cargo");
    cmd.current_dir(&ebpf_dir)
        .args(["+nightly", "build", "-Z", "build-std=core"])
        .arg(format!("--target={}", EBPF_TARGET));
    if release {
        cmd.arg("--release");
    }
    status(cmd, "eBPF build")?;

    let built = ebpf_dir
        .join("target")
        .join(EBPF_TARGET)
        .join(profile(release))
        .join(EBPF_CRATE);
    let dest = root.join("target").join(EBPF_CRATE);

    std::fs::create_dir_all(root.join("target")).context("creating target directory")?;
    std::fs::copy(&built, &dest)
        .with_context(|| format!("copying {} to {}", built.display(), dest.display()))?;

    println!("   XDP object: {}", dest.display());
    Ok(dest)
}

fn build_daemon(root: &Path, release: bool) -> Result<()> {
    println!("=> Building {} ({})", DAEMON, profile(release));

    let mut cmd = Command::new("cargo");
    cmd.current_dir(root).args(["build", "-p", DAEMON]);
    if release {
        cmd.arg("--release");
    }
    status(cmd, "daemon build")
}

fn run_daemon(
    root: &Path,
    release: bool,
    runner: &str,
    ebpf: &Path,
    extra_args: &[String],
) -> Result<()> {
    let binary = root.join("target").join(profile(release)).join(DAEMON);

    let mut words = runner.split_whitespace();
    let mut cmd = match words.next() {
        Some(prog) => {
            let mut c = Command::new(prog);
            c.args(words).arg(&binary);
            c
        }
        None => Command::new(&binary),
    };
    cmd.arg("--ebpf-program").arg(ebpf).args(extra_args);

    println!("=> Running {}", DAEMON);
    status(cmd, DAEMON)
}
