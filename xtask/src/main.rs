//! Development tasks for voxcrypt
//!
//! Usage:
//!   cargo xtask install     Install release binary to /usr/local/bin (requires sudo)
//!   cargo xtask uninstall   Remove binary from /usr/local/bin (requires sudo)
//!   cargo xtask dist        Build release binary and man pages for distribution

use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

const INSTALL_PATH: &str = "/usr/local/bin/voxcrypt";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();

    if args.is_empty() {
        print_help();
        return ExitCode::SUCCESS;
    }

    let result = match args[0].as_str() {
        "install" => install(),
        "uninstall" => uninstall(),
        "dist" => dist(),
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            print_help();
            Err(anyhow::anyhow!("Unknown command"))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    eprintln!(
        r#"
voxcrypt development tasks

Usage: cargo xtask <COMMAND>

Commands:
  install    Build release binary and install to /usr/local/bin (requires sudo)
  uninstall  Remove voxcrypt from /usr/local/bin (requires sudo)
  dist       Build optimized release binary and man pages

Examples:
  cargo xtask install     # Build and install
  cargo xtask dist        # Build binary for packaging
  cargo xtask uninstall   # Remove installed binary
"#
    );
}

/// Get the project root directory
fn project_root() -> PathBuf {
    let dir = env::var("CARGO_MANIFEST_DIR")
        .map(PathBuf::from)
        .or_else(|_| env::current_dir())
        .unwrap_or_else(|_| PathBuf::from("."));

    // xtask is in a subdirectory, go up one level
    dir.parent().unwrap_or(&dir).to_path_buf()
}

/// `cargo build --release`, optionally rendering man pages
fn build_release(root: &Path, man_pages: bool) -> anyhow::Result<PathBuf> {
    let mut cmd = Command::new("cargo");
    cmd.args(["build", "--release", "--bin", "voxcrypt"])
        .current_dir(root);
    if man_pages {
        cmd.env("VOXCRYPT_GEN_MANPAGES", "1");
    }

    if !cmd.status()?.success() {
        anyhow::bail!("Build failed");
    }

    let binary = root.join("target/release/voxcrypt");
    if !binary.exists() {
        anyhow::bail!("Binary not found at {:?}", binary);
    }
    Ok(binary)
}

/// Build release binary and install to /usr/local/bin
fn install() -> anyhow::Result<()> {
    let root = project_root();

    println!("==> Building release binary...");
    let binary = build_release(&root, false)?;

    println!("==> Installing to {}...", INSTALL_PATH);

    let status = Command::new("sudo")
        .arg("install")
        .arg("-Dm755")
        .arg(&binary)
        .arg(INSTALL_PATH)
        .status()?;

    if !status.success() {
        anyhow::bail!("Install failed (sudo required)");
    }

    println!("==> Installed successfully!");
    println!();
    println!("Installed: {}", INSTALL_PATH);
    println!("The daemons need access to the audio and gpio groups.");

    // Show version
    let _ = Command::new(INSTALL_PATH).arg("--version").status();

    Ok(())
}

/// Remove voxcrypt from /usr/local/bin
fn uninstall() -> anyhow::Result<()> {
    println!("==> Removing {}...", INSTALL_PATH);

    let status = Command::new("sudo")
        .args(["rm", "-f", INSTALL_PATH])
        .status()?;

    if !status.success() {
        anyhow::bail!("Uninstall failed (sudo required)");
    }

    println!("==> Uninstalled successfully!");
    Ok(())
}

/// Build optimized release binary and man pages for distribution
fn dist() -> anyhow::Result<()> {
    let root = project_root();

    println!("==> Building distribution binary...");
    let binary = build_release(&root, true)?;
    println!("==> Built: {:?}", binary);
    println!("    Man pages: target/release/build/voxcrypt-*/out/man/");

    // Show binary info
    let _ = Command::new("ls").arg("-lh").arg(&binary).status();
    let _ = Command::new(&binary).arg("--version").status();

    Ok(())
}
