use anyhow::{
    Context,
    Result,
    ensure,
};
use clap::{
    Parser,
    Subcommand,
};
use std::{
    path::Path,
    process::Command,
};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "CoinFlip helper tasks (regen bindings, clippy, tests, formatting)",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompile generated_abi after the contract interface changed
    Abi,
    /// Run clippy for the entire workspace with warnings-as-errors
    Clippy,
    /// Run every workspace test, including the test-helpers builds
    Test {
        /// Only test the client crate
        #[arg(long)]
        client_only: bool,
    },
    /// Check formatting without rewriting files
    FmtCheck,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root();

    match cli.command {
        Commands::Abi => build_generated_abi(&root)?,
        Commands::Clippy => run_clippy(&root)?,
        Commands::Test { client_only } => run_tests(&root, client_only)?,
        Commands::FmtCheck => run_fmt_check(&root)?,
    }

    Ok(())
}

fn repo_root() -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .expect("xtask has no parent directory")
        .to_path_buf()
}

fn build_generated_abi(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.args(["check", "-p", "generated_abi", "--all-features", "--quiet"])
        .current_dir(root);
    run_command(cmd, "cargo check -p generated_abi")
}

fn run_clippy(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.args([
        "clippy",
        "--workspace",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ])
    .current_dir(root);
    run_command(cmd, "cargo clippy")
}

fn run_tests(root: &Path, client_only: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test");
    if client_only {
        cmd.args(["-p", "coinflip-tui"]);
    } else {
        cmd.arg("--workspace");
    }
    cmd.arg("--all-features").current_dir(root);
    run_command(cmd, "cargo test")
}

fn run_fmt_check(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.args(["fmt", "--all", "--", "--check"]).current_dir(root);
    run_command(cmd, "cargo fmt --check")
}

fn run_command(mut cmd: Command, label: &str) -> Result<()> {
    println!("Running: {}", label);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {label}"))?;
    ensure!(status.success(), "{label} failed with status {status}");
    Ok(())
}
