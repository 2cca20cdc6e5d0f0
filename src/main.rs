//! Depyler CLI - Python to Rust Transpiler

use anyhow::{bail, Context, Result};
use clap::Parser;
use depyler::{
    analyze_with_diagnostics, diagnostics::Diagnostics, manifest::sanitize_package_name,
    transpile_with_diagnostics, CrateRole, TranspileOptions,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Depyler - Python to Rust Transpiler
#[derive(Parser, Debug)]
#[command(name = "depyler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Transpile type-annotated Python code to Rust", long_about = None)]
struct Cli {
    /// Input Python file
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output Rust file (default: <INPUT>.rs)
    #[arg(short, long, value_name = "OUTPUT")]
    output: Option<PathBuf>,

    /// Generate a complete Cargo project in DIR
    #[arg(short, long, value_name = "DIR")]
    project: Option<PathBuf>,

    /// Emit a library crate (no main)
    #[arg(long)]
    lib: bool,

    /// Print the generated Cargo.toml
    #[arg(long)]
    manifest: bool,

    /// Check only (don't generate output)
    #[arg(long)]
    check: bool,

    /// Dump the analyzed HIR as JSON and exit
    #[arg(long)]
    dump_hir: bool,

    /// Emit JSON diagnostics to stderr (on failure only)
    #[arg(long)]
    diag_json: bool,

    /// Show debug logs
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    debug!(input = %cli.input.display(), output = ?cli.output, project = ?cli.project, "cli");

    let source = fs::read_to_string(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    debug!(bytes = source.len(), "source loaded");

    if cli.dump_hir {
        let module = analyze_with_diagnostics(&source, Some(&cli.input))
            .unwrap_or_else(|diags| fail(&diags, cli.diag_json));
        println!("{}", serde_json::to_string_pretty(&module)?);
        return Ok(());
    }

    let role = if cli.lib {
        CrateRole::Library
    } else {
        CrateRole::Binary
    };
    let package = package_name(&cli.input);
    let role = CrateRole::resolve(&package, role);
    let options = TranspileOptions {
        crate_role: role,
        emit_docs: true,
    };

    let out = transpile_with_diagnostics(&source, Some(&cli.input), &options)
        .unwrap_or_else(|diags| fail(&diags, cli.diag_json));
    let manifest = out.manifest(&package, role);

    if cli.check {
        println!("Transpilation successful");
        return Ok(());
    }

    if cli.manifest {
        print!("{manifest}");
        return Ok(());
    }

    if let Some(dir) = &cli.project {
        write_project(dir, &manifest, role, &out.rust_code)?;
        println!("Generated project: {}", dir.display());
        println!("   Run: cd {} && cargo build --release", dir.display());
        return Ok(());
    }

    let output_path = cli.output.clone().unwrap_or_else(|| default_output(&cli.input));
    fs::write(&output_path, &out.rust_code)
        .with_context(|| format!("failed to write {}", output_path.display()))?;
    info!(output = %output_path.display(), "written");
    println!("Transpiled to: {}", output_path.display());
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// 診断を出して終了する
fn fail(diags: &Diagnostics, json: bool) -> ! {
    eprint!("{}", diags.to_text());
    if json {
        eprintln!("{}", diags.to_json());
    }
    std::process::exit(1);
}

fn package_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_package_name(&stem)
}

/// `dir/app.py` → `./app.rs`
fn default_output(input: &Path) -> PathBuf {
    let mut p = input.to_path_buf();
    p.set_extension("rs");
    match p.file_name() {
        Some(name) => PathBuf::from(name),
        None => p,
    }
}

/// Cargo.toml + src/main.rs (or src/lib.rs)
fn write_project(dir: &Path, manifest: &str, role: CrateRole, code: &str) -> Result<()> {
    if dir.is_file() {
        bail!("{} exists and is not a directory", dir.display());
    }
    let src = dir.join("src");
    fs::create_dir_all(&src).with_context(|| format!("failed to create {}", src.display()))?;
    fs::write(dir.join("Cargo.toml"), manifest).context("failed to write Cargo.toml")?;
    fs::write(dir.join(".gitignore"), "/target\n").context("failed to write .gitignore")?;
    let source_path = dir.join(role.default_source_path());
    fs::write(&source_path, code)
        .with_context(|| format!("failed to write {}", source_path.display()))?;
    debug!(dir = %dir.display(), ?role, "project written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_drops_directory() {
        assert_eq!(default_output(Path::new("scripts/app.py")), PathBuf::from("app.rs"));
    }

    #[test]
    fn test_package_name_from_stem() {
        assert_eq!(package_name(Path::new("dir/My-Tool.py")), "my_tool");
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from(["depyler", "a.py", "--lib", "-p", "out", "--diag-json"]);
        assert!(cli.lib);
        assert!(cli.diag_json);
        assert_eq!(cli.project, Some(PathBuf::from("out")));
    }
}
