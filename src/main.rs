//! PKI Bootstrap - first-start provisioning for a multi-service deployment
//!
//! Creates a private root CA, one TLS certificate per configured service and a
//! `.env` document holding freshly generated credentials.
//!
//! ```bash
//! pki-bootstrap                          # stock layout in the current directory
//! pki-bootstrap --config bootstrap.toml  # custom services, subject, policy
//! pki-bootstrap --reuse-valid            # keep artifacts that are still valid
//! RUST_LOG=debug pki-bootstrap
//! ```
//!
//! Status lines go to stdout, diagnostics to stderr. Credential values are never
//! printed; read them from the written `.env` file.

use anyhow::{Context, Result};
use clap::Parser;
use pki_bootstrap::configs::{BootstrapConfig, RegenerationPolicy};
use pki_bootstrap::{BootstrapReport, Bootstrapper};
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "bootstrap.toml";

#[derive(Debug, Parser)]
#[command(
    name = "pki-bootstrap",
    version,
    about = "Bootstrap a private CA, service certificates and secrets"
)]
struct Args {
    /// TOML configuration file; built-in defaults apply when it does not exist
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Output directory for the CA and service certificates
    #[arg(long)]
    certs_dir: Option<PathBuf>,

    /// Path of the generated environment file
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Keep an existing CA, leaf certificates and environment file while they remain valid
    #[arg(long)]
    reuse_valid: bool,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(args: &Args) -> Result<BootstrapConfig> {
    let mut config = BootstrapConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;
    if let Some(certs_dir) = &args.certs_dir {
        config.output.certs_dir = certs_dir.clone();
    }
    if let Some(env_file) = &args.env_file {
        config.output.env_file = env_file.clone();
    }
    if args.reuse_valid {
        config.policy.regeneration = RegenerationPolicy::ReuseValid;
    }
    debug!(
        certs_dir = %config.output.certs_dir.display(),
        env_file = %config.output.env_file.display(),
        policy = ?config.policy.regeneration,
        "configuration resolved"
    );
    Ok(config)
}

fn print_report(report: &BootstrapReport) {
    let verb = |reused: bool| if reused { "kept" } else { "generated" };

    println!(
        "✓ Root CA {} at '{}'",
        verb(report.ca.reused),
        report.ca.cert_path.display()
    );
    for service in &report.services {
        println!(
            "✓ {} certificate {} at '{}'",
            service.name,
            verb(service.reused),
            service.cert_path.display()
        );
        for alias in &service.aliases {
            println!("  ↳ {}", alias.display());
        }
    }
    if report.env.written {
        println!("✓ Credentials written to '{}'", report.env.path.display());
    } else {
        println!("✓ Existing '{}' kept", report.env.path.display());
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    println!("=== PKI Bootstrap ===\n");
    let config = load_config(&args)?;

    let mut bootstrapper =
        Bootstrapper::new(config, Path::new(".")).context("Invalid bootstrap configuration")?;
    let report = bootstrapper.run().context("Bootstrap failed")?;

    print_report(&report);
    println!("\nPKI bootstrap complete.");
    Ok(())
}
