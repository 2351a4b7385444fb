use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use qdl_core::session::{QdlSession, SessionConfig};
use qdl_core::{QdlError, StorageKind, classify};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "Qualcomm EDL Flashing Tool (Pure Rust)", long_about = None)]
struct Args {
    /// Programmer uploaded over Sahara (prog_firehose_*.elf)
    loader: Option<PathBuf>,

    /// Program, patch and provisioning scripts, in execution order
    scripts: Vec<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Target storage: emmc, ufs, nvme, nand or spinor
    #[arg(long)]
    storage: Option<StorageKind>,

    /// Send the UFS provisioning commit element
    #[arg(long)]
    finalize_provisioning: bool,

    /// Directory searched first for program source files
    #[arg(short, long, value_name = "DIR")]
    include: Option<PathBuf>,

    /// Leave the device in EDL after flashing
    #[arg(long)]
    no_reset: bool,

    /// Session configuration (TOML); flags override it
    #[arg(short, long, value_name = "TOML")]
    config: Option<PathBuf>,

    /// Print the type of each given file and exit
    #[arg(long)]
    classify_only: bool,
}

impl Args {
    fn session_config(&self) -> anyhow::Result<SessionConfig> {
        let mut config = match &self.config {
            Some(path) => SessionConfig::load_from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => SessionConfig::default(),
        };
        if let Some(loader) = &self.loader {
            config.loader = loader.clone();
        }
        if !self.scripts.is_empty() {
            config.scripts = self.scripts.clone();
        }
        if let Some(storage) = self.storage {
            config.storage = storage;
        }
        if self.include.is_some() {
            config.include_dir = self.include.clone();
        }
        config.finalize_provisioning |= self.finalize_provisioning;
        if self.no_reset {
            config.reset = false;
        }
        if config.loader.as_os_str().is_empty() {
            anyhow::bail!("No loader given");
        }
        Ok(config)
    }
}

fn classify_files(args: &Args) -> Result<(), QdlError> {
    for path in args.loader.iter().chain(&args.scripts) {
        println!("{}: {}", path.display(), classify(path)?);
    }
    Ok(())
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.debug {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if args.classify_only {
        if let Err(e) = classify_files(&args) {
            error!(kind = %e.kind(), "Error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    let config = match args.session_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("Starting qdl (nusb backend)...");

    let mut session = QdlSession::new(config);
    match session.run() {
        Ok(report) => info!(
            programs = report.programs,
            patches = report.patches,
            "Flashing finished"
        ),
        Err(e) => {
            error!(kind = %e.kind(), "Error: {}", e);
            std::process::exit(1);
        }
    }
}
