//! sdmirror - incremental live backup of a running SD card.
//!
//! Backs up the running system into a sparse loopback disk image and
//! manages that image's whole lifecycle:
//!
//! ```bash
//! # First run: create, partition, seed the bootloader, then back up
//! sdmirror start -c backup.img
//!
//! # Later runs: incremental mount/sync/unmount cycle
//! sdmirror start backup.img
//!
//! # Backup, then compress and delete the image
//! sdmirror start -z -d backup.img
//!
//! # Inspect the image
//! sdmirror mount backup.img /mnt/inspect
//! sdmirror umount backup.img /mnt/inspect
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use sdmirror::commands;
use sdmirror::config::{BackupConfig, Options};
use sdmirror::interrupt::CancelToken;

#[derive(Parser)]
#[command(name = "sdmirror")]
#[command(version, about = "Incremental live backup of a running SD card")]
#[command(
    after_help = "QUICK START:\n  sdmirror preflight        Check all dependencies\n  sdmirror start -c bk.img  Create and run the first backup\n  sdmirror start bk.img     Incremental backup\n  sdmirror gzip bk.img      Compress the image"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backup cycle: mount the image, sync from the source, unmount
    Start {
        /// Create and initialize the image first if it does not exist
        #[arg(short = 'c')]
        create: bool,

        /// Compress the image to <image>.gz after the backup
        #[arg(short = 'z')]
        compress: bool,

        /// Delete the image after successful compression (implies -z)
        #[arg(short = 'd')]
        delete: bool,

        /// Overwrite an existing <image>.gz
        #[arg(short = 'f')]
        force: bool,

        /// Log the transfer to <image>-<timestamp>.log
        #[arg(short = 'l')]
        log: bool,

        /// Log the transfer to an explicit file
        #[arg(short = 'L', value_name = "FILE")]
        logfile: Option<PathBuf>,

        /// Source block device to back up (default: /dev/mmcblk0)
        #[arg(short = 'i', value_name = "DEVICE")]
        source: Option<PathBuf>,

        /// Image size in MiB when creating (default: size of the source device)
        #[arg(short = 's', value_name = "MB")]
        size: Option<u64>,

        image: PathBuf,
    },

    /// Attach an image and leave it mounted for inspection
    Mount {
        /// Create and initialize the image first if it does not exist
        #[arg(short = 'c')]
        create: bool,

        image: PathBuf,

        /// Mount directory (default: <image>.mnt, created and removed)
        mountdir: Option<PathBuf>,
    },

    /// Unmount and detach a mounted image
    Umount {
        image: PathBuf,

        /// Mount directory used when mounting (default: <image>.mnt)
        mountdir: Option<PathBuf>,
    },

    /// Run a filesystem consistency check on an attached image
    Check { image: PathBuf },

    /// Grow an image (and its filesystem) by 1 GiB
    Resize { image: PathBuf },

    /// Compress an image to <image>.gz
    Gzip {
        /// Delete the image after successful compression
        #[arg(short = 'd')]
        delete: bool,

        /// Overwrite an existing <image>.gz
        #[arg(short = 'f')]
        force: bool,

        image: PathBuf,
    },

    /// Copy the source device's UUID and partition-table ID onto an image
    Cloneid { image: PathBuf },

    /// Show filesystem usage inside an image
    Showdf { image: PathBuf },

    /// Run preflight checks (privilege and host tools)
    Preflight {
        /// Fail with exit code 1 if any check fails
        #[arg(long)]
        strict: bool,
    },

    /// Print the version
    Version,
}

fn main() {
    let cli = Cli::parse();

    // Load .env if present; environment overrides built-in defaults.
    dotenvy::dotenv().ok();

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start {
            create,
            compress,
            delete,
            force,
            log,
            logfile,
            source,
            size,
            image,
        } => {
            let cfg = BackupConfig::build(
                image,
                Options {
                    create,
                    compress,
                    delete_after: delete,
                    force,
                    log,
                    log_file: logfile,
                    source,
                    size_mb: size,
                    mount_dir: None,
                },
            );
            let token = CancelToken::install()?;
            commands::cmd_start(&cfg, &token)
        }

        Commands::Mount {
            create,
            image,
            mountdir,
        } => {
            let cfg = BackupConfig::build(
                image,
                Options {
                    create,
                    mount_dir: mountdir,
                    ..Default::default()
                },
            );
            let token = CancelToken::install()?;
            commands::cmd_mount(&cfg, &token)
        }

        Commands::Umount { image, mountdir } => {
            let cfg = BackupConfig::build(
                image,
                Options {
                    mount_dir: mountdir,
                    ..Default::default()
                },
            );
            commands::cmd_umount(&cfg)
        }

        Commands::Check { image } => {
            let cfg = BackupConfig::build(image, Options::default());
            commands::cmd_check(&cfg)
        }

        Commands::Resize { image } => {
            let cfg = BackupConfig::build(image, Options::default());
            let token = CancelToken::install()?;
            commands::cmd_resize(&cfg, &token)
        }

        Commands::Gzip {
            delete,
            force,
            image,
        } => {
            let cfg = BackupConfig::build(
                image,
                Options {
                    delete_after: delete,
                    force,
                    ..Default::default()
                },
            );
            let token = CancelToken::install()?;
            commands::cmd_gzip(&cfg, &token)
        }

        Commands::Cloneid { image } => {
            let cfg = BackupConfig::build(image, Options::default());
            commands::cmd_cloneid(&cfg)
        }

        Commands::Showdf { image } => {
            let cfg = BackupConfig::build(image, Options::default());
            let token = CancelToken::install()?;
            commands::cmd_showdf(&cfg, &token)
        }

        Commands::Preflight { strict } => commands::cmd_preflight(strict),

        Commands::Version => {
            println!("sdmirror {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
