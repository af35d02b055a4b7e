// src/main.rs
use clap::{ArgAction, Parser, Subcommand};
use env_logger::Builder;
use fuser::MountOption;
use log::{error, info, LevelFilter};
use sealfs::config::REMOTE_PREFIX;
use sealfs::crypto;
use sealfs::{FsConfig, SealFs, Session};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
#[command(name = "sealfs")]
#[command(version)]
#[command(about = "Encrypted multi-volume filesystem", long_about = "SealFS stores every inode and data block sealed with ChaCha20-Poly1305 and guards each volume with a SHA-256 Merkle tree.\n\nVolumes are added automatically when the existing ones fill up.")]
struct Cli {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a fresh session key
    Keygen {
        #[arg(value_name = "KEY_PATH")]
        key_path: PathBuf,
    },
    /// Mount a filesystem, formatting it if the superblock does not exist
    Mount {
        #[arg(value_name = "MOUNT_POINT")]
        mount_point: PathBuf,
        #[arg(value_name = "SUPERBLOCK")]
        superblock: String,
        #[arg(value_name = "KEY_PATH")]
        key_path: PathBuf,
        /// Log Merkle mismatches instead of failing the read
        #[arg(long)]
        lenient_integrity: bool,
    },
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };

    Builder::new()
    .format(|buf, record| {
        let style = buf.default_level_style(record.level());
        writeln!(buf, "[{} {} {}] {}",
                 buf.timestamp_seconds(),
                 style.value(record.level()),
                 record.target(),
                 record.args()
        )
    })
    .filter(None, level)
    .init();
}

fn keygen(key_path: &Path) -> anyhow::Result<()> {
    if key_path.exists() {
        anyhow::bail!("Refusing to overwrite existing key {:?}", key_path);
    }
    let key = crypto::generate_key();
    crypto::write_key_file(key_path, &key)?;
    println!("Key written to {}", key_path.display());
    Ok(())
}

/// Remote superblocks would be fetched from object storage before mounting.
fn bootstrap_remote(location: &str) -> anyhow::Result<PathBuf> {
    error!("Remote superblock {} requested", location);
    anyhow::bail!("Remote volumes are not supported by this build: {}", location)
}

fn mount(mount_point: PathBuf, superblock: &str, key_path: &Path, lenient: bool) -> anyhow::Result<()> {
    let superblock_path = if superblock.starts_with(REMOTE_PREFIX) {
        bootstrap_remote(superblock)?
    } else {
        PathBuf::from(superblock)
    };

    if !mount_point.exists() {
        info!("Creating mount point at {:?}", mount_point);
        fs::create_dir_all(&mount_point)?;
    }

    let key = match crypto::read_key_file(key_path) {
        Ok(key) => key,
        Err(e) => {
            error!("Key load error: {}", e);
            anyhow::bail!("Failed to load key from {:?}", key_path);
        }
    };

    let config = FsConfig::default().with_strict_integrity(!lenient);
    let session = match Session::open(&superblock_path, &key, config) {
        Ok(session) => session,
        Err(e) => {
            error!("Superblock load error: {}", e);
            anyhow::bail!("Failed to open filesystem at {:?}", superblock_path);
        }
    };
    drop(key);

    let options = vec![
        MountOption::RW,
        MountOption::FSName("sealfs".to_string()),
        MountOption::AutoUnmount,
        MountOption::DefaultPermissions,
    ];

    info!("Mounting at {:?}", mount_point);
    info!("Press Ctrl+C to unmount.");

    let mount_path = mount_point.clone();

    ctrlc::set_handler(move || {
        info!("Received Ctrl+C. Unmounting...");

        let status = Command::new("fusermount")
        .arg("-u")
        .arg("-z")
        .arg(&mount_path)
        .status();

        if !status.map(|s| s.success()).unwrap_or(false) {
            let _ = Command::new("umount")
            .arg(&mount_path)
            .status();
        }
    }).ok();

    if let Err(e) = fuser::mount2(SealFs::new(session), &mount_point, &options) {
        error!("Mount failed: {}", e);
        anyhow::bail!("Mount failed: {}", e);
    }

    info!("Unmounted successfully.");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG").is_err() {
        init_logger(cli.verbose);
    } else {
        env_logger::init();
    }

    match cli.command {
        Commands::Keygen { key_path } => keygen(&key_path),
        Commands::Mount { mount_point, superblock, key_path, lenient_integrity } => {
            mount(mount_point, &superblock, &key_path, lenient_integrity)
        }
    }
}
