use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use log::{info, LevelFilter};
use phat_core::{BlockDevice, FileDisk, PhatConfig, PhatResult, SECTOR_SIZE};
use phat_filesystems::{
    create_partition, format_volume, initialize_mbr, usable_lba_range, FormatOutcome, Volume,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "phat")]
#[command(about = "FAT12/16/32 disk image tool", long_about = None)]
struct Cli {
    /// Disk image to operate on
    #[arg(short, long, global = true, default_value = "disk.img")]
    image: PathBuf,
    /// MBR partition slot (0 for an unpartitioned image)
    #[arg(short, long, global = true)]
    partition: Option<usize>,
    /// JSON file with mount and format settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Increase log output (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a FAT filesystem, creating the image if it does not exist
    Mkfs {
        /// FAT width (12, 16 or 32); picked by size when omitted
        #[arg(long)]
        fat: Option<u8>,
        #[arg(long)]
        label: Option<String>,
        /// Size of a new image
        #[arg(long, default_value_t = 64)]
        size_mb: u32,
    },
    /// Partition table operations
    Mbr {
        #[command(subcommand)]
        action: MbrAction,
    },
    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Create a directory and any missing parents
    Mkdir { path: String },
    /// Remove an empty directory
    Rmdir { path: String },
    /// Delete a file
    Rm { path: String },
    /// Print a file to stdout
    Cat { path: String },
    /// Copy a host file into the image
    Put { host_file: PathBuf, path: String },
    /// Copy a file out of the image
    Get { path: String, host_file: PathBuf },
    /// Move an entry into another directory
    Mv { src: String, dst_dir: String },
    /// Rename an entry in place
    Rename { path: String, new_name: String },
    /// Show volume information as JSON
    Info,
}

#[derive(Subcommand)]
enum MbrAction {
    /// Write an empty partition table
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Add a primary partition
    Create {
        /// First sector; defaults to the first usable one
        #[arg(long)]
        start: Option<u32>,
        /// Length in sectors; defaults to the rest of the disk
        #[arg(long)]
        size: Option<u32>,
        #[arg(long)]
        bootable: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env().filter_level(level).init();
}

fn load_config(cli: &Cli) -> anyhow::Result<PhatConfig> {
    let mut config = match &cli.config {
        Some(path) => PhatConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PhatConfig::default(),
    };
    if let Some(partition) = cli.partition {
        config.mount.partition_index = partition;
        config.format.partition_index = partition;
    }
    Ok(config)
}

fn open_image(path: &Path) -> anyhow::Result<FileDisk> {
    FileDisk::new(path).with_context(|| format!("Cannot open image {}", path.display()))
}

/// Mount the image, run `f`, and unmount even when `f` fails.
fn with_volume<T>(
    cli: &Cli,
    writable: bool,
    f: impl FnOnce(&mut Volume<FileDisk>) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let mut options = load_config(cli)?.mount;
    options.write_enable &= writable;
    let mut volume = Volume::mount(open_image(&cli.image)?, &options)?;
    volume.use_system_clock();
    let result = f(&mut volume);
    finish(result, volume.unmount())
}

/// Combine a command's result with its unmount. The command's own failure
/// wins over an unmount failure.
fn finish<T, D>(result: anyhow::Result<T>, unmounted: PhatResult<D>) -> anyhow::Result<T> {
    let value = result?;
    unmounted.context("Unmount failed")?;
    Ok(value)
}

fn mkfs(cli: &Cli, fat: Option<u8>, label: Option<String>, size_mb: u32) -> anyhow::Result<()> {
    let mut options = load_config(cli)?.format;
    if let Some(bits) = fat {
        options.fat_bits = bits;
    }
    if label.is_some() {
        options.volume_label = label;
    }

    let disk = if cli.image.exists() {
        open_image(&cli.image)?
    } else {
        let sectors = size_mb as u64 * 1024 * 1024 / SECTOR_SIZE as u64;
        info!("Creating {} MiB image {}", size_mb, cli.image.display());
        FileDisk::create(&cli.image, sectors as u32)?
    };

    let (mut volume, outcome) = format_volume(disk, &options)?;
    volume.use_system_clock();
    println!(
        "Formatted {} as {}: {} clusters of {} bytes",
        cli.image.display(),
        volume.fat_type(),
        volume.total_clusters(),
        volume.cluster_size()
    );
    if outcome == FormatOutcome::Suboptimal {
        println!("Warning: the cluster size is larger than recommended for this volume");
    }
    volume.unmount()?;
    Ok(())
}

fn mbr(cli: &Cli, action: &MbrAction) -> anyhow::Result<()> {
    let mut disk = open_image(&cli.image)?;
    match action {
        MbrAction::Init { force } => {
            initialize_mbr(&mut disk, *force)?;
            println!("Initialized partition table on {}", cli.image.display());
        }
        MbrAction::Create { start, size, bootable } => {
            let (first, last) = usable_lba_range(&mut disk)?;
            let start = start.unwrap_or(first);
            if start > last {
                bail!("start sector {} is past the last usable sector {}", start, last);
            }
            let size = size.unwrap_or(last - start + 1);
            let slot = create_partition(&mut disk, start, size, *bootable)?;
            println!("Created partition {} at sector {} ({} sectors)", slot, start, size);
        }
    }
    disk.close()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Mkfs { fat, label, size_mb } => mkfs(&cli, *fat, label.clone(), *size_mb),
        Commands::Mbr { action } => mbr(&cli, action),
        Commands::Ls { path } => with_volume(&cli, false, |volume| {
            for item in volume.read_dir(path)? {
                let kind = if item.is_directory() { "<DIR>" } else { "" };
                println!("{:>5} {:>10} {} {}", kind, item.size(), item.modified(), item.name);
            }
            Ok(())
        }),
        Commands::Mkdir { path } => with_volume(&cli, true, |volume| Ok(volume.create_directory(path)?)),
        Commands::Rmdir { path } => with_volume(&cli, true, |volume| Ok(volume.remove_directory(path)?)),
        Commands::Rm { path } => with_volume(&cli, true, |volume| Ok(volume.delete_file(path)?)),
        Commands::Cat { path } => with_volume(&cli, false, |volume| {
            use std::io::Write;
            let data = volume.read_file(path)?;
            std::io::stdout().write_all(&data)?;
            Ok(())
        }),
        Commands::Put { host_file, path } => with_volume(&cli, true, |volume| {
            let data = std::fs::read(host_file)
                .with_context(|| format!("Cannot read {}", host_file.display()))?;
            volume.write_file(path, &data)?;
            println!("Copied {} bytes to {}", data.len(), path);
            Ok(())
        }),
        Commands::Get { path, host_file } => with_volume(&cli, false, |volume| {
            let data = volume.read_file(path)?;
            std::fs::write(host_file, &data)
                .with_context(|| format!("Cannot write {}", host_file.display()))?;
            println!("Copied {} bytes to {}", data.len(), host_file.display());
            Ok(())
        }),
        Commands::Mv { src, dst_dir } => with_volume(&cli, true, |volume| Ok(volume.move_entry(src, dst_dir)?)),
        Commands::Rename { path, new_name } => with_volume(&cli, true, |volume| Ok(volume.rename(path, new_name)?)),
        Commands::Info => with_volume(&cli, false, |volume| {
            println!("{}", serde_json::to_string_pretty(&volume.info())?);
            Ok(())
        }),
    }
}
