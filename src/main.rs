//! Main entry point for the alice-assets CLI application.
//!
//! This binary installs games from ZIP files, moves save data in and out of
//! an installed game, and inspects the legacy asset archives the games ship.

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use alice_assets::cli::{ArchiveSelect, Command};
use alice_assets::install::{is_game_ini, parse_game_name};
use alice_assets::{
    Ald, Archive, Cli, Installer, LocalFileReader, PipelineConfig, SharedReader, ZipIndex, saves,
};

/// Application entry point.
///
/// Parses command-line arguments, sets up logging and dispatches to the
/// handler of the chosen subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG, when set, takes precedence over -v/-q
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    let quiet = cli.is_quiet();
    match cli.command {
        Command::List { zip, verbose } => list_zip(&zip, verbose).await,
        Command::Install { zip, dest, pipeline } => install(&zip, &dest, pipeline.config(), quiet).await,
        Command::ExportSaves {
            game_dir,
            output,
            game_name,
        } => export_saves(&game_dir, &output, game_name).await,
        Command::ImportSaves {
            zip,
            game_dir,
            game_name,
            pipeline,
        } => import_saves(&zip, &game_dir, game_name, pipeline.config()).await,
        Command::Archive {
            files,
            ald,
            select,
            output,
        } => archive(&files, ald, &select, output.as_deref()).await,
    }
}

fn open_file(path: &Path) -> Result<SharedReader> {
    let reader = LocalFileReader::new(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(Arc::new(reader))
}

/// List files in a ZIP archive.
///
/// Supports two output formats:
/// - Simple format: Just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio and timestamps
async fn list_zip(path: &Path, verbose: bool) -> Result<()> {
    let index = ZipIndex::load(open_file(path)?)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;

    if !verbose {
        for entry in index.entries() {
            println!("{}", entry.file_name);
        }
        return Ok(());
    }

    println!(
        "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
        "Length", "Size", "Cmpr", "Date", "Time"
    );
    println!("{}", "-".repeat(70));

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;
    for entry in index.entries() {
        let (year, month, day) = entry.last_modified.ymd();
        let (hour, minute, _second) = entry.last_modified.hms();
        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size as u64, entry.uncompressed_size as u64),
            year,
            month,
            day,
            hour,
            minute,
            entry.file_name
        );

        if !entry.is_directory() {
            total_uncompressed += entry.uncompressed_size as u64;
            total_compressed += entry.compressed_size as u64;
            file_count += 1;
        }
    }

    println!("{}", "-".repeat(70));
    println!(
        "{:>10}  {:>10}  {}  {:>21}  {} files",
        total_uncompressed,
        total_compressed,
        ratio(total_compressed, total_uncompressed),
        "",
        file_count
    );
    Ok(())
}

/// Space saved by compression, as shown in listings.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - compressed * 100 / uncompressed)
    } else {
        "  0%".to_string()
    }
}

fn byte_progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {wide_msg}")
    {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Install the game found in `zip` into `dest`.
async fn install(zip: &Path, dest: &Path, config: PipelineConfig, quiet: bool) -> Result<()> {
    let mut installer = Installer::new(config);
    let pb = byte_progress_bar(quiet);

    let summary = installer
        .install(open_file(zip)?, dest, |p| {
            pb.set_length(p.total);
            pb.set_position(p.done);
            pb.set_message(p.current.to_string());
        })
        .await
        .with_context(|| format!("installing from {} failed", zip.display()))?;
    pb.finish_and_clear();
    installer.shutdown().await;

    info!(
        "{} installed to {}: {} files, {}{}",
        summary.game_name,
        dest.display(),
        summary.files,
        format_size(summary.bytes),
        match summary.retries {
            0 => String::new(),
            n => format!(" ({n} retried writes)"),
        }
    );
    Ok(())
}

/// The game name given on the command line, or the one in the game's ini.
async fn resolve_game_name(game_dir: &Path, explicit: Option<String>) -> Result<String> {
    if let Some(name) = explicit {
        return Ok(name);
    }

    let mut dir = tokio::fs::read_dir(game_dir)
        .await
        .with_context(|| format!("cannot read {}", game_dir.display()))?;
    while let Some(entry) = dir.next_entry().await? {
        let file_name = entry.file_name();
        if !is_game_ini(&file_name.to_string_lossy()) {
            continue;
        }
        let ini = tokio::fs::read(entry.path()).await?;
        if let Some(name) = parse_game_name(&ini)? {
            return Ok(name);
        }
    }
    Err(anyhow!(
        "no GameName found in {}; pass --game-name",
        game_dir.display()
    ))
}

async fn export_saves(game_dir: &Path, output: &Path, game_name: Option<String>) -> Result<()> {
    let game_name = resolve_game_name(game_dir, game_name).await?;
    let zip = saves::export_saves(game_dir, &game_name)
        .await
        .with_context(|| format!("cannot export saves of {game_name}"))?;
    tokio::fs::write(output, &zip)
        .await
        .with_context(|| format!("cannot write {}", output.display()))?;
    info!("wrote {} ({})", output.display(), format_size(zip.len() as u64));
    Ok(())
}

async fn import_saves(zip: &Path, game_dir: &Path, game_name: Option<String>, config: PipelineConfig) -> Result<()> {
    let game_name = resolve_game_name(game_dir, game_name).await?;
    let mut installer = Installer::new(config);
    let files = saves::import_saves(open_file(zip)?, &game_name, game_dir, &mut installer)
        .await
        .with_context(|| format!("cannot import saves from {}", zip.display()))?;
    installer.shutdown().await;
    info!("restored {files} save files of {game_name}");
    Ok(())
}

/// List or extract entries of a legacy archive.
async fn archive(files: &[PathBuf], ald: bool, select: &ArchiveSelect, output: Option<&Path>) -> Result<()> {
    let archive = if ald {
        let volumes = files.iter().map(|f| open_file(f).map(Some)).collect::<Result<Vec<_>>>()?;
        Archive::Ald(Ald::open(volumes).await.context("cannot read ALD set")?)
    } else {
        let [file] = files else {
            bail!("expected a single archive file (use --ald for volume sets)");
        };
        Archive::open_detect(open_file(file)?)
            .await
            .with_context(|| format!("cannot read {}", file.display()))?
    };

    if select.list {
        for entry in archive.entries() {
            let id = entry.id.map(|id| id.to_string()).unwrap_or_else(|| "-".into());
            let name = entry.name.as_deref().unwrap_or("");
            println!("{id:>6}  {:>#10x}  {:>10}  {name}", entry.offset, entry.size);
        }
        return Ok(());
    }

    let data = match (select.no, select.name.as_deref()) {
        (Some(no), _) => archive
            .load(no)
            .await?
            .ok_or_else(|| anyhow!("no entry {no}"))?,
        (None, Some(name)) => {
            archive
                .load_by_name(name)
                .await?
                .ok_or_else(|| anyhow!("no entry named {name}"))?
                .data
        }
        (None, None) => bail!("nothing selected"),
    };

    match output {
        Some(path) => tokio::fs::write(path, &data)
            .await
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
    }
    Ok(())
}

/// Format a byte size into a human-readable string.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(format_size(500), "500 bytes");
/// assert_eq!(format_size(1536), "1.50 KB");
/// ```
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
