use clap::{Args, Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

use crate::config::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "alice-assets")]
#[command(version)]
#[command(about = "Install AliceSoft games from ZIP files and read their asset archives", long_about = None)]
#[command(after_help = "Examples:\n  \
  alice-assets install Rance.zip -d games/rance       install the game found in Rance.zip\n  \
  alice-assets archive Rance01GA.ald Rance01GB.ald --ald --no 12 -o cg12.qnt\n  \
  alice-assets archive Data/CG.afa --name cg/title -o title.qnt")]
pub struct Cli {
    /// More log output (-vv for everything)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short = 'q', conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the entries of a ZIP file
    List {
        #[arg(value_name = "ZIP")]
        zip: PathBuf,

        /// Show sizes, compression ratio and timestamps
        #[arg(short = 'v')]
        verbose: bool,
    },

    /// Install the game contained in a ZIP file
    Install {
        #[arg(value_name = "ZIP")]
        zip: PathBuf,

        /// Destination directory
        #[arg(short = 'd', value_name = "DIR")]
        dest: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Pack a game's SaveData directory into a ZIP file
    ExportSaves {
        #[arg(value_name = "GAME_DIR")]
        game_dir: PathBuf,

        /// Output ZIP file
        #[arg(short = 'o', value_name = "ZIP")]
        output: PathBuf,

        /// Game name (default: GameName from the game's ini)
        #[arg(long)]
        game_name: Option<String>,
    },

    /// Restore save files exported with export-saves
    ImportSaves {
        #[arg(value_name = "ZIP")]
        zip: PathBuf,

        #[arg(value_name = "GAME_DIR")]
        game_dir: PathBuf,

        /// Game name (default: GameName from the game's ini)
        #[arg(long)]
        game_name: Option<String>,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Inspect or extract from a legacy asset archive
    Archive {
        /// Archive file; for --ald, the volumes in order (A, B, ...)
        #[arg(value_name = "FILES", required = true)]
        files: Vec<PathBuf>,

        /// Treat FILES as the volumes of an ALD set
        #[arg(long)]
        ald: bool,

        #[command(flatten)]
        select: ArchiveSelect,

        /// Write the entry here instead of to stdout
        #[arg(short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct ArchiveSelect {
    /// List the entries
    #[arg(short = 'l', long)]
    pub list: bool,

    /// Entry number
    #[arg(long, value_name = "N")]
    pub no: Option<u32>,

    /// Entry name
    #[arg(long, value_name = "NAME")]
    pub name: Option<String>,
}

#[derive(Args, Debug)]
pub struct PipelineArgs {
    /// Bytes read from the ZIP per chunk
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Attempts per file before giving up
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_ATTEMPTS)]
    pub attempts: u32,
}

impl PipelineArgs {
    pub fn config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_chunk_size(self.chunk_size)
            .with_max_attempts(self.attempts)
    }
}

impl Cli {
    pub fn log_level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Warn,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::try_parse_from(["alice-assets", "-v", "list", "game.zip", "-v"]).unwrap();
        assert_eq!(cli.log_level(), LevelFilter::Debug);
        assert!(matches!(cli.command, Command::List { verbose: true, .. }));

        let cli = Cli::try_parse_from(["alice-assets", "install", "game.zip", "-d", "out", "--attempts", "5"]).unwrap();
        let Command::Install { pipeline, .. } = cli.command else {
            panic!("expected install");
        };
        assert_eq!(pipeline.config().max_attempts, 5);
        assert_eq!(pipeline.config().chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn archive_needs_exactly_one_selection() {
        assert!(Cli::try_parse_from(["alice-assets", "archive", "a.afa"]).is_err());
        assert!(Cli::try_parse_from(["alice-assets", "archive", "a.afa", "--list", "--no", "1"]).is_err());
        let cli = Cli::try_parse_from(["alice-assets", "archive", "GA.ald", "GB.ald", "--ald", "--no", "3"]).unwrap();
        let Command::Archive { files, ald, select, .. } = cli.command else {
            panic!("expected archive");
        };
        assert_eq!(files.len(), 2);
        assert!(ald);
        assert_eq!(select.no, Some(3));
    }
}
