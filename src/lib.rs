//! # alice-assets
//!
//! Readers for the asset archives of AliceSoft's System 4 games, and a
//! streaming installer that unpacks a game from a ZIP file.
//!
//! ## Features
//!
//! - Four legacy container formats ([`Ald`], [`Afa`], [`Dlf`], [`Aar`]) behind a
//!   single [`Archive`] type and an [`AssetRegistry`] of open archives
//! - ZIP reading ([`ZipIndex`], [`ZipExtractor`]) with Shift_JIS name support
//!   and CRC-checked extraction, and ZIP writing ([`ZipBuilder`])
//! - A chunked, backpressured install pipeline ([`install`]) with per-chunk
//!   progress and bounded retries
//! - Save data export and import ([`saves`])
//!
//! All reads go through the [`ReadAt`] trait, so archives can live on disk
//! ([`LocalFileReader`]) or in memory ([`MemoryReader`]).
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use alice_assets::{Archive, LocalFileReader};
//!
//! #[tokio::main]
//! async fn main() -> alice_assets::Result<()> {
//!     let reader = Arc::new(LocalFileReader::new(Path::new("Data/CG.afa"))?);
//!     let archive = Archive::open_detect(reader).await?;
//!
//!     if let Some(asset) = archive.load_by_name("cg/title.qnt").await? {
//!         println!("{} bytes, id {:?}", asset.data.len(), asset.id);
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod crc;
pub mod error;
pub mod inflate;
pub mod install;
pub mod io;
pub mod saves;
pub mod zip;

pub use archive::{Aar, Afa, Ald, Archive, ArchiveFormat, ArchiveHandle, AssetRegistry, Dlf, Entry, NamedAsset};
pub use cli::Cli;
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use install::{InstallWorker, Installer};
pub use io::{LocalFileReader, MemoryReader, ReadAt, SharedReader, SliceReader};
pub use zip::{ZipBuilder, ZipExtractor, ZipFileEntry, ZipIndex};
