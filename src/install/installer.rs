//! Installing a game from a ZIP archive.

use log::{info, warn};
use regex::Regex;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use super::messages::{Compression, WriteRequest};
use super::worker::InstallWorker;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::io::SharedReader;
use crate::zip::{CompressionMethod, ZipFileEntry, ZipIndex};

static INI_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^|/)(System40|AliceStart)\.ini$").expect("valid regex"));

/// Game configuration file found in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameIni {
    /// Path of the ini inside the archive.
    pub ini_path: String,
    /// Value of its `GameName` key.
    pub game_name: String,
}

impl GameIni {
    /// Directory holding the ini; everything the game needs lives below it.
    /// Empty when the ini sits at the archive root.
    pub fn root(&self) -> &str {
        self.ini_path.rfind('/').map_or("", |i| &self.ini_path[..i])
    }

    /// Path of `entry_name` relative to [`root`](Self::root), or `None` if the
    /// entry is outside it.
    pub fn relative_path<'a>(&self, entry_name: &'a str) -> Option<&'a str> {
        match self.root() {
            "" => Some(entry_name),
            root => entry_name.strip_prefix(root)?.strip_prefix('/'),
        }
    }
}

/// Whether `name` is the file name of a game configuration file.
pub fn is_game_ini(name: &str) -> bool {
    INI_NAME.is_match(name)
}

/// Read the `GameName = "..."` line of a Shift_JIS encoded ini.
pub fn parse_game_name(ini: &[u8]) -> Result<Option<String>> {
    static GAME_NAME: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r#"(?m)^GameName\s*=\s*"(.*)""#).expect("valid regex"));

    let text = encoding_rs::SHIFT_JIS
        .decode_without_bom_handling_and_without_replacement(ini)
        .ok_or_else(|| Error::malformed("game ini is not valid Shift_JIS"))?;
    Ok(GAME_NAME.captures(&text).map(|c| c[1].to_string()))
}

/// Locate the game ini in `index` and read the game name from it.
///
/// Returns `None` if there is no ini or it has no `GameName`.
pub async fn find_game_ini(index: &ZipIndex) -> Result<Option<GameIni>> {
    let Some(entry) = index.entries().iter().find(|e| is_game_ini(&e.file_name)) else {
        return Ok(None);
    };
    let ini = index.extractor().extract(entry).await?;
    Ok(parse_game_name(&ini)?.map(|game_name| GameIni {
        ini_path: entry.file_name.clone(),
        game_name,
    }))
}

/// Join an archive-relative path onto `dest`, refusing anything that would
/// land outside it.
pub fn destination_path(dest: &Path, relative: &str) -> Result<PathBuf> {
    let mut path = dest.to_path_buf();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            _ => return Err(Error::malformed(format!("entry path escapes the destination: {relative}"))),
        }
    }
    if path == dest {
        return Err(Error::malformed(format!("empty entry path: {relative:?}")));
    }
    Ok(path)
}

/// How the pipeline has to treat an entry's data.
pub fn entry_compression(entry: &ZipFileEntry) -> Result<Option<Compression>> {
    if entry.is_encrypted() {
        return Err(Error::unsupported(format!("{} is encrypted", entry.file_name)));
    }
    match entry.compression_method {
        CompressionMethod::Stored => Ok(None),
        CompressionMethod::Deflate => Ok(Some(Compression::DeflateRaw)),
        CompressionMethod::Unknown(m) => Err(Error::unsupported(format!(
            "{} uses compression method {m}",
            entry.file_name
        ))),
    }
}

/// Install progress, reported after every written piece and every skipped entry.
#[derive(Debug, Clone, Copy)]
pub struct InstallProgress<'a> {
    /// Bytes accounted for so far, out of `total`.
    pub done: u64,
    /// Sum of the uncompressed sizes of all entries in the archive.
    pub total: u64,
    pub current: &'a str,
}

/// Result of a finished install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallSummary {
    pub game_name: String,
    pub files: usize,
    pub bytes: u64,
    /// Attempts that failed and were retried.
    pub retries: u32,
}

/// Writes the files of a game archive into a directory through an
/// [`InstallWorker`], retrying files that fail transiently.
pub struct Installer {
    worker: InstallWorker,
    config: PipelineConfig,
}

impl Installer {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            worker: InstallWorker::spawn(config),
            config,
        }
    }

    /// Install the game in `zip` into `dest`.
    ///
    /// Only entries below the ini's directory are installed, with that
    /// directory replaced by `dest`.
    pub async fn install<F>(&mut self, zip: SharedReader, dest: &Path, mut on_progress: F) -> Result<InstallSummary>
    where
        F: FnMut(InstallProgress<'_>),
    {
        let index = ZipIndex::load(zip).await?;
        let ini = find_game_ini(&index)
            .await?
            .ok_or_else(|| Error::malformed("no game data (System40.ini or AliceStart.ini) in the archive"))?;
        info!("installing {} from {}", ini.game_name, ini.ini_path);

        let total = index.total_uncompressed_size();
        let mut done = 0u64;
        let mut summary = InstallSummary {
            game_name: ini.game_name.clone(),
            files: 0,
            bytes: 0,
            retries: 0,
        };

        for entry in index.entries() {
            let name = entry.file_name.as_str();
            let relative = match ini.relative_path(name) {
                Some(relative) if !entry.is_directory() => relative,
                _ => {
                    done += entry.uncompressed_size as u64;
                    on_progress(InstallProgress { done, total, current: name });
                    continue;
                }
            };

            let path = destination_path(dest, relative)?;
            let data = index.extractor().compressed_source(entry).await?;
            let mut request = WriteRequest::new(path, data).with_crc32(entry.crc32);
            request.compression = entry_compression(entry)?;

            let written = self
                .write_with_retry(request, &mut summary.retries, |n| {
                    on_progress(InstallProgress {
                        done: done + n,
                        total,
                        current: name,
                    })
                })
                .await?;
            done += written;
            summary.files += 1;
            summary.bytes += written;
        }

        info!("installed {} files ({} bytes) of {}", summary.files, summary.bytes, summary.game_name);
        Ok(summary)
    }

    /// Run `request` until it succeeds, fails with a non-retryable error or
    /// runs out of attempts. A failed attempt's output is deleted before the
    /// next one.
    ///
    /// `on_progress` receives the bytes written so far by the current attempt.
    pub async fn write_with_retry<F>(&mut self, request: WriteRequest, retries: &mut u32, mut on_progress: F) -> Result<u64>
    where
        F: FnMut(u64),
    {
        let mut attempt = 1;
        loop {
            let mut written = 0u64;
            let result = self
                .worker
                .write(request.clone(), |n| {
                    written += n;
                    on_progress(written);
                })
                .await;

            match result {
                Ok(()) => return Ok(written),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(
                        "writing {} failed (attempt {attempt}/{}): {e}",
                        request.path.display(),
                        self.config.max_attempts
                    );
                    remove_partial(&request.path).await?;
                    attempt += 1;
                    *retries += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn worker(&mut self) -> &mut InstallWorker {
        &mut self.worker
    }

    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }
}

async fn remove_partial(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
