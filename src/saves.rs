//! Exporting and importing save data as ZIP archives.
//!
//! An export contains `<GameName>/`, `<GameName>/SaveData/` and everything
//! below the game's `SaveData` directory. An import accepts only archives whose
//! entries all live under `<GameName>/`.

use log::info;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Error, Result};
use crate::install::{Installer, WriteRequest, destination_path, entry_compression};
use crate::io::SharedReader;
use crate::zip::{ZipBuilder, ZipDateTime, ZipIndex};

/// Name of the save directory inside a game directory.
pub const SAVE_DIR: &str = "SaveData";

/// Pack `<game_dir>/SaveData` into a ZIP archive.
pub async fn export_saves(game_dir: &Path, game_name: &str) -> Result<Vec<u8>> {
    let now = ZipDateTime::now();
    let mut builder = ZipBuilder::new();
    builder.add_directory(game_name, now);
    let root = format!("{game_name}/{SAVE_DIR}");
    builder.add_directory(&root, now);

    // Depth-first, children in name order.
    let mut pending: Vec<(PathBuf, String)> = vec![(game_dir.join(SAVE_DIR), root)];
    while let Some((dir, prefix)) = pending.pop() {
        let mut children = Vec::new();
        let mut read_dir = fs::read_dir(&dir).await?;
        while let Some(child) = read_dir.next_entry().await? {
            children.push(child);
        }
        children.sort_by_key(|c| c.file_name());

        let mut subdirs = Vec::new();
        for child in children {
            let name = child.file_name();
            let name = name
                .to_str()
                .ok_or_else(|| Error::malformed(format!("non UTF-8 file name in {}", dir.display())))?;
            let entry_name = format!("{prefix}/{name}");
            let metadata = child.metadata().await?;
            if metadata.is_dir() {
                builder.add_directory(&entry_name, now);
                subdirs.push((child.path(), entry_name));
            } else if metadata.is_file() {
                let modified = metadata.modified().map(ZipDateTime::from_system_time).unwrap_or(now);
                builder.add_file(&entry_name, fs::read(child.path()).await?, modified);
            }
        }
        pending.extend(subdirs.into_iter().rev());
    }

    info!("exported {} save entries of {game_name}", builder.len());
    builder.build()
}

/// Write the files of a save archive made by [`export_saves`] into `game_dir`.
///
/// Returns the number of files written.
pub async fn import_saves(
    zip: SharedReader,
    game_name: &str,
    game_dir: &Path,
    installer: &mut Installer,
) -> Result<usize> {
    let index = ZipIndex::load(zip).await?;
    let prefix = format!("{game_name}/");
    if let Some(stray) = index.entries().iter().find(|e| !e.file_name.starts_with(&prefix)) {
        return Err(Error::malformed(format!(
            "not save files for {game_name}: {}",
            stray.file_name
        )));
    }

    let mut files = 0;
    let mut retries = 0;
    for entry in index.entries().iter().filter(|e| !e.is_directory()) {
        let path = destination_path(game_dir, &entry.file_name[prefix.len()..])?;
        let data = index.extractor().compressed_source(entry).await?;
        let mut request = WriteRequest::new(path, data).with_crc32(entry.crc32);
        request.compression = entry_compression(entry)?;
        installer.write_with_retry(request, &mut retries, |_| {}).await?;
        files += 1;
    }

    info!("imported {files} save files of {game_name}");
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::io::MemoryReader;
    use std::sync::Arc;

    async fn save_tree(game_dir: &Path) {
        let saves = game_dir.join(SAVE_DIR);
        fs::create_dir_all(saves.join("backup")).await.unwrap();
        fs::write(saves.join("gsave.asd"), b"global").await.unwrap();
        fs::write(saves.join("s01.asd"), b"slot one").await.unwrap();
        fs::write(saves.join("backup/s01.asd"), b"older").await.unwrap();
    }

    #[tokio::test]
    async fn export_layout() {
        let game = tempfile::tempdir().unwrap();
        save_tree(game.path()).await;

        let zip = export_saves(game.path(), "大悪司").await.unwrap();
        let index = ZipIndex::load(Arc::new(MemoryReader::new(zip))).await.unwrap();
        let names: Vec<_> = index.entries().iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(
            names,
            [
                "大悪司/",
                "大悪司/SaveData/",
                "大悪司/SaveData/backup/",
                "大悪司/SaveData/gsave.asd",
                "大悪司/SaveData/s01.asd",
                "大悪司/SaveData/backup/s01.asd",
            ]
        );
    }

    #[tokio::test]
    async fn export_then_import() {
        let game = tempfile::tempdir().unwrap();
        save_tree(game.path()).await;
        let zip: SharedReader = Arc::new(MemoryReader::new(export_saves(game.path(), "Rance").await.unwrap()));

        let target = tempfile::tempdir().unwrap();
        let mut installer = Installer::new(PipelineConfig::default());
        let files = import_saves(zip.clone(), "Rance", target.path(), &mut installer).await.unwrap();
        assert_eq!(files, 3);
        assert_eq!(
            std::fs::read(target.path().join("SaveData/backup/s01.asd")).unwrap(),
            b"older"
        );

        let err = import_saves(zip, "Rance02", target.path(), &mut installer).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
        installer.shutdown().await;
    }

    #[tokio::test]
    async fn missing_save_directory() {
        let game = tempfile::tempdir().unwrap();
        assert!(matches!(export_saves(game.path(), "Rance").await, Err(Error::Io(_))));
    }
}
