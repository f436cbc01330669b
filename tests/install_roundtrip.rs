//! End to end: build a game ZIP on disk, install it, then read an installed
//! archive through the registry.

use std::path::Path;
use std::sync::Arc;

use alice_assets::install::WriteRequest;
use alice_assets::zip::ZipDateTime;
use alice_assets::{
    AssetRegistry, Error, Installer, LocalFileReader, PipelineConfig, SharedReader, ZipBuilder, ZipIndex,
};

fn dlf_with(slot: usize, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 8 + 300 * 8];
    out[0..4].copy_from_slice(b"DLF\0");
    let at = 8 + slot * 8;
    let offset = out.len() as u32;
    out[at..at + 4].copy_from_slice(&offset.to_le_bytes());
    out[at + 4..at + 8].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn sjis(text: &str) -> Vec<u8> {
    encoding_rs::SHIFT_JIS.encode(text).0.into_owned()
}

fn open(path: &Path) -> SharedReader {
    Arc::new(LocalFileReader::new(path).unwrap())
}

#[tokio::test]
async fn install_from_zip_file() {
    let work = tempfile::tempdir().unwrap();
    let t = ZipDateTime::now();
    let mut builder = ZipBuilder::new();
    builder
        .add_directory("GAME", t)
        .add_file("GAME/AliceStart.ini", sjis("GameName = \"闘神都市\"\r\n"), t)
        .add_file("GAME/Save.dlf", dlf_with(7, b"seventh"), t)
        .add_file("GAME/Data/big.bin", vec![0x5a; 3 * 1024 + 17], t)
        .add_file("Manual/readme.txt", b"read me".to_vec(), t);
    let zip_path = work.path().join("game.zip");
    std::fs::write(&zip_path, builder.build().unwrap()).unwrap();

    let dest = work.path().join("installed");
    let mut installer = Installer::new(PipelineConfig::default().with_chunk_size(1024));
    let summary = installer.install(open(&zip_path), &dest, |_| {}).await.unwrap();
    installer.shutdown().await;

    assert_eq!(summary.game_name, "闘神都市");
    assert_eq!(summary.files, 3);
    assert_eq!(std::fs::metadata(dest.join("Data/big.bin")).unwrap().len(), 3 * 1024 + 17);
    assert!(!work.path().join("installed/Manual").exists());

    let mut registry = AssetRegistry::new();
    registry.register_source("Save.dlf", open(&dest.join("Save.dlf"))).await.unwrap();
    let handle = registry.open("Save.dlf").unwrap();
    assert!(registry.exists(handle, 7).unwrap());
    assert_eq!(registry.load(handle, 7).await.unwrap().unwrap(), b"seventh");
    assert_eq!(registry.load(handle, 8).await.unwrap(), None);
    registry.close(handle);
}

#[tokio::test]
async fn zip_entries_stream_through_the_worker() {
    let work = tempfile::tempdir().unwrap();
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    let mut builder = ZipBuilder::new();
    builder.add_file("data.bin", payload.clone(), ZipDateTime::now());
    let zip_path = work.path().join("one.zip");
    std::fs::write(&zip_path, builder.build().unwrap()).unwrap();

    let listed = alice_assets::zip::load(open(&zip_path)).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uncompressed_size as usize, payload.len());

    let index = ZipIndex::load(open(&zip_path)).await.unwrap();
    let same = index.extractor().list_files().await.unwrap();
    assert_eq!(same[0].file_name, listed[0].file_name);
    let entry = &index.entries()[0];
    let source = index.extractor().compressed_source(entry).await.unwrap();

    let mut installer = Installer::new(PipelineConfig::default().with_chunk_size(4096));
    let mut events = Vec::new();
    let out = work.path().join("out/data.bin");
    installer
        .worker()
        .write(WriteRequest::new(&out, source.clone()).with_crc32(entry.crc32), |n| events.push(n))
        .await
        .unwrap();
    assert_eq!(events, vec![4096, 4096, 1808]);
    assert_eq!(std::fs::read(&out).unwrap(), payload);

    let bad = WriteRequest::new(&out, source).with_crc32(entry.crc32.wrapping_add(1));
    let err = installer.worker().write(bad, |_| {}).await.unwrap_err();
    assert!(matches!(err, Error::CrcMismatch { .. }));
    assert_eq!(std::fs::metadata(&out).unwrap().len(), payload.len() as u64);
    installer.shutdown().await;
}
