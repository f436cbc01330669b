//! Open archives, addressed by logical path or by handle.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use super::{Ald, Archive, NamedAsset};
use crate::error::{Error, Result};
use crate::io::SharedReader;

/// Token for an opened archive, handed out by [`AssetRegistry::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveHandle(u32);

impl ArchiveHandle {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// The archives available to a game session.
///
/// Single-file archives are registered under a logical path and accessed
/// through handles. ALD sets are registered under a one-character type code
/// (`'G'` for graphics, `'W'` for wave data ...) and accessed directly.
///
/// Handles are resources owned by the caller: every handle returned by
/// [`open`](Self::open) must be closed exactly once, and must not be used
/// after it is closed. Using such a handle yields [`Error::InvalidHandle`].
#[derive(Default)]
pub struct AssetRegistry {
    alds: HashMap<char, Arc<Ald>>,
    archives: HashMap<String, Arc<Archive>>,
    handles: HashMap<ArchiveHandle, Arc<Archive>>,
    next_handle: u32,
}

impl AssetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make an ALD set available under `type_code`, replacing any previous set.
    pub fn add_ald(&mut self, type_code: char, ald: Ald) {
        debug!("registered ALD set '{type_code}' ({} entries)", ald.entries().count());
        self.alds.insert(type_code, Arc::new(ald));
    }

    /// Make `archive` available under `path`, replacing any previous archive.
    /// Handles already opened on the old archive keep using it.
    pub fn register(&mut self, path: impl Into<String>, archive: Archive) {
        let path = path.into();
        debug!("registered archive {path}");
        self.archives.insert(path, Arc::new(archive));
    }

    /// Open a single-file archive of any detectable format and register it.
    pub async fn register_source(&mut self, path: impl Into<String>, source: SharedReader) -> Result<()> {
        let archive = Archive::open_detect(source).await?;
        self.register(path, archive);
        Ok(())
    }

    pub fn ald_exists(&self, type_code: char, no: u32) -> bool {
        self.alds.get(&type_code).is_some_and(|ald| ald.exists(no))
    }

    pub async fn ald_load(&self, type_code: char, no: u32) -> Result<Option<Vec<u8>>> {
        match self.alds.get(&type_code) {
            Some(ald) => ald.load(no).await,
            None => Ok(None),
        }
    }

    /// Open the archive registered under `path`. Every call returns a fresh
    /// handle; all of them share the same parsed archive.
    pub fn open(&mut self, path: &str) -> Option<ArchiveHandle> {
        let archive = self.archives.get(path)?.clone();
        let handle = loop {
            let candidate = ArchiveHandle(self.next_handle);
            self.next_handle = self.next_handle.wrapping_add(1);
            if !self.handles.contains_key(&candidate) {
                break candidate;
            }
        };
        self.handles.insert(handle, archive);
        Some(handle)
    }

    /// Release a handle. Closing a handle that is not open has no effect.
    pub fn close(&mut self, handle: ArchiveHandle) {
        self.handles.remove(&handle);
    }

    fn archive(&self, handle: ArchiveHandle) -> Result<&Archive> {
        self.handles
            .get(&handle)
            .map(Arc::as_ref)
            .ok_or(Error::InvalidHandle(handle.0))
    }

    pub fn exists(&self, handle: ArchiveHandle, no: u32) -> Result<bool> {
        self.archive(handle)?.exists(no)
    }

    pub fn exists_by_name(&self, handle: ArchiveHandle, name: &str) -> Result<bool> {
        self.archive(handle)?.exists_by_name(name)
    }

    pub async fn load(&self, handle: ArchiveHandle, no: u32) -> Result<Option<Vec<u8>>> {
        self.archive(handle)?.load(no).await
    }

    pub async fn load_by_name(&self, handle: ArchiveHandle, name: &str) -> Result<Option<NamedAsset>> {
        self.archive(handle)?.load_by_name(name).await
    }
}
