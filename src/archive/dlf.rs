//! DLF: an 8-byte header (`DLF\0` + 4 unused bytes) followed by 300 slots of
//! `offset: u32, length: u32`. A zero offset marks an empty slot.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use super::{Entry, check_range};
use crate::error::{Error, Result};
use crate::io::SharedReader;

/// Number of slots in every DLF file.
pub const DLF_SLOTS: usize = 300;

const MAGIC_DLF: u32 = 0x0046_4c44; // "DLF\0"
const HEADER_SIZE: u64 = 8;
const TABLE_SIZE: u64 = HEADER_SIZE + DLF_SLOTS as u64 * 8;

pub struct Dlf {
    source: SharedReader,
    slots: Vec<Option<Entry>>,
}

impl Dlf {
    pub async fn open(source: SharedReader) -> Result<Self> {
        let table = source.read_range(0, TABLE_SIZE).await?;
        if table.len() < TABLE_SIZE as usize {
            return Err(Error::malformed("not a DLF file: slot table too short"));
        }
        if LittleEndian::read_u32(&table[0..4]) != MAGIC_DLF {
            return Err(Error::malformed("not a DLF file"));
        }

        let mut slots = Vec::with_capacity(DLF_SLOTS);
        for (i, slot) in table[HEADER_SIZE as usize..].chunks_exact(8).enumerate() {
            let offset = LittleEndian::read_u32(&slot[0..4]) as u64;
            let size = LittleEndian::read_u32(&slot[4..8]) as u64;
            if offset == 0 {
                slots.push(None);
                continue;
            }
            check_range(&format!("DLF slot {i}"), offset, size, source.size())?;
            slots.push(Some(Entry {
                offset,
                size,
                name: None,
                id: Some(i as u32),
            }));
        }
        debug!("DLF: {} of {DLF_SLOTS} slots used", slots.iter().flatten().count());

        Ok(Self { source, slots })
    }

    pub fn exists(&self, no: u32) -> bool {
        self.slot(no).is_some()
    }

    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().flatten()
    }

    fn slot(&self, no: u32) -> Option<&Entry> {
        self.slots.get(no as usize)?.as_ref()
    }

    pub async fn load(&self, no: u32) -> Result<Option<Vec<u8>>> {
        match self.slot(no) {
            Some(entry) => entry.read(self.source.as_ref()).await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use std::sync::Arc;

    /// A DLF file with the given (slot, payload) pairs.
    pub(crate) fn build_dlf(slots: &[(usize, &[u8])]) -> Vec<u8> {
        let mut out = vec![0u8; TABLE_SIZE as usize];
        out[0..4].copy_from_slice(b"DLF\0");
        for (slot, payload) in slots {
            let at = HEADER_SIZE as usize + slot * 8;
            let offset = out.len() as u32;
            LittleEndian::write_u32(&mut out[at..at + 4], offset);
            LittleEndian::write_u32(&mut out[at + 4..at + 8], payload.len() as u32);
            out.extend_from_slice(payload);
        }
        out
    }

    async fn open(bytes: Vec<u8>) -> Result<Dlf> {
        Dlf::open(Arc::new(MemoryReader::new(bytes))).await
    }

    #[tokio::test]
    async fn numbered_slots() {
        let dlf = open(build_dlf(&[(0, &b"save0"[..]), (5, &b"save five"[..]), (299, &b"last"[..])]))
            .await
            .unwrap();
        assert!(dlf.exists(0) && dlf.exists(5) && dlf.exists(299));
        assert!(!dlf.exists(1));
        assert!(!dlf.exists(300));
        assert_eq!(dlf.load(5).await.unwrap().unwrap(), b"save five");
        assert_eq!(dlf.load(299).await.unwrap().unwrap(), b"last");
        assert!(dlf.load(1).await.unwrap().is_none());
        assert!(dlf.load(1000).await.unwrap().is_none());
        assert_eq!(dlf.entries().count(), 3);
    }

    #[tokio::test]
    async fn rejects_bad_files() {
        let mut bad_magic = build_dlf(&[]);
        bad_magic[0] = b'X';
        assert!(matches!(open(bad_magic).await, Err(Error::Malformed(_))));

        assert!(matches!(open(b"DLF\0".to_vec()).await, Err(Error::Malformed(_))));

        let mut overrun = build_dlf(&[(3, &b"abcdef"[..])]);
        overrun.truncate(overrun.len() - 1);
        assert!(matches!(open(overrun).await, Err(Error::Malformed(_))));
    }
}
