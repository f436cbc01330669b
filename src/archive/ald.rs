//! ALD: the multi-volume archive of System3.x/System4 titles.
//!
//! A set consists of up to 26 volume files (`xxA.ALD` .. `xxZ.ALD`). Every
//! volume starts with a table of 3-byte entry offsets; its first 6 bytes are
//! the header, two 24-bit little-endian values in 256-byte units:
//!
//! ```text
//! [0..3]  offset table size
//! [3..6]  end of the link table
//! ```
//!
//! The link table (stored in at least one volume) has one 3-byte row per entry:
//! `volume number (1-based): u8, offset index: u16`. The offset index selects a
//! row of that volume's offset table.
//!
//! Some titles obfuscate the first 3 header bytes by adding a per-title mask.
//! The mask is recovered from the layout of the offset table itself.

use std::collections::BTreeMap;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info};

use crate::error::{Error, Result};
use crate::io::SharedReader;

/// Volumes are lettered A to Z.
pub const MAX_VOLUMES: usize = 26;

const HEADER_SIZE: u64 = 6;
const ENTRY_HEADER_SIZE: u64 = 8;
const DESCRIPTOR_READ_SIZE: u64 = 32;

/// Where an entry lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AldSlot {
    /// Zero-based index into the volume list.
    pub volume: usize,
    pub offset: u64,
}

pub struct Ald {
    volumes: Vec<Option<SharedReader>>,
    slots: BTreeMap<u32, AldSlot>,
    mask: Option<[u8; 3]>,
}

fn volume_label(volume: usize) -> char {
    (b'A' + volume as u8) as char
}

fn read_u24(buf: &[u8], offset: usize) -> u32 {
    LittleEndian::read_u24(&buf[offset..offset + 3])
}

/// Index of the first 3-byte row (starting after the header) whose value does
/// not increase over the previous one: the end of the offset table.
pub(crate) fn find_table_boundary(table: &[u8]) -> Option<usize> {
    let mut prev: i64 = -1;
    let mut i = HEADER_SIZE as usize;
    while i + 2 < table.len() {
        let n = read_u24(table, i) as i64;
        if prev >= n {
            return Some(i);
        }
        prev = n;
        i += 3;
    }
    None
}

/// The mask that turns the plain offset-table size implied by `boundary` into
/// the obfuscated header bytes.
pub(crate) fn derive_mask(header: &[u8], boundary: usize) -> [u8; 3] {
    let units = ((boundary + 0xff) >> 8) as u32;
    let plain = units.to_le_bytes();
    [
        header[0].wrapping_sub(plain[0]),
        header[1].wrapping_sub(plain[1]),
        header[2].wrapping_sub(plain[2]),
    ]
}

impl Ald {
    /// Build the index of a volume set. `volumes[i]` is volume `A + i`;
    /// missing volumes are `None`.
    pub async fn open(volumes: Vec<Option<SharedReader>>) -> Result<Self> {
        if volumes.len() > MAX_VOLUMES {
            return Err(Error::unsupported(format!(
                "ALD sets have at most {MAX_VOLUMES} volumes, got {}",
                volumes.len()
            )));
        }

        let mut link_table: Option<Vec<u8>> = None;
        let mut mask: Option<[u8; 3]> = None;
        let mut slots = BTreeMap::new();

        for (vol, source) in volumes.iter().enumerate() {
            let Some(source) = source else { continue };
            let label = volume_label(vol);
            let size = source.size();

            let mut header = source.read_range(0, HEADER_SIZE).await?;
            if header.len() < HEADER_SIZE as usize {
                return Err(Error::malformed(format!("volume {label}: invalid ALD header")));
            }
            if mask.is_none() && header[2] != 0 {
                let found = Self::find_mask(source, &header, label).await?;
                info!("ALD volume {label}: header mask {found:02x?}");
                mask = Some(found);
            }
            if let Some(mask) = mask {
                for (b, m) in header.iter_mut().zip(mask) {
                    *b = b.wrapping_sub(m);
                }
            }

            let offset_table_size = (read_u24(&header, 0) as u64) << 8;
            let link_table_end = (read_u24(&header, 3) as u64) << 8;
            if link_table_end <= offset_table_size || link_table_end > size {
                return Err(Error::malformed(format!("volume {label}: invalid ALD header")));
            }

            // The first volume that has a link table provides it for the whole set.
            if link_table.is_none() {
                let len = link_table_end - offset_table_size;
                let links = source.read_range(offset_table_size, len).await?;
                if (links.len() as u64) < len {
                    return Err(Error::malformed(format!("volume {label}: truncated link table")));
                }
                link_table = Some(links);
            }
            let links = link_table.as_deref().unwrap_or(&[]);

            let offsets = source.read_range(0, offset_table_size).await?;
            for (no, row) in links.chunks_exact(3).enumerate() {
                if row[0] as usize != vol + 1 {
                    continue;
                }
                let index = LittleEndian::read_u16(&row[1..3]) as usize;
                if index * 3 + 2 >= offsets.len() {
                    return Err(Error::malformed(format!(
                        "volume {label}: invalid ALD index for entry {no}"
                    )));
                }
                let offset = (read_u24(&offsets, index * 3) as u64) << 8;
                if offset == 0 {
                    continue;
                }
                if offset + ENTRY_HEADER_SIZE > size {
                    return Err(Error::malformed(format!(
                        "volume {label}: entry {no} at {offset:#x} is past the end of the file"
                    )));
                }
                slots.insert(no as u32, AldSlot { volume: vol, offset });
            }
            debug!("ALD volume {label}: {size} bytes, {} entries indexed so far", slots.len());
        }

        if link_table.is_none() {
            return Err(Error::malformed("no ALD volumes found"));
        }

        Ok(Self { volumes, slots, mask })
    }

    /// Recover the header mask from the volume's offset table.
    async fn find_mask(source: &SharedReader, header: &[u8], label: char) -> Result<[u8; 3]> {
        // The link table end is not obfuscated, so it bounds the offset table.
        let link_table_end = (read_u24(header, 3) as u64) << 8;
        let table = source.read_range(0, link_table_end).await?;
        match find_table_boundary(&table) {
            Some(boundary) => Ok(derive_mask(header, boundary)),
            None => Err(Error::malformed(format!("volume {label}: invalid ALD header"))),
        }
    }

    /// The header mask in effect for this set, if it was obfuscated.
    pub fn mask(&self) -> Option<[u8; 3]> {
        self.mask
    }

    pub fn exists(&self, no: u32) -> bool {
        self.slots.contains_key(&no)
    }

    /// Indexed entries, by entry number.
    pub fn entries(&self) -> impl Iterator<Item = (u32, &AldSlot)> {
        self.slots.iter().map(|(no, slot)| (*no, slot))
    }

    fn locate(&self, no: u32) -> Option<(AldSlot, &SharedReader)> {
        let slot = *self.slots.get(&no)?;
        let source = self.volumes.get(slot.volume)?.as_ref()?;
        Some((slot, source))
    }

    /// Load an entry, including its sub-header.
    pub async fn load(&self, no: u32) -> Result<Option<Vec<u8>>> {
        let Some((slot, source)) = self.locate(no) else {
            return Ok(None);
        };
        let label = volume_label(slot.volume);

        let header = source.read_range(slot.offset, ENTRY_HEADER_SIZE).await?;
        if header.len() < ENTRY_HEADER_SIZE as usize {
            return Err(Error::malformed(format!("volume {label}: invalid ALD entry {no}")));
        }
        let header_size = LittleEndian::read_u32(&header[0..4]) as u64;
        let data_size = LittleEndian::read_u32(&header[4..8]) as u64;
        let total = header_size + data_size;

        let data = source.read_range(slot.offset, total).await?;
        if (data.len() as u64) < total {
            return Err(Error::malformed(format!("volume {label}: invalid ALD entry {no}")));
        }
        Ok(Some(data))
    }

    /// Load only the sub-header of an entry: 32 bytes, or its declared header
    /// size when that is larger.
    pub async fn load_descriptor(&self, no: u32) -> Result<Option<Vec<u8>>> {
        let Some((slot, source)) = self.locate(no) else {
            return Ok(None);
        };
        let label = volume_label(slot.volume);

        let buf = source.read_range(slot.offset, DESCRIPTOR_READ_SIZE).await?;
        if buf.len() < DESCRIPTOR_READ_SIZE as usize {
            return Err(Error::malformed(format!("volume {label}: invalid ALD entry {no}")));
        }
        let header_size = LittleEndian::read_u32(&buf[0..4]) as u64;
        if header_size <= DESCRIPTOR_READ_SIZE {
            return Ok(Some(buf));
        }
        let buf = source.read_range(slot.offset, header_size).await?;
        if (buf.len() as u64) < header_size {
            return Err(Error::malformed(format!("volume {label}: invalid ALD entry {no}")));
        }
        Ok(Some(buf))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use byteorder::WriteBytesExt;
    use std::sync::Arc;

    /// Entry payload as stored: an 8-byte sub-header padded to 16, then data.
    pub(crate) fn entry_blob(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(16).unwrap();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        out.resize(16, 0);
        out.extend_from_slice(data);
        out
    }

    fn put_u24(buf: &mut [u8], at: usize, value: u32) {
        LittleEndian::write_u24(&mut buf[at..at + 3], value);
    }

    fn pad256(buf: &mut Vec<u8>) {
        let len = buf.len().div_ceil(256) * 256;
        buf.resize(len, 0);
    }

    /// Build one volume holding `entries` (entry number, payload). When
    /// `links` is given the volume also stores the link table.
    pub(crate) fn build_volume(
        entries: &[(u32, Vec<u8>)],
        links: Option<&[(u8, u16)]>,
    ) -> Vec<u8> {
        // offset table rows: 0 and 1 overlap the header, entries start at row 2
        let rows = 2 + entries.len();
        let offset_table_size = (rows * 3).div_ceil(256) * 256;
        let link_len = links.map(|l| (l.len() * 3).div_ceil(256) * 256).unwrap_or(256);
        let link_table_end = offset_table_size + link_len;

        let mut out = vec![0u8; link_table_end];
        put_u24(&mut out, 0, (offset_table_size >> 8) as u32);
        put_u24(&mut out, 3, (link_table_end >> 8) as u32);
        if let Some(links) = links {
            for (i, (vol, index)) in links.iter().enumerate() {
                let at = offset_table_size + i * 3;
                out[at] = *vol;
                LittleEndian::write_u16(&mut out[at + 1..at + 3], *index);
            }
        }
        for (row, (_, payload)) in entries.iter().enumerate() {
            pad256(&mut out);
            let offset = out.len();
            put_u24(&mut out, (2 + row) * 3, (offset >> 8) as u32);
            out.extend_from_slice(&entry_blob(payload));
        }
        pad256(&mut out);
        out
    }

    fn shared(data: Vec<u8>) -> Option<SharedReader> {
        Some(Arc::new(MemoryReader::new(data)))
    }

    #[tokio::test]
    async fn two_volume_set() {
        // entry 0 -> A row 2, entry 1 -> B row 2, entry 2 absent, entry 3 -> A row 3
        let links: &[(u8, u16)] = &[(1, 2), (2, 2), (0, 0), (1, 3)];
        let a = build_volume(&[(0, b"first".to_vec()), (3, b"fourth".to_vec())], Some(links));
        let b = build_volume(&[(1, b"second".to_vec())], None);

        let ald = Ald::open(vec![shared(a), shared(b)]).await.unwrap();
        assert!(ald.mask().is_none());
        assert!(ald.exists(0) && ald.exists(1) && ald.exists(3));
        assert!(!ald.exists(2));
        assert!(!ald.exists(99));

        let first = ald.load(0).await.unwrap().unwrap();
        assert_eq!(first, entry_blob(b"first"));
        assert_eq!(&first[16..], b"first");
        assert_eq!(&ald.load(1).await.unwrap().unwrap()[16..], b"second");
        assert_eq!(&ald.load(3).await.unwrap().unwrap()[16..], b"fourth");
        assert!(ald.load(2).await.unwrap().is_none());

        let descriptor = ald.load_descriptor(1).await.unwrap().unwrap();
        assert_eq!(descriptor.len(), 32);
        assert_eq!(LittleEndian::read_u32(&descriptor[4..8]), 6);

        let numbers: Vec<u32> = ald.entries().map(|(no, _)| no).collect();
        assert_eq!(numbers, vec![0, 1, 3]);
    }

    #[tokio::test]
    async fn missing_volumes_are_skipped() {
        let links: &[(u8, u16)] = &[(2, 2), (3, 2)];
        let b = build_volume(&[(0, b"in b".to_vec())], Some(links));
        let ald = Ald::open(vec![None, shared(b), None]).await.unwrap();
        assert!(ald.exists(0));
        // entry 1 points at volume C, which is absent
        assert!(!ald.exists(1));
    }

    #[test]
    fn mask_derivation() {
        // offset table ends at byte 0x2f4 -> 3 units of 256 bytes
        let header = [0x03u8.wrapping_add(0x4e), 0x00u8.wrapping_add(0x6d), 0x44];
        assert_eq!(derive_mask(&header, 0x2f4), [0x4e, 0x6d, 0x44]);
        // an exact multiple of 256 is not rounded up
        assert_eq!(derive_mask(&[0x05, 0x00, 0x00], 0x200), [0x03, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn obfuscated_header_is_recovered() {
        let links: &[(u8, u16)] = &[(1, 2), (1, 3)];
        let mut a = build_volume(&[(0, b"zero".to_vec()), (1, b"one".to_vec())], Some(links));
        let mut b = build_volume(&[], None);
        let mask = [0x4e, 0x6d, 0x44];
        for volume in [&mut a, &mut b] {
            for (byte, m) in volume.iter_mut().zip(mask) {
                *byte = byte.wrapping_add(m);
            }
        }
        assert_eq!(a[2], 0x44);

        let ald = Ald::open(vec![shared(a), shared(b)]).await.unwrap();
        assert_eq!(ald.mask(), Some(mask));
        assert_eq!(&ald.load(1).await.unwrap().unwrap()[16..], b"one");
    }

    #[tokio::test]
    async fn plain_header_is_not_adjusted() {
        let links: &[(u8, u16)] = &[(1, 2)];
        let a = build_volume(&[(0, b"x".to_vec())], Some(links));
        assert_eq!(a[2], 0);
        let ald = Ald::open(vec![shared(a)]).await.unwrap();
        assert_eq!(ald.mask(), None);
        assert!(ald.exists(0));
    }

    #[tokio::test]
    async fn rejects_bad_headers() {
        // link table end before offset table end
        let mut bad = vec![0u8; 512];
        put_u24(&mut bad, 0, 2);
        put_u24(&mut bad, 3, 1);
        assert!(matches!(Ald::open(vec![shared(bad)]).await, Err(Error::Malformed(_))));

        // link table end past the end of the file
        let mut short = vec![0u8; 512];
        put_u24(&mut short, 0, 1);
        put_u24(&mut short, 3, 4);
        assert!(matches!(Ald::open(vec![shared(short)]).await, Err(Error::Malformed(_))));

        assert!(matches!(Ald::open(vec![shared(vec![1, 2])]).await, Err(Error::Malformed(_))));
        assert!(matches!(Ald::open(vec![None, None]).await, Err(Error::Malformed(_))));
    }

    #[tokio::test]
    async fn truncated_entry_is_fatal() {
        let links: &[(u8, u16)] = &[(1, 2)];
        let mut a = build_volume(&[(0, vec![7u8; 300])], Some(links));
        // cut the payload short but keep the sub-header
        let entry_offset = a.len() - 512;
        a.truncate(entry_offset + 100);
        let ald = Ald::open(vec![shared(a)]).await.unwrap();
        assert!(matches!(ald.load(0).await, Err(Error::Malformed(_))));
    }
}
