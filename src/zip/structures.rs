use byteorder::{LittleEndian, ReadBytesExt};
use chrono::{DateTime, Datelike, Local, NaiveDateTime, Timelike};
use std::io::Cursor;
use std::time::SystemTime;

use crate::error::{Error, Result};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose flag: the entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// General purpose flag: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// "Version made by" host system for Unix.
pub const HOST_UNIX: u8 = 3;

/// Highest "version needed to extract" this crate handles (2.0: deflate, no ZIP64).
pub const MAX_VERSION_NEEDED: u16 = 20;

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(Error::malformed("invalid end of central directory record"));
        }

        let mut cursor = Cursor::new(&data[4..Self::SIZE]);
        let mut field = || cursor.read_u16::<LittleEndian>();
        let disk_number = field()?;
        let disk_with_cd = field()?;
        let disk_entries = field()?;
        let total_entries = field()?;
        let cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()?;

        Ok(Self {
            disk_number,
            disk_with_cd,
            disk_entries,
            total_entries,
            cd_size,
            cd_offset,
            comment_len,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// How an entry's name was decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameEncoding {
    Utf8,
    /// Legacy double-byte encoding used by Japanese Windows archivers.
    ShiftJis,
}

impl NameEncoding {
    /// UTF-8 when the entry says so or was produced on Unix, Shift_JIS otherwise.
    pub fn guess(flags: u16, version_made_by: u16) -> Self {
        if flags & FLAG_UTF8 != 0 || (version_made_by >> 8) as u8 == HOST_UNIX {
            NameEncoding::Utf8
        } else {
            NameEncoding::ShiftJis
        }
    }

    /// Decode a raw name. Invalid byte sequences are an error, not replaced.
    pub fn decode(self, bytes: &[u8]) -> Result<String> {
        match self {
            NameEncoding::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::malformed("file name is not valid UTF-8")),
            NameEncoding::ShiftJis => encoding_rs::SHIFT_JIS
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|name| name.into_owned())
                .ok_or_else(|| Error::malformed("file name is not valid Shift_JIS")),
        }
    }
}

/// Parsed ZIP file entry information
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub name_encoding: NameEncoding,
    pub compression_method: CompressionMethod,
    pub flags: u16,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub crc32: u32,
    pub lfh_offset: u32,
    pub last_modified: ZipDateTime,
}

impl ZipFileEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Directory entries end with '/'
    pub fn is_directory(&self) -> bool {
        self.file_name.ends_with('/')
    }
}

/// A date and time in the MS-DOS representation used by ZIP files.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZipDateTime {
    pub date: u16,
    pub time: u16,
}

impl ZipDateTime {
    pub fn from_dos(date: u16, time: u16) -> Self {
        Self { date, time }
    }

    /// Parse modification date to (year, month, day)
    pub fn ymd(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse modification time to (hour, minute, second)
    pub fn hms(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }

    /// Dates outside 1980..=2107 are clamped to the nearest representable one.
    pub fn from_naive(dt: &NaiveDateTime) -> Self {
        match dt.year() {
            ..=1979 => Self::from_dos((1 << 5) | 1, 0),
            2108.. => Self::from_dos((127 << 9) | (12 << 5) | 31, (23 << 11) | (59 << 5) | 29),
            year => {
                let date = (((year - 1980) as u16) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
                let time = ((dt.hour() as u16) << 11)
                    | ((dt.minute() as u16) << 5)
                    | (dt.second().min(59) as u16 / 2);
                Self::from_dos(date, time)
            }
        }
    }

    /// Local wall-clock time of `t`.
    pub fn from_system_time(t: SystemTime) -> Self {
        let local: DateTime<Local> = t.into();
        Self::from_naive(&local.naive_local())
    }

    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }
}
