//! ETFS cluster slot and transaction record layout
//!
//! Every slot in a NAND dump is `DATA_SIZE` bytes of payload followed by a
//! 16-byte little-endian transaction record:
//!
//! | offset | size | field                 |
//! |--------|------|-----------------------|
//! | 0      | 4    | file id               |
//! | 4      | 4    | logical cluster       |
//! | 8      | 2    | cluster count         |
//! | 10     | 1    | transaction area code |
//! | 11     | 1    | data area code        |
//! | 12     | 4    | sequence              |

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;

use crate::error::{EtfsError, Result};

/// Payload bytes per cluster
pub const DATA_SIZE: usize = 0x800;
/// Transaction record bytes per cluster
pub const TRANS_SIZE: usize = 16;
/// Payload plus record
pub const CLUSTER_SIZE: usize = DATA_SIZE + TRANS_SIZE;

/// File id of an erased or never-written slot
pub const UNUSED_FID: u32 = 0xFFFF;
/// Logical cluster value of an erased slot
pub const UNUSED_CLUSTER: u32 = 0x00FF_FFFF;
/// Status bits of an area code byte
pub const AREA_CODE_MASK: u8 = 0x0F;

/// Device-reported health of a transaction or data area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AreaCode {
    Ok,
    EccCorrected,
    Erased,
    Blank,
    CrcError,
    DeviceError,
    BadBlock,
    Unknown(u8),
}

impl AreaCode {
    pub fn from_raw(raw: u8) -> Self {
        match raw & AREA_CODE_MASK {
            0 => AreaCode::Ok,
            1 => AreaCode::EccCorrected,
            2 => AreaCode::Erased,
            3 => AreaCode::Blank,
            5 => AreaCode::CrcError,
            6 => AreaCode::DeviceError,
            7 => AreaCode::BadBlock,
            other => AreaCode::Unknown(other),
        }
    }

    /// Readable as written, possibly after ECC correction
    pub fn is_valid(&self) -> bool {
        matches!(self, AreaCode::Ok | AreaCode::EccCorrected)
    }
}

impl fmt::Display for AreaCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AreaCode::Ok => write!(f, "ok"),
            AreaCode::EccCorrected => write!(f, "ecc-corrected"),
            AreaCode::Erased => write!(f, "erased"),
            AreaCode::Blank => write!(f, "blank"),
            AreaCode::CrcError => write!(f, "crc-error"),
            AreaCode::DeviceError => write!(f, "device-error"),
            AreaCode::BadBlock => write!(f, "bad-block"),
            AreaCode::Unknown(code) => write!(f, "unknown({})", code),
        }
    }
}

/// One logged write of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub file_id: u32,
    pub logical_cluster: u32,
    pub cluster_count: u16,
    pub transaction_area_code: u8,
    pub data_area_code: u8,
    pub sequence: u32,
}

impl TransactionRecord {
    /// Decode a record from exactly `TRANS_SIZE` bytes found at `offset`
    pub fn parse(data: &[u8], offset: u64) -> Result<Self> {
        if data.len() != TRANS_SIZE {
            return Err(EtfsError::decode(
                offset,
                format!("transaction record is {} bytes, expected {}", data.len(), TRANS_SIZE),
            ));
        }

        let mut cursor = Cursor::new(data);
        let short = |e: std::io::Error| EtfsError::decode(offset, e.to_string());

        Ok(TransactionRecord {
            file_id: cursor.read_u32::<LittleEndian>().map_err(short)?,
            logical_cluster: cursor.read_u32::<LittleEndian>().map_err(short)?,
            cluster_count: cursor.read_u16::<LittleEndian>().map_err(short)?,
            transaction_area_code: cursor.read_u8().map_err(short)?,
            data_area_code: cursor.read_u8().map_err(short)?,
            sequence: cursor.read_u32::<LittleEndian>().map_err(short)?,
        })
    }

    /// Slot was never written or has been erased
    pub fn is_unused(&self) -> bool {
        self.file_id == UNUSED_FID
    }

    pub fn transaction_area(&self) -> AreaCode {
        AreaCode::from_raw(self.transaction_area_code)
    }

    pub fn data_area(&self) -> AreaCode {
        AreaCode::from_raw(self.data_area_code)
    }

    /// Encode back into the on-flash layout
    pub fn to_bytes(&self) -> [u8; TRANS_SIZE] {
        let mut out = [0u8; TRANS_SIZE];
        out[0..4].copy_from_slice(&self.file_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.logical_cluster.to_le_bytes());
        out[8..10].copy_from_slice(&self.cluster_count.to_le_bytes());
        out[10] = self.transaction_area_code;
        out[11] = self.data_area_code;
        out[12..16].copy_from_slice(&self.sequence.to_le_bytes());
        out
    }
}

impl fmt::Display for TransactionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fid:{:08} - cluster:{:08x} - nclusters:{:08} - tacode:{} - dacode:{} - sequence:{:08}",
            self.file_id,
            self.logical_cluster,
            self.cluster_count,
            self.transaction_area(),
            self.data_area(),
            self.sequence
        )
    }
}

/// A full physical slot: payload followed by its record
#[derive(Debug, Clone, Copy)]
pub struct ClusterSlot<'a> {
    pub payload: &'a [u8],
    pub record: TransactionRecord,
}

impl<'a> ClusterSlot<'a> {
    /// Split a `CLUSTER_SIZE` window read at `offset`
    pub fn parse(window: &'a [u8], offset: u64) -> Result<Self> {
        if window.len() != CLUSTER_SIZE {
            return Err(EtfsError::decode(
                offset,
                format!("cluster slot is {} bytes, expected {}", window.len(), CLUSTER_SIZE),
            ));
        }

        let (payload, trailer) = window.split_at(DATA_SIZE);
        let record = TransactionRecord::parse(trailer, offset)?;
        Ok(ClusterSlot { payload, record })
    }
}
