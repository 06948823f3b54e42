//! Persisted update record.
//!
//! Everything the engine must remember across reboots lives in one small
//! record behind a magic header: the boot counter, the pending-verify flag,
//! the per-slot image lengths, and the preferred distribution source.
//! Storage that does not carry the header (first boot, foreign data) decodes
//! to the defaults, so factory firmware starts with a clean slate.

use bytemuck::{Pod, Zeroable};
use log::warn;

use crate::entity::{BootSlot, SourceId};
use crate::error::StorageError;

const RECORD_MAGIC: u16 = 0xB007;
const RECORD_MAGIC_SIZE: usize = RECORD_MAGIC.to_le_bytes().len();

/// Serialized size of the record, magic header included.
pub const RECORD_SIZE: usize = RECORD_MAGIC_SIZE + core::mem::size_of::<PackedRecord>();

/// Fixed-size backing store for the update record.
///
/// Implementations write the buffer to power-loss-safe storage; the engine
/// does not care whether that is a flash page or a key-value blob.
#[allow(async_fn_in_trait)]
pub trait StateStore {
    async fn read(&mut self, buffer: &mut [u8; RECORD_SIZE]) -> Result<(), StorageError>;
    async fn write(&mut self, buffer: &[u8; RECORD_SIZE]) -> Result<(), StorageError>;
}

/// State the engine carries across reboots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateRecord {
    /// Boots since the last flash while the image was awaiting validation.
    pub boot_count: u32,
    /// Length of the image flashed into each slot; 0 means unknown.
    pub image_len: [u32; 2],
    /// The running slot has not been confirmed healthy since its last flash.
    pub pending_verify: bool,
    /// Preferred distribution source.
    pub source: SourceId,
}

impl UpdateRecord {
    pub const fn new() -> Self {
        Self {
            boot_count: 0,
            image_len: [0; 2],
            pending_verify: false,
            source: SourceId::Primary,
        }
    }

    pub fn image_len_of(&self, slot: BootSlot) -> u32 {
        self.image_len[slot.index()]
    }

    pub fn set_image_len(&mut self, slot: BootSlot, len: u32) {
        self.image_len[slot.index()] = len;
    }
}

impl Default for UpdateRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Zeroable, Pod)]
#[repr(C)]
struct PackedRecord {
    boot_count: u32,
    image_len: [u32; 2],
    pending_verify: u8,
    source: u8,
    _padding: [u8; 2],
}

impl From<UpdateRecord> for PackedRecord {
    fn from(record: UpdateRecord) -> Self {
        Self {
            boot_count: record.boot_count,
            image_len: record.image_len,
            pending_verify: u8::from(record.pending_verify),
            source: record.source.as_u8(),
            _padding: [0; 2],
        }
    }
}

impl From<PackedRecord> for UpdateRecord {
    fn from(packed: PackedRecord) -> Self {
        Self {
            boot_count: packed.boot_count,
            image_len: packed.image_len,
            pending_verify: packed.pending_verify != 0,
            source: SourceId::from_u8(packed.source).unwrap_or(SourceId::Primary),
        }
    }
}

/// Cached view of the stored record over a [`StateStore`] driver.
pub(crate) struct PersistentState<S> {
    driver: S,
    record: UpdateRecord,
}

impl<S: StateStore> PersistentState<S> {
    /// Read the record from storage. Missing or foreign content falls back
    /// to the defaults; only a failing driver is an error.
    pub(crate) async fn load(mut driver: S) -> Result<Self, StorageError> {
        let mut buffer = [0u8; RECORD_SIZE];
        driver.read(&mut buffer).await?;

        let magic = u16::from_le_bytes([buffer[0], buffer[1]]);
        let record = if magic == RECORD_MAGIC {
            match bytemuck::try_pod_read_unaligned::<PackedRecord>(&buffer[RECORD_MAGIC_SIZE..]) {
                Ok(packed) => packed.into(),
                Err(_) => UpdateRecord::new(),
            }
        } else {
            warn!("boot: no update record in storage, starting fresh");
            UpdateRecord::new()
        };

        Ok(Self { driver, record })
    }

    pub(crate) fn get(&self) -> UpdateRecord {
        self.record
    }

    pub(crate) async fn save(&mut self, record: UpdateRecord) -> Result<(), StorageError> {
        let mut buffer = [0u8; RECORD_SIZE];
        buffer[..RECORD_MAGIC_SIZE].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        let packed = PackedRecord::from(record);
        buffer[RECORD_MAGIC_SIZE..].copy_from_slice(bytemuck::bytes_of(&packed));

        self.driver.write(&buffer).await?;
        self.record = record;
        Ok(())
    }
}
