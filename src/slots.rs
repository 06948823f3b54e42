//! Slot storage and boot pointer ports.
//!
//! [`SlotStorage`] is the byte-level view of the two application partitions;
//! [`BootSector`] is the persistent pointer the boot ROM consults. The
//! engine only ever writes to the slot it is not running from.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::entity::BootSlot;
use crate::error::StorageError;

/// Byte access to the two application partitions.
///
/// `write` is always called with a 4-byte aligned offset and length; the
/// transfer pipeline buffers stragglers so implementations can rely on it.
#[allow(async_fn_in_trait)]
pub trait SlotStorage {
    /// Usable size of the slot in bytes. Zero means the partition table does
    /// not provide this slot.
    fn capacity(&self, slot: BootSlot) -> u32;

    /// Erase at least the first `len` bytes of the slot.
    async fn erase(&mut self, slot: BootSlot, len: u32) -> Result<(), StorageError>;

    async fn write(&mut self, slot: BootSlot, offset: u32, data: &[u8])
    -> Result<(), StorageError>;

    async fn read(&mut self, slot: BootSlot, offset: u32, buf: &mut [u8])
    -> Result<(), StorageError>;
}

/// The persistent boot pointer.
pub trait BootSector {
    /// Slot the current image is executing from.
    fn running_slot(&self) -> BootSlot;

    /// Read the slot the device will boot from next.
    fn read_boot_sector(&mut self) -> Result<BootSlot, StorageError>;

    /// Point the next boot at `slot`.
    fn write_boot_sector(&mut self, slot: BootSlot) -> Result<(), StorageError>;
}

/// Partition window of one slot on the backing flash.
#[derive(Debug, Clone, Copy)]
pub struct SlotRegion {
    pub offset: u32,
    pub len: u32,
}

/// [`SlotStorage`] over two partition windows of a single NOR flash device.
pub struct NorFlashSlots<F> {
    flash: F,
    regions: [SlotRegion; 2],
}

impl<F> NorFlashSlots<F>
where
    F: ReadNorFlash + NorFlash,
{
    pub fn new(flash: F, ota0: SlotRegion, ota1: SlotRegion) -> Self {
        Self {
            flash,
            regions: [ota0, ota1],
        }
    }

    fn region(&self, slot: BootSlot) -> SlotRegion {
        self.regions[slot.index()]
    }

    /// Absolute flash address of `offset` within the slot, bounds-checked.
    fn address(&self, slot: BootSlot, offset: u32, len: usize) -> Option<u32> {
        let region = self.region(slot);
        let end = offset.checked_add(u32::try_from(len).ok()?)?;
        if end > region.len {
            return None;
        }
        Some(region.offset + offset)
    }
}

impl<F> SlotStorage for NorFlashSlots<F>
where
    F: ReadNorFlash + NorFlash,
{
    fn capacity(&self, slot: BootSlot) -> u32 {
        self.region(slot).len
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn erase(&mut self, slot: BootSlot, len: u32) -> Result<(), StorageError> {
        let region = self.region(slot);
        let sector = F::ERASE_SIZE as u32;
        // NOR flash erases whole sectors (sets bits to 1), so round the
        // request up and cap it at the partition window.
        let rounded = (len.saturating_add(sector - 1) / sector * sector).min(region.len);
        self.flash
            .erase(region.offset, region.offset + rounded)
            .map_err(|_| StorageError::Erase)
    }

    async fn write(&mut self, slot: BootSlot, offset: u32, data: &[u8])
    -> Result<(), StorageError> {
        let address = self
            .address(slot, offset, data.len())
            .ok_or(StorageError::Write)?;
        self.flash.write(address, data).map_err(|_| StorageError::Write)
    }

    async fn read(&mut self, slot: BootSlot, offset: u32, buf: &mut [u8])
    -> Result<(), StorageError> {
        let address = self
            .address(slot, offset, buf.len())
            .ok_or(StorageError::Read)?;
        self.flash.read(address, buf).map_err(|_| StorageError::Read)
    }
}
