//! Boot sector commitment and rollback.
//!
//! The boot sector is only ever flipped here, and only in two directions:
//! forward to a slot that just passed verification, or back to the previous
//! slot when the new image cannot be trusted. Every flip is paired with an
//! update of the persisted record so the next boot knows what happened.

use embedded_hal_async::delay::DelayNs;
use log::{info, warn};

use crate::config::ROLLBACK_DRAIN_MS;
use crate::entity::BootSlot;
use crate::error::{StateError, UpdateError};
use crate::persist::StateStore;
use crate::platform::SystemPort;
use crate::slots::{BootSector, SlotStorage};
use crate::source::UpdateSource;
use crate::updater::OtaManager;

impl<'s, S, B, P, U, M, D> OtaManager<'s, S, B, P, U, M, D>
where
    S: SlotStorage,
    B: BootSector,
    P: StateStore,
    U: UpdateSource,
    M: SystemPort,
    D: DelayNs,
{
    /// Point the next boot at a freshly verified slot.
    ///
    /// Arms the rollback machinery at the same time: the record is saved
    /// with `pending_verify` set and a zeroed boot counter, so the new image
    /// must prove itself before it becomes permanent.
    pub(crate) async fn commit(&mut self, slot: BootSlot, image_len: u32) -> Result<(), UpdateError> {
        self.boot.write_boot_sector(slot)?;

        let mut record = self.store.get();
        record.pending_verify = true;
        record.boot_count = 0;
        record.set_image_len(slot, image_len);
        self.store.save(record).await?;

        info!("boot: next boot from {}", slot.as_str());
        Ok(())
    }

    /// Confirm the running image as the permanent one.
    ///
    /// Clears the pending flag and the boot counter, which disarms both the
    /// rollback path and the boot-loop breaker. Calling this on an already
    /// confirmed image is a no-op.
    pub async fn mark_app_valid(&mut self) -> Result<(), UpdateError> {
        let mut record = self.store.get();
        if !record.pending_verify {
            info!("boot: running image already confirmed");
            return Ok(());
        }

        record.pending_verify = false;
        record.boot_count = 0;
        self.store.save(record).await?;

        info!("boot: running image confirmed, rollback cancelled");
        Ok(())
    }

    /// Abandon an unconfirmed update and reboot into the previous image.
    ///
    /// Only legal while an update is awaiting validation; a confirmed image
    /// has nothing to roll back to, because the other slot is the upgrade
    /// target and may hold anything.
    pub async fn trigger_rollback(&mut self) -> Result<(), UpdateError> {
        if !self.store.get().pending_verify {
            return Err(StateError::NotPendingVerify.into());
        }
        self.rollback_now().await
    }

    /// Flip back to the previous slot, disarm the record, and restart after
    /// a short drain so the rollback reason makes it out of the log buffer.
    pub(crate) async fn rollback_now(&mut self) -> Result<(), UpdateError> {
        let target = self.boot.running_slot().other();
        warn!("boot: rolling back to {}", target.as_str());

        self.boot.write_boot_sector(target)?;
        let mut record = self.store.get();
        record.pending_verify = false;
        record.boot_count = 0;
        self.store.save(record).await?;

        self.delay.delay_ms(ROLLBACK_DRAIN_MS).await;
        self.system.restart();
        Ok(())
    }
}
