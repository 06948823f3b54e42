//! Update engine front door.
//!
//! [`OtaManager`] owns the hardware ports and drives a whole update run:
//! resolve the manifest, stream the image into the standby slot, verify it,
//! flip the boot sector and restart. Progress is mirrored into a
//! [`SharedSession`] so other tasks can watch or cancel without holding the
//! manager itself.

use embassy_futures::select::{Either, select};
use embedded_hal_async::delay::DelayNs;
use heapless::String;
use log::{info, warn};

use crate::config::{REBOOT_DELAY_MS, SourceEndpoints, UpdateConfig};
use crate::digest::slot_digest_hex;
use crate::entity::{BootSlot, SourceId};
use crate::error::{NetworkError, StateError, StorageError, StructuralError, UpdateError};
use crate::health::MIN_FREE_MEMORY_BYTES;
use crate::image::{APP_DESC_SIZE, AppDescriptor};
use crate::manifest::{DIGEST_HEX_LEN, FirmwareManifest, RunningFirmwareInfo, short_hash_of};
use crate::persist::{PersistentState, StateStore};
use crate::platform::SystemPort;
use crate::session::{SharedSession, UpdateSession, UpdateState};
use crate::slots::{BootSector, SlotStorage};
use crate::source::{CheckOutcome, UpdateSource, is_update_available, resolve_manifest};
use crate::transfer::{TransferOutcome, run_transfer};
use crate::verify::verify_slot;

/// How a completed [`OtaManager::run_update`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New firmware was flashed and committed to the standby slot.
    Completed,
    /// The published release matches the running firmware.
    UpToDate,
    /// The session was cancelled while downloading.
    Cancelled,
}

/// Firmware update engine for a two-slot device.
///
/// One instance owns the slot storage, the boot sector, the persisted update
/// record and the transport. All timing goes through the injected clock and
/// delay, and restarts go through the system port, so the whole engine can be
/// exercised on the host.
pub struct OtaManager<'s, S, B, P, U, M, D>
where
    S: SlotStorage,
    B: BootSector,
    P: StateStore,
    U: UpdateSource,
    M: SystemPort,
    D: DelayNs,
{
    pub(crate) session: &'s SharedSession,
    pub(crate) endpoints: SourceEndpoints,
    pub(crate) slots: S,
    pub(crate) boot: B,
    pub(crate) store: PersistentState<P>,
    pub(crate) source: U,
    pub(crate) system: M,
    pub(crate) delay: D,
}

impl<'s, S, B, P, U, M, D> OtaManager<'s, S, B, P, U, M, D>
where
    S: SlotStorage,
    B: BootSector,
    P: StateStore,
    U: UpdateSource,
    M: SystemPort,
    D: DelayNs,
{
    /// Bring the update engine up.
    ///
    /// Loads the persisted update record and runs the boot-loop breaker: a
    /// device that keeps resetting while an update awaits validation is sent
    /// back to the previous image from here, before any other code gets a
    /// chance to crash it again.
    #[allow(clippy::too_many_arguments)]
    pub async fn init(
        session: &'s SharedSession,
        endpoints: SourceEndpoints,
        slots: S,
        boot: B,
        store: P,
        source: U,
        system: M,
        delay: D,
    ) -> Result<Self, UpdateError> {
        let running = boot.running_slot();
        if slots.capacity(running) == 0 || slots.capacity(running.other()) == 0 {
            return Err(StorageError::NoUpdateSlot.into());
        }

        let store = PersistentState::load(store).await?;
        let mut manager = Self {
            session,
            endpoints,
            slots,
            boot,
            store,
            source,
            system,
            delay,
        };

        match manager.read_descriptor(running).await {
            Ok(desc) if desc.matches_magic() => info!(
                "ota: running {} built {} from {}",
                desc.version_str(),
                desc.date_str(),
                running.as_str()
            ),
            _ => warn!(
                "ota: no app descriptor in running slot {}",
                running.as_str()
            ),
        }

        manager.boot_loop_guard().await?;
        Ok(manager)
    }

    /// Compare the published release against the running firmware.
    ///
    /// Resolves the manifest with source failover and reports whether an
    /// update is worth downloading. Refused while a session is active.
    pub async fn check_for_update(&mut self) -> Result<CheckOutcome, UpdateError> {
        if !self.system.network_connected().await {
            return Err(NetworkError::Unreachable.into());
        }
        if !self.session.try_begin(self.system.now_ms(), None) {
            return Err(StateError::AlreadyInProgress.into());
        }

        info!("ota: checking for updates");
        match self.resolve_and_compare(None).await {
            Ok((manifest, _, available)) => {
                self.session.reset_idle();
                if available {
                    Ok(CheckOutcome::UpdateAvailable(manifest))
                } else {
                    info!("ota: firmware is up to date");
                    Ok(CheckOutcome::UpToDate)
                }
            }
            Err(error) => Err(self.session.fail(error)),
        }
    }

    /// Download, verify and commit the published release.
    ///
    /// The happy path walks the session through checking, downloading,
    /// verifying and flashing, then restarts into the new image when
    /// `config.auto_reboot` is set. Any failure parks the session in the
    /// failed state with the error attached; the boot sector is only touched
    /// after the image has been verified, so a failed run never leaves the
    /// device pointed at a half-written slot.
    pub async fn run_update(&mut self, config: UpdateConfig) -> Result<UpdateOutcome, UpdateError> {
        if !self.system.network_connected().await {
            return Err(NetworkError::Unreachable.into());
        }
        if self.system.free_memory_bytes() < MIN_FREE_MEMORY_BYTES {
            return Err(StateError::LowMemory.into());
        }
        if !self
            .session
            .try_begin(self.system.now_ms(), config.progress_callback)
        {
            warn!("ota: update already in progress");
            return Err(StateError::AlreadyInProgress.into());
        }

        let (manifest, source_id) = if config.skip_version_check {
            info!("ota: skipping version check");
            (None, self.store.get().source)
        } else {
            match self.resolve_and_compare(config.manifest_url).await {
                Ok((manifest, served_by, true)) => (Some(manifest), served_by),
                Ok((_, _, false)) => {
                    info!("ota: firmware is up to date");
                    self.session.reset_idle();
                    return Ok(UpdateOutcome::UpToDate);
                }
                Err(error) => return Err(self.session.fail(error)),
            }
        };

        let expected_digest: String<DIGEST_HEX_LEN> = manifest
            .as_ref()
            .map(|m| m.digest_hex.clone())
            .unwrap_or_default();
        let fallback_total = manifest.as_ref().map_or(0, |m| m.size_bytes);
        if let Some(manifest) = &manifest {
            self.session.set_expected_digest(&manifest.digest_hex);
            info!(
                "ota: downloading {} ({} bytes)",
                manifest.version, manifest.size_bytes
            );
        }

        let url = config
            .firmware_url
            .unwrap_or(self.endpoints.get(source_id).firmware_url);
        let standby = self.boot.running_slot().other();

        self.session.set_state(UpdateState::Downloading);
        let session = self.session;
        let OtaManager {
            slots,
            source,
            delay,
            ..
        } = self;
        let work = async {
            let mut stream = source.open_image(url).await?;
            match run_transfer(slots, standby, &mut stream, session, fallback_total).await? {
                TransferOutcome::Cancelled => Ok(TransferOutcome::Cancelled),
                TransferOutcome::Complete { bytes } => {
                    session.set_state(UpdateState::Verifying);
                    verify_slot(slots, standby, bytes, &expected_digest).await?;
                    Ok(TransferOutcome::Complete { bytes })
                }
            }
        };
        let outcome = match select(work, delay.delay_ms(config.timeout_ms)).await {
            Either::First(outcome) => outcome,
            Either::Second(()) => Err(NetworkError::Timeout.into()),
        };

        let bytes = match outcome {
            Ok(TransferOutcome::Complete { bytes }) => bytes,
            Ok(TransferOutcome::Cancelled) => {
                info!("ota: update cancelled");
                self.session.reset_idle();
                return Ok(UpdateOutcome::Cancelled);
            }
            Err(error) => return Err(self.session.fail(error)),
        };

        self.session.set_state(UpdateState::Flashing);
        if let Err(error) = self.commit(standby, bytes).await {
            return Err(self.session.fail(error));
        }

        self.session.set_state(UpdateState::Complete);
        let elapsed = self.session.snapshot().elapsed_ms(self.system.now_ms());
        info!("ota: update complete, {bytes} bytes in {elapsed} ms");

        if config.auto_reboot {
            info!("ota: restarting in {REBOOT_DELAY_MS} ms");
            self.delay.delay_ms(REBOOT_DELAY_MS).await;
            self.system.restart();
        }
        Ok(UpdateOutcome::Completed)
    }

    /// Ask a running download to stop at the next chunk boundary.
    pub fn cancel_update(&self) -> Result<(), UpdateError> {
        self.session.cancel()
    }

    /// Describe the firmware the device is currently running.
    ///
    /// The version and build date come from the descriptor embedded in the
    /// image; the digest is recomputed from flash when the image length is
    /// known, which is what lets a check pair the running build with a
    /// published one even across version strings.
    pub async fn running_info(&mut self) -> Result<RunningFirmwareInfo, UpdateError> {
        let slot = self.boot.running_slot();
        let descriptor = self.read_descriptor(slot).await?;
        let image_len = self.store.get().image_len_of(slot);
        let (digest_hex, short_hash) = if image_len > 0 {
            let digest = slot_digest_hex(&mut self.slots, slot, image_len).await?;
            let short = short_hash_of(&digest);
            (digest, short)
        } else {
            (String::new(), String::new())
        };
        Ok(RunningFirmwareInfo {
            version: descriptor.version_str(),
            build_date: descriptor.date_str(),
            platform_version: descriptor.platform_str(),
            size_bytes: image_len,
            digest_hex,
            short_hash,
            slot,
        })
    }

    /// Snapshot of the session state for status reporting.
    pub fn progress(&self) -> UpdateSession {
        self.session.snapshot()
    }

    /// Whether a new session could start right now.
    pub fn is_available(&self) -> bool {
        self.session.state().can_begin()
    }

    /// The slot the device booted from.
    pub fn running_slot(&self) -> BootSlot {
        self.boot.running_slot()
    }

    /// Consecutive boots seen while an update awaited validation.
    pub fn boot_count(&self) -> u32 {
        self.store.get().boot_count
    }

    /// True between flashing an update and confirming it healthy.
    pub fn is_first_boot_after_update(&self) -> bool {
        self.store.get().pending_verify
    }

    /// The mirror tried first when resolving a manifest.
    pub fn source_preference(&self) -> SourceId {
        self.store.get().source
    }

    /// Persist a new preferred mirror. Takes effect on the next check.
    pub async fn set_source_preference(&mut self, source: SourceId) -> Result<(), UpdateError> {
        let mut record = self.store.get();
        record.source = source;
        self.store.save(record).await?;
        info!("ota: preferred source set to {}", source.as_str());
        Ok(())
    }

    /// The shared session handle, for wiring up monitors.
    pub fn session(&self) -> &'s SharedSession {
        self.session
    }

    async fn resolve_and_compare(
        &mut self,
        override_url: Option<&str>,
    ) -> Result<(FirmwareManifest, SourceId, bool), UpdateError> {
        let preferred = self.store.get().source;
        let endpoints = self.endpoints;
        let OtaManager { source, delay, .. } = self;
        let (manifest, served_by) =
            resolve_manifest(source, delay, &endpoints, preferred, override_url).await?;
        let running = self.running_info().await?;
        let available = is_update_available(&running, &manifest);
        Ok((manifest, served_by, available))
    }

    pub(crate) async fn read_descriptor(
        &mut self,
        slot: BootSlot,
    ) -> Result<AppDescriptor, UpdateError> {
        let mut buf = [0u8; APP_DESC_SIZE];
        self.slots.read(slot, 0, &mut buf).await?;
        AppDescriptor::parse(&buf).ok_or_else(|| StructuralError::Truncated.into())
    }
}
