//! Post-update health supervision.
//!
//! A freshly flashed image is not trusted until it proves itself. Two
//! mechanisms guard the device:
//!
//! - The boot-loop breaker runs during [`OtaManager::init`]. It counts boots
//!   while an update awaits validation and rolls back once the count shows
//!   the new image cannot stay up long enough to be validated.
//! - The validation supervisor runs as a task after startup. It waits for
//!   the system to stabilize, probes connectivity and system health, and
//!   either confirms the image or rolls back.
//!
//! Connectivity probes are soft: a broken router must not cost the device a
//! working firmware. The bus, memory and image-structure probes are
//! critical, because failing them means the image itself is suspect.

use embedded_hal_async::delay::DelayNs;
use log::{debug, error, info, warn};

use crate::error::UpdateError;
use crate::persist::StateStore;
use crate::platform::SystemPort;
use crate::slots::{BootSector, SlotStorage};
use crate::source::UpdateSource;
use crate::updater::OtaManager;

/// Boots allowed while an update awaits validation before rollback.
pub(crate) const BOOT_LOOP_THRESHOLD: u32 = 3;

/// Floor on free memory below which the system is considered unhealthy.
pub(crate) const MIN_FREE_MEMORY_BYTES: u32 = 50_000;

/// Settling time before the first validation attempt.
const STABILIZATION_DELAY_MS: u32 = 30_000;

/// Pause between validation attempts.
const ATTEMPT_INTERVAL_MS: u32 = 30_000;

/// Validation attempts before the supervisor gives a verdict.
const MAX_ATTEMPTS: u32 = 3;

/// Verdict of a [`OtaManager::run_boot_validation`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Every check passed; the image is confirmed.
    Validated,
    /// Critical checks passed but connectivity never came up; the image is
    /// confirmed anyway.
    ValidatedDegraded,
    /// Critical checks kept failing; the device rolled back and restarts.
    RolledBack,
    /// No update was awaiting validation.
    NotNeeded,
}

struct HealthReport {
    network: bool,
    broker: bool,
    bus: bool,
    memory: bool,
    descriptor: bool,
}

impl HealthReport {
    fn critical_ok(&self) -> bool {
        self.bus && self.memory && self.descriptor
    }

    fn all_ok(&self) -> bool {
        self.critical_ok() && self.network && self.broker
    }

    fn passed(&self) -> u8 {
        u8::from(self.network)
            + u8::from(self.broker)
            + u8::from(self.bus)
            + u8::from(self.memory)
            + u8::from(self.descriptor)
    }
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
    /// Count this boot and break a boot loop if one is underway.
    ///
    /// Runs before anything else the engine does. The counter only moves
    /// while `pending_verify` is set, so ordinary reboots of a confirmed
    /// image cost nothing.
    pub(crate) async fn boot_loop_guard(&mut self) -> Result<(), UpdateError> {
        let mut record = self.store.get();
        if !record.pending_verify {
            return Ok(());
        }

        record.boot_count += 1;
        self.store.save(record).await?;
        info!(
            "health: boot {} while an update awaits validation",
            record.boot_count
        );

        if record.boot_count > BOOT_LOOP_THRESHOLD {
            error!(
                "health: boot loop detected after {} boots, rolling back",
                record.boot_count
            );
            self.rollback_now().await?;
        }
        Ok(())
    }

    /// Validate the firmware after the first boot of an update.
    ///
    /// Returns immediately when no update is awaiting validation. Otherwise
    /// waits out the stabilization period, then probes up to [`MAX_ATTEMPTS`]
    /// times. A run with all checks green confirms the image on the spot;
    /// the final attempt decides between a degraded confirmation and a
    /// rollback, depending on whether the critical checks pass.
    pub async fn run_boot_validation(&mut self) -> Result<ValidationOutcome, UpdateError> {
        if !self.store.get().pending_verify {
            return Ok(ValidationOutcome::NotNeeded);
        }

        info!("health: validating new firmware in {STABILIZATION_DELAY_MS} ms");
        self.delay.delay_ms(STABILIZATION_DELAY_MS).await;

        let mut attempt = 1u32;
        loop {
            let report = self.run_checks().await;
            info!(
                "health: attempt {attempt}/{MAX_ATTEMPTS}, {} of 5 checks passed",
                report.passed()
            );

            if report.all_ok() {
                self.mark_app_valid().await?;
                return Ok(ValidationOutcome::Validated);
            }

            if attempt >= MAX_ATTEMPTS {
                if report.critical_ok() {
                    warn!("health: confirming new firmware with connectivity still down");
                    self.mark_app_valid().await?;
                    return Ok(ValidationOutcome::ValidatedDegraded);
                }
                error!("health: critical checks failing, rolling back");
                self.rollback_now().await?;
                return Ok(ValidationOutcome::RolledBack);
            }

            warn!("health: checks failing, retry in {ATTEMPT_INTERVAL_MS} ms");
            attempt += 1;
            self.delay.delay_ms(ATTEMPT_INTERVAL_MS).await;
        }
    }

    async fn run_checks(&mut self) -> HealthReport {
        let network = self.system.network_connected().await;
        let broker = self.system.broker_connected().await;
        let bus = self.system.peripheral_bus_ok().await;
        let free = self.system.free_memory_bytes();
        let slot = self.boot.running_slot();
        let descriptor = match self.read_descriptor(slot).await {
            Ok(desc) => desc.matches_magic(),
            Err(_) => false,
        };
        debug!("health: network={network} broker={broker} bus={bus} free={free} descriptor={descriptor}");
        HealthReport {
            network,
            broker,
            bus,
            memory: free > MIN_FREE_MEMORY_BYTES,
            descriptor,
        }
    }
}
