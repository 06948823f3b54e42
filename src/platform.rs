//! Surroundings the engine consumes from the embedding firmware.

/// Ambient health signals of the running system.
#[allow(async_fn_in_trait)]
pub trait HealthProbes {
    /// The device has network connectivity.
    async fn network_connected(&mut self) -> bool;

    /// The uplink to the service broker is established.
    async fn broker_connected(&mut self) -> bool;

    /// Probe the peripheral bus the application depends on.
    async fn peripheral_bus_ok(&mut self) -> bool;

    /// Free memory estimate in bytes.
    fn free_memory_bytes(&mut self) -> u32;
}

/// Millisecond clock for timestamps and rate estimates.
pub trait SystemClock {
    fn now_ms(&self) -> u64;
}

/// Platform restart control.
pub trait SystemReset {
    /// Restart the device. On hardware this does not return; test doubles
    /// record the call and do.
    fn restart(&mut self);
}

/// Everything the engine needs from the platform besides storage and
/// transport, as one injection point.
pub trait SystemPort: HealthProbes + SystemClock + SystemReset {}
