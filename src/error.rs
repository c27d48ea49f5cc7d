use thiserror::Error;

/// Core error taxonomy. Only `Fatal` ends the process; everything else is
/// logged and absorbed so the HUD keeps rendering with whatever data it has.
#[derive(Debug, Error)]
pub enum HudError {
    /// A store setter rejected an out-of-domain value. The offending update
    /// is dropped and the store is unchanged.
    #[error("{field} out of range: {value}")]
    InvalidRange { field: &'static str, value: f64 },

    /// A calibration step saw zero or more than one new interface.
    #[error("calibration ambiguous: expected exactly one new interface, found {found}")]
    CalibrationAmbiguous { found: usize },

    /// The persisted calibration is absent or unreadable.
    #[error("no usable calibration: {0}")]
    NoCalibration(String),

    /// Unrecoverable startup failure; the process exits non-zero.
    #[error("{0}")]
    Fatal(String),
}

/// Failure classes for one producer iteration, consumed by the error barrier
/// in each producer loop.
#[derive(Debug, Error)]
pub enum ProducerError {
    /// This iteration failed; the loop logs it and tries again.
    #[error("transient: {0}")]
    Transient(#[from] anyhow::Error),

    /// The backing hardware is permanently gone; the producer exits cleanly
    /// and its data family stays at the last written value.
    #[error("terminal: {0}")]
    Terminal(anyhow::Error),
}
