use std::fmt;

use polars::prelude::PolarsError;

/// Raw status code reported by the instrument driver. `0` is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DriverStatus(pub u32);

impl DriverStatus {
    pub const OK: Self = Self(0x0000_0000);
    pub const INVALID_PARAMETER: Self = Self(0x0000_000D);
    pub const CANCELLED: Self = Self(0x0000_0029);
    pub const TRIGGER_TIMEOUT: Self = Self(0x0000_0047);
    pub const NOT_RESPONDING: Self = Self(0x0000_0007);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Turn a status into `Ok(())` or a fault of the given kind.
    pub fn check(self, kind: FaultKind, context: &'static str) -> std::result::Result<(), DeviceFault> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(DeviceFault::new(kind, self, context))
        }
    }
}

impl fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The driver rejected a call or reported a hardware problem.
    Driver,
    /// The capture was stopped before the device reported completion.
    Aborted,
    /// The wait deadline elapsed without the device becoming ready.
    Timeout,
    /// An external cancel token fired during a blocking wait.
    Cancelled,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::Driver => "driver",
            FaultKind::Aborted => "aborted",
            FaultKind::Timeout => "timeout",
            FaultKind::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{} fault during {context} (status {status})", .kind.as_str())]
pub struct DeviceFault {
    pub kind: FaultKind,
    pub status: DriverStatus,
    pub context: &'static str,
}

impl DeviceFault {
    pub fn new(kind: FaultKind, status: DriverStatus, context: &'static str) -> Self {
        Self {
            kind,
            status,
            context,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Capacity exceeded: requested {requested} samples, {available} available")]
    Capacity { requested: u64, available: u64 },

    #[error("Device fault: {0}")]
    Device(#[from] DeviceFault),

    #[error("Operation `{operation}` not allowed while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Failed to build data frame: {0}")]
    Frame(#[from] PolarsError),
}

impl ScopeError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type Result<T> = std::result::Result<T, ScopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_check() {
        assert!(DriverStatus::OK.check(FaultKind::Driver, "run_block").is_ok());

        let fault = DriverStatus::TRIGGER_TIMEOUT
            .check(FaultKind::Driver, "run_block")
            .unwrap_err();
        assert_eq!(fault.status, DriverStatus::TRIGGER_TIMEOUT);
        assert_eq!(fault.kind, FaultKind::Driver);
    }

    #[test]
    fn test_fault_message_carries_raw_status() {
        let fault = DeviceFault::new(FaultKind::Aborted, DriverStatus(0x29), "wait_ready");
        let error: ScopeError = fault.into();
        assert_eq!(
            error.to_string(),
            "Device fault: aborted fault during wait_ready (status 0x00000029)"
        );
    }
}
