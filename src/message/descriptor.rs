//! descriptor.rs
//! Per-message configuration: identifier, payload mode, transmission period,
//! enabled flag. A descriptor is validated once when it enters the engine and
//! is immutable for the lifetime of any task running it.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::message::frame::CanId;
use crate::message::payload::PayloadMode;

/// Configuration faults, surfaced at registration time and never at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("identifier 0x{raw:X} does not fit the selected frame format")]
    InvalidIdentifier { raw: u32 },
    #[error("payload length {len} exceeds the 8 byte CAN limit")]
    InvalidLength { len: usize },
    #[error("transmission period must be greater than zero")]
    InvalidPeriod,
}

/// Registry key for one managed message, derived from its identifier.
/// Duplicate identifiers are rejected at registration, so the key also
/// guarantees at most one concurrent sender per identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageKey(pub CanId);

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable-per-run configuration for one periodic CAN message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub id: CanId,
    pub payload: PayloadMode,
    /// Interval between successive transmissions. Must be > 0.
    pub period: Duration,
    /// Disabled descriptors stay registered but are never started.
    pub enabled: bool,
}

impl MessageDescriptor {
    pub fn new(
        id: CanId,
        payload: PayloadMode,
        period: Duration,
    ) -> Result<Self, ConfigError> {
        let descriptor = MessageDescriptor {
            id,
            payload,
            period,
            enabled: true,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Key under which the engine registers this descriptor.
    pub fn key(&self) -> MessageKey {
        MessageKey(self.id)
    }

    /// Full configuration check: identifier range, payload length, period.
    /// Fail-fast: a descriptor that does not pass never reaches a task.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.id.validate()?;
        self.payload.validate()?;
        if self.period.is_zero() {
            return Err(ConfigError::InvalidPeriod);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_descriptor_passes() {
        let d = MessageDescriptor::new(
            CanId::Standard(0x123),
            PayloadMode::Fixed(vec![0x11, 0x22]),
            Duration::from_millis(100),
        )
        .unwrap();
        assert!(d.enabled);
        assert_eq!(d.key(), MessageKey(CanId::Standard(0x123)));
    }

    #[test]
    fn zero_period_rejected() {
        let err = MessageDescriptor::new(
            CanId::Standard(0x100),
            PayloadMode::Random { len: 8 },
            Duration::ZERO,
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::InvalidPeriod);
    }

    #[test]
    fn out_of_range_identifier_rejected() {
        let d = MessageDescriptor {
            id: CanId::Standard(0xFFF),
            payload: PayloadMode::Random { len: 1 },
            period: Duration::from_millis(10),
            enabled: true,
        };
        assert_eq!(
            d.validate(),
            Err(ConfigError::InvalidIdentifier { raw: 0xFFF })
        );
    }

    #[test]
    fn oversized_payload_rejected() {
        let d = MessageDescriptor {
            id: CanId::Standard(0x100),
            payload: PayloadMode::Fixed(vec![0; 9]),
            period: Duration::from_millis(10),
            enabled: true,
        };
        assert_eq!(d.validate(), Err(ConfigError::InvalidLength { len: 9 }));
    }
}
