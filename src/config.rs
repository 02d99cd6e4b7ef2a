//! Tunables and validation for the kit.
//!
//! One flat struct of limits consumed by the port, the name registry, and
//! the heap area provider. Defaults match the fixed-record layout the rest
//! of the crate is written against; `validate` enforces the guardrail
//! invariants before a custom set of tunables is accepted.

use core::fmt;

/// Limits for ports, named instances, and the in-process area provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tunables {
    /// Fixed payload capacity of one port record, in bytes.
    pub max_record_bytes: usize,
    /// Upper bound on a port's queue capacity.
    pub max_queue_capacity: usize,
    /// Upper bound on the length of an instance name.
    pub max_name_len: usize,
    /// Total byte budget of the in-process area provider.
    pub area_quota_bytes: usize,
}

impl Tunables {
    /// Validates the guardrail invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> core::result::Result<(), ConfigError> {
        if self.max_record_bytes == 0 {
            return Err(ConfigError::ZeroRecordBytes);
        }
        if self.max_queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.max_name_len == 0 {
            return Err(ConfigError::ZeroNameLen);
        }
        if self.area_quota_bytes < self.max_record_bytes {
            return Err(ConfigError::QuotaBelowRecord);
        }
        Ok(())
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_record_bytes: 256,
            max_queue_capacity: 4096,
            max_name_len: 32,
            area_quota_bytes: 16 * 1024 * 1024,
        }
    }
}

/// A violated tunable invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_record_bytes` must be non-zero.
    ZeroRecordBytes,
    /// `max_queue_capacity` must be non-zero.
    ZeroQueueCapacity,
    /// `max_name_len` must be non-zero.
    ZeroNameLen,
    /// `area_quota_bytes` must hold at least one record.
    QuotaBelowRecord,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroRecordBytes => write!(f, "max_record_bytes must be non-zero"),
            Self::ZeroQueueCapacity => write!(f, "max_queue_capacity must be non-zero"),
            Self::ZeroNameLen => write!(f, "max_name_len must be non-zero"),
            Self::QuotaBelowRecord => {
                write!(f, "area_quota_bytes smaller than one record")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
