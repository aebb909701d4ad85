use serde::{Deserialize, Serialize};
use std::ops::Add;

/// A value as it travels over the wire: an opaque binary blob produced by a
/// [`ValueSerializer`](crate::serialization::ValueSerializer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ValueHolder {
    pub ion_binary: Vec<u8>,
}

impl ValueHolder {
    pub fn new(ion_binary: impl Into<Vec<u8>>) -> Self {
        Self {
            ion_binary: ion_binary.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.ion_binary
    }
}

/// One page of statement results.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub values: Vec<ValueHolder>,
    pub next_page_token: Option<String>,
}

impl Page {
    pub fn new(values: Vec<ValueHolder>, next_page_token: Option<String>) -> Self {
        Self {
            values,
            next_page_token,
        }
    }

    pub fn is_last(&self) -> bool {
        self.next_page_token.is_none()
    }
}

/// IO consumed by the server while serving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IoUsage {
    pub read_ios: u64,
    pub write_ios: u64,
}

impl IoUsage {
    pub fn new(read_ios: u64, write_ios: u64) -> Self {
        Self {
            read_ios,
            write_ios,
        }
    }
}

impl Add for IoUsage {
    type Output = IoUsage;

    fn add(self, rhs: IoUsage) -> IoUsage {
        IoUsage {
            read_ios: self.read_ios.saturating_add(rhs.read_ios),
            write_ios: self.write_ios.saturating_add(rhs.write_ios),
        }
    }
}

/// Server-side processing time for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimingInformation {
    pub processing_time_ms: u64,
}

impl TimingInformation {
    pub fn new(processing_time_ms: u64) -> Self {
        Self { processing_time_ms }
    }
}

impl Add for TimingInformation {
    type Output = TimingInformation;

    fn add(self, rhs: TimingInformation) -> TimingInformation {
        TimingInformation {
            processing_time_ms: self
                .processing_time_ms
                .saturating_add(rhs.processing_time_ms),
        }
    }
}

/// Folds an optional server-reported statistic into an optional accumulator.
///
/// A missing report never erases what was already accumulated.
pub fn accumulate<T: Add<Output = T> + Copy>(acc: Option<T>, next: Option<T>) -> Option<T> {
    match (acc, next) {
        (Some(a), Some(b)) => Some(a + b),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_absent_is_identity() {
        let acc = accumulate(Some(IoUsage::new(3, 1)), None);
        assert_eq!(acc, Some(IoUsage::new(3, 1)));
        assert_eq!(accumulate::<IoUsage>(None, None), None);
        assert_eq!(
            accumulate(None, Some(TimingInformation::new(7))),
            Some(TimingInformation::new(7))
        );
    }

    #[test]
    fn test_accumulate_sums_present_values() {
        let acc = accumulate(Some(IoUsage::new(3, 1)), Some(IoUsage::new(2, 2)));
        assert_eq!(acc, Some(IoUsage::new(5, 3)));
    }
}
