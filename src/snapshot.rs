//! Immutable configuration snapshots
//!
//! A snapshot owns one full configuration vector behind an `Arc<[f64]>`.
//! Cloning a snapshot shares the values; there is no way to mutate them,
//! so "editing" a pose always means building a new snapshot.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigurationSnapshot {
    values: Arc<[f64]>,
    /// Trajectory frame the configuration was captured from
    pub frame: Option<usize>,
    /// Capture time in seconds since the UNIX epoch
    pub timestamp: Option<f64>,
}

impl ConfigurationSnapshot {
    /// Snapshot without metadata
    pub fn new(values: impl Into<Arc<[f64]>>) -> Self {
        Self { values: values.into(), frame: None, timestamp: None }
    }

    /// Snapshot of `values` taken at `frame`, stamped with the current time
    pub fn capture(values: &[f64], frame: usize) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .ok();
        Self { values: Arc::from(values), frame: Some(frame), timestamp }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when both snapshots share the same value buffer
    #[cfg(test)]
    pub fn same_buffer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_copies_values() {
        let mut working = vec![0.0, 1.0, 2.0];
        let snap = ConfigurationSnapshot::capture(&working, 7);
        working[1] = 99.0;

        assert_eq!(snap.values(), &[0.0, 1.0, 2.0]);
        assert_eq!(snap.frame, Some(7));
        assert!(snap.timestamp.is_some());
    }

    #[test]
    fn test_clone_shares_buffer() {
        let snap = ConfigurationSnapshot::new(vec![1.0, 2.0]);
        let copy = snap.clone();
        assert!(snap.same_buffer(&copy));

        let rebuilt = ConfigurationSnapshot::new(snap.values().to_vec());
        assert_eq!(rebuilt.values(), snap.values());
        assert!(!snap.same_buffer(&rebuilt));
    }
}
