// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains functions for filtering signals with a low-pass filter.

use crate::robot::serial_data::SerialData;
use crate::utils::JointVector;
use std::f64::consts::PI;

/// Maximum cutoff frequency: 1000 Hz
pub static MAX_CUTOFF_FREQUENCY: f64 = 1000.0;
///  Default cutoff frequency of the joint velocity estimate: 10 Hz
pub static DEFAULT_CUTOFF_FREQUENCY: f64 = 10.0;

/// Applies a first-order low-pass filter
///
/// # Arguments
/// * `sample_time` - Sample time constant
/// * `y` - Current value of the signal to be filtered
/// * `y_last` - Value of the signal to be filtered in the previous time step
/// * `cutoff_frequency` - Cutoff frequency of the low-pass filter
/// # Panics
/// This function panics if:
/// * y is infinite or NaN.
/// * y_last is infinite or NaN.
/// * cutoff_frequency is zero, negative, infinite or NaN.
/// * sample_time is negative, infinite or NaN.
/// # Return
/// Filtered value.
pub fn low_pass_filter(sample_time: f64, y: f64, y_last: f64, cutoff_frequency: f64) -> f64 {
    assert!(sample_time.is_sign_positive() && sample_time.is_finite());
    assert!(cutoff_frequency.is_sign_positive() && cutoff_frequency.is_finite());
    assert!(y.is_finite() && y_last.is_finite());
    let gain = sample_time / (sample_time + (1.0 / (2.0 * PI * cutoff_frequency)));
    gain * y + (1. - gain) * y_last
}

/// Joint velocity estimate from the measured angle history.
///
/// The microcontroller only reports angles, differentiating them amplifies quantization noise,
/// so the backward difference of the last two snapshots is low-pass filtered.
#[derive(Debug, Clone)]
pub struct VelocityEstimator {
    cutoff_frequency: f64,
    estimate: JointVector,
    snapshots_seen: usize,
}

impl VelocityEstimator {
    pub fn new(dof: usize, cutoff_frequency: f64) -> Self {
        VelocityEstimator {
            cutoff_frequency: cutoff_frequency.min(MAX_CUTOFF_FREQUENCY),
            estimate: JointVector::zeros(dof),
            snapshots_seen: 0,
        }
    }

    /// Folds in the newest snapshot if one arrived since the last update.
    pub fn update(&mut self, serial: &SerialData) -> &JointVector {
        if serial.snapshots_received() == self.snapshots_seen {
            return &self.estimate;
        }
        self.snapshots_seen = serial.snapshots_received();
        let history = serial.history();
        if history.len() < 2 || serial.snapshots_received() < 2 {
            return &self.estimate;
        }
        let sample_time = history[history.len() - 1].received_at.as_secs_f64()
            - history[history.len() - 2].received_at.as_secs_f64();
        if sample_time <= 0. {
            return &self.estimate;
        }
        let raw = serial.measured_velocity();
        for (estimate, y) in self.estimate.iter_mut().zip(raw.iter()) {
            if !y.is_finite() {
                continue;
            }
            *estimate = low_pass_filter(sample_time, *y, *estimate, self.cutoff_frequency);
        }
        &self.estimate
    }

    pub fn estimate(&self) -> &JointVector {
        &self.estimate
    }

    pub fn reset(&mut self) {
        self.estimate.fill(0.);
    }
}

#[cfg(test)]
mod tests {
    use crate::robot::low_pass_filter::{low_pass_filter, VelocityEstimator};
    use crate::robot::serial_data::SerialData;
    use std::time::Duration;

    #[test]
    fn low_pass_test() {
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 1.0, 100.0) - 1.) < 0.000001);
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 1.0, 500.0) - 1.) < 0.000001);
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 0.0, 100.0) - 0.3859) < 0.0001);
        assert!(f64::abs(low_pass_filter(0.001, 1.0, 0.0, 500.0) - 0.7585) < 0.0001);
    }

    #[test]
    fn estimate_converges_to_constant_velocity() {
        let mut serial = SerialData::new(1, 8);
        let mut estimator = VelocityEstimator::new(1, 10.);
        for i in 1..=200_u64 {
            let t = i as f64 * 0.02;
            serial
                .push_snapshot(vec![0.5 * t, 0.], Duration::from_millis(i * 20))
                .unwrap();
            estimator.update(&serial);
            let previous = estimator.estimate()[0];
            // no new snapshot, no change
            assert_eq!(estimator.update(&serial)[0], previous);
        }
        assert!((estimator.estimate()[0] - 0.5).abs() < 1e-3);
        estimator.reset();
        assert_eq!(estimator.estimate()[0], 0.);
    }

    #[test]
    fn first_snapshot_is_no_motion() {
        let mut serial = SerialData::new(2, 8);
        let mut estimator = VelocityEstimator::new(2, 10.);
        serial
            .push_snapshot(vec![0.8, 0.4, 0.], Duration::from_millis(20))
            .unwrap();
        assert_eq!(estimator.update(&serial).as_slice(), &[0., 0.]);
        serial
            .push_snapshot(vec![0.8, 0.4, 0.], Duration::from_millis(40))
            .unwrap();
        assert_eq!(estimator.update(&serial).as_slice(), &[0., 0.]);
    }
}
