// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the joint space PID controller.
use crate::exception::{check_dimension, create_input_error};
use crate::utils::JointVector;
use crate::PegasusResult;
use serde::{Deserialize, Serialize};

/// Gains shared by all joints.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(default)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        PidGains {
            kp: 2.,
            ki: 0.1,
            kd: 0.05,
        }
    }
}

/// PID controller over one value per joint.
///
/// The integral is accumulated by rectangular integration and the derivative is the backward
/// difference against the previous error. Both persist until [`reset`](`Self::reset`), which
/// has to be called whenever the setpoint jumps.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    integral: JointVector,
    previous_error: Option<JointVector>,
}

impl Pid {
    pub fn new(gains: PidGains, size: usize) -> Self {
        Pid {
            gains,
            integral: JointVector::zeros(size),
            previous_error: None,
        }
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    /// Accumulated `∫e dt`.
    pub fn integral(&self) -> &JointVector {
        &self.integral
    }

    /// Clears the integral and forgets the previous error.
    pub fn reset(&mut self) {
        self.integral.fill(0.);
        self.previous_error = None;
    }

    /// Computes `Kp·e + Ki·∫e dt + Kd·de/dt` with `e = desired - current`.
    ///
    /// The first call after [`reset`](`Self::reset`) has no derivative contribution.
    /// # Errors
    /// * [`DimensionMismatch`](`crate::exception::PegasusException::DimensionMismatch`) if
    /// `desired` or `current` does not match the size of the controller.
    /// * [`InputValidationError`](`crate::exception::PegasusException::InputValidationError`) if
    /// `dt` is not positive.
    pub fn execute(
        &mut self,
        desired: &JointVector,
        current: &JointVector,
        dt: f64,
    ) -> PegasusResult<JointVector> {
        check_dimension(self.integral.len(), desired.len())?;
        check_dimension(self.integral.len(), current.len())?;
        if !(dt > 0. && dt.is_finite()) {
            return Err(create_input_error(format!(
                "PID time step has to be positive, got {}",
                dt
            )));
        }
        let error = desired - current;
        self.integral += &error * dt;
        let derivative = match &self.previous_error {
            Some(previous) => (&error - previous) / dt,
            None => JointVector::zeros(error.len()),
        };
        let output = &error * self.gains.kp + &self.integral * self.gains.ki + derivative * self.gains.kd;
        self.previous_error = Some(error);
        Ok(output)
    }
}
