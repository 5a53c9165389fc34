// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the tunable parameters of a control session.
//!
//! All values have defaults, a settings file only needs to contain the values it changes:
//! ```toml
//! dt_pid = 0.005
//! err_theta_hold = 0.02
//!
//! [pid]
//! kp = 4.0
//! ki = 0.5
//! kd = 0.1
//! ```
use crate::exception::PegasusException;
use crate::robot::motor_command::CurrentToPwm;
use crate::robot::pid::PidGains;
use crate::PegasusResult;
use nalgebra::{Matrix3, Matrix6, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Parameters of the virtual mass-spring-damper rendered by impedance control.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(default)]
pub struct ImpedanceParameters {
    /// virtual mass M
    pub mass: f64,
    /// virtual damping B
    pub damping: f64,
    /// stiffness Kx of the position error in \[N/m\]
    pub translational_stiffness: f64,
    /// stiffness Ka of the orientation error in \[Nm/rad\]
    pub rotational_stiffness: f64,
}

impl Default for ImpedanceParameters {
    fn default() -> Self {
        ImpedanceParameters {
            mass: 1.,
            damping: 10.,
            translational_stiffness: 100.,
            rotational_stiffness: 5.,
        }
    }
}

impl ImpedanceParameters {
    /// Returns the mass, damping and stiffness matrices `(M, B, K)` acting on twists and
    /// wrenches with the angular part first.
    pub fn matrices(&self) -> (Matrix6<f64>, Matrix6<f64>, Matrix6<f64>) {
        let mass = Matrix6::identity() * self.mass;
        let damping = Matrix6::identity() * self.damping;
        let mut stiffness: Matrix6<f64> = Matrix6::zeros();
        {
            let mut top_left_corner = stiffness.fixed_view_mut::<3, 3>(0, 0);
            top_left_corner.copy_from(&(Matrix3::identity() * self.rotational_stiffness));
        }
        {
            let mut bottom_right_corner = stiffness.fixed_view_mut::<3, 3>(3, 3);
            bottom_right_corner.copy_from(&(Matrix3::identity() * self.translational_stiffness));
        }
        (mass, damping, stiffness)
    }
}

/// Parameters of the torque to PWM conversion.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ConversionSettings {
    /// exponent of the gear efficiency correction, usually the number of gear stages
    pub gear_stages: i32,
    /// calibrated `[current in A, duty]` pairs with increasing current
    pub current_to_pwm: Vec<[f64; 2]>,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        ConversionSettings {
            gear_stages: 2,
            current_to_pwm: vec![
                [0., 0.],
                [0.1, 40.],
                [0.5, 110.],
                [1.0, 170.],
                [1.5, 220.],
                [2.0, 255.],
            ],
        }
    }
}

/// Timing budgets, limits and gains of a control session. Periods are in seconds.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// period of the input poll
    pub dt_frame: f64,
    /// period of the control law
    pub dt_pid: f64,
    /// period of the serial exchange
    pub dt_comm: f64,
    /// period of the hold stabilization
    pub dt_hold: f64,
    /// per joint tolerance in \[rad\] below which the hold is stable
    pub err_theta_hold: f64,
    /// linear speed ceiling in \[m/s\]
    pub v_max: f64,
    /// angular speed ceiling in \[rad/s\]
    pub w_max: f64,
    /// joint speed step of the manual joint input in \[rad/s\]
    pub j_incr: f64,
    /// linear speed step of the manual task-space input in \[m/s\]
    pub e_incr_lin: f64,
    /// angular speed step of the manual task-space input in \[rad/s\]
    pub e_incr_rot: f64,
    /// time in which position control tries to close the remaining error
    pub dt_pos_config: f64,
    /// tolerance at which position control hands over to the hold
    pub pos_tolerance: f64,
    /// joint damping applied during force control in \[Nms/rad\]
    pub force_damp: f64,
    /// gravity in the space frame
    pub gravity: [f64; 3],
    pub impedance: ImpedanceParameters,
    pub pid: PidGains,
    pub conversion: ConversionSettings,
    pub baud_rate: u32,
    /// number of joint angle snapshots kept
    pub history_size: usize,
    /// number of records kept for fault reports
    pub log_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            dt_frame: 0.033,
            dt_pid: 0.01,
            dt_comm: 0.02,
            dt_hold: 0.01,
            err_theta_hold: 0.01,
            v_max: 0.05,
            w_max: 0.5,
            j_incr: 0.05,
            e_incr_lin: 0.005,
            e_incr_rot: 0.05,
            dt_pos_config: 1.,
            pos_tolerance: 0.02,
            force_damp: 0.5,
            gravity: [0., 0., -9.81],
            impedance: ImpedanceParameters::default(),
            pid: PidGains::default(),
            conversion: ConversionSettings::default(),
            baud_rate: 115_200,
            history_size: 1024,
            log_size: 50,
        }
    }
}

fn config_error<S: ToString>(message: S) -> PegasusException {
    PegasusException::ConfigException {
        message: message.to_string(),
    }
}

impl Settings {
    /// Loads and validates settings from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> PegasusResult<Settings> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            config_error(format!("cannot read settings {}: {}", path.display(), e))
        })?;
        Settings::from_toml_str(&text)
    }

    /// Parses and validates settings in TOML format.
    pub fn from_toml_str(text: &str) -> PegasusResult<Settings> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| config_error(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks that all periods and limits are usable.
    /// # Errors
    /// * [`ConfigException`](`crate::exception::PegasusException::ConfigException`) naming the
    /// first offending value.
    pub fn validate(&self) -> PegasusResult<()> {
        let positive = [
            ("dt_frame", self.dt_frame),
            ("dt_pid", self.dt_pid),
            ("dt_comm", self.dt_comm),
            ("dt_hold", self.dt_hold),
            ("err_theta_hold", self.err_theta_hold),
            ("v_max", self.v_max),
            ("w_max", self.w_max),
            ("dt_pos_config", self.dt_pos_config),
            ("pos_tolerance", self.pos_tolerance),
            ("impedance.mass", self.impedance.mass),
        ];
        for (name, value) in positive.iter() {
            if !(*value > 0. && value.is_finite()) {
                return Err(config_error(format!(
                    "{} has to be positive, got {}",
                    name, value
                )));
            }
        }
        let non_negative = [
            ("j_incr", self.j_incr),
            ("e_incr_lin", self.e_incr_lin),
            ("e_incr_rot", self.e_incr_rot),
            ("force_damp", self.force_damp),
            ("impedance.damping", self.impedance.damping),
            ("impedance.translational_stiffness", self.impedance.translational_stiffness),
            ("impedance.rotational_stiffness", self.impedance.rotational_stiffness),
            ("pid.kp", self.pid.kp),
            ("pid.ki", self.pid.ki),
            ("pid.kd", self.pid.kd),
        ];
        for (name, value) in non_negative.iter() {
            if !(*value >= 0. && value.is_finite()) {
                return Err(config_error(format!(
                    "{} has to be non-negative, got {}",
                    name, value
                )));
            }
        }
        let periods = [
            ("dt_frame", self.dt_frame),
            ("dt_pid", self.dt_pid),
            ("dt_comm", self.dt_comm),
            ("dt_hold", self.dt_hold),
        ];
        for (name, value) in periods.iter() {
            if Duration::try_from_secs_f64(*value).is_err() {
                return Err(config_error(format!("{} is too long, got {}", name, value)));
            }
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            return Err(config_error("gravity has to be finite"));
        }
        if self.history_size < 2 {
            return Err(config_error("history_size has to be at least 2"));
        }
        if self.log_size == 0 {
            return Err(config_error("log_size has to be at least 1"));
        }
        if self.baud_rate == 0 {
            return Err(config_error("baud_rate has to be positive"));
        }
        CurrentToPwm::new(self.conversion.current_to_pwm.clone())
            .map_err(|e| config_error(format!("invalid current_to_pwm curve: {}", e)))?;
        Ok(())
    }

    pub fn gravity_vector(&self) -> Vector3<f64> {
        Vector3::from_column_slice(&self.gravity)
    }

    /// the serial exchange period, also the time the shutdown waits before releasing the port
    pub fn comm_period(&self) -> Duration {
        period(self.dt_comm)
    }
}

/// Converts a period in seconds into a [`Duration`]. Values that are not positive map to zero,
/// values beyond the range of [`Duration`] saturate.
pub fn period(seconds: f64) -> Duration {
    if seconds > 0. && seconds.is_finite() {
        Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
    } else {
        Duration::from_secs(0)
    }
}
