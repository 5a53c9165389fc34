// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Converts joint torques into motor currents and PWM duties.
use crate::exception::{check_dimension, create_fault, create_input_error};
use crate::model::{Joint, Robot};
use crate::settings::ConversionSettings;
use crate::utils::JointVector;
use crate::PegasusResult;

/// Largest duty the motor drivers accept.
pub const MAX_DUTY: u8 = 255;

/// Motor current in \[A\] needed for a joint torque in \[Nm\].
///
/// `current = torque / (gear_ratio · km · efficiency^exponent)`, the exponent accounts for the
/// losses of every gear stage. The sign of the torque is kept.
pub fn torque_to_current(torque: f64, joint: &Joint, exponent: i32) -> f64 {
    torque / (joint.gear_ratio() * joint.km() * joint.efficiency().powi(exponent))
}

/// Calibrated piecewise linear curve from current magnitude to duty.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentToPwm {
    points: Vec<[f64; 2]>,
}

impl CurrentToPwm {
    /// Creates the curve from `[current, duty]` pairs.
    /// # Errors
    /// * [`InputValidationError`](`crate::exception::PegasusException::InputValidationError`)
    /// unless there are at least two points, currents are non-negative and strictly increasing
    /// and duties are non-decreasing within \[0, 255\].
    pub fn new(points: Vec<[f64; 2]>) -> PegasusResult<Self> {
        if points.len() < 2 {
            return Err(create_input_error("the curve needs at least two points"));
        }
        if points
            .iter()
            .any(|[current, duty]| !current.is_finite() || *current < 0. || !(0. ..=255.).contains(duty))
        {
            return Err(create_input_error(
                "currents have to be non-negative and duties within [0, 255]",
            ));
        }
        if points
            .windows(2)
            .any(|pair| pair[1][0] <= pair[0][0] || pair[1][1] < pair[0][1])
        {
            return Err(create_input_error(
                "currents have to increase strictly and duties must not decrease",
            ));
        }
        Ok(CurrentToPwm { points })
    }

    /// Duty for the magnitude of `current`. Currents beyond the last point follow the last
    /// segment and are clamped to [`MAX_DUTY`]. Zero current always gives a zero duty, even if
    /// the curve starts with a deadband offset.
    pub fn duty(&self, current: f64) -> u8 {
        let current = current.abs();
        if current.is_nan() || current == 0. {
            return 0;
        }
        if current.is_infinite() {
            return MAX_DUTY;
        }
        let first = self.points[0];
        if current <= first[0] {
            return first[1].round() as u8;
        }
        let segment = self
            .points
            .windows(2)
            .find(|pair| current <= pair[1][0])
            .unwrap_or_else(|| &self.points[self.points.len() - 2..]);
        let [c0, d0] = segment[0];
        let [c1, d1] = segment[1];
        let duty = d0 + (current - c0) * (d1 - d0) / (c1 - c0);
        duty.round().clamp(0., MAX_DUTY as f64) as u8
    }
}

/// Sign bit sent with every duty.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    NonPositive = 0,
    Positive = 1,
}

impl Direction {
    /// zero counts as non-positive
    pub fn of(value: f64) -> Self {
        if value > 0. {
            Direction::Positive
        } else {
            Direction::NonPositive
        }
    }
    pub fn bit(self) -> u8 {
        self as u8
    }
}

/// Command for one motor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PwmCommand {
    pub duty: u8,
    pub direction: Direction,
}

impl PwmCommand {
    /// duty with the direction as sign
    pub fn signed(&self) -> i32 {
        match self.direction {
            Direction::Positive => self.duty as i32,
            Direction::NonPositive => -(self.duty as i32),
        }
    }
}

/// Torque to PWM pipeline of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandConverter {
    curve: CurrentToPwm,
    exponent: i32,
}

impl CommandConverter {
    pub fn new(curve: CurrentToPwm, exponent: i32) -> Self {
        CommandConverter { curve, exponent }
    }

    pub fn from_settings(settings: &ConversionSettings) -> PegasusResult<Self> {
        Ok(CommandConverter::new(
            CurrentToPwm::new(settings.current_to_pwm.clone())?,
            settings.gear_stages,
        ))
    }

    /// Converts one joint torque.
    /// # Errors
    /// * [`FaultException`](`crate::exception::PegasusException::FaultException`) if the torque
    /// is not finite. Such a torque means the model or the controller diverged.
    pub fn convert(&self, torque: f64, joint: &Joint) -> PegasusResult<PwmCommand> {
        if !torque.is_finite() {
            return Err(create_fault(format!("non-finite joint torque {}", torque)));
        }
        let current = torque_to_current(torque, joint, self.exponent);
        Ok(PwmCommand {
            duty: self.curve.duty(current),
            direction: Direction::of(torque),
        })
    }

    /// Converts the torques of all joints.
    pub fn convert_all(&self, robot: &Robot, tau: &JointVector) -> PegasusResult<Vec<PwmCommand>> {
        check_dimension(robot.dof(), tau.len())?;
        robot
            .joints()
            .iter()
            .zip(tau.iter())
            .map(|(joint, torque)| self.convert(*torque, joint))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::exception::PegasusException;
    use crate::model::{test_arm, Joint};
    use crate::robot::motor_command::{
        torque_to_current, CommandConverter, CurrentToPwm, Direction, PwmCommand,
    };
    use crate::settings::ConversionSettings;
    use crate::utils::JointVector;

    fn converter() -> CommandConverter {
        CommandConverter::from_settings(&ConversionSettings::default()).unwrap()
    }

    #[test]
    fn current_accounts_for_gear_losses() {
        let joint = Joint::new(100., 0.05, 0.9, None).unwrap();
        assert!((torque_to_current(4.05, &joint, 2) - 1.).abs() < 1e-12);
        assert!((torque_to_current(-5., &joint, 0) + 1.).abs() < 1e-12);
    }

    #[test]
    fn curve_interpolates_and_clamps() {
        let curve = CurrentToPwm::new(vec![[0., 0.], [1., 100.], [2., 200.]]).unwrap();
        assert_eq!(curve.duty(0.), 0);
        assert_eq!(curve.duty(0.5), 50);
        assert_eq!(curve.duty(-1.5), 150);
        assert_eq!(curve.duty(2.5), 250);
        assert_eq!(curve.duty(10.), 255);
        assert_eq!(curve.duty(f64::INFINITY), 255);
    }

    #[test]
    fn curve_is_validated() {
        assert!(CurrentToPwm::new(vec![[0., 0.]]).is_err());
        assert!(CurrentToPwm::new(vec![[0., 0.], [0., 10.]]).is_err());
        assert!(CurrentToPwm::new(vec![[0., 50.], [1., 10.]]).is_err());
        assert!(CurrentToPwm::new(vec![[-1., 0.], [1., 10.]]).is_err());
        assert!(CurrentToPwm::new(vec![[0., 0.], [1., 256.]]).is_err());
    }

    #[test]
    fn duty_is_always_in_range() {
        let converter = converter();
        let joint = Joint::new(100., 0.05, 0.9, None).unwrap();
        let mut torque = -1e6;
        while torque < 1e6 {
            let command = converter.convert(torque, &joint).unwrap();
            assert!(command.signed().abs() <= 255);
            if torque > 0. {
                assert_eq!(command.direction, Direction::Positive);
            } else {
                assert_eq!(command.direction, Direction::NonPositive);
            }
            torque += 997.3;
        }
    }

    #[test]
    fn direction_follows_torque_sign() {
        let converter = converter();
        let joint = Joint::new(10., 0.1, 1., None).unwrap();
        assert_eq!(
            converter.convert(-0.5, &joint).unwrap(),
            PwmCommand {
                duty: 110,
                direction: Direction::NonPositive
            }
        );
        assert_eq!(converter.convert(0.5, &joint).unwrap().signed(), 110);
        assert_eq!(
            converter.convert(0., &joint).unwrap(),
            PwmCommand {
                duty: 0,
                direction: Direction::NonPositive
            }
        );
    }

    #[test]
    fn deadband_curve_keeps_zero_torque_at_rest() {
        let curve = CurrentToPwm::new(vec![[0., 30.], [1., 255.]]).unwrap();
        let converter = CommandConverter::new(curve, 0);
        let joint = Joint::new(10., 0.1, 1., None).unwrap();
        let rest = converter.convert(0., &joint).unwrap();
        assert_eq!(rest.duty, 0);
        assert_eq!(rest.signed(), 0);
        assert_eq!(converter.convert(1e-6, &joint).unwrap().signed(), 30);
        assert_eq!(converter.convert(-1e-6, &joint).unwrap().signed(), -30);
    }

    #[test]
    fn non_finite_torque_is_a_fault() {
        let converter = converter();
        let arm = test_arm(None);
        let tau = JointVector::from_vec(vec![0., f64::NAN, 0., 0., 0.]);
        match converter.convert_all(&arm, &tau) {
            Err(PegasusException::FaultException { .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(converter.convert_all(&arm, &JointVector::zeros(4)).is_err());
        assert_eq!(converter.convert_all(&arm, &JointVector::zeros(5)).unwrap().len(), 5);
    }
}
