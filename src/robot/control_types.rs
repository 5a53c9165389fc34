// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the control objectives a session can pursue and the states it passes through.
use crate::exception::{check_dimension, create_input_error, PegasusException};
use crate::model::kinematics::fk_space;
use crate::model::Robot;
use crate::settings::ImpedanceParameters;
use crate::utils::{is_homogeneous_transformation, JointVector, Pose, Wrench};
use crate::PegasusResult;
use nalgebra::Matrix4;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Used to decide whether to enforce realtime mode for the control loop thread.
/// see [`ArmSession`](`crate::ArmSession`)
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum RealtimeConfig {
    Enforce,
    Ignore,
}

/// Desired end configuration, either in joint space or as an end effector pose.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionTarget {
    /// joint angles in \[rad\]
    Joint(JointVector),
    /// end effector pose in the space frame
    Pose(Pose),
}

impl PositionTarget {
    /// Checks that the target fits the robot.
    /// # Errors
    /// * [`DimensionMismatch`](`crate::exception::PegasusException::DimensionMismatch`) if a
    /// joint target does not have one angle per joint.
    /// * [`InputValidationError`](`crate::exception::PegasusException::InputValidationError`) if
    /// a value is not finite or a pose is not a homogeneous transformation.
    pub fn validate(&self, robot: &Robot) -> PegasusResult<()> {
        match self {
            PositionTarget::Joint(theta) => {
                check_dimension(robot.dof(), theta.len())?;
                if theta.iter().any(|x| !x.is_finite()) {
                    return Err(create_input_error("joint angles have to be finite"));
                }
            }
            PositionTarget::Pose(pose) => {
                if !is_homogeneous_transformation(pose) {
                    return Err(create_input_error(
                        "target pose is not a homogeneous transformation",
                    ));
                }
            }
        }
        Ok(())
    }

    /// The end effector pose of this target.
    pub fn pose(&self, robot: &Robot) -> PegasusResult<Pose> {
        match self {
            PositionTarget::Joint(theta) => fk_space(robot.tsb_home(), robot.screw_axes(), theta),
            PositionTarget::Pose(pose) => Ok(*pose),
        }
    }
}

fn parse_numbers(text: &str) -> PegasusResult<Vec<f64>> {
    text.split(',')
        .map(|field| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| create_input_error(format!("{:?} is not a number", field.trim())))
        })
        .collect()
}

/// Parses `[a, b, …]` as joint angles in units of π rad, or `[[…], […], […], […]]` as a
/// row-major 4x4 pose.
impl FromStr for PositionTarget {
    type Err = PegasusException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(body) = text.strip_prefix("[[").and_then(|t| t.strip_suffix("]]")) {
            let rows: Vec<&str> = body.split("],[").collect();
            if rows.len() != 4 {
                return Err(create_input_error(format!(
                    "a pose needs 4 rows, got {}",
                    rows.len()
                )));
            }
            let mut pose = Matrix4::zeros();
            for (r, row) in rows.iter().enumerate() {
                let values = parse_numbers(row)?;
                check_dimension(4, values.len())?;
                for (c, value) in values.iter().enumerate() {
                    pose[(r, c)] = *value;
                }
            }
            Ok(PositionTarget::Pose(pose))
        } else if let Some(body) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            let angles = parse_numbers(body)?;
            Ok(PositionTarget::Joint(JointVector::from_iterator(
                angles.len(),
                angles.into_iter().map(|a| a * PI),
            )))
        } else {
            Err(create_input_error(
                "expected [a, b, …] in pi rad or a 4x4 matrix [[…], […], […], […]]",
            ))
        }
    }
}

/// Space in which velocity control takes its commands.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VelocitySpace {
    Joint,
    EndEffector,
}

impl FromStr for VelocitySpace {
    type Err = PegasusException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "joint" => Ok(VelocitySpace::Joint),
            "end-effector" => Ok(VelocitySpace::EndEffector),
            other => Err(create_input_error(format!(
                "unknown velocity space {:?}, expected joint or end-effector",
                other
            ))),
        }
    }
}

/// The four control methods a user can select.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlMethod {
    Position,
    Velocity,
    Force,
    Impedance,
}

impl FromStr for ControlMethod {
    type Err = PegasusException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pos" | "position" => Ok(ControlMethod::Position),
            "vel" | "velocity" => Ok(ControlMethod::Velocity),
            "force" => Ok(ControlMethod::Force),
            "imp" | "impedance" => Ok(ControlMethod::Impedance),
            other => Err(create_input_error(format!(
                "unknown control method {:?}, expected pos, vel, force or imp",
                other
            ))),
        }
    }
}

/// Wrenches the end effector should apply, one every `dt_wrench` seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceProfile {
    wrenches: Vec<Wrench>,
    dt_wrench: f64,
}

impl ForceProfile {
    /// # Errors
    /// * [`InputValidationError`](`crate::exception::PegasusException::InputValidationError`)
    /// if the profile is empty, a value is not finite or `dt_wrench` is not positive.
    pub fn new(wrenches: Vec<Wrench>, dt_wrench: f64) -> PegasusResult<Self> {
        if wrenches.is_empty() {
            return Err(create_input_error("a force profile needs at least one wrench"));
        }
        if !(dt_wrench > 0. && dt_wrench.is_finite()) {
            return Err(create_input_error(format!(
                "time between wrenches has to be positive, got {}",
                dt_wrench
            )));
        }
        if wrenches.iter().any(|w| w.iter().any(|x| !x.is_finite())) {
            return Err(create_input_error("wrenches have to be finite"));
        }
        Ok(ForceProfile {
            wrenches,
            dt_wrench,
        })
    }

    /// Creates a profile from rows of six values `[mx, my, mz, fx, fy, fz]`, e.g. read from a
    /// CSV file.
    pub fn from_rows(rows: &[Vec<f64>], dt_wrench: f64) -> PegasusResult<Self> {
        let mut wrenches = Vec::with_capacity(rows.len());
        for row in rows {
            check_dimension(6, row.len())?;
            wrenches.push(Wrench::from_column_slice(row));
        }
        ForceProfile::new(wrenches, dt_wrench)
    }

    pub fn wrenches(&self) -> &[Wrench] {
        &self.wrenches
    }
    pub fn dt_wrench(&self) -> f64 {
        self.dt_wrench
    }
    pub fn len(&self) -> usize {
        self.wrenches.len()
    }
    pub fn is_empty(&self) -> bool {
        self.wrenches.is_empty()
    }
    /// time after which every wrench has been applied for one interval
    pub fn duration(&self) -> f64 {
        self.dt_wrench * self.wrenches.len() as f64
    }
}

/// What a session should do, selected once before the loop starts.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlObjective {
    /// move to the target, stabilize there and return
    Position(PositionTarget),
    /// follow the rates commanded through the input source until cancelled
    Velocity(VelocitySpace),
    /// apply the wrench profile, stabilize and stop
    Force(ForceProfile),
    /// render a spring-damper around the target until cancelled
    Impedance {
        target: PositionTarget,
        parameters: ImpedanceParameters,
    },
}

impl ControlObjective {
    pub fn method(&self) -> ControlMethod {
        match self {
            ControlObjective::Position(_) => ControlMethod::Position,
            ControlObjective::Velocity(_) => ControlMethod::Velocity,
            ControlObjective::Force(_) => ControlMethod::Force,
            ControlObjective::Impedance { .. } => ControlMethod::Impedance,
        }
    }

    /// Validates the setpoints against the robot before anything is commanded.
    pub fn validate(&self, robot: &Robot) -> PegasusResult<()> {
        match self {
            ControlObjective::Position(target) => target.validate(robot),
            ControlObjective::Velocity(_) | ControlObjective::Force(_) => Ok(()),
            ControlObjective::Impedance { target, parameters } => {
                if !(parameters.mass > 0.) {
                    return Err(create_input_error("impedance mass has to be positive"));
                }
                target.validate(robot)
            }
        }
    }

    /// The state a session enters first for this objective.
    pub fn initial_state(&self) -> ControlState {
        match self {
            ControlObjective::Position(_) => ControlState::Position,
            ControlObjective::Velocity(VelocitySpace::Joint) => ControlState::VelocityJoint,
            ControlObjective::Velocity(VelocitySpace::EndEffector) => ControlState::VelocityTask,
            ControlObjective::Force(_) => ControlState::Force,
            ControlObjective::Impedance { .. } => ControlState::Impedance,
        }
    }
}

/// States of the control loop.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlState {
    Position,
    VelocityJoint,
    VelocityTask,
    Force,
    Impedance,
    /// feedforward and PID around a fixed configuration until every joint is within tolerance
    HoldStabilizing,
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ControlState::Position => write!(f, "position"),
            ControlState::VelocityJoint => write!(f, "joint velocity"),
            ControlState::VelocityTask => write!(f, "end effector velocity"),
            ControlState::Force => write!(f, "force"),
            ControlState::Impedance => write!(f, "impedance"),
            ControlState::HoldStabilizing => write!(f, "hold stabilizing"),
        }
    }
}

/// How a session ended without error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// position reached and stabilized, the link stays open for the next objective
    TargetReached,
    /// force profile applied and stabilized, the arm is stopped
    ProfileCompleted,
    /// the user quit, the arm is stopped
    Stopped,
}
