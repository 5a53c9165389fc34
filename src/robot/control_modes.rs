// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the control laws of the session states.
//!
//! Every law reads the freshest measurement from [`SerialData`], computes joint torques from
//! feedforward dynamics and PID feedback and stores the converted duties back into
//! [`SerialData`] for the next transmission. PID and serial data are borrowed exclusively, no
//! law keeps a copy of them.
use crate::exception::{check_dimension, create_fault};
use crate::model::dynamics::feed_forward;
use crate::model::kinematics::{fk_space, jacobian_space};
use crate::model::Robot;
use crate::robot::control_types::{ForceProfile, PositionTarget};
use crate::robot::motor_command::CommandConverter;
use crate::robot::pid::Pid;
use crate::robot::rate_limiting::{limit_joint_velocities, limit_twist};
use crate::robot::serial_data::SerialData;
use crate::settings::{ImpedanceParameters, Settings};
use crate::utils::{
    adjoint, angular, linear, matrix_log6, se3_to_vec, trans_inv, JointVector, Pose, Twist,
    Wrench,
};
use crate::PegasusResult;
use nalgebra::{Matrix6, Vector3};
use std::time::Duration;

/// Tolerance of the singular values dropped by the Jacobian pseudo-inverse.
pub const PSEUDO_INVERSE_EPS: f64 = 1e-6;

/// Immutable inputs every control law needs.
#[derive(Debug, Copy, Clone)]
pub struct ControlContext<'a> {
    pub robot: &'a Robot,
    pub converter: &'a CommandConverter,
    pub gravity: Vector3<f64>,
}

/// Converts joint torques and stores them as the next command.
pub fn command_torques(
    ctx: &ControlContext,
    serial: &mut SerialData,
    tau: &JointVector,
) -> PegasusResult<()> {
    let commands = ctx.converter.convert_all(ctx.robot, tau)?;
    serial.set_commands(&commands)
}

/// Tracks desired joint rates.
///
/// The desired acceleration is the backward difference to the previously desired rates. The
/// torque is the feedforward for the desired motion at the measured configuration plus the PID
/// correction of the rate error.
///
/// Returns the desired rates, to be passed as `previous_rates` next cycle.
pub fn vel_control(
    ctx: &ControlContext,
    serial: &mut SerialData,
    pid: &mut Pid,
    desired_rates: &JointVector,
    previous_rates: &JointVector,
    measured_rates: &JointVector,
    dt: f64,
) -> PegasusResult<JointVector> {
    let dof = ctx.robot.dof();
    check_dimension(dof, desired_rates.len())?;
    check_dimension(dof, previous_rates.len())?;
    let theta = serial.joint_angles();
    let acceleration = (desired_rates - previous_rates) / dt;
    let tau_ff = feed_forward(
        ctx.robot,
        &theta,
        desired_rates,
        &acceleration,
        &ctx.gravity,
        &Wrench::zeros(),
    )?;
    let tau_pid = pid.execute(desired_rates, measured_rates, dt)?;
    command_torques(ctx, serial, &(tau_ff + tau_pid))?;
    Ok(desired_rates.clone())
}

/// Joint rates producing the space twist, by the pseudo-inverse of the space Jacobian.
pub fn twist_to_joint_rates(
    robot: &Robot,
    theta: &JointVector,
    twist: &Twist,
) -> PegasusResult<JointVector> {
    let jacobian = jacobian_space(robot.screw_axes(), theta)?;
    let inverse = jacobian
        .pseudo_inverse(PSEUDO_INVERSE_EPS)
        .map_err(|e| create_fault(format!("cannot invert the Jacobian: {}", e)))?;
    Ok(inverse * twist)
}

/// Body twist that moves `current` onto `desired` in unit time.
fn body_error(current: &Pose, desired: &Pose) -> Twist {
    se3_to_vec(&matrix_log6(&(trans_inv(current) * desired)))
}

/// Result of one position control cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionStep {
    /// rates commanded this cycle
    Moving(JointVector),
    /// within tolerance, hold this configuration
    Reached(JointVector),
}

/// One cycle of closed-loop position control.
///
/// The remaining error is closed within `dt_pos_config`, limited by `w_max` per joint and, for
/// pose targets, by `v_max`/`w_max` on the end effector twist. A joint target is reached when
/// every joint is within `pos_tolerance` \[rad\], a pose target when both the rotation and the
/// translation error are within `pos_tolerance`.
#[allow(clippy::too_many_arguments)]
pub fn position_step(
    ctx: &ControlContext,
    serial: &mut SerialData,
    pid: &mut Pid,
    target: &PositionTarget,
    settings: &Settings,
    previous_rates: &JointVector,
    measured_rates: &JointVector,
    dt: f64,
) -> PegasusResult<PositionStep> {
    let theta = serial.joint_angles();
    let rates = match target {
        PositionTarget::Joint(theta_des) => {
            check_dimension(ctx.robot.dof(), theta_des.len())?;
            let error = theta_des - &theta;
            if error.amax() < settings.pos_tolerance {
                return Ok(PositionStep::Reached(theta_des.clone()));
            }
            limit_joint_velocities(&(error / settings.dt_pos_config), settings.w_max)
        }
        PositionTarget::Pose(pose_des) => {
            let pose = fk_space(ctx.robot.tsb_home(), ctx.robot.screw_axes(), &theta)?;
            let error = body_error(&pose, pose_des);
            if angular(&error).norm() < settings.pos_tolerance
                && linear(&error).norm() < settings.pos_tolerance
            {
                return Ok(PositionStep::Reached(theta));
            }
            let body = limit_twist(
                &(error / settings.dt_pos_config),
                settings.v_max,
                settings.w_max,
            );
            let rates = twist_to_joint_rates(ctx.robot, &theta, &(adjoint(&pose) * body))?;
            limit_joint_velocities(&rates, settings.w_max)
        }
    };
    let commanded = vel_control(ctx, serial, pid, &rates, previous_rates, measured_rates, dt)?;
    Ok(PositionStep::Moving(commanded))
}

/// Applies one wrench sample at the end effector.
///
/// The torque is the feedforward of the static arm under gravity with `wrench` at the tip,
/// damped by `force_damp` times the measured joint rates.
pub fn force_control(
    ctx: &ControlContext,
    serial: &mut SerialData,
    wrench: &Wrench,
    measured_rates: &JointVector,
    force_damp: f64,
) -> PegasusResult<JointVector> {
    let dof = ctx.robot.dof();
    check_dimension(dof, measured_rates.len())?;
    let theta = serial.joint_angles();
    let zeros = JointVector::zeros(dof);
    let tau = feed_forward(ctx.robot, &theta, &zeros, &zeros, &ctx.gravity, wrench)?
        - measured_rates * force_damp;
    command_torques(ctx, serial, &tau)?;
    Ok(tau)
}

/// Virtual mass-spring-damper rendered by impedance control, acting on body twists.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ImpedanceModel {
    mass_inverse: Matrix6<f64>,
    damping: Matrix6<f64>,
    stiffness: Matrix6<f64>,
}

impl ImpedanceModel {
    pub fn new(parameters: &ImpedanceParameters) -> PegasusResult<Self> {
        let (mass, damping, stiffness) = parameters.matrices();
        let mass_inverse = mass
            .try_inverse()
            .ok_or_else(|| create_fault("impedance mass matrix is singular"))?;
        Ok(ImpedanceModel {
            mass_inverse,
            damping,
            stiffness,
        })
    }

    /// Integrates the virtual system over `dt`: `V = V_prev + dt·M⁻¹(K·X_err − B·V_prev)`.
    pub fn step(&self, error: &Twist, previous: &Twist, dt: f64) -> Twist {
        let wrench = self.stiffness * error - self.damping * previous;
        previous + self.mass_inverse * wrench * dt
    }
}

/// One cycle of impedance control towards the fixed `target`.
///
/// Returns the body twist of the virtual system and the commanded joint rates, both to be
/// passed back as the previous values next cycle.
#[allow(clippy::too_many_arguments)]
pub fn imp_control(
    ctx: &ControlContext,
    serial: &mut SerialData,
    pid: &mut Pid,
    target: &Pose,
    model: &ImpedanceModel,
    settings: &Settings,
    previous_twist: &Twist,
    previous_rates: &JointVector,
    measured_rates: &JointVector,
    dt: f64,
) -> PegasusResult<(Twist, JointVector)> {
    let theta = serial.joint_angles();
    let pose = fk_space(ctx.robot.tsb_home(), ctx.robot.screw_axes(), &theta)?;
    let twist = limit_twist(
        &model.step(&body_error(&pose, target), previous_twist, dt),
        settings.v_max,
        settings.w_max,
    );
    let rates = limit_joint_velocities(
        &twist_to_joint_rates(ctx.robot, &theta, &(adjoint(&pose) * twist))?,
        settings.w_max,
    );
    let commanded = vel_control(ctx, serial, pid, &rates, previous_rates, measured_rates, dt)?;
    Ok((twist, commanded))
}

/// Result of one hold stabilization tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HoldStep {
    /// still outside the tolerance, a new command was stored
    Holding,
    /// every joint is within the tolerance
    Stable,
}

/// One tick of the hold stabilization around `theta_des`.
///
/// Stable once every joint error is below `err_theta_hold`. Otherwise the torque is the
/// feedforward of the resting arm at `theta_des` plus the PID correction of the position error.
pub fn hold_pos(
    ctx: &ControlContext,
    serial: &mut SerialData,
    pid: &mut Pid,
    theta_des: &JointVector,
    err_theta_hold: f64,
    dt_hold: f64,
) -> PegasusResult<HoldStep> {
    let dof = ctx.robot.dof();
    check_dimension(dof, theta_des.len())?;
    let theta = serial.joint_angles();
    if (theta_des - &theta).amax() < err_theta_hold {
        return Ok(HoldStep::Stable);
    }
    let zeros = JointVector::zeros(dof);
    let tau_ff = feed_forward(
        ctx.robot,
        theta_des,
        &zeros,
        &zeros,
        &ctx.gravity,
        &Wrench::zeros(),
    )?;
    let tau_pid = pid.execute(theta_des, &theta, dt_hold)?;
    command_torques(ctx, serial, &(tau_ff + tau_pid))?;
    Ok(HoldStep::Holding)
}

/// What force control should do at a poll.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ForceStep {
    /// apply the sample with this index
    Apply(usize),
    /// the current sample was already applied
    Wait,
    /// every sample was applied and its interval has passed
    Exhausted,
}

/// Walks through a force profile in time. Sample `i` becomes due `i·dt_wrench` after the
/// start, every sample is handed out exactly once and in order, late polls catch up one sample
/// at a time.
#[derive(Debug, Clone)]
pub struct ForceSequencer {
    len: usize,
    dt_wrench: f64,
    start: Duration,
    next: usize,
}

impl ForceSequencer {
    pub fn new(profile: &ForceProfile, start: Duration) -> Self {
        ForceSequencer {
            len: profile.len(),
            dt_wrench: profile.dt_wrench(),
            start,
            next: 0,
        }
    }

    pub fn poll(&mut self, now: Duration) -> ForceStep {
        let elapsed = now.saturating_sub(self.start).as_secs_f64();
        if self.next < self.len {
            if elapsed >= self.next as f64 * self.dt_wrench {
                self.next += 1;
                return ForceStep::Apply(self.next - 1);
            }
            return ForceStep::Wait;
        }
        if elapsed >= self.len as f64 * self.dt_wrench {
            ForceStep::Exhausted
        } else {
            ForceStep::Wait
        }
    }

    /// number of samples handed out
    pub fn applied(&self) -> usize {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use crate::model::test_arm;
    use crate::robot::control_modes::{
        force_control, hold_pos, imp_control, position_step, twist_to_joint_rates, vel_control,
        ControlContext, ForceSequencer, ForceStep, HoldStep, ImpedanceModel, PositionStep,
    };
    use crate::robot::control_types::{ForceProfile, PositionTarget};
    use crate::robot::motor_command::CommandConverter;
    use crate::robot::pid::{Pid, PidGains};
    use crate::robot::serial_data::SerialData;
    use crate::settings::Settings;
    use crate::utils::{JointVector, Twist, Wrench};
    use nalgebra::{Matrix4, Vector3};
    use std::f64::consts::FRAC_PI_2;
    use std::time::Duration;

    fn converter() -> CommandConverter {
        CommandConverter::from_settings(&Settings::default().conversion).unwrap()
    }

    fn at(angles: &[f64]) -> SerialData {
        let mut serial = SerialData::new(angles.len(), 16);
        let mut snapshot = angles.to_vec();
        snapshot.push(0.);
        serial
            .push_snapshot(snapshot, Duration::from_millis(20))
            .unwrap();
        serial
    }

    #[test]
    fn force_sequence_applies_every_sample_once() {
        let profile = ForceProfile::new(vec![Wrench::zeros(); 3], 0.1).unwrap();
        let mut sequencer = ForceSequencer::new(&profile, Duration::from_secs(0));
        let mut applied = Vec::new();
        let mut exhausted_at = None;
        let mut t = 0;
        while t <= 350 {
            match sequencer.poll(Duration::from_millis(t)) {
                ForceStep::Apply(i) => applied.push(i),
                ForceStep::Exhausted => {
                    exhausted_at.get_or_insert(t);
                }
                ForceStep::Wait => {}
            }
            t += 5;
        }
        assert_eq!(applied, vec![0, 1, 2]);
        let exhausted_at = exhausted_at.unwrap();
        assert!((300..=350).contains(&exhausted_at));
        assert_eq!(sequencer.applied(), 3);
    }

    #[test]
    fn late_polls_catch_up_without_skipping() {
        let profile = ForceProfile::new(vec![Wrench::zeros(); 3], 0.1).unwrap();
        let mut sequencer = ForceSequencer::new(&profile, Duration::from_secs(1));
        assert_eq!(sequencer.poll(Duration::from_millis(1500)), ForceStep::Apply(0));
        assert_eq!(sequencer.poll(Duration::from_millis(1500)), ForceStep::Apply(1));
        assert_eq!(sequencer.poll(Duration::from_millis(1500)), ForceStep::Apply(2));
        assert_eq!(sequencer.poll(Duration::from_millis(1500)), ForceStep::Exhausted);
    }

    #[test]
    fn resting_arm_without_gravity_gets_no_command() {
        let arm = test_arm(None);
        let converter = converter();
        let ctx = ControlContext {
            robot: &arm,
            converter: &converter,
            gravity: Vector3::zeros(),
        };
        let mut serial = at(&[0.; 5]);
        let mut pid = Pid::new(PidGains::default(), 5);
        let zeros = JointVector::zeros(5);
        vel_control(&ctx, &mut serial, &mut pid, &zeros, &zeros, &zeros, 0.01).unwrap();
        assert!(serial.m_speed().iter().all(|m| *m == 0));
    }

    #[test]
    fn force_control_pushes_along_the_wrench() {
        let arm = test_arm(None);
        let converter = converter();
        let ctx = ControlContext {
            robot: &arm,
            converter: &converter,
            gravity: Vector3::zeros(),
        };
        let mut serial = at(&[0.; 5]);
        let zeros = JointVector::zeros(5);
        let tau = force_control(
            &ctx,
            &mut serial,
            &Wrench::new(0., 0., 0., 10., 0., 0.),
            &zeros,
            0.5,
        )
        .unwrap();
        assert!((tau[1] - 5.).abs() < 1e-9);
        assert!(serial.m_speed()[1] > 0);
        assert_eq!(serial.m_speed()[0], 0);
        let moving = JointVector::from_vec(vec![0., 2., 0., 0., 0.]);
        let damped = force_control(
            &ctx,
            &mut serial,
            &Wrench::new(0., 0., 0., 10., 0., 0.),
            &moving,
            0.5,
        )
        .unwrap();
        assert!((damped[1] - 4.).abs() < 1e-9);
    }

    #[test]
    fn hold_is_stable_within_tolerance() {
        let arm = test_arm(None);
        let converter = converter();
        let ctx = ControlContext {
            robot: &arm,
            converter: &converter,
            gravity: Vector3::new(0., 0., -9.81),
        };
        let mut serial = at(&[0., FRAC_PI_2, 0., 0., 0.]);
        let mut pid = Pid::new(PidGains::default(), 5);
        let theta_des = JointVector::from_vec(vec![0., FRAC_PI_2 + 0.005, 0., 0., 0.]);
        assert_eq!(
            hold_pos(&ctx, &mut serial, &mut pid, &theta_des, 0.01, 0.01).unwrap(),
            HoldStep::Stable
        );
        assert!(serial.m_speed().iter().all(|m| *m == 0));
        let theta_des = JointVector::from_vec(vec![0., FRAC_PI_2 + 0.2, 0., 0., 0.]);
        assert_eq!(
            hold_pos(&ctx, &mut serial, &mut pid, &theta_des, 0.01, 0.01).unwrap(),
            HoldStep::Holding
        );
        // gravity pulls the horizontal arm forward, the shoulder has to push back
        assert!(serial.m_speed()[1] < 0);
        assert_eq!(serial.rot_dir_des().len(), 6);
    }

    #[test]
    fn joint_target_is_approached_and_reached() {
        let arm = test_arm(None);
        let converter = converter();
        let ctx = ControlContext {
            robot: &arm,
            converter: &converter,
            gravity: Vector3::zeros(),
        };
        let settings = Settings::default();
        let mut pid = Pid::new(PidGains::default(), 5);
        let zeros = JointVector::zeros(5);
        let target = PositionTarget::Joint(JointVector::from_vec(vec![1., 0., 0., 0., -1.]));
        let mut serial = at(&[0.; 5]);
        match position_step(&ctx, &mut serial, &mut pid, &target, &settings, &zeros, &zeros, 0.01)
            .unwrap()
        {
            PositionStep::Moving(rates) => {
                assert!((rates[0] - settings.w_max).abs() < 1e-12);
                assert!((rates[4] + settings.w_max).abs() < 1e-12);
            }
            other => panic!("unexpected step {:?}", other),
        }
        let mut serial = at(&[0.995, 0., 0., 0., -1.01]);
        assert_eq!(
            position_step(&ctx, &mut serial, &mut pid, &target, &settings, &zeros, &zeros, 0.01)
                .unwrap(),
            PositionStep::Reached(JointVector::from_vec(vec![1., 0., 0., 0., -1.]))
        );
    }

    #[test]
    fn pose_target_moves_towards_the_pose() {
        let arm = test_arm(None);
        let converter = converter();
        let ctx = ControlContext {
            robot: &arm,
            converter: &converter,
            gravity: Vector3::zeros(),
        };
        let settings = Settings::default();
        let mut pid = Pid::new(PidGains::default(), 5);
        let zeros = JointVector::zeros(5);
        let mut serial = at(&[0.; 5]);
        let mut pose = *arm.tsb_home();
        pose[(0, 3)] = 0.02;
        let target = PositionTarget::Pose(pose);
        match position_step(&ctx, &mut serial, &mut pid, &target, &settings, &zeros, &zeros, 0.01)
            .unwrap()
        {
            PositionStep::Moving(rates) => {
                // the upright tip moves forward by pitching the shoulder forward and the wrist
                // back
                assert!(rates[1] > 0.);
                assert!(rates[3] < 0.);
                assert!(rates[0].abs() < 1e-9);
                assert!(rates.amax() <= settings.w_max + 1e-12);
            }
            other => panic!("unexpected step {:?}", other),
        }
        let home = PositionTarget::Pose(*arm.tsb_home());
        assert_eq!(
            position_step(&ctx, &mut serial, &mut pid, &home, &settings, &zeros, &zeros, 0.01)
                .unwrap(),
            PositionStep::Reached(zeros.clone())
        );
    }

    #[test]
    fn twist_inverse_reproduces_twist() {
        let arm = test_arm(None);
        let theta = JointVector::from_vec(vec![0.3, 0.5, -0.4, 0.2, 0.1]);
        // pure rotation about the base axis is reachable
        let twist = Twist::new(0., 0., 0.2, 0., 0., 0.);
        let rates = twist_to_joint_rates(&arm, &theta, &twist).unwrap();
        assert!((rates[0] + rates[4] - 0.2).abs() < 1e-9);
        assert!(rates[1].abs() < 1e-9);
    }

    #[test]
    fn impedance_pulls_towards_the_target() {
        let arm = test_arm(None);
        let converter = converter();
        let ctx = ControlContext {
            robot: &arm,
            converter: &converter,
            gravity: Vector3::zeros(),
        };
        let settings = Settings::default();
        let model = ImpedanceModel::new(&settings.impedance).unwrap();
        let mut pid = Pid::new(PidGains::default(), 5);
        let zeros = JointVector::zeros(5);
        let mut serial = at(&[0.; 5]);
        let mut target: Matrix4<f64> = *arm.tsb_home();
        target[(0, 3)] = 0.05;
        let (twist, rates) = imp_control(
            &ctx,
            &mut serial,
            &mut pid,
            &target,
            &model,
            &settings,
            &Twist::zeros(),
            &zeros,
            &zeros,
            0.01,
        )
        .unwrap();
        assert!(twist[3] > 0.);
        assert!(twist.fixed_rows::<3>(0).norm() < 1e-12);
        // pitching forward moves the tip along +x
        assert!(rates[1] > 0.);
        let at_target = model.step(&Twist::zeros(), &Twist::zeros(), 0.01);
        assert_eq!(at_target, Twist::zeros());
    }
}
