// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the control session, the cooperative loop driving the arm through its states.
use std::time::Duration;

use crate::exception::{create_fault, CancelReason, PegasusException};
use crate::model::Robot;
use crate::robot::control_modes::{
    force_control, hold_pos, imp_control, position_step, twist_to_joint_rates, vel_control,
    ControlContext, ForceSequencer, ForceStep, HoldStep, ImpedanceModel, PositionStep,
};
use crate::robot::control_tools::apply_realtime_config;
use crate::robot::control_types::{
    ControlObjective, ControlState, ForceProfile, PositionTarget, RealtimeConfig, SessionOutcome,
    VelocitySpace,
};
use crate::robot::input::{InputEvent, InputSource, JointRateInput, TwistRateInput};
use crate::robot::logger::{Logger, Record};
use crate::robot::low_pass_filter::{VelocityEstimator, DEFAULT_CUTOFF_FREQUENCY};
use crate::robot::motor_command::CommandConverter;
use crate::robot::pid::Pid;
use crate::robot::rate_limiting::{limit_joint_velocities, limit_twist};
use crate::robot::scheduler::{Clock, Scheduler, TaskKind};
use crate::robot::serial_data::SerialData;
use crate::robot::transport::{SerialLink, Transport};
use crate::settings::Settings;
use crate::utils::{JointVector, Pose, Twist};
use crate::PegasusResult;
use log::{debug, error, info, warn};

/// Runtime data of the active state.
enum Mode {
    Position {
        target: PositionTarget,
        previous_rates: JointVector,
    },
    VelocityJoint {
        keys: JointRateInput,
        previous_rates: JointVector,
    },
    VelocityTask {
        keys: TwistRateInput,
        previous_rates: JointVector,
    },
    Force {
        profile: ForceProfile,
        sequencer: ForceSequencer,
    },
    Impedance {
        target: Pose,
        model: ImpedanceModel,
        twist: Twist,
        previous_rates: JointVector,
    },
    Hold {
        theta_des: JointVector,
        then: SessionOutcome,
    },
}

impl Mode {
    fn state(&self) -> ControlState {
        match self {
            Mode::Position { .. } => ControlState::Position,
            Mode::VelocityJoint { .. } => ControlState::VelocityJoint,
            Mode::VelocityTask { .. } => ControlState::VelocityTask,
            Mode::Force { .. } => ControlState::Force,
            Mode::Impedance { .. } => ControlState::Impedance,
            Mode::Hold { .. } => ControlState::HoldStabilizing,
        }
    }
}

/// A control session owning the serial link to one arm.
///
/// [`execute`](`Self::execute`) runs the control loop for one objective. Every iteration
/// reads the serial link first (gated by `dt_comm`) and then runs the due periodic tasks in
/// the order control (`dt_pid`), hold (`dt_hold`), frame (`dt_frame`), transmit (`dt_comm`).
///
/// Whenever a session stops the arm, the safe shutdown sequence runs exactly once: an all-zero
/// command line is sent, the session waits `dt_comm` and releases the transport. This also
/// happens when the session is dropped or [`close`](`Self::close`)d with the link still open.
pub struct ArmSession<'r, T: Transport, C: Clock, I: InputSource> {
    robot: &'r Robot,
    settings: Settings,
    converter: CommandConverter,
    serial: SerialData,
    pid: Pid,
    link: SerialLink<T>,
    clock: C,
    input: I,
    logger: Logger,
    velocity: VelocityEstimator,
    last_check: Duration,
    state: Option<ControlState>,
    transitions: Vec<(Duration, ControlState)>,
    force_samples_applied: usize,
}

impl<'r, T: Transport, C: Clock, I: InputSource> ArmSession<'r, T, C, I> {
    /// Opens a session on an already connected transport.
    ///
    /// # Errors
    /// * ConfigException if the settings are invalid.
    /// * RealTimeException if realtime is enforced but not available.
    pub fn new(
        robot: &'r Robot,
        settings: Settings,
        transport: T,
        clock: C,
        input: I,
        realtime_config: RealtimeConfig,
    ) -> PegasusResult<Self> {
        settings.validate()?;
        apply_realtime_config(realtime_config)?;
        let converter = CommandConverter::from_settings(&settings.conversion)?;
        let dof = robot.dof();
        let last_check = clock.now();
        info!(
            "session opened for {} joints, control every {} s, serial every {} s",
            dof, settings.dt_pid, settings.dt_comm
        );
        Ok(ArmSession {
            robot,
            converter,
            serial: SerialData::new(dof, settings.history_size),
            pid: Pid::new(settings.pid, dof),
            link: SerialLink::new(transport),
            clock,
            input,
            logger: Logger::new(settings.log_size),
            velocity: VelocityEstimator::new(dof, DEFAULT_CUTOFF_FREQUENCY),
            last_check,
            state: None,
            transitions: Vec::new(),
            force_samples_applied: 0,
            settings,
        })
    }

    /// Runs the control loop until the objective is done or the session is stopped.
    ///
    /// * Position: returns [`SessionOutcome::TargetReached`] once the arm has stabilized at the
    ///   target. The link stays open, so the next objective can follow.
    /// * Force: returns [`SessionOutcome::ProfileCompleted`] after the profile was applied and
    ///   the arm stabilized. The arm is stopped.
    /// * Velocity and impedance: run until the input source quits.
    ///
    /// A quit of the user stops the arm and returns [`SessionOutcome::Stopped`].
    ///
    /// # Errors
    /// * InputValidationError if the objective does not fit the robot. Nothing was commanded.
    /// * SerialException if the link was already released.
    /// * Every other error stops the arm first. FaultExceptions carry the last transmitted
    ///   records.
    pub fn execute(&mut self, objective: &ControlObjective) -> PegasusResult<SessionOutcome> {
        if self.link.is_released() {
            return Err(PegasusException::SerialException {
                message: "pegasus: serial link already released".to_string(),
            });
        }
        objective.validate(self.robot)?;
        match self.run(objective) {
            Ok(SessionOutcome::ProfileCompleted) => {
                self.shutdown()?;
                Ok(SessionOutcome::ProfileCompleted)
            }
            Ok(outcome) => Ok(outcome),
            Err(cause) if cause.is_user_quit() => {
                info!("{}, stopping the arm", cause);
                if let Err(shutdown_error) = self.shutdown() {
                    error!("safe shutdown incomplete: {}", shutdown_error);
                }
                Ok(SessionOutcome::Stopped)
            }
            Err(cause) => {
                error!("control loop failed in state {:?}: {}", self.state, cause);
                if let Err(shutdown_error) = self.shutdown() {
                    error!("safe shutdown incomplete: {}", shutdown_error);
                }
                Err(match cause {
                    PegasusException::FaultException { log: None, message } => {
                        PegasusException::FaultException {
                            log: Some(self.logger.flush()),
                            message,
                        }
                    }
                    other => other,
                })
            }
        }
    }

    /// Stops the arm and releases the link, if not already done.
    pub fn close(&mut self) -> PegasusResult<()> {
        self.shutdown()
    }

    /// State changes with the session time they happened at.
    pub fn transitions(&self) -> &[(Duration, ControlState)] {
        &self.transitions
    }

    /// The state of the last executed objective.
    pub fn state(&self) -> Option<ControlState> {
        self.state
    }

    /// Number of force profile samples applied in the last force objective.
    pub fn force_samples_applied(&self) -> usize {
        self.force_samples_applied
    }

    pub fn serial_data(&self) -> &SerialData {
        &self.serial
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn transport(&self) -> &T {
        self.link.transport()
    }

    pub fn is_released(&self) -> bool {
        self.link.is_released()
    }

    fn shutdown(&mut self) -> PegasusResult<()> {
        let dt_comm = self.settings.comm_period();
        self.link
            .shutdown(&mut self.serial, &mut self.clock, dt_comm)
    }

    fn enter(&mut self, state: ControlState, now: Duration) {
        info!("entering {} control", state);
        self.state = Some(state);
        self.transitions.push((now, state));
    }

    fn initial_mode(&self, objective: &ControlObjective, now: Duration) -> PegasusResult<Mode> {
        let dof = self.robot.dof();
        let settings = &self.settings;
        Ok(match objective {
            ControlObjective::Position(target) => Mode::Position {
                target: target.clone(),
                previous_rates: JointVector::zeros(dof),
            },
            ControlObjective::Velocity(VelocitySpace::Joint) => Mode::VelocityJoint {
                keys: JointRateInput::new(dof, settings.j_incr, settings.w_max),
                previous_rates: JointVector::zeros(dof),
            },
            ControlObjective::Velocity(VelocitySpace::EndEffector) => Mode::VelocityTask {
                keys: TwistRateInput::new(
                    settings.e_incr_lin,
                    settings.e_incr_rot,
                    settings.v_max,
                    settings.w_max,
                ),
                previous_rates: JointVector::zeros(dof),
            },
            ControlObjective::Force(profile) => Mode::Force {
                sequencer: ForceSequencer::new(profile, now),
                profile: profile.clone(),
            },
            ControlObjective::Impedance { target, parameters } => Mode::Impedance {
                target: target.pose(self.robot)?,
                model: ImpedanceModel::new(parameters)?,
                twist: Twist::zeros(),
                previous_rates: JointVector::zeros(dof),
            },
        })
    }

    fn run(&mut self, objective: &ControlObjective) -> PegasusResult<SessionOutcome> {
        let start = self.clock.now();
        let mut mode = self.initial_mode(objective, start)?;
        let mut scheduler = Scheduler::new(&self.settings, start);
        self.pid.reset();
        self.velocity.reset();
        self.force_samples_applied = 0;
        self.enter(mode.state(), start);
        let dt_comm = self.settings.comm_period();
        loop {
            let now = self.clock.now();
            self.last_check =
                self.link
                    .read_and_parse(&mut self.serial, self.last_check, dt_comm, now)?;
            let measured = self.velocity.update(&self.serial).clone();
            // the control laws act only on angles the arm reported
            let measuring = self.serial.has_measurement();
            for task in scheduler.due(now) {
                match task {
                    TaskKind::Control | TaskKind::Hold if !measuring => {}
                    TaskKind::Control => self.control(&mut mode, &measured, now)?,
                    TaskKind::Hold => {
                        if let Some(outcome) = self.hold(&mut mode)? {
                            if outcome == SessionOutcome::TargetReached {
                                // the last hold command stays active until the next objective
                                self.transmit(now)?;
                            }
                            info!("stabilized after {:?}", now.saturating_sub(start));
                            return Ok(outcome);
                        }
                    }
                    TaskKind::Frame => self.frame(&mut mode)?,
                    TaskKind::Transmit => self.transmit(now)?,
                }
            }
        }
    }

    fn control(&mut self, mode: &mut Mode, measured: &JointVector, now: Duration) -> PegasusResult<()> {
        let ctx = ControlContext {
            robot: self.robot,
            converter: &self.converter,
            gravity: self.settings.gravity_vector(),
        };
        let dt = self.settings.dt_pid;
        let mut hold = None;
        match mode {
            Mode::Position {
                target,
                previous_rates,
            } => {
                match position_step(
                    &ctx,
                    &mut self.serial,
                    &mut self.pid,
                    target,
                    &self.settings,
                    previous_rates,
                    measured,
                    dt,
                )? {
                    PositionStep::Moving(rates) => *previous_rates = rates,
                    PositionStep::Reached(theta_des) => {
                        hold = Some((theta_des, SessionOutcome::TargetReached))
                    }
                }
            }
            Mode::VelocityJoint {
                keys,
                previous_rates,
            } => {
                *previous_rates = vel_control(
                    &ctx,
                    &mut self.serial,
                    &mut self.pid,
                    keys.rates(),
                    previous_rates,
                    measured,
                    dt,
                )?;
            }
            Mode::VelocityTask {
                keys,
                previous_rates,
            } => {
                let twist = limit_twist(keys.twist(), self.settings.v_max, self.settings.w_max);
                let theta = self.serial.joint_angles();
                let rates = limit_joint_velocities(
                    &twist_to_joint_rates(self.robot, &theta, &twist)?,
                    self.settings.w_max,
                );
                *previous_rates = vel_control(
                    &ctx,
                    &mut self.serial,
                    &mut self.pid,
                    &rates,
                    previous_rates,
                    measured,
                    dt,
                )?;
            }
            Mode::Force { profile, sequencer } => match sequencer.poll(now) {
                ForceStep::Apply(index) => {
                    debug!("applying wrench sample {}", index);
                    force_control(
                        &ctx,
                        &mut self.serial,
                        &profile.wrenches()[index],
                        measured,
                        self.settings.force_damp,
                    )?;
                    self.force_samples_applied = sequencer.applied();
                }
                ForceStep::Wait => {}
                ForceStep::Exhausted => {
                    hold = Some((self.serial.joint_angles(), SessionOutcome::ProfileCompleted))
                }
            },
            Mode::Impedance {
                target,
                model,
                twist,
                previous_rates,
            } => {
                let (next_twist, rates) = imp_control(
                    &ctx,
                    &mut self.serial,
                    &mut self.pid,
                    target,
                    model,
                    &self.settings,
                    twist,
                    previous_rates,
                    measured,
                    dt,
                )?;
                *twist = next_twist;
                *previous_rates = rates;
            }
            Mode::Hold { .. } => {}
        }
        if let Some((theta_des, then)) = hold {
            self.pid.reset();
            *mode = Mode::Hold { theta_des, then };
            self.enter(ControlState::HoldStabilizing, now);
        }
        Ok(())
    }

    fn hold(&mut self, mode: &mut Mode) -> PegasusResult<Option<SessionOutcome>> {
        if let Mode::Hold { theta_des, then } = mode {
            let ctx = ControlContext {
                robot: self.robot,
                converter: &self.converter,
                gravity: self.settings.gravity_vector(),
            };
            let step = hold_pos(
                &ctx,
                &mut self.serial,
                &mut self.pid,
                theta_des,
                self.settings.err_theta_hold,
                self.settings.dt_hold,
            )?;
            if step == HoldStep::Stable {
                return Ok(Some(*then));
            }
        }
        Ok(None)
    }

    fn frame(&mut self, mode: &mut Mode) -> PegasusResult<()> {
        for event in self.input.poll_events() {
            if event == InputEvent::Quit {
                return Err(PegasusException::Cancelled {
                    reason: CancelReason::UserQuit,
                });
            }
            match mode {
                Mode::VelocityJoint { keys, .. } => keys.apply(&event),
                Mode::VelocityTask { keys, .. } => keys.apply(&event),
                _ => {}
            }
        }
        Ok(())
    }

    fn transmit(&mut self, now: Duration) -> PegasusResult<()> {
        self.link.transmit(&mut self.serial)?;
        let state = self
            .state
            .ok_or_else(|| create_fault("transmitting outside of a control state"))?;
        self.logger.log(Record {
            time: now,
            state,
            angles: self.serial.current().angles.clone(),
            command: self.serial.m_speed().to_vec(),
        });
        Ok(())
    }
}

impl<'r, T: Transport, C: Clock, I: InputSource> Drop for ArmSession<'r, T, C, I> {
    fn drop(&mut self) {
        if self.link.is_released() {
            return;
        }
        if let Err(e) = self.shutdown() {
            warn!("safe shutdown on drop failed: {}", e);
        }
    }
}
