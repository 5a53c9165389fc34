// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later
//! # pegasus
//! pegasus is the real-time control core of a serial-linked robotic arm whose motors are driven
//! by a microcontroller over a USB serial line.
//!
//! **ALWAYS KEEP THE POWER SWITCH OF THE MOTOR DRIVERS AT
//! HAND WHILE CONTROLLING THE ARM!**
//!
//!
//! ## Design
//! The library is divided into these main modules:
//! * [model](`crate::model`) - the kinematic and dynamic description of the arm, forward
//!   kinematics and the recursive Newton-Euler feedforward.
//! * [robot](`crate::robot`) - everything needed to command the arm: the serial protocol,
//!   PID, torque to PWM conversion, the control laws and the control session.
//! * [settings](`crate::settings`) - the tunable constants of a session, loaded from TOML.
//! * [utils](`crate::utils`) - rigid body motion helpers.
//!
//! The microcontroller reports the measured joint angles as a line `a0,a1,…,aN` and receives
//! one line `mag0|dir0,…,magN|dirN` with a PWM duty (0-255) and a direction bit per motor. The
//! last entry of both lines belongs to the gripper, it is always commanded zero.
//!
//! # Example:
//!```no_run
//! use pegasus::robot::input::{NoInput, SignalInput};
//! use pegasus::robot::scheduler::SystemClock;
//! use pegasus::robot::transport::start_comms;
//! use pegasus::{
//!     ArmSession, ControlObjective, PegasusResult, PositionTarget, RealtimeConfig, Robot,
//!     Settings,
//! };
//! fn main() -> PegasusResult<()> {
//!     let robot = Robot::load("pegasus.toml")?;
//!     let settings = Settings::load("settings.toml")?;
//!     let transport = start_comms("/dev/ttyACM0", settings.baud_rate)?;
//!     let mut session = ArmSession::new(
//!         &robot,
//!         settings,
//!         transport,
//!         SystemClock::new(),
//!         SignalInput::new(NoInput)?,
//!         RealtimeConfig::Ignore,
//!     )?;
//!     let target: PositionTarget = "[0.25, 0, 0.5, 0, 0]".parse()?;
//!     session.execute(&ControlObjective::Position(target))?;
//!     session.close()
//! }
//!   ```
//!
//! The main function returns a PegasusResult<()> which means that it returns either Ok(())
//! or an Error of type PegasusException.
//!
//! ```ignore
//! let transport = start_comms("/dev/ttyACM0", settings.baud_rate)?;
//! ```
//! opens the serial port of the microcontroller.
//! [`find_serial`](`crate::robot::transport::find_serial`) lists the candidates if you do not
//! know the name.
//!
//! ```ignore
//! let mut session = ArmSession::new(&robot, settings, transport, SystemClock::new(), input, RealtimeConfig::Ignore)?;
//! ```
//! The session owns the transport from now on. Whatever happens, before the session lets go of
//! it, every motor is commanded to stop. [`SignalInput`](`crate::robot::input::SignalInput`)
//! turns Ctrl+C into a quit event, so an interrupted program stops the arm as well.
//!
//! ```ignore
//! let target: PositionTarget = "[0.25, 0, 0.5, 0, 0]".parse()?;
//! session.execute(&ControlObjective::Position(target))?;
//! ```
//! Joint targets are given in units of π rad. The call returns once the arm has settled at the
//! target, the motors then keep holding it until the next objective or until the session is
//! closed.

pub mod exception;
pub mod robot;

pub mod model;
pub mod settings;
pub mod utils;

pub use exception::{PegasusException, PegasusResult};
pub use model::{Robot, RobotVariant};
pub use robot::control_loop::ArmSession;
pub use robot::control_types::*;
pub use robot::low_pass_filter::DEFAULT_CUTOFF_FREQUENCY;
pub use robot::low_pass_filter::MAX_CUTOFF_FREQUENCY;
pub use settings::Settings;
pub use utils::*;
