// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains everything needed to command the arm, most notably the [`ArmSession`](`crate::ArmSession`).

pub mod control_loop;
pub mod control_modes;
mod control_tools;
pub mod control_types;
pub mod input;
pub mod logger;
pub mod low_pass_filter;
pub mod motor_command;
pub mod pid;
mod rate_limiting;
pub mod scheduler;
pub mod serial_data;
pub mod transport;
