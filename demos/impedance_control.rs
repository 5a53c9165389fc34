// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::path::PathBuf;

use clap::Parser;
use log::{info, LevelFilter};

use pegasus::robot::input::{NoInput, SignalInput};
use pegasus::robot::scheduler::SystemClock;
use pegasus::robot::transport::{find_serial, start_comms};
use pegasus::{
    ArmSession, ControlObjective, PegasusResult, PositionTarget, RealtimeConfig, Robot, Settings,
};

/// An example rendering a spring-damper around a target. Push the arm away and it returns.
/// Stop it with Ctrl+C.
///
/// WARNING: Before executing this example, make sure there is enough space around the arm.
#[derive(Parser, Debug)]
#[clap(author, version, name = "impedance_control")]
struct CommandLineArguments {
    /// Equilibrium, joint angles in units of pi rad or a row-major 4x4 pose
    pub target: String,
    /// Virtual translational stiffness in N/m, the settings value if omitted
    #[clap(long)]
    pub stiffness: Option<f64>,
    /// Virtual damping, the settings value if omitted
    #[clap(long)]
    pub damping: Option<f64>,
    /// Robot description
    #[clap(long, default_value = "demos/pegasus.toml")]
    pub robot: PathBuf,
    /// Session settings
    #[clap(long, default_value = "demos/settings.toml")]
    pub settings: PathBuf,
    /// Serial port of the microcontroller, the first USB port found if omitted
    #[clap(long)]
    pub port: Option<String>,
}

fn main() -> PegasusResult<()> {
    let args = CommandLineArguments::parse();
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(LevelFilter::Info)
        .chain(std::io::stdout())
        .apply()
        .expect("logger already initialised");

    let robot = Robot::load(&args.robot)?;
    let settings = Settings::load(&args.settings)?;
    let target: PositionTarget = args.target.parse()?;
    let mut parameters = settings.impedance;
    if let Some(stiffness) = args.stiffness {
        parameters.translational_stiffness = stiffness;
    }
    if let Some(damping) = args.damping {
        parameters.damping = damping;
    }
    info!("impedance parameters: {:?}", parameters);
    let port = match args.port {
        Some(port) => port,
        None => find_serial()?.remove(0),
    };
    let transport = start_comms(&port, settings.baud_rate)?;
    println!("WARNING: This example will move the arm! Please keep the power switch at hand!");
    println!("Press Enter to continue...");
    std::io::stdin().read_line(&mut String::new()).unwrap();

    let mut session = ArmSession::new(
        &robot,
        settings,
        transport,
        SystemClock::new(),
        SignalInput::new(NoInput)?,
        RealtimeConfig::Ignore,
    )?;
    let outcome = session.execute(&ControlObjective::Impedance { target, parameters })?;
    info!("session ended: {:?}", outcome);
    Ok(())
}
