// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::path::PathBuf;

use clap::Parser;
use log::{info, LevelFilter};

use pegasus::robot::input::{NoInput, SignalInput};
use pegasus::robot::scheduler::SystemClock;
use pegasus::robot::transport::{find_serial, start_comms};
use pegasus::{
    ArmSession, ControlObjective, PegasusResult, PositionTarget, RealtimeConfig, Robot,
    SessionOutcome, Settings,
};

/// An example moving the arm through a list of targets, holding each one until it has settled.
///
/// Targets are either joint angles in units of pi rad, e.g. "[0.25,0,0.5,0,0]", or a row-major
/// end effector pose, e.g. "[[1,0,0,0.2],[0,1,0,0],[0,0,1,0.4],[0,0,0,1]]".
///
/// WARNING: Before executing this example, make sure there is enough space around the arm.
#[derive(Parser, Debug)]
#[clap(author, version, name = "position_control")]
struct CommandLineArguments {
    /// Targets to visit in order
    #[clap(required = true)]
    pub targets: Vec<String>,
    /// Robot description
    #[clap(long, default_value = "demos/pegasus.toml")]
    pub robot: PathBuf,
    /// Session settings
    #[clap(long, default_value = "demos/settings.toml")]
    pub settings: PathBuf,
    /// Serial port of the microcontroller, the first USB port found if omitted
    #[clap(long)]
    pub port: Option<String>,
    /// Refuse to run without realtime priority
    #[clap(long, action)]
    pub realtime: bool,
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
    let targets = args
        .targets
        .iter()
        .map(|target| target.parse::<PositionTarget>())
        .collect::<PegasusResult<Vec<PositionTarget>>>()?;
    let port = match args.port {
        Some(port) => port,
        None => find_serial()?.remove(0),
    };
    let transport = start_comms(&port, settings.baud_rate)?;
    let realtime = match args.realtime {
        true => RealtimeConfig::Enforce,
        false => RealtimeConfig::Ignore,
    };
    println!("WARNING: This example will move the arm! Please keep the power switch at hand!");
    println!("Press Enter to continue...");
    std::io::stdin().read_line(&mut String::new()).unwrap();

    let mut session = ArmSession::new(
        &robot,
        settings,
        transport,
        SystemClock::new(),
        SignalInput::new(NoInput)?,
        realtime,
    )?;
    for target in targets {
        match session.execute(&ControlObjective::Position(target))? {
            SessionOutcome::TargetReached => info!("target reached"),
            outcome => {
                info!("session ended: {:?}", outcome);
                return Ok(());
            }
        }
    }
    println!("Finished moving, shutting down example");
    session.close()
}
