// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::path::PathBuf;

use clap::Parser;
use log::{info, LevelFilter};

use pegasus::robot::input::{NoInput, SignalInput};
use pegasus::robot::scheduler::SystemClock;
use pegasus::robot::transport::{find_serial, start_comms};
use pegasus::{
    ArmSession, ControlObjective, ForceProfile, PegasusException, PegasusResult, RealtimeConfig,
    Robot, Settings,
};

/// An example pressing the end effector with a sequence of wrenches.
///
/// The profile is a CSV file without header, one wrench per row:
/// `mx,my,mz,fx,fy,fz` in Nm and N, expressed in the end effector frame.
/// Each row is applied for `dt-wrench` seconds, afterwards the arm is stabilized and stopped.
///
/// WARNING: Before executing this example, make sure there is enough space around the arm.
#[derive(Parser, Debug)]
#[clap(author, version, name = "force_control")]
struct CommandLineArguments {
    /// CSV file with the wrench profile
    pub profile: PathBuf,
    /// Seconds each wrench is applied
    #[clap(long, default_value_t = 0.1)]
    pub dt_wrench: f64,
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

fn read_profile(path: &PathBuf) -> PegasusResult<Vec<Vec<f64>>> {
    let csv_error = |e: csv::Error| PegasusException::ConfigException {
        message: format!("cannot read wrench profile {:?}: {}", path, e),
    };
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_error)?;
    reader
        .deserialize::<Vec<f64>>()
        .map(|row| row.map_err(csv_error))
        .collect()
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
    let profile = ForceProfile::from_rows(&read_profile(&args.profile)?, args.dt_wrench)?;
    info!(
        "applying {} wrenches over {} s",
        profile.len(),
        profile.duration()
    );
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
    let outcome = session.execute(&ControlObjective::Force(profile))?;
    info!(
        "session ended: {:?} after {} wrenches",
        outcome,
        session.force_samples_applied()
    );
    Ok(())
}
