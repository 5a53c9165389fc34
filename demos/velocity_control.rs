// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::thread;

use clap::Parser;
use log::{info, warn, LevelFilter};

use pegasus::robot::input::{ChannelInput, InputEvent, SignalInput};
use pegasus::robot::scheduler::SystemClock;
use pegasus::robot::transport::{find_serial, start_comms};
use pegasus::{
    ArmSession, ControlObjective, PegasusResult, RealtimeConfig, Robot, Settings, VelocitySpace,
};

/// An example steering the arm with the keyboard.
///
/// Type a key and Enter to press it, "-" followed by the key to release it, "stop" to release
/// every key and "quit" (or Ctrl+C) to stop the arm.
///
/// Joint space: q/a, w/s, e/d, r/f, t/g move one joint each, c/x change the speed.
/// End effector: w/s, a/d, z/x translate along x, y, z and q/e, r/f, c/v rotate about them,
/// t/y and g/h change the linear and angular speed.
///
/// WARNING: Before executing this example, make sure there is enough space around the arm.
#[derive(Parser, Debug)]
#[clap(author, version, name = "velocity_control")]
struct CommandLineArguments {
    /// "joint" or "end-effector"
    #[clap(default_value = "joint")]
    pub space: VelocitySpace,
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

/// Turns typed lines into key events until stdin closes.
fn read_keys(sender: Sender<InputEvent>) {
    let mut pressed: Vec<char> = Vec::new();
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("cannot read stdin: {}", e);
                break;
            }
        };
        let line = line.trim();
        let events: Vec<InputEvent> = match line {
            "quit" => vec![InputEvent::Quit],
            "stop" => pressed.drain(..).map(InputEvent::KeyUp).collect(),
            _ => match line.strip_prefix('-') {
                Some(keys) => keys
                    .chars()
                    .inspect(|key| pressed.retain(|p| p != key))
                    .map(InputEvent::KeyUp)
                    .collect(),
                None => line
                    .chars()
                    .inspect(|key| pressed.push(*key))
                    .map(InputEvent::KeyDown)
                    .collect(),
            },
        };
        for event in events {
            if sender.send(event).is_err() {
                return;
            }
        }
    }
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
    let port = match args.port {
        Some(port) => port,
        None => find_serial()?.remove(0),
    };
    let transport = start_comms(&port, settings.baud_rate)?;
    println!("WARNING: This example will move the arm! Please keep the power switch at hand!");

    let (sender, input) = ChannelInput::new();
    thread::spawn(move || read_keys(sender));
    let mut session = ArmSession::new(
        &robot,
        settings,
        transport,
        SystemClock::new(),
        SignalInput::new(input)?,
        RealtimeConfig::Ignore,
    )?;
    let outcome = session.execute(&ControlObjective::Velocity(args.space))?;
    info!("session ended: {:?}", outcome);
    Ok(())
}
