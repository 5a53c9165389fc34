// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

use std::time::Duration;

use clap::Parser;
use log::LevelFilter;

use pegasus::robot::scheduler::{Clock, SystemClock};
use pegasus::robot::serial_data::SerialData;
use pegasus::robot::transport::{find_serial, start_comms, SerialLink};
use pegasus::PegasusResult;

/// An example showing how to read the joint angles reported by the microcontroller.
/// The motors are commanded zero the whole time, so the arm can be moved by hand.
#[derive(Parser, Debug)]
#[clap(author, version, name = "echo_joint_angles")]
struct CommandLineArguments {
    /// Number of arm joints, the gripper angle is reported additionally
    #[clap(long, default_value_t = 5)]
    pub dof: usize,
    /// Seconds to listen
    #[clap(long, default_value_t = 10.)]
    pub duration: f64,
    /// Serial port of the microcontroller, the first USB port found if omitted
    #[clap(long)]
    pub port: Option<String>,
    #[clap(long, default_value_t = 115200)]
    pub baud_rate: u32,
}

fn main() -> PegasusResult<()> {
    let args = CommandLineArguments::parse();
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message))
        })
        .level(LevelFilter::Debug)
        .chain(std::io::stdout())
        .apply()
        .expect("logger already initialised");

    let port = match args.port {
        Some(port) => port,
        None => find_serial()?.remove(0),
    };
    let mut link = SerialLink::new(start_comms(&port, args.baud_rate)?);
    let mut serial = SerialData::new(args.dof, 16);
    let mut clock = SystemClock::new();
    let dt_comm = Duration::from_millis(20);
    let mut last_check = clock.now();
    let mut printed = 0;
    let result = loop {
        let now = clock.now();
        if now.as_secs_f64() >= args.duration {
            break Ok(());
        }
        last_check = match link.read_and_parse(&mut serial, last_check, dt_comm, now) {
            Ok(last_check) => last_check,
            Err(e) => break Err(e),
        };
        if serial.snapshots_received() != printed {
            printed = serial.snapshots_received();
            println!("{:8.3} {:?}", now.as_secs_f64(), serial.current().angles);
            if let Err(e) = link.transmit(&mut serial) {
                break Err(e);
            }
        }
        clock.sleep(Duration::from_millis(1));
    };
    link.shutdown(&mut serial, &mut clock, dt_comm)?;
    result
}
