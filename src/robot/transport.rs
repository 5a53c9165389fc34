// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the serial link to the microcontroller and its line protocol.
//!
//! Outbound lines look like `"<mag0>|<dir0>,…,<magN>|<dirN>\n"`, inbound lines carry one angle
//! in \[rad\] per slot, separated by commas and optionally enclosed in brackets.
use crate::exception::{CancelReason, PegasusException};
use crate::robot::scheduler::Clock;
use crate::robot::serial_data::SerialData;
use crate::PegasusResult;
use log::{debug, info, warn};
#[cfg(test)]
use mockall::automock;
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io;
use std::io::{Read, Write};
use std::time::Duration;

/// USB vendor id of the Teensy boards driving the arm.
pub const TEENSY_VID: u16 = 0x16C0;

/// Pending bytes without a line terminator are discarded beyond this size.
pub const MAX_PENDING_BYTES: usize = 4096;

/// Byte channel to the microcontroller.
#[cfg_attr(test, automock)]
pub trait Transport {
    /// Returns the bytes received since the last call. Must not block.
    fn receive(&mut self) -> PegasusResult<Vec<u8>>;
    /// Pushes one line. No acknowledgment is awaited.
    fn send(&mut self, line: &str) -> PegasusResult<()>;
    /// Closes the channel.
    fn release(&mut self) -> PegasusResult<()>;
}

/// Collects bytes until they form complete lines. A line may span several reads.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_PENDING_BYTES && !self.pending.contains(&b'\n') {
            warn!(
                "discarding {} bytes received without a line terminator",
                self.pending.len()
            );
            self.pending.clear();
        }
    }

    /// Removes and returns the oldest complete line without its terminator.
    pub fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// number of bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

fn parse_error<S: ToString>(line: &str, message: S) -> PegasusException {
    PegasusException::ParseError {
        line: line.to_string(),
        message: message.to_string(),
    }
}

/// Parses one inbound line into exactly `expected` finite angles.
/// # Errors
/// * [`ParseError`](`crate::exception::PegasusException::ParseError`) if a field is not a
/// number or the line does not have `expected` fields.
pub fn parse_angles(line: &str, expected: usize) -> PegasusResult<Vec<f64>> {
    let trimmed = line.trim();
    let body = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    let mut angles = Vec::with_capacity(expected);
    for field in body.split(',').map(str::trim) {
        let angle: f64 = field
            .parse()
            .map_err(|_| parse_error(line, format!("{:?} is not a number", field)))?;
        if !angle.is_finite() {
            return Err(parse_error(line, "angles have to be finite"));
        }
        angles.push(angle);
    }
    if angles.len() != expected {
        return Err(parse_error(
            line,
            format!("expected {} angles but got {}", expected, angles.len()),
        ));
    }
    Ok(angles)
}

/// Session side of the serial protocol on top of a [`Transport`].
pub struct SerialLink<T: Transport> {
    transport: T,
    buffer: LineBuffer,
    released: bool,
}

impl<T: Transport> SerialLink<T> {
    pub fn new(transport: T) -> Self {
        SerialLink {
            transport,
            buffer: LineBuffer::new(),
            released: false,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// whether the shutdown sequence already ran
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Polls the transport once `dt_comm` has passed since `last_check` and appends one
    /// snapshot per complete well-formed line. Malformed lines are dropped.
    ///
    /// Returns the time of the last poll.
    /// # Errors
    /// * [`Cancelled`](`crate::exception::PegasusException::Cancelled`) if the link is gone.
    pub fn read_and_parse(
        &mut self,
        serial: &mut SerialData,
        last_check: Duration,
        dt_comm: Duration,
        now: Duration,
    ) -> PegasusResult<Duration> {
        if now.saturating_sub(last_check) < dt_comm {
            return Ok(last_check);
        }
        let bytes = self.transport.receive()?;
        self.buffer.extend(&bytes);
        while let Some(line) = self.buffer.next_line() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_angles(&line, serial.len_data()) {
                Ok(angles) => serial.push_snapshot(angles, now)?,
                Err(error) => warn!("dropping serial frame: {}", error),
            }
        }
        Ok(now)
    }

    /// Regenerates the wire tokens from the commanded duties and sends them.
    ///
    /// A failed write that is not a disconnect is logged, the next cycle sends fresh data.
    pub fn transmit(&mut self, serial: &mut SerialData) -> PegasusResult<()> {
        serial.refresh_data_out();
        match self.transport.send(&serial.encode_line()) {
            Ok(()) => Ok(()),
            Err(error @ PegasusException::Cancelled { .. }) => Err(error),
            Err(error) => {
                warn!("command line not sent, retrying next cycle: {}", error);
                Ok(())
            }
        }
    }

    /// Stops every motor and releases the transport: sends an all-zero line, waits
    /// `dt_comm` so the microcontroller picks it up, then releases. Runs at most once.
    pub fn shutdown<C: Clock>(
        &mut self,
        serial: &mut SerialData,
        clock: &mut C,
        dt_comm: Duration,
    ) -> PegasusResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        serial.zero_commands();
        let sent = self.transport.send(&serial.encode_line());
        clock.sleep(dt_comm);
        let released = self.transport.release();
        info!("serial link released");
        sent.and(released)
    }
}

/// Maps I/O failures of the port, a vanished device cancels the session.
pub(crate) fn map_io_error(error: io::Error) -> PegasusException {
    match error.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::NotConnected
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset => PegasusException::Cancelled {
            reason: CancelReason::Disconnected,
        },
        _ => PegasusException::SerialException {
            message: error.to_string(),
        },
    }
}

fn map_serial_error(error: serialport::Error) -> PegasusException {
    match error.kind() {
        serialport::ErrorKind::NoDevice => PegasusException::Cancelled {
            reason: CancelReason::Disconnected,
        },
        serialport::ErrorKind::Io(kind) => map_io_error(io::Error::new(kind, error.description)),
        _ => PegasusException::SerialException {
            message: error.to_string(),
        },
    }
}

/// [`Transport`] over a serial port.
pub struct SerialPortTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialPortTransport {
    pub fn name(&self) -> &str {
        &self.name
    }

    fn port(&mut self) -> PegasusResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or_else(|| PegasusException::Cancelled {
            reason: CancelReason::Disconnected,
        })
    }
}

impl Transport for SerialPortTransport {
    fn receive(&mut self) -> PegasusResult<Vec<u8>> {
        let port = self.port()?;
        let available = port.bytes_to_read().map_err(map_serial_error)? as usize;
        if available == 0 {
            return Ok(Vec::new());
        }
        let mut buffer = vec![0_u8; available];
        let read = port.read(&mut buffer).map_err(map_io_error)?;
        buffer.truncate(read);
        Ok(buffer)
    }

    fn send(&mut self, line: &str) -> PegasusResult<()> {
        self.port()?
            .write_all(line.as_bytes())
            .map_err(map_io_error)
    }

    fn release(&mut self) -> PegasusResult<()> {
        if let Some(mut port) = self.port.take() {
            port.flush().map_err(map_io_error)?;
        }
        Ok(())
    }
}

/// Lists the USB serial ports, boards with the Teensy vendor id first.
/// # Errors
/// * [`SerialException`](`crate::exception::PegasusException::SerialException`) if the ports
/// cannot be enumerated or there is no USB serial port.
pub fn find_serial() -> PegasusResult<Vec<String>> {
    let ports = serialport::available_ports().map_err(|e| PegasusException::SerialException {
        message: format!("cannot enumerate serial ports: {}", e),
    })?;
    let mut usb_ports: Vec<(bool, String)> = ports
        .into_iter()
        .filter_map(|info| match info.port_type {
            SerialPortType::UsbPort(usb) => Some((usb.vid == TEENSY_VID, info.port_name)),
            _ => None,
        })
        .collect();
    if usb_ports.is_empty() {
        return Err(PegasusException::SerialException {
            message: "no USB serial port found, is the microcontroller plugged in?".to_string(),
        });
    }
    usb_ports.sort_by_key(|(teensy, _)| !*teensy);
    debug!("serial ports: {:?}", usb_ports);
    Ok(usb_ports.into_iter().map(|(_, name)| name).collect())
}

/// Opens the port to the microcontroller and discards stale input.
///
/// Writes time out after a few milliseconds so a stalled port cannot block the control loop.
pub fn start_comms(port_name: &str, baud_rate: u32) -> PegasusResult<SerialPortTransport> {
    let port = serialport::new(port_name, baud_rate)
        .timeout(Duration::from_millis(5))
        .open()
        .map_err(|e| PegasusException::SerialException {
            message: format!("cannot open {}: {}", port_name, e),
        })?;
    port.clear(ClearBuffer::Input)
        .map_err(|e| PegasusException::SerialException {
            message: format!("cannot clear {}: {}", port_name, e),
        })?;
    info!("connected to {} at {} baud", port_name, baud_rate);
    Ok(SerialPortTransport {
        port: Some(port),
        name: port_name.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use crate::exception::{CancelReason, PegasusException};
    use crate::robot::scheduler::StepClock;
    use crate::robot::serial_data::SerialData;
    use crate::robot::transport::{
        map_io_error, parse_angles, LineBuffer, MockTransport, SerialLink, MAX_PENDING_BYTES,
    };
    use mockall::Sequence;
    use std::io;
    use std::time::Duration;

    const DT_COMM: Duration = Duration::from_millis(20);

    fn chunked_transport(chunks: Vec<&'static str>) -> MockTransport {
        let mut chunks = chunks.into_iter();
        let mut transport = MockTransport::new();
        transport
            .expect_receive()
            .returning(move || Ok(chunks.next().unwrap_or("").as_bytes().to_vec()));
        transport
    }

    #[test]
    fn well_formed_line_appends_one_snapshot() {
        let mut link = SerialLink::new(chunked_transport(vec!["0.1,0.2,0.3,0.4,0.5,0.0\n"]));
        let mut serial = SerialData::new(5, 16);
        let last = link
            .read_and_parse(&mut serial, Duration::from_secs(0), DT_COMM, DT_COMM)
            .unwrap();
        assert_eq!(last, DT_COMM);
        assert_eq!(serial.history().len(), 2);
        assert_eq!(serial.current().angles, vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.0]);
        assert_eq!(serial.current().received_at, DT_COMM);
    }

    #[test]
    fn short_line_is_dropped() {
        let mut link = SerialLink::new(chunked_transport(vec!["0.1,0.2,0.3\n"]));
        let mut serial = SerialData::new(5, 16);
        link.read_and_parse(&mut serial, Duration::from_secs(0), DT_COMM, DT_COMM)
            .unwrap();
        assert_eq!(serial.history().len(), 1);
    }

    #[test]
    fn line_spanning_two_reads() {
        let mut link = SerialLink::new(chunked_transport(vec!["[0.1, 0.2,", " 0.3]\r\n1,2,x\n"]));
        let mut serial = SerialData::new(2, 16);
        let first = link
            .read_and_parse(&mut serial, Duration::from_secs(0), DT_COMM, DT_COMM)
            .unwrap();
        assert_eq!(serial.history().len(), 1);
        link.read_and_parse(&mut serial, first, DT_COMM, 2 * DT_COMM)
            .unwrap();
        assert_eq!(serial.history().len(), 2);
        assert_eq!(serial.current().angles, vec![0.1, 0.2, 0.3]);
    }

    #[test]
    fn poll_waits_for_the_comm_period() {
        let mut transport = MockTransport::new();
        transport.expect_receive().never();
        let mut link = SerialLink::new(transport);
        let mut serial = SerialData::new(2, 16);
        let last = link
            .read_and_parse(
                &mut serial,
                Duration::from_millis(100),
                DT_COMM,
                Duration::from_millis(110),
            )
            .unwrap();
        assert_eq!(last, Duration::from_millis(100));
    }

    #[test]
    fn transmit_sends_the_encoded_line() {
        let mut transport = MockTransport::new();
        transport
            .expect_send()
            .withf(|line: &str| line == "10|1,10|0,0|0,0|0,0|0,0|0\n")
            .times(1)
            .returning(|_| Ok(()));
        let mut link = SerialLink::new(transport);
        let mut serial = SerialData::new(5, 16);
        serial.set_m_speed(&[10, -10, 0, 0, 0, 0]).unwrap();
        link.transmit(&mut serial).unwrap();
        assert_eq!(serial.data_out()[0], "10|1");
        assert_eq!(serial.rot_dir_des()[1], 0);
    }

    #[test]
    fn failed_write_is_retried_but_disconnect_is_not() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(PegasusException::SerialException {
                    message: "timed out".to_string(),
                })
            });
        transport
            .expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(PegasusException::Cancelled {
                    reason: CancelReason::Disconnected,
                })
            });
        let mut link = SerialLink::new(transport);
        let mut serial = SerialData::new(1, 4);
        assert!(link.transmit(&mut serial).is_ok());
        assert!(matches!(
            link.transmit(&mut serial),
            Err(PegasusException::Cancelled { .. })
        ));
    }

    #[test]
    fn shutdown_zeroes_waits_and_releases_once() {
        let mut transport = MockTransport::new();
        let mut seq = Sequence::new();
        transport
            .expect_send()
            .withf(|line: &str| line == "0|0,0|0,0|0\n")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        transport
            .expect_release()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        let mut link = SerialLink::new(transport);
        let mut serial = SerialData::new(2, 4);
        serial.set_m_speed(&[120, -40, 0]).unwrap();
        let mut clock = StepClock::new(Duration::from_millis(1));
        link.shutdown(&mut serial, &mut clock, DT_COMM).unwrap();
        assert!(clock.slept() >= DT_COMM);
        assert!(link.is_released());
        assert_eq!(serial.m_speed(), &[0, 0, 0]);
        link.shutdown(&mut serial, &mut clock, DT_COMM).unwrap();
    }

    #[test]
    fn release_happens_even_if_the_zero_line_fails() {
        let mut transport = MockTransport::new();
        transport.expect_send().times(1).returning(|_| {
            Err(PegasusException::Cancelled {
                reason: CancelReason::Disconnected,
            })
        });
        transport.expect_release().times(1).returning(|| Ok(()));
        let mut link = SerialLink::new(transport);
        let mut serial = SerialData::new(2, 4);
        let mut clock = StepClock::new(Duration::from_millis(1));
        assert!(link.shutdown(&mut serial, &mut clock, DT_COMM).is_err());
    }

    #[test]
    fn parse_rules() {
        assert_eq!(parse_angles(" [1, -2.5 ,3e-1] ", 3).unwrap(), vec![1., -2.5, 0.3]);
        assert!(parse_angles("1,2", 3).is_err());
        assert!(parse_angles("1,2,3,4", 3).is_err());
        assert!(parse_angles("1,,3", 3).is_err());
        assert!(parse_angles("1,NaN,3", 3).is_err());
        match parse_angles("a,b", 2) {
            Err(PegasusException::ParseError { line, .. }) => assert_eq!(line, "a,b"),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn unterminated_garbage_is_discarded() {
        let mut buffer = LineBuffer::new();
        buffer.extend(&vec![b'1'; MAX_PENDING_BYTES + 1]);
        assert_eq!(buffer.pending(), 0);
        buffer.extend(b"1,2\n3");
        assert_eq!(buffer.next_line().unwrap(), "1,2");
        assert!(buffer.next_line().is_none());
        assert_eq!(buffer.pending(), 1);
    }

    #[test]
    fn disconnects_cancel_the_session() {
        assert!(matches!(
            map_io_error(io::Error::from(io::ErrorKind::BrokenPipe)),
            PegasusException::Cancelled {
                reason: CancelReason::Disconnected
            }
        ));
        assert!(matches!(
            map_io_error(io::Error::from(io::ErrorKind::TimedOut)),
            PegasusException::SerialException { .. }
        ));
    }
}
