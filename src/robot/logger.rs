// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the logging type definitions for [`FaultException`](`crate::exception::PegasusException::FaultException`)
use crate::robot::control_types::ControlState;
use std::collections::VecDeque;
use std::fmt::Debug;
use std::time::Duration;

/// One row of the log contains the commands transmitted at `time` and the joint angles that
/// were the freshest measurement at that moment.
/// Provided by the [`FaultException`](`crate::exception::PegasusException::FaultException`).
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// session time of the transmission
    pub time: Duration,
    /// state the control loop was in
    pub state: ControlState,
    /// measured angles, gripper last
    pub angles: Vec<f64>,
    /// transmitted signed duties, gripper last
    pub command: Vec<i32>,
}

impl Record {
    /// creates a string representation based on the debug formatter
    pub fn log(&self) -> String {
        format!("{:?}", self)
    }
}

/// Ring buffer keeping the last `log_size` records.
pub(crate) struct Logger {
    records: VecDeque<Record>,
    log_size: usize,
}

impl Logger {
    pub fn new(log_size: usize) -> Self {
        Logger {
            records: VecDeque::with_capacity(log_size),
            log_size: log_size.max(1),
        }
    }
    pub fn log(&mut self, record: Record) {
        if self.records.len() == self.log_size {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }
    /// Hands out the records oldest first and clears the log.
    pub fn flush(&mut self) -> Vec<Record> {
        self.records.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::robot::control_types::ControlState;
    use crate::robot::logger::{Logger, Record};
    use std::time::Duration;

    fn record(i: u64) -> Record {
        Record {
            time: Duration::from_millis(i),
            state: ControlState::Force,
            angles: vec![0.; 2],
            command: vec![i as i32, 0],
        }
    }

    #[test]
    fn keeps_the_newest_records() {
        let mut logger = Logger::new(3);
        for i in 0..5 {
            logger.log(record(i));
        }
        let records = logger.flush();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], record(2));
        assert_eq!(records[2], record(4));
        assert!(logger.flush().is_empty());
        assert!(records[0].log().contains("Force"));
    }
}
