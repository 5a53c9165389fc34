// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains exception and Result definitions
use crate::robot::logger::Record;
use std::fmt;
use thiserror::Error;

/// Why a running control loop was cancelled.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// The user asked to quit (keyboard interrupt or a quit event of the input source).
    UserQuit,
    /// The serial link to the microcontroller went away.
    Disconnected,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CancelReason::UserQuit => write!(f, "quit requested by user"),
            CancelReason::Disconnected => write!(f, "serial link disconnected"),
        }
    }
}

/// Represents all kind of errors which can occur while commanding the arm.
#[derive(Error, Debug)]
pub enum PegasusException {
    /// InputValidationError is returned if a setpoint is malformed or does not fit the robot.
    /// It never reaches the control loop, the caller is expected to ask again.
    #[error("Invalid input: {message}")]
    InputValidationError { message: String },

    /// DimensionMismatch is returned if a vector does not have one entry per joint.
    #[error("Dimension mismatch: expected {expected} values but got {found}")]
    DimensionMismatch {
        /// Number of values the robot model expects.
        expected: usize,
        /// Number of values which were provided.
        found: usize,
    },

    /// ParseError is returned for a corrupted or incomplete line from the microcontroller.
    /// The line is dropped, the loop keeps running.
    #[error("Malformed serial frame {line:?}: {message}")]
    ParseError { line: String, message: String },

    /// Cancelled is raised inside the control loop when it has to stop immediately.
    /// The safe shutdown sequence always runs before this leaves a session.
    #[error("Control loop cancelled: {reason}")]
    Cancelled { reason: CancelReason },

    /// FaultException is raised for every failure the control loop does not model, e.g. a
    /// non-finite torque. The arm is stopped before the fault is handed to the caller.
    #[error("{message}")]
    FaultException {
        /// States and commands logged just before the fault occurred.
        log: Option<Vec<Record>>,
        /// Explanatory string.
        message: String,
    },

    /// SerialException is returned if the serial port cannot be found, opened or written.
    #[error("{message}")]
    SerialException { message: String },

    /// ConfigException is returned if a settings file or robot description cannot be loaded.
    #[error("{message}")]
    ConfigException { message: String },

    /// RealTimeException is returned if the real-time priority cannot be set
    #[error("{message:?}")]
    RealTimeException { message: String },
}

impl PegasusException {
    /// Whether this error is a cancellation requested by the user.
    pub fn is_user_quit(&self) -> bool {
        matches!(
            self,
            PegasusException::Cancelled {
                reason: CancelReason::UserQuit
            }
        )
    }
}

/// creates an InputValidationError from anything printable
pub(crate) fn create_input_error<S: ToString>(message: S) -> PegasusException {
    PegasusException::InputValidationError {
        message: message.to_string(),
    }
}

/// creates a FaultException without an attached log
pub(crate) fn create_fault<S: ToString>(message: S) -> PegasusException {
    PegasusException::FaultException {
        log: None,
        message: message.to_string(),
    }
}

/// Fails with a DimensionMismatch if `found` differs from `expected`.
pub(crate) fn check_dimension(expected: usize, found: usize) -> PegasusResult<()> {
    if expected != found {
        return Err(PegasusException::DimensionMismatch { expected, found });
    }
    Ok(())
}

/// Result type which can have PegasusException as Error
pub type PegasusResult<T> = Result<T, PegasusException>;

#[cfg(test)]
mod tests {
    use crate::exception::{check_dimension, CancelReason, PegasusException};

    #[test]
    fn dimension_check() {
        assert!(check_dimension(5, 5).is_ok());
        match check_dimension(5, 4) {
            Err(PegasusException::DimensionMismatch { expected, found }) => {
                assert_eq!(expected, 5);
                assert_eq!(found, 4);
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn user_quit_is_recognized() {
        let quit = PegasusException::Cancelled {
            reason: CancelReason::UserQuit,
        };
        let disconnect = PegasusException::Cancelled {
            reason: CancelReason::Disconnected,
        };
        assert!(quit.is_user_quit());
        assert!(!disconnect.is_user_quit());
        assert_eq!(
            disconnect.to_string(),
            "Control loop cancelled: serial link disconnected"
        );
    }
}
