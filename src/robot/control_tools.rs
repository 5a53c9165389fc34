// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains helpers for running the control loop with realtime priority.
use crate::exception::PegasusException;
use crate::robot::control_types::RealtimeConfig;
use crate::PegasusResult;
use log::info;
use std::path::Path;

/// Determines whether the current OS kernel is a realtime kernel.
///
/// On Linux, this checks for the existence of `/sys/kernel/realtime`.
pub fn has_realtime_kernel() -> bool {
    Path::new("/sys/kernel/realtime").exists()
}

/// Sets the current thread to the highest possible scheduler priority.
///
/// # Errors
/// * RealTimeException if realtime priority cannot be set for the current thread.
///
/// If the method returns an Error please check your /etc/security/limits.conf file
/// There should be a line like this:
/// ```text
///pi            -       rtprio          99
/// ```
pub fn set_current_thread_to_highest_scheduler_priority() -> PegasusResult<()> {
    unsafe {
        let max_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_priority == -1 {
            return Err(PegasusException::RealTimeException {
                message: "pegasus: unable to get maximum possible thread priority".to_string(),
            });
        }
        let thread_param = libc::sched_param {
            // one below the maximum, the kernel's own threads keep the top priority
            sched_priority: max_priority - 1,
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &thread_param) != 0 {
            return Err(PegasusException::RealTimeException {
                message: "pegasus: unable to set realtime scheduling".to_string(),
            });
        }
        // keep the loop's memory from being swapped out
        if libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) != 0 {
            return Err(PegasusException::RealTimeException {
                message: "pegasus: unable to lock memory".to_string(),
            });
        }
    }
    Ok(())
}

/// Applies the realtime configuration to the calling thread.
///
/// # Errors
/// * RealTimeException if realtime is enforced but the kernel has no realtime capabilities or
/// the priority cannot be raised.
pub fn apply_realtime_config(config: RealtimeConfig) -> PegasusResult<()> {
    match config {
        RealtimeConfig::Ignore => Ok(()),
        RealtimeConfig::Enforce => {
            if !has_realtime_kernel() {
                return Err(PegasusException::RealTimeException {
                    message: "pegasus: Running kernel does not have realtime capabilities."
                        .to_string(),
                });
            }
            set_current_thread_to_highest_scheduler_priority()?;
            info!("control loop runs with realtime priority");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::robot::control_tools::apply_realtime_config;
    use crate::robot::control_types::RealtimeConfig;

    #[test]
    fn ignoring_realtime_always_works() {
        assert!(apply_realtime_config(RealtimeConfig::Ignore).is_ok());
    }
}
