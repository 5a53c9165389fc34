// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the state exchanged with the microcontroller during a session.
use crate::exception::check_dimension;
use crate::robot::motor_command::{Direction, PwmCommand, MAX_DUTY};
use crate::utils::JointVector;
use crate::PegasusResult;
use std::collections::VecDeque;
use std::time::Duration;

/// Joint angles reported by the microcontroller. The last slot belongs to the gripper.
#[derive(Debug, Clone, PartialEq)]
pub struct JointSnapshot {
    pub angles: Vec<f64>,
    /// session time at which the line was parsed
    pub received_at: Duration,
}

/// Measured angles and commanded duties of one session.
///
/// All per-slot sequences have `len_data = dof + 1` entries. The gripper slot is never driven
/// by the control modes and is always sent as `0|0`.
#[derive(Debug, Clone)]
pub struct SerialData {
    curr_angle: VecDeque<JointSnapshot>,
    m_speed: Vec<i32>,
    rot_dir_des: Vec<u8>,
    data_out: Vec<String>,
    len_data: usize,
    history_size: usize,
    snapshots_received: usize,
}

impl SerialData {
    /// Creates the session state for an arm with `dof` joints. The history starts with one
    /// all-zero snapshot and keeps at most `history_size` snapshots.
    pub fn new(dof: usize, history_size: usize) -> Self {
        let len_data = dof + 1;
        let mut curr_angle = VecDeque::with_capacity(history_size.max(1));
        curr_angle.push_back(JointSnapshot {
            angles: vec![0.; len_data],
            received_at: Duration::from_secs(0),
        });
        let mut data = SerialData {
            curr_angle,
            m_speed: vec![0; len_data],
            rot_dir_des: vec![0; len_data],
            data_out: vec![String::new(); len_data],
            len_data,
            history_size: history_size.max(1),
            snapshots_received: 0,
        };
        data.refresh_data_out();
        data
    }

    /// number of joints, without the gripper
    pub fn dof(&self) -> usize {
        self.len_data - 1
    }
    pub fn len_data(&self) -> usize {
        self.len_data
    }
    pub fn history(&self) -> &VecDeque<JointSnapshot> {
        &self.curr_angle
    }
    /// number of snapshots parsed since the session started
    pub fn snapshots_received(&self) -> usize {
        self.snapshots_received
    }
    pub fn m_speed(&self) -> &[i32] {
        &self.m_speed
    }
    pub fn rot_dir_des(&self) -> &[u8] {
        &self.rot_dir_des
    }
    pub fn data_out(&self) -> &[String] {
        &self.data_out
    }

    /// most recent snapshot
    pub fn current(&self) -> &JointSnapshot {
        // the history is never empty, push_snapshot drops only when it is full
        &self.curr_angle[self.curr_angle.len() - 1]
    }

    /// Angles of the arm joints of the most recent snapshot.
    pub fn joint_angles(&self) -> JointVector {
        JointVector::from_column_slice(&self.current().angles[..self.dof()])
    }

    /// Appends a snapshot of `len_data` angles and drops the oldest one if the history is full.
    pub fn push_snapshot(&mut self, angles: Vec<f64>, received_at: Duration) -> PegasusResult<()> {
        check_dimension(self.len_data, angles.len())?;
        if self.curr_angle.len() == self.history_size {
            self.curr_angle.pop_front();
        }
        self.curr_angle.push_back(JointSnapshot {
            angles,
            received_at,
        });
        self.snapshots_received += 1;
        Ok(())
    }

    /// Whether at least one snapshot was parsed. Before that the history only holds the
    /// all-zero placeholder, which is not a measurement.
    pub fn has_measurement(&self) -> bool {
        self.snapshots_received > 0
    }

    /// Joint velocities from the two most recent snapshots, zero if they are not usable. The
    /// initial placeholder never takes part.
    pub fn measured_velocity(&self) -> JointVector {
        let n = self.curr_angle.len();
        if n < 2 || self.snapshots_received < 2 {
            return JointVector::zeros(self.dof());
        }
        let last = &self.curr_angle[n - 1];
        let previous = &self.curr_angle[n - 2];
        let dt = last.received_at.as_secs_f64() - previous.received_at.as_secs_f64();
        if dt <= 0. {
            return JointVector::zeros(self.dof());
        }
        JointVector::from_iterator(
            self.dof(),
            last.angles[..self.dof()]
                .iter()
                .zip(previous.angles[..self.dof()].iter())
                .map(|(a, b)| (a - b) / dt),
        )
    }

    /// Stores the commands of the arm joints. The gripper slot is commanded zero.
    ///
    /// Only the signed duty is kept, so a command with zero duty is sent as `0|0` whatever its
    /// direction. The motor does not move at zero duty either way.
    pub fn set_commands(&mut self, commands: &[PwmCommand]) -> PegasusResult<()> {
        check_dimension(self.dof(), commands.len())?;
        for (slot, command) in self.m_speed.iter_mut().zip(commands.iter()) {
            *slot = command.signed();
        }
        self.m_speed[self.len_data - 1] = 0;
        Ok(())
    }

    /// Stores signed duties directly, one per slot including the gripper.
    pub fn set_m_speed(&mut self, m_speed: &[i32]) -> PegasusResult<()> {
        check_dimension(self.len_data, m_speed.len())?;
        self.m_speed.copy_from_slice(m_speed);
        Ok(())
    }

    /// Commands every motor to stop.
    pub fn zero_commands(&mut self) {
        self.m_speed.iter_mut().for_each(|m| *m = 0);
        self.refresh_data_out();
    }

    /// Regenerates `rot_dir_des` and `data_out` from `m_speed`.
    pub fn refresh_data_out(&mut self) {
        for i in 0..self.len_data {
            let speed = self.m_speed[i];
            let magnitude = speed.unsigned_abs().min(MAX_DUTY as u32);
            self.rot_dir_des[i] = Direction::of(speed as f64).bit();
            self.data_out[i] = format!("{}|{}", magnitude, self.rot_dir_des[i]);
        }
    }

    /// The wire line `"<mag0>|<dir0>,…,<magN>|<dirN>\n"` of the current `data_out`.
    pub fn encode_line(&self) -> String {
        let mut line = self.data_out.join(",");
        line.push('\n');
        line
    }
}

#[cfg(test)]
mod tests {
    use crate::robot::motor_command::{Direction, PwmCommand};
    use crate::robot::serial_data::SerialData;
    use std::time::Duration;

    #[test]
    fn transmit_tokens_follow_m_speed() {
        let mut data = SerialData::new(5, 16);
        data.set_m_speed(&[10, -10, 0, 0, 0, 0]).unwrap();
        data.refresh_data_out();
        assert_eq!(data.data_out()[0], "10|1");
        assert_eq!(data.data_out()[1], "10|0");
        assert_eq!(data.rot_dir_des(), &[1, 0, 0, 0, 0, 0]);
        assert_eq!(data.encode_line(), "10|1,10|0,0|0,0|0,0|0,0|0\n");
    }

    #[test]
    fn gripper_slot_stays_zero() {
        let mut data = SerialData::new(2, 16);
        let command = PwmCommand {
            duty: 200,
            direction: Direction::Positive,
        };
        data.set_m_speed(&[1, 1, 1]).unwrap();
        data.set_commands(&[command, command]).unwrap();
        assert_eq!(data.m_speed(), &[200, 200, 0]);
        assert!(data.set_commands(&[command]).is_err());
    }

    #[test]
    fn history_is_bounded() {
        let mut data = SerialData::new(1, 3);
        assert_eq!(data.history().len(), 1);
        for i in 1..=5 {
            data.push_snapshot(vec![i as f64, 0.], Duration::from_millis(i * 10))
                .unwrap();
        }
        assert_eq!(data.history().len(), 3);
        assert_eq!(data.current().angles[0], 5.);
        assert_eq!(data.history()[0].angles[0], 3.);
        assert_eq!(data.snapshots_received(), 5);
        assert!(data.push_snapshot(vec![1.], Duration::from_secs(1)).is_err());
        assert_eq!(data.history().len(), 3);
    }

    #[test]
    fn velocity_from_last_two_snapshots() {
        let mut data = SerialData::new(2, 8);
        data.push_snapshot(vec![0., 1., 0.], Duration::from_millis(100))
            .unwrap();
        data.push_snapshot(vec![0.1, 0.8, 0.], Duration::from_millis(200))
            .unwrap();
        let velocity = data.measured_velocity();
        assert_eq!(velocity.len(), 2);
        assert!((velocity[0] - 1.).abs() < 1e-9);
        assert!((velocity[1] + 2.).abs() < 1e-9);
        assert_eq!(data.joint_angles().as_slice(), &[0.1, 0.8]);
    }

    #[test]
    fn placeholder_is_not_a_measurement() {
        let mut data = SerialData::new(2, 8);
        assert!(!data.has_measurement());
        data.push_snapshot(vec![0.8, 0.4, 0.], Duration::from_millis(20))
            .unwrap();
        assert!(data.has_measurement());
        // the jump from the placeholder to the first line is no motion
        assert_eq!(data.measured_velocity().as_slice(), &[0., 0.]);
    }

    #[test]
    fn zero_duty_drops_the_direction() {
        let mut data = SerialData::new(1, 8);
        let command = PwmCommand {
            duty: 0,
            direction: Direction::Positive,
        };
        data.set_commands(&[command]).unwrap();
        data.refresh_data_out();
        assert_eq!(data.encode_line(), "0|0,0|0\n");
    }

    #[test]
    fn zeroing_reaches_the_wire() {
        let mut data = SerialData::new(3, 8);
        data.set_m_speed(&[255, -3, 7, 0]).unwrap();
        data.zero_commands();
        assert_eq!(data.encode_line(), "0|0,0|0,0|0,0|0\n");
    }
}
