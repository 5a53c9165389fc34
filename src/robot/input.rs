// Copyright (c) 2021 Marco Boneberger
// Licensed under the EUPL-1.2-or-later

//! Contains the sources of external input polled by the control loop and the key bindings of
//! the manual velocity modes.
//!
//! Joint velocity keys, one pair per joint (positive/negative): `q/a`, `w/s`, `e/d`, `r/f`,
//! `t/g`. `c` and `x` raise and lower the selected joint speed.
//!
//! End effector keys, all in the space frame: `w/s`, `a/d`, `z/x` move along x, y and z;
//! `q/e`, `r/f`, `c/v` rotate about x, y and z. `t/y` raise and lower the linear speed, `g/h`
//! the angular speed.
use crate::exception::create_fault;
use crate::utils::{JointVector, Twist};
use crate::PegasusResult;
use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::Arc;

/// An event delivered by a user interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputEvent {
    KeyDown(char),
    KeyUp(char),
    /// the user wants to stop the arm
    Quit,
}

/// Source of [`InputEvent`]s. Polling must not block.
pub trait InputSource {
    fn poll_events(&mut self) -> Vec<InputEvent>;
}

impl<I: InputSource + ?Sized> InputSource for Box<I> {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        (**self).poll_events()
    }
}

/// A source that never delivers anything.
#[derive(Debug, Default, Copy, Clone)]
pub struct NoInput;

impl InputSource for NoInput {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        Vec::new()
    }
}

/// Events pushed by another thread, e.g. a window reading the keyboard.
///
/// When every sender is gone the user can no longer steer the arm, so a single
/// [`InputEvent::Quit`] is delivered.
pub struct ChannelInput {
    receiver: Receiver<InputEvent>,
    disconnected: bool,
}

impl ChannelInput {
    pub fn new() -> (Sender<InputEvent>, ChannelInput) {
        let (sender, receiver) = channel();
        (
            sender,
            ChannelInput {
                receiver,
                disconnected: false,
            },
        )
    }
}

impl InputSource for ChannelInput {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        self.disconnected = true;
                        events.push(InputEvent::Quit);
                    }
                    break;
                }
            }
        }
        events
    }
}

/// Adds SIGINT and SIGTERM as [`InputEvent::Quit`] to another source.
pub struct SignalInput<I: InputSource> {
    quit: Arc<AtomicBool>,
    inner: I,
}

impl<I: InputSource> SignalInput<I> {
    /// Registers the signal handlers.
    /// # Errors
    /// * [`FaultException`](`crate::exception::PegasusException::FaultException`) if a handler
    /// cannot be registered.
    pub fn new(inner: I) -> PegasusResult<Self> {
        let quit = Arc::new(AtomicBool::new(false));
        for signal in [SIGINT, SIGTERM].iter() {
            signal_hook::flag::register(*signal, Arc::clone(&quit))
                .map_err(|e| create_fault(format!("cannot register signal handler: {}", e)))?;
        }
        Ok(SignalInput { quit, inner })
    }

    /// flag raised by the signal handlers
    pub fn quit_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.quit)
    }
}

impl<I: InputSource> InputSource for SignalInput<I> {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        let mut events = self.inner.poll_events();
        if self.quit.swap(false, Ordering::Relaxed) {
            events.push(InputEvent::Quit);
        }
        events
    }
}

const JOINT_KEYS: [(char, char); 5] = [('q', 'a'), ('w', 's'), ('e', 'd'), ('r', 'f'), ('t', 'g')];

/// Desired joint velocities from held keys.
#[derive(Debug, Clone)]
pub struct JointRateInput {
    rates: JointVector,
    selected: f64,
    increment: f64,
    max: f64,
}

impl JointRateInput {
    /// The selected speed starts at one `increment` and never exceeds `max`.
    pub fn new(dof: usize, increment: f64, max: f64) -> Self {
        JointRateInput {
            rates: JointVector::zeros(dof),
            selected: increment.min(max),
            increment,
            max,
        }
    }

    pub fn rates(&self) -> &JointVector {
        &self.rates
    }

    pub fn selected_speed(&self) -> f64 {
        self.selected
    }

    /// Applies one event, a held key keeps its joint moving until it is released.
    pub fn apply(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::KeyDown(key) => match key.to_ascii_lowercase() {
                'c' => {
                    self.selected = (self.selected + self.increment).min(self.max);
                    info!("joint speed: {} rad/s", self.selected);
                }
                'x' => {
                    self.selected = (self.selected - self.increment).max(0.);
                    info!("joint speed: {} rad/s", self.selected);
                }
                key => {
                    if let Some((joint, positive)) = self.binding(key) {
                        self.rates[joint] = if positive {
                            self.selected
                        } else {
                            -self.selected
                        };
                    }
                }
            },
            InputEvent::KeyUp(key) => {
                if let Some((joint, _)) = self.binding(key.to_ascii_lowercase()) {
                    self.rates[joint] = 0.;
                }
            }
            InputEvent::Quit => {}
        }
    }

    fn binding(&self, key: char) -> Option<(usize, bool)> {
        JOINT_KEYS
            .iter()
            .take(self.rates.len())
            .enumerate()
            .find_map(|(joint, (positive, negative))| {
                if key == *positive {
                    Some((joint, true))
                } else if key == *negative {
                    Some((joint, false))
                } else {
                    None
                }
            })
    }
}

/// (positive key, negative key, twist component)
const TWIST_KEYS: [(char, char, usize); 6] = [
    ('q', 'e', 0),
    ('r', 'f', 1),
    ('c', 'v', 2),
    ('w', 's', 3),
    ('a', 'd', 4),
    ('z', 'x', 5),
];

/// Desired end effector twist in the space frame from held keys.
#[derive(Debug, Clone)]
pub struct TwistRateInput {
    twist: Twist,
    linear: f64,
    angular: f64,
    linear_increment: f64,
    angular_increment: f64,
    v_max: f64,
    w_max: f64,
}

impl TwistRateInput {
    pub fn new(linear_increment: f64, angular_increment: f64, v_max: f64, w_max: f64) -> Self {
        TwistRateInput {
            twist: Twist::zeros(),
            linear: linear_increment.min(v_max),
            angular: angular_increment.min(w_max),
            linear_increment,
            angular_increment,
            v_max,
            w_max,
        }
    }

    pub fn twist(&self) -> &Twist {
        &self.twist
    }

    /// selected (linear, angular) speed
    pub fn selected_speeds(&self) -> (f64, f64) {
        (self.linear, self.angular)
    }

    pub fn apply(&mut self, event: &InputEvent) {
        match *event {
            InputEvent::KeyDown(key) => match key.to_ascii_lowercase() {
                't' => {
                    self.linear = (self.linear + self.linear_increment).min(self.v_max);
                    info!("linear velocity: {} m/s", self.linear);
                }
                'y' => {
                    self.linear = (self.linear - self.linear_increment).max(0.);
                    info!("linear velocity: {} m/s", self.linear);
                }
                'g' => {
                    self.angular = (self.angular + self.angular_increment).min(self.w_max);
                    info!("angular velocity: {} rad/s", self.angular);
                }
                'h' => {
                    self.angular = (self.angular - self.angular_increment).max(0.);
                    info!("angular velocity: {} rad/s", self.angular);
                }
                key => {
                    if let Some((index, positive)) = twist_binding(key) {
                        let speed = if index < 3 { self.angular } else { self.linear };
                        self.twist[index] = if positive { speed } else { -speed };
                    }
                }
            },
            InputEvent::KeyUp(key) => {
                if let Some((index, _)) = twist_binding(key.to_ascii_lowercase()) {
                    self.twist[index] = 0.;
                }
            }
            InputEvent::Quit => {}
        }
    }
}

fn twist_binding(key: char) -> Option<(usize, bool)> {
    TWIST_KEYS.iter().find_map(|(positive, negative, index)| {
        if key == *positive {
            Some((*index, true))
        } else if key == *negative {
            Some((*index, false))
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use crate::robot::input::{
        ChannelInput, InputEvent, InputSource, JointRateInput, NoInput, TwistRateInput,
    };

    #[test]
    fn joint_keys_hold_until_released() {
        let mut input = JointRateInput::new(5, 0.1, 0.3);
        input.apply(&InputEvent::KeyDown('w'));
        input.apply(&InputEvent::KeyDown('G'));
        assert_eq!(input.rates().as_slice(), &[0., 0.1, 0., 0., -0.1]);
        input.apply(&InputEvent::KeyUp('w'));
        assert_eq!(input.rates().as_slice(), &[0., 0., 0., 0., -0.1]);
        input.apply(&InputEvent::KeyUp('g'));
        assert_eq!(input.rates().as_slice(), &[0.; 5]);
    }

    #[test]
    fn joint_speed_is_limited() {
        let mut input = JointRateInput::new(5, 0.1, 0.25);
        for _ in 0..5 {
            input.apply(&InputEvent::KeyDown('c'));
        }
        assert_eq!(input.selected_speed(), 0.25);
        for _ in 0..5 {
            input.apply(&InputEvent::KeyDown('x'));
        }
        assert_eq!(input.selected_speed(), 0.);
        input.apply(&InputEvent::KeyDown('q'));
        assert_eq!(input.rates()[0], 0.);
    }

    #[test]
    fn keys_beyond_the_arm_are_ignored() {
        let mut input = JointRateInput::new(3, 0.1, 0.5);
        input.apply(&InputEvent::KeyDown('t'));
        input.apply(&InputEvent::KeyDown('z'));
        assert_eq!(input.rates().as_slice(), &[0.; 3]);
    }

    #[test]
    fn twist_keys() {
        let mut input = TwistRateInput::new(0.01, 0.1, 0.05, 0.5);
        input.apply(&InputEvent::KeyDown('w'));
        input.apply(&InputEvent::KeyDown('v'));
        input.apply(&InputEvent::KeyDown('x'));
        assert_eq!(input.twist().as_slice(), &[0., 0., -0.1, 0.01, 0., -0.01]);
        input.apply(&InputEvent::KeyUp('d'));
        input.apply(&InputEvent::KeyUp('w'));
        assert_eq!(input.twist()[3], 0.);
        assert_eq!(input.twist()[5], -0.01);
        for _ in 0..10 {
            input.apply(&InputEvent::KeyDown('t'));
            input.apply(&InputEvent::KeyDown('g'));
        }
        assert_eq!(input.selected_speeds(), (0.05, 0.5));
        input.apply(&InputEvent::KeyDown('h'));
        assert!((input.selected_speeds().1 - 0.4).abs() < 1e-12);
    }

    #[test]
    fn channel_delivers_in_order_and_quits_when_closed() {
        let (sender, mut input) = ChannelInput::new();
        sender.send(InputEvent::KeyDown('q')).unwrap();
        sender.send(InputEvent::KeyUp('q')).unwrap();
        assert_eq!(
            input.poll_events(),
            vec![InputEvent::KeyDown('q'), InputEvent::KeyUp('q')]
        );
        assert!(input.poll_events().is_empty());
        drop(sender);
        assert_eq!(input.poll_events(), vec![InputEvent::Quit]);
        assert!(input.poll_events().is_empty());
        assert!(NoInput.poll_events().is_empty());
    }
}
