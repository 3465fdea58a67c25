//! Abstract input mapping.
//!
//! The engine never sees device codes; a collaborator maps whatever hardware
//! is attached (button box, keyboard, replay script) onto [`InputState`].

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    RotateLeft,
    RotateRight,
    Forward,
    Backward,
    Confirm,
    Abort,
    DebugToggle,
}

impl Key {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rotate_left" | "left" => Some(Key::RotateLeft),
            "rotate_right" | "right" => Some(Key::RotateRight),
            "forward" | "up" => Some(Key::Forward),
            "backward" | "down" => Some(Key::Backward),
            "confirm" | "enter" => Some(Key::Confirm),
            "abort" | "quit" => Some(Key::Abort),
            "debug" => Some(Key::DebugToggle),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Key::RotateLeft => "rotate_left",
            Key::RotateRight => "rotate_right",
            Key::Forward => "forward",
            Key::Backward => "backward",
            Key::Confirm => "confirm",
            Key::Abort => "abort",
            Key::DebugToggle => "debug",
        }
    }
}

/// One tick's worth of input.
///
/// Directional keys are level-triggered (held); `confirm`, `abort` and
/// `debug_toggle` are edge-triggered and are consumed once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputState {
    pub rotate_left: bool,
    pub rotate_right: bool,
    pub forward: bool,
    pub backward: bool,
    pub confirm: bool,
    pub abort: bool,
    pub debug_toggle: bool,
    /// A free-text annotation is being typed; confirm belongs to the text box.
    pub text_entry_active: bool,
}

impl InputState {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Key, down: bool) {
        match key {
            Key::RotateLeft => self.rotate_left = down,
            Key::RotateRight => self.rotate_right = down,
            Key::Forward => self.forward = down,
            Key::Backward => self.backward = down,
            Key::Confirm => self.confirm = down,
            Key::Abort => self.abort = down,
            Key::DebugToggle => self.debug_toggle = down,
        }
    }

    pub fn with(mut self, key: Key) -> Self {
        self.set(key, true);
        self
    }
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("input device disconnected")]
    Disconnected,
    #[error("input device error: {0}")]
    Device(String),
}

/// A polled input device.
pub trait InputSource {
    /// Sample the device for the tick at `trial_time` seconds.
    fn poll(&mut self, trial_time: f64) -> Result<InputState, InputError>;

    /// Called before each trial starts.
    fn reset(&mut self) {}
}

/// Poll once, degrading device errors to "no keys pressed".
pub fn poll_or_idle<S: InputSource + ?Sized>(source: &mut S, trial_time: f64) -> InputState {
    match source.poll(trial_time) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!("input poll failed at t={trial_time:.3}s, treating as idle: {e}");
            InputState::idle()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky {
        calls: u32,
    }

    impl InputSource for Flaky {
        fn poll(&mut self, _t: f64) -> Result<InputState, InputError> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Err(InputError::Disconnected)
            } else {
                Ok(InputState::idle().with(Key::Forward))
            }
        }
    }

    #[test]
    fn device_errors_become_idle_input() {
        let mut dev = Flaky { calls: 0 };
        assert!(poll_or_idle(&mut dev, 0.0).forward);
        assert_eq!(poll_or_idle(&mut dev, 0.1), InputState::idle());
        assert!(poll_or_idle(&mut dev, 0.2).forward);
    }

    #[test]
    fn key_names_round_trip() {
        for key in [
            Key::RotateLeft,
            Key::RotateRight,
            Key::Forward,
            Key::Backward,
            Key::Confirm,
            Key::Abort,
            Key::DebugToggle,
        ] {
            assert_eq!(Key::from_name(key.as_str()), Some(key));
        }
        assert_eq!(Key::from_name("jump"), None);
    }
}
