//! Scripted input: timed key segments replayed against the trial clock.
//!
//! Stands in for the button box so whole runs can be replayed headless. Each
//! segment holds its keys from `at` until the next segment starts; `confirm`
//! and `abort` fire once, on the first poll at or after `at`.

use std::fs;
use std::path::Path;

use navtrial::input::{InputError, InputSource, InputState, Key};
use serde::{Deserialize, Serialize};

use crate::error::RunError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptSegment {
    /// Seconds since trial start.
    pub at: f64,
    /// Held key names (`forward`, `rotate_left`, ...).
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub abort: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InputScript {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub segments: Vec<ScriptSegment>,
}

impl InputScript {
    pub fn load(path: &Path) -> Result<Self, RunError> {
        let text = fs::read_to_string(path).map_err(|source| RunError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| RunError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Walk out, turn onto a wide circle and keep circling until a target
    /// has appeared, then mark a spot and confirm through feedback.
    pub fn demo() -> Self {
        let mut segments = vec![
            segment(0.5, &["forward"]),
            segment(1.5, &["rotate_right"]),
        ];
        // 0.3 m straight, 15 degrees right: a loop of roughly 1.15 m radius.
        let mut t = 3.0;
        while t < 28.0 {
            segments.push(segment(t, &["forward"]));
            segments.push(segment(t + 0.3, &["rotate_right"]));
            t += 0.55;
        }
        segments.push(ScriptSegment {
            at: 28.5,
            confirm: true,
            ..ScriptSegment::default()
        });
        segments.push(segment(29.0, &["rotate_left"]));
        segments.push(segment(29.5, &["forward"]));
        segments.push(ScriptSegment {
            at: 30.5,
            confirm: true,
            ..ScriptSegment::default()
        });
        segments.push(ScriptSegment {
            at: 32.0,
            confirm: true,
            ..ScriptSegment::default()
        });
        Self {
            name: "builtin_demo".to_string(),
            segments,
        }
    }
}

fn segment(at: f64, keys: &[&str]) -> ScriptSegment {
    ScriptSegment {
        at,
        keys: keys.iter().map(|k| k.to_string()).collect(),
        ..ScriptSegment::default()
    }
}

#[derive(Debug, Clone)]
struct CompiledSegment {
    at: f64,
    held: InputState,
    confirm: bool,
    abort: bool,
}

/// An [`InputSource`] replaying an [`InputScript`].
#[derive(Debug, Clone)]
pub struct ScriptedInput {
    name: String,
    segments: Vec<CompiledSegment>,
    /// Index of the first segment whose one-shot keys have not fired.
    next_edge: usize,
}

impl ScriptedInput {
    pub fn new(script: InputScript) -> Result<Self, RunError> {
        let mut segments = Vec::with_capacity(script.segments.len());
        for (i, seg) in script.segments.iter().enumerate() {
            if !(seg.at.is_finite() && seg.at >= 0.0) {
                return Err(RunError::Script(format!("segment {i}: bad time {}", seg.at)));
            }
            let mut held = InputState::idle();
            for name in &seg.keys {
                let key = Key::from_name(name)
                    .ok_or_else(|| RunError::Script(format!("segment {i}: unknown key {name:?}")))?;
                if matches!(key, Key::Confirm | Key::Abort | Key::DebugToggle) {
                    return Err(RunError::Script(format!(
                        "segment {i}: {name:?} cannot be held"
                    )));
                }
                held.set(key, true);
            }
            segments.push(CompiledSegment {
                at: seg.at,
                held,
                confirm: seg.confirm,
                abort: seg.abort,
            });
        }
        segments.sort_by(|a, b| a.at.total_cmp(&b.at));
        Ok(Self {
            name: script.name,
            segments,
            next_edge: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self, trial_time: f64) -> Result<InputState, InputError> {
        let active = self.segments.partition_point(|s| s.at <= trial_time);
        let mut state = match active.checked_sub(1) {
            Some(i) => self.segments[i].held,
            None => InputState::idle(),
        };
        // Edges are consumed one per poll so two presses never share a tick.
        while self.next_edge < active {
            let seg = &self.segments[self.next_edge];
            self.next_edge += 1;
            if seg.confirm || seg.abort {
                state.confirm = seg.confirm;
                state.abort = seg.abort;
                break;
            }
        }
        Ok(state)
    }

    fn reset(&mut self) {
        self.next_edge = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(json: &str) -> ScriptedInput {
        ScriptedInput::new(serde_json::from_str(json).unwrap()).unwrap()
    }

    #[test]
    fn keys_are_held_between_segments() {
        let mut s = script(
            r#"{ "segments": [ { "at": 1.0, "keys": ["forward"] },
                               { "at": 2.0, "keys": ["left", "forward"] },
                               { "at": 3.0 } ] }"#,
        );
        assert_eq!(s.poll(0.5).unwrap(), InputState::idle());
        assert!(s.poll(1.5).unwrap().forward);
        let both = s.poll(2.5).unwrap();
        assert!(both.forward && both.rotate_left);
        assert_eq!(s.poll(3.5).unwrap(), InputState::idle());
    }

    #[test]
    fn confirm_fires_once_per_segment() {
        let mut s = script(
            r#"{ "segments": [ { "at": 1.0, "confirm": true },
                               { "at": 1.01, "confirm": true } ] }"#,
        );
        assert!(!s.poll(0.9).unwrap().confirm);
        // Both segments are due; they still land on separate ticks.
        assert!(s.poll(1.1).unwrap().confirm);
        assert!(s.poll(1.12).unwrap().confirm);
        assert!(!s.poll(1.14).unwrap().confirm);

        s.reset();
        assert!(s.poll(1.2).unwrap().confirm);
    }

    #[test]
    fn rejects_unknown_and_one_shot_keys() {
        let bad: InputScript =
            serde_json::from_str(r#"{ "segments": [ { "at": 0.0, "keys": ["jump"] } ] }"#).unwrap();
        assert!(matches!(ScriptedInput::new(bad), Err(RunError::Script(_))));
        let held_confirm: InputScript =
            serde_json::from_str(r#"{ "segments": [ { "at": 0.0, "keys": ["confirm"] } ] }"#)
                .unwrap();
        assert!(ScriptedInput::new(held_confirm).is_err());
    }

    #[test]
    fn demo_script_compiles() {
        let demo = ScriptedInput::new(InputScript::demo()).unwrap();
        assert_eq!(demo.name(), "builtin_demo");
        assert!(demo.len() > 40);
    }
}
