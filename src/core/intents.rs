//! Output intents for the rendering and audio collaborators.
//!
//! The engine only describes what should be shown or heard; it never reads
//! anything back from either subsystem.

use crate::spatial::{Pose, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarStyle {
    /// The participant during exploration.
    Player,
    /// The annotation marker (annotation and feedback phases).
    Marker,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DrawIntent {
    Arena { radius: f32 },
    Avatar { pose: Pose, style: AvatarStyle },
    Target { center: Vec2, radius: f32 },
    Hud { text: String },
    Fixation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundId {
    BorderBeep,
    TargetChime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Border,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioIntent {
    Play {
        sound: SoundId,
        channel: Channel,
        looped: bool,
    },
    Stop(Channel),
}

/// Rendering collaborator.
pub trait RenderSurface {
    fn present(&mut self, frame: &[DrawIntent]);
}

/// Audio collaborator. Fire-and-forget.
pub trait AudioSink {
    fn apply(&mut self, intent: AudioIntent);
}
