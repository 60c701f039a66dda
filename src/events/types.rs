// Timed event types
// Performance-timed notes and rests with a parallel notation-time attribute

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::groove::tuplet::TupletSpec;
use crate::notation::duration::NotatableDuration;

/// Whether an event sounds or is silent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Note,
    Rest,
}

impl EventKind {
    /// Accepts both PascalCase and snake_case
    pub fn from_string(s: &str) -> Self {
        match s {
            "Rest" | "rest" => EventKind::Rest,
            _ => EventKind::Note,
        }
    }

    pub fn to_string(&self) -> &'static str {
        match self {
            EventKind::Note => "Note",
            EventKind::Rest => "Rest",
        }
    }
}

/// Display timing attached to an event after quantization
///
/// Stored next to the performance timing, never in place of it, so that both can be
/// read back independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotationTime {
    /// Notated start in ticks
    pub start_ticks: i64,

    /// Notated duration in ticks (sum of the fragment chain)
    pub duration_ticks: i64,

    /// Tied chain of note values that spells the duration
    pub duration: NotatableDuration,

    /// Enclosing tuplet, if the event is notated inside one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuplet: Option<TupletSpec>,
}

impl NotationTime {
    pub fn end_ticks(&self) -> i64 {
        self.start_ticks + self.duration_ticks
    }

    /// True when the notated value needs more than one tied fragment
    pub fn is_tied(&self) -> bool {
        self.duration.is_tied()
    }
}

/// A performed note or rest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// Performance start in ticks
    pub start_ticks: i64,

    /// Performance duration in ticks (>= 0)
    pub duration_ticks: i64,

    pub kind: EventKind,

    /// MIDI pitch for notes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<u8>,

    /// Voice within the staff (0-indexed)
    #[serde(default)]
    pub voice: u32,

    /// Notation timing written by the quantizer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notation: Option<NotationTime>,
}

impl TimedEvent {
    /// Create a note with a generated UUID in voice 0
    pub fn note(start_ticks: i64, duration_ticks: i64, pitch: u8) -> Self {
        TimedEvent {
            id: Uuid::new_v4(),
            start_ticks,
            duration_ticks,
            kind: EventKind::Note,
            pitch: Some(pitch),
            voice: 0,
            notation: None,
        }
    }

    /// Create a rest with a generated UUID in voice 0
    pub fn rest(start_ticks: i64, duration_ticks: i64) -> Self {
        TimedEvent {
            id: Uuid::new_v4(),
            start_ticks,
            duration_ticks,
            kind: EventKind::Rest,
            pitch: None,
            voice: 0,
            notation: None,
        }
    }

    /// Move the event to another voice
    pub fn in_voice(mut self, voice: u32) -> Self {
        self.voice = voice;
        self
    }

    pub fn end_ticks(&self) -> i64 {
        self.start_ticks + self.duration_ticks
    }

    pub fn is_rest(&self) -> bool {
        self.kind == EventKind::Rest
    }

    pub fn is_quantized(&self) -> bool {
        self.notation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_round_trip() {
        let kind = EventKind::Rest;
        assert_eq!(EventKind::from_string(kind.to_string()), kind);
        assert_eq!(EventKind::from_string("rest"), EventKind::Rest);
        assert_eq!(EventKind::from_string("anything"), EventKind::Note);
    }

    #[test]
    fn test_event_creation() {
        let note = TimedEvent::note(100, 50, 60).in_voice(2);

        assert_eq!(note.start_ticks, 100);
        assert_eq!(note.duration_ticks, 50);
        assert_eq!(note.end_ticks(), 150);
        assert_eq!(note.voice, 2);
        assert_eq!(note.pitch, Some(60));
        assert!(!note.is_rest());
        assert!(!note.is_quantized());

        let rest = TimedEvent::rest(0, 240);
        assert!(rest.is_rest());
        assert_eq!(rest.pitch, None);
    }

    #[test]
    fn test_event_json_defaults() {
        let json = r#"{
            "id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "start_ticks": 10,
            "duration_ticks": 20,
            "kind": "note"
        }"#;
        let event: TimedEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.voice, 0);
        assert!(event.notation.is_none());
        assert_eq!(event.kind, EventKind::Note);
    }
}
