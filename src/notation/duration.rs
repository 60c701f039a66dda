// Note values and tied duration chains
// Power-of-two note values with up to three dots, measured in integer ticks

use serde::{Deserialize, Serialize};

/// Most dots a single fragment may carry before it has to be split
pub const MAX_DOTS: u8 = 3;

/// Power-of-two note value, longest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteValue {
    Breve,
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
    HundredTwentyEighth,
    TwoHundredFiftySixth,
}

impl NoteValue {
    /// All values from longest to shortest
    pub const ALL: [NoteValue; 10] = [
        NoteValue::Breve,
        NoteValue::Whole,
        NoteValue::Half,
        NoteValue::Quarter,
        NoteValue::Eighth,
        NoteValue::Sixteenth,
        NoteValue::ThirtySecond,
        NoteValue::SixtyFourth,
        NoteValue::HundredTwentyEighth,
        NoteValue::TwoHundredFiftySixth,
    ];

    /// Number of halvings from a breve
    pub fn halvings_from_breve(&self) -> u32 {
        *self as u32
    }

    /// Undotted length in ticks, or None when it is not a whole number of ticks
    pub fn ticks(&self, ppq: i64) -> Option<i64> {
        let breve = 8 * ppq;
        let divisor = 1i64 << self.halvings_from_breve();
        if breve % divisor == 0 {
            Some(breve / divisor)
        } else {
            None
        }
    }

    /// Length with `dots` dots, or None when any added half is fractional
    pub fn dotted_ticks(&self, ppq: i64, dots: u8) -> Option<i64> {
        let base = self.ticks(ppq)?;
        let mut total = base;
        let mut part = base;
        for _ in 0..dots {
            if part % 2 != 0 {
                return None;
            }
            part /= 2;
            total += part;
        }
        Some(total)
    }

    /// Value with exactly `ticks` undotted length
    pub fn from_ticks(ticks: i64, ppq: i64) -> Option<NoteValue> {
        NoteValue::ALL
            .iter()
            .copied()
            .find(|v| v.ticks(ppq) == Some(ticks))
    }

    /// Shortest value with an integral tick length at this resolution
    pub fn finest(ppq: i64) -> NoteValue {
        NoteValue::ALL
            .iter()
            .rev()
            .copied()
            .find(|v| v.ticks(ppq).is_some())
            .unwrap_or(NoteValue::Breve)
    }

    /// Next shorter value
    pub fn halved(&self) -> Option<NoteValue> {
        NoteValue::ALL.get(*self as usize + 1).copied()
    }

    /// MusicXML-style type name
    pub fn name(&self) -> &'static str {
        match self {
            NoteValue::Breve => "breve",
            NoteValue::Whole => "whole",
            NoteValue::Half => "half",
            NoteValue::Quarter => "quarter",
            NoteValue::Eighth => "eighth",
            NoteValue::Sixteenth => "16th",
            NoteValue::ThirtySecond => "32nd",
            NoteValue::SixtyFourth => "64th",
            NoteValue::HundredTwentyEighth => "128th",
            NoteValue::TwoHundredFiftySixth => "256th",
        }
    }

    pub fn from_string(s: &str) -> Option<NoteValue> {
        match s {
            "breve" => Some(NoteValue::Breve),
            "whole" => Some(NoteValue::Whole),
            "half" => Some(NoteValue::Half),
            "quarter" => Some(NoteValue::Quarter),
            "eighth" => Some(NoteValue::Eighth),
            "16th" | "sixteenth" => Some(NoteValue::Sixteenth),
            "32nd" | "thirty_second" => Some(NoteValue::ThirtySecond),
            "64th" | "sixty_fourth" => Some(NoteValue::SixtyFourth),
            "128th" => Some(NoteValue::HundredTwentyEighth),
            "256th" => Some(NoteValue::TwoHundredFiftySixth),
            _ => None,
        }
    }
}

/// One dotted note value inside a tied chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteFragment {
    /// Written note value
    pub value: NoteValue,

    /// Augmentation dots (0-3)
    pub dots: u8,

    /// Ticks this fragment actually occupies
    /// Differs from the written length inside tuplets and for a sub-resolution residue
    pub ticks: i64,
}

impl NoteFragment {
    pub fn describe(&self) -> String {
        match self.dots {
            0 => self.value.name().to_string(),
            1 => format!("dotted {}", self.value.name()),
            2 => format!("double-dotted {}", self.value.name()),
            _ => format!("triple-dotted {}", self.value.name()),
        }
    }
}

/// A notatable duration: one fragment, or several tied together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDuration")]
pub struct NotatableDuration {
    fragments: Vec<NoteFragment>,
}

/// Wire form, checked before it becomes a `NotatableDuration`
#[derive(Deserialize)]
struct RawDuration {
    fragments: Vec<NoteFragment>,
}

impl TryFrom<RawDuration> for NotatableDuration {
    type Error = String;

    fn try_from(raw: RawDuration) -> Result<Self, Self::Error> {
        if let Some(fragment) = raw.fragments.iter().find(|f| f.ticks <= 0) {
            return Err(format!("fragment of {} ticks in a notated duration", fragment.ticks));
        }
        NotatableDuration::from_fragments(raw.fragments)
            .ok_or_else(|| "a notated duration needs at least one fragment".to_string())
    }
}

impl NotatableDuration {
    /// Build a chain; None for an empty fragment list
    pub fn from_fragments(fragments: Vec<NoteFragment>) -> Option<Self> {
        if fragments.is_empty() {
            None
        } else {
            Some(NotatableDuration { fragments })
        }
    }

    pub fn fragments(&self) -> &[NoteFragment] {
        &self.fragments
    }

    /// Sum of the fragments' ticks
    pub fn total_ticks(&self) -> i64 {
        self.fragments.iter().map(|f| f.ticks).sum()
    }

    pub fn is_tied(&self) -> bool {
        self.fragments.len() > 1
    }

    /// Written value of the first fragment
    pub fn head(&self) -> NoteFragment {
        self.fragments[0]
    }

    /// e.g. "eighth ~ double-dotted 32nd"
    pub fn describe(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.describe())
            .collect::<Vec<_>>()
            .join(" ~ ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_value_ticks_960() {
        assert_eq!(NoteValue::Whole.ticks(960), Some(3840));
        assert_eq!(NoteValue::Quarter.ticks(960), Some(960));
        assert_eq!(NoteValue::Eighth.ticks(960), Some(480));
        assert_eq!(NoteValue::SixtyFourth.ticks(960), Some(60));
        assert_eq!(NoteValue::TwoHundredFiftySixth.ticks(960), Some(15));
    }

    #[test]
    fn test_fractional_values_rejected() {
        // 480 ppq: 256th would be 7.5 ticks
        assert_eq!(NoteValue::TwoHundredFiftySixth.ticks(480), None);
        assert_eq!(NoteValue::finest(480), NoteValue::HundredTwentyEighth);
        assert_eq!(NoteValue::finest(960), NoteValue::TwoHundredFiftySixth);
    }

    #[test]
    fn test_dotted_ticks() {
        assert_eq!(NoteValue::Quarter.dotted_ticks(960, 1), Some(1440));
        assert_eq!(NoteValue::Quarter.dotted_ticks(960, 2), Some(1680));
        assert_eq!(NoteValue::Quarter.dotted_ticks(960, 3), Some(1800));
        assert_eq!(NoteValue::ThirtySecond.dotted_ticks(960, 2), Some(210));
        // 15 ticks cannot take a dot
        assert_eq!(NoteValue::TwoHundredFiftySixth.dotted_ticks(960, 1), None);
    }

    #[test]
    fn test_from_ticks_and_names() {
        assert_eq!(NoteValue::from_ticks(240, 960), Some(NoteValue::Sixteenth));
        assert_eq!(NoteValue::from_ticks(250, 960), None);
        assert_eq!(NoteValue::from_string("16th"), Some(NoteValue::Sixteenth));
        assert_eq!(NoteValue::Eighth.halved(), Some(NoteValue::Sixteenth));
        assert_eq!(NoteValue::TwoHundredFiftySixth.halved(), None);
    }

    #[test]
    fn test_chain_description() {
        let chain = NotatableDuration::from_fragments(vec![
            NoteFragment { value: NoteValue::Eighth, dots: 0, ticks: 480 },
            NoteFragment { value: NoteValue::ThirtySecond, dots: 2, ticks: 210 },
        ])
        .unwrap();

        assert_eq!(chain.total_ticks(), 690);
        assert!(chain.is_tied());
        assert_eq!(chain.describe(), "eighth ~ double-dotted 32nd");
        assert!(NotatableDuration::from_fragments(Vec::new()).is_none());
    }

    #[test]
    fn test_deserialize_rejects_empty_chain() {
        let error = serde_json::from_str::<NotatableDuration>(r#"{"fragments":[]}"#).unwrap_err();
        assert!(error.to_string().contains("at least one fragment"));

        let zero = r#"{"fragments":[{"value":"eighth","dots":0,"ticks":0}]}"#;
        assert!(serde_json::from_str::<NotatableDuration>(zero).is_err());
    }

    #[test]
    fn test_chain_survives_json() {
        let chain = NotatableDuration::from_fragments(vec![NoteFragment {
            value: NoteValue::Quarter,
            dots: 1,
            ticks: 1440,
        }])
        .unwrap();
        let json = serde_json::to_string(&chain).unwrap();
        let back: NotatableDuration = serde_json::from_str(&json).unwrap();
        assert_eq!(back.head().ticks, 1440);
    }
}
