//! Scales and row-to-note resolution.

use serde::{Deserialize, Serialize};

use crate::pattern::NUM_ROWS;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScaleName {
    Major,
    Minor,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Locrian,
    HarmonicMinor,
    MelodicMinor,
    MajorPentatonic,
    MinorPentatonic,
    Blues,
    WholeTone,
    Chromatic,
}

impl ScaleName {
    pub const VARIANTS: [ScaleName; 14] = [
        Self::Major, Self::Minor, Self::Dorian, Self::Phrygian, Self::Lydian,
        Self::Mixolydian, Self::Locrian, Self::HarmonicMinor, Self::MelodicMinor,
        Self::MajorPentatonic, Self::MinorPentatonic, Self::Blues, Self::WholeTone,
        Self::Chromatic,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Major => "major",
            Self::Minor => "minor",
            Self::Dorian => "dorian",
            Self::Phrygian => "phrygian",
            Self::Lydian => "lydian",
            Self::Mixolydian => "mixolydian",
            Self::Locrian => "locrian",
            Self::HarmonicMinor => "harmonicMinor",
            Self::MelodicMinor => "melodicMinor",
            Self::MajorPentatonic => "majorPentatonic",
            Self::MinorPentatonic => "minorPentatonic",
            Self::Blues => "blues",
            Self::WholeTone => "wholeTone",
            Self::Chromatic => "chromatic",
        }
    }

    /// Look up a scale by name. Unknown names fall back to major.
    pub fn from_name(name: &str) -> Self {
        Self::VARIANTS.into_iter()
            .find(|s| s.name() == name)
            .unwrap_or_else(|| {
                log::warn!(target: "state", "unknown scale {name:?}, using major");
                Self::Major
            })
    }

    /// Semitone offsets of one octave, starting at 0.
    pub fn intervals(&self) -> &'static [u8] {
        match self {
            Self::Major => &[0, 2, 4, 5, 7, 9, 11],
            Self::Minor => &[0, 2, 3, 5, 7, 8, 10],
            Self::Dorian => &[0, 2, 3, 5, 7, 9, 10],
            Self::Phrygian => &[0, 1, 3, 5, 7, 8, 10],
            Self::Lydian => &[0, 2, 4, 6, 7, 9, 11],
            Self::Mixolydian => &[0, 2, 4, 5, 7, 9, 10],
            Self::Locrian => &[0, 1, 3, 5, 6, 8, 10],
            Self::HarmonicMinor => &[0, 2, 3, 5, 7, 8, 11],
            Self::MelodicMinor => &[0, 2, 3, 5, 7, 9, 11],
            Self::MajorPentatonic => &[0, 2, 4, 7, 9],
            Self::MinorPentatonic => &[0, 3, 5, 7, 10],
            Self::Blues => &[0, 3, 5, 6, 7, 10],
            Self::WholeTone => &[0, 2, 4, 6, 8, 10],
            Self::Chromatic => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11],
        }
    }

    /// MIDI note for a scale degree above `root`, wrapping into higher
    /// octaves. Clamped to the MIDI range.
    pub fn degree_note(&self, root: u8, degree: usize) -> u8 {
        let intervals = self.intervals();
        let octave = degree / intervals.len();
        let note = root as usize + intervals[degree % intervals.len()] as usize + 12 * octave;
        note.min(127) as u8
    }
}

/// Notes played by each grid row, row 0 being the root.
pub fn scale_notes(root: u8, scale: ScaleName) -> Vec<u8> {
    (0..NUM_ROWS).map(|row| scale.degree_note(root, row)).collect()
}

/// Row whose note is closest to `note`. Ties go to the lower row.
pub fn nearest_row(notes: &[u8], note: u8) -> Option<usize> {
    notes.iter()
        .enumerate()
        .min_by_key(|(_, n)| n.abs_diff(note))
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_scale_notes() {
        assert_eq!(scale_notes(60, ScaleName::Major), vec![60, 62, 64, 65, 67, 69, 71, 72]);
    }

    #[test]
    fn test_pentatonic_wraps_octave() {
        assert_eq!(scale_notes(48, ScaleName::MinorPentatonic),
            vec![48, 51, 53, 55, 58, 60, 63, 65]);
    }

    #[test]
    fn test_notes_clamped() {
        assert_eq!(scale_notes(125, ScaleName::Chromatic), vec![125, 126, 127, 127, 127, 127, 127, 127]);
    }

    #[test]
    fn test_nearest_row() {
        let notes = scale_notes(60, ScaleName::Major);
        assert_eq!(nearest_row(&notes, 64), Some(2));
        assert_eq!(nearest_row(&notes, 63), Some(1)); // tie between 62 and 64
        assert_eq!(nearest_row(&notes, 20), Some(0));
        assert_eq!(nearest_row(&notes, 100), Some(7));
        assert_eq!(nearest_row(&[], 60), None);
    }

    #[test]
    fn test_unknown_scale_falls_back() {
        assert_eq!(ScaleName::from_name("lydian"), ScaleName::Lydian);
        assert_eq!(ScaleName::from_name("hungarian"), ScaleName::Major);
    }
}
