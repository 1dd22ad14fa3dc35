//! Incoming MIDI message handling and CC learning.

use crate::state::ParamId;

/// Highest 7-bit MIDI data value.
pub const MIDI_MAX: u8 = 127;

// channel messages other than these have no use here
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOff {
        channel: u8,
        key: u8,
        velocity: u8,
    },
    NoteOn {
        channel: u8,
        key: u8,
        velocity: u8,
    },
    Controller {
        channel: u8,
        controller: u8,
        value: u8,
    },
}

impl MidiEvent {
    /// Parse a raw message. Note-on with zero velocity is a note-off.
    pub fn parse(data: &[u8]) -> Option<Self> {
        // all the messages we're interested in are 3 bytes
        if data.len() < 3 { return None }

        let channel = data[0] & 0xf;
        let (a, b) = (data[1] & 0x7f, data[2] & 0x7f);

        match data[0] & 0xf0 {
            0x80 => Some(Self::NoteOff { channel, key: a, velocity: b }),
            0x90 if b == 0 => Some(Self::NoteOff { channel, key: a, velocity: 0 }),
            0x90 => Some(Self::NoteOn { channel, key: a, velocity: b }),
            0xb0 => Some(Self::Controller { channel, controller: a, value: b }),
            _ => None,
        }
    }
}

/// MIDI velocity as 0..1.
pub fn velocity_amount(velocity: u8) -> f32 {
    velocity.min(MIDI_MAX) as f32 / MIDI_MAX as f32
}

/// Parameter value for a CC position.
pub fn cc_value(param: ParamId, value: u8) -> f32 {
    param.from_normalized(value.min(MIDI_MAX) as f32 / MIDI_MAX as f32)
}

/// CC learn mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LearnState {
    #[default]
    Idle,
    /// The next CC message gets bound to this parameter.
    Awaiting(ParamId),
}

impl LearnState {
    pub fn target(&self) -> Option<ParamId> {
        match self {
            Self::Idle => None,
            Self::Awaiting(param) => Some(*param),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::{MAX_FILTER_CUTOFF, MIN_FILTER_CUTOFF};

    use super::*;

    #[test]
    fn test_parse_notes() {
        assert_eq!(MidiEvent::parse(&[0x91, 60, 100]),
            Some(MidiEvent::NoteOn { channel: 1, key: 60, velocity: 100 }));
        assert_eq!(MidiEvent::parse(&[0x80, 60, 64]),
            Some(MidiEvent::NoteOff { channel: 0, key: 60, velocity: 64 }));
        assert_eq!(MidiEvent::parse(&[0x90, 60, 0]),
            Some(MidiEvent::NoteOff { channel: 0, key: 60, velocity: 0 }));
    }

    #[test]
    fn test_parse_controller() {
        assert_eq!(MidiEvent::parse(&[0xb0, 74, 127]),
            Some(MidiEvent::Controller { channel: 0, controller: 74, value: 127 }));
    }

    #[test]
    fn test_parse_ignores_others() {
        assert_eq!(MidiEvent::parse(&[0xe0, 0, 64]), None);
        assert_eq!(MidiEvent::parse(&[0xf8]), None);
        assert_eq!(MidiEvent::parse(&[0x90, 60]), None);
    }

    #[test]
    fn test_cc_value_scaling() {
        assert_eq!(cc_value(ParamId::FilterCutoff, 127), MAX_FILTER_CUTOFF);
        assert_eq!(cc_value(ParamId::FilterCutoff, 0), MIN_FILTER_CUTOFF);
        assert_eq!(cc_value(ParamId::Gain, 127), 1.0);
        assert_eq!(cc_value(ParamId::Bpm, 0), 40.0);
        let mid = cc_value(ParamId::Sustain, 64);
        assert!((mid - 64.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn test_velocity_amount() {
        assert_eq!(velocity_amount(127), 1.0);
        assert_eq!(velocity_amount(0), 0.0);
    }
}
