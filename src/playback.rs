//! Look-ahead step scheduling.
//!
//! The host calls `Transport::schedule` every `SCHEDULE_INTERVAL`. Each call
//! emits every note whose onset falls inside the look-ahead window, stamped
//! with an absolute audio-clock time, so timing never depends on when the
//! host timer actually fires.

use std::time::Duration;

use rand::Rng;

use crate::pattern::{Step, NUM_ROWS, STEPS_PER_PATTERN};
use crate::state::{PlaybackMode, SynthState};

/// How far ahead of the audio clock notes are scheduled, in seconds.
pub const LOOKAHEAD: f64 = 0.1;
pub const SCHEDULE_INTERVAL: Duration = Duration::from_millis(25);

/// Pendulum travel direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

/// Cursor state while playing.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayState {
    /// Last scheduled step. None until the first step is scheduled.
    pub step: Option<usize>,
    pub direction: Direction,
    /// Audio-clock time of the next step onset.
    pub next_note_time: f64,
    pub chain_position: usize,
    /// Pattern the scheduler is reading from.
    pub pattern_index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transport {
    Stopped,
    Playing(PlayState),
}

/// A note handed to the voice layer.
#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledNote {
    /// Audio-clock start time in seconds.
    pub time: f64,
    pub note: u8,
    pub velocity: f32,
    pub row: usize,
    pub step: usize,
    pub pattern: usize,
    /// Sub-pulse index within the step.
    pub pulse: u8,
}

/// Length of a sixteenth note in seconds.
pub fn sixteenth(bpm: f32) -> f64 {
    60.0 / bpm as f64 / 4.0
}

/// Duration of `step` with swing applied. Even steps are lengthened and odd
/// steps shortened by the same amount, so pairs keep their total length.
pub fn step_duration(bpm: f32, swing: f32, step: usize) -> f64 {
    let swing = swing as f64;
    if step % 2 == 0 {
        sixteenth(bpm) * (1.0 + swing)
    } else {
        sixteenth(bpm) * (1.0 - swing)
    }
}

/// Time offset for a step's nudge. Full nudge is half a step.
pub fn nudge_offset(nudge: f32, duration: f64) -> f64 {
    nudge as f64 * duration / 2.0
}

/// Next step index for `mode`, and the direction to continue in.
pub fn next_step(
    mode: PlaybackMode,
    current: Option<usize>,
    length: usize,
    direction: Direction,
    rng: &mut impl Rng,
) -> (usize, Direction) {
    let length = length.clamp(1, STEPS_PER_PATTERN);
    let current = current.map(|i| i.min(length - 1));

    match mode {
        PlaybackMode::Forward => match current {
            Some(i) => ((i + 1) % length, direction),
            None => (0, direction),
        },
        PlaybackMode::Backward => match current {
            Some(i) => ((i + length - 1) % length, direction),
            None => (length - 1, direction),
        },
        PlaybackMode::Pendulum => match current {
            None => (0, Direction::Up),
            Some(_) if length == 1 => (0, direction),
            Some(i) => match direction {
                Direction::Up if i + 1 < length => (i + 1, Direction::Up),
                Direction::Up => (i - 1, Direction::Down),
                Direction::Down if i > 0 => (i - 1, Direction::Down),
                Direction::Down => (1, Direction::Up),
            },
        },
        PlaybackMode::Random => match current {
            None => (rng.gen_range(0..length), direction),
            Some(_) if length == 1 => (0, direction),
            Some(i) => {
                // draw from the other length - 1 steps
                let pick = rng.gen_range(0..length - 1);
                (if pick >= i { pick + 1 } else { pick }, direction)
            }
        },
    }
}

/// Offsets and velocities of a step's sub-pulses. The first sub-pulse always
/// fires; later ones fire when a draw exceeds `probability_falloff`.
/// Velocity falls linearly to `1 - velocity_falloff` at the last sub-pulse.
pub fn ratchet_pulses(
    step: &Step,
    duration: f64,
    velocity_falloff: f32,
    probability_falloff: f32,
    rng: &mut impl Rng,
) -> Vec<(u8, f64, f32)> {
    let ratchets = step.ratchets.max(1);
    let spacing = duration / ratchets as f64;

    (0..ratchets)
        .filter(|&j| j == 0 || rng.gen::<f32>() > probability_falloff)
        .map(|j| {
            let t = if ratchets > 1 { j as f32 / (ratchets - 1) as f32 } else { 0.0 };
            let velocity = step.velocity * (1.0 - velocity_falloff * t);
            (j, spacing * j as f64, velocity)
        })
        .collect()
}

impl Transport {
    /// Begin playing. The first step sounds one sixteenth after `now`.
    pub fn start(now: f64, state: &SynthState) -> Self {
        let pattern_index = if state.chain_active() {
            state.pattern_chain[0]
        } else {
            state.current_pattern_index
        };
        Self::Playing(PlayState {
            step: None,
            direction: Direction::Up,
            next_note_time: now + sixteenth(state.bpm),
            chain_position: 0,
            pattern_index,
        })
    }

    pub fn stop(&mut self) {
        *self = Self::Stopped;
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, Self::Playing(_))
    }

    /// Most recently scheduled step, if playing.
    pub fn current_step(&self) -> Option<usize> {
        match self {
            Self::Playing(play) => play.step,
            Self::Stopped => None,
        }
    }

    /// Pattern the sequencer is reading from, if playing.
    pub fn pattern_index(&self) -> Option<usize> {
        match self {
            Self::Playing(play) => Some(play.pattern_index),
            Self::Stopped => None,
        }
    }

    /// Schedule every step with an onset before `now + lookahead`. Returned
    /// notes are sorted by start time. Steps that ended before `now` (after a
    /// host stall) advance the cursor without sounding, so at most one step
    /// plays late.
    pub fn schedule(
        &mut self,
        now: f64,
        lookahead: f64,
        state: &SynthState,
        scale_notes: &[u8],
        rng: &mut impl Rng,
    ) -> Vec<ScheduledNote> {
        let Self::Playing(play) = self else {
            return Vec::new()
        };
        let mut notes = Vec::new();

        while play.next_note_time < now + lookahead {
            let previous = play.step;
            let (step, direction) = next_step(state.playback_mode, previous,
                state.sequence_length, play.direction, rng);
            play.step = Some(step);
            play.direction = direction;

            if state.chain_active() {
                let wrapped = state.playback_mode == PlaybackMode::Forward
                    && step == 0 && previous.is_some();
                if wrapped {
                    play.chain_position = (play.chain_position + 1) % state.pattern_chain.len();
                }
                play.chain_position = play.chain_position.min(state.pattern_chain.len() - 1);
                play.pattern_index = state.pattern_chain[play.chain_position];
            } else {
                play.pattern_index = state.current_pattern_index;
            }
            play.pattern_index = play.pattern_index.min(state.patterns.len() - 1);

            let duration = step_duration(state.bpm, state.swing, step);
            if play.next_note_time + duration <= now {
                play.next_note_time += duration;
                continue
            }
            let pattern = &state.patterns[play.pattern_index];

            for row in 0..NUM_ROWS {
                let cell = &pattern.rows[row][step];
                if !cell.active || rng.gen::<f32>() >= cell.probability {
                    continue
                }
                let Some(&note) = scale_notes.get(row) else {
                    continue
                };
                let offset = nudge_offset(cell.nudge, duration);
                for (pulse, pulse_offset, velocity) in ratchet_pulses(cell, duration,
                    state.ratchet_velocity_falloff, state.ratchet_probability_falloff, rng
                ) {
                    notes.push(ScheduledNote {
                        time: (play.next_note_time + pulse_offset + offset).max(now),
                        note,
                        velocity,
                        row,
                        step,
                        pattern: play.pattern_index,
                        pulse,
                    });
                }
            }

            play.next_note_time += duration;
        }

        // stable, so sub-pulses of one cell stay in order
        notes.sort_by(|a, b| a.time.total_cmp(&b.time));
        notes
    }
}
