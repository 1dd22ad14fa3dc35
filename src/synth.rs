//! Subtractive voice layer.

pub(crate) mod lfo;

use std::collections::HashMap;

use fundsp::hacker32::*;

use crate::dsp::{ads, gated_adsr, octave_ratio, smooth};
use crate::state::{FilterType, SynthState, MAX_FILTER_CUTOFF, MIN_FILTER_CUTOFF};

/// Smoothing time for transitions, in seconds.
pub const SMOOTH_TIME: f32 = 0.01;

/// Half-life of live parameter changes, in seconds.
pub(crate) const PARAM_SMOOTHING: f32 = 0.005;

/// Fade used by `Synth::panic`, in seconds.
pub const PANIC_TIME: f32 = 0.05;

/// Extra time after the release ramp before a voice event is stopped.
const STOP_MARGIN: f32 = 0.05;

/// Per-voice output level, leaving headroom for polyphony.
const VOICE_LEVEL: f32 = 0.25;

/// Full LFO depth in semitones of pitch modulation.
const LFO_PITCH_RANGE: f32 = 1.0;

/// Full LFO depth in octaves of cutoff modulation.
const LFO_FILTER_RANGE: f32 = 2.0;

/// Full filter envelope amount in octaves above the base cutoff.
const FILTER_ENV_RANGE: f32 = 4.0;

/// Shared values read by every voice, so parameter edits reach notes that
/// are already sounding.
pub struct LiveParams {
    /// Mix level per `Waveform::VARIANTS` entry. Exactly one is 1.0.
    pub waveform: [Shared; 4],
    pub detune: Shared,
    pub sub_level: Shared,
    pub sub_octave: Shared,
    pub cutoff: Shared,
    pub resonance: Shared,
    pub lfo_rate: Shared,
    pub lfo_depth: Shared,
    pub lfo_waveform: [Shared; 4],
    /// Current output of the global LFO, -1..1.
    pub lfo_value: Shared,
    pub master_gain: Shared,
}

impl LiveParams {
    pub fn new(state: &SynthState) -> Self {
        let params = Self {
            waveform: std::array::from_fn(|_| shared(0.0)),
            detune: shared(0.0),
            sub_level: shared(0.0),
            sub_octave: shared(0.0),
            cutoff: shared(0.0),
            resonance: shared(0.0),
            lfo_rate: shared(0.0),
            lfo_depth: shared(0.0),
            lfo_waveform: std::array::from_fn(|_| shared(0.0)),
            lfo_value: shared(0.0),
            master_gain: shared(0.0),
        };
        params.apply(state);
        params
    }

    /// Copy the live-updatable parts of `state`.
    pub fn apply(&self, state: &SynthState) {
        for (i, level) in self.waveform.iter().enumerate() {
            level.set(if i == state.waveform.index() { 1.0 } else { 0.0 });
        }
        for (i, level) in self.lfo_waveform.iter().enumerate() {
            level.set(if i == state.lfo_waveform.index() { 1.0 } else { 0.0 });
        }
        self.detune.set(state.detune);
        self.sub_level.set(state.sub_level);
        self.sub_octave.set(state.sub_octave as f32);
        self.cutoff.set(state.filter_cutoff);
        self.resonance.set(state.filter_q);
        self.lfo_rate.set(state.lfo_rate);
        self.lfo_depth.set(state.lfo_depth);
        self.master_gain.set(state.gain);
    }
}

/// Source of a voice's gate signal.
enum Gate {
    /// Open until the shared value is set to zero.
    Held(Shared),
    /// Open for a fixed time from the voice start.
    Timed(f32),
}

impl Gate {
    fn make_net(&self) -> Net {
        match self {
            Self::Held(gate) => Net::wrap(Box::new(var(gate))),
            Self::Timed(duration) => {
                let duration = *duration;
                Net::wrap(Box::new(envelope(move |t| if t < duration { 1.0 } else { 0.0 })))
            }
        }
    }
}

/// Build a voice net with 4 outputs: dry stereo, then delay send stereo.
fn make_voice_net(note: u8, velocity: f32, gate: &Gate, state: &SynthState, live: &LiveParams
) -> Net {
    let hz = midi_hz(note as f32);

    // pitch offset in semitones
    let pitch = var(&live.detune) * 0.01
        + var(&live.lfo_value) * var(&live.lfo_depth) * LFO_PITCH_RANGE;
    let freq = Net::wrap(Box::new(pitch >> shape_fn(move |x| hz * pow(2.0, x / 12.0))));

    let osc = (freq.clone() >> sine().phase(0.0)) * Net::wrap(Box::new(var(&live.waveform[0])))
        + (freq.clone() >> square().phase(0.0)) * Net::wrap(Box::new(var(&live.waveform[1])))
        + (freq.clone() >> saw().phase(0.0)) * Net::wrap(Box::new(var(&live.waveform[2])))
        + (freq.clone() >> triangle().phase(0.0)) * Net::wrap(Box::new(var(&live.waveform[3])));

    let sub_ratio = Net::wrap(Box::new(var(&live.sub_octave) >> octave_ratio()));
    let sub = ((freq * sub_ratio) >> square().phase(0.0))
        * Net::wrap(Box::new(var(&live.sub_level) >> smooth(PARAM_SMOOTHING)));

    let cutoff = {
        let (attack, decay) = (state.attack, state.decay);
        let octaves = FILTER_ENV_RANGE * state.filter_env_amount;
        let env = envelope(move |t| pow(2.0, octaves * ads(attack, decay, 0.0, t)));
        let lfo = var(&live.lfo_value) * var(&live.lfo_depth) * LFO_FILTER_RANGE
            >> octave_ratio();
        Net::wrap(Box::new((var(&live.cutoff) >> smooth(PARAM_SMOOTHING)) * env * lfo
            >> shape_fn(|x| clamp(MIN_FILTER_CUTOFF, MAX_FILTER_CUTOFF, x))))
    };
    let q = Net::wrap(Box::new(var(&live.resonance) >> smooth(PARAM_SMOOTHING)));

    let filter = Net::wrap(match state.filter_type {
        FilterType::Lowpass => Box::new(lowpass()),
        FilterType::Highpass => Box::new(highpass()),
        FilterType::Bandpass => Box::new(bandpass()),
        FilterType::Notch => Box::new(notch()),
    });

    let amp = gate.make_net()
        >> Net::wrap(Box::new(gated_adsr(state.attack, state.decay, state.sustain, state.release)));

    (((osc + sub) | cutoff | q) >> filter) * amp * (velocity * VOICE_LEVEL)
        >> split::<U4>()
}

/// A held voice.
struct Voice {
    gate: Shared,
    release_time: f32,
    event_id: EventId,
}

impl Voice {
    fn off(&self, seq: &mut Sequencer) {
        self.gate.set(0.0);
        seq.edit_relative(self.event_id, (self.release_time + STOP_MARGIN) as f64,
            SMOOTH_TIME as f64);
    }

    fn cut(&self, seq: &mut Sequencer) {
        seq.edit_relative(self.event_id, 0.0, SMOOTH_TIME as f64);
    }
}

/// Voice allocation and release. Held voices are keyed by MIDI note; voices
/// started by the sequencer or already releasing are tracked until their
/// stop time so `panic` can reach them.
#[derive(Default)]
pub struct Synth {
    active: HashMap<u8, Voice>,
    /// Event and audio-clock stop time of every unheld voice.
    tails: Vec<(EventId, f64)>,
}

impl Synth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a held note. An existing voice on the same note is cut first.
    pub fn note_on(&mut self, note: u8, velocity: f32, now: f64,
        state: &SynthState, live: &LiveParams, seq: &mut Sequencer
    ) {
        if let Some(voice) = self.active.remove(&note) {
            voice.cut(seq);
            self.tails.push((voice.event_id, now + SMOOTH_TIME as f64));
        }

        let gate = shared(1.0);
        let net = make_voice_net(note, velocity, &Gate::Held(gate.clone()), state, live);
        let event_id = seq.push_relative(0.0, f64::INFINITY, Fade::Smooth, 0.0, 0.0,
            Box::new(net));
        self.active.insert(note, Voice {
            gate,
            release_time: state.release,
            event_id,
        });
    }

    /// Release a held note. Notes that aren't held are ignored.
    pub fn note_off(&mut self, note: u8, now: f64, seq: &mut Sequencer) {
        if let Some(voice) = self.active.remove(&note) {
            voice.off(seq);
            self.tails.push((voice.event_id,
                now + (voice.release_time + STOP_MARGIN + SMOOTH_TIME) as f64));
        }
    }

    /// Start a note at an absolute audio-clock time. The gate stays open for
    /// the attack and decay stages, then releases.
    pub fn trigger_at(&mut self, note: u8, velocity: f32, time: f64,
        state: &SynthState, live: &LiveParams, seq: &mut Sequencer
    ) {
        let gate_time = state.attack + state.decay;
        let end = time + (gate_time + state.release + STOP_MARGIN) as f64;
        let net = make_voice_net(note, velocity, &Gate::Timed(gate_time), state, live);
        let event_id = seq.push(time, end, Fade::Smooth, 0.0, SMOOTH_TIME as f64,
            Box::new(net));
        self.tails.push((event_id, end));
    }

    /// Fade out every voice quickly, including scheduled ones that haven't
    /// started yet.
    pub fn panic(&mut self, seq: &mut Sequencer) {
        let fade = PANIC_TIME as f64;
        for (_, voice) in self.active.drain() {
            seq.edit_relative(voice.event_id, fade, fade);
        }
        for (event_id, _) in self.tails.drain(..) {
            seq.edit_relative(event_id, fade, fade);
        }
    }

    /// Forget unheld voices whose stop time has passed.
    pub fn prune(&mut self, now: f64) {
        self.tails.retain(|&(_, end)| end > now);
    }

    /// Held notes, ascending.
    pub fn active_notes(&self) -> Vec<u8> {
        let mut notes: Vec<u8> = self.active.keys().copied().collect();
        notes.sort_unstable();
        notes
    }

    /// Number of voices that may still be sounding.
    pub fn voice_count(&self) -> usize {
        self.active.len() + self.tails.len()
    }
}

#[cfg(test)]
mod tests {
    use crate::state::Waveform;

    use super::*;

    fn setup() -> (Synth, SynthState, LiveParams, Sequencer) {
        let state = SynthState::default();
        let live = LiveParams::new(&state);
        let mut seq = Sequencer::new(false, 4);
        seq.set_sample_rate(DEFAULT_SR);
        (Synth::new(), state, live, seq)
    }

    #[test]
    fn test_retrigger_replaces_voice() {
        let (mut synth, state, live, mut seq) = setup();
        synth.note_on(60, 1.0, 0.0, &state, &live, &mut seq);
        synth.note_on(60, 0.5, 0.0, &state, &live, &mut seq);
        assert_eq!(synth.active_notes(), vec![60]);
        assert_eq!(synth.voice_count(), 2);
    }

    #[test]
    fn test_note_off_unknown_is_ignored() {
        let (mut synth, state, live, mut seq) = setup();
        synth.note_on(60, 1.0, 0.0, &state, &live, &mut seq);
        synth.note_off(61, 0.0, &mut seq);
        synth.note_off(60, 0.0, &mut seq);
        synth.note_off(60, 0.0, &mut seq);
        assert!(synth.active_notes().is_empty());
        assert_eq!(synth.voice_count(), 1);
    }

    #[test]
    fn test_release_tail_pruned() {
        let (mut synth, state, live, mut seq) = setup();
        synth.note_on(64, 1.0, 0.0, &state, &live, &mut seq);
        synth.note_off(64, 1.0, &mut seq);
        synth.prune(1.0 + state.release as f64 * 0.5);
        assert_eq!(synth.voice_count(), 1);
        synth.prune(10.0);
        assert_eq!(synth.voice_count(), 0);
    }

    #[test]
    fn test_panic_clears_everything() {
        let (mut synth, state, live, mut seq) = setup();
        synth.note_on(60, 1.0, 0.0, &state, &live, &mut seq);
        synth.note_on(67, 1.0, 0.0, &state, &live, &mut seq);
        synth.trigger_at(72, 1.0, 0.5, &state, &live, &mut seq);
        synth.panic(&mut seq);
        assert_eq!(synth.voice_count(), 0);
    }

    #[test]
    fn test_live_params_select_one_waveform() {
        let mut state = SynthState::default();
        state.waveform = Waveform::Square;
        let live = LiveParams::new(&state);
        let levels: Vec<f32> = live.waveform.iter().map(|s| s.value()).collect();
        assert_eq!(levels, vec![0.0, 1.0, 0.0, 0.0]);
    }
}
