//! The synth parameter record. A whole `SynthState` is the unit of undo,
//! redo and snapshot persistence.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::pattern::{HumanizeAmounts, Pattern, MAX_RATCHETS, NUM_ROWS, STEPS_PER_PATTERN};
use crate::scale::ScaleName;

pub const MIN_FILTER_CUTOFF: f32 = 20.0;
pub const MAX_FILTER_CUTOFF: f32 = 20_000.0;
pub const MIN_SUB_OCTAVE: i8 = -2;
pub const MAX_SUB_OCTAVE: i8 = -1;
pub const MAX_PATTERNS: usize = 64;

/// Oscillator shape, shared by the main oscillator and the LFO.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub const VARIANTS: [Waveform; 4] = [Self::Sine, Self::Square, Self::Sawtooth, Self::Triangle];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sine => "sine",
            Self::Square => "square",
            Self::Sawtooth => "sawtooth",
            Self::Triangle => "triangle",
        }
    }

    /// Look up a waveform by name. Unknown names fall back to sine.
    pub fn from_name(name: &str) -> Self {
        Self::VARIANTS.into_iter()
            .find(|w| w.name() == name)
            .unwrap_or_else(|| {
                log::warn!(target: "state", "unknown waveform {name:?}, using sine");
                Self::Sine
            })
    }

    /// Position in `VARIANTS`, used to index per-waveform mix levels.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
}

impl FilterType {
    pub const VARIANTS: [FilterType; 4] = [Self::Lowpass, Self::Highpass, Self::Bandpass, Self::Notch];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Lowpass => "lowpass",
            Self::Highpass => "highpass",
            Self::Bandpass => "bandpass",
            Self::Notch => "notch",
        }
    }

    /// Look up a filter type by name. Unknown names fall back to lowpass.
    pub fn from_name(name: &str) -> Self {
        Self::VARIANTS.into_iter()
            .find(|f| f.name() == name)
            .unwrap_or_else(|| {
                log::warn!(target: "state", "unknown filter type {name:?}, using lowpass");
                Self::Lowpass
            })
    }
}

/// Order in which the sequencer visits steps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    Forward,
    Backward,
    Pendulum,
    Random,
}

impl PlaybackMode {
    pub const VARIANTS: [PlaybackMode; 4] = [Self::Forward, Self::Backward, Self::Pendulum, Self::Random];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Pendulum => "pendulum",
            Self::Random => "random",
        }
    }

    /// Look up a playback mode by name. Unknown names fall back to forward.
    pub fn from_name(name: &str) -> Self {
        Self::VARIANTS.into_iter()
            .find(|m| m.name() == name)
            .unwrap_or_else(|| {
                log::warn!(target: "state", "unknown playback mode {name:?}, using forward");
                Self::Forward
            })
    }
}

/// Mapping from normalized controller position to parameter value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Curve {
    Linear,
    Exponential,
}

/// Continuous parameters that can be set by name or driven by MIDI CC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParamId {
    Gain,
    Detune,
    SubLevel,
    FilterCutoff,
    FilterQ,
    FilterEnvAmount,
    Attack,
    Decay,
    Sustain,
    Release,
    LfoRate,
    LfoDepth,
    DelayTime,
    DelayFeedback,
    DelayMix,
    Bpm,
    Swing,
    HumanizeVelocity,
    HumanizeProbability,
    HumanizeNudge,
    RatchetVelocityFalloff,
    RatchetProbabilityFalloff,
}

impl ParamId {
    pub const VARIANTS: [ParamId; 22] = [
        Self::Gain, Self::Detune, Self::SubLevel, Self::FilterCutoff, Self::FilterQ,
        Self::FilterEnvAmount, Self::Attack, Self::Decay, Self::Sustain, Self::Release,
        Self::LfoRate, Self::LfoDepth, Self::DelayTime, Self::DelayFeedback, Self::DelayMix,
        Self::Bpm, Self::Swing, Self::HumanizeVelocity, Self::HumanizeProbability,
        Self::HumanizeNudge, Self::RatchetVelocityFalloff, Self::RatchetProbabilityFalloff,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gain => "gain",
            Self::Detune => "detune",
            Self::SubLevel => "subLevel",
            Self::FilterCutoff => "filterCutoff",
            Self::FilterQ => "filterQ",
            Self::FilterEnvAmount => "filterEnvAmount",
            Self::Attack => "attack",
            Self::Decay => "decay",
            Self::Sustain => "sustain",
            Self::Release => "release",
            Self::LfoRate => "lfoRate",
            Self::LfoDepth => "lfoDepth",
            Self::DelayTime => "delayTime",
            Self::DelayFeedback => "delayFeedback",
            Self::DelayMix => "delayMix",
            Self::Bpm => "bpm",
            Self::Swing => "swing",
            Self::HumanizeVelocity => "humanizeVelocity",
            Self::HumanizeProbability => "humanizeProbability",
            Self::HumanizeNudge => "humanizeNudge",
            Self::RatchetVelocityFalloff => "ratchetVelocityFalloff",
            Self::RatchetProbabilityFalloff => "ratchetProbabilityFalloff",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::VARIANTS.into_iter().find(|p| p.name() == name)
    }

    /// Inclusive value range.
    pub fn range(&self) -> (f32, f32) {
        match self {
            Self::Detune => (-100.0, 100.0),
            Self::FilterCutoff => (MIN_FILTER_CUTOFF, MAX_FILTER_CUTOFF),
            Self::FilterQ => (0.1, 20.0),
            Self::Attack | Self::Decay => (0.001, 5.0),
            Self::Release => (0.001, 10.0),
            Self::LfoRate => (0.1, 20.0),
            Self::DelayTime => (0.01, 2.0),
            Self::DelayFeedback => (0.0, 0.9),
            Self::Bpm => (40.0, 240.0),
            Self::Swing => (0.0, 0.75),
            _ => (0.0, 1.0),
        }
    }

    pub fn curve(&self) -> Curve {
        match self {
            Self::FilterCutoff => Curve::Exponential,
            _ => Curve::Linear,
        }
    }

    /// Map a 0..1 controller position onto the parameter range.
    pub fn from_normalized(&self, x: f32) -> f32 {
        let (min, max) = self.range();
        if x <= 0.0 {
            return min
        } else if x >= 1.0 {
            return max
        }
        match self.curve() {
            Curve::Linear => min + (max - min) * x,
            Curve::Exponential => min * (max / min).powf(x),
        }
    }

    /// Returns a value that is safe to store. Non-finite input becomes the
    /// default value; anything else is clamped to range.
    pub fn coerce(&self, value: f32) -> f32 {
        let (min, max) = self.range();
        if !value.is_finite() {
            let fallback = self.get(&SynthState::default());
            log::warn!(target: "state", "{} got {value}, using {fallback}", self.name());
            fallback
        } else if value < min || value > max {
            log::warn!(target: "state", "{} value {value} out of range, clamping", self.name());
            value.clamp(min, max)
        } else {
            value
        }
    }

    pub fn get(&self, state: &SynthState) -> f32 {
        match self {
            Self::Gain => state.gain,
            Self::Detune => state.detune,
            Self::SubLevel => state.sub_level,
            Self::FilterCutoff => state.filter_cutoff,
            Self::FilterQ => state.filter_q,
            Self::FilterEnvAmount => state.filter_env_amount,
            Self::Attack => state.attack,
            Self::Decay => state.decay,
            Self::Sustain => state.sustain,
            Self::Release => state.release,
            Self::LfoRate => state.lfo_rate,
            Self::LfoDepth => state.lfo_depth,
            Self::DelayTime => state.delay_time,
            Self::DelayFeedback => state.delay_feedback,
            Self::DelayMix => state.delay_mix,
            Self::Bpm => state.bpm,
            Self::Swing => state.swing,
            Self::HumanizeVelocity => state.humanize_velocity,
            Self::HumanizeProbability => state.humanize_probability,
            Self::HumanizeNudge => state.humanize_nudge,
            Self::RatchetVelocityFalloff => state.ratchet_velocity_falloff,
            Self::RatchetProbabilityFalloff => state.ratchet_probability_falloff,
        }
    }

    /// Store a value without coercion. Callers go through `coerce` first.
    pub(crate) fn set(&self, state: &mut SynthState, value: f32) {
        let field = match self {
            Self::Gain => &mut state.gain,
            Self::Detune => &mut state.detune,
            Self::SubLevel => &mut state.sub_level,
            Self::FilterCutoff => &mut state.filter_cutoff,
            Self::FilterQ => &mut state.filter_q,
            Self::FilterEnvAmount => &mut state.filter_env_amount,
            Self::Attack => &mut state.attack,
            Self::Decay => &mut state.decay,
            Self::Sustain => &mut state.sustain,
            Self::Release => &mut state.release,
            Self::LfoRate => &mut state.lfo_rate,
            Self::LfoDepth => &mut state.lfo_depth,
            Self::DelayTime => &mut state.delay_time,
            Self::DelayFeedback => &mut state.delay_feedback,
            Self::DelayMix => &mut state.delay_mix,
            Self::Bpm => &mut state.bpm,
            Self::Swing => &mut state.swing,
            Self::HumanizeVelocity => &mut state.humanize_velocity,
            Self::HumanizeProbability => &mut state.humanize_probability,
            Self::HumanizeNudge => &mut state.humanize_nudge,
            Self::RatchetVelocityFalloff => &mut state.ratchet_velocity_falloff,
            Self::RatchetProbabilityFalloff => &mut state.ratchet_probability_falloff,
        };
        *field = value;
    }
}

/// CC number to parameter table.
pub type CcMap = BTreeMap<u8, ParamId>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthState {
    // sound
    pub waveform: Waveform,
    pub detune: f32,
    pub sub_level: f32,
    pub sub_octave: i8,
    pub filter_type: FilterType,
    pub filter_cutoff: f32,
    pub filter_q: f32,
    #[serde(default)]
    pub filter_env_amount: f32,
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
    pub lfo_rate: f32,
    pub lfo_depth: f32,
    pub lfo_waveform: Waveform,
    pub gain: f32,
    pub delay_time: f32,
    pub delay_feedback: f32,
    pub delay_mix: f32,

    // sequencer
    pub bpm: f32,
    pub swing: f32,
    pub sequence_length: usize,
    pub playback_mode: PlaybackMode,
    pub root_note: u8,
    pub scale: ScaleName,
    pub humanize_velocity: f32,
    pub humanize_probability: f32,
    pub humanize_nudge: f32,
    pub ratchet_velocity_falloff: f32,
    pub ratchet_probability_falloff: f32,

    // patterns
    pub patterns: Vec<Pattern>,
    pub current_pattern_index: usize,
    pub pattern_chain: Vec<usize>,
    #[serde(default)]
    pub chain_enabled: bool,

    // midi
    pub cc_mappings: CcMap,
    #[serde(default)]
    pub cc_presets: BTreeMap<String, CcMap>,
}

impl Default for SynthState {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sawtooth,
            detune: 0.0,
            sub_level: 0.0,
            sub_octave: -1,
            filter_type: FilterType::Lowpass,
            filter_cutoff: 2000.0,
            filter_q: 1.0,
            filter_env_amount: 0.3,
            attack: 0.01,
            decay: 0.2,
            sustain: 0.6,
            release: 0.3,
            lfo_rate: 2.0,
            lfo_depth: 0.0,
            lfo_waveform: Waveform::Sine,
            gain: 0.7,
            delay_time: 0.375,
            delay_feedback: 0.35,
            delay_mix: 0.2,
            bpm: 120.0,
            swing: 0.0,
            sequence_length: STEPS_PER_PATTERN,
            playback_mode: PlaybackMode::Forward,
            root_note: 48,
            scale: ScaleName::Minor,
            humanize_velocity: 0.2,
            humanize_probability: 0.1,
            humanize_nudge: 0.1,
            ratchet_velocity_falloff: 0.3,
            ratchet_probability_falloff: 0.0,
            patterns: vec![Pattern::default()],
            current_pattern_index: 0,
            pattern_chain: Vec::new(),
            chain_enabled: false,
            cc_mappings: CcMap::from([
                (1, ParamId::LfoDepth),
                (7, ParamId::Gain),
                (71, ParamId::FilterQ),
                (74, ParamId::FilterCutoff),
            ]),
            cc_presets: BTreeMap::new(),
        }
    }
}

impl SynthState {
    pub fn current_pattern(&self) -> &Pattern {
        // current_pattern_index is kept in bounds by every mutation
        &self.patterns[self.current_pattern_index.min(self.patterns.len() - 1)]
    }

    pub fn current_pattern_mut(&mut self) -> &mut Pattern {
        let i = self.current_pattern_index.min(self.patterns.len() - 1);
        &mut self.patterns[i]
    }

    /// True if the sequencer should follow `pattern_chain`.
    pub fn chain_active(&self) -> bool {
        self.chain_enabled && !self.pattern_chain.is_empty()
    }

    pub fn humanize_amounts(&self) -> HumanizeAmounts {
        HumanizeAmounts {
            velocity: self.humanize_velocity,
            probability: self.humanize_probability,
            nudge: self.humanize_nudge,
        }
    }

    /// Append an empty pattern and select it.
    pub fn add_pattern(&mut self) -> bool {
        if self.patterns.len() >= MAX_PATTERNS {
            log::warn!(target: "state", "pattern limit of {MAX_PATTERNS} reached");
            return false
        }
        self.patterns.push(Pattern::default());
        self.current_pattern_index = self.patterns.len() - 1;
        true
    }

    pub fn select_pattern(&mut self, index: usize) -> bool {
        if index >= self.patterns.len() {
            return false
        }
        self.current_pattern_index = index;
        true
    }

    /// Remove a pattern. The last remaining pattern cannot be removed.
    /// Chain entries pointing at it are dropped and later ones shifted down.
    pub fn delete_pattern(&mut self, index: usize) -> bool {
        if self.patterns.len() <= 1 || index >= self.patterns.len() {
            return false
        }
        self.patterns.remove(index);
        self.pattern_chain.retain(|&i| i != index);
        for i in &mut self.pattern_chain {
            if *i > index {
                *i -= 1;
            }
        }
        if self.current_pattern_index == index {
            self.current_pattern_index = index.saturating_sub(1);
        } else if self.current_pattern_index > index {
            self.current_pattern_index -= 1;
        }
        true
    }

    /// Move the pattern at `from` to position `to`. The current pattern and
    /// chain entries keep referring to the same patterns.
    pub fn reorder_patterns(&mut self, from: usize, to: usize) -> bool {
        let len = self.patterns.len();
        if from >= len || to >= len || from == to {
            return false
        }
        let pattern = self.patterns.remove(from);
        self.patterns.insert(to, pattern);
        self.current_pattern_index = moved_index(self.current_pattern_index, from, to);
        for i in &mut self.pattern_chain {
            *i = moved_index(*i, from, to);
        }
        true
    }

    /// Replace the chain, dropping invalid indices.
    pub fn set_pattern_chain(&mut self, chain: Vec<usize>) {
        let len = self.patterns.len();
        let (valid, invalid): (Vec<usize>, Vec<usize>) = chain.into_iter().partition(|&i| i < len);
        if !invalid.is_empty() {
            log::warn!(target: "state", "dropping invalid chain entries {invalid:?}");
        }
        self.pattern_chain = valid;
    }

    pub fn humanize_current_pattern(&mut self, rng: &mut impl Rng) {
        let amounts = self.humanize_amounts();
        self.current_pattern_mut().humanize(amounts, rng);
    }

    /// Check structural and range invariants. Used to vet imported data.
    pub fn validate(&self) -> Result<(), String> {
        for param in ParamId::VARIANTS {
            let value = param.get(self);
            let (min, max) = param.range();
            if !value.is_finite() || value < min || value > max {
                return Err(format!("{} is {value}, expected {min}..={max}", param.name()))
            }
        }
        if !(1..=STEPS_PER_PATTERN).contains(&self.sequence_length) {
            return Err(format!("sequenceLength is {}", self.sequence_length))
        }
        if self.root_note > 127 {
            return Err(format!("rootNote is {}", self.root_note))
        }
        if !(MIN_SUB_OCTAVE..=MAX_SUB_OCTAVE).contains(&self.sub_octave) {
            return Err(format!("subOctave is {}", self.sub_octave))
        }
        if self.patterns.is_empty() {
            return Err("no patterns".into())
        }
        if self.current_pattern_index >= self.patterns.len() {
            return Err(format!("currentPatternIndex {} out of bounds", self.current_pattern_index))
        }
        if let Some(i) = self.pattern_chain.iter().find(|&&i| i >= self.patterns.len()) {
            return Err(format!("pattern chain refers to missing pattern {i}"))
        }
        for (p, pattern) in self.patterns.iter().enumerate() {
            for row in 0..NUM_ROWS {
                for col in 0..STEPS_PER_PATTERN {
                    let step = &pattern.rows[row][col];
                    let ok = (0.0..=1.0).contains(&step.velocity)
                        && (0.0..=1.0).contains(&step.probability)
                        && (-1.0..=1.0).contains(&step.nudge)
                        && (1..=MAX_RATCHETS).contains(&step.ratchets);
                    if !ok {
                        return Err(format!("pattern {p} step {row}/{col} out of range"))
                    }
                }
            }
        }
        Ok(())
    }
}

/// Where index `i` ends up after moving the element at `from` to `to`.
fn moved_index(i: usize, from: usize, to: usize) -> usize {
    if i == from {
        to
    } else if from < to && i > from && i <= to {
        i - 1
    } else if from > to && i >= to && i < from {
        i + 1
    } else {
        i
    }
}

#[cfg(test)]
mod tests {
    use crate::pattern::Step;

    use super::*;

    fn with_patterns(n: usize) -> SynthState {
        let mut state = SynthState::default();
        for i in 1..n {
            state.add_pattern();
            // mark each pattern so moves can be tracked
            state.patterns[i].rows[0][0].velocity = i as f32 / 10.0;
        }
        state
    }

    #[test]
    fn test_default_is_valid() {
        assert_eq!(SynthState::default().validate(), Ok(()));
    }

    #[test]
    fn test_delete_last_pattern_is_noop() {
        let mut state = SynthState::default();
        assert!(!state.delete_pattern(0));
        assert_eq!(state, SynthState::default());
    }

    #[test]
    fn test_delete_keeps_valid_index() {
        for n in 2..6 {
            for current in 0..n {
                for deleted in 0..n {
                    let mut state = with_patterns(n);
                    state.current_pattern_index = current;
                    assert!(state.delete_pattern(deleted));
                    assert_eq!(state.patterns.len(), n - 1);
                    assert!(state.current_pattern_index <= n - 2);
                }
            }
        }
    }

    #[test]
    fn test_delete_remaps_chain() {
        let mut state = with_patterns(4);
        state.pattern_chain = vec![0, 1, 2, 3, 1];
        state.delete_pattern(1);
        assert_eq!(state.pattern_chain, vec![0, 1, 2]);
    }

    #[test]
    fn test_reorder_follows_patterns() {
        let mut state = with_patterns(4);
        state.current_pattern_index = 1;
        state.pattern_chain = vec![0, 1, 2, 3];
        let marked = state.patterns[1].clone();
        assert!(state.reorder_patterns(1, 3));
        assert_eq!(state.patterns[3], marked);
        assert_eq!(state.current_pattern_index, 3);
        assert_eq!(state.pattern_chain, vec![0, 3, 1, 2]);
    }

    #[test]
    fn test_set_chain_filters_invalid() {
        let mut state = with_patterns(2);
        state.set_pattern_chain(vec![0, 5, 1]);
        assert_eq!(state.pattern_chain, vec![0, 1]);
    }

    #[test]
    fn test_param_coerce() {
        assert_eq!(ParamId::Bpm.coerce(1000.0), 240.0);
        assert_eq!(ParamId::Gain.coerce(f32::NAN), SynthState::default().gain);
        assert_eq!(ParamId::Swing.coerce(0.5), 0.5);
    }

    #[test]
    fn test_cutoff_curve_endpoints() {
        assert_eq!(ParamId::FilterCutoff.from_normalized(0.0), MIN_FILTER_CUTOFF);
        assert_eq!(ParamId::FilterCutoff.from_normalized(1.0), MAX_FILTER_CUTOFF);
        let mid = ParamId::FilterCutoff.from_normalized(0.5);
        assert!((mid - 632.455).abs() < 0.1);
    }

    #[test]
    fn test_unknown_names_coerce() {
        assert_eq!(Waveform::from_name("wobble"), Waveform::Sine);
        assert_eq!(FilterType::from_name("comb"), FilterType::Lowpass);
        assert_eq!(PlaybackMode::from_name("shuffle"), PlaybackMode::Forward);
        assert_eq!(Waveform::from_name("triangle"), Waveform::Triangle);
    }

    #[test]
    fn test_validate_rejects_bad_step() {
        let mut state = SynthState::default();
        state.patterns[0].rows[2][3] = Step { ratchets: 0, ..Step::default() };
        assert!(state.validate().is_err());
    }

    #[test]
    fn test_param_names_round_trip() {
        for param in ParamId::VARIANTS {
            assert_eq!(ParamId::from_name(param.name()), Some(param));
        }
    }
}
