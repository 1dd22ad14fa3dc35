//! The engine: one `SynthState`, its undo history, the voice layer, the
//! step sequencer and MIDI input, driven from a single host loop.

use std::error::Error;
use std::sync::mpsc::{channel, Receiver, Sender};

use rand::{rngs::StdRng, SeedableRng};

use crate::audio::{Analyser, AudioGraph, AudioOutput};
use crate::fx::DelaySettings;
use crate::history::{History, HISTORY_DEPTH};
use crate::input::{cc_value, velocity_amount, LearnState, MidiEvent, MIDI_MAX};
use crate::midi::{MidiInputs, MidiPortInfo};
use crate::pattern::{Pattern, Step, STEPS_PER_PATTERN};
use crate::playback::{ScheduledNote, Transport, LOOKAHEAD};
use crate::scale::{nearest_row, scale_notes, ScaleName};
use crate::snapshot::{SnapshotError, SnapshotStore};
use crate::state::{
    FilterType, ParamId, PlaybackMode, SynthState, Waveform, MAX_SUB_OCTAVE, MIN_SUB_OCTAVE,
};
use crate::synth::{LiveParams, Synth};

#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub output: AudioOutput,
    /// Scheduling look-ahead window in seconds.
    pub lookahead: f64,
    /// RNG seed. Random if None.
    pub seed: Option<u64>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            output: AudioOutput::Device,
            lookahead: LOOKAHEAD,
            seed: None,
        }
    }
}

/// Notifications for observers.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// `SynthState` was replaced.
    StateChanged,
    Step(Option<usize>),
    ActivePattern(usize),
    Playback(bool),
    Learning(Option<ParamId>),
    Recording(bool),
}

enum AudioState {
    Uninitialized,
    Ready(AudioGraph),
    /// Opening failed. Not retried.
    Unavailable,
}

pub struct Engine {
    state: SynthState,
    history: History<SynthState>,
    transport: Transport,
    synth: Synth,
    live: LiveParams,
    audio: AudioState,
    output: AudioOutput,
    lookahead: f64,
    scale_notes: Vec<u8>,
    learn: LearnState,
    recording: bool,
    clipboard: Option<Pattern>,
    midi: Option<MidiInputs>,
    rng: StdRng,
    published_step: Option<usize>,
    published_pattern: Option<usize>,
    observers: Vec<Sender<EngineEvent>>,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        let state = SynthState::default();
        Self {
            live: LiveParams::new(&state),
            scale_notes: scale_notes(state.root_note, state.scale),
            state,
            history: History::new(HISTORY_DEPTH),
            transport: Transport::Stopped,
            synth: Synth::new(),
            audio: AudioState::Uninitialized,
            output: settings.output,
            lookahead: settings.lookahead,
            learn: LearnState::Idle,
            recording: false,
            clipboard: None,
            midi: None,
            rng: match settings.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
            published_step: None,
            published_pattern: None,
            observers: Vec::new(),
        }
    }

    // state transitions

    /// Replace the state with `next`, recording the old one for undo.
    /// Returns false, touching nothing, if nothing changed.
    fn commit(&mut self, next: SynthState) -> bool {
        if next == self.state {
            return false
        }
        let previous = std::mem::replace(&mut self.state, next);
        self.history.push(previous);
        self.state_changed();
        true
    }

    /// Apply `f` to a copy of the state and commit it. `f` returns false to
    /// abandon the change.
    fn mutate(&mut self, f: impl FnOnce(&mut SynthState) -> bool) -> bool {
        let mut next = self.state.clone();
        f(&mut next) && self.commit(next)
    }

    fn set_field<T: PartialEq>(&mut self, value: T, field: fn(&mut SynthState) -> &mut T) -> bool {
        self.mutate(|s| {
            let f = field(s);
            if *f == value {
                false
            } else {
                *f = value;
                true
            }
        })
    }

    fn state_changed(&mut self) {
        self.live.apply(&self.state);
        self.scale_notes = scale_notes(self.state.root_note, self.state.scale);
        let delay = DelaySettings::from_state(&self.state);
        if let AudioState::Ready(graph) = &mut self.audio {
            graph.commit_delay(delay);
        }
        self.notify(EngineEvent::StateChanged);
        self.publish_transport();
    }

    fn notify(&mut self, event: EngineEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn publish_transport(&mut self) {
        let step = self.transport.current_step();
        if step != self.published_step {
            self.published_step = step;
            self.notify(EngineEvent::Step(step));
        }
        let pattern = self.active_pattern_index();
        if Some(pattern) != self.published_pattern {
            self.published_pattern = Some(pattern);
            self.notify(EngineEvent::ActivePattern(pattern));
        }
    }

    // audio and transport

    /// Open the audio graph if it isn't open yet. Returns false if audio is
    /// unavailable.
    pub fn initialize_audio(&mut self) -> bool {
        match self.audio {
            AudioState::Ready(_) => true,
            AudioState::Unavailable => false,
            AudioState::Uninitialized => {
                match AudioGraph::open(&self.output, &self.live,
                    DelaySettings::from_state(&self.state)) {
                    Ok(graph) => {
                        self.audio = AudioState::Ready(graph);
                        true
                    }
                    Err(e) => {
                        log::warn!(target: "audio", "audio unavailable: {e}");
                        self.audio = AudioState::Unavailable;
                        false
                    }
                }
            }
        }
    }

    /// ID of the open audio graph.
    pub fn audio_graph_id(&self) -> Option<u64> {
        match &self.audio {
            AudioState::Ready(graph) => Some(graph.id()),
            _ => None,
        }
    }

    /// Current audio-clock time, or 0 without audio.
    pub fn now(&self) -> f64 {
        match &self.audio {
            AudioState::Ready(graph) => graph.now(),
            _ => 0.0,
        }
    }

    /// Render frames from an offline graph.
    pub fn render(&mut self, frames: usize) -> Vec<(f32, f32)> {
        match &mut self.audio {
            AudioState::Ready(graph) => graph.render(frames),
            _ => Vec::new(),
        }
    }

    /// Run one scheduler pass. Call every `SCHEDULE_INTERVAL`.
    pub fn tick(&mut self) -> Vec<ScheduledNote> {
        let AudioState::Ready(graph) = &mut self.audio else {
            return Vec::new()
        };
        let now = graph.now();
        self.synth.prune(now);

        let notes = self.transport.schedule(now, self.lookahead, &self.state,
            &self.scale_notes, &mut self.rng);
        for note in &notes {
            self.synth.trigger_at(note.note, note.velocity, note.time,
                &self.state, &self.live, &mut graph.seq);
        }
        if !notes.is_empty() {
            log::debug!(target: "playback", "scheduled {} notes at {now:.3}", notes.len());
        }

        self.publish_transport();
        notes
    }

    pub fn start_sequencer(&mut self) {
        if self.transport.is_playing() {
            return
        }
        if !self.initialize_audio() {
            log::warn!(target: "playback", "cannot start sequencer without audio");
            return
        }
        self.transport = Transport::start(self.now(), &self.state);
        self.notify(EngineEvent::Playback(true));
        self.publish_transport();
    }

    /// Stop scheduling. Notes already scheduled still play.
    pub fn stop_sequencer(&mut self) {
        if !self.transport.is_playing() {
            return
        }
        self.transport.stop();
        self.notify(EngineEvent::Playback(false));
        self.publish_transport();
    }

    pub fn toggle_sequencer(&mut self) {
        if self.transport.is_playing() {
            self.stop_sequencer();
        } else {
            self.start_sequencer();
        }
    }

    // notes

    /// `velocity` is 0..1.
    pub fn note_on(&mut self, note: u8, velocity: f32) {
        let note = note.min(MIDI_MAX);
        let velocity = if velocity.is_finite() { velocity.clamp(0.0, 1.0) } else { 0.0 };
        self.record(note, velocity);

        if !self.initialize_audio() {
            return
        }
        if let AudioState::Ready(graph) = &mut self.audio {
            let now = graph.now();
            self.synth.note_on(note, velocity, now, &self.state, &self.live, &mut graph.seq);
        }
    }

    pub fn note_off(&mut self, note: u8) {
        if let AudioState::Ready(graph) = &mut self.audio {
            let now = graph.now();
            self.synth.note_off(note, now, &mut graph.seq);
        }
    }

    /// Silence everything and stop the sequencer.
    pub fn panic(&mut self) {
        self.stop_sequencer();
        if let AudioState::Ready(graph) = &mut self.audio {
            self.synth.panic(&mut graph.seq);
        }
    }

    /// Write a played note into the step the sequencer is on.
    fn record(&mut self, note: u8, velocity: f32) {
        if !self.recording {
            return
        }
        let (Some(step), Some(pattern)) =
            (self.transport.current_step(), self.transport.pattern_index()) else {
            return
        };
        let Some(row) = nearest_row(&self.scale_notes, note) else {
            return
        };
        self.mutate(|s| {
            let Some(cell) = s.patterns.get_mut(pattern).and_then(|p| p.step_mut(row, step))
            else {
                return false
            };
            cell.velocity = if cell.active { cell.velocity.max(velocity) } else { velocity };
            cell.active = true;
            true
        });
    }

    // MIDI messages

    pub fn handle_midi_message(&mut self, data: &[u8]) {
        match MidiEvent::parse(data) {
            Some(MidiEvent::NoteOn { key, velocity, .. }) =>
                self.note_on(key, velocity_amount(velocity)),
            Some(MidiEvent::NoteOff { key, .. }) => self.note_off(key),
            Some(MidiEvent::Controller { controller, value, .. }) =>
                self.control_change(controller, value),
            None => (),
        }
    }

    /// Bind the CC if learning, otherwise drive the mapped parameter.
    pub fn control_change(&mut self, cc: u8, value: u8) {
        if let LearnState::Awaiting(param) = self.learn {
            self.learn = LearnState::Idle;
            self.set_cc_mapping(cc, param);
            self.notify(EngineEvent::Learning(None));
            return
        }
        if let Some(&param) = self.state.cc_mappings.get(&cc) {
            self.set_param(param, cc_value(param, value));
        }
    }

    // parameters

    /// Set a numeric parameter. Out-of-range values are coerced.
    pub fn set_param(&mut self, param: ParamId, value: f32) -> bool {
        let value = param.coerce(value);
        self.mutate(|s| {
            if param.get(s) == value {
                return false
            }
            param.set(s, value);
            true
        })
    }

    /// Set a parameter by its camelCase name. Unknown names are ignored.
    pub fn set_param_by_name(&mut self, name: &str, value: f32) -> bool {
        match ParamId::from_name(name) {
            Some(param) => self.set_param(param, value),
            None => {
                log::warn!(target: "state", "unknown parameter {name:?}");
                false
            }
        }
    }

    pub fn set_bpm(&mut self, bpm: f32) -> bool {
        self.set_param(ParamId::Bpm, bpm)
    }

    pub fn set_swing(&mut self, swing: f32) -> bool {
        self.set_param(ParamId::Swing, swing)
    }

    pub fn set_gain(&mut self, gain: f32) -> bool {
        self.set_param(ParamId::Gain, gain)
    }

    pub fn set_filter_cutoff(&mut self, hz: f32) -> bool {
        self.set_param(ParamId::FilterCutoff, hz)
    }

    pub fn set_filter_q(&mut self, q: f32) -> bool {
        self.set_param(ParamId::FilterQ, q)
    }

    pub fn set_waveform(&mut self, waveform: Waveform) -> bool {
        self.set_field(waveform, |s| &mut s.waveform)
    }

    pub fn set_waveform_by_name(&mut self, name: &str) -> bool {
        self.set_waveform(Waveform::from_name(name))
    }

    pub fn set_filter_type(&mut self, filter_type: FilterType) -> bool {
        self.set_field(filter_type, |s| &mut s.filter_type)
    }

    pub fn set_filter_type_by_name(&mut self, name: &str) -> bool {
        self.set_filter_type(FilterType::from_name(name))
    }

    pub fn set_lfo_waveform(&mut self, waveform: Waveform) -> bool {
        self.set_field(waveform, |s| &mut s.lfo_waveform)
    }

    pub fn set_lfo_waveform_by_name(&mut self, name: &str) -> bool {
        self.set_lfo_waveform(Waveform::from_name(name))
    }

    pub fn set_playback_mode(&mut self, mode: PlaybackMode) -> bool {
        self.set_field(mode, |s| &mut s.playback_mode)
    }

    pub fn set_playback_mode_by_name(&mut self, name: &str) -> bool {
        self.set_playback_mode(PlaybackMode::from_name(name))
    }

    pub fn set_scale(&mut self, scale: ScaleName) -> bool {
        self.set_field(scale, |s| &mut s.scale)
    }

    pub fn set_scale_by_name(&mut self, name: &str) -> bool {
        self.set_scale(ScaleName::from_name(name))
    }

    pub fn set_root_note(&mut self, note: u8) -> bool {
        if note > MIDI_MAX {
            log::warn!(target: "state", "root note {note} clamped to {MIDI_MAX}");
        }
        self.set_field(note.min(MIDI_MAX), |s| &mut s.root_note)
    }

    pub fn set_sub_octave(&mut self, octave: i8) -> bool {
        let clamped = octave.clamp(MIN_SUB_OCTAVE, MAX_SUB_OCTAVE);
        if clamped != octave {
            log::warn!(target: "state", "sub octave {octave} clamped to {clamped}");
        }
        self.set_field(clamped, |s| &mut s.sub_octave)
    }

    pub fn set_sequence_length(&mut self, length: usize) -> bool {
        let clamped = length.clamp(1, STEPS_PER_PATTERN);
        if clamped != length {
            log::warn!(target: "state", "sequence length {length} clamped to {clamped}");
        }
        self.set_field(clamped, |s| &mut s.sequence_length)
    }

    // pattern editing

    /// Replace a step in the current pattern.
    pub fn update_step(&mut self, row: usize, col: usize, step: Step) -> bool {
        let step = step.clamped();
        self.mutate(|s| match s.current_pattern_mut().step_mut(row, col) {
            Some(cell) => {
                *cell = step;
                true
            }
            None => false,
        })
    }

    pub fn toggle_step(&mut self, row: usize, col: usize) -> bool {
        self.mutate(|s| match s.current_pattern_mut().step_mut(row, col) {
            Some(cell) => {
                cell.active = !cell.active;
                true
            }
            None => false,
        })
    }

    pub fn add_pattern(&mut self) -> bool {
        self.mutate(|s| s.add_pattern())
    }

    pub fn select_pattern(&mut self, index: usize) -> bool {
        self.mutate(|s| s.select_pattern(index))
    }

    /// No-op for the last remaining pattern.
    pub fn delete_pattern(&mut self, index: usize) -> bool {
        self.mutate(|s| s.delete_pattern(index))
    }

    pub fn reorder_patterns(&mut self, from: usize, to: usize) -> bool {
        self.mutate(|s| s.reorder_patterns(from, to))
    }

    pub fn clear_current_pattern(&mut self) -> bool {
        self.mutate(|s| {
            s.current_pattern_mut().clear();
            true
        })
    }

    pub fn copy_pattern(&mut self) {
        self.clipboard = Some(self.state.current_pattern().clone());
    }

    /// Overwrite the current pattern with the copied one.
    pub fn paste_pattern(&mut self) -> bool {
        let Some(pattern) = self.clipboard.clone() else {
            return false
        };
        self.mutate(|s| {
            *s.current_pattern_mut() = pattern;
            true
        })
    }

    /// Randomize velocity, probability and nudge of active steps in the
    /// current pattern.
    pub fn humanize_current_pattern(&mut self) -> bool {
        let mut next = self.state.clone();
        next.humanize_current_pattern(&mut self.rng);
        self.commit(next)
    }

    pub fn set_pattern_chain(&mut self, chain: Vec<usize>) -> bool {
        self.mutate(|s| {
            s.set_pattern_chain(chain);
            true
        })
    }

    pub fn set_chain_enabled(&mut self, enabled: bool) -> bool {
        self.set_field(enabled, |s| &mut s.chain_enabled)
    }

    // CC mapping

    /// Map a CC number to a parameter, replacing any previous mapping for
    /// that CC.
    pub fn set_cc_mapping(&mut self, cc: u8, param: ParamId) -> bool {
        if cc > MIDI_MAX {
            log::warn!(target: "midi", "ignoring mapping for invalid CC {cc}");
            return false
        }
        self.mutate(|s| s.cc_mappings.insert(cc, param) != Some(param))
    }

    pub fn remove_cc_mapping(&mut self, cc: u8) -> bool {
        self.mutate(|s| s.cc_mappings.remove(&cc).is_some())
    }

    /// Bind the next received CC to `param`.
    pub fn start_learning(&mut self, param: ParamId) {
        self.learn = LearnState::Awaiting(param);
        self.notify(EngineEvent::Learning(Some(param)));
    }

    pub fn cancel_learning(&mut self) {
        if self.learn != LearnState::Idle {
            self.learn = LearnState::Idle;
            self.notify(EngineEvent::Learning(None));
        }
    }

    pub fn save_cc_preset(&mut self, name: &str) -> bool {
        let name = name.trim().to_owned();
        if name.is_empty() {
            return false
        }
        self.mutate(|s| {
            let mappings = s.cc_mappings.clone();
            s.cc_presets.insert(name, mappings);
            true
        })
    }

    pub fn load_cc_preset(&mut self, name: &str) -> bool {
        self.mutate(|s| match s.cc_presets.get(name) {
            Some(mappings) => {
                s.cc_mappings = mappings.clone();
                true
            }
            None => false,
        })
    }

    pub fn delete_cc_preset(&mut self, name: &str) -> bool {
        self.mutate(|s| s.cc_presets.remove(name).is_some())
    }

    // history

    pub fn undo(&mut self) -> bool {
        if self.history.undo(&mut self.state) {
            self.state_changed();
            true
        } else {
            false
        }
    }

    pub fn redo(&mut self) -> bool {
        if self.history.redo(&mut self.state) {
            self.state_changed();
            true
        } else {
            false
        }
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    // whole-state replacement

    /// Replace the whole state, as an undoable change.
    pub fn load_state(&mut self, state: SynthState) -> Result<(), Box<dyn Error>> {
        state.validate()?;
        self.commit(state);
        Ok(())
    }

    /// Load a stored snapshot, as an undoable change.
    pub fn load_snapshot(&mut self, store: &SnapshotStore, name: &str
    ) -> Result<(), SnapshotError> {
        let state = store.load(name)?;
        self.load_state(state).map_err(|e| SnapshotError::InvalidSnapshot {
            name: name.to_owned(),
            reason: e.to_string(),
        })
    }

    pub fn save_snapshot(&self, store: &mut SnapshotStore, name: &str, description: &str,
        tags: &[String]
    ) -> Result<(), SnapshotError> {
        store.save(name, &self.state, description, tags)
    }

    // MIDI devices

    /// Open the MIDI subsystem if needed. Returns false if unavailable.
    pub fn initialize_midi(&mut self) -> bool {
        self.midi.get_or_insert_with(MidiInputs::new).is_available()
    }

    pub fn midi_inputs(&mut self) -> Vec<MidiPortInfo> {
        if !self.initialize_midi() {
            return Vec::new()
        }
        self.midi.as_ref().map(|m| m.ports()).unwrap_or_default()
    }

    /// Listen to one input port, closing any previous connection.
    pub fn select_midi_input(&mut self, id: &str) -> Result<(), Box<dyn Error>> {
        self.initialize_midi();
        self.midi.as_mut().ok_or("Could not open MIDI")?.select(id)
    }

    pub fn select_midi_input_by_name(&mut self, name: &str) -> Result<(), Box<dyn Error>> {
        self.initialize_midi();
        self.midi.as_mut().ok_or("Could not open MIDI")?.select_by_name(name)
    }

    /// Handle every MIDI message received since the last call.
    pub fn poll_midi(&mut self) {
        let messages = self.midi.as_ref().map(|m| m.poll()).unwrap_or_default();
        for message in messages {
            self.handle_midi_message(&message);
        }
    }

    pub fn set_recording(&mut self, recording: bool) {
        if recording != self.recording {
            self.recording = recording;
            self.notify(EngineEvent::Recording(recording));
        }
    }

    // observation

    pub fn subscribe(&mut self) -> Receiver<EngineEvent> {
        let (tx, rx) = channel();
        self.observers.push(tx);
        rx
    }

    pub fn state(&self) -> &SynthState {
        &self.state
    }

    /// Latest scheduled step, or None when stopped.
    pub fn current_step(&self) -> Option<usize> {
        self.transport.current_step()
    }

    pub fn is_sequencer_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// MIDI note for each sequencer row.
    pub fn scale_midi_notes(&self) -> &[u8] {
        &self.scale_notes
    }

    /// Pattern being played, or the current pattern when stopped.
    pub fn active_pattern_index(&self) -> usize {
        self.transport.pattern_index().unwrap_or(self.state.current_pattern_index)
    }

    pub fn learning(&self) -> Option<ParamId> {
        self.learn.target()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn held_notes(&self) -> Vec<u8> {
        self.synth.active_notes()
    }

    pub fn analyser(&mut self) -> Option<&mut Analyser> {
        match &mut self.audio {
            AudioState::Ready(graph) => Some(graph.analyser()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::pattern::NUM_ROWS;

    use super::*;

    const SR: u32 = 48_000;

    fn engine() -> Engine {
        Engine::new(EngineSettings {
            output: AudioOutput::Offline { sample_rate: SR },
            lookahead: LOOKAHEAD,
            seed: Some(1),
        })
    }

    fn silent_engine() -> Engine {
        Engine::new(EngineSettings {
            output: AudioOutput::Disabled,
            lookahead: LOOKAHEAD,
            seed: Some(1),
        })
    }

    fn on(velocity: f32) -> Step {
        Step { active: true, velocity, ..Step::default() }
    }

    #[test]
    fn test_first_step_one_sixteenth_after_start() {
        let mut e = engine();
        e.update_step(0, 0, on(0.8));
        e.start_sequencer();
        assert!(e.tick().is_empty());

        e.render(SR as usize / 20);
        let notes = e.tick();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].time, 0.125);
        assert_eq!(notes[0].velocity, 0.8);
        assert_eq!(notes[0].note, e.scale_midi_notes()[0]);
        assert_eq!(e.current_step(), Some(0));
    }

    fn peak(frames: &[(f32, f32)]) -> f32 {
        frames.iter().fold(0.0f32, |peak, (l, r)| peak.max(l.abs()).max(r.abs()))
    }

    #[test]
    fn test_cutoff_change_reaches_held_voice() {
        let mut e = engine();
        e.set_param(ParamId::DelayMix, 0.0);
        e.note_on(60, 1.0);

        // past the filter envelope decay
        let block = SR as usize * 3 / 10;
        let before = peak(&e.render(block)[block * 2 / 3..]);
        assert!(before > 0.01);

        assert!(e.set_filter_cutoff(20.0));
        let after = peak(&e.render(block)[block * 2 / 3..]);
        assert!(after < before * 0.1, "peak {before} -> {after}");
    }

    #[test]
    fn test_cc_cutoff_endpoints() {
        let mut e = silent_engine();
        e.set_cc_mapping(74, ParamId::FilterCutoff);
        e.handle_midi_message(&[0xb0, 74, 127]);
        assert_eq!(e.state().filter_cutoff, 20_000.0);
        e.handle_midi_message(&[0xb0, 74, 0]);
        assert_eq!(e.state().filter_cutoff, 20.0);
    }

    #[test]
    fn test_learn_binds_next_cc() {
        let mut e = silent_engine();
        let events = e.subscribe();
        e.start_learning(ParamId::Bpm);
        assert_eq!(e.learning(), Some(ParamId::Bpm));
        e.handle_midi_message(&[0xb0, 20, 64]);
        assert_eq!(e.learning(), None);
        assert_eq!(e.state().cc_mappings.get(&20), Some(&ParamId::Bpm));
        assert_eq!(e.state().bpm, 120.0);

        e.handle_midi_message(&[0xb0, 20, 127]);
        assert_eq!(e.state().bpm, 240.0);

        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events[0], EngineEvent::Learning(Some(ParamId::Bpm)));
        assert!(events.contains(&EngineEvent::Learning(None)));
    }

    #[test]
    fn test_cc_reassign_replaces() {
        let mut e = silent_engine();
        e.set_cc_mapping(74, ParamId::Gain);
        assert_eq!(e.state().cc_mappings.get(&74), Some(&ParamId::Gain));
        assert!(!e.set_cc_mapping(74, ParamId::Gain));
    }

    #[test]
    fn test_recording_while_stopped_writes_nothing() {
        let mut e = engine();
        e.set_recording(true);
        e.note_on(48, 1.0);
        e.note_off(48);
        assert_eq!(e.state().current_pattern().active_count(), 0);
        assert!(!e.can_undo());
    }

    #[test]
    fn test_recording_while_playing() {
        let mut e = engine();
        e.start_sequencer();
        e.render(SR as usize / 20);
        e.tick();
        let step = e.current_step().unwrap();

        e.set_recording(true);
        let root = e.scale_midi_notes()[0];
        e.note_on(root, 0.5);
        e.note_on(root, 0.3);
        let cell = e.state().current_pattern().step(0, step).unwrap();
        assert!(cell.active);
        assert_eq!(cell.velocity, 0.5);
    }

    #[test]
    fn test_humanize_empty_pattern_unchanged() {
        let mut e = silent_engine();
        let before = e.state().clone();
        assert!(!e.humanize_current_pattern());
        assert_eq!(*e.state(), before);
        assert!(!e.can_undo());
    }

    #[test]
    fn test_undo_redo_bit_identical() {
        let mut e = silent_engine();
        let mut states = vec![e.state().clone()];
        for i in 0..60 {
            let changed = match i % 4 {
                0 => e.set_bpm(41.0 + i as f32),
                1 => e.toggle_step(i % NUM_ROWS, i % 16),
                2 => e.set_waveform(Waveform::VARIANTS[(i / 4) % 4]),
                _ => e.set_filter_cutoff(100.0 + i as f32),
            };
            assert!(changed);
            states.push(e.state().clone());
        }

        for i in 0..HISTORY_DEPTH {
            assert!(e.undo());
            assert_eq!(*e.state(), states[states.len() - 2 - i]);
        }
        assert!(!e.undo());

        for i in 0..HISTORY_DEPTH {
            assert!(e.redo());
            assert_eq!(*e.state(), states[states.len() - HISTORY_DEPTH + i]);
        }
        assert!(!e.redo());
    }

    #[test]
    fn test_noop_not_tracked() {
        let mut e = silent_engine();
        assert!(!e.delete_pattern(0));
        assert!(!e.set_bpm(120.0));
        assert!(!e.select_pattern(5));
        assert!(!e.can_undo());
    }

    #[test]
    fn test_delete_current_pattern_keeps_valid_index() {
        let mut e = silent_engine();
        e.add_pattern();
        e.add_pattern();
        assert_eq!(e.state().current_pattern_index, 2);
        assert!(e.delete_pattern(2));
        assert_eq!(e.state().patterns.len(), 2);
        assert_eq!(e.state().current_pattern_index, 1);
        assert!(e.delete_pattern(1));
        assert_eq!(e.state().current_pattern_index, 0);
        assert!(!e.delete_pattern(0));
    }

    #[test]
    fn test_copy_paste_pattern() {
        let mut e = silent_engine();
        e.toggle_step(3, 4);
        e.copy_pattern();
        e.add_pattern();
        assert_eq!(e.state().current_pattern().active_count(), 0);
        assert!(e.paste_pattern());
        assert_eq!(e.state().patterns[0], e.state().patterns[1]);
    }

    #[test]
    fn test_initialize_audio_idempotent() {
        let mut e = engine();
        assert!(e.initialize_audio());
        let id = e.audio_graph_id();
        assert!(e.initialize_audio());
        assert_eq!(e.audio_graph_id(), id);
    }

    #[test]
    fn test_works_without_audio() {
        let mut e = silent_engine();
        e.panic();
        assert!(!e.initialize_audio());
        e.note_on(60, 1.0);
        e.note_off(60);
        e.start_sequencer();
        assert!(!e.is_sequencer_playing());
        assert!(e.tick().is_empty());
        assert!(e.set_gain(0.2));
        assert_eq!(e.state().gain, 0.2);
        e.panic();
    }

    #[test]
    fn test_panic_stops_sequencer() {
        let mut e = engine();
        e.start_sequencer();
        e.note_on(60, 1.0);
        assert_eq!(e.held_notes(), vec![60]);
        e.panic();
        assert!(!e.is_sequencer_playing());
        assert_eq!(e.current_step(), None);
        assert!(e.held_notes().is_empty());
    }

    #[test]
    fn test_scale_notes_follow_undo() {
        let mut e = silent_engine();
        let before = e.scale_midi_notes().to_vec();
        e.set_root_note(60);
        assert_eq!(e.scale_midi_notes()[0], 60);
        e.undo();
        assert_eq!(e.scale_midi_notes(), before.as_slice());
    }

    #[test]
    fn test_invalid_names_coerced() {
        let mut e = silent_engine();
        e.set_waveform_by_name("kazoo");
        assert_eq!(e.state().waveform, Waveform::Sine);
        assert!(!e.set_param_by_name("wobble", 1.0));
        e.set_param(ParamId::Gain, f32::NAN);
        assert!(e.state().gain.is_finite());
    }

    #[test]
    fn test_cc_presets() {
        let mut e = silent_engine();
        assert!(e.save_cc_preset("studio"));
        e.set_cc_mapping(1, ParamId::Bpm);
        assert!(e.load_cc_preset("studio"));
        assert_eq!(e.state().cc_mappings.get(&1), Some(&ParamId::LfoDepth));
        assert!(!e.load_cc_preset("missing"));
        assert!(e.delete_cc_preset("studio"));
        assert!(e.state().cc_presets.is_empty());
    }

    #[test]
    fn test_snapshot_load_is_undoable() {
        let mut e = silent_engine();
        let mut store = SnapshotStore::in_memory();
        e.set_bpm(90.0);
        e.save_snapshot(&mut store, "slow", "", &[]).unwrap();
        e.set_bpm(150.0);

        e.load_snapshot(&store, "slow").unwrap();
        assert_eq!(e.state().bpm, 90.0);
        e.undo();
        assert_eq!(e.state().bpm, 150.0);
        assert!(e.load_snapshot(&store, "fast").is_err());
    }

    #[test]
    fn test_load_state_rejects_out_of_range() {
        let mut e = silent_engine();
        let mut bad = SynthState::default();
        bad.bpm = 1000.0;
        let err = e.load_state(bad).unwrap_err();
        assert!(err.to_string().contains(ParamId::Bpm.name()));
        assert_eq!(e.state().bpm, 120.0);
        assert!(!e.can_undo());
    }

    #[test]
    fn test_observers_notified() {
        let mut e = engine();
        let events = e.subscribe();
        e.set_swing(0.3);
        e.start_sequencer();
        let events: Vec<_> = events.try_iter().collect();
        assert_eq!(events[0], EngineEvent::StateChanged);
        assert!(events.contains(&EngineEvent::Playback(true)));
    }
}
