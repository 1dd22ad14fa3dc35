//! Polyphonic subtractive synth with a look-ahead step sequencer.

use std::error::Error;
use std::thread;

use config::Config;
use snapshot::SnapshotStore;

pub mod audio;
pub mod config;
mod dsp;
pub mod engine;
pub mod fx;
pub mod history;
pub mod input;
pub mod midi;
pub mod pattern;
pub mod playback;
pub mod scale;
pub mod snapshot;
pub mod state;
pub mod synth;

pub use engine::{Engine, EngineEvent, EngineSettings};
pub use state::{ParamId, SynthState};

/// Application name, for MIDI client names, etc.
pub const APP_NAME: &str = "Howlin";

/// Application entry point. Plays until the process is killed.
pub fn run(arg: Option<String>) -> Result<(), Box<dyn Error>> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            log::info!("using default config: {e}");
            Config::default()
        }
    };

    let mut engine = Engine::new(config.engine_settings());
    if !engine.initialize_audio() {
        return Err("could not open audio output device".into())
    }

    if let Some(name) = &config.default_midi_input {
        if let Err(e) = engine.select_midi_input_by_name(name) {
            log::warn!(target: "midi", "{name}: {e}");
        }
    }

    let store = SnapshotStore::local(&config.snapshot_file)?;
    if let Some(name) = arg {
        engine.load_snapshot(&store, &name)?;
    }

    engine.start_sequencer();
    let interval = config.schedule_interval();

    loop {
        engine.poll_midi();
        engine.tick();
        thread::sleep(interval);
    }
}
