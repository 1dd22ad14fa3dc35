//! Audio graph ownership: output device or offline renderer, sample clock,
//! and the analysis tap.

use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::{traits::{DeviceTrait, HostTrait, StreamTrait}, StreamConfig};
use fundsp::hacker32::*;
use rtrb::{Consumer, Producer, RingBuffer};

use crate::fx::{DelaySettings, OutputBus};
use crate::synth::LiveParams;

/// Samples kept by the analyser for waveform display.
pub const ANALYSER_WINDOW: usize = 2048;

const TAP_CAPACITY: usize = 8192;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// Where audio goes.
#[derive(Clone, Debug, PartialEq)]
pub enum AudioOutput {
    /// Default cpal output device.
    Device,
    /// Rendered on demand with `AudioGraph::render`.
    Offline { sample_rate: u32 },
    /// No audio. Initialization always fails.
    Disabled,
}

/// Audio time in seconds, counted in rendered frames.
#[derive(Clone)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

impl AudioClock {
    fn new(sample_rate: f64) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    pub fn now(&self) -> f64 {
        self.frames.load(Ordering::Acquire) as f64 / self.sample_rate
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }
}

/// Read side of the analysis tap.
pub struct Analyser {
    rx: Consumer<f32>,
    window: VecDeque<f32>,
}

impl Analyser {
    /// Pull everything rendered since the last call.
    pub fn update(&mut self) {
        while let Ok(x) = self.rx.pop() {
            if self.window.len() >= ANALYSER_WINDOW {
                self.window.pop_front();
            }
            self.window.push_back(x);
        }
    }

    /// Most recent mono samples, oldest first.
    pub fn waveform(&mut self) -> Vec<f32> {
        self.update();
        self.window.iter().copied().collect()
    }

    /// Peak absolute level over the window.
    pub fn peak(&mut self) -> f32 {
        self.update();
        self.window.iter().fold(0.0f32, |peak, x| peak.max(x.abs()))
    }
}

struct Renderer {
    backend: BlockRateAdapter,
    tap: Producer<f32>,
}

enum Sink {
    // kept alive for the lifetime of the graph
    Device(#[allow(dead_code)] cpal::Stream),
    Offline(Renderer),
}

pub struct AudioGraph {
    id: u64,
    pub(crate) seq: Sequencer,
    clock: AudioClock,
    bus: OutputBus,
    analyser: Analyser,
    sink: Sink,
}

impl AudioGraph {
    pub fn open(output: &AudioOutput, live: &LiveParams, delay: DelaySettings
    ) -> Result<Self, Box<dyn Error>> {
        match output {
            AudioOutput::Device => Self::open_device(live, delay),
            AudioOutput::Offline { sample_rate } =>
                Ok(Self::open_offline(*sample_rate as f64, live, delay)),
            AudioOutput::Disabled => Err("audio output disabled".into()),
        }
    }

    fn open_device(live: &LiveParams, delay: DelaySettings) -> Result<Self, Box<dyn Error>> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or("could not open audio output device")?;

        let config: StreamConfig = device.supported_output_configs()?
            .next()
            .ok_or("could not find audio output config")?
            .with_max_sample_rate()
            .into();
        let sample_rate = config.sample_rate.0 as f64;
        let channels = config.channels as usize;

        let (seq, mut bus) = build(sample_rate, live, delay);
        let mut backend = BlockRateAdapter::new(Box::new(bus.net.backend()));
        let clock = AudioClock::new(sample_rate);
        let callback_clock = clock.clone();
        let (mut tap, rx) = RingBuffer::new(TAP_CAPACITY);

        let stream = device.build_output_stream(
            &config, move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(channels) {
                    let (l, r) = backend.get_stereo();
                    let _ = tap.push((l + r) * 0.5);
                    match frame {
                        [left, right, rest @ ..] => {
                            *left = l;
                            *right = r;
                            rest.fill(0.0);
                        }
                        [mono] => *mono = (l + r) * 0.5,
                        [] => (),
                    }
                }
                callback_clock.advance((data.len() / channels.max(1)) as u64);
            },
            move |err| {
                log::error!(target: "audio", "stream error: {err}");
            },
            None
        )?;
        stream.play()?;

        Ok(Self::assemble(seq, clock, bus, rx, Sink::Device(stream)))
    }

    fn open_offline(sample_rate: f64, live: &LiveParams, delay: DelaySettings) -> Self {
        let (seq, mut bus) = build(sample_rate, live, delay);
        let backend = BlockRateAdapter::new(Box::new(bus.net.backend()));
        let (tap, rx) = RingBuffer::new(TAP_CAPACITY);
        Self::assemble(seq, AudioClock::new(sample_rate), bus, rx,
            Sink::Offline(Renderer { backend, tap }))
    }

    fn assemble(seq: Sequencer, clock: AudioClock, bus: OutputBus, rx: Consumer<f32>, sink: Sink
    ) -> Self {
        let id = NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed);
        log::info!(target: "audio", "audio graph {id} running at {} Hz", clock.sample_rate());
        Self {
            id,
            seq,
            clock,
            bus,
            analyser: Analyser { rx, window: VecDeque::with_capacity(ANALYSER_WINDOW) },
            sink,
        }
    }

    /// Unique per constructed graph.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn analyser(&mut self) -> &mut Analyser {
        &mut self.analyser
    }

    pub fn commit_delay(&mut self, delay: DelaySettings) {
        self.bus.commit_delay(delay);
    }

    /// Render stereo frames and advance the clock. Only offline graphs
    /// render; device graphs return nothing.
    pub fn render(&mut self, frames: usize) -> Vec<(f32, f32)> {
        let Sink::Offline(renderer) = &mut self.sink else {
            return Vec::new()
        };
        let output = (0..frames)
            .map(|_| {
                let (l, r) = renderer.backend.get_stereo();
                let _ = renderer.tap.push((l + r) * 0.5);
                (l, r)
            })
            .collect();
        self.clock.advance(frames as u64);
        output
    }
}

fn build(sample_rate: f64, live: &LiveParams, delay: DelaySettings) -> (Sequencer, OutputBus) {
    let mut seq = Sequencer::new(false, 4);
    seq.set_sample_rate(sample_rate);
    let mut bus = OutputBus::new(&mut seq, live, delay);
    bus.net.set_sample_rate(sample_rate);
    (seq, bus)
}
