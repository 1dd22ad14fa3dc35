// output bus: delay send/return, master gain, global LFO

use fundsp::hacker32::*;

use crate::state::SynthState;
use crate::synth::{lfo, LiveParams};

/// Crossfade time for delay setting changes, in seconds.
const DELAY_FADE_TIME: f32 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DelaySettings {
    pub time: f32,
    pub feedback: f32,
    pub mix: f32,
}

impl DelaySettings {
    pub fn from_state(state: &SynthState) -> Self {
        Self {
            time: state.delay_time,
            feedback: state.delay_feedback,
            mix: state.delay_mix,
        }
    }

    fn make_node(&self) -> Box<dyn AudioUnit> {
        let Self { time, feedback: amount, mix } = *self;
        Box::new(mix * feedback((delay(time) | delay(time)) * amount))
    }
}

/// Everything between the voice sequencer and the output device.
pub struct OutputBus {
    pub net: Net,
    delay_id: NodeId,
    delay: DelaySettings,
}

impl OutputBus {
    /// Wrap a sequencer with 4 outputs (dry stereo, delay send stereo).
    pub fn new(seq: &mut Sequencer, live: &LiveParams, delay: DelaySettings) -> Self {
        let (delay_node, delay_id) = Net::wrap_id(delay.make_node());
        let voices = Net::wrap(Box::new(seq.backend()))
            >> (multipass::<U2>() + (multipass::<U2>() >> delay_node))
            >> (dcblock() | dcblock());

        Self {
            net: (voices | lfo::make_net(live))
                * (var(&live.master_gain) >> follow(0.01) | var(&live.master_gain) >> follow(0.01)),
            delay_id,
            delay,
        }
    }

    /// Crossfade to new delay settings if they changed.
    pub fn commit_delay(&mut self, delay: DelaySettings) {
        if delay != self.delay {
            self.delay = delay;
            self.net.crossfade(self.delay_id, Fade::Smooth, DELAY_FADE_TIME, delay.make_node());
            self.net.commit();
        }
    }
}
