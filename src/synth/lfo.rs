use std::f32::consts::TAU;

use fundsp::hacker32::*;

use crate::dsp::{sample_to, smooth};
use crate::state::Waveform;

use super::{LiveParams, PARAM_SMOOTHING};

/// Build the global LFO. It has no outputs; the current value is published
/// to `live.lfo_value`, which every voice reads.
pub(crate) fn make_net(live: &LiveParams) -> Net {
    let rate = Net::wrap(Box::new(var(&live.lfo_rate) >> smooth(PARAM_SMOOTHING)));

    let shape = Waveform::VARIANTS.into_iter()
        .map(|w| (rate.clone() >> Net::wrap(Box::new(lfo(w))))
            * Net::wrap(Box::new(var(&live.lfo_waveform[w.index()]))))
        .reduce(|sum, x| sum + x)
        .unwrap_or_else(|| Net::wrap(Box::new(zero())));

    shape >> sample_to(&live.lfo_value) >> sink()
}

/// Value of `waveform` at `phase` in 0..1, in -1..1. All shapes start at
/// their peak or zero crossing going up.
fn wave_at(waveform: Waveform, phase: f32) -> f32 {
    match waveform {
        Waveform::Sine => (phase * TAU).sin(),
        Waveform::Square => if phase < 0.5 { 1.0 } else { -1.0 },
        Waveform::Sawtooth => phase * 2.0 - 1.0,
        Waveform::Triangle => {
            if phase < 0.25 {
                phase * 4.0
            } else if phase < 0.75 {
                1.0 - (phase - 0.25) * 4.0
            } else {
                (phase - 0.75) * 4.0 - 1.0
            }
        }
    }
}

/// LFO in -1..1 that takes frequency as an input. Phase is accumulated so
/// rate changes don't cause jumps.
fn lfo(waveform: Waveform
) -> An<EnvelopeIn<f32, impl FnMut(f32, &Frame<f32, U1>) -> f32 + Clone, U1, f32>> {
    let phase = var(&shared(0.0));
    let prev_time = var(&shared(0.0));
    lfo_in(move |t, i| {
        let dt = t - prev_time.value();
        prev_time.set_value(t);
        let p = (phase.value() + dt * i[0]) % 1.0;
        phase.set_value(p);
        wave_at(waveform, p)
    })
}

#[cfg(test)]
mod tests {
    use crate::state::SynthState;

    use super::*;

    #[test]
    fn test_lfo_publishes_value() {
        let mut state = SynthState::default();
        state.lfo_waveform = Waveform::Square;
        let live = LiveParams::new(&state);
        let mut net = make_net(&live);
        net.set_sample_rate(DEFAULT_SR);
        for _ in 0..64 {
            net.tick(&[], &mut []);
        }
        // square starts high
        assert_eq!(live.lfo_value.value(), 1.0);
    }

    #[test]
    fn test_wave_shapes() {
        assert_eq!(wave_at(Waveform::Triangle, 0.25), 1.0);
        assert_eq!(wave_at(Waveform::Triangle, 0.75), -1.0);
        assert_eq!(wave_at(Waveform::Sawtooth, 0.0), -1.0);
        assert_eq!(wave_at(Waveform::Square, 0.75), -1.0);
        assert!(wave_at(Waveform::Sine, 0.25) > 0.999);
    }
}
