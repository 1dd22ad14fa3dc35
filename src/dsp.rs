//! Custom FunDSP audio nodes.

use fundsp::prelude::*;

/// ADSR driven by a gate input. Gate > 0 starts (or restarts) the attack,
/// gate <= 0 starts the release from the current ADS position.
pub fn gated_adsr(
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
) -> An<EnvelopeIn<f32, impl FnMut(f32, &Frame<f32, U1>) -> f32 + Clone, U1, f32>> {
    let attack_start = var(&shared(0.0));
    let release_start = var(&shared(-1.0));

    envelope2(move |time, control| {
        if release_start.value() >= 0.0 && control > 0.0 {
            attack_start.set_value(time);
            release_start.set_value(-1.0);
        } else if release_start.value() < 0.0 && control <= 0.0 {
            release_start.set_value(time);
        }

        let ads_value = ads(attack, decay, sustain, time - attack_start.value());
        if release_start.value() < 0.0 {
            ads_value
        } else {
            ads_value * clamp01(delerp(release, 0.0, time - release_start.value()))
        }
    })
}

/// ADS envelope. Helper for ADSR.
pub fn ads(attack: f32, decay: f32, sustain: f32, time: f32) -> f32 {
    if time < attack {
        lerp(0.0, 1.0, time / attack)
    } else {
        let decay_time = time - attack;
        if decay_time < decay {
            lerp(1.0, sustain, decay_time / decay)
        } else {
            sustain
        }
    }
}

/// Converts octaves to a frequency ratio, `2^input`. The last result is
/// cached, since inputs are mostly held parameter values.
pub fn octave_ratio() -> An<OctaveRatio> {
    An(OctaveRatio { last_in: 0.0, last_out: 1.0 })
}

#[derive(Clone)]
pub struct OctaveRatio {
    last_in: f32,
    last_out: f32,
}

impl AudioNode for OctaveRatio {
    const ID: u64 = 202;
    type Inputs = U1;
    type Outputs = U1;

    fn reset(&mut self) {
        self.last_in = 0.0;
        self.last_out = 1.0;
    }

    #[inline]
    fn tick(&mut self, input: &Frame<f32, Self::Inputs>) -> Frame<f32, Self::Outputs> {
        if input[0] != self.last_in {
            self.last_in = input[0];
            self.last_out = input[0].exp2();
        }
        [self.last_out].into()
    }

    fn route(&mut self, input: &SignalFrame, _frequency: f64) -> SignalFrame {
        let mut output = SignalFrame::new(self.outputs());
        output.set(0, input.at(0).distort(0.0));
        output
    }
}

/// One-pole parameter smoother. `response_time` is the time in seconds to
/// cover half the distance to a new value. The first input is passed
/// through unsmoothed so voices start at their target values.
pub fn smooth(response_time: f32) -> An<Smooth> {
    let mut node = Smooth { response_time, value: None, coeff: 0.0 };
    node.set_sample_rate(DEFAULT_SR);
    An(node)
}

#[derive(Clone)]
pub struct Smooth {
    response_time: f32,
    value: Option<f32>,
    coeff: f32,
}

impl AudioNode for Smooth {
    const ID: u64 = 201;
    type Inputs = U1;
    type Outputs = U1;

    fn reset(&mut self) {
        self.value = None;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        let samples = (self.response_time * sample_rate as f32).max(1.0);
        // ln 2 per half-life
        self.coeff = (std::f32::consts::LN_2 / samples).min(1.0);
    }

    #[inline]
    fn tick(&mut self, input: &Frame<f32, Self::Inputs>) -> Frame<f32, Self::Outputs> {
        let target = input[0];
        let v = match self.value {
            Some(v) => v + (target - v) * self.coeff,
            None => target,
        };
        self.value = Some(v);
        [v].into()
    }

    fn route(&mut self, input: &SignalFrame, _frequency: f64) -> SignalFrame {
        // treated as transparent for frequency response
        let mut output = SignalFrame::new(self.outputs());
        output.set(0, input.at(0));
        output
    }
}

/// Pass-through that publishes its latest input sample to a `Shared`, so
/// one signal can drive parameters of nets that aren't connected to it.
pub fn sample_to(target: &Shared) -> An<SampleTo> {
    An(SampleTo { target: target.clone() })
}

#[derive(Clone)]
pub struct SampleTo {
    target: Shared,
}

impl AudioNode for SampleTo {
    const ID: u64 = 203;
    type Inputs = U1;
    type Outputs = U1;

    #[inline]
    fn tick(&mut self, input: &Frame<f32, Self::Inputs>) -> Frame<f32, Self::Outputs> {
        self.target.set(input[0]);
        [input[0]].into()
    }

    fn route(&mut self, input: &SignalFrame, _frequency: f64) -> SignalFrame {
        let mut output = SignalFrame::new(self.outputs());
        output.set(0, input.at(0));
        output
    }
}
