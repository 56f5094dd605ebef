use std::f64::consts::PI;
use std::ops::{Add, Mul, Neg, Sub};

use itertools::Itertools;
use log::warn;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleError, SimpleResult};

use crate::util;

/// Current waveform defined by asynchronous samples: `s[i]` (µA) holds from
/// `t[i]` (ms) until the next sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StimulusSamples")]
pub struct Stimulus {
    t: Vec<f64>,
    s: Vec<f64>,
}

#[derive(Deserialize)]
struct StimulusSamples {
    t: Vec<f64>,
    s: Vec<f64>,
}

impl TryFrom<StimulusSamples> for Stimulus {
    type Error = SimpleError;

    fn try_from(samples: StimulusSamples) -> SimpleResult<Self> {
        Stimulus::from_samples(samples.t, samples.s)
    }
}

impl Default for Stimulus {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Stimulus {
    pub fn new(s_init: f64) -> Self {
        Self {
            t: vec![0.0],
            s: vec![s_init],
        }
    }

    pub fn from_samples(t: Vec<f64>, s: Vec<f64>) -> SimpleResult<Self> {
        if t.len() != s.len() {
            return Err(SimpleError::new(format!(
                "stimulus time and value arrays differ in length: {} vs {}",
                t.len(),
                s.len()
            )));
        }

        if t.is_empty() {
            return Err(SimpleError::new("stimulus must contain at least one sample"));
        }

        if t.iter().chain(&s).any(|value| !value.is_finite()) {
            return Err(SimpleError::new("stimulus samples must be finite"));
        }

        if t.windows(2).any(|pair| pair[1] < pair[0]) {
            return Err(SimpleError::new("stimulus times must be non-decreasing"));
        }

        Ok(Self { t, s })
    }

    /// Builds a stimulus from regularly sampled values starting at t = 0.
    pub fn from_sampled_data(values: &[f64], dt: f64) -> SimpleResult<Self> {
        if dt <= 0.0 {
            return Err(SimpleError::new("sampling period must be strictly positive"));
        }

        let t = (0..values.len()).map(|k| k as f64 * dt).collect();
        Self::from_samples(t, values.to_vec())
    }

    pub fn t(&self) -> &[f64] {
        &self.t
    }

    pub fn s(&self) -> &[f64] {
        &self.s
    }

    pub fn len(&self) -> usize {
        self.s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.s.is_empty()
    }

    /// Value held at `time`: the last sample at or before it, the first
    /// sample before the waveform starts.
    pub fn value_at(&self, time: f64) -> f64 {
        let idx = self.t.partition_point(|&t| t <= time);
        if idx == 0 {
            self.s[0]
        } else {
            self.s[idx - 1]
        }
    }

    pub fn sort(&mut self) {
        let (t, s): (Vec<f64>, Vec<f64>) = self
            .t
            .iter()
            .copied()
            .zip(self.s.iter().copied())
            .sorted_by(|a, b| a.0.total_cmp(&b.0))
            .unzip();
        self.t = t;
        self.s = s;
    }

    fn append(&mut self, value: f64, time: f64) {
        let out_of_order = self.t.last().map_or(false, |&last| time < last);
        self.s.push(value);
        self.t.push(time);
        if out_of_order {
            self.sort();
        }
    }

    /// Appends samples whose times are offsets from the current last sample.
    fn concatenate(&mut self, values: &[f64], times: &[f64], t_shift: f64) {
        let t_last = self.t.last().copied().unwrap_or(0.0);
        self.s.extend_from_slice(values);
        self.t.extend(times.iter().map(|time| time + t_last + t_shift));
    }

    /// Copy of this stimulus resampled on the union of its own times and
    /// `times`. Inserted samples hold the previous value.
    pub fn with_inserted_samples(&self, times: &[f64]) -> Stimulus {
        let new_t: Vec<f64> = self
            .t
            .iter()
            .copied()
            .merge(times.iter().copied().sorted_by(|a, b| a.total_cmp(b)))
            .dedup()
            .collect();

        let mut new_s = Vec::with_capacity(new_t.len());
        let mut j = 0;
        for &time in &new_t {
            while j + 1 < self.t.len() && self.t[j + 1] <= time {
                j += 1;
            }
            new_s.push(self.s[j]);
        }

        Stimulus { t: new_t, s: new_s }
    }

    /// Drops every sample closer than `dt_min` to the last kept sample. A
    /// dropped sample takes its value change with it, so a pulse shorter than
    /// `dt_min` keeps its onset value until the next kept sample.
    pub fn snapped(&self, dt_min: f64) -> Stimulus {
        let mut t = vec![self.t[0]];
        let mut s = vec![self.s[0]];

        for (&time, &value) in self.t.iter().zip(&self.s).skip(1) {
            if time - t[t.len() - 1] >= dt_min {
                t.push(time);
                s.push(value);
            }
        }

        Stimulus { t, s }
    }

    /// Trapezoidal integral of the samples, µA·ms.
    pub fn integrate(&self) -> f64 {
        self.t
            .windows(2)
            .zip(self.s.windows(2))
            .map(|(t, s)| (t[1] - t[0]) * (s[0] + s[1]) / 2.0)
            .sum()
    }

    pub fn abs(&self) -> Stimulus {
        self.map_values(f64::abs)
    }

    fn map_values(&self, f: impl Fn(f64) -> f64) -> Stimulus {
        Stimulus {
            t: self.t.clone(),
            s: self.s.iter().map(|value| f(*value)).collect(),
        }
    }

    fn combine(&self, other: &Stimulus, f: impl Fn(f64, f64) -> f64) -> Stimulus {
        let (a, b) = equal_timing_copies(self, other);
        Stimulus {
            s: a.s.iter().zip(&b.s).map(|(x, y)| f(*x, *y)).collect(),
            t: a.t,
        }
    }

    pub fn constant(&mut self, value: f64, start: f64) {
        self.append(value, start);
    }

    /// Steps to `value` at `start`; with a non-zero `duration` the previous
    /// value is restored at `start + duration`.
    pub fn pulse(&mut self, start: f64, value: f64, duration: f64) {
        let s_last = self.s[self.s.len() - 1];
        self.append(value, start);
        if duration != 0.0 {
            self.append(s_last, start + duration);
        }
    }

    /// Charge-balanced biphasic pulse, offsets relative to the last sample.
    /// `s_cathod` is given as an absolute value.
    pub fn biphasic_pulse(
        &mut self,
        start: f64,
        s_cathod: f64,
        t_stim: f64,
        s_anod: f64,
        t_inter: f64,
        anod_first: bool,
    ) {
        let (s_1, s_2) = if anod_first {
            (s_anod, -s_cathod)
        } else {
            (-s_cathod, s_anod)
        };

        let t_balance = if s_2 != 0.0 {
            (s_1 / s_2).abs() * t_stim
        } else {
            0.0
        };

        self.concatenate(&[s_1], &[start], 0.0);
        if t_inter == 0.0 {
            self.concatenate(&[s_2], &[t_stim], 0.0);
        } else {
            self.concatenate(&[0.0], &[t_stim], 0.0);
            self.concatenate(&[s_2], &[t_inter], 0.0);
        }
        if t_balance != 0.0 {
            self.concatenate(&[0.0], &[t_balance], 0.0);
        }
    }

    /// Sampled sinusoid (freq in kHz). A zero `dt` samples 100 points per period.
    #[allow(clippy::too_many_arguments)]
    pub fn sinus(
        &mut self,
        start: f64,
        duration: f64,
        amplitude: f64,
        freq: f64,
        offset: f64,
        phase: f64,
        dt: f64,
    ) {
        let dt = sampling_period(dt, freq, 1);
        let num_points = (duration / dt) as usize;
        let wave = |t: f64| amplitude * (2.0 * PI * freq * t + phase).sin() + offset;

        if start == 0.0 {
            let last = self.s.len() - 1;
            self.s[last] = amplitude * phase.sin() + offset;
            let t = util::linspace(dt, duration, num_points.saturating_sub(1));
            let s: Vec<f64> = t.iter().map(|t| wave(*t)).collect();
            self.concatenate(&s, &t, 0.0);
        } else {
            let s: Vec<f64> = util::linspace(0.0, duration, num_points)
                .into_iter()
                .map(wave)
                .collect();
            let t = util::linspace(start, start + duration, num_points);
            self.concatenate(&s, &t, 0.0);
        }
    }

    /// Monophasic pulse shaped by a sum of harmonics of `1 / (2 t_pulse)`,
    /// rescaled to a peak of `-amplitude` and returning to zero.
    pub fn harmonic_pulse(
        &mut self,
        start: f64,
        t_pulse: f64,
        amplitude: f64,
        amp_list: &[f64],
        phase_list: &[f64],
        dt: f64,
    ) -> SimpleResult<()> {
        if amp_list.len() != phase_list.len() {
            return Err(SimpleError::new(
                "amp_list and phase_list must be of same length",
            ));
        }

        if amp_list.is_empty() {
            return Err(SimpleError::new("harmonic pulse needs at least one harmonic"));
        }

        let freq = 1.0 / (2.0 * t_pulse);
        let dt = sampling_period(dt, freq, amp_list.len());
        let num_points = (t_pulse / dt) as usize;

        let local_t = util::linspace(0.0, t_pulse, num_points);
        let mut s: Vec<f64> = local_t
            .iter()
            .map(|t| {
                amp_list
                    .iter()
                    .zip(phase_list)
                    .enumerate()
                    .map(|(i, (amp, phase))| {
                        let freq_harmonic = freq * (i + 1) as f64;
                        amp * (2.0 * PI * freq_harmonic * t + phase - PI).sin()
                    })
                    .sum()
            })
            .collect();

        let s_max = s.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        s.iter_mut().for_each(|value| *value -= s_max);
        let abs_max = s.iter().fold(0.0f64, |acc, value| acc.max(value.abs()));
        if abs_max > 0.0 {
            s.iter_mut().for_each(|value| *value *= amplitude / abs_max);
        }
        if let Some(last) = s.last_mut() {
            *last = 0.0;
        }

        if start == 0.0 && !s.is_empty() {
            // the first sample replaces the current last value instead of
            // duplicating its timestamp
            let last = self.s.len() - 1;
            self.s[last] = s[0];
            self.concatenate(&s[1..], &local_t[1..], 0.0);
        } else {
            let t = util::linspace(start, start + t_pulse, num_points);
            self.concatenate(&s, &t, 0.0);
        }

        Ok(())
    }

    /// Periodic square wave (freq in kHz), one sample per half period,
    /// cathodic half first unless `anod_first`.
    pub fn square(
        &mut self,
        start: f64,
        duration: f64,
        freq: f64,
        amplitude: f64,
        offset: f64,
        anod_first: bool,
    ) {
        let half_period = 1.0 / (2.0 * freq);
        let num_half_periods = (duration / half_period).floor() as usize;
        let first_sign = if anod_first { 1.0 } else { -1.0 };

        let t: Vec<f64> = (0..num_half_periods)
            .map(|k| k as f64 * half_period)
            .collect();
        let s: Vec<f64> = (0..num_half_periods)
            .map(|k| {
                let sign = if k % 2 == 0 { first_sign } else { -first_sign };
                sign * amplitude + offset
            })
            .collect();

        self.concatenate(&s, &t, start);
    }

    /// Ramp of `slope` µA/ms starting at `start`, clamped to `bounds`.
    pub fn ramp(&mut self, slope: f64, start: f64, duration: f64, dt: f64, bounds: (f64, f64)) {
        let num_points = (duration / dt) as usize;
        let point_start = (start / dt) as usize;
        let (low, high) = bounds;

        let t: Vec<f64> = (0..num_points).map(|k| k as f64 * dt).collect();
        let s: Vec<f64> = (0..num_points)
            .map(|i| {
                if i < point_start {
                    if slope < 0.0 {
                        high
                    } else {
                        low
                    }
                } else {
                    let elapsed = (i - point_start) as f64 * slope * dt;
                    if slope >= 0.0 {
                        high.min(low + elapsed)
                    } else {
                        low.max(high + elapsed)
                    }
                }
            })
            .collect();

        self.concatenate(&s, &t, 0.0);
    }

    /// Ramp from `amp_start` at `t_start` to `amp_max` at `t_stop`.
    pub fn ramp_lim(
        &mut self,
        t_start: f64,
        t_stop: f64,
        amp_start: f64,
        amp_max: f64,
        duration: f64,
        dt: f64,
    ) {
        let slope = (amp_start - amp_max) / (t_start - t_stop);
        let bounds = (amp_start.min(amp_max), amp_start.max(amp_max));
        self.ramp(slope, t_start, duration, dt, bounds);
    }
}

fn sampling_period(dt: f64, freq: f64, num_harmonics: usize) -> f64 {
    if dt == 0.0 {
        1.0 / (num_harmonics as f64 * freq * 100.0)
    } else {
        if freq > 1.0 / (2.0 * dt) {
            warn!("dt too low in stimulus creation, Shannon criterion not respected");
        }
        dt
    }
}

/// Copies of `a` and `b` sharing the union of both time grids.
pub fn equal_timing_copies(a: &Stimulus, b: &Stimulus) -> (Stimulus, Stimulus) {
    let stim_a = a.with_inserted_samples(&b.t);
    let stim_b = b.with_inserted_samples(&stim_a.t);
    (stim_a, stim_b)
}

/// Resamples `stimuli` onto one common grid. The first two are merged
/// pairwise, the remaining ones are folded in registration order.
pub fn synchronise(stimuli: &[Stimulus]) -> Vec<Stimulus> {
    match stimuli {
        [] => Vec::new(),
        [single] => vec![single.clone()],
        [first, second, remaining @ ..] => {
            let (stim_a, stim_b) = equal_timing_copies(first, second);
            let mut synchronised = vec![stim_a, stim_b];

            for pending in remaining {
                for stimulus in synchronised.iter_mut() {
                    *stimulus = stimulus.with_inserted_samples(&pending.t);
                }
                let merged = pending.with_inserted_samples(&synchronised[0].t);
                synchronised.push(merged);
            }

            synchronised
        }
    }
}

impl Neg for &Stimulus {
    type Output = Stimulus;

    fn neg(self) -> Stimulus {
        self.map_values(|value| -value)
    }
}

impl Add for &Stimulus {
    type Output = Stimulus;

    fn add(self, other: &Stimulus) -> Stimulus {
        self.combine(other, |a, b| a + b)
    }
}

impl Sub for &Stimulus {
    type Output = Stimulus;

    fn sub(self, other: &Stimulus) -> Stimulus {
        self.combine(other, |a, b| a - b)
    }
}

impl Mul for &Stimulus {
    type Output = Stimulus;

    fn mul(self, other: &Stimulus) -> Stimulus {
        self.combine(other, |a, b| a * b)
    }
}

impl Add<f64> for &Stimulus {
    type Output = Stimulus;

    fn add(self, value: f64) -> Stimulus {
        self.map_values(|s| s + value)
    }
}

impl Sub<f64> for &Stimulus {
    type Output = Stimulus;

    fn sub(self, value: f64) -> Stimulus {
        self.map_values(|s| s - value)
    }
}

impl Mul<f64> for &Stimulus {
    type Output = Stimulus;

    fn mul(self, factor: f64) -> Stimulus {
        self.map_values(|s| s * factor)
    }
}
