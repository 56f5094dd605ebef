use log::{info, warn};
use serde::{Deserialize, Serialize};
use simple_error::SimpleResult;

use crate::context::StimulationContext;
use crate::params::SamplingParams;
use crate::util;

const SIGNIFICANT_DIGITS: i32 = 5;

/// What to do when the integrator step is coarser than the stimuli.
/// `ShrinkTimeStep` keeps every stimulus sample at the price of more steps,
/// `Undersample` keeps the requested step and may skip short stimulus phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UndersamplingPolicy {
    ShrinkTimeStep,
    Undersample,
}

impl Default for UndersamplingPolicy {
    fn default() -> Self {
        Self::ShrinkTimeStep
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStepAdjustment {
    pub dt: f64,
    /// `dt` over the smallest stimulus step, set when stimuli are undersampled.
    pub undersampling_ratio: Option<f64>,
}

/// Cable equation solver driven by the stimulation loop.
pub trait CableIntegrator {
    fn time(&self) -> f64;

    fn dt(&self) -> f64;

    fn set_dt(&mut self, dt: f64);

    fn set_extracellular_potential(&mut self, v_ext: &[f64]) -> SimpleResult<()>;

    fn continue_run(&mut self, t_stop: f64) -> SimpleResult<()>;
}

pub fn adapt_time_step(
    global_time_serie: &[f64],
    dt: f64,
    policy: UndersamplingPolicy,
    max_refinement: Option<usize>,
) -> TimeStepAdjustment {
    let unchanged = TimeStepAdjustment {
        dt,
        undersampling_ratio: None,
    };

    let delta_min = match util::min_step(global_time_serie) {
        Some(delta_min) => delta_min,
        None => return unchanged,
    };

    if util::round_significant(delta_min, SIGNIFICANT_DIGITS)
        >= util::round_significant(dt, SIGNIFICANT_DIGITS)
    {
        return unchanged;
    }

    let refinement = (dt / delta_min).ceil();
    let within_limit = max_refinement.map_or(true, |max| refinement <= max as f64);

    if policy == UndersamplingPolicy::ShrinkTimeStep && within_limit {
        let new_dt = dt / refinement;
        warn!(
            "time step {} ms is too coarse for the stimuli, reduced to {} ms",
            dt, new_dt
        );
        return TimeStepAdjustment {
            dt: new_dt,
            undersampling_ratio: None,
        };
    }

    let ratio = dt / delta_min;
    warn!(
        "the integrator will undersample the stimuli: dt is {} times the smallest stimulus step",
        ratio
    );
    TimeStepAdjustment {
        dt,
        undersampling_ratio: Some(ratio),
    }
}

/// Integrates up to `t_sim`, applying the superposed potential of each
/// synchronised sample until the next one.
pub fn run_extracellular<I: CableIntegrator>(
    context: &mut StimulationContext,
    integrator: &mut I,
    t_sim: f64,
    sampling: &SamplingParams,
) -> SimpleResult<TimeStepAdjustment> {
    let global_time_serie = context.global_time_serie().to_vec();

    let adjustment = adapt_time_step(
        &global_time_serie,
        integrator.dt(),
        sampling.policy,
        sampling.max_time_step_refinement,
    );
    integrator.set_dt(adjustment.dt);

    let mut v_ext = vec![0.0; context.num_points()];

    for (i, t) in global_time_serie.iter().enumerate().skip(1) {
        context.compute_vext_into(i - 1, &mut v_ext)?;
        integrator.set_extracellular_potential(&v_ext)?;
        integrator.continue_run(t.min(t_sim))?;
    }

    if integrator.time() < t_sim {
        context.compute_vext_into(global_time_serie.len().saturating_sub(1), &mut v_ext)?;
        integrator.set_extracellular_potential(&v_ext)?;
        integrator.continue_run(t_sim)?;
    }

    info!(
        "extracellular run finished at {} ms over {} stimulus samples",
        integrator.time(),
        global_time_serie.len()
    );
    Ok(adjustment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrode::Electrode;
    use crate::material::Material;
    use crate::medium::Medium;
    use crate::points::Points;
    use crate::stimulus::Stimulus;
    use float_cmp::assert_approx_eq;

    #[derive(Default)]
    struct RecordingIntegrator {
        t: f64,
        dt: f64,
        v_ext: Vec<f64>,
        runs: Vec<(f64, Vec<f64>)>,
    }

    impl CableIntegrator for RecordingIntegrator {
        fn time(&self) -> f64 {
            self.t
        }

        fn dt(&self) -> f64 {
            self.dt
        }

        fn set_dt(&mut self, dt: f64) {
            self.dt = dt;
        }

        fn set_extracellular_potential(&mut self, v_ext: &[f64]) -> SimpleResult<()> {
            self.v_ext = v_ext.to_vec();
            Ok(())
        }

        fn continue_run(&mut self, t_stop: f64) -> SimpleResult<()> {
            self.runs.push((t_stop, self.v_ext.clone()));
            self.t = self.t.max(t_stop);
            Ok(())
        }
    }

    #[test]
    fn coarse_step_is_refined() {
        let serie = [0.0, 1.0, 1.03, 2.0];
        let adjustment = adapt_time_step(&serie, 0.1, UndersamplingPolicy::ShrinkTimeStep, None);

        assert_approx_eq!(f64, adjustment.dt, 0.1 / 4.0);
        assert_eq!(adjustment.undersampling_ratio, None);
    }

    #[test]
    fn fine_step_is_kept() {
        let serie = [0.0, 1.0, 1.5];
        for policy in [UndersamplingPolicy::ShrinkTimeStep, UndersamplingPolicy::Undersample] {
            let adjustment = adapt_time_step(&serie, 0.005, policy, None);
            assert_eq!(adjustment.dt, 0.005);
            assert_eq!(adjustment.undersampling_ratio, None);
        }

        let adjustment = adapt_time_step(&[0.0], 0.1, UndersamplingPolicy::ShrinkTimeStep, None);
        assert_eq!(adjustment.dt, 0.1);
    }

    #[test]
    fn undersampling_keeps_step() {
        let serie = [0.0, 1.0, 1.02];
        let adjustment = adapt_time_step(&serie, 0.1, UndersamplingPolicy::Undersample, None);

        assert_eq!(adjustment.dt, 0.1);
        assert_approx_eq!(f64, adjustment.undersampling_ratio.unwrap(), 5.0, epsilon = 1e-9);

        let limited = adapt_time_step(&serie, 0.1, UndersamplingPolicy::ShrinkTimeStep, Some(4));
        assert_eq!(limited.dt, 0.1);
        assert!(limited.undersampling_ratio.is_some());
    }

    #[test]
    fn run_follows_stimulus_samples() {
        let mut context =
            StimulationContext::new(Medium::Analytical(Material::isotropic("saline", 2.0)));
        let mut stimulus = Stimulus::default();
        stimulus.pulse(1.0, 1000.0, 0.5);
        context
            .add_electrode(Electrode::point_source(0.0, 100.0, 0.0), stimulus)
            .unwrap();
        context
            .compute_electrodes_footprints(&Points::along_x(vec![0.0], 0.0, 0.0), 0)
            .unwrap();
        let footprint = context.electrodes()[0].footprint().unwrap().values[0];

        let mut integrator = RecordingIntegrator {
            dt: 0.005,
            ..Default::default()
        };
        let adjustment =
            run_extracellular(&mut context, &mut integrator, 3.0, &SamplingParams::default())
                .unwrap();
        assert_eq!(adjustment.dt, 0.005);

        let stops: Vec<f64> = integrator.runs.iter().map(|run| run.0).collect();
        assert_eq!(stops, vec![1.0, 1.5, 3.0]);

        assert_eq!(integrator.runs[0].1, vec![0.0]);
        assert_approx_eq!(f64, integrator.runs[1].1[0], footprint, ulps = 2);
        assert_eq!(integrator.runs[2].1, vec![0.0]);
    }

    #[test]
    fn run_stops_at_simulation_end() {
        let mut context =
            StimulationContext::new(Medium::Analytical(Material::isotropic("saline", 2.0)));
        let mut stimulus = Stimulus::default();
        stimulus.pulse(1.0, 1000.0, 5.0);
        context
            .add_electrode(Electrode::point_source(0.0, 100.0, 0.0), stimulus)
            .unwrap();
        context
            .compute_electrodes_footprints(&Points::along_x(vec![0.0], 0.0, 0.0), 0)
            .unwrap();

        let mut integrator = RecordingIntegrator {
            dt: 0.005,
            ..Default::default()
        };
        run_extracellular(&mut context, &mut integrator, 2.0, &SamplingParams::default()).unwrap();

        let stops: Vec<f64> = integrator.runs.iter().map(|run| run.0).collect();
        assert_eq!(stops, vec![1.0, 2.0]);
        assert_eq!(integrator.time(), 2.0);
    }

    #[test]
    fn empty_context_runs_to_end() {
        let mut context =
            StimulationContext::new(Medium::Analytical(Material::isotropic("saline", 2.0)));
        let mut integrator = RecordingIntegrator {
            dt: 0.005,
            ..Default::default()
        };
        run_extracellular(&mut context, &mut integrator, 1.0, &SamplingParams::default()).unwrap();

        assert_eq!(integrator.runs, vec![(1.0, Vec::new())]);
    }
}
