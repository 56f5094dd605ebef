use std::time::Instant;

use nerve_stim::params::{self, ContextSetup};
use nerve_stim::points::Points;
use nerve_stim::stimulus::Stimulus;
use rand::{distributions::Uniform, prelude::Distribution, rngs::StdRng, SeedableRng};
use statrs::distribution::Poisson;

#[path = "../scenario_params.rs"]
mod scenario_params;

fn main() {
    let scenario = scenario_params::get_scenario_params();
    let mut context = match params::create_context(&scenario).unwrap() {
        ContextSetup::Ready(context) => context,
        ContextSetup::Aborted => panic!("benchmark scenario aborted"),
    };
    scenario_params::attach_reference_solver(&mut context);

    let mut rng = StdRng::seed_from_u64(0);
    let num_pulses_dist = Poisson::new(50.0).unwrap();
    let start_dist = Uniform::new(0.0, 100.0);
    let amplitude_dist = Uniform::new(10.0, 200.0);

    let electrode_ids: Vec<usize> = context.electrodes().iter().map(|e| e.id()).collect();
    for electrode_id in electrode_ids {
        let num_pulses = num_pulses_dist.sample(&mut rng) as usize;
        let mut starts: Vec<f64> = (0..num_pulses).map(|_| start_dist.sample(&mut rng)).collect();
        starts.sort_by(|a, b| a.total_cmp(b));

        let mut stimulus = Stimulus::default();
        for start in starts {
            stimulus.pulse(start, -amplitude_dist.sample(&mut rng), 0.05);
        }
        context.change_stimulus(electrode_id, stimulus).unwrap();
    }

    let num_nodes = 2000;
    let x: Vec<f64> = (0..num_nodes).map(|i| i as f64 * 10.0).collect();
    let fiber = Points::along_x(x, 0.0, 50.0);

    let footprint_start = Instant::now();
    context.compute_electrodes_footprints(&fiber, 0).unwrap();
    let footprint_time = footprint_start.elapsed();

    let num_samples = context.global_time_serie().len();
    let mut v_ext = vec![0.0; num_nodes];
    let mut checksum = 0.0;

    let wall_start = Instant::now();

    for time_index in 0..num_samples {
        context.compute_vext_into(time_index, &mut v_ext).unwrap();
        checksum += v_ext.iter().sum::<f64>();
    }

    let wall_time = wall_start.elapsed();
    let superposition_throughput =
        (num_samples * num_nodes) as f64 / wall_time.as_secs_f64();

    eprintln!("Stimulus samples: {}", num_samples);
    eprintln!("Footprint computation: {:.3} ms", footprint_time.as_secs_f64() * 1e3);
    eprintln!(
        "Superposition throughput: {:.3e} nodes/s ({:.3} ns per node)",
        superposition_throughput,
        1e9 / superposition_throughput
    );
    eprintln!("Checksum: {}", checksum);
}
