use nerve_stim::field_query::{self, PopulationOutcome};
use nerve_stim::params::{self, ContextSetup};
use nerve_stim::points::Points;
use nerve_stim::process_group::{launch, ProcessGroup};

#[path = "../scenario_params.rs"]
mod scenario_params;

fn main() {
    let scenario = scenario_params::get_scenario_params();
    let num_ranks = params::get_num_workers(&scenario);
    let num_fibers = 12;

    let fibers: Vec<Points> = (0..num_fibers)
        .map(|fiber_id| {
            let x: Vec<f64> = (0..200).map(|i| i as f64 * 100.0).collect();
            let angle = fiber_id as f64 * std::f64::consts::TAU / num_fibers as f64;
            Points::along_x(x, 200.0 * angle.cos(), 200.0 * angle.sin())
        })
        .collect();

    let outcomes = launch(num_ranks, scenario.technical_params.pin_threads, |mut group| {
        let mut context = match params::create_context(&scenario).unwrap() {
            ContextSetup::Ready(context) => context,
            ContextSetup::Aborted => return None,
        };
        if group.is_master() {
            scenario_params::attach_reference_solver(&mut context);
        }

        let outcome = field_query::run_population(
            &mut group,
            &mut context,
            &fibers,
            scenario.technical_params.field_solver_enabled,
            |_, context| {
                let num_samples = context.global_time_serie().len();
                let mut checksum = 0.0;
                for time_index in 0..num_samples {
                    let v_ext = context.compute_vext(time_index)?;
                    checksum += (time_index + 1) as f64 * v_ext.iter().sum::<f64>();
                }
                Ok(checksum)
            },
        )
        .unwrap();

        match outcome {
            PopulationOutcome::Gathered(results) => Some(results),
            _ => None,
        }
    })
    .unwrap();

    let results = outcomes.into_iter().flatten().next().unwrap();

    println!("population result:");
    for (fiber_id, checksum) in &results {
        println!("...fiber {} checksum: {:.9e}", fiber_id, checksum);
    }
    println!(
        "...total checksum: {:.9e}",
        results.iter().map(|(_, checksum)| checksum).sum::<f64>()
    );
}
