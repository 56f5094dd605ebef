use nerve_stim::context::StimulationContext;
use nerve_stim::electrode::ElectrodeKind;
use nerve_stim::field_solver::HomogeneousFieldSolver;
use nerve_stim::medium::Medium;
use nerve_stim::params::ContextParams;

pub fn get_scenario_params() -> ContextParams {
    let params_yaml_str = r#"
medium: !FiniteElement
  endoneurium: !Named endoneurium_ranck
  perineurium: !Named perineurium
  epineurium: !Named epineurium
  external: !Named saline
  geometry:
    outer_diameter: 5.0
    nerve:
      diameter: 600.0
      length: 20000.0
      y: 0.0
      z: 0.0
    fascicles:
    - id: 1
      diameter: 500.0
      y: 0.0
      z: 0.0
      perineurium_thickness: null
electrodes:
- electrode: !Life
    label: LIFE_A
    diameter: 25.0
    length: 1000.0
    x_offset: 2000.0
    y: 100.0
    z: 0.0
  stimulus:
    s_init: 0.0
    waveforms:
    - !BiphasicPulse
      start: 1.0
      s_cathod: 100.0
      t_stim: 0.1
      s_anod: 50.0
      t_inter: 0.04
      anod_first: false
- electrode: !Life
    label: LIFE_B
    diameter: 25.0
    length: 1000.0
    x_offset: 6000.0
    y: -100.0
    z: 0.0
  stimulus:
    s_init: 0.0
    waveforms:
    - !Square
      start: 2.0
      duration: 1.0
      freq: 5.0
      amplitude: 40.0
      offset: 0.0
      anod_first: true
- electrode: !Life
    label: LIFE_C
    diameter: 25.0
    length: 1000.0
    x_offset: 10000.0
    y: 0.0
    z: 120.0
  stimulus:
    s_init: 0.0
    waveforms:
    - !Sinus
      start: 3.0
      duration: 1.0
      amplitude: 30.0
      freq: 2.0
      offset: 0.0
      phase: 0.0
      dt: 0.005
- electrode: !Life
    label: LIFE_D
    diameter: 25.0
    length: 1000.0
    x_offset: 14000.0
    y: 0.0
    z: -120.0
  stimulus:
    s_init: 0.0
    waveforms:
    - !Ramp
      slope: 50.0
      start: 0.5
      duration: 2.0
      dt: 0.01
      low: 0.0
      high: 80.0
synchronisation:
  snap_time: 0.001
sampling:
  policy: ShrinkTimeStep
  max_time_step_refinement: 100
technical_params:
  num_workers: 4
  pin_threads: false
  field_solver_enabled: true
"#;

    serde_yaml::from_str(params_yaml_str).unwrap()
}

/// Stands in for the finite element solver on the rank that owns it: one
/// point source per LIFE electrode, placed at the middle of its active site.
pub fn attach_reference_solver(context: &mut StimulationContext) {
    let material = match context.medium() {
        Medium::FiniteElement(medium) => medium.external.clone(),
        Medium::Analytical(material) => material.clone(),
    };
    let mut solver = HomogeneousFieldSolver::new(material);

    for electrode in context.electrodes() {
        if let ElectrodeKind::Life(geometry) = electrode.kind() {
            solver.add_source(
                &geometry.label,
                (geometry.x_offset + geometry.length / 2.0, geometry.y, geometry.z),
            );
        }
    }

    context.attach_solver(Box::new(solver));
}
