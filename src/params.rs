use std::fs;
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};
use simple_error::{try_with, SimpleError, SimpleResult};

use crate::context::StimulationContext;
use crate::electrode::{CuffGeometry, Electrode, LifeGeometry, MultipolarCuffGeometry};
use crate::material::{self, Material};
use crate::medium::{FiniteElementMedium, Medium, NerveGeometry};
use crate::stepping::UndersamplingPolicy;
use crate::stimulus::Stimulus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextParams {
    pub medium: MediumParams,
    pub electrodes: Vec<ElectrodeParams>,
    pub synchronisation: SynchronisationParams,
    pub sampling: SamplingParams,
    pub technical_params: TechnicalParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MediumParams {
    Analytical {
        material: MaterialParams,
    },
    FiniteElement {
        endoneurium: MaterialParams,
        perineurium: MaterialParams,
        epineurium: MaterialParams,
        external: MaterialParams,
        geometry: NerveGeometry,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MaterialParams {
    Named(String),
    Custom(Material),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectrodeParams {
    pub electrode: ElectrodeKindParams,
    pub stimulus: StimulusParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElectrodeKindParams {
    PointSource { x: f64, y: f64, z: f64 },
    Life(LifeGeometry),
    Cuff(CuffGeometry),
    CuffMultipolar(MultipolarCuffGeometry),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StimulusParams {
    pub s_init: f64,
    pub waveforms: Vec<WaveformParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WaveformParams {
    Constant {
        value: f64,
        start: f64,
    },
    Pulse {
        start: f64,
        value: f64,
        duration: f64,
    },
    BiphasicPulse {
        start: f64,
        s_cathod: f64,
        t_stim: f64,
        s_anod: f64,
        t_inter: f64,
        anod_first: bool,
    },
    Sinus {
        start: f64,
        duration: f64,
        amplitude: f64,
        freq: f64,
        offset: f64,
        phase: f64,
        dt: f64,
    },
    HarmonicPulse {
        start: f64,
        t_pulse: f64,
        amplitude: f64,
        amp_list: Vec<f64>,
        phase_list: Vec<f64>,
        dt: f64,
    },
    Square {
        start: f64,
        duration: f64,
        freq: f64,
        amplitude: f64,
        offset: f64,
        anod_first: bool,
    },
    Ramp {
        slope: f64,
        start: f64,
        duration: f64,
        dt: f64,
        low: f64,
        high: f64,
    },
    RampLim {
        t_start: f64,
        t_stop: f64,
        amp_start: f64,
        amp_max: f64,
        duration: f64,
        dt: f64,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynchronisationParams {
    pub snap_time: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingParams {
    pub policy: UndersamplingPolicy,
    pub max_time_step_refinement: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TechnicalParams {
    pub num_workers: Option<usize>,
    pub pin_threads: bool,
    pub field_solver_enabled: bool,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            medium: MediumParams::default(),
            electrodes: Vec::new(),
            synchronisation: SynchronisationParams::default(),
            sampling: SamplingParams::default(),
            technical_params: TechnicalParams::default(),
        }
    }
}

impl Default for MediumParams {
    fn default() -> Self {
        MediumParams::Analytical {
            material: MaterialParams::Named("endoneurium_ranck".to_string()),
        }
    }
}

impl MediumParams {
    pub fn finite_element_defaults() -> Self {
        MediumParams::FiniteElement {
            endoneurium: MaterialParams::Named("endoneurium_ranck".to_string()),
            perineurium: MaterialParams::Named("perineurium".to_string()),
            epineurium: MaterialParams::Named("epineurium".to_string()),
            external: MaterialParams::Named("saline".to_string()),
            geometry: NerveGeometry::default(),
        }
    }
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            policy: UndersamplingPolicy::default(),
            max_time_step_refinement: Some(100),
        }
    }
}

impl Default for TechnicalParams {
    fn default() -> Self {
        Self {
            num_workers: Some(1),
            pin_threads: false,
            field_solver_enabled: true,
        }
    }
}

impl MaterialParams {
    pub fn resolve(&self) -> SimpleResult<Material> {
        let material = match self {
            MaterialParams::Named(name) => material::load_material(name)?,
            MaterialParams::Custom(material) => material.clone(),
        };
        material::validate_material(&material)?;
        Ok(material)
    }
}

impl StimulusParams {
    pub fn build(&self) -> SimpleResult<Stimulus> {
        let mut stimulus = Stimulus::new(self.s_init);

        for waveform in &self.waveforms {
            match waveform {
                WaveformParams::Constant { value, start } => stimulus.constant(*value, *start),
                WaveformParams::Pulse {
                    start,
                    value,
                    duration,
                } => stimulus.pulse(*start, *value, *duration),
                WaveformParams::BiphasicPulse {
                    start,
                    s_cathod,
                    t_stim,
                    s_anod,
                    t_inter,
                    anod_first,
                } => stimulus.biphasic_pulse(
                    *start,
                    *s_cathod,
                    *t_stim,
                    *s_anod,
                    *t_inter,
                    *anod_first,
                ),
                WaveformParams::Sinus {
                    start,
                    duration,
                    amplitude,
                    freq,
                    offset,
                    phase,
                    dt,
                } => stimulus.sinus(*start, *duration, *amplitude, *freq, *offset, *phase, *dt),
                WaveformParams::HarmonicPulse {
                    start,
                    t_pulse,
                    amplitude,
                    amp_list,
                    phase_list,
                    dt,
                } => stimulus.harmonic_pulse(
                    *start,
                    *t_pulse,
                    *amplitude,
                    amp_list,
                    phase_list,
                    *dt,
                )?,
                WaveformParams::Square {
                    start,
                    duration,
                    freq,
                    amplitude,
                    offset,
                    anod_first,
                } => stimulus.square(*start, *duration, *freq, *amplitude, *offset, *anod_first),
                WaveformParams::Ramp {
                    slope,
                    start,
                    duration,
                    dt,
                    low,
                    high,
                } => stimulus.ramp(*slope, *start, *duration, *dt, (*low, *high)),
                WaveformParams::RampLim {
                    t_start,
                    t_stop,
                    amp_start,
                    amp_max,
                    duration,
                    dt,
                } => stimulus.ramp_lim(*t_start, *t_stop, *amp_start, *amp_max, *duration, *dt),
            }
        }

        Ok(stimulus)
    }
}

pub fn get_num_workers(params: &ContextParams) -> usize {
    params
        .technical_params
        .num_workers
        .unwrap_or_else(crate::process_group::default_group_size)
}

/// Reads YAML, or JSON for `.json` files.
pub fn load_context_params(path: &Path) -> SimpleResult<ContextParams> {
    let content = try_with!(
        fs::read_to_string(path),
        "cannot read context parameters from {}",
        path.display()
    );

    let params = if path.extension().map_or(false, |extension| extension == "json") {
        try_with!(serde_json::from_str(&content), "invalid JSON context parameters")
    } else {
        try_with!(serde_yaml::from_str(&content), "invalid YAML context parameters")
    };

    Ok(params)
}

pub enum ContextSetup {
    Ready(StimulationContext),
    Aborted,
}

/// Builds a context from validated parameters. Finite element media with a
/// disabled field solver abort cleanly instead of failing.
pub fn create_context(params: &ContextParams) -> SimpleResult<ContextSetup> {
    try_with!(
        validate_context_params(params),
        "invalid context parameters"
    );

    let medium = match &params.medium {
        MediumParams::Analytical { material } => Medium::Analytical(material.resolve()?),
        MediumParams::FiniteElement {
            endoneurium,
            perineurium,
            epineurium,
            external,
            geometry,
        } => {
            if !params.technical_params.field_solver_enabled {
                warn!(
                    "context aborted: finite element medium requested \
                     while the field solver is disabled"
                );
                return Ok(ContextSetup::Aborted);
            }

            Medium::FiniteElement(FiniteElementMedium {
                endoneurium: endoneurium.resolve()?,
                perineurium: perineurium.resolve()?,
                epineurium: epineurium.resolve()?,
                external: external.resolve()?,
                geometry: geometry.clone(),
            })
        }
    };

    let mut context = StimulationContext::new(medium);
    context.set_snap_time(params.synchronisation.snap_time);

    for electrode_params in &params.electrodes {
        let stimulus = electrode_params.stimulus.build()?;

        match &electrode_params.electrode {
            ElectrodeKindParams::PointSource { x, y, z } => {
                context.add_electrode(Electrode::point_source(*x, *y, *z), stimulus)?;
            }
            ElectrodeKindParams::Life(geometry) => {
                context.add_electrode(Electrode::life(geometry.clone()), stimulus)?;
            }
            ElectrodeKindParams::Cuff(geometry) => {
                context.add_electrode(Electrode::cuff(geometry.clone()), stimulus)?;
            }
            ElectrodeKindParams::CuffMultipolar(geometry) => {
                context.add_electrode_group(
                    Electrode::cuff_multipolar(geometry.clone()),
                    vec![stimulus],
                )?;
            }
        }
    }

    Ok(ContextSetup::Ready(context))
}

pub fn validate_context_params(params: &ContextParams) -> Result<(), SimpleError> {
    if let MediumParams::FiniteElement { geometry, .. } = &params.medium {
        validate_geometry(geometry)?;
    }

    for electrode_params in &params.electrodes {
        validate_electrode_params(&electrode_params.electrode)?;
        for waveform in &electrode_params.stimulus.waveforms {
            validate_waveform_params(waveform)?;
        }
    }

    if let Some(snap_time) = params.synchronisation.snap_time {
        if snap_time <= 0.0 {
            return Err(SimpleError::new("snap_time must be strictly positive"));
        }
    }

    if params.sampling.max_time_step_refinement == Some(0) {
        return Err(SimpleError::new(
            "max_time_step_refinement must be strictly positive",
        ));
    }

    validate_technical_params(&params.technical_params)?;

    Ok(())
}

fn validate_geometry(geometry: &NerveGeometry) -> Result<(), SimpleError> {
    if geometry.outer_diameter.map_or(false, |diameter| diameter <= 0.0) {
        return Err(SimpleError::new("outer_diameter must be strictly positive"));
    }

    if let Some(nerve) = &geometry.nerve {
        if nerve.diameter <= 0.0 || nerve.length <= 0.0 {
            return Err(SimpleError::new(
                "nerve diameter and length must be strictly positive",
            ));
        }
    }

    for fascicle in &geometry.fascicles {
        if fascicle.diameter <= 0.0 {
            return Err(SimpleError::new("fascicle diameter must be strictly positive"));
        }

        if fascicle.perineurium_thickness() < 0.0 {
            return Err(SimpleError::new(
                "perineurium_thickness must not be negative",
            ));
        }
    }

    Ok(())
}

fn validate_electrode_params(electrode: &ElectrodeKindParams) -> Result<(), SimpleError> {
    match electrode {
        ElectrodeKindParams::PointSource { .. } => Ok(()),
        ElectrodeKindParams::Life(geometry) => {
            if geometry.diameter <= 0.0 || geometry.length <= 0.0 {
                return Err(SimpleError::new(format!(
                    "LIFE electrode {} needs a strictly positive diameter and length",
                    geometry.label
                )));
            }
            validate_label(&geometry.label)
        }
        ElectrodeKindParams::Cuff(geometry) => validate_cuff(geometry),
        ElectrodeKindParams::CuffMultipolar(geometry) => {
            if geometry.num_contacts == 0 {
                return Err(SimpleError::new(format!(
                    "multipolar cuff {} needs at least one contact",
                    geometry.cuff.label
                )));
            }
            validate_cuff(&geometry.cuff)
        }
    }
}

fn validate_cuff(geometry: &CuffGeometry) -> Result<(), SimpleError> {
    if geometry.contact_length <= 0.0 {
        return Err(SimpleError::new(format!(
            "cuff electrode {} needs a strictly positive contact_length",
            geometry.label
        )));
    }
    validate_label(&geometry.label)
}

fn validate_label(label: &str) -> Result<(), SimpleError> {
    if label.is_empty() || label.contains(char::is_whitespace) {
        return Err(SimpleError::new(format!("invalid electrode label: {:?}", label)));
    }

    Ok(())
}

fn validate_waveform_params(waveform: &WaveformParams) -> Result<(), SimpleError> {
    let (durations, dt): (Vec<f64>, Option<f64>) = match waveform {
        WaveformParams::Constant { .. } => (Vec::new(), None),
        WaveformParams::Pulse { duration, .. } => (vec![*duration], None),
        WaveformParams::BiphasicPulse {
            t_stim, t_inter, ..
        } => (vec![*t_stim, *t_inter], None),
        WaveformParams::Sinus {
            duration, freq, dt, ..
        } => {
            if *freq <= 0.0 {
                return Err(SimpleError::new("sinus frequency must be strictly positive"));
            }
            (vec![*duration], Some(*dt))
        }
        WaveformParams::HarmonicPulse { t_pulse, dt, .. } => {
            if *t_pulse <= 0.0 {
                return Err(SimpleError::new("t_pulse must be strictly positive"));
            }
            (vec![*t_pulse], Some(*dt))
        }
        WaveformParams::Square { duration, freq, .. } => {
            if *freq <= 0.0 {
                return Err(SimpleError::new("square frequency must be strictly positive"));
            }
            (vec![*duration], None)
        }
        WaveformParams::Ramp {
            duration, dt, low, high, ..
        } => {
            if low > high {
                return Err(SimpleError::new("ramp bounds must satisfy low <= high"));
            }
            if *dt <= 0.0 {
                return Err(SimpleError::new("ramp dt must be strictly positive"));
            }
            (vec![*duration], Some(*dt))
        }
        WaveformParams::RampLim {
            t_start,
            t_stop,
            duration,
            dt,
            ..
        } => {
            if t_start == t_stop {
                return Err(SimpleError::new("ramp t_start and t_stop must differ"));
            }
            if *dt <= 0.0 {
                return Err(SimpleError::new("ramp dt must be strictly positive"));
            }
            (vec![*duration], Some(*dt))
        }
    };

    if durations.iter().any(|duration| *duration < 0.0) {
        return Err(SimpleError::new("waveform durations must not be negative"));
    }

    if dt.map_or(false, |dt| dt < 0.0) {
        return Err(SimpleError::new("waveform dt must not be negative"));
    }

    Ok(())
}

fn validate_technical_params(technical_params: &TechnicalParams) -> Result<(), SimpleError> {
    if let Some(num_workers) = technical_params.num_workers {
        if num_workers == 0 {
            return Err(SimpleError::new("num_workers must be strictly positive"));
        }

        if technical_params.pin_threads && num_cpus::get() < num_workers {
            return Err(SimpleError::new(
                "num_workers must not be greater than number of available CPUs \
                 when pinning threads",
            ));
        }
    }

    Ok(())
}
