use itertools::Itertools;
use log::{debug, warn};
use simple_error::{SimpleError, SimpleResult};

use crate::electrode::{electrodes_overlap, Electrode};
use crate::field_solver::{FieldSolver, PotentialMatrix};
use crate::medium::Medium;
use crate::points::Points;
use crate::stimulus::{self, Stimulus};
use crate::types::HashMap;

/// Electrodes and their driving stimuli over one medium.
pub struct StimulationContext {
    medium: Medium,
    electrodes: Vec<Electrode>,
    stimuli: Vec<Stimulus>,
    synchronised_stimuli: Vec<Stimulus>,
    global_time_serie: Vec<f64>,
    synchronised: bool,
    snap_time: Option<f64>,
    next_electrode_id: usize,
    num_points: usize,
    footprint_cache: HashMap<usize, Vec<Vec<f64>>>,
    solver: Option<Box<dyn FieldSolver + Send>>,
    solver_ready: bool,
}

impl StimulationContext {
    pub fn new(medium: Medium) -> Self {
        Self {
            medium,
            electrodes: Vec::new(),
            stimuli: Vec::new(),
            synchronised_stimuli: Vec::new(),
            global_time_serie: Vec::new(),
            synchronised: false,
            snap_time: None,
            next_electrode_id: 0,
            num_points: 0,
            footprint_cache: HashMap::default(),
            solver: None,
            solver_ready: false,
        }
    }

    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    pub fn is_empty(&self) -> bool {
        self.electrodes.is_empty()
    }

    pub fn needs_field_solver(&self) -> bool {
        matches!(self.medium, Medium::FiniteElement(_))
    }

    pub fn electrodes(&self) -> &[Electrode] {
        &self.electrodes
    }

    pub fn stimuli(&self) -> &[Stimulus] {
        &self.stimuli
    }

    pub fn is_synchronised(&self) -> bool {
        self.synchronised
    }

    /// Samples closer than `dt_min` are dropped after each synchronisation.
    /// The grid is shared, so an edge of one electrode falling within
    /// `dt_min` of another electrode's edge is lost: its previous value is
    /// held until the next kept sample, possibly for the rest of the run.
    pub fn set_snap_time(&mut self, dt_min: Option<f64>) {
        self.snap_time = dt_min;
        self.invalidate_synchronisation();
    }

    /// Registers an electrode and returns its id. Analytical media accept
    /// point sources only, finite element media field electrodes only.
    pub fn add_electrode(
        &mut self,
        mut electrode: Electrode,
        stimulus: Stimulus,
    ) -> SimpleResult<usize> {
        match (&self.medium, electrode.is_field_lookup()) {
            (Medium::Analytical(_), true) => {
                return Err(SimpleError::new(format!(
                    "field electrode {} requires a finite element medium",
                    electrode.label().unwrap_or_default()
                )))
            }
            (Medium::FiniteElement(_), false) => {
                return Err(SimpleError::new(
                    "point source electrode requires an analytical medium",
                ))
            }
            _ => {}
        }

        if let Some(other) = self
            .electrodes
            .iter()
            .find(|other| electrodes_overlap(other, &electrode))
        {
            return Err(SimpleError::new(format!(
                "electrode {} overlaps electrode {}",
                electrode.label().unwrap_or_default(),
                other.label().unwrap_or_default()
            )));
        }

        let id = self.next_electrode_id;
        self.next_electrode_id += 1;
        electrode.set_id(id);
        electrode.clear_footprint();

        self.electrodes.push(electrode);
        self.stimuli.push(stimulus);
        self.invalidate_footprints();
        self.invalidate_synchronisation();

        Ok(id)
    }

    /// Adds the contacts of a multipolar electrode. A single stimulus drives
    /// every contact.
    pub fn add_electrode_group(
        &mut self,
        contacts: Vec<Electrode>,
        mut stimuli: Vec<Stimulus>,
    ) -> SimpleResult<Vec<usize>> {
        if stimuli.len() == 1 && contacts.len() > 1 {
            warn!("single stimulus for a multipolar electrode, driving all contacts with it");
            stimuli = vec![stimuli[0].clone(); contacts.len()];
        }

        if stimuli.len() != contacts.len() {
            return Err(SimpleError::new(format!(
                "{} stimuli given for {} contacts",
                stimuli.len(),
                contacts.len()
            )));
        }

        contacts
            .into_iter()
            .zip(stimuli)
            .map(|(contact, stimulus)| self.add_electrode(contact, stimulus))
            .collect()
    }

    pub fn change_stimulus(&mut self, electrode_id: usize, stimulus: Stimulus) -> SimpleResult<()> {
        let index = self.electrode_index(electrode_id)?;
        self.stimuli[index] = stimulus;
        self.invalidate_synchronisation();
        Ok(())
    }

    pub fn reset_stimuli(&mut self) {
        let num_electrodes = self.electrodes.len();
        self.stimuli = vec![Stimulus::default(); num_electrodes];
        self.invalidate_synchronisation();
    }

    pub fn reset_electrodes(&mut self) {
        self.electrodes.clear();
        self.stimuli.clear();
        self.invalidate_footprints();
        self.invalidate_synchronisation();
    }

    pub fn translate(&mut self, dx: f64, dy: f64, dz: f64) {
        for electrode in self.electrodes.iter_mut() {
            electrode.translate(dx, dy, dz);
        }
        self.invalidate_footprints();
    }

    pub fn rotate(&mut self, angle: f64, center: (f64, f64)) {
        for electrode in self.electrodes.iter_mut() {
            electrode.rotate(angle, center);
        }
        self.invalidate_footprints();
    }

    fn electrode_index(&self, electrode_id: usize) -> SimpleResult<usize> {
        self.electrodes
            .iter()
            .position(|electrode| electrode.id() == electrode_id)
            .ok_or_else(|| SimpleError::new(format!("invalid electrode id: {}", electrode_id)))
    }

    fn invalidate_synchronisation(&mut self) {
        self.synchronised = false;
        self.synchronised_stimuli.clear();
        self.global_time_serie.clear();
    }

    fn invalidate_footprints(&mut self) {
        self.footprint_cache.clear();
        self.solver_ready = false;
    }

    pub fn synchronise_stimuli(&mut self) {
        if self.synchronised {
            return;
        }

        let mut synchronised = stimulus::synchronise(&self.stimuli);
        if let Some(dt_min) = self.snap_time {
            synchronised = synchronised
                .iter()
                .map(|stimulus| stimulus.snapped(dt_min))
                .collect();
        }

        self.global_time_serie = synchronised
            .first()
            .map(|stimulus| stimulus.t().to_vec())
            .unwrap_or_default();
        self.synchronised_stimuli = synchronised;
        self.synchronised = true;

        debug!(
            "synchronised {} stimuli on {} samples",
            self.stimuli.len(),
            self.global_time_serie.len()
        );
    }

    pub fn synchronised_stimuli(&mut self) -> &[Stimulus] {
        self.synchronise_stimuli();
        &self.synchronised_stimuli
    }

    pub fn global_time_serie(&mut self) -> &[f64] {
        self.synchronise_stimuli();
        &self.global_time_serie
    }

    pub fn attach_solver(&mut self, solver: Box<dyn FieldSolver + Send>) {
        self.solver = Some(solver);
        self.solver_ready = false;
    }

    pub fn has_solver(&self) -> bool {
        self.solver.is_some()
    }

    pub fn solver(&self) -> Option<&(dyn FieldSolver + Send + 'static)> {
        self.solver.as_deref()
    }

    /// Sends electrode and medium parameters to the solver and meshes.
    pub fn setup_solver(&mut self) -> SimpleResult<()> {
        let medium_parameters = match &self.medium {
            Medium::FiniteElement(medium) => medium.model_parameters(),
            Medium::Analytical(_) => Vec::new(),
        };
        let electrode_parameters = self
            .electrodes
            .iter()
            .flat_map(|electrode| electrode.model_parameters())
            .collect_vec();

        let solver = self.solver_mut()?;
        for (name, value) in electrode_parameters.iter().chain(&medium_parameters) {
            solver.set_parameter(name, value)?;
        }
        solver.build_and_mesh()?;
        self.solver_ready = true;
        Ok(())
    }

    pub fn solve_field(&mut self) -> SimpleResult<()> {
        if !self.solver_ready {
            self.setup_solver()?;
            return self.solver_mut()?.solve();
        }

        let solver = self.solver_mut()?;
        if !solver.is_solved() {
            solver.solve()?;
        }
        Ok(())
    }

    /// Evaluates the attached solver, solving first when needed.
    pub fn field_potentials(&mut self, points: &Points) -> SimpleResult<PotentialMatrix> {
        if !self.solver_ready || !self.solver_mut()?.is_solved() {
            self.solve_field()?;
        }
        self.solver_mut()?.get_potentials(points)
    }

    fn solver_mut(&mut self) -> SimpleResult<&mut (dyn FieldSolver + Send + 'static)> {
        match self.solver.as_deref_mut() {
            Some(solver) => Ok(solver),
            None => Err(SimpleError::new("no field solver attached to this context")),
        }
    }

    /// Computes (or restores) the footprints of all electrodes for the fiber
    /// `fiber_id`. Field electrodes need an attached solver, otherwise
    /// potentials must be supplied through `assign_potentials`.
    pub fn compute_electrodes_footprints(
        &mut self,
        points: &Points,
        fiber_id: usize,
    ) -> SimpleResult<()> {
        self.num_points = points.len();

        if self.restore_footprints(fiber_id) {
            return Ok(());
        }

        match &self.medium {
            Medium::Analytical(material) => {
                for electrode in self.electrodes.iter_mut() {
                    electrode.compute_footprint(points, fiber_id, material)?;
                }
                self.cache_footprints(fiber_id);
                Ok(())
            }
            Medium::FiniteElement(_) => {
                let potentials = self.field_potentials(points)?;
                self.assign_potentials(&potentials, fiber_id)
            }
        }
    }

    fn restore_footprints(&mut self, fiber_id: usize) -> bool {
        if self
            .electrodes
            .iter()
            .all(|electrode| electrode.has_footprint_for(fiber_id))
        {
            return true;
        }

        match self.footprint_cache.get(&fiber_id) {
            Some(footprints) if footprints.len() == self.electrodes.len() => {
                for (electrode, values) in self.electrodes.iter_mut().zip(footprints) {
                    electrode.set_footprint(fiber_id, values.clone());
                }
                true
            }
            _ => false,
        }
    }

    fn cache_footprints(&mut self, fiber_id: usize) {
        let footprints = self
            .electrodes
            .iter()
            .filter_map(|electrode| electrode.footprint().map(|f| f.values.clone()))
            .collect_vec();
        self.footprint_cache.insert(fiber_id, footprints);
    }

    /// Distributes solver columns to field electrodes: column k belongs to
    /// the k-th electrode in alphabetical label order.
    pub fn assign_potentials(
        &mut self,
        potentials: &PotentialMatrix,
        fiber_id: usize,
    ) -> SimpleResult<()> {
        if potentials.num_electrodes() != self.electrodes.len() {
            return Err(SimpleError::new(format!(
                "potential matrix has {} columns for {} electrodes",
                potentials.num_electrodes(),
                self.electrodes.len()
            )));
        }

        for (column, index) in self.label_order().into_iter().enumerate() {
            let values = potentials.column(column)?;
            self.electrodes[index].set_footprint(fiber_id, values);
        }

        self.num_points = potentials.num_points();
        self.cache_footprints(fiber_id);
        Ok(())
    }

    /// Electrode indices sorted by label.
    pub fn label_order(&self) -> Vec<usize> {
        (0..self.electrodes.len())
            .sorted_by_key(|index| self.electrodes[*index].label())
            .collect()
    }

    pub fn set_electrodes_footprints(
        &mut self,
        footprints: Vec<Vec<f64>>,
        fiber_id: usize,
    ) -> SimpleResult<()> {
        if footprints.len() != self.electrodes.len() {
            return Err(SimpleError::new(format!(
                "{} footprints given for {} electrodes",
                footprints.len(),
                self.electrodes.len()
            )));
        }

        if let Some(first) = footprints.first() {
            self.num_points = first.len();
        }
        for (electrode, values) in self.electrodes.iter_mut().zip(footprints) {
            electrode.set_footprint(fiber_id, values);
        }
        self.cache_footprints(fiber_id);
        Ok(())
    }

    pub fn clear_electrodes_footprints(&mut self) {
        for electrode in self.electrodes.iter_mut() {
            electrode.clear_footprint();
        }
        self.footprint_cache.clear();
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    /// Superposed extracellular potential (mV) at sample `time_index` of the
    /// global time serie, zero past its end.
    pub fn compute_vext(&mut self, time_index: usize) -> SimpleResult<Vec<f64>> {
        let mut v_ext = vec![0.0; self.num_points];
        self.compute_vext_into(time_index, &mut v_ext)?;
        Ok(v_ext)
    }

    pub fn compute_vext_into(&mut self, time_index: usize, v_ext: &mut [f64]) -> SimpleResult<()> {
        v_ext.fill(0.0);
        self.synchronise_stimuli();

        if time_index >= self.global_time_serie.len() {
            return Ok(());
        }

        for (electrode, stimulus) in self.electrodes.iter().zip(&self.synchronised_stimuli) {
            electrode.accumulate_field(stimulus.s()[time_index], v_ext)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::electrode::{CuffGeometry, LifeGeometry, MultipolarCuffGeometry};
    use crate::field_solver::HomogeneousFieldSolver;
    use crate::material::Material;
    use crate::medium::{FiniteElementMedium, NerveGeometry};
    use crate::util::test_util::assert_approx_eq_slice;
    use float_cmp::assert_approx_eq;
    use itertools::assert_equal;

    fn analytical() -> StimulationContext {
        StimulationContext::new(Medium::Analytical(Material::isotropic("saline", 2.0)))
    }

    fn finite_element() -> StimulationContext {
        StimulationContext::new(Medium::FiniteElement(FiniteElementMedium {
            endoneurium: Material::anisotropic("endoneurium", 0.571, 0.0826, 0.0826),
            perineurium: Material::isotropic("perineurium", 0.0021),
            epineurium: Material::isotropic("epineurium", 0.085),
            external: Material::isotropic("saline", 2.0),
            geometry: NerveGeometry::default(),
        }))
    }

    fn life(label: &str, x_offset: f64) -> Electrode {
        Electrode::life(LifeGeometry {
            label: label.to_string(),
            diameter: 25.0,
            length: 100.0,
            x_offset,
            y: 0.0,
            z: 0.0,
        })
    }

    fn pulse(start: f64, value: f64) -> Stimulus {
        let mut stimulus = Stimulus::default();
        stimulus.pulse(start, value, 0.5);
        stimulus
    }

    #[test]
    fn empty_context() {
        let mut context = analytical();
        assert!(context.is_empty());
        assert!(context.compute_vext(0).unwrap().is_empty());

        context
            .compute_electrodes_footprints(&Points::along_x(vec![0.0, 1.0, 2.0], 0.0, 0.0), 0)
            .unwrap();
        assert_eq!(context.compute_vext(5).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn monotonic_ids() {
        let mut context = analytical();
        let first = context
            .add_electrode(Electrode::point_source(0.0, 0.0, 0.0), Stimulus::default())
            .unwrap();
        let second = context
            .add_electrode(Electrode::point_source(0.0, 10.0, 0.0), Stimulus::default())
            .unwrap();
        assert_eq!((first, second), (0, 1));

        context.reset_electrodes();
        let third = context
            .add_electrode(Electrode::point_source(0.0, 0.0, 0.0), Stimulus::default())
            .unwrap();
        assert_eq!(third, 2);
    }

    #[test]
    fn medium_checks_electrode_kind() {
        let mut context = analytical();
        assert!(context.add_electrode(life("LIFE", 0.0), Stimulus::default()).is_err());

        let mut context = finite_element();
        assert!(context
            .add_electrode(Electrode::point_source(0.0, 0.0, 0.0), Stimulus::default())
            .is_err());
        context.add_electrode(life("A", 0.0), Stimulus::default()).unwrap();
        assert_eq!(
            context
                .add_electrode(life("B", 50.0), Stimulus::default())
                .unwrap_err()
                .as_str(),
            "electrode B overlaps electrode A"
        );
        assert_eq!(context.electrodes().len(), 1);
    }

    #[test]
    fn single_electrode_is_unchanged() {
        let mut context = analytical();
        let stimulus = pulse(1.0, 100.0);
        context
            .add_electrode(Electrode::point_source(0.0, 0.0, 0.0), stimulus.clone())
            .unwrap();

        assert_eq!(context.synchronised_stimuli(), &[stimulus.clone()]);
        assert_eq!(context.global_time_serie(), stimulus.t());
        assert_eq!(context.stimuli(), &[stimulus]);
    }

    #[test]
    fn resynchronise_after_change() {
        let mut context = analytical();
        let id = context
            .add_electrode(Electrode::point_source(0.0, 0.0, 0.0), pulse(1.0, 1.0))
            .unwrap();
        context
            .add_electrode(Electrode::point_source(0.0, 50.0, 0.0), pulse(2.0, 1.0))
            .unwrap();

        assert_equal(context.global_time_serie().iter().copied(), [0.0, 1.0, 1.5, 2.0, 2.5]);

        context.change_stimulus(id, pulse(0.25, 1.0)).unwrap();
        assert!(!context.is_synchronised());
        assert_equal(
            context.global_time_serie().iter().copied(),
            [0.0, 0.25, 0.75, 2.0, 2.5],
        );

        assert_eq!(
            context
                .change_stimulus(7, Stimulus::default())
                .unwrap_err()
                .as_str(),
            "invalid electrode id: 7"
        );

        context.reset_stimuli();
        assert_equal(context.global_time_serie().iter().copied(), [0.0]);
    }

    #[test]
    fn snapped_synchronisation() {
        let mut context = analytical();
        context
            .add_electrode(Electrode::point_source(0.0, 0.0, 0.0), pulse(1.0, 1.0))
            .unwrap();
        context
            .add_electrode(Electrode::point_source(0.0, 50.0, 0.0), pulse(1.0005, 1.0))
            .unwrap();
        context.set_snap_time(Some(0.001));

        assert_equal(context.global_time_serie().iter().copied(), [0.0, 1.0, 1.5]);

        let synchronised = context.synchronised_stimuli();
        assert_equal(synchronised[0].s().iter().copied(), [0.0, 1.0, 0.0]);
        assert_equal(synchronised[1].s().iter().copied(), [0.0, 0.0, 1.0]);
        assert_eq!(synchronised[1].value_at(10.0), 1.0);
    }

    #[test]
    fn superposition_of_point_sources() {
        let mut context = analytical();
        context
            .add_electrode(Electrode::point_source(0.0, 100.0, 0.0), pulse(1.0, 1000.0))
            .unwrap();
        context
            .add_electrode(Electrode::point_source(500.0, 100.0, 0.0), pulse(1.0, -500.0))
            .unwrap();

        let points = Points::along_x(vec![0.0, 250.0, 500.0], 0.0, 0.0);
        context.compute_electrodes_footprints(&points, 0).unwrap();

        let first = context.electrodes()[0].footprint().unwrap().values.clone();
        let second = context.electrodes()[1].footprint().unwrap().values.clone();

        assert_eq!(context.compute_vext(0).unwrap(), vec![0.0; 3]);

        let v_ext = context.compute_vext(1).unwrap();
        for k in 0..3 {
            assert_approx_eq!(f64, v_ext[k], first[k] - 0.5 * second[k], ulps = 4);
        }

        assert_eq!(context.compute_vext(2).unwrap(), vec![0.0; 3]);
        assert_eq!(context.compute_vext(3).unwrap(), vec![0.0; 3]);

        let mut buffer = vec![1.0; 3];
        context.compute_vext_into(1, &mut buffer).unwrap();
        assert_approx_eq_slice(&buffer, &v_ext);
    }

    #[test]
    fn footprints_cached_per_fiber() {
        let mut context = analytical();
        context
            .add_electrode(Electrode::point_source(0.0, 100.0, 0.0), pulse(0.0, 1.0))
            .unwrap();

        let fiber_a = Points::along_x(vec![0.0], 0.0, 0.0);
        let fiber_b = Points::along_x(vec![0.0, 10.0], 50.0, 0.0);

        context.compute_electrodes_footprints(&fiber_a, 0).unwrap();
        let footprint_a = context.electrodes()[0].footprint().unwrap().clone();
        context.compute_electrodes_footprints(&fiber_b, 1).unwrap();
        assert_eq!(context.num_points(), 2);

        context.compute_electrodes_footprints(&fiber_a, 0).unwrap();
        assert_eq!(context.electrodes()[0].footprint().unwrap(), &footprint_a);
        assert_eq!(context.compute_vext(0).unwrap().len(), 1);

        context.translate(0.0, 50.0, 0.0);
        assert!(context.electrodes()[0].footprint().is_none());
    }

    #[test]
    fn missing_footprint_is_an_error() {
        let mut context = analytical();
        context
            .add_electrode(Electrode::point_source(0.0, 100.0, 0.0), pulse(0.0, 1.0))
            .unwrap();
        assert!(context.compute_vext(0).is_err());
    }

    #[test]
    fn columns_assigned_by_label() {
        let mut context = finite_element();
        for (label, x) in [("E2", 0.0), ("E10", 1000.0), ("E1", 2000.0)] {
            context.add_electrode(life(label, x), Stimulus::default()).unwrap();
        }
        assert_eq!(context.label_order(), vec![2, 1, 0]);

        let potentials = PotentialMatrix::from_columns(&[
            vec![1.0, 1.0],
            vec![10.0, 10.0],
            vec![2.0, 2.0],
        ])
        .unwrap();
        context.assign_potentials(&potentials, 4).unwrap();

        let firsts = context
            .electrodes()
            .iter()
            .map(|electrode| electrode.footprint().unwrap().values[0])
            .collect_vec();
        assert_eq!(firsts, vec![2.0, 10.0, 1.0]);

        let wrong_shape = PotentialMatrix::from_columns(&[vec![1.0]]).unwrap();
        assert!(context.assign_potentials(&wrong_shape, 5).is_err());
    }

    #[test]
    fn solver_capability() {
        let mut context = finite_element();
        context.add_electrode(life("LIFE_1", 0.0), pulse(1.0, 50.0)).unwrap();
        context
            .add_electrode_group(
                Electrode::cuff_multipolar(MultipolarCuffGeometry {
                    cuff: CuffGeometry::new("CUFF", 100.0, 5000.0),
                    num_contacts: 2,
                    contact_width: None,
                }),
                vec![pulse(2.0, 10.0)],
            )
            .unwrap();
        assert_eq!(context.electrodes().len(), 3);

        let points = Points::along_x(vec![0.0, 2500.0], 100.0, 0.0);
        assert!(context.compute_electrodes_footprints(&points, 0).is_err());

        let mut solver = HomogeneousFieldSolver::new(Material::isotropic("saline", 2.0));
        solver.add_source("CUFF_0", (5000.0, 200.0, 0.0));
        solver.add_source("CUFF_1", (5000.0, -200.0, 0.0));
        solver.add_source("LIFE_1", (50.0, 0.0, 0.0));
        context.attach_solver(Box::new(solver));

        context.compute_electrodes_footprints(&points, 0).unwrap();
        assert!(context.solver().unwrap().is_solved());

        let life_footprint = &context.electrodes()[0].footprint().unwrap().values;
        let expected = crate::electrode::point_source_footprint(
            &points,
            (50.0, 0.0, 0.0),
            &Material::isotropic("saline", 2.0),
        );
        assert_approx_eq_slice(life_footprint, &expected);
    }
}
