use itertools::Itertools;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use simple_error::{SimpleError, SimpleResult};

use crate::electrode::point_source_footprint;
use crate::material::Material;
use crate::points::Points;
use crate::types::HashMap;

/// External field engine. One parametric solve per electrode, results are
/// columns ordered by electrode label.
pub trait FieldSolver {
    fn set_parameter(&mut self, name: &str, value: &str) -> SimpleResult<()>;

    fn build_and_mesh(&mut self) -> SimpleResult<()>;

    fn solve(&mut self) -> SimpleResult<()>;

    fn is_solved(&self) -> bool;

    fn get_potentials(&self, points: &Points) -> SimpleResult<PotentialMatrix>;
}

/// Potentials (mV per mA), one row per point, one column per electrode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PotentialMatrix {
    num_points: usize,
    num_electrodes: usize,
    data: Vec<f64>,
}

impl PotentialMatrix {
    pub fn from_columns(columns: &[Vec<f64>]) -> SimpleResult<Self> {
        let num_points = columns.first().map_or(0, Vec::len);

        if let Some(column) = columns.iter().find(|column| column.len() != num_points) {
            return Err(SimpleError::new(format!(
                "potential columns differ in length: {} vs {}",
                column.len(),
                num_points
            )));
        }

        let data = (0..num_points)
            .flat_map(|row| columns.iter().map(move |column| column[row]))
            .collect();

        Ok(Self {
            num_points,
            num_electrodes: columns.len(),
            data,
        })
    }

    pub fn num_points(&self) -> usize {
        self.num_points
    }

    pub fn num_electrodes(&self) -> usize {
        self.num_electrodes
    }

    pub fn get(&self, point: usize, electrode: usize) -> f64 {
        self.data[point * self.num_electrodes + electrode]
    }

    pub fn column(&self, electrode: usize) -> SimpleResult<Vec<f64>> {
        if electrode >= self.num_electrodes {
            return Err(SimpleError::new(format!(
                "invalid potential column: {}",
                electrode
            )));
        }

        Ok(self
            .data
            .iter()
            .skip(electrode)
            .step_by(self.num_electrodes)
            .copied()
            .collect())
    }
}

/// Solver for an unbounded homogeneous medium: each labelled source acts as a
/// point source. Stands in for the external engine wherever no licensed
/// instance is available.
pub struct HomogeneousFieldSolver {
    material: Material,
    sources: Vec<(String, (f64, f64, f64))>,
    parameters: HashMap<String, String>,
    meshed: bool,
    solved: bool,
    num_solves: usize,
}

impl HomogeneousFieldSolver {
    pub fn new(material: Material) -> Self {
        Self {
            material,
            sources: Vec::new(),
            parameters: HashMap::default(),
            meshed: false,
            solved: false,
            num_solves: 0,
        }
    }

    pub fn add_source(&mut self, label: &str, position: (f64, f64, f64)) {
        self.sources.push((label.to_string(), position));
        self.sources.sort_by(|a, b| a.0.cmp(&b.0));
        self.meshed = false;
        self.solved = false;
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn num_solves(&self) -> usize {
        self.num_solves
    }

    pub fn labels(&self) -> Vec<&str> {
        self.sources.iter().map(|(label, _)| label.as_str()).collect_vec()
    }
}

impl FieldSolver for HomogeneousFieldSolver {
    fn set_parameter(&mut self, name: &str, value: &str) -> SimpleResult<()> {
        debug!("solver parameter {} = {}", name, value);
        self.parameters.insert(name.to_string(), value.to_string());
        self.meshed = false;
        self.solved = false;
        Ok(())
    }

    fn build_and_mesh(&mut self) -> SimpleResult<()> {
        if self.sources.is_empty() {
            return Err(SimpleError::new("field solver has no electrode to mesh"));
        }

        self.meshed = true;
        Ok(())
    }

    fn solve(&mut self) -> SimpleResult<()> {
        if !self.meshed {
            return Err(SimpleError::new("field solver must be meshed before solving"));
        }

        self.solved = true;
        self.num_solves += 1;
        info!("field solved for {} electrodes", self.sources.len());
        Ok(())
    }

    fn is_solved(&self) -> bool {
        self.solved
    }

    fn get_potentials(&self, points: &Points) -> SimpleResult<PotentialMatrix> {
        if !self.solved {
            return Err(SimpleError::new("field solver queried before solve"));
        }

        let columns = self
            .sources
            .iter()
            .map(|(_, position)| point_source_footprint(points, *position, &self.material))
            .collect_vec();

        PotentialMatrix::from_columns(&columns)
    }
}
