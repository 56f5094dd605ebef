use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use simple_error::{SimpleError, SimpleResult};

use crate::material::{Conductivity, Material};
use crate::points::{rotate_transverse, Points};

const UM_TO_M: f64 = 1e-6;
const UA_TO_MA: f64 = 1e-3;

/// Potential (mV) per 1 mA at each point of one fiber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    pub fiber_id: usize,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifeGeometry {
    pub label: String,
    pub diameter: f64,
    pub length: f64,
    pub x_offset: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CuffGeometry {
    pub label: String,
    pub contact_length: f64,
    pub x_center: f64,
    pub contact_thickness: Option<f64>,
    pub insulator_thickness: Option<f64>,
    pub insulator_length: Option<f64>,
}

impl CuffGeometry {
    pub fn new(label: &str, contact_length: f64, x_center: f64) -> Self {
        Self {
            label: label.to_string(),
            contact_length,
            x_center,
            contact_thickness: None,
            insulator_thickness: None,
            insulator_length: None,
        }
    }

    fn model_parameters(&self, parameters: &mut Vec<(String, String)>) {
        push_um(parameters, &self.label, "contact_length", self.contact_length);
        push_um(parameters, &self.label, "x_center", self.x_center);

        let optional = [
            ("contact_thickness", self.contact_thickness),
            ("insulator_thickness", self.insulator_thickness),
            ("insulator_length", self.insulator_length),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                push_um(parameters, &self.label, name, value);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultipolarCuffGeometry {
    pub cuff: CuffGeometry,
    pub num_contacts: usize,
    pub contact_width: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElectrodeKind {
    PointSource { x: f64, y: f64, z: f64 },
    Life(LifeGeometry),
    Cuff(CuffGeometry),
    CuffMultipolar {
        geometry: MultipolarCuffGeometry,
        contact: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Electrode {
    id: usize,
    kind: ElectrodeKind,
    footprint: Option<Footprint>,
}

impl Electrode {
    pub fn new(kind: ElectrodeKind) -> Self {
        Self {
            id: 0,
            kind,
            footprint: None,
        }
    }

    pub fn point_source(x: f64, y: f64, z: f64) -> Self {
        Self::new(ElectrodeKind::PointSource { x, y, z })
    }

    pub fn life(geometry: LifeGeometry) -> Self {
        Self::new(ElectrodeKind::Life(geometry))
    }

    pub fn cuff(geometry: CuffGeometry) -> Self {
        Self::new(ElectrodeKind::Cuff(geometry))
    }

    /// One electrode per contact site, labelled `<label>_<contact>`.
    pub fn cuff_multipolar(geometry: MultipolarCuffGeometry) -> Vec<Self> {
        (0..geometry.num_contacts)
            .map(|contact| {
                Self::new(ElectrodeKind::CuffMultipolar {
                    geometry: geometry.clone(),
                    contact,
                })
            })
            .collect()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn set_id(&mut self, id: usize) {
        self.id = id;
    }

    pub fn kind(&self) -> &ElectrodeKind {
        &self.kind
    }

    pub fn is_field_lookup(&self) -> bool {
        !matches!(self.kind, ElectrodeKind::PointSource { .. })
    }

    pub fn label(&self) -> Option<String> {
        match &self.kind {
            ElectrodeKind::PointSource { .. } => None,
            ElectrodeKind::Life(geometry) => Some(geometry.label.clone()),
            ElectrodeKind::Cuff(geometry) => Some(geometry.label.clone()),
            ElectrodeKind::CuffMultipolar { geometry, contact } => {
                Some(format!("{}_{}", geometry.cuff.label, contact))
            }
        }
    }

    pub fn footprint(&self) -> Option<&Footprint> {
        self.footprint.as_ref()
    }

    pub fn has_footprint_for(&self, fiber_id: usize) -> bool {
        matches!(&self.footprint, Some(footprint) if footprint.fiber_id == fiber_id)
    }

    pub fn set_footprint(&mut self, fiber_id: usize, values: Vec<f64>) {
        self.footprint = Some(Footprint { fiber_id, values });
    }

    pub fn clear_footprint(&mut self) {
        self.footprint = None;
    }

    /// Point sources evaluate their closed form once per fiber id. Field
    /// lookup electrodes only accept footprints handed over by a solver.
    pub fn compute_footprint(
        &mut self,
        points: &Points,
        fiber_id: usize,
        material: &Material,
    ) -> SimpleResult<()> {
        if self.has_footprint_for(fiber_id) {
            return Ok(());
        }

        match self.kind {
            ElectrodeKind::PointSource { x, y, z } => {
                let values = point_source_footprint(points, (x, y, z), material);
                self.set_footprint(fiber_id, values);
                Ok(())
            }
            _ => Err(SimpleError::new(format!(
                "footprint of field electrode {} must be provided by a field solver",
                self.label().unwrap_or_default()
            ))),
        }
    }

    /// Potential (mV) for a current in µA.
    pub fn compute_field(&self, current: f64) -> SimpleResult<Vec<f64>> {
        let footprint = self.require_footprint()?;
        let current_ma = current * UA_TO_MA;
        Ok(footprint.values.iter().map(|v| current_ma * v).collect())
    }

    pub fn accumulate_field(&self, current: f64, v_ext: &mut [f64]) -> SimpleResult<()> {
        let footprint = self.require_footprint()?;

        if footprint.values.len() != v_ext.len() {
            return Err(SimpleError::new(format!(
                "footprint of electrode {} has {} points, expected {}",
                self.id,
                footprint.values.len(),
                v_ext.len()
            )));
        }

        let current_ma = current * UA_TO_MA;
        for (v, value) in v_ext.iter_mut().zip(&footprint.values) {
            *v += current_ma * value;
        }

        Ok(())
    }

    fn require_footprint(&self) -> SimpleResult<&Footprint> {
        self.footprint
            .as_ref()
            .ok_or_else(|| SimpleError::new(format!("electrode {} has no footprint", self.id)))
    }

    /// Cuffs wrap the whole nerve and only move along x.
    pub fn translate(&mut self, dx: f64, dy: f64, dz: f64) {
        match &mut self.kind {
            ElectrodeKind::PointSource { x, y, z } => {
                *x += dx;
                *y += dy;
                *z += dz;
            }
            ElectrodeKind::Life(geometry) => {
                geometry.x_offset += dx;
                geometry.y += dy;
                geometry.z += dz;
            }
            ElectrodeKind::Cuff(geometry) => geometry.x_center += dx,
            ElectrodeKind::CuffMultipolar { geometry, .. } => geometry.cuff.x_center += dx,
        }
        self.clear_footprint();
    }

    /// Rotation around the x axis, `angle` in radians.
    pub fn rotate(&mut self, angle: f64, center: (f64, f64)) {
        match &mut self.kind {
            ElectrodeKind::PointSource { y, z, .. } => {
                (*y, *z) = rotate_transverse(*y, *z, angle, center);
            }
            ElectrodeKind::Life(geometry) => {
                (geometry.y, geometry.z) =
                    rotate_transverse(geometry.y, geometry.z, angle, center);
            }
            ElectrodeKind::Cuff(_) | ElectrodeKind::CuffMultipolar { .. } => {}
        }
        self.clear_footprint();
    }

    /// Solver parameter assignments describing this electrode's geometry.
    pub fn model_parameters(&self) -> Vec<(String, String)> {
        let mut parameters = Vec::new();

        match &self.kind {
            ElectrodeKind::PointSource { .. } => {}
            ElectrodeKind::Life(geometry) => {
                let label = &geometry.label;
                push_um(&mut parameters, label, "D", geometry.diameter);
                push_um(&mut parameters, label, "Length", geometry.length);
                push_um(&mut parameters, label, "y_c", geometry.y);
                push_um(&mut parameters, label, "z_c", geometry.z);
                push_um(&mut parameters, label, "x_offset", geometry.x_offset);
            }
            ElectrodeKind::Cuff(geometry) => geometry.model_parameters(&mut parameters),
            // the contacts share one geometry, described by the first contact
            ElectrodeKind::CuffMultipolar { geometry, contact } if *contact == 0 => {
                geometry.cuff.model_parameters(&mut parameters);
                parameters.push((
                    format!("{}_N_contact", geometry.cuff.label),
                    geometry.num_contacts.to_string(),
                ));
                if let Some(width) = geometry.contact_width {
                    push_um(&mut parameters, &geometry.cuff.label, "contact_width", width);
                }
            }
            ElectrodeKind::CuffMultipolar { .. } => {}
        }

        parameters
    }
}

fn push_um(parameters: &mut Vec<(String, String)>, label: &str, name: &str, value: f64) {
    parameters.push((format!("{}_{}", label, name), format!("{}[um]", value)));
}

/// Closed-form potential of a 1 mA point source, coordinates in µm.
pub fn point_source_footprint(
    points: &Points,
    source: (f64, f64, f64),
    material: &Material,
) -> Vec<f64> {
    let [sigma_xx, sigma_yy, sigma_zz] = material.sigma_axes();
    let (x_e, y_e, z_e) = source;

    points
        .iter()
        .map(|(x, y, z)| {
            let dx = (x - x_e) * UM_TO_M;
            let dy = (y - y_e) * UM_TO_M;
            let dz = (z - z_e) * UM_TO_M;

            match material.conductivity {
                Conductivity::Isotropic(_) => {
                    1.0 / (4.0 * PI * sigma_xx * (dx * dx + dy * dy + dz * dz).sqrt())
                }
                Conductivity::Anisotropic { .. } => {
                    let sx = sigma_yy * sigma_zz;
                    let sy = sigma_xx * sigma_zz;
                    let sz = sigma_xx * sigma_yy;
                    1.0 / (4.0 * PI * (sx * dx * dx + sy * dy * dy + sz * dz * dz).sqrt())
                }
            }
        })
        .collect()
}

/// Whether two field electrodes occupy the same region of the nerve.
/// Point sources never overlap, nor do contacts of the same multipolar cuff.
pub fn electrodes_overlap(a: &Electrode, b: &Electrode) -> bool {
    match (cuff_extent(a), cuff_extent(b)) {
        (Some((label_a, x_a, length_a)), Some((label_b, x_b, length_b))) => {
            let same_cuff = matches!(
                (&a.kind, &b.kind),
                (ElectrodeKind::CuffMultipolar { .. }, ElectrodeKind::CuffMultipolar { .. })
            ) && label_a == label_b;

            !same_cuff && (x_a - x_b).abs() < (length_a + length_b) / 2.0
        }
        _ => match (&a.kind, &b.kind) {
            (ElectrodeKind::Life(first), ElectrodeKind::Life(second)) => {
                let dist_x = (first.x_offset - second.x_offset).abs();
                let min_x = (first.length + second.length) / 2.0;
                let dist_yz = (first.y - second.y).powi(2) + (first.z - second.z).powi(2);
                let min_yz = ((first.diameter + second.diameter) / 2.0).powi(2);
                dist_x < min_x && dist_yz < min_yz
            }
            _ => false,
        },
    }
}

fn cuff_extent(electrode: &Electrode) -> Option<(&str, f64, f64)> {
    match &electrode.kind {
        ElectrodeKind::Cuff(cuff) => {
            Some((cuff.label.as_str(), cuff.x_center, cuff.contact_length))
        }
        ElectrodeKind::CuffMultipolar { geometry, .. } => Some((
            geometry.cuff.label.as_str(),
            geometry.cuff.x_center,
            geometry.cuff.contact_length,
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test_util::assert_approx_eq_slice;
    use float_cmp::assert_approx_eq;

    fn life(label: &str, x_offset: f64, y: f64) -> LifeGeometry {
        LifeGeometry {
            label: label.to_string(),
            diameter: 25.0,
            length: 1000.0,
            x_offset,
            y,
            z: 0.0,
        }
    }

    #[test]
    fn isotropic_point_source() {
        let points = Points::along_x(vec![0.0, 100.0, 200.0], 0.0, 0.0);
        let material = Material::isotropic("saline", 2.0);
        let mut electrode = Electrode::point_source(0.0, 100.0, 0.0);

        electrode.compute_footprint(&points, 0, &material).unwrap();
        let values = &electrode.footprint().unwrap().values;

        let expected = |distance_um: f64| 1.0 / (4.0 * PI * 2.0 * distance_um * 1e-6);
        assert_approx_eq!(f64, values[0], expected(100.0), ulps = 4);
        assert_approx_eq!(f64, values[1], expected(100.0 * 2f64.sqrt()), ulps = 4);
        assert_approx_eq!(f64, values[2], expected(100.0 * 5f64.sqrt()), ulps = 4);
    }

    #[test]
    fn anisotropic_point_source() {
        let points = Points::new(vec![50.0], vec![0.0], vec![30.0]).unwrap();
        let material = Material::anisotropic("endoneurium", 0.5, 0.1, 0.2);
        let values = point_source_footprint(&points, (0.0, 0.0, 0.0), &material);

        let (dx, dz): (f64, f64) = (50e-6, 30e-6);
        let expected = 1.0 / (4.0 * PI * (0.1 * 0.2 * dx * dx + 0.5 * 0.1 * dz * dz).sqrt());
        assert_approx_eq!(f64, values[0], expected, ulps = 4);
    }

    #[test]
    fn footprint_determinism() {
        let points = Points::along_x(vec![-300.0, 0.0, 300.0], 20.0, 10.0);
        let material = Material::anisotropic("endoneurium", 0.571, 0.0826, 0.0826);

        let mut electrode = Electrode::point_source(0.0, 0.0, 0.0);
        electrode.compute_footprint(&points, 3, &material).unwrap();
        let first = electrode.footprint().unwrap().clone();

        electrode.clear_footprint();
        electrode.compute_footprint(&points, 3, &material).unwrap();
        assert_eq!(electrode.footprint().unwrap(), &first);
    }

    #[test]
    fn footprint_cached_per_fiber() {
        let material = Material::isotropic("saline", 2.0);
        let mut electrode = Electrode::point_source(0.0, 50.0, 0.0);

        electrode
            .compute_footprint(&Points::along_x(vec![0.0], 0.0, 0.0), 1, &material)
            .unwrap();
        let cached = electrode.footprint().unwrap().values.clone();

        // same fiber id: coordinates are not re-evaluated
        electrode
            .compute_footprint(&Points::along_x(vec![0.0, 10.0], 0.0, 0.0), 1, &material)
            .unwrap();
        assert_eq!(electrode.footprint().unwrap().values, cached);

        electrode
            .compute_footprint(&Points::along_x(vec![0.0, 10.0], 0.0, 0.0), 2, &material)
            .unwrap();
        assert_eq!(electrode.footprint().unwrap().values.len(), 2);
    }

    #[test]
    fn field_scales_with_current() {
        let mut electrode = Electrode::point_source(0.0, 0.0, 0.0);
        electrode.set_footprint(0, vec![2.0, -4.0]);

        assert_approx_eq_slice(&electrode.compute_field(500.0).unwrap(), &[1.0, -2.0]);

        let mut v_ext = vec![1.0, 1.0];
        electrode.accumulate_field(-1000.0, &mut v_ext).unwrap();
        assert_approx_eq_slice(&v_ext, &[-1.0, 5.0]);

        assert!(electrode.accumulate_field(1.0, &mut [0.0; 3]).is_err());
    }

    #[test]
    fn missing_footprint() {
        let electrode = Electrode::point_source(0.0, 0.0, 0.0);
        assert_eq!(
            electrode.compute_field(1.0).unwrap_err().as_str(),
            "electrode 0 has no footprint"
        );

        let mut life_electrode = Electrode::life(life("LIFE_0", 0.0, 0.0));
        let result = life_electrode.compute_footprint(
            &Points::default(),
            0,
            &Material::isotropic("saline", 2.0),
        );
        assert!(result.is_err());
    }

    #[test]
    fn moving_clears_footprint() {
        let mut electrode = Electrode::point_source(0.0, 100.0, 0.0);
        electrode.set_footprint(0, vec![1.0]);
        electrode.translate(10.0, 0.0, 5.0);
        assert!(electrode.footprint().is_none());
        assert_eq!(
            electrode.kind(),
            &ElectrodeKind::PointSource {
                x: 10.0,
                y: 100.0,
                z: 5.0
            }
        );

        electrode.rotate(PI, (0.0, 0.0));
        match electrode.kind() {
            ElectrodeKind::PointSource { y, z, .. } => {
                assert_approx_eq!(f64, *y, -100.0, epsilon = 1e-9);
                assert_approx_eq!(f64, *z, -5.0, epsilon = 1e-9);
            }
            _ => unreachable!(),
        }

        let mut cuff = Electrode::cuff(CuffGeometry::new("CUFF", 100.0, 0.0));
        cuff.translate(50.0, 20.0, 20.0);
        assert_eq!(
            cuff.kind(),
            &ElectrodeKind::Cuff(CuffGeometry::new("CUFF", 100.0, 50.0))
        );
    }

    #[test]
    fn life_model_parameters() {
        let electrode = Electrode::life(life("LIFE_1", 500.0, -20.0));
        assert_eq!(
            electrode.model_parameters(),
            vec![
                ("LIFE_1_D".to_string(), "25[um]".to_string()),
                ("LIFE_1_Length".to_string(), "1000[um]".to_string()),
                ("LIFE_1_y_c".to_string(), "-20[um]".to_string()),
                ("LIFE_1_z_c".to_string(), "0[um]".to_string()),
                ("LIFE_1_x_offset".to_string(), "500[um]".to_string()),
            ]
        );
    }

    #[test]
    fn cuff_model_parameters() {
        let mut geometry = CuffGeometry::new("CUFF", 100.0, 250.5);
        geometry.insulator_length = Some(1000.0);

        let electrode = Electrode::cuff(geometry);
        assert_eq!(
            electrode.model_parameters(),
            vec![
                ("CUFF_contact_length".to_string(), "100[um]".to_string()),
                ("CUFF_x_center".to_string(), "250.5[um]".to_string()),
                ("CUFF_insulator_length".to_string(), "1000[um]".to_string()),
            ]
        );
    }

    #[test]
    fn multipolar_expansion() {
        let contacts = Electrode::cuff_multipolar(MultipolarCuffGeometry {
            cuff: CuffGeometry::new("CUFF_MP", 100.0, 0.0),
            num_contacts: 4,
            contact_width: None,
        });

        let labels: Vec<_> = contacts.iter().filter_map(|e| e.label()).collect();
        assert_eq!(labels, vec!["CUFF_MP_0", "CUFF_MP_1", "CUFF_MP_2", "CUFF_MP_3"]);

        assert_eq!(contacts[0].model_parameters().len(), 3);
        assert!(contacts[1].model_parameters().is_empty());
        assert!(!electrodes_overlap(&contacts[0], &contacts[1]));
    }

    #[test]
    fn overlap_checks() {
        let cuff_a = Electrode::cuff(CuffGeometry::new("A", 100.0, 0.0));
        let cuff_b = Electrode::cuff(CuffGeometry::new("B", 100.0, 99.0));
        let cuff_c = Electrode::cuff(CuffGeometry::new("C", 100.0, 100.0));
        assert!(electrodes_overlap(&cuff_a, &cuff_b));
        assert!(!electrodes_overlap(&cuff_a, &cuff_c));

        let life_a = Electrode::life(life("LA", 0.0, 0.0));
        let life_b = Electrode::life(life("LB", 200.0, 10.0));
        let life_c = Electrode::life(life("LC", 200.0, 30.0));
        assert!(electrodes_overlap(&life_a, &life_b));
        assert!(!electrodes_overlap(&life_a, &life_c));

        assert!(!electrodes_overlap(&cuff_a, &life_a));
        let point = Electrode::point_source(0.0, 0.0, 0.0);
        assert!(!electrodes_overlap(&point, &point.clone()));
    }
}
