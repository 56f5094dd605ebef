use serde::{Deserialize, Serialize};

use crate::material::Material;

const DEFAULT_PERINEURIUM_RATIO: f64 = 0.03;

#[derive(Debug, Clone, PartialEq)]
pub enum Medium {
    Analytical(Material),
    FiniteElement(FiniteElementMedium),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiniteElementMedium {
    pub endoneurium: Material,
    pub perineurium: Material,
    pub epineurium: Material,
    pub external: Material,
    pub geometry: NerveGeometry,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NerveGeometry {
    /// Outer box diameter, in mm.
    pub outer_diameter: Option<f64>,
    pub nerve: Option<NerveShape>,
    pub fascicles: Vec<FascicleGeometry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NerveShape {
    pub diameter: f64,
    pub length: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FascicleGeometry {
    pub id: Option<usize>,
    pub diameter: f64,
    pub y: f64,
    pub z: f64,
    pub perineurium_thickness: Option<f64>,
}

impl FascicleGeometry {
    pub fn perineurium_thickness(&self) -> f64 {
        self.perineurium_thickness
            .unwrap_or(DEFAULT_PERINEURIUM_RATIO * self.diameter)
    }
}

impl FiniteElementMedium {
    /// Geometry and conductivity assignments, in the order a solver expects
    /// them before meshing.
    pub fn model_parameters(&self) -> Vec<(String, String)> {
        let mut parameters = Vec::new();
        let mut push = |name: String, value: String| parameters.push((name, value));

        if let Some(outer_diameter) = self.geometry.outer_diameter {
            push("Outer_D".to_string(), format!("{}[mm]", outer_diameter));
        }

        if let Some(nerve) = &self.geometry.nerve {
            push("Nerve_D".to_string(), um(nerve.diameter));
            push("Length".to_string(), um(nerve.length));
            push("Nerve_y_c".to_string(), um(nerve.y));
            push("Nerve_z_c".to_string(), um(nerve.z));
        }

        for fascicle in &self.geometry.fascicles {
            let prefix = match fascicle.id {
                Some(id) => format!("Fascicle_{}", id),
                None => "Fascicle".to_string(),
            };
            push(format!("{}_D", prefix), um(fascicle.diameter));
            push(format!("{}_y_c", prefix), um(fascicle.y));
            push(format!("{}_z_c", prefix), um(fascicle.z));
            push(
                "Perineurium_thickness".to_string(),
                um(fascicle.perineurium_thickness()),
            );
        }

        push(
            "Outer_conductivity".to_string(),
            siemens(self.external.sigma_axes()[0]),
        );
        push(
            "Epineurium_conductivity".to_string(),
            siemens(self.epineurium.sigma_axes()[0]),
        );
        push(
            "Perineurium_conductivity".to_string(),
            siemens(self.perineurium.sigma_axes()[0]),
        );

        let [xx, yy, zz] = self.endoneurium.sigma_axes();
        push("Endoneurium_conductivity_xx".to_string(), siemens(xx));
        push("Endoneurium_conductivity_yy".to_string(), siemens(yy));
        push("Endoneurium_conductivity_zz".to_string(), siemens(zz));

        parameters
    }
}

fn um(value: f64) -> String {
    format!("{}[um]", value)
}

fn siemens(value: f64) -> String {
    format!("{}[S/m]", value)
}
