use std::f64::consts::PI;
use std::fs;

use serde::{Deserialize, Serialize};
use simple_error::{try_with, SimpleError, SimpleResult};

use crate::types::HashMap;

const VACUUM_PERMITTIVITY: f64 = 8.854_187_812_8e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Conductivity {
    Isotropic(f64),
    Anisotropic { xx: f64, yy: f64, zz: f64 },
}

/// Conductive medium, conductivities in S/m.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub conductivity: Conductivity,
    pub relative_permittivity: Option<f64>,
    pub frequency: Option<f64>,
}

impl Material {
    pub fn isotropic(name: &str, sigma: f64) -> Self {
        Self {
            name: name.to_string(),
            conductivity: Conductivity::Isotropic(sigma),
            relative_permittivity: None,
            frequency: None,
        }
    }

    pub fn anisotropic(name: &str, xx: f64, yy: f64, zz: f64) -> Self {
        Self {
            name: name.to_string(),
            conductivity: Conductivity::Anisotropic { xx, yy, zz },
            relative_permittivity: None,
            frequency: None,
        }
    }

    pub fn is_isotropic(&self) -> bool {
        matches!(self.conductivity, Conductivity::Isotropic(_))
    }

    /// Effective conductivities along x, y and z.
    pub fn sigma_axes(&self) -> [f64; 3] {
        match self.conductivity {
            Conductivity::Isotropic(sigma) => [self.effective(sigma); 3],
            Conductivity::Anisotropic { xx, yy, zz } => {
                [self.effective(xx), self.effective(yy), self.effective(zz)]
            }
        }
    }

    // |sigma + j 2 pi f eps0 eps_r|, plain sigma for purely conductive media
    fn effective(&self, sigma: f64) -> f64 {
        match (self.relative_permittivity, self.frequency) {
            (Some(epsilon_r), Some(freq)) => {
                let susceptance = 2.0 * PI * freq * VACUUM_PERMITTIVITY * epsilon_r;
                sigma.hypot(susceptance)
            }
            _ => sigma,
        }
    }
}

pub fn validate_material(material: &Material) -> Result<(), SimpleError> {
    let all_positive = material
        .sigma_axes()
        .iter()
        .all(|sigma| sigma.is_finite() && *sigma > 0.0);

    if !all_positive {
        return Err(SimpleError::new(format!(
            "conductivity of material {} must be strictly positive",
            material.name
        )));
    }

    Ok(())
}

/// Built-in media by name.
pub fn library_material(name: &str) -> Option<Material> {
    let material = match name {
        "endoneurium_ranck" => Material::anisotropic(name, 0.571, 0.0826, 0.0826),
        "endoneurium_bhadra" => Material::anisotropic(name, 0.57, 0.083, 0.083),
        "perineurium" => Material::isotropic(name, 0.0021),
        "epineurium" => Material::isotropic(name, 0.085),
        "saline" => Material::isotropic(name, 2.0),
        _ => return None,
    };

    Some(material)
}

/// Looks `name` up in the library, otherwise reads it as a `.mat` file path.
pub fn load_material(name: &str) -> SimpleResult<Material> {
    if let Some(material) = library_material(name) {
        return Ok(material);
    }

    let content = try_with!(fs::read_to_string(name), "cannot read material file {}", name);
    parse_material(name, &content)
}

/// Parses the `key value` lines of a `.mat` file.
pub fn parse_material(default_name: &str, content: &str) -> SimpleResult<Material> {
    let mut entries = HashMap::default();

    for line in content.lines().filter(|line| !line.trim().is_empty()) {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(key), Some(value), None) => {
                entries.insert(key, value);
            }
            _ => {
                return Err(SimpleError::new(format!(
                    "malformed material line: {}",
                    line.trim()
                )))
            }
        }
    }

    let number = |key: &str| -> SimpleResult<Option<f64>> {
        match entries.get(key) {
            Some(value) => Ok(Some(try_with!(
                value.parse::<f64>(),
                "invalid value for {}",
                key
            ))),
            None => Ok(None),
        }
    };

    let name = entries.get("name").copied().unwrap_or(default_name);

    let conductivity = match (number("sigma_xx")?, number("sigma_yy")?, number("sigma_zz")?) {
        (Some(xx), Some(yy), Some(zz)) => Conductivity::Anisotropic { xx, yy, zz },
        _ => match number("sigma")? {
            Some(sigma) => Conductivity::Isotropic(sigma),
            None => {
                return Err(SimpleError::new(format!(
                    "material {} defines no conductivity",
                    name
                )))
            }
        },
    };

    Ok(Material {
        name: name.to_string(),
        conductivity,
        relative_permittivity: number("epsilon_r")?,
        frequency: None,
    })
}
