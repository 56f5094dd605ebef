use serde::{Deserialize, Serialize};
use simple_error::{SimpleError, SimpleResult};

/// Spatial evaluation points in µm, stored as parallel coordinate arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Points {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
}

impl Points {
    pub fn new(x: Vec<f64>, y: Vec<f64>, z: Vec<f64>) -> SimpleResult<Self> {
        if x.len() != y.len() || x.len() != z.len() {
            return Err(SimpleError::new(format!(
                "coordinate arrays differ in length: x {}, y {}, z {}",
                x.len(),
                y.len(),
                z.len()
            )));
        }

        Ok(Self { x, y, z })
    }

    /// Points of a fiber running along the x axis at `(y, z)`.
    pub fn along_x(x: Vec<f64>, y: f64, z: f64) -> Self {
        let num_points = x.len();
        Self {
            x,
            y: vec![y; num_points],
            z: vec![z; num_points],
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, f64, f64)> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((x, y), z)| (*x, *y, *z))
    }
}

/// Rotates `(y, z)` around `center` in the transverse plane.
pub fn rotate_transverse(y: f64, z: f64, angle: f64, center: (f64, f64)) -> (f64, f64) {
    let (sin, cos) = angle.sin_cos();
    let dy = y - center.0;
    let dz = z - center.1;
    (
        center.0 + dy * cos - dz * sin,
        center.1 + dy * sin + dz * cos,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn mismatched_lengths() {
        let result = Points::new(vec![0.0, 1.0], vec![0.0], vec![0.0, 0.0]);
        assert_eq!(
            result.unwrap_err().as_str(),
            "coordinate arrays differ in length: x 2, y 1, z 2"
        );
    }

    #[test]
    fn fiber_along_x() {
        let points = Points::along_x(vec![0.0, 10.0, 20.0], 5.0, -3.0);
        assert_eq!(points.len(), 3);
        assert_eq!(points.iter().nth(2), Some((20.0, 5.0, -3.0)));
    }

    #[test]
    fn quarter_turn() {
        let (y, z) = rotate_transverse(2.0, 1.0, FRAC_PI_2, (1.0, 1.0));
        assert_approx_eq!(f64, y, 1.0, epsilon = 1e-12);
        assert_approx_eq!(f64, z, 2.0, epsilon = 1e-12);
    }
}
