use std::ops::Range;

pub fn get_partition_range(num_parts: usize, part_id: usize, num_items: usize) -> Range<usize> {
    let min_partition_size = num_items / num_parts;
    let remainder = num_items % num_parts;

    if part_id < remainder {
        let partition_size = min_partition_size + 1;
        let start = partition_size * part_id;
        let end = start + partition_size;
        Range { start, end }
    } else {
        let start =
            (min_partition_size + 1) * remainder + min_partition_size * (part_id - remainder);
        let end = start + min_partition_size;
        Range { start, end }
    }
}

/// Evenly spaced samples over `[start, stop]`, both ends included.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            let mut result: Vec<f64> = (0..num).map(|k| start + k as f64 * step).collect();
            result[num - 1] = stop;
            result
        }
    }
}

pub fn round_significant(value: f64, digits: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }

    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(digits - 1 - magnitude);
    (value * factor).round() / factor
}

/// Smallest positive gap between consecutive samples.
pub fn min_step(t: &[f64]) -> Option<f64> {
    t.windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|step| *step > 0.0)
        .min_by(|a, b| a.total_cmp(b))
}

#[cfg(test)]
pub mod test_util {
    use float_cmp::{assert_approx_eq, ApproxEq};
    use std::fmt::Debug;

    pub fn assert_approx_eq_slice<T>(left: &[T], right: &[T])
    where
        T: ApproxEq + Debug + Copy,
    {
        assert_eq!(left.len(), right.len());

        for item in left.iter().zip(right) {
            assert_approx_eq!(T, *item.0, *item.1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::assert_approx_eq_slice;
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn partition_range() {
        assert_eq!(get_partition_range(1, 0, 11), Range { start: 0, end: 11 });

        assert_eq!(get_partition_range(2, 0, 11), Range { start: 0, end: 6 });
        assert_eq!(get_partition_range(2, 1, 11), Range { start: 6, end: 11 });

        assert_eq!(get_partition_range(3, 0, 11), Range { start: 0, end: 4 });
        assert_eq!(get_partition_range(3, 1, 11), Range { start: 4, end: 8 });
        assert_eq!(get_partition_range(3, 2, 11), Range { start: 8, end: 11 });

        for i in 0..11 {
            assert_eq!(
                get_partition_range(11, i, 11),
                Range {
                    start: i,
                    end: i + 1
                }
            );
        }

        assert_eq!(get_partition_range(4, 0, 13), Range { start: 0, end: 4 });
        assert_eq!(get_partition_range(4, 1, 13), Range { start: 4, end: 7 });
        assert_eq!(get_partition_range(4, 2, 13), Range { start: 7, end: 10 });
        assert_eq!(get_partition_range(4, 3, 13), Range { start: 10, end: 13 });

        // more parts than items: trailing parts are empty
        assert_eq!(get_partition_range(4, 1, 2), Range { start: 1, end: 2 });
        assert!(get_partition_range(4, 3, 2).is_empty());
    }

    #[test]
    fn linspace_bounds() {
        assert!(linspace(0.0, 1.0, 0).is_empty());
        assert_approx_eq_slice(&linspace(2.0, 5.0, 1), &[2.0]);
        assert_approx_eq_slice(&linspace(0.0, 1.0, 5), &[0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_approx_eq_slice(&linspace(1.0, 0.0, 3), &[1.0, 0.5, 0.0]);
    }

    #[test]
    fn significant_rounding() {
        assert_approx_eq!(f64, round_significant(0.0123456, 5), 0.012346);
        assert_approx_eq!(f64, round_significant(123456.0, 3), 123000.0);
        assert_approx_eq!(f64, round_significant(-0.004999999, 3), -0.005);
        assert_approx_eq!(f64, round_significant(0.0, 5), 0.0);
    }

    #[test]
    fn smallest_step() {
        assert_eq!(min_step(&[]), None);
        assert_eq!(min_step(&[1.0]), None);
        assert_approx_eq!(f64, min_step(&[0.0, 1.0, 1.25, 3.0]).unwrap(), 0.25);
        assert_approx_eq!(f64, min_step(&[0.0, 1.0, 1.0, 3.0]).unwrap(), 1.0);
    }
}
