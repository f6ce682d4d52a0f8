/// Smallest value and its index; `None` for an empty slice or when a NaN is present.
pub fn vector_min(values: &[f64]) -> Option<(usize, f64)> {
    extremum(values, |candidate, best| candidate < best)
}

/// Largest value and its index; `None` for an empty slice or when a NaN is present.
pub fn vector_max(values: &[f64]) -> Option<(usize, f64)> {
    extremum(values, |candidate, best| candidate > best)
}

fn extremum(values: &[f64], better: impl Fn(f64, f64) -> bool) -> Option<(usize, f64)> {
    let mut iter = values.iter().copied().enumerate();
    let (mut best_index, mut best) = iter.next()?;
    if best.is_nan() {
        return None;
    }
    for (index, value) in iter {
        if value.is_nan() {
            return None;
        }
        if better(value, best) {
            best = value;
            best_index = index;
        }
    }
    Some((best_index, best))
}

/// Reverse the element order in place.
pub fn vector_invert(values: &mut [f64]) {
    values.reverse();
}

/// Index `i` of the interval `[grid[i], grid[i+1]]` holding `target` in an
/// ascending grid, clamped to the first/last interval.
pub fn vector_locate(grid: &[f64], target: f64) -> Option<usize> {
    if grid.len() < 2 {
        return None;
    }
    let upper = grid
        .partition_point(|value| *value <= target)
        .clamp(1, grid.len() - 1);
    Some(upper - 1)
}

/// Index of the grid value closest to `target` in an ascending grid.
pub fn vector_nearest(grid: &[f64], target: f64) -> Option<usize> {
    let lower = match grid.len() {
        0 => return None,
        1 => return Some(0),
        _ => vector_locate(grid, target)?,
    };
    if (target - grid[lower]).abs() <= (grid[lower + 1] - target).abs() {
        Some(lower)
    } else {
        Some(lower + 1)
    }
}

pub fn is_strictly_increasing(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[1] > pair[0])
}

/// First index at which an ascending sequence stops increasing.
pub fn first_non_increasing(values: &[f64]) -> Option<usize> {
    values
        .windows(2)
        .position(|pair| pair[1] <= pair[0] || !pair[1].is_finite())
        .map(|index| index + 1)
}

pub fn vector_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn vector_norm(values: &[f64]) -> f64 {
    values.iter().map(|value| value * value).sum::<f64>().sqrt()
}

pub fn dot(lhs: &[f64], rhs: &[f64]) -> f64 {
    lhs.iter().zip(rhs).map(|(a, b)| a * b).sum()
}

#[cfg(test)]
mod tests {
    use super::{
        first_non_increasing, is_strictly_increasing, vector_invert, vector_locate, vector_max,
        vector_mean, vector_min, vector_nearest,
    };

    #[test]
    fn extrema_report_value_and_index() {
        let values = [3.0, -1.0, 7.5, 7.5, 0.0];
        assert_eq!(vector_min(&values), Some((1, -1.0)));
        assert_eq!(vector_max(&values), Some((2, 7.5)));
        assert_eq!(vector_min(&[]), None);
        assert_eq!(vector_max(&[1.0, f64::NAN]), None);
    }

    #[test]
    fn invert_reverses_in_place() {
        let mut values = [1.0, 2.0, 3.0];
        vector_invert(&mut values);
        assert_eq!(values, [3.0, 2.0, 1.0]);
    }

    #[test]
    fn locate_clamps_to_edge_intervals() {
        let grid = [0.0, 1.0, 2.0, 4.0];
        assert_eq!(vector_locate(&grid, -3.0), Some(0));
        assert_eq!(vector_locate(&grid, 1.0), Some(1));
        assert_eq!(vector_locate(&grid, 3.9), Some(2));
        assert_eq!(vector_locate(&grid, 10.0), Some(2));
        assert_eq!(vector_nearest(&grid, 3.2), Some(3));
        assert_eq!(vector_nearest(&grid, 2.9), Some(2));
    }

    #[test]
    fn monotonicity_helpers_agree() {
        assert!(is_strictly_increasing(&[1.0, 2.0, 3.5]));
        assert!(!is_strictly_increasing(&[1.0, 1.0]));
        assert_eq!(first_non_increasing(&[1.0, 2.0, 1.5, 3.0]), Some(2));
        assert_eq!(first_non_increasing(&[1.0, 2.0]), None);
        assert_eq!(vector_mean(&[1.0, 2.0, 6.0]), Some(3.0));
    }
}
