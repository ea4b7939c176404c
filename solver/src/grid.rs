//! Grid indexer: rectilinear N-dimensional grids and index conversions.
//!
//! A [`Grid`] is an ordered list of strictly increasing 1-D coordinate axes.
//! Two index spaces are defined over it:
//!
//! | Index | Range per dimension | Meaning |
//! |-------|---------------------|---------|
//! | grid index | `0..n_d` | a grid node |
//! | bin index | `0..=n_d` | a cell between nodes, plus under/overflow |
//!
//! Bin `b` along an axis `g` holds the values `g[b-1] <= v < g[b]`: bin 0 is
//! below the first node and bin `n_d` is at or above the last node. A cell's
//! *corners* are the nodes `b-1` and `b` in every dimension, minus the ones
//! that fall off the grid.
//!
//! Multi-dimensional indices are stored flattened in row-major (C) order via
//! [`flatten`] / [`unflatten`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, ViabilityError};

/// Row-major linearization of `index` over `shape`.
///
/// The last dimension varies fastest. `index[d] < shape[d]` is a precondition.
#[inline]
pub fn flatten(index: &[usize], shape: &[usize]) -> usize {
    debug_assert_eq!(index.len(), shape.len());
    index
        .iter()
        .zip(shape)
        .fold(0usize, |flat, (&i, &n)| {
            debug_assert!(i < n, "index {i} out of range for extent {n}");
            flat * n + i
        })
}

/// Inverse of [`flatten`].
#[inline]
pub fn unflatten(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0usize; shape.len()];
    for (slot, &n) in index.iter_mut().zip(shape).rev() {
        *slot = flat % n;
        flat /= n;
    }
    index
}

/// Number of elements of an array with the given shape.
#[inline]
pub fn num_elements(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// `num` evenly spaced values over `[start, stop]`, endpoints included.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Append the flat indices (over `shape`) of the in-range corners of `bin`
/// to `out`, in the order of [`Grid::corners`].
pub(crate) fn push_corners(bin: &[usize], shape: &[usize], out: &mut Vec<usize>) {
    let ndim = bin.len();
    'corner: for mask in 0..(1usize << ndim) {
        let mut flat = 0;
        for (dim, (&b, &n)) in bin.iter().zip(shape).enumerate() {
            let upper = (mask >> (ndim - 1 - dim)) & 1 == 1;
            let idx = if upper { Some(b) } else { b.checked_sub(1) };
            let i = match idx {
                Some(i) if i < n => i,
                _ => continue 'corner,
            };
            flat = flat * n + i;
        }
        out.push(flat);
    }
}

/// An immutable rectilinear grid: one strictly increasing axis per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct Grid {
    axes: Vec<Vec<f64>>,
}

impl Grid {
    /// Validate and build a grid from its axes.
    ///
    /// Fails on zero dimensions, an empty axis, a non-finite coordinate, or
    /// an axis that is not strictly increasing.
    pub fn new(axes: Vec<Vec<f64>>) -> Result<Self> {
        if axes.is_empty() {
            return Err(ViabilityError::EmptyGrid);
        }
        for (dim, axis) in axes.iter().enumerate() {
            if axis.is_empty() {
                return Err(ViabilityError::EmptyAxis { dim });
            }
            for (index, &value) in axis.iter().enumerate() {
                if !value.is_finite() {
                    return Err(ViabilityError::NonFiniteCoordinate { dim, index, value });
                }
                if index > 0 && axis[index - 1] >= value {
                    return Err(ViabilityError::NonMonotonicAxis {
                        dim,
                        index,
                        prev: axis[index - 1],
                        value,
                    });
                }
            }
        }
        Ok(Self { axes })
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.axes.len()
    }

    /// Axis coordinates of dimension `dim`.
    pub fn axis(&self, dim: usize) -> &[f64] {
        &self.axes[dim]
    }

    pub fn axes(&self) -> &[Vec<f64>] {
        &self.axes
    }

    /// Node count per dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(Vec::len).collect()
    }

    /// Bin count per dimension (`n_d + 1`, including the overflow bin).
    pub fn bin_shape(&self) -> Vec<usize> {
        self.axes.iter().map(|a| a.len() + 1).collect()
    }

    /// Total number of grid nodes.
    pub fn num_points(&self) -> usize {
        num_elements(&self.shape())
    }

    /// Coordinates of the node with row-major flat index `flat`.
    pub fn point(&self, flat: usize) -> Vec<f64> {
        unflatten(flat, &self.shape())
            .into_iter()
            .zip(&self.axes)
            .map(|(i, axis)| axis[i])
            .collect()
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len != self.ndim() {
            return Err(ViabilityError::DimensionMismatch {
                expected: self.ndim(),
                actual: len,
            });
        }
        Ok(())
    }

    /// Bin index of `point`: per dimension, the number of nodes `<= v`.
    pub fn digitize(&self, point: &[f64]) -> Result<Vec<usize>> {
        self.check_len(point.len())?;
        Ok(point
            .iter()
            .zip(&self.axes)
            .map(|(&v, axis)| axis.partition_point(|&g| g <= v))
            .collect())
    }

    /// Grid index of the closest node per dimension; ties go to the lower index.
    pub fn nearest(&self, point: &[f64]) -> Result<Vec<usize>> {
        self.check_len(point.len())?;
        Ok(point
            .iter()
            .zip(&self.axes)
            .map(|(&v, axis)| {
                let upper = axis.partition_point(|&g| g < v);
                if upper == 0 {
                    0
                } else if upper == axis.len() {
                    axis.len() - 1
                } else if (v - axis[upper - 1]).abs() <= (axis[upper] - v).abs() {
                    upper - 1
                } else {
                    upper
                }
            })
            .collect())
    }

    /// True iff every coordinate of `point` equals a node coordinate exactly.
    pub fn contains_node(&self, point: &[f64]) -> Result<bool> {
        self.check_len(point.len())?;
        Ok(point.iter().zip(&self.axes).all(|(&v, axis)| {
            let i = axis.partition_point(|&g| g < v);
            i < axis.len() && axis[i] == v
        }))
    }

    /// In-range grid indices of the `2^D` corners around bin `bin`.
    ///
    /// Corners are enumerated with the first dimension varying slowest and
    /// the lower neighbour first. Returns an empty list when no corner lies
    /// on the grid.
    pub fn corners(&self, bin: &[usize]) -> Result<Vec<Vec<usize>>> {
        self.check_len(bin.len())?;
        let shape = self.shape();
        let mut flat = Vec::with_capacity(1 << self.ndim());
        push_corners(bin, &shape, &mut flat);
        Ok(flat.into_iter().map(|f| unflatten(f, &shape)).collect())
    }

    /// A representative state for bin `bin`: the right-closest node, or the
    /// last node for the overflow bin.
    pub fn bin_to_state(&self, bin: &[usize]) -> Result<Vec<f64>> {
        self.check_len(bin.len())?;
        Ok(bin
            .iter()
            .zip(&self.axes)
            .map(|(&b, axis)| axis[b.min(axis.len() - 1)])
            .collect())
    }
}

impl TryFrom<Vec<Vec<f64>>> for Grid {
    type Error = ViabilityError;

    fn try_from(axes: Vec<Vec<f64>>) -> Result<Self> {
        Grid::new(axes)
    }
}

impl From<Grid> for Vec<Vec<f64>> {
    fn from(grid: Grid) -> Self {
        grid.axes
    }
}

/// State grid and action grid of one problem.
///
/// Every Q-space array has shape `states.shape() ++ actions.shape()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grids {
    pub states: Grid,
    pub actions: Grid,
}

impl Grids {
    pub fn new(states: Grid, actions: Grid) -> Self {
        Self { states, actions }
    }

    /// Shape of every state-action array.
    pub fn q_shape(&self) -> Vec<usize> {
        let mut shape = self.states.shape();
        shape.extend(self.actions.shape());
        shape
    }

    /// Number of state-action grid points.
    pub fn num_points(&self) -> usize {
        self.states.num_points() * self.actions.num_points()
    }

    /// Concatenated state and action coordinates of Q-space point `flat`.
    ///
    /// Flat indices follow the row-major order of [`Grids::q_shape`]: state
    /// dimensions outermost in declared order, action dimensions innermost.
    pub fn state_action(&self, flat: usize) -> Vec<f64> {
        let n_actions = self.actions.num_points();
        let mut point = self.states.point(flat / n_actions);
        point.extend(self.actions.point(flat % n_actions));
        point
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_1d(axis: &[f64]) -> Grid {
        Grid::new(vec![axis.to_vec()]).unwrap()
    }

    #[test]
    fn test_rejects_bad_axes() {
        assert!(matches!(Grid::new(vec![]), Err(ViabilityError::EmptyGrid)));
        assert!(matches!(
            Grid::new(vec![vec![0.0], vec![]]),
            Err(ViabilityError::EmptyAxis { dim: 1 })
        ));
        assert!(matches!(
            Grid::new(vec![vec![0.0, 1.0, 1.0]]),
            Err(ViabilityError::NonMonotonicAxis { dim: 0, index: 2, .. })
        ));
        assert!(matches!(
            Grid::new(vec![vec![0.0, f64::NAN]]),
            Err(ViabilityError::NonFiniteCoordinate { dim: 0, index: 1, .. })
        ));
    }

    #[test]
    fn test_digitize_matches_ascending_bins() {
        let g = grid_1d(&[0.0, 1.0, 2.0]);
        assert_eq!(g.digitize(&[-0.5]).unwrap(), vec![0]);
        assert_eq!(g.digitize(&[0.0]).unwrap(), vec![1]);
        assert_eq!(g.digitize(&[0.5]).unwrap(), vec![1]);
        assert_eq!(g.digitize(&[1.0]).unwrap(), vec![2]);
        assert_eq!(g.digitize(&[2.0]).unwrap(), vec![3]);
        assert_eq!(g.digitize(&[7.0]).unwrap(), vec![3]);
    }

    #[test]
    fn test_digitize_dimension_mismatch() {
        let g = grid_1d(&[0.0, 1.0]);
        assert!(matches!(
            g.digitize(&[0.0, 1.0]),
            Err(ViabilityError::DimensionMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_nearest_ties_to_lower() {
        let g = grid_1d(&[0.0, 1.0, 2.0]);
        assert_eq!(g.nearest(&[0.5]).unwrap(), vec![0]);
        assert_eq!(g.nearest(&[0.51]).unwrap(), vec![1]);
        assert_eq!(g.nearest(&[-3.0]).unwrap(), vec![0]);
        assert_eq!(g.nearest(&[9.0]).unwrap(), vec![2]);
        assert_eq!(g.nearest(&[2.0]).unwrap(), vec![2]);
    }

    #[test]
    fn test_corners_interior_and_edges() {
        let g = Grid::new(vec![vec![0.0, 1.0, 2.0], vec![0.0, 1.0]]).unwrap();
        assert_eq!(
            g.corners(&[1, 1]).unwrap(),
            vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]
        );
        // Below the first node in dim 0: only the upper neighbour survives.
        assert_eq!(g.corners(&[0, 1]).unwrap(), vec![vec![0, 0], vec![0, 1]]);
        // Overflow in dim 1.
        assert_eq!(g.corners(&[2, 2]).unwrap(), vec![vec![1, 1], vec![2, 1]]);
    }

    #[test]
    fn test_corners_empty_when_off_grid() {
        let g = grid_1d(&[0.0, 1.0]);
        assert!(g.corners(&[5]).unwrap().is_empty());
    }

    #[test]
    fn test_contains_node() {
        let g = Grid::new(vec![vec![0.0, 0.5, 1.0], vec![-1.0, 1.0]]).unwrap();
        assert!(g.contains_node(&[0.5, -1.0]).unwrap());
        assert!(!g.contains_node(&[0.5, 0.0]).unwrap());
        assert!(!g.contains_node(&[2.0, 1.0]).unwrap());
    }

    #[test]
    fn test_flatten_row_major() {
        let shape = [2, 3, 4];
        assert_eq!(flatten(&[0, 0, 1], &shape), 1);
        assert_eq!(flatten(&[0, 1, 0], &shape), 4);
        assert_eq!(flatten(&[1, 0, 0], &shape), 12);
        assert_eq!(unflatten(23, &shape), vec![1, 2, 3]);
        for flat in 0..num_elements(&shape) {
            assert_eq!(flatten(&unflatten(flat, &shape), &shape), flat);
        }
    }

    #[test]
    fn test_bin_to_state_clamps_overflow() {
        let g = grid_1d(&[0.0, 1.0, 2.0]);
        assert_eq!(g.bin_to_state(&[0]).unwrap(), vec![0.0]);
        assert_eq!(g.bin_to_state(&[2]).unwrap(), vec![2.0]);
        assert_eq!(g.bin_to_state(&[3]).unwrap(), vec![2.0]);
    }

    #[test]
    fn test_state_action_order() {
        let grids = Grids::new(
            grid_1d(&[0.0, 1.0, 2.0]),
            Grid::new(vec![vec![10.0, 20.0]]).unwrap(),
        );
        assert_eq!(grids.q_shape(), vec![3, 2]);
        assert_eq!(grids.num_points(), 6);
        assert_eq!(grids.state_action(0), vec![0.0, 10.0]);
        assert_eq!(grids.state_action(1), vec![0.0, 20.0]);
        assert_eq!(grids.state_action(2), vec![1.0, 10.0]);
        assert_eq!(grids.state_action(5), vec![2.0, 20.0]);
    }

    #[test]
    fn test_linspace_endpoints() {
        let xs = linspace(0.0, 2.0, 5);
        assert_eq!(xs, vec![0.0, 0.5, 1.0, 1.5, 2.0]);
        assert_eq!(linspace(3.0, 4.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn test_serde_revalidates() {
        let json = "[[0.0, 1.0], [2.0, 1.0]]";
        assert!(serde_json::from_str::<Grid>(json).is_err());
        let g: Grid = serde_json::from_str("[[0.0, 1.0]]").unwrap();
        assert_eq!(g.shape(), vec![2]);
    }
}
