//! Constant-velocity Kalman filter over XYAH boxes.
//!
//! State is `[cx, cy, a, h, vcx, vcy, va, vh]`; measurements are the first
//! four components.

use ndarray::{Array1, Array2};

const NDIM: usize = 4;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f64>,
    update_mat: Array2<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Square diagonal matrix of the squared standard deviations.
fn diag_squared(std: &[f64]) -> Array2<f64> {
    Array2::from_diag(&Array1::from_iter(std.iter().map(|s| s * s)))
}

impl KalmanFilter {
    pub fn new() -> Self {
        let mut motion_mat = Array2::eye(2 * NDIM);
        for i in 0..NDIM {
            motion_mat[[i, NDIM + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((NDIM, 2 * NDIM));
        for i in 0..NDIM {
            update_mat[[i, i]] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Start a track from an unassociated measurement.
    pub fn initiate(&self, measurement: [f64; 4]) -> (Array1<f64>, Array2<f64>) {
        let mut mean = Array1::zeros(2 * NDIM);
        mean.slice_mut(ndarray::s![..NDIM])
            .assign(&Array1::from_vec(measurement.to_vec()));

        let h = measurement[3];
        let pos = 2.0 * self.std_weight_position * h;
        let vel = 10.0 * self.std_weight_velocity * h;
        let covariance = diag_squared(&[pos, pos, 1e-2, pos, vel, vel, 1e-5, vel]);

        (mean, covariance)
    }

    pub fn predict(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let h = mean[3];
        let pos = self.std_weight_position * h;
        let vel = self.std_weight_velocity * h;
        let motion_cov = diag_squared(&[pos, pos, 1e-2, pos, vel, vel, 1e-5, vel]);

        let mean = self.motion_mat.dot(mean);
        let covariance = self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + motion_cov;
        (mean, covariance)
    }

    /// Project the state distribution into measurement space.
    fn project(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let pos = self.std_weight_position * mean[3];
        let innovation_cov = diag_squared(&[pos, pos, 1e-1, pos]);

        let mean = self.update_mat.dot(mean);
        let covariance =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + innovation_cov;
        (mean, covariance)
    }

    /// Correct the state with a new measurement.
    ///
    /// Returns `None` when the projected covariance is singular, in which
    /// case callers keep the predicted state.
    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: [f64; 4],
    ) -> Option<(Array1<f64>, Array2<f64>)> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P * H^T * S^-1
        let s_inv = invert_4x4(&projected_cov)?;
        let kalman_gain = covariance.dot(&self.update_mat.t()).dot(&s_inv);

        let mean = mean + kalman_gain.dot(&innovation);
        let covariance = covariance - kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());
        Some((mean, covariance))
    }
}

/// Invert a 4x4 matrix with nalgebra, avoiding a BLAS/LAPACK dependency.
fn invert_4x4(m: &Array2<f64>) -> Option<Array2<f64>> {
    let nm = nalgebra::Matrix4::from_fn(|i, j| m[[i, j]]);
    let inv = nm.try_inverse()?;
    Some(Array2::from_shape_fn((NDIM, NDIM), |(i, j)| inv[(i, j)]))
}
