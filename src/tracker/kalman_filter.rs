//! Constant-velocity Kalman filter over `(cx, cy, w, h)` boxes, using ndarray for
//! the state algebra and nalgebra for the 4x4 innovation inverse.
//!
//! State layout: `[cx, cy, w, h, vx, vy, vw, vh]`. Position and size evolve
//! linearly, velocities persist. Noise is scaled by the box extent so that large
//! and small objects get comparable relative uncertainty.

use ndarray::{Array1, Array2};

use crate::error::FilterError;

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

    /// Create a track state from an unassociated measurement. Velocities start at zero.
    pub fn initiate(&self, measurement: [f64; 4]) -> (Array1<f64>, Array2<f64>) {
        let mut mean = Array1::zeros(2 * NDIM);
        for i in 0..NDIM {
            mean[i] = measurement[i];
        }

        let (w, h) = (measurement[2], measurement[3]);
        let pos = 2.0 * self.std_weight_position;
        let vel = 10.0 * self.std_weight_velocity;
        let std = [
            pos * w,
            pos * h,
            pos * w,
            pos * h,
            vel * w,
            vel * h,
            vel * w,
            vel * h,
        ];

        (mean, diag(&std))
    }

    /// Advance the state one time-step. Covariance grows by the process noise,
    /// so a track that keeps coasting becomes progressively less certain.
    pub fn predict(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let (w, h) = (mean[2], mean[3]);
        let pos = self.std_weight_position;
        let vel = self.std_weight_velocity;
        let std = [
            pos * w,
            pos * h,
            pos * w,
            pos * h,
            vel * w,
            vel * h,
            vel * w,
            vel * h,
        ];
        let motion_cov = diag(&std);

        let new_mean = self.motion_mat.dot(mean);
        let new_covariance = self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + motion_cov;

        (new_mean, new_covariance)
    }

    /// Project the state distribution into measurement space.
    pub fn project(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let (w, h) = (mean[2], mean[3]);
        let pos = self.std_weight_position;
        let innovation_cov = diag(&[pos * w, pos * h, pos * w, pos * h]);

        let mean_proj = self.update_mat.dot(mean);
        let covariance_proj =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + innovation_cov;

        (mean_proj, covariance_proj)
    }

    /// Correct the state toward an observed `(cx, cy, w, h)` measurement.
    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: [f64; 4],
    ) -> Result<(Array1<f64>, Array2<f64>), FilterError> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);

        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P * H^T * S^-1, with H = [I 0] so P * H^T is the first four columns of P.
        let s_inv = invert_4x4(&projected_cov)?;
        let pht = covariance.dot(&self.update_mat.t());
        let kalman_gain = pht.dot(&s_inv);

        let new_mean = mean + &kalman_gain.dot(&innovation);
        let new_covariance = covariance - &kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());

        Ok((new_mean, new_covariance))
    }
}

fn diag(std: &[f64]) -> Array2<f64> {
    let mut m = Array2::zeros((std.len(), std.len()));
    for (i, s) in std.iter().enumerate() {
        m[[i, i]] = s * s;
    }
    m
}

/// Invert a 4x4 matrix using nalgebra (pure Rust, no BLAS/LAPACK).
fn invert_4x4(m: &Array2<f64>) -> Result<Array2<f64>, FilterError> {
    let nm = nalgebra::Matrix4::from_fn(|i, j| m[[i, j]]);
    let inv = nm.try_inverse().ok_or(FilterError::SingularInnovation)?;
    Ok(Array2::from_shape_fn((4, 4), |(i, j)| inv[(i, j)]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_initiate() {
        let kf = KalmanFilter::new();
        let (mean, cov) = kf.initiate([100.0, 200.0, 40.0, 50.0]);
        assert_eq!(mean[0], 100.0);
        assert_eq!(mean[3], 50.0);
        assert_eq!(mean[5], 0.0);
        assert!(cov[[1, 1]] > 0.0);
    }

    #[test]
    fn test_predict_constant_velocity() {
        let kf = KalmanFilter::new();
        let (mut mean, cov) = kf.initiate([100.0, 100.0, 40.0, 40.0]);
        mean[5] = 20.0;
        let (predicted, predicted_cov) = kf.predict(&mean, &cov);
        assert_abs_diff_eq!(predicted[1], 120.0, epsilon = 1e-9);
        assert_abs_diff_eq!(predicted[5], 20.0, epsilon = 1e-9);
        assert!(predicted_cov[[1, 1]] > cov[[1, 1]]);
    }

    #[test]
    fn test_update_moves_toward_measurement() {
        let kf = KalmanFilter::new();
        let (mean, cov) = kf.initiate([100.0, 100.0, 40.0, 40.0]);
        let (mean, cov) = kf.predict(&mean, &cov);
        let (updated, _) = kf.update(&mean, &cov, [100.0, 120.0, 40.0, 40.0]).unwrap();
        assert!(updated[1] > 100.0 && updated[1] <= 120.0);
        assert!(updated[5] > 0.0);
    }

    #[test]
    fn test_learns_velocity() {
        let kf = KalmanFilter::new();
        let (mut mean, mut cov) = kf.initiate([50.0, 100.0, 60.0, 60.0]);
        for step in 1..=10 {
            let (m, c) = kf.predict(&mean, &cov);
            let (m, c) = kf.update(&m, &c, [50.0, 100.0 + 20.0 * step as f64, 60.0, 60.0]).unwrap();
            mean = m;
            cov = c;
        }
        assert_abs_diff_eq!(mean[5], 20.0, epsilon = 2.5);
        assert_abs_diff_eq!(mean[1], 300.0, epsilon = 2.0);
    }

    #[test]
    fn test_singular_innovation_is_an_error() {
        let kf = KalmanFilter::new();
        let mean = Array1::zeros(8);
        let cov = Array2::zeros((8, 8));
        assert!(kf.update(&mean, &cov, [0.0; 4]).is_err());
    }
}
