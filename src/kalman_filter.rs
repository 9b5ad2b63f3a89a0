use nalgebra::SMatrix;

/* -----------------------------------------------------------------------------
 * Type aliases
 * ----------------------------------------------------------------------------- */
// 1x4 measurement: (cx, cy, area, aspect)
pub(crate) type DetectBox = SMatrix<f32, 1, 4>;
// 1x7 state: (cx, cy, area, aspect, v_cx, v_cy, v_area)
pub(crate) type StateMean = SMatrix<f32, 1, 7>;
// 7x7
pub(crate) type StateCov = SMatrix<f32, 7, 7>;
// 1x4
pub(crate) type StateHMean = SMatrix<f32, 1, 4>;
// 4x4
pub(crate) type StateHCov = SMatrix<f32, 4, 4>;

/* -----------------------------------------------------------------------------
 * Kalman Filter
 *
 * Constant-velocity filter over box center, area and aspect ratio. The aspect
 * ratio carries no velocity component.
 * ----------------------------------------------------------------------------- */
pub(crate) struct KalmanFilter {
    motion_mat: StateCov,
    update_mat: SMatrix<f32, 4, 7>,
    x: StateMean,
    covariance: StateCov,
}

impl KalmanFilter {
    /// Cold start: zero velocity prior with inflated uncertainty across the
    /// whole state.
    pub(crate) fn new(z: &DetectBox) -> Self {
        let mut covariance = Self::base_covariance();
        covariance *= 10.0;
        Self::from_parts(z, StateMean::zeros(), covariance)
    }

    /// Warm start: velocity prior from the finite difference of two
    /// consecutive measurements, with the tighter covariance of an already
    /// corroborated object.
    pub(crate) fn new_with_velocity(z: &DetectBox, z_before: &DetectBox) -> Self {
        let mut x = StateMean::zeros();
        for i in 0..3 {
            x[(0, i + 4)] = z[(0, i)] - z_before[(0, i)];
        }
        Self::from_parts(z, x, Self::base_covariance())
    }

    fn base_covariance() -> StateCov {
        let mut p = StateCov::identity();
        for i in 4..7 {
            p[(i, i)] *= 10.0;
        }
        p
    }

    fn from_parts(z: &DetectBox, mut x: StateMean, covariance: StateCov) -> Self {
        let mut motion_mat = StateCov::identity();
        for i in 0..3 {
            motion_mat[(i, i + 4)] = 1.0;
        }

        let mut update_mat = SMatrix::<f32, 4, 7>::zeros();
        update_mat[(0, 0)] = 1.0;
        update_mat[(1, 1)] = 1.0;
        update_mat[(2, 2)] = 1.0;
        update_mat[(3, 3)] = 1.0;

        x.as_mut_slice()[0..4].copy_from_slice(z.as_slice());

        Self {
            motion_mat,
            update_mat,
            x,
            covariance,
        }
    }

    fn motion_cov() -> StateCov {
        let mut q = StateCov::identity();
        q[(6, 6)] *= 0.01;
        for i in 4..7 {
            q[(i, i)] *= 0.01;
        }
        q
    }

    pub(crate) fn predict(&mut self) -> (StateMean, StateCov) {
        self.x = (&self.motion_mat * self.x.transpose()).transpose();
        self.covariance =
            self.motion_mat * self.covariance * self.motion_mat.transpose()
                + Self::motion_cov();

        (self.x, self.covariance)
    }

    pub(crate) fn project(&self) -> (StateHMean, StateHCov) {
        let mean = self.x * self.update_mat.transpose();
        let covariance =
            self.update_mat * self.covariance * self.update_mat.transpose();

        (mean, covariance + StateHCov::identity())
    }

    pub(crate) fn update(&mut self, measurement: &DetectBox) -> (StateMean, StateCov) {
        let (projected_mean, projected_covariance) = self.project();

        let b = (self.covariance * self.update_mat.transpose()).transpose();
        let cholesky_factor = projected_covariance.cholesky().unwrap();
        let kalman_gain = cholesky_factor.solve(&b);
        let innovation = measurement - projected_mean;
        self.x += innovation * kalman_gain;
        // Joseph form is numerically more stable than P -= K S K^T in f32.
        let k = kalman_gain.transpose(); // 7x4
        let identity = StateCov::identity();
        let i_minus_kh = identity - k * self.update_mat;
        self.covariance = i_minus_kh * self.covariance * i_minus_kh.transpose()
            + k * k.transpose();

        (self.x, self.covariance)
    }

    pub(crate) fn state(&self) -> &StateMean {
        &self.x
    }

    pub(crate) fn state_mut(&mut self) -> &mut StateMean {
        &mut self.x
    }

    pub(crate) fn covariance(&self) -> &StateCov {
        &self.covariance
    }
}
