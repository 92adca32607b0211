/// Sample moments of a window slice. Any non-finite value invalidates the window.
#[derive(Debug, Clone, Copy)]
pub(super) struct WindowMoments {
    pub(super) n: f64,
    pub(super) sum: f64,
    pub(super) sum_sq: f64,
}

impl WindowMoments {
    pub(super) fn collect(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for &value in values {
            if !value.is_finite() {
                return None;
            }
            sum += value;
            sum_sq += value * value;
        }
        Some(Self {
            n: values.len() as f64,
            sum,
            sum_sq,
        })
    }

    #[inline]
    pub(super) fn mean(self) -> f64 {
        self.sum / self.n
    }

    #[inline]
    pub(super) fn std(self) -> f64 {
        if self.n <= 1.0 {
            return f64::NAN;
        }
        let m2 = self.sum_sq - (self.sum * self.sum) / self.n;
        let variance = (m2 / (self.n - 1.0)).max(0.0);
        variance.sqrt()
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct WindowBivariateMoments {
    pub(super) n: f64,
    pub(super) sum_x: f64,
    pub(super) sum_y: f64,
    pub(super) sum_xx: f64,
    pub(super) sum_yy: f64,
    pub(super) sum_xy: f64,
}

impl WindowBivariateMoments {
    pub(super) fn collect(lhs: &[f64], rhs: &[f64]) -> Option<Self> {
        if lhs.is_empty() || lhs.len() != rhs.len() {
            return None;
        }
        let mut m = Self {
            n: lhs.len() as f64,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_xx: 0.0,
            sum_yy: 0.0,
            sum_xy: 0.0,
        };
        for (&x, &y) in lhs.iter().zip(rhs) {
            if !x.is_finite() || !y.is_finite() {
                return None;
            }
            m.sum_x += x;
            m.sum_y += y;
            m.sum_xx += x * x;
            m.sum_yy += y * y;
            m.sum_xy += x * y;
        }
        Some(m)
    }

    #[inline]
    pub(super) fn cov_num(self) -> f64 {
        self.sum_xy - (self.sum_x * self.sum_y) / self.n
    }

    #[inline]
    pub(super) fn var_x_num(self) -> f64 {
        self.sum_xx - (self.sum_x * self.sum_x) / self.n
    }

    #[inline]
    pub(super) fn var_y_num(self) -> f64 {
        self.sum_yy - (self.sum_y * self.sum_y) / self.n
    }
}

#[inline]
pub(super) fn ewm_alpha(window: usize) -> f64 {
    2.0 / (window as f64 + 1.0)
}

/// Exponentially weighted mean of a newest-first slice; the newest value has weight 1.
pub(super) fn ewm_mean(values: &[f64], window: usize) -> Option<f64> {
    let decay = 1.0 - ewm_alpha(window);
    let mut weight = 1.0;
    let mut weight_sum = 0.0;
    let mut wx_sum = 0.0;
    for &value in values {
        if !value.is_finite() {
            return None;
        }
        weight_sum += weight;
        wx_sum += weight * value;
        weight *= decay;
    }
    if weight_sum <= 0.0 || !weight_sum.is_finite() {
        return None;
    }
    Some(wx_sum / weight_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn window_moments_reject_non_finite() {
        assert!(WindowMoments::collect(&[1.0, f64::NAN]).is_none());
        assert!(WindowMoments::collect(&[]).is_none());
        let m = WindowMoments::collect(&[1.0, 2.0, 3.0]).expect("finite window");
        assert_relative_eq!(m.mean(), 2.0);
        assert_relative_eq!(m.std(), 1.0);
    }

    #[test]
    fn ewm_mean_weights_newest_highest() {
        // alpha = 0.5 for window 3: weights 1, 0.5, 0.25
        let mean = ewm_mean(&[4.0, 2.0, 0.0], 3).expect("finite window");
        assert_relative_eq!(mean, (4.0 + 1.0) / 1.75);
    }
}
