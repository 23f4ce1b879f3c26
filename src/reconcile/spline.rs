/// Natural cubic spline over irregularly spaced samples.
///
/// Fit once over the full series (time as seconds since epoch), then
/// evaluate at arbitrary instants. Natural boundary conditions: zero
/// second derivative at both ends, which keeps the curve from ringing at
/// the edges of a tidal record. Evaluation outside the knot range
/// extends the boundary segment polynomials.

/// Fitted spline: knots plus the solved second derivatives.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    second_derivatives: Vec<f64>,
}

impl CubicSpline {
    /// Fits a natural cubic spline. Requires at least two knots with
    /// strictly increasing x values.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Option<CubicSpline> {
        let n = xs.len();
        if n < 2 || n != ys.len() {
            return None;
        }
        if xs.windows(2).any(|w| w[0] >= w[1]) {
            return None;
        }

        // Tridiagonal system for the interior second derivatives
        // (Thomas algorithm); the natural condition pins both ends to 0.
        let mut second = vec![0.0; n];
        if n > 2 {
            let m = n - 2;
            let mut diag = vec![0.0; m];
            let mut upper = vec![0.0; m];
            let mut lower = vec![0.0; m];
            let mut rhs = vec![0.0; m];

            for i in 0..m {
                let h_left = xs[i + 1] - xs[i];
                let h_right = xs[i + 2] - xs[i + 1];
                lower[i] = h_left / 6.0;
                diag[i] = (h_left + h_right) / 3.0;
                upper[i] = h_right / 6.0;
                rhs[i] =
                    (ys[i + 2] - ys[i + 1]) / h_right - (ys[i + 1] - ys[i]) / h_left;
            }

            // Forward elimination.
            for i in 1..m {
                let factor = lower[i] / diag[i - 1];
                diag[i] -= factor * upper[i - 1];
                rhs[i] -= factor * rhs[i - 1];
            }

            // Back substitution.
            second[m] = rhs[m - 1] / diag[m - 1];
            for i in (0..m - 1).rev() {
                second[i + 1] = (rhs[i] - upper[i] * second[i + 2]) / diag[i];
            }
        }

        Some(CubicSpline {
            xs: xs.to_vec(),
            ys: ys.to_vec(),
            second_derivatives: second,
        })
    }

    /// Index of the segment whose [x_i, x_{i+1}] contains (or is nearest
    /// to) `x`.
    fn segment(&self, x: f64) -> usize {
        match self.xs.binary_search_by(|knot| knot.total_cmp(&x)) {
            Ok(index) => index.min(self.xs.len() - 2),
            Err(0) => 0,
            Err(insertion) => (insertion - 1).min(self.xs.len() - 2),
        }
    }

    pub fn evaluate(&self, x: f64) -> f64 {
        let i = self.segment(x);
        let (x0, x1) = (self.xs[i], self.xs[i + 1]);
        let (y0, y1) = (self.ys[i], self.ys[i + 1]);
        let (m0, m1) = (self.second_derivatives[i], self.second_derivatives[i + 1]);
        let h = x1 - x0;

        let a = (x1 - x) / h;
        let b = (x - x0) / h;

        a * y0
            + b * y1
            + ((a * a * a - a) * m0 + (b * b * b - b) * m1) * (h * h) / 6.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_requires_two_increasing_knots() {
        assert!(CubicSpline::fit(&[1.0], &[2.0]).is_none());
        assert!(CubicSpline::fit(&[1.0, 1.0], &[2.0, 3.0]).is_none());
        assert!(CubicSpline::fit(&[2.0, 1.0], &[2.0, 3.0]).is_none());
        assert!(CubicSpline::fit(&[1.0, 2.0], &[2.0]).is_none());
        assert!(CubicSpline::fit(&[1.0, 2.0], &[2.0, 3.0]).is_some());
    }

    #[test]
    fn test_knots_are_reproduced() {
        let xs = [0.0, 60.0, 130.0, 190.0, 270.0];
        let ys = [1.0, 1.4, 0.9, 0.3, 0.8];
        let spline = CubicSpline::fit(&xs, &ys).unwrap();

        for (x, y) in xs.iter().zip(ys.iter()) {
            let value = spline.evaluate(*x);
            assert!(
                (value - y).abs() < 1e-9,
                "knot ({x}, {y}) reproduced as {value}"
            );
        }
    }

    #[test]
    fn test_linear_data_stays_linear() {
        // A natural cubic spline through collinear points is the line
        // itself, including between and beyond the knots.
        let xs = [0.0, 10.0, 25.0, 40.0];
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 + 0.5 * x).collect();
        let spline = CubicSpline::fit(&xs, &ys).unwrap();

        for x in [-5.0, 5.0, 17.5, 33.0, 45.0] {
            let expected = 3.0 + 0.5 * x;
            assert!(
                (spline.evaluate(x) - expected).abs() < 1e-9,
                "at {x}: {} vs {expected}",
                spline.evaluate(x)
            );
        }
    }

    #[test]
    fn test_two_knots_interpolate_linearly() {
        let spline = CubicSpline::fit(&[0.0, 10.0], &[0.0, 5.0]).unwrap();
        assert!((spline.evaluate(4.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_interpolant_tracks_a_tide_like_curve() {
        // Samples of a sine every 10 units; the spline between knots must
        // stay close to the underlying curve.
        let xs: Vec<f64> = (0..=20).map(|i| i as f64 * 10.0).collect();
        let ys: Vec<f64> = xs.iter().map(|x| (x / 30.0).sin()).collect();
        let spline = CubicSpline::fit(&xs, &ys).unwrap();

        // Interior only: the natural boundary condition trades accuracy
        // in the outermost segments.
        for i in 20..=180 {
            let x = i as f64;
            let error = (spline.evaluate(x) - (x / 30.0).sin()).abs();
            assert!(error < 1e-3, "error {error} at {x}");
        }
    }

    #[test]
    fn test_interpolation_stays_near_local_range() {
        // Spline overshoot on smooth data is bounded; values between two
        // knots stay within a small margin of the local sample range.
        let xs = [0.0, 60.0, 120.0, 180.0, 240.0, 300.0];
        let ys = [1.0, 1.2, 1.5, 1.4, 1.1, 0.9];
        let spline = CubicSpline::fit(&xs, &ys).unwrap();

        for i in 0..=300 {
            let value = spline.evaluate(i as f64);
            assert!(value > 0.8 && value < 1.6, "value {value} at {i}");
        }
    }
}
