use faer::prelude::{SolverCore, SpSolver};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// The Gauss-Newton system `A^T A x = A^T b` accumulated over accepted pairs.
///
/// The twist `x` is ordered rotation first. Accumulators combine with `+`, so
/// partial sums from different threads or camera streams can be merged in any
/// order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalEquations {
    /// The 6x6 matrix `A^T A`.
    pub ata: [[f32; 6]; 6],
    /// The 6x1 vector `A^T b`.
    pub atb: [f32; 6],
    /// The sum of squared residuals.
    pub error: f32,
    /// The number of accepted pairs.
    pub count: usize,
}

impl Default for NormalEquations {
    fn default() -> Self {
        Self {
            ata: [[0.0; 6]; 6],
            atb: [0.0; 6],
            error: 0.0,
            count: 0,
        }
    }
}

impl NormalEquations {
    /// Add the row `a` with right hand side `b`, i.e. `A^T A += a a^T` and `A^T b += a b`.
    ///
    /// The residual and pair count are tracked separately, see [`NormalEquations::add_pair`].
    #[inline]
    pub fn add_row(&mut self, a: &[f32; 6], b: f32) {
        for i in 0..6 {
            self.atb[i] += a[i] * b;
            for j in i..6 {
                let v = a[i] * a[j];
                self.ata[i][j] += v;
                if i != j {
                    self.ata[j][i] += v;
                }
            }
        }
    }

    /// Count one accepted pair with squared residual `residual_sq`.
    #[inline]
    pub fn add_pair(&mut self, residual_sq: f32) {
        self.error += residual_sq;
        self.count += 1;
    }

    /// The mean squared residual, zero without pairs.
    pub fn mean_error(&self) -> f32 {
        if self.count == 0 {
            0.0
        } else {
            self.error / self.count as f32
        }
    }

    /// The system divided by the pair count.
    pub fn normalized(&self) -> Self {
        if self.count == 0 {
            return *self;
        }
        let s = 1.0 / self.count as f32;
        let mut out = *self;
        out.ata.iter_mut().flatten().for_each(|v| *v *= s);
        out.atb.iter_mut().for_each(|v| *v *= s);
        out.error *= s;
        out
    }

    fn ata_f64(&self) -> faer::Mat<f64> {
        faer::Mat::<f64>::from_fn(6, 6, |i, j| self.ata[i][j] as f64)
    }

    /// Solve for the twist `x` in double precision.
    ///
    /// Returns `None` when the system is not positive definite or the solution
    /// is not finite.
    pub fn solve(&self) -> Option<[f32; 6]> {
        let llt = self.ata_f64().cholesky(faer::Side::Lower).ok()?;
        let atb = faer::Mat::<f64>::from_fn(6, 1, |i, _| self.atb[i] as f64);
        let sol = llt.solve(atb.as_ref());

        let mut x = [0.0f32; 6];
        for (i, xi) in x.iter_mut().enumerate() {
            *xi = sol.read(i, 0) as f32;
        }
        x.iter().all(|v| v.is_finite()).then_some(x)
    }

    /// The inverse of `A^T A`, the covariance of the twist up to the noise scale.
    pub fn covariance(&self) -> Option<[[f32; 6]; 6]> {
        let llt = self.ata_f64().cholesky(faer::Side::Lower).ok()?;
        let inv = llt.inverse();

        let mut cov = [[0.0f32; 6]; 6];
        for (i, row) in cov.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = inv.read(i, j) as f32;
            }
        }
        cov.iter().flatten().all(|v| v.is_finite()).then_some(cov)
    }

    /// The ratio of the largest to the smallest eigenvalue of `A^T A`.
    pub fn condition_number(&self) -> f32 {
        let eigs = self.ata_f64().selfadjoint_eigenvalues(faer::Side::Lower);
        let max = eigs.iter().copied().fold(f64::MIN, f64::max);
        let min = eigs.iter().copied().fold(f64::MAX, f64::min);
        if min <= 0.0 {
            return f32::INFINITY;
        }
        (max / min) as f32
    }
}

impl AddAssign for NormalEquations {
    fn add_assign(&mut self, rhs: Self) {
        for (row, rhs_row) in self.ata.iter_mut().zip(rhs.ata.iter()) {
            for (v, r) in row.iter_mut().zip(rhs_row.iter()) {
                *v += r;
            }
        }
        for (v, r) in self.atb.iter_mut().zip(rhs.atb.iter()) {
            *v += r;
        }
        self.error += rhs.error;
        self.count += rhs.count;
    }
}

impl Add for NormalEquations {
    type Output = NormalEquations;

    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl Sum for NormalEquations {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, x| acc + x)
    }
}
