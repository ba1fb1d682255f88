//! Propagation seam and a toy overdamped Brownian system used by the runner
//! and the integration tests.

use ndarray::Array2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;

use crate::error::{Result, WeError};
use crate::population::{Segment, bin_seed};

/// Advances walkers by one iteration's worth of dynamics.
///
/// On entry each segment holds its starting point as the first row of
/// `pcoord`; on return `pcoord` holds the full trajectory, endpoint last.
pub trait Propagator {
    fn propagate(&mut self, iteration: u64, segments: &mut [Segment]) -> Result<()>;
}

/// `dx = force * dt + sqrt(2 D dt) N(0, 1)` with a constant force, applied
/// independently in every dimension.
#[derive(Debug, Clone)]
pub struct BrownianPropagator {
    pub force: f64,
    pub diffusion: f64,
    pub dt: f64,
    pub n_steps: usize,
    pub seed: u64,
}

impl Default for BrownianPropagator {
    fn default() -> Self {
        Self {
            force: 0.5,
            diffusion: 1.0,
            dt: 0.01,
            n_steps: 20,
            seed: 0,
        }
    }
}

impl BrownianPropagator {
    fn walk(&self, iteration: u64, segment: &mut Segment, noise: &Normal<f64>) -> Result<()> {
        let start = segment
            .first_point()
            .ok_or_else(|| WeError::propagation(format!("walker {} has no start point", segment.id)))?
            .to_vec();
        // keyed on the walker id so results do not depend on scheduling
        let mut rng = ChaCha8Rng::seed_from_u64(bin_seed(self.seed, iteration, segment.id.0 as usize));
        let mut traj = Array2::<f64>::zeros((self.n_steps + 1, start.len()));
        traj.row_mut(0).assign(&ndarray::ArrayView1::from(&start[..]));
        for t in 1..=self.n_steps {
            for d in 0..start.len() {
                let x = traj[[t - 1, d]] + self.force * self.dt + noise.sample(&mut rng);
                if !x.is_finite() {
                    return Err(WeError::propagation(format!(
                        "walker {} diverged at step {t}",
                        segment.id
                    )));
                }
                traj[[t, d]] = x;
            }
        }
        segment.pcoord = traj;
        Ok(())
    }
}

impl Propagator for BrownianPropagator {
    fn propagate(&mut self, iteration: u64, segments: &mut [Segment]) -> Result<()> {
        let sigma = (2.0 * self.diffusion * self.dt).sqrt();
        let noise = Normal::new(0.0, sigma).map_err(|e| WeError::propagation(e.to_string()))?;
        let this = &*self;
        segments
            .par_iter_mut()
            .try_for_each(|seg| this.walk(iteration, seg, &noise))
    }
}
