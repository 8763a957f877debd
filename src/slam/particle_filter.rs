use rand::Rng;

/// Weighted population of hypotheses. Weights are kept normalized.
#[derive(Debug, Clone)]
pub struct ParticleFilter<P> {
    particles: Vec<P>,
    weights: Vec<f64>,
}

impl<P: Clone> ParticleFilter<P> {
    /// A single particle with weight 1.
    pub fn new(initial: P) -> ParticleFilter<P> {
        ParticleFilter {
            particles: vec![initial],
            weights: vec![1.0],
        }
    }

    pub fn from_particles(particles: Vec<P>) -> ParticleFilter<P> {
        let n = particles.len();
        ParticleFilter {
            particles,
            weights: vec![1.0 / n as f64; n],
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, P> {
        self.particles.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, P> {
        self.particles.iter_mut()
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// `1 / sum(w^2)`, between 1 and `len()`.
    pub fn effective_size(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        1.0 / self.weights.iter().map(|w| w * w).sum::<f64>()
    }

    /// Multiplies every weight by `f(particle)` and renormalizes.
    pub fn update<F: FnMut(&mut P) -> f64>(&mut self, mut f: F) {
        for (particle, weight) in self.particles.iter_mut().zip(self.weights.iter_mut()) {
            *weight *= f(particle);
        }
        self.normalize();
    }

    fn normalize(&mut self) {
        if self.is_empty() {
            return;
        }
        let total: f64 = self.weights.iter().sum();
        if total > 0.0 && total.is_finite() {
            self.weights.iter_mut().for_each(|w| *w /= total);
        } else {
            log::warn!("degenerate particle weights (sum = {total}), resetting to uniform");
            let uniform = 1.0 / self.len() as f64;
            self.weights.iter_mut().for_each(|w| *w = uniform);
        }
    }

    /// Systematic resampling: one uniform offset, `target` evenly spaced pointers.
    pub fn resample<R: Rng>(&mut self, rng: &mut R, target: usize) {
        if self.is_empty() {
            return;
        }
        let step = 1.0 / target as f64;
        let mut pointer = rng.gen::<f64>() * step;
        let mut cum_weight = self.weights[0];
        let mut index = 0;

        let mut resampled = Vec::with_capacity(target);
        for _ in 0..target {
            while cum_weight < pointer && index + 1 < self.len() {
                index += 1;
                cum_weight += self.weights[index];
            }
            resampled.push(self.particles[index].clone());
            pointer += step;
        }

        self.particles = resampled;
        self.weights = vec![step; target];
        log::debug!(
            "resampled to {} particles (effective {:.2})",
            target,
            self.effective_size()
        );
    }

    /// Index of the largest weight, first one on ties.
    pub fn max_weight_index(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, w) in self.weights.iter().enumerate() {
            match best {
                Some(b) if self.weights[b] >= *w => {}
                _ => best = Some(i),
            }
        }
        best
    }

    pub fn max_weight_particle(&self) -> Option<&P> {
        self.max_weight_index().map(|i| &self.particles[i])
    }
}

impl<'a, P: Clone> IntoIterator for &'a ParticleFilter<P> {
    type Item = &'a P;
    type IntoIter = std::slice::Iter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, P: Clone> IntoIterator for &'a mut ParticleFilter<P> {
    type Item = &'a mut P;
    type IntoIter = std::slice::IterMut<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}
