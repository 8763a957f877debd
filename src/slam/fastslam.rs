//! FastSLAM 2.0.
//!
//! Every particle samples its pose from a proposal conditioned on the current
//! observations (an unscented update of the joint pose/landmark Gaussian) and
//! keeps an independent Gaussian per landmark in a copy-on-write map, so that
//! resampled particles share every landmark they have not yet updated.

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector, Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::Result;
use crate::models::measurement::MeasurementModel;
use crate::models::motion::MotionModel;
use crate::models::se2;
use crate::slam::config::FastSlamConfig;
use crate::slam::interfaces::{FeatureId, SlamListener, SlamResult, Timestep};
use crate::slam::particle_filter::ParticleFilter;
use crate::slam::trajectory::Trajectory;
use crate::utils::cowmap::CowMap;
use crate::utils::mvn::MultivariateNormal;
use crate::utils::unscented::UnscentedParams;

const STATE_DIM: usize = 3;
const FEATURE_DIM: usize = 2;

#[derive(Debug, Clone)]
pub struct Particle {
    trajectory: Trajectory,
    features: CowMap<FeatureId, MultivariateNormal>,
}

impl Particle {
    fn new(origin: Vector3<f64>) -> Particle {
        Particle {
            trajectory: Trajectory::new(origin),
            features: CowMap::new(),
        }
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    pub fn features(&self) -> &CowMap<FeatureId, MultivariateNormal> {
        &self.features
    }

    fn feature(&self, id: FeatureId) -> &MultivariateNormal {
        match self.features.get(&id) {
            Some(feature) => feature,
            None => panic!("feature {id} was never initialized"),
        }
    }
}

#[derive(Debug, Clone)]
struct ObservedFeature {
    id: FeatureId,
    observation: MultivariateNormal,
}

/// Best-estimate views, rebuilt on first access after every timestep.
#[derive(Debug, Clone, Default)]
struct EstimateCache {
    trajectory: Option<Vec<Vector3<f64>>>,
    map: Option<BTreeMap<FeatureId, Vector2<f64>>>,
}

impl EstimateCache {
    fn invalidate(&mut self) {
        self.trajectory = None;
        self.map = None;
    }
}

fn to_dvector(v: &Vector3<f64>) -> DVector<f64> {
    DVector::from_column_slice(v.as_slice())
}

fn to_state(v: &DVector<f64>) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}

/// Expected observation of the global `feature` from `state`, with angles on
/// the branch of `reference`.
fn observe_feature<O: MeasurementModel>(
    measurement: &O,
    state: &Vector3<f64>,
    feature: &DVector<f64>,
    reference: &DVector<f64>,
) -> DVector<f64> {
    let local = se2::inverse_transform_point(state, &Vector2::new(feature[0], feature[1]));
    measurement.align(measurement.observe(&local), reference)
}

/// Everything the per-particle update reads, borrowed apart from the particles.
struct StateUpdate<'a, M, O> {
    motion: &'a M,
    measurement: &'a O,
    ukf: &'a UnscentedParams,
    control: &'a MultivariateNormal,
    seen_features: &'a [ObservedFeature],
    retain_history: bool,
}

impl<M: MotionModel, O: MeasurementModel> StateUpdate<'_, M, O> {
    /// Moves `particle` to a pose drawn from the FastSLAM 2.0 proposal and
    /// returns its importance weight.
    fn apply<R: Rng>(&self, particle: &mut Particle, rng: &mut R) -> f64 {
        let previous = *particle.trajectory.state();
        let predicted = self
            .ukf
            .transform(
                |u| to_dvector(&self.motion.prediction(&previous, u)),
                self.control,
                None,
            )
            .output;

        let proposal = self.proposal(particle, &predicted);
        let state = to_state(&proposal.sample(rng));

        let obs_log_likelihood = self.observation_log_likelihood(particle, &state);
        let state_log_likelihood = predicted.log_likelihood(&to_dvector(&state));
        let proposal_log_likelihood = proposal.log_likelihood(&to_dvector(&state));

        if self.retain_history {
            particle.trajectory.extend(state);
        } else {
            particle.trajectory.restart(state);
        }

        (obs_log_likelihood + state_log_likelihood - proposal_log_likelihood).exp()
    }

    /// Conditions the predicted pose on each observation in turn, through a
    /// joint Gaussian over (pose, landmark) that starts uncorrelated.
    fn proposal(&self, particle: &Particle, predicted: &MultivariateNormal) -> MultivariateNormal {
        let dim = STATE_DIM + FEATURE_DIM;
        let mut state = predicted.clone();

        for obs in self.seen_features {
            let feature = particle.feature(obs.id);

            let mut mean = DVector::zeros(dim);
            mean.rows_mut(0, STATE_DIM).copy_from(state.mean());
            mean.rows_mut(STATE_DIM, FEATURE_DIM).copy_from(feature.mean());
            let mut chol_cov = DMatrix::zeros(dim, dim);
            chol_cov
                .view_mut((0, 0), (STATE_DIM, STATE_DIM))
                .copy_from(state.chol_cov());
            chol_cov
                .view_mut((STATE_DIM, STATE_DIM), (FEATURE_DIM, FEATURE_DIM))
                .copy_from(feature.chol_cov());
            let mut joint = MultivariateNormal::new(mean, chol_cov);

            let reference = obs.observation.mean();
            self.ukf.update(
                |x| {
                    let pose = Vector3::new(x[0], x[1], x[2]);
                    let landmark = x.rows(STATE_DIM, FEATURE_DIM).into_owned();
                    observe_feature(self.measurement, &pose, &landmark, reference)
                },
                &mut joint,
                &obs.observation,
            );

            state = joint.marginal(0, STATE_DIM);
        }

        state
    }

    fn observation_log_likelihood(&self, particle: &Particle, state: &Vector3<f64>) -> f64 {
        self.seen_features
            .iter()
            .map(|obs| {
                let reference = obs.observation.mean();
                let predicted = self
                    .ukf
                    .transform(
                        |f| observe_feature(self.measurement, state, f, reference),
                        particle.feature(obs.id),
                        Some(obs.observation.chol_cov()),
                    )
                    .output;
                predicted.log_likelihood(reference)
            })
            .sum()
    }
}

/// FastSLAM 2.0 engine, driven through [`SlamListener`] and queried through
/// [`SlamResult`].
#[derive(Clone)]
pub struct FastSlam<M, O> {
    motion: M,
    measurement: O,
    config: FastSlamConfig,
    rng: StdRng,

    next_timestep: Timestep,
    current_control: Option<MultivariateNormal>,
    seen_features: Vec<ObservedFeature>,
    new_features: Vec<ObservedFeature>,
    num_features: usize,

    particles: ParticleFilter<Particle>,
    /// Max-weight pose of every timestep, kept when particles discard their history.
    accumulated: Vec<Vector3<f64>>,
    cache: EstimateCache,
}

impl<M: MotionModel, O: MeasurementModel> FastSlam<M, O> {
    /// Starts from a single particle at the origin; the population grows to
    /// `num_particles` at the first resampling.
    pub fn new(config: FastSlamConfig, motion: M, measurement: O) -> Result<FastSlam<M, O>> {
        config.validate()?;
        let origin = Vector3::zeros();
        let (particles, accumulated) = if config.num_particles == 0 {
            (ParticleFilter::from_particles(Vec::new()), Vec::new())
        } else {
            (ParticleFilter::new(Particle::new(origin)), vec![origin])
        };

        Ok(FastSlam {
            motion,
            measurement,
            rng: StdRng::seed_from_u64(config.seed),
            config,
            next_timestep: Timestep(0),
            current_control: None,
            seen_features: Vec::new(),
            new_features: Vec::new(),
            num_features: 0,
            particles,
            accumulated,
            cache: EstimateCache::default(),
        })
    }

    pub fn config(&self) -> &FastSlamConfig {
        &self.config
    }

    pub fn particles(&self) -> &ParticleFilter<Particle> {
        &self.particles
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn effective_particle_ratio(&self) -> f64 {
        if self.particles.is_empty() {
            return 0.0;
        }
        self.particles.effective_size() / self.particles.len() as f64
    }

    pub fn is_collapsed(&self) -> bool {
        !self.particles.is_empty() && self.effective_particle_ratio() < self.config.collapse_threshold
    }

    fn resample_required(&self) -> bool {
        self.particles.effective_size()
            < self.config.num_particles as f64 * self.config.resample_threshold
    }

    fn best_particle(&self) -> &Particle {
        match self.particles.max_weight_particle() {
            Some(particle) => particle,
            None => panic!("the particle set is empty"),
        }
    }

    fn propagate_particles(&mut self, t: Timestep) {
        let control = match self.current_control.take() {
            Some(control) => control,
            None => panic!("no control received for timestep {t}"),
        };
        let update = StateUpdate {
            motion: &self.motion,
            measurement: &self.measurement,
            ukf: &self.config.ukf,
            control: &control,
            seen_features: &self.seen_features,
            retain_history: self.config.retain_history,
        };
        let rng = &mut self.rng;
        self.particles.update(|particle| update.apply(particle, &mut *rng));

        if !self.config.retain_history {
            if let Some(best) = self.particles.max_weight_particle() {
                self.accumulated.push(*best.trajectory.state());
            }
        }
    }

    fn update_features(&mut self) {
        let ukf = &self.config.ukf;
        let measurement = &self.measurement;

        for obs in &self.seen_features {
            let reference = obs.observation.mean();
            for particle in self.particles.iter_mut() {
                let state = *particle.trajectory.state();
                let mut feature = particle.feature(obs.id).clone();
                ukf.update(
                    |f| observe_feature(measurement, &state, f, reference),
                    &mut feature,
                    &obs.observation,
                );
                particle.features.insert(obs.id, feature);
            }
        }
        self.seen_features.clear();

        for obs in &self.new_features {
            let prior = measurement.initialization_prior(&obs.observation);
            for particle in self.particles.iter_mut() {
                let state = *particle.trajectory.state();
                let feature = ukf
                    .transform(
                        |z| {
                            let global = se2::transform_point(&state, &measurement.inverse(z));
                            DVector::from_column_slice(global.as_slice())
                        },
                        &prior,
                        None,
                    )
                    .output;
                let inserted = particle.features.insert(obs.id, feature);
                debug_assert!(inserted, "feature {} initialized twice", obs.id);
            }
        }
        self.num_features += self.new_features.len();
        self.new_features.clear();
    }
}

impl<M: MotionModel, O: MeasurementModel> SlamResult for FastSlam<M, O> {
    fn current_timestep(&self) -> Timestep {
        assert!(self.next_timestep.0 > 0, "no timestep processed yet");
        Timestep(self.next_timestep.0 - 1)
    }

    fn timestep(&mut self, t: Timestep) {
        if t < self.next_timestep {
            return;
        }
        assert_eq!(t, self.next_timestep, "timesteps must be processed in order");

        if t.0 > 0 {
            if self.is_collapsed() {
                log::warn!(
                    "filter collapsed at timestep {t}: effective particle ratio {:.3}",
                    self.effective_particle_ratio()
                );
            }
            if self.resample_required() {
                self.particles.resample(&mut self.rng, self.config.num_particles);
            }
            self.propagate_particles(t);
        }

        self.update_features();

        self.cache.invalidate();
        self.next_timestep = t.next();

        log::debug!(
            "timestep {t}: effective particle set {:.2}",
            self.particles.effective_size()
        );
    }

    fn get_state(&self, t: Timestep) -> Vector3<f64> {
        let current = self.current_timestep();
        assert!(t <= current, "timestep {t} is after the current timestep {current}");
        let best = self.best_particle();
        if !self.config.retain_history {
            return self.accumulated[t.0];
        }
        match best.trajectory.ancestor(current.0 - t.0) {
            Some(state) => *state,
            None => panic!("trajectory does not reach back to timestep {t}"),
        }
    }

    fn get_feature(&self, id: FeatureId) -> Vector2<f64> {
        let mean = self.best_particle().feature(id).mean();
        Vector2::new(mean[0], mean[1])
    }

    fn get_trajectory(&mut self) -> &[Vector3<f64>] {
        if !self.config.retain_history {
            return &self.accumulated;
        }
        let particles = &self.particles;
        self.cache.trajectory.get_or_insert_with(|| {
            let mut states: Vec<Vector3<f64>> = particles
                .max_weight_particle()
                .map(|best| best.trajectory.iter().copied().collect())
                .unwrap_or_default();
            states.reverse();
            states
        })
    }

    fn get_feature_map(&mut self) -> &BTreeMap<FeatureId, Vector2<f64>> {
        let particles = &self.particles;
        self.cache.map.get_or_insert_with(|| {
            let mut map = BTreeMap::new();
            if let Some(best) = particles.max_weight_particle() {
                best.features.for_each(|id, feature| {
                    map.insert(*id, Vector2::new(feature.mean()[0], feature.mean()[1]));
                });
            }
            map
        })
    }
}

impl<M: MotionModel, O: MeasurementModel> SlamListener for FastSlam<M, O> {
    fn control(&mut self, t: Timestep, control: &MultivariateNormal) {
        assert_eq!(t, self.current_timestep(), "control for the wrong timestep");
        assert!(self.current_control.is_none(), "control already set for timestep {t}");
        self.current_control = Some(control.clone());
    }

    fn observation(
        &mut self,
        t: Timestep,
        id: FeatureId,
        observation: &MultivariateNormal,
        is_new: bool,
    ) {
        assert_eq!(t, self.next_timestep, "observation for the wrong timestep");
        let features = if is_new {
            &mut self.new_features
        } else {
            &mut self.seen_features
        };
        features.push(ObservedFeature {
            id,
            observation: observation.clone(),
        });
    }

    fn end_observation(&mut self, t: Timestep) {
        self.timestep(t);
    }

    fn end_simulation(&mut self, t: Timestep) {
        log::info!(
            "FastSLAM finished at timestep {t} with {} features, effective particle ratio {:.3}",
            self.num_features,
            self.effective_particle_ratio()
        );
    }
}
