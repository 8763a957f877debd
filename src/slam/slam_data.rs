//! Event log of controls and observations.
//!
//! Every recorded event is broadcast to the registered listeners. Listeners are
//! held weakly: dropping the last strong handle unsubscribes, and expired
//! entries are pruned on the next broadcast.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;

use crate::slam::interfaces::{FeatureId, SlamListener, Timestep};
use crate::utils::mvn::MultivariateNormal;

pub type FeatureData = BTreeMap<Timestep, MultivariateNormal>;

#[derive(Default)]
pub struct SlamData {
    controls: Vec<MultivariateNormal>,
    features: FxHashMap<FeatureId, FeatureData>,
    listeners: Vec<Weak<RefCell<dyn SlamListener>>>,
}

impl SlamData {
    pub fn new() -> SlamData {
        SlamData::default()
    }

    pub fn add_listener<L: SlamListener + 'static>(&mut self, listener: &Rc<RefCell<L>>) {
        let listener: Rc<RefCell<dyn SlamListener>> = listener.clone();
        self.listeners.push(Rc::downgrade(&listener));
    }

    pub fn num_listeners(&self) -> usize {
        self.listeners.len()
    }

    fn for_each_listener<F: FnMut(&mut dyn SlamListener)>(&mut self, mut f: F) {
        self.listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                f(&mut *listener.borrow_mut());
                true
            }
            None => false,
        });
    }

    /// Number of controls recorded so far; observations are labelled with it.
    pub fn current_timestep(&self) -> Timestep {
        Timestep(self.controls.len())
    }

    pub fn control(&self, t: Timestep) -> Option<&MultivariateNormal> {
        self.controls.get(t.0)
    }

    pub fn feature_data(&self, id: FeatureId) -> Option<&FeatureData> {
        self.features.get(&id)
    }

    pub fn feature_observation(&self, id: FeatureId, t: Timestep) -> Option<&MultivariateNormal> {
        self.features.get(&id)?.get(&t)
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn features(&self) -> impl Iterator<Item = (&FeatureId, &FeatureData)> {
        self.features.iter()
    }

    /// Records the control applied at the current timestep and moves to the next.
    pub fn add_control(&mut self, control: MultivariateNormal) {
        let t = self.current_timestep();
        self.controls.push(control.clone());
        self.for_each_listener(|l| l.control(t, &control));
    }

    /// Records an observation at the current timestep. A second observation of
    /// the same feature within one timestep is ignored.
    pub fn add_observation(&mut self, id: FeatureId, observation: MultivariateNormal) {
        let t = self.current_timestep();
        let is_new = !self.features.contains_key(&id);
        let data = self.features.entry(id).or_default();
        if data.contains_key(&t) {
            log::debug!("ignoring repeated observation of {id} at timestep {t}");
            return;
        }
        data.insert(t, observation.clone());
        self.for_each_listener(|l| l.observation(t, id, &observation, is_new));
    }

    pub fn end_observation(&mut self) {
        let t = self.current_timestep();
        self.for_each_listener(|l| l.end_observation(t));
    }

    pub fn end_simulation(&mut self) {
        let t = self.current_timestep();
        log::info!("simulation ended at timestep {t}");
        self.for_each_listener(|l| l.end_simulation(t));
    }
}
