use std::sync::Arc;

use nalgebra::Vector3;

#[derive(Debug)]
struct TrajectoryNode {
    state: Vector3<f64>,
    previous: Option<Arc<TrajectoryNode>>,
}

impl Drop for TrajectoryNode {
    // unlink iteratively, a long unshared chain would otherwise recurse once per node
    fn drop(&mut self) {
        let mut next = self.previous.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut node) => next = node.previous.take(),
                Err(_) => break,
            }
        }
    }
}

/// Persistent list of poses, newest first. Cloning shares every node; extending
/// allocates one node and links it to the shared history.
#[derive(Debug, Clone)]
pub struct Trajectory {
    head: Arc<TrajectoryNode>,
}

impl Trajectory {
    pub fn new(origin: Vector3<f64>) -> Trajectory {
        Trajectory {
            head: Arc::new(TrajectoryNode {
                state: origin,
                previous: None,
            }),
        }
    }

    pub fn state(&self) -> &Vector3<f64> {
        &self.head.state
    }

    /// Appends `state` after the current head.
    pub fn extend(&mut self, state: Vector3<f64>) {
        let previous = Some(self.head.clone());
        self.head = Arc::new(TrajectoryNode { state, previous });
    }

    /// Replaces the whole history by `state`.
    pub fn restart(&mut self, state: Vector3<f64>) {
        *self = Trajectory::new(state);
    }

    pub fn previous(&self) -> Option<Trajectory> {
        self.head
            .previous
            .as_ref()
            .map(|head| Trajectory { head: head.clone() })
    }

    /// State `steps` nodes before the head.
    pub fn ancestor(&self, steps: usize) -> Option<&Vector3<f64>> {
        self.iter().nth(steps)
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: Some(&self.head),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn ptr_eq(&self, other: &Trajectory) -> bool {
        Arc::ptr_eq(&self.head, &other.head)
    }
}

pub struct Iter<'a> {
    next: Option<&'a Arc<TrajectoryNode>>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Vector3<f64>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next?;
        self.next = node.previous.as_ref();
        Some(&node.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose(x: f64) -> Vector3<f64> {
        Vector3::new(x, 0.0, 0.0)
    }

    #[test]
    fn extend_and_walk_back() {
        let mut trajectory = Trajectory::new(pose(0.0));
        for i in 1..=4 {
            trajectory.extend(pose(i as f64));
        }
        assert_eq!(trajectory.len(), 5);
        assert_eq!(trajectory.state(), &pose(4.0));
        assert_eq!(trajectory.ancestor(3), Some(&pose(1.0)));
        assert_eq!(trajectory.ancestor(5), None);
        let xs: Vec<f64> = trajectory.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![4.0, 3.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn branches_share_history() {
        let mut a = Trajectory::new(pose(0.0));
        a.extend(pose(1.0));
        let mut b = a.clone();
        assert!(a.ptr_eq(&b));

        a.extend(pose(2.0));
        b.extend(pose(-2.0));
        assert!(!a.ptr_eq(&b));
        let (pa, pb) = (a.previous().unwrap(), b.previous().unwrap());
        assert!(pa.ptr_eq(&pb));
        assert_eq!(a.state(), &pose(2.0));
        assert_eq!(b.state(), &pose(-2.0));
    }

    #[test]
    fn restart_drops_history() {
        let mut trajectory = Trajectory::new(pose(0.0));
        trajectory.extend(pose(1.0));
        trajectory.restart(pose(5.0));
        assert_eq!(trajectory.len(), 1);
        assert!(trajectory.previous().is_none());
    }

    #[test]
    fn long_chain_drops_without_overflow() {
        let mut trajectory = Trajectory::new(pose(0.0));
        for i in 0..500_000 {
            trajectory.extend(pose(i as f64));
        }
        let branch = trajectory.previous().unwrap();
        drop(trajectory);
        assert_eq!(branch.len(), 500_000);
        drop(branch);
    }
}
