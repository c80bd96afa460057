//! System volume
//!
//! The OS media stream volume is shared by every session. Sessions read and
//! write it as a ratio in `[0, 1]` and register an observer to forward
//! external changes to the host.

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Handle identifying one registered observer
pub type ObserverId = u64;

pub trait SystemVolume: Send + Sync {
    /// Current volume ratio
    fn get(&self) -> f32;

    /// Set the volume ratio, clamped to `[0, 1]`
    fn set(&self, ratio: f32);

    /// Deliver every subsequent change to `observer`
    fn register(&self, observer: mpsc::UnboundedSender<f32>) -> ObserverId;

    fn unregister(&self, id: ObserverId);
}

/// In-memory volume with a fixed number of steps, like a device stream
#[derive(Debug)]
pub struct FixedSystemVolume {
    max_steps: u32,
    inner: Mutex<VolumeInner>,
}

#[derive(Debug, Default)]
struct VolumeInner {
    steps: u32,
    next_id: ObserverId,
    observers: HashMap<ObserverId, mpsc::UnboundedSender<f32>>,
}

impl FixedSystemVolume {
    pub fn new(max_steps: u32, ratio: f32) -> Self {
        let max_steps = max_steps.max(1);
        Self {
            max_steps,
            inner: Mutex::new(VolumeInner {
                steps: Self::to_steps(max_steps, ratio),
                ..Default::default()
            }),
        }
    }

    fn to_steps(max_steps: u32, ratio: f32) -> u32 {
        (ratio.clamp(0.0, 1.0) * max_steps as f32).round() as u32
    }

    pub fn observer_count(&self) -> usize {
        self.inner.lock().observers.len()
    }
}

impl Default for FixedSystemVolume {
    fn default() -> Self {
        Self::new(15, 0.5)
    }
}

impl SystemVolume for FixedSystemVolume {
    fn get(&self) -> f32 {
        self.inner.lock().steps as f32 / self.max_steps as f32
    }

    fn set(&self, ratio: f32) {
        let mut inner = self.inner.lock();
        let steps = Self::to_steps(self.max_steps, ratio);
        if steps == inner.steps {
            return;
        }
        inner.steps = steps;
        let value = steps as f32 / self.max_steps as f32;
        // Drop observers whose session is gone
        inner.observers.retain(|_, tx| tx.send(value).is_ok());
        debug!(volume = value, "System volume changed");
    }

    fn register(&self, observer: mpsc::UnboundedSender<f32>) -> ObserverId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.observers.insert(id, observer);
        id
    }

    fn unregister(&self, id: ObserverId) {
        self.inner.lock().observers.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_quantizes_to_steps() {
        let volume = FixedSystemVolume::new(10, 0.0);
        volume.set(0.74);
        assert!((volume.get() - 0.7).abs() < f32::EPSILON);
        volume.set(3.0);
        assert_eq!(volume.get(), 1.0);
    }

    #[test]
    fn test_observers_receive_changes() {
        let volume = FixedSystemVolume::new(10, 0.5);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = volume.register(tx);

        volume.set(0.8);
        assert!((rx.try_recv().unwrap() - 0.8).abs() < f32::EPSILON);

        volume.set(0.8);
        assert!(rx.try_recv().is_err());

        volume.unregister(id);
        volume.set(0.2);
        assert!(rx.try_recv().is_err());
        assert_eq!(volume.observer_count(), 0);
    }
}
