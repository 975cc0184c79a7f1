//! Mixers: group nodes with a spatializer chain behind them.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::handle::GraphNode;
use crate::math::{db_to_linear, linear_to_db, Vec3};
use crate::node::NodeState;
use crate::nodes::Passthrough;
use crate::spatial::params::ShapeBinding;
use crate::spatial::{Shape, Spatializer};

pub(crate) struct MixerInner {
    engine: Engine,
    group: GraphNode,
    spatializer: Spatializer,
    destination: Mutex<Option<Mixer>>,
}

impl MixerInner {
    pub(crate) fn spatializer(&self) -> &Spatializer {
        &self.spatializer
    }
}

/// A group node that sounds and other mixers attach into, followed by a spatializer.
///
/// The mixer's output goes to a destination mixer or, by default, the engine endpoint.
/// Cloning shares the mixer; it is torn down when the last clone (and the last queued
/// reconfiguration naming it) is gone.
#[derive(Clone)]
pub struct Mixer {
    inner: Arc<MixerInner>,
}

impl Mixer {
    pub fn new(engine: &Engine, destination: Option<&Mixer>) -> Result<Self> {
        let group = engine.add_node(Passthrough::new(engine.channels()))?;
        let target = match destination {
            Some(mixer) => mixer.input().clone(),
            None => engine.endpoint().clone(),
        };
        let spatializer = Spatializer::new(engine, &group, (target, 0))?;
        let inner = Arc::new(MixerInner {
            engine: engine.clone(),
            group,
            spatializer,
            destination: Mutex::new(destination.cloned()),
        });
        inner.spatializer.install_monitor(Arc::downgrade(&inner))?;
        inner.spatializer.init_components()?;
        debug!(group = ?inner.group.id(), "mixer created");
        Ok(Self { inner })
    }

    pub(crate) fn inner(&self) -> &Arc<MixerInner> {
        &self.inner
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// The group node. Sources attach to its input bus 0.
    pub fn input(&self) -> &GraphNode {
        &self.inner.group
    }

    pub fn spatializer(&self) -> &Spatializer {
        &self.inner.spatializer
    }

    /// Route into another mixer, or the engine endpoint with `None`.
    pub fn set_destination(&self, destination: Option<&Mixer>) -> Result<()> {
        if destination.is_some_and(|d| d == self) {
            return Err(Error::InvalidParameter("a mixer cannot feed itself".into()));
        }
        let target = match destination {
            Some(mixer) => mixer.input().clone(),
            None => self.inner.engine.endpoint().clone(),
        };
        self.inner.spatializer.set_destination((target, 0))?;
        *self.inner.destination.lock() = destination.cloned();
        Ok(())
    }

    pub fn destination(&self) -> Option<Mixer> {
        self.inner.destination.lock().clone()
    }

    pub fn play(&self) {
        self.inner.group.set_state(NodeState::Started);
    }

    pub fn stop(&self) {
        self.inner.group.set_state(NodeState::Stopped);
    }

    pub fn is_playing(&self) -> bool {
        self.inner.group.state_by_time(self.inner.engine.time_in_frames()) == NodeState::Started
    }

    /// Start at an absolute engine time, in the engine's duration units.
    pub fn set_start_time(&self, time: u64) {
        let frames = self.inner.engine.to_frames(time);
        self.inner.group.set_state_time(NodeState::Started, Some(frames));
    }

    /// Stop at an absolute engine time, in the engine's duration units.
    pub fn set_stop_time(&self, time: u64) {
        let frames = self.inner.engine.to_frames(time);
        self.inner.group.set_state_time(NodeState::Stopped, Some(frames));
    }

    /// How long the mixer has been playing, in the engine's duration units.
    pub fn time(&self) -> u64 {
        self.inner.engine.from_frames(self.inner.group.time())
    }

    /// Linear gain, or decibels when the engine uses percentage attributes.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        let gain = if self.inner.engine.percentage_attributes() {
            db_to_linear(volume)
        } else {
            volume
        };
        if !(gain.is_finite() && gain >= 0.0) {
            return Err(Error::InvalidParameter(format!("mixer volume {volume}")));
        }
        self.inner.group.set_output_bus_volume(0, gain)
    }

    pub fn volume(&self) -> f32 {
        let gain = self.inner.group.output_bus_volume(0);
        if self.inner.engine.percentage_attributes() {
            linear_to_db(gain)
        } else {
            gain
        }
    }

    fn params(&self) -> &crate::spatial::SpatialParams {
        self.inner.spatializer.params()
    }

    pub fn set_position_3d(&self, position: Vec3) {
        self.params().position.store(position);
        self.params().request_resync();
    }

    pub fn position_3d(&self) -> Vec3 {
        self.params().position.load()
    }

    pub fn set_velocity(&self, velocity: Vec3) {
        self.params().velocity.store(velocity);
    }

    pub fn velocity(&self) -> Vec3 {
        self.params().velocity.load()
    }

    pub fn set_direction(&self, direction: Vec3) {
        self.params().direction.store(direction);
        self.params().request_resync();
    }

    pub fn direction(&self) -> Vec3 {
        self.params().direction.load()
    }

    pub fn set_min_distance(&self, distance: f32) -> Result<()> {
        check_distance(distance)?;
        self.params().min_distance.set(distance);
        Ok(())
    }

    pub fn min_distance(&self) -> f32 {
        self.params().min_distance.get()
    }

    pub fn set_max_distance(&self, distance: f32) -> Result<()> {
        check_distance(distance)?;
        self.params().max_distance.set(distance);
        Ok(())
    }

    pub fn max_distance(&self) -> f32 {
        self.params().max_distance.get()
    }

    pub fn set_min_gain(&self, gain: f32) -> Result<()> {
        check_gain(gain)?;
        self.params().min_gain.set(gain);
        Ok(())
    }

    pub fn min_gain(&self) -> f32 {
        self.params().min_gain.get()
    }

    pub fn set_max_gain(&self, gain: f32) -> Result<()> {
        check_gain(gain)?;
        self.params().max_gain.set(gain);
        Ok(())
    }

    pub fn max_gain(&self) -> f32 {
        self.params().max_gain.get()
    }

    pub fn set_rolloff(&self, rolloff: f32) {
        self.inner.spatializer.set_rolloff(rolloff);
    }

    pub fn rolloff(&self) -> f32 {
        self.inner.spatializer.rolloff()
    }

    pub fn set_directional_attenuation_factor(&self, factor: f32) {
        self.inner.spatializer.set_directional_attenuation_factor(factor);
    }

    pub fn directional_attenuation_factor(&self) -> f32 {
        self.inner.spatializer.directional_attenuation_factor()
    }

    pub fn set_spatialization_enabled(&self, enabled: bool) {
        self.params().enabled.store(enabled, Ordering::Release);
    }

    pub fn spatialization_enabled(&self) -> bool {
        self.params().enabled.load(Ordering::Acquire)
    }

    /// Always spatialize against listener `index` instead of the nearest one.
    pub fn set_pinned_listener(&self, index: Option<usize>) -> Result<()> {
        if let Some(index) = index {
            if index >= self.inner.engine.listeners().count() {
                return Err(Error::InvalidListener(index));
            }
        }
        self.params().set_pinned_listener(index);
        self.params().request_resync();
        Ok(())
    }

    pub fn pinned_listener(&self) -> Option<usize> {
        self.params().pinned_listener()
    }

    /// The listener the monitor last spatialized against.
    pub fn listener(&self) -> Option<usize> {
        self.params().listener()
    }

    /// Let `shape` drive the mixer's position. The monitor polls it every block.
    pub fn bind_shape(&self, shape: Option<Arc<dyn Shape>>) {
        self.params().shape.store(shape.map(|s| Arc::new(ShapeBinding(s))));
        self.params().request_resync();
    }

    /// Distance to the pinned listener, or the nearest enabled one, computed now.
    pub fn distance_to_listener(&self) -> Option<f32> {
        let listeners = self.inner.engine.listeners();
        let position = self.position_3d();
        let index = self
            .pinned_listener()
            .filter(|&l| listeners.is_enabled(l))
            .or_else(|| listeners.find_closest(position))?;
        let listener = listeners.snapshot(index).ok()?;
        Some(listener.position.distance(position))
    }
}

fn check_distance(distance: f32) -> Result<()> {
    if distance.is_nan() || distance < 0.0 {
        return Err(Error::InvalidParameter(format!("distance {distance}")));
    }
    Ok(())
}

fn check_gain(gain: f32) -> Result<()> {
    if !(gain.is_finite() && gain >= 0.0) {
        return Err(Error::InvalidParameter(format!("gain {gain}")));
    }
    Ok(())
}

impl PartialEq for Mixer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Mixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixer")
            .field("group", &self.inner.group.id())
            .field("spatializer", &self.inner.spatializer)
            .finish()
    }
}
