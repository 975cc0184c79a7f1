//! Shared reverb bus with distance-driven send levels.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::handle::GraphNode;
use crate::lockfree::AtomicParam;
use crate::math::db_to_linear;
use crate::mixer::Mixer;
use crate::nodes::{Passthrough, Splitter};

/// Distance to send-volume mapping of a reverb bus.
///
/// Volumes are linear gains. The send rises linearly from `min_volume` at distance 0 to
/// `max_volume` at `max_volume_distance` and stays there beyond it.
#[derive(Debug)]
pub struct ReverbCurve {
    min_volume: AtomicParam,
    max_volume: AtomicParam,
    max_volume_distance: AtomicParam,
}

impl ReverbCurve {
    pub fn new(min_volume: f32, max_volume: f32, max_volume_distance: f32) -> Result<Self> {
        validate(min_volume, max_volume, max_volume_distance)?;
        Ok(Self {
            min_volume: AtomicParam::new(min_volume),
            max_volume: AtomicParam::new(max_volume),
            max_volume_distance: AtomicParam::new(max_volume_distance),
        })
    }

    pub fn min_volume(&self) -> f32 {
        self.min_volume.get()
    }

    pub fn max_volume(&self) -> f32 {
        self.max_volume.get()
    }

    pub fn max_volume_distance(&self) -> f32 {
        self.max_volume_distance.get()
    }

    /// Send volume for a source `distance` away from its listener. Lock-free.
    pub fn volume_at(&self, distance: f32) -> f32 {
        let (min, max) = (self.min_volume.get(), self.max_volume.get());
        let t = (distance / self.max_volume_distance.get()).clamp(0.0, 1.0);
        let t = if t.is_nan() { 0.0 } else { t };
        (min + (max - min) * t).max(min).min(max)
    }

    fn set(&self, min_volume: f32, max_volume: f32, max_volume_distance: f32) -> Result<()> {
        validate(min_volume, max_volume, max_volume_distance)?;
        self.min_volume.set(min_volume);
        self.max_volume.set(max_volume);
        self.max_volume_distance.set(max_volume_distance);
        Ok(())
    }
}

impl Default for ReverbCurve {
    fn default() -> Self {
        Self {
            min_volume: AtomicParam::new(db_to_linear(-7.0)),
            max_volume: AtomicParam::new(db_to_linear(-5.0)),
            max_volume_distance: AtomicParam::new(7.0),
        }
    }
}

fn validate(min_volume: f32, max_volume: f32, max_volume_distance: f32) -> Result<()> {
    if !(min_volume.is_finite() && max_volume.is_finite() && min_volume >= 0.0) {
        return Err(Error::InvalidParameter(format!(
            "reverb volumes must be finite and non-negative, got {min_volume}..{max_volume}"
        )));
    }
    if min_volume > max_volume {
        return Err(Error::InvalidParameter(format!(
            "reverb min volume {min_volume} exceeds max volume {max_volume}"
        )));
    }
    if !(max_volume_distance.is_finite() && max_volume_distance > 0.0) {
        return Err(Error::InvalidParameter(format!(
            "reverb max volume distance must be positive, got {max_volume_distance}"
        )));
    }
    Ok(())
}

struct Routing {
    reverb: Option<GraphNode>,
    mixer: Option<Mixer>,
}

struct ReverbBusInner {
    engine: Engine,
    node: GraphNode,
    curve: Arc<ReverbCurve>,
    routing: Mutex<Routing>,
}

/// A passthrough node collecting reverb sends from many spatializers.
///
/// Its output feeds the reverb effect node (if one is set), which feeds the destination
/// mixer or, without one, the engine endpoint. Cloning shares the bus.
#[derive(Clone)]
pub struct ReverbBus {
    inner: Arc<ReverbBusInner>,
}

impl ReverbBus {
    pub fn new(engine: &Engine, reverb: Option<GraphNode>, destination: Option<&Mixer>) -> Result<Self> {
        let node = engine.add_node(Passthrough::new(engine.channels()))?;
        let bus = Self {
            inner: Arc::new(ReverbBusInner {
                engine: engine.clone(),
                node,
                curve: Arc::new(ReverbCurve::default()),
                routing: Mutex::new(Routing {
                    reverb: None,
                    mixer: destination.cloned(),
                }),
            }),
        };
        bus.set_reverb(reverb)?;
        Ok(bus)
    }

    /// The bus's input node. Sends attach to its input bus 0.
    pub fn node(&self) -> &GraphNode {
        &self.inner.node
    }

    pub fn curve(&self) -> &Arc<ReverbCurve> {
        &self.inner.curve
    }

    pub fn reverb(&self) -> Option<GraphNode> {
        self.inner.routing.lock().reverb.clone()
    }

    pub fn mixer(&self) -> Option<Mixer> {
        self.inner.routing.lock().mixer.clone()
    }

    /// Number of live handles to this bus, including the ones spatializers hold.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    fn destination(&self, routing: &Routing) -> GraphNode {
        match &routing.mixer {
            Some(mixer) => mixer.input().clone(),
            None => self.inner.engine.endpoint().clone(),
        }
    }

    /// Swap the reverb effect. Attached spatializers are not touched.
    pub fn set_reverb(&self, reverb: Option<GraphNode>) -> Result<()> {
        let mut routing = self.inner.routing.lock();
        let destination = self.destination(&routing);
        match &reverb {
            Some(effect) => {
                effect.attach_output_bus(0, &destination, 0)?;
                if let Err(e) = self.inner.node.attach_output_bus(0, effect, 0) {
                    effect.detach_output_bus(0)?;
                    return Err(e);
                }
            }
            None => self.inner.node.attach_output_bus(0, &destination, 0)?,
        }
        if let Some(old) = routing.reverb.take() {
            if reverb.as_ref() != Some(&old) {
                old.detach_output_bus(0)?;
            }
        }
        debug!(reverb = ?reverb.as_ref().map(GraphNode::id), "reverb effect set");
        routing.reverb = reverb;
        Ok(())
    }

    /// Route the bus into `mixer`, or into the engine endpoint with `None`.
    pub fn set_mixer(&self, mixer: Option<&Mixer>) -> Result<()> {
        let mut routing = self.inner.routing.lock();
        let destination = match mixer {
            Some(mixer) => mixer.input().clone(),
            None => self.inner.engine.endpoint().clone(),
        };
        let tail = routing.reverb.clone().unwrap_or_else(|| self.inner.node.clone());
        tail.attach_output_bus(0, &destination, 0)?;
        routing.mixer = mixer.cloned();
        Ok(())
    }

    pub fn min_volume(&self) -> f32 {
        self.inner.curve.min_volume()
    }

    pub fn max_volume(&self) -> f32 {
        self.inner.curve.max_volume()
    }

    pub fn max_volume_distance(&self) -> f32 {
        self.inner.curve.max_volume_distance()
    }

    pub fn set_min_volume(&self, volume: f32) -> Result<()> {
        self.update(volume, self.max_volume(), self.max_volume_distance())
    }

    pub fn set_max_volume(&self, volume: f32) -> Result<()> {
        self.update(self.min_volume(), volume, self.max_volume_distance())
    }

    pub fn set_volume_range(&self, min_volume: f32, max_volume: f32) -> Result<()> {
        self.update(min_volume, max_volume, self.max_volume_distance())
    }

    pub fn set_max_volume_distance(&self, distance: f32) -> Result<()> {
        self.update(self.min_volume(), self.max_volume(), distance)
    }

    fn update(&self, min_volume: f32, max_volume: f32, max_volume_distance: f32) -> Result<()> {
        self.inner.curve.set(min_volume, max_volume, max_volume_distance)?;
        // monitors recompute send volumes on the next epoch change
        self.inner.engine.epoch().bump();
        Ok(())
    }

    pub fn get_volume_at(&self, distance: f32) -> f32 {
        self.inner.curve.volume_at(distance)
    }

    /// Build a send: a two-output splitter whose bus 1 feeds this bus.
    ///
    /// Bus 0 goes to `dry_output` when given. When `dry_input` is given its output bus 0
    /// is attached to the splitter. On any failure the splitter is torn down again and
    /// nothing else changes.
    pub fn create_attachment(
        &self,
        dry_input: Option<&GraphNode>,
        dry_output: Option<(&GraphNode, usize)>,
    ) -> Result<GraphNode> {
        let splitter = self
            .inner
            .engine
            .add_node(Splitter::pair(self.inner.engine.channels()))?;
        splitter.attach_output_bus(1, &self.inner.node, 0)?;
        splitter.set_output_bus_volume(1, self.inner.curve.volume_at(0.0))?;
        if let Some((output, bus)) = dry_output {
            splitter.attach_output_bus(0, output, bus)?;
        }
        if let Some(input) = dry_input {
            input.attach_output_bus(0, &splitter, 0)?;
        }
        debug!(splitter = ?splitter.id(), bus = ?self.inner.node.id(), "reverb send created");
        Ok(splitter)
    }
}

impl PartialEq for ReverbBus {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ReverbBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReverbBus")
            .field("node", &self.inner.node.id())
            .field("curve", &self.inner.curve)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn curve_matches_reference_points() {
        let curve = ReverbCurve::new(0.3, 2.0, 15.0).unwrap();
        assert_relative_eq!(curve.volume_at(0.0), 0.3);
        assert_relative_eq!(curve.volume_at(15.0), 2.0);
        assert_relative_eq!(curve.volume_at(30.0), 2.0);
        assert_relative_eq!(curve.volume_at(7.5), 1.15, epsilon = 1e-6);
    }

    #[test]
    fn invalid_curves_are_rejected() {
        assert!(matches!(ReverbCurve::new(1.0, 0.5, 1.0), Err(Error::InvalidParameter(_))));
        assert!(matches!(ReverbCurve::new(0.1, 0.5, 0.0), Err(Error::InvalidParameter(_))));
        assert!(matches!(ReverbCurve::new(f32::NAN, 0.5, 1.0), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn default_curve_is_in_range() {
        let curve = ReverbCurve::default();
        assert!(curve.min_volume() <= curve.max_volume());
        assert_relative_eq!(curve.volume_at(100.0), db_to_linear(-5.0));
    }
}
