//! The audio engine: graph, endpoint, listeners, time base and output device.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "cpal_sink")]
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::graph::GraphShared;
use crate::handle::GraphNode;
use crate::listener::{Cone, EpochCounter, Listeners};
use crate::math::Vec3;
use crate::mixer::Mixer;
use crate::node::AudioNode;
use crate::nodes::Passthrough;
use crate::spatial::{ComponentId, ComponentRegistry};
use crate::worker::{ReconfigureQueue, ReconfigureRequest, Worker};

struct EngineInner {
    sample_rate: u32,
    channels: usize,
    durations_in_frames: bool,
    no_device: bool,
    percentage_attributes: bool,
    graph: Arc<GraphShared>,
    time: Arc<AtomicU64>,
    listeners: Arc<Listeners>,
    registry: Arc<ComponentRegistry>,
    running: AtomicBool,
    #[cfg(feature = "cpal_sink")]
    device: Mutex<Option<crate::device::OutputDevice>>,
    endpoint: GraphNode,
    worker: Worker,
}

/// Handle to an audio engine. Cloning shares the engine.
///
/// ```
/// use klangraum::{Engine, EngineConfig};
///
/// let engine = Engine::new(EngineConfig::new().no_device(true)).unwrap();
/// let mut out = vec![0.0; 256];
/// engine.read(&mut out);
/// assert!(out.iter().all(|s| *s == 0.0));
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let registry = config.registry.clone().unwrap_or_else(ComponentRegistry::global);
        let time = Arc::new(AtomicU64::new(0));
        let graph = GraphShared::new(config.sample_rate, config.channels, config.command_queue_capacity, time.clone());
        let endpoint = GraphNode::new(&graph, Box::new(Passthrough::new(config.channels)))?;
        graph.set_endpoint(endpoint.id())?;
        let listeners = Arc::new(Listeners::new(config.listeners, registry.epoch().clone()));
        let worker = Worker::spawn(config.reconfigure_queue_capacity)?;

        let engine = Self {
            inner: Arc::new(EngineInner {
                sample_rate: config.sample_rate,
                channels: config.channels,
                durations_in_frames: config.durations_in_frames,
                no_device: config.no_device,
                percentage_attributes: config.percentage_attributes,
                graph,
                time,
                listeners,
                registry,
                running: AtomicBool::new(false),
                #[cfg(feature = "cpal_sink")]
                device: Mutex::new(None),
                endpoint,
                worker,
            }),
        };
        debug!(?config, "engine created");
        if config.auto_start && !engine.start() {
            warn!("engine did not start automatically");
        }
        Ok(engine)
    }

    /// A device-less engine with the given channel count and rate, rendered with
    /// [`read`](Self::read).
    pub fn offline(sample_rate: u32, channels: usize) -> Result<Self> {
        Self::new(
            EngineConfig::new()
                .sample_rate(sample_rate)
                .channels(channels)
                .no_device(true)
                .auto_start(false),
        )
    }

    /// Begin rendering. Returns `false` if already running or the device cannot open.
    pub fn start(&self) -> bool {
        if self.inner.running.load(Ordering::Acquire) {
            return false;
        }
        if !self.inner.no_device && !self.open_device() {
            return false;
        }
        let started = self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if started {
            debug!("engine started");
        }
        started
    }

    #[cfg(feature = "cpal_sink")]
    fn open_device(&self) -> bool {
        let mut device = self.inner.device.lock();
        if device.is_some() {
            return true;
        }
        match crate::device::OutputDevice::open(
            self.inner.graph.renderer().clone(),
            self.inner.sample_rate,
            self.inner.channels,
        ) {
            Ok(opened) => {
                *device = Some(opened);
                true
            }
            Err(e) => {
                warn!(error = %e, "could not open output device");
                false
            }
        }
    }

    #[cfg(not(feature = "cpal_sink"))]
    fn open_device(&self) -> bool {
        warn!("built without the cpal_sink feature; use no_device and Engine::read");
        false
    }

    /// Stop rendering. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        #[cfg(feature = "cpal_sink")]
        {
            self.inner.device.lock().take();
        }
        debug!("engine stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Render interleaved frames. For device-less engines this is how audio is pulled;
    /// with a device running it steals frames from the device.
    pub fn read(&self, out: &mut [f32]) {
        self.inner.graph.renderer().lock().render(out);
    }

    pub fn sample_rate(&self) -> u32 {
        self.inner.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.inner.channels
    }

    pub fn percentage_attributes(&self) -> bool {
        self.inner.percentage_attributes
    }

    pub fn durations_in_frames(&self) -> bool {
        self.inner.durations_in_frames
    }

    /// Frames rendered so far.
    pub fn time_in_frames(&self) -> u64 {
        self.inner.time.load(Ordering::Acquire)
    }

    /// Engine time in its duration units (frames or milliseconds).
    pub fn time(&self) -> u64 {
        self.from_frames(self.time_in_frames())
    }

    /// Move the engine clock, in its duration units.
    pub fn set_time(&self, time: u64) {
        self.inner.time.store(self.to_frames(time), Ordering::Release);
    }

    pub(crate) fn to_frames(&self, time: u64) -> u64 {
        if self.inner.durations_in_frames {
            time
        } else {
            time.saturating_mul(self.inner.sample_rate as u64) / 1000
        }
    }

    pub(crate) fn from_frames(&self, frames: u64) -> u64 {
        if self.inner.durations_in_frames {
            frames
        } else {
            frames.saturating_mul(1000) / self.inner.sample_rate as u64
        }
    }

    /// Master volume, applied at the endpoint. Linear.
    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.inner.endpoint.set_output_bus_volume(0, volume)
    }

    pub fn volume(&self) -> f32 {
        self.inner.endpoint.output_bus_volume(0)
    }

    /// The node every audible path ends in.
    pub fn endpoint(&self) -> &GraphNode {
        &self.inner.endpoint
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.inner.registry
    }

    /// The counter listener and component changes bump.
    pub fn epoch(&self) -> &Arc<EpochCounter> {
        self.inner.registry.epoch()
    }

    pub fn listeners(&self) -> &Arc<Listeners> {
        &self.inner.listeners
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.count()
    }

    pub fn set_listener_position(&self, index: usize, position: Vec3) -> Result<()> {
        self.inner.listeners.set_position(index, position)
    }

    pub fn set_listener_direction(&self, index: usize, direction: Vec3) -> Result<()> {
        self.inner.listeners.set_direction(index, direction)
    }

    pub fn set_listener_velocity(&self, index: usize, velocity: Vec3) -> Result<()> {
        self.inner.listeners.set_velocity(index, velocity)
    }

    pub fn set_listener_cone(&self, index: usize, cone: Cone) -> Result<()> {
        self.inner.listeners.set_cone(index, cone)
    }

    pub fn set_listener_world_up(&self, index: usize, up: Vec3) -> Result<()> {
        self.inner.listeners.set_world_up(index, up)
    }

    pub fn set_listener_enabled(&self, index: usize, enabled: bool) -> Result<()> {
        self.inner.listeners.set_enabled(index, enabled)
    }

    /// The enabled listener nearest `position`, or `None` when all are disabled.
    pub fn find_closest_listener(&self, position: Vec3) -> Option<usize> {
        self.inner.listeners.find_closest(position)
    }

    /// Add a processing node to the graph. Dropping every handle removes it again.
    pub fn add_node(&self, node: impl AudioNode) -> Result<GraphNode> {
        self.add_boxed(Box::new(node))
    }

    pub(crate) fn add_boxed(&self, node: Box<dyn AudioNode>) -> Result<GraphNode> {
        GraphNode::new(&self.inner.graph, node)
    }

    /// A mixer routed to `destination`, or to the endpoint.
    pub fn new_mixer(&self, destination: Option<&Mixer>) -> Result<Mixer> {
        Mixer::new(self, destination)
    }

    pub(crate) fn reconfigure_queue(&self) -> &ReconfigureQueue {
        self.inner.worker.queue()
    }

    /// Queue a component swap for `mixer` on the reconfiguration worker, exactly as a
    /// monitor would. Requests are applied in order; blocks while the queue is full.
    pub fn request_reconfiguration(
        &self,
        mixer: &Mixer,
        panner: Option<ComponentId>,
        attenuator: Option<ComponentId>,
    ) -> Result<()> {
        if panner.is_none() && attenuator.is_none() {
            return Err(Error::InvalidParameter("reconfiguration names no component".into()));
        }
        mixer
            .spatializer()
            .params()
            .reconfigure_pending
            .store(true, Ordering::Release);
        self.reconfigure_queue().push(ReconfigureRequest {
            mixer: mixer.inner().clone(),
            panner: panner.map(Some),
            attenuator: attenuator.map(Some),
        })
    }

    /// Block until every queued reconfiguration has been applied.
    pub fn flush_reconfigurations(&self) {
        self.reconfigure_queue().wait_idle();
    }

    /// Reconfigurations queued and not yet applied.
    pub fn pending_reconfigurations(&self) -> usize {
        self.reconfigure_queue().pending()
    }

    /// Number of nodes currently in the graph, the endpoint included.
    pub fn node_count(&self) -> usize {
        self.inner.graph.node_count()
    }
}

impl PartialEq for Engine {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("sample_rate", &self.inner.sample_rate)
            .field("channels", &self.inner.channels)
            .field("running", &self.is_running())
            .field("nodes", &self.node_count())
            .finish()
    }
}
