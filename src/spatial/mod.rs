//! Spatialization: the per-mixer spatializer chain and the components it hosts.
//!
//! A [`Spatializer`] is a [`NodeChain`] laid out as
//!
//! ```text
//! group -> monitor -> [send] -> panner -> [send] -> attenuator -> [send] -> destination
//! ```
//!
//! where at most one reverb send exists, at the position its [`ReverbPlacement`] names.
//! Panner and attenuator come from a [`ComponentRegistry`] and can be swapped at runtime.

pub mod binaural;
pub mod components;
pub mod params;
pub mod registry;

pub use binaural::{BinauralContext, BinauralPanner};
pub use components::{BasicAttenuator, BasicPanner, InverseDistanceAttenuator};
pub use params::{Shape, SpatialParams, SpatialSnapshot, DEFAULT_PAN_SCALE};
pub use registry::{
    builtin, Component, ComponentContext, ComponentFactory, ComponentId, ComponentRegistry, ComponentRole,
    MAX_COMPONENTS,
};

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::chain::{ChainSource, NodeChain};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::handle::GraphNode;
use crate::mixer::MixerInner;
use crate::monitor::ListenerMonitor;
use crate::reverb::ReverbBus;

use self::params::ReverbSend;

/// Where a reverb send taps the spatializer chain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReverbPlacement {
    /// Before the panner: the send is not panned or attenuated.
    PrePan,
    /// Between panner and attenuator.
    #[default]
    PostPan,
    /// After the attenuator.
    PostAttenuate,
}

// Positions in the chain, in order. Sends sit on the odd ranks.
const MONITOR: u8 = 0;
const PANNER: u8 = 2;
const ATTENUATOR: u8 = 4;

impl ReverbPlacement {
    fn rank(self) -> u8 {
        match self {
            ReverbPlacement::PrePan => 1,
            ReverbPlacement::PostPan => 3,
            ReverbPlacement::PostAttenuate => 5,
        }
    }
}

struct Slot {
    id: ComponentId,
    node: GraphNode,
}

struct ReverbAttachment {
    bus: ReverbBus,
    splitter: GraphNode,
    shared: Arc<ReverbSend>,
}

struct SpatializerState {
    chain: NodeChain,
    monitor: Option<GraphNode>,
    panner: Option<Slot>,
    attenuator: Option<Slot>,
    reverb: Option<ReverbAttachment>,
    placement: ReverbPlacement,
}

impl SpatializerState {
    fn occupant(&self, rank: u8) -> Option<&GraphNode> {
        match rank {
            MONITOR => self.monitor.as_ref(),
            PANNER => self.panner.as_ref().map(|s| &s.node),
            ATTENUATOR => self.attenuator.as_ref().map(|s| &s.node),
            rank => self
                .reverb
                .as_ref()
                .filter(|_| self.placement.rank() == rank)
                .map(|s| &s.splitter),
        }
    }

    /// The nearest occupied position before `rank`; `None` means the chain head.
    fn anchor(&self, rank: u8) -> Option<GraphNode> {
        (0..rank).rev().find_map(|r| self.occupant(r)).cloned()
    }

    fn slot_mut(&mut self, role: ComponentRole) -> &mut Option<Slot> {
        match role {
            ComponentRole::Panner => &mut self.panner,
            ComponentRole::Attenuator => &mut self.attenuator,
        }
    }
}

/// The spatialization chain of one mixer.
///
/// Holds exactly one panner and one attenuator at a time (fewer only when the registry
/// has nothing enabled for a role) and at most one reverb send.
pub struct Spatializer {
    engine: Engine,
    params: Arc<SpatialParams>,
    state: Mutex<SpatializerState>,
    panner_swaps: AtomicU64,
    attenuator_swaps: AtomicU64,
}

impl Spatializer {
    /// A spatializer between `group` (not owned) and `destination`'s input bus.
    pub(crate) fn new(engine: &Engine, group: &GraphNode, destination: (GraphNode, usize)) -> Result<Self> {
        let chain = NodeChain::new(Some(ChainSource::Borrowed(group.downgrade())), Some(destination))?;
        let params = Arc::new(SpatialParams::new());
        let registry = engine.registry();
        SpatialParams::store_id(&params.preferred_panner, registry.default_id(ComponentRole::Panner));
        SpatialParams::store_id(&params.preferred_attenuator, registry.default_id(ComponentRole::Attenuator));

        Ok(Self {
            engine: engine.clone(),
            params,
            state: Mutex::new(SpatializerState {
                chain,
                monitor: None,
                panner: None,
                attenuator: None,
                reverb: None,
                placement: ReverbPlacement::default(),
            }),
            panner_swaps: AtomicU64::new(0),
            attenuator_swaps: AtomicU64::new(0),
        })
    }

    /// Put the listener monitor at the head of the chain.
    pub(crate) fn install_monitor(&self, mixer: Weak<MixerInner>) -> Result<()> {
        let monitor = ListenerMonitor::new(
            self.engine.channels(),
            self.params.clone(),
            self.engine.listeners().clone(),
            self.engine.registry().clone(),
            self.engine.reconfigure_queue().clone(),
            mixer,
        );
        let node = self.engine.add_node(monitor)?;
        let mut state = self.state.lock();
        state.chain.add_node(&node, None, 0)?;
        state.monitor = Some(node);
        Ok(())
    }

    /// Wire the components the registry resolves for the current preferences.
    pub(crate) fn init_components(&self) -> Result<()> {
        let registry = self.engine.registry();
        for role in [ComponentRole::Panner, ComponentRole::Attenuator] {
            let preferred = SpatialParams::load_id(self.preferred_slot(role));
            if let Some(id) = registry.resolve(role, preferred) {
                self.replace_component(role, id)?;
            }
        }
        Ok(())
    }

    pub fn params(&self) -> &Arc<SpatialParams> {
        &self.params
    }

    fn preferred_slot(&self, role: ComponentRole) -> &AtomicU32 {
        match role {
            ComponentRole::Panner => &self.params.preferred_panner,
            ComponentRole::Attenuator => &self.params.preferred_attenuator,
        }
    }

    fn current_slot(&self, role: ComponentRole) -> &AtomicU32 {
        match role {
            ComponentRole::Panner => &self.params.current_panner,
            ComponentRole::Attenuator => &self.params.current_attenuator,
        }
    }

    fn swaps(&self, role: ComponentRole) -> &AtomicU64 {
        match role {
            ComponentRole::Panner => &self.panner_swaps,
            ComponentRole::Attenuator => &self.attenuator_swaps,
        }
    }

    /// Build component `id` and put it in its slot, releasing the previous occupant.
    ///
    /// The new node is wired in before the old one is taken out, so the chain stays
    /// connected throughout. Fails without side effects if the component is unknown,
    /// disabled, or cannot be built.
    fn replace_component(&self, role: ComponentRole, id: ComponentId) -> Result<()> {
        let ctx = ComponentContext {
            engine: &self.engine,
            params: &self.params,
        };
        let processor = self.engine.registry().create(role, id, &ctx)?;
        let node = self.engine.add_boxed(processor)?;

        let mut state = self.state.lock();
        let rank = match role {
            ComponentRole::Panner => PANNER,
            ComponentRole::Attenuator => ATTENUATOR,
        };
        let anchor = state.anchor(rank);
        let previous = state.slot_mut(role).as_ref().map(|s| s.node.clone());
        match &previous {
            Some(old) => {
                state.chain.add_node(&node, Some(old), 0)?;
                if let Err(e) = state.chain.remove_node(old) {
                    state.chain.remove_node(&node)?;
                    return Err(e);
                }
            }
            None => state.chain.add_node(&node, anchor.as_ref(), 0)?,
        }
        *state.slot_mut(role) = Some(Slot { id, node });
        drop(state);

        SpatialParams::store_id(self.current_slot(role), Some(id));
        self.swaps(role).fetch_add(1, Ordering::AcqRel);
        self.params.request_resync();
        debug!(%role, id, name = ?self.engine.registry().name(role, id), "component swapped in");
        Ok(())
    }

    /// Take the component out of its slot, linking its neighbours directly. Returns
    /// `Ok(false)` if the slot was already empty.
    fn clear_component(&self, role: ComponentRole) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(node) = state.slot_mut(role).as_ref().map(|s| s.node.clone()) else {
            return Ok(false);
        };
        state.chain.remove_node(&node)?;
        *state.slot_mut(role) = None;
        drop(state);

        SpatialParams::store_id(self.current_slot(role), None);
        self.swaps(role).fetch_add(1, Ordering::AcqRel);
        self.params.request_resync();
        debug!(%role, "component removed, nothing enabled to replace it");
        Ok(true)
    }

    /// Wire `id`, or empty the slot with `None`.
    fn switch_component(&self, role: ComponentRole, id: Option<ComponentId>) -> Result<()> {
        match id {
            Some(id) => self.replace_component(role, id),
            None => self.clear_component(role).map(|_| ()),
        }
    }

    fn set_by_id(&self, role: ComponentRole, id: ComponentId) -> Result<()> {
        self.replace_component(role, id)?;
        SpatialParams::store_id(self.preferred_slot(role), Some(id));
        Ok(())
    }

    /// Wire panner `id` and make it the preferred one. Unknown or disabled IDs fail
    /// without changing anything.
    pub fn set_panner_by_id(&self, id: ComponentId) -> Result<()> {
        self.set_by_id(ComponentRole::Panner, id)
    }

    /// Wire attenuator `id` and make it the preferred one.
    pub fn set_attenuator_by_id(&self, id: ComponentId) -> Result<()> {
        self.set_by_id(ComponentRole::Attenuator, id)
    }

    fn set_preferred(&self, role: ComponentRole, id: ComponentId) -> Result<()> {
        let registry = self.engine.registry();
        if !registry.contains(role, id) {
            return Err(Error::UnknownComponent { role, id });
        }
        SpatialParams::store_id(self.preferred_slot(role), Some(id));
        let target = registry.resolve(role, Some(id));
        if target == SpatialParams::load_id(self.current_slot(role)) {
            return Ok(());
        }
        self.switch_component(role, target)
    }

    /// Record the panner this spatializer should use whenever it is enabled.
    ///
    /// Unlike [`set_panner_by_id`](Self::set_panner_by_id) this accepts a disabled
    /// component: the spatializer falls back for now and switches over once it is
    /// enabled.
    pub fn set_preferred_panner_id(&self, id: ComponentId) -> Result<()> {
        self.set_preferred(ComponentRole::Panner, id)
    }

    pub fn set_preferred_attenuator_id(&self, id: ComponentId) -> Result<()> {
        self.set_preferred(ComponentRole::Attenuator, id)
    }

    /// Swap the wired component without touching the preference. `None` empties the slot.
    pub(crate) fn switch_panner(&self, id: Option<ComponentId>) -> Result<()> {
        self.switch_component(ComponentRole::Panner, id)
    }

    pub(crate) fn switch_attenuator(&self, id: Option<ComponentId>) -> Result<()> {
        self.switch_component(ComponentRole::Attenuator, id)
    }

    pub(crate) fn reconfiguration_done(&self) {
        self.params.reconfigure_pending.store(false, Ordering::Release);
    }

    pub fn preferred_panner_id(&self) -> Option<ComponentId> {
        SpatialParams::load_id(&self.params.preferred_panner)
    }

    pub fn preferred_attenuator_id(&self) -> Option<ComponentId> {
        SpatialParams::load_id(&self.params.preferred_attenuator)
    }

    pub fn current_panner_id(&self) -> Option<ComponentId> {
        SpatialParams::load_id(&self.params.current_panner)
    }

    pub fn current_attenuator_id(&self) -> Option<ComponentId> {
        SpatialParams::load_id(&self.params.current_attenuator)
    }

    pub fn panner(&self) -> Option<GraphNode> {
        self.state.lock().panner.as_ref().map(|s| s.node.clone())
    }

    pub fn attenuator(&self) -> Option<GraphNode> {
        self.state.lock().attenuator.as_ref().map(|s| s.node.clone())
    }

    /// How many panner swaps this spatializer has performed.
    pub fn panner_swaps(&self) -> u64 {
        self.panner_swaps.load(Ordering::Acquire)
    }

    pub fn attenuator_swaps(&self) -> u64 {
        self.attenuator_swaps.load(Ordering::Acquire)
    }

    /// Attach to `bus` with a send at `placement`, or detach with `None`.
    ///
    /// An existing send is torn down first. If the new send cannot be built the
    /// spatializer is left without one.
    pub fn set_reverb3d(&self, bus: Option<&ReverbBus>, placement: ReverbPlacement) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(send) = state.reverb.take() {
            self.params.reverb_send.store(None);
            if let Err(e) = state.chain.remove_node(&send.splitter) {
                self.params.reverb_send.store(Some(send.shared.clone()));
                state.reverb = Some(send);
                return Err(e);
            }
            debug!(splitter = ?send.splitter.id(), "reverb send removed");
        }
        let Some(bus) = bus else {
            state.placement = placement;
            return Ok(());
        };
        let splitter = bus.create_attachment(None, None)?;
        let anchor = state.anchor(placement.rank());
        state.chain.add_node(&splitter, anchor.as_ref(), 0)?;
        state.placement = placement;

        let shared = Arc::new(ReverbSend {
            splitter: splitter.shared().clone(),
            curve: bus.curve().clone(),
        });
        self.params.reverb_send.store(Some(shared.clone()));
        state.reverb = Some(ReverbAttachment {
            bus: bus.clone(),
            splitter,
            shared,
        });
        self.params.request_resync();
        debug!(?placement, "reverb send attached");
        Ok(())
    }

    pub fn reverb3d(&self) -> Option<ReverbBus> {
        self.state.lock().reverb.as_ref().map(|s| s.bus.clone())
    }

    pub fn reverb3d_placement(&self) -> ReverbPlacement {
        self.state.lock().placement
    }

    /// The send splitter, while a reverb bus is attached.
    pub fn reverb_send(&self) -> Option<GraphNode> {
        self.state.lock().reverb.as_ref().map(|s| s.splitter.clone())
    }

    /// The chain's elements in order, monitor first.
    pub fn nodes(&self) -> Vec<GraphNode> {
        self.state.lock().chain.iter().cloned().collect()
    }

    /// Whether the chain is wired end to end.
    pub fn is_linked(&self) -> bool {
        self.state.lock().chain.is_linked()
    }

    /// Point the end of the chain at another node.
    pub(crate) fn set_destination(&self, destination: (GraphNode, usize)) -> Result<()> {
        self.state.lock().chain.set_endpoint(Some(destination))
    }

    pub fn rolloff(&self) -> f32 {
        self.params.rolloff.get()
    }

    /// Clamped to `0..=100`.
    pub fn set_rolloff(&self, rolloff: f32) {
        self.params.rolloff.set(clamp_factor(rolloff));
        self.params.request_resync();
    }

    pub fn directional_attenuation_factor(&self) -> f32 {
        self.params.directional_attenuation_factor.get()
    }

    /// Clamped to `0..=100`.
    pub fn set_directional_attenuation_factor(&self, factor: f32) {
        self.params.directional_attenuation_factor.set(clamp_factor(factor));
        self.params.request_resync();
    }

    pub fn pan_scale(&self) -> f32 {
        self.params.pan_scale.get()
    }

    /// Decibels of pan per unit of sideways distance for the basic panner.
    pub fn set_pan_scale(&self, scale: f32) {
        if scale.is_finite() {
            self.params.pan_scale.set(scale.max(0.0));
        }
    }
}

fn clamp_factor(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

impl fmt::Debug for Spatializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spatializer")
            .field("panner", &self.current_panner_id())
            .field("attenuator", &self.current_attenuator_id())
            .field("reverb", &self.reverb_send().map(|n| n.id()))
            .finish()
    }
}
