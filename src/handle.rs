//! Counted handles to graph nodes.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::error::{Error, Result};
use crate::graph::{GraphShared, NodeShared, NO_TIME};
use crate::node::{AudioNode, BusLayout, NodeId, NodeState};

pub(crate) struct NodeInner {
    id: NodeId,
    name: &'static str,
    layout: BusLayout,
    shared: Arc<NodeShared>,
    graph: Arc<GraphShared>,
}

impl Drop for NodeInner {
    fn drop(&mut self) {
        // Removing the node drops every edge touching it, in both graph copies.
        self.graph.remove(self.id);
    }
}

/// A counted reference to a node in an engine's graph.
///
/// Cloning shares the node. When the last clone is dropped the node is detached from
/// everything and removed from the graph.
///
/// Attachment is not ownership: a node attached into another keeps no reference to its
/// destination. Whatever built the connection (a [`NodeChain`](crate::NodeChain), a
/// [`Mixer`](crate::Mixer)) holds the handles that keep both ends alive.
#[derive(Clone)]
pub struct GraphNode {
    inner: Arc<NodeInner>,
}

impl GraphNode {
    pub(crate) fn new(graph: &Arc<GraphShared>, processor: Box<dyn AudioNode>) -> Result<Self> {
        let name = processor.name();
        let (id, layout, shared) = graph.insert(processor)?;
        Ok(Self {
            inner: Arc::new(NodeInner {
                id,
                name,
                layout,
                shared,
                graph: graph.clone(),
            }),
        })
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn layout(&self) -> &BusLayout {
        &self.inner.layout
    }

    pub fn input_bus_count(&self) -> usize {
        self.inner.layout.input_bus_count()
    }

    pub fn output_bus_count(&self) -> usize {
        self.inner.layout.output_bus_count()
    }

    /// Channel count of an input bus, or 0 if it does not exist.
    pub fn input_channels(&self, bus: usize) -> usize {
        self.inner.layout.input_channels(bus).unwrap_or(0)
    }

    /// Channel count of an output bus, or 0 if it does not exist.
    pub fn output_channels(&self, bus: usize) -> usize {
        self.inner.layout.output_channels(bus).unwrap_or(0)
    }

    /// Connect output bus `bus` to `destination`'s input bus `destination_bus`.
    ///
    /// An output bus feeds one destination; attaching an attached bus re-points it.
    /// Fails without changing anything if either node is gone, a bus index is out of
    /// range, the channel counts differ, or the connection would close a cycle.
    pub fn attach_output_bus(&self, bus: usize, destination: &GraphNode, destination_bus: usize) -> Result<()> {
        if !Arc::ptr_eq(&self.inner.graph, &destination.inner.graph) {
            return Err(Error::Backend("nodes belong to different engines".into()));
        }
        self.inner
            .graph
            .attach(self.inner.id, bus, destination.inner.id, destination_bus)
    }

    /// Disconnect an output bus. Returns `Ok(false)` if it was not attached.
    pub fn detach_output_bus(&self, bus: usize) -> Result<bool> {
        self.inner.graph.detach(self.inner.id, bus)
    }

    /// Disconnect every output bus. Returns `Ok(false)` if none was attached.
    pub fn detach_all_output_buses(&self) -> Result<bool> {
        self.inner.graph.detach_all(self.inner.id)
    }

    /// Point an output bus back at a recorded destination, or detach it when there was
    /// none. Used to undo a re-point when a later step of an edit fails.
    pub(crate) fn restore_output_bus(&self, bus: usize, previous: Option<(NodeId, usize)>) -> Result<()> {
        match previous {
            Some((to, input_bus)) => self.inner.graph.attach(self.inner.id, bus, to, input_bus),
            None => self.inner.graph.detach(self.inner.id, bus).map(|_| ()),
        }
    }

    /// The node and input bus an output bus currently feeds.
    pub fn output_destination(&self, bus: usize) -> Option<(NodeId, usize)> {
        self.inner.graph.destination(self.inner.id, bus)
    }

    /// Number of sources attached to an input bus.
    pub fn input_connection_count(&self, bus: usize) -> usize {
        self.inner.graph.input_connections(self.inner.id, bus)
    }

    /// Whether the node is still part of its graph.
    pub fn is_alive(&self) -> bool {
        self.inner.graph.contains(self.inner.id)
    }

    /// Set the gain applied to everything leaving an output bus.
    ///
    /// Lock-free; the new volume takes effect from the next block.
    pub fn set_output_bus_volume(&self, bus: usize, volume: f32) -> Result<()> {
        if !volume.is_finite() {
            return Err(Error::InvalidParameter(format!("bus volume {volume}")));
        }
        if self.inner.shared.set_volume(bus, volume) {
            Ok(())
        } else {
            Err(Error::InvalidBus {
                node: self.inner.id,
                direction: "output",
                bus,
            })
        }
    }

    /// Volume of an output bus; 0 for a bus that does not exist.
    pub fn output_bus_volume(&self, bus: usize) -> f32 {
        self.inner.shared.volume(bus)
    }

    pub fn state(&self) -> NodeState {
        self.inner.shared.state()
    }

    pub fn set_state(&self, state: NodeState) {
        self.inner.shared.set_state(state);
    }

    /// Schedule the global frame at which `state` takes effect. `None` clears it.
    pub fn set_state_time(&self, state: NodeState, time: Option<u64>) {
        self.inner.shared.set_state_time(state, time.unwrap_or(NO_TIME));
    }

    pub fn state_time(&self, state: NodeState) -> Option<u64> {
        Some(self.inner.shared.state_time(state)).filter(|&t| t != NO_TIME)
    }

    /// Effective state at global frame `time`, taking scheduled times into account.
    pub fn state_by_time(&self, time: u64) -> NodeState {
        self.inner.shared.state_by_time_range(time, time + 1)
    }

    pub fn state_by_time_range(&self, begin: u64, end: u64) -> NodeState {
        self.inner.shared.state_by_time_range(begin, end)
    }

    /// Local time in frames: how long this node has been processing.
    pub fn time(&self) -> u64 {
        self.inner.shared.time()
    }

    pub fn set_time(&self, time: u64) {
        self.inner.shared.set_time(time);
    }

    pub fn downgrade(&self) -> WeakGraphNode {
        WeakGraphNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live handles to this node.
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub(crate) fn shared(&self) -> &Arc<NodeShared> {
        &self.inner.shared
    }
}

impl PartialEq for GraphNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for GraphNode {}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("layout", &self.inner.layout)
            .finish()
    }
}

/// A non-owning reference to a graph node.
#[derive(Clone, Default)]
pub struct WeakGraphNode {
    inner: Weak<NodeInner>,
}

impl WeakGraphNode {
    pub fn upgrade(&self) -> Option<GraphNode> {
        self.inner.upgrade().map(|inner| GraphNode { inner })
    }
}

impl fmt::Debug for WeakGraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakGraphNode({:?})", node.id()),
            None => write!(f, "WeakGraphNode(<dropped>)"),
        }
    }
}
