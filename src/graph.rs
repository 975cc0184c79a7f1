//! Backend node graph.
//!
//! The graph lives twice. Callers edit a topology-only mirror under a mutex, where every
//! edit is validated; accepted edits travel through an `rtrb` ring to the [`Renderer`],
//! which owns the processors and applies the backlog at the start of each block. The
//! renderer never takes the topology lock, and nodes it drops are handed back through a
//! second ring so their memory is freed on a caller thread.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use atomic_float::AtomicF32;
use hashbrown::HashMap;
use parking_lot::Mutex;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use petgraph::visit::{DfsPostOrder, EdgeRef, IntoEdgeReferences, Reversed, Visitable};
use petgraph::Direction;
use rtrb::{Consumer, Producer, PushError, RingBuffer};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::node::{AudioNode, Bus, BusLayout, NodeId, NodeState, ProcessContext, BLOCK_SIZE};

/// Marks an unset start or stop time.
pub(crate) const NO_TIME: u64 = u64::MAX;

/// Nodes and edges the renderer can hold before the caller has to grow it.
const INITIAL_CAPACITY: usize = 64;

const STARTED: u8 = 0;
const STOPPED: u8 = 1;

/// State shared between a node handle and the node's render-side copy.
///
/// Everything here is atomic so the render thread reads it without locking.
#[derive(Debug)]
pub(crate) struct NodeShared {
    volumes: Box<[AtomicF32]>,
    state: AtomicU8,
    start_time: AtomicU64,
    stop_time: AtomicU64,
    time: AtomicU64,
}

impl NodeShared {
    fn new(output_buses: usize) -> Self {
        Self {
            volumes: (0..output_buses).map(|_| AtomicF32::new(1.0)).collect(),
            state: AtomicU8::new(STARTED),
            start_time: AtomicU64::new(NO_TIME),
            stop_time: AtomicU64::new(NO_TIME),
            time: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn volume(&self, bus: usize) -> f32 {
        self.volumes
            .get(bus)
            .map_or(0.0, |v| v.load(Ordering::Relaxed))
    }

    /// Returns false if the bus does not exist. Safe to call from the render thread.
    #[inline]
    pub(crate) fn set_volume(&self, bus: usize, volume: f32) -> bool {
        match self.volumes.get(bus) {
            Some(v) => {
                v.store(volume, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub(crate) fn state(&self) -> NodeState {
        match self.state.load(Ordering::Acquire) {
            STARTED => NodeState::Started,
            _ => NodeState::Stopped,
        }
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        let raw = match state {
            NodeState::Started => STARTED,
            NodeState::Stopped => STOPPED,
        };
        self.state.store(raw, Ordering::Release);
    }

    pub(crate) fn state_time(&self, state: NodeState) -> u64 {
        match state {
            NodeState::Started => self.start_time.load(Ordering::Acquire),
            NodeState::Stopped => self.stop_time.load(Ordering::Acquire),
        }
    }

    pub(crate) fn set_state_time(&self, state: NodeState, time: u64) {
        match state {
            NodeState::Started => self.start_time.store(time, Ordering::Release),
            NodeState::Stopped => self.stop_time.store(time, Ordering::Release),
        }
    }

    /// State over the global time range `begin..end`.
    ///
    /// A started node is considered stopped if its scheduled start lies at or past the end
    /// of the range, or its scheduled stop lies at or before the beginning.
    pub(crate) fn state_by_time_range(&self, begin: u64, end: u64) -> NodeState {
        if self.state() == NodeState::Stopped {
            return NodeState::Stopped;
        }
        let start = self.start_time.load(Ordering::Acquire);
        let stop = self.stop_time.load(Ordering::Acquire);
        if start != NO_TIME && start >= end {
            return NodeState::Stopped;
        }
        if stop != NO_TIME && stop <= begin {
            return NodeState::Stopped;
        }
        NodeState::Started
    }

    pub(crate) fn time(&self) -> u64 {
        self.time.load(Ordering::Acquire)
    }

    pub(crate) fn set_time(&self, time: u64) {
        self.time.store(time, Ordering::Release);
    }

    fn advance_time(&self, frames: u64) {
        self.time.fetch_add(frames, Ordering::AcqRel);
    }
}

/// Edge weight: which output bus of the source feeds which input bus of the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Connection {
    pub output_bus: usize,
    pub input_bus: usize,
}

/// A node as the renderer sees it.
pub(crate) struct RenderNode {
    processor: Box<dyn AudioNode>,
    shared: Arc<NodeShared>,
    inputs: Vec<Bus>,
    outputs: Vec<Bus>,
}

pub(crate) enum GraphCommand {
    Insert {
        id: NodeId,
        node: Box<RenderNode>,
    },
    Remove {
        id: NodeId,
    },
    Connect {
        from: NodeId,
        output_bus: usize,
        to: NodeId,
        input_bus: usize,
    },
    Disconnect {
        from: NodeId,
        output_bus: usize,
    },
    SetEndpoint {
        id: NodeId,
    },
}

struct TopologyNode {
    layout: BusLayout,
    name: &'static str,
}

/// Caller-side mirror of the graph.
struct Topology {
    graph: StableGraph<TopologyNode, Connection>,
    indices: HashMap<NodeId, NodeIndex>,
    next_id: u32,
    commands: Producer<GraphCommand>,
    trash: Consumer<Box<RenderNode>>,
    /// Node and edge capacity reserved on the render side.
    render_capacity: (usize, usize),
}

impl Topology {
    fn index(&self, id: NodeId) -> Result<NodeIndex> {
        self.indices.get(&id).copied().ok_or(Error::NodeGone(id))
    }

    fn id_of(&self, index: NodeIndex) -> Option<NodeId> {
        self.indices
            .iter()
            .find_map(|(id, idx)| (*idx == index).then_some(*id))
    }

    fn outgoing(&self, from: NodeIndex, output_bus: usize) -> Option<(EdgeIndex, NodeIndex, Connection)> {
        self.graph
            .edges_directed(from, Direction::Outgoing)
            .find(|e| e.weight().output_bus == output_bus)
            .map(|e| (e.id(), e.target(), *e.weight()))
    }

    fn output_layout_bus(&self, id: NodeId, index: NodeIndex, bus: usize) -> Result<usize> {
        self.graph[index]
            .layout
            .output_channels(bus)
            .ok_or(Error::InvalidBus {
                node: id,
                direction: "output",
                bus,
            })
    }

    /// Drops render nodes the renderer has handed back.
    fn collect_garbage(&mut self) {
        while let Ok(node) = self.trash.pop() {
            trace!(name = node.processor.name(), "freeing removed node");
            drop(node);
        }
    }
}

/// The graph shared by an engine and every node handle created from it.
pub(crate) struct GraphShared {
    topology: Mutex<Topology>,
    renderer: Arc<Mutex<Renderer>>,
}

impl GraphShared {
    pub(crate) fn new(
        sample_rate: u32,
        channels: usize,
        queue_capacity: usize,
        time: Arc<AtomicU64>,
    ) -> Arc<Self> {
        let (commands, command_rx) = RingBuffer::new(queue_capacity);
        // Every node waiting in the trash was removed by a command still in the ring at
        // the last collection, or sent after it, so the trash never fills.
        let (trash_tx, trash) = RingBuffer::new(2 * queue_capacity + 1);

        let topology = Topology {
            graph: StableGraph::with_capacity(INITIAL_CAPACITY, INITIAL_CAPACITY),
            indices: HashMap::new(),
            next_id: 0,
            commands,
            trash,
            render_capacity: (INITIAL_CAPACITY, INITIAL_CAPACITY),
        };
        let renderer = Renderer::new(sample_rate, channels, command_rx, trash_tx, time);

        Arc::new(Self {
            topology: Mutex::new(topology),
            renderer: Arc::new(Mutex::new(renderer)),
        })
    }

    pub(crate) fn renderer(&self) -> &Arc<Mutex<Renderer>> {
        &self.renderer
    }

    /// Pushes a command, applying the renderer's backlog first if the ring is full.
    fn send(&self, topology: &mut Topology, command: GraphCommand) -> Result<()> {
        match topology.commands.push(command) {
            Ok(()) => Ok(()),
            Err(PushError::Full(command)) => {
                debug!("graph command ring full, applying backlog on caller thread");
                self.renderer.lock().apply_commands();
                topology.collect_garbage();
                topology
                    .commands
                    .push(command)
                    .map_err(|_| Error::QueueFull)
            }
        }
    }

    /// Grows the renderer on this thread when the next node or edge would not fit.
    ///
    /// The renderer applies commands in order, so it never holds more nodes or edges than
    /// the topology did when the command was sent.
    fn reserve_render_capacity(&self, topology: &mut Topology) {
        let (nodes, edges) = topology.render_capacity;
        let needed_nodes = topology.graph.node_count() + 1;
        let needed_edges = topology.graph.edge_count() + 1;
        if needed_nodes <= nodes && needed_edges <= edges {
            return;
        }
        let capacity = (
            if needed_nodes > nodes { (nodes * 2).max(needed_nodes) } else { nodes },
            if needed_edges > edges { (edges * 2).max(needed_edges) } else { edges },
        );
        debug!(nodes = capacity.0, edges = capacity.1, "growing render graph on caller thread");
        {
            let mut renderer = self.renderer.lock();
            renderer.apply_commands();
            renderer.reserve(capacity.0, capacity.1);
        }
        topology.collect_garbage();
        topology.render_capacity = capacity;
    }

    pub(crate) fn insert(&self, processor: Box<dyn AudioNode>) -> Result<(NodeId, BusLayout, Arc<NodeShared>)> {
        let layout = processor.layout();
        layout.validate()?;
        let name = processor.name();
        let shared = Arc::new(NodeShared::new(layout.output_bus_count()));
        let node = Box::new(RenderNode {
            inputs: layout.allocate_inputs(),
            outputs: layout.allocate_outputs(),
            processor,
            shared: shared.clone(),
        });

        let mut topology = self.topology.lock();
        topology.collect_garbage();
        self.reserve_render_capacity(&mut topology);
        let id = NodeId(topology.next_id);
        topology.next_id += 1;
        let index = topology.graph.add_node(TopologyNode {
            layout: layout.clone(),
            name,
        });
        topology.indices.insert(id, index);

        if let Err(e) = self.send(&mut topology, GraphCommand::Insert { id, node }) {
            topology.graph.remove_node(index);
            topology.indices.remove(&id);
            return Err(e);
        }

        debug!(?id, name, "node added");
        Ok((id, layout, shared))
    }

    pub(crate) fn remove(&self, id: NodeId) {
        let mut topology = self.topology.lock();
        topology.collect_garbage();
        let Some(index) = topology.indices.remove(&id) else {
            return;
        };
        let name = topology.graph.remove_node(index).map_or("node", |n| n.name);
        if let Err(e) = self.send(&mut topology, GraphCommand::Remove { id }) {
            warn!(?id, error = %e, "render side kept a removed node");
        }
        debug!(?id, name, "node removed");
    }

    pub(crate) fn attach(&self, from: NodeId, output_bus: usize, to: NodeId, input_bus: usize) -> Result<()> {
        let mut topology = self.topology.lock();
        topology.collect_garbage();

        let a = topology.index(from)?;
        let b = topology.index(to)?;
        let output = topology.output_layout_bus(from, a, output_bus)?;
        let input = topology.graph[b]
            .layout
            .input_channels(input_bus)
            .ok_or(Error::InvalidBus {
                node: to,
                direction: "input",
                bus: input_bus,
            })?;
        if output != input {
            return Err(Error::ChannelMismatch { output, input });
        }
        if a == b || has_path_connecting(&topology.graph, b, a, None) {
            return Err(Error::Cycle { from, to });
        }

        let previous = topology.outgoing(a, output_bus);
        if let Some((_, target, conn)) = previous {
            if target == b && conn.input_bus == input_bus {
                return Ok(());
            }
        }
        self.reserve_render_capacity(&mut topology);
        if let Some((edge, _, _)) = previous {
            topology.graph.remove_edge(edge);
        }
        let edge = topology.graph.add_edge(a, b, Connection { output_bus, input_bus });

        let command = GraphCommand::Connect {
            from,
            output_bus,
            to,
            input_bus,
        };
        if let Err(e) = self.send(&mut topology, command) {
            topology.graph.remove_edge(edge);
            if let Some((_, target, conn)) = previous {
                topology.graph.add_edge(a, target, conn);
            }
            return Err(e);
        }

        trace!(?from, output_bus, ?to, input_bus, "attached");
        Ok(())
    }

    /// Returns `Ok(false)` when the bus was not attached.
    pub(crate) fn detach(&self, from: NodeId, output_bus: usize) -> Result<bool> {
        let mut topology = self.topology.lock();
        topology.collect_garbage();
        let a = topology.index(from)?;
        topology.output_layout_bus(from, a, output_bus)?;
        self.detach_locked(&mut topology, from, a, output_bus)
    }

    pub(crate) fn detach_all(&self, from: NodeId) -> Result<bool> {
        let mut topology = self.topology.lock();
        topology.collect_garbage();
        let a = topology.index(from)?;
        let buses = topology.graph[a].layout.output_bus_count();
        let mut detached = false;
        for bus in 0..buses {
            detached |= self.detach_locked(&mut topology, from, a, bus)?;
        }
        Ok(detached)
    }

    fn detach_locked(&self, topology: &mut Topology, from: NodeId, a: NodeIndex, output_bus: usize) -> Result<bool> {
        let Some((edge, target, conn)) = topology.outgoing(a, output_bus) else {
            return Ok(false);
        };
        topology.graph.remove_edge(edge);
        if let Err(e) = self.send(topology, GraphCommand::Disconnect { from, output_bus }) {
            topology.graph.add_edge(a, target, conn);
            return Err(e);
        }
        trace!(?from, output_bus, "detached");
        Ok(true)
    }

    /// Where an output bus currently leads, as `(node, input bus)`.
    pub(crate) fn destination(&self, from: NodeId, output_bus: usize) -> Option<(NodeId, usize)> {
        let topology = self.topology.lock();
        let a = topology.indices.get(&from).copied()?;
        let (_, target, conn) = topology.outgoing(a, output_bus)?;
        topology.id_of(target).map(|id| (id, conn.input_bus))
    }

    /// Number of attached sources feeding an input bus.
    pub(crate) fn input_connections(&self, to: NodeId, input_bus: usize) -> usize {
        let topology = self.topology.lock();
        let Some(&b) = topology.indices.get(&to) else {
            return 0;
        };
        topology
            .graph
            .edges_directed(b, Direction::Incoming)
            .filter(|e| e.weight().input_bus == input_bus)
            .count()
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.topology.lock().indices.contains_key(&id)
    }

    pub(crate) fn node_count(&self) -> usize {
        self.topology.lock().graph.node_count()
    }

    pub(crate) fn set_endpoint(&self, id: NodeId) -> Result<()> {
        let mut topology = self.topology.lock();
        topology.index(id)?;
        self.send(&mut topology, GraphCommand::SetEndpoint { id })
    }
}

type RenderGraph = StableGraph<Box<RenderNode>, Connection>;

/// The processing side of the graph. Lives behind a mutex that only the render thread
/// (and a caller flushing a full command ring) ever takes.
pub(crate) struct Renderer {
    graph: RenderGraph,
    indices: HashMap<NodeId, NodeIndex>,
    commands: Consumer<GraphCommand>,
    trash: Producer<Box<RenderNode>>,
    endpoint: Option<NodeIndex>,
    dfs: DfsPostOrder<NodeIndex, <RenderGraph as Visitable>::Map>,
    order: Vec<NodeIndex>,
    ctx: ProcessContext,
    channels: usize,
    time: Arc<AtomicU64>,
    block: Vec<f32>,
    block_pos: usize,
}

impl Renderer {
    fn new(
        sample_rate: u32,
        channels: usize,
        commands: Consumer<GraphCommand>,
        trash: Producer<Box<RenderNode>>,
        time: Arc<AtomicU64>,
    ) -> Self {
        let graph = RenderGraph::with_capacity(INITIAL_CAPACITY, INITIAL_CAPACITY);
        let dfs = DfsPostOrder::empty(&graph);
        let block = vec![0.0; BLOCK_SIZE * channels];
        let mut renderer = Self {
            graph,
            indices: HashMap::new(),
            commands,
            trash,
            endpoint: None,
            dfs,
            order: Vec::new(),
            ctx: ProcessContext {
                sample_rate,
                buffer_size: BLOCK_SIZE,
                time: 0,
            },
            channels,
            time,
            block_pos: block.len(),
            block,
        };
        renderer.reserve(INITIAL_CAPACITY, INITIAL_CAPACITY);
        renderer
    }

    /// Makes room for `nodes` nodes and `edges` edges so that applying commands and
    /// walking the graph never allocate. Rebuilds the graph when it is too small, which
    /// moves node indices. Caller thread only.
    fn reserve(&mut self, nodes: usize, edges: usize) {
        let (node_capacity, edge_capacity) = self.graph.capacity();
        if nodes > node_capacity || edges > edge_capacity {
            let mut graph = RenderGraph::with_capacity(nodes.max(node_capacity), edges.max(edge_capacity));
            let connections: Vec<_> = self
                .graph
                .edge_references()
                .map(|e| (e.source(), e.target(), *e.weight()))
                .collect();
            let old_indices: Vec<_> = self.graph.node_indices().collect();
            let mut moved = HashMap::with_capacity(old_indices.len());
            for old in old_indices {
                if let Some(node) = self.graph.remove_node(old) {
                    moved.insert(old, graph.add_node(node));
                }
            }
            for (a, b, conn) in connections {
                if let (Some(&a), Some(&b)) = (moved.get(&a), moved.get(&b)) {
                    graph.add_edge(a, b, conn);
                }
            }
            for index in self.indices.values_mut() {
                if let Some(&new) = moved.get(index) {
                    *index = new;
                }
            }
            self.endpoint = self.endpoint.and_then(|e| moved.get(&e).copied());
            self.graph = graph;
        }

        let (node_capacity, edge_capacity) = self.graph.capacity();
        self.indices.reserve(node_capacity.saturating_sub(self.indices.len()));
        self.order.reserve(node_capacity.saturating_sub(self.order.len()));
        // post-order pushes each node once per discovering edge, plus the start node
        self.dfs.stack.reserve((edge_capacity + 1).saturating_sub(self.dfs.stack.len()));
        self.dfs.discovered.grow(node_capacity);
        self.dfs.finished.grow(node_capacity);
    }

    pub(crate) fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                GraphCommand::Insert { id, node } => {
                    let index = self.graph.add_node(node);
                    self.indices.insert(id, index);
                }
                GraphCommand::Remove { id } => {
                    if let Some(index) = self.indices.remove(&id) {
                        if self.endpoint == Some(index) {
                            self.endpoint = None;
                        }
                        if let Some(node) = self.graph.remove_node(index) {
                            // sized in `GraphShared::new` so this push cannot fail
                            let _ = self.trash.push(node);
                        }
                    }
                }
                GraphCommand::Connect {
                    from,
                    output_bus,
                    to,
                    input_bus,
                } => {
                    if let (Some(&a), Some(&b)) = (self.indices.get(&from), self.indices.get(&to)) {
                        self.disconnect(a, output_bus);
                        self.graph.add_edge(a, b, Connection { output_bus, input_bus });
                    }
                }
                GraphCommand::Disconnect { from, output_bus } => {
                    if let Some(&a) = self.indices.get(&from) {
                        self.disconnect(a, output_bus);
                    }
                }
                GraphCommand::SetEndpoint { id } => {
                    self.endpoint = self.indices.get(&id).copied();
                }
            }
        }
    }

    fn disconnect(&mut self, from: NodeIndex, output_bus: usize) {
        let edge = self
            .graph
            .edges_directed(from, Direction::Outgoing)
            .find(|e| e.weight().output_bus == output_bus)
            .map(|e| e.id());
        if let Some(edge) = edge {
            self.graph.remove_edge(edge);
        }
    }

    /// Render interleaved frames into `out`. Any length is accepted; partial blocks are
    /// carried over to the next call.
    pub(crate) fn render(&mut self, out: &mut [f32]) {
        let mut written = 0;
        while written < out.len() {
            if self.block_pos >= self.block.len() {
                self.process_block();
                self.block_pos = 0;
            }
            let n = (self.block.len() - self.block_pos).min(out.len() - written);
            out[written..written + n].copy_from_slice(&self.block[self.block_pos..self.block_pos + n]);
            written += n;
            self.block_pos += n;
        }
    }

    fn process_block(&mut self) {
        self.apply_commands();
        self.ctx.time = self.time.load(Ordering::Acquire);
        self.block.fill(0.0);

        if let Some(endpoint) = self.endpoint.filter(|&e| self.graph.contains_node(e)) {
            let graph = Reversed(&self.graph);
            self.order.clear();
            self.dfs.reset(graph);
            self.dfs.move_to(endpoint);
            while let Some(index) = self.dfs.next(graph) {
                self.order.push(index);
            }

            for i in 0..self.order.len() {
                let index = self.order[i];
                self.process_node(index);
            }

            let node = &self.graph[endpoint];
            let volume = node.shared.volume(0);
            if let Some(bus) = node.outputs.first() {
                for (ch, buffer) in bus.iter().enumerate().take(self.channels) {
                    for (frame, sample) in buffer.iter().enumerate() {
                        self.block[frame * self.channels + ch] = sample * volume;
                    }
                }
            }
        }

        self.time.fetch_add(BLOCK_SIZE as u64, Ordering::AcqRel);
    }

    fn process_node(&mut self, index: NodeIndex) {
        let ctx = self.ctx;
        let end = ctx.time + BLOCK_SIZE as u64;
        let active = self.graph[index].shared.state_by_time_range(ctx.time, end) == NodeState::Started;

        let mut inputs = std::mem::take(&mut self.graph[index].inputs);
        for bus in inputs.iter_mut() {
            for buffer in bus.iter_mut() {
                buffer.fill(0.0);
            }
        }

        if active {
            for edge in self.graph.edges_directed(index, Direction::Incoming) {
                let conn = *edge.weight();
                let source = &self.graph[edge.source()];
                let volume = source.shared.volume(conn.output_bus);
                let (Some(src), Some(dst)) = (source.outputs.get(conn.output_bus), inputs.get_mut(conn.input_bus)) else {
                    continue;
                };
                for (d, s) in dst.iter_mut().zip(src.iter()) {
                    for (o, i) in d.iter_mut().zip(s.iter()) {
                        *o += *i * volume;
                    }
                }
            }
        }

        let node = &mut self.graph[index];
        node.inputs = inputs;
        if active {
            let RenderNode {
                processor,
                shared,
                inputs,
                outputs,
            } = &mut **node;
            processor.process(&ctx, inputs, outputs);
            shared.advance_time(BLOCK_SIZE as u64);
        } else {
            for bus in node.outputs.iter_mut() {
                for buffer in bus.iter_mut() {
                    buffer.fill(0.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{Passthrough, Sine};

    fn graph() -> Arc<GraphShared> {
        GraphShared::new(48_000, 2, 16, Arc::new(AtomicU64::new(0)))
    }

    #[test]
    fn rejects_mismatched_channels_and_bad_buses() {
        let g = graph();
        let (a, ..) = g.insert(Box::new(Passthrough::new(2))).unwrap();
        let (b, ..) = g.insert(Box::new(Passthrough::new(1))).unwrap();
        assert_eq!(
            g.attach(a, 0, b, 0),
            Err(Error::ChannelMismatch { output: 2, input: 1 })
        );
        assert!(matches!(g.attach(a, 3, b, 0), Err(Error::InvalidBus { .. })));
        assert_eq!(g.destination(a, 0), None);
    }

    #[test]
    fn rejects_cycles() {
        let g = graph();
        let (a, ..) = g.insert(Box::new(Passthrough::new(2))).unwrap();
        let (b, ..) = g.insert(Box::new(Passthrough::new(2))).unwrap();
        g.attach(a, 0, b, 0).unwrap();
        assert_eq!(g.attach(b, 0, a, 0), Err(Error::Cycle { from: b, to: a }));
        assert_eq!(g.attach(a, 0, a, 0), Err(Error::Cycle { from: a, to: a }));
    }

    #[test]
    fn reattaching_an_output_bus_repoints_it() {
        let g = graph();
        let (a, ..) = g.insert(Box::new(Passthrough::new(2))).unwrap();
        let (b, ..) = g.insert(Box::new(Passthrough::new(2))).unwrap();
        let (c, ..) = g.insert(Box::new(Passthrough::new(2))).unwrap();
        g.attach(a, 0, b, 0).unwrap();
        g.attach(a, 0, c, 0).unwrap();
        assert_eq!(g.destination(a, 0), Some((c, 0)));
        assert_eq!(g.input_connections(b, 0), 0);
        assert_eq!(g.detach(a, 0), Ok(true));
        assert_eq!(g.detach(a, 0), Ok(false));
    }

    #[test]
    fn full_command_ring_is_flushed_by_the_caller() {
        let g = GraphShared::new(48_000, 2, 2, Arc::new(AtomicU64::new(0)));
        let ids: Vec<_> = (0..10)
            .map(|_| g.insert(Box::new(Passthrough::new(2))).unwrap().0)
            .collect();
        for pair in ids.windows(2) {
            g.attach(pair[0], 0, pair[1], 0).unwrap();
        }
        assert_eq!(g.node_count(), 10);

        let mut renderer = g.renderer().lock();
        renderer.apply_commands();
        assert_eq!(renderer.graph.node_count(), 10);
        assert_eq!(renderer.graph.edge_count(), 9);
    }

    #[test]
    fn renders_sources_through_the_endpoint() {
        let g = graph();
        let (sine, ..) = g.insert(Box::new(Sine::new(1_000.0, 2).with_amplitude(0.5))).unwrap();
        let (end, _, end_shared) = g.insert(Box::new(Passthrough::new(2))).unwrap();
        g.attach(sine, 0, end, 0).unwrap();
        g.set_endpoint(end).unwrap();

        let mut out = vec![0.0; 100 * 2];
        g.renderer().lock().render(&mut out);
        assert!(out.iter().any(|s| s.abs() > 0.1));
        assert!(out.iter().all(|s| s.abs() <= 0.5 + 1e-6));

        end_shared.set_volume(0, 0.0);
        let mut out = vec![1.0; 256];
        g.renderer().lock().render(&mut out);
        // the first 28 frames were rendered before the volume change
        assert!(out[56..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn stopped_nodes_are_silent() {
        let g = graph();
        let (sine, _, shared) = g.insert(Box::new(Sine::new(440.0, 2))).unwrap();
        let (end, ..) = g.insert(Box::new(Passthrough::new(2))).unwrap();
        g.attach(sine, 0, end, 0).unwrap();
        g.set_endpoint(end).unwrap();
        shared.set_state(NodeState::Stopped);

        let mut out = vec![1.0; BLOCK_SIZE * 2];
        g.renderer().lock().render(&mut out);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(shared.time(), 0);
    }

    #[test]
    fn render_side_grows_before_commands_arrive() {
        let g = graph();
        let mut ids = vec![g.insert(Box::new(Sine::new(500.0, 2))).unwrap().0];
        for _ in 0..299 {
            ids.push(g.insert(Box::new(Passthrough::new(2))).unwrap().0);
        }
        for pair in ids.windows(2) {
            g.attach(pair[0], 0, pair[1], 0).unwrap();
        }
        g.set_endpoint(ids[299]).unwrap();

        let mut renderer = g.renderer().lock();
        let capacity = renderer.graph.capacity();
        assert!(capacity.0 >= 300 && capacity.1 >= 299, "{capacity:?}");

        let mut out = vec![0.0; BLOCK_SIZE * 2];
        renderer.render(&mut out);
        assert_eq!(renderer.graph.capacity(), capacity);
        assert_eq!(renderer.graph.node_count(), 300);
        assert_eq!(renderer.graph.edge_count(), 299);
        assert!(renderer.order.capacity() >= 300);
        // the rebuilt graph still routes the sine to the endpoint
        assert!(out.iter().any(|s| s.abs() > 0.1));
    }

    struct DropRecorder(Arc<Mutex<Vec<std::thread::ThreadId>>>);

    impl AudioNode for DropRecorder {
        fn process(&mut self, _ctx: &ProcessContext, _inputs: &[Bus], _outputs: &mut [Bus]) {}

        fn layout(&self) -> BusLayout {
            BusLayout::effect(2)
        }
    }

    impl Drop for DropRecorder {
        fn drop(&mut self) {
            self.0.lock().push(std::thread::current().id());
        }
    }

    #[test]
    fn removed_nodes_are_freed_off_the_render_thread() {
        let g = graph();
        let drops = Arc::new(Mutex::new(Vec::new()));
        let ids: Vec<_> = (0..40)
            .map(|_| g.insert(Box::new(DropRecorder(drops.clone()))).unwrap().0)
            .collect();
        for id in ids {
            g.remove(id);
        }

        let renderer = g.renderer().clone();
        std::thread::spawn(move || renderer.lock().apply_commands())
            .join()
            .unwrap();
        g.topology.lock().collect_garbage();

        let drops = drops.lock();
        assert_eq!(drops.len(), 40);
        let here = std::thread::current().id();
        assert!(drops.iter().all(|id| *id == here));
    }

    #[test]
    fn scheduled_times_gate_state() {
        let shared = NodeShared::new(1);
        assert_eq!(shared.state_by_time_range(0, 64), NodeState::Started);
        shared.set_state_time(NodeState::Started, 128);
        assert_eq!(shared.state_by_time_range(0, 64), NodeState::Stopped);
        assert_eq!(shared.state_by_time_range(64, 192), NodeState::Started);
        shared.set_state_time(NodeState::Stopped, 256);
        assert_eq!(shared.state_by_time_range(256, 320), NodeState::Stopped);
    }
}
