//! Ordered chains of nodes wired in series.

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::handle::{GraphNode, WeakGraphNode};

/// How a chain refers to its source node.
#[derive(Clone, Debug)]
pub enum ChainSource {
    /// The chain holds a counted reference and keeps the source alive.
    Owned(GraphNode),
    /// The chain wraps a node owned elsewhere.
    Borrowed(WeakGraphNode),
}

impl ChainSource {
    fn node(&self) -> Option<GraphNode> {
        match self {
            ChainSource::Owned(node) => Some(node.clone()),
            ChainSource::Borrowed(weak) => weak.upgrade(),
        }
    }
}

#[derive(Clone, Debug)]
struct Link {
    node: GraphNode,
    /// Input bus of `node` fed by the previous element.
    input_bus: usize,
}

/// A sequence of nodes between a source and an endpoint.
///
/// Following output bus 0 from the source through every element reaches the endpoint.
/// Every edit keeps that true: a failed edit leaves the wiring exactly as it was.
///
/// The chain holds a counted reference to each element and to the endpoint. Dropping
/// the chain releases those references but leaves the wiring alone.
#[derive(Debug, Default)]
pub struct NodeChain {
    source: Option<ChainSource>,
    links: Vec<Link>,
    endpoint: Option<Link>,
}

impl NodeChain {
    /// An empty chain. When both ends are given, the source is attached to the endpoint.
    pub fn new(source: Option<ChainSource>, endpoint: Option<(GraphNode, usize)>) -> Result<Self> {
        let chain = Self {
            source,
            links: Vec::new(),
            endpoint: endpoint.map(|(node, input_bus)| Link { node, input_bus }),
        };
        if let (Some(source), Some(endpoint)) = (chain.source_node(), &chain.endpoint) {
            source.attach_output_bus(0, &endpoint.node, endpoint.input_bus)?;
        }
        Ok(chain)
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&GraphNode> {
        self.links.get(index).map(|l| &l.node)
    }

    pub fn first(&self) -> Option<&GraphNode> {
        self.get(0)
    }

    pub fn last(&self) -> Option<&GraphNode> {
        self.links.last().map(|l| &l.node)
    }

    pub fn iter(&self) -> impl Iterator<Item = &GraphNode> {
        self.links.iter().map(|l| &l.node)
    }

    pub fn index_of(&self, node: &GraphNode) -> Option<usize> {
        self.links.iter().position(|l| l.node == *node)
    }

    pub fn contains(&self, node: &GraphNode) -> bool {
        self.index_of(node).is_some()
    }

    /// The source node, if one is set and still alive.
    pub fn source_node(&self) -> Option<GraphNode> {
        self.source.as_ref().and_then(ChainSource::node)
    }

    pub fn owns_source(&self) -> bool {
        matches!(self.source, Some(ChainSource::Owned(_)))
    }

    pub fn endpoint(&self) -> Option<&GraphNode> {
        self.endpoint.as_ref().map(|l| &l.node)
    }

    /// The node feeding position `index`: the element before it, or the source.
    fn prev(&self, index: usize) -> Option<GraphNode> {
        match index {
            0 => self.source_node(),
            i => self.links.get(i - 1).map(|l| l.node.clone()),
        }
    }

    /// The link at position `index`, or the endpoint past the end.
    fn next(&self, index: usize) -> Option<&Link> {
        self.links.get(index).or(self.endpoint.as_ref())
    }

    /// Insert `node` right after `after`, or at the head when `after` is `None`.
    ///
    /// `input_bus` is the bus of `node` that the previous element feeds.
    pub fn add_node(&mut self, node: &GraphNode, after: Option<&GraphNode>, input_bus: usize) -> Result<()> {
        let index = match after {
            Some(after) => self.index_of(after).ok_or(Error::NotInChain(after.id()))? + 1,
            None => 0,
        };
        self.insert_at(index, node, input_bus)
    }

    /// Insert `node` at position `index` (clamped to the chain length).
    pub fn insert_at(&mut self, index: usize, node: &GraphNode, input_bus: usize) -> Result<()> {
        if self.contains(node) {
            return Err(Error::AlreadyInChain(node.id()));
        }
        let index = index.min(self.links.len());
        let prev = self.prev(index);
        let next = self.next(index).cloned();
        let previous = node.output_destination(0);

        if let Some(next) = &next {
            node.attach_output_bus(0, &next.node, next.input_bus)?;
        }
        if let Some(prev) = &prev {
            if let Err(e) = prev.attach_output_bus(0, node, input_bus) {
                if next.is_some() {
                    node.restore_output_bus(0, previous)?;
                }
                return Err(e);
            }
        }

        self.links.insert(
            index,
            Link {
                node: node.clone(),
                input_bus,
            },
        );
        trace!(node = ?node.id(), index, len = self.links.len(), "chain insert");
        Ok(())
    }

    /// Remove `node`, linking its neighbours directly. Returns `Ok(false)` if the node
    /// is not in the chain.
    pub fn remove_node(&mut self, node: &GraphNode) -> Result<bool> {
        match self.index_of(node) {
            Some(index) => self.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    /// Remove and return the element at `index`.
    pub fn remove_at(&mut self, index: usize) -> Result<GraphNode> {
        let Some(link) = self.links.get(index).cloned() else {
            return Err(Error::InvalidParameter(format!(
                "chain index {index} out of range for length {}",
                self.links.len()
            )));
        };
        let prev = self.prev(index);
        let next = self.next(index + 1).cloned();

        if let Some(prev) = &prev {
            match &next {
                Some(next) => prev.attach_output_bus(0, &next.node, next.input_bus)?,
                None => {
                    prev.detach_output_bus(0)?;
                }
            }
        }
        if let Err(e) = link.node.detach_output_bus(0) {
            if let Some(prev) = &prev {
                prev.attach_output_bus(0, &link.node, link.input_bus)?;
            }
            return Err(e);
        }

        self.links.remove(index);
        trace!(node = ?link.node.id(), index, len = self.links.len(), "chain remove");
        Ok(link.node)
    }

    /// Replace the source. The old source is detached from the chain.
    pub fn set_source(&mut self, source: Option<ChainSource>) -> Result<()> {
        let first = self.next(0).cloned();
        let new_node = source.as_ref().and_then(ChainSource::node);
        let previous = new_node.as_ref().and_then(|n| n.output_destination(0));

        if let (Some(new_node), Some(first)) = (&new_node, &first) {
            new_node.attach_output_bus(0, &first.node, first.input_bus)?;
        }
        if let Some(old) = self.source_node() {
            if new_node.as_ref() != Some(&old) {
                if let Err(e) = old.detach_output_bus(0) {
                    if let (Some(new_node), Some(_)) = (&new_node, &first) {
                        new_node.restore_output_bus(0, previous)?;
                    }
                    return Err(e);
                }
            }
        }
        self.source = source;
        Ok(())
    }

    /// Replace the endpoint, re-pointing the last element (or the source).
    pub fn set_endpoint(&mut self, endpoint: Option<(GraphNode, usize)>) -> Result<()> {
        let tail = self.prev(self.links.len());
        if let Some(tail) = &tail {
            match &endpoint {
                Some((node, input_bus)) => tail.attach_output_bus(0, node, *input_bus)?,
                None => {
                    tail.detach_output_bus(0)?;
                }
            }
        }
        self.endpoint = endpoint.map(|(node, input_bus)| Link { node, input_bus });
        Ok(())
    }

    /// Remove every element.
    ///
    /// With `detach_nodes` the elements are disconnected and the source is wired straight
    /// to the endpoint. Without it only the chain's references are released, leaving
    /// backend connections for whoever is tearing the graph down.
    pub fn clear(&mut self, detach_nodes: bool) -> Result<()> {
        if detach_nodes {
            let source = self.source_node();
            match (&source, &self.endpoint) {
                (Some(source), Some(endpoint)) => {
                    source.attach_output_bus(0, &endpoint.node, endpoint.input_bus)?
                }
                (Some(source), None) => {
                    source.detach_output_bus(0)?;
                }
                _ => {}
            }
            for link in &self.links {
                link.node.detach_output_bus(0)?;
            }
        }
        debug!(released = self.links.len(), detach_nodes, "chain cleared");
        self.links.clear();
        Ok(())
    }

    /// Whether following output bus 0 from the source visits every element in order and
    /// ends at the endpoint.
    pub fn is_linked(&self) -> bool {
        let mut expected = self.links.iter().chain(self.endpoint.iter());
        let mut current = self.source_node();
        if current.is_none() {
            // Without a source, start the walk at the first element.
            current = expected.next().map(|l| l.node.clone());
        }
        let Some(mut current) = current else {
            return true;
        };
        for link in expected {
            match current.output_destination(0) {
                Some((id, bus)) if id == link.node.id() && bus == link.input_bus => {}
                _ => return false,
            }
            current = link.node.clone();
        }
        if self.endpoint.is_none() {
            return current.output_destination(0).is_none();
        }
        true
    }
}
