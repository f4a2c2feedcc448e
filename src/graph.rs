//! Rendering graph: owns nodes and their inbound message queues.
//!
//! Lives entirely inside the rendering context once handed to a backend.

use alloc::boxed::Box;
use alloc::vec;
use core::marker::PhantomData;

use dasp_graph::{Buffer, Input, NodeData, Processor};
use hashbrown::HashMap;
use petgraph::graph::{EdgeIndex, NodeIndex};

use crate::bridge::{self, BridgeReceiver, BridgeSender};
use crate::node::{AudioNode, NodeId, ProcessContext};

/// Queue size for nodes added without an explicit inbox
const DEFAULT_QUEUE_SIZE: usize = 64;

/// Control-side handle for messaging a node added with [`RenderGraph::add`]
pub struct NodeHandle<M: Send + 'static> {
    pub(crate) id: NodeId,
    pub(crate) sender: BridgeSender<M>,
    pub(crate) _marker: PhantomData<M>,
}

impl<M: Send + 'static> NodeHandle<M> {
    /// Queue a message for the next block
    pub fn send(&mut self, msg: M) -> Result<(), crate::error::BridgeError> {
        self.sender.send(msg)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }
}

// Type-erased wrapper so we can store heterogeneous nodes
trait ErasedNode: Send {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]);
}

struct NodeWrapper<N: AudioNode> {
    node: N,
    inbox: BridgeReceiver<N::Message>,
}

impl<N: AudioNode> ErasedNode for NodeWrapper<N> {
    fn process_erased(&mut self, ctx: &ProcessContext, inputs: &[Input], outputs: &mut [Buffer]) {
        let messages = self.inbox.drain();
        self.node.process(ctx, messages, inputs, outputs);
    }
}

// Adapter for dasp_graph
struct DaspAdapter {
    node: Box<dyn ErasedNode>,
    ctx: ProcessContext,
}

impl dasp_graph::Node for DaspAdapter {
    fn process(&mut self, inputs: &[Input], outputs: &mut [Buffer]) {
        self.node.process_erased(&self.ctx, inputs, outputs);
    }
}

type InnerGraph = petgraph::graph::Graph<NodeData<DaspAdapter>, ()>;

/// An audio processing graph at a fixed sample rate
pub struct RenderGraph {
    graph: InnerGraph,
    processor: Processor<InnerGraph>,
    ctx: ProcessContext,

    node_indices: HashMap<NodeId, NodeIndex>,
    edges: HashMap<(NodeId, NodeId), EdgeIndex>,
    next_node_id: u32,

    terminal: Option<NodeIndex>,
    blocks_processed: u64,
}

impl RenderGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            graph: InnerGraph::with_capacity(8, 8),
            processor: Processor::with_capacity(8),
            ctx: ProcessContext::new(sample_rate),
            node_indices: HashMap::new(),
            edges: HashMap::new(),
            next_node_id: 0,
            terminal: None,
            blocks_processed: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.ctx.sample_rate
    }

    pub fn context(&self) -> ProcessContext {
        self.ctx
    }

    /// Add a node with its own message queue
    pub fn add<N: AudioNode>(&mut self, node: N) -> NodeHandle<N::Message> {
        let (sender, inbox) = bridge::channel(DEFAULT_QUEUE_SIZE);
        let id = self.add_with_inbox(node, inbox);
        NodeHandle {
            id,
            sender,
            _marker: PhantomData,
        }
    }

    /// Add a node fed by an existing bridge receiver
    pub fn add_with_inbox<N: AudioNode>(&mut self, node: N, inbox: BridgeReceiver<N::Message>) -> NodeId {
        let id = NodeId(self.next_node_id);
        self.next_node_id += 1;

        // sinks still need one buffer for dasp_graph to sum inputs into
        let buffers = vec![Buffer::SILENT; node.num_outputs().max(1)];
        let adapter = DaspAdapter {
            node: Box::new(NodeWrapper { node, inbox }),
            ctx: self.ctx,
        };

        let idx = self.graph.add_node(NodeData::new(adapter, buffers));
        self.node_indices.insert(id, idx);
        id
    }

    /// Route the output of `from` into `to`. Returns false if either node is unknown.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        let (Some(&a), Some(&b)) = (self.node_indices.get(&from), self.node_indices.get(&to)) else {
            return false;
        };
        if !self.edges.contains_key(&(from, to)) {
            let edge = self.graph.add_edge(a, b, ());
            self.edges.insert((from, to), edge);
        }
        true
    }

    /// Remove the edge from `from` to `to`. Returns false if they were not connected.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> bool {
        match self.edges.remove(&(from, to)) {
            Some(edge) => {
                self.graph.remove_edge(edge);
                // petgraph moves the last edge into the removed slot
                self.reindex_edges();
                true
            }
            None => false,
        }
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.edges.contains_key(&(from, to))
    }

    /// Set the node rendering is pulled through (typically the destination)
    pub fn set_terminal(&mut self, id: NodeId) {
        self.terminal = self.node_indices.get(&id).copied();
    }

    /// Render one block through the graph
    pub fn process(&mut self) {
        if let Some(terminal) = self.terminal {
            self.processor.process(&mut self.graph, terminal);
            self.blocks_processed += 1;
        }
    }

    pub fn blocks_processed(&self) -> u64 {
        self.blocks_processed
    }

    fn reindex_edges(&mut self) {
        let ids: HashMap<NodeIndex, NodeId> = self.node_indices.iter().map(|(&id, &idx)| (idx, id)).collect();
        self.edges.clear();
        for edge in self.graph.edge_indices() {
            if let Some((a, b)) = self.graph.edge_endpoints(edge) {
                if let (Some(&from), Some(&to)) = (ids.get(&a), ids.get(&b)) {
                    self.edges.insert((from, to), edge);
                }
            }
        }
    }
}
