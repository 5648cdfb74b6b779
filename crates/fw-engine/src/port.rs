//! Typed, directional ports and the connection graph
//!
//! Ports are the only way data crosses component boundaries. Connections are
//! validated at wiring time (kind compatibility, direction, acyclicity), so
//! the processing path never has to: real-time reads/writes are error-free
//! by contract.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use fw_core::Sample;

/// Stable port identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PortId(pub u64);

/// Identifies the component owning a set of ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PortOwner(pub u64);

/// Port direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Kind of data a port carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    /// Audio sample stream
    Audio,
    /// Event/MIDI stream
    Event,
    /// Control scalar
    Control,
}

/// Connection request errors, raised at wiring time only
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("incompatible port kinds: {src:?} -> {dst:?}")]
    IncompatibleKind { src: PortKind, dst: PortKind },

    #[error("connection would create a same-cycle feedback path")]
    CycleRejected,

    #[error("source must be an output port and destination an input port")]
    DirectionMismatch,

    #[error("control input already has a connection")]
    ControlFanIn,

    #[error("unknown port {0:?}")]
    UnknownPort(PortId),
}

/// Timestamped raw message (e.g. MIDI) carried by an event port during a
/// processing cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortEvent {
    /// Frame offset within the cycle
    pub frame: usize,
    /// Raw message bytes
    pub message: [u8; 3],
}

/// A registered port
#[derive(Debug, Clone)]
pub struct Port {
    pub id: PortId,
    pub owner: PortOwner,
    pub direction: PortDirection,
    pub kind: PortKind,
    pub name: String,
}

/// The connection graph: registered ports, validated edges, per-cycle audio
/// buffers and an owner-level processing order kept current on every
/// structural change.
pub struct PortGraph {
    ports: HashMap<PortId, Port>,
    edges: Vec<(PortId, PortId)>,
    buffers: HashMap<PortId, Vec<Sample>>,
    /// Per-cycle event queues for event ports
    events: HashMap<PortId, Vec<PortEvent>>,
    /// Held scalar values for control ports (persist across cycles)
    control: HashMap<PortId, Sample>,
    order: Vec<PortOwner>,
    cycle_frames: Option<usize>,
    max_block: usize,
    next_id: u64,
}

impl PortGraph {
    pub fn new(max_block: usize) -> Self {
        Self {
            ports: HashMap::new(),
            edges: Vec::new(),
            buffers: HashMap::new(),
            events: HashMap::new(),
            control: HashMap::new(),
            order: Vec::new(),
            cycle_frames: None,
            max_block,
            next_id: 1,
        }
    }

    /// Register a port for `owner`. Each kind gets its payload storage:
    /// audio ports a pre-allocated cycle buffer sized to the maximum block,
    /// event ports a per-cycle event queue, control ports a held scalar.
    pub fn register_port(
        &mut self,
        owner: PortOwner,
        direction: PortDirection,
        kind: PortKind,
        name: &str,
    ) -> PortId {
        let id = PortId(self.next_id);
        self.next_id += 1;

        match kind {
            PortKind::Audio => {
                self.buffers.insert(id, vec![0.0; self.max_block]);
            }
            PortKind::Event => {
                self.events.insert(id, Vec::new());
            }
            PortKind::Control => {
                self.control.insert(id, 0.0);
            }
        }
        self.ports.insert(
            id,
            Port {
                id,
                owner,
                direction,
                kind,
                name: name.to_string(),
            },
        );
        self.recompute_order();
        id
    }

    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Remove every port belonging to `owner`, dropping all of its
    /// connections first so no dangling references remain.
    pub fn remove_ports_of(&mut self, owner: PortOwner) {
        let removed: HashSet<PortId> = self
            .ports
            .values()
            .filter(|p| p.owner == owner)
            .map(|p| p.id)
            .collect();
        if removed.is_empty() {
            return;
        }

        self.edges
            .retain(|(src, dst)| !removed.contains(src) && !removed.contains(dst));
        for id in &removed {
            self.ports.remove(id);
            self.buffers.remove(id);
            self.events.remove(id);
            self.control.remove(id);
        }
        self.recompute_order();
    }

    /// Connect `src` (an output) to `dst` (an input).
    ///
    /// Fails without modifying the edge set on kind mismatch, direction
    /// misuse, fan-in to a control input, or when the edge would close a
    /// same-cycle feedback path. Connecting an existing edge is a no-op.
    pub fn connect(&mut self, src: PortId, dst: PortId) -> Result<(), ConnectError> {
        let src_port = self.ports.get(&src).ok_or(ConnectError::UnknownPort(src))?;
        let dst_port = self.ports.get(&dst).ok_or(ConnectError::UnknownPort(dst))?;

        if src_port.direction != PortDirection::Output
            || dst_port.direction != PortDirection::Input
        {
            return Err(ConnectError::DirectionMismatch);
        }
        if src_port.kind != dst_port.kind {
            return Err(ConnectError::IncompatibleKind {
                src: src_port.kind,
                dst: dst_port.kind,
            });
        }
        if dst_port.kind == PortKind::Control && self.edges.iter().any(|(_, d)| *d == dst) {
            return Err(ConnectError::ControlFanIn);
        }
        if self.edges.contains(&(src, dst)) {
            return Ok(());
        }
        if self.would_create_cycle(src_port.owner, dst_port.owner) {
            return Err(ConnectError::CycleRejected);
        }

        self.edges.push((src, dst));
        self.recompute_order();
        Ok(())
    }

    /// Remove the edge `src -> dst`; a no-op if no such edge exists.
    pub fn disconnect(&mut self, src: PortId, dst: PortId) {
        let before = self.edges.len();
        self.edges.retain(|e| *e != (src, dst));
        if self.edges.len() != before {
            self.recompute_order();
        }
    }

    pub fn is_connected(&self, src: PortId, dst: PortId) -> bool {
        self.edges.contains(&(src, dst))
    }

    /// Check whether an edge `from_owner -> to_owner` would close a loop at
    /// the granularity of full processing cycles (DFS over owner edges).
    fn would_create_cycle(&self, from_owner: PortOwner, to_owner: PortOwner) -> bool {
        if from_owner == to_owner {
            return true;
        }

        let mut visited = HashSet::new();
        let mut stack = vec![to_owner];
        while let Some(current) = stack.pop() {
            if current == from_owner {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for (src, dst) in &self.edges {
                let src_owner = self.ports[src].owner;
                if src_owner == current {
                    stack.push(self.ports[dst].owner);
                }
            }
        }
        false
    }

    /// Owner-level processing order (topological). Recomputed eagerly on
    /// every structural change, so it is always valid when a cycle starts.
    pub fn processing_order(&self) -> &[PortOwner] {
        &self.order
    }

    /// Kahn's algorithm over the owner graph.
    fn recompute_order(&mut self) {
        let owners: HashSet<PortOwner> = self.ports.values().map(|p| p.owner).collect();
        let mut in_degree: HashMap<PortOwner, usize> =
            owners.iter().map(|&o| (o, 0)).collect();
        let mut adjacency: HashMap<PortOwner, Vec<PortOwner>> = HashMap::new();

        for (src, dst) in &self.edges {
            let src_owner = self.ports[src].owner;
            let dst_owner = self.ports[dst].owner;
            if src_owner == dst_owner {
                continue;
            }
            adjacency.entry(src_owner).or_default().push(dst_owner);
            *in_degree.entry(dst_owner).or_default() += 1;
        }

        let mut queue: VecDeque<PortOwner> = in_degree
            .iter()
            .filter(|(_, &d)| d == 0)
            .map(|(&o, _)| o)
            .collect();
        let mut order = Vec::with_capacity(owners.len());
        while let Some(owner) = queue.pop_front() {
            order.push(owner);
            if let Some(next) = adjacency.get(&owner) {
                for &n in next {
                    if let Some(d) = in_degree.get_mut(&n) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push_back(n);
                        }
                    }
                }
            }
        }
        self.order = order;
    }

    // ---- cycle-scoped buffer access ----

    /// Start a processing cycle: audio buffers become valid for `nframes`,
    /// event queues start empty. Control values hold across cycles.
    pub fn begin_cycle(&mut self, nframes: usize) {
        let n = nframes.min(self.max_block);
        for buf in self.buffers.values_mut() {
            buf[..n].fill(0.0);
        }
        for queue in self.events.values_mut() {
            queue.clear();
        }
        self.cycle_frames = Some(n);
    }

    /// End the processing cycle; buffers are invalid until the next one.
    pub fn end_cycle(&mut self) {
        self.cycle_frames = None;
    }

    pub fn cycle_active(&self) -> bool {
        self.cycle_frames.is_some()
    }

    /// Write samples into an audio output port's cycle buffer. Must only be
    /// called during an active cycle, and only on audio ports (callers
    /// guard this).
    pub fn write(&mut self, port: PortId, data: &[Sample]) {
        debug_assert!(self.cycle_active(), "port write outside processing cycle");
        debug_assert!(
            self.buffers.contains_key(&port),
            "sample write to a non-audio port"
        );
        let Some(n) = self.cycle_frames else { return };
        if let Some(buf) = self.buffers.get_mut(&port) {
            let len = n.min(data.len());
            buf[..len].copy_from_slice(&data[..len]);
        }
    }

    /// Queue an event on an event output port for the current cycle.
    pub fn push_event(&mut self, port: PortId, event: PortEvent) {
        debug_assert!(self.cycle_active(), "event write outside processing cycle");
        debug_assert!(
            self.events.contains_key(&port),
            "event write to a non-event port"
        );
        if let Some(queue) = self.events.get_mut(&port) {
            queue.push(event);
        }
    }

    /// Collect this cycle's events arriving at an input port, merging every
    /// connected source in frame order.
    pub fn events_for(&self, dst: PortId) -> Vec<PortEvent> {
        debug_assert!(self.cycle_active(), "event read outside processing cycle");
        let mut merged = Vec::new();
        for (src, d) in &self.edges {
            if *d == dst {
                if let Some(queue) = self.events.get(src) {
                    merged.extend_from_slice(queue);
                }
            }
        }
        merged.sort_by_key(|e| e.frame);
        merged
    }

    /// Set a control output port's scalar. The value holds until the next
    /// write (a parameter position, not a per-cycle signal).
    pub fn write_control(&mut self, port: PortId, value: Sample) {
        debug_assert!(
            self.control.contains_key(&port),
            "control write to a non-control port"
        );
        if let Some(v) = self.control.get_mut(&port) {
            *v = value;
        }
    }

    /// Current scalar at a control port: an input resolves through its
    /// connected source (single, by the fan-in rule), an output reads its
    /// own held value. Unconnected and unknown ports read 0.0.
    pub fn control_value(&self, port: PortId) -> Sample {
        let src = self
            .edges
            .iter()
            .find(|(_, d)| *d == port)
            .map(|(s, _)| *s)
            .unwrap_or(port);
        self.control.get(&src).copied().unwrap_or(0.0)
    }

    /// Read a port's cycle buffer.
    pub fn read(&self, port: PortId) -> Option<&[Sample]> {
        debug_assert!(self.cycle_active(), "port read outside processing cycle");
        let n = self.cycle_frames?;
        self.buffers.get(&port).map(|b| &b[..n])
    }

    /// Sum every source connected to `dst` into `out` (fan-in is sample
    /// addition, no implicit gain staging).
    pub fn mix_into(&self, dst: PortId, out: &mut [Sample]) {
        debug_assert!(self.cycle_active(), "port read outside processing cycle");
        let Some(n) = self.cycle_frames else { return };
        let n = n.min(out.len());
        for (src, d) in &self.edges {
            if *d != dst {
                continue;
            }
            if let Some(buf) = self.buffers.get(src) {
                for i in 0..n {
                    out[i] += buf[i];
                }
            }
        }
    }
}
