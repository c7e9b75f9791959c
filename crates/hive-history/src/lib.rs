//! Provenance graph for the Hive platform.
//!
//! Every agent keeps a [`History`]: a directed graph of the
//! [`Information`] records it has produced or received, with an edge from
//! each record to the records derived from it. Records may arrive in any
//! order and more than once; a child seen before its parent creates a
//! placeholder vertex for the parent that is filled in when the parent
//! itself is recorded.
//!
//! Vertices live in an append-only arena addressed by index. A concurrent
//! id → index map serves lookups, and one read/write lock around the arena
//! coordinates writers so that a vertex and its edges are always observed
//! together.

use std::collections::{HashSet, VecDeque};

use dashmap::DashMap;
use hive_types::Information;
use parking_lot::RwLock;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug)]
struct Vertex {
    info: Information,
    /// `false` while the vertex is only known as someone's parent.
    recorded: bool,
    parents: Vec<usize>,
    children: Vec<usize>,
}

impl Vertex {
    fn placeholder(id: Uuid) -> Self {
        Self {
            info: Information {
                id,
                ..Information::new()
            },
            recorded: false,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Overwrites the fields present in `incoming`. Absent fields never
    /// erase populated ones.
    fn merge(&mut self, incoming: &Information) {
        if incoming.parent_id.is_some() {
            self.info.parent_id = incoming.parent_id;
        }
        if incoming.input.is_some() {
            self.info.input.clone_from(&incoming.input);
        }
        if incoming.output.is_some() {
            self.info.output.clone_from(&incoming.output);
        }
        if incoming.function_id.is_some() {
            self.info.function_id.clone_from(&incoming.function_id);
        }
        self.recorded = true;
    }
}

#[derive(Debug, Default)]
struct Graph {
    vertices: Vec<Vertex>,
    edge_count: usize,
}

/// A serializable view of one vertex.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VertexSnapshot {
    #[serde(flatten)]
    pub information: Information,
    pub placeholder: bool,
}

/// A serializable view of the whole graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySnapshot {
    pub vertices: Vec<VertexSnapshot>,
    /// `(parent, child)` pairs.
    pub edges: Vec<(Uuid, Uuid)>,
}

/// Concurrent provenance graph keyed by information id.
#[derive(Debug, Default)]
pub struct History {
    index: DashMap<Uuid, usize>,
    graph: RwLock<Graph>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `information`, linking it to its parent.
    ///
    /// Idempotent: recording the same record again changes nothing, and a
    /// parent→child edge is only ever added once.
    pub fn record(&self, information: &Information) {
        let mut graph = self.graph.write();

        let child = self.vertex_index(&mut graph, information.id);
        graph.vertices[child].merge(information);

        let Some(parent_id) = information.parent_id else {
            return;
        };
        if parent_id == information.id {
            tracing::warn!(id = %parent_id, "information names itself as parent, edge skipped");
            return;
        }
        let parent = self.vertex_index(&mut graph, parent_id);
        if !graph.vertices[parent].children.contains(&child) {
            graph.vertices[parent].children.push(child);
            graph.vertices[child].parents.push(parent);
            graph.edge_count += 1;
        }
    }

    /// Index of `id`, creating a placeholder vertex if unseen. Must be called
    /// with the write lock held.
    fn vertex_index(&self, graph: &mut Graph, id: Uuid) -> usize {
        if let Some(index) = self.index.get(&id).map(|entry| *entry) {
            return index;
        }
        let index = graph.vertices.len();
        graph.vertices.push(Vertex::placeholder(id));
        self.index.insert(id, index);
        index
    }

    fn lookup(&self, id: &Uuid) -> Option<usize> {
        self.index.get(id).map(|entry| *entry)
    }

    /// The record for `id`, if it has been recorded (placeholders excluded).
    pub fn get(&self, id: &Uuid) -> Option<Information> {
        let index = self.lookup(id)?;
        let graph = self.graph.read();
        let vertex = &graph.vertices[index];
        vertex.recorded.then(|| vertex.info.clone())
    }

    /// Whether a vertex exists for `id`, placeholder or not.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.index.contains_key(id)
    }

    /// Whether `id` is only known as the parent of another record.
    pub fn is_placeholder(&self, id: &Uuid) -> bool {
        self.lookup(id)
            .is_some_and(|index| !self.graph.read().vertices[index].recorded)
    }

    /// Number of vertices, placeholders included.
    pub fn len(&self) -> usize {
        self.graph.read().vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.read().edge_count
    }

    /// Direct parents of `id`.
    pub fn parents(&self, id: &Uuid) -> Vec<Uuid> {
        self.neighbors(id, |vertex| &vertex.parents)
    }

    /// Direct children of `id`.
    pub fn children(&self, id: &Uuid) -> Vec<Uuid> {
        self.neighbors(id, |vertex| &vertex.children)
    }

    fn neighbors(&self, id: &Uuid, edges: impl Fn(&Vertex) -> &Vec<usize>) -> Vec<Uuid> {
        let Some(index) = self.lookup(id) else {
            return Vec::new();
        };
        let graph = self.graph.read();
        edges(&graph.vertices[index])
            .iter()
            .map(|&i| graph.vertices[i].info.id)
            .collect()
    }

    /// The causal chain above `id`: its parent, the parent's parent, and so
    /// on up to the root, nearest first. `id` itself is not included.
    ///
    /// Follows each record's current `parent_id` and stops at the first
    /// repeated vertex.
    pub fn lineage(&self, id: &Uuid) -> Vec<Uuid> {
        let graph = self.graph.read();
        let mut chain = Vec::new();
        let mut seen = HashSet::from([*id]);
        let mut current = *id;
        while let Some(parent) = self
            .lookup(&current)
            .and_then(|index| graph.vertices[index].info.parent_id)
        {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }
        chain
    }

    /// Every record derived from `id`, directly or transitively, in
    /// breadth-first order.
    pub fn descendants(&self, id: &Uuid) -> Vec<Uuid> {
        let Some(start) = self.lookup(id) else {
            return Vec::new();
        };
        let graph = self.graph.read();
        let mut visited = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut found = Vec::new();
        while let Some(index) = queue.pop_front() {
            for &child in &graph.vertices[index].children {
                if visited.insert(child) {
                    found.push(graph.vertices[child].info.id);
                    queue.push_back(child);
                }
            }
        }
        found
    }

    /// Vertices without parents, in insertion order.
    pub fn roots(&self) -> Vec<Uuid> {
        self.graph
            .read()
            .vertices
            .iter()
            .filter(|vertex| vertex.parents.is_empty())
            .map(|vertex| vertex.info.id)
            .collect()
    }

    /// A consistent copy of the whole graph.
    pub fn snapshot(&self) -> HistorySnapshot {
        let graph = self.graph.read();
        let vertices = graph
            .vertices
            .iter()
            .map(|vertex| VertexSnapshot {
                information: vertex.info.clone(),
                placeholder: !vertex.recorded,
            })
            .collect();
        let edges = graph
            .vertices
            .iter()
            .flat_map(|vertex| {
                vertex
                    .children
                    .iter()
                    .map(|&child| (vertex.info.id, graph.vertices[child].info.id))
            })
            .collect();
        HistorySnapshot { vertices, edges }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    const T0: &str = "2026-01-01T00:00:00.000Z";
    const T1: &str = "2026-01-01T00:00:01.000Z";

    // ── record ───────────────────────────────────────────────────────

    #[test]
    fn record_root_and_child() {
        let history = History::new();
        let root = Information::begin(json!({"q": 1}), T0);
        let child = Information::child_of(&root, json!({"q": 2}), T1);

        history.record(&root);
        history.record(&child);

        assert_eq!(history.len(), 2);
        assert_eq!(history.edge_count(), 1);
        assert_eq!(history.children(&root.id), [child.id]);
        assert_eq!(history.parents(&child.id), [root.id]);
        assert_eq!(history.roots(), [root.id]);
        assert_eq!(history.get(&child.id), Some(child));
    }

    #[test]
    fn record_is_idempotent() {
        let history = History::new();
        let root = Information::begin(json!("in"), T0);
        let child = Information::child_of(&root, json!("in"), T1);

        for _ in 0..3 {
            history.record(&root);
            history.record(&child);
        }

        assert_eq!(history.len(), 2);
        assert_eq!(history.edge_count(), 1);
        assert_eq!(history.get(&root.id), Some(root));
    }

    #[test]
    fn child_before_parent_creates_placeholder() {
        let history = History::new();
        let root = Information::begin(json!("in"), T0);
        let child = Information::child_of(&root, json!("in"), T1);

        history.record(&child);
        assert!(history.contains(&root.id));
        assert!(history.is_placeholder(&root.id));
        assert_eq!(history.get(&root.id), None);
        assert_eq!(history.edge_count(), 1);

        history.record(&root);
        assert!(!history.is_placeholder(&root.id));
        assert_eq!(history.get(&root.id), Some(root));
        assert_eq!(history.len(), 2);
        assert_eq!(history.edge_count(), 1);
    }

    #[test]
    fn absent_fields_do_not_erase_populated_ones() {
        let history = History::new();
        let mut full = Information::begin(json!("in"), T0);
        full.complete(json!("out"), T1, Some("summarize".into()))
            .expect("first completion");
        history.record(&full);

        let sparse = Information {
            id: full.id,
            ..Information::new()
        };
        history.record(&sparse);

        assert_eq!(history.get(&full.id), Some(full));
    }

    #[test]
    fn present_fields_overwrite() {
        let history = History::new();
        let started = Information::begin(json!("in"), T0);
        history.record(&started);

        let mut completed = started.clone();
        completed
            .complete(json!("out"), T1, None)
            .expect("first completion");
        history.record(&completed);

        let stored = history.get(&started.id).expect("recorded");
        assert!(stored.is_complete());
        assert_eq!(stored.input, started.input);
    }

    #[test]
    fn self_parent_adds_no_edge() {
        let history = History::new();
        let mut looped = Information::begin(json!("in"), T0);
        looped.parent_id = Some(looped.id);

        history.record(&looped);

        assert_eq!(history.len(), 1);
        assert_eq!(history.edge_count(), 0);
        assert!(history.parents(&looped.id).is_empty());
    }

    // ── queries ──────────────────────────────────────────────────────

    #[test]
    fn lineage_and_descendants() {
        let history = History::new();
        let a = Information::begin(json!(1), T0);
        let b = Information::child_of(&a, json!(2), T0);
        let c = Information::child_of(&b, json!(3), T0);
        let d = Information::child_of(&a, json!(4), T0);
        for info in [&a, &b, &c, &d] {
            history.record(info);
        }

        assert_eq!(history.lineage(&c.id), [b.id, a.id]);
        assert!(history.lineage(&a.id).is_empty());

        let mut below_a = history.descendants(&a.id);
        below_a.sort();
        let mut expected = vec![b.id, c.id, d.id];
        expected.sort();
        assert_eq!(below_a, expected);
        assert!(history.descendants(&c.id).is_empty());
    }

    #[test]
    fn lineage_stops_on_cycles() {
        let history = History::new();
        let mut a = Information::begin(json!(1), T0);
        let b = Information::child_of(&a, json!(2), T0);
        a.parent_id = Some(b.id);
        history.record(&a);
        history.record(&b);

        assert_eq!(history.lineage(&a.id), [b.id]);
        assert_eq!(history.lineage(&b.id), [a.id]);
        assert!(history.roots().is_empty());
    }

    #[test]
    fn unknown_ids_answer_empty() {
        let history = History::new();
        let id = Uuid::new_v4();
        assert!(history.is_empty());
        assert!(!history.contains(&id));
        assert!(!history.is_placeholder(&id));
        assert!(history.parents(&id).is_empty());
        assert!(history.lineage(&id).is_empty());
        assert!(history.descendants(&id).is_empty());
    }

    #[test]
    fn snapshot_serializes_vertices_and_edges() {
        let history = History::new();
        let root = Information::begin(json!("in"), T0);
        let child = Information::child_of(&root, json!("in"), T1);
        history.record(&child);

        let snapshot = history.snapshot();
        assert_eq!(snapshot.edges, [(root.id, child.id)]);
        assert_eq!(snapshot.vertices.len(), 2);

        let value = serde_json::to_value(&snapshot).expect("should serialize");
        let placeholders: Vec<bool> = value["vertices"]
            .as_array()
            .expect("vertex array")
            .iter()
            .map(|v| v["placeholder"].as_bool().expect("flag"))
            .collect();
        assert_eq!(placeholders, [false, true]);
    }

    #[test]
    fn concurrent_duplicate_delivery_converges() {
        let history = Arc::new(History::new());
        let root = Information::begin(json!("in"), T0);
        let children: Vec<Information> = (0..16)
            .map(|i| Information::child_of(&root, json!(i), T1))
            .collect();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let history = Arc::clone(&history);
                let root = root.clone();
                let children = children.clone();
                std::thread::spawn(move || {
                    for child in &children {
                        history.record(child);
                    }
                    history.record(&root);
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread should finish");
        }

        assert_eq!(history.len(), 17);
        assert_eq!(history.edge_count(), 16);
        assert_eq!(history.children(&root.id).len(), 16);
        assert!(!history.is_placeholder(&root.id));
    }
}
