use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use crate::types::Cycle;

pub type NodeId = usize;

/// Upper bound on DFS steps per cycle search; enumeration of simple cycles is
/// exponential in the worst case.
const CYCLE_SEARCH_BUDGET: usize = 200_000;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
    pub target: NodeId,
    pub specifier: String,
}

#[derive(Debug, Clone)]
struct FileNode {
    path: PathBuf,
    outgoing: Vec<DependencyEdge>,
    incoming: BTreeSet<NodeId>,
}

/// File-level import graph stored as an arena.
///
/// Node ids index into `nodes`; removed slots go on a free list and are reused.
/// `incoming` mirrors `outgoing` so dependents can be found without a scan.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<Option<FileNode>>,
    index: HashMap<PathBuf, NodeId>,
    free: Vec<NodeId>,
    edge_count: usize,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.index.contains_key(path)
    }

    pub fn node_id(&self, path: &Path) -> Option<NodeId> {
        self.index.get(path).copied()
    }

    pub fn path(&self, id: NodeId) -> Option<&Path> {
        self.node(id).map(|n| n.path.as_path())
    }

    fn node(&self, id: NodeId) -> Option<&FileNode> {
        self.nodes.get(id).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut FileNode> {
        self.nodes.get_mut(id).and_then(|n| n.as_mut())
    }

    /// Returns the node for `path`, creating it if needed. The flag is true when created.
    pub fn ensure_node(&mut self, path: &Path) -> (NodeId, bool) {
        if let Some(id) = self.node_id(path) {
            return (id, false);
        }
        let node = FileNode {
            path: path.to_path_buf(),
            outgoing: Vec::new(),
            incoming: BTreeSet::new(),
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(path.to_path_buf(), id);
        (id, true)
    }

    /// Removes a node and every edge touching it. Returns the paths that imported it.
    pub fn remove_node(&mut self, path: &Path) -> Option<Vec<PathBuf>> {
        let id = self.index.remove(path)?;
        let node = self.nodes.get_mut(id).and_then(Option::take)?;
        self.free.push(id);

        for edge in &node.outgoing {
            if let Some(target) = self.node_mut(edge.target) {
                target.incoming.remove(&id);
            }
        }
        self.edge_count -= node.outgoing.len();

        let mut importers = Vec::new();
        for source in node.incoming {
            if source == id {
                continue;
            }
            if let Some(src) = self.nodes.get_mut(source).and_then(|n| n.as_mut()) {
                let before = src.outgoing.len();
                src.outgoing.retain(|e| e.target != id);
                self.edge_count -= before - src.outgoing.len();
                importers.push(src.path.clone());
            }
        }
        importers.sort();
        Some(importers)
    }

    /// Replaces all outgoing edges of `source`. Duplicate (target, specifier) pairs collapse.
    pub fn set_edges(&mut self, source: NodeId, edges: impl IntoIterator<Item = (NodeId, String)>) {
        let Some(old) = self.node_mut(source).map(|n| std::mem::take(&mut n.outgoing)) else {
            return;
        };
        self.edge_count -= old.len();
        for edge in &old {
            if let Some(target) = self.node_mut(edge.target) {
                target.incoming.remove(&source);
            }
        }

        let mut seen = HashSet::new();
        let mut outgoing = Vec::new();
        for (target, specifier) in edges {
            if self.node(target).is_none() {
                continue;
            }
            let edge = DependencyEdge { target, specifier };
            if seen.insert(edge.clone()) {
                outgoing.push(edge);
            }
        }
        for edge in &outgoing {
            if let Some(target) = self.node_mut(edge.target) {
                target.incoming.insert(source);
            }
        }
        self.edge_count += outgoing.len();
        if let Some(node) = self.node_mut(source) {
            node.outgoing = outgoing;
        }
    }

    pub fn dependents(&self, id: NodeId) -> Vec<&Path> {
        self.node(id)
            .map(|n| n.incoming.iter().filter_map(|s| self.path(*s)).collect())
            .unwrap_or_default()
    }

    fn successors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = Vec::new();
        if let Some(node) = self.node(id) {
            for edge in &node.outgoing {
                if !out.contains(&edge.target) {
                    out.push(edge.target);
                }
            }
        }
        out
    }

    fn reachable(&self, start: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            for n in self.successors(id) {
                if seen.insert(n) {
                    queue.push_back(n);
                }
            }
        }
        seen
    }

    /// Every simple cycle reachable from `start`, as closed canonical paths.
    ///
    /// Cycles only lie inside strongly connected components, and a component is
    /// either wholly reachable from `start` or not at all. Each non-trivial component
    /// in the reachable set is searched on its own.
    pub fn cycles_from(&self, start: NodeId, limit: usize) -> Vec<Cycle> {
        if self.node(start).is_none() || limit == 0 {
            return Vec::new();
        }
        let reachable = self.reachable(start);
        let components = self
            .strongly_connected_components()
            .into_iter()
            .filter(|c| reachable.contains(&c[0]));
        self.enumerate_cycles(components, limit)
    }

    /// All simple cycles in the graph, up to `limit`.
    pub fn all_cycles(&self, limit: usize) -> Vec<Cycle> {
        self.enumerate_cycles(self.strongly_connected_components(), limit)
    }

    /// Within a component a DFS without a visited set walks every simple path; each
    /// back edge to a node on the recursion stack closes one cycle.
    fn enumerate_cycles(&self, components: impl IntoIterator<Item = Vec<NodeId>>, limit: usize) -> Vec<Cycle> {
        let mut found: BTreeSet<Cycle> = BTreeSet::new();
        for component in components {
            if found.len() >= limit {
                break;
            }
            let start = component[0];
            let nontrivial = component.len() > 1 || self.successors(start).contains(&start);
            if !nontrivial {
                continue;
            }
            let members: HashSet<NodeId> = component.iter().copied().collect();
            let mut search = CycleSearch {
                graph: self,
                component: &members,
                current_path: Vec::new(),
                rec_stack: HashSet::new(),
                found: &mut found,
                limit,
                budget: CYCLE_SEARCH_BUDGET,
            };
            search.dfs(start);
        }
        found.into_iter().collect()
    }

    /// Tarjan's algorithm, iterative.
    fn strongly_connected_components(&self) -> Vec<Vec<NodeId>> {
        const UNVISITED: usize = usize::MAX;
        let n = self.nodes.len();
        let mut index = vec![UNVISITED; n];
        let mut low = vec![0usize; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<NodeId> = Vec::new();
        let mut counter = 0usize;
        let mut components = Vec::new();

        let mut roots: Vec<(&PathBuf, NodeId)> = self.index.iter().map(|(p, id)| (p, *id)).collect();
        roots.sort();

        for (_, root) in roots {
            if index[root] != UNVISITED {
                continue;
            }
            index[root] = counter;
            low[root] = counter;
            counter += 1;
            stack.push(root);
            on_stack[root] = true;
            let mut call: Vec<(NodeId, Vec<NodeId>, usize)> = vec![(root, self.successors(root), 0)];

            while let Some(frame) = call.last_mut() {
                let v = frame.0;
                if frame.2 < frame.1.len() {
                    let w = frame.1[frame.2];
                    frame.2 += 1;
                    if index[w] == UNVISITED {
                        index[w] = counter;
                        low[w] = counter;
                        counter += 1;
                        stack.push(w);
                        on_stack[w] = true;
                        call.push((w, self.successors(w), 0));
                    } else if on_stack[w] {
                        low[v] = low[v].min(index[w]);
                    }
                } else {
                    call.pop();
                    if let Some(parent) = call.last() {
                        low[parent.0] = low[parent.0].min(low[v]);
                    }
                    if low[v] == index[v] {
                        let mut component = Vec::new();
                        while let Some(w) = stack.pop() {
                            on_stack[w] = false;
                            component.push(w);
                            if w == v {
                                break;
                            }
                        }
                        component.sort_by(|a, b| self.path(*a).cmp(&self.path(*b)));
                        components.push(component);
                    }
                }
            }
        }
        components
    }

    fn canonical_cycle(&self, ids: &[NodeId]) -> Option<Cycle> {
        let mut paths: Vec<PathBuf> = ids
            .iter()
            .map(|id| self.path(*id).map(Path::to_path_buf))
            .collect::<Option<_>>()?;
        let min = paths
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.cmp(b.1))
            .map(|(i, _)| i)?;
        paths.rotate_left(min);
        let first = paths[0].clone();
        paths.push(first);
        Some(paths)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

struct CycleSearch<'g, 'f> {
    graph: &'g DependencyGraph,
    component: &'g HashSet<NodeId>,
    current_path: Vec<NodeId>,
    rec_stack: HashSet<NodeId>,
    found: &'f mut BTreeSet<Cycle>,
    limit: usize,
    budget: usize,
}

impl CycleSearch<'_, '_> {
    fn dfs(&mut self, node: NodeId) {
        if self.found.len() >= self.limit || self.budget == 0 {
            return;
        }
        self.budget -= 1;
        self.rec_stack.insert(node);
        self.current_path.push(node);

        for dep in self.graph.successors(node) {
            if !self.component.contains(&dep) {
                continue;
            }
            if self.rec_stack.contains(&dep) {
                if let Some(start_idx) = self.current_path.iter().position(|n| *n == dep) {
                    if let Some(cycle) = self.graph.canonical_cycle(&self.current_path[start_idx..]) {
                        if self.found.len() < self.limit {
                            self.found.insert(cycle);
                        }
                    }
                }
            } else {
                self.dfs(dep);
            }
        }

        self.current_path.pop();
        self.rec_stack.remove(&node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(edges: &[(&str, &str)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        let mut outgoing: HashMap<NodeId, Vec<(NodeId, String)>> = HashMap::new();
        for (from, to) in edges {
            let (a, _) = graph.ensure_node(Path::new(from));
            let (b, _) = graph.ensure_node(Path::new(to));
            outgoing.entry(a).or_default().push((b, format!("./{}", to)));
        }
        for (source, targets) in outgoing {
            graph.set_edges(source, targets);
        }
        graph
    }

    fn cycle(paths: &[&str]) -> Cycle {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_set_edges_dedupes_and_replaces() {
        let mut graph = DependencyGraph::new();
        let (a, created) = graph.ensure_node(Path::new("a.js"));
        assert!(created);
        let (b, _) = graph.ensure_node(Path::new("b.js"));
        graph.set_edges(a, vec![(b, "./b".to_string()), (b, "./b".to_string()), (b, "./b.js".to_string())]);
        assert_eq!(graph.edge_count(), 2);
        assert_eq!(graph.dependents(b), vec![Path::new("a.js")]);

        graph.set_edges(a, Vec::new());
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.dependents(b).is_empty());
    }

    #[test]
    fn test_remove_node_reports_importers_and_reuses_slot() {
        let mut graph = graph_with(&[("a.js", "c.js"), ("b.js", "c.js"), ("c.js", "d.js")]);
        assert_eq!(graph.edge_count(), 3);
        let c = graph.node_id(Path::new("c.js")).unwrap();

        let importers = graph.remove_node(Path::new("c.js")).unwrap();
        assert_eq!(importers, vec![PathBuf::from("a.js"), PathBuf::from("b.js")]);
        assert_eq!(graph.edge_count(), 0);
        assert!(!graph.contains(Path::new("c.js")));

        let (e, _) = graph.ensure_node(Path::new("e.js"));
        assert_eq!(e, c);
        assert!(graph.dependents(e).is_empty());
    }

    #[test]
    fn test_three_cycle_found_from_any_member() {
        let graph = graph_with(&[("a.js", "b.js"), ("b.js", "c.js"), ("c.js", "a.js")]);
        let expected = vec![cycle(&["a.js", "b.js", "c.js", "a.js"])];
        for start in ["a.js", "b.js", "c.js"] {
            let id = graph.node_id(Path::new(start)).unwrap();
            assert_eq!(graph.cycles_from(id, 16), expected);
        }
    }

    #[test]
    fn test_two_cycle_and_self_loop() {
        let graph = graph_with(&[("a.js", "b.js"), ("b.js", "a.js"), ("s.js", "s.js")]);
        let a = graph.node_id(Path::new("a.js")).unwrap();
        assert_eq!(graph.cycles_from(a, 16), vec![cycle(&["a.js", "b.js", "a.js"])]);
        let s = graph.node_id(Path::new("s.js")).unwrap();
        assert_eq!(graph.cycles_from(s, 16), vec![cycle(&["s.js", "s.js"])]);
    }

    #[test]
    fn test_every_simple_cycle_is_reported() {
        // Two cycles sharing a.js, plus an acyclic tail.
        let graph = graph_with(&[
            ("a.js", "b.js"),
            ("b.js", "a.js"),
            ("a.js", "c.js"),
            ("c.js", "d.js"),
            ("d.js", "a.js"),
            ("d.js", "tail.js"),
        ]);
        let b = graph.node_id(Path::new("b.js")).unwrap();
        let cycles = graph.cycles_from(b, 16);
        assert_eq!(
            cycles,
            vec![
                cycle(&["a.js", "b.js", "a.js"]),
                cycle(&["a.js", "c.js", "d.js", "a.js"]),
            ]
        );
        assert_eq!(graph.all_cycles(16), cycles);
        assert_eq!(graph.all_cycles(1).len(), 1);

        let tail = graph.node_id(Path::new("tail.js")).unwrap();
        assert!(graph.cycles_from(tail, 16).is_empty());
    }

    #[test]
    fn test_cycles_downstream_of_start_are_reported() {
        let graph = graph_with(&[("a.js", "b.js"), ("b.js", "c.js"), ("c.js", "b.js"), ("z.js", "z.js")]);
        let a = graph.node_id(Path::new("a.js")).unwrap();
        assert_eq!(graph.cycles_from(a, 16), vec![cycle(&["b.js", "c.js", "b.js"])]);

        let c = graph.node_id(Path::new("c.js")).unwrap();
        assert_eq!(graph.cycles_from(c, 16), vec![cycle(&["b.js", "c.js", "b.js"])]);
        assert_eq!(graph.all_cycles(16).len(), 2);
    }

    #[test]
    fn test_acyclic_graph() {
        let graph = graph_with(&[("a.js", "b.js"), ("b.js", "c.js"), ("a.js", "c.js")]);
        assert!(graph.all_cycles(16).is_empty());
    }
}
