//! Node/edge projection of the dependency index with a deterministic force layout.

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::TAU;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wsm_core::TopologyConfig;

use crate::types::{FileAnalysis, ImportTarget};

const REPULSION: f64 = 12_000.0;
const SPRING: f64 = 0.08;
const REST_LENGTH: f64 = 120.0;
const DAMPING: f64 = 0.85;
const MAX_STEP: f64 = 50.0;
const SEED_RADIUS_X: f64 = 400.0;
const SEED_RADIUS_Y: f64 = 300.0;
/// Above this many nodes the quadratic layout is skipped and seed positions are kept.
const LAYOUT_NODE_LIMIT: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeKind {
    File,
    External,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyNode {
    pub id: String,
    pub label: String,
    pub kind: NodeKind,
    pub language: Option<String>,
    pub in_degree: usize,
    pub out_degree: usize,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologyEdge {
    pub source: String,
    pub target: String,
    pub specifier: String,
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Topology {
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<TopologyEdge>,
    pub generated_at: DateTime<Utc>,
}

impl Topology {
    pub fn node(&self, id: &str) -> Option<&TopologyNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

fn external_id(package: &str) -> String {
    format!("external:{}", package)
}

/// Builds the topology from the current analyses. Unresolved imports produce no edge.
pub fn build_topology(analyses: &[FileAnalysis], config: &TopologyConfig) -> Topology {
    let mut nodes: BTreeMap<String, TopologyNode> = BTreeMap::new();
    for analysis in analyses {
        let id = analysis.path.to_string_lossy().into_owned();
        let label = analysis
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.clone());
        nodes.insert(
            id.clone(),
            TopologyNode {
                id,
                label,
                kind: NodeKind::File,
                language: Some(analysis.language.to_string()),
                in_degree: 0,
                out_degree: 0,
                x: 0.0,
                y: 0.0,
            },
        );
    }

    let mut edges = Vec::new();
    for analysis in analyses {
        let source = analysis.path.to_string_lossy().into_owned();
        for import in &analysis.imports {
            let (target, external) = match &import.target {
                ImportTarget::Internal { path } => (path.to_string_lossy().into_owned(), false),
                ImportTarget::External { package } if config.include_external => {
                    let id = external_id(package);
                    nodes.entry(id.clone()).or_insert_with(|| TopologyNode {
                        id: id.clone(),
                        label: package.clone(),
                        kind: NodeKind::External,
                        language: None,
                        in_degree: 0,
                        out_degree: 0,
                        x: 0.0,
                        y: 0.0,
                    });
                    (id, true)
                }
                _ => continue,
            };
            if !nodes.contains_key(&target) {
                continue;
            }
            edges.push(TopologyEdge {
                source: source.clone(),
                target,
                specifier: import.specifier.clone(),
                external,
            });
        }
    }

    for edge in &edges {
        if let Some(node) = nodes.get_mut(&edge.source) {
            node.out_degree += 1;
        }
        if let Some(node) = nodes.get_mut(&edge.target) {
            node.in_degree += 1;
        }
    }

    let mut nodes: Vec<TopologyNode> = nodes.into_values().collect();
    layout(&mut nodes, &edges, config.layout_iterations);

    Topology {
        nodes,
        edges,
        generated_at: Utc::now(),
    }
}

/// Spring-electrical layout seeded on an ellipse. Same input, same output.
fn layout(nodes: &mut [TopologyNode], edges: &[TopologyEdge], iterations: usize) {
    let n = nodes.len();
    if n == 0 {
        return;
    }
    for (i, node) in nodes.iter_mut().enumerate() {
        let angle = TAU * i as f64 / n as f64;
        node.x = angle.cos() * SEED_RADIUS_X;
        node.y = angle.sin() * SEED_RADIUS_Y;
    }
    if n > LAYOUT_NODE_LIMIT {
        return;
    }

    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, node)| (node.id.as_str(), i))
        .collect();
    let springs: Vec<(usize, usize)> = edges
        .iter()
        .filter_map(|e| Some((*index.get(e.source.as_str())?, *index.get(e.target.as_str())?)))
        .filter(|(a, b)| a != b)
        .collect();

    let mut pos: Vec<(f64, f64)> = nodes.iter().map(|n| (n.x, n.y)).collect();
    let mut vel = vec![(0.0f64, 0.0f64); n];

    for _ in 0..iterations {
        let mut force = vec![(0.0f64, 0.0f64); n];

        for i in 0..n {
            for j in (i + 1)..n {
                let dx = pos[i].0 - pos[j].0;
                let dy = pos[i].1 - pos[j].1;
                let scale = REPULSION / (dx * dx + dy * dy + 0.01);
                force[i].0 += dx * scale;
                force[i].1 += dy * scale;
                force[j].0 -= dx * scale;
                force[j].1 -= dy * scale;
            }
        }

        for &(a, b) in &springs {
            let dx = pos[b].0 - pos[a].0;
            let dy = pos[b].1 - pos[a].1;
            let dist = (dx * dx + dy * dy).sqrt().max(0.01);
            let pull = SPRING * (dist - REST_LENGTH);
            let (fx, fy) = (dx / dist * pull, dy / dist * pull);
            force[a].0 += fx;
            force[a].1 += fy;
            force[b].0 -= fx;
            force[b].1 -= fy;
        }

        for i in 0..n {
            vel[i].0 = (vel[i].0 + force[i].0) * DAMPING;
            vel[i].1 = (vel[i].1 + force[i].1) * DAMPING;
            let speed = (vel[i].0 * vel[i].0 + vel[i].1 * vel[i].1).sqrt();
            if speed > MAX_STEP {
                vel[i].0 *= MAX_STEP / speed;
                vel[i].1 *= MAX_STEP / speed;
            }
            pos[i].0 += vel[i].0;
            pos[i].1 += vel[i].1;
        }
    }

    for (node, (x, y)) in nodes.iter_mut().zip(pos) {
        node.x = x;
        node.y = y;
    }
}
