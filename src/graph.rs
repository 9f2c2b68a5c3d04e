//! Star graphs of words around a central query term, rendered as an
//! interactive vis-network HTML page.

use serde::Serialize;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

pub const CENTER_SIZE: u32 = 30;
const LEAF_BASE_SIZE: u32 = 10;
const LEAF_MAX_BONUS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    pub id: String,
    pub label: String,
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(rename = "value")]
    pub weight: usize,
    pub title: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StarGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

/// Build a star graph with `center` in the middle and one leaf per word.
///
/// Leaf size grows with the count up to a cap. A word equal to the center
/// is skipped.
pub fn build_star_graph(center: &str, word_counts: &[(String, usize)]) -> StarGraph {
    let mut graph = StarGraph::default();
    graph.nodes.push(Node {
        id: center.to_string(),
        label: center.to_string(),
        size: CENTER_SIZE,
    });
    for (word, count) in word_counts {
        if word == center {
            continue;
        }
        graph.nodes.push(Node {
            id: word.clone(),
            label: word.clone(),
            size: LEAF_BASE_SIZE + (*count).min(LEAF_MAX_BONUS) as u32,
        });
        graph.edges.push(Edge {
            from: center.to_string(),
            to: word.clone(),
            weight: *count,
            title: count.to_string(),
        });
    }
    graph
}

const HTML_TEMPLATE: &str = r##"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>__TITLE__</title>
<script src="https://unpkg.com/vis-network@9.1.9/standalone/umd/vis-network.min.js"></script>
<style>
  body { margin: 0; background: #ffffff; }
  #graph { width: 100%; height: 750px; background-color: #ffffff; }
</style>
</head>
<body>
<div id="graph"></div>
<script>
  var nodes = new vis.DataSet(__NODES__);
  var edges = new vis.DataSet(__EDGES__);
  var options = {
    nodes: { shape: "dot", font: { color: "#111" } },
    physics: {
      solver: "forceAtlas2Based",
      forceAtlas2Based: { gravitationalConstant: -50, springLength: 120, springConstant: 0.08 }
    }
  };
  new vis.Network(document.getElementById("graph"), { nodes: nodes, edges: edges }, options);
</script>
</body>
</html>
"##;

/// JSON for embedding inside a `<script>` block.
fn script_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

/// Render the graph as a standalone HTML page.
pub fn render_html(graph: &StarGraph) -> Result<String, serde_json::Error> {
    let title = graph
        .nodes
        .first()
        .map(|n| n.label.replace('<', "&lt;").replace('>', "&gt;"))
        .unwrap_or_default();
    Ok(HTML_TEMPLATE
        .replace("__TITLE__", &title)
        .replace("__NODES__", &script_json(&graph.nodes)?)
        .replace("__EDGES__", &script_json(&graph.edges)?))
}

#[instrument(level = "info", skip(graph), fields(nodes = graph.nodes.len()))]
pub async fn save_graph_html(
    graph: &StarGraph,
    output_path: &Path,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let html = render_html(graph)?;
    fs::write(output_path, html).await?;
    info!(path = %output_path.display(), "Wrote graph HTML");
    Ok(())
}
