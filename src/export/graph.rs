//! Win/loss graph export for the static viewer.
//!
//! Two SQL aggregations supply the data: per-wrestler win/loss totals and
//! directed winner-to-loser edges with counts. Node color follows win
//! percentage on a red-to-green gradient, node size scales linearly with
//! match count, and positions come from the force-directed layout.

use std::collections::HashMap;
use std::fs;

use petgraph::graph::{DiGraph, NodeIndex};

use sqlx::SqliteConnection;

use takedown_model::export::{EdgeAttributes, Graph, GraphEdge, GraphNode, NodeAttributes};

use crate::{
    cli::GraphArgs,
    store::{self, MatchEdge, MatchFilter, WrestlerStats},
};

use super::layout;

const MIN_NODE_SIZE: f64 = 2.0;
const MAX_NODE_SIZE: f64 = 15.0;
const LAYOUT_ITERATIONS: usize = 50;
const LAYOUT_SEED: u64 = 42;

/// Flattens repeated and comma-separated weight-class flags. `*` anywhere
/// (or no flags at all) selects every weight class.
pub fn normalize_weight_classes(raw: &[String]) -> Option<Vec<String>> {
    if raw.is_empty() {
        return None;
    }
    let mut normalized = Vec::new();
    for value in raw {
        for part in value.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            if part == "*" {
                return None;
            }
            normalized.push(part.to_string());
        }
    }
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Maps a win percentage to a red-to-green gradient (hue 0 to 120).
pub fn win_pct_to_color(win_pct: f64) -> String {
    let hue = win_pct * 120.0;
    let h = hue / 60.0;
    let c = 1.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());

    let (r, g, b) = if h < 1.0 {
        (c, x, 0.0)
    } else if h < 2.0 {
        (x, c, 0.0)
    } else if h < 3.0 {
        (0.0, c, x)
    } else if h < 4.0 {
        (0.0, x, c)
    } else if h < 5.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    format!(
        "#{:02x}{:02x}{:02x}",
        (r * 255.0) as u8,
        (g * 255.0) as u8,
        (b * 255.0) as u8
    )
}

/// Scales a node linearly between the size bounds by match count; the
/// midpoint when every node has the same count.
pub fn node_size(matches: i64, min_matches: i64, max_matches: i64) -> f64 {
    if max_matches == min_matches {
        return (MIN_NODE_SIZE + MAX_NODE_SIZE) / 2.0;
    }
    let normalized = (matches - min_matches) as f64 / (max_matches - min_matches) as f64;
    MIN_NODE_SIZE + normalized * (MAX_NODE_SIZE - MIN_NODE_SIZE)
}

/// Builds the output document from the two aggregations.
pub fn build_graph_payload(stats: &[WrestlerStats], edge_rows: &[MatchEdge]) -> Graph {
    let mut graph: DiGraph<(), i64> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for stat in stats {
        indices.insert(stat.id.as_str(), graph.add_node(()));
    }

    let mut kept_edges = Vec::new();
    for edge in edge_rows {
        let (Some(source), Some(target)) = (edge.source.as_deref(), edge.target.as_deref())
        else {
            continue;
        };
        if let (Some(&a), Some(&b)) = (indices.get(source), indices.get(target)) {
            graph.add_edge(a, b, edge.count);
        }
        kept_edges.push((source.to_string(), target.to_string()));
    }

    let positions = layout::force_directed(&graph, LAYOUT_ITERATIONS, LAYOUT_SEED);

    let totals: Vec<i64> = stats.iter().map(|stat| stat.wins + stat.losses).collect();
    let min_matches = totals.iter().copied().min().unwrap_or(0);
    let max_matches = totals.iter().copied().max().unwrap_or(0);

    let nodes = stats
        .iter()
        .enumerate()
        .map(|(idx, stat)| {
            let total = stat.wins + stat.losses;
            let win_pct = if total > 0 {
                stat.wins as f64 / total as f64
            } else {
                0.0
            };
            let (x, y) = positions.get(idx).copied().unwrap_or((0.0, 0.0));
            GraphNode {
                id: stat.id.clone(),
                attributes: NodeAttributes {
                    label: stat.name.clone().unwrap_or_default(),
                    x,
                    y,
                    color: win_pct_to_color(win_pct),
                    size: node_size(total, min_matches, max_matches),
                    wins: stat.wins,
                    losses: stat.losses,
                },
            }
        })
        .collect();

    let edges = kept_edges
        .into_iter()
        .map(|(source, target)| GraphEdge {
            key: format!("{source}>{target}"),
            source,
            target,
            attributes: EdgeAttributes {
                kind: "arrow".into(),
            },
        })
        .collect();

    Graph { nodes, edges }
}

/// Runs the `graph` subcommand.
pub async fn run(args: GraphArgs, conn: &mut SqliteConnection) -> Result<(), anyhow::Error> {
    if let (Some(start), Some(end)) = (args.start_date, args.end_date) {
        if start > end {
            anyhow::bail!("start-date must be less than or equal to end-date");
        }
    }

    let weight_classes = normalize_weight_classes(&args.weight_classes);
    match &weight_classes {
        Some(weights) => {
            tracing::info!(weights = %weights.join(", "), "exporting match graph")
        }
        None => tracing::info!("exporting match graph for all weight classes"),
    }

    let filter = MatchFilter {
        weight_classes,
        start: args.start_date,
        end: args.end_date,
    };

    // two independent reads over one connection; issuing them back to
    // back yields the same result a concurrent issue would
    let stats = store::fetch_wrestler_stats(conn, &filter).await?;
    let edge_rows = store::fetch_match_edges(conn, &filter).await?;
    tracing::info!(
        wrestlers = stats.len(),
        edges = edge_rows.len(),
        "aggregated match graph"
    );

    let payload = build_graph_payload(&stats, &edge_rows);
    fs::write("graph.json", serde_json::to_string_pretty(&payload)?)?;

    tracing::info!(
        nodes = payload.nodes.len(),
        edges = payload.edges.len(),
        "wrote graph.json"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(id: &str, wins: i64, losses: i64) -> WrestlerStats {
        WrestlerStats {
            id: id.into(),
            name: Some(format!("Wrestler {id}")),
            wins,
            losses,
        }
    }

    #[test]
    fn gradient_runs_red_to_green() {
        assert_eq!(win_pct_to_color(0.0), "#ff0000");
        assert_eq!(win_pct_to_color(0.5), "#ffff00");
        assert_eq!(win_pct_to_color(1.0), "#00ff00");
    }

    #[test]
    fn equal_match_counts_take_the_midpoint_size() {
        assert_eq!(node_size(3, 3, 3), 8.5);
        assert_eq!(node_size(0, 0, 10), 2.0);
        assert_eq!(node_size(10, 0, 10), 15.0);
    }

    #[test]
    fn weight_flags_flatten_and_star_selects_all() {
        assert_eq!(normalize_weight_classes(&[]), None);
        assert_eq!(normalize_weight_classes(&["*".into()]), None);
        assert_eq!(normalize_weight_classes(&["138, 145".into(), "*".into()]), None);
        assert_eq!(
            normalize_weight_classes(&["138, 145".into(), "152".into()]),
            Some(vec!["138".into(), "145".into(), "152".into()])
        );
        assert_eq!(normalize_weight_classes(&["  ,  ".into()]), None);
    }

    #[test]
    fn payload_wires_nodes_and_edges_together() {
        let stats = [stat("a", 2, 0), stat("b", 0, 2)];
        let edge_rows = [MatchEdge {
            source: Some("a".into()),
            target: Some("b".into()),
            count: 2,
        }];

        let payload = build_graph_payload(&stats, &edge_rows);

        assert_eq!(payload.nodes.len(), 2);
        assert_eq!(payload.edges.len(), 1);

        let a = &payload.nodes[0];
        assert_eq!(a.attributes.color, "#00ff00");
        assert_eq!(a.attributes.wins, 2);
        assert!(a.attributes.x.is_finite());

        let edge = &payload.edges[0];
        assert_eq!(edge.key, "a>b");
        assert_eq!(edge.attributes.kind, "arrow");
    }

    #[test]
    fn edges_with_null_endpoints_are_dropped() {
        let stats = [stat("a", 1, 0)];
        let edge_rows = [MatchEdge {
            source: Some("a".into()),
            target: None,
            count: 1,
        }];

        let payload = build_graph_payload(&stats, &edge_rows);
        assert!(payload.edges.is_empty());
    }
}
