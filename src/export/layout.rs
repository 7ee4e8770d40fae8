//! Force-directed layout for the match graph.
//!
//! A plain Fruchterman-Reingold simulation: nodes repel with `k^2/d`,
//! edges attract with `d^2/k`, displacement is capped by a temperature
//! that cools linearly to zero. Seeded initial positions make the layout
//! reproducible run to run.

use petgraph::graph::DiGraph;
use petgraph::visit::EdgeRef;

use rand::{Rng, SeedableRng, rngs::StdRng};

/// Computes positions for every node of `graph`, indexed by node index.
pub fn force_directed<N, E>(
    graph: &DiGraph<N, E>,
    iterations: usize,
    seed: u64,
) -> Vec<(f64, f64)> {
    let count = graph.node_count();
    if count == 0 {
        return Vec::new();
    }
    if count == 1 {
        return vec![(0.0, 0.0)];
    }

    let optimal = 25.0 / (count as f64).sqrt();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positions: Vec<(f64, f64)> = (0..count)
        .map(|_| (rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)))
        .collect();

    let mut temperature = 0.1 * 2.0;
    let cooling = temperature / (iterations as f64 + 1.0);

    for _ in 0..iterations {
        let mut displacement = vec![(0.0f64, 0.0f64); count];

        for i in 0..count {
            for j in (i + 1)..count {
                let dx = positions[i].0 - positions[j].0;
                let dy = positions[i].1 - positions[j].1;
                let distance = (dx * dx + dy * dy).sqrt().max(1e-9);
                let repulsion = optimal * optimal / distance;
                let (ux, uy) = (dx / distance, dy / distance);
                displacement[i].0 += ux * repulsion;
                displacement[i].1 += uy * repulsion;
                displacement[j].0 -= ux * repulsion;
                displacement[j].1 -= uy * repulsion;
            }
        }

        for edge in graph.edge_references() {
            let a = edge.source().index();
            let b = edge.target().index();
            if a == b {
                continue;
            }
            let dx = positions[a].0 - positions[b].0;
            let dy = positions[a].1 - positions[b].1;
            let distance = (dx * dx + dy * dy).sqrt().max(1e-9);
            let attraction = distance * distance / optimal;
            let (ux, uy) = (dx / distance, dy / distance);
            displacement[a].0 -= ux * attraction;
            displacement[a].1 -= uy * attraction;
            displacement[b].0 += ux * attraction;
            displacement[b].1 += uy * attraction;
        }

        for (position, (dx, dy)) in positions.iter_mut().zip(&displacement) {
            let magnitude = (dx * dx + dy * dy).sqrt().max(1e-9);
            let capped = magnitude.min(temperature);
            position.0 += dx / magnitude * capped;
            position.1 += dy / magnitude * capped;
        }

        temperature = (temperature - cooling).max(0.0);
    }

    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> DiGraph<&'static str, ()> {
        let mut graph = DiGraph::new();
        let a = graph.add_node("a");
        let b = graph.add_node("b");
        let c = graph.add_node("c");
        graph.add_edge(a, b, ());
        graph.add_edge(b, c, ());
        graph.add_edge(c, a, ());
        graph
    }

    #[test]
    fn same_seed_reproduces_the_layout() {
        let graph = triangle();
        let first = force_directed(&graph, 50, 42);
        let second = force_directed(&graph, 50, 42);
        assert_eq!(first, second);
    }

    #[test]
    fn nodes_end_at_distinct_finite_positions() {
        let graph = triangle();
        let positions = force_directed(&graph, 50, 42);

        assert_eq!(positions.len(), 3);
        for (x, y) in &positions {
            assert!(x.is_finite() && y.is_finite());
        }
        assert_ne!(positions[0], positions[1]);
        assert_ne!(positions[1], positions[2]);
    }

    #[test]
    fn trivial_graphs_do_not_blow_up() {
        let empty: DiGraph<(), ()> = DiGraph::new();
        assert!(force_directed(&empty, 50, 42).is_empty());

        let mut single = DiGraph::<(), ()>::new();
        single.add_node(());
        assert_eq!(force_directed(&single, 50, 42), vec![(0.0, 0.0)]);
    }
}
