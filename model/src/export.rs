//! Payload schemas for the JSON artifacts the pipeline writes.
//!
//! Weight-class maps use [`IndexMap`] so the serialized objects keep the
//! numeric ordering the exporters compute instead of falling back to
//! lexicographic key order.

use chrono::NaiveDateTime;

use indexmap::IndexMap;

use serde::{Deserialize, Serialize};

/// A full replay snapshot for one volatility constraint, written to
/// `glicko2_tau-<tau>.json`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RatingSnapshot {
    pub tau: f64,
    pub generated_at: String,
    /// First replayed calendar month, `YYYY-MM-DD`.
    pub period_start: Option<String>,
    /// Last replayed calendar month, `YYYY-MM-DD`.
    pub period_end: Option<String>,
    pub total_periods: usize,
    pub weight_classes: IndexMap<String, Vec<RatingEntry>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RatingEntry {
    pub wrestler_id: String,
    pub name: String,
    pub rating: f64,
    pub rd: f64,
    pub volatility: f64,
    pub matches: u32,
    /// `YYYY-MM` label of the last period the wrestler competed in.
    pub last_active_period: Option<String>,
}

/// The `leaderboards.json` document.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Leaderboard {
    pub generated_at: String,
    pub method: String,
    pub limit_per_weight: usize,
    pub min_last_updated: Option<String>,
    pub weight_classes: IndexMap<String, Vec<LeaderboardEntry>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LeaderboardEntry {
    pub wrestler_id: String,
    pub name: String,
    pub rating: f64,
    pub rd: f64,
    pub volatility: f64,
    pub conservative_rating: f64,
    pub last_updated: Option<String>,
}

/// Evaluation summary over held-out matches, one row per tau.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EvalSummary {
    pub generated_at: String,
    pub train_end: NaiveDateTime,
    pub eval_start: NaiveDateTime,
    pub eval_end: Option<NaiveDateTime>,
    pub taus: Vec<f64>,
    pub results: Vec<EvalResult>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct EvalResult {
    pub tau: f64,
    pub matches: usize,
    pub log_loss: f64,
    pub brier: f64,
    pub accuracy: f64,
}

/// The `graph.json` document consumed by the static viewer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Graph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GraphNode {
    pub id: String,
    pub attributes: NodeAttributes,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeAttributes {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub color: String,
    pub size: f64,
    pub wins: i64,
    pub losses: i64,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GraphEdge {
    pub key: String,
    pub source: String,
    pub target: String,
    pub attributes: EdgeAttributes,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EdgeAttributes {
    #[serde(rename = "type")]
    pub kind: String,
}
