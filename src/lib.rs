//! FloArena wrestler crawler and Glicko-2 rating pipeline.
//!
//! The pipeline walks the wrestler opponent graph from a seed identity,
//! persists everything it sees, replays the match history month by month
//! with Glicko-2, and exports leaderboards and a laid-out match graph.

pub mod cli;
pub mod config;
pub mod crawl;
pub mod error;
pub mod export;
pub mod fetch;
pub mod ingest;
pub mod progress;
pub mod rating;
pub mod store;
