//! Shared types for the takedown pipeline.
//!
//! This crate holds the wire types for the upstream FloArena JSON:API and
//! the payload schemas of every JSON artifact the pipeline writes, so the
//! binary and any downstream consumer agree on their shape.

pub mod api;
pub mod export;

pub use api::Document;
pub use export::{Leaderboard, RatingSnapshot};
