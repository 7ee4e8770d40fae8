//! Conservative per-weight leaderboards from persisted ratings.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;

use chrono::{NaiveDate, Utc};

use indexmap::IndexMap;

use sqlx::SqliteConnection;

use takedown_model::export::{Leaderboard, LeaderboardEntry};

use crate::{
    cli::LeaderboardArgs,
    rating::{numeric_weight_order, round_to},
    store::{self, RatingRow},
};

/// Ranking score: a rating discounted by twice its deviation, so unproven
/// wrestlers do not top the board.
fn conservative_score(rating: f64, rd: f64) -> f64 {
    rating - 2.0 * rd
}

/// Groups rating rows by weight class, applies the last-updated filter,
/// ranks by conservative score and truncates to the limit (0 keeps all).
pub fn build_leaderboards(
    rows: &[RatingRow],
    limit: usize,
    min_last_updated: Option<NaiveDate>,
) -> IndexMap<String, Vec<LeaderboardEntry>> {
    let mut grouped: HashMap<String, Vec<LeaderboardEntry>> = HashMap::new();

    for row in rows {
        let Some(weight_class) = row.weight_class.clone() else {
            continue;
        };
        if let Some(min) = min_last_updated {
            // rows without a parseable stamp cannot prove freshness
            let Some(last_updated) = row.last_updated.as_deref() else {
                continue;
            };
            let Ok(date) = NaiveDate::parse_from_str(last_updated, "%Y-%m-%d") else {
                continue;
            };
            if date < min {
                continue;
            }
        }

        let rating = row.rating.unwrap_or(0.0);
        let rd = row.rd.unwrap_or(0.0);
        grouped.entry(weight_class).or_default().push(LeaderboardEntry {
            wrestler_id: row.wrestler_id.clone(),
            name: row.name.clone().unwrap_or_default(),
            rating: round_to(rating, 3),
            rd: round_to(rd, 3),
            volatility: round_to(row.volatility.unwrap_or(0.0), 6),
            conservative_rating: round_to(conservative_score(rating, rd), 3),
            last_updated: row.last_updated.clone(),
        });
    }

    let mut weights: Vec<String> = grouped.keys().cloned().collect();
    weights.sort_by(|a, b| numeric_weight_order(a, b));

    let mut ordered = IndexMap::new();
    for weight in weights {
        let Some(mut entries) = grouped.remove(&weight) else {
            continue;
        };
        entries.sort_by(|a, b| {
            b.conservative_rating
                .partial_cmp(&a.conservative_rating)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.wrestler_id.cmp(&b.wrestler_id))
        });
        if limit > 0 {
            entries.truncate(limit);
        }
        ordered.insert(weight, entries);
    }
    ordered
}

/// Runs the `leaderboard` subcommand.
pub async fn run(
    args: LeaderboardArgs,
    conn: &mut SqliteConnection,
) -> Result<(), anyhow::Error> {
    let rows = store::fetch_rating_rows(conn).await?;
    if rows.is_empty() {
        anyhow::bail!("no ratings found; run the rate command with --persist-tau first");
    }

    let leaderboards = build_leaderboards(&rows, args.limit, args.min_last_updated);
    let total_entries: usize = leaderboards.values().map(Vec::len).sum();
    let payload = Leaderboard {
        generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        method: "rating - 2 * RD".into(),
        limit_per_weight: args.limit,
        min_last_updated: args.min_last_updated.map(|date| date.to_string()),
        weight_classes: leaderboards,
    };

    if let Some(parent) = args.output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(&args.output, serde_json::to_string_pretty(&payload)?)?;

    tracing::info!(
        weight_classes = payload.weight_classes.len(),
        entries = total_entries,
        path = %args.output.display(),
        "wrote leaderboards"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(
        wrestler_id: &str,
        weight: &str,
        rating: f64,
        rd: f64,
        last_updated: Option<&str>,
    ) -> RatingRow {
        RatingRow {
            wrestler_id: wrestler_id.into(),
            weight_class: Some(weight.into()),
            rating: Some(rating),
            rd: Some(rd),
            volatility: Some(0.06),
            last_updated: last_updated.map(String::from),
            name: Some(format!("Wrestler {wrestler_id}")),
        }
    }

    #[test]
    fn ranks_by_conservative_score_not_raw_rating() {
        let rows = [
            // higher rating but huge deviation
            row("risky", "138", 1700.0, 300.0, Some("2024-03-01")),
            row("solid", "138", 1600.0, 60.0, Some("2024-03-01")),
        ];
        let boards = build_leaderboards(&rows, 0, None);
        let entries = &boards["138"];

        assert_eq!(entries[0].wrestler_id, "solid");
        assert_eq!(entries[0].conservative_rating, 1480.0);
        assert_eq!(entries[1].conservative_rating, 1100.0);
    }

    #[test]
    fn limit_truncates_each_weight_class() {
        let rows: Vec<RatingRow> = (0..5)
            .map(|i| {
                row(
                    &format!("w{i}"),
                    "138",
                    1500.0 + i as f64,
                    50.0,
                    Some("2024-03-01"),
                )
            })
            .collect();
        let boards = build_leaderboards(&rows, 2, None);
        assert_eq!(boards["138"].len(), 2);

        let boards = build_leaderboards(&rows, 0, None);
        assert_eq!(boards["138"].len(), 5);
    }

    #[test]
    fn stale_and_unstamped_rows_fall_to_the_filter() {
        let min = NaiveDate::parse_from_str("2024-03-01", "%Y-%m-%d").unwrap();
        let rows = [
            row("fresh", "138", 1500.0, 50.0, Some("2024-03-15")),
            row("stale", "138", 1500.0, 50.0, Some("2023-11-01")),
            row("unstamped", "138", 1500.0, 50.0, None),
            row("garbled", "138", 1500.0, 50.0, Some("March 2024")),
        ];
        let boards = build_leaderboards(&rows, 0, Some(min));
        let entries = &boards["138"];

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].wrestler_id, "fresh");
    }

    #[test]
    fn weights_order_numerically_with_text_last() {
        let rows = [
            row("a", "Open", 1500.0, 50.0, None),
            row("b", "125.5", 1500.0, 50.0, None),
            row("c", "113", 1500.0, 50.0, None),
        ];
        let boards = build_leaderboards(&rows, 0, None);
        let order: Vec<&String> = boards.keys().collect();
        assert_eq!(order, ["113", "125.5", "Open"]);
    }
}
