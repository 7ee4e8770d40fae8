//! Month-bucketed Glicko-2 replay per weight class.
//!
//! Matches are bucketed into calendar months and replayed in order over a
//! dense timeline from the earliest to the latest observed month. Within
//! one period every participant is updated from the same pre-period
//! snapshot, so processing order has no effect on the result.

pub mod eval;
pub mod glicko2;

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};

use indexmap::IndexMap;

use regex::Regex;

use sqlx::SqliteConnection;

use takedown_model::export::{RatingEntry, RatingSnapshot};

use crate::{
    cli::RateArgs,
    config::{Config, RatingDefaults},
    error::AppError,
    progress::{LogSink, ProgressSink},
    store::{self, NewRating},
};

use glicko2::{Pairing, Snapshot};

static WEIGHT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?|\.\d+").expect("static pattern compiles"));

/// A validated match ready for replay.
#[derive(Clone, Debug)]
pub struct RawMatch {
    /// First day of the calendar month the match falls into.
    pub period: NaiveDate,
    pub weight_class: String,
    pub winner_id: String,
    pub loser_id: String,
    pub occurred_at: NaiveDateTime,
}

/// Mutable per-wrestler replay state within one weight class.
#[derive(Clone, Debug)]
pub struct WrestlerState {
    pub rating: f64,
    pub rd: f64,
    pub volatility: f64,
    /// Last period the inactivity update was applied through.
    pub last_period_index: usize,
    /// Last period the wrestler actually competed in.
    pub last_competed_period: Option<usize>,
    pub matches_played: u32,
}

/// Replay state keyed by weight class, then wrestler identity.
pub type WeightStates = HashMap<String, HashMap<String, WrestlerState>>;

/// Extracts the canonical decimal label from a free-form weight string.
///
/// The first numeric token wins; fractional forms keep their fraction with
/// leading zeros stripped and a bare leading dot re-prefixed. Tokens that
/// normalize to fewer than two digits are noise (mat numbers, bout
/// ordinals) and are skipped.
pub fn normalize_weight_label(raw: &str) -> Option<String> {
    for token in WEIGHT_TOKEN.find_iter(raw) {
        let token = token.as_str();
        let cleaned = if token.contains('.') {
            let mut cleaned = token.trim_start_matches('0').to_string();
            if cleaned.starts_with('.') {
                cleaned.insert(0, '0');
            }
            if cleaned.is_empty() {
                "0".to_string()
            } else {
                cleaned
            }
        } else {
            let trimmed = token.trim_start_matches('0');
            if trimmed.is_empty() {
                "0".to_string()
            } else {
                trimmed.to_string()
            }
        };
        if cleaned.chars().filter(|c| c.is_ascii_digit()).count() < 2 {
            continue;
        }
        return Some(cleaned);
    }
    None
}

/// First day of the month containing `value`.
pub fn month_floor(value: NaiveDateTime) -> NaiveDate {
    value.date().with_day(1).expect("day one is valid")
}

/// First day of the following month.
pub fn add_month(value: NaiveDate) -> NaiveDate {
    let (year, month) = if value.month() == 12 {
        (value.year() + 1, 1)
    } else {
        (value.year(), value.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1).expect("first of month is valid")
}

/// Loads replayable matches, dropping structurally broken rows.
///
/// Returns the surviving matches ordered by timestamp and the number of
/// rows dropped.
pub async fn load_matches(
    conn: &mut SqliteConnection,
    start: Option<NaiveDateTime>,
    end: Option<NaiveDateTime>,
) -> Result<(Vec<RawMatch>, usize), AppError> {
    let rows = store::fetch_matches(conn, start, end).await?;

    let mut matches = Vec::new();
    let mut skipped = 0;
    for row in rows {
        let (Some(winner_id), Some(top_id), Some(bottom_id)) =
            (row.winner_id, row.top_id, row.bottom_id)
        else {
            skipped += 1;
            continue;
        };

        let loser_id = if winner_id == top_id {
            bottom_id
        } else if winner_id == bottom_id {
            top_id
        } else {
            // winner matches neither participant; keep the data clean
            skipped += 1;
            continue;
        };
        if loser_id == winner_id {
            skipped += 1;
            continue;
        }

        let Some(weight_class) = row
            .weight_class
            .as_deref()
            .and_then(normalize_weight_label)
        else {
            skipped += 1;
            continue;
        };

        let Some(occurred_at) = row.date.as_deref().and_then(store::parse_timestamp) else {
            skipped += 1;
            continue;
        };

        matches.push(RawMatch {
            period: month_floor(occurred_at),
            weight_class,
            winner_id,
            loser_id,
            occurred_at,
        });
    }

    Ok((matches, skipped))
}

/// The dense monthly timeline spanning the observed matches, with a
/// month-to-index lookup.
pub fn build_period_index(
    matches: &[RawMatch],
) -> (Vec<NaiveDate>, HashMap<NaiveDate, usize>) {
    let Some(first) = matches.iter().map(|m| m.period).min() else {
        return (Vec::new(), HashMap::new());
    };
    let last = matches.iter().map(|m| m.period).max().unwrap_or(first);

    let mut periods = Vec::new();
    let mut current = first;
    while current <= last {
        periods.push(current);
        current = add_month(current);
    }
    let lookup = periods
        .iter()
        .enumerate()
        .map(|(idx, period)| (*period, idx))
        .collect();
    (periods, lookup)
}

pub fn group_matches_by_period(
    matches: &[RawMatch],
    lookup: &HashMap<NaiveDate, usize>,
) -> BTreeMap<usize, BTreeMap<String, Vec<RawMatch>>> {
    let mut grouped: BTreeMap<usize, BTreeMap<String, Vec<RawMatch>>> = BTreeMap::new();
    for raw in matches {
        let Some(&period_idx) = lookup.get(&raw.period) else {
            continue;
        };
        grouped
            .entry(period_idx)
            .or_default()
            .entry(raw.weight_class.clone())
            .or_default()
            .push(raw.clone());
    }
    grouped
}

fn ensure_state<'a>(
    states: &'a mut HashMap<String, WrestlerState>,
    wrestler_id: &str,
    period_idx: usize,
    defaults: &RatingDefaults,
) -> &'a mut WrestlerState {
    states
        .entry(wrestler_id.to_string())
        .or_insert_with(|| WrestlerState {
            rating: defaults.rating,
            rd: defaults.deviation,
            volatility: defaults.volatility,
            last_period_index: period_idx,
            last_competed_period: None,
            matches_played: 0,
        })
}

/// Inflates the deviation for idle months, clamped to the RD cap.
pub fn apply_inactivity(state: &mut WrestlerState, target_period: usize) {
    if target_period <= state.last_period_index {
        return;
    }
    let delta = (target_period - state.last_period_index) as f64;
    let phi = state.rd / glicko2::SCALE;
    let phi = (phi * phi + delta * state.volatility * state.volatility).sqrt();
    state.rd = (phi * glicko2::SCALE).min(glicko2::MAX_RD);
    state.last_period_index = target_period;
}

/// Replays every period in order, returning the final per-weight states.
pub fn replay(
    tau: f64,
    grouped: &BTreeMap<usize, BTreeMap<String, Vec<RawMatch>>>,
    periods: &[NaiveDate],
    defaults: &RatingDefaults,
    progress: &mut dyn ProgressSink,
) -> WeightStates {
    let mut states: WeightStates = HashMap::new();
    let total = periods.len();

    for period_idx in 0..total {
        let Some(weight_groups) = grouped.get(&period_idx) else {
            continue;
        };
        progress.replay(period_idx, total);

        for (weight_class, matches) in weight_groups {
            let weight_states = states.entry(weight_class.clone()).or_default();

            let mut per_player: HashMap<String, Vec<(String, f64)>> = HashMap::new();
            for raw in matches {
                ensure_state(weight_states, &raw.winner_id, period_idx, defaults);
                ensure_state(weight_states, &raw.loser_id, period_idx, defaults);
                per_player
                    .entry(raw.winner_id.clone())
                    .or_default()
                    .push((raw.loser_id.clone(), 1.0));
                per_player
                    .entry(raw.loser_id.clone())
                    .or_default()
                    .push((raw.winner_id.clone(), 0.0));
            }

            // inactivity applies only to wrestlers competing this period;
            // the snapshot taken right after is what opponents see
            let mut snapshots: HashMap<String, Snapshot> = HashMap::new();
            for wrestler_id in per_player.keys() {
                let state = ensure_state(weight_states, wrestler_id, period_idx, defaults);
                apply_inactivity(state, period_idx);
                snapshots.insert(
                    wrestler_id.clone(),
                    Snapshot::new(state.rating, state.rd, state.volatility),
                );
            }

            for (wrestler_id, pairings) in &per_player {
                let Some(snapshot) = snapshots.get(wrestler_id) else {
                    continue;
                };
                let glicko_pairings: Vec<Pairing> = pairings
                    .iter()
                    .filter_map(|(opponent_id, score)| {
                        snapshots.get(opponent_id).map(|opponent| Pairing {
                            opponent: *opponent,
                            score: *score,
                        })
                    })
                    .collect();
                let rated = glicko2::rate(snapshot, &glicko_pairings, tau);

                if let Some(state) = weight_states.get_mut(wrestler_id) {
                    state.rating = rated.rating;
                    state.rd = rated.rd;
                    state.volatility = rated.volatility;
                    state.last_period_index = period_idx;
                    state.last_competed_period = Some(period_idx);
                    state.matches_played += pairings.len() as u32;
                }
            }
        }
    }

    // trailing idle time still inflates uncertainty
    if total > 0 {
        let final_idx = total - 1;
        for weight_states in states.values_mut() {
            for state in weight_states.values_mut() {
                apply_inactivity(state, final_idx);
            }
        }
    }

    states
}

/// `YYYY-MM` label for a period index.
pub fn format_period_label(period_idx: Option<usize>, periods: &[NaiveDate]) -> Option<String> {
    let idx = period_idx?;
    periods.get(idx).map(|period| period.format("%Y-%m").to_string())
}

fn period_label_to_date(label: &str) -> Option<String> {
    let (year, month) = label.split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    Some(format!("{year:04}-{month:02}-01"))
}

pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Orders weight labels by parsed numeric value, non-numeric labels last.
pub(crate) fn numeric_weight_order(a: &str, b: &str) -> Ordering {
    let key = |label: &str| label.parse::<f64>().unwrap_or(f64::INFINITY);
    key(a)
        .partial_cmp(&key(b))
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.cmp(b))
}

/// Builds the snapshot payload: weight classes in numeric order
/// (non-numeric labels last), wrestlers by rating descending.
pub fn build_payload(
    tau: f64,
    states: &WeightStates,
    periods: &[NaiveDate],
    names: &HashMap<String, String>,
) -> RatingSnapshot {
    let mut weights: Vec<&String> = states.keys().collect();
    weights.sort_by(|a, b| numeric_weight_order(a, b));

    let mut weight_classes = IndexMap::new();
    for weight in weights {
        let Some(wrestlers) = states.get(weight) else {
            continue;
        };
        let mut entries: Vec<RatingEntry> = wrestlers
            .iter()
            .map(|(wrestler_id, state)| RatingEntry {
                wrestler_id: wrestler_id.clone(),
                name: names.get(wrestler_id).cloned().unwrap_or_default(),
                rating: round_to(state.rating, 3),
                rd: round_to(state.rd, 3),
                volatility: round_to(state.volatility, 6),
                matches: state.matches_played,
                last_active_period: format_period_label(state.last_competed_period, periods),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.rating
                .partial_cmp(&a.rating)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.wrestler_id.cmp(&b.wrestler_id))
        });
        weight_classes.insert(weight.clone(), entries);
    }

    RatingSnapshot {
        tau,
        generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        period_start: periods.first().map(ToString::to_string),
        period_end: periods.last().map(ToString::to_string),
        total_periods: periods.len(),
        weight_classes,
    }
}

/// Replaces the ratings table with the snapshot's final states.
pub async fn persist_payload(
    conn: &mut SqliteConnection,
    payload: &RatingSnapshot,
) -> Result<(), AppError> {
    let default_last_updated = payload
        .period_end
        .clone()
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());

    let mut rows = Vec::new();
    for (weight_class, entries) in &payload.weight_classes {
        for entry in entries {
            let last_updated = entry
                .last_active_period
                .as_deref()
                .and_then(period_label_to_date)
                .unwrap_or_else(|| default_last_updated.clone());
            rows.push(NewRating {
                wrestler_id: entry.wrestler_id.clone(),
                weight_class: weight_class.clone(),
                rating: entry.rating,
                rd: entry.rd,
                volatility: entry.volatility,
                last_updated,
            });
        }
    }

    store::replace_ratings(conn, &rows).await
}

/// Deduplicates and sorts requested tau values, rounded to 1e-6.
pub fn tau_set(requested: &[f64], default_tau: f64) -> Vec<f64> {
    let mut values: Vec<f64> = if requested.is_empty() {
        vec![default_tau]
    } else {
        requested.to_vec()
    };
    for value in &mut values {
        *value = round_to(*value, 6);
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    values.dedup();
    values
}

/// Runs the `rate` subcommand.
pub async fn run(
    args: RateArgs,
    config: &Config,
    conn: &mut SqliteConnection,
) -> Result<(), anyhow::Error> {
    if let (Some(start), Some(end)) = (args.start_date, args.end_date) {
        if start > end {
            anyhow::bail!("start-date must be less than or equal to end-date");
        }
    }

    let mut taus = tau_set(&args.taus, config.rating.tau);
    if let Some(persist_tau) = args.persist_tau {
        if !taus.iter().any(|tau| (tau - persist_tau).abs() <= 1e-9) {
            taus.push(round_to(persist_tau, 6));
            taus.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        }
    }

    fs::create_dir_all(&args.output_dir)?;

    let names = store::fetch_wrestler_names(conn).await?;
    let (matches, skipped) = load_matches(conn, args.start_date, args.end_date).await?;
    if skipped > 0 {
        tracing::warn!(count = skipped, "skipped matches with missing or invalid data");
    }
    if matches.is_empty() {
        anyhow::bail!("no matches available for the provided filters; run the crawl first");
    }

    let (periods, lookup) = build_period_index(&matches);
    let grouped = group_matches_by_period(&matches, &lookup);

    let mut to_persist: Option<RatingSnapshot> = None;
    for tau in &taus {
        let states = replay(*tau, &grouped, &periods, &config.rating.defaults, &mut LogSink);
        let payload = build_payload(*tau, &states, &periods, &names);

        let file_name = format!("glicko2_tau-{tau:.3}.json");
        let path = args.output_dir.join(file_name);
        fs::write(&path, serde_json::to_string_pretty(&payload)?)?;

        let rating_count: usize = payload.weight_classes.values().map(Vec::len).sum();
        tracing::info!(
            tau = *tau,
            weight_classes = payload.weight_classes.len(),
            ratings = rating_count,
            path = %path.display(),
            "wrote rating snapshot"
        );

        if args
            .persist_tau
            .is_some_and(|persist_tau| (tau - persist_tau).abs() <= 1e-9)
        {
            to_persist = Some(payload);
        }
    }

    if let Some(payload) = to_persist {
        persist_payload(conn, &payload).await?;
        tracing::info!(
            tau = payload.tau,
            weight_classes = payload.weight_classes.len(),
            "persisted ratings"
        );
    }

    Ok(())
}
