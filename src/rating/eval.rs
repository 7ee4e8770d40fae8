//! Held-out scoring of volatility constraints.
//!
//! Matches up to `train-end` feed the replay engine; matches inside the
//! evaluation window are scored against the trained states with log loss,
//! Brier score and accuracy.

use std::collections::HashMap;
use std::fs;

use chrono::{Duration, NaiveDateTime, Utc};

use sqlx::SqliteConnection;

use takedown_model::export::{EvalResult, EvalSummary};

use crate::{
    cli::EvalArgs,
    config::{Config, RatingDefaults},
    progress::LogSink,
};

use super::{
    RawMatch, WeightStates, build_period_index, glicko2, group_matches_by_period,
    load_matches, replay, tau_set,
};

/// Probabilities are clamped to `[EPSILON, 1 - EPSILON]` so a confident
/// miss cannot blow up the log loss.
pub const PROBABILITY_EPSILON: f64 = 1e-12;

fn clamp_probability(value: f64) -> f64 {
    value.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON)
}

/// Splits matches at `train_end` (inclusive); the evaluation side keeps
/// matches inside `[eval_start, eval_end]`.
pub fn partition_matches(
    matches: &[RawMatch],
    train_end: NaiveDateTime,
    eval_start: NaiveDateTime,
    eval_end: Option<NaiveDateTime>,
) -> (Vec<RawMatch>, Vec<RawMatch>) {
    let mut train = Vec::new();
    let mut eval_matches = Vec::new();
    for raw in matches {
        if raw.occurred_at <= train_end {
            train.push(raw.clone());
        } else if raw.occurred_at >= eval_start
            && eval_end.is_none_or(|end| raw.occurred_at <= end)
        {
            eval_matches.push(raw.clone());
        }
    }
    (train, eval_matches)
}

/// Replays the training partition into per-weight states.
pub fn build_states(
    tau: f64,
    train: &[RawMatch],
    defaults: &RatingDefaults,
) -> WeightStates {
    if train.is_empty() {
        return HashMap::new();
    }
    let (periods, lookup) = build_period_index(train);
    if periods.is_empty() {
        return HashMap::new();
    }
    let grouped = group_matches_by_period(train, &lookup);
    replay(tau, &grouped, &periods, defaults, &mut LogSink)
}

fn state_for(states: &WeightStates, weight_class: &str, wrestler_id: &str) -> (f64, f64) {
    states
        .get(weight_class)
        .and_then(|weight| weight.get(wrestler_id))
        .map(|state| (state.rating, state.rd))
        .unwrap_or((glicko2::DEFAULT_RATING, glicko2::DEFAULT_RD))
}

/// Expected probability that the actual winner wins, from the winner's
/// rating against the loser's rating and deviation.
pub fn probability_of_victory(winner: (f64, f64), loser: (f64, f64)) -> f64 {
    let mu = (winner.0 - glicko2::DEFAULT_RATING) / glicko2::SCALE;
    let mu_opponent = (loser.0 - glicko2::DEFAULT_RATING) / glicko2::SCALE;
    let phi_opponent = loser.1 / glicko2::SCALE;
    glicko2::expectation(mu, mu_opponent, phi_opponent)
}

/// Scores the evaluation partition against trained states.
pub fn evaluate_matches(states: &WeightStates, eval_matches: &[RawMatch]) -> EvalResult {
    let mut total = 0usize;
    let mut log_loss = 0.0;
    let mut brier = 0.0;
    let mut correct = 0.0;

    for raw in eval_matches {
        let winner = state_for(states, &raw.weight_class, &raw.winner_id);
        let loser = state_for(states, &raw.weight_class, &raw.loser_id);
        let prob = clamp_probability(probability_of_victory(winner, loser));
        log_loss += -prob.ln();
        brier += (1.0 - prob) * (1.0 - prob);
        if prob >= 0.5 {
            correct += 1.0;
        }
        total += 1;
    }

    if total == 0 {
        return EvalResult {
            tau: f64::NAN,
            matches: 0,
            log_loss: f64::INFINITY,
            brier: f64::INFINITY,
            accuracy: 0.0,
        };
    }

    EvalResult {
        tau: 0.0,
        matches: total,
        log_loss: log_loss / total as f64,
        brier: brier / total as f64,
        accuracy: correct / total as f64,
    }
}

/// Runs the `eval` subcommand.
pub async fn run(
    args: EvalArgs,
    config: &Config,
    conn: &mut SqliteConnection,
) -> Result<(), anyhow::Error> {
    if let (Some(start), Some(end)) = (args.start_date, args.end_date) {
        if start > end {
            anyhow::bail!("start-date must be less than or equal to end-date");
        }
    }
    if let Some(eval_start) = args.eval_start {
        if eval_start <= args.train_end {
            anyhow::bail!("eval-start must be after train-end");
        }
    }
    if let Some(eval_end) = args.eval_end {
        if eval_end <= args.train_end {
            anyhow::bail!("eval-end must be after train-end");
        }
    }

    let taus = tau_set(&args.taus, config.rating.tau);
    let train_end = args.train_end;
    let eval_start = args
        .eval_start
        .unwrap_or_else(|| train_end + Duration::seconds(1));

    let (matches, skipped) = load_matches(conn, args.start_date, args.end_date).await?;
    if skipped > 0 {
        tracing::warn!(count = skipped, "skipped matches with missing or invalid data");
    }
    if matches.is_empty() {
        anyhow::bail!("no matches found for the provided filters; run the crawl first");
    }

    let (train, eval_matches) =
        partition_matches(&matches, train_end, eval_start, args.eval_end);
    if train.is_empty() {
        anyhow::bail!("no training matches fall on or before train-end");
    }
    if eval_matches.is_empty() {
        anyhow::bail!("no evaluation matches fall inside the requested range");
    }

    let mut results = Vec::new();
    for tau in &taus {
        let states = build_states(*tau, &train, &config.rating.defaults);
        let mut result = evaluate_matches(&states, &eval_matches);
        result.tau = *tau;
        results.push(result);
        tracing::info!(
            tau = *tau,
            matches = result.matches,
            log_loss = result.log_loss,
            brier = result.brier,
            accuracy = result.accuracy,
            "evaluated tau"
        );
    }

    if let Some(output) = args.output {
        let summary = EvalSummary {
            generated_at: Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            train_end,
            eval_start,
            eval_end: args.eval_end,
            taus,
            results,
        };
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&output, serde_json::to_string_pretty(&summary)?)?;
        tracing::info!(path = %output.display(), "saved evaluation summary");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::rating::month_floor;
    use crate::store;

    fn raw(winner: &str, loser: &str, weight: &str, occurred_at: &str) -> RawMatch {
        let occurred_at = store::parse_timestamp(occurred_at).unwrap();
        RawMatch {
            period: month_floor(occurred_at),
            weight_class: weight.into(),
            winner_id: winner.into(),
            loser_id: loser.into(),
            occurred_at,
        }
    }

    #[test]
    fn probabilities_clamp_inside_the_open_interval() {
        assert_eq!(clamp_probability(0.0), PROBABILITY_EPSILON);
        assert_eq!(clamp_probability(1.0), 1.0 - PROBABILITY_EPSILON);
        assert!(-clamp_probability(0.0).ln() <= -PROBABILITY_EPSILON.ln());
    }

    #[test]
    fn unknown_wrestlers_score_at_even_odds() {
        let states = HashMap::new();
        let result = evaluate_matches(&states, &[raw("x", "y", "138", "2024-02-01T10:00:00")]);

        assert_eq!(result.matches, 1);
        assert!((result.accuracy - 1.0).abs() < 1e-12);
        assert!((result.log_loss - (-0.5f64.ln())).abs() < 1e-12);
        assert!((result.brier - 0.25).abs() < 1e-12);
    }

    #[test]
    fn half_split_scores_the_held_out_half() {
        let matches = [
            raw("a", "b", "138", "2024-01-05T10:00:00"),
            raw("a", "b", "138", "2024-01-12T10:00:00"),
            raw("a", "b", "138", "2024-01-19T10:00:00"),
            // held out: one expected result, one upset
            raw("a", "b", "138", "2024-02-03T10:00:00"),
            raw("b", "a", "138", "2024-02-10T10:00:00"),
        ];

        let train_end = store::parse_timestamp("2024-01-31T23:59:59").unwrap();
        let eval_start = train_end + Duration::seconds(1);
        let (train, eval_matches) = partition_matches(&matches, train_end, eval_start, None);
        assert_eq!(train.len(), 3);
        assert_eq!(eval_matches.len(), 2);

        let states = build_states(0.5, &train, &RatingDefaults::default());
        let result = evaluate_matches(&states, &eval_matches);

        assert_eq!(result.matches, eval_matches.len());
        assert!(result.accuracy > 0.0 && result.accuracy < 1.0);
        assert!(result.log_loss > 0.0);
        assert!(result.log_loss <= -PROBABILITY_EPSILON.ln());
    }

    #[test]
    fn eval_window_upper_bound_is_inclusive() {
        let matches = [
            raw("a", "b", "138", "2024-01-05T10:00:00"),
            raw("a", "b", "138", "2024-02-03T10:00:00"),
            raw("a", "b", "138", "2024-03-03T10:00:00"),
        ];

        let train_end = store::parse_timestamp("2024-01-31T23:59:59").unwrap();
        let eval_start = train_end + Duration::seconds(1);
        let eval_end = store::parse_timestamp("2024-02-03T10:00:00").unwrap();
        let (_, eval_matches) =
            partition_matches(&matches, train_end, eval_start, Some(eval_end));

        assert_eq!(eval_matches.len(), 1);
        assert_eq!(eval_matches[0].occurred_at, eval_end);
    }
}
