//! Resumable breadth-first crawl over the wrestler opponent graph.
//!
//! All crawl state lives in the store: the singleton configuration row,
//! the frontier and the seen set. A crawl interrupted by an upstream
//! error resumes from the persisted frontier on the next invocation with
//! the same seed; raising the depth re-queues known-but-unexpanded
//! wrestlers without refetching anything already processed.

use std::collections::{HashMap, HashSet, VecDeque};

use sqlx::SqliteConnection;

use crate::{
    cli::CrawlArgs,
    config::Config,
    error::AppError,
    fetch::BoutClient,
    ingest::{self, IngestFilters},
    progress::{CrawlUpdate, LogSink, ProgressSink},
    store,
};

/// Crawl configuration for one invocation.
#[derive(Clone, Debug)]
pub struct CrawlOptions {
    pub seed: String,
    pub depth: i64,
    pub reset: bool,
}

/// What a crawl saw: the minimum depth per discovered wrestler and the
/// set of wrestlers whose match pages were fetched.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    pub seen: HashMap<String, i64>,
    pub processed: HashSet<String>,
}

/// Produces the opponent set of one wrestler.
///
/// The production source pages through the upstream API and ingests every
/// page; tests substitute a fixture graph.
#[allow(async_fn_in_trait)]
pub trait MatchSource {
    async fn expand(
        &mut self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<HashSet<String>, AppError>;

    /// Current `(last 60s, last 900s)` request counts, for progress output.
    fn rates(&self) -> (usize, usize) {
        (0, 0)
    }
}

/// The production source: paginated fetch plus ingest.
pub struct ArenaSource {
    client: BoutClient,
    filters: IngestFilters,
}

impl ArenaSource {
    pub fn new(client: BoutClient, filters: IngestFilters) -> Self {
        ArenaSource { client, filters }
    }
}

impl MatchSource for ArenaSource {
    async fn expand(
        &mut self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<HashSet<String>, AppError> {
        let ArenaSource { client, filters } = self;

        let mut opponents = HashSet::new();
        let mut skipped = 0;

        let mut pages = client.bouts(id);
        while let Some(page) = pages.next_page().await? {
            let outcome = ingest::ingest_page(conn, &page, id, filters).await?;
            opponents.extend(outcome.opponents);
            skipped += outcome.skipped;
        }

        if skipped > 0 {
            tracing::warn!(
                wrestler = id,
                count = skipped,
                "skipped matches with missing or inconsistent data"
            );
        }

        store::mark_fetch(conn, id).await?;
        Ok(opponents)
    }

    fn rates(&self) -> (usize, usize) {
        self.client.rates()
    }
}

/// Runs the `crawl` subcommand.
pub async fn run(
    args: CrawlArgs,
    config: &Config,
    conn: &mut SqliteConnection,
) -> Result<(), anyhow::Error> {
    if let (Some(start), Some(end)) = (args.start_date, args.end_date) {
        if start > end {
            anyhow::bail!("start-date must be less than or equal to end-date");
        }
    }

    let filters = IngestFilters::new(&args.weight_classes, args.start_date, args.end_date);
    let mut source = ArenaSource::new(BoutClient::new(&config.api), filters);
    let options = CrawlOptions {
        seed: args.seed,
        depth: args.depth,
        reset: args.reset,
    };

    let outcome = crawl(conn, &mut source, &options, &mut LogSink).await?;
    tracing::info!(
        seen = outcome.seen.len(),
        processed = outcome.processed.len(),
        "crawl complete"
    );
    Ok(())
}

/// Breadth-first crawl from the seed, resuming from persisted state.
pub async fn crawl<S: MatchSource>(
    conn: &mut SqliteConnection,
    source: &mut S,
    options: &CrawlOptions,
    progress: &mut dyn ProgressSink,
) -> Result<CrawlOutcome, AppError> {
    if options.reset {
        store::clear_crawler_state(conn).await?;
    }

    let previous = store::load_crawler_state(conn).await?;
    let previous_depth = previous.as_ref().map(|state| state.depth_limit).unwrap_or(0);
    let seed_changed = previous
        .as_ref()
        .is_some_and(|state| state.seed_id != options.seed);
    let depth_upgraded = options.depth > previous_depth;

    store::save_crawler_state(conn, &options.seed, options.depth).await?;

    // seen depths are relative to the seed, so a new seed starts from
    // nothing
    if seed_changed {
        store::clear_frontier(conn).await?;
        store::clear_seen(conn).await?;
    }

    let mut deque: VecDeque<(String, i64)> = store::queue_items(conn)
        .await?
        .into_iter()
        .map(|entry| (entry.wrestler_id, entry.depth))
        .collect();

    let mut seen: HashMap<String, i64> = HashMap::new();
    let mut processed: HashSet<String> = HashSet::new();
    for entry in store::seen_entries(conn).await? {
        if entry.processed_at.is_some() {
            processed.insert(entry.wrestler_id.clone());
        }
        seen.insert(entry.wrestler_id, entry.depth);
    }

    // Seed-first: the seed sits at the head of the deque at depth zero.
    // Its processed stamp survives so a completed run never refetches it.
    deque.retain(|(id, _)| id != &options.seed);
    store::remove_frontier(conn, &options.seed).await?;
    seen.insert(options.seed.clone(), 0);
    store::record_seen(conn, &options.seed, 0).await?;
    deque.push_front((options.seed.clone(), 0));
    store::upsert_frontier(conn, &options.seed, 0).await?;

    if depth_upgraded {
        let queued: HashSet<String> = deque.iter().map(|(id, _)| id.clone()).collect();
        let candidates: Vec<store::SeenEntry> = store::unprocessed(conn, options.depth)
            .await?
            .into_iter()
            .filter(|entry| {
                entry.depth >= previous_depth
                    && entry.wrestler_id != options.seed
                    && !processed.contains(&entry.wrestler_id)
                    && !queued.contains(&entry.wrestler_id)
            })
            .collect();
        // push in reverse so enumeration order is preserved when popped
        for entry in candidates.iter().rev() {
            deque.push_front((entry.wrestler_id.clone(), entry.depth));
        }
        for entry in &candidates {
            store::upsert_frontier(conn, &entry.wrestler_id, entry.depth).await?;
        }
    }

    let mut fetched_this_run = 0usize;

    while let Some((wrestler_id, depth)) = deque.front().cloned() {
        let (last_minute, last_quarter_hour) = source.rates();
        progress.crawl(&CrawlUpdate {
            depth,
            queue: deque.len(),
            processed: fetched_this_run,
            last_minute,
            last_quarter_hour,
        });

        if depth >= options.depth || processed.contains(&wrestler_id) {
            deque.pop_front();
            store::remove_frontier(conn, &wrestler_id).await?;
            continue;
        }

        let opponents = source.expand(conn, &wrestler_id).await?;
        processed.insert(wrestler_id.clone());
        store::mark_processed(conn, &wrestler_id).await?;
        fetched_this_run += 1;

        for opponent in opponents {
            if seen.contains_key(&opponent) {
                continue;
            }
            let next_depth = depth + 1;
            seen.insert(opponent.clone(), next_depth);
            store::record_seen(conn, &opponent, next_depth).await?;
            if next_depth <= options.depth {
                deque.push_back((opponent.clone(), next_depth));
                store::upsert_frontier(conn, &opponent, next_depth).await?;
            }
        }

        deque.pop_front();
        store::remove_frontier(conn, &wrestler_id).await?;
    }

    Ok(CrawlOutcome { seen, processed })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::connect;

    struct StubSource {
        graph: HashMap<String, Vec<String>>,
        fetches: Vec<String>,
    }

    impl StubSource {
        fn new(edges: &[(&str, &[&str])]) -> Self {
            let graph = edges
                .iter()
                .map(|(id, opponents)| {
                    (
                        id.to_string(),
                        opponents.iter().map(|o| o.to_string()).collect(),
                    )
                })
                .collect();
            StubSource {
                graph,
                fetches: Vec::new(),
            }
        }
    }

    impl MatchSource for StubSource {
        async fn expand(
            &mut self,
            _conn: &mut SqliteConnection,
            id: &str,
        ) -> Result<HashSet<String>, AppError> {
            self.fetches.push(id.to_string());
            Ok(self
                .graph
                .get(id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect())
        }
    }

    struct Quiet;

    impl ProgressSink for Quiet {}

    fn fixture() -> StubSource {
        StubSource::new(&[("S", &["A", "B"]), ("A", &["C"]), ("B", &[])])
    }

    fn options(seed: &str, depth: i64, reset: bool) -> CrawlOptions {
        CrawlOptions {
            seed: seed.into(),
            depth,
            reset,
        }
    }

    #[tokio::test]
    async fn depth_two_crawl_discovers_the_fixture_graph() {
        let mut conn = connect("sqlite::memory:").await.unwrap();
        let mut source = fixture();

        let outcome = crawl(&mut conn, &mut source, &options("S", 2, false), &mut Quiet)
            .await
            .unwrap();

        // the seed is fetched first
        assert_eq!(source.fetches.first().map(String::as_str), Some("S"));
        assert_eq!(source.fetches.len(), 3);

        let expected: HashMap<String, i64> = [("S", 0), ("A", 1), ("B", 1), ("C", 2)]
            .into_iter()
            .map(|(id, depth)| (id.to_string(), depth))
            .collect();
        assert_eq!(outcome.seen, expected);

        let processed: HashSet<String> =
            ["S", "A", "B"].into_iter().map(String::from).collect();
        assert_eq!(outcome.processed, processed);

        assert!(store::queue_items(&mut conn).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completed_rerun_performs_zero_fetches() {
        let mut conn = connect("sqlite::memory:").await.unwrap();

        let mut source = fixture();
        crawl(&mut conn, &mut source, &options("S", 2, false), &mut Quiet)
            .await
            .unwrap();
        let first_run = source.fetches.len();

        let mut source = fixture();
        let outcome = crawl(&mut conn, &mut source, &options("S", 2, false), &mut Quiet)
            .await
            .unwrap();

        assert_eq!(source.fetches.len(), 0);
        assert_eq!(first_run, 3);
        // seen rows are unchanged by the rerun
        assert_eq!(outcome.seen.len(), 4);
    }

    #[tokio::test]
    async fn reset_repeats_the_full_crawl() {
        let mut conn = connect("sqlite::memory:").await.unwrap();

        let mut source = fixture();
        crawl(&mut conn, &mut source, &options("S", 2, false), &mut Quiet)
            .await
            .unwrap();

        let mut source = fixture();
        crawl(&mut conn, &mut source, &options("S", 2, true), &mut Quiet)
            .await
            .unwrap();

        assert_eq!(source.fetches.len(), 3);
    }

    #[tokio::test]
    async fn raising_the_depth_expands_only_the_frontier_tail() {
        let mut conn = connect("sqlite::memory:").await.unwrap();

        let mut source = fixture();
        crawl(&mut conn, &mut source, &options("S", 2, false), &mut Quiet)
            .await
            .unwrap();

        let mut source = fixture();
        let outcome = crawl(&mut conn, &mut source, &options("S", 3, false), &mut Quiet)
            .await
            .unwrap();

        // only C is new work; S, A and B stay untouched
        assert_eq!(source.fetches, vec!["C".to_string()]);
        assert!(outcome.processed.contains("C"));
    }

    #[tokio::test]
    async fn changing_the_seed_discards_previous_state() {
        let mut conn = connect("sqlite::memory:").await.unwrap();

        let mut source = fixture();
        crawl(&mut conn, &mut source, &options("S", 2, false), &mut Quiet)
            .await
            .unwrap();

        let mut source = fixture();
        let outcome = crawl(&mut conn, &mut source, &options("A", 2, false), &mut Quiet)
            .await
            .unwrap();

        // depths are relative to the new seed; B is unreachable from A
        assert_eq!(outcome.seen.get("A"), Some(&0));
        assert_eq!(outcome.seen.get("C"), Some(&1));
        assert!(!outcome.seen.contains_key("B"));
        assert!(source.fetches.contains(&"A".to_string()));
    }

    #[tokio::test]
    async fn depth_at_limit_is_seen_but_not_fetched() {
        let mut conn = connect("sqlite::memory:").await.unwrap();
        let mut source = fixture();

        let outcome = crawl(&mut conn, &mut source, &options("S", 1, false), &mut Quiet)
            .await
            .unwrap();

        assert_eq!(source.fetches, vec!["S".to_string()]);
        assert_eq!(outcome.seen.get("A"), Some(&1));
        assert_eq!(outcome.seen.get("B"), Some(&1));
        assert!(!outcome.seen.contains_key("C"));
    }
}
