//! Progress reporting for long-running operations.
//!
//! The crawler and the replay engine accept a caller-supplied sink so the
//! CLI can log progress without the core depending on a display.

/// A snapshot of crawl progress.
#[derive(Clone, Copy, Debug)]
pub struct CrawlUpdate {
    /// Depth of the entry at the head of the frontier.
    pub depth: i64,
    /// Entries waiting in the frontier.
    pub queue: usize,
    /// Wrestlers fetched during this run.
    pub processed: usize,
    /// Outbound requests in the last 60 seconds.
    pub last_minute: usize,
    /// Outbound requests in the last 900 seconds.
    pub last_quarter_hour: usize,
}

/// Receives progress updates from long-running operations.
pub trait ProgressSink {
    fn crawl(&mut self, update: &CrawlUpdate) {
        let _ = update;
    }

    fn replay(&mut self, period: usize, total: usize) {
        let _ = (period, total);
    }
}

/// Sink that reports through the tracing subscriber.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn crawl(&mut self, update: &CrawlUpdate) {
        tracing::info!(
            depth = update.depth,
            queue = update.queue,
            processed = update.processed,
            rate_60s = update.last_minute,
            rate_900s = update.last_quarter_hour,
            "crawling wrestlers"
        );
    }

    fn replay(&mut self, period: usize, total: usize) {
        tracing::debug!(period, total, "replaying period");
    }
}
