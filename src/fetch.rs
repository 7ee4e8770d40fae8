//! Paginated retrieval from the FloArena bouts API.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use takedown_model::api::{Document, Links};

use crate::{config::ApiConfig, error::AppError};

/// Sparse fieldsets requested from the upstream, keeping pages small.
const FIELDS: &[(&str, &str)] = &[
    ("wrestler", "firstName,lastName,teamId,identityPersonId"),
    ("team", "name,identityTeamId"),
    ("event", "name,startDateTime,endDateTime,location"),
    ("weightClass", "name"),
    (
        "bout",
        "topWrestlerId,bottomWrestlerId,weightClassId,eventId,goDateTime,\
         startDateTime,endDateTime,result,winnerWrestlerId,winType",
    ),
];

const INCLUDE: &str = "bottomWrestler.team,topWrestler.team,weightClass,event";

/// Rolling counts of outbound HTTP calls.
///
/// Timestamps older than the long window are discarded on every record, so
/// the deque stays bounded by the actual request rate.
#[derive(Debug, Default)]
pub struct RequestTracker {
    timestamps: VecDeque<Instant>,
}

const SHORT_WINDOW: Duration = Duration::from_secs(60);
const LONG_WINDOW: Duration = Duration::from_secs(900);

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one outbound call at the current instant.
    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    fn record_at(&mut self, at: Instant) {
        while let Some(oldest) = self.timestamps.front() {
            if at.duration_since(*oldest) > LONG_WINDOW {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
        self.timestamps.push_back(at);
    }

    /// Calls made in the last 60 seconds.
    pub fn last_minute(&self) -> usize {
        self.count_within(Instant::now(), SHORT_WINDOW)
    }

    /// Calls made in the last 900 seconds.
    pub fn last_quarter_hour(&self) -> usize {
        self.count_within(Instant::now(), LONG_WINDOW)
    }

    fn count_within(&self, now: Instant, window: Duration) -> usize {
        self.timestamps
            .iter()
            .filter(|at| now.duration_since(**at) <= window)
            .count()
    }
}

/// Client for the paginated bouts endpoint.
pub struct BoutClient {
    http: reqwest::Client,
    base_url: String,
    page_size: u32,
    tracker: RequestTracker,
}

impl BoutClient {
    pub fn new(config: &ApiConfig) -> Self {
        BoutClient {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            tracker: RequestTracker::new(),
        }
    }

    /// Current `(last 60s, last 900s)` request counts.
    pub fn rates(&self) -> (usize, usize) {
        (self.tracker.last_minute(), self.tracker.last_quarter_hour())
    }

    /// Starts a lazy page sequence over one wrestler's bouts.
    pub fn bouts(&mut self, identity_person_id: &str) -> BoutPages<'_> {
        let first = self.bout_url(identity_person_id);
        BoutPages {
            client: self,
            next: Some(first),
        }
    }

    fn bout_url(&self, identity_person_id: &str) -> String {
        let mut url = format!(
            "{}/bouts/?identityPersonId={}&page[size]={}&page[offset]=0&hasResult=true&include={}",
            self.base_url, identity_person_id, self.page_size, INCLUDE,
        );
        for (kind, fields) in FIELDS {
            url.push_str(&format!("&fields[{kind}]={fields}"));
        }
        url
    }

    async fn get_document(&mut self, url: &str) -> Result<Document, AppError> {
        self.tracker.record();

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (last_minute, last_quarter_hour) = self.rates();
            return Err(AppError::Upstream {
                status: status.as_u16(),
                url: url.to_string(),
                body,
                last_minute,
                last_quarter_hour,
            });
        }

        response.json::<Document>().await.map_err(AppError::from)
    }
}

/// A lazy sequence of JSON:API pages.
///
/// Iteration stops when a page has no `next` link, or when `next` equals
/// the URL just fetched (an upstream quirk on the final page).
pub struct BoutPages<'a> {
    client: &'a mut BoutClient,
    next: Option<String>,
}

impl BoutPages<'_> {
    pub async fn next_page(&mut self) -> Result<Option<Document>, AppError> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };
        let document = self.client.get_document(&url).await?;
        self.next = next_link(&document.links, &url);
        Ok(Some(document))
    }
}

fn next_link(links: &Links, current: &str) -> Option<String> {
    links
        .next
        .as_ref()
        .filter(|next| next.as_str() != current)
        .cloned()
}
