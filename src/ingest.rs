//! Normalizes one JSON:API page into stored entities and an opponent set.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};

use sqlx::SqliteConnection;

use takedown_model::api::{
    BoutAttributes, Document, EventResource, Included, WrestlerResource,
};

use crate::{
    error::AppError,
    store::{self, NewMatch},
};

/// Filters applied while ingesting match rows.
#[derive(Clone, Debug, Default)]
pub struct IngestFilters {
    /// Allowed weight-class names, trimmed and lowercased. `None` allows
    /// every weight.
    allowed_weights: Option<HashSet<String>>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

impl IngestFilters {
    pub fn new(
        weight_classes: &[String],
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Self {
        let allowed_weights = if weight_classes.is_empty() {
            None
        } else {
            Some(
                weight_classes
                    .iter()
                    .map(|weight| weight.trim().to_lowercase())
                    .collect(),
            )
        };
        IngestFilters {
            allowed_weights,
            start: start.map(|dt| dt.date()),
            end: end.map(|dt| dt.date()),
        }
    }

    fn weight_allowed(&self, name: &str) -> bool {
        match &self.allowed_weights {
            Some(allowed) => allowed.contains(&name.trim().to_lowercase()),
            None => true,
        }
    }

    fn has_date_bounds(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }

    fn date_allowed(&self, date: NaiveDate) -> bool {
        if let Some(start) = self.start {
            if date < start {
                return false;
            }
        }
        if let Some(end) = self.end {
            if date > end {
                return false;
            }
        }
        true
    }
}

/// What one page produced: the opponents discovered and the number of
/// match rows dropped for missing or inconsistent data.
#[derive(Debug, Default)]
pub struct PageOutcome {
    pub opponents: HashSet<String>,
    pub skipped: usize,
}

/// Ingests one page for the wrestler currently being expanded.
///
/// Entities are created idempotently in two passes over `included` (teams
/// and events first, then wrestlers, so team references resolve), followed
/// by one pass over the bout rows. Returns the identities of every
/// opponent of `this_id` that survived the filters.
pub async fn ingest_page(
    conn: &mut SqliteConnection,
    document: &Document,
    this_id: &str,
    filters: &IngestFilters,
) -> Result<PageOutcome, AppError> {
    let lookup: HashMap<&str, &Included> = document
        .included
        .iter()
        .filter_map(|resource| resource.id().map(|id| (id, resource)))
        .collect();

    for resource in &document.included {
        match resource {
            Included::Team(team) => {
                if let Some(identity) = team.attributes.identity_team_id {
                    store::create_team(conn, identity, team.attributes.name.as_deref())
                        .await?;
                }
            }
            Included::Event(event) => {
                let attrs = &event.attributes;
                let date = attrs
                    .start_date_time
                    .as_deref()
                    .or(attrs.end_date_time.as_deref());
                let location = attrs
                    .location
                    .as_ref()
                    .and_then(|location| location.name.as_deref());
                store::create_event(conn, &event.id, attrs.name.as_deref(), date, location)
                    .await?;
            }
            _ => {}
        }
    }

    for resource in &document.included {
        let Included::Wrestler(wrestler) = resource else {
            continue;
        };
        let Some(identity) = wrestler.attributes.identity_person_id.as_deref() else {
            continue;
        };
        let name = display_name(wrestler);
        let team_identity = wrestler
            .attributes
            .team_id
            .as_deref()
            .and_then(|team_id| lookup.get(team_id).copied())
            .and_then(|resource| match resource {
                Included::Team(team) => team.attributes.identity_team_id,
                _ => None,
            });
        store::create_wrestler(conn, identity, &name, team_identity).await?;
    }

    let mut outcome = PageOutcome::default();

    for bout in &document.data {
        let attrs = &bout.attributes;
        if attrs.win_type.as_deref() == Some("BYE") {
            continue;
        }

        let top = resolve_wrestler(&lookup, attrs.top_wrestler_id.as_deref());
        let bottom = resolve_wrestler(&lookup, attrs.bottom_wrestler_id.as_deref());
        let (Some(top), Some(bottom)) = (top, bottom) else {
            outcome.skipped += 1;
            continue;
        };
        let (Some(top_identity), Some(bottom_identity)) = (
            top.attributes.identity_person_id.as_deref(),
            bottom.attributes.identity_person_id.as_deref(),
        ) else {
            outcome.skipped += 1;
            continue;
        };

        let weight_name = attrs
            .weight_class_id
            .as_deref()
            .and_then(|weight_id| lookup.get(weight_id).copied())
            .and_then(|resource| match resource {
                Included::WeightClass(weight) => weight.attributes.name.as_deref(),
                _ => None,
            })
            .map(str::trim)
            .filter(|name| !name.is_empty());
        let Some(weight_name) = weight_name else {
            outcome.skipped += 1;
            continue;
        };

        if !filters.weight_allowed(weight_name) {
            continue;
        }

        let event = attrs
            .event_id
            .as_deref()
            .and_then(|event_id| lookup.get(event_id).copied())
            .and_then(|resource| match resource {
                Included::Event(event) => Some(event),
                _ => None,
            });
        let occurred_at = resolve_timestamp(attrs, event);
        match occurred_at {
            Some(occurred_at) => {
                if !filters.date_allowed(occurred_at.date()) {
                    continue;
                }
            }
            // an undatable match is only acceptable when no bounds were
            // asked for
            None => {
                if filters.has_date_bounds() {
                    continue;
                }
            }
        }

        // the winner reference points at the top wrestler's document id,
        // not its identity key
        let winner_identity = if attrs.winner_wrestler_id.as_deref() == Some(top.id.as_str())
        {
            top_identity
        } else {
            bottom_identity
        };

        store::create_match(
            conn,
            &NewMatch {
                id: bout.id.clone(),
                top_id: top_identity.to_string(),
                bottom_id: bottom_identity.to_string(),
                winner_id: winner_identity.to_string(),
                weight_class: weight_name.to_string(),
                event_id: attrs.event_id.clone(),
                date: occurred_at.map(store::format_timestamp),
                result: attrs.result.clone(),
                win_type: attrs.win_type.clone(),
            },
        )
        .await?;

        let opponent = if top_identity == this_id {
            bottom_identity
        } else {
            top_identity
        };
        outcome.opponents.insert(opponent.to_string());
    }

    Ok(outcome)
}

fn resolve_wrestler<'a>(
    lookup: &HashMap<&str, &'a Included>,
    document_id: Option<&str>,
) -> Option<&'a WrestlerResource> {
    lookup
        .get(document_id?)
        .copied()
        .and_then(|resource| match resource {
            Included::Wrestler(wrestler) => Some(wrestler),
            _ => None,
        })
}

fn display_name(wrestler: &WrestlerResource) -> String {
    let mut parts = Vec::new();
    if let Some(first) = wrestler.attributes.first_name.as_deref() {
        parts.push(first);
    }
    if let Some(last) = wrestler.attributes.last_name.as_deref() {
        parts.push(last);
    }
    parts.join(" ")
}

/// Resolves the match timestamp by ordered preference: the bout's own
/// `goDateTime`, `startDateTime` and `endDateTime`, then the referenced
/// event's start and end.
fn resolve_timestamp(
    attrs: &BoutAttributes,
    event: Option<&EventResource>,
) -> Option<NaiveDateTime> {
    let candidates = [
        attrs.go_date_time.as_deref(),
        attrs.start_date_time.as_deref(),
        attrs.end_date_time.as_deref(),
        event.and_then(|event| event.attributes.start_date_time.as_deref()),
        event.and_then(|event| event.attributes.end_date_time.as_deref()),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(store::parse_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::store::connect;

    async fn mem_conn() -> SqliteConnection {
        connect("sqlite::memory:").await.unwrap()
    }

    fn fixture_page(win_type: &str, go_date_time: Option<&str>) -> Document {
        let value = json!({
            "data": [{
                "id": "bout-1",
                "type": "bout",
                "attributes": {
                    "topWrestlerId": "doc-top",
                    "bottomWrestlerId": "doc-bottom",
                    "winnerWrestlerId": "doc-top",
                    "weightClassId": "doc-weight",
                    "eventId": "doc-event",
                    "goDateTime": go_date_time,
                    "result": "DEC 7-2",
                    "winType": win_type,
                }
            }],
            "included": [
                {
                    "type": "wrestler",
                    "id": "doc-top",
                    "attributes": {
                        "firstName": "Alex",
                        "lastName": "Stone",
                        "teamId": "doc-team",
                        "identityPersonId": "ident-top",
                    }
                },
                {
                    "type": "wrestler",
                    "id": "doc-bottom",
                    "attributes": {
                        "firstName": "Ben",
                        "lastName": "Ruiz",
                        "teamId": null,
                        "identityPersonId": "ident-bottom",
                    }
                },
                {
                    "type": "team",
                    "id": "doc-team",
                    "attributes": { "name": "River HS", "identityTeamId": 42 }
                },
                {
                    "type": "event",
                    "id": "doc-event",
                    "attributes": {
                        "name": "Winter Duals",
                        "startDateTime": "2024-01-13T09:00:00Z",
                        "location": { "name": "Des Moines" }
                    }
                },
                {
                    "type": "weightClass",
                    "id": "doc-weight",
                    "attributes": { "name": "138" }
                }
            ],
            "links": {}
        });
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn ingests_entities_and_returns_the_opponent() {
        let mut conn = mem_conn().await;
        let page = fixture_page("DEC", Some("2024-01-14T10:30:00Z"));

        let outcome =
            ingest_page(&mut conn, &page, "ident-top", &IngestFilters::default())
                .await
                .unwrap();

        assert_eq!(outcome.skipped, 0);
        assert_eq!(
            outcome.opponents,
            HashSet::from(["ident-bottom".to_string()])
        );

        let names = crate::store::fetch_wrestler_names(&mut conn).await.unwrap();
        assert_eq!(names["ident-top"], "Alex Stone");
        assert_eq!(names["ident-bottom"], "Ben Ruiz");

        // winner resolved through the top wrestler's document id
        let (winner, date): (String, String) = sqlx::query_as(
            "SELECT winner_id, date FROM matches WHERE id = 'bout-1'",
        )
        .fetch_one(&mut conn)
        .await
        .unwrap();
        assert_eq!(winner, "ident-top");
        assert_eq!(date, "2024-01-14T10:30:00");
    }

    #[tokio::test]
    async fn expanding_the_bottom_wrestler_returns_the_top_opponent() {
        let mut conn = mem_conn().await;
        let page = fixture_page("DEC", Some("2024-01-14T10:30:00Z"));

        let outcome =
            ingest_page(&mut conn, &page, "ident-bottom", &IngestFilters::default())
                .await
                .unwrap();

        assert_eq!(outcome.opponents, HashSet::from(["ident-top".to_string()]));
    }

    #[tokio::test]
    async fn bye_rows_leave_nothing_behind() {
        let mut conn = mem_conn().await;
        let page = fixture_page("BYE", Some("2024-01-14T10:30:00Z"));

        let outcome =
            ingest_page(&mut conn, &page, "ident-top", &IngestFilters::default())
                .await
                .unwrap();

        assert!(outcome.opponents.is_empty());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matches")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn ingest_is_idempotent_across_pages() {
        let mut conn = mem_conn().await;
        let page = fixture_page("DEC", Some("2024-01-14T10:30:00Z"));

        let first = ingest_page(&mut conn, &page, "ident-top", &IngestFilters::default())
            .await
            .unwrap();
        let second = ingest_page(&mut conn, &page, "ident-top", &IngestFilters::default())
            .await
            .unwrap();

        assert_eq!(first.opponents, second.opponents);
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matches")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn weight_filter_compares_trimmed_case_insensitive_names() {
        let mut conn = mem_conn().await;
        let page = fixture_page("DEC", Some("2024-01-14T10:30:00Z"));

        let keep = IngestFilters::new(&[" 138 ".into()], None, None);
        let outcome = ingest_page(&mut conn, &page, "ident-top", &keep).await.unwrap();
        assert_eq!(outcome.opponents.len(), 1);

        let mut conn = mem_conn().await;
        let drop = IngestFilters::new(&["145".into()], None, None);
        let outcome = ingest_page(&mut conn, &page, "ident-top", &drop).await.unwrap();
        assert!(outcome.opponents.is_empty());
        assert_eq!(outcome.skipped, 0);
    }

    #[tokio::test]
    async fn undated_matches_only_pass_without_bounds() {
        // no goDateTime, no event dates: strip the event reference
        let mut page = fixture_page("DEC", None);
        page.data[0].attributes.event_id = None;

        let mut conn = mem_conn().await;
        let outcome =
            ingest_page(&mut conn, &page, "ident-top", &IngestFilters::default())
                .await
                .unwrap();
        assert_eq!(outcome.opponents.len(), 1);
        let (date,): (Option<String>,) =
            sqlx::query_as("SELECT date FROM matches WHERE id = 'bout-1'")
                .fetch_one(&mut conn)
                .await
                .unwrap();
        assert!(date.is_none());

        let mut conn = mem_conn().await;
        let bounded = IngestFilters::new(
            &[],
            crate::cli::parse_cli_timestamp("2024-01-01").ok(),
            None,
        );
        let outcome = ingest_page(&mut conn, &page, "ident-top", &bounded).await.unwrap();
        assert!(outcome.opponents.is_empty());
    }

    #[tokio::test]
    async fn timestamp_falls_back_to_the_event_start() {
        let page = fixture_page("DEC", None);

        let mut conn = mem_conn().await;
        let bounded = IngestFilters::new(
            &[],
            crate::cli::parse_cli_timestamp("2024-01-13").ok(),
            crate::cli::parse_cli_timestamp("2024-01-13").ok(),
        );
        let outcome = ingest_page(&mut conn, &page, "ident-top", &bounded).await.unwrap();
        assert_eq!(outcome.opponents.len(), 1);

        let (date,): (String,) = sqlx::query_as("SELECT date FROM matches WHERE id = 'bout-1'")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(date, "2024-01-13T09:00:00");
    }

    #[tokio::test]
    async fn unresolvable_participants_are_counted_not_fatal() {
        let mut page = fixture_page("DEC", Some("2024-01-14T10:30:00Z"));
        page.data[0].attributes.bottom_wrestler_id = Some("doc-missing".into());

        let mut conn = mem_conn().await;
        let outcome =
            ingest_page(&mut conn, &page, "ident-top", &IngestFilters::default())
                .await
                .unwrap();

        assert_eq!(outcome.skipped, 1);
        assert!(outcome.opponents.is_empty());
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM matches")
            .fetch_one(&mut conn)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
