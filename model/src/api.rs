//! Wire types for the FloArena bouts JSON:API.
//!
//! The upstream endpoint returns a standard JSON:API document: a `data`
//! array of bout resources, an `included` array of side-loaded resources
//! and a `links` object carrying the pagination cursor. Every attribute is
//! optional on the wire; rows with missing references are dropped at ingest
//! rather than patched up with defaults.

use serde::{Deserialize, Serialize};

/// One page of the paginated bouts endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Document {
    #[serde(default)]
    pub data: Vec<Bout>,
    #[serde(default)]
    pub included: Vec<Included>,
    #[serde(default)]
    pub links: Links,
}

/// Pagination links of a document.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Links {
    pub next: Option<String>,
}

/// A bout resource from the `data` array.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Bout {
    pub id: String,
    #[serde(default)]
    pub attributes: BoutAttributes,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoutAttributes {
    /// Document id of the top wrestler resource, not an identity key.
    pub top_wrestler_id: Option<String>,
    /// Document id of the bottom wrestler resource.
    pub bottom_wrestler_id: Option<String>,
    pub winner_wrestler_id: Option<String>,
    pub weight_class_id: Option<String>,
    pub event_id: Option<String>,
    pub go_date_time: Option<String>,
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
    pub result: Option<String>,
    pub win_type: Option<String>,
}

/// A side-loaded resource from the `included` array, keyed by its
/// JSON:API `type` tag.
///
/// Unknown resource types deserialize into [`Included::Other`] so a new
/// upstream include does not fail the whole page.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Included {
    Wrestler(WrestlerResource),
    Team(TeamResource),
    Event(EventResource),
    WeightClass(WeightClassResource),
    #[serde(other)]
    Other,
}

impl Included {
    /// The document id of the resource, if it carries one.
    pub fn id(&self) -> Option<&str> {
        match self {
            Included::Wrestler(resource) => Some(&resource.id),
            Included::Team(resource) => Some(&resource.id),
            Included::Event(resource) => Some(&resource.id),
            Included::WeightClass(resource) => Some(&resource.id),
            Included::Other => None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WrestlerResource {
    pub id: String,
    #[serde(default)]
    pub attributes: WrestlerAttributes,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WrestlerAttributes {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Document id of the wrestler's team resource.
    pub team_id: Option<String>,
    /// Stable identity key, shared across seasons.
    pub identity_person_id: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TeamResource {
    pub id: String,
    #[serde(default)]
    pub attributes: TeamAttributes,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamAttributes {
    pub name: Option<String>,
    pub identity_team_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EventResource {
    pub id: String,
    #[serde(default)]
    pub attributes: EventAttributes,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAttributes {
    pub name: Option<String>,
    pub start_date_time: Option<String>,
    pub end_date_time: Option<String>,
    pub location: Option<EventLocation>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct EventLocation {
    pub name: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WeightClassResource {
    pub id: String,
    #[serde(default)]
    pub attributes: WeightClassAttributes,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightClassAttributes {
    pub name: Option<String>,
}
