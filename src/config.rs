//! Application configuration.

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
    value::Uncased,
};

use serde::{Deserialize, Serialize};

use anyhow::Error;

/// Full application configuration.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Local storage configuration.
    pub store: StoreConfig,
    /// Upstream API configuration.
    pub api: ApiConfig,
    /// Rating replay configuration.
    pub rating: RatingConfig,
}

/// Local storage configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    /// The database url to connect to.
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            database_url: "sqlite:data.db".into(),
        }
    }
}

/// Upstream API configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Base url of the bouts endpoint.
    pub base_url: String,
    /// Fixed page size for paginated requests.
    pub page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        ApiConfig {
            base_url: "https://floarena-api.flowrestling.org".into(),
            page_size: 40,
        }
    }
}

/// Configuration for the Glicko-2 replay.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RatingConfig {
    /// Constrains the change in volatility over time.
    ///
    /// Higher values may make skill volatility change more frequently, and
    /// lower values make it stay around the same.
    ///
    /// See the [Glicko-2] paper for more.
    ///
    /// [Glicko-2]: https://www.glicko.net/glicko/glicko2.pdf
    pub tau: f64,
    /// Default state for wrestlers with no rated matches.
    pub defaults: RatingDefaults,
}

impl Default for RatingConfig {
    fn default() -> Self {
        RatingConfig {
            tau: 0.5,
            defaults: RatingDefaults::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RatingDefaults {
    /// The rating new wrestlers start at.
    pub rating: f64,
    pub deviation: f64,
    pub volatility: f64,
}

impl Default for RatingDefaults {
    fn default() -> Self {
        RatingDefaults {
            rating: 1500.0,
            deviation: 350.0,
            volatility: 0.06,
        }
    }
}

/// Reads the configuration.
pub fn read_config(config_file: impl AsRef<Path>) -> Result<Config, Error> {
    Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(config_file))
        .merge(Env::prefixed("TAKEDOWN_"))
        .merge(Env::raw().filter_map(|k| match k.as_str() {
            "DATABASE_URL" => Some(Uncased::from("store.database_url")),
            _ => None,
        }))
        .extract()
        .map_err(From::from)
}
