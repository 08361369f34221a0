//! Destinations read from a JSON file.
//!
//! ```json
//! {
//!   "guilds": {
//!     "123456789": {
//!       "language": "de",
//!       "destinations": {
//!         "moderation": { "id": "987", "url": "https://discord.com/api/webhooks/987/token" }
//!       }
//!     }
//!   },
//!   "strings": {
//!     "de": { "memberBan": "Mitglied gebannt" }
//!   }
//! }
//! ```
//!
//! Invalidated destinations are forgotten in memory only; the file is never
//! rewritten.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::delivery::{Credentials, Identity, Localizer, TableLocalizer};
use crate::types::{DestinationId, GuildId, LogCategory};

use super::{DestinationResolver, ResolvedDestination, Result};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read destinations file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid destinations file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid guild id: {0:?}")]
    InvalidGuildId(String),
}

fn default_language() -> String {
    "en".to_string()
}

#[derive(Debug, Deserialize)]
struct DestinationsFile {
    guilds: HashMap<String, GuildEntry>,
    #[serde(default)]
    strings: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct GuildEntry {
    #[serde(default = "default_language")]
    language: String,
    #[serde(default)]
    destinations: HashMap<LogCategory, DestinationEntry>,
}

#[derive(Debug, Deserialize)]
struct DestinationEntry {
    id: String,
    url: String,
}

struct GuildDestinations {
    localizer: Arc<dyn Localizer>,
    destinations: HashMap<LogCategory, (DestinationId, Credentials)>,
}

pub struct StaticResolver {
    guilds: RwLock<HashMap<GuildId, GuildDestinations>>,
}

impl StaticResolver {
    pub fn from_json(json: &str) -> std::result::Result<Self, ConfigError> {
        let file: DestinationsFile = serde_json::from_str(json)?;

        let localizers: HashMap<String, Arc<dyn Localizer>> = file
            .strings
            .into_iter()
            .map(|(lang, table)| {
                let localizer: Arc<dyn Localizer> = Arc::new(TableLocalizer::new(table));
                (lang, localizer)
            })
            .collect();
        let identity: Arc<dyn Localizer> = Arc::new(Identity);

        let mut guilds = HashMap::new();
        for (raw_id, entry) in file.guilds {
            let id: u64 = raw_id
                .parse()
                .map_err(|_| ConfigError::InvalidGuildId(raw_id.clone()))?;
            let localizer = localizers
                .get(&entry.language)
                .cloned()
                .unwrap_or_else(|| identity.clone());
            let destinations = entry
                .destinations
                .into_iter()
                .map(|(category, d)| {
                    let target = (DestinationId::new(d.id), Credentials::new(d.url));
                    (category, target)
                })
                .collect();
            guilds.insert(
                GuildId(id),
                GuildDestinations {
                    localizer,
                    destinations,
                },
            );
        }
        info!(guilds = guilds.len(), "Loaded static destinations");
        Ok(StaticResolver {
            guilds: RwLock::new(guilds),
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// A resolver with no guilds; every category is disabled.
    pub fn empty() -> Self {
        StaticResolver {
            guilds: RwLock::new(HashMap::new()),
        }
    }
}

impl DestinationResolver for StaticResolver {
    async fn resolve(
        &self,
        guild: GuildId,
        category: LogCategory,
    ) -> Result<Option<ResolvedDestination>> {
        let guilds = self.guilds.read().await;
        let resolved = guilds.get(&guild).and_then(|g| {
            g.destinations
                .get(&category)
                .map(|(id, credentials)| ResolvedDestination {
                    id: id.clone(),
                    credentials: credentials.clone(),
                    localizer: g.localizer.clone(),
                })
        });
        Ok(resolved)
    }

    async fn invalidate(&self, guild: GuildId, category: LogCategory, destination: &DestinationId) {
        let mut guilds = self.guilds.write().await;
        let Some(entry) = guilds.get_mut(&guild) else {
            return;
        };
        // Only forget it if it was not reconfigured in the meantime.
        if entry
            .destinations
            .get(&category)
            .is_some_and(|(id, _)| id == destination)
        {
            entry.destinations.remove(&category);
            warn!(
                guild = %guild,
                category = %category,
                destination = %destination,
                "Forgot invalid destination"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"{
        "guilds": {
            "100": {
                "language": "de",
                "destinations": {
                    "moderation": { "id": "w1", "url": "https://hooks.test/w1" },
                    "messages": { "id": "w2", "url": "https://hooks.test/w2" }
                }
            },
            "200": {
                "destinations": {
                    "members": { "id": "w3", "url": "https://hooks.test/w3" }
                }
            }
        },
        "strings": {
            "de": { "memberBan": "Mitglied gebannt" }
        }
    }"#;

    #[tokio::test]
    async fn resolves_configured_category() {
        let resolver = StaticResolver::from_json(SAMPLE).unwrap();
        let resolved = resolver
            .resolve(GuildId(100), LogCategory::Moderation)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, DestinationId::new("w1"));
        assert_eq!(resolved.credentials.url, "https://hooks.test/w1");
        assert_eq!(resolved.localizer.localize("memberBan"), "Mitglied gebannt");
    }

    #[tokio::test]
    async fn unconfigured_category_is_disabled() {
        let resolver = StaticResolver::from_json(SAMPLE).unwrap();
        assert!(
            resolver
                .resolve(GuildId(100), LogCategory::Voice)
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            resolver
                .resolve(GuildId(999), LogCategory::Moderation)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn missing_language_table_falls_back_to_identity() {
        let resolver = StaticResolver::from_json(SAMPLE).unwrap();
        let resolved = resolver
            .resolve(GuildId(200), LogCategory::Members)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.localizer.localize("memberJoin"), "memberJoin");
    }

    #[tokio::test]
    async fn invalidate_forgets_matching_destination_only() {
        let resolver = StaticResolver::from_json(SAMPLE).unwrap();
        resolver
            .invalidate(GuildId(100), LogCategory::Moderation, &DestinationId::new("other"))
            .await;
        assert!(
            resolver
                .resolve(GuildId(100), LogCategory::Moderation)
                .await
                .unwrap()
                .is_some()
        );

        resolver
            .invalidate(GuildId(100), LogCategory::Moderation, &DestinationId::new("w1"))
            .await;
        assert!(
            resolver
                .resolve(GuildId(100), LogCategory::Moderation)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        assert!(StaticResolver::from_path(file.path()).is_ok());
    }

    #[test]
    fn rejects_bad_guild_id() {
        let err = StaticResolver::from_json(r#"{ "guilds": { "abc": {} } }"#)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            ConfigError::InvalidGuildId(id) if id == "abc"
        ));
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = StaticResolver::from_path(dir.path().join("nope.json"))
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
