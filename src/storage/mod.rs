//! Registration store
//!
//! SQLite-backed persistence for targets, subscribers, and endpoints. The
//! pipeline reads it through the [`Registry`] trait; writes come only from
//! the management API.

use crate::error::{Error, Result};
use crate::notification::subscriber::{Endpoint, Subscriber, Target};
use crate::notification::Registry;
use async_trait::async_trait;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS targets (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    key     TEXT    NOT NULL UNIQUE,
    name    TEXT    NOT NULL UNIQUE,
    kind    TEXT    NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS endpoints (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    name    TEXT    NOT NULL UNIQUE,
    url     TEXT    NOT NULL,
    method  TEXT    NOT NULL,
    headers TEXT
);

CREATE TABLE IF NOT EXISTS subscribers (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id   INTEGER NOT NULL REFERENCES targets(id) ON DELETE CASCADE,
    endpoint_id INTEGER REFERENCES endpoints(id) ON DELETE SET NULL,
    name        TEXT    NOT NULL,
    event       TEXT    NOT NULL,
    enabled     INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_subscribers_target ON subscribers(target_id);
";

const SUBSCRIBER_SELECT: &str = "
SELECT s.id, s.name, s.event, s.enabled,
       e.id, e.name, e.url, e.method, e.headers
FROM subscribers s
LEFT JOIN endpoints e ON e.id = s.endpoint_id
";

/// A target registration request
#[derive(Debug, Clone, Deserialize)]
pub struct NewTarget {
    pub key: String,
    pub name: String,
    pub kind: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// A subscriber registration request
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscriber {
    pub name: String,
    pub event: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub endpoint_id: Option<u64>,
}

/// An endpoint registration request
#[derive(Debug, Clone, Deserialize)]
pub struct NewEndpoint {
    pub name: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_enabled() -> bool {
    true
}

/// SQLite-backed registration store
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open (and migrate) the store at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path.to_path_buf()).await?;
        Self::init(conn).await
    }

    /// In-memory store for tests.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Targets

    pub async fn find_targets(&self, take: usize, skip: usize) -> Result<(Vec<Target>, u64)> {
        let limit = if take == 0 { -1 } else { take as i64 };

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, key, name, kind, enabled FROM targets
                     ORDER BY id LIMIT ?1 OFFSET ?2",
                )?;

                let targets = stmt
                    .query_map(params![limit, skip as i64], target_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let quantity: i64 =
                    conn.query_row("SELECT COUNT(id) FROM targets", [], |row| row.get(0))?;

                Ok((targets, quantity as u64))
            })
            .await
            .map_err(Error::from)
    }

    pub async fn get_target(&self, id: u64) -> Result<Option<Target>> {
        self.conn
            .call(move |conn| {
                let target = conn
                    .query_row(
                        "SELECT id, key, name, kind, enabled FROM targets WHERE id = ?1",
                        params![id as i64],
                        target_from_row,
                    )
                    .optional()?;

                Ok(target)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn get_target_by_key(&self, key: String) -> Result<Option<Target>> {
        self.conn
            .call(move |conn| {
                let target = conn
                    .query_row(
                        "SELECT id, key, name, kind, enabled FROM targets WHERE key = ?1",
                        params![key],
                        target_from_row,
                    )
                    .optional()?;

                Ok(target)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn create_target(&self, target: NewTarget) -> Result<u64> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO targets (key, name, kind, enabled) VALUES (?1, ?2, ?3, ?4)",
                    params![target.key, target.name, target.kind, target.enabled],
                )?;

                Ok(conn.last_insert_rowid() as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn update_target(&self, target: Target) -> Result<()> {
        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE targets SET key = ?2, name = ?3, kind = ?4, enabled = ?5
                     WHERE id = ?1",
                    params![
                        target.id as i64,
                        target.key,
                        target.name,
                        target.kind,
                        target.enabled
                    ],
                )?;

                Ok(updated)
            })
            .await?;

        if updated == 0 {
            return Err(Error::NotFound("target".to_string()));
        }

        Ok(())
    }

    pub async fn delete_target(&self, id: u64) -> Result<()> {
        let deleted = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM targets WHERE id = ?1", params![id as i64])?)
            })
            .await?;

        if deleted == 0 {
            return Err(Error::NotFound("target".to_string()));
        }

        Ok(())
    }

    // Endpoints

    pub async fn find_endpoints(&self, take: usize, skip: usize) -> Result<(Vec<Endpoint>, u64)> {
        let limit = if take == 0 { -1 } else { take as i64 };

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, url, method, headers FROM endpoints
                     ORDER BY id LIMIT ?1 OFFSET ?2",
                )?;

                let endpoints = stmt
                    .query_map(params![limit, skip as i64], endpoint_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let quantity: i64 =
                    conn.query_row("SELECT COUNT(id) FROM endpoints", [], |row| row.get(0))?;

                Ok((endpoints, quantity as u64))
            })
            .await
            .map_err(Error::from)
    }

    pub async fn get_endpoint(&self, id: u64) -> Result<Option<Endpoint>> {
        self.conn
            .call(move |conn| {
                let endpoint = conn
                    .query_row(
                        "SELECT id, name, url, method, headers FROM endpoints WHERE id = ?1",
                        params![id as i64],
                        endpoint_from_row,
                    )
                    .optional()?;

                Ok(endpoint)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn create_endpoint(&self, endpoint: NewEndpoint) -> Result<u64> {
        let headers = serde_json::to_string(&endpoint.headers)?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO endpoints (name, url, method, headers) VALUES (?1, ?2, ?3, ?4)",
                    params![endpoint.name, endpoint.url, endpoint.method, headers],
                )?;

                Ok(conn.last_insert_rowid() as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn update_endpoint(&self, endpoint: Endpoint) -> Result<()> {
        let headers = serde_json::to_string(&endpoint.headers)?;

        let updated = self
            .conn
            .call(move |conn| {
                let updated = conn.execute(
                    "UPDATE endpoints SET name = ?2, url = ?3, method = ?4, headers = ?5
                     WHERE id = ?1",
                    params![
                        endpoint.id as i64,
                        endpoint.name,
                        endpoint.url,
                        endpoint.method,
                        headers
                    ],
                )?;

                Ok(updated)
            })
            .await?;

        if updated == 0 {
            return Err(Error::NotFound("endpoint".to_string()));
        }

        Ok(())
    }

    pub async fn delete_endpoint(&self, id: u64) -> Result<()> {
        let deleted = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM endpoints WHERE id = ?1", params![id as i64])?)
            })
            .await?;

        if deleted == 0 {
            return Err(Error::NotFound("endpoint".to_string()));
        }

        Ok(())
    }

    // Subscribers

    pub async fn get_subscribers(&self, target_id: u64) -> Result<Vec<Subscriber>> {
        self.conn
            .call(move |conn| {
                let query = format!("{} WHERE s.target_id = ?1 ORDER BY s.id", SUBSCRIBER_SELECT);
                let mut stmt = conn.prepare(&query)?;

                let subscribers = stmt
                    .query_map(params![target_id as i64], subscriber_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                Ok(subscribers)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn create_subscriber(
        &self,
        target_id: u64,
        subscriber: NewSubscriber,
    ) -> Result<u64> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO subscribers (target_id, endpoint_id, name, event, enabled)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        target_id as i64,
                        subscriber.endpoint_id.map(|id| id as i64),
                        subscriber.name,
                        subscriber.event,
                        subscriber.enabled
                    ],
                )?;

                Ok(conn.last_insert_rowid() as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn delete_subscriber(&self, id: u64) -> Result<()> {
        let deleted = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM subscribers WHERE id = ?1", params![id as i64])?)
            })
            .await?;

        if deleted == 0 {
            return Err(Error::NotFound("subscriber".to_string()));
        }

        Ok(())
    }

    async fn find_enabled_subscribers(
        &self,
        target_id: u64,
        events: Vec<String>,
    ) -> Result<Vec<Subscriber>> {
        self.conn
            .call(move |conn| {
                let placeholders = (0..events.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect::<Vec<_>>()
                    .join(", ");

                let query = format!(
                    "{} WHERE s.target_id = ?1 AND s.enabled = 1 AND s.event IN ({})
                     ORDER BY s.id",
                    SUBSCRIBER_SELECT, placeholders,
                );

                let mut stmt = conn.prepare(&query)?;

                let mut values: Vec<rusqlite::types::Value> =
                    vec![(target_id as i64).into()];
                values.extend(events.into_iter().map(rusqlite::types::Value::from));

                let subscribers = stmt
                    .query_map(params_from_iter(values), subscriber_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                Ok(subscribers)
            })
            .await
            .map_err(Error::from)
    }
}

#[async_trait]
impl Registry for Storage {
    async fn find_target(&self, key: &str) -> Result<Option<Target>> {
        self.get_target_by_key(key.to_string()).await
    }

    async fn find_subscribers(
        &self,
        target_id: u64,
        events: Vec<String>,
    ) -> Result<Vec<Subscriber>> {
        self.find_enabled_subscribers(target_id, events).await
    }
}

fn target_from_row(row: &Row<'_>) -> rusqlite::Result<Target> {
    Ok(Target {
        id: row.get::<_, i64>(0)? as u64,
        key: row.get(1)?,
        name: row.get(2)?,
        kind: row.get(3)?,
        enabled: row.get(4)?,
    })
}

fn endpoint_from_row(row: &Row<'_>) -> rusqlite::Result<Endpoint> {
    let headers: Option<String> = row.get(4)?;

    Ok(Endpoint {
        id: row.get::<_, i64>(0)? as u64,
        name: row.get(1)?,
        url: row.get(2)?,
        method: row.get(3)?,
        headers: headers
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
    })
}

fn subscriber_from_row(row: &Row<'_>) -> rusqlite::Result<Subscriber> {
    let endpoint_id: Option<i64> = row.get(4)?;

    let endpoint = match endpoint_id {
        Some(id) => {
            let headers: Option<String> = row.get(8)?;

            Some(Endpoint {
                id: id as u64,
                name: row.get(5)?,
                url: row.get(6)?,
                method: row.get(7)?,
                headers: headers
                    .and_then(|raw| serde_json::from_str(&raw).ok())
                    .unwrap_or_default(),
            })
        }
        None => None,
    };

    Ok(Subscriber {
        id: row.get::<_, i64>(0)? as u64,
        name: row.get(1)?,
        event: row.get(2)?,
        enabled: row.get(3)?,
        endpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (Storage, u64, u64) {
        let storage = Storage::open_in_memory().await.unwrap();

        let endpoint_id = storage
            .create_endpoint(NewEndpoint {
                name: "hook".to_string(),
                url: "http://localhost/hook".to_string(),
                method: "POST".to_string(),
                headers: HashMap::from([("X-Token".to_string(), "secret".to_string())]),
            })
            .await
            .unwrap();

        let target_id = storage
            .create_target(NewTarget {
                key: "0123456789abcdef0123456789abcdef:1:2".to_string(),
                name: "lobby".to_string(),
                kind: "ibeacon".to_string(),
                enabled: true,
            })
            .await
            .unwrap();

        (storage, target_id, endpoint_id)
    }

    #[tokio::test]
    async fn test_target_crud_round_trip() {
        let (storage, target_id, _) = seeded().await;

        let mut target = storage.get_target(target_id).await.unwrap().unwrap();
        assert_eq!(target.name, "lobby");
        assert!(target.enabled);

        target.enabled = false;
        storage.update_target(target).await.unwrap();

        let by_key = storage
            .get_target_by_key("0123456789abcdef0123456789abcdef:1:2".to_string())
            .await
            .unwrap()
            .unwrap();
        assert!(!by_key.enabled);

        storage.delete_target(target_id).await.unwrap();
        assert!(storage.get_target(target_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_targets_paginates() {
        let (storage, _, _) = seeded().await;

        for i in 0..4 {
            storage
                .create_target(NewTarget {
                    key: format!("feedfacefeedfacefeedfacefeedface:9:{}", i),
                    name: format!("target-{}", i),
                    kind: "ibeacon".to_string(),
                    enabled: true,
                })
                .await
                .unwrap();
        }

        let (all, quantity) = storage.find_targets(0, 0).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(quantity, 5);

        let (page, quantity) = storage.find_targets(2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(quantity, 5);
        assert_eq!(page[0].id, all[1].id);
    }

    #[tokio::test]
    async fn test_find_subscribers_filters_event_and_enabled() {
        let (storage, target_id, endpoint_id) = seeded().await;

        for (name, event, enabled) in [
            ("on-found", "found", true),
            ("on-lost", "lost", true),
            ("on-any", "*", true),
            ("disabled", "found", false),
        ] {
            storage
                .create_subscriber(
                    target_id,
                    NewSubscriber {
                        name: name.to_string(),
                        event: event.to_string(),
                        enabled,
                        endpoint_id: Some(endpoint_id),
                    },
                )
                .await
                .unwrap();
        }

        let matched = storage
            .find_subscribers(target_id, vec!["found".to_string(), "*".to_string()])
            .await
            .unwrap();

        let names: Vec<_> = matched.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["on-found", "on-any"]);

        let endpoint = matched[0].endpoint.as_ref().unwrap();
        assert_eq!(endpoint.method, "POST");
        assert_eq!(endpoint.headers["X-Token"], "secret");
    }

    #[tokio::test]
    async fn test_deleting_target_cascades_to_subscribers() {
        let (storage, target_id, endpoint_id) = seeded().await;

        storage
            .create_subscriber(
                target_id,
                NewSubscriber {
                    name: "hook".to_string(),
                    event: "found".to_string(),
                    enabled: true,
                    endpoint_id: Some(endpoint_id),
                },
            )
            .await
            .unwrap();

        storage.delete_target(target_id).await.unwrap();
        assert!(storage.get_subscribers(target_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_lookup_miss_is_none() {
        let (storage, _, _) = seeded().await;

        assert!(storage.find_target("missing:0:0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registrations_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.db");

        {
            let storage = Storage::open(&path).await.unwrap();
            storage
                .create_target(NewTarget {
                    key: "0123456789abcdef0123456789abcdef:1:2".to_string(),
                    name: "lobby".to_string(),
                    kind: "ibeacon".to_string(),
                    enabled: true,
                })
                .await
                .unwrap();
        }

        let storage = Storage::open(&path).await.unwrap();
        let target = storage
            .get_target_by_key("0123456789abcdef0123456789abcdef:1:2".to_string())
            .await
            .unwrap();

        assert_eq!(target.unwrap().name, "lobby");
    }
}
