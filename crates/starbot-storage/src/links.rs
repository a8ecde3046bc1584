use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use starbot_core::LinkedAccount;
use thiserror::Error;

const PLATFORM_USER_CONSTRAINT: &str = "linked_accounts_pkey";

/// Which side of the 1:1 link a uniqueness violation hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkConstraint {
    /// The platform user already has a link.
    PlatformUser,
    /// The event user id is already claimed by someone else.
    EventUser,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link already exists ({constraint:?})")]
    UniqueViolation { constraint: LinkConstraint },
    #[error("id {0} does not fit the storage column")]
    IdOutOfRange(u64),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Bidirectionally unique mapping of platform users to event users.
///
/// Inserts never overwrite: a second claim on either side fails with
/// [`LinkError::UniqueViolation`].
#[async_trait]
pub trait LinkStore: Send + Sync {
    async fn insert_link(&self, user_id: u64, aoc_user_id: u64) -> Result<(), LinkError>;
    async fn delete_link(&self, user_id: u64) -> Result<Option<LinkedAccount>, LinkError>;
    async fn lookup_event_id(&self, user_id: u64) -> Result<Option<u64>, LinkError>;
    async fn list_all_links(&self) -> Result<Vec<LinkedAccount>, LinkError>;
}

#[derive(Debug, Clone)]
pub struct PgLinkStore {
    pool: PgPool,
}

impl PgLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("running linked_accounts migrations")?;
        Ok(())
    }
}

fn to_db(id: u64) -> Result<i64, LinkError> {
    i64::try_from(id).map_err(|_| LinkError::IdOutOfRange(id))
}

fn from_db(id: i64) -> u64 {
    id as u64
}

fn map_insert_error(err: sqlx::Error) -> LinkError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let constraint = if db.constraint() == Some(PLATFORM_USER_CONSTRAINT) {
                LinkConstraint::PlatformUser
            } else {
                LinkConstraint::EventUser
            };
            return LinkError::UniqueViolation { constraint };
        }
    }
    LinkError::Database(err)
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn insert_link(&self, user_id: u64, aoc_user_id: u64) -> Result<(), LinkError> {
        sqlx::query("INSERT INTO linked_accounts (user_id, aoc_user_id) VALUES ($1, $2)")
            .bind(to_db(user_id)?)
            .bind(to_db(aoc_user_id)?)
            .execute(&self.pool)
            .await
            .map_err(map_insert_error)?;
        Ok(())
    }

    async fn delete_link(&self, user_id: u64) -> Result<Option<LinkedAccount>, LinkError> {
        let row = sqlx::query(
            r#"
            DELETE FROM linked_accounts
             WHERE user_id = $1
            RETURNING user_id, aoc_user_id
            "#,
        )
        .bind(to_db(user_id)?)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok::<_, LinkError>(LinkedAccount {
                user_id: from_db(row.try_get("user_id")?),
                aoc_user_id: from_db(row.try_get("aoc_user_id")?),
            })
        })
        .transpose()
    }

    async fn lookup_event_id(&self, user_id: u64) -> Result<Option<u64>, LinkError> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT aoc_user_id FROM linked_accounts WHERE user_id = $1")
                .bind(to_db(user_id)?)
                .fetch_optional(&self.pool)
                .await?;
        Ok(id.map(from_db))
    }

    async fn list_all_links(&self) -> Result<Vec<LinkedAccount>, LinkError> {
        let rows = sqlx::query("SELECT user_id, aoc_user_id FROM linked_accounts ORDER BY user_id")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(LinkedAccount {
                user_id: from_db(row.try_get("user_id")?),
                aoc_user_id: from_db(row.try_get("aoc_user_id")?),
            });
        }
        Ok(out)
    }
}

/// In-process store with the same uniqueness rules as the Postgres table.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    rows: tokio::sync::Mutex<std::collections::BTreeMap<u64, u64>>,
}

#[cfg(any(test, feature = "testing"))]
impl MemoryLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_links(links: impl IntoIterator<Item = (u64, u64)>) -> Self {
        Self {
            rows: tokio::sync::Mutex::new(links.into_iter().collect()),
        }
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl LinkStore for MemoryLinkStore {
    async fn insert_link(&self, user_id: u64, aoc_user_id: u64) -> Result<(), LinkError> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&user_id) {
            return Err(LinkError::UniqueViolation {
                constraint: LinkConstraint::PlatformUser,
            });
        }
        if rows.values().any(|claimed| *claimed == aoc_user_id) {
            return Err(LinkError::UniqueViolation {
                constraint: LinkConstraint::EventUser,
            });
        }
        rows.insert(user_id, aoc_user_id);
        Ok(())
    }

    async fn delete_link(&self, user_id: u64) -> Result<Option<LinkedAccount>, LinkError> {
        Ok(self
            .rows
            .lock()
            .await
            .remove(&user_id)
            .map(|aoc_user_id| LinkedAccount {
                user_id,
                aoc_user_id,
            }))
    }

    async fn lookup_event_id(&self, user_id: u64) -> Result<Option<u64>, LinkError> {
        Ok(self.rows.lock().await.get(&user_id).copied())
    }

    async fn list_all_links(&self) -> Result<Vec<LinkedAccount>, LinkError> {
        Ok(self
            .rows
            .lock()
            .await
            .iter()
            .map(|(user_id, aoc_user_id)| LinkedAccount {
                user_id: *user_id,
                aoc_user_id: *aoc_user_id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_rejects_second_claim_by_same_user() {
        let store = MemoryLinkStore::new();
        store.insert_link(10, 500).await.unwrap();
        let err = store.insert_link(10, 501).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::UniqueViolation {
                constraint: LinkConstraint::PlatformUser
            }
        ));
        assert_eq!(store.lookup_event_id(10).await.unwrap(), Some(500));
    }

    #[tokio::test]
    async fn insert_rejects_already_claimed_event_user() {
        let store = MemoryLinkStore::with_links([(10, 500)]);
        let err = store.insert_link(11, 500).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::UniqueViolation {
                constraint: LinkConstraint::EventUser
            }
        ));
        assert_eq!(store.lookup_event_id(11).await.unwrap(), None);
        assert_eq!(store.list_all_links().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_returns_removed_row_once() {
        let store = MemoryLinkStore::with_links([(10, 500)]);
        let removed = store.delete_link(10).await.unwrap();
        assert_eq!(
            removed,
            Some(LinkedAccount {
                user_id: 10,
                aoc_user_id: 500
            })
        );
        assert_eq!(store.delete_link(10).await.unwrap(), None);
    }

    #[test]
    fn ids_beyond_bigint_are_rejected() {
        assert!(matches!(to_db(u64::MAX), Err(LinkError::IdOutOfRange(_))));
        assert_eq!(to_db(1_179_942_162_511_708_220).unwrap(), 1_179_942_162_511_708_220);
    }
}
