// src/db/mod.rs
use crate::models::{PageContent, Presentation, Role, Transaction, User, Vote};
use crate::portfolio::{aggregate, Oversold};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod scylla_store;

pub use self::memory::MemoryStore;
pub use self::scylla_store::ScyllaStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("database error: {0}")]
    Backend(String),

    #[error("malformed row: {0}")]
    Malformed(String),

    #[error(transparent)]
    Oversold(#[from] Oversold),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence for every record the dashboard keeps.
///
/// Implementations must make [`Store::cast_vote`], [`Store::insert_user`] and
/// the `*_transaction_checked` methods atomic check-then-write operations.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_transactions(&self) -> Result<Vec<Transaction>>;
    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn insert_transaction(&self, tx: &Transaction) -> Result<()>;
    /// Returns `false` when nothing was deleted.
    async fn delete_transaction(&self, id: Uuid) -> Result<bool>;
    /// Inserts `tx` unless it would oversell its book, in which case it fails
    /// with [`StoreError::Oversold`].
    async fn insert_transaction_checked(&self, tx: &Transaction) -> Result<()>;
    /// Deletes `id` unless a later sell depends on it.
    async fn delete_transaction_checked(&self, id: Uuid) -> Result<bool>;
    /// Relabels every transaction for `symbol`; returns how many were touched.
    async fn set_section(&self, symbol: &str, section: &str) -> Result<usize>;

    async fn list_presentations(&self) -> Result<Vec<Presentation>>;
    async fn get_presentation(&self, id: Uuid) -> Result<Option<Presentation>>;
    async fn insert_presentation(&self, presentation: &Presentation) -> Result<()>;
    async fn delete_presentation(&self, id: Uuid) -> Result<bool>;
    /// Records the vote and bumps the matching counter.
    ///
    /// Fails with [`StoreError::Conflict`] when the user already voted and
    /// [`StoreError::NotFound`] when the presentation does not exist.
    async fn cast_vote(&self, vote: &Vote) -> Result<Presentation>;

    async fn list_users(&self) -> Result<Vec<User>>;
    async fn get_user(&self, username: &str) -> Result<Option<User>>;
    /// Fails with [`StoreError::Conflict`] when the username is taken.
    async fn insert_user(&self, user: &User) -> Result<()>;
    async fn update_role(&self, username: &str, role: Role) -> Result<bool>;
    async fn update_password(&self, username: &str, password_hash: &str) -> Result<bool>;
    async fn delete_user(&self, username: &str) -> Result<bool>;

    async fn get_page(&self, name: &str) -> Result<Option<PageContent>>;
    async fn put_page(&self, page: &PageContent) -> Result<()>;

    async fn transactions_for(&self, symbol: &str) -> Result<Vec<Transaction>> {
        Ok(self
            .list_transactions()
            .await?
            .into_iter()
            .filter(|tx| tx.symbol == symbol)
            .collect())
    }
}

/// Replays the symbol's log with `tx` appended, then inserts it. Callers
/// serialise writes per symbol around this.
pub(crate) async fn replay_and_insert<S>(store: &S, tx: &Transaction) -> Result<()>
where
    S: Store + ?Sized,
{
    let mut log = store.transactions_for(&tx.symbol).await?;
    log.push(tx.clone());
    aggregate(&log)?;
    store.insert_transaction(tx).await
}

pub(crate) async fn replay_and_delete<S>(store: &S, symbol: &str, id: Uuid) -> Result<bool>
where
    S: Store + ?Sized,
{
    let remaining: Vec<Transaction> = store
        .transactions_for(symbol)
        .await?
        .into_iter()
        .filter(|tx| tx.id != id)
        .collect();
    aggregate(&remaining)?;
    store.delete_transaction(id).await
}
