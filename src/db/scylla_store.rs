// src/db/scylla_store.rs
use super::{replay_and_delete, replay_and_insert, Result, Store, StoreError};
use crate::models::{
    PageContent, Presentation, Role, Side, Transaction, User, Vote, VoteDirection,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use scylla::frame::response::result::{CqlValue, Row};
use scylla::{Session, SessionBuilder};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Columns added after the first release, applied in order at start-up.
const COLUMN_MIGRATIONS: &[(&str, &str, &str)] = &[
    ("transactions", "sector", "TEXT"),
    ("transactions", "section", "TEXT"),
    ("presentations", "action", "TEXT"),
];

/// A crashed holder's lease on a symbol expires after this long.
const LOCK_TTL_SECS: u32 = 10;
const LOCK_ATTEMPTS: u32 = 20;
const LOCK_RETRY: Duration = Duration::from_millis(50);

pub struct ScyllaStore {
    session: Session,
    keyspace: String,
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// ALTER TABLE ... ADD fails this way when the column is already there.
fn is_existing_column_error(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("conflicts with an existing column") || message.contains("already exists")
}

impl ScyllaStore {
    pub async fn connect(node: &str, keyspace: &str) -> Result<Self> {
        let session = SessionBuilder::new()
            .known_node(node)
            .build()
            .await
            .map_err(backend)?;
        let store = ScyllaStore {
            session,
            keyspace: keyspace.to_string(),
        };
        store.init_schema().await?;
        info!("Successfully connected to ScyllaDB at {}.", node);
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let ks = &self.keyspace;
        let statements = [
            format!("CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': 1}}", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.transactions (id TEXT PRIMARY KEY, symbol TEXT, name TEXT, is_real BOOLEAN, side TEXT, quantity DOUBLE, price DOUBLE, total_value DOUBLE, date TEXT, created_by TEXT, created_at BIGINT)", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.presentations (id TEXT PRIMARY KEY, title TEXT, link TEXT, ticker TEXT, presenter TEXT, created_at BIGINT, deadline BIGINT)", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.votes (presentation_id TEXT, username TEXT, direction TEXT, cast_at BIGINT, PRIMARY KEY (presentation_id, username))", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.vote_counts (presentation_id TEXT PRIMARY KEY, votes_for COUNTER, votes_against COUNTER)", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.users (username TEXT PRIMARY KEY, password_hash TEXT, role TEXT, created_at BIGINT)", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.pages (name TEXT PRIMARY KEY, content TEXT, updated_at BIGINT, updated_by TEXT)", ks),
            format!("CREATE TABLE IF NOT EXISTS {}.symbol_locks (symbol TEXT PRIMARY KEY, holder TEXT)", ks),
        ];
        for statement in statements.iter() {
            self.session
                .query(statement.as_str(), &[])
                .await
                .map_err(backend)?;
        }

        for (table, column, kind) in COLUMN_MIGRATIONS {
            let statement = format!("ALTER TABLE {}.{} ADD {} {}", ks, table, column, kind);
            match self.session.query(statement, &[]).await {
                Ok(_) => info!("Added column {}.{}", table, column),
                Err(e) if is_existing_column_error(&e.to_string()) => {}
                Err(e) => {
                    warn!("Migration of {}.{} failed: {}", table, column, e);
                    return Err(backend(e));
                }
            }
        }
        Ok(())
    }

    async fn rows<V>(&self, cql: String, values: V) -> Result<Vec<Row>>
    where
        V: scylla::frame::value::ValueList,
    {
        let result = self.session.query(cql, values).await.map_err(backend)?;
        Ok(result.rows.unwrap_or_default())
    }

    /// Runs a lightweight transaction and reports its `[applied]` column.
    async fn applied<V>(&self, cql: String, values: V) -> Result<bool>
    where
        V: scylla::frame::value::ValueList,
    {
        let rows = self.rows(cql, values).await?;
        Ok(rows
            .first()
            .and_then(|row| row.columns.first())
            .and_then(|c| c.as_ref())
            .and_then(|c| c.as_boolean())
            .unwrap_or(false))
    }

    /// Takes the per-symbol lease row that serialises checked transaction
    /// writes. Returns the holder id needed to release it.
    async fn lock_symbol(&self, symbol: &str) -> Result<String> {
        let holder = Uuid::new_v4().to_string();
        let cql = format!(
            "INSERT INTO {}.symbol_locks (symbol, holder) VALUES (?, ?) IF NOT EXISTS USING TTL {}",
            self.keyspace, LOCK_TTL_SECS
        );
        for _ in 0..LOCK_ATTEMPTS {
            if self.applied(cql.clone(), (symbol, holder.as_str())).await? {
                return Ok(holder);
            }
            tokio::time::sleep(LOCK_RETRY).await;
        }
        Err(StoreError::Conflict(format!(
            "{} is being updated by another request, try again",
            symbol
        )))
    }

    async fn unlock_symbol(&self, symbol: &str, holder: &str) {
        let cql = format!(
            "DELETE FROM {}.symbol_locks WHERE symbol = ? IF holder = ?",
            self.keyspace
        );
        if let Err(e) = self.applied(cql, (symbol, holder)).await {
            warn!("Failed to release lock on {}: {}", symbol, e);
        }
    }

    async fn vote_counts(&self) -> Result<HashMap<String, (i64, i64)>> {
        let rows = self
            .rows(
                format!(
                    "SELECT presentation_id, votes_for, votes_against FROM {}.vote_counts",
                    self.keyspace
                ),
                &[],
            )
            .await?;
        let mut counts = HashMap::new();
        for row in rows {
            counts.insert(text(&row, 0, "presentation_id")?, (counter(&row, 1), counter(&row, 2)));
        }
        Ok(counts)
    }

    async fn vote_count(&self, id: &str) -> Result<(i64, i64)> {
        let rows = self
            .rows(
                format!(
                    "SELECT votes_for, votes_against FROM {}.vote_counts WHERE presentation_id = ?",
                    self.keyspace
                ),
                (id,),
            )
            .await?;
        Ok(rows
            .first()
            .map(|row| (counter(row, 0), counter(row, 1)))
            .unwrap_or((0, 0)))
    }
}

fn column<'a>(row: &'a Row, idx: usize, name: &str) -> Result<&'a CqlValue> {
    row.columns
        .get(idx)
        .and_then(|c| c.as_ref())
        .ok_or_else(|| StoreError::Malformed(format!("missing column {}", name)))
}

fn text(row: &Row, idx: usize, name: &str) -> Result<String> {
    column(row, idx, name)?
        .as_text()
        .cloned()
        .ok_or_else(|| StoreError::Malformed(format!("{} is not text", name)))
}

/// Text columns added by a migration are null on older rows.
fn text_or_default(row: &Row, idx: usize) -> String {
    row.columns
        .get(idx)
        .and_then(|c| c.as_ref())
        .and_then(|c| c.as_text())
        .cloned()
        .unwrap_or_default()
}

fn double(row: &Row, idx: usize, name: &str) -> Result<f64> {
    column(row, idx, name)?
        .as_double()
        .ok_or_else(|| StoreError::Malformed(format!("{} is not a double", name)))
}

fn boolean(row: &Row, idx: usize, name: &str) -> Result<bool> {
    column(row, idx, name)?
        .as_boolean()
        .ok_or_else(|| StoreError::Malformed(format!("{} is not a boolean", name)))
}

fn counter(row: &Row, idx: usize) -> i64 {
    match row.columns.get(idx) {
        Some(Some(CqlValue::Counter(c))) => c.0,
        _ => 0,
    }
}

fn timestamp(row: &Row, idx: usize, name: &str) -> Result<DateTime<Utc>> {
    let millis = column(row, idx, name)?
        .as_bigint()
        .ok_or_else(|| StoreError::Malformed(format!("{} is not a bigint", name)))?;
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::Malformed(format!("{} out of range", name)))
}

fn optional_timestamp(row: &Row, idx: usize) -> Option<DateTime<Utc>> {
    row.columns
        .get(idx)
        .and_then(|c| c.as_ref())
        .and_then(|c| c.as_bigint())
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

fn uuid(row: &Row, idx: usize, name: &str) -> Result<Uuid> {
    let raw = text(row, idx, name)?;
    Uuid::parse_str(&raw).map_err(|e| StoreError::Malformed(format!("{}: {}", name, e)))
}

fn parsed<T: std::str::FromStr<Err = String>>(row: &Row, idx: usize, name: &str) -> Result<T> {
    text(row, idx, name)?
        .parse::<T>()
        .map_err(StoreError::Malformed)
}

const TRANSACTION_COLUMNS: &str =
    "id, symbol, name, sector, is_real, side, quantity, price, total_value, date, section, created_by, created_at";

fn transaction_from_row(row: &Row) -> Result<Transaction> {
    let date = text(row, 9, "date")?;
    Ok(Transaction {
        id: uuid(row, 0, "id")?,
        symbol: text(row, 1, "symbol")?,
        name: text_or_default(row, 2),
        sector: text_or_default(row, 3),
        is_real: boolean(row, 4, "is_real")?,
        side: parsed(row, 5, "side")?,
        quantity: double(row, 6, "quantity")?,
        price: double(row, 7, "price")?,
        total_value: double(row, 8, "total_value")?,
        date: date
            .parse::<NaiveDate>()
            .map_err(|e| StoreError::Malformed(format!("date: {}", e)))?,
        section: text_or_default(row, 10),
        created_by: text_or_default(row, 11),
        created_at: timestamp(row, 12, "created_at")?,
    })
}

const PRESENTATION_COLUMNS: &str = "id, title, link, ticker, action, presenter, created_at, deadline";

fn presentation_from_row(row: &Row, counts: (i64, i64)) -> Result<Presentation> {
    Ok(Presentation {
        id: uuid(row, 0, "id")?,
        title: text(row, 1, "title")?,
        link: text_or_default(row, 2),
        ticker: text(row, 3, "ticker")?,
        // Rows written before the action column existed were all buy pitches.
        action: text_or_default(row, 4).parse().unwrap_or(Side::Buy),
        presenter: text_or_default(row, 5),
        created_at: timestamp(row, 6, "created_at")?,
        deadline: timestamp(row, 7, "deadline")?,
        votes_for: counts.0,
        votes_against: counts.1,
    })
}

fn user_from_row(row: &Row) -> Result<User> {
    Ok(User {
        username: text(row, 0, "username")?,
        password_hash: text(row, 1, "password_hash")?,
        role: parsed::<Role>(row, 2, "role")?,
        created_at: timestamp(row, 3, "created_at")?,
    })
}

#[async_trait]
impl Store for ScyllaStore {
    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let rows = self
            .rows(
                format!("SELECT {} FROM {}.transactions", TRANSACTION_COLUMNS, self.keyspace),
                &[],
            )
            .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        let rows = self
            .rows(
                format!(
                    "SELECT {} FROM {}.transactions WHERE id = ?",
                    TRANSACTION_COLUMNS, self.keyspace
                ),
                (id.to_string(),),
            )
            .await?;
        rows.first().map(transaction_from_row).transpose()
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let cql = format!(
            "INSERT INTO {}.transactions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.keyspace, TRANSACTION_COLUMNS
        );
        self.session
            .query(
                cql,
                (
                    tx.id.to_string(),
                    tx.symbol.as_str(),
                    tx.name.as_str(),
                    tx.sector.as_str(),
                    tx.is_real,
                    tx.side.as_str(),
                    tx.quantity,
                    tx.price,
                    tx.total_value,
                    tx.date.to_string(),
                    tx.section.as_str(),
                    tx.created_by.as_str(),
                    tx.created_at.timestamp_millis(),
                ),
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<bool> {
        self.applied(
            format!("DELETE FROM {}.transactions WHERE id = ? IF EXISTS", self.keyspace),
            (id.to_string(),),
        )
        .await
    }

    async fn insert_transaction_checked(&self, tx: &Transaction) -> Result<()> {
        let holder = self.lock_symbol(&tx.symbol).await?;
        let result = replay_and_insert(self, tx).await;
        self.unlock_symbol(&tx.symbol, &holder).await;
        result
    }

    async fn delete_transaction_checked(&self, id: Uuid) -> Result<bool> {
        let symbol = match self.get_transaction(id).await? {
            Some(tx) => tx.symbol,
            None => return Ok(false),
        };
        let holder = self.lock_symbol(&symbol).await?;
        let result = replay_and_delete(self, &symbol, id).await;
        self.unlock_symbol(&symbol, &holder).await;
        result
    }

    async fn set_section(&self, symbol: &str, section: &str) -> Result<usize> {
        let ids: Vec<Uuid> = self
            .transactions_for(symbol)
            .await?
            .into_iter()
            .map(|tx| tx.id)
            .collect();
        let cql = format!(
            "UPDATE {}.transactions SET section = ? WHERE id = ?",
            self.keyspace
        );
        for id in &ids {
            self.session
                .query(cql.as_str(), (section, id.to_string()))
                .await
                .map_err(backend)?;
        }
        Ok(ids.len())
    }

    async fn list_presentations(&self) -> Result<Vec<Presentation>> {
        let counts = self.vote_counts().await?;
        let rows = self
            .rows(
                format!("SELECT {} FROM {}.presentations", PRESENTATION_COLUMNS, self.keyspace),
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| {
                let id = text(row, 0, "id")?;
                presentation_from_row(row, counts.get(&id).copied().unwrap_or((0, 0)))
            })
            .collect()
    }

    async fn get_presentation(&self, id: Uuid) -> Result<Option<Presentation>> {
        let key = id.to_string();
        let rows = self
            .rows(
                format!(
                    "SELECT {} FROM {}.presentations WHERE id = ?",
                    PRESENTATION_COLUMNS, self.keyspace
                ),
                (key.as_str(),),
            )
            .await?;
        match rows.first() {
            Some(row) => {
                let counts = self.vote_count(&key).await?;
                presentation_from_row(row, counts).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn insert_presentation(&self, p: &Presentation) -> Result<()> {
        let cql = format!(
            "INSERT INTO {}.presentations ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            self.keyspace, PRESENTATION_COLUMNS
        );
        self.session
            .query(
                cql,
                (
                    p.id.to_string(),
                    p.title.as_str(),
                    p.link.as_str(),
                    p.ticker.as_str(),
                    p.action.as_str(),
                    p.presenter.as_str(),
                    p.created_at.timestamp_millis(),
                    p.deadline.timestamp_millis(),
                ),
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_presentation(&self, id: Uuid) -> Result<bool> {
        let key = id.to_string();
        let existed = self
            .applied(
                format!("DELETE FROM {}.presentations WHERE id = ? IF EXISTS", self.keyspace),
                (key.as_str(),),
            )
            .await?;
        if existed {
            for table in ["votes", "vote_counts"] {
                let cql = format!(
                    "DELETE FROM {}.{} WHERE presentation_id = ?",
                    self.keyspace, table
                );
                self.session
                    .query(cql, (key.as_str(),))
                    .await
                    .map_err(backend)?;
            }
        }
        Ok(existed)
    }

    async fn cast_vote(&self, vote: &Vote) -> Result<Presentation> {
        if self.get_presentation(vote.presentation_id).await?.is_none() {
            return Err(StoreError::NotFound("presentation".to_string()));
        }
        let key = vote.presentation_id.to_string();
        let inserted = self
            .applied(
                format!(
                    "INSERT INTO {}.votes (presentation_id, username, direction, cast_at) VALUES (?, ?, ?, ?) IF NOT EXISTS",
                    self.keyspace
                ),
                (
                    key.as_str(),
                    vote.username.as_str(),
                    vote.direction.as_str(),
                    vote.cast_at.timestamp_millis(),
                ),
            )
            .await?;
        if !inserted {
            return Err(StoreError::Conflict(
                "You have already voted on this presentation".to_string(),
            ));
        }

        let column = match vote.direction {
            VoteDirection::For => "votes_for",
            VoteDirection::Against => "votes_against",
        };
        let cql = format!(
            "UPDATE {}.vote_counts SET {} = {} + 1 WHERE presentation_id = ?",
            self.keyspace, column, column
        );
        self.session
            .query(cql, (key.as_str(),))
            .await
            .map_err(backend)?;

        self.get_presentation(vote.presentation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound("presentation".to_string()))
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let rows = self
            .rows(
                format!(
                    "SELECT username, password_hash, role, created_at FROM {}.users",
                    self.keyspace
                ),
                &[],
            )
            .await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let rows = self
            .rows(
                format!(
                    "SELECT username, password_hash, role, created_at FROM {}.users WHERE username = ?",
                    self.keyspace
                ),
                (username,),
            )
            .await?;
        rows.first().map(user_from_row).transpose()
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let inserted = self
            .applied(
                format!(
                    "INSERT INTO {}.users (username, password_hash, role, created_at) VALUES (?, ?, ?, ?) IF NOT EXISTS",
                    self.keyspace
                ),
                (
                    user.username.as_str(),
                    user.password_hash.as_str(),
                    user.role.as_str(),
                    user.created_at.timestamp_millis(),
                ),
            )
            .await?;
        if inserted {
            Ok(())
        } else {
            Err(StoreError::Conflict(format!(
                "Username `{}` is already taken",
                user.username
            )))
        }
    }

    async fn update_role(&self, username: &str, role: Role) -> Result<bool> {
        self.applied(
            format!(
                "UPDATE {}.users SET role = ? WHERE username = ? IF EXISTS",
                self.keyspace
            ),
            (role.as_str(), username),
        )
        .await
    }

    async fn update_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        self.applied(
            format!(
                "UPDATE {}.users SET password_hash = ? WHERE username = ? IF EXISTS",
                self.keyspace
            ),
            (password_hash, username),
        )
        .await
    }

    async fn delete_user(&self, username: &str) -> Result<bool> {
        self.applied(
            format!("DELETE FROM {}.users WHERE username = ? IF EXISTS", self.keyspace),
            (username,),
        )
        .await
    }

    async fn get_page(&self, name: &str) -> Result<Option<PageContent>> {
        let rows = self
            .rows(
                format!(
                    "SELECT name, content, updated_at, updated_by FROM {}.pages WHERE name = ?",
                    self.keyspace
                ),
                (name,),
            )
            .await?;
        match rows.first() {
            Some(row) => Ok(Some(PageContent {
                name: text(row, 0, "name")?,
                content: text_or_default(row, 1),
                updated_at: optional_timestamp(row, 2),
                updated_by: row
                    .columns
                    .get(3)
                    .and_then(|c| c.as_ref())
                    .and_then(|c| c.as_text())
                    .cloned(),
            })),
            None => Ok(None),
        }
    }

    async fn put_page(&self, page: &PageContent) -> Result<()> {
        let cql = format!(
            "INSERT INTO {}.pages (name, content, updated_at, updated_by) VALUES (?, ?, ?, ?)",
            self.keyspace
        );
        self.session
            .query(
                cql,
                (
                    page.name.as_str(),
                    page.content.as_str(),
                    page.updated_at.map(|t| t.timestamp_millis()),
                    page.updated_by.as_deref(),
                ),
            )
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_existing_column_errors() {
        assert!(is_existing_column_error(
            "Invalid column name section because it conflicts with an existing column"
        ));
        assert!(is_existing_column_error("Column sector already exists"));
        assert!(!is_existing_column_error("Keyspace club does not exist"));
    }

    #[test]
    fn reads_rows_written_before_migrations() {
        let row = Row {
            columns: vec![
                Some(CqlValue::Text(Uuid::nil().to_string())),
                Some(CqlValue::Text("ACME".to_string())),
                Some(CqlValue::Text("Acme Corp".to_string())),
                None,
                Some(CqlValue::Boolean(true)),
                Some(CqlValue::Text("buy".to_string())),
                Some(CqlValue::Double(10.0)),
                Some(CqlValue::Double(2.5)),
                Some(CqlValue::Double(25.0)),
                Some(CqlValue::Text("2024-03-01".to_string())),
                None,
                Some(CqlValue::Text("alice".to_string())),
                Some(CqlValue::BigInt(1_709_294_400_000)),
            ],
        };
        let tx = transaction_from_row(&row).unwrap();
        assert_eq!(tx.symbol, "ACME");
        assert_eq!(tx.sector, "");
        assert_eq!(tx.section, "");
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn malformed_rows_are_reported() {
        let row = Row {
            columns: vec![Some(CqlValue::Text("not-a-uuid".to_string()))],
        };
        assert!(matches!(
            transaction_from_row(&row),
            Err(StoreError::Malformed(_))
        ));
    }
}
