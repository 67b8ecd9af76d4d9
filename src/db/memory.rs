// src/db/memory.rs
//! In-process document store. Used by the test suite and by
//! `STORE_BACKEND=memory` deployments where nothing needs to survive a restart.

use super::{Result, Store, StoreError};
use crate::models::{PageContent, Presentation, Role, Transaction, User, Vote, VoteDirection};
use crate::portfolio::aggregate;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    transactions: HashMap<Uuid, Transaction>,
    presentations: HashMap<Uuid, Presentation>,
    votes: HashSet<(Uuid, String)>,
    users: HashMap<String, User>,
    pages: HashMap<String, PageContent>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        let tables = self.tables.read().await;
        Ok(tables.transactions.values().cloned().collect())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>> {
        Ok(self.tables.read().await.transactions.get(&id).cloned())
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn delete_transaction(&self, id: Uuid) -> Result<bool> {
        Ok(self.tables.write().await.transactions.remove(&id).is_some())
    }

    async fn insert_transaction_checked(&self, tx: &Transaction) -> Result<()> {
        let mut tables = self.tables.write().await;
        let mut log: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|other| other.symbol == tx.symbol)
            .cloned()
            .collect();
        log.push(tx.clone());
        aggregate(&log)?;
        tables.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn delete_transaction_checked(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let symbol = match tables.transactions.get(&id) {
            Some(tx) => tx.symbol.clone(),
            None => return Ok(false),
        };
        let remaining: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|tx| tx.symbol == symbol && tx.id != id)
            .cloned()
            .collect();
        aggregate(&remaining)?;
        Ok(tables.transactions.remove(&id).is_some())
    }

    async fn set_section(&self, symbol: &str, section: &str) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;
        for tx in tables.transactions.values_mut().filter(|tx| tx.symbol == symbol) {
            tx.section = section.to_string();
            touched += 1;
        }
        Ok(touched)
    }

    async fn list_presentations(&self) -> Result<Vec<Presentation>> {
        Ok(self.tables.read().await.presentations.values().cloned().collect())
    }

    async fn get_presentation(&self, id: Uuid) -> Result<Option<Presentation>> {
        Ok(self.tables.read().await.presentations.get(&id).cloned())
    }

    async fn insert_presentation(&self, presentation: &Presentation) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .presentations
            .insert(presentation.id, presentation.clone());
        Ok(())
    }

    async fn delete_presentation(&self, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        tables.votes.retain(|(presentation_id, _)| *presentation_id != id);
        Ok(tables.presentations.remove(&id).is_some())
    }

    async fn cast_vote(&self, vote: &Vote) -> Result<Presentation> {
        // The write lock spans the check and both writes.
        let mut tables = self.tables.write().await;
        if !tables.presentations.contains_key(&vote.presentation_id) {
            return Err(StoreError::NotFound("presentation".to_string()));
        }
        if !tables
            .votes
            .insert((vote.presentation_id, vote.username.clone()))
        {
            return Err(StoreError::Conflict(
                "You have already voted on this presentation".to_string(),
            ));
        }
        let presentation = tables
            .presentations
            .get_mut(&vote.presentation_id)
            .ok_or_else(|| StoreError::NotFound("presentation".to_string()))?;
        match vote.direction {
            VoteDirection::For => presentation.votes_for += 1,
            VoteDirection::Against => presentation.votes_against += 1,
        }
        Ok(presentation.clone())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        Ok(self.tables.read().await.users.values().cloned().collect())
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(username).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.users.contains_key(&user.username) {
            return Err(StoreError::Conflict(format!(
                "Username `{}` is already taken",
                user.username
            )));
        }
        tables.users.insert(user.username.clone(), user.clone());
        Ok(())
    }

    async fn update_role(&self, username: &str, role: Role) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.users.get_mut(username) {
            Some(user) => {
                user.role = role;
                true
            }
            None => false,
        })
    }

    async fn update_password(&self, username: &str, password_hash: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        Ok(match tables.users.get_mut(username) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                true
            }
            None => false,
        })
    }

    async fn delete_user(&self, username: &str) -> Result<bool> {
        Ok(self.tables.write().await.users.remove(username).is_some())
    }

    async fn get_page(&self, name: &str) -> Result<Option<PageContent>> {
        Ok(self.tables.read().await.pages.get(name).cloned())
    }

    async fn put_page(&self, page: &PageContent) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.pages.insert(page.name.clone(), page.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use chrono::{NaiveDate, Utc};
    use std::sync::Arc;

    fn trade(side: Side, quantity: f64, day: u32) -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            symbol: "ACME".into(),
            name: "Acme Corp".into(),
            sector: String::new(),
            is_real: true,
            side,
            quantity,
            price: 10.0,
            total_value: quantity * 10.0,
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            section: String::new(),
            created_by: "alice".into(),
            created_at: Utc::now(),
        }
    }

    fn vote(presentation_id: Uuid, username: &str, direction: VoteDirection) -> Vote {
        Vote {
            presentation_id,
            username: username.to_string(),
            direction,
            cast_at: Utc::now(),
        }
    }

    async fn store_with_presentation() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let p = Presentation::new(
            "Sell ACME".into(),
            "https://example.com".into(),
            "ACME".into(),
            Side::Sell,
            "alice".into(),
        );
        store.insert_presentation(&p).await.unwrap();
        (store, p.id)
    }

    #[tokio::test]
    async fn second_vote_conflicts() {
        let (store, id) = store_with_presentation().await;
        let p = store
            .cast_vote(&vote(id, "bob", VoteDirection::For))
            .await
            .unwrap();
        assert_eq!((p.votes_for, p.votes_against), (1, 0));

        let err = store
            .cast_vote(&vote(id, "bob", VoteDirection::Against))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let p = store
            .cast_vote(&vote(id, "carol", VoteDirection::Against))
            .await
            .unwrap();
        assert_eq!((p.votes_for, p.votes_against), (1, 1));
    }

    #[tokio::test]
    async fn concurrent_double_submission_counts_once() {
        let (store, id) = store_with_presentation().await;
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.cast_vote(&vote(id, "bob", VoteDirection::For)).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        let p = store.get_presentation(id).await.unwrap().unwrap();
        assert_eq!(p.votes_for, 1);
    }

    #[tokio::test]
    async fn concurrent_sells_never_exceed_holdings() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_transaction_checked(&trade(Side::Buy, 10.0, 1))
            .await
            .unwrap();
        let mut handles = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert_transaction_checked(&trade(Side::Sell, 1.0, 2)).await
            }));
        }
        let mut accepted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => accepted += 1,
                Err(e) => assert!(matches!(e, StoreError::Oversold(_))),
            }
        }
        assert_eq!(accepted, 10);
        let log = store.list_transactions().await.unwrap();
        assert_eq!(log.len(), 11);
        assert!(aggregate(&log).unwrap().holdings.is_empty());
    }

    #[tokio::test]
    async fn checked_delete_keeps_the_log_consistent() {
        let store = MemoryStore::new();
        let buy = trade(Side::Buy, 5.0, 1);
        let sell = trade(Side::Sell, 5.0, 2);
        store.insert_transaction_checked(&buy).await.unwrap();
        store.insert_transaction_checked(&sell).await.unwrap();

        let err = store.delete_transaction_checked(buy.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Oversold(_)));
        assert!(store.delete_transaction_checked(sell.id).await.unwrap());
        assert!(store.delete_transaction_checked(buy.id).await.unwrap());
        assert!(!store.delete_transaction_checked(buy.id).await.unwrap());
    }

    #[tokio::test]
    async fn vote_on_missing_presentation() {
        let store = MemoryStore::new();
        let err = store
            .cast_vote(&vote(Uuid::new_v4(), "bob", VoteDirection::For))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn deleting_a_presentation_drops_its_votes() {
        let (store, id) = store_with_presentation().await;
        store
            .cast_vote(&vote(id, "bob", VoteDirection::For))
            .await
            .unwrap();
        assert!(store.delete_presentation(id).await.unwrap());
        assert!(store.tables.read().await.votes.is_empty());
        assert!(!store.delete_presentation(id).await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_usernames_conflict() {
        let store = MemoryStore::new();
        let user = User {
            username: "bob".into(),
            password_hash: "x".into(),
            role: Role::Guest,
            created_at: Utc::now(),
        };
        store.insert_user(&user).await.unwrap();
        assert!(matches!(
            store.insert_user(&user).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.update_role("bob", Role::Member).await.unwrap());
        assert!(!store.update_role("nobody", Role::Member).await.unwrap());
        assert_eq!(
            store.get_user("bob").await.unwrap().unwrap().role,
            Role::Member
        );
    }
}
