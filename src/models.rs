// src/models.rs
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Hours a presentation stays open for voting after it is created.
pub const VOTING_WINDOW_HOURS: i64 = 48;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown side `{}`", other)),
        }
    }
}

/// A single buy or sell record. `is_real == false` marks a watchlist entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub symbol: String,
    pub name: String,
    pub sector: String,
    pub is_real: bool,
    #[serde(rename = "type")]
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub total_value: f64,
    pub date: NaiveDate,
    pub section: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewTransaction {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default = "default_true")]
    pub is_real: bool,
    #[serde(rename = "type")]
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub section: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct SectionUpdate {
    pub symbol: String,
    pub section: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Presentation {
    pub id: Uuid,
    pub title: String,
    pub link: String,
    pub ticker: String,
    pub action: Side,
    pub presenter: String,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub votes_for: i64,
    pub votes_against: i64,
}

impl Presentation {
    pub fn new(title: String, link: String, ticker: String, action: Side, presenter: String) -> Self {
        let created_at = Utc::now();
        Presentation {
            id: Uuid::new_v4(),
            title,
            link,
            ticker,
            action,
            presenter,
            created_at,
            deadline: created_at + Duration::hours(VOTING_WINDOW_HOURS),
            votes_for: 0,
            votes_against: 0,
        }
    }

    pub fn voting_open_at(&self, now: DateTime<Utc>) -> bool {
        now <= self.deadline
    }
}

#[derive(Debug, Serialize)]
pub struct PresentationView {
    #[serde(flatten)]
    pub presentation: Presentation,
    pub voting_open: bool,
}

impl From<Presentation> for PresentationView {
    fn from(presentation: Presentation) -> Self {
        let voting_open = presentation.voting_open_at(Utc::now());
        PresentationView {
            presentation,
            voting_open,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewPresentation {
    pub title: String,
    pub link: String,
    pub ticker: String,
    pub action: Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteDirection {
    For,
    Against,
}

impl VoteDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteDirection::For => "for",
            VoteDirection::Against => "against",
        }
    }
}

impl FromStr for VoteDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "for" => Ok(VoteDirection::For),
            "against" => Ok(VoteDirection::Against),
            other => Err(format!("unknown vote direction `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub presentation_id: Uuid,
    pub username: String,
    pub direction: VoteDirection,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub vote: VoteDirection,
}

/// Static role hierarchy; the derived ordering is `Guest < Member < Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Member,
    Admin,
}

impl Role {
    pub fn satisfies(self, required: Role) -> bool {
        self >= required
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::Member => "member",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guest" => Ok(Role::Guest),
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role `{}`", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct RoleUpdate {
    pub role: Role,
}

#[derive(Debug, Deserialize)]
pub struct PasswordUpdate {
    pub password: String,
    #[serde(default)]
    pub current_password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub name: String,
    pub content: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl PageContent {
    /// Content served for a page nobody has edited yet.
    pub fn default_for(name: &str) -> Self {
        let content = match name {
            "home" => "Welcome to the investment club dashboard.",
            "about" => "We are a member-run investment club. Pitches are voted on for 48 hours.",
            "rules" => "Members may present buy or sell ideas. One vote per member per presentation.",
            _ => "",
        };
        PageContent {
            name: name.to_string(),
            content: content.to_string(),
            updated_at: None,
            updated_by: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PageUpdate {
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_hierarchy() {
        assert!(Role::Admin.satisfies(Role::Member));
        assert!(Role::Admin.satisfies(Role::Guest));
        assert!(Role::Member.satisfies(Role::Member));
        assert!(!Role::Member.satisfies(Role::Admin));
        assert!(!Role::Guest.satisfies(Role::Member));
    }

    #[test]
    fn presentation_deadline_is_two_days_out() {
        let p = Presentation::new(
            "Buy ACME".into(),
            "https://example.com/deck".into(),
            "ACME".into(),
            Side::Buy,
            "alice".into(),
        );
        assert_eq!(p.deadline - p.created_at, Duration::hours(48));
        assert!(p.voting_open_at(p.created_at + Duration::hours(47)));
        assert!(!p.voting_open_at(p.created_at + Duration::hours(49)));
    }

    #[test]
    fn transaction_serializes_side_as_type() {
        let body = r#"{"symbol":"aapl","type":"sell","quantity":2,"price":150.5}"#;
        let parsed: NewTransaction = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.side, Side::Sell);
        assert!(parsed.is_real);
        assert!(parsed.date.is_none());
    }

    #[test]
    fn user_hash_is_not_serialized() {
        let user = User {
            username: "bob".into(),
            password_hash: "secret".into(),
            role: Role::Member,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["role"], "member");
    }

    #[test]
    fn unknown_pages_default_to_empty() {
        assert!(PageContent::default_for("home").content.contains("Welcome"));
        assert_eq!(PageContent::default_for("misc").content, "");
    }
}
