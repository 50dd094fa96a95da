//! Local identity and session service.
//!
//! Accounts are student email addresses on the school domain; the local part
//! is the student number, which also fixes the student's grade through the
//! configured cohort prefixes.

use crate::config::AppConfig;
use crate::store::{self, Collection, Record};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("email must end with @{0}")]
    BadEmailDomain(String),
    #[error("cannot determine grade for student number {0}")]
    UnknownCohort(String),
    #[error("unknown specialty: {0}")]
    UnknownSpecialty(String),
    #[error("password must be at least {0} characters")]
    WeakPassword(usize),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("an account already exists for {0}")]
    AccountExists(String),
    #[error("not signed in")]
    NotSignedIn,
    #[error("admin role required")]
    Forbidden,
    #[error("no profile for {0}")]
    MissingProfile(String),
    #[error(transparent)]
    Store(#[from] store::StoreError),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub token: String,
    pub email: String,
    pub nv_number: String,
    pub signed_in_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub nv_number: String,
    pub grade: i64,
    pub specialty: String,
    pub class: String,
    pub role: String,
}

impl UserProfile {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }

    fn from_record(r: &Record) -> Option<Self> {
        Some(Self {
            nv_number: r.get("nv_number")?.as_str()?.to_string(),
            grade: r.get("grade")?.as_i64()?,
            specialty: r.get("specialty")?.as_str()?.to_string(),
            class: r.get("class")?.as_str()?.to_string(),
            role: r
                .get("role")
                .and_then(|v| v.as_str())
                .unwrap_or(ROLE_USER)
                .to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut { nv_number: String },
}

type Listener = Box<dyn Fn(&AuthEvent) + Send>;

/// Student identity derived from a school email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentId {
    pub email: String,
    pub nv_number: String,
    pub grade: i64,
}

pub fn parse_student_email(cfg: &AppConfig, email: &str) -> Result<StudentId, AuthError> {
    let email = email.trim().to_lowercase();
    let suffix = format!("@{}", cfg.auth.email_domain.to_lowercase());
    let Some(local) = email.strip_suffix(&suffix) else {
        return Err(AuthError::BadEmailDomain(cfg.auth.email_domain.clone()));
    };
    if local.is_empty() || local.contains('@') {
        return Err(AuthError::BadEmailDomain(cfg.auth.email_domain.clone()));
    }
    // Longest prefix wins so "nv2" never shadows "nv22".
    let grade = cfg
        .auth
        .cohorts
        .iter()
        .filter(|(prefix, _)| local.starts_with(prefix.as_str()))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, g)| *g)
        .ok_or_else(|| AuthError::UnknownCohort(local.to_string()))?;
    Ok(StudentId {
        nv_number: local.to_string(),
        email,
        grade,
    })
}

/// `"{grade}.{code}"`, the class key used by presets and timetables.
pub fn class_key(cfg: &AppConfig, grade: i64, specialty: &str) -> Result<String, AuthError> {
    let s = cfg
        .specialty_by_name(specialty)
        .ok_or_else(|| AuthError::UnknownSpecialty(specialty.to_string()))?;
    Ok(format!("{}.{}", grade, s.code))
}

pub fn hash_password(salt: &str, password: &str) -> String {
    let mut h = Sha256::new();
    h.update(salt.as_bytes());
    h.update(b":");
    h.update(password.as_bytes());
    h.finalize().iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn fetch_profile(conn: &Connection, nv_number: &str) -> Result<Option<UserProfile>, AuthError> {
    let row = store::select_one(conn, Collection::UserSpecialties, &store::eq("nv_number", nv_number))?;
    Ok(row.as_ref().and_then(UserProfile::from_record))
}

fn check_password(cfg: &AppConfig, password: &str) -> Result<(), AuthError> {
    if password.chars().count() < cfg.auth.min_password_length {
        return Err(AuthError::WeakPassword(cfg.auth.min_password_length));
    }
    Ok(())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Default)]
pub struct AuthService {
    session: Option<Session>,
    listeners: Vec<Listener>,
}

impl AuthService {
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn on_auth_change(&mut self, listener: impl Fn(&AuthEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&self, event: AuthEvent) {
        for l in &self.listeners {
            l(&event);
        }
    }

    /// Creates the account and its profile row, then signs in.
    pub fn sign_up(
        &mut self,
        conn: &Connection,
        cfg: &AppConfig,
        email: &str,
        password: &str,
        specialty: &str,
    ) -> Result<(Session, UserProfile), AuthError> {
        let id = parse_student_email(cfg, email)?;
        check_password(cfg, password)?;
        let class = class_key(cfg, id.grade, specialty)?;

        let exists: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM accounts WHERE email = ? OR nv_number = ?",
                (&id.email, &id.nv_number),
                |r| r.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(AuthError::AccountExists(id.email));
        }

        let role = if cfg.auth.bootstrap_admins.iter().any(|a| a == &id.nv_number) {
            ROLE_ADMIN
        } else {
            ROLE_USER
        };
        let profile = UserProfile {
            nv_number: id.nv_number.clone(),
            grade: id.grade,
            specialty: specialty.to_string(),
            class,
            role: role.to_string(),
        };

        let salt = Uuid::new_v4().to_string();
        let tx = conn.unchecked_transaction()?;
        // Profiles may predate the account (admin-created); keep theirs.
        if fetch_profile(&tx, &id.nv_number)?.is_none() {
            let mut rec = Record::new();
            rec.insert("nv_number".into(), profile.nv_number.clone().into());
            rec.insert("grade".into(), profile.grade.into());
            rec.insert("specialty".into(), profile.specialty.clone().into());
            rec.insert("class".into(), profile.class.clone().into());
            rec.insert("role".into(), profile.role.clone().into());
            store::insert(&tx, Collection::UserSpecialties, &rec)?;
        }
        tx.execute(
            "INSERT INTO accounts(email, nv_number, password_salt, password_hash, created_at)
             VALUES(?, ?, ?, ?, ?)",
            (
                &id.email,
                &id.nv_number,
                &salt,
                hash_password(&salt, password),
                now_rfc3339(),
            ),
        )?;
        tx.commit()?;

        tracing::info!(nv_number = %id.nv_number, role, "account created");
        let session = self.sign_in(conn, cfg, &id.email, password)?;
        let profile = fetch_profile(conn, &id.nv_number)?.unwrap_or(profile);
        Ok((session, profile))
    }

    pub fn sign_in(
        &mut self,
        conn: &Connection,
        cfg: &AppConfig,
        email: &str,
        password: &str,
    ) -> Result<Session, AuthError> {
        let email = email.trim().to_lowercase();
        let row: Option<(String, String, String)> = conn
            .query_row(
                "SELECT nv_number, password_salt, password_hash FROM accounts WHERE email = ?",
                [&email],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((nv_number, salt, hash)) = row else {
            return Err(AuthError::InvalidCredentials);
        };
        if hash_password(&salt, password) != hash {
            tracing::warn!(%nv_number, "sign-in rejected");
            return Err(AuthError::InvalidCredentials);
        }
        // Keep the domain check so accounts survive config changes consistently.
        parse_student_email(cfg, &email)?;

        if self.session.is_some() {
            self.sign_out();
        }
        let session = Session {
            token: Uuid::new_v4().to_string(),
            email,
            nv_number,
            signed_in_at: now_rfc3339(),
        };
        self.session = Some(session.clone());
        tracing::info!(nv_number = %session.nv_number, "signed in");
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    /// Returns whether a session was open.
    pub fn sign_out(&mut self) -> bool {
        match self.session.take() {
            Some(s) => {
                tracing::info!(nv_number = %s.nv_number, "signed out");
                self.emit(AuthEvent::SignedOut {
                    nv_number: s.nv_number,
                });
                true
            }
            None => false,
        }
    }

    /// Changes the signed-in user's password and ends the session.
    pub fn update_password(&mut self, conn: &Connection, cfg: &AppConfig, new_password: &str) -> Result<(), AuthError> {
        let session = self.require_session()?.clone();
        check_password(cfg, new_password)?;
        let salt = Uuid::new_v4().to_string();
        conn.execute(
            "UPDATE accounts SET password_salt = ?, password_hash = ? WHERE email = ?",
            (&salt, hash_password(&salt, new_password), &session.email),
        )?;
        self.sign_out();
        Ok(())
    }

    pub fn require_session(&self) -> Result<&Session, AuthError> {
        self.session.as_ref().ok_or(AuthError::NotSignedIn)
    }

    pub fn current_profile(&self, conn: &Connection) -> Result<UserProfile, AuthError> {
        let s = self.require_session()?;
        fetch_profile(conn, &s.nv_number)?.ok_or_else(|| AuthError::MissingProfile(s.nv_number.clone()))
    }

    pub fn require_admin(&self, conn: &Connection) -> Result<UserProfile, AuthError> {
        let p = self.current_profile(conn)?;
        if !p.is_admin() {
            return Err(AuthError::Forbidden);
        }
        Ok(p)
    }
}
