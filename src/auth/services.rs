use argon2::{password_hash::SaltString, Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};
use regex::Regex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::auth::dto::{LoginRequest, SignupRequest};
use crate::auth::repo::UserStore;
use crate::auth::repo_types::{AuthToken, NewUser, User};
use crate::errors::{ApiError, ValidationErrors, BLANK, INVALID_EMAIL, REQUIRED};
use crate::state::AppState;

pub const DUPLICATE_EMAIL: &str = "A user is already registered with this e-mail address.";
pub const USERNAME_MAX_LEN: usize = 150;
const UNUSABLE_PASSWORD_PREFIX: char = '!';

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref USERNAME_STRIP_RE: Regex = Regex::new(r"[^\w\s@+.-]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

pub fn clean_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// Unusable hashes never verify and are not an error.
pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    if hash.starts_with(UNUSABLE_PASSWORD_PREFIX) {
        return Ok(false);
    }
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

/// Marker stored for accounts created without a password.
pub fn unusable_password() -> String {
    let tail: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect();
    format!("{UNUSABLE_PASSWORD_PREFIX}{tail}")
}

/// 40 lowercase hex characters.
pub fn generate_token_key() -> String {
    let mut bytes = [0u8; 20];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn normalize_username(txt: &str) -> String {
    let ascii: String = txt.chars().filter(char::is_ascii).collect();
    let stripped = USERNAME_STRIP_RE.replace_all(&ascii, "").to_lowercase();
    let local = stripped.split('@').next().unwrap_or_default().trim();
    let mut username = WHITESPACE_RE.replace_all(local, "_").into_owned();
    username.truncate(USERNAME_MAX_LEN);
    username
}

/// First candidate that survives normalisation, `"user"` otherwise.
pub fn username_base(candidates: &[&str]) -> String {
    candidates
        .iter()
        .map(|c| normalize_username(c))
        .find(|u| !u.is_empty())
        .unwrap_or_else(|| "user".to_string())
}

/// Derives a username from `candidates` that no account uses yet.
pub async fn generate_unique_username(
    users: &dyn UserStore,
    candidates: &[&str],
) -> anyhow::Result<String> {
    let base = username_base(candidates);
    if !users.username_exists(&base).await? {
        return Ok(base);
    }
    for n in 2u32..1000 {
        let suffix = n.to_string();
        let mut stem = base.clone();
        stem.truncate(USERNAME_MAX_LEN - suffix.len());
        let candidate = format!("{stem}{suffix}");
        if !users.username_exists(&candidate).await? {
            return Ok(candidate);
        }
    }
    // ran out of sequential suffixes; fall back to a random one
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_string();
    let mut stem = base;
    stem.truncate(USERNAME_MAX_LEN - suffix.len());
    Ok(format!("{stem}{suffix}"))
}

/// Validates `raw` as a new account's email and returns it cleaned.
/// Problems are recorded under `field` in `errors`.
pub async fn validate_new_email(
    users: &dyn UserStore,
    raw: Option<&str>,
    unique: bool,
    field: &str,
    errors: &mut ValidationErrors,
) -> anyhow::Result<Option<String>> {
    let Some(raw) = raw else {
        errors.add(field, REQUIRED);
        return Ok(None);
    };
    let email = clean_email(raw);
    if email.is_empty() {
        errors.add(field, BLANK);
        return Ok(None);
    }
    if !is_valid_email(&email) {
        errors.add(field, INVALID_EMAIL);
        return Ok(None);
    }
    if unique && users.email_exists(&email).await? {
        warn!(email = %email, "email already registered");
        errors.add(field, DUPLICATE_EMAIL);
        return Ok(None);
    }
    Ok(Some(email))
}

#[instrument(skip(state, payload))]
pub async fn signup(state: &AppState, payload: SignupRequest) -> Result<User, ApiError> {
    let mut errors = ValidationErrors::new();
    let email = validate_new_email(
        state.users.as_ref(),
        payload.email.as_deref(),
        state.config.unique_email,
        "email",
        &mut errors,
    )
    .await?;
    let password = match payload.password {
        None => {
            errors.add("password", REQUIRED);
            None
        }
        Some(p) if p.is_empty() => {
            errors.add("password", BLANK);
            None
        }
        Some(p) => Some(p),
    };
    errors.into_result()?;
    let (Some(email), Some(password)) = (email, password) else {
        return Err(anyhow::anyhow!("validated signup is missing email or password").into());
    };

    let name = payload.name.unwrap_or_default().trim().to_string();
    let username =
        generate_unique_username(state.users.as_ref(), &[name.as_str(), email.as_str(), "user"])
            .await?;
    let password_hash = hash_password(&password)?;

    let user = state
        .users
        .insert_user(&NewUser {
            email,
            name,
            username,
            password_hash,
        })
        .await?;
    state.profiles.ensure_profile(user.id).await?;
    state.email_setup.setup_user_email(&user).await?;

    info!(user_id = %user.id, email = %user.email, username = %user.username, "user registered");
    Ok(user)
}

#[instrument(skip(state, payload))]
pub async fn login(state: &AppState, payload: LoginRequest) -> Result<(AuthToken, User), ApiError> {
    let mut errors = ValidationErrors::new();
    let identifier = match payload.username.as_deref().map(str::trim) {
        None => {
            errors.add("username", REQUIRED);
            ""
        }
        Some("") => {
            errors.add("username", BLANK);
            ""
        }
        Some(id) => id,
    };
    let password = match payload.password.as_deref() {
        None => {
            errors.add("password", REQUIRED);
            ""
        }
        Some("") => {
            errors.add("password", BLANK);
            ""
        }
        Some(p) => p,
    };
    errors.into_result()?;

    let user = match state.users.find_user_by_email(identifier).await? {
        Some(u) => Some(u),
        None => state.users.find_user_by_username(identifier).await?,
    };
    let Some(user) = user else {
        warn!(identifier = %identifier, "login unknown identifier");
        return Err(ApiError::InvalidCredentials);
    };

    if !verify_password(password, &user.password_hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let token = state
        .users
        .get_or_create_token(user.id, &generate_token_key())
        .await?;
    info!(user_id = %user.id, "user logged in");
    Ok((token, user))
}



#[cfg(test)]
mod signup_tests {
    use super::*;

    #[tokio::test]
    async fn signup_stores_hash_profile_and_email_address() {
        let (state, store) = AppState::fake();
        let user = signup(
            &state,
            SignupRequest {
                email: Some(" Grace@Example.com ".into()),
                name: Some("Grace Hopper".into()),
                password: Some("cobol-4-ever".into()),
            },
        )
        .await
        .unwrap();

        assert_eq!(user.email, "grace@example.com");
        assert_eq!(user.username, "grace_hopper");
        assert!(user.password_hash.starts_with("$argon2"));
        assert!(!user.password_hash.contains("cobol-4-ever"));

        use crate::profiles::repo::ProfileStore;
        assert!(store.find_profile(user.id).await.unwrap().is_some());
        assert!(store.email_exists("GRACE@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_email_allowed_when_uniqueness_is_off() {
        let (mut state, _) = AppState::fake();
        state.config = std::sync::Arc::new(crate::config::AppConfig {
            database_url: None,
            unique_email: false,
            storage: None,
        });
        for _ in 0..2 {
            signup(
                &state,
                SignupRequest {
                    email: Some("twin@example.com".into()),
                    name: Some("Twin".into()),
                    password: Some("pw".into()),
                },
            )
            .await
            .unwrap();
        }
        let token_user = login(
            &state,
            LoginRequest {
                username: Some("twin2".into()),
                password: Some("pw".into()),
            },
        )
        .await
        .unwrap()
        .1;
        assert_eq!(token_user.username, "twin2");
    }
}
