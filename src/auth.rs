use std::future::{ready, Ready};
use std::num::ParseIntError;

use actix_web::{
    dev::Payload, get, http::header, post, put, web, FromRequest, HttpRequest, HttpResponse,
};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use bson::doc;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;

use crate::error::ApiError;
use crate::schemas::{new_id, normalize_plate, PublicUser, User, UserId, UserRole, USERS};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

/// The authenticated caller, recovered from the Authorization header.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub user_id: UserId,
    pub role: UserRole,
}

impl Identity {
    pub fn require_staff(&self) -> Result<(), ApiError> {
        if self.role == UserRole::Staff {
            Ok(())
        } else {
            Err(ApiError::Forbidden("staff access required".to_string()))
        }
    }
}

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Identity, ApiError>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(identity_from_request(req))
    }
}

fn identity_from_request(req: &HttpRequest) -> Result<Identity, ApiError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or(ApiError::Unauthorized)?;
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").unwrap_or(header);
    verify_token(token, &state.config.auth_secret, Utc::now().timestamp())
        .ok_or(ApiError::Unauthorized)
}

/// Tokens are `{user_id}.{role}.{expires_unix}.{hex signature}`, signed with
/// HMAC-SHA256 over everything before the signature.
pub fn issue_token(user_id: &str, role: UserRole, secret: &str, ttl_hours: i64) -> String {
    let expires = (Utc::now() + Duration::hours(ttl_hours)).timestamp();
    let message = format!("{}.{}.{}", user_id, role.as_str(), expires);
    let signature = hex_encode(&sign(&message, secret));
    format!("{message}.{signature}")
}

pub fn verify_token(token: &str, secret: &str, now_unix: i64) -> Option<Identity> {
    let parts: Vec<&str> = token.split('.').collect();
    let [user_id, role, expires, signature] = parts.as_slice() else {
        return None;
    };
    let expires_at: i64 = expires.parse().ok()?;
    if expires_at <= now_unix {
        return None;
    }
    let message = format!("{user_id}.{role}.{expires}");
    let mut mac = hmac_for(secret);
    mac.update(message.as_bytes());
    mac.verify_slice(&hex_decode(signature)?).ok()?;
    Some(Identity {
        user_id: (*user_id).to_string(),
        role: UserRole::parse(role)?,
    })
}

fn sign(message: &str, secret: &str) -> Vec<u8> {
    let mut mac = hmac_for(secret);
    mac.update(message.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn hmac_for(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length")
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn hex_decode(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    hex.chars()
        .collect::<Vec<_>>()
        .chunks(2)
        .map(|pair| u8::from_str_radix(&String::from_iter(pair), 16))
        .collect::<Result<Vec<u8>, ParseIntError>>()
        .ok()
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| ApiError::Internal(err.to_string()))
}

pub fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    let looks_like_address =
        email.contains('@') && email.rsplit('@').next().is_some_and(|d| d.contains('.'));
    if looks_like_address {
        Ok(())
    } else {
        Err(ApiError::Invalid(format!("invalid email address: {email}")))
    }
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() >= 6 {
        Ok(())
    } else {
        Err(ApiError::Invalid(
            "password must be at least 6 characters".to_string(),
        ))
    }
}

pub async fn find_user(state: &AppState, user_id: &str) -> Result<User, ApiError> {
    state
        .collection::<User>(USERS)
        .find_one(doc! { "id": user_id }, None)
        .await?
        .ok_or(ApiError::NotFound("user"))
}

#[derive(Deserialize)]
struct RegisterJson {
    username: String,
    email: String,
    phone_number: String,
    password: String,
    role: UserRole,
}

#[derive(Deserialize)]
struct LoginJson {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: PublicUser,
}

#[post("/auth/register")]
pub(crate) async fn register(
    state: web::Data<AppState>,
    json: web::Json<RegisterJson>,
) -> Result<HttpResponse, ApiError> {
    let json = json.into_inner();
    if json.username.trim().is_empty() {
        return Err(ApiError::Invalid("username must not be empty".to_string()));
    }
    validate_email(&json.email)?;
    validate_password(&json.password)?;

    let users = state.collection::<User>(USERS);
    if users
        .find_one(doc! { "email": &json.email }, None)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(format!(
            "email already registered: {}",
            json.email
        )));
    }

    let now = bson::DateTime::now();
    let user = User {
        id: new_id(),
        username: json.username.trim().to_string(),
        email: json.email,
        phone_number: json.phone_number,
        role: json.role,
        saved_plates: vec![],
        password_hash: hash_password(&json.password)?,
        created_at: now,
        updated_at: now,
    };
    users.insert_one(&user, None).await?;
    info!(user_id = %user.id, "registered new {} account", user.role.as_str());

    let token = issue_token(
        &user.id,
        user.role,
        &state.config.auth_secret,
        state.config.token_ttl_hours,
    );
    Ok(HttpResponse::Created().json(AuthResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

#[post("/auth/login")]
pub(crate) async fn login(
    state: web::Data<AppState>,
    json: web::Json<LoginJson>,
) -> Result<HttpResponse, ApiError> {
    let json = json.into_inner();
    let user = state
        .collection::<User>(USERS)
        .find_one(doc! { "email": &json.email }, None)
        .await?;
    // A missing account and a bad password report the same way.
    let user = match user {
        Some(user) if verify_password(&user.password_hash, &json.password) => user,
        _ => return Err(ApiError::Unauthorized),
    };

    let token = issue_token(
        &user.id,
        user.role,
        &state.config.auth_secret,
        state.config.token_ttl_hours,
    );
    Ok(HttpResponse::Ok().json(AuthResponse {
        token,
        user: PublicUser::from(&user),
    }))
}

#[get("/auth/me")]
pub(crate) async fn me(state: web::Data<AppState>, identity: Identity) -> Result<HttpResponse, ApiError> {
    let user = find_user(&state, &identity.user_id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(&user)))
}

#[derive(Deserialize)]
struct ProfileJson {
    username: String,
    email: String,
    phone_number: String,
}

#[put("/auth/profile")]
pub(crate) async fn update_profile(
    state: web::Data<AppState>,
    identity: Identity,
    json: web::Json<ProfileJson>,
) -> Result<HttpResponse, ApiError> {
    let json = json.into_inner();
    if json.username.trim().is_empty() {
        return Err(ApiError::Invalid("username must not be empty".to_string()));
    }
    validate_email(&json.email)?;

    let users = state.collection::<User>(USERS);
    let taken = users
        .find_one(
            doc! { "email": &json.email, "id": { "$ne": &identity.user_id } },
            None,
        )
        .await?;
    if taken.is_some() {
        return Err(ApiError::Conflict(format!(
            "email already registered: {}",
            json.email
        )));
    }

    users
        .update_one(
            doc! { "id": &identity.user_id },
            doc! { "$set": {
                "username": json.username.trim(),
                "email": &json.email,
                "phone_number": &json.phone_number,
                "updated_at": bson::DateTime::now(),
            }},
            None,
        )
        .await?;

    let user = find_user(&state, &identity.user_id).await?;
    Ok(HttpResponse::Ok().json(PublicUser::from(&user)))
}

#[derive(Deserialize)]
struct PasswordJson {
    new_password: String,
}

#[put("/auth/password")]
pub(crate) async fn update_password(
    state: web::Data<AppState>,
    identity: Identity,
    json: web::Json<PasswordJson>,
) -> Result<HttpResponse, ApiError> {
    validate_password(&json.new_password)?;
    let hash = hash_password(&json.new_password)?;
    state
        .collection::<User>(USERS)
        .update_one(
            doc! { "id": &identity.user_id },
            doc! { "$set": { "password_hash": hash, "updated_at": bson::DateTime::now() } },
            None,
        )
        .await?;
    Ok(HttpResponse::Ok().body("Password updated"))
}

#[derive(Deserialize)]
struct PlateJson {
    license_plate: String,
}

#[get("/plates")]
pub(crate) async fn get_plates(
    state: web::Data<AppState>,
    identity: Identity,
) -> Result<HttpResponse, ApiError> {
    let user = find_user(&state, &identity.user_id).await?;
    Ok(HttpResponse::Ok().json(user.saved_plates))
}

#[post("/plates")]
pub(crate) async fn save_plate(
    state: web::Data<AppState>,
    identity: Identity,
    json: web::Json<PlateJson>,
) -> Result<HttpResponse, ApiError> {
    let plate = normalize_plate(&json.license_plate);
    if plate.is_empty() {
        return Err(ApiError::Invalid(
            "license plate must not be empty".to_string(),
        ));
    }
    // $addToSet makes re-saving a known plate a no-op.
    state
        .collection::<User>(USERS)
        .update_one(
            doc! { "id": &identity.user_id },
            doc! { "$addToSet": { "saved_plates": &plate } },
            None,
        )
        .await?;
    Ok(HttpResponse::Ok().json(plate))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_round_trips() {
        let token = issue_token("user-1", UserRole::Staff, SECRET, 1);
        let identity = verify_token(&token, SECRET, Utc::now().timestamp()).unwrap();
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.role, UserRole::Staff);
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token("user-1", UserRole::User, SECRET, 1);
        let future = Utc::now().timestamp() + 2 * 60 * 60;
        assert!(verify_token(&token, SECRET, future).is_none());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let token = issue_token("user-1", UserRole::User, SECRET, 1);
        let tampered = token.replacen("USER", "STAFF", 1);
        assert!(verify_token(&tampered, SECRET, Utc::now().timestamp()).is_none());
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let token = issue_token("user-1", UserRole::User, "other-secret", 1);
        assert!(verify_token(&token, SECRET, Utc::now().timestamp()).is_none());
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        let now = Utc::now().timestamp();
        assert!(verify_token("", SECRET, now).is_none());
        assert!(verify_token("a.b.c", SECRET, now).is_none());
        assert!(verify_token("a.USER.notanumber.00", SECRET, now).is_none());
    }

    #[test]
    fn hex_helpers_round_trip() {
        let bytes = vec![0x00, 0x0f, 0xab, 0xff];
        assert_eq!(hex_decode(&hex_encode(&bytes)).unwrap(), bytes);
        assert!(hex_decode("abc").is_none());
        assert!(hex_decode("zz").is_none());
    }

    #[test]
    fn password_hash_verifies_only_the_original() {
        let hash = hash_password("s3cret!").unwrap();
        assert!(verify_password(&hash, "s3cret!"));
        assert!(!verify_password(&hash, "wrong"));
        assert!(!verify_password("not-a-phc-string", "s3cret!"));
    }

    #[test]
    fn email_validation() {
        assert!(validate_email("user@example.com").is_ok());
        assert!(validate_email("userexample.com").is_err());
        assert!(validate_email("user@localhost").is_err());
    }

    #[test]
    fn password_validation() {
        assert!(validate_password("123456").is_ok());
        assert!(validate_password("12345").is_err());
    }
}
