use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRef, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect},
    Json,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::LinkConfig,
    email::{templates, EmailDispatcher},
    error::ApiError,
    state::AppState,
    users::{
        dto::{
            LoginRequest, LoginResponse, MessageResponse, PasswordResetConfirmRequest,
            PasswordResetRequest, RefreshRequest, RefreshResponse, RegisterRequest,
            UpdateProfileRequest, UserResponse, VerifyTokenRequest,
        },
        repo,
        repo_types::{NewUser, User},
        services::{
            authenticate_user, check_refresh_rotation, hash_password, is_valid_email,
            normalize_email, AuthUser,
        },
        dto::JwtKeys,
        tokens::{self, AccountTokens, TokenPurpose},
    },
};

const MIN_PASSWORD_LEN: usize = 5;

fn validate_email(email: &str) -> Result<(), ApiError> {
    if !is_valid_email(email) {
        return Err(ApiError::bad_request(
            "invalid_email",
            format!("Input a valid email: {email} is not valid"),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::bad_request(
            "password_too_short",
            format!("Password must be at least {MIN_PASSWORD_LEN} characters."),
        ));
    }
    Ok(())
}

/// Queue welcome and verification emails after registration. Enqueueing is
/// fire-and-forget; nothing here can fail the registration that triggered it.
fn send_registration_emails(
    user: &User,
    tokens: &AccountTokens,
    links: &LinkConfig,
    mailer: &dyn EmailDispatcher,
) {
    mailer.enqueue(templates::welcome_email(user));

    let uid = tokens::encode_uid(user.id);
    let token = tokens.make_token(user, TokenPurpose::Verify);
    mailer.enqueue(templates::verification_email(user, links, &uid, &token));
}

/// Queue a reset-link email when, and only when, the address belongs to a
/// known user. The caller's response is identical either way.
fn send_reset_email(
    user: Option<&User>,
    tokens: &AccountTokens,
    links: &LinkConfig,
    mailer: &dyn EmailDispatcher,
) {
    if let Some(user) = user {
        let uid = tokens::encode_uid(user.id);
        let token = tokens.make_token(user, TokenPurpose::Reset);
        mailer.enqueue(templates::password_reset_email(user, links, &uid, &token));
    }
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(mut payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    payload.email = normalize_email(&payload.email);
    validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    let hash = hash_password(&payload.password)?;
    // Self-registered accounts start inactive until the email is verified.
    let user = User::create(
        &state.db,
        NewUser {
            email: payload.email,
            password_hash: Some(hash),
            first_name: payload.first_name,
            last_name: payload.last_name,
            is_active: false,
            is_staff: false,
        },
    )
    .await?;

    send_registration_emails(
        &user,
        &AccountTokens::from_ref(&state),
        &state.config.links,
        state.mailer.as_ref(),
    );

    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    AuthUser(caller_id): AuthUser,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let caller = User::get(&state.db, caller_id).await?;
    if !caller.is_staff {
        return Err(ApiError::forbidden(
            "not_admin",
            "You must be an admin to view this list",
        ));
    }
    let users = User::list(&state.db).await?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = User::get(&state.db, id).await?;
    Ok(Json(UserResponse::from(&user)))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UserResponse>, ApiError> {
    let user = User::get(&state.db, user_id).await?;
    Ok(Json(UserResponse::from(&user)))
}

#[instrument(skip(state, payload))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = User::get(&state.db, user_id).await?;

    let email = match payload.email {
        Some(email) => {
            let email = normalize_email(&email);
            validate_email(&email)?;
            email
        }
        None => user.email.clone(),
    };
    let first_name = payload.first_name.or(user.first_name);
    let last_name = payload.last_name.or(user.last_name);
    let password_hash = match payload.password {
        Some(password) => {
            validate_password(&password)?;
            Some(hash_password(&password)?)
        }
        None => user.password_hash,
    };

    let updated = User::update(
        &state.db,
        user_id,
        &email,
        first_name.as_deref(),
        last_name.as_deref(),
        password_hash.as_deref(),
    )
    .await?;

    info!(user_id = %user_id, "profile updated");
    Ok(Json(UserResponse::from(&updated)))
}

#[instrument(skip(state))]
pub async fn delete_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode, ApiError> {
    User::delete(&state.db, user_id).await?;
    info!(user_id = %user_id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Email-link flow: the outcome is always a redirect, never a JSON error.
#[instrument(skip(state, token))]
pub async fn activate(
    State(state): State<AppState>,
    Path((uid, token)): Path<(String, String)>,
) -> Redirect {
    let generator = AccountTokens::from_ref(&state);
    let user = match tokens::decode_uid(&uid) {
        Some(id) => User::find_by_id(&state.db, id).await.ok().flatten(),
        None => None,
    };

    // An already-active account fails here too: activation changed the
    // fingerprint, so the old link no longer verifies.
    let valid = user
        .as_ref()
        .map(|u| generator.check_token(u, &token, TokenPurpose::Verify))
        .unwrap_or(false);

    if valid {
        if let Some(user) = user {
            if User::activate(&state.db, user.id).await.is_ok() {
                info!(user_id = %user.id, "account activated");
                return Redirect::to(&state.config.links.activation_success_url);
            }
        }
    }
    warn!(uid = %uid, "invalid activation link");
    Redirect::to(&state.config.links.activation_failure_url)
}

#[instrument(skip(state, payload))]
pub async fn password_reset(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !state.reset_throttle.allow(&addr.ip().to_string()) {
        return Err(ApiError::Throttled);
    }

    let email = normalize_email(&payload.email);
    let user = User::find_by_email(&state.db, &email).await?;
    send_reset_email(
        user.as_ref(),
        &AccountTokens::from_ref(&state),
        &state.config.links,
        state.mailer.as_ref(),
    );

    // Same response whether or not the address is known
    Ok(Json(MessageResponse::new(
        "A password reset link has been sent.",
    )))
}

#[instrument(skip(state, token, payload))]
pub async fn password_reset_confirm(
    State(state): State<AppState>,
    Path((uid, token)): Path<(String, String)>,
    Json(payload): Json<PasswordResetConfirmRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if payload.new_password1 != payload.new_password2 {
        return Err(ApiError::bad_request(
            "password_mismatch",
            "The two password fields didn't match.",
        ));
    }
    validate_password(&payload.new_password1)?;

    let generator = AccountTokens::from_ref(&state);
    let user = match tokens::decode_uid(&uid) {
        Some(id) => User::find_by_id(&state.db, id).await?,
        None => None,
    };
    let user = user
        .filter(|u| generator.check_token(u, &token, TokenPurpose::Reset))
        .ok_or_else(|| ApiError::bad_request("invalid_link", "Invalid password reset link"))?;

    let hash = hash_password(&payload.new_password1)?;
    let user = User::set_password(&state.db, user.id, &hash).await?;
    state
        .mailer
        .enqueue(templates::password_reset_confirmation_email(&user));

    info!(user_id = %user.id, "password reset");
    Ok(Json(MessageResponse::new(
        "Password has been reset successfully.",
    )))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(mut payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    payload.email = normalize_email(&payload.email);

    let user = User::find_by_email(&state.db, &payload.email).await?;
    let user = authenticate_user(user.as_ref(), &payload.password)?;

    let keys = JwtKeys::from_ref(&state);
    let (access, refresh) = keys.sign_pair(user.id)?;

    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(LoginResponse {
        access,
        refresh,
        email: user.email.clone(),
        first_name: user.first_name.clone().unwrap_or_default(),
        last_name: user.last_name.clone().unwrap_or_default(),
        user_id: user.id,
    }))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh)
        .map_err(|e| ApiError::unauthorized("token_invalid", e.to_string()))?;

    // Rotate: the presented token is burned before the new pair goes out.
    // The atomic insert decides which of two concurrent presentations wins.
    let expires_at = time::OffsetDateTime::from_unix_timestamp(claims.exp as i64)
        .map_err(anyhow::Error::from)?;
    let first_use = repo::consume_refresh_jti(&state.db, claims.jti, expires_at).await?;
    let user_id = check_refresh_rotation(&claims, first_use)?;

    let (access, refresh) = keys.sign_pair(user_id)?;
    Ok(Json(RefreshResponse { access, refresh }))
}

/// Signature and expiry check for a submitted token of either kind; no user
/// lookup, no state change.
#[instrument(skip(state, payload))]
pub async fn verify_token(
    State(state): State<AppState>,
    Json(payload): Json<VerifyTokenRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    keys.verify(&payload.token)
        .map_err(|e| ApiError::unauthorized("token_invalid", e.to_string()))?;
    Ok(Json(MessageResponse::new("Token is valid.")))
}

/// Bearer tokens are stateless; logout just tells the client to discard its
/// copies, including any cookie-based ones.
#[instrument]
pub async fn logout() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.append(
        header::SET_COOKIE,
        HeaderValue::from_static("access_token=; Max-Age=0; Path=/"),
    );
    headers.append(
        header::SET_COOKIE,
        HeaderValue::from_static("refresh_token=; Max-Age=0; Path=/"),
    );
    (headers, Json(MessageResponse::new("Logged out successfully")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::email::OutboundEmail;
    use std::sync::Mutex;
    use time::{Duration, OffsetDateTime};

    struct RecordingDispatcher {
        sent: Mutex<Vec<OutboundEmail>>,
    }

    impl RecordingDispatcher {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
            }
        }
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl EmailDispatcher for RecordingDispatcher {
        fn enqueue(&self, email: OutboundEmail) {
            self.sent.lock().unwrap().push(email);
        }
    }

    fn generator() -> AccountTokens {
        AccountTokens::new(b"test-secret", Duration::hours(24), Duration::hours(1))
    }

    fn links() -> LinkConfig {
        LinkConfig {
            public_base_url: "http://localhost:8080".into(),
            activation_success_url: "http://localhost:5173/login/".into(),
            activation_failure_url: "http://localhost:5173?activation=invalid".into(),
        }
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "alice@example.com".into(),
            first_name: None,
            last_name: None,
            password_hash: Some("$argon2id$fake".into()),
            is_active: false,
            is_staff: false,
            is_superuser: false,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn registration_queues_welcome_and_verification() {
        let dispatcher = RecordingDispatcher::new();
        send_registration_emails(&user(), &generator(), &links(), &dispatcher);
        let sent = dispatcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].subject, "Welcome Email");
        assert!(sent[1].body.contains("/users/activate/"));
    }

    #[test]
    fn reset_request_for_unknown_email_queues_nothing() {
        let dispatcher = RecordingDispatcher::new();
        send_reset_email(None, &generator(), &links(), &dispatcher);
        assert_eq!(dispatcher.count(), 0);
    }

    #[test]
    fn reset_request_for_known_email_queues_one_job() {
        let dispatcher = RecordingDispatcher::new();
        send_reset_email(Some(&user()), &generator(), &links(), &dispatcher);
        assert_eq!(dispatcher.count(), 1);
        let sent = dispatcher.sent.lock().unwrap();
        assert!(sent[0].body.contains("/users/password-reset-confirm/"));
    }

    #[test]
    fn verification_link_token_round_trips_through_the_email() {
        let dispatcher = RecordingDispatcher::new();
        let gen = generator();
        let user = user();
        send_registration_emails(&user, &gen, &links(), &dispatcher);

        let sent = dispatcher.sent.lock().unwrap();
        let body = &sent[1].body;
        let link = body
            .lines()
            .find(|l| l.contains("/users/activate/"))
            .expect("activation link present")
            .trim();
        let mut parts = link.rsplitn(3, '/');
        let token = parts.next().unwrap();
        let uid = parts.next().unwrap();

        assert_eq!(tokens::decode_uid(uid), Some(user.id));
        assert!(gen.check_token(&user, token, TokenPurpose::Verify));
        assert!(!gen.check_token(&user, token, TokenPurpose::Reset));
    }

    #[test]
    fn validators_reject_bad_input() {
        assert!(validate_email("alice@example.com").is_ok());
        assert!(validate_email("nope").is_err());
        assert!(validate_password("12345").is_ok());
        assert!(validate_password("1234").is_err());
    }

    #[tokio::test]
    async fn verify_token_accepts_signed_tokens_of_either_kind() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        for token in [
            keys.sign_access(Uuid::new_v4()).expect("sign access"),
            keys.sign_refresh(Uuid::new_v4()).expect("sign refresh"),
        ] {
            let result =
                verify_token(State(state.clone()), Json(VerifyTokenRequest { token })).await;
            assert!(result.is_ok());
        }
    }

    #[tokio::test]
    async fn verify_token_rejects_garbage_with_401() {
        let state = AppState::fake();
        let err = verify_token(
            State(state),
            Json(VerifyTokenRequest {
                token: "not-a-jwt".into(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn logout_clears_both_token_cookies() {
        let response = logout().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().any(|c| c.starts_with("access_token=;")));
        assert!(cookies.iter().any(|c| c.starts_with("refresh_token=;")));
    }
}
