use axum::extract::FromRef;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::state::AppState;
use crate::users::repo_types::User;

type HmacSha256 = Hmac<Sha256>;

/// What a link token is allowed to be used for. The purpose is mixed into
/// the MAC, so a verification token can never pass as a reset token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Verify,
    Reset,
}

impl TokenPurpose {
    fn as_str(self) -> &'static str {
        match self {
            Self::Verify => "verify",
            Self::Reset => "reset",
        }
    }
}

/// Stateless single-use tokens for activation and password-reset links.
///
/// A token is `{timestamp_hex}-{hmac_hex}` where the MAC covers the purpose,
/// the user id, the current password hash, `is_active` and the timestamp.
/// Validity is re-derived from current user state, so the token invalidates
/// itself once the fingerprinted state changes: activating the account kills
/// outstanding verification tokens, changing the password kills outstanding
/// reset tokens. No server-side token storage is needed.
#[derive(Clone)]
pub struct AccountTokens {
    key: Vec<u8>,
    verify_ttl: Duration,
    reset_ttl: Duration,
}

impl FromRef<AppState> for AccountTokens {
    fn from_ref(state: &AppState) -> Self {
        Self {
            key: state.config.secret_key.as_bytes().to_vec(),
            verify_ttl: Duration::minutes(state.config.verify_token_ttl_minutes),
            reset_ttl: Duration::minutes(state.config.reset_token_ttl_minutes),
        }
    }
}

impl AccountTokens {
    pub fn new(key: &[u8], verify_ttl: Duration, reset_ttl: Duration) -> Self {
        Self {
            key: key.to_vec(),
            verify_ttl,
            reset_ttl,
        }
    }

    pub fn make_token(&self, user: &User, purpose: TokenPurpose) -> String {
        self.make_token_at(user, purpose, OffsetDateTime::now_utc())
    }

    /// Check a token against current user state. Fails closed: malformed
    /// input, expiry and MAC mismatch all yield `false`.
    pub fn check_token(&self, user: &User, token: &str, purpose: TokenPurpose) -> bool {
        self.check_token_at(user, token, purpose, OffsetDateTime::now_utc())
    }

    fn make_token_at(&self, user: &User, purpose: TokenPurpose, now: OffsetDateTime) -> String {
        let ts = now.unix_timestamp();
        let sig = self.fingerprint(user, purpose, ts);
        format!("{ts:x}-{}", hex::encode(sig))
    }

    fn check_token_at(
        &self,
        user: &User,
        token: &str,
        purpose: TokenPurpose,
        now: OffsetDateTime,
    ) -> bool {
        self.try_check(user, token, purpose, now).is_some()
    }

    fn try_check(
        &self,
        user: &User,
        token: &str,
        purpose: TokenPurpose,
        now: OffsetDateTime,
    ) -> Option<()> {
        let (ts_part, sig_part) = token.split_once('-')?;
        let ts = i64::from_str_radix(ts_part, 16).ok()?;
        let ttl = match purpose {
            TokenPurpose::Verify => self.verify_ttl,
            TokenPurpose::Reset => self.reset_ttl,
        };
        let age = now.unix_timestamp() - ts;
        if age < 0 || Duration::seconds(age) > ttl {
            return None;
        }
        let sig = hex::decode(sig_part).ok()?;
        self.mac(user, purpose, ts).verify_slice(&sig).ok()?;
        Some(())
    }

    fn fingerprint(&self, user: &User, purpose: TokenPurpose, ts: i64) -> Vec<u8> {
        self.mac(user, purpose, ts).finalize().into_bytes().to_vec()
    }

    fn mac(&self, user: &User, purpose: TokenPurpose, ts: i64) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(purpose.as_str().as_bytes());
        mac.update(user.id.as_bytes());
        mac.update(user.password_hash.as_deref().unwrap_or("").as_bytes());
        mac.update(&[user.is_active as u8]);
        mac.update(&ts.to_be_bytes());
        mac
    }
}

/// Opaque user reference embedded in emailed links.
pub fn encode_uid(id: Uuid) -> String {
    URL_SAFE_NO_PAD.encode(id.as_bytes())
}

pub fn decode_uid(encoded: &str) -> Option<Uuid> {
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    Uuid::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens() -> AccountTokens {
        AccountTokens::new(b"test-secret", Duration::hours(24), Duration::hours(1))
    }

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "alice@example.com".into(),
            first_name: None,
            last_name: None,
            password_hash: Some("$argon2id$fake-hash".into()),
            is_active: false,
            is_staff: false,
            is_superuser: false,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn round_trip_verifies() {
        let gen = tokens();
        let user = user();
        let token = gen.make_token(&user, TokenPurpose::Verify);
        assert!(gen.check_token(&user, &token, TokenPurpose::Verify));
    }

    #[test]
    fn purpose_is_bound_into_the_token() {
        let gen = tokens();
        let user = user();
        let token = gen.make_token(&user, TokenPurpose::Verify);
        assert!(!gen.check_token(&user, &token, TokenPurpose::Reset));
    }

    #[test]
    fn activation_invalidates_verify_token() {
        let gen = tokens();
        let mut user = user();
        let token = gen.make_token(&user, TokenPurpose::Verify);
        user.is_active = true;
        assert!(!gen.check_token(&user, &token, TokenPurpose::Verify));
    }

    #[test]
    fn password_change_invalidates_reset_token() {
        let gen = tokens();
        let mut user = user();
        let token = gen.make_token(&user, TokenPurpose::Reset);
        user.password_hash = Some("$argon2id$other-hash".into());
        assert!(!gen.check_token(&user, &token, TokenPurpose::Reset));
    }

    #[test]
    fn expired_token_is_rejected() {
        let gen = tokens();
        let user = user();
        let issued = OffsetDateTime::now_utc() - Duration::hours(2);
        let token = gen.make_token_at(&user, TokenPurpose::Reset, issued);
        assert!(!gen.check_token(&user, &token, TokenPurpose::Reset));
        // verify window is 24h, so the same age is fine for verification
        let token = gen.make_token_at(&user, TokenPurpose::Verify, issued);
        assert!(gen.check_token(&user, &token, TokenPurpose::Verify));
    }

    #[test]
    fn token_from_the_future_is_rejected() {
        let gen = tokens();
        let user = user();
        let issued = OffsetDateTime::now_utc() + Duration::hours(1);
        let token = gen.make_token_at(&user, TokenPurpose::Reset, issued);
        assert!(!gen.check_token(&user, &token, TokenPurpose::Reset));
    }

    #[test]
    fn malformed_tokens_fail_closed() {
        let gen = tokens();
        let user = user();
        for garbage in ["", "-", "nope", "zzz-abcd", "10-nothex", "10"] {
            assert!(!gen.check_token(&user, garbage, TokenPurpose::Verify));
        }
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let gen = tokens();
        let user = user();
        let mut token = gen.make_token(&user, TokenPurpose::Verify);
        let flipped = if token.ends_with('0') { '1' } else { '0' };
        token.pop();
        token.push(flipped);
        assert!(!gen.check_token(&user, &token, TokenPurpose::Verify));
    }

    #[test]
    fn uid_round_trip() {
        let id = Uuid::new_v4();
        let encoded = encode_uid(id);
        assert_eq!(decode_uid(&encoded), Some(id));
        assert_eq!(decode_uid("not base64!"), None);
        assert_eq!(decode_uid("aGVsbG8"), None); // wrong length
    }
}
