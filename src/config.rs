use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Destinations for the links we generate and the redirects we issue.
#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    pub public_base_url: String,
    pub activation_success_url: String,
    pub activation_failure_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Key for the HMAC behind activation/reset link tokens.
    pub secret_key: String,
    pub jwt: JwtConfig,
    pub smtp: SmtpConfig,
    pub links: LinkConfig,
    pub verify_token_ttl_minutes: i64,
    pub reset_token_ttl_minutes: i64,
    pub reset_throttle_limit: usize,
    pub reset_throttle_window_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let secret_key = std::env::var("SECRET_KEY")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| secret_key.clone()),
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "userhub".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "userhub-users".into()),
            ttl_minutes: std::env::var("JWT_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            refresh_ttl_minutes: std::env::var("JWT_REFRESH_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24 * 14),
        };
        let smtp = SmtpConfig {
            host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".into()),
            port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|v| v.parse::<u16>().ok())
                .unwrap_or(587),
            username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
            password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
            from: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| "Userhub <no-reply@localhost>".into()),
        };
        let links = LinkConfig {
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            activation_success_url: std::env::var("ACTIVATION_SUCCESS_URL")
                .unwrap_or_else(|_| "http://localhost:5173/login/".into()),
            activation_failure_url: std::env::var("ACTIVATION_FAILURE_URL")
                .unwrap_or_else(|_| "http://localhost:5173?activation=invalid".into()),
        };
        Ok(Self {
            database_url,
            secret_key,
            jwt,
            smtp,
            links,
            verify_token_ttl_minutes: std::env::var("VERIFY_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60 * 24),
            reset_token_ttl_minutes: std::env::var("RESET_TOKEN_TTL_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(60),
            reset_throttle_limit: std::env::var("RESET_THROTTLE_LIMIT")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(5),
            reset_throttle_window_secs: std::env::var("RESET_THROTTLE_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3600),
        })
    }
}
