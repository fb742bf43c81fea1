use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub app_env: String,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expiry_minutes: i64,
    pub password_reset_expiry_hours: i64,
    pub cors_allowed_origin: Option<String>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub frontend_url: String,
    pub fcm_server_key: Option<String>,
    pub fcm_endpoint: String,
    pub mail_api_url: Option<String>,
    pub mail_api_key: Option<String>,
    pub mail_from: String,
    pub worker_poll_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("SERVER_PORT must be a valid u16")?;
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer =
            env::var("JWT_ISSUER").unwrap_or_else(|_| "workplace-backend".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "workplace-clients".to_string());
        let jwt_expiry_minutes = env::var("JWT_EXPIRY_MINUTES")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("JWT_EXPIRY_MINUTES must be an integer")?;
        let password_reset_expiry_hours = env::var("PASSWORD_RESET_EXPIRY_HOURS")
            .unwrap_or_else(|_| "24".to_string())
            .parse()
            .context("PASSWORD_RESET_EXPIRY_HOURS must be an integer")?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let upload_dir = env::var("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("uploads"));
        let max_upload_bytes = env::var("MAX_UPLOAD_BYTES")
            .ok()
            .map(|value| value.parse())
            .transpose()
            .context("MAX_UPLOAD_BYTES must be an integer")?
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES);
        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:4200".to_string());
        let fcm_server_key = env::var("FCM_SERVER_KEY").ok().filter(|v| !v.is_empty());
        let fcm_endpoint = env::var("FCM_ENDPOINT")
            .unwrap_or_else(|_| "https://fcm.googleapis.com/fcm/send".to_string());
        let mail_api_url = env::var("MAIL_API_URL").ok().filter(|v| !v.is_empty());
        let mail_api_key = env::var("MAIL_API_KEY").ok();
        let mail_from =
            env::var("MAIL_FROM").unwrap_or_else(|_| "no-reply@localhost".to_string());
        let worker_poll_seconds = env::var("WORKER_POLL_SECONDS")
            .unwrap_or_else(|_| "2".to_string())
            .parse()
            .context("WORKER_POLL_SECONDS must be an integer")?;

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            app_env,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            jwt_expiry_minutes,
            password_reset_expiry_hours,
            cors_allowed_origin,
            upload_dir,
            max_upload_bytes,
            frontend_url,
            fcm_server_key,
            fcm_endpoint,
            mail_api_url,
            mail_api_key,
            mail_from,
            worker_poll_seconds,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }

    pub fn password_reset_link(&self, token: &str) -> String {
        format!(
            "{}/reset-password?token={}",
            self.frontend_url.trim_end_matches('/'),
            token
        )
    }

    pub fn login_link(&self) -> String {
        format!("{}/login", self.frontend_url.trim_end_matches('/'))
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            let _ = parsed.set_password(Some("*****"));
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
