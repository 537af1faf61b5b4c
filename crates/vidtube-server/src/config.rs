use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Duration;

use vidtube_api::TokenConfig;
use vidtube_media::CloudinaryConfig;
use vidtube_media::cloudinary::DEFAULT_BASE_URL;

/// Secrets that must never reach production.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "change-me-to-a-random-string", "secret"];

/// Everything the server needs, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub tokens: TokenConfig,
    pub cloudinary: CloudinaryConfig,
    pub upload_dir: PathBuf,
    pub staging_max_age: std::time::Duration,
    pub cookie_secure: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| -> Result<String> {
            get(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} is not set", key))
        };

        let access_secret = secret(&get, "ACCESS_TOKEN_SECRET")?;
        let refresh_secret = secret(&get, "REFRESH_TOKEN_SECRET")?;
        if access_secret == refresh_secret {
            bail!("ACCESS_TOKEN_SECRET and REFRESH_TOKEN_SECRET must differ");
        }

        let port: u16 = or("PORT", "8000")
            .parse()
            .context("PORT is not a valid port number")?;
        let max_age_hours: u64 = or("VIDTUBE_STAGING_MAX_AGE_HOURS", "24")
            .parse()
            .context("VIDTUBE_STAGING_MAX_AGE_HOURS is not a number")?;
        let cookie_secure = match or("VIDTUBE_COOKIE_SECURE", "true").to_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => bail!("VIDTUBE_COOKIE_SECURE: expected a boolean, got '{}'", other),
        };

        Ok(Config {
            host: or("VIDTUBE_HOST", "0.0.0.0"),
            port,
            db_path: or("VIDTUBE_DB_PATH", "vidtube.db").into(),
            tokens: TokenConfig {
                access_secret,
                access_ttl: parse_ttl(&or("ACCESS_TOKEN_EXPIRY", "1d"))
                    .context("ACCESS_TOKEN_EXPIRY")?,
                refresh_secret,
                refresh_ttl: parse_ttl(&or("REFRESH_TOKEN_EXPIRY", "10d"))
                    .context("REFRESH_TOKEN_EXPIRY")?,
            },
            cloudinary: CloudinaryConfig {
                cloud_name: required("CLOUDINARY_CLOUD_NAME")?,
                api_key: required("CLOUDINARY_API_KEY")?,
                api_secret: required("CLOUDINARY_API_SECRET")?,
                base_url: or("CLOUDINARY_BASE_URL", DEFAULT_BASE_URL),
            },
            upload_dir: or("VIDTUBE_UPLOAD_DIR", "./public/temp").into(),
            staging_max_age: std::time::Duration::from_secs(max_age_hours * 3600),
            cookie_secure,
        })
    }
}

fn secret(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<String> {
    let value = get(key).unwrap_or_default();
    if value.trim().is_empty() || PLACEHOLDER_SECRETS.contains(&value.as_str()) {
        bail!("{} is unset or still a placeholder", key);
    }
    Ok(value)
}

/// Token lifetime: bare seconds (`3600`) or a number with an `s`, `m`, `h`
/// or `d` suffix (`15m`, `10d`).
pub fn parse_ttl(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    let (digits, unit) = match raw.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((i, _)) => raw.split_at(i),
        None => (raw, "s"),
    };
    let n: i64 = digits
        .parse()
        .with_context(|| format!("invalid duration '{}'", raw))?;
    if n <= 0 {
        bail!("duration '{}' must be positive", raw);
    }

    let ttl = match unit {
        "s" => Duration::seconds(n),
        "m" => Duration::minutes(n),
        "h" => Duration::hours(n),
        "d" => Duration::days(n),
        other => bail!("unknown duration unit '{}' in '{}'", other, raw),
    };
    Ok(ttl)
}
