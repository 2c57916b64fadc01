use std::str::FromStr;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => anyhow::bail!("unknown APP_ENV `{other}`"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub cookie_expires_days: i64,
}

/// Argon2id work factor.
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetConfig {
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub public_url: String,
    pub database_url: String,
    pub jwt: JwtConfig,
    pub password: PasswordConfig,
    pub reset: ResetConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = match std::env::var("APP_ENV") {
            Ok(v) => v.parse()?,
            Err(_) => Environment::Production,
        };
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "natours".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "natours-users".into()),
            ttl_minutes: env_or("JWT_TTL_MINUTES", 60 * 24 * 90),
            cookie_expires_days: env_or("JWT_COOKIE_EXPIRES_DAYS", 90),
        };
        let password = PasswordConfig {
            memory_kib: env_or("PASSWORD_MEMORY_KIB", 19 * 1024),
            iterations: env_or("PASSWORD_ITERATIONS", 2),
            parallelism: env_or("PASSWORD_PARALLELISM", 1),
        };
        let reset = ResetConfig {
            ttl_minutes: env_or("RESET_TOKEN_TTL_MINUTES", 10),
        };
        let mail = MailConfig {
            host: std::env::var("EMAIL_HOST").unwrap_or_else(|_| "localhost".into()),
            port: env_or("EMAIL_PORT", 2525),
            username: std::env::var("EMAIL_USERNAME").unwrap_or_default(),
            password: std::env::var("EMAIL_PASSWORD").unwrap_or_default(),
            from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Natours <no-reply@natours.dev>".into()),
        };
        let public_url = std::env::var("PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:8080".into())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            environment,
            public_url,
            database_url,
            jwt,
            password,
            reset,
            mail,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
