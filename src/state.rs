use std::sync::Arc;

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    auth::password::PasswordHasher,
    config::AppConfig,
    mail::{Mailer, SmtpMailer},
    users::repo::{PgUserStore, UserStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
    pub mailer: Arc<dyn Mailer>,
    pub hasher: PasswordHasher,
}

impl AppState {
    /// Connects to Postgres and the SMTP relay. Returns the pool so the caller
    /// can run migrations against it.
    pub async fn init() -> anyhow::Result<(Self, PgPool)> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;
        let mailer = Arc::new(SmtpMailer::new(&config.mail)) as Arc<dyn Mailer>;

        Ok((Self::from_parts(config, users, mailer)?, db))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        users: Arc<dyn UserStore>,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let hasher = PasswordHasher::new(&config.password)?;
        Ok(Self {
            config,
            users,
            mailer,
            hasher,
        })
    }
}

#[cfg(test)]
impl AppState {
    pub fn test_config() -> AppConfig {
        use crate::config::{Environment, JwtConfig, MailConfig, PasswordConfig, ResetConfig};

        AppConfig {
            environment: Environment::Production,
            public_url: "http://test.local".into(),
            database_url: "postgres://unused".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 60,
                cookie_expires_days: 1,
            },
            password: PasswordConfig {
                memory_kib: 8,
                iterations: 1,
                parallelism: 1,
            },
            reset: ResetConfig { ttl_minutes: 10 },
            mail: MailConfig {
                host: "localhost".into(),
                port: 2525,
                username: String::new(),
                password: String::new(),
                from: "Natours <test@natours.dev>".into(),
            },
        }
    }

    /// State over in-memory collaborators; the returned handles let tests
    /// inspect what was stored and mailed.
    pub fn fake_with(
        config: AppConfig,
        mailer: crate::testing::RecordingMailer,
    ) -> (
        Self,
        Arc<crate::testing::MemoryUserStore>,
        Arc<crate::testing::RecordingMailer>,
    ) {
        let store = Arc::new(crate::testing::MemoryUserStore::default());
        let mailer = Arc::new(mailer);
        let state = Self::from_parts(
            Arc::new(config),
            store.clone() as Arc<dyn UserStore>,
            mailer.clone() as Arc<dyn Mailer>,
        )
        .expect("test state");
        (state, store, mailer)
    }

    pub fn fake() -> (
        Self,
        Arc<crate::testing::MemoryUserStore>,
        Arc<crate::testing::RecordingMailer>,
    ) {
        Self::fake_with(Self::test_config(), crate::testing::RecordingMailer::default())
    }
}
