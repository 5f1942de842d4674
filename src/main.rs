//! Turnstile - authentication and session service

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use turnstile::{
    api::{self, AppState},
    config::Config,
    db::{
        self,
        repositories::{
            SqlxAccountRepository, SqlxContactRepository, SqlxLoginRepository,
            SqlxResetTokenRepository, SqlxUserSettingsRepository,
        },
    },
    services::{AuthService, ContactService, ResetService, SmtpMailer, UserSettingsService},
    session::SessionTable,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting turnstile...");

    // Load configuration
    let config = Arc::new(Config::load(Path::new("config.yml"))?);
    tracing::info!("Configuration loaded");

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Repositories
    let accounts = SqlxAccountRepository::boxed(pool.clone());
    let logins = SqlxLoginRepository::boxed(pool.clone());
    let tokens = SqlxResetTokenRepository::boxed(pool.clone());
    let user_settings = SqlxUserSettingsRepository::boxed(pool.clone());
    let messages = SqlxContactRepository::boxed(pool.clone());

    // Services
    let sessions = Arc::new(SessionTable::new(config.auth.max_sessions));
    let mailer = SmtpMailer::boxed(config.smtp.clone());
    let auth = Arc::new(AuthService::new(
        accounts.clone(),
        logins.clone(),
        sessions,
        config.auth.clone(),
    ));
    let reset = Arc::new(ResetService::new(
        accounts,
        logins,
        tokens,
        mailer.clone(),
        config.auth.clone(),
        config.server.public_url.clone(),
    ));
    let settings = Arc::new(UserSettingsService::new(user_settings));
    let contact = Arc::new(ContactService::new(
        messages,
        mailer,
        config.smtp.contact_email.clone(),
    ));

    // Background sweep for idle sessions and stale reset keys
    let sweeper = auth.clone();
    let purger = reset.clone();
    let sweep_interval = Duration::from_secs(config.auth.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.sweep_idle().await {
                tracing::error!("Idle session sweep failed: {}", e);
            }
            if let Err(e) = purger.purge_stale().await {
                tracing::error!("Reset key purge failed: {}", e);
            }
        }
    });

    let state = AppState {
        auth,
        reset,
        settings,
        contact,
        config: config.clone(),
    };
    let app = api::build_router(state, &config.server.cors_origin)?;

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
