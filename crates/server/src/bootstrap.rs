use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::info;

use bookline_agent::llm::{ModelClient, ModelError};
use bookline_agent::{ConversationRuntime, RuntimeServices, RuntimeSettings};
use bookline_channels::sender::{ChannelError, ChannelSender};
use bookline_channels::telegram::TelegramSender;
use bookline_channels::whatsapp::WhatsAppSender;
use bookline_core::budget::BudgetGuard;
use bookline_core::collab::{CrmClient, CrmError, OutboundEnqueuer};
use bookline_core::config::{AppConfig, ConfigError, LoadOptions};
use bookline_core::idempotency::IdempotencyStore;
use bookline_core::knowledge::{KnowledgeBase, KnowledgeError};
use bookline_db::repositories::{
    DedupRepository, FallbackRepository, OutboundRepository, SessionRepository,
    SqlDedupRepository, SqlFallbackRepository, SqlIdempotencyStore, SqlOutboundRepository,
    SqlSessionRepository,
};
use bookline_db::{connect_with_settings, migrations, DbPool};

use crate::crm::HttpCrmClient;
use crate::dispatcher::{ChannelDispatcher, DispatcherSettings};
use crate::model::HttpModelClient;
use crate::watchdog::{Watchdog, WatchdogSettings};
use crate::webhooks::GatewayState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<ConversationRuntime>,
    pub dispatchers: Vec<ChannelDispatcher>,
    pub watchdog: Arc<Watchdog>,
    pub gateway: GatewayState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("knowledge base failed to load: {0}")]
    Knowledge(#[from] KnowledgeError),
    #[error("CRM client setup failed: {0}")]
    Crm(#[from] CrmError),
    #[error("model client setup failed: {0}")]
    Model(#[from] ModelError),
    #[error("channel sender setup failed: {0}")]
    Channel(#[from] ChannelError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "bootstrap_started", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(event_name = "database_connected", "database connection established");

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(event_name = "migrations_applied", "database migrations applied");

    let sessions = Arc::new(SqlSessionRepository::new(db_pool.clone()));
    let outbound = Arc::new(SqlOutboundRepository::new(db_pool.clone()));
    let fallback = Arc::new(SqlFallbackRepository::new(db_pool.clone()));
    let dedup = Arc::new(SqlDedupRepository::new(db_pool.clone()));
    let idempotency = Arc::new(SqlIdempotencyStore::new(db_pool.clone()));

    let knowledge = Arc::new(KnowledgeBase::load(&config.knowledge.path)?);
    let crm: Arc<dyn CrmClient> = Arc::new(HttpCrmClient::new(&config.crm)?);
    let model: Arc<dyn ModelClient> = Arc::new(HttpModelClient::new(&config.model)?);
    let budget = Arc::new(BudgetGuard::new(config.budget.clone(), Utc::now()));

    let services = RuntimeServices {
        sessions: Arc::clone(&sessions) as Arc<dyn SessionRepository>,
        dedup: Arc::clone(&dedup) as Arc<dyn DedupRepository>,
        fallback: Arc::clone(&fallback) as Arc<dyn FallbackRepository>,
        outbound: Arc::clone(&outbound) as Arc<dyn OutboundEnqueuer>,
        idempotency: idempotency as Arc<dyn IdempotencyStore>,
        crm: Arc::clone(&crm),
        model,
        knowledge,
        budget: Arc::clone(&budget),
    };
    let runtime =
        Arc::new(ConversationRuntime::new(services, RuntimeSettings::from_config(&config)));

    let dispatchers = build_dispatchers(&config, &outbound)?;
    let watchdog = Arc::new(Watchdog::new(
        Arc::clone(&runtime),
        Arc::clone(&sessions) as Arc<dyn SessionRepository>,
        Arc::clone(&outbound) as Arc<dyn OutboundRepository>,
        fallback as Arc<dyn FallbackRepository>,
        dedup as Arc<dyn DedupRepository>,
        budget,
        crm,
        WatchdogSettings {
            interval: Duration::from_secs(config.timing.watchdog_interval_secs),
            admin_chat_id: config.channels.admin_chat_id.clone(),
        },
    ));
    let gateway = GatewayState::new(
        Arc::clone(&runtime),
        config.channels.telegram_webhook_secret.clone(),
        config.channels.whatsapp_webhook_secret.clone(),
        config.channels.admin_chat_id.clone(),
    );

    info!(
        event_name = "bootstrap_done",
        dispatchers = dispatchers.len(),
        "application bootstrap complete"
    );
    Ok(Application { config, db_pool, runtime, dispatchers, watchdog, gateway })
}

/// One dispatcher per configured channel. Telegram is mandatory; WhatsApp
/// joins when its Cloud API credentials are present.
fn build_dispatchers(
    config: &AppConfig,
    outbound: &Arc<SqlOutboundRepository>,
) -> Result<Vec<ChannelDispatcher>, BootstrapError> {
    let timeout = Duration::from_secs(10);
    let mut dispatchers = Vec::new();

    let telegram: Arc<dyn ChannelSender> = Arc::new(TelegramSender::new(
        config.channels.telegram_bot_token.clone(),
        timeout,
    )?);
    dispatchers.push(ChannelDispatcher::new(
        Arc::clone(outbound) as Arc<dyn OutboundRepository>,
        telegram,
        DispatcherSettings::default(),
    ));

    if let (Some(api_key), Some(phone_number_id)) = (
        config.channels.whatsapp_api_key.as_ref(),
        config.channels.whatsapp_phone_number_id.as_ref(),
    ) {
        let whatsapp: Arc<dyn ChannelSender> = Arc::new(WhatsAppSender::new(
            phone_number_id.clone(),
            api_key.clone(),
            timeout,
        )?);
        dispatchers.push(ChannelDispatcher::new(
            Arc::clone(outbound) as Arc<dyn OutboundRepository>,
            whatsapp,
            DispatcherSettings::default(),
        ));
    }

    Ok(dispatchers)
}
