//! Inbound webhook surface. Each handler verifies authenticity, normalizes
//! the payload and hands the message to the conversation runtime on a
//! detached task; the channel gets its ack before any orchestration work
//! runs. Unparseable payloads are acked too, otherwise Telegram redelivers
//! them forever.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use bookline_agent::ConversationRuntime;
use bookline_channels::telegram::{self, SECRET_TOKEN_HEADER};
use bookline_channels::whatsapp::{self, SIGNATURE_HEADER};
use bookline_channels::{verify_hmac_signature, verify_secret_token};
use bookline_core::domain::message::{Channel, InboundMessage};
use bookline_core::domain::session::SessionKey;
use bookline_core::errors::ApplicationError;

#[derive(Clone)]
pub struct GatewayState {
    runtime: Arc<ConversationRuntime>,
    telegram_webhook_secret: SecretString,
    whatsapp_webhook_secret: Option<SecretString>,
    admin_chat_id: String,
}

impl GatewayState {
    pub fn new(
        runtime: Arc<ConversationRuntime>,
        telegram_webhook_secret: SecretString,
        whatsapp_webhook_secret: Option<SecretString>,
        admin_chat_id: String,
    ) -> Self {
        Self { runtime, telegram_webhook_secret, whatsapp_webhook_secret, admin_chat_id }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/webhooks/telegram", post(telegram_webhook))
        .route("/webhooks/whatsapp", get(whatsapp_verify).post(whatsapp_webhook))
        .with_state(state)
}

pub async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let presented = headers
        .get(SECRET_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !verify_secret_token(state.telegram_webhook_secret.expose_secret(), presented) {
        warn!(event_name = "webhook_rejected", channel = "telegram", "bad secret token");
        return StatusCode::UNAUTHORIZED;
    }

    let update = match serde_json::from_slice::<telegram::Update>(&body) {
        Ok(update) => update,
        Err(error) => {
            warn!(
                event_name = "webhook_unparseable",
                channel = "telegram",
                error = %error,
                "acking unparseable update"
            );
            return StatusCode::OK;
        }
    };

    if let Some(message) = telegram::parse_update(update) {
        if message.chat_id == state.admin_chat_id {
            dispatch_admin_command(&state, message);
        } else {
            dispatch(&state, message);
        }
    }
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Webhook registration handshake: echo the challenge back when the verify
/// token matches our configured secret.
pub async fn whatsapp_verify(
    State(state): State<GatewayState>,
    Query(params): Query<VerifyParams>,
) -> (StatusCode, String) {
    let Some(secret) = state.whatsapp_webhook_secret.as_ref() else {
        return (StatusCode::FORBIDDEN, String::new());
    };
    let token_matches = params
        .verify_token
        .as_deref()
        .is_some_and(|token| verify_secret_token(secret.expose_secret(), token));
    if params.mode.as_deref() == Some("subscribe") && token_matches {
        info!(event_name = "webhook_verified", channel = "whatsapp", "handshake accepted");
        (StatusCode::OK, params.challenge.unwrap_or_default())
    } else {
        (StatusCode::FORBIDDEN, String::new())
    }
}

pub async fn whatsapp_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(secret) = state.whatsapp_webhook_secret.as_ref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if !verify_hmac_signature(secret.expose_secret().as_bytes(), &body, signature) {
            warn!(event_name = "webhook_rejected", channel = "whatsapp", "bad signature");
            return StatusCode::UNAUTHORIZED;
        }
    } else {
        debug!(
            event_name = "webhook_unverified",
            channel = "whatsapp",
            "no webhook secret configured, accepting unsigned payload"
        );
    }

    let payload = match serde_json::from_slice::<whatsapp::WebhookPayload>(&body) {
        Ok(payload) => payload,
        Err(error) => {
            warn!(
                event_name = "webhook_unparseable",
                channel = "whatsapp",
                error = %error,
                "acking unparseable payload"
            );
            return StatusCode::OK;
        }
    };

    for message in whatsapp::parse_webhook(payload) {
        dispatch(&state, message);
    }
    StatusCode::OK
}

/// Re-delivery attempts for a session whose processing lock is held. The
/// channel got its 200 at ingestion, so redelivery is on us.
const BUSY_RETRIES: u32 = 5;
const BUSY_RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(500);

fn dispatch(state: &GatewayState, message: InboundMessage) {
    let runtime = Arc::clone(&state.runtime);
    tokio::spawn(async move {
        let session = SessionKey::new(message.channel, message.chat_id.clone());
        for attempt in 0..BUSY_RETRIES {
            match runtime.handle_inbound(message.clone()).await {
                Ok(()) => return,
                Err(ApplicationError::SessionBusy { .. }) if attempt + 1 < BUSY_RETRIES => {
                    debug!(
                        event_name = "inbound_requeued",
                        session = %session,
                        attempt = attempt + 1,
                        "session busy, retrying delivery"
                    );
                    tokio::time::sleep(BUSY_RETRY_DELAY).await;
                }
                Err(error) => {
                    error!(
                        event_name = "inbound_failed",
                        session = %session,
                        error = %error,
                        "inbound message processing failed"
                    );
                    return;
                }
            }
        }
    });
}

/// Commands the studio administrator types into the operations chat.
#[derive(Debug, PartialEq, Eq)]
pub enum AdminCommand {
    Reply { key: SessionKey, text: String },
    Close { key: SessionKey },
    ResetBudget,
}

pub fn parse_admin_command(text: &str) -> Option<AdminCommand> {
    let mut parts = text.trim().splitn(3, char::is_whitespace);
    let verb = parts.next()?;
    match verb {
        "/reply" => {
            let key = parse_session_key(parts.next()?)?;
            let text = parts.next()?.trim();
            (!text.is_empty()).then(|| AdminCommand::Reply { key, text: text.to_string() })
        }
        "/close" => Some(AdminCommand::Close { key: parse_session_key(parts.next()?)? }),
        "/reset_budget" => parts.next().is_none().then_some(AdminCommand::ResetBudget),
        _ => None,
    }
}

fn parse_session_key(raw: &str) -> Option<SessionKey> {
    let (channel, chat_id) = raw.split_once(':')?;
    let channel = Channel::parse(channel)?;
    (!chat_id.is_empty()).then(|| SessionKey::new(channel, chat_id))
}

fn dispatch_admin_command(state: &GatewayState, message: InboundMessage) {
    let Some(command) = parse_admin_command(&message.text) else {
        debug!(
            event_name = "admin_command_ignored",
            text = %message.text,
            "message in admin chat is not a recognized command"
        );
        return;
    };
    let runtime = Arc::clone(&state.runtime);
    tokio::spawn(async move {
        let result = match command {
            AdminCommand::Reply { key, text } => runtime.handle_admin_reply(&key, text).await,
            AdminCommand::Close { key } => runtime.handle_admin_close(&key).await,
            AdminCommand::ResetBudget => {
                runtime.reset_daily_budget(chrono::Utc::now());
                info!(event_name = "daily_cost_reset", "daily cost counter reset by admin");
                Ok(())
            }
        };
        if let Err(error) = result {
            error!(
                event_name = "admin_command_failed",
                error = %error,
                "admin command processing failed"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    use async_trait::async_trait;
    use axum::body::Bytes;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, HeaderValue, StatusCode};
    use chrono::{Duration, Utc};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use bookline_agent::llm::{ModelClient, ModelError};
    use bookline_agent::{ConversationRuntime, RuntimeServices, RuntimeSettings};
    use bookline_core::budget::BudgetGuard;
    use bookline_core::collab::{CrmClient, CrmError, OutboundEnqueuer};
    use bookline_core::config::BudgetConfig;
    use bookline_core::degradation::BacklogThresholds;
    use bookline_core::domain::booking::BookingRequest;
    use bookline_core::domain::crm::{
        ClientRecord, DateRange, Group, Reservation, ScheduleEntry,
    };
    use bookline_core::domain::message::Channel;
    use bookline_core::domain::session::SessionKey;
    use bookline_core::idempotency::IdempotencyStore;
    use bookline_core::knowledge::{KnowledgeBase, Topic};
    use bookline_db::repositories::{
        DedupRepository, FallbackRepository, SessionRepository, SqlDedupRepository,
        SqlFallbackRepository, SqlIdempotencyStore, SqlOutboundRepository, SqlSessionRepository,
    };
    use bookline_db::{connect_with_settings, migrations};

    use super::{
        parse_admin_command, telegram_webhook, whatsapp_verify, whatsapp_webhook, AdminCommand,
        GatewayState, VerifyParams,
    };
    use bookline_channels::telegram::SECRET_TOKEN_HEADER;
    use bookline_channels::whatsapp::SIGNATURE_HEADER;

    struct DownCrm;

    #[async_trait]
    impl CrmClient for DownCrm {
        async fn schedule(&self, _range: DateRange) -> Result<Vec<ScheduleEntry>, CrmError> {
            Err(CrmError::Transient { detail: "down".into() })
        }
        async fn groups(&self) -> Result<Vec<Group>, CrmError> {
            Err(CrmError::Transient { detail: "down".into() })
        }
        async fn find_client_by_phone(
            &self,
            _phone: &str,
        ) -> Result<Option<ClientRecord>, CrmError> {
            Err(CrmError::Transient { detail: "down".into() })
        }
        async fn create_client(&self, _name: &str, _phone: &str) -> Result<ClientRecord, CrmError> {
            Err(CrmError::Transient { detail: "down".into() })
        }
        async fn create_booking(&self, _request: &BookingRequest) -> Result<Reservation, CrmError> {
            Err(CrmError::Transient { detail: "down".into() })
        }
        async fn future_bookings(&self, _phone: &str) -> Result<Vec<Reservation>, CrmError> {
            Err(CrmError::Transient { detail: "down".into() })
        }
        async fn cancel_booking(&self, _reservation: &Reservation) -> Result<(), CrmError> {
            Err(CrmError::Transient { detail: "down".into() })
        }
        async fn health_check(&self) -> Result<(), CrmError> {
            Ok(())
        }
    }

    struct DownModel;

    #[async_trait]
    impl ModelClient for DownModel {
        async fn complete(&self, _prompt: &str) -> Result<String, ModelError> {
            Err(ModelError::Unavailable { detail: "down".into() })
        }
    }

    async fn gateway(name: &str) -> GatewayState {
        let url = format!("sqlite:file:{name}?mode=memory&cache=shared");
        let pool = connect_with_settings(&url, 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");

        let services = RuntimeServices {
            sessions: Arc::new(SqlSessionRepository::new(pool.clone()))
                as Arc<dyn SessionRepository>,
            dedup: Arc::new(SqlDedupRepository::new(pool.clone())) as Arc<dyn DedupRepository>,
            fallback: Arc::new(SqlFallbackRepository::new(pool.clone()))
                as Arc<dyn FallbackRepository>,
            outbound: Arc::new(SqlOutboundRepository::new(pool.clone()))
                as Arc<dyn OutboundEnqueuer>,
            idempotency: Arc::new(SqlIdempotencyStore::new(pool)) as Arc<dyn IdempotencyStore>,
            crm: Arc::new(DownCrm) as Arc<dyn CrmClient>,
            model: Arc::new(DownModel) as Arc<dyn ModelClient>,
            knowledge: Arc::new(KnowledgeBase::from_parts(
                vec![Topic {
                    key: "address".into(),
                    keywords: vec!["address".into()],
                    answer: "We're at 12 Main Street.".into(),
                }],
                BTreeMap::new(),
            )),
            budget: Arc::new(BudgetGuard::new(
                BudgetConfig {
                    max_tokens_per_hour: u64::MAX,
                    max_tokens_per_day: u64::MAX,
                    max_cost_per_day_cents: u64::MAX,
                    max_requests_per_minute: u64::MAX,
                    max_errors_per_hour: u64::MAX,
                },
                Utc::now(),
            )),
        };
        let settings = RuntimeSettings {
            session_ttl: Duration::hours(24),
            processing_lock_ttl: Duration::seconds(30),
            crm_deadline: StdDuration::from_secs(5),
            model_deadline: StdDuration::from_secs(5),
            max_reask_attempts: 1,
            utc_offset_minutes: 600,
            recovery_dwell: Duration::seconds(60),
            backlog: BacklogThresholds { dead_letter_depth: 10, fallback_depth: 5 },
            admin_chat_id: "admin-chat".into(),
            worker_id: "worker-test".into(),
        };

        GatewayState::new(
            Arc::new(ConversationRuntime::new(services, settings)),
            "hook-secret".to_string().into(),
            Some("app-secret".to_string().into()),
            "admin-chat".into(),
        )
    }

    fn sign(secret: &[u8], body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret).expect("hmac accepts any key length");
        mac.update(body);
        let mut hex = String::from("sha256=");
        for byte in mac.finalize().into_bytes() {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }

    #[tokio::test]
    async fn telegram_rejects_a_wrong_secret_token() {
        let state = gateway("webhook_tg_reject").await;
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_TOKEN_HEADER, HeaderValue::from_static("wrong"));

        let status =
            telegram_webhook(State(state), headers, Bytes::from_static(b"{}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn telegram_acks_an_unparseable_update() {
        let state = gateway("webhook_tg_garbage").await;
        let mut headers = HeaderMap::new();
        headers.insert(SECRET_TOKEN_HEADER, HeaderValue::from_static("hook-secret"));

        let status =
            telegram_webhook(State(state), headers, Bytes::from_static(b"not json")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn whatsapp_rejects_a_bad_signature() {
        let state = gateway("webhook_wa_reject").await;
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("sha256=00"));

        let status =
            whatsapp_webhook(State(state), headers, Bytes::from_static(b"{\"entry\":[]}")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn whatsapp_accepts_a_signed_empty_payload() {
        let state = gateway("webhook_wa_ok").await;
        let body = b"{\"entry\":[]}";
        let mut headers = HeaderMap::new();
        let signature = sign(b"app-secret", body);
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).expect("header"));

        let status =
            whatsapp_webhook(State(state), headers, Bytes::from_static(body)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn whatsapp_handshake_echoes_the_challenge() {
        let state = gateway("webhook_wa_verify").await;
        let params = VerifyParams {
            mode: Some("subscribe".into()),
            verify_token: Some("app-secret".into()),
            challenge: Some("12345".into()),
        };

        let (status, echoed) = whatsapp_verify(State(state.clone()), Query(params)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(echoed, "12345");

        let params = VerifyParams {
            mode: Some("subscribe".into()),
            verify_token: Some("wrong".into()),
            challenge: Some("12345".into()),
        };
        let (status, _) = whatsapp_verify(State(state), Query(params)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn admin_commands_parse_and_reject_garbage() {
        assert_eq!(
            parse_admin_command("/reply telegram:42 Looking into it"),
            Some(AdminCommand::Reply {
                key: SessionKey::new(Channel::Telegram, "42"),
                text: "Looking into it".into(),
            })
        );
        assert_eq!(
            parse_admin_command("/close whatsapp:79990001122"),
            Some(AdminCommand::Close {
                key: SessionKey::new(Channel::Whatsapp, "79990001122"),
            })
        );
        assert_eq!(parse_admin_command("/reset_budget"), Some(AdminCommand::ResetBudget));
        assert_eq!(parse_admin_command("/reply telegram:42"), None);
        assert_eq!(parse_admin_command("/close sms:42"), None);
        assert_eq!(parse_admin_command("/reset_budget now please"), None);
        assert_eq!(parse_admin_command("just chatting"), None);
    }
}
