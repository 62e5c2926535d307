use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use bookline_agent::HealthState;
use bookline_db::DbPool;

/// Shared by the `/health` handler: the pool for the liveness query and the
/// dependency flags maintained by the runtime and the watchdog probes.
#[derive(Clone)]
pub struct HealthServerState {
    db_pool: DbPool,
    dependencies: Arc<HealthState>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub crm: HealthCheck,
    pub model: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, dependencies: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(HealthServerState { db_pool, dependencies })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    dependencies: Arc<HealthState>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "health_endpoint_started",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, dependencies)).await {
            error!(
                event_name = "health_endpoint_error",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

/// Only database loss makes the process not-ready; CRM and model outages
/// are reported but the conversation layer keeps answering in degraded
/// mode, so the endpoint stays green for the orchestrator.
pub async fn health(
    State(state): State<HealthServerState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        crm: dependency_check(state.dependencies.crm(), "CRM"),
        model: dependency_check(state.dependencies.model(), "model"),
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

fn dependency_check(healthy: bool, name: &str) -> HealthCheck {
    if healthy {
        HealthCheck { status: "ready", detail: format!("{name} reachable at last probe") }
    } else {
        HealthCheck { status: "degraded", detail: format!("{name} failed its last probe") }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};

    use bookline_agent::HealthState;
    use bookline_db::connect_with_settings;

    use crate::health::{health, HealthServerState};

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        let dependencies = Arc::new(HealthState::new());

        let (status, Json(payload)) =
            health(State(HealthServerState { db_pool: pool.clone(), dependencies })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.crm.status, "ready");

        pool.close().await;
    }

    #[tokio::test]
    async fn crm_outage_is_reported_but_keeps_the_process_ready() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        let dependencies = Arc::new(HealthState::new());
        dependencies.set_crm(false);

        let (status, Json(payload)) =
            health(State(HealthServerState { db_pool: pool.clone(), dependencies })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.crm.status, "degraded");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 5)
            .await
            .expect("pool should connect");
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthServerState {
            db_pool: pool,
            dependencies: Arc::new(HealthState::new()),
        }))
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
    }
}
