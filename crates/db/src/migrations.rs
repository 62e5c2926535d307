use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "session",
        "outbound_queue",
        "dead_letter",
        "idempotency_lock",
        "fallback_queue",
        "dedup_mark",
        "idx_session_state",
        "idx_session_expires_at",
        "idx_outbound_due",
        "idx_dead_letter_channel",
        "idx_fallback_pending",
        "idx_dedup_expires_at",
    ];

    #[tokio::test]
    async fn migrations_create_the_managed_schema() {
        let pool =
            connect_with_settings("sqlite:file:migrations_schema?mode=memory&cache=shared", 1, 30)
                .await
                .expect("connect test pool");
        run_pending(&pool).await.expect("run migrations");

        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type IN ('table', 'index') ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .expect("list schema objects");
        let names: Vec<String> =
            rows.into_iter().map(|row| row.get::<String, _>("name")).collect();

        for object in MANAGED_SCHEMA_OBJECTS {
            assert!(names.iter().any(|name| name == object), "missing schema object `{object}`");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool =
            connect_with_settings("sqlite:file:migrations_rerun?mode=memory&cache=shared", 1, 30)
                .await
                .expect("connect test pool");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run");
    }
}
