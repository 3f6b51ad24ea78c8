use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DomainError;
use crate::models::NotificationRow;

/// Capability for emitting user-facing notifications. The booking engine
/// receives an implementation at construction so tests can substitute a
/// fake instead of touching a delivery channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<NotificationRow, DomainError>;
}

/// Persists notifications to the `notification` table. The row is stored
/// even when the recipient has no push channel registered; push delivery is
/// a separate best-effort concern outside this server.
pub struct PgNotifier;

#[async_trait]
impl Notifier for PgNotifier {
    async fn notify(
        &self,
        pool: &PgPool,
        user_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<NotificationRow, DomainError> {
        let row: NotificationRow = sqlx::query_as(
            r#"
            INSERT INTO notification (user_id, title, message, is_read)
            VALUES ($1, $2, $3, false)
            RETURNING notification_id, user_id, title, message, is_read, created_at
            "#,
        )
        .bind(user_id)
        .bind(title)
        .bind(message)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }
}

/// Discards notifications; used by tests.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(
        &self,
        _pool: &PgPool,
        user_id: Uuid,
        title: &str,
        message: &str,
    ) -> Result<NotificationRow, DomainError> {
        Ok(NotificationRow {
            notification_id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            message: message.to_string(),
            is_read: false,
            created_at: Utc::now(),
        })
    }
}

/// Most recent first, owned by the recipient.
pub async fn list_notifications(
    pool: &PgPool,
    user_id: Uuid,
) -> Result<Vec<NotificationRow>, DomainError> {
    let rows: Vec<NotificationRow> = sqlx::query_as(
        r#"
        SELECT notification_id, user_id, title, message, is_read, created_at
        FROM notification
        WHERE user_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Mark one of the recipient's notifications as read.
pub async fn mark_read(
    pool: &PgPool,
    notification_id: Uuid,
    user_id: Uuid,
) -> Result<NotificationRow, DomainError> {
    let row: Option<NotificationRow> = sqlx::query_as(
        r#"
        UPDATE notification
        SET is_read = true
        WHERE notification_id = $1 AND user_id = $2
        RETURNING notification_id, user_id, title, message, is_read, created_at
        "#,
    )
    .bind(notification_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    row.ok_or(DomainError::NotificationNotFound)
}
