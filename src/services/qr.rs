use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::DomainError;

/// Denormalized QR payload stored on the appointment. `image_ref` points at
/// the rendered artifact; rendering itself happens outside this server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrData {
    pub id: String,
    pub content: String,
    pub timestamp: i64,
    pub image_ref: String,
}

pub fn build_qr_data(appointment_id: Uuid, content: &str, issued_at: DateTime<Utc>) -> QrData {
    QrData {
        id: appointment_id.to_string(),
        content: content.to_string(),
        timestamp: issued_at.timestamp(),
        image_ref: format!("qr/{appointment_id}.png"),
    }
}

/// Capability for attaching a QR artifact to an appointment. Reissuing
/// replaces the prior payload.
#[async_trait]
pub trait QrIssuer: Send + Sync {
    async fn issue(
        &self,
        pool: &PgPool,
        appointment_id: Uuid,
        content: &str,
    ) -> Result<QrData, DomainError>;
}

/// Writes the payload into `appointment.qr_data`.
pub struct PgQrIssuer;

#[async_trait]
impl QrIssuer for PgQrIssuer {
    async fn issue(
        &self,
        pool: &PgPool,
        appointment_id: Uuid,
        content: &str,
    ) -> Result<QrData, DomainError> {
        let data = build_qr_data(appointment_id, content, Utc::now());
        let payload = serde_json::to_value(&data)
            .map_err(|e| DomainError::Database(format!("qr payload encode: {e}")))?;

        let updated = sqlx::query(
            r#"UPDATE appointment SET qr_data = $2 WHERE appointment_id = $1"#,
        )
        .bind(appointment_id)
        .bind(payload)
        .execute(pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DomainError::AppointmentNotFound);
        }
        Ok(data)
    }
}

/// Issues nothing; used by tests.
pub struct NoopQrIssuer;

#[async_trait]
impl QrIssuer for NoopQrIssuer {
    async fn issue(
        &self,
        _pool: &PgPool,
        appointment_id: Uuid,
        content: &str,
    ) -> Result<QrData, DomainError> {
        Ok(build_qr_data(appointment_id, content, Utc::now()))
    }
}
