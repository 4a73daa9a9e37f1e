//! Durable persistence for the booking queue (§4.1 Queue Store).
//!
//! Backed by Postgres via `sqlx`. Row mapping is manual (`row.try_get(...)`)
//! rather than `derive(FromRow)`, so the shape of `BookingQueueRow` can stay
//! decoupled from the exact column list.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clinic_schemas::{
    BookingEnvelope, BookingQueueRow, BookingStatus, DrugReceipt, PatientSnapshot,
    PaymentStatus, ServiceSnapshot,
};
use sqlx::Row;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "CLINIC_DATABASE_URL";

/// Connect to Postgres using `CLINIC_DATABASE_URL`.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to Postgres")?;

    Ok(pool)
}

/// Run embedded SQLx migrations.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("store migrate failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Typed errors this store can return; mirrors the taxonomy other
/// crates in this workspace classify against (`Conflict`, `Unavailable`,
/// `InvalidTransition`, `NotFound`).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("booking queue_id {0} not found")]
    NotFound(i64),

    #[error("illegal booking status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("duplicate booking")]
    Conflict,

    #[error("store unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_constraint_violation(&err, "uq_bookings_intent") {
            StoreError::Conflict
        } else {
            StoreError::Unavailable(err.into())
        }
    }
}

fn is_unique_constraint_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint() == Some(constraint),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Legal booking_status transitions (§4.5)
// ---------------------------------------------------------------------------

fn transition_is_legal(from: BookingStatus, to: BookingStatus) -> bool {
    use BookingStatus::*;
    matches!(
        (from, to),
        (Waiting, InProgress) | (Waiting, Completed) | (InProgress, Completed)
    ) || from == to // idempotent no-op, e.g. a repeated MarkComplete
}

// ---------------------------------------------------------------------------
// Create
// ---------------------------------------------------------------------------

/// Persist a freshly-paid booking. Idempotent under redelivery: a row whose
/// `(patient_id, service_id, appointment_at, created_at)` tuple already
/// exists is not duplicated — the existing row's `queue_id` is returned.
pub async fn create(pool: &PgPool, env: &BookingEnvelope) -> Result<BookingQueueRow, StoreError> {
    let row = sqlx::query(
        r#"
        insert into bookings (
            patient_id, patient_name, patient_email, patient_phone,
            service_id, service_name, service_code, service_cost,
            appointment_at, created_at, payment_status, booking_status
        )
        values ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12)
        on conflict on constraint uq_bookings_intent
            do update set patient_id = bookings.patient_id
        returning queue_id, patient_id, patient_name, patient_email, patient_phone,
                  service_id, service_name, service_code, service_cost,
                  appointment_at, created_at, payment_status, booking_status
        "#,
    )
    .bind(env.patient_id)
    .bind(&env.patient_name)
    .bind(&env.patient_email)
    .bind(&env.patient_phone_number)
    .bind(env.service_id)
    .bind(&env.service_name)
    .bind(&env.service_code)
    .bind(env.cost)
    .bind(env.appointment)
    .bind(env.created_at)
    .bind(payment_status_str(env.payment_status))
    .bind(env.booking_status.as_str())
    .fetch_one(pool)
    .await?;

    row_to_booking(row, None)
}

// ---------------------------------------------------------------------------
// UpdateStatus
// ---------------------------------------------------------------------------

/// Transition `booking_status`. Rejects illegal transitions with
/// `InvalidTransition`; a transition to the status the row already holds is
/// accepted as a no-op (concurrent `MarkComplete` calls must both succeed).
pub async fn update_status(
    pool: &PgPool,
    queue_id: i64,
    new_status: BookingStatus,
) -> Result<(), StoreError> {
    let current: Option<(String,)> =
        sqlx::query_as("select booking_status from bookings where queue_id = $1")
            .bind(queue_id)
            .fetch_optional(pool)
            .await?;

    let Some((current,)) = current else {
        return Err(StoreError::NotFound(queue_id));
    };

    let current_status = BookingStatus::parse(&current).ok_or_else(|| {
        StoreError::Unavailable(anyhow::anyhow!("unrecognized booking_status: {current}"))
    })?;

    if !transition_is_legal(current_status, new_status) {
        return Err(StoreError::InvalidTransition {
            from: current_status.as_str().to_string(),
            to: new_status.as_str().to_string(),
        });
    }

    sqlx::query("update bookings set booking_status = $1 where queue_id = $2")
        .bind(new_status.as_str())
        .bind(queue_id)
        .execute(pool)
        .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// GetAll
// ---------------------------------------------------------------------------

/// Stable order by `queue_id` ascending, with the total row count for
/// pagination.
pub async fn get_all(
    pool: &PgPool,
    offset: i64,
    limit: i64,
) -> Result<(Vec<BookingQueueRow>, i64), StoreError> {
    let (total,): (i64,) = sqlx::query_as("select count(*)::bigint from bookings")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query(
        r#"
        select queue_id, patient_id, patient_name, patient_email, patient_phone,
               service_id, service_name, service_code, service_cost,
               appointment_at, created_at, payment_status, booking_status
        from bookings
        order by queue_id asc
        offset $1 limit $2
        "#,
    )
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row_to_booking(row, None)?);
    }
    Ok((out, total))
}

// ---------------------------------------------------------------------------
// GetHistoryByPatient
// ---------------------------------------------------------------------------

/// Filtered by `patient_id`, ordered by `created_at` descending (most recent
/// booking first).
pub async fn get_history_by_patient(
    pool: &PgPool,
    patient_id: Uuid,
    offset: i64,
    limit: i64,
) -> Result<Vec<BookingQueueRow>, StoreError> {
    let rows = sqlx::query(
        r#"
        select queue_id, patient_id, patient_name, patient_email, patient_phone,
               service_id, service_name, service_code, service_cost,
               appointment_at, created_at, payment_status, booking_status
        from bookings
        where patient_id = $1
        order by created_at desc
        offset $2 limit $3
        "#,
    )
    .bind(patient_id)
    .bind(offset)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(row_to_booking(row, None)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// GetDetailByQueueId
// ---------------------------------------------------------------------------

/// Joins the optional drug receipt.
pub async fn get_detail_by_queue_id(
    pool: &PgPool,
    queue_id: i64,
) -> Result<Option<BookingQueueRow>, StoreError> {
    let row = sqlx::query(
        r#"
        select queue_id, patient_id, patient_name, patient_email, patient_phone,
               service_id, service_name, service_code, service_cost,
               appointment_at, created_at, payment_status, booking_status
        from bookings
        where queue_id = $1
        "#,
    )
    .bind(queue_id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else { return Ok(None) };

    let receipt = sqlx::query(
        "select queue_id, drug_name, usage_instructions, notes from drug_receipts where queue_id = $1",
    )
    .bind(queue_id)
    .fetch_optional(pool)
    .await?;

    let receipt = receipt
        .map(|r| -> Result<DrugReceipt, StoreError> {
            Ok(DrugReceipt {
                queue_id: r.try_get("queue_id").map_err(sqlx::Error::from)?,
                drug_name: r.try_get("drug_name").map_err(sqlx::Error::from)?,
                usage_instructions: r
                    .try_get("usage_instructions")
                    .map_err(sqlx::Error::from)?,
                notes: r.try_get("notes").map_err(sqlx::Error::from)?,
            })
        })
        .transpose()?;

    Ok(Some(row_to_booking(row, receipt)?))
}

// ---------------------------------------------------------------------------
// DeleteByQueueId
// ---------------------------------------------------------------------------

pub async fn delete_by_queue_id(pool: &PgPool, queue_id: i64) -> Result<(), StoreError> {
    let result = sqlx::query("delete from bookings where queue_id = $1")
        .bind(queue_id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(queue_id));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn payment_status_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::WaitingForPayment => "waiting_for_payment",
        PaymentStatus::Paid => "paid",
    }
}

fn row_to_booking(
    row: sqlx::postgres::PgRow,
    drug_receipt: Option<DrugReceipt>,
) -> Result<BookingQueueRow, StoreError> {
    let payment_status: String = row.try_get("payment_status").map_err(sqlx::Error::from)?;
    let booking_status: String = row.try_get("booking_status").map_err(sqlx::Error::from)?;

    let payment_status = match payment_status.as_str() {
        "waiting_for_payment" => PaymentStatus::WaitingForPayment,
        "paid" => PaymentStatus::Paid,
        other => {
            return Err(StoreError::Unavailable(anyhow::anyhow!(
                "unrecognized payment_status: {other}"
            )))
        }
    };

    let booking_status = BookingStatus::parse(&booking_status).ok_or_else(|| {
        StoreError::Unavailable(anyhow::anyhow!(
            "unrecognized booking_status: {booking_status}"
        ))
    })?;

    Ok(BookingQueueRow {
        queue_id: row.try_get("queue_id").map_err(sqlx::Error::from)?,
        patient: PatientSnapshot {
            patient_id: row.try_get("patient_id").map_err(sqlx::Error::from)?,
            patient_name: row.try_get("patient_name").map_err(sqlx::Error::from)?,
            patient_email: row.try_get("patient_email").map_err(sqlx::Error::from)?,
            patient_phone: row.try_get("patient_phone").map_err(sqlx::Error::from)?,
        },
        service: ServiceSnapshot {
            service_id: row.try_get("service_id").map_err(sqlx::Error::from)?,
            service_name: row.try_get("service_name").map_err(sqlx::Error::from)?,
            service_code: row.try_get("service_code").map_err(sqlx::Error::from)?,
            service_cost: row.try_get("service_cost").map_err(sqlx::Error::from)?,
        },
        appointment_at: row.try_get("appointment_at").map_err(sqlx::Error::from)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(sqlx::Error::from)?,
        payment_status,
        booking_status,
        drug_receipt,
    })
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_to_in_progress_to_completed_is_legal() {
        assert!(transition_is_legal(
            BookingStatus::Waiting,
            BookingStatus::InProgress
        ));
        assert!(transition_is_legal(
            BookingStatus::InProgress,
            BookingStatus::Completed
        ));
    }

    #[test]
    fn waiting_can_skip_straight_to_completed() {
        assert!(transition_is_legal(
            BookingStatus::Waiting,
            BookingStatus::Completed
        ));
    }

    #[test]
    fn completed_is_terminal() {
        assert!(!transition_is_legal(
            BookingStatus::Completed,
            BookingStatus::Waiting
        ));
        assert!(!transition_is_legal(
            BookingStatus::Completed,
            BookingStatus::InProgress
        ));
    }

    #[test]
    fn repeated_completion_is_a_legal_noop() {
        assert!(transition_is_legal(
            BookingStatus::Completed,
            BookingStatus::Completed
        ));
    }

    #[test]
    fn in_progress_cannot_revert_to_waiting() {
        assert!(!transition_is_legal(
            BookingStatus::InProgress,
            BookingStatus::Waiting
        ));
    }
}
