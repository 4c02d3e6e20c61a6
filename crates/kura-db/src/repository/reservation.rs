//! # Reservation Repository
//!
//! Reservations and their per-customer receptions.
//!
//! ## Reception Status
//! ```text
//! created ──(deposit paid)──► deposited ──(receive paid)──► received
//!    │                           │  ▲                           │
//!    │                           │  └──────(return)─────────────┘
//!    └──────────► canceled ◄─────┘ (deposit canceled)
//! ```
//! Every status write is a compare-and-set on the expected current status.

use chrono::Utc;
use kura_core::cart::ReservationState;
use kura_core::{ReceptionStatus, Reservation, ReservationReception};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Repository for reservations and receptions.
pub struct ReservationRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> ReservationRepository<'c> {
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        ReservationRepository { conn }
    }

    /// Loads every reservation of the given products with all receptions.
    pub async fn states_for_products(&mut self, product_ids: &[String]) -> DbResult<Vec<ReservationState>> {
        if product_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new("SELECT * FROM reservations WHERE product_id IN (");
        let mut separated = query.separated(", ");
        for id in product_ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(") ORDER BY created_at ASC, id ASC");

        let reservations: Vec<Reservation> = query
            .build_query_as::<Reservation>()
            .fetch_all(&mut *self.conn)
            .await?;

        let mut states = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            let receptions = self.receptions(&reservation.id).await?;
            states.push(ReservationState {
                reservation,
                receptions,
            });
        }

        debug!(products = product_ids.len(), reservations = states.len(), "Loaded reservations");
        Ok(states)
    }

    pub async fn get_reservation(&mut self, id: &str) -> DbResult<Option<Reservation>> {
        let reservation =
            sqlx::query_as::<_, Reservation>("SELECT * FROM reservations WHERE id = ?1")
                .bind(id)
                .fetch_optional(&mut *self.conn)
                .await?;
        Ok(reservation)
    }

    pub async fn receptions(&mut self, reservation_id: &str) -> DbResult<Vec<ReservationReception>> {
        let rows = sqlx::query_as::<_, ReservationReception>(
            "SELECT * FROM reservation_receptions WHERE reservation_id = ?1 ORDER BY id ASC",
        )
        .bind(reservation_id)
        .fetch_all(&mut *self.conn)
        .await?;
        Ok(rows)
    }

    pub async fn get_reception(&mut self, id: &str) -> DbResult<Option<ReservationReception>> {
        let reception = sqlx::query_as::<_, ReservationReception>(
            "SELECT * FROM reservation_receptions WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *self.conn)
        .await?;
        Ok(reception)
    }

    pub async fn require_reception(&mut self, id: &str) -> DbResult<ReservationReception> {
        self.get_reception(id)
            .await?
            .ok_or_else(|| DbError::not_found("ReservationReception", id))
    }

    /// Moves a reception `from → to`, failing with `Conflict` if it is no
    /// longer in `from`.
    pub async fn set_reception_status(
        &mut self,
        id: &str,
        from: ReceptionStatus,
        to: ReceptionStatus,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE reservation_receptions SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        )
        .bind(to)
        .bind(Utc::now())
        .bind(id)
        .bind(from)
        .execute(&mut *self.conn)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.require_reception(id).await?;
            return Err(DbError::conflict(
                "ReservationReception",
                id,
                format!("expected {} but found {}", from, current.status),
            ));
        }

        debug!(reception_id = id, %from, %to, "Reception status changed");
        Ok(())
    }

    pub async fn insert_reservation(&mut self, reservation: &Reservation) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (
                id, store_id, product_id, display_name, deposit_price,
                limit_count, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&reservation.id)
        .bind(&reservation.store_id)
        .bind(&reservation.product_id)
        .bind(&reservation.display_name)
        .bind(reservation.deposit_price)
        .bind(reservation.limit_count)
        .bind(reservation.status)
        .bind(reservation.created_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }

    pub async fn insert_reception(&mut self, reception: &ReservationReception) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reservation_receptions (id, reservation_id, customer_id, item_count, status, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(&reception.id)
        .bind(&reception.reservation_id)
        .bind(&reception.customer_id)
        .bind(reception.item_count)
        .bind(reception.status)
        .bind(reception.updated_at)
        .execute(&mut *self.conn)
        .await?;
        Ok(())
    }
}
