use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use diesel::dsl::sql;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::sql_types::Integer;
use crate::error::BookingError;
use crate::models::{NewSlot, Slot, SlotStatus};
use crate::schema::slots;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Guard condition for the atomic booked-counter adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustGuard {
    /// Apply only if `booked + quantity <= capacity` still holds.
    WithinCapacity,
    /// Always apply, clamping the result at zero.
    FloorAtZero,
}

#[derive(Debug, Clone, Default)]
pub struct SlotFilters {
    pub product_id: Option<i32>,
    pub status: Option<SlotStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub future_from: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: i64,
    pub per_page: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest { page: 1, per_page: 50 }
    }
}

impl PageRequest {
    pub fn all() -> Self {
        PageRequest { page: 1, per_page: i64::MAX }
    }
}

#[derive(Debug)]
pub struct SlotPage {
    pub slots: Vec<Slot>,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone)]
pub struct SlotCreate {
    pub product_id: i32,
    pub start_datetime: NaiveDateTime,
    pub end_datetime: Option<NaiveDateTime>,
    pub capacity: i32,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, Default)]
pub struct SlotUpdate {
    pub start_datetime: Option<NaiveDateTime>,
    // Some(None) clears the end time.
    pub end_datetime: Option<Option<NaiveDateTime>>,
    pub capacity: Option<i32>,
    pub status: Option<SlotStatus>,
}

/// Persistence for slot records. `adjust_booked` is the sole mutator of the
/// `booked` counter; everything else follows last-write-wins semantics.
pub trait SlotStore: Send + Sync {
    fn create(&self, slot: SlotCreate) -> Result<Slot, BookingError>;
    fn get(&self, slot_id: i32) -> Result<Option<Slot>, BookingError>;
    fn list(&self, filters: &SlotFilters, page: PageRequest) -> Result<SlotPage, BookingError>;
    fn update(&self, slot_id: i32, update: &SlotUpdate) -> Result<Slot, BookingError>;
    fn delete(&self, slot_id: i32) -> Result<(), BookingError>;

    /// Adjust `booked` by `quantity` in one indivisible conditional write.
    /// Returns whether the write took effect. Concurrent callers can never
    /// both succeed past the guard: the condition is evaluated by the
    /// storage layer in the same step as the write, not read back first.
    fn adjust_booked(
        &self,
        slot_id: i32,
        quantity: i32,
        guard: AdjustGuard,
    ) -> Result<bool, BookingError>;
}

fn validate_create(slot: &SlotCreate) -> Result<(), BookingError> {
    if slot.product_id <= 0 {
        return Err(BookingError::Validation("A product id is required.".to_string()));
    }
    if slot.capacity <= 0 {
        return Err(BookingError::Validation(
            "Capacity must be greater than zero.".to_string(),
        ));
    }
    Ok(())
}

fn pages_for(total: i64, per_page: i64) -> i64 {
    if total == 0 {
        0
    } else {
        total.saturating_add(per_page - 1) / per_page
    }
}

#[derive(Clone)]
pub struct PgSlotStore {
    pool: DbPool,
}

impl PgSlotStore {
    pub fn new(pool: DbPool) -> Self {
        PgSlotStore { pool }
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, BookingError> {
        Ok(self.pool.get()?)
    }

    fn filtered<'a>(filters: &SlotFilters) -> slots::BoxedQuery<'a, diesel::pg::Pg> {
        let mut query = slots::table.into_boxed();
        if let Some(product_id) = filters.product_id {
            query = query.filter(slots::product_id.eq(product_id));
        }
        if let Some(status) = filters.status {
            query = query.filter(slots::status.eq(status));
        }
        if let Some(from) = filters.date_from {
            query = query.filter(slots::start_datetime.ge(from.and_time(NaiveTime::MIN)));
        }
        if let Some(to) = filters.date_to {
            let next_day = (to + Days::new(1)).and_time(NaiveTime::MIN);
            query = query.filter(slots::start_datetime.lt(next_day));
        }
        if let Some(now) = filters.future_from {
            query = query.filter(slots::start_datetime.ge(now));
        }
        query
    }
}

impl SlotStore for PgSlotStore {
    fn create(&self, slot: SlotCreate) -> Result<Slot, BookingError> {
        validate_create(&slot)?;
        let mut conn = self.conn()?;

        let new_slot = NewSlot {
            product_id: slot.product_id,
            start_datetime: slot.start_datetime,
            end_datetime: slot.end_datetime,
            capacity: slot.capacity,
            booked: 0,
            status: slot.status,
        };

        let id: i32 = diesel::insert_into(slots::table)
            .values(&new_slot)
            .returning(slots::id)
            .get_result(&mut conn)?;

        let created = slots::table.find(id).first::<Slot>(&mut conn)?;
        log::info!("Slot created: ID {} for product {}", created.id, created.product_id);
        Ok(created)
    }

    fn get(&self, slot_id: i32) -> Result<Option<Slot>, BookingError> {
        let mut conn = self.conn()?;
        Ok(slots::table
            .find(slot_id)
            .first::<Slot>(&mut conn)
            .optional()?)
    }

    fn list(&self, filters: &SlotFilters, page: PageRequest) -> Result<SlotPage, BookingError> {
        let mut conn = self.conn()?;
        let per_page = page.per_page.max(1);
        let current = page.page.max(1);

        let total: i64 = Self::filtered(filters).count().get_result(&mut conn)?;

        let rows = Self::filtered(filters)
            .order(slots::start_datetime.asc())
            .limit(per_page)
            .offset((current - 1).saturating_mul(per_page))
            .load::<Slot>(&mut conn)?;

        Ok(SlotPage {
            slots: rows,
            total,
            total_pages: pages_for(total, per_page),
        })
    }

    fn update(&self, slot_id: i32, update: &SlotUpdate) -> Result<Slot, BookingError> {
        let mut conn = self.conn()?;

        let exists = slots::table
            .find(slot_id)
            .first::<Slot>(&mut conn)
            .optional()?;
        if exists.is_none() {
            return Err(BookingError::NotFound("Slot"));
        }

        // Administrator-only fields, written independently like any other
        // last-write-wins update. `booked` is deliberately not settable here.
        if let Some(start) = update.start_datetime {
            diesel::update(slots::table.find(slot_id))
                .set(slots::start_datetime.eq(start))
                .execute(&mut conn)?;
        }
        if let Some(end) = update.end_datetime {
            diesel::update(slots::table.find(slot_id))
                .set(slots::end_datetime.eq(end))
                .execute(&mut conn)?;
        }
        if let Some(capacity) = update.capacity {
            if capacity <= 0 {
                return Err(BookingError::Validation(
                    "Capacity must be greater than zero.".to_string(),
                ));
            }
            diesel::update(slots::table.find(slot_id))
                .set(slots::capacity.eq(capacity))
                .execute(&mut conn)?;
        }
        if let Some(status) = update.status {
            diesel::update(slots::table.find(slot_id))
                .set(slots::status.eq(status))
                .execute(&mut conn)?;
        }

        let updated = slots::table.find(slot_id).first::<Slot>(&mut conn)?;
        log::info!("Slot updated: ID {}", slot_id);
        Ok(updated)
    }

    fn delete(&self, slot_id: i32) -> Result<(), BookingError> {
        let mut conn = self.conn()?;

        // Conditional delete so a reservation landing in between cannot be
        // orphaned: the row only goes away while booked is still zero.
        let deleted = diesel::delete(
            slots::table
                .filter(slots::id.eq(slot_id))
                .filter(slots::booked.eq(0)),
        )
        .execute(&mut conn)?;

        if deleted > 0 {
            log::info!("Slot deleted: ID {}", slot_id);
            return Ok(());
        }

        match slots::table
            .find(slot_id)
            .first::<Slot>(&mut conn)
            .optional()?
        {
            None => Err(BookingError::NotFound("Slot")),
            Some(_) => Err(BookingError::Conflict(
                "Cannot delete: the slot has active bookings.".to_string(),
            )),
        }
    }

    fn adjust_booked(
        &self,
        slot_id: i32,
        quantity: i32,
        guard: AdjustGuard,
    ) -> Result<bool, BookingError> {
        let mut conn = self.conn()?;

        let affected = match guard {
            // Atomic update: only increment if capacity allows. The guard is
            // part of the UPDATE itself, so concurrent callers serialize on
            // the row and the losing caller simply affects zero rows.
            AdjustGuard::WithinCapacity => diesel::update(
                slots::table
                    .filter(slots::id.eq(slot_id))
                    .filter(slots::booked.le(slots::capacity - quantity)),
            )
            .set(slots::booked.eq(slots::booked + quantity))
            .execute(&mut conn)?,
            // Atomic update: decrement but never go below 0.
            AdjustGuard::FloorAtZero => diesel::update(slots::table.filter(slots::id.eq(slot_id)))
                .set(slots::booked.eq(
                    sql::<Integer>("GREATEST(0, booked - ")
                        .bind::<Integer, _>(quantity)
                        .sql(")"),
                ))
                .execute(&mut conn)?,
        };

        Ok(affected > 0)
    }
}
