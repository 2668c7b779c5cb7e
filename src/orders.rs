use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, PooledConnection};
use crate::error::BookingError;
use crate::models::{LineBooking, NewOrderNote, Order, OrderLine};
use crate::schema::{order_lines, order_notes, orders, products};
use crate::store::DbPool;

/// Boundary to the commerce engine's data: orders, their line items, order
/// notes and the per-product course flag. The booking state machine is the
/// only writer of the reservation-relevant line fields.
pub trait OrderStore: Send + Sync {
    fn get_order(&self, order_id: i32) -> Result<Option<Order>, BookingError>;
    fn get_line(&self, order_id: i32, item_id: i32) -> Result<Option<OrderLine>, BookingError>;
    fn lines_for_order(&self, order_id: i32) -> Result<Vec<OrderLine>, BookingError>;
    fn write_line_booking(&self, item_id: i32, booking: &LineBooking) -> Result<(), BookingError>;
    fn add_order_note(&self, order_id: i32, note: &str) -> Result<(), BookingError>;
    fn bookings_for_slot(&self, slot_id: i32) -> Result<Vec<(OrderLine, Order)>, BookingError>;
    fn is_course_enabled(&self, product_id: i32) -> Result<bool, BookingError>;
}

#[derive(Clone)]
pub struct PgOrderStore {
    pool: DbPool,
}

impl PgOrderStore {
    pub fn new(pool: DbPool) -> Self {
        PgOrderStore { pool }
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, BookingError> {
        Ok(self.pool.get()?)
    }
}

impl OrderStore for PgOrderStore {
    fn get_order(&self, order_id: i32) -> Result<Option<Order>, BookingError> {
        let mut conn = self.conn()?;
        Ok(orders::table
            .find(order_id)
            .first::<Order>(&mut conn)
            .optional()?)
    }

    fn get_line(&self, order_id: i32, item_id: i32) -> Result<Option<OrderLine>, BookingError> {
        let mut conn = self.conn()?;
        Ok(order_lines::table
            .filter(order_lines::id.eq(item_id))
            .filter(order_lines::order_id.eq(order_id))
            .first::<OrderLine>(&mut conn)
            .optional()?)
    }

    fn lines_for_order(&self, order_id: i32) -> Result<Vec<OrderLine>, BookingError> {
        let mut conn = self.conn()?;
        Ok(order_lines::table
            .filter(order_lines::order_id.eq(order_id))
            .order(order_lines::id.asc())
            .load::<OrderLine>(&mut conn)?)
    }

    fn write_line_booking(&self, item_id: i32, booking: &LineBooking) -> Result<(), BookingError> {
        let mut conn = self.conn()?;
        let affected = diesel::update(order_lines::table.find(item_id))
            .set(booking)
            .execute(&mut conn)?;
        if affected == 0 {
            return Err(BookingError::NotFound("Order item"));
        }
        Ok(())
    }

    fn add_order_note(&self, order_id: i32, note: &str) -> Result<(), BookingError> {
        let mut conn = self.conn()?;
        diesel::insert_into(order_notes::table)
            .values(&NewOrderNote { order_id, note: note.to_string() })
            .execute(&mut conn)?;
        Ok(())
    }

    fn bookings_for_slot(&self, slot_id: i32) -> Result<Vec<(OrderLine, Order)>, BookingError> {
        let mut conn = self.conn()?;
        Ok(order_lines::table
            .inner_join(orders::table)
            .filter(order_lines::slot_id.eq(slot_id))
            .order(orders::created_at.desc())
            .select((order_lines::all_columns, orders::all_columns))
            .load::<(OrderLine, Order)>(&mut conn)?)
    }

    fn is_course_enabled(&self, product_id: i32) -> Result<bool, BookingError> {
        let mut conn = self.conn()?;
        let enabled = products::table
            .find(product_id)
            .select(products::course_enabled)
            .first::<bool>(&mut conn)
            .optional()?;
        Ok(enabled.unwrap_or(false))
    }
}
