use serde::{Deserialize, Serialize};
use crate::schema::{order_lines, order_notes, orders, slots};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::{deserialize::{self, FromSql}, pg::{Pg, PgValue}, serialize::{self, Output, ToSql}, sql_types::Text, AsChangeset, Insertable, Queryable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::SlotStatus)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Open,
    Closed,
}

impl ToSql<crate::schema::sql_types::SlotStatus, Pg> for SlotStatus {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match *self {
            SlotStatus::Open => "open",
            SlotStatus::Closed => "closed",
        };
        <str as ToSql<Text, Pg>>::to_sql(s, out)
    }
}

impl FromSql<crate::schema::sql_types::SlotStatus, Pg> for SlotStatus {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "open" => Ok(SlotStatus::Open),
            "closed" => Ok(SlotStatus::Closed),
            s => Err(format!("Unrecognized slot status: {}", s).into()),
        }
    }
}

// Tracks whether a line's seats are currently counted in the slot's booked
// total. This is the idempotency guard for the order lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow)]
#[diesel(sql_type = crate::schema::sql_types::ReservationState)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    None,
    Reserved,
    Released,
}

impl ToSql<crate::schema::sql_types::ReservationState, Pg> for ReservationState {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
        let s = match *self {
            ReservationState::None => "none",
            ReservationState::Reserved => "reserved",
            ReservationState::Released => "released",
        };
        <str as ToSql<Text, Pg>>::to_sql(s, out)
    }
}

impl FromSql<crate::schema::sql_types::ReservationState, Pg> for ReservationState {
    fn from_sql(bytes: PgValue) -> deserialize::Result<Self> {
        match <String as FromSql<Text, Pg>>::from_sql(bytes)?.as_str() {
            "none" => Ok(ReservationState::None),
            "reserved" => Ok(ReservationState::Reserved),
            "released" => Ok(ReservationState::Released),
            s => Err(format!("Unrecognized reservation state: {}", s).into()),
        }
    }
}

#[derive(Debug, Clone, Queryable, Serialize)]
#[diesel(table_name = slots)]
pub struct Slot {
    pub id: i32,
    pub product_id: i32,
    pub start_datetime: NaiveDateTime,
    pub end_datetime: Option<NaiveDateTime>,
    pub capacity: i32,
    pub booked: i32,
    pub status: SlotStatus,
    pub created_at: Option<NaiveDateTime>,
}

impl Slot {
    // Floored at zero: a capacity reduction below booked must never surface
    // a negative seat count.
    pub fn remaining(&self) -> i32 {
        (self.capacity - self.booked).max(0)
    }

    pub fn start_date(&self) -> NaiveDate {
        self.start_datetime.date()
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = slots)]
pub struct NewSlot {
    pub product_id: i32,
    pub start_datetime: NaiveDateTime,
    pub end_datetime: Option<NaiveDateTime>,
    pub capacity: i32,
    pub booked: i32,
    pub status: SlotStatus,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = orders)]
pub struct Order {
    pub id: i32,
    pub status: String,
    pub billing_email: String,
    pub billing_first_name: String,
    pub billing_last_name: String,
    pub billing_phone: Option<String>,
    pub created_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Queryable)]
#[diesel(table_name = order_lines)]
pub struct OrderLine {
    pub id: i32,
    pub order_id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    pub slot_id: Option<i32>,
    pub reservation_state: ReservationState,
    pub pending_deferred: bool,
}

// The reservation-relevant fields of a line, written back as one unit. The
// state machine is the single mutator of these.
#[derive(Debug, Clone, Copy, AsChangeset)]
#[diesel(table_name = order_lines, treat_none_as_null = true)]
pub struct LineBooking {
    pub slot_id: Option<i32>,
    pub quantity: i32,
    pub reservation_state: ReservationState,
    pub pending_deferred: bool,
}

impl OrderLine {
    pub fn booking(&self) -> LineBooking {
        LineBooking {
            slot_id: self.slot_id,
            quantity: self.quantity,
            reservation_state: self.reservation_state,
            pending_deferred: self.pending_deferred,
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = order_notes)]
pub struct NewOrderNote {
    pub order_id: i32,
    pub note: String,
}

// Request/Response models for API
#[derive(Debug, Serialize)]
pub struct Res {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSlotRequest {
    pub product_id: i32,
    pub start: String,
    pub end: Option<String>,
    pub capacity: i32,
    pub status: Option<SlotStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSlotRequest {
    pub start: Option<String>,
    pub end: Option<String>,
    pub capacity: Option<i32>,
    pub status: Option<SlotStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlotListQuery {
    pub product_id: Option<i32>,
    pub status: Option<SlotStatus>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub future_only: Option<bool>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SlotResponse {
    pub id: i32,
    pub product_id: i32,
    pub start_datetime: NaiveDateTime,
    pub end_datetime: Option<NaiveDateTime>,
    pub capacity: i32,
    pub booked: i32,
    pub remaining: i32,
    pub status: SlotStatus,
}

impl From<&Slot> for SlotResponse {
    fn from(slot: &Slot) -> Self {
        SlotResponse {
            id: slot.id,
            product_id: slot.product_id,
            start_datetime: slot.start_datetime,
            end_datetime: slot.end_datetime,
            capacity: slot.capacity,
            booked: slot.booked,
            remaining: slot.remaining(),
            status: slot.status,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SlotListResponse {
    pub slots: Vec<SlotResponse>,
    pub total: i64,
    pub total_pages: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DateQuery {
    pub date: String,
}

// Contract for the storefront time picker: sold-out slots are included so the
// UI can render them disabled instead of hiding them.
#[derive(Debug, Serialize)]
pub struct SlotTimeResponse {
    pub id: i32,
    pub start: NaiveDateTime,
    pub end: Option<NaiveDateTime>,
    pub remaining: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LookupRequest {
    pub order_id: i32,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerAssignRequest {
    pub order_id: i32,
    pub email: String,
    pub item_id: i32,
    pub slot_id: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminAssignRequest {
    pub order_id: i32,
    pub item_id: i32,
    pub slot_id: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeSlotRequest {
    pub order_id: i32,
    pub item_id: i32,
    pub old_slot_id: i32,
    pub new_slot_id: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderHookRequest {
    pub order_id: i32,
}

#[derive(Debug, Serialize)]
pub struct CourseItemView {
    pub item_id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub quantity: i32,
    pub slot_id: Option<i32>,
    pub pending: bool,
    pub display_date: Option<String>,
    pub available_dates: Vec<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub order_id: i32,
    pub items: Vec<CourseItemView>,
}

#[derive(Debug, Serialize)]
pub struct SlotBookingResponse {
    pub order_id: i32,
    pub order_date: Option<NaiveDateTime>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub quantity: i32,
    pub order_status: String,
}
