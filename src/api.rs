use actix_web::{get, post, web, HttpResponse};
use chrono::NaiveDate;
use regex::Regex;
use crate::booking;
use crate::error::BookingError;
use crate::ledger;
use crate::models::{CustomerAssignRequest, DateQuery, LookupRequest, OrderHookRequest, SlotTimeResponse};
use crate::orders::PgOrderStore;
use crate::store::{DbPool, PgSlotStore};
use crate::AppConfig;

fn blocking_failed(e: actix_web::error::BlockingError) -> BookingError {
    BookingError::Infrastructure(format!("blocking task failed: {}", e))
}

#[get("/products/{product_id}/available-dates")]
pub async fn get_available_dates(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
) -> Result<HttpResponse, BookingError> {
    let product_id = path.into_inner();
    let policy = config.policy;
    let store = PgSlotStore::new(pool.get_ref().clone());

    let dates = web::block(move || {
        let dates = ledger::available_dates(&store, product_id, policy.now_local())?;
        Ok::<_, BookingError>(policy.filter_dates(dates))
    })
    .await
    .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "dates": dates })))
}

#[get("/products/{product_id}/slots")]
pub async fn get_slots_for_date(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    query: web::Query<DateQuery>,
) -> Result<HttpResponse, BookingError> {
    let re = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    if re.captures(&query.date).is_none() {
        return Err(BookingError::Validation(
            "Invalid date format. Expected YYYY-MM-DD.".to_string(),
        ));
    }
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| BookingError::Validation("Invalid date.".to_string()))?;

    let policy = config.policy;
    // Dates inside the lead-time window are not bookable and list empty.
    if date < policy.min_booking_date() {
        return Ok(HttpResponse::Ok().json(serde_json::json!({ "slots": [] })));
    }

    let product_id = path.into_inner();
    let store = PgSlotStore::new(pool.get_ref().clone());

    let slots = web::block(move || {
        ledger::slots_on_date(&store, product_id, date, policy.now_local())
    })
    .await
    .map_err(blocking_failed)??;

    let times: Vec<SlotTimeResponse> = slots
        .iter()
        .map(|slot| SlotTimeResponse {
            id: slot.id,
            start: slot.start_datetime,
            end: slot.end_datetime,
            remaining: slot.remaining(),
        })
        .collect();

    Ok(HttpResponse::Ok().json(serde_json::json!({ "slots": times })))
}

#[post("/bookings/lookup")]
pub async fn lookup_booking(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    form: web::Json<LookupRequest>,
) -> Result<HttpResponse, BookingError> {
    let policy = config.policy;
    let slots = PgSlotStore::new(pool.get_ref().clone());
    let orders = PgOrderStore::new(pool.get_ref().clone());
    let form = form.into_inner();

    let summary = web::block(move || {
        booking::lookup_order(&slots, &orders, &policy, form.order_id, &form.email)
    })
    .await
    .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(summary))
}

#[post("/bookings/assign")]
pub async fn assign_booking(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    form: web::Json<CustomerAssignRequest>,
) -> Result<HttpResponse, BookingError> {
    let policy = config.policy;
    let slots = PgSlotStore::new(pool.get_ref().clone());
    let orders = PgOrderStore::new(pool.get_ref().clone());
    let form = form.into_inner();

    let outcome = web::block(move || {
        booking::customer_assign_slot(
            &slots,
            &orders,
            &policy,
            form.order_id,
            &form.email,
            form.item_id,
            form.slot_id,
        )
    })
    .await
    .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Booking updated successfully.",
        "slot_id": outcome.slot_id,
        "quantity": outcome.quantity,
    })))
}

#[post("/hooks/order-finalized")]
pub async fn order_finalized(
    pool: web::Data<DbPool>,
    form: web::Json<OrderHookRequest>,
) -> Result<HttpResponse, BookingError> {
    let slots = PgSlotStore::new(pool.get_ref().clone());
    let orders = PgOrderStore::new(pool.get_ref().clone());
    let order_id = form.order_id;

    let report = web::block(move || booking::finalize_order(&slots, &orders, order_id))
        .await
        .map_err(blocking_failed)??;

    // A partial failure blocks the caller but keeps the successful sibling
    // reservations in place.
    if report.fully_reserved() {
        Ok(HttpResponse::Ok().json(serde_json::json!({
            "message": "Seats reserved.",
            "report": report,
        })))
    } else {
        Ok(HttpResponse::Conflict().json(serde_json::json!({
            "message": "Seats are sold out for some of the selected times.",
            "report": report,
        })))
    }
}

async fn release_for_order(
    pool: web::Data<DbPool>,
    order_id: i32,
) -> Result<HttpResponse, BookingError> {
    let slots = PgSlotStore::new(pool.get_ref().clone());
    let orders = PgOrderStore::new(pool.get_ref().clone());

    let report = web::block(move || booking::release_order(&slots, &orders, order_id))
        .await
        .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Seats released.",
        "report": report,
    })))
}

#[post("/hooks/order-cancelled")]
pub async fn order_cancelled(
    pool: web::Data<DbPool>,
    form: web::Json<OrderHookRequest>,
) -> Result<HttpResponse, BookingError> {
    release_for_order(pool, form.order_id).await
}

#[post("/hooks/order-refunded")]
pub async fn order_refunded(
    pool: web::Data<DbPool>,
    form: web::Json<OrderHookRequest>,
) -> Result<HttpResponse, BookingError> {
    release_for_order(pool, form.order_id).await
}

#[post("/hooks/order-failed")]
pub async fn order_failed(
    pool: web::Data<DbPool>,
    form: web::Json<OrderHookRequest>,
) -> Result<HttpResponse, BookingError> {
    release_for_order(pool, form.order_id).await
}
