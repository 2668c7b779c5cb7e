use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse};
use chrono::NaiveDateTime;
use crate::booking;
use crate::error::BookingError;
use crate::models::{
    AdminAssignRequest, ChangeSlotRequest, NewSlotRequest, Res, SlotListQuery, SlotListResponse,
    SlotResponse, SlotStatus, UpdateSlotRequest,
};
use crate::orders::PgOrderStore;
use crate::store::{
    DbPool, PageRequest, PgSlotStore, SlotCreate, SlotFilters, SlotStore, SlotUpdate,
};
use crate::AppConfig;

fn blocking_failed(e: actix_web::error::BlockingError) -> BookingError {
    BookingError::Infrastructure(format!("blocking task failed: {}", e))
}

fn require_admin(req: &HttpRequest, config: &AppConfig) -> Result<(), BookingError> {
    let provided = req
        .headers()
        .get("X-Admin-Token")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    if !constant_time_eq::constant_time_eq(config.admin_token.as_bytes(), provided.as_bytes()) {
        return Err(BookingError::Eligibility("Permission denied.".to_string()));
    }
    Ok(())
}

fn parse_datetime(value: &str, field: &str) -> Result<NaiveDateTime, BookingError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map_err(|_| {
        BookingError::Validation(format!(
            "{} timestamp not in correct format. Expected YYYY-MM-DD HH:MM:SS.",
            field
        ))
    })
}

fn parse_optional_end(value: &Option<String>) -> Result<Option<NaiveDateTime>, BookingError> {
    match value.as_deref() {
        None | Some("") => Ok(None),
        Some(raw) => Ok(Some(parse_datetime(raw, "end")?)),
    }
}

#[post("/admin/slots")]
pub async fn create_slot(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    form: web::Json<NewSlotRequest>,
) -> Result<HttpResponse, BookingError> {
    require_admin(&req, &config)?;

    let form = form.into_inner();
    let start_datetime = parse_datetime(&form.start, "start")?;
    let end_datetime = parse_optional_end(&form.end)?;
    let store = PgSlotStore::new(pool.get_ref().clone());

    let slot = web::block(move || {
        store.create(SlotCreate {
            product_id: form.product_id,
            start_datetime,
            end_datetime,
            capacity: form.capacity,
            status: form.status.unwrap_or(SlotStatus::Open),
        })
    })
    .await
    .map_err(blocking_failed)??;

    Ok(HttpResponse::Created().json(SlotResponse::from(&slot)))
}

#[get("/admin/slots")]
pub async fn list_slots(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    query: web::Query<SlotListQuery>,
) -> Result<HttpResponse, BookingError> {
    require_admin(&req, &config)?;

    let policy = config.policy;
    let query = query.into_inner();
    let filters = SlotFilters {
        product_id: query.product_id,
        status: query.status,
        date_from: query.date_from,
        date_to: query.date_to,
        future_from: if query.future_only.unwrap_or(false) {
            Some(policy.now_local())
        } else {
            None
        },
    };
    let page = PageRequest {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(50),
    };
    let store = PgSlotStore::new(pool.get_ref().clone());

    let result = web::block(move || store.list(&filters, page))
        .await
        .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(SlotListResponse {
        slots: result.slots.iter().map(SlotResponse::from).collect(),
        total: result.total,
        total_pages: result.total_pages,
    }))
}

#[get("/admin/slots/{slot_id}")]
pub async fn get_slot(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
) -> Result<HttpResponse, BookingError> {
    require_admin(&req, &config)?;

    let slot_id = path.into_inner();
    let store = PgSlotStore::new(pool.get_ref().clone());

    let slot = web::block(move || store.get(slot_id))
        .await
        .map_err(blocking_failed)??
        .ok_or(BookingError::NotFound("Slot"))?;

    Ok(HttpResponse::Ok().json(SlotResponse::from(&slot)))
}

#[put("/admin/slots/{slot_id}")]
pub async fn update_slot(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
    form: web::Json<UpdateSlotRequest>,
) -> Result<HttpResponse, BookingError> {
    require_admin(&req, &config)?;

    let slot_id = path.into_inner();
    let form = form.into_inner();
    let update = SlotUpdate {
        start_datetime: match form.start.as_deref() {
            None => None,
            Some(raw) => Some(parse_datetime(raw, "start")?),
        },
        end_datetime: match form.end {
            None => None,
            Some(ref raw) if raw.is_empty() => Some(None),
            Some(ref raw) => Some(Some(parse_datetime(raw, "end")?)),
        },
        capacity: form.capacity,
        status: form.status,
    };
    let store = PgSlotStore::new(pool.get_ref().clone());

    let slot = web::block(move || store.update(slot_id, &update))
        .await
        .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(SlotResponse::from(&slot)))
}

#[delete("/admin/slots/{slot_id}")]
pub async fn delete_slot(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
) -> Result<HttpResponse, BookingError> {
    require_admin(&req, &config)?;

    let slot_id = path.into_inner();
    let store = PgSlotStore::new(pool.get_ref().clone());

    web::block(move || store.delete(slot_id))
        .await
        .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(Res { message: "Slot deleted successfully.".to_string() }))
}

#[get("/admin/slots/{slot_id}/bookings")]
pub async fn slot_bookings(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    path: web::Path<i32>,
) -> Result<HttpResponse, BookingError> {
    require_admin(&req, &config)?;

    let slot_id = path.into_inner();
    let slots = PgSlotStore::new(pool.get_ref().clone());
    let orders = PgOrderStore::new(pool.get_ref().clone());

    let bookings = web::block(move || {
        if slots.get(slot_id)?.is_none() {
            return Err(BookingError::NotFound("Slot"));
        }
        booking::bookings_for_slot(&orders, slot_id)
    })
    .await
    .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "bookings": bookings })))
}

#[post("/admin/assign-slot")]
pub async fn assign_slot(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    form: web::Json<AdminAssignRequest>,
) -> Result<HttpResponse, BookingError> {
    require_admin(&req, &config)?;

    let form = form.into_inner();
    let slots = PgSlotStore::new(pool.get_ref().clone());
    let orders = PgOrderStore::new(pool.get_ref().clone());

    let outcome = web::block(move || {
        booking::admin_assign_slot(&slots, &orders, form.order_id, form.item_id, form.slot_id)
    })
    .await
    .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": format!("Slot assigned successfully. {} seats reserved.", outcome.quantity),
        "slot_id": outcome.slot_id,
        "quantity": outcome.quantity,
    })))
}

#[post("/admin/change-slot")]
pub async fn change_slot(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    form: web::Json<ChangeSlotRequest>,
) -> Result<HttpResponse, BookingError> {
    require_admin(&req, &config)?;

    let form = form.into_inner();
    let slots = PgSlotStore::new(pool.get_ref().clone());
    let orders = PgOrderStore::new(pool.get_ref().clone());

    let outcome = web::block(move || {
        booking::admin_change_slot(
            &slots,
            &orders,
            form.order_id,
            form.item_id,
            form.old_slot_id,
            form.new_slot_id,
        )
    })
    .await
    .map_err(blocking_failed)??;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Slot changed successfully.",
        "old_slot_id": outcome.old_slot_id,
        "new_slot_id": outcome.new_slot_id,
        "quantity": outcome.quantity,
    })))
}
