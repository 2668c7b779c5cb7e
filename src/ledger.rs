use chrono::{NaiveDate, NaiveDateTime};
use crate::error::BookingError;
use crate::models::{Slot, SlotStatus};
use crate::store::{AdjustGuard, PageRequest, SlotFilters, SlotStore};

/// Reserve `quantity` seats against a slot. The capacity check is the
/// conditional write itself; the status check here is advisory for closed
/// slots, which must reject new reservations while keeping existing ones.
pub fn reserve<S: SlotStore>(store: &S, slot_id: i32, quantity: i32) -> Result<(), BookingError> {
    if quantity <= 0 {
        return Err(BookingError::Validation(format!(
            "Invalid quantity {} for reservation.",
            quantity
        )));
    }

    let slot = store.get(slot_id)?.ok_or(BookingError::NotFound("Slot"))?;
    if slot.status != SlotStatus::Open {
        return Err(BookingError::Closed);
    }

    log::info!(
        "Attempting to reserve {} seats for slot {} (booked: {}, capacity: {})",
        quantity,
        slot_id,
        slot.booked,
        slot.capacity
    );

    if store.adjust_booked(slot_id, quantity, AdjustGuard::WithinCapacity)? {
        log::info!("Seats reserved: {} seats for slot {}", quantity, slot_id);
        Ok(())
    } else {
        log::warn!(
            "Reservation rejected for slot {}: requested {}, remaining {}",
            slot_id,
            quantity,
            slot.remaining()
        );
        Err(BookingError::InsufficientCapacity {
            requested: quantity,
            remaining: slot.remaining(),
        })
    }
}

/// Release seats back to a slot. Over-release is floored at zero rather than
/// treated as an error, so a double release can never drive the counter
/// negative.
pub fn release<S: SlotStore>(store: &S, slot_id: i32, quantity: i32) -> Result<(), BookingError> {
    if quantity <= 0 {
        return Err(BookingError::Validation(format!(
            "Invalid quantity {} for release.",
            quantity
        )));
    }

    if store.get(slot_id)?.is_none() {
        return Err(BookingError::NotFound("Slot"));
    }

    store.adjust_booked(slot_id, quantity, AdjustGuard::FloorAtZero)?;
    log::info!("Seats released: {} seats for slot {}", quantity, slot_id);
    Ok(())
}

/// Dry-run check. Advisory only: availability can change between this call
/// and the real reservation, which is why `reserve` re-checks atomically.
pub fn can_reserve<S: SlotStore>(
    store: &S,
    slot_id: i32,
    quantity: i32,
) -> Result<bool, BookingError> {
    let Some(slot) = store.get(slot_id)? else {
        return Ok(false);
    };
    Ok(slot.status == SlotStatus::Open && slot.remaining() >= quantity)
}

/// Distinct calendar dates with at least one open, future slot that still has
/// seats, ascending.
pub fn available_dates<S: SlotStore>(
    store: &S,
    product_id: i32,
    now: NaiveDateTime,
) -> Result<Vec<NaiveDate>, BookingError> {
    let page = store.list(
        &SlotFilters {
            product_id: Some(product_id),
            status: Some(SlotStatus::Open),
            future_from: Some(now),
            ..Default::default()
        },
        PageRequest::all(),
    )?;

    let mut dates: Vec<NaiveDate> = page
        .slots
        .iter()
        .filter(|slot| slot.remaining() > 0)
        .map(Slot::start_date)
        .collect();
    dates.dedup();
    Ok(dates)
}

/// Open future slots on a given date. Sold-out slots are included on purpose:
/// the storefront renders them disabled so customers see the full schedule.
pub fn slots_on_date<S: SlotStore>(
    store: &S,
    product_id: i32,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<Vec<Slot>, BookingError> {
    let page = store.list(
        &SlotFilters {
            product_id: Some(product_id),
            status: Some(SlotStatus::Open),
            future_from: Some(now),
            ..Default::default()
        },
        PageRequest::all(),
    )?;

    Ok(page
        .slots
        .into_iter()
        .filter(|slot| slot.start_date() == date)
        .collect())
}
