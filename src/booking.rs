use chrono::{Days, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use crate::error::BookingError;
use crate::ledger;
use crate::models::{
    CourseItemView, LineBooking, LookupResponse, Order, ReservationState, SlotBookingResponse,
    SlotStatus,
};
use crate::orders::OrderStore;
use crate::store::SlotStore;

/// Booking policy shared by the assignment gateways: the store clock and the
/// minimum lead time between "now" and a bookable date.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    pub lead_time_days: u32,
    pub store_utc_offset_minutes: i32,
}

impl Policy {
    pub fn now_local(&self) -> NaiveDateTime {
        let secs = (i64::from(self.store_utc_offset_minutes) * 60).clamp(-86_399, 86_399) as i32;
        match FixedOffset::east_opt(secs) {
            Some(offset) => Utc::now().with_timezone(&offset).naive_local(),
            None => Utc::now().naive_utc(),
        }
    }

    pub fn min_booking_date(&self) -> NaiveDate {
        self.now_local().date() + Days::new(u64::from(self.lead_time_days))
    }

    pub fn is_start_allowed(&self, start: NaiveDateTime) -> bool {
        start.date() >= self.min_booking_date()
    }

    /// Client-side date filtering is advisory; this is the authoritative cut.
    pub fn filter_dates(&self, dates: Vec<NaiveDate>) -> Vec<NaiveDate> {
        let min = self.min_booking_date();
        dates.into_iter().filter(|date| *date >= min).collect()
    }
}

fn format_note_datetime(dt: NaiveDateTime) -> String {
    dt.format("%d/%m/%Y %H:%M").to_string()
}

fn email_matches(expected: &str, provided: &str) -> bool {
    constant_time_eq::constant_time_eq(
        expected.trim().to_lowercase().as_bytes(),
        provided.trim().to_lowercase().as_bytes(),
    )
}

/// Look up an order on behalf of a customer. One uniform rejection for a
/// missing order and a wrong email, so order ids cannot be enumerated.
pub fn order_for_customer<O: OrderStore>(
    orders: &O,
    order_id: i32,
    email: &str,
) -> Result<Order, BookingError> {
    let rejection =
        || BookingError::Eligibility("Order not found or email does not match.".to_string());
    let order = orders.get_order(order_id)?.ok_or_else(rejection)?;
    if !email_matches(&order.billing_email, email) {
        return Err(rejection());
    }
    Ok(order)
}

#[derive(Debug, Serialize)]
pub struct AssignOutcome {
    pub slot_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct MoveOutcome {
    pub old_slot_id: i32,
    pub new_slot_id: i32,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct LineFailure {
    pub item_id: i32,
    pub slot_id: i32,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct FinalizeReport {
    pub reserved_items: Vec<i32>,
    pub skipped_items: Vec<i32>,
    pub failures: Vec<LineFailure>,
}

impl FinalizeReport {
    pub fn fully_reserved(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ReleaseReport {
    pub released_items: Vec<i32>,
    pub skipped_items: Vec<i32>,
}

/// Checkout-time bulk assign. Fires on order finalization and may fire more
/// than once; the reservation state on each line makes re-runs no-ops. Lines
/// that fail stay unreserved while earlier successes stay reserved: partial
/// success is accepted and flagged for manual follow-up.
pub fn finalize_order<S: SlotStore, O: OrderStore>(
    slots: &S,
    orders: &O,
    order_id: i32,
) -> Result<FinalizeReport, BookingError> {
    let order = orders.get_order(order_id)?.ok_or(BookingError::NotFound("Order"))?;
    let mut report = FinalizeReport::default();

    for line in orders.lines_for_order(order.id)? {
        // Deferred and legacy unassigned lines carry no slot and reserve
        // nothing at checkout.
        let Some(slot_id) = line.slot_id else { continue };

        if line.reservation_state == ReservationState::Reserved {
            log::info!(
                "Seats already reserved for order {}, item {}, skipping",
                order.id,
                line.id
            );
            report.skipped_items.push(line.id);
            continue;
        }

        match ledger::reserve(slots, slot_id, line.quantity) {
            Ok(()) => {
                let mut booking = line.booking();
                booking.reservation_state = ReservationState::Reserved;
                booking.pending_deferred = false;
                orders.write_line_booking(line.id, &booking)?;
                report.reserved_items.push(line.id);
            }
            Err(
                reason @ (BookingError::InsufficientCapacity { .. }
                | BookingError::Closed
                | BookingError::NotFound(_)
                | BookingError::Validation(_)),
            ) => {
                log::error!(
                    "Failed to reserve seats for order {}, item {}, slot {}: {}",
                    order.id,
                    line.id,
                    slot_id,
                    reason
                );
                report.failures.push(LineFailure {
                    item_id: line.id,
                    slot_id,
                    reason: reason.to_string(),
                });
            }
            Err(infrastructure) => return Err(infrastructure),
        }
    }

    if !report.fully_reserved() {
        orders.add_order_note(
            order.id,
            "Warning: some course seats could not be reserved for lack of capacity.",
        )?;
    }

    Ok(report)
}

/// Release every reserved line of an order. Fired on cancellation, refund and
/// failure, possibly repeatedly; only lines still marked reserved release.
/// A slot that no longer exists counts as released, since there is nothing
/// left to account for.
pub fn release_order<S: SlotStore, O: OrderStore>(
    slots: &S,
    orders: &O,
    order_id: i32,
) -> Result<ReleaseReport, BookingError> {
    let order = orders.get_order(order_id)?.ok_or(BookingError::NotFound("Order"))?;
    let mut report = ReleaseReport::default();

    for line in orders.lines_for_order(order.id)? {
        let Some(slot_id) = line.slot_id else { continue };

        if line.reservation_state != ReservationState::Reserved {
            report.skipped_items.push(line.id);
            continue;
        }

        match ledger::release(slots, slot_id, line.quantity) {
            Ok(()) => {}
            Err(BookingError::NotFound(_)) => {
                log::warn!(
                    "Slot {} already gone while releasing order {}, item {}",
                    slot_id,
                    order.id,
                    line.id
                );
            }
            Err(infrastructure) => return Err(infrastructure),
        }

        // The slot id stays on the line for history.
        let mut booking = line.booking();
        booking.reservation_state = ReservationState::Released;
        orders.write_line_booking(line.id, &booking)?;
        report.released_items.push(line.id);
        log::info!(
            "Seats released for order {}, item {}, slot {}, qty {}",
            order.id,
            line.id,
            slot_id,
            line.quantity
        );
    }

    Ok(report)
}

/// Administrator assignment of a slot to an unassigned or deferred line.
pub fn admin_assign_slot<S: SlotStore, O: OrderStore>(
    slots: &S,
    orders: &O,
    order_id: i32,
    item_id: i32,
    slot_id: i32,
) -> Result<AssignOutcome, BookingError> {
    let order = orders.get_order(order_id)?.ok_or(BookingError::NotFound("Order"))?;
    let line = orders
        .get_line(order.id, item_id)?
        .ok_or(BookingError::NotFound("Order item"))?;

    if line.reservation_state == ReservationState::Reserved {
        return Err(BookingError::Eligibility(
            "The item already has a reserved slot. Change the slot instead.".to_string(),
        ));
    }

    let slot = slots.get(slot_id)?.ok_or(BookingError::NotFound("Slot"))?;
    if slot.product_id != line.product_id {
        return Err(BookingError::Eligibility(
            "The selected slot does not belong to this course.".to_string(),
        ));
    }
    if slot.status != SlotStatus::Open {
        return Err(BookingError::Closed);
    }

    let quantity = line.quantity.max(1);
    if slot.remaining() < quantity {
        return Err(BookingError::InsufficientCapacity {
            requested: quantity,
            remaining: slot.remaining(),
        });
    }

    ledger::reserve(slots, slot.id, quantity)?;

    orders.write_line_booking(
        line.id,
        &LineBooking {
            slot_id: Some(slot.id),
            quantity,
            reservation_state: ReservationState::Reserved,
            pending_deferred: false,
        },
    )?;

    orders.add_order_note(
        order.id,
        &format!(
            "Course slot assigned manually: {} - slot {} ({}, {} seats)",
            line.product_name,
            slot.id,
            format_note_datetime(slot.start_datetime),
            quantity
        ),
    )?;

    log::info!(
        "Manual slot assignment: order {}, item {}, slot {}, qty {}",
        order.id,
        line.id,
        slot.id,
        quantity
    );

    Ok(AssignOutcome { slot_id: slot.id, quantity })
}

/// Administrator move of a reserved line to another slot. The new slot is
/// reserved first; only then is the old one released, so a failed
/// reservation leaves the original booking untouched. The two steps are not
/// transactional: a crash in between leaves a duplicate, overcounted
/// reservation, never an oversold one.
pub fn admin_change_slot<S: SlotStore, O: OrderStore>(
    slots: &S,
    orders: &O,
    order_id: i32,
    item_id: i32,
    old_slot_id: i32,
    new_slot_id: i32,
) -> Result<MoveOutcome, BookingError> {
    let order = orders.get_order(order_id)?.ok_or(BookingError::NotFound("Order"))?;
    let line = orders
        .get_line(order.id, item_id)?
        .ok_or(BookingError::NotFound("Order item"))?;

    if line.slot_id != Some(old_slot_id) {
        return Err(BookingError::Validation(
            "The item is not currently assigned to the given slot.".to_string(),
        ));
    }

    let new_slot = slots.get(new_slot_id)?.ok_or(BookingError::NotFound("Slot"))?;
    if new_slot.product_id != line.product_id {
        return Err(BookingError::Eligibility(
            "The selected slot does not belong to this course.".to_string(),
        ));
    }
    if new_slot.status != SlotStatus::Open {
        return Err(BookingError::Closed);
    }

    let quantity = line.quantity.max(1);
    if new_slot.remaining() < quantity {
        return Err(BookingError::InsufficientCapacity {
            requested: quantity,
            remaining: new_slot.remaining(),
        });
    }

    ledger::reserve(slots, new_slot.id, quantity)?;

    // From here on the move must complete: a failed release only leaks seats
    // conservatively.
    if line.reservation_state == ReservationState::Reserved {
        if let Err(release_err) = ledger::release(slots, old_slot_id, quantity) {
            log::warn!(
                "Failed to release old slot {} for order {}, item {}: {}",
                old_slot_id,
                order.id,
                line.id,
                release_err
            );
        }
    }

    orders.write_line_booking(
        line.id,
        &LineBooking {
            slot_id: Some(new_slot.id),
            quantity,
            reservation_state: ReservationState::Reserved,
            pending_deferred: false,
        },
    )?;

    let old_slot_date = slots
        .get(old_slot_id)?
        .map(|slot| format_note_datetime(slot.start_datetime))
        .unwrap_or_else(|| "N/A".to_string());

    orders.add_order_note(
        order.id,
        &format!(
            "Course slot changed: {} - from slot {} ({}) to slot {} ({}, {} seats)",
            line.product_name,
            old_slot_id,
            old_slot_date,
            new_slot.id,
            format_note_datetime(new_slot.start_datetime),
            quantity
        ),
    )?;

    log::info!(
        "Slot change: order {}, item {}, slot {} -> {}, qty {}",
        order.id,
        line.id,
        old_slot_id,
        new_slot.id,
        quantity
    );

    Ok(MoveOutcome { old_slot_id, new_slot_id: new_slot.id, quantity })
}

/// Customer self-service assignment of a deferred line, exactly once. All
/// the checks shown to the client are re-validated here against live data.
pub fn customer_assign_slot<S: SlotStore, O: OrderStore>(
    slots: &S,
    orders: &O,
    policy: &Policy,
    order_id: i32,
    email: &str,
    item_id: i32,
    slot_id: i32,
) -> Result<AssignOutcome, BookingError> {
    let order = order_for_customer(orders, order_id, email)?;
    let line = orders
        .get_line(order.id, item_id)?
        .ok_or(BookingError::NotFound("Order item"))?;

    if !orders.is_course_enabled(line.product_id)? {
        return Err(BookingError::Eligibility(
            "This product does not support booking.".to_string(),
        ));
    }
    if !line.pending_deferred || line.slot_id.is_some() {
        return Err(BookingError::Eligibility(
            "This booking can no longer be modified.".to_string(),
        ));
    }

    let slot = slots.get(slot_id)?.ok_or(BookingError::NotFound("Slot"))?;
    if slot.product_id != line.product_id {
        return Err(BookingError::Eligibility(
            "The selected slot does not match the course.".to_string(),
        ));
    }
    if slot.status != SlotStatus::Open {
        return Err(BookingError::Closed);
    }
    if !policy.is_start_allowed(slot.start_datetime) {
        return Err(BookingError::Eligibility(
            "The selected date is no longer available.".to_string(),
        ));
    }

    let quantity = line.quantity.max(1);
    if !ledger::can_reserve(slots, slot.id, quantity)? {
        return Err(BookingError::InsufficientCapacity {
            requested: quantity,
            remaining: slot.remaining(),
        });
    }

    // The dry run above produces the precise message; this is the check that
    // counts.
    ledger::reserve(slots, slot.id, quantity)?;

    orders.write_line_booking(
        line.id,
        &LineBooking {
            slot_id: Some(slot.id),
            quantity,
            reservation_state: ReservationState::Reserved,
            pending_deferred: false,
        },
    )?;

    orders.add_order_note(
        order.id,
        &format!(
            "Slot chosen by customer for \"{}\": {}",
            line.product_name,
            format_note_datetime(slot.start_datetime)
        ),
    )?;

    Ok(AssignOutcome { slot_id: slot.id, quantity })
}

/// Customer-facing summary of an order's course items, with the bookable
/// dates for any still-deferred line.
pub fn lookup_order<S: SlotStore, O: OrderStore>(
    slots: &S,
    orders: &O,
    policy: &Policy,
    order_id: i32,
    email: &str,
) -> Result<LookupResponse, BookingError> {
    let order = order_for_customer(orders, order_id, email)?;
    let mut items = Vec::new();

    for line in orders.lines_for_order(order.id)? {
        if !orders.is_course_enabled(line.product_id)? {
            continue;
        }

        let pending = line.pending_deferred && line.slot_id.is_none();
        let slot = match line.slot_id {
            Some(slot_id) => slots.get(slot_id)?,
            None => None,
        };
        let display_date = slot.as_ref().map(|slot| {
            let mut display = format_note_datetime(slot.start_datetime);
            if let Some(end) = slot.end_datetime {
                display.push_str(&format!(" - {}", end.format("%H:%M")));
            }
            display
        });
        let available_dates = if pending {
            policy.filter_dates(ledger::available_dates(slots, line.product_id, policy.now_local())?)
        } else {
            Vec::new()
        };

        items.push(CourseItemView {
            item_id: line.id,
            product_id: line.product_id,
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            slot_id: line.slot_id,
            pending,
            display_date,
            available_dates,
        });
    }

    Ok(LookupResponse { order_id: order.id, items })
}

/// Booking report for a slot, newest order first. Feeds the export surface.
pub fn bookings_for_slot<O: OrderStore>(
    orders: &O,
    slot_id: i32,
) -> Result<Vec<SlotBookingResponse>, BookingError> {
    let mut rows: Vec<SlotBookingResponse> = orders
        .bookings_for_slot(slot_id)?
        .into_iter()
        .map(|(line, order)| SlotBookingResponse {
            order_id: order.id,
            order_date: order.created_at,
            customer_name: format!("{} {}", order.billing_first_name, order.billing_last_name),
            customer_email: order.billing_email,
            customer_phone: order.billing_phone,
            quantity: line.quantity,
            order_status: order.status,
        })
        .collect();
    rows.sort_by(|a, b| b.order_date.cmp(&a.order_date));
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::memory::MemoryOrderStore;
    use crate::store::memory::MemorySlotStore;
    use crate::store::{SlotCreate, SlotStore, SlotUpdate};
    use chrono::Duration;

    fn policy() -> Policy {
        Policy { lead_time_days: 2, store_utc_offset_minutes: 0 }
    }

    fn future_start(days: i64) -> NaiveDateTime {
        Utc::now().naive_utc() + Duration::days(days)
    }

    fn make_slot(
        slots: &MemorySlotStore,
        product_id: i32,
        start: NaiveDateTime,
        capacity: i32,
    ) -> i32 {
        slots
            .create(SlotCreate {
                product_id,
                start_datetime: start,
                end_datetime: None,
                capacity,
                status: SlotStatus::Open,
            })
            .expect("create slot")
            .id
    }

    fn booked(slots: &MemorySlotStore, slot_id: i32) -> i32 {
        slots.get(slot_id).unwrap().unwrap().booked
    }

    #[test]
    fn finalize_reserves_each_slot_line_once() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let slot_id = make_slot(&slots, 1, future_start(10), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, Some(slot_id), ReservationState::None, false);

        let report = finalize_order(&slots, &orders, 100).unwrap();
        assert!(report.fully_reserved());
        assert_eq!(report.reserved_items, vec![1]);
        assert_eq!(booked(&slots, slot_id), 2);
        assert_eq!(orders.line(1).unwrap().reservation_state, ReservationState::Reserved);

        // the hook fires again: no second ledger mutation
        let rerun = finalize_order(&slots, &orders, 100).unwrap();
        assert_eq!(rerun.skipped_items, vec![1]);
        assert!(rerun.reserved_items.is_empty());
        assert_eq!(booked(&slots, slot_id), 2);
    }

    #[test]
    fn finalize_reports_partial_failure_and_keeps_sibling_reservations() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let roomy = make_slot(&slots, 1, future_start(10), 5);
        let tight = make_slot(&slots, 2, future_start(11), 1);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, Some(roomy), ReservationState::None, false);
        orders.insert_line(2, 100, 2, 3, Some(tight), ReservationState::None, false);

        let report = finalize_order(&slots, &orders, 100).unwrap();
        assert!(!report.fully_reserved());
        assert_eq!(report.reserved_items, vec![1]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item_id, 2);

        // line1 stays reserved, line2 stays unassigned
        assert_eq!(orders.line(1).unwrap().reservation_state, ReservationState::Reserved);
        assert_eq!(orders.line(2).unwrap().reservation_state, ReservationState::None);
        assert_eq!(booked(&slots, roomy), 2);
        assert_eq!(booked(&slots, tight), 0);

        // flagged for manual follow-up
        assert_eq!(orders.notes_for(100).len(), 1);
    }

    #[test]
    fn finalize_skips_deferred_and_unassigned_lines() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, None, ReservationState::None, true);
        orders.insert_line(2, 100, 1, 1, None, ReservationState::None, false);

        let report = finalize_order(&slots, &orders, 100).unwrap();
        assert!(report.fully_reserved());
        assert!(report.reserved_items.is_empty());
        assert!(orders.line(1).unwrap().pending_deferred);
    }

    #[test]
    fn release_is_gated_by_reservation_state() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let slot_id = make_slot(&slots, 1, future_start(10), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, Some(slot_id), ReservationState::None, false);

        finalize_order(&slots, &orders, 100).unwrap();
        assert_eq!(booked(&slots, slot_id), 2);

        let report = release_order(&slots, &orders, 100).unwrap();
        assert_eq!(report.released_items, vec![1]);
        assert_eq!(booked(&slots, slot_id), 0);
        let line = orders.line(1).unwrap();
        assert_eq!(line.reservation_state, ReservationState::Released);
        // slot id retained for history
        assert_eq!(line.slot_id, Some(slot_id));

        // double cancellation releases nothing further
        let rerun = release_order(&slots, &orders, 100).unwrap();
        assert_eq!(rerun.skipped_items, vec![1]);
        assert_eq!(booked(&slots, slot_id), 0);
    }

    #[test]
    fn release_treats_missing_slot_as_released() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let slot_id = make_slot(&slots, 1, future_start(10), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, Some(slot_id), ReservationState::None, false);
        finalize_order(&slots, &orders, 100).unwrap();

        // free the seats so the slot can be dropped under the line
        ledger::release(&slots, slot_id, 2).unwrap();
        slots.delete(slot_id).unwrap();

        let report = release_order(&slots, &orders, 100).unwrap();
        assert_eq!(report.released_items, vec![1]);
        assert_eq!(orders.line(1).unwrap().reservation_state, ReservationState::Released);
    }

    #[test]
    fn admin_assign_reserves_and_notes() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let slot_id = make_slot(&slots, 1, future_start(10), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 3, None, ReservationState::None, false);

        let outcome = admin_assign_slot(&slots, &orders, 100, 1, slot_id).unwrap();
        assert_eq!(outcome.quantity, 3);
        assert_eq!(booked(&slots, slot_id), 3);

        let line = orders.line(1).unwrap();
        assert_eq!(line.slot_id, Some(slot_id));
        assert_eq!(line.reservation_state, ReservationState::Reserved);

        let notes = orders.notes_for(100);
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains(&format!("slot {}", slot_id)));
        assert!(notes[0].contains("3 seats"));
    }

    #[test]
    fn admin_assign_rejects_already_reserved_lines() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let old = make_slot(&slots, 1, future_start(10), 5);
        let other = make_slot(&slots, 1, future_start(11), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, Some(old), ReservationState::Reserved, false);

        let err = admin_assign_slot(&slots, &orders, 100, 1, other).unwrap_err();
        assert!(matches!(err, BookingError::Eligibility(_)));
        assert_eq!(booked(&slots, other), 0);
    }

    #[test]
    fn admin_assign_enforces_product_match_and_capacity() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let foreign = make_slot(&slots, 2, future_start(10), 5);
        let tight = make_slot(&slots, 1, future_start(10), 1);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, None, ReservationState::None, false);

        assert!(matches!(
            admin_assign_slot(&slots, &orders, 100, 1, foreign).unwrap_err(),
            BookingError::Eligibility(_)
        ));
        assert!(matches!(
            admin_assign_slot(&slots, &orders, 100, 1, tight).unwrap_err(),
            BookingError::InsufficientCapacity { requested: 2, remaining: 1 }
        ));
        assert_eq!(orders.line(1).unwrap().slot_id, None);
    }

    #[test]
    fn change_slot_reserves_new_before_releasing_old() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let old = make_slot(&slots, 1, future_start(10), 5);
        let new = make_slot(&slots, 1, future_start(12), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, Some(old), ReservationState::None, false);
        finalize_order(&slots, &orders, 100).unwrap();
        assert_eq!(booked(&slots, old), 2);

        let outcome = admin_change_slot(&slots, &orders, 100, 1, old, new).unwrap();
        assert_eq!(outcome.new_slot_id, new);
        assert_eq!(booked(&slots, new), 2);
        assert_eq!(booked(&slots, old), 0);

        let line = orders.line(1).unwrap();
        assert_eq!(line.slot_id, Some(new));
        assert_eq!(line.reservation_state, ReservationState::Reserved);

        let notes = orders.notes_for(100);
        let move_note = notes.last().unwrap();
        assert!(move_note.contains(&format!("from slot {}", old)));
        assert!(move_note.contains(&format!("to slot {}", new)));
    }

    #[test]
    fn change_slot_failure_leaves_old_reservation_intact() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let old = make_slot(&slots, 1, future_start(10), 5);
        let full = make_slot(&slots, 1, future_start(12), 1);
        ledger::reserve(&slots, full, 1).unwrap();
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, Some(old), ReservationState::None, false);
        finalize_order(&slots, &orders, 100).unwrap();

        let err = admin_change_slot(&slots, &orders, 100, 1, old, full).unwrap_err();
        assert!(matches!(err, BookingError::InsufficientCapacity { .. }));

        // nothing moved
        let line = orders.line(1).unwrap();
        assert_eq!(line.slot_id, Some(old));
        assert_eq!(booked(&slots, old), 2);
        assert_eq!(booked(&slots, full), 1);
    }

    #[test]
    fn change_slot_survives_a_vanished_old_slot() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let old = make_slot(&slots, 1, future_start(10), 5);
        let new = make_slot(&slots, 1, future_start(12), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, Some(old), ReservationState::None, false);
        finalize_order(&slots, &orders, 100).unwrap();

        ledger::release(&slots, old, 1).unwrap();
        slots.delete(old).unwrap();

        let outcome = admin_change_slot(&slots, &orders, 100, 1, old, new).unwrap();
        assert_eq!(outcome.new_slot_id, new);
        assert_eq!(booked(&slots, new), 1);
        assert_eq!(orders.line(1).unwrap().slot_id, Some(new));

        let notes = orders.notes_for(100);
        assert!(notes.last().unwrap().contains("N/A"));
    }

    #[test]
    fn change_slot_rejects_stale_old_slot_id() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let current = make_slot(&slots, 1, future_start(10), 5);
        let stale = make_slot(&slots, 1, future_start(11), 5);
        let target = make_slot(&slots, 1, future_start(12), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, Some(current), ReservationState::Reserved, false);

        let err = admin_change_slot(&slots, &orders, 100, 1, stale, target).unwrap_err();
        assert!(matches!(err, BookingError::Validation(_)));
        assert_eq!(booked(&slots, target), 0);
    }

    #[test]
    fn customer_assigns_a_deferred_line_once() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        orders.enable_product(1);
        let slot_id = make_slot(&slots, 1, future_start(10), 1);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, None, ReservationState::None, true);

        let outcome =
            customer_assign_slot(&slots, &orders, &policy(), 100, "buyer@example.com", 1, slot_id)
                .unwrap();
        assert_eq!(outcome.quantity, 1);
        assert_eq!(booked(&slots, slot_id), 1);

        let line = orders.line(1).unwrap();
        assert_eq!(line.slot_id, Some(slot_id));
        assert!(!line.pending_deferred);
        assert_eq!(line.reservation_state, ReservationState::Reserved);

        // a second attempt is no longer eligible
        let err =
            customer_assign_slot(&slots, &orders, &policy(), 100, "buyer@example.com", 1, slot_id)
                .unwrap_err();
        assert!(matches!(err, BookingError::Eligibility(_)));
        assert_eq!(booked(&slots, slot_id), 1);
    }

    #[test]
    fn customer_assign_requires_matching_email() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        orders.enable_product(1);
        let slot_id = make_slot(&slots, 1, future_start(10), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, None, ReservationState::None, true);

        let wrong_email =
            customer_assign_slot(&slots, &orders, &policy(), 100, "other@example.com", 1, slot_id)
                .unwrap_err();
        let wrong_order =
            customer_assign_slot(&slots, &orders, &policy(), 999, "buyer@example.com", 1, slot_id)
                .unwrap_err();

        // both rejections read the same, so order ids cannot be probed
        assert_eq!(wrong_email.to_string(), wrong_order.to_string());
        assert_eq!(booked(&slots, slot_id), 0);
    }

    #[test]
    fn customer_email_match_ignores_case_and_whitespace() {
        let orders = MemoryOrderStore::new();
        orders.insert_order(100, "Buyer@Example.com");

        assert!(order_for_customer(&orders, 100, "  buyer@example.COM ").is_ok());
    }

    #[test]
    fn customer_assign_enforces_lead_time() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        orders.enable_product(1);
        // tomorrow is inside the two-day lead-time window
        let slot_id = make_slot(&slots, 1, future_start(1), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, None, ReservationState::None, true);

        let err =
            customer_assign_slot(&slots, &orders, &policy(), 100, "buyer@example.com", 1, slot_id)
                .unwrap_err();
        assert!(matches!(err, BookingError::Eligibility(_)));
        assert_eq!(booked(&slots, slot_id), 0);
    }

    #[test]
    fn customer_assign_enforces_product_and_status() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        orders.enable_product(1);
        let foreign = make_slot(&slots, 2, future_start(10), 5);
        let closed = make_slot(&slots, 1, future_start(10), 5);
        slots
            .update(closed, &SlotUpdate { status: Some(SlotStatus::Closed), ..Default::default() })
            .unwrap();
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, None, ReservationState::None, true);

        assert!(matches!(
            customer_assign_slot(&slots, &orders, &policy(), 100, "buyer@example.com", 1, foreign)
                .unwrap_err(),
            BookingError::Eligibility(_)
        ));
        assert!(matches!(
            customer_assign_slot(&slots, &orders, &policy(), 100, "buyer@example.com", 1, closed)
                .unwrap_err(),
            BookingError::Closed
        ));
    }

    #[test]
    fn customer_assign_rejects_sold_out_slots() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        orders.enable_product(1);
        let slot_id = make_slot(&slots, 1, future_start(10), 1);
        ledger::reserve(&slots, slot_id, 1).unwrap();
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 1, None, ReservationState::None, true);

        let err =
            customer_assign_slot(&slots, &orders, &policy(), 100, "buyer@example.com", 1, slot_id)
                .unwrap_err();
        assert!(matches!(err, BookingError::InsufficientCapacity { .. }));
    }

    #[test]
    fn lookup_lists_course_items_with_dates_for_pending_lines() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        orders.enable_product(1);
        orders.enable_product(2);
        let assigned = make_slot(&slots, 1, future_start(10), 5);
        make_slot(&slots, 2, future_start(10), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, Some(assigned), ReservationState::Reserved, false);
        orders.insert_line(2, 100, 2, 1, None, ReservationState::None, true);
        // not a course product: left out of the summary
        orders.insert_line(3, 100, 9, 1, None, ReservationState::None, false);

        let summary =
            lookup_order(&slots, &orders, &policy(), 100, "buyer@example.com").unwrap();
        assert_eq!(summary.items.len(), 2);

        let fixed = summary.items.iter().find(|i| i.item_id == 1).unwrap();
        assert!(!fixed.pending);
        assert!(fixed.display_date.is_some());
        assert!(fixed.available_dates.is_empty());

        let pending = summary.items.iter().find(|i| i.item_id == 2).unwrap();
        assert!(pending.pending);
        assert_eq!(pending.available_dates.len(), 1);
    }

    #[test]
    fn bookings_for_slot_reports_customer_details() {
        let slots = MemorySlotStore::new();
        let orders = MemoryOrderStore::new();
        let slot_id = make_slot(&slots, 1, future_start(10), 5);
        orders.insert_order(100, "buyer@example.com");
        orders.insert_line(1, 100, 1, 2, Some(slot_id), ReservationState::Reserved, false);
        orders.insert_order(101, "other@example.com");
        orders.insert_line(2, 101, 1, 1, Some(slot_id), ReservationState::Released, false);

        let rows = bookings_for_slot(&orders, slot_id).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|r| r.order_id == 100 && r.quantity == 2));
        assert!(rows.iter().any(|r| r.order_id == 101));
    }

    #[test]
    fn policy_filters_dates_before_the_window() {
        let p = policy();
        let min = p.min_booking_date();
        let dates = vec![
            min - Days::new(1),
            min,
            min + Days::new(3),
        ];
        assert_eq!(p.filter_dates(dates), vec![min, min + Days::new(3)]);
    }
}
