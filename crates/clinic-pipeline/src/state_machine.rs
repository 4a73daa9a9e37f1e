//! The `booking_status` state machine (§4.5), as an explicit enum and an
//! `apply` transition function: events are idempotent by `queue_id` + event
//! kind rather than by a separate dedup-set, since the resulting state
//! already encodes "was this event already applied."

use clinic_schemas::BookingStatus;

use crate::error::PipelineError;

/// Events that can move a booking through `booking_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingEvent {
    /// A nurse has picked up a waiting booking (optional, domain-dependent).
    NursePickup,
    /// The booking is finished — terminal.
    MarkComplete,
}

/// Apply `event` to `current`, returning the new status or rejecting an
/// illegal transition. A repeated `MarkComplete` on an already-`Completed`
/// row is accepted as a no-op (§8 scenario 6), not an error.
pub fn apply(current: BookingStatus, event: BookingEvent) -> Result<BookingStatus, PipelineError> {
    use BookingEvent::*;
    use BookingStatus::*;

    match (current, event) {
        (Waiting, NursePickup) => Ok(InProgress),
        (InProgress, NursePickup) => Ok(InProgress), // idempotent no-op
        (Waiting, MarkComplete) => Ok(Completed),
        (InProgress, MarkComplete) => Ok(Completed),
        (Completed, MarkComplete) => Ok(Completed), // idempotent no-op
        (Completed, NursePickup) => Err(PipelineError::Permanent(
            "cannot pick up an already-completed booking".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waiting_advances_to_in_progress_on_pickup() {
        assert_eq!(
            apply(BookingStatus::Waiting, BookingEvent::NursePickup).unwrap(),
            BookingStatus::InProgress
        );
    }

    #[test]
    fn either_waiting_or_in_progress_can_complete() {
        assert_eq!(
            apply(BookingStatus::Waiting, BookingEvent::MarkComplete).unwrap(),
            BookingStatus::Completed
        );
        assert_eq!(
            apply(BookingStatus::InProgress, BookingEvent::MarkComplete).unwrap(),
            BookingStatus::Completed
        );
    }

    #[test]
    fn repeated_mark_complete_is_an_idempotent_noop() {
        assert_eq!(
            apply(BookingStatus::Completed, BookingEvent::MarkComplete).unwrap(),
            BookingStatus::Completed
        );
    }

    #[test]
    fn pickup_after_completion_is_rejected() {
        assert!(apply(BookingStatus::Completed, BookingEvent::NursePickup).is_err());
    }
}
