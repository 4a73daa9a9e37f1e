//! Booking Pipeline (§4.5): orchestrates webhook -> publish -> consume ->
//! persist -> cache -> notify, and contains the `booking_status` state
//! machine. This is the only crate that depends on store + broker + cache
//! + payment together (§2 crate layout).

pub mod adapters;
pub mod completion;
pub mod consumer;
pub mod error;
pub mod live_feed;
pub mod ports;
pub mod publish_path;
pub mod state_machine;

pub use completion::mark_complete;
pub use consumer::ConsumerHandler;
pub use error::{ErrorKind, PipelineError};
pub use live_feed::{build_snapshot, run_subscriber_loop, snapshot_frame, Mailbox};
pub use publish_path::{handle_webhook, PublishOutcome};
pub use state_machine::{apply as apply_booking_event, BookingEvent};
