//! Fakes for `clinic-pipeline`'s injection seams (§9), used by this
//! workspace's own scenario tests and by `clinic-daemon`'s. Each fake lives
//! entirely in memory so a scenario runs without Postgres, RabbitMQ, Redis,
//! or a live Stripe account.

mod fake_broker;
mod fake_cache;
mod fake_payment;
mod fake_store;

pub use fake_broker::FakeBroker;
pub use fake_cache::{FakeCache, FakeSubscription};
pub use fake_payment::{FakePaymentVerifier, COMPLETED_EVENT_TYPE};
pub use fake_store::FakeStore;
