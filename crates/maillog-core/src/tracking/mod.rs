//! Provider callbacks.
//!
//! Email service providers report two things after a message leaves the
//! application: that a message was accepted (with the provider's own message
//! id), and later lifecycle events for that id. The [`EventCorrelator`]
//! records the first as an [`Email`](crate::record::Email) carrying the id in
//! its extra headers, and attaches the second to that record.

mod correlator;
mod model;

pub use correlator::EventCorrelator;
pub use model::{SendStatus, TrackingEvent};
