pub mod address;
pub mod auth;
pub mod content;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod pushover;
pub mod queue;
pub mod submit;

// A submission goes through 3 steps:
// - Routing, from the envelope addresses (address)
// - Extraction, from the message itself (content)
// - Delivery, one notification per recipient (queue, submit, pushover)
