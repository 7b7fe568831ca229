//! sea-orm entities for the MFA service tables.

pub mod authenticators;
pub mod outbox_events;
