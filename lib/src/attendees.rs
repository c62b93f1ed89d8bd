//! Event attendee lookup.
//!
//! Events live in a system of their own. Campaigns targeting events reach
//! their attendees through a lookup supplied by the caller when opening the
//! session.

use crate::campaign::EventId;

/// Recipient record of one event attendee.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attendee {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

impl Attendee {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
        }
    }
}

pub trait AttendeeLookup: Send + Sync {
    /// Attendees of the event. An unknown event has none.
    fn for_event(&self, event: EventId) -> Vec<Attendee>;
}

impl<F> AttendeeLookup for F
where
    F: Fn(EventId) -> Vec<Attendee> + Send + Sync,
{
    fn for_event(&self, event: EventId) -> Vec<Attendee> {
        self(event)
    }
}
