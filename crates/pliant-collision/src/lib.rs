//! Collision contact bookkeeping for the controller.
//!
//! Raw contacts from an external collision checker are re-expressed in
//! controlled-link frames, filed into a capped, distance-sorted ledger and
//! bound onto the context slots the avoidance constraints requested.

pub mod contact;
pub mod ledger;

pub use contact::{
    transform_external, transform_self, ContactBody, ContactRecord, ExternalContact, SelfContact,
    NO_CONTACT_DISTANCE,
};
pub use ledger::{Collisions, ExternalContactInputs, SelfContactInputs};
