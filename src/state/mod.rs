mod request_slots;

pub use request_slots::{RequestSlots, SlotLease};
