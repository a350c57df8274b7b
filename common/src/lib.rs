pub mod runtime;
pub mod signal;
pub mod socket;
