//! Built-in test batteries

pub mod basic;
pub mod olm;

pub use basic::basic_suite;
pub use olm::olm_suite;
