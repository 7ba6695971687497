//! Built-in, grammar-unaware byte mutators.
//!
//! Both mutators here operate purely on opaque parameter slots (ordered
//! byte-strings that a generator has already carved out of its request
//! template) and know nothing about the protocol those slots belong to.

pub mod injection;
pub mod overflow;
