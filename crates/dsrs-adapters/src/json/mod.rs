//! JSON extraction from free text, primitive coercion, and schema validation.
//!
//! None of these functions panic on malformed input; every failure comes back
//! as a value.

pub mod coerce;
pub mod extract;
pub mod validate;

pub use coerce::*;
pub use extract::*;
pub use validate::*;
