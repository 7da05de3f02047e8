//! Adapter pipeline: turn a signature, call inputs and demonstrations into a
//! model request, and turn the model's free-text completion back into a
//! validated mapping of output fields, with tagged errors instead of panics.
//!
//! ```
//! use std::sync::Arc;
//! use dsrs_adapters::{DummyLM, Predict, Predictor, Settings, Signature, example};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let lm = Arc::new(DummyLM::new(["Answer: 4"]));
//! let settings = Settings::builder().lm(lm).build();
//! let predict = Predict::new(Signature::parse("question -> answer").unwrap());
//!
//! let prediction = predict
//!     .forward(&example! { "question": "input" => "2 + 2?" }, &settings)
//!     .await
//!     .unwrap();
//! assert_eq!(prediction.get_as::<String>("answer").unwrap(), "4");
//! # }
//! ```

pub mod adapter;
pub mod core;
pub mod data;
pub mod json;
pub mod predictors;
pub mod utils;

pub use adapter::*;
pub use crate::core::*;
pub use data::*;
pub use json::{decode_value, extract_json, validate_and_cast, validate_and_cast_at};
pub use predictors::*;
pub use utils::*;

#[doc(hidden)]
pub use serde_json as __serde_json;

/// Builds an [`Example`] from `"key": "input" | "output" => value` entries.
///
/// ```
/// use dsrs_adapters::example;
///
/// let demo = example! {
///     "question": "input" => "1 + 1?",
///     "answer": "output" => 2,
/// };
/// assert_eq!(demo.input("question").unwrap(), "1 + 1?");
/// assert_eq!(demo.output("answer").unwrap(), 2);
/// ```
#[macro_export]
macro_rules! example {
    { $($key:literal : $field_type:literal => $value:expr),* $(,)? } => {{
        let mut example = $crate::Example::default();
        $(
            let value = $crate::__serde_json::json!($value);
            example = if $field_type == "input" {
                example.with_input($key, value)
            } else {
                example.with_output($key, value)
            };
        )*
        example
    }};
}

/// Builds a [`Prediction`] with default usage from `"key" => value` entries.
#[macro_export]
macro_rules! prediction {
    { $($key:literal => $value:expr),* $(,)? } => {{
        let mut data = $crate::__serde_json::Map::new();
        $(
            data.insert($key.to_string(), $crate::__serde_json::json!($value));
        )*
        $crate::Prediction::new(data.into_iter().collect(), $crate::LmUsage::default())
    }};
}
