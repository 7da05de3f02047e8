mod errors;
pub mod lm;
mod schema;
pub mod settings;
pub mod signature;

pub use errors::{
    DecodeFailure, ErrorClass, FormatError, LmError, ParseError, PredictError, SchemaError,
    SignatureError, ValidationError, ValidationErrorKind,
};
pub use lm::*;
pub use schema::{AdditionalProperties, FieldPath, ObjectSchema, PathSegment, TypeSchema};
pub use settings::*;
pub use signature::*;
