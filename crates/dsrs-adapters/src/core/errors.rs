use std::{error::Error as StdError, time::Duration};

use serde_json::Value;

use crate::{FieldPath, LmUsage};

/// Coarse error classification for retry and routing logic.
///
/// Use [`PredictError::class`] to get this. `Temporary` errors are generally retryable;
/// `BadResponse` suggests a prompt-engineering problem; `Internal` means a code or
/// configuration bug.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    /// The request itself was malformed.
    BadRequest,
    /// The requested resource doesn't exist.
    NotFound,
    /// Access denied by the provider.
    Forbidden,
    /// Transient failure (network, rate limit, timeout, server 5xx). Retry may help.
    Temporary,
    /// The LM responded, but the output didn't fit the signature.
    BadResponse,
    /// A bug in the calling code or its configuration.
    Internal,
}

/// What kind of schema or type violation a [`ValidationError`] reports.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ValidationErrorKind {
    TypeMismatch,
    NullNotAllowed,
    MissingProperty,
    UnknownProperty,
    EnumMismatch,
    NoUnionMatch,
}

/// A single violation found while validating or casting an output value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field_path}: {message}")]
pub struct ValidationError {
    pub field_path: FieldPath,
    pub message: String,
    pub kind: ValidationErrorKind,
}

impl ValidationError {
    pub fn new(field_path: FieldPath, kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            field_path,
            message: message.into(),
            kind,
        }
    }
}

/// The completion contained no decodable JSON where JSON was required.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not decode JSON: {reason}")]
pub struct DecodeFailure {
    pub reason: String,
}

impl DecodeFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// The LM response couldn't be turned into the signature's output mapping.
///
/// Every adapter returns exactly one of these tags; none of them is ever raised
/// as a panic. The tag is stable enough for a retry loop to branch on via
/// [`tag`](ParseError::tag) or [`is_retryable`](ParseError::is_retryable).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    /// No decodable JSON where the strategy required it.
    #[error("completion did not contain decodable JSON: {reason}")]
    DecodeFailure { reason: String },

    /// Decoded values failed schema validation or type casting. Holds every
    /// violation found in the pass, not just the first.
    #[error("{} validation error(s): {}", .errors.len(), join_display(.errors))]
    ValidationFailure { errors: Vec<ValidationError> },

    /// Required output fields were absent after parsing.
    #[error("missing required output field(s): {}", .fields.join(", "))]
    MissingRequiredOutputs { fields: Vec<String> },

    /// Strict-keyset parsing found keys the signature doesn't declare.
    #[error("unexpected output key(s): {}", .keys.join(", "))]
    UnknownOutputKeys { keys: Vec<String> },

    /// A field value is outside its `one_of` set.
    #[error("field `{field}` has value {value}, expected one of: {}", join_display(.allowed))]
    InvalidConstraintValue {
        field: String,
        allowed: Vec<Value>,
        value: Value,
    },

    /// Two-step parsing was requested without an extraction model.
    #[error("two-step extraction requires an extraction model, but none is configured")]
    ExtractionModelNotConfigured,

    /// The extraction pass of a two-step parse failed.
    #[error("extraction pass failed: {reason}")]
    ExtractionParseFailed {
        reason: String,
        #[source]
        source: Option<Box<ParseError>>,
    },
}

impl ParseError {
    /// Stable snake_case identifier for the error tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::DecodeFailure { .. } => "decode_failure",
            Self::ValidationFailure { .. } => "validation_failure",
            Self::MissingRequiredOutputs { .. } => "missing_required_outputs",
            Self::UnknownOutputKeys { .. } => "unknown_output_keys",
            Self::InvalidConstraintValue { .. } => "invalid_constraint_value",
            Self::ExtractionModelNotConfigured => "extraction_model_not_configured",
            Self::ExtractionParseFailed { .. } => "extraction_parse_failed",
        }
    }

    /// Output fields implicated by this error, in the order they were reported.
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Self::ValidationFailure { errors } => {
                let mut fields: Vec<&str> = Vec::new();
                for field in errors.iter().filter_map(|error| error.field_path.field()) {
                    if !fields.contains(&field) {
                        fields.push(field);
                    }
                }
                fields
            }
            Self::MissingRequiredOutputs { fields } => fields.iter().map(String::as_str).collect(),
            Self::UnknownOutputKeys { keys } => keys.iter().map(String::as_str).collect(),
            Self::InvalidConstraintValue { field, .. } => vec![field.as_str()],
            Self::ExtractionParseFailed {
                source: Some(source),
                ..
            } => source.fields(),
            _ => Vec::new(),
        }
    }

    /// Unknown keys point at model drift and a missing extraction model at
    /// configuration; re-asking the model fixes neither.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::UnknownOutputKeys { .. } | Self::ExtractionModelNotConfigured
        )
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ExtractionModelNotConfigured => ErrorClass::Internal,
            _ => ErrorClass::BadResponse,
        }
    }
}

impl From<DecodeFailure> for ParseError {
    fn from(failure: DecodeFailure) -> Self {
        ParseError::DecodeFailure {
            reason: failure.reason,
        }
    }
}

fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The request could not be rendered from the provided inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("required input field `{field}` has no value and no default")]
    MissingInput { field: String },
}

/// The signature declaration is structurally invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("field `{name}` is declared more than once")]
    DuplicateField { name: String },

    #[error("field names must be non-empty")]
    EmptyFieldName,

    #[error("field name `{name}` contains characters that would break prompt delimiters")]
    InvalidFieldName { name: String },

    #[error("signature `{name}` declares no output fields")]
    NoOutputFields { name: String },

    #[error("invalid signature shorthand `{spec}`: {reason}")]
    InvalidShorthand { spec: String, reason: String },
}

/// A JSON-Schema document uses something the validator cannot express.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("malformed schema: {reason}")]
    Malformed { reason: String },

    #[error("unknown schema type `{name}`")]
    UnknownType { name: String },

    #[error("unsupported schema keyword `{keyword}`")]
    Unsupported { keyword: String },

    #[error("unresolved schema reference `{reference}`")]
    UnresolvedRef { reference: String },

    #[error("recursive schema reference `{reference}` is not supported")]
    RecursiveRef { reference: String },
}

/// The LM provider failed before returning a usable response.
///
/// All variants except [`Provider`](LmError::Provider) are retryable.
#[derive(Debug, thiserror::Error)]
pub enum LmError {
    /// Could not reach the provider endpoint (DNS, connection refused, etc.).
    #[error("could not reach {endpoint}")]
    Network {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The provider returned a rate limit response (HTTP 429).
    #[error("rate limited by provider")]
    RateLimit { retry_after: Option<Duration> },

    /// The provider returned an unexpected HTTP status.
    #[error("invalid response from provider: HTTP {status}")]
    InvalidResponse { status: u16, body: String },

    /// The request exceeded the transport's timeout.
    #[error("request timed out after {after:?}")]
    Timeout { after: Duration },

    /// A provider-specific error that doesn't fit the other categories.
    #[error("provider error from {provider}: {message}")]
    Provider {
        provider: String,
        message: String,
        #[source]
        source: Option<Box<dyn StdError + Send + Sync>>,
    },
}

impl LmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Network { .. } => ErrorClass::Temporary,
            Self::RateLimit { .. } => ErrorClass::Temporary,
            Self::InvalidResponse { status, .. } if *status >= 500 => ErrorClass::Temporary,
            Self::InvalidResponse { status: 401, .. } | Self::InvalidResponse { status: 403, .. } => {
                ErrorClass::Forbidden
            }
            Self::InvalidResponse { status: 404, .. } => ErrorClass::NotFound,
            Self::InvalidResponse { .. } => ErrorClass::BadRequest,
            Self::Timeout { .. } => ErrorClass::Temporary,
            Self::Provider { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::RateLimit { .. } => true,
            Self::Timeout { .. } => true,
            Self::InvalidResponse { status, .. } => *status >= 500,
            Self::Provider { .. } => false,
        }
    }
}

/// Failure from one pipeline invocation.
///
/// A call can fail at three stages, and the stage tells you what to do about it:
///
/// 1. **[`Format`](PredictError::Format)**: the request couldn't be built from
///    the inputs. A caller bug; never retryable.
/// 2. **[`Lm`](PredictError::Lm)**: couldn't reach the LM or it errored. Network,
///    rate limit, timeout. Usually retryable.
/// 3. **[`Parse`](PredictError::Parse)**: the LM responded, but the output
///    didn't fit the signature. Carries the tagged [`ParseError`], the raw
///    response, and the tokens spent (you still pay for failed parses).
///
/// The runner forwards the first failure verbatim; it never retries.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error("failed to format request")]
    Format {
        #[source]
        source: FormatError,
    },

    #[error("LLM call failed")]
    Lm {
        #[source]
        source: LmError,
    },

    #[error("failed to parse LLM response")]
    Parse {
        #[source]
        source: ParseError,
        raw_response: String,
        lm_usage: LmUsage,
    },
}

impl PredictError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Format { .. } => ErrorClass::BadRequest,
            Self::Lm { source } => source.class(),
            Self::Parse { source, .. } => source.class(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Format { .. } => false,
            Self::Lm { source } => source.is_retryable(),
            Self::Parse { source, .. } => source.is_retryable(),
        }
    }

    /// The parse tag, when the failure happened after the LM responded.
    pub fn parse_error(&self) -> Option<&ParseError> {
        match self {
            Self::Parse { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Short tag naming the failure, for logs and metrics.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Format { .. } => "format_error",
            Self::Lm { .. } => "lm_error",
            Self::Parse { source, .. } => source.tag(),
        }
    }
}

impl From<FormatError> for PredictError {
    fn from(source: FormatError) -> Self {
        PredictError::Format { source }
    }
}

impl From<LmError> for PredictError {
    fn from(source: LmError) -> Self {
        PredictError::Lm { source }
    }
}
