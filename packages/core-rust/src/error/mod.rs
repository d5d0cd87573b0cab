//! Structured, cross-boundary error model.
//!
//! - [`StructuredError`] - canonical envelope, serialized for structured codecs
//! - [`FlatError`] - `code` + `[key] value` lines for text-only transports
//! - [`ErrorTemplates`] - per-code title/message templates with locales
//! - [`ErrCode`] - canonical code catalogue and status mapping

mod code;
mod envelope;
mod flat;
mod template;

pub use code::{ErrCode, UnknownCode};
pub use envelope::{ErrorExposure, StructuredError, Walk};
pub use flat::FlatError;
pub use template::{ErrorTemplate, ErrorTemplates, LocalizedStrings, TemplateError, TextTemplate};

use crate::codec::CodecError;
use crate::receiver::AddressError;
use crate::value::ValueError;

/// Status reported for a content type no codec handles.
const UNSUPPORTED_MEDIA_TYPE: u16 = 415;

// ---------------------------------------------------------------------------
// Conversions from core errors
// ---------------------------------------------------------------------------

impl From<CodecError> for StructuredError {
    fn from(err: CodecError) -> Self {
        let detail = err.detail().to_string();
        let out = match &err {
            CodecError::Malformed { .. } | CodecError::Shape { .. } => {
                Self::new(ErrCode::InvalidArgument, err.to_string())
            }
            CodecError::Unsupported { .. } => Self::new(ErrCode::Unimplemented, err.to_string())
                .with_status(UNSUPPORTED_MEDIA_TYPE),
            CodecError::Encode { .. } => Self::new(ErrCode::Internal, err.to_string()),
        };
        out.with_metadata("detail", detail)
    }
}

impl From<AddressError> for StructuredError {
    fn from(err: AddressError) -> Self {
        Self::new(ErrCode::InvalidArgument, err.to_string())
    }
}

impl From<ValueError> for StructuredError {
    fn from(err: ValueError) -> Self {
        Self::new(ErrCode::InvalidArgument, "value does not have the expected shape")
            .with_metadata("detail", err.to_string())
    }
}

impl From<TemplateError> for StructuredError {
    fn from(err: TemplateError) -> Self {
        Self::new(ErrCode::Internal, err.to_string())
    }
}
