//! Response status codes.

use std::fmt;

/// Status carried by every call response.
///
/// Codes below [`StatusCode::CUSTOM_BASE`] are reserved for the core; handlers
/// that need their own outcomes use [`StatusCode::Custom`] at or above it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Ok,
    Error,
    NotFound,
    InvalidArguments,
    Malformed,
    Custom(u32),
}

impl StatusCode {
    pub const CUSTOM_BASE: u32 = 0x100;

    /// Build a custom status, refusing codes in the reserved range.
    pub fn custom(code: u32) -> Option<Self> {
        (code >= Self::CUSTOM_BASE).then_some(StatusCode::Custom(code))
    }

    pub fn from_u32(code: u32) -> Self {
        match code {
            0 => StatusCode::Ok,
            1 => StatusCode::Error,
            2 => StatusCode::NotFound,
            3 => StatusCode::InvalidArguments,
            4 => StatusCode::Malformed,
            other => StatusCode::Custom(other),
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::Error => 1,
            StatusCode::NotFound => 2,
            StatusCode::InvalidArguments => 3,
            StatusCode::Malformed => 4,
            StatusCode::Custom(code) => *code,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Ok => write!(f, "Ok"),
            StatusCode::Error => write!(f, "Error"),
            StatusCode::NotFound => write!(f, "NotFound"),
            StatusCode::InvalidArguments => write!(f, "InvalidArguments"),
            StatusCode::Malformed => write!(f, "Malformed"),
            StatusCode::Custom(code) => write!(f, "Custom({:#x})", code),
        }
    }
}
