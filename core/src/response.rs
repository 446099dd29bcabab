//! Response envelope returned by every service operation.

use crate::error::SeckillError;
use serde::{Deserialize, Serialize};

/// Numeric response code. `0` is success; every other value names an error category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ResponseCode {
    /// Success.
    Ok,
    /// Malformed input.
    Validation,
    /// Missing activity or order.
    NotFound,
    /// Business-rule rejection.
    Conflict,
    /// Lock held by another caller.
    LockBusy,
    /// Infrastructure failure.
    Internal,
}

impl ResponseCode {
    /// Numeric value on the wire.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Validation => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::LockBusy => 429,
            Self::Internal => 500,
        }
    }
}

impl From<ResponseCode> for i32 {
    fn from(code: ResponseCode) -> Self {
        code.as_i32()
    }
}

impl TryFrom<i32> for ResponseCode {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            400 => Ok(Self::Validation),
            404 => Ok(Self::NotFound),
            409 => Ok(Self::Conflict),
            429 => Ok(Self::LockBusy),
            500 => Ok(Self::Internal),
            other => Err(format!("unknown response code {other}")),
        }
    }
}

/// `{code, msg, data}` envelope.
///
/// `data` is present only on success.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response<T> {
    /// Outcome category.
    pub code: ResponseCode,
    /// Human-readable message.
    pub msg: String,
    /// Payload on success.
    pub data: Option<T>,
}

impl<T> Response<T> {
    /// Successful response.
    pub fn ok(data: T, msg: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Ok,
            msg: msg.into(),
            data: Some(data),
        }
    }

    /// Error response carrying the error's code and message.
    #[must_use]
    pub fn error(err: &SeckillError) -> Self {
        Self {
            code: err.code(),
            msg: err.to_string(),
            data: None,
        }
    }

    /// Build from a service result.
    pub fn from_result(result: Result<T, SeckillError>, success_msg: &str) -> Self {
        match result {
            Ok(data) => Self::ok(data, success_msg),
            Err(err) => Self::error(&err),
        }
    }

    /// Whether the response is a success.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == ResponseCode::Ok
    }
}
