//! Packed-pointer wire codec for the host↔guest ABI.
//!
//! Every exported host function and every guest export that carries a
//! payload agrees on one primitive: a 64-bit value whose high 32 bits are a
//! guest linear-memory pointer and whose low 32 bits are a byte length. The
//! bytes at that pointer are always UTF-8 JSON — either a request envelope
//! (host → guest is never used directly; requests always originate from the
//! guest) or a response envelope written back by the host.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ErrorType, RegletError};

/// Pack a guest pointer and a byte length into the single 64-bit value
/// that crosses the WASM/host boundary.
pub fn pack(ptr: u32, len: u32) -> u64 {
    ((ptr as u64) << 32) | (len as u64)
}

/// Inverse of [`pack`].
pub fn unpack(value: u64) -> (u32, u32) {
    let ptr = (value >> 32) as u32;
    let len = (value & 0xFFFF_FFFF) as u32;
    (ptr, len)
}

/// The `context` object every request envelope carries.
///
/// `deadline` and `timeout_ms` are mutually informative, not both
/// required; §4.2 defines the precedence used to derive a [`CallContext`]
/// from whichever subset is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled: Option<bool>,
}

/// Structured error carried in a response envelope.
///
/// A `None` error in a response means success; the handler's other
/// fields are meaningful only in that case (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrapped: Option<Box<ErrorDetail>>,
}

impl From<&RegletError> for ErrorDetail {
    fn from(err: &RegletError) -> Self {
        ErrorDetail {
            message: err.message().to_string(),
            error_type: err.error_type(),
            code: err.code().map(str::to_string),
            wrapped: None,
        }
    }
}

impl From<RegletError> for ErrorDetail {
    fn from(err: RegletError) -> Self {
        (&err).into()
    }
}

impl From<ErrorDetail> for RegletError {
    fn from(detail: ErrorDetail) -> Self {
        let message = detail.message;
        let code = detail.code;
        match detail.error_type {
            ErrorType::Internal => RegletError::Internal { message, code },
            ErrorType::Config => RegletError::Config { message, code },
            ErrorType::Capability => RegletError::Capability { message, code },
            ErrorType::Network => RegletError::Network { message, code },
            ErrorType::Timeout => RegletError::Timeout { message, code },
            ErrorType::Execution => RegletError::Execution { message, code },
            ErrorType::SsrfProtection => RegletError::SsrfProtection { message, code },
        }
    }
}

/// Encode any serializable envelope to JSON bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RegletError> {
    serde_json::to_vec(value).map_err(|e| RegletError::internal(format!("failed to encode envelope: {e}")))
}

/// Decode an envelope from JSON bytes, mapping failure to `internal` per §4.4 step 1.
pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, RegletError> {
    serde_json::from_slice(bytes).map_err(|e| RegletError::internal(format!("failed to decode envelope: {e}")))
}

/// A derived per-call execution context: deadline, cancellation, and the
/// request id used for log correlation.
///
/// Host functions never use [`ContextEnvelope`] directly once decoded —
/// they call [`CallContext::derive`] once and thread this value through
/// every downstream I/O call.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub request_id: Option<String>,
    deadline: Option<Instant>,
    token: tokio_util::sync::CancellationToken,
}

impl CallContext {
    /// Derive a call context from a parent cancellation token and the
    /// envelope decoded from the guest request, per §4.2:
    ///
    /// - `cancelled: true` → an already-cancelled context.
    /// - `deadline` present → a context bound to that wall-clock deadline.
    /// - `timeout_ms > 0` → a context bound to `now + timeout_ms`.
    /// - otherwise → a plain cancellable child of `parent`.
    pub fn derive(parent: &tokio_util::sync::CancellationToken, env: &ContextEnvelope) -> Self {
        let token = parent.child_token();

        if env.cancelled.unwrap_or(false) {
            token.cancel();
            return CallContext { request_id: env.request_id.clone(), deadline: Some(Instant::now()), token };
        }

        let deadline = if let Some(dl) = env.deadline {
            let remaining = dl.signed_duration_since(chrono::Utc::now());
            let millis = remaining.num_milliseconds().max(0) as u64;
            Some(Instant::now() + Duration::from_millis(millis))
        } else if let Some(ms) = env.timeout_ms.filter(|&ms| ms > 0) {
            Some(Instant::now() + Duration::from_millis(ms))
        } else {
            None
        };

        CallContext { request_id: env.request_id.clone(), deadline, token }
    }

    /// A context with no deadline and no parent, for calls made outside
    /// the guest protocol (e.g. `describe`/`schema` during capability
    /// collection).
    pub fn unbounded() -> Self {
        CallContext { request_id: None, deadline: None, token: tokio_util::sync::CancellationToken::new() }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn cancellation_token(&self) -> &tokio_util::sync::CancellationToken {
        &self.token
    }

    /// Remaining time until the deadline, or `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Race `fut` against this context's deadline and cancellation signal.
    /// Returns `Err(RegletError::Timeout)` if the deadline/cancellation
    /// fires first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, RegletError>
    where
        F: std::future::Future<Output = T>,
    {
        if self.is_cancelled() {
            return Err(RegletError::timeout("context already cancelled").with_code("ETIMEDOUT"));
        }

        let cancelled = self.token.cancelled();
        tokio::pin!(fut);

        match self.remaining() {
            Some(remaining) => {
                tokio::select! {
                    res = &mut fut => Ok(res),
                    _ = tokio::time::sleep(remaining) => {
                        Err(RegletError::timeout("deadline exceeded").with_code("ETIMEDOUT"))
                    }
                    _ = cancelled => {
                        Err(RegletError::timeout("context cancelled").with_code("ETIMEDOUT"))
                    }
                }
            }
            None => {
                tokio::select! {
                    res = &mut fut => Ok(res),
                    _ = cancelled => {
                        Err(RegletError::timeout("context cancelled").with_code("ETIMEDOUT"))
                    }
                }
            }
        }
    }
}
