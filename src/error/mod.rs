pub mod core;
pub mod oauth;

pub use core::CoreError;
pub use oauth::OauthError;

/// Whether an error represents a condition the caller may productively retry.
///
/// Implemented per error enum so the Engine's retry loop (see `engine::retry`) can
/// ask a uniform question regardless of which layer raised the error.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
