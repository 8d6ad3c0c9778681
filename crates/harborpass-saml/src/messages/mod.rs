//! Outbound message builders and inbound message decoders
//!
//! The three protocol messages the SP emits (`AuthnRequest`,
//! `LogoutRequest`, `LogoutResponse`) share only the `ID`/`IssueInstant`/
//! `Issuer` assembly; each inbound message has its own validation pipeline.

pub mod authn_request;
pub mod logout_request;
pub mod logout_response;

pub use authn_request::{AuthnRequest, AuthnRequestOptions};
pub use logout_request::{LogoutRequest, LogoutRequestOptions, ReceivedLogoutRequest};
pub use logout_response::{LogoutResponse, ReceivedLogoutResponse};

use uuid::Uuid;

/// Fresh message ID: opaque, NCName-safe, well past 128 bits of entropy
pub(crate) fn generate_id() -> String {
    format!("_{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple())
}

/// Escape a value for interpolation into XML text or attribute content
pub(crate) fn escape_xml(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
