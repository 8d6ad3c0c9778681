//! # HarborPass SAML Service Provider Core
//!
//! The SP side of SAML 2.0 Web Browser SSO: outbound message construction,
//! inbound message validation under a strict security model, and the
//! per-request session orchestrator.
//!
//! ## Features
//!
//! - **SSO**: AuthnRequest construction (Redirect binding, optionally
//!   query-signed) and `<Response>` validation — signature verification over
//!   canonicalized fragments, EncryptedAssertion unwrap, XML-Signature
//!   Wrapping defense, replay hooks, temporal windows with injectable clock
//! - **SLO**: LogoutRequest/LogoutResponse construction and validation for
//!   both SP-initiated and IdP-initiated logout on the Redirect binding
//! - **Two signature schemes**, kept strictly apart: query-string signing
//!   for HTTP-Redirect and enveloped XMLDSig for HTTP-POST payloads
//! - **Frozen settings** with aggregate validation and stable, symbolic
//!   error kinds for telemetry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use harborpass_saml::{Auth, HttpRequest, LoginOptions, Settings, SettingsConfig};
//!
//! let settings = Settings::new(config)?;
//! let mut auth = Auth::new(settings);
//!
//! // send the browser to the IdP
//! let redirect_url = auth.login(&LoginOptions::new())?;
//!
//! // later, at the ACS endpoint
//! let request = HttpRequest::new().with_param("SAMLResponse", posted_value);
//! auth.process_response(&request, None)?;
//! if auth.is_authenticated() {
//!     let user = auth.name_id().unwrap();
//! } else {
//!     eprintln!("rejected: {:?}", auth.errors());
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`auth`] - The SP session orchestrator
//! - [`settings`] - Frozen configuration view
//! - [`messages`] - AuthnRequest/LogoutRequest/LogoutResponse builders and
//!   inbound decoders
//! - [`response`] - Inbound `<Response>` validation
//! - [`redirect_sign`] - Redirect-binding query-string signatures
//! - [`binding`] - DEFLATE/base64 codecs
//! - [`schema`] - Structural protocol checks
//! - [`clock`] - Injectable time source
//! - [`http`] - Explicit transport inputs
//! - [`error`] - Stable error kinds
//! - [`constants`] - Protocol URNs

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod auth;
pub mod binding;
pub mod clock;
pub mod constants;
pub mod error;
pub mod http;
pub mod messages;
pub mod redirect_sign;
pub mod response;
pub mod schema;
pub mod settings;

#[cfg(test)]
pub(crate) mod test_support;

pub use auth::{Auth, AuthState, LoginOptions, LogoutOptions, SloOptions};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{ErrorKind, SamlError, SamlResult};
pub use http::HttpRequest;
pub use response::{SamlResponse, ValidatedSession};
pub use settings::{Settings, SettingsConfig};
