//! SP session orchestrator
//!
//! One [`Auth`] instance serves one browser interaction: it is built per
//! HTTP request, drives `login`/`logout`/`process_response`/`process_slo`,
//! is queried, and discarded. Validation failures never raise out of the
//! `process_*` entry points — they accumulate in `errors` and leave the
//! session unauthenticated. Only transport misuse (a missing SAML parameter)
//! and construction-time problems return `Err`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::binding;
use crate::clock::{Clock, SystemClock};
use crate::error::{ErrorKind, SamlError, SamlResult};
use crate::http::HttpRequest;
use crate::messages::{
    AuthnRequest, AuthnRequestOptions, LogoutRequest, LogoutRequestOptions, LogoutResponse,
    ReceivedLogoutRequest, ReceivedLogoutResponse,
};
use crate::redirect_sign::{self, MessageType};
use crate::response::SamlResponse;
use crate::settings::Settings;

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Nothing has happened yet
    Init,
    /// An AuthnRequest has been issued
    Requested,
    /// `process_response` succeeded
    Authenticated,
    /// The last inbound message failed validation
    Failed,
    /// A LogoutRequest has been issued
    LogoutRequested,
    /// Single logout completed
    LoggedOut,
}

/// Options for [`Auth::login`]
#[derive(Debug, Clone, Default)]
pub struct LoginOptions {
    /// RelayState round-tripped to the ACS
    pub return_to: Option<String>,
    /// Ask the IdP to re-authenticate
    pub force_authn: bool,
    /// Ask the IdP not to interact with the user
    pub is_passive: bool,
    /// Suppress the NameIDPolicy element when false
    pub set_nameid_policy: bool,
    /// Request authentication for a specific subject
    pub name_id_value_req: Option<String>,
    /// Extra query parameters appended to the redirect URL
    pub extra_params: Vec<(String, String)>,
    /// Return the URL instead of redirecting (the core always returns it;
    /// accepted for API parity)
    pub stay: bool,
}

impl LoginOptions {
    /// The common case: default policy emission, nothing forced
    pub fn new() -> Self {
        Self {
            set_nameid_policy: true,
            ..Default::default()
        }
    }
}

/// Options for [`Auth::logout`]
#[derive(Debug, Clone, Default)]
pub struct LogoutOptions {
    /// RelayState round-tripped through the IdP
    pub return_to: Option<String>,
    /// Subject override; defaults to the authenticated NameID
    pub name_id: Option<String>,
    /// NameID format override
    pub name_id_format: Option<String>,
    /// NameQualifier attribute
    pub name_id_name_qualifier: Option<String>,
    /// Session index override; defaults to the authenticated session's
    pub session_index: Option<String>,
    /// Extra query parameters appended to the redirect URL
    pub extra_params: Vec<(String, String)>,
    /// Accepted for API parity; the core always returns the URL
    pub stay: bool,
}

/// Options for [`Auth::process_slo`]
#[derive(Debug, Clone, Copy, Default)]
pub struct SloOptions<'a> {
    /// Skip the session-deletion callback
    pub keep_local_session: bool,
    /// Outstanding LogoutRequest ID to correlate a LogoutResponse against;
    /// defaults to the last request this instance issued
    pub request_id: Option<&'a str>,
    /// Rebuild the signed octet string from the raw query string
    pub retrieve_parameters_from_server: bool,
    /// Accepted for API parity; the core always returns the URL
    pub stay: bool,
}

/// The SP-side session orchestrator
#[derive(Debug)]
pub struct Auth {
    settings: Settings,
    clock: Box<dyn Clock>,
    state: AuthState,
    authenticated: bool,
    name_id: Option<String>,
    name_id_format: Option<String>,
    name_id_name_qualifier: Option<String>,
    name_id_sp_name_qualifier: Option<String>,
    attributes: HashMap<String, Vec<String>>,
    attributes_with_friendly_name: HashMap<String, Vec<String>>,
    session_index: Option<String>,
    session_expiration: Option<DateTime<Utc>>,
    last_message_id: Option<String>,
    last_assertion_id: Option<String>,
    last_assertion_not_on_or_after: Option<DateTime<Utc>>,
    errors: Vec<ErrorKind>,
    last_error: Option<String>,
    last_error_exception: Option<SamlError>,
    last_request_id: Option<String>,
    last_request: Option<String>,
    last_response: Option<String>,
}

impl Auth {
    /// Build an orchestrator over validated settings, on the system clock
    pub fn new(settings: Settings) -> Self {
        Self::with_clock(settings, Box::new(SystemClock))
    }

    /// Build an orchestrator with an injected clock
    pub fn with_clock(settings: Settings, clock: Box<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            state: AuthState::Init,
            authenticated: false,
            name_id: None,
            name_id_format: None,
            name_id_name_qualifier: None,
            name_id_sp_name_qualifier: None,
            attributes: HashMap::new(),
            attributes_with_friendly_name: HashMap::new(),
            session_index: None,
            session_expiration: None,
            last_message_id: None,
            last_assertion_id: None,
            last_assertion_not_on_or_after: None,
            errors: Vec::new(),
            last_error: None,
            last_error_exception: None,
            last_request_id: None,
            last_request: None,
            last_response: None,
        }
    }

    /// Start SP-initiated SSO: build (and optionally sign) an AuthnRequest
    /// and return the redirect URL to the IdP SSO endpoint
    pub fn login(&mut self, options: &LoginOptions) -> SamlResult<String> {
        let request_options = AuthnRequestOptions {
            force_authn: options.force_authn,
            is_passive: options.is_passive,
            set_nameid_policy: options.set_nameid_policy,
            name_id_value_req: options.name_id_value_req.clone(),
        };
        let request = AuthnRequest::new(&self.settings, self.clock.as_ref(), &request_options);
        let payload = request.encoded(self.settings.compression().requests)?;

        let query = if self.settings.security().authn_requests_signed {
            redirect_sign::signed_query(
                MessageType::Request,
                &payload,
                options.return_to.as_deref(),
                &self.settings,
            )?
        } else {
            redirect_sign::unsigned_query(
                MessageType::Request,
                &payload,
                options.return_to.as_deref(),
                self.settings.security().lowercase_url_encoding,
            )
        };
        let url = self.extend_url(
            binding::append_query(&self.settings.idp().sso_url, &query),
            &options.extra_params,
        );

        debug!(id = request.id(), "issued AuthnRequest");
        self.last_request_id = Some(request.id().to_string());
        self.last_request = Some(request.xml().to_string());
        self.state = AuthState::Requested;
        Ok(url)
    }

    /// Start SP-initiated SLO: build (and optionally sign) a LogoutRequest
    /// and return the redirect URL to the IdP SLO endpoint
    pub fn logout(&mut self, options: &LogoutOptions) -> SamlResult<String> {
        let request_options = LogoutRequestOptions {
            name_id: options.name_id.clone().or_else(|| self.name_id.clone()),
            name_id_format: options
                .name_id_format
                .clone()
                .or_else(|| self.name_id_format.clone()),
            name_id_name_qualifier: options.name_id_name_qualifier.clone(),
            name_id_sp_name_qualifier: None,
            session_indexes: options
                .session_index
                .clone()
                .or_else(|| self.session_index.clone())
                .into_iter()
                .collect(),
        };
        let request = LogoutRequest::new(&self.settings, self.clock.as_ref(), &request_options)?;
        let payload = request.encoded(self.settings.compression().requests)?;

        let query = if self.settings.security().logout_request_signed {
            redirect_sign::signed_query(
                MessageType::Request,
                &payload,
                options.return_to.as_deref(),
                &self.settings,
            )?
        } else {
            redirect_sign::unsigned_query(
                MessageType::Request,
                &payload,
                options.return_to.as_deref(),
                self.settings.security().lowercase_url_encoding,
            )
        };
        let slo_url = self
            .settings
            .idp()
            .slo_url
            .clone()
            .ok_or_else(|| {
                SamlError::new(
                    ErrorKind::SingleLogoutNotSupported,
                    "the IdP has no Single Logout endpoint configured",
                )
            })?;
        let url = self.extend_url(
            binding::append_query(&slo_url, &query),
            &options.extra_params,
        );

        debug!(id = request.id(), "issued LogoutRequest");
        self.last_request_id = Some(request.id().to_string());
        self.last_request = Some(request.xml().to_string());
        self.state = AuthState::LogoutRequested;
        Ok(url)
    }

    /// Consume a POST-binding `SAMLResponse`.
    ///
    /// Returns `Err` only when the parameter is absent (a routing bug, not
    /// an attack); validation failures land in [`Auth::errors`].
    pub fn process_response(
        &mut self,
        request: &HttpRequest,
        request_id: Option<&str>,
    ) -> SamlResult<()> {
        let encoded = request.param("SAMLResponse").ok_or_else(|| {
            SamlError::new(
                ErrorKind::SamlResponseNotFound,
                "SAMLResponse not found in the POST parameters; only the HTTP-POST binding is accepted here",
            )
        })?;

        self.reset_session();

        let mut response = match SamlResponse::parse(encoded) {
            Ok(response) => response,
            Err(error) => {
                self.record_error(error);
                return Ok(());
            }
        };
        self.last_response = Some(response.xml().to_string());

        match response.validate(&self.settings, self.clock.as_ref(), request_id) {
            Ok(session) => {
                // decryption may have rewritten the document
                self.last_response = Some(response.xml().to_string());
                self.name_id = session.name_id;
                self.name_id_format = session.name_id_format;
                self.name_id_name_qualifier = session.name_id_name_qualifier;
                self.name_id_sp_name_qualifier = session.name_id_sp_name_qualifier;
                self.attributes = session.attributes;
                self.attributes_with_friendly_name = session.attributes_with_friendly_name;
                self.session_index = session.session_index;
                self.session_expiration = session.session_not_on_or_after;
                self.last_message_id = Some(session.response_id);
                self.last_assertion_id = Some(session.assertion_id);
                self.last_assertion_not_on_or_after = session.assertion_not_on_or_after;
                self.authenticated = true;
                self.state = AuthState::Authenticated;
                debug!("SSO response accepted");
            }
            Err(error) => self.record_error(error),
        }
        Ok(())
    }

    /// Consume a Redirect-binding SLO message: a `SAMLRequest`
    /// (IdP-initiated logout, answered with a signed LogoutResponse redirect
    /// URL) or a `SAMLResponse` (completion of an SP-initiated logout).
    ///
    /// Local session teardown happens strictly through `delete_session`
    /// (no-op when `None` or when `keep_local_session` is set).
    pub fn process_slo(
        &mut self,
        request: &HttpRequest,
        options: &SloOptions<'_>,
        mut delete_session: Option<&mut dyn FnMut()>,
    ) -> SamlResult<Option<String>> {
        self.errors.clear();
        self.last_error = None;
        self.last_error_exception = None;

        match (request.param("SAMLRequest"), request.param("SAMLResponse")) {
            (Some(encoded), None) => {
                let encoded = encoded.to_string();
                self.handle_logout_request(request, options, &encoded, &mut delete_session)
            }
            (None, Some(encoded)) => {
                let encoded = encoded.to_string();
                self.handle_logout_response(request, options, &encoded, &mut delete_session)?;
                Ok(None)
            }
            _ => Err(SamlError::new(
                ErrorKind::SamlLogoutMessageNotFound,
                "expected exactly one of SAMLRequest or SAMLResponse in the query parameters; only the HTTP-Redirect binding is accepted here",
            )),
        }
    }

    fn handle_logout_request(
        &mut self,
        request: &HttpRequest,
        options: &SloOptions<'_>,
        encoded: &str,
        delete_session: &mut Option<&mut dyn FnMut()>,
    ) -> SamlResult<Option<String>> {
        let received = match ReceivedLogoutRequest::decode(&self.settings, encoded) {
            Ok(received) => received,
            Err(error) => {
                self.record_error(error);
                return Ok(None);
            }
        };
        self.last_request = Some(received.xml().to_string());

        if let Err(error) = self.check_slo_signature(
            request,
            MessageType::Request,
            options.retrieve_parameters_from_server,
        ) {
            self.record_error(error);
            return Ok(None);
        }
        if let Err(error) = received.validate(&self.settings, self.clock.as_ref()) {
            self.record_error(error);
            return Ok(None);
        }

        if !options.keep_local_session {
            if let Some(callback) = delete_session.as_mut() {
                callback();
            }
        }

        let destination = {
            let idp = self.settings.idp();
            idp.slo_response_url
                .clone()
                .or_else(|| idp.slo_url.clone())
                .ok_or_else(|| {
                    SamlError::new(
                        ErrorKind::SingleLogoutNotSupported,
                        "the IdP has no Single Logout endpoint configured",
                    )
                })?
        };
        let response =
            LogoutResponse::new(&self.settings, self.clock.as_ref(), received.id())?;
        let payload = response.encoded(self.settings.compression().responses)?;
        let relay_state = request.param("RelayState");
        let query = if self.settings.security().logout_response_signed {
            redirect_sign::signed_query(
                MessageType::Response,
                &payload,
                relay_state,
                &self.settings,
            )?
        } else {
            redirect_sign::unsigned_query(
                MessageType::Response,
                &payload,
                relay_state,
                self.settings.security().lowercase_url_encoding,
            )
        };
        let url = binding::append_query(&destination, &query);

        self.last_response = Some(response.xml().to_string());
        self.state = AuthState::LoggedOut;
        debug!("IdP-initiated logout accepted");
        Ok(Some(url))
    }

    fn handle_logout_response(
        &mut self,
        request: &HttpRequest,
        options: &SloOptions<'_>,
        encoded: &str,
        delete_session: &mut Option<&mut dyn FnMut()>,
    ) -> SamlResult<()> {
        let received = match ReceivedLogoutResponse::decode(encoded) {
            Ok(received) => received,
            Err(error) => {
                self.record_error(error);
                return Ok(());
            }
        };
        self.last_response = Some(received.xml().to_string());

        if let Err(error) = self.check_slo_signature(
            request,
            MessageType::Response,
            options.retrieve_parameters_from_server,
        ) {
            self.record_error(error);
            return Ok(());
        }
        let expected_request_id = options.request_id.or(self.last_request_id.as_deref());
        if let Err(error) = received.validate(&self.settings, expected_request_id) {
            self.record_error(error);
            return Ok(());
        }

        if !options.keep_local_session {
            if let Some(callback) = delete_session.as_mut() {
                callback();
            }
        }
        self.state = AuthState::LoggedOut;
        debug!("SP-initiated logout completed");
        Ok(())
    }

    fn check_slo_signature(
        &self,
        request: &HttpRequest,
        message_type: MessageType,
        retrieve_from_server: bool,
    ) -> SamlResult<()> {
        if request.param("Signature").is_some() {
            redirect_sign::verify_query(request, message_type, &self.settings, retrieve_from_server)
        } else if self.settings.is_strict() && self.settings.security().want_messages_signed {
            Err(SamlError::new(
                ErrorKind::NoSignedElement,
                "the SLO message is not signed and the SP requires it",
            ))
        } else {
            Ok(())
        }
    }

    fn extend_url(&self, mut url: String, extra_params: &[(String, String)]) -> String {
        for (name, value) in extra_params {
            url.push('&');
            url.push_str(&redirect_sign::percent_encode(
                name,
                self.settings.security().lowercase_url_encoding,
            ));
            url.push('=');
            url.push_str(&redirect_sign::percent_encode(
                value,
                self.settings.security().lowercase_url_encoding,
            ));
        }
        url
    }

    fn reset_session(&mut self) {
        self.authenticated = false;
        self.name_id = None;
        self.name_id_format = None;
        self.name_id_name_qualifier = None;
        self.name_id_sp_name_qualifier = None;
        self.attributes.clear();
        self.attributes_with_friendly_name.clear();
        self.session_index = None;
        self.session_expiration = None;
        self.last_message_id = None;
        self.last_assertion_id = None;
        self.last_assertion_not_on_or_after = None;
        self.errors.clear();
        self.last_error = None;
        self.last_error_exception = None;
    }

    fn record_error(&mut self, error: SamlError) {
        warn!(kind = error.kind.as_str(), "{}", error.detail);
        self.errors.push(error.kind);
        self.last_error = Some(error.detail.clone());
        self.last_error_exception = Some(error);
        self.state = AuthState::Failed;
    }

    /// The frozen settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Mutable settings access; the only meaningful mutation is
    /// [`Settings::set_strict`]
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Current state
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Whether the last `process_response` authenticated the session
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Authenticated subject
    pub fn name_id(&self) -> Option<&str> {
        self.name_id.as_deref()
    }

    /// NameID format of the authenticated subject
    pub fn name_id_format(&self) -> Option<&str> {
        self.name_id_format.as_deref()
    }

    /// NameID NameQualifier
    pub fn name_id_name_qualifier(&self) -> Option<&str> {
        self.name_id_name_qualifier.as_deref()
    }

    /// NameID SPNameQualifier
    pub fn name_id_sp_name_qualifier(&self) -> Option<&str> {
        self.name_id_sp_name_qualifier.as_deref()
    }

    /// Attributes keyed by `Name`
    pub fn attributes(&self) -> &HashMap<String, Vec<String>> {
        &self.attributes
    }

    /// Values of one attribute, by `Name`
    pub fn attribute(&self, name: &str) -> Option<&[String]> {
        self.attributes.get(name).map(Vec::as_slice)
    }

    /// Attributes keyed by `FriendlyName`
    pub fn attributes_with_friendly_name(&self) -> &HashMap<String, Vec<String>> {
        &self.attributes_with_friendly_name
    }

    /// Values of one attribute, by `FriendlyName`
    pub fn attribute_with_friendly_name(&self, name: &str) -> Option<&[String]> {
        self.attributes_with_friendly_name
            .get(name)
            .map(Vec::as_slice)
    }

    /// SessionIndex of the authenticated session
    pub fn session_index(&self) -> Option<&str> {
        self.session_index.as_deref()
    }

    /// SessionNotOnOrAfter of the authenticated session
    pub fn session_expiration(&self) -> Option<DateTime<Utc>> {
        self.session_expiration
    }

    /// Error kinds collected by the last `process_*` call
    pub fn errors(&self) -> &[ErrorKind] {
        &self.errors
    }

    /// Detail of the last error
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Structured form of the last error
    pub fn last_error_exception(&self) -> Option<&SamlError> {
        self.last_error_exception.as_ref()
    }

    /// ID of the last validated Response message
    pub fn last_message_id(&self) -> Option<&str> {
        self.last_message_id.as_deref()
    }

    /// ID of the last consumed assertion.
    ///
    /// The core keeps no seen-set: callers enforcing one-time assertion use
    /// must persist this ID in their own shared store until
    /// [`Auth::last_assertion_not_on_or_after`] passes.
    pub fn last_assertion_id(&self) -> Option<&str> {
        self.last_assertion_id.as_deref()
    }

    /// Replay horizon for [`Auth::last_assertion_id`]
    pub fn last_assertion_not_on_or_after(&self) -> Option<DateTime<Utc>> {
        self.last_assertion_not_on_or_after
    }

    /// ID of the last AuthnRequest or LogoutRequest this instance issued
    pub fn last_request_id(&self) -> Option<&str> {
        self.last_request_id.as_deref()
    }

    /// XML of the last message this instance issued or received on the
    /// request side
    pub fn last_request_xml(&self) -> Option<&str> {
        self.last_request.as_deref()
    }

    /// XML of the last inbound response (decrypted form once decryption ran)
    pub fn last_response_xml(&self) -> Option<&str> {
        self.last_response.as_deref()
    }
}
