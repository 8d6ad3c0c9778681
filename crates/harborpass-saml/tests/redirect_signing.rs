//! Redirect-binding signing laws

mod common;

use common::*;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use proptest::prelude::*;

use harborpass_saml::redirect_sign::{
    build_signed_string, percent_encode, verify_query, MessageType,
};
use harborpass_xmlsec::SignatureAlgorithm;

fn idp_query(payload: &str, relay_state: Option<&str>, lowercase: bool) -> String {
    let signed_string = build_signed_string(
        MessageType::Response,
        payload,
        relay_state,
        SignatureAlgorithm::RsaSha256.uri(),
        lowercase,
    );
    let signature = IDP_KEY
        .sign(SignatureAlgorithm::RsaSha256, signed_string.as_bytes())
        .unwrap();
    format!(
        "{}&Signature={}",
        signed_string,
        percent_encode(&STANDARD.encode(signature), lowercase)
    )
}

proptest! {
    // RSA per case keeps this deliberately small
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn sign_then_verify_round_trips(
        body in "[A-Za-z0-9]{8,32}",
        relay_state in proptest::option::of("[a-z0-9 ]{1,24}"),
        lowercase in any::<bool>(),
    ) {
        // '+' and '/' force percent-encoded octets, so the two encoding
        // modes genuinely differ
        let payload = format!("{}+/=", body);
        let settings = settings(|c| c.security.lowercase_url_encoding = lowercase);
        let query = idp_query(&payload, relay_state.as_deref(), lowercase);
        let request = request_from_query(&query);

        // verifies from the raw query string and from re-encoded values
        prop_assert!(verify_query(&request, MessageType::Response, &settings, true).is_ok());
        prop_assert!(verify_query(&request, MessageType::Response, &settings, false).is_ok());

        // flipping one payload byte breaks it
        let mut tampered = payload.clone().into_bytes();
        tampered[0] = if tampered[0] == b'Z' { b'Y' } else { b'Z' };
        let tampered_payload = String::from_utf8(tampered).unwrap();
        let tampered_query = query.replacen(
            &percent_encode(&payload, lowercase),
            &percent_encode(&tampered_payload, lowercase),
            1,
        );
        let tampered_request = request_from_query(&tampered_query);
        prop_assert!(
            verify_query(&tampered_request, MessageType::Response, &settings, true).is_err()
        );

        // re-encoding with the opposite hex case no longer matches the
        // signed octets
        let flipped = settings_with_lowercase(!lowercase);
        prop_assert!(verify_query(&request, MessageType::Response, &flipped, false).is_err());
    }
}

fn settings_with_lowercase(lowercase: bool) -> harborpass_saml::Settings {
    settings(|c| c.security.lowercase_url_encoding = lowercase)
}

#[test]
fn signature_covers_relay_state() {
    let settings = settings(|_| {});
    let query = idp_query("payload+", Some("original-state"), false);
    let request = request_from_query(&query);
    verify_query(&request, MessageType::Response, &settings, true).unwrap();

    let swapped = query.replace("original-state", "replaced-state");
    let swapped_request = request_from_query(&swapped);
    assert!(verify_query(&swapped_request, MessageType::Response, &settings, true).is_err());
}

#[test]
fn signature_parameter_itself_is_not_signed() {
    // re-encoding the signature value must not disturb verification of the
    // three signed clauses
    let settings = settings(|_| {});
    let query = idp_query("payload+", None, false);
    let request = request_from_query(&query);
    verify_query(&request, MessageType::Response, &settings, false).unwrap();
}
