//! ECDSA P-256 signing provider.
//!
//! Covers the three cryptographic duties of the link workflow:
//! - fresh service-side keypair generation (PKCS#8, `ring`)
//! - signing the validation and trust assertions sent to the directory
//! - verifying signed link callbacks from devices
//!
//! Canonical messages are newline-joined field sequences in a fixed order;
//! keys and signatures travel as standard base64. Signatures are ASN.1 DER.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ring::rand::SystemRandom;
use ring::signature::{
    EcdsaKeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_ASN1,
    ECDSA_P256_SHA256_ASN1_SIGNING,
};
use thiserror::Error;

/// Maximum accepted skew between a callback timestamp and local time.
pub const TIMESTAMP_FRESHNESS_SECS: i64 = 300;

/// Failures raised by the signing provider. Callers on the verification path
/// treat any of these the same as "not verified".
#[derive(Debug, Error)]
pub enum SigningError {
    #[error("keypair generation failed")]
    Generate,
    #[error("key material rejected")]
    InvalidKey,
    #[error("signing operation failed")]
    Sign,
    #[error("invalid base64 in {0}")]
    Encoding(&'static str),
    #[error("timestamp is not a unix-seconds integer")]
    Timestamp,
}

/// A freshly generated service-side keypair, already in wire encoding.
#[derive(Debug, Clone)]
pub struct GeneratedKeys {
    /// Base64 PKCS#8 document holding the private key.
    pub private_pkcs8: String,
    /// Base64 uncompressed SEC1 point.
    pub public_key: String,
}

/// Verification knobs. `skip_timestamp_check` is debug-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    pub skip_timestamp_check: bool,
}

/// The five-parameter set carried by a signed link callback.
#[derive(Debug, Clone, Copy)]
pub struct CallbackParams<'a> {
    pub token_alias: &'a str,
    pub service_id: &'a str,
    pub device_ec_public: &'a str,
    pub timestamp: &'a str,
    pub ec_signature: &'a str,
}

/// Generate a fresh P-256 signing keypair.
pub fn generate_keypair() -> Result<GeneratedKeys, SigningError> {
    let rng = SystemRandom::new();
    let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
        .map_err(|_| SigningError::Generate)?;
    let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, pkcs8.as_ref(), &rng)
        .map_err(|_| SigningError::InvalidKey)?;
    Ok(GeneratedKeys {
        private_pkcs8: BASE64.encode(pkcs8.as_ref()),
        public_key: BASE64.encode(key_pair.public_key().as_ref()),
    })
}

fn load_keypair(private_pkcs8_b64: &str) -> Result<EcdsaKeyPair, SigningError> {
    let pkcs8 = BASE64
        .decode(private_pkcs8_b64)
        .map_err(|_| SigningError::Encoding("private key"))?;
    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &pkcs8, &SystemRandom::new())
        .map_err(|_| SigningError::InvalidKey)
}

fn sign_message(private_pkcs8_b64: &str, message: &str) -> Result<String, SigningError> {
    let key_pair = load_keypair(private_pkcs8_b64)?;
    let signature = key_pair
        .sign(&SystemRandom::new(), message.as_bytes())
        .map_err(|_| SigningError::Sign)?;
    Ok(BASE64.encode(signature.as_ref()))
}

/// Verify a base64 ASN.1 signature over `message` with a base64 SEC1 public key.
pub fn verify_signature(
    public_key_b64: &str,
    message: &str,
    signature_b64: &str,
) -> Result<bool, SigningError> {
    let public_key = BASE64
        .decode(public_key_b64)
        .map_err(|_| SigningError::Encoding("public key"))?;
    let signature = BASE64
        .decode(signature_b64)
        .map_err(|_| SigningError::Encoding("signature"))?;
    let verifier = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key);
    Ok(verifier.verify(message.as_bytes(), &signature).is_ok())
}

fn callback_message(
    token_alias: &str,
    service_id: &str,
    device_ec_public: &str,
    timestamp: &str,
) -> String {
    format!("{token_alias}\n{service_id}\n{device_ec_public}\n{timestamp}")
}

fn validation_message(
    service_id: &str,
    device_ec_public: &str,
    service_ec_public: &str,
    timestamp: i64,
) -> String {
    format!("{service_id}\n{device_ec_public}\n{service_ec_public}\n{timestamp}")
}

fn trust_message(
    token_alias: &str,
    ttl_secs: i64,
    access_role: &str,
    user_data: &str,
    timestamp: i64,
) -> String {
    format!("{token_alias}\n{ttl_secs}\n{access_role}\n{user_data}\n{timestamp}")
}

/// Verify the signature on an inbound link callback.
///
/// Returns `Ok(false)` for a wrong signature or a stale timestamp; `Err` only
/// for malformed inputs (which callers fold into "not verified" anyway).
pub fn verify_callback_signature(
    params: &CallbackParams<'_>,
    options: VerifyOptions,
) -> Result<bool, SigningError> {
    let signed_at: i64 = params
        .timestamp
        .parse()
        .map_err(|_| SigningError::Timestamp)?;
    if !options.skip_timestamp_check {
        let now = chrono::Utc::now().timestamp();
        if (now - signed_at).abs() > TIMESTAMP_FRESHNESS_SECS {
            return Ok(false);
        }
    }
    let message = callback_message(
        params.token_alias,
        params.service_id,
        params.device_ec_public,
        params.timestamp,
    );
    verify_signature(params.device_ec_public, &message, params.ec_signature)
}

/// Sign the link-validation assertion binding the service identity, the
/// device key and the freshly generated service key.
///
/// Returns the signature together with the timestamp it covers; the directory
/// checks the two against each other.
pub fn sign_validation_assertion(
    private_pkcs8_b64: &str,
    service_id: &str,
    device_ec_public: &str,
    service_ec_public: &str,
) -> Result<(String, i64), SigningError> {
    let timestamp = chrono::Utc::now().timestamp();
    let message = validation_message(service_id, device_ec_public, service_ec_public, timestamp);
    let signature = sign_message(private_pkcs8_b64, &message)?;
    Ok((signature, timestamp))
}

/// Produce a correctly signed callback parameter pair for test fixtures.
#[cfg(test)]
pub(crate) fn sign_callback_for_tests(
    keys: &GeneratedKeys,
    token_alias: &str,
    service_id: &str,
    timestamp: i64,
) -> (String, String) {
    let ts = timestamp.to_string();
    let message = callback_message(token_alias, service_id, &keys.public_key, &ts);
    let signature = sign_message(&keys.private_pkcs8, &message)
        .expect("freshly generated keys must sign");
    (ts, signature)
}

/// Sign the trust assertion for bearer issuance.
pub fn sign_trust_assertion(
    private_pkcs8_b64: &str,
    token_alias: &str,
    ttl_secs: i64,
    access_role: &str,
    user_data: &str,
    timestamp: i64,
) -> Result<String, SigningError> {
    let message = trust_message(token_alias, ttl_secs, access_role, user_data, timestamp);
    sign_message(private_pkcs8_b64, &message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed_callback(keys: &GeneratedKeys, timestamp: i64) -> (String, String) {
        sign_callback_for_tests(keys, "alias-1", "svc-0042", timestamp)
    }

    #[test]
    fn generated_keys_are_base64() {
        let keys = generate_keypair().unwrap();
        assert!(BASE64.decode(&keys.private_pkcs8).is_ok());
        // Uncompressed P-256 point: 0x04 || x || y = 65 bytes.
        assert_eq!(BASE64.decode(&keys.public_key).unwrap().len(), 65);
    }

    #[test]
    fn callback_signature_round_trip() {
        let keys = generate_keypair().unwrap();
        let (ts, signature) = signed_callback(&keys, chrono::Utc::now().timestamp());
        let params = CallbackParams {
            token_alias: "alias-1",
            service_id: "svc-0042",
            device_ec_public: &keys.public_key,
            timestamp: &ts,
            ec_signature: &signature,
        };
        assert!(verify_callback_signature(&params, VerifyOptions::default()).unwrap());
    }

    #[test]
    fn tampered_parameter_fails_verification() {
        let keys = generate_keypair().unwrap();
        let (ts, signature) = signed_callback(&keys, chrono::Utc::now().timestamp());
        let params = CallbackParams {
            token_alias: "alias-2", // signed for alias-1
            service_id: "svc-0042",
            device_ec_public: &keys.public_key,
            timestamp: &ts,
            ec_signature: &signature,
        };
        assert!(!verify_callback_signature(&params, VerifyOptions::default()).unwrap());
    }

    #[test]
    fn stale_timestamp_rejected_unless_skipped() {
        let keys = generate_keypair().unwrap();
        let stale = chrono::Utc::now().timestamp() - TIMESTAMP_FRESHNESS_SECS - 60;
        let (ts, signature) = signed_callback(&keys, stale);
        let params = CallbackParams {
            token_alias: "alias-1",
            service_id: "svc-0042",
            device_ec_public: &keys.public_key,
            timestamp: &ts,
            ec_signature: &signature,
        };
        assert!(!verify_callback_signature(&params, VerifyOptions::default()).unwrap());
        let skip = VerifyOptions {
            skip_timestamp_check: true,
        };
        assert!(verify_callback_signature(&params, skip).unwrap());
    }

    #[test]
    fn non_numeric_timestamp_raises() {
        let keys = generate_keypair().unwrap();
        let params = CallbackParams {
            token_alias: "alias-1",
            service_id: "svc-0042",
            device_ec_public: &keys.public_key,
            timestamp: "yesterday",
            ec_signature: "AAAA",
        };
        assert!(matches!(
            verify_callback_signature(&params, VerifyOptions::default()),
            Err(SigningError::Timestamp)
        ));
    }

    #[test]
    fn validation_assertion_verifies_with_public_key() {
        let keys = generate_keypair().unwrap();
        let device_public = generate_keypair().unwrap().public_key;
        let (signature, timestamp) = sign_validation_assertion(
            &keys.private_pkcs8,
            "svc-0042",
            &device_public,
            &keys.public_key,
        )
        .unwrap();
        let message = validation_message("svc-0042", &device_public, &keys.public_key, timestamp);
        assert!(verify_signature(&keys.public_key, &message, &signature).unwrap());
    }

    #[test]
    fn garbage_private_key_is_rejected() {
        assert!(matches!(
            sign_message("not base64 at all!", "msg"),
            Err(SigningError::Encoding(_))
        ));
        let valid_b64_junk = BASE64.encode(b"junk");
        assert!(matches!(
            sign_message(&valid_b64_junk, "msg"),
            Err(SigningError::InvalidKey)
        ));
    }
}
