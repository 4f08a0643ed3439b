//! End-to-end scenarios from spec.md §8, driven through the public
//! [`Encryption`] facade against a stubbed KMS (teacher style: `tests/kat_v2.rs`
//! / `tests/neg_v2.rs` exercise the public API against fixture data rather than
//! internal module calls).

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use kmscrypt_core::http::{HttpResponse, SignedRequest, Transport};
use kmscrypt_core::{Config, Credentials, Dataset, DatasetManager, Encryption, Error};
use pkcs8::{EncodePrivateKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::collections::VecDeque;
use std::sync::Mutex;

const SRSA: &str = "test-passphrase";

/// One RSA-OAEP-wrapped data key plus the PEM blob needed to unwrap it, built
/// fresh per test the way a real KMS response would arrive.
struct WrappedKey {
    enc_private_key_pem: String,
    wrapped_data_key: Vec<u8>,
}

fn wrap_key(raw_key: &[u8]) -> WrappedKey {
    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, 2048).expect("generate RSA key");
    let public_key = RsaPublicKey::from(&private_key);

    let enc_private_key_pem = private_key
        .to_pkcs8_encrypted_pem(&mut rng, SRSA.as_bytes(), LineEnding::LF)
        .expect("encrypt private key PEM")
        .to_string();

    let wrapped_data_key = public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), raw_key)
        .expect("RSA-OAEP wrap");

    WrappedKey { enc_private_key_pem, wrapped_data_key }
}

/// Matches stubbed responses to requests by a substring of the URL, in the
/// order given; every response is used exactly once per matching path prefix.
struct StubTransport {
    responses: Mutex<Vec<(String, HttpResponse)>>,
}

impl StubTransport {
    fn new(responses: Vec<(&str, HttpResponse)>) -> Self {
        StubTransport {
            responses: Mutex::new(responses.into_iter().map(|(p, r)| (p.to_string(), r)).collect()),
        }
    }
}

impl Transport for StubTransport {
    fn send(&self, request: &SignedRequest) -> kmscrypt_core::Result<HttpResponse> {
        let mut responses = self.responses.lock().unwrap();
        let idx = responses
            .iter()
            .position(|(path, _)| request.url.contains(path.as_str()))
            .unwrap_or_else(|| panic!("no stubbed response for {}", request.url));
        Ok(responses.remove(idx).1)
    }
}

fn json_response(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse { status, content_type: "application/json".into(), content: body.to_string().into_bytes() }
}

fn creds() -> Credentials {
    Credentials::new("papi", "sapi", SRSA, "https://kms.example.com").unwrap()
}

#[test]
fn scenario_1_unstructured_round_trip() {
    let raw_key = [7u8; 32];
    let wrapped = wrap_key(&raw_key);
    let enc_data_key = vec![9u8; 16];

    let encryption_key_resp = json_response(
        201,
        serde_json::json!({
            "encrypted_data_key": B64.encode(&enc_data_key),
            "encrypted_private_key": wrapped.enc_private_key_pem,
            "wrapped_data_key": B64.encode(&wrapped.wrapped_data_key),
            "encryption_session": serde_json::Value::Null,
            "key_fingerprint": serde_json::Value::Null,
            "security_model": {"algorithm": "AES256_GCM", "enable_data_fragmentation": false},
        }),
    );
    let decryption_key_resp = json_response(
        200,
        serde_json::json!({
            "encrypted_private_key": wrapped.enc_private_key_pem,
            "wrapped_data_key": B64.encode(&wrapped.wrapped_data_key),
            "encryption_session": serde_json::Value::Null,
            "key_fingerprint": serde_json::Value::Null,
        }),
    );

    let transport = StubTransport::new(vec![
        ("/api/v0/encryption/key", encryption_key_resp),
        ("/api/v0/decryption/key", decryption_key_resp),
    ]);
    let enc = Encryption::new(creds(), Config::default(), Box::new(transport));

    let ciphertext = enc.encrypt(b"abc", Dataset::unstructured("")).unwrap();
    assert_eq!(ciphertext[0], 0x00); // header version
    assert_eq!(ciphertext[2], 0x00); // AES-256-GCM algo id

    let plaintext = enc.decrypt(&ciphertext, Dataset::unstructured("")).unwrap();
    assert_eq!(plaintext, b"abc");
}

fn ssn_ffs_body() -> serde_json::Value {
    serde_json::json!({
        "input_character_set": "0123456789",
        "output_character_set": "0123456789",
        "passthrough_character_set": "-",
        "passthrough_rules": [
            {"type": "passthrough", "value": serde_json::Value::Null, "priority": 0},
        ],
        "tweak": B64.encode([0xAAu8; 4]),
        "min_input_length": 9,
        "max_input_length": 9,
        "msb_encoding_bits": 3,
    })
}

#[test]
fn scenario_2_structured_ssn_round_trip_preserves_passthrough() {
    let fpe_key_resp = json_response(
        200,
        serde_json::json!({
            "key_number": 0,
            "encrypted_private_key": "unused-for-ff1-decrypt-path",
            "wrapped_data_key": B64.encode([1u8; 16]),
        }),
    );

    let transport = StubTransport::new(vec![
        ("/api/v0/ffs", json_response(200, ssn_ffs_body())),
        ("/api/v0/fpe/key", fpe_key_resp),
    ]);
    let enc = Encryption::new(creds(), Config::default(), Box::new(transport));
    let dataset = DatasetManager::get_dataset(enc.context(), "SSN").unwrap();
    assert!(dataset.is_structured());

    let ciphertext = enc.encrypt(b"123-45-6789", dataset.clone()).unwrap();
    let ct_str = std::str::from_utf8(&ciphertext).unwrap();
    assert_eq!(ct_str.len(), "123-45-6789".len());
    assert_eq!(&ct_str[3..4], "-");
    assert_eq!(&ct_str[6..7], "-");
    assert!(ct_str.chars().enumerate().all(|(i, c)| i == 3 || i == 6 || c.is_ascii_digit()));
}

#[test]
fn scenario_6_alphabet_rejection() {
    let transport = StubTransport::new(vec![("/api/v0/ffs", json_response(200, ssn_ffs_body()))]);
    let enc = Encryption::new(creds(), Config::default(), Box::new(transport));
    let dataset = DatasetManager::get_dataset(enc.context(), "SSN").unwrap();

    let err = enc.encrypt(b"12A-45-6789", dataset).unwrap_err();
    assert!(matches!(err, Error::InputInvalid(_)));
}

#[test]
fn scenario_4_bad_header_on_tampered_version_byte() {
    let raw_key = [3u8; 32];
    let wrapped = wrap_key(&raw_key);
    let enc_data_key = vec![5u8; 16];
    let transport = StubTransport::new(vec![(
        "/api/v0/encryption/key",
        json_response(
            201,
            serde_json::json!({
                "encrypted_data_key": B64.encode(&enc_data_key),
                "encrypted_private_key": wrapped.enc_private_key_pem,
                "wrapped_data_key": B64.encode(&wrapped.wrapped_data_key),
                "encryption_session": serde_json::Value::Null,
                "key_fingerprint": serde_json::Value::Null,
                "security_model": {"algorithm": "AES128_GCM", "enable_data_fragmentation": false},
            }),
        ),
    )]);
    let enc = Encryption::new(creds(), Config::default(), Box::new(transport));

    let mut ciphertext = enc.encrypt(b"abc", Dataset::unstructured("")).unwrap();
    assert_eq!(ciphertext[2], 0x01); // AES-128-GCM
    ciphertext[0] = 0xFF;

    let err = enc.decrypt(&ciphertext, Dataset::unstructured("")).unwrap_err();
    assert!(matches!(err, Error::BadHeader(_)));
}

#[test]
fn scenario_5_tamper_detection_on_truncated_ciphertext() {
    let raw_key = [4u8; 32];
    let wrapped = wrap_key(&raw_key);
    let enc_data_key = vec![6u8; 16];
    let encryption_key_resp = json_response(
        201,
        serde_json::json!({
            "encrypted_data_key": B64.encode(&enc_data_key),
            "encrypted_private_key": wrapped.enc_private_key_pem,
            "wrapped_data_key": B64.encode(&wrapped.wrapped_data_key),
            "encryption_session": serde_json::Value::Null,
            "key_fingerprint": serde_json::Value::Null,
            "security_model": {"algorithm": "AES256_GCM", "enable_data_fragmentation": false},
        }),
    );
    let decryption_key_resp = json_response(
        200,
        serde_json::json!({
            "encrypted_private_key": wrapped.enc_private_key_pem,
            "wrapped_data_key": B64.encode(&wrapped.wrapped_data_key),
            "encryption_session": serde_json::Value::Null,
            "key_fingerprint": serde_json::Value::Null,
        }),
    );
    let transport = StubTransport::new(vec![
        ("/api/v0/encryption/key", encryption_key_resp),
        ("/api/v0/decryption/key", decryption_key_resp),
    ]);
    let enc = Encryption::new(creds(), Config::default(), Box::new(transport));

    let mut ciphertext = enc.encrypt(b"abc", Dataset::unstructured("")).unwrap();
    ciphertext.pop();

    let err = enc.decrypt(&ciphertext, Dataset::unstructured("")).unwrap_err();
    assert!(matches!(err, Error::AuthFailure));
}

#[test]
fn scenario_3_encrypt_for_search_returns_one_ciphertext_per_key_version() {
    let def_keys_body = serde_json::json!({
        "SSN": {
            "ffs": "SSN",
            "encrypted_private_key": "unused-for-ff1-decrypt-path",
            "keys": {
                "0": B64.encode([1u8; 16]),
                "1": B64.encode([2u8; 16]),
                "2": B64.encode([3u8; 16]),
            },
        }
    });
    let transport = StubTransport::new(vec![
        ("/api/v0/ffs", json_response(200, ssn_ffs_body())),
        ("/api/v0/fpe/def_keys", json_response(200, def_keys_body)),
    ]);
    let enc = Encryption::new(creds(), Config::default(), Box::new(transport));

    let ciphertexts = enc.encrypt_for_search("123-45-6789", "SSN").unwrap();
    assert_eq!(ciphertexts.len(), 3);

    let mut dedup: VecDeque<String> = ciphertexts.clone().into();
    dedup.make_contiguous().sort();
    dedup.dedup();
    assert_eq!(dedup.len(), 3, "each key version must yield a distinct ciphertext");
}
