//! Signature round trips against real manifest bytes

use hotload_errors::{Error, SigningError};
use hotload_hash::Hash;
use hotload_manifest::{Manifest, Module, OrderedMap};
use hotload_signing::*;

fn manifest() -> Manifest {
    Manifest::builder()
        .module("./stdlib.js", Module::new("stdlib.bin", Hash::from_data(b"stdlib")))
        .module(
            "./app.js",
            Module::new("app.bin", Hash::from_data(b"app")).depends_on("./stdlib.js"),
        )
        .main_function("app.main")
        .build()
        .unwrap()
}

struct Keys {
    signer: ManifestSigner,
    verifier: ManifestVerifier,
}

fn keys() -> Keys {
    let pair = generate_ed25519_key_pair();
    Keys {
        signer: ManifestSigner::builder()
            .add_ed25519("key1", &pair.private_key)
            .unwrap()
            .build()
            .unwrap(),
        verifier: ManifestVerifier::builder()
            .add_ed25519("key1", &pair.public_key)
            .unwrap()
            .build()
            .unwrap(),
    }
}

fn signed_bytes(signer: &ManifestSigner) -> (Vec<u8>, Manifest) {
    let signed = signer.sign(&manifest()).unwrap();
    (signed.encode_json().unwrap().into_bytes(), signed)
}

#[test]
fn signed_manifest_verifies() {
    let keys = keys();
    let (bytes, signed) = signed_bytes(&keys.signer);
    assert_eq!(signed.signatures().len(), 1);
    let accepted = keys.verifier.verify(&bytes, &signed).unwrap();
    assert_eq!(accepted.as_deref(), Some("key1"));
}

#[test]
fn unsigned_metadata_can_change_after_signing() {
    let keys = keys();
    let (bytes, signed) = signed_bytes(&keys.signer);
    let rewritten = hotload_manifest::with_base_url(
        std::str::from_utf8(&bytes).unwrap(),
        "https://cdn.example/app/",
    )
    .unwrap();
    let reparsed = Manifest::decode_json(&rewritten).unwrap();
    assert!(keys
        .verifier
        .verify(rewritten.as_bytes(), &reparsed)
        .is_ok());
    assert_eq!(reparsed.signatures(), signed.signatures());
}

#[test]
fn tampered_payload_fails() {
    let keys = keys();
    let (bytes, signed) = signed_bytes(&keys.signer);
    let json = String::from_utf8(bytes).unwrap();
    let tampered = json.replace("app.main", "app.evil");
    let err = keys
        .verifier
        .verify(tampered.as_bytes(), &signed)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Signing(SigningError::VerificationFailed { .. })
    ));
    assert!(err.is_integrity());
}

#[test]
fn unknown_key_is_rejected() {
    let keys = keys();
    let other = generate_ed25519_key_pair();
    let stranger = ManifestSigner::builder()
        .add_ed25519("stranger", &other.private_key)
        .unwrap()
        .build()
        .unwrap();
    let (bytes, signed) = signed_bytes(&stranger);
    let err = keys.verifier.verify(&bytes, &signed).unwrap_err();
    assert!(matches!(
        err,
        Error::Signing(SigningError::NoTrustedKeyFound { .. })
    ));
}

#[test]
fn first_trusted_signature_decides() {
    let good = generate_ed25519_key_pair();
    let bad = generate_ed25519_key_pair();
    let verifier = ManifestVerifier::builder()
        .add_ed25519("good", &good.public_key)
        .unwrap()
        .add_ed25519("bad", &bad.public_key)
        .unwrap()
        .build()
        .unwrap();
    let signer = ManifestSigner::builder()
        .add_ed25519("good", &good.private_key)
        .unwrap()
        .build()
        .unwrap();
    let signed = signer.sign(&manifest()).unwrap();
    let good_signature = signed.signatures().get("good").unwrap().clone();

    // A forged signature under a trusted key ahead of a valid one is fatal.
    let forged: OrderedMap<String> = [
        ("bad", "00".repeat(64)),
        ("good", good_signature.clone()),
    ]
    .into_iter()
    .collect();
    let forged = signed.with_signatures(forged);
    let bytes = forged.encode_json().unwrap().into_bytes();
    assert!(verifier.verify(&bytes, &forged).is_err());

    // Unknown names ahead of a valid one are skipped.
    let skipped: OrderedMap<String> = [
        ("unknown", "00".repeat(64)),
        ("good", good_signature),
    ]
    .into_iter()
    .collect();
    let skipped = signed.with_signatures(skipped);
    let bytes = skipped.encode_json().unwrap().into_bytes();
    assert_eq!(
        verifier.verify(&bytes, &skipped).unwrap().as_deref(),
        Some("good")
    );
}

#[test]
fn multiple_signers_each_verify() {
    let a = generate_ed25519_key_pair();
    let b = generate_ed25519_key_pair();
    let signer = ManifestSigner::builder()
        .add_ed25519("a", &a.private_key)
        .unwrap()
        .add_ed25519("b", &b.private_key)
        .unwrap()
        .build()
        .unwrap();
    let (bytes, signed) = signed_bytes(&signer);
    for (name, public) in [("a", &a.public_key), ("b", &b.public_key)] {
        let verifier = ManifestVerifier::builder()
            .add_ed25519(name, public)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(verifier.verify(&bytes, &signed).unwrap().as_deref(), Some(name));
    }
}

#[test]
fn empty_trust_set_is_a_build_error() {
    assert!(matches!(
        ManifestVerifier::builder().build(),
        Err(Error::Signing(SigningError::NoTrustedKeys))
    ));
    assert!(ManifestSigner::builder().build().is_err());
    assert!(ManifestVerifier::builder()
        .add_ed25519("k", "not-hex")
        .is_err());
}

#[test]
fn disabled_checks_accept_unsigned_manifests() {
    let unsigned = manifest();
    let bytes = unsigned.encode_json().unwrap().into_bytes();
    let verifier = ManifestVerifier::no_signature_checks();
    assert_eq!(verifier.verify(&bytes, &unsigned).unwrap(), None);
}

#[test]
fn key_pair_serializes() {
    let pair = generate_ed25519_key_pair();
    let json = serde_json::to_string(&pair).unwrap();
    assert!(json.contains(&pair.public_key));
    assert_eq!(pair.private_key.len(), 64);
}

fn p256_keys() -> (KeyPair, Keys) {
    let pair = generate_ecdsa_p256_key_pair();
    let keys = Keys {
        signer: ManifestSigner::builder()
            .add_ecdsa_p256("p256", &pair.private_key)
            .unwrap()
            .build()
            .unwrap(),
        verifier: ManifestVerifier::builder()
            .add_ecdsa_p256("p256", &pair.public_key)
            .unwrap()
            .build()
            .unwrap(),
    };
    (pair, keys)
}

#[test]
fn p256_signed_manifest_verifies() {
    let (pair, keys) = p256_keys();
    assert_eq!(pair.algorithm, SignatureAlgorithm::EcdsaP256);
    let (bytes, signed) = signed_bytes(&keys.signer);
    assert_eq!(
        keys.verifier.verify(&bytes, &signed).unwrap().as_deref(),
        Some("p256")
    );
}

#[test]
fn p256_tampered_payload_fails() {
    let (_, keys) = p256_keys();
    let (bytes, signed) = signed_bytes(&keys.signer);
    let tampered = String::from_utf8(bytes).unwrap().replace("app.main", "app.evil");
    let err = keys
        .verifier
        .verify(tampered.as_bytes(), &signed)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Signing(SigningError::VerificationFailed { .. })
    ));
    assert!(err.is_integrity());
}

#[test]
fn mixed_algorithms_sign_one_manifest() {
    let ed = generate_ed25519_key_pair();
    let p256 = generate_ecdsa_p256_key_pair();
    let signer = ManifestSigner::builder()
        .add_ecdsa_p256("p256", &p256.private_key)
        .unwrap()
        .add(SignatureAlgorithm::Ed25519, "ed", &ed.private_key)
        .unwrap()
        .build()
        .unwrap();
    let (bytes, signed) = signed_bytes(&signer);
    assert_eq!(signed.signatures().keys().collect::<Vec<_>>(), vec!["p256", "ed"]);

    let ed_only = ManifestVerifier::builder()
        .add_ed25519("ed", &ed.public_key)
        .unwrap()
        .build()
        .unwrap();
    assert_eq!(ed_only.verify(&bytes, &signed).unwrap().as_deref(), Some("ed"));

    // A key registered under the wrong algorithm cannot verify.
    let confused = ManifestVerifier::builder()
        .add_ed25519("p256", &ed.public_key)
        .unwrap()
        .build()
        .unwrap();
    assert!(confused.verify(&bytes, &signed).is_err());
}

#[test]
fn p256_keys_are_validated() {
    let ed = generate_ed25519_key_pair();
    assert!(ManifestVerifier::builder()
        .add_ecdsa_p256("k", &ed.public_key)
        .is_err());
    assert!(ManifestSigner::builder()
        .add_ecdsa_p256("k", &"00".repeat(32))
        .is_err());
}
