//! Public keys stored in `key-cert` objects and signature checks.

use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{Id, PKey, Public},
    sign::Verifier,
};

use crate::rpsl::RpslObject;

/// Returns the upper case hex SHA-256 fingerprint of the DER encoded
/// public key in the PEM text.
pub fn fingerprint(pem: &str) -> Result<String, ErrorStack> {
    let key = PKey::public_key_from_pem(pem.as_bytes())?;
    let der = key.public_key_to_der()?;
    Ok(hex::encode_upper(openssl::sha::sha256(&der)))
}

/// Returns the public key of a `key-cert` object.
pub fn public_key(key_cert: &RpslObject) -> Result<PKey<Public>, ErrorStack> {
    let pem = format!("{}\n", key_cert.values("certif").collect::<Vec<_>>().join("\n"));
    PKey::public_key_from_pem(pem.as_bytes())
}

/// Verifies a signature over the data.
///
/// Ed25519 keys sign the data directly, all other key types are expected
/// to sign a SHA-256 digest.
pub fn verify(key: &PKey<Public>, data: &[u8], signature: &[u8]) -> bool {
    let res = if key.id() == Id::ED25519 {
        Verifier::new_without_digest(key).and_then(|mut v| v.verify_oneshot(signature, data))
    } else {
        Verifier::new(MessageDigest::sha256(), key).and_then(|mut v| {
            v.update(data)?;
            v.verify(signature)
        })
    };

    match res {
        Ok(valid) => valid,
        Err(e) => {
            debug!("Signature verification error: {e}");
            false
        }
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use openssl::sign::Signer;

    use super::*;
    use crate::rpsl::parse;
    use crate::test;

    #[test]
    fn key_cert_signature() {
        let key = test::signing_key();
        let key_cert = parse(&test::key_cert_text(&key, "MAINT-EXAMPLE")).unwrap();

        let pem = String::from_utf8(key.public_key_to_pem().unwrap()).unwrap();
        assert_eq!(key_cert.pk(), format!("KEY-{}", fingerprint(&pem).unwrap()));

        let public = public_key(&key_cert).unwrap();
        let data = b"route: 192.0.2.0/24\n";
        let signature = Signer::new_without_digest(&key)
            .unwrap()
            .sign_oneshot_to_vec(data)
            .unwrap();

        assert!(verify(&public, data, &signature));
        assert!(!verify(&public, b"route: 198.51.100.0/24\n", &signature));
        assert!(!verify(&public, data, b"garbage"));
    }
}
