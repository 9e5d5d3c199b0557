#![forbid(unsafe_code)]

//! RSA PKCS#1 v1.5 signatures.

use fiscalsig_core::{Error, HashAlgorithm};
use signature::SignatureEncoding;

/// Map a `SignatureMethod` URI to the hash it pairs with RSA.
pub fn signature_hash(uri: &str) -> Result<HashAlgorithm, Error> {
    HashAlgorithm::from_signature_uri(uri)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("signature algorithm: {uri}")))
}

/// Sign `data` (hashing it with `hash`) using RSA PKCS#1 v1.5.
pub fn sign_pkcs1v15(
    private_key: &rsa::RsaPrivateKey,
    hash: HashAlgorithm,
    data: &[u8],
) -> Result<Vec<u8>, Error> {
    use signature::Signer;
    macro_rules! do_sign {
        ($hasher:ty) => {{
            let sk = rsa::pkcs1v15::SigningKey::<$hasher>::new(private_key.clone());
            sk.try_sign(data)
                .map(|sig| sig.to_vec())
                .map_err(|e| Error::Signing(format!("RSA signing failed: {e}")))
        }};
    }
    match hash {
        HashAlgorithm::Sha1 => do_sign!(sha1::Sha1),
        HashAlgorithm::Sha256 => do_sign!(sha2::Sha256),
    }
}

/// Verify an RSA PKCS#1 v1.5 signature. `Ok(false)` means the signature does not match.
pub fn verify_pkcs1v15(
    public_key: &rsa::RsaPublicKey,
    hash: HashAlgorithm,
    data: &[u8],
    sig_bytes: &[u8],
) -> Result<bool, Error> {
    use signature::Verifier;
    let sig = rsa::pkcs1v15::Signature::try_from(sig_bytes)
        .map_err(|e| Error::Crypto(format!("invalid RSA signature: {e}")))?;
    macro_rules! do_verify {
        ($hasher:ty) => {{
            let vk = rsa::pkcs1v15::VerifyingKey::<$hasher>::new(public_key.clone());
            Ok(vk.verify(data, &sig).is_ok())
        }};
    }
    match hash {
        HashAlgorithm::Sha1 => do_verify!(sha1::Sha1),
        HashAlgorithm::Sha256 => do_verify!(sha2::Sha256),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiscalsig_core::algorithm;
    use rsa::pkcs8::DecodePrivateKey;

    const KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../test-data/pki/leaf.key.pem"
    ));

    #[test]
    fn sign_verify_both_hashes() {
        let key = rsa::RsaPrivateKey::from_pkcs8_pem(KEY).unwrap();
        let public = key.to_public_key();
        for hash in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
            let sig = sign_pkcs1v15(&key, hash, b"<SignedInfo></SignedInfo>").unwrap();
            assert_eq!(sig.len(), 256);
            assert!(verify_pkcs1v15(&public, hash, b"<SignedInfo></SignedInfo>", &sig).unwrap());
            assert!(!verify_pkcs1v15(&public, hash, b"<SignedInfo> </SignedInfo>", &sig).unwrap());
        }
    }

    #[test]
    fn hash_mismatch_fails() {
        let key = rsa::RsaPrivateKey::from_pkcs8_pem(KEY).unwrap();
        let sig = sign_pkcs1v15(&key, HashAlgorithm::Sha1, b"data").unwrap();
        assert!(!verify_pkcs1v15(&key.to_public_key(), HashAlgorithm::Sha256, b"data", &sig).unwrap());
    }

    #[test]
    fn signature_uris() {
        assert_eq!(signature_hash(algorithm::RSA_SHA256).unwrap(), HashAlgorithm::Sha256);
        assert!(matches!(
            signature_hash("http://www.w3.org/2000/09/xmldsig#dsa-sha1"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}
