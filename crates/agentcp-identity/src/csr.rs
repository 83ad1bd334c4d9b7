//! Certificate signing request construction.

use p384::SecretKey;
use pkcs8::EncodePrivateKey;
use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, IsCa, KeyPair};

use crate::store::IdentityError;

/// Build a PEM-encoded CSR for `aid` over the given P-384 key.
///
/// Subject is the fixed `C=CN, ST=SomeState, L=SomeCity, O=SomeOrganization,
/// CN=<aid>` tuple the CA expects, with a CA:FALSE basic-constraints
/// extension.
pub fn build_csr(aid: &str, key: &SecretKey) -> Result<String, IdentityError> {
    let pkcs8 = key
        .to_pkcs8_der()
        .map_err(|e| IdentityError::Key(e.to_string()))?;
    let key_pair = KeyPair::try_from(pkcs8.as_bytes())
        .map_err(|e| IdentityError::Csr(format!("key pair: {e}")))?;

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CountryName, DnValue::Utf8String("CN".to_string()));
    dn.push(
        DnType::StateOrProvinceName,
        DnValue::Utf8String("SomeState".to_string()),
    );
    dn.push(
        DnType::LocalityName,
        DnValue::Utf8String("SomeCity".to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String("SomeOrganization".to_string()),
    );
    dn.push(DnType::CommonName, DnValue::Utf8String(aid.to_string()));

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    params.is_ca = IsCa::ExplicitNoCa;

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| IdentityError::Csr(e.to_string()))?;
    csr.pem().map_err(|e| IdentityError::Csr(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn csr_is_pem() {
        let key = SecretKey::random(&mut OsRng);
        let csr = build_csr("alice.aid.net", &key).unwrap();
        assert!(csr.starts_with("-----BEGIN CERTIFICATE REQUEST-----"));
        assert!(csr.trim_end().ends_with("-----END CERTIFICATE REQUEST-----"));
    }
}
