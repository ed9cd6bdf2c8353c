//! Minimal mutual-attestation certificates.
//!
//! No production TLS CA: a certificate is a JSON document binding a subject
//! CN to a per-identity envelope key and a validity window, attested by an
//! HMAC-SHA256 under the shared CA key. Both ends hold the CA key and verify
//! the peer's attestation; the server additionally requires the client CN to
//! appear in its trusted-clients directory.

use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::error::LinkError;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over `data`, hex encoded.
pub(crate) fn hmac_hex(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification of a hex HMAC-SHA256 tag.
pub(crate) fn hmac_verify(key: &[u8], data: &[u8], tag_hex: &str) -> bool {
    let Ok(tag) = hex::decode(tag_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts any key length");
    mac.update(data);
    mac.verify_slice(&tag).is_ok()
}

/// The shared attestation key (trust root).
#[derive(Debug, Clone)]
pub struct CaKey(Vec<u8>);

impl CaKey {
    /// Generate a fresh 256-bit key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.to_vec())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, LinkError> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| LinkError::InvalidFormat(format!("ca key: {e}")))?;
        if bytes.is_empty() {
            return Err(LinkError::InvalidFormat("empty ca key".to_string()));
        }
        Ok(Self(bytes))
    }

    pub fn load(path: &Path) -> Result<Self, LinkError> {
        Self::from_hex(&std::fs::read_to_string(path)?)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// An attested identity document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    /// Subject common name — the client identifier.
    pub subject_cn: String,
    /// Per-identity envelope verification key (hex).
    pub key_hex: String,
    /// Wall-clock issue time [ms since epoch].
    pub issued_at_ms: u64,
    /// Wall-clock expiry [ms since epoch].
    pub expires_at_ms: u64,
    /// CA attestation over the fields above (hex HMAC-SHA256).
    pub attestation_hex: String,
}

impl Certificate {
    fn signable(cn: &str, key_hex: &str, issued_at_ms: u64, expires_at_ms: u64) -> String {
        format!("{cn}|{key_hex}|{issued_at_ms}|{expires_at_ms}")
    }

    /// Issue a certificate for `cn` with a fresh envelope key.
    pub fn issue(ca: &CaKey, cn: &str, now_ms: u64, validity_ms: u64) -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::issue_with_key(ca, cn, &hex::encode(key), now_ms, validity_ms)
    }

    /// Issue a certificate binding an existing key.
    pub fn issue_with_key(
        ca: &CaKey,
        cn: &str,
        key_hex: &str,
        now_ms: u64,
        validity_ms: u64,
    ) -> Self {
        let expires_at_ms = now_ms + validity_ms;
        let attestation_hex = hmac_hex(
            ca.bytes(),
            Self::signable(cn, key_hex, now_ms, expires_at_ms).as_bytes(),
        );
        Self {
            subject_cn: cn.to_string(),
            key_hex: key_hex.to_string(),
            issued_at_ms: now_ms,
            expires_at_ms,
            attestation_hex,
        }
    }

    /// Verify attestation and validity window.
    pub fn verify(&self, ca: &CaKey, now_ms: u64) -> Result<(), LinkError> {
        let data = Self::signable(
            &self.subject_cn,
            &self.key_hex,
            self.issued_at_ms,
            self.expires_at_ms,
        );
        if !hmac_verify(ca.bytes(), data.as_bytes(), &self.attestation_hex) {
            return Err(LinkError::Unauthorized(format!(
                "bad attestation for '{}'",
                self.subject_cn
            )));
        }
        if now_ms < self.issued_at_ms || now_ms > self.expires_at_ms {
            return Err(LinkError::Unauthorized(format!(
                "certificate for '{}' outside validity window",
                self.subject_cn
            )));
        }
        Ok(())
    }

    /// Decoded envelope key bytes.
    pub fn key_bytes(&self) -> Result<Vec<u8>, LinkError> {
        hex::decode(&self.key_hex)
            .map_err(|e| LinkError::InvalidFormat(format!("certificate key: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, LinkError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| LinkError::InvalidFormat(format!("certificate: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<(), LinkError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| LinkError::InvalidFormat(format!("certificate: {e}")))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Directory of trusted client certificates keyed by CN.
#[derive(Debug, Default, Clone)]
pub struct TrustedClients {
    certs: HashMap<String, Certificate>,
}

impl TrustedClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` certificate from a directory. Unparseable files
    /// are skipped with a warning.
    pub fn load_dir(path: &Path) -> Result<Self, LinkError> {
        let mut trusted = Self::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let p = entry.path();
            if p.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Certificate::load(&p) {
                Ok(cert) => trusted.insert(cert),
                Err(e) => warn!(file = %p.display(), error = %e, "skipping bad client certificate"),
            }
        }
        info!(clients = trusted.certs.len(), "trusted clients loaded");
        Ok(trusted)
    }

    pub fn insert(&mut self, cert: Certificate) {
        self.certs.insert(cert.subject_cn.clone(), cert);
    }

    pub fn get(&self, cn: &str) -> Option<&Certificate> {
        self.certs.get(cn)
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_certificate_verifies() {
        let ca = CaKey::generate();
        let cert = Certificate::issue(&ca, "operator-1", 1_000, 60_000);
        cert.verify(&ca, 30_000).unwrap();
    }

    #[test]
    fn wrong_ca_rejects() {
        let ca = CaKey::generate();
        let other = CaKey::generate();
        let cert = Certificate::issue(&ca, "operator-1", 1_000, 60_000);
        assert!(matches!(
            cert.verify(&other, 30_000),
            Err(LinkError::Unauthorized(_))
        ));
    }

    #[test]
    fn tampered_cn_rejects() {
        let ca = CaKey::generate();
        let mut cert = Certificate::issue(&ca, "operator-1", 1_000, 60_000);
        cert.subject_cn = "operator-2".to_string();
        assert!(cert.verify(&ca, 30_000).is_err());
    }

    #[test]
    fn expired_certificate_rejects() {
        let ca = CaKey::generate();
        let cert = Certificate::issue(&ca, "operator-1", 1_000, 60_000);
        assert!(cert.verify(&ca, 120_000).is_err());
    }

    #[test]
    fn ca_key_hex_round_trip() {
        let ca = CaKey::generate();
        let again = CaKey::from_hex(&ca.to_hex()).unwrap();
        assert_eq!(ca.to_hex(), again.to_hex());
    }

    #[test]
    fn trusted_dir_load(){
        let dir = tempfile::tempdir().unwrap();
        let ca = CaKey::generate();
        for cn in ["alpha", "beta"] {
            Certificate::issue(&ca, cn, 0, 1_000_000)
                .save(&dir.path().join(format!("{cn}.json")))
                .unwrap();
        }
        // A junk file must be skipped, not fail the load.
        std::fs::write(dir.path().join("junk.json"), "not json").unwrap();
        std::fs::write(dir.path().join("readme.txt"), "ignore me").unwrap();

        let trusted = TrustedClients::load_dir(dir.path()).unwrap();
        assert_eq!(trusted.len(), 2);
        assert!(trusted.get("alpha").is_some());
        assert!(trusted.get("gamma").is_none());
    }
}
