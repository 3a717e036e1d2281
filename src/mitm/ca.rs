//! CA certificate authority for TLS termination (§4.8, §9).
//!
//! The proxy terminates TLS on a per-SNI basis by minting a leaf certificate
//! signed by a self-generated root CA, the same shape `mitmproxy` itself
//! uses and that `original_source`'s `cert_injector.py` assumes is already
//! on disk. Leaf certs are cached per hostname since signing is the
//! expensive part of every new CONNECT.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rcgen::{
    CertificateParams, DistinguishedName, DnType, Issuer, KeyPair, SanType,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

const CA_CERT_FILE: &str = "labyrinth-ca.crt";
const CA_KEY_FILE: &str = "labyrinth-ca.key";
const CA_COMMON_NAME: &str = "Labyrinth Interception CA";

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Root CA: kept in memory as PEM plus a parsed `rcgen::Issuer` for signing
/// leaf certs, and persisted to disk so containers can be given a stable
/// trust anchor across proxy restarts.
pub struct CertificateAuthority {
    cert_pem: String,
    key_pair: KeyPair,
    params: CertificateParams,
    leaf_cache: Mutex<HashMap<String, CachedLeaf>>,
}

#[derive(Clone)]
struct CachedLeaf {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDerOwned,
}

/// `PrivateKeyDer` isn't `Clone`; wrap the owned bytes so the cache can hand
/// out fresh `PrivateKeyDer` values without re-signing.
#[derive(Clone)]
struct PrivateKeyDerOwned(Vec<u8>);

impl PrivateKeyDerOwned {
    fn to_rustls(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.0.clone()))
    }
}

impl CertificateAuthority {
    /// Load the CA from `forensics_dir` if present, otherwise generate a
    /// fresh one and persist it for future restarts.
    pub fn load_or_generate(forensics_dir: &Path) -> Result<Self, CaError> {
        let cert_path = forensics_dir.join(CA_CERT_FILE);
        let key_path = forensics_dir.join(CA_KEY_FILE);

        if cert_path.exists() && key_path.exists() {
            let cert_pem = std::fs::read_to_string(&cert_path)?;
            let key_pem = std::fs::read_to_string(&key_path)?;
            return Self::from_pem(cert_pem, &key_pem);
        }

        let ca = Self::generate()?;
        std::fs::create_dir_all(forensics_dir)?;
        std::fs::write(&cert_path, &ca.cert_pem)?;
        std::fs::write(&key_path, ca.key_pair.serialize_pem())?;
        Ok(ca)
    }

    fn generate() -> Result<Self, CaError> {
        let key_pair = KeyPair::generate()?;
        let mut params = CertificateParams::new(Vec::new())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, CA_COMMON_NAME);
        params.distinguished_name = dn;
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
        params.key_usages = vec![rcgen::KeyUsagePurpose::KeyCertSign, rcgen::KeyUsagePurpose::CrlSign];

        let cert = params.self_signed(&key_pair)?;
        let cert_pem = cert.pem();

        Ok(Self {
            cert_pem,
            key_pair,
            params,
            leaf_cache: Mutex::new(HashMap::new()),
        })
    }

    fn from_pem(cert_pem: String, key_pem: &str) -> Result<Self, CaError> {
        let key_pair = KeyPair::from_pem(key_pem).map_err(|e| CaError::InvalidKey(e.to_string()))?;
        let params = CertificateParams::from_ca_cert_pem(&cert_pem)
            .map_err(|e| CaError::InvalidKey(e.to_string()))?;

        Ok(Self {
            cert_pem,
            key_pair,
            params,
            leaf_cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Mint (or return a cached) leaf certificate chain + key for `host`.
    pub fn leaf_for_host(&self, host: &str) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), CaError> {
        if let Some(cached) = self.leaf_cache.lock().unwrap().get(host) {
            return Ok((cached.cert_chain.clone(), cached.key.to_rustls()));
        }

        let mut leaf_params = CertificateParams::new(vec![host.to_string()])?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        leaf_params.distinguished_name = dn;
        leaf_params.subject_alt_names = vec![SanType::DnsName(host.to_string().try_into().map_err(|_| {
            CaError::InvalidKey(format!("invalid SNI hostname: {host}"))
        })?)];

        let leaf_key = KeyPair::generate()?;
        let issuer = Issuer::new(self.params.clone(), &self.key_pair);
        let leaf_cert = leaf_params.signed_by(&leaf_key, &issuer)?;

        let cert_der = CertificateDer::from(leaf_cert.der().to_vec());
        let key_bytes = leaf_key.serialize_der();
        let chain = vec![cert_der];
        let key = PrivateKeyDerOwned(key_bytes);

        self.leaf_cache.lock().unwrap().insert(
            host.to_string(),
            CachedLeaf {
                cert_chain: chain.clone(),
                key: key.clone(),
            },
        );

        Ok((chain, key.to_rustls()))
    }
}

pub fn default_ca_path(forensics_dir: &Path) -> PathBuf {
    forensics_dir.join(CA_CERT_FILE)
}
