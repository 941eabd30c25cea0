//! TLS context for the proxy listener.
//!
//! The rest of the crate only sees "a configured acceptor, or none".
//! Certificates either come from PEM files or are generated self-signed for
//! `localhost` at startup.

use std::path::Path;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rcgen::{
    CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;

const SELF_SIGNED_NAME: &str = "localhost";
const SELF_SIGNED_VALIDITY_DAYS: i64 = 365;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("Failed to load certificate and key: {0}")]
    Load(#[source] std::io::Error),

    #[error("Failed to generate self-signed certificate: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("Failed to write certificate to {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A generated certificate and its private key, PEM encoded.
#[derive(Debug, Clone)]
pub struct SelfSigned {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }

    RustlsConfig::from_pem_file(cert_path, key_path).await
}

/// Generate a self-signed server certificate for `localhost`, valid for one
/// year starting a day in the past.
pub fn generate_self_signed() -> Result<SelfSigned, TlsError> {
    let key_pair = KeyPair::generate()?;

    let mut params = CertificateParams::new(vec![SELF_SIGNED_NAME.to_string()])?;
    params
        .distinguished_name
        .push(DnType::CommonName, SELF_SIGNED_NAME);
    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(1);
    params.not_after = now + Duration::days(SELF_SIGNED_VALIDITY_DAYS);
    params.is_ca = IsCa::ExplicitNoCa;
    params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];

    let cert = params.self_signed(&key_pair)?;
    Ok(SelfSigned {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

/// Build the listener's TLS acceptor, or `None` when TLS is disabled.
///
/// A generated certificate is written to `config.generated_cert_path` so
/// clients can be pointed at it.
pub async fn build_acceptor(config: &TlsConfig) -> Result<Option<TlsAcceptor>, TlsError> {
    if !config.enabled {
        return Ok(None);
    }

    let rustls_config = match (&config.cert_path, &config.key_path) {
        (Some(cert), Some(key)) => {
            tracing::info!(cert = %cert.display(), key = %key.display(), "Loading TLS certificate");
            load_tls_config(cert, key).await.map_err(TlsError::Load)?
        }
        _ => {
            let generated = generate_self_signed()?;
            tokio::fs::write(&config.generated_cert_path, &generated.cert_pem)
                .await
                .map_err(|source| TlsError::Write {
                    path: config.generated_cert_path.display().to_string(),
                    source,
                })?;
            tracing::info!(
                path = %config.generated_cert_path.display(),
                "Generated self-signed certificate"
            );
            RustlsConfig::from_pem(generated.cert_pem.into_bytes(), generated.key_pem.into_bytes())
                .await
                .map_err(TlsError::Load)?
        }
    };

    // Connections are served as HTTP/1 only; CONNECT needs the upgrade path.
    let mut server_config = (*rustls_config.get_inner()).clone();
    server_config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Some(TlsAcceptor::from(Arc::new(server_config))))
}
