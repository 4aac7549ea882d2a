#![allow(clippy::missing_errors_doc)]

use std::path::PathBuf;

use openssl::error::ErrorStack;
use snafu::Snafu;

mod maybe_tls;
mod settings;

pub use maybe_tls::{MaybeTls, MaybeTlsStream};
pub use settings::{MaybeTlsSettings, TlsConfig, TlsOptions, TlsSettings};

pub type Result<T> = std::result::Result<T, TlsError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TlsError {
    #[snafu(display("Could not open {} file {:?}: {}", note, filename, source))]
    FileOpenFailed {
        note: &'static str,
        filename: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not read {} file {:?}: {}", note, filename, source))]
    FileReadFailed {
        note: &'static str,
        filename: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not parse X509 certificate in {:?}: {}", filename, source))]
    X509ParseError {
        filename: PathBuf,
        source: ErrorStack,
    },
    #[snafu(display("Could not parse private key in {:?}: {}", filename, source))]
    PrivateKeyParseError {
        filename: PathBuf,
        source: ErrorStack,
    },
    #[snafu(display("No certificates found in {:?}", filename))]
    NoCertificates { filename: PathBuf },
    #[snafu(display("Must specify both TLS key_file and crt_file"))]
    MissingCrtKeyFile,
    #[snafu(display(
        "`verify_certificate = false` cannot be combined with a configured `ca_file`"
    ))]
    InsecureWithTrustStore,
    #[snafu(display("Could not create TLS connector: {}", source))]
    TlsNewConnector { source: ErrorStack },
    #[snafu(display("Could not set TLS certificate: {}", source))]
    SetCertificate { source: ErrorStack },
    #[snafu(display("Could not set TLS private key: {}", source))]
    SetPrivateKey { source: ErrorStack },
    #[snafu(display("TLS certificate and private key do not match: {}", source))]
    CheckPrivateKey { source: ErrorStack },
    #[snafu(display("Could not add extra chain certificate: {}", source))]
    AddExtraChainCert { source: ErrorStack },
    #[snafu(display("Could not create certificate store builder: {}", source))]
    NewStoreBuilder { source: ErrorStack },
    #[snafu(display("Could not add certificate to store: {}", source))]
    AddCertToStore { source: ErrorStack },
    #[snafu(display("Could not set verification store: {}", source))]
    SetVerifyCert { source: ErrorStack },
    #[snafu(display("Could not configure TLS connection: {}", source))]
    TlsConfigureConnection { source: ErrorStack },
    #[snafu(display("Could not create TLS stream: {}", source))]
    TlsStreamNew { source: ErrorStack },
    #[snafu(display("TLS handshake failed: {}", source))]
    Handshake { source: openssl::ssl::Error },
    #[snafu(display("Connect error: {}", source))]
    Connect { source: std::io::Error },
}
