use std::{
    fmt,
    fs::File,
    io::Read,
    net::SocketAddr,
    path::{Path, PathBuf},
    pin::Pin,
};

use openssl::{
    pkey::{PKey, Private},
    ssl::{SslConnector, SslConnectorBuilder, SslMethod, SslVerifyMode},
    x509::{X509, store::X509StoreBuilder},
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use super::{
    AddCertToStoreSnafu, AddExtraChainCertSnafu, CheckPrivateKeySnafu, ConnectSnafu,
    FileOpenFailedSnafu, FileReadFailedSnafu, HandshakeSnafu, MaybeTls, MaybeTlsStream,
    NewStoreBuilderSnafu, PrivateKeyParseSnafu, Result, SetCertificateSnafu, SetPrivateKeySnafu,
    SetVerifyCertSnafu, TlsConfigureConnectionSnafu, TlsError, TlsNewConnectorSnafu,
    TlsStreamNewSnafu, X509ParseSnafu,
};

const PEM_START_MARKER: &str = "-----BEGIN ";

/// TLS configuration for the TCP transport.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TlsConfig {
    /// Whether or not to wrap the connection in TLS.
    pub enabled: Option<bool>,

    #[serde(flatten)]
    pub options: TlsOptions,
}

impl TlsConfig {
    pub fn enabled() -> Self {
        Self {
            enabled: Some(true),
            ..Self::default()
        }
    }
}

/// Standard TLS options.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the collector certificate against the trust store. Disabling this is insecure and
    /// may not be combined with `ca_file`.
    pub verify_certificate: Option<bool>,

    /// Verify that the collector hostname matches its certificate.
    pub verify_hostname: Option<bool>,

    /// PEM file with the certificate authorities to trust. The system trust store is used when
    /// unset. Inline PEM text is accepted in place of a path.
    #[serde(alias = "ca_path")]
    pub ca_file: Option<PathBuf>,

    /// PEM client certificate for mutual TLS.
    #[serde(alias = "crt_path")]
    pub crt_file: Option<PathBuf>,

    /// PEM private key matching `crt_file`.
    #[serde(alias = "key_path")]
    pub key_file: Option<PathBuf>,

    /// Passphrase protecting `key_file`.
    pub key_pass: Option<String>,
}

/// Directly usable settings for TLS connectors.
#[derive(Clone)]
pub struct TlsSettings {
    verify_certificate: bool,
    verify_hostname: bool,
    connector: SslConnector,
}

impl TlsSettings {
    /// Loads all configured material and builds the connector, so that any problem with the
    /// certificates is reported before a connection is ever attempted.
    pub fn from_options(options: &TlsOptions) -> Result<Self> {
        let verify_certificate = options.verify_certificate.unwrap_or(true);
        let verify_hostname = options.verify_hostname.unwrap_or(true);

        if !verify_certificate {
            if options.ca_file.is_some() {
                return Err(TlsError::InsecureWithTrustStore);
            }
            warn!("`verify_certificate` is DISABLED, this may lead to security vulnerabilities.");
        }
        if !verify_hostname {
            warn!("`verify_hostname` is DISABLED, this may lead to security vulnerabilities.");
        }

        let mut builder = SslConnector::builder(SslMethod::tls()).context(TlsNewConnectorSnafu)?;
        builder.set_verify(if verify_certificate {
            SslVerifyMode::PEER
        } else {
            SslVerifyMode::NONE
        });

        let authorities = options.load_authorities()?;
        if !authorities.is_empty() {
            let mut store = X509StoreBuilder::new().context(NewStoreBuilderSnafu)?;
            for authority in authorities {
                store.add_cert(authority).context(AddCertToStoreSnafu)?;
            }
            builder
                .set_verify_cert_store(store.build())
                .context(SetVerifyCertSnafu)?;
        } else if verify_certificate {
            debug!("Using system root certificates.");
        }

        options.apply_identity(&mut builder)?;

        Ok(Self {
            verify_certificate,
            verify_hostname,
            connector: builder.build(),
        })
    }

    pub const fn verify_certificate(&self) -> bool {
        self.verify_certificate
    }

    pub const fn verify_hostname(&self) -> bool {
        self.verify_hostname
    }

    async fn handshake(&self, host: &str, stream: TcpStream) -> Result<SslStream<TcpStream>> {
        let ssl = self
            .connector
            .configure()
            .context(TlsConfigureConnectionSnafu)?
            .verify_hostname(self.verify_hostname)
            .use_server_name_indication(true)
            .into_ssl(host)
            .context(TlsConfigureConnectionSnafu)?;

        let mut stream = SslStream::new(ssl, stream).context(TlsStreamNewSnafu)?;
        Pin::new(&mut stream).connect().await.context(HandshakeSnafu)?;

        debug!(message = "Negotiated TLS.");

        Ok(stream)
    }
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TlsSettings")
            .field("verify_certificate", &self.verify_certificate)
            .field("verify_hostname", &self.verify_hostname)
            .finish_non_exhaustive()
    }
}

impl TlsOptions {
    fn load_authorities(&self) -> Result<Vec<X509>> {
        match &self.ca_file {
            None => Ok(vec![]),
            Some(filename) => {
                let (data, filename) = open_read(filename, "certificate")?;
                let authorities = der_or_pem(
                    data,
                    |der| X509::from_der(&der).map(|x509| vec![x509]),
                    |pem| X509::stack_from_pem(pem.as_bytes()),
                )
                .with_context(|_| X509ParseSnafu {
                    filename: filename.clone(),
                })?;
                if authorities.is_empty() {
                    return Err(TlsError::NoCertificates { filename });
                }
                Ok(authorities)
            }
        }
    }

    fn apply_identity(&self, builder: &mut SslConnectorBuilder) -> Result<()> {
        let (crt_file, key_file) = match (&self.crt_file, &self.key_file) {
            (None, None) => return Ok(()),
            (Some(crt_file), Some(key_file)) => (crt_file, key_file),
            _ => return Err(TlsError::MissingCrtKeyFile),
        };

        let (data, filename) = open_read(crt_file, "certificate")?;
        let mut chain = der_or_pem(
            data,
            |der| X509::from_der(&der).map(|x509| vec![x509]),
            |pem| X509::stack_from_pem(pem.as_bytes()),
        )
        .with_context(|_| X509ParseSnafu {
            filename: filename.clone(),
        })?
        .into_iter();
        let certificate = chain
            .next()
            .ok_or(TlsError::NoCertificates { filename })?;

        let key = load_key(key_file, self.key_pass.as_deref())?;

        builder
            .set_certificate(&certificate)
            .context(SetCertificateSnafu)?;
        for intermediate in chain {
            builder
                .add_extra_chain_cert(intermediate)
                .context(AddExtraChainCertSnafu)?;
        }
        builder.set_private_key(&key).context(SetPrivateKeySnafu)?;
        builder.check_private_key().context(CheckPrivateKeySnafu)?;

        Ok(())
    }
}

pub type MaybeTlsSettings = MaybeTls<(), TlsSettings>;

impl MaybeTlsSettings {
    /// Generate an optional settings struct from the given optional configuration reference.
    /// If `config` is `None` or not enabled, TLS is disabled.
    pub fn from_config(config: Option<&TlsConfig>) -> Result<Self> {
        match config {
            Some(config) if config.enabled.unwrap_or(false) => {
                Ok(Self::Tls(TlsSettings::from_options(&config.options)?))
            }
            _ => Ok(Self::Raw(())),
        }
    }

    /// Opens a TCP connection to `addr`, negotiating TLS with `host` as the server name when
    /// enabled. A failed handshake is reported like any other connect failure.
    pub async fn connect(&self, host: &str, addr: SocketAddr) -> Result<MaybeTlsStream<TcpStream>> {
        let stream = TcpStream::connect(addr).await.context(ConnectSnafu)?;

        match self {
            MaybeTls::Raw(()) => Ok(MaybeTlsStream::Raw(stream)),
            MaybeTls::Tls(tls) => tls.handshake(host, stream).await.map(MaybeTlsStream::Tls),
        }
    }
}

/// Load a private key from a named file.
fn load_key(filename: &Path, pass_phrase: Option<&str>) -> Result<PKey<Private>> {
    let (data, filename) = open_read(filename, "key")?;
    match pass_phrase {
        None => der_or_pem(
            data,
            |der| PKey::private_key_from_der(&der),
            |pem| PKey::private_key_from_pem(pem.as_bytes()),
        )
        .context(PrivateKeyParseSnafu { filename }),
        Some(phrase) => der_or_pem(
            data,
            |der| PKey::private_key_from_pkcs8_passphrase(&der, phrase.as_bytes()),
            |pem| PKey::private_key_from_pem_passphrase(pem.as_bytes(), phrase.as_bytes()),
        )
        .context(PrivateKeyParseSnafu { filename }),
    }
}

/// Parse the data one way if it looks like a DER file, and the other if it looks like a PEM
/// file. For the content to be treated as PEM, it must parse as valid UTF-8 and contain a PEM
/// start marker.
fn der_or_pem<T>(data: Vec<u8>, der_fn: impl Fn(Vec<u8>) -> T, pem_fn: impl Fn(String) -> T) -> T {
    match String::from_utf8(data) {
        Ok(text) => match text.find(PEM_START_MARKER) {
            Some(_) => pem_fn(text),
            None => der_fn(text.into_bytes()),
        },
        Err(err) => der_fn(err.into_bytes()),
    }
}

/// Open the named file and read its entire contents into memory. If the file "name" contains a
/// PEM start marker, it is assumed to contain inline data and is used directly instead of
/// opening a file.
fn open_read(filename: &Path, note: &'static str) -> Result<(Vec<u8>, PathBuf)> {
    if let Some(text) = filename.to_str() {
        if text.contains(PEM_START_MARKER) {
            return Ok((Vec::from(text), "inline text".into()));
        }
    }

    let mut text = Vec::<u8>::new();

    File::open(filename)
        .with_context(|_| FileOpenFailedSnafu { note, filename })?
        .read_to_end(&mut text)
        .with_context(|_| FileReadFailedSnafu { note, filename })?;

    Ok((text, filename.into()))
}
