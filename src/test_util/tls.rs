//! Throwaway PKI for TLS tests: a CA, a server certificate for `localhost` / `127.0.0.1`, and a
//! client identity whose key is also written passphrase protected.

use std::{
    fs,
    path::{Path, PathBuf},
};

use openssl::{
    asn1::Asn1Time,
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    pkey::{PKey, Private},
    rsa::Rsa,
    ssl::{SslAcceptor, SslMethod, SslVerifyMode},
    symm::Cipher,
    x509::{
        X509, X509Builder, X509Name, X509NameBuilder,
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectAlternativeName, SubjectKeyIdentifier,
        },
        store::X509StoreBuilder,
    },
};
use tempfile::TempDir;

pub struct TestCertificates {
    dir: TempDir,
    ca: X509,
    server_crt: X509,
    server_key: PKey<Private>,
}

impl TestCertificates {
    pub const KEY_PASS: &'static str = "gelf-test-pass";

    /// Generates fresh material into a temporary directory that lives as long as the value.
    pub fn generate() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temporary directory");

        let ca_key = new_key();
        let ca = build_ca(&ca_key);

        let server_key = new_key();
        let server_crt = build_leaf(&ca, &ca_key, &server_key, "localhost", true);

        let client_key = new_key();
        let client_crt = build_leaf(&ca, &ca_key, &client_key, "gelf-client", false);

        let certs = Self {
            dir,
            ca,
            server_crt,
            server_key,
        };
        write(&certs.ca_path(), &pem(certs.ca.to_pem()));
        write(&certs.path("server.crt"), &pem(certs.server_crt.to_pem()));
        write(
            &certs.path("server.key"),
            &pem(certs.server_key.private_key_to_pem_pkcs8()),
        );
        write(&certs.client_crt_path(), &pem(client_crt.to_pem()));
        write(
            &certs.client_key_path(),
            &pem(client_key.private_key_to_pem_pkcs8()),
        );
        write(
            &certs.client_encrypted_key_path(),
            &pem(client_key.private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                Self::KEY_PASS.as_bytes(),
            )),
        );
        certs
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn ca_path(&self) -> PathBuf {
        self.path("ca.crt")
    }

    pub fn ca_pem(&self) -> String {
        String::from_utf8(pem(self.ca.to_pem())).expect("PEM is not UTF-8")
    }

    pub fn client_crt_path(&self) -> PathBuf {
        self.path("client.crt")
    }

    pub fn client_key_path(&self) -> PathBuf {
        self.path("client.key")
    }

    pub fn client_encrypted_key_path(&self) -> PathBuf {
        self.path("client-encrypted.key")
    }

    /// Server side configuration for `tokio_openssl`. With `require_client_cert` the server
    /// rejects clients that do not present a certificate signed by the test CA.
    pub fn acceptor(&self, require_client_cert: bool) -> SslAcceptor {
        let mut builder = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())
            .expect("Failed to create acceptor");
        builder
            .set_certificate(&self.server_crt)
            .expect("Failed to set server certificate");
        builder
            .set_private_key(&self.server_key)
            .expect("Failed to set server key");
        builder
            .check_private_key()
            .expect("Server key does not match certificate");

        if require_client_cert {
            let mut store = X509StoreBuilder::new().expect("Failed to create store");
            store
                .add_cert(self.ca.clone())
                .expect("Failed to add CA to store");
            builder
                .set_verify_cert_store(store.build())
                .expect("Failed to set verify store");
            builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
        }

        builder.build()
    }
}

fn pem(result: Result<Vec<u8>, openssl::error::ErrorStack>) -> Vec<u8> {
    result.expect("Failed to encode PEM")
}

fn write(path: &Path, data: &[u8]) {
    fs::write(path, data).expect("Failed to write test certificate");
}

fn new_key() -> PKey<Private> {
    let rsa = Rsa::generate(2048).expect("Failed to generate RSA key");
    PKey::from_rsa(rsa).expect("Failed to wrap RSA key")
}

fn builder(subject: &str, key: &PKey<Private>) -> (X509Builder, X509Name) {
    let mut name = X509NameBuilder::new().expect("Failed to create name");
    name.append_entry_by_text("CN", subject)
        .expect("Failed to set common name");
    let name = name.build();

    let mut serial = BigNum::new().expect("Failed to create serial");
    serial
        .rand(64, MsbOption::MAYBE_ZERO, false)
        .expect("Failed to randomize serial");

    let mut builder = X509Builder::new().expect("Failed to create certificate builder");
    builder.set_version(2).expect("Failed to set version");
    builder
        .set_serial_number(&serial.to_asn1_integer().expect("Failed to convert serial"))
        .expect("Failed to set serial");
    builder
        .set_subject_name(&name)
        .expect("Failed to set subject");
    builder.set_pubkey(key).expect("Failed to set public key");
    builder
        .set_not_before(&Asn1Time::days_from_now(0).expect("Invalid time"))
        .expect("Failed to set not before");
    builder
        .set_not_after(&Asn1Time::days_from_now(2).expect("Invalid time"))
        .expect("Failed to set not after");
    (builder, name)
}

fn build_ca(key: &PKey<Private>) -> X509 {
    let (mut builder, subject) = builder("gelf-test-ca", key);
    builder
        .set_issuer_name(&subject)
        .expect("Failed to set issuer");
    builder
        .append_extension(
            BasicConstraints::new()
                .critical()
                .ca()
                .build()
                .expect("Failed to build constraints"),
        )
        .expect("Failed to add constraints");
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .key_cert_sign()
                .crl_sign()
                .build()
                .expect("Failed to build key usage"),
        )
        .expect("Failed to add key usage");
    let key_id = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))
        .expect("Failed to build key identifier");
    builder
        .append_extension(key_id)
        .expect("Failed to add key identifier");
    builder
        .sign(key, MessageDigest::sha256())
        .expect("Failed to sign CA");
    builder.build()
}

fn build_leaf(
    ca: &X509,
    ca_key: &PKey<Private>,
    key: &PKey<Private>,
    subject: &str,
    server: bool,
) -> X509 {
    let (mut builder, _) = builder(subject, key);
    builder
        .set_issuer_name(ca.subject_name())
        .expect("Failed to set issuer");
    builder
        .append_extension(
            BasicConstraints::new()
                .build()
                .expect("Failed to build constraints"),
        )
        .expect("Failed to add constraints");
    builder
        .append_extension(
            KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .build()
                .expect("Failed to build key usage"),
        )
        .expect("Failed to add key usage");

    let mut usage = ExtendedKeyUsage::new();
    if server {
        usage.server_auth();
    } else {
        usage.client_auth();
    }
    builder
        .append_extension(usage.build().expect("Failed to build extended key usage"))
        .expect("Failed to add extended key usage");

    let key_id = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(Some(ca), None))
        .expect("Failed to build key identifier");
    builder
        .append_extension(key_id)
        .expect("Failed to add key identifier");
    let authority = AuthorityKeyIdentifier::new()
        .keyid(false)
        .issuer(false)
        .build(&builder.x509v3_context(Some(ca), None))
        .expect("Failed to build authority identifier");
    builder
        .append_extension(authority)
        .expect("Failed to add authority identifier");

    if server {
        let alt_names = SubjectAlternativeName::new()
            .dns("localhost")
            .ip("127.0.0.1")
            .build(&builder.x509v3_context(Some(ca), None))
            .expect("Failed to build alternative names");
        builder
            .append_extension(alt_names)
            .expect("Failed to add alternative names");
    }

    builder
        .sign(ca_key, MessageDigest::sha256())
        .expect("Failed to sign certificate");
    builder.build()
}
