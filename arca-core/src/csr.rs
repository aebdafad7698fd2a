//! CSR generation for the certificate ARCA issues to sign ticket requests.
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use rsa::{
    pkcs1v15::{Signature, SigningKey},
    pkcs8::{EncodePrivateKey, LineEnding},
    RsaPrivateKey,
};
use secrecy::SecretString;
use sha2::Sha256;
use thiserror::Error;
use x509_cert::{
    builder::{Builder, RequestBuilder},
    der::{EncodePem, Error as DerError},
    name::Name,
    request::CertReq,
};

/// Modulus size of generated keys.
pub const KEY_BITS: usize = 2048;
pub const KEY_FILE_NAME: &str = "arca.key";
pub const CSR_FILE_NAME: &str = "arca.csr";

const RESERVED_CHARS: &[char] = &[',', '+', '"', '\\', '<', '>', ';', '='];

/// Errors that can occur while generating or writing CSRs.
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("invalid subject distinguished name constructed from provided fields: {message}")]
    InvalidSubject { message: String },

    #[error("failed to generate RSA key: {message}")]
    KeyGeneration { message: String },

    #[error("failed to build CSR: {message}")]
    CsrBuild { message: String },

    #[error("failed PEM encoding for {context}: {message}")]
    Encode {
        context: &'static str,
        message: String,
    },

    #[error("failed to write '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Subject fields of the CSR submitted to ARCA.
///
/// # Examples
/// ```rust,no_run
/// use arca_core::csr::{CsrProperties, ToPem};
///
/// let props = CsrProperties::new("Test Org", "billing", "20-11111111-2")?;
/// let (csr, _key) = props.build_with_rng()?;
/// println!("{}", csr.to_pem_string()?);
/// # Ok::<(), arca_core::csr::CsrError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrProperties {
    organization_name: String,
    application_name: String,
    cuit: String,
}

/// Paths written by [`CsrProperties::write_to_dir`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrFiles {
    pub private_key: PathBuf,
    pub csr: PathBuf,
}

impl CsrProperties {
    /// # Errors
    /// Returns [`CsrError::Validation`] for empty names, names holding
    /// distinguished-name delimiters, or a CUIT that is not 11 digits.
    pub fn new(
        organization_name: impl Into<String>,
        application_name: impl Into<String>,
        cuit: impl Into<String>,
    ) -> Result<Self, CsrError> {
        let props = Self {
            organization_name: organization_name.into().trim().to_string(),
            application_name: application_name.into().trim().to_string(),
            cuit: cuit.into(),
        };
        validate_name("organization name", &props.organization_name)?;
        validate_name("application name", &props.application_name)?;
        let digits = props.clean_cuit();
        if digits.len() != 11 {
            return Err(CsrError::Validation {
                message: format!("CUIT must have 11 digits, got '{}'", props.cuit),
            });
        }
        Ok(props)
    }

    pub fn organization_name(&self) -> &str {
        &self.organization_name
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// CUIT with separators removed.
    pub fn clean_cuit(&self) -> String {
        self.cuit.chars().filter(char::is_ascii_digit).collect()
    }

    pub fn subject(&self) -> Result<Name, CsrError> {
        Name::from_str(&format!(
            "C=AR,O={},CN={},serialNumber=CUIT {}",
            self.organization_name,
            self.application_name,
            self.clean_cuit()
        ))
        .map_err(|e| CsrError::InvalidSubject {
            message: e.to_string(),
        })
    }

    /// Build a PKCS#10 request signed with SHA-256 over `key`.
    pub fn build(&self, key: &RsaPrivateKey) -> Result<CertReq, CsrError> {
        let signer = SigningKey::<Sha256>::new(key.clone());
        let builder = RequestBuilder::new(self.subject()?, &signer).map_err(|e| {
            CsrError::CsrBuild {
                message: e.to_string(),
            }
        })?;
        builder
            .build::<Signature>()
            .map_err(|e| CsrError::CsrBuild {
                message: e.to_string(),
            })
    }

    /// Generate a fresh key and build the request with it.
    pub fn build_with_rng(&self) -> Result<(CertReq, RsaPrivateKey), CsrError> {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), KEY_BITS).map_err(|e| {
            CsrError::KeyGeneration {
                message: e.to_string(),
            }
        })?;
        let csr = self.build(&key)?;
        Ok((csr, key))
    }

    /// Generate a key and request and write them as PEM to `dir/arca.key`
    /// and `dir/arca.csr`, creating `dir` if needed.
    pub fn write_to_dir(&self, dir: &Path) -> Result<CsrFiles, CsrError> {
        let (csr, key) = self.build_with_rng()?;
        fs::create_dir_all(dir).map_err(|source| CsrError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let files = CsrFiles {
            private_key: dir.join(KEY_FILE_NAME),
            csr: dir.join(CSR_FILE_NAME),
        };
        let key_pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CsrError::Encode {
                context: "private key",
                message: e.to_string(),
            })?;
        write_file(&files.private_key, key_pem.as_bytes())?;
        write_file(&files.csr, csr.to_pem_string()?.as_bytes())?;
        tracing::info!(
            key = %files.private_key.display(),
            csr = %files.csr.display(),
            "wrote CSR and private key"
        );
        Ok(files)
    }
}

fn validate_name(field: &str, value: &str) -> Result<(), CsrError> {
    if value.is_empty() {
        return Err(CsrError::Validation {
            message: format!("{field} must not be empty"),
        });
    }
    if let Some(c) = value.chars().find(|c| RESERVED_CHARS.contains(c)) {
        return Err(CsrError::Validation {
            message: format!("{field} must not contain '{c}'"),
        });
    }
    Ok(())
}

fn write_file(path: &Path, contents: &[u8]) -> Result<(), CsrError> {
    fs::write(path, contents).map_err(|source| CsrError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// PEM encoding helpers.
pub trait ToPem {
    fn to_pem_string(&self) -> Result<String, CsrError>;
}

impl ToPem for CertReq {
    fn to_pem_string(&self) -> Result<String, CsrError> {
        self.to_pem(LineEnding::LF)
            .map_err(|e: DerError| CsrError::Encode {
                context: "certificate request",
                message: e.to_string(),
            })
    }
}

impl ToPem for RsaPrivateKey {
    fn to_pem_string(&self) -> Result<String, CsrError> {
        self.to_pkcs8_pem(LineEnding::LF)
            .map(|pem| pem.to_string())
            .map_err(|e| CsrError::Encode {
                context: "private key",
                message: e.to_string(),
            })
    }
}

/// PKCS#8 PEM of `key`, kept out of `Debug` output.
pub fn private_key_pem(key: &RsaPrivateKey) -> Result<SecretString, CsrError> {
    key.to_pem_string().map(SecretString::new)
}
