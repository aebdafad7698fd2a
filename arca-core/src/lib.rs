//! Rust client for ARCA (formerly AFIP) web services: WSAA authentication
//! tickets, CMS signing, and authenticated WSFE calls.
//!
//! # Examples
//! ```rust,no_run
//! use arca_core::config::{Config, CredentialPaths, EnvironmentType, WebService};
//! use arca_core::wsaa::AuthorizationTicketProvider;
//!
//! # async fn run() -> Result<(), arca_core::Error> {
//! let config = Config::new(
//!     EnvironmentType::Testing,
//!     "20111111112",
//!     CredentialPaths::new("arca.key", "arca.crt"),
//! );
//! let provider = AuthorizationTicketProvider::from_config(&config)?;
//! let ticket = provider.authorization_ticket(WebService::Wsfe.as_str()).await?;
//! # let _ = ticket;
//! # Ok(())
//! # }
//! ```
pub mod config;
pub mod csr;
pub mod soap;
pub mod wsaa;
pub mod wsfe;
pub mod xml;

use std::path::PathBuf;

pub use config::{Config, EnvironmentType, WebService};
pub use soap::RemoteServiceError;
pub use wsaa::{AuthorizationTicket, AuthorizationTicketProvider, SigningError};
pub use wsfe::ServiceErrors;

/// Top-level error wrapper for every operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no URL configured for service [{service}] in environment [{environment}]")]
    Configuration {
        service: String,
        environment: EnvironmentType,
    },
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error(transparent)]
    Remote(#[from] RemoteServiceError),
    #[error(transparent)]
    Service(#[from] ServiceErrors),
    #[error(transparent)]
    Csr(#[from] csr::CsrError),
    #[error("cannot serialize {document}: {message}")]
    Serialization {
        document: &'static str,
        message: String,
    },
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
