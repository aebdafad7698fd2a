//! `loginCms` call and ticket response parsing.
use std::sync::Arc;

use crate::soap::{RemoteServiceError, SoapRequest, SoapTransport};
use crate::wsaa::AuthorizationTicket;
use crate::xml::XmlElement;

pub const WSAA_NAMESPACE: &str = "http://wsaa.view.sua.dvadac.desein.afip.gov";
pub const LOGIN_CMS: &str = "loginCms";

/// Exchanges a signed ticket request for an [`AuthorizationTicket`].
#[derive(Clone)]
pub struct TicketClient {
    endpoint: String,
    transport: Arc<dyn SoapTransport>,
}

impl TicketClient {
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn SoapTransport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Call `loginCms` with the base64 CMS blob and parse the returned ticket.
    ///
    /// # Errors
    /// Returns [`RemoteServiceError`] for transport failures, SOAP faults, or
    /// a response without token, sign, or expiration.
    pub async fn request_ticket(
        &self,
        signed_cms: &str,
    ) -> Result<AuthorizationTicket, RemoteServiceError> {
        let request = SoapRequest::new(&self.endpoint, WSAA_NAMESPACE, LOGIN_CMS)
            .with_action("")
            .with_parameter("in0", signed_cms);
        let response = self.transport.call(request).await?;
        let ticket_xml = response
            .path_text(&["loginCmsReturn"])
            .ok_or_else(|| RemoteServiceError::invalid(LOGIN_CMS, "loginCmsReturn is missing"))?;
        parse_login_ticket_response(ticket_xml)
    }
}

impl std::fmt::Debug for TicketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

/// Parse a `loginTicketResponse` document.
pub fn parse_login_ticket_response(xml: &str) -> Result<AuthorizationTicket, RemoteServiceError> {
    let root = XmlElement::parse(xml).map_err(|e| RemoteServiceError::invalid(LOGIN_CMS, e.to_string()))?;
    if root.name() != "loginTicketResponse" {
        return Err(RemoteServiceError::invalid(
            LOGIN_CMS,
            format!("expected loginTicketResponse, found <{}>", root.name()),
        ));
    }
    let required = |path: &[&str], what: &str| {
        root.path_text(path)
            .ok_or_else(|| RemoteServiceError::invalid(LOGIN_CMS, format!("{what} is missing or empty")))
    };
    let token = required(&["credentials", "token"], "token")?;
    let sign = required(&["credentials", "sign"], "sign")?;
    let expiration = required(&["header", "expirationTime"], "expirationTime")?;
    Ok(AuthorizationTicket::new(token, sign, expiration))
}
