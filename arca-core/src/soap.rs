//! SOAP 1.2 transport used as a black-box RPC channel.
use std::time::Duration;

use async_trait::async_trait;
use quick_xml::escape::escape;
use reqwest::Client;
use thiserror::Error;

use crate::xml::XmlElement;

const SOAP_ENV_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Errors raised while calling a remote operation. Every variant names the
/// operation that was attempted.
#[derive(Debug, Error)]
pub enum RemoteServiceError {
    #[error("error calling {operation}: {source}")]
    Transport {
        operation: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("error calling {operation}: HTTP status {status}: {body}")]
    Status {
        operation: String,
        status: u16,
        body: String,
    },
    #[error("error calling {operation}: SOAP fault {code}: {reason}")]
    Fault {
        operation: String,
        code: String,
        reason: String,
    },
    #[error("invalid response from {operation}: {message}")]
    InvalidResponse { operation: String, message: String },
}

impl RemoteServiceError {
    pub fn operation(&self) -> &str {
        match self {
            RemoteServiceError::Transport { operation, .. }
            | RemoteServiceError::Status { operation, .. }
            | RemoteServiceError::Fault { operation, .. }
            | RemoteServiceError::InvalidResponse { operation, .. } => operation,
        }
    }

    pub(crate) fn invalid(operation: &str, message: impl Into<String>) -> Self {
        RemoteServiceError::InvalidResponse {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

/// A single SOAP operation call.
#[derive(Debug, Clone)]
pub struct SoapRequest {
    pub endpoint: String,
    pub operation: String,
    /// Namespace of the operation element and its parameters.
    pub namespace: String,
    /// SOAP action URI, sent as the `action` media type parameter.
    pub action: Option<String>,
    /// Already serialized parameter elements placed inside the operation element.
    pub parameters: String,
}

impl SoapRequest {
    pub fn new(
        endpoint: impl Into<String>,
        namespace: impl Into<String>,
        operation: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            operation: operation.into(),
            namespace: namespace.into(),
            action: None,
            parameters: String::new(),
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Append a parameter element holding escaped text.
    pub fn with_parameter(mut self, name: &str, value: &str) -> Self {
        self.parameters
            .push_str(&format!("<{name}>{}</{name}>", escape(value)));
        self
    }

    /// Append raw, already serialized XML to the parameters.
    pub fn with_raw_parameters(mut self, xml: &str) -> Self {
        self.parameters.push_str(xml);
        self
    }

    /// Full SOAP 1.2 envelope for this request.
    pub fn envelope(&self) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<soap:Envelope xmlns:soap="{env}">"#,
                "<soap:Body>",
                r#"<{op} xmlns="{ns}">{params}</{op}>"#,
                "</soap:Body>",
                "</soap:Envelope>"
            ),
            env = SOAP_ENV_NS,
            op = self.operation,
            ns = self.namespace,
            params = self.parameters,
        )
    }
}

/// RPC channel capable of invoking a SOAP operation and returning the
/// response element found in the SOAP body.
#[async_trait]
pub trait SoapTransport: Send + Sync {
    async fn call(&self, request: SoapRequest) -> Result<XmlElement, RemoteServiceError>;
}

/// [`SoapTransport`] over HTTP(S) using `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpSoapTransport {
    client: Client,
}

impl HttpSoapTransport {
    /// Build a transport whose requests time out after `timeout`.
    ///
    /// # Errors
    /// Returns [`RemoteServiceError::Transport`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, RemoteServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| RemoteServiceError::Transport {
                operation: "client setup".into(),
                source,
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl SoapTransport for HttpSoapTransport {
    #[tracing::instrument(skip_all, fields(operation = %request.operation, endpoint = %request.endpoint))]
    async fn call(&self, request: SoapRequest) -> Result<XmlElement, RemoteServiceError> {
        let content_type = match &request.action {
            Some(action) => format!(r#"application/soap+xml; charset=utf-8; action="{action}""#),
            None => "application/soap+xml; charset=utf-8".to_string(),
        };
        tracing::debug!("sending SOAP request");

        let transport_error = |source| RemoteServiceError::Transport {
            operation: request.operation.clone(),
            source,
        };
        let response = self
            .client
            .post(&request.endpoint)
            .header("Content-Type", content_type)
            .body(request.envelope())
            .send()
            .await
            .map_err(transport_error)?;
        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        tracing::debug!(status = status.as_u16(), "received SOAP response");

        // Faults come back with a 4xx/5xx status, so look for one before
        // reporting the bare status.
        match parse_response(&request.operation, &body) {
            Ok(element) if status.is_success() => Ok(element),
            Err(fault @ RemoteServiceError::Fault { .. }) => Err(fault),
            Err(err) if status.is_success() => Err(err),
            _ => Err(RemoteServiceError::Status {
                operation: request.operation.clone(),
                status: status.as_u16(),
                body,
            }),
        }
    }
}

/// Extract the response element from a SOAP envelope, turning a SOAP Fault
/// (1.1 or 1.2) into [`RemoteServiceError::Fault`].
pub fn parse_response(operation: &str, envelope: &str) -> Result<XmlElement, RemoteServiceError> {
    let root = XmlElement::parse(envelope)
        .map_err(|e| RemoteServiceError::invalid(operation, e.to_string()))?;
    if root.name() != "Envelope" {
        return Err(RemoteServiceError::invalid(
            operation,
            format!("expected SOAP Envelope, found <{}>", root.name()),
        ));
    }
    let body = root
        .child("Body")
        .ok_or_else(|| RemoteServiceError::invalid(operation, "SOAP Body is missing"))?;
    let content = body
        .children()
        .first()
        .ok_or_else(|| RemoteServiceError::invalid(operation, "SOAP Body is empty"))?;

    if content.name() == "Fault" {
        let code = content
            .path_text(&["Code", "Value"])
            .or_else(|| content.path_text(&["faultcode"]))
            .unwrap_or("unknown");
        let reason = content
            .path_text(&["Reason", "Text"])
            .or_else(|| content.path_text(&["faultstring"]))
            .unwrap_or("no reason given");
        return Err(RemoteServiceError::Fault {
            operation: operation.to_string(),
            code: code.to_string(),
            reason: reason.to_string(),
        });
    }
    Ok(content.clone())
}
