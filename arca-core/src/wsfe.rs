//! Authenticated calls to WSFEv1, the electronic invoicing service.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use quick_xml::escape::escape;
use serde::Serialize;
use thiserror::Error;

use crate::config::{Config, WebService};
use crate::soap::{HttpSoapTransport, RemoteServiceError, SoapRequest, SoapTransport};
use crate::wsaa::{AuthParams, AuthorizationTicketProvider};
use crate::xml::XmlElement;
use crate::Error;

pub const WSFE_NAMESPACE: &str = "http://ar.gov.afip.dif.FEV1/";

/// One entry of the `Errors` block returned by a WSFE operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Business errors reported by a WSFE operation that otherwise answered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} returned errors: {}", join_errors(.errors))]
pub struct ServiceErrors {
    operation: String,
    errors: Vec<ServiceError>,
}

impl ServiceErrors {
    pub fn new(operation: impl Into<String>, errors: Vec<ServiceError>) -> Self {
        Self {
            operation: operation.into(),
            errors,
        }
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn errors(&self) -> &[ServiceError] {
        &self.errors
    }
}

fn join_errors(errors: &[ServiceError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A point of sale enabled for web service invoicing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointOfSale {
    pub number: u32,
    pub emission_type: String,
    pub blocked: bool,
    pub deactivated_on: Option<NaiveDate>,
}

/// VAT condition a recipient can declare.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VatCondition {
    pub id: u32,
    pub description: String,
    /// Invoice classes (A, B, C, M) the condition applies to.
    pub invoice_class: Option<String>,
}

/// Optional data type that can be attached to an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionalType {
    pub id: u32,
    pub description: String,
    pub valid_from: Option<NaiveDate>,
    pub valid_to: Option<NaiveDate>,
}

/// Document type and number of a party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identification {
    pub doc_type: u32,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelatedInvoice {
    pub invoice_type: u32,
    pub point_of_sale: u32,
    pub number: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tax {
    pub id: u32,
    pub description: String,
    pub base_amount: f64,
    pub rate: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VatItem {
    pub id: u32,
    pub base_amount: f64,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionalValue {
    pub id: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Buyer {
    pub identification: Identification,
    pub percentage: f64,
}

/// An authorized invoice as returned by `FECompConsultar`.
///
/// Dates are parsed from the `YYYYMMDD` form the service uses; blank dates
/// are `None`. Missing amounts read as zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvoiceDetails {
    pub concept: u32,
    pub recipient: Identification,
    pub invoice_type: u32,
    pub point_of_sale: u32,
    pub invoice_from: u64,
    pub invoice_to: u64,
    pub invoice_date: Option<NaiveDate>,
    pub total_amount: f64,
    pub untaxed_amount: f64,
    pub net_amount: f64,
    pub exempt_amount: f64,
    pub taxes_amount: f64,
    pub vat_amount: f64,
    pub service_from: Option<NaiveDate>,
    pub service_to: Option<NaiveDate>,
    pub payment_due: Option<NaiveDate>,
    pub currency: String,
    pub currency_rate: f64,
    pub recipient_vat_condition: Option<u32>,
    pub related_invoices: Vec<RelatedInvoice>,
    pub taxes: Vec<Tax>,
    pub vat: Vec<VatItem>,
    pub optionals: Vec<OptionalValue>,
    pub buyers: Vec<Buyer>,
    pub period_from: Option<NaiveDate>,
    pub period_to: Option<NaiveDate>,
    pub result: String,
    pub authorization_code: String,
    pub emission_type: String,
    pub authorization_code_due: Option<NaiveDate>,
    pub processed_at: Option<NaiveDateTime>,
    pub observations: Vec<Observation>,
}

/// WSFEv1 client that attaches the `Auth` block to every call.
pub struct WsfeClient {
    provider: Arc<AuthorizationTicketProvider>,
    endpoint: String,
    transport: Arc<dyn SoapTransport>,
}

// Public API
impl WsfeClient {
    pub fn new(
        provider: Arc<AuthorizationTicketProvider>,
        endpoint: impl Into<String>,
        transport: Arc<dyn SoapTransport>,
    ) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
            transport,
        }
    }

    /// Resolve the WSFE endpoint for the configured environment and talk to
    /// it over HTTP.
    pub fn from_config(
        config: &Config,
        provider: Arc<AuthorizationTicketProvider>,
    ) -> Result<Self, Error> {
        let endpoint = config.web_service_url(WebService::Wsfe.as_str())?;
        let transport = HttpSoapTransport::new(config.request_timeout())?;
        Ok(Self::new(provider, endpoint, Arc::new(transport)))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Call `operation` with `Auth` followed by `body` as its parameters and
    /// return the `{operation}Result` element.
    ///
    /// # Errors
    /// Ticket failures propagate from the provider. A transport failure or a
    /// response without the result element is [`Error::Remote`]. A non-empty
    /// `Errors` block is [`Error::Service`].
    #[tracing::instrument(skip(self, body))]
    pub async fn call(&self, operation: &str, body: &str) -> Result<XmlElement, Error> {
        let auth = self.provider.auth_params(WebService::Wsfe.as_str()).await?;
        let request = SoapRequest::new(&self.endpoint, WSFE_NAMESPACE, operation)
            .with_action(format!("{WSFE_NAMESPACE}{operation}"))
            .with_raw_parameters(&auth_xml(&auth))
            .with_raw_parameters(body);
        let response = self.transport.call(request).await?;

        let result_name = format!("{operation}Result");
        let result = response.child(&result_name).ok_or_else(|| {
            RemoteServiceError::invalid(operation, format!("{result_name} is missing"))
        })?;
        check_errors(operation, result)?;
        for event in result.children_named("Events").flat_map(|e| e.children()) {
            tracing::info!(
                operation,
                code = event.path_text(&["Code"]).unwrap_or_default(),
                message = event.path_text(&["Msg"]).unwrap_or_default(),
                "WSFE event"
            );
        }
        Ok(result.clone())
    }

    /// Number of the last invoice authorized for a point of sale and invoice type.
    pub async fn last_authorized_invoice(
        &self,
        point_of_sale: u32,
        invoice_type: u32,
    ) -> Result<u64, Error> {
        const OPERATION: &str = "FECompUltimoAutorizado";
        let body = format!("<PtoVta>{point_of_sale}</PtoVta><CbteTipo>{invoice_type}</CbteTipo>");
        let result = self.call(OPERATION, &body).await?;
        required_number(OPERATION, &result, "CbteNro").map_err(Error::from)
    }

    pub async fn points_of_sale(&self) -> Result<Vec<PointOfSale>, Error> {
        const OPERATION: &str = "FEParamGetPtosVenta";
        let result = self.call(OPERATION, "").await?;
        result_items(&result, "PtoVenta")
            .map(|item| -> Result<PointOfSale, Error> {
                Ok(PointOfSale {
                    number: required_number(OPERATION, item, "Nro")?,
                    emission_type: item.path_text(&["EmisionTipo"]).unwrap_or_default().to_string(),
                    blocked: item
                        .path_text(&["Bloqueado"])
                        .is_some_and(|b| b.eq_ignore_ascii_case("S")),
                    deactivated_on: optional_date(item, &["FchBaja"]),
                })
            })
            .collect()
    }

    pub async fn recipient_vat_conditions(&self) -> Result<Vec<VatCondition>, Error> {
        const OPERATION: &str = "FEParamGetCondicionIvaReceptor";
        let result = self.call(OPERATION, "").await?;
        result_items(&result, "CondicionIvaReceptor")
            .map(|item| -> Result<VatCondition, Error> {
                Ok(VatCondition {
                    id: required_number(OPERATION, item, "Id")?,
                    description: item.path_text(&["Desc"]).unwrap_or_default().to_string(),
                    invoice_class: item.path_text(&["Cmp_Clase"]).map(str::to_string),
                })
            })
            .collect()
    }

    pub async fn optional_types(&self) -> Result<Vec<OptionalType>, Error> {
        const OPERATION: &str = "FEParamGetTiposOpcional";
        let result = self.call(OPERATION, "").await?;
        result_items(&result, "OpcionalTipo")
            .map(|item| -> Result<OptionalType, Error> {
                Ok(OptionalType {
                    id: required_number(OPERATION, item, "Id")?,
                    description: text(item, &["Desc"]),
                    valid_from: optional_date(item, &["FchDesde"]),
                    valid_to: optional_date(item, &["FchHasta"]),
                })
            })
            .collect()
    }

    /// Look up an authorized invoice by point of sale, type and number.
    pub async fn invoice_details(
        &self,
        point_of_sale: u32,
        invoice_type: u32,
        number: u64,
    ) -> Result<InvoiceDetails, Error> {
        const OPERATION: &str = "FECompConsultar";
        let body = format!(
            "<FeCompConsReq><CbteTipo>{invoice_type}</CbteTipo><CbteNro>{number}</CbteNro>\
             <PtoVta>{point_of_sale}</PtoVta></FeCompConsReq>"
        );
        let result = self.call(OPERATION, &body).await?;
        let invoice = result.child("ResultGet").ok_or_else(|| {
            RemoteServiceError::invalid(OPERATION, "ResultGet is missing")
        })?;
        parse_invoice_details(OPERATION, invoice).map_err(Error::from)
    }
}

impl fmt::Debug for WsfeClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsfeClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn auth_xml(auth: &AuthParams) -> String {
    format!(
        "<Auth><Token>{}</Token><Sign>{}</Sign><Cuit>{}</Cuit></Auth>",
        escape(auth.token.as_str()),
        escape(auth.sign.as_str()),
        escape(auth.cuit.as_str()),
    )
}

fn check_errors(operation: &str, result: &XmlElement) -> Result<(), ServiceErrors> {
    let errors: Vec<ServiceError> = result
        .children_named("Errors")
        .flat_map(|block| block.children())
        .map(|err| {
            ServiceError::new(
                err.path_text(&["Code"]).unwrap_or("UNKNOWN"),
                err.path_text(&["Msg"]).unwrap_or("Unknown error"),
            )
        })
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceErrors::new(operation, errors))
    }
}

fn result_items<'a>(result: &'a XmlElement, item: &'a str) -> impl Iterator<Item = &'a XmlElement> {
    nested_items(result, "ResultGet", item)
}

/// Items of every `<wrapper>` child, as in `<Iva><AlicIva/><AlicIva/></Iva>`.
fn nested_items<'a>(
    element: &'a XmlElement,
    wrapper: &'a str,
    item: &'a str,
) -> impl Iterator<Item = &'a XmlElement> {
    element
        .children_named(wrapper)
        .flat_map(move |list| list.children_named(item))
}

fn parse_invoice_details(
    operation: &str,
    invoice: &XmlElement,
) -> Result<InvoiceDetails, RemoteServiceError> {
    Ok(InvoiceDetails {
        concept: required_number(operation, invoice, "Concepto")?,
        recipient: identification(operation, invoice)?,
        invoice_type: required_number(operation, invoice, "CbteTipo")?,
        point_of_sale: required_number(operation, invoice, "PtoVta")?,
        invoice_from: required_number(operation, invoice, "CbteDesde")?,
        invoice_to: required_number(operation, invoice, "CbteHasta")?,
        invoice_date: optional_date(invoice, &["CbteFch"]),
        total_amount: amount(operation, invoice, "ImpTotal", 0.0)?,
        untaxed_amount: amount(operation, invoice, "ImpTotConc", 0.0)?,
        net_amount: amount(operation, invoice, "ImpNeto", 0.0)?,
        exempt_amount: amount(operation, invoice, "ImpOpEx", 0.0)?,
        taxes_amount: amount(operation, invoice, "ImpTrib", 0.0)?,
        vat_amount: amount(operation, invoice, "ImpIVA", 0.0)?,
        service_from: optional_date(invoice, &["FchServDesde"]),
        service_to: optional_date(invoice, &["FchServHasta"]),
        payment_due: optional_date(invoice, &["FchVtoPago"]),
        currency: text(invoice, &["MonId"]),
        currency_rate: amount(operation, invoice, "MonCotiz", 1.0)?,
        recipient_vat_condition: invoice
            .path_text(&["CondicionIVAReceptorId"])
            .filter(|v| !v.is_empty())
            .map(|_| required_number(operation, invoice, "CondicionIVAReceptorId"))
            .transpose()?,
        related_invoices: nested_items(invoice, "CbtesAsoc", "CbteAsoc")
            .map(|item| -> Result<RelatedInvoice, RemoteServiceError> {
                Ok(RelatedInvoice {
                    invoice_type: required_number(operation, item, "Tipo")?,
                    point_of_sale: number_or_zero(operation, item, "PtoVta")?,
                    number: number_or_zero(operation, item, "Nro")?,
                })
            })
            .collect::<Result<_, _>>()?,
        taxes: nested_items(invoice, "Tributos", "Tributo")
            .map(|item| -> Result<Tax, RemoteServiceError> {
                Ok(Tax {
                    id: required_number(operation, item, "Id")?,
                    description: text(item, &["Desc"]),
                    base_amount: amount(operation, item, "BaseImp", 0.0)?,
                    rate: amount(operation, item, "Alic", 0.0)?,
                    amount: amount(operation, item, "Importe", 0.0)?,
                })
            })
            .collect::<Result<_, _>>()?,
        vat: nested_items(invoice, "Iva", "AlicIva")
            .map(|item| -> Result<VatItem, RemoteServiceError> {
                Ok(VatItem {
                    id: required_number(operation, item, "Id")?,
                    base_amount: amount(operation, item, "BaseImp", 0.0)?,
                    amount: amount(operation, item, "Importe", 0.0)?,
                })
            })
            .collect::<Result<_, _>>()?,
        optionals: nested_items(invoice, "Opcionales", "Opcional")
            .map(|item| OptionalValue {
                id: text(item, &["Id"]),
                value: text(item, &["Valor"]),
            })
            .collect(),
        buyers: nested_items(invoice, "Compradores", "Comprador")
            .map(|item| -> Result<Buyer, RemoteServiceError> {
                Ok(Buyer {
                    identification: identification(operation, item)?,
                    percentage: amount(operation, item, "Porcentaje", 0.0)?,
                })
            })
            .collect::<Result<_, _>>()?,
        period_from: optional_date(invoice, &["PeriodoAsoc", "FchDesde"]),
        period_to: optional_date(invoice, &["PeriodoAsoc", "FchHasta"]),
        result: text(invoice, &["Resultado"]),
        authorization_code: text(invoice, &["CodAutorizacion"]),
        emission_type: text(invoice, &["EmisionTipo"]),
        authorization_code_due: optional_date(invoice, &["FchVto"]),
        processed_at: invoice
            .path_text(&["FchProceso"])
            .and_then(|d| NaiveDateTime::parse_from_str(d, "%Y%m%d%H%M%S").ok()),
        observations: nested_items(invoice, "Observaciones", "Obs")
            .map(|item| Observation {
                code: text(item, &["Code"]),
                message: text(item, &["Msg"]),
            })
            .collect(),
    })
}

fn identification(
    operation: &str,
    element: &XmlElement,
) -> Result<Identification, RemoteServiceError> {
    Ok(Identification {
        doc_type: required_number(operation, element, "DocTipo")?,
        number: required_number(operation, element, "DocNro")?,
    })
}

fn text(element: &XmlElement, path: &[&str]) -> String {
    element.path_text(path).unwrap_or_default().to_string()
}

/// `YYYYMMDD` date; blank, `NULL` or malformed values read as absent.
fn optional_date(element: &XmlElement, path: &[&str]) -> Option<NaiveDate> {
    element
        .path_text(path)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
}

fn amount(
    operation: &str,
    element: &XmlElement,
    name: &str,
    default: f64,
) -> Result<f64, RemoteServiceError> {
    match element.path_text(&[name]).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|e| RemoteServiceError::invalid(operation, format!("{name} '{value}': {e}"))),
    }
}

fn number_or_zero<T: FromStr + Default>(
    operation: &str,
    element: &XmlElement,
    name: &str,
) -> Result<T, RemoteServiceError>
where
    T::Err: fmt::Display,
{
    match element.path_text(&[name]) {
        None => Ok(T::default()),
        Some(_) => required_number(operation, element, name),
    }
}

fn required_number<T: FromStr>(
    operation: &str,
    element: &XmlElement,
    name: &str,
) -> Result<T, RemoteServiceError>
where
    T::Err: fmt::Display,
{
    let text = element
        .path_text(&[name])
        .ok_or_else(|| RemoteServiceError::invalid(operation, format!("{name} is missing")))?;
    text.parse()
        .map_err(|e| RemoteServiceError::invalid(operation, format!("{name} '{text}': {e}")))
}
