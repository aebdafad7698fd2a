use std::path::{Path, PathBuf};

use arca_core::config::{Config, CredentialPaths, EnvironmentType};

pub const CUIT: &str = "20111111112";

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/credentials")
        .join(name)
}

/// Testing config using the fixture key pair and the given service URLs.
#[allow(dead_code)]
pub fn config(wsaa_url: &str, wsfe_url: &str) -> Config {
    Config::new(
        EnvironmentType::Testing,
        CUIT,
        CredentialPaths::new(fixture("arca.key"), fixture("arca.crt")),
    )
    .with_endpoint("wsaa", EnvironmentType::Testing, wsaa_url)
    .with_endpoint("wsfe", EnvironmentType::Testing, wsfe_url)
}

/// SOAP 1.2 envelope wrapping `body`.
#[allow(dead_code)]
pub fn envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body>{body}</soap:Body></soap:Envelope>"#
    )
}

/// `loginCms` response carrying a ticket with the given credentials.
#[allow(dead_code)]
pub fn login_cms_response(token: &str, sign: &str, expiration: &str) -> String {
    let ticket = format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<loginTicketResponse version="1.0">
  <header>
    <source>CN=wsaahomo, O=AFIP, C=AR, SERIALNUMBER=CUIT 33693450239</source>
    <destination>SERIALNUMBER=CUIT {CUIT}, CN=arca-test</destination>
    <uniqueId>1704110400</uniqueId>
    <generationTime>2024-01-01T08:59:00.000-03:00</generationTime>
    <expirationTime>{expiration}</expirationTime>
  </header>
  <credentials>
    <token>{token}</token>
    <sign>{sign}</sign>
  </credentials>
</loginTicketResponse>"#
    );
    let escaped = quick_xml::escape::escape(ticket.as_str());
    envelope(&format!(
        r#"<loginCmsResponse xmlns="http://wsaa.view.sua.dvadac.desein.afip.gov"><loginCmsReturn>{escaped}</loginCmsReturn></loginCmsResponse>"#
    ))
}

/// SOAP 1.2 fault as WSAA sends it.
#[allow(dead_code)]
pub fn soap_fault(code: &str, reason: &str) -> String {
    envelope(&format!(
        r#"<soap:Fault><soap:Code><soap:Value>{code}</soap:Value></soap:Code><soap:Reason><soap:Text xml:lang="en">{reason}</soap:Text></soap:Reason></soap:Fault>"#
    ))
}
