mod common;

use std::sync::Arc;

use arca_core::config::{CredentialPaths, EnvironmentType};
use arca_core::wsaa::AuthorizationTicketProvider;
use arca_core::wsfe::WsfeClient;
use arca_core::{AuthorizationTicket, Error, RemoteServiceError};
use httpmock::{Method::POST, MockServer};

#[tokio::test]
async fn ticket_is_requested_once_and_cached() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/ws/services/LoginCms")
                .body_contains("<loginCms xmlns=\"http://wsaa.view.sua.dvadac.desein.afip.gov\">")
                .body_contains("<in0>");
            then.status(200)
                .header("Content-Type", "application/soap+xml; charset=utf-8")
                .body(common::login_cms_response("T1", "S1", "2030-01-01T00:00:00Z"));
        })
        .await;

    let config = common::config(&server.url("/ws/services/LoginCms"), &server.url("/wsfe"));
    let provider = AuthorizationTicketProvider::from_config(&config).expect("provider builds");

    let first = provider.authorization_ticket("wsfe").await.expect("ticket");
    let second = provider.authorization_ticket("wsfe").await.expect("cached ticket");

    assert_eq!(
        first,
        AuthorizationTicket::new("T1", "S1", "2030-01-01T00:00:00Z")
    );
    assert_eq!(first, second);
    login.assert_hits_async(1).await;
}

#[tokio::test]
async fn soap_fault_is_reported_and_not_cached() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/LoginCms");
            then.status(500).body(common::soap_fault(
                "ns1:coe.alreadyAuthenticated",
                "El CEE ya posee un TA valido para el acceso al WSN solicitado",
            ));
        })
        .await;

    let config = common::config(&server.url("/LoginCms"), &server.url("/wsfe"));
    let provider = AuthorizationTicketProvider::from_config(&config).unwrap();

    for _ in 0..2 {
        let err = provider.authorization_ticket("wsfe").await.expect_err("fault");
        match err {
            Error::Remote(RemoteServiceError::Fault {
                operation, code, ..
            }) => {
                assert_eq!(operation, "loginCms");
                assert_eq!(code, "ns1:coe.alreadyAuthenticated");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
    login.assert_hits_async(2).await;
}

#[tokio::test]
async fn incomplete_ticket_is_invalid_response() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/LoginCms");
            then.status(200)
                .body(common::login_cms_response("", "S1", "2030-01-01T00:00:00Z"));
        })
        .await;

    let config = common::config(&server.url("/LoginCms"), &server.url("/wsfe"));
    let provider = AuthorizationTicketProvider::from_config(&config).unwrap();
    let err = provider.authorization_ticket("wsfe").await.expect_err("empty token");
    assert!(matches!(
        err,
        Error::Remote(RemoteServiceError::InvalidResponse { ref operation, .. }) if operation == "loginCms"
    ));
}

#[tokio::test]
async fn wsfe_call_uses_cached_ticket() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/LoginCms");
            then.status(200)
                .body(common::login_cms_response("T1", "S1", "2030-01-01T00:00:00Z"));
        })
        .await;
    let wsfe = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/wsfev1/service.asmx")
                .header_exists("content-type")
                .body_contains("<Auth><Token>T1</Token><Sign>S1</Sign><Cuit>20111111112</Cuit></Auth>")
                .body_contains("<PtoVta>5</PtoVta><CbteTipo>11</CbteTipo>");
            then.status(200).body(common::envelope(
                "<FECompUltimoAutorizadoResponse xmlns=\"http://ar.gov.afip.dif.FEV1/\">\
                 <FECompUltimoAutorizadoResult><PtoVta>5</PtoVta><CbteTipo>11</CbteTipo>\
                 <CbteNro>128</CbteNro></FECompUltimoAutorizadoResult></FECompUltimoAutorizadoResponse>",
            ));
        })
        .await;

    let config = common::config(&server.url("/LoginCms"), &server.url("/wsfev1/service.asmx"));
    let provider = Arc::new(AuthorizationTicketProvider::from_config(&config).unwrap());
    let client = WsfeClient::from_config(&config, provider).unwrap();

    assert_eq!(client.last_authorized_invoice(5, 11).await.unwrap(), 128);
    assert_eq!(client.last_authorized_invoice(5, 11).await.unwrap(), 128);

    login.assert_hits_async(1).await;
    wsfe.assert_hits_async(2).await;
}

#[tokio::test]
async fn concurrent_callers_trigger_one_login() {
    let server = MockServer::start_async().await;
    let login = server
        .mock_async(|when, then| {
            when.method(POST).path("/LoginCms");
            then.status(200)
                .delay(std::time::Duration::from_millis(100))
                .body(common::login_cms_response("T1", "S1", "2030-01-01T00:00:00Z"));
        })
        .await;

    let config = common::config(&server.url("/LoginCms"), &server.url("/wsfe"));
    let provider = Arc::new(AuthorizationTicketProvider::from_config(&config).unwrap());

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let provider = provider.clone();
            tokio::spawn(async move { provider.authorization_ticket("wsfe").await })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().unwrap().token(), "T1");
    }
    login.assert_hits_async(1).await;
}

#[test]
fn missing_credentials_are_io_errors() {
    let config = common::config("https://wsaa.test", "https://wsfe.test");
    let config = arca_core::Config::new(
        config.env(),
        config.cuit(),
        CredentialPaths::new(common::fixture("missing.key"), common::fixture("arca.crt")),
    );
    let err = AuthorizationTicketProvider::from_config(&config).expect_err("missing key");
    match err {
        Error::Io { path, .. } => assert!(path.ends_with("missing.key")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn mismatched_certificate_is_rejected() {
    let config = arca_core::Config::new(
        EnvironmentType::Testing,
        common::CUIT,
        CredentialPaths::new(common::fixture("other.key"), common::fixture("arca.crt")),
    );
    let err = AuthorizationTicketProvider::from_config(&config).expect_err("mismatch");
    assert!(matches!(
        err,
        Error::Signing(arca_core::SigningError::KeyMismatch)
    ));
}

#[test]
fn encrypted_key_needs_passphrase() {
    let paths =
        CredentialPaths::new(common::fixture("arca-encrypted.key"), common::fixture("arca.crt"));
    let config = arca_core::Config::new(EnvironmentType::Testing, common::CUIT, paths.clone());
    assert!(matches!(
        AuthorizationTicketProvider::from_config(&config),
        Err(Error::Signing(_))
    ));

    let config = arca_core::Config::new(
        EnvironmentType::Testing,
        common::CUIT,
        paths.with_passphrase("s3cret"),
    );
    assert!(AuthorizationTicketProvider::from_config(&config).is_ok());
}

#[test]
fn missing_endpoint_is_configuration_error() {
    let config = common::config("", "https://wsfe.test");
    let err = AuthorizationTicketProvider::from_config(&config).expect_err("no wsaa url");
    assert_eq!(
        err.to_string(),
        "no URL configured for service [wsaa] in environment [testing]"
    );
}
