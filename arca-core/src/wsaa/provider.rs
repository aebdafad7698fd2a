use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, DEFAULT_CACHE_KEY, DEFAULT_CACHE_TTL, WebService};
use crate::soap::{HttpSoapTransport, SoapTransport};
use crate::wsaa::{
    AuthorizationTicket, Clock, CmsSigner, Credentials, SystemClock, TicketCache, TicketClient,
    TicketRequest,
};
use crate::Error;

/// The `Auth` block every authenticated ARCA operation carries.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthParams {
    pub token: String,
    pub sign: String,
    pub cuit: String,
}

impl std::fmt::Debug for AuthParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthParams")
            .field("token", &"<redacted>")
            .field("sign", &"<redacted>")
            .field("cuit", &self.cuit)
            .finish()
    }
}

/// Hands out authorization tickets per service, requesting a new one from
/// WSAA only when the cached one is missing or older than the TTL.
///
/// # Examples
/// ```rust,no_run
/// use arca_core::config::{Config, CredentialPaths, EnvironmentType};
/// use arca_core::wsaa::AuthorizationTicketProvider;
///
/// # async fn run() -> Result<(), arca_core::Error> {
/// let config = Config::new(
///     EnvironmentType::Testing,
///     "20111111112",
///     CredentialPaths::new("arca.key", "arca.crt").with_passphrase("s3cret"),
/// );
/// let provider = AuthorizationTicketProvider::from_config(&config)?;
/// let auth = provider.auth_params("wsfe").await?;
/// println!("{}", auth.cuit);
/// # Ok(())
/// # }
/// ```
pub struct AuthorizationTicketProvider {
    cuit: String,
    signer: Arc<CmsSigner>,
    client: TicketClient,
    clock: Arc<dyn Clock>,
    cache: TicketCache,
    cache_key: String,
    ttl: Duration,
    respect_ticket_expiration: bool,
}

// Public API
impl AuthorizationTicketProvider {
    pub fn new(cuit: impl Into<String>, signer: CmsSigner, client: TicketClient) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            cuit: cuit.into(),
            signer: Arc::new(signer),
            client,
            cache: TicketCache::new(clock.clone()),
            clock,
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            ttl: DEFAULT_CACHE_TTL,
            respect_ticket_expiration: false,
        }
    }

    /// Load credentials and resolve the WSAA endpoint from `config`, talking
    /// to it over HTTP.
    ///
    /// # Errors
    /// Returns [`Error::Io`] or [`Error::Signing`] for unusable credentials,
    /// [`Error::Configuration`] if no WSAA URL is known for the environment.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let transport = HttpSoapTransport::new(config.request_timeout())?;
        Self::from_config_with_transport(config, Arc::new(transport))
    }

    /// Like [`Self::from_config`] but with a caller-supplied transport.
    pub fn from_config_with_transport(
        config: &Config,
        transport: Arc<dyn SoapTransport>,
    ) -> Result<Self, Error> {
        let endpoint = config.web_service_url(WebService::Wsaa.as_str())?;
        let credentials = Credentials::from_paths(config.cuit(), config.credentials())?;
        let signer = CmsSigner::new(&credentials)?;
        tracing::debug!(
            env = %config.env(),
            endpoint,
            cache_key = config.cache_key(),
            "configured ticket provider"
        );

        Ok(Self::new(config.cuit(), signer, TicketClient::new(endpoint, transport))
            .with_cache_key(config.cache_key())
            .with_ttl(config.cache_ttl())
            .with_ticket_expiration(config.respect_ticket_expiration()))
    }

    pub fn with_cache_key(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key = prefix.into();
        self
    }

    /// Lifetime of a cached ticket, also used as the requested ticket validity.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replaces the clock. Any cached tickets are dropped.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self.cache = self.fresh_cache();
        self
    }

    /// Replaces the cache policy. Any cached tickets are dropped.
    pub fn with_ticket_expiration(mut self, respect: bool) -> Self {
        self.respect_ticket_expiration = respect;
        self.cache = self.fresh_cache();
        self
    }

    pub fn cuit(&self) -> &str {
        &self.cuit
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key under which the ticket for `service` is cached.
    pub fn cache_key_for(&self, service: &str) -> String {
        format!("{}-{}", self.cache_key, service.trim())
    }

    /// Return a valid ticket for `service`, requesting one from WSAA when
    /// the cache has none. Concurrent callers for the same service share
    /// one request.
    ///
    /// # Errors
    /// [`Error::InvalidArgument`] for a blank service, [`Error::Signing`] if
    /// the request cannot be signed, [`Error::Remote`] if `loginCms` fails.
    /// Failures are never cached.
    #[tracing::instrument(skip(self))]
    pub async fn authorization_ticket(&self, service: &str) -> Result<AuthorizationTicket, Error> {
        let service = service.trim();
        if service.is_empty() {
            return Err(Error::InvalidArgument(
                "service name must not be empty".into(),
            ));
        }
        let key = self.cache_key_for(service);
        self.cache
            .get_or_fetch(&key, self.ttl, || self.request_ticket(service))
            .await
    }

    /// The ticket for `service` in the shape downstream operations expect.
    pub async fn auth_params(&self, service: &str) -> Result<AuthParams, Error> {
        let ticket = self.authorization_ticket(service).await?;
        Ok(AuthParams {
            token: ticket.token().to_string(),
            sign: ticket.sign().to_string(),
            cuit: self.cuit.clone(),
        })
    }

    /// Forget the cached ticket for `service` so the next call requests a new one.
    pub async fn invalidate(&self, service: &str) {
        self.cache.invalidate(&self.cache_key_for(service)).await;
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

// Private API
impl AuthorizationTicketProvider {
    fn fresh_cache(&self) -> TicketCache {
        TicketCache::new(self.clock.clone()).with_ticket_expiration(self.respect_ticket_expiration)
    }

    async fn request_ticket(&self, service: &str) -> Result<AuthorizationTicket, Error> {
        let request = TicketRequest::build(service, self.clock.now(), self.ttl)?;
        let document = request.to_xml()?;
        let signed = self.signer.sign(document.as_bytes())?;
        tracing::debug!(
            service,
            unique_id = request.unique_id(),
            endpoint = self.client.endpoint(),
            "requesting ticket"
        );
        let ticket = self.client.request_ticket(&signed).await?;
        tracing::info!(service, expiration = ticket.expiration(), "ticket issued");
        Ok(ticket)
    }
}

impl std::fmt::Debug for AuthorizationTicketProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationTicketProvider")
            .field("cuit", &self.cuit)
            .field("client", &self.client)
            .field("cache_key", &self.cache_key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::{RemoteServiceError, SoapRequest};
    use crate::wsaa::ManualClock;
    use crate::xml::XmlElement;
    use async_trait::async_trait;
    use base64ct::{Base64, Encoding};
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    const KEY: &[u8] = include_bytes!("../../tests/fixtures/credentials/arca.key");
    const CERT: &[u8] = include_bytes!("../../tests/fixtures/credentials/arca.crt");

    /// Replays canned `loginCms` outcomes, repeating the last one.
    struct StubWsaa {
        outcomes: Mutex<VecDeque<Result<(String, String), String>>>,
        requests: Mutex<Vec<SoapRequest>>,
    }

    impl StubWsaa {
        fn new(outcomes: Vec<Result<(&str, &str), &str>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(
                    outcomes
                        .into_iter()
                        .map(|o| o.map(|(t, s)| (t.to_string(), s.to_string())).map_err(String::from))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl SoapTransport for StubWsaa {
        async fn call(&self, request: SoapRequest) -> Result<XmlElement, RemoteServiceError> {
            let operation = request.operation.clone();
            self.requests.lock().push(request);
            let outcome = {
                let mut outcomes = self.outcomes.lock();
                if outcomes.len() > 1 {
                    outcomes.pop_front()
                } else {
                    outcomes.front().cloned()
                }
            };
            match outcome {
                Some(Ok((token, sign))) => {
                    let ticket = format!(
                        "<loginTicketResponse><header><expirationTime>2030-01-01T00:00:00Z</expirationTime></header>\
                         <credentials><token>{token}</token><sign>{sign}</sign></credentials></loginTicketResponse>"
                    );
                    let escaped = quick_xml::escape::escape(ticket.as_str());
                    Ok(XmlElement::parse(&format!(
                        "<loginCmsResponse><loginCmsReturn>{escaped}</loginCmsReturn></loginCmsResponse>"
                    ))
                    .unwrap())
                }
                Some(Err(reason)) => Err(RemoteServiceError::Fault {
                    operation,
                    code: "ns1:coe.alreadyAuthenticated".into(),
                    reason,
                }),
                None => Err(RemoteServiceError::invalid(&operation, "no stub outcome")),
            }
        }
    }

    fn provider(transport: Arc<StubWsaa>) -> (Arc<ManualClock>, AuthorizationTicketProvider) {
        let credentials = Credentials::new("20111111112", KEY.to_vec(), CERT.to_vec(), None);
        let signer = CmsSigner::new(&credentials).unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let provider = AuthorizationTicketProvider::new(
            credentials.cuit(),
            signer,
            TicketClient::new("https://wsaa.test/ws/services/LoginCms", transport),
        )
        .with_clock(clock.clone());
        (clock, provider)
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let wsaa = StubWsaa::new(vec![Ok(("T1", "S1"))]);
        let (_clock, provider) = provider(wsaa.clone());

        let first = provider.authorization_ticket("wsfe").await.unwrap();
        let second = provider.authorization_ticket("wsfe").await.unwrap();

        assert_eq!(
            first,
            AuthorizationTicket::new("T1", "S1", "2030-01-01T00:00:00Z")
        );
        assert_eq!(first, second);
        assert_eq!(wsaa.calls(), 1);
    }

    #[tokio::test]
    async fn login_cms_receives_signed_request() {
        let wsaa = StubWsaa::new(vec![Ok(("T1", "S1"))]);
        let (_clock, provider) = provider(wsaa.clone());
        provider.authorization_ticket("wsfe").await.unwrap();

        let requests = wsaa.requests.lock();
        let parameters = &requests[0].parameters;
        let cms = parameters
            .strip_prefix("<in0>")
            .and_then(|p| p.strip_suffix("</in0>"))
            .expect("in0 parameter");
        let der = Base64::decode_vec(cms).expect("base64 CMS");
        let tra = String::from_utf8_lossy(&der);
        assert!(tra.contains("<service>wsfe</service>"));
        assert!(tra.contains("<generationTime>2024-01-01T11:59:00Z</generationTime>"));
        assert!(tra.contains("<expirationTime>2024-01-02T00:00:00Z</expirationTime>"));
    }

    #[tokio::test]
    async fn ticket_is_requested_again_after_ttl() {
        let wsaa = StubWsaa::new(vec![Ok(("T1", "S1")), Ok(("T2", "S2"))]);
        let (clock, provider) = provider(wsaa.clone());

        provider.authorization_ticket("wsfe").await.unwrap();
        clock.advance(chrono::Duration::hours(12));
        let refreshed = provider.authorization_ticket("wsfe").await.unwrap();

        assert_eq!(refreshed.token(), "T2");
        assert_eq!(wsaa.calls(), 2);
    }

    #[tokio::test]
    async fn services_are_cached_separately() {
        let wsaa = StubWsaa::new(vec![Ok(("T1", "S1")), Ok(("T2", "S2"))]);
        let (_clock, provider) = provider(wsaa.clone());

        let wsfe = provider.authorization_ticket("wsfe").await.unwrap();
        let wsaa_ticket = provider.authorization_ticket("wsaa").await.unwrap();

        assert_eq!(wsfe.token(), "T1");
        assert_eq!(wsaa_ticket.token(), "T2");
        assert_eq!(provider.authorization_ticket("wsfe").await.unwrap(), wsfe);
        assert_eq!(wsaa.calls(), 2);
    }

    #[tokio::test]
    async fn remote_failure_is_not_cached() {
        let wsaa = StubWsaa::new(vec![Err("El CEE ya posee un TA valido"), Ok(("T1", "S1"))]);
        let (_clock, provider) = provider(wsaa.clone());

        let err = provider.authorization_ticket("wsfe").await.expect_err("fault");
        assert!(matches!(err, Error::Remote(RemoteServiceError::Fault { .. })));

        let ticket = provider.authorization_ticket("wsfe").await.unwrap();
        assert_eq!(ticket.token(), "T1");
        assert_eq!(wsaa.calls(), 2);
    }

    #[tokio::test]
    async fn blank_service_is_rejected_without_remote_call() {
        let wsaa = StubWsaa::new(vec![Ok(("T1", "S1"))]);
        let (_clock, provider) = provider(wsaa.clone());

        let err = provider.authorization_ticket("  ").await.expect_err("blank");
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(wsaa.calls(), 0);
    }

    #[tokio::test]
    async fn auth_params_carry_cuit() {
        let wsaa = StubWsaa::new(vec![Ok(("T1", "S1"))]);
        let (_clock, provider) = provider(wsaa);

        let auth = provider.auth_params("wsfe").await.unwrap();
        assert_eq!(
            auth,
            AuthParams {
                token: "T1".into(),
                sign: "S1".into(),
                cuit: "20111111112".into(),
            }
        );
        assert!(!format!("{auth:?}").contains("T1"));
    }

    #[tokio::test]
    async fn invalidate_forces_new_request() {
        let wsaa = StubWsaa::new(vec![Ok(("T1", "S1")), Ok(("T2", "S2"))]);
        let (_clock, provider) = provider(wsaa.clone());

        provider.authorization_ticket("wsfe").await.unwrap();
        provider.invalidate("wsfe").await;
        let ticket = provider.authorization_ticket("wsfe").await.unwrap();

        assert_eq!(ticket.token(), "T2");
        assert_eq!(wsaa.calls(), 2);
    }

    #[test]
    fn cache_key_uses_prefix_and_service() {
        let wsaa = StubWsaa::new(vec![]);
        let (_clock, provider) = provider(wsaa);
        assert_eq!(provider.cache_key_for("wsfe"), "arca-ta-wsfe");
        let provider = provider.with_cache_key("billing");
        assert_eq!(provider.cache_key_for(" wsfe "), "billing-wsfe");
    }
}
