//! Login ticket request (TRA) construction.
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::Error;

/// How far `generationTime` is backdated so a server whose clock lags ours
/// still considers the request valid.
pub const CLOCK_SKEW: Duration = Duration::from_secs(60);

/// The ticket request sent to `loginCms` after signing.
///
/// # Examples
/// ```rust
/// use std::time::Duration;
/// use chrono::{TimeZone, Utc};
/// use arca_core::wsaa::TicketRequest;
///
/// let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
/// let tra = TicketRequest::build("wsfe", now, Duration::from_secs(3600))?;
/// let xml = tra.to_xml()?;
/// assert!(xml.contains("<generationTime>2024-01-01T11:59:00Z</generationTime>"));
/// # Ok::<(), arca_core::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketRequest {
    unique_id: u32,
    generation_time: DateTime<Utc>,
    expiration_time: DateTime<Utc>,
    service: String,
}

#[derive(Serialize)]
struct LoginTicketRequestXml<'a> {
    #[serde(rename = "@version")]
    version: &'static str,
    header: HeaderXml,
    service: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HeaderXml {
    unique_id: u32,
    generation_time: String,
    expiration_time: String,
}

impl TicketRequest {
    /// Build the request for `service` at `now`, valid for `ttl`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `service` is blank or `ttl` is
    /// out of range.
    pub fn build(service: &str, now: DateTime<Utc>, ttl: Duration) -> Result<Self, Error> {
        let service = service.trim();
        if service.is_empty() {
            return Err(Error::InvalidArgument(
                "service name must not be empty".into(),
            ));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| Error::InvalidArgument(format!("ticket TTL out of range: {e}")))?;
        let skew = chrono::Duration::seconds(CLOCK_SKEW.as_secs() as i64);
        let expiration_time = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::InvalidArgument("ticket TTL out of range".into()))?;

        Ok(Self {
            unique_id: now.timestamp() as u32,
            generation_time: now - skew,
            expiration_time,
            service: service.to_string(),
        })
    }

    pub fn unique_id(&self) -> u32 {
        self.unique_id
    }

    pub fn generation_time(&self) -> DateTime<Utc> {
        self.generation_time
    }

    pub fn expiration_time(&self) -> DateTime<Utc> {
        self.expiration_time
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Serialize to the `loginTicketRequest` document, XML declaration included.
    ///
    /// # Errors
    /// Returns [`Error::Serialization`] if the XML serializer rejects the document.
    pub fn to_xml(&self) -> Result<String, Error> {
        let document = LoginTicketRequestXml {
            version: "1.0",
            header: HeaderXml {
                unique_id: self.unique_id,
                generation_time: format_timestamp(self.generation_time),
                expiration_time: format_timestamp(self.expiration_time),
            },
            service: &self.service,
        };
        let body = quick_xml::se::to_string_with_root("loginTicketRequest", &document)
            .map_err(|e| Error::Serialization {
                document: "loginTicketRequest",
                message: e.to_string(),
            })?;
        Ok(format!(r#"<?xml version="1.0" encoding="UTF-8"?>{body}"#))
    }
}

fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xml::XmlElement;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 15, 30, 0).unwrap()
    }

    #[test]
    fn window_is_backdated_and_extends_by_ttl() {
        let tra = TicketRequest::build("wsfe", now(), Duration::from_secs(43_200)).unwrap();
        assert_eq!(
            tra.generation_time(),
            Utc.with_ymd_and_hms(2024, 5, 10, 15, 29, 0).unwrap()
        );
        assert_eq!(
            tra.expiration_time(),
            Utc.with_ymd_and_hms(2024, 5, 11, 3, 30, 0).unwrap()
        );
        assert_eq!(tra.unique_id(), now().timestamp() as u32);
    }

    #[test]
    fn xml_has_header_and_service() {
        let tra = TicketRequest::build("wsfe", now(), Duration::from_secs(600)).unwrap();
        let xml = tra.to_xml().unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains(r#"<loginTicketRequest version="1.0">"#));

        let root = XmlElement::parse(&xml).unwrap();
        assert_eq!(root.name(), "loginTicketRequest");
        assert_eq!(
            root.path_text(&["header", "uniqueId"]),
            Some(now().timestamp().to_string().as_str())
        );
        assert_eq!(
            root.path_text(&["header", "generationTime"]),
            Some("2024-05-10T15:29:00Z")
        );
        assert_eq!(
            root.path_text(&["header", "expirationTime"]),
            Some("2024-05-10T15:40:00Z")
        );
        assert_eq!(root.path_text(&["service"]), Some("wsfe"));
    }

    #[test]
    fn blank_service_is_rejected() {
        for service in ["", "   "] {
            let err = TicketRequest::build(service, now(), Duration::from_secs(60))
                .expect_err("blank service");
            assert!(matches!(err, Error::InvalidArgument(_)));
        }
    }

    #[test]
    fn service_is_trimmed() {
        let tra = TicketRequest::build(" wsfe ", now(), Duration::from_secs(60)).unwrap();
        assert_eq!(tra.service(), "wsfe");
    }
}
