use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use lettre::address::AddressError;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::config;
use crate::message::{Contact, Message};
use crate::{Error, ErrorKind, Result};

use super::{normalize, Provider, SpamReports};

/// SendGrid account reached over SMTP for delivery and over its web API for
/// spam reports.
pub struct SendGrid {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    client: reqwest::Client,
    config: config::Provider,
}

impl SendGrid {
    pub fn new(config: &config::Provider) -> Result<Self> {
        let creds = if config.api_key.is_empty() {
            Credentials::new(config.username.clone(), config.password.clone())
        } else {
            Credentials::new("apikey".to_string(), config.api_key.clone())
        };

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)?
            .port(config.smtp_port)
            .credentials(creds)
            .build();

        Ok(Self {
            mailer,
            client: reqwest::Client::new(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl Provider for SendGrid {
    async fn send(&self, message: &Message) -> Result<()> {
        let email = build(message)?;
        let response = self.mailer.send(email).await?;
        if response.is_positive() {
            Ok(())
        } else {
            Err(ErrorKind::EmailBadResponse(response.code().to_string()).into())
        }
    }

    async fn spam_reports(&self) -> Result<SpamReports> {
        if !self.config.has_credentials() {
            return Err(ErrorKind::Upstream("provider credentials not set".to_string()).into());
        }

        let request = self.client.get(&self.config.spam_reports_url);
        let request = if self.config.api_key.is_empty() {
            request.query(&[
                ("api_user", self.config.username.as_str()),
                ("api_key", self.config.password.as_str()),
                ("date", "1"),
            ])
        } else {
            request.bearer_auth(&self.config.api_key).query(&[("date", "1")])
        };
        let response = request
            .send()
            .await
            .map_err(|e| ErrorKind::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorKind::Upstream(format!("spam reports http error {}: {}", status, body)).into());
        }

        let as_of = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let body = response
            .text()
            .await
            .map_err(|e| ErrorKind::Upstream(e.to_string()))?;
        parse_spam_reports(&body, as_of)
    }
}

#[derive(Deserialize)]
struct SpamReport {
    email: String,
    #[serde(default)]
    created: Option<String>,
}

/// Parses the body of a spam reports response.
///
/// The body is a json array of objects carrying at least an `email` field.
/// Report times come as `YYYY-MM-DD HH:MM:SS` in UTC and are kept when they
/// parse.
pub fn parse_spam_reports(body: &str, as_of: DateTime<Utc>) -> Result<SpamReports> {
    let reports: Vec<SpamReport> = serde_json::from_str(body)
        .map_err(|e| ErrorKind::Upstream(format!("malformed spam reports: {}", e)))?;

    let mut emails = HashMap::with_capacity(reports.len());
    for report in reports {
        let created = report
            .created
            .as_deref()
            .and_then(|c| NaiveDateTime::parse_from_str(c, "%Y-%m-%d %H:%M:%S").ok())
            .map(|c| c.and_utc());
        emails.insert(normalize(&report.email), created);
    }

    Ok(SpamReports { emails, as_of })
}

#[derive(Clone, Debug)]
struct ListUnsubscribe(String);

impl Header for ListUnsubscribe {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("List-Unsubscribe")
    }

    fn parse(s: &str) -> std::result::Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.trim_start_matches('<').trim_end_matches('>').to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), format!("<{}>", self.0))
    }
}

fn mailbox(contact: &Contact) -> Result<Mailbox> {
    let address = contact
        .email
        .parse()
        .map_err(|e: AddressError| Error::new(ErrorKind::EmailParseError(e.to_string())))?;
    Ok(Mailbox::new(Some(contact.full_name()), address))
}

fn build(message: &Message) -> Result<lettre::Message> {
    let mut builder = lettre::Message::builder()
        .from(mailbox(&message.from)?)
        .to(mailbox(&message.to)?)
        .subject(message.subject.clone());

    let mut body = message.body.clone();
    if let Some(url) = &message.unsubscribe_url {
        builder = builder.header(ListUnsubscribe(url.clone()));
        body.push_str(&format!("\n\n--\nTo unsubscribe from this list visit {}\n", url));
    }

    Ok(builder.body(body)?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn parses_report_list() {
        let as_of = Utc.with_ymd_and_hms(2016, 3, 1, 12, 0, 0).unwrap();
        let body = r#"[
            {"ip": "174.36.80.219", "email": "Example@Example.com", "created": "2009-12-06 15:45:08"},
            {"email": "other@example.com"}
        ]"#;

        let reports = parse_spam_reports(body, as_of).unwrap();
        assert_eq!(reports.as_of, as_of);
        assert_eq!(reports.emails.len(), 2);
        assert!(reports.contains("example@example.com"));
        assert_eq!(
            reports.emails["example@example.com"],
            Some(Utc.with_ymd_and_hms(2009, 12, 6, 15, 45, 8).unwrap())
        );
        assert_eq!(reports.emails["other@example.com"], None);
    }

    #[test]
    fn malformed_body_is_an_upstream_error() {
        let err = parse_spam_reports(r#"{"error": "bad username"}"#, Utc::now()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Upstream(_)));
    }

    #[test]
    fn live_message_carries_unsubscribe_link() {
        let mut message = Message::new(
            uuid::Uuid::new_v4(),
            Contact::new("sendgrid@eventarc.com", "Joe", "Bloggs"),
            Contact::new("tom@attendly.com", "Tommy", "Barker"),
            "Awesome Event 2016",
            "Hi Tommy Barker",
        );
        message.unsubscribe_url = Some("https://example.com/unsubscribe?token=abc".to_string());

        let formatted = String::from_utf8(build(&message).unwrap().formatted()).unwrap();
        assert!(formatted.contains("List-Unsubscribe: <https://example.com/unsubscribe?token=abc>"));
    }
}
