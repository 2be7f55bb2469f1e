use std::env;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ses::Client as SesClient;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, error, info};

use crate::executor::NotificationError;
use crate::notification_service::EmailService;
use crate::recipients::Recipient;

/// Reply-to address used when `REPLY_TO` is not set
pub const DEFAULT_REPLY_TO: &str = "cowin-notifier@protonmail.com";

/// Which provider delivers mail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailProvider {
    /// SMTP relay with STARTTLS and login
    Smtp,
    /// AWS Simple Email Service
    Ses,
    /// Log messages instead of sending them
    Mock,
}

/// Mail settings, read from the environment
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Delivery provider (`EMAIL_PROVIDER`, default `smtp`)
    pub provider: EmailProvider,
    /// SMTP host (`SMTP_SERVER`, default `smtp.office365.com`)
    pub smtp_server: String,
    /// SMTP port (`SMTP_PORT`, default 587)
    pub smtp_port: u16,
    /// SMTP login (`SMTP_USERNAME`, defaults to the sender address)
    pub smtp_username: Option<String>,
    /// SMTP password (`SMTP_PASSWORD`)
    pub smtp_password: Option<String>,
    /// Sender address (`FROM_EMAIL`)
    pub from_email: String,
    /// Sender display name (`FROM_NAME`)
    pub from_name: String,
    /// Reply-to address (`REPLY_TO`)
    pub reply_to: Option<String>,
}

impl EmailConfig {
    /// Read the configuration from environment variables.
    pub fn from_env() -> Result<Self, NotificationError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Read the configuration through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, NotificationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider = match lookup("EMAIL_PROVIDER")
            .map(|p| p.trim().to_lowercase())
            .as_deref()
        {
            None | Some("smtp") => EmailProvider::Smtp,
            Some("ses") => EmailProvider::Ses,
            Some("mock") => EmailProvider::Mock,
            Some(other) => {
                return Err(NotificationError::Config(format!(
                    "Unknown EMAIL_PROVIDER '{}', expected smtp, ses or mock",
                    other
                )));
            }
        };

        let smtp_port: u16 = match lookup("SMTP_PORT") {
            Some(port) => port.trim().parse().map_err(|_| {
                NotificationError::Config(format!("SMTP_PORT is not a valid port: {}", port))
            })?,
            None => 587,
        };

        let from_email = match (provider, lookup("FROM_EMAIL")) {
            (_, Some(email)) => email,
            (EmailProvider::Mock, None) => "cowin-notifier@localhost".to_string(),
            (_, None) => {
                return Err(NotificationError::Config(
                    "FROM_EMAIL environment variable not set".to_string(),
                ));
            }
        };

        let smtp_password = lookup("SMTP_PASSWORD");
        if provider == EmailProvider::Smtp && smtp_password.is_none() {
            return Err(NotificationError::Config(
                "SMTP_PASSWORD environment variable not set".to_string(),
            ));
        }

        Ok(Self {
            provider,
            smtp_server: lookup("SMTP_SERVER").unwrap_or_else(|| "smtp.office365.com".to_string()),
            smtp_port,
            smtp_username: lookup("SMTP_USERNAME"),
            smtp_password,
            from_email,
            from_name: lookup("FROM_NAME").unwrap_or_else(|| "CoWin Notifier".to_string()),
            reply_to: Some(lookup("REPLY_TO").unwrap_or_else(|| DEFAULT_REPLY_TO.to_string())),
        })
    }
}

/// Build the email service selected by `config`
pub async fn create_email_service(
    config: &EmailConfig,
) -> Result<Arc<dyn EmailService>, NotificationError> {
    let service: Arc<dyn EmailService> = match config.provider {
        EmailProvider::Smtp => Arc::new(SmtpEmailService::new(config)?),
        EmailProvider::Ses => Arc::new(SesEmailService::new(config).await),
        EmailProvider::Mock => Arc::new(MockEmailService),
    };
    Ok(service)
}

fn mailbox(name: Option<String>, email: &str) -> Result<Mailbox, NotificationError> {
    let address: Address = email
        .parse()
        .map_err(|e| NotificationError::InvalidRecipient(format!("{}: {}", email, e)))?;
    Ok(Mailbox::new(name, address))
}

/// SMTP email service using a STARTTLS relay
pub struct SmtpEmailService {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    reply_to: Option<Mailbox>,
}

impl SmtpEmailService {
    /// Create a new SMTP email service
    pub fn new(config: &EmailConfig) -> Result<Self, NotificationError> {
        let password = config.smtp_password.clone().ok_or_else(|| {
            NotificationError::Config("SMTP_PASSWORD environment variable not set".to_string())
        })?;
        let username = config
            .smtp_username
            .clone()
            .unwrap_or_else(|| config.from_email.clone());

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_server)
            .map_err(|e| {
                NotificationError::Config(format!(
                    "Invalid SMTP server {}: {}",
                    config.smtp_server, e
                ))
            })?
            .port(config.smtp_port)
            .credentials(Credentials::new(username, password))
            .build();

        let from = mailbox(Some(config.from_name.clone()), &config.from_email)
            .map_err(|e| NotificationError::Config(format!("Invalid FROM_EMAIL: {}", e)))?;
        let reply_to = config
            .reply_to
            .as_deref()
            .map(|email| mailbox(None, email))
            .transpose()
            .map_err(|e| NotificationError::Config(format!("Invalid REPLY_TO: {}", e)))?;

        Ok(Self {
            transport,
            from,
            reply_to,
        })
    }

    fn build_message(
        &self,
        to: &Recipient,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<Message, NotificationError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(mailbox(to.name.clone(), &to.email)?)
            .subject(subject);

        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        builder
            .multipart(MultiPart::alternative_plain_html(
                text_body.to_string(),
                html_body.to_string(),
            ))
            .map_err(|e| NotificationError::Delivery(format!("Failed to build message: {}", e)))
    }
}

#[async_trait]
impl EmailService for SmtpEmailService {
    async fn verify_credentials(&self) -> Result<(), NotificationError> {
        match self.transport.test_connection().await {
            Ok(true) => {
                info!("SMTP login accepted for {}", self.from.email);
                Ok(())
            }
            Ok(false) => Err(NotificationError::Authentication(
                "SMTP server did not accept the connection".to_string(),
            )),
            Err(e) => Err(NotificationError::Authentication(format!(
                "SMTP login failed: {}",
                e
            ))),
        }
    }

    async fn send_email(
        &self,
        to: &Recipient,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<String, NotificationError> {
        debug!("Sending email to {} with subject: {}", to, subject);

        let message = self.build_message(to, subject, html_body, text_body)?;

        let response = self
            .transport
            .send(message)
            .await
            .map_err(|e| NotificationError::Delivery(format!("SMTP error: {}", e)))?;

        Ok(response.message().collect::<Vec<_>>().join(" "))
    }
}

/// AWS SES email service implementation
pub struct SesEmailService {
    ses_client: SesClient,
    from_email: String,
    reply_to: Option<String>,
}

impl SesEmailService {
    /// Create a new SES email service from the default AWS configuration chain
    pub async fn new(config: &EmailConfig) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;

        Self {
            ses_client: SesClient::new(&aws_config),
            from_email: format!("{} <{}>", config.from_name, config.from_email),
            reply_to: config.reply_to.clone(),
        }
    }
}

#[async_trait]
impl EmailService for SesEmailService {
    async fn verify_credentials(&self) -> Result<(), NotificationError> {
        let quota = self
            .ses_client
            .get_send_quota()
            .send()
            .await
            .map_err(|e| NotificationError::Authentication(format!("AWS SES error: {}", e)))?;

        info!(
            "AWS SES credentials accepted, {} of {} daily messages used",
            quota.sent_last24_hours(),
            quota.max24_hour_send()
        );
        Ok(())
    }

    async fn send_email(
        &self,
        to: &Recipient,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<String, NotificationError> {
        let content = |data: &str, part: &str| {
            aws_sdk_ses::types::Content::builder()
                .data(data)
                .build()
                .map_err(|e| {
                    NotificationError::Delivery(format!("Failed to build {}: {}", part, e))
                })
        };

        let body = aws_sdk_ses::types::Body::builder()
            .html(content(html_body, "HTML body")?)
            .text(content(text_body, "text body")?)
            .build();

        let message = aws_sdk_ses::types::Message::builder()
            .subject(content(subject, "subject")?)
            .body(body)
            .build();

        let destination = aws_sdk_ses::types::Destination::builder()
            .to_addresses(to.to_string())
            .build();

        let mut request = self
            .ses_client
            .send_email()
            .source(&self.from_email)
            .destination(destination)
            .message(message);
        if let Some(reply_to) = &self.reply_to {
            request = request.reply_to_addresses(reply_to);
        }

        match request.send().await {
            Ok(output) => Ok(output.message_id().to_string()),
            Err(e) => {
                error!("AWS SES error: {:#?}", e);
                let error_msg = if let Some(service_error) = e.as_service_error() {
                    format!("AWS SES service error: {:?}", service_error)
                } else {
                    format!("AWS SES error: {}", e)
                };
                Err(NotificationError::Delivery(error_msg))
            }
        }
    }
}

/// Mock email service for development/testing
pub struct MockEmailService;

#[async_trait]
impl EmailService for MockEmailService {
    async fn verify_credentials(&self) -> Result<(), NotificationError> {
        info!("📧 [MOCK EMAIL] Credentials accepted");
        Ok(())
    }

    async fn send_email(
        &self,
        to: &Recipient,
        subject: &str,
        _html_body: &str,
        text_body: &str,
    ) -> Result<String, NotificationError> {
        info!("📧 [MOCK EMAIL] To: {}", to);
        info!("📧 [MOCK EMAIL] Subject: {}", subject);
        info!("📧 [MOCK EMAIL] Body:\n{}", text_body);

        let mock_id = format!("mock-email-{}", uuid::Uuid::new_v4());
        Ok(mock_id)
    }
}
