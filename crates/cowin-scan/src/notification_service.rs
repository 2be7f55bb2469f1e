use std::sync::Arc;

use tracing::{error, info, warn};

use crate::diff::Change;
use crate::executor::{DeliveryReport, NotificationError, NotificationService, SlotDigest};
use crate::recipients::Recipient;
use crate::scan_types::COWIN_DATE_FORMAT;
use crate::snapshot::CenterRecord;

/// Subject line of every digest email
pub const DIGEST_SUBJECT: &str = "CoWin Slot Notification";

/// Notification service that emails each digest to a fixed recipient list
pub struct NotificationServiceImpl {
    email_service: Arc<dyn EmailService>,
    recipients: Vec<Recipient>,
}

/// Trait for email service implementations
#[async_trait::async_trait]
pub trait EmailService: Send + Sync {
    /// Check that the provider accepts the configured credentials.
    async fn verify_credentials(&self) -> Result<(), NotificationError>;

    /// Send one message and return the provider's message id.
    async fn send_email(
        &self,
        to: &Recipient,
        subject: &str,
        html_body: &str,
        text_body: &str,
    ) -> Result<String, NotificationError>;
}

impl NotificationServiceImpl {
    /// Create a service mailing `recipients` through `email_service`.
    pub fn new(email_service: Arc<dyn EmailService>, recipients: Vec<Recipient>) -> Self {
        Self {
            email_service,
            recipients,
        }
    }

    /// Recipients every digest goes to.
    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }
}

#[async_trait::async_trait]
impl NotificationService for NotificationServiceImpl {
    async fn send_slot_digest(
        &self,
        digests: &[SlotDigest],
    ) -> Result<DeliveryReport, NotificationError> {
        let mut report = DeliveryReport::default();

        if digests.is_empty() {
            return Ok(report);
        }
        if self.recipients.is_empty() {
            warn!("Slot digest ready but no recipients are configured");
            return Ok(report);
        }

        let (subject, html, text) = create_notification_content(digests);

        info!(
            "Sending slot digest covering {} dates to {} recipients",
            digests.len(),
            self.recipients.len()
        );

        for recipient in &self.recipients {
            match self
                .email_service
                .send_email(recipient, &subject, &html, &text)
                .await
            {
                Ok(message_id) => {
                    info!("Email sent successfully to {}", recipient.email);
                    report.delivered.push((recipient.clone(), message_id));
                }
                Err(e) => {
                    error!("Failed to send email to {}: {}", recipient.email, e);
                    report.failures.push((recipient.clone(), e));
                }
            }
        }

        Ok(report)
    }
}

/// Render the digests into a subject, an HTML body and a plain text body
pub fn create_notification_content(digests: &[SlotDigest]) -> (String, String, String) {
    let mut html = String::from("<html>\n<body>\n");
    let mut text = String::new();

    for digest in digests {
        let date = digest.date.format(COWIN_DATE_FORMAT).to_string();
        let fields = digest.area.area_fields();

        let area_html = fields
            .iter()
            .map(|(label, value)| format!("{}: <i>{}</i>", label, escape_html(&title_case(value))))
            .collect::<Vec<_>>()
            .join(", ");
        let area_text = fields
            .iter()
            .map(|(label, value)| format!("{}: {}", label, title_case(value)))
            .collect::<Vec<_>>()
            .join(", ");

        html.push_str(&format!(
            "<h3>Slots Available in {} on {}</h3>\n<ol>\n",
            area_html, date
        ));
        text.push_str(&format!("Slots Available in {} on {}\n\n", area_text, date));

        for (index, entry) in digest.diff.entries().iter().enumerate() {
            html.push_str(&center_html(&entry.record, entry.change));
            text.push_str(&center_text(index + 1, &entry.record, entry.change));
        }

        html.push_str("</ol>\n");
        text.push('\n');
    }

    html.push_str("</body>\n</html>\n");

    (DIGEST_SUBJECT.to_string(), html, text)
}

fn center_html(record: &CenterRecord, change: Change) -> String {
    format!(
        r#"<li>
<h3>{}</h3>
<h4>{}</h4>
<h4>Mode: {}</h4>
<strong>Available: {}</strong>{}<br/>
Age Limit: {} &nbsp;&nbsp;&nbsp;&nbsp; Vaccine: <i>{}</i><br/>
Slots: {}
</li>
"#,
        escape_html(&record.name),
        escape_html(&record.address),
        escape_html(&record.fee_mode),
        capacity_summary(record),
        escape_html(&change_note(change)),
        record.age_limit,
        escape_html(&record.vaccine),
        escape_html(&record.slots.join(", ")),
    )
}

fn center_text(position: usize, record: &CenterRecord, change: Change) -> String {
    format!(
        "{}. {}\n   {}\n   Mode: {}\n   Available: {}{}\n   Age Limit: {}  Vaccine: {}\n   Slots: {}\n",
        position,
        record.name,
        record.address,
        record.fee_mode,
        capacity_summary(record),
        change_note(change),
        record.age_limit,
        record.vaccine,
        record.slots.join(", "),
    )
}

fn capacity_summary(record: &CenterRecord) -> String {
    if record.available_capacity_dose1 > 0 || record.available_capacity_dose2 > 0 {
        format!(
            "{} (Dose 1: {}, Dose 2: {})",
            record.available_capacity,
            record.available_capacity_dose1,
            record.available_capacity_dose2
        )
    } else {
        record.available_capacity.to_string()
    }
}

fn change_note(change: Change) -> String {
    match change {
        Change::New | Change::IdentityChanged => String::new(),
        Change::Increased { previous } => format!(" (up from {})", previous),
    }
}

fn title_case(value: &str) -> String {
    value
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
