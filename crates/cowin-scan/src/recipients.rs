use std::fmt;
use std::path::Path;
use std::str::FromStr;

use tracing::debug;

use crate::executor::NotificationError;

// Regex for "Name <email>" or a bare email
lazy_static::lazy_static! {
    static ref RECIPIENT_REGEX: regex::Regex = regex::Regex::new(
        r"(?i)^\s*(?:(?P<name>\S.*?)\s+<\s*(?P<named_email>[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,})\s*>|(?P<email>[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}))\s*$"
    ).unwrap();
}

/// A person who receives slot digests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Display name, when one was given
    pub name: Option<String>,
    /// Email address
    pub email: String,
}

impl Recipient {
    /// Name to greet the recipient with; the address itself when no name was given.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.email)
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => f.write_str(&self.email),
        }
    }
}

impl FromStr for Recipient {
    type Err = NotificationError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let captures = RECIPIENT_REGEX
            .captures(line)
            .ok_or_else(|| NotificationError::InvalidRecipient(line.to_string()))?;

        if let Some(email) = captures.name("email") {
            return Ok(Recipient {
                name: None,
                email: email.as_str().to_string(),
            });
        }

        match (captures.name("name"), captures.name("named_email")) {
            (Some(name), Some(email)) => Ok(Recipient {
                name: Some(name.as_str().trim().to_string()),
                email: email.as_str().to_string(),
            }),
            _ => Err(NotificationError::InvalidRecipient(line.to_string())),
        }
    }
}

/// Parse one recipient per line, skipping blank lines and `#` comments.
pub fn parse_recipients(text: &str) -> Result<Vec<Recipient>, NotificationError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::parse)
        .collect()
}

/// Read and parse a recipients file.
pub fn load_recipients(path: impl AsRef<Path>) -> Result<Vec<Recipient>, NotificationError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| {
        NotificationError::Config(format!(
            "Failed to read recipients file {}: {}",
            path.display(),
            e
        ))
    })?;

    let recipients = parse_recipients(&text)?;
    debug!("Loaded {} recipients from {}", recipients.len(), path.display());
    Ok(recipients)
}
