//! Delivers [Notification]s as Discord webhook embeds.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::Client;
use serde::Serialize;

use super::{Notification, Notifier, NotifyError};

const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct WebhookPayload {
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    timestamp: String,
    footer: Footer,
}

#[derive(Debug, Serialize)]
struct Footer {
    text: String,
}

impl WebhookPayload {
    fn new(notification: &Notification, hostname: &str, now: DateTime<Utc>) -> Self {
        Self {
            embeds: vec![Embed {
                title: notification.title().to_string(),
                description: notification.description(),
                color: notification.color(),
                timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
                footer: Footer {
                    text: format!("Server: {hostname}"),
                },
            }],
        }
    }
}

/// Posts to a Discord webhook URL.
#[derive(Debug, Clone)]
pub struct DiscordWebhook {
    client: Client,
    url: String,
    hostname: String,
}

impl DiscordWebhook {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = Client::builder().timeout(TIMEOUT).build()?;
        let hostname = gethostname::gethostname().to_string_lossy().into_owned();

        Ok(Self {
            client,
            url: url.into(),
            hostname,
        })
    }
}

impl Notifier for DiscordWebhook {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let payload = WebhookPayload::new(notification, &self.hostname, Utc::now());
        log::trace!(target: "notify::discord", "Posting {payload:?}");

        let response = self.client.post(&self.url).json(&payload).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status));
        }

        Ok(())
    }
}
