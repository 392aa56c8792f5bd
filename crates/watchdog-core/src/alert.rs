//! Escalation: cooldown-gated voice + email alerts when recovery fails.
//!
//! The two channels are dispatched independently; a failure on one never
//! suppresses the other. Once dispatch has been attempted the alert time is
//! written to the [`StateStore`] so a sustained outage alerts at most once per
//! cooldown window.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::command::{self, CommandError};
use crate::config::{AlertsConfig, VoiceCredentials};
use crate::state::{HealthState, StateStore};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Voice,
    Email,
}

impl std::fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertChannel::Voice => f.write_str("voice"),
            AlertChannel::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlertMessage {
    pub channel: AlertChannel,
    pub recipient: String,
    /// Email subject; empty for voice.
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("voice call rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// What happened on one channel during an escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum ChannelReport {
    Sent,
    Failed(String),
    Skipped(String),
}

impl ChannelReport {
    pub fn attempted(&self) -> bool {
        !matches!(self, ChannelReport::Skipped(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum EscalationReport {
    /// Inside the cooldown window; nothing sent.
    Suppressed { retry_in_secs: u64 },
    Dispatched {
        voice: ChannelReport,
        email: ChannelReport,
    },
}

// ---------------------------------------------------------------------------
// Senders
// ---------------------------------------------------------------------------

#[async_trait]
pub trait VoiceSender: Send + Sync {
    async fn call(&self, recipient: &str, spoken: &str) -> Result<(), AlertError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AlertError>;
}

/// Places a call through the Twilio Calls API that reads `spoken` aloud.
pub struct TwilioVoice {
    client: reqwest::Client,
    api_base: String,
    creds: VoiceCredentials,
}

impl TwilioVoice {
    pub fn new(
        api_base: impl Into<String>,
        creds: VoiceCredentials,
        timeout: Duration,
    ) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            creds,
        })
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base, self.creds.account_sid
        )
    }
}

#[async_trait]
impl VoiceSender for TwilioVoice {
    async fn call(&self, recipient: &str, spoken: &str) -> Result<(), AlertError> {
        let twiml = twiml_say(spoken);
        let params = [
            ("To", recipient),
            ("From", self.creds.from_number.as_str()),
            ("Twiml", twiml.as_str()),
        ];
        let resp = self
            .client
            .post(self.calls_url())
            .basic_auth(&self.creds.api_key_sid, Some(&self.creds.api_key_secret))
            .form(&params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AlertError::Rejected {
                status: status.as_u16(),
                body: crate::io::truncate_chars(&body, 200),
            });
        }
        Ok(())
    }
}

/// TwiML that reads the message twice.
pub fn twiml_say(spoken: &str) -> String {
    format!(
        "<Response><Say voice=\"alice\" loop=\"2\">{}</Say></Response>",
        xml_escape(spoken)
    )
}

fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Sends mail through the Google Workspace CLI
/// (`gog gmail send ... --body-file <tmp>`).
pub struct GogEmail {
    program: String,
    account: String,
    timeout: Duration,
}

impl GogEmail {
    pub fn new(program: impl Into<String>, account: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            account: account.into(),
            timeout,
        }
    }

    fn argv(&self, recipient: &str, subject: &str, body_file: &str) -> Vec<String> {
        let mut argv = vec![
            self.program.clone(),
            "gmail".to_string(),
            "send".to_string(),
            "--to".to_string(),
            recipient.to_string(),
            "--subject".to_string(),
            subject.to_string(),
            "--body-file".to_string(),
            body_file.to_string(),
        ];
        if !self.account.is_empty() {
            argv.push("--account".to_string());
            argv.push(self.account.clone());
        }
        argv.push("--force".to_string());
        argv.push("--no-input".to_string());
        argv
    }
}

#[async_trait]
impl EmailSender for GogEmail {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<(), AlertError> {
        // Removed when `body_file` drops.
        let mut body_file = tempfile::Builder::new()
            .prefix("watchdog-alert-")
            .suffix(".txt")
            .tempfile()?;
        body_file.write_all(body.as_bytes())?;
        body_file.flush()?;

        let path = body_file.path().to_string_lossy().into_owned();
        command::run(&self.argv(recipient, subject, &path), self.timeout).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// False while `now` is still inside the cooldown window that started at
/// `last_alert_epoch`.
pub fn should_alert(now: i64, last_alert_epoch: i64, cooldown_secs: u64) -> bool {
    let elapsed = now.saturating_sub(last_alert_epoch);
    elapsed >= i64::try_from(cooldown_secs).unwrap_or(i64::MAX)
}

pub struct EscalationPolicy {
    voice: Option<Box<dyn VoiceSender>>,
    email: Box<dyn EmailSender>,
    phone: String,
    email_to: String,
    cooldown_secs: u64,
    remediation: String,
}

impl EscalationPolicy {
    pub fn new(
        cfg: &AlertsConfig,
        voice: Option<Box<dyn VoiceSender>>,
        email: Box<dyn EmailSender>,
        remediation: impl Into<String>,
    ) -> Self {
        Self {
            voice,
            email,
            phone: cfg.phone.trim().to_string(),
            email_to: cfg.email.trim().to_string(),
            cooldown_secs: cfg.cooldown_secs,
            remediation: remediation.into(),
        }
    }

    /// Wire up the real senders. Voice is left out when credentials are
    /// missing or the HTTP client cannot be built.
    pub fn from_config(cfg: &AlertsConfig, remediation: impl Into<String>) -> Self {
        let voice: Option<Box<dyn VoiceSender>> = match &cfg.voice {
            Some(creds) => {
                match TwilioVoice::new(&cfg.voice_api_base, creds.clone(), cfg.voice_timeout()) {
                    Ok(v) => Some(Box::new(v)),
                    Err(e) => {
                        warn!(error = %e, "voice sender unavailable");
                        None
                    }
                }
            }
            None => None,
        };
        let email = Box::new(GogEmail::new(
            &cfg.email_command,
            &cfg.email_account,
            cfg.email_timeout(),
        ));
        Self::new(cfg, voice, email, remediation)
    }

    /// The voice and email messages for a failed check.
    pub fn messages(&self, diagnostic: &str) -> Vec<AlertMessage> {
        vec![
            AlertMessage {
                channel: AlertChannel::Voice,
                recipient: self.phone.clone(),
                subject: String::new(),
                body: "Alert. The WhatsApp gateway is down and an automatic restart did not \
                       bring it back. Please check the server."
                    .to_string(),
            },
            AlertMessage {
                channel: AlertChannel::Email,
                recipient: self.email_to.clone(),
                subject: "WhatsApp gateway down: automatic restart failed".to_string(),
                body: format!(
                    "The WhatsApp gateway failed its health check, was restarted, and is still \
                     unhealthy.\n\nLast probe:\n{diagnostic}\n\nTo restart it by hand:\n  {}\n",
                    self.remediation
                ),
            },
        ]
    }

    /// Deliver one message on its channel.
    pub async fn alert(&self, message: &AlertMessage) -> ChannelReport {
        if message.recipient.is_empty() {
            info!(channel = %message.channel, "no recipient configured, skipping");
            return ChannelReport::Skipped("no recipient".to_string());
        }
        let result = match message.channel {
            AlertChannel::Voice => match &self.voice {
                Some(voice) => voice.call(&message.recipient, &message.body).await,
                None => {
                    info!("voice credentials not configured, skipping call");
                    return ChannelReport::Skipped("no voice credentials".to_string());
                }
            },
            AlertChannel::Email => {
                self.email
                    .send(&message.recipient, &message.subject, &message.body)
                    .await
            }
        };
        match result {
            Ok(()) => {
                info!(channel = %message.channel, recipient = %message.recipient, "alert sent");
                ChannelReport::Sent
            }
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "alert channel failed");
                ChannelReport::Failed(e.to_string())
            }
        }
    }

    /// Alert unless inside the cooldown window; record the alert time once
    /// dispatch has been attempted on any channel.
    pub async fn escalate(
        &self,
        now: i64,
        prior: HealthState,
        store: &StateStore,
        diagnostic: &str,
    ) -> EscalationReport {
        if !should_alert(now, prior.last_alert_epoch, self.cooldown_secs) {
            let elapsed = now.saturating_sub(prior.last_alert_epoch).max(0) as u64;
            let retry_in_secs = self.cooldown_secs.saturating_sub(elapsed);
            info!(retry_in_secs, "alert suppressed by cooldown");
            return EscalationReport::Suppressed { retry_in_secs };
        }

        let mut voice = ChannelReport::Skipped("not attempted".to_string());
        let mut email = ChannelReport::Skipped("not attempted".to_string());
        for message in self.messages(diagnostic) {
            let report = self.alert(&message).await;
            match message.channel {
                AlertChannel::Voice => voice = report,
                AlertChannel::Email => email = report,
            }
        }

        if voice.attempted() || email.attempted() {
            if let Err(e) = store.record_alert(now) {
                error!(error = %e, "could not record alert time");
            }
        } else {
            error!("no alert channel could be attempted; configure alerts.phone or alerts.email");
        }
        EscalationReport::Dispatched { voice, email }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
