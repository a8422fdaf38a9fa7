// ABOUTME: Email tools — list recent inbox subjects and send mail, consent gated.
// ABOUTME: IMAP/SMTP are blocking protocols; the transport runs on offload threads.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as MailMessage, SmtpTransport, Transport};
use serde::Serialize;
use serde_json::{Map, Value, json};

use super::{Tool, ToolError, require_str};
use crate::tools::registry::ToolRegistry;

const DEFAULT_LIST_LIMIT: usize = 10;
const MAX_LIST_LIMIT: usize = 50;

/// Envelope headers of one inbox message.
#[derive(Debug, Clone, Serialize)]
pub struct EmailSummary {
    pub from: String,
    pub subject: String,
}

/// The mailbox operations the email tools consume. The wire protocols live
/// behind this trait so the tools are testable without a mail server.
#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn list_recent(&self, limit: usize) -> Result<Vec<EmailSummary>, ToolError>;

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ToolError>;
}

/// Account settings for the IMAP/SMTP transport.
#[derive(Debug, Clone)]
pub struct EmailAccount {
    pub username: String,
    pub password: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_from: String,
}

/// Real transport: IMAP over TLS for reads, SMTP with STARTTLS for sends.
pub struct SmtpImapTransport {
    account: EmailAccount,
}

impl SmtpImapTransport {
    pub fn new(account: EmailAccount) -> Self {
        Self { account }
    }
}

fn imap_list_recent(account: &EmailAccount, limit: usize) -> Result<Vec<EmailSummary>, ToolError> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| ToolError::handler(format!("TLS setup failed: {e}")))?;
    let client = imap::connect(
        (account.imap_host.as_str(), account.imap_port),
        account.imap_host.as_str(),
        &tls,
    )
    .map_err(|e| ToolError::handler(format!("IMAP connect failed: {e}")))?;
    let mut session = client
        .login(&account.username, &account.password)
        .map_err(|(e, _)| ToolError::handler(format!("IMAP login failed: {e}")))?;

    session
        .select("INBOX")
        .map_err(|e| ToolError::handler(format!("IMAP select failed: {e}")))?;
    let mut ids: Vec<u32> = session
        .search("ALL")
        .map_err(|e| ToolError::handler(format!("IMAP search failed: {e}")))?
        .into_iter()
        .collect();
    ids.sort_unstable();

    let newest: Vec<String> = ids.iter().rev().take(limit).map(u32::to_string).collect();
    let mut out = Vec::new();
    if !newest.is_empty() {
        let fetches = session
            .fetch(newest.join(","), "ENVELOPE")
            .map_err(|e| ToolError::handler(format!("IMAP fetch failed: {e}")))?;
        for fetch in fetches.iter() {
            let Some(envelope) = fetch.envelope() else {
                continue;
            };
            let subject = envelope
                .subject
                .as_ref()
                .map(|s| String::from_utf8_lossy(s).to_string())
                .unwrap_or_default();
            let from = envelope
                .from
                .as_ref()
                .and_then(|addrs| addrs.first())
                .map(|a| {
                    let mailbox = a
                        .mailbox
                        .as_ref()
                        .map(|m| String::from_utf8_lossy(m).to_string())
                        .unwrap_or_default();
                    let host = a
                        .host
                        .as_ref()
                        .map(|h| String::from_utf8_lossy(h).to_string())
                        .unwrap_or_default();
                    format!("{mailbox}@{host}")
                })
                .unwrap_or_default();
            out.push(EmailSummary { from, subject });
        }
    }
    session.logout().ok();
    out.reverse();
    Ok(out)
}

fn smtp_send(account: &EmailAccount, to: &str, subject: &str, body: &str) -> Result<(), ToolError> {
    let from = if account.smtp_from.is_empty() {
        &account.username
    } else {
        &account.smtp_from
    };
    let message = MailMessage::builder()
        .from(
            from.parse()
                .map_err(|e| ToolError::handler(format!("Invalid from address: {e}")))?,
        )
        .to(to
            .parse()
            .map_err(|e| ToolError::handler(format!("Invalid to address: {e}")))?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| ToolError::handler(format!("Could not build message: {e}")))?;

    let mailer = SmtpTransport::starttls_relay(&account.smtp_host)
        .map_err(|e| ToolError::handler(format!("SMTP setup failed: {e}")))?
        .port(account.smtp_port)
        .credentials(Credentials::new(
            account.username.clone(),
            account.password.clone(),
        ))
        .build();

    mailer
        .send(&message)
        .map_err(|e| ToolError::handler(format!("SMTP send failed: {e}")))?;
    Ok(())
}

#[async_trait]
impl EmailTransport for SmtpImapTransport {
    async fn list_recent(&self, limit: usize) -> Result<Vec<EmailSummary>, ToolError> {
        let account = self.account.clone();
        tokio::task::spawn_blocking(move || imap_list_recent(&account, limit))
            .await
            .map_err(|e| ToolError::handler(format!("IMAP task failed: {e}")))?
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ToolError> {
        let account = self.account.clone();
        let (to, subject, body) = (to.to_string(), subject.to_string(), body.to_string());
        tokio::task::spawn_blocking(move || smtp_send(&account, &to, &subject, &body))
            .await
            .map_err(|e| ToolError::handler(format!("SMTP task failed: {e}")))?
    }
}

/// List recent inbox subjects via the configured transport.
pub struct EmailListRecentTool {
    transport: Arc<dyn EmailTransport>,
    consent_granted: bool,
}

#[async_trait]
impl Tool for EmailListRecentTool {
    fn name(&self) -> &str {
        "email.list_recent"
    }

    fn description(&self) -> &str {
        "List recent email subjects via IMAP (requires consent_granted)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "default": 10, "minimum": 1, "maximum": 50}
            },
            "required": [],
            "additionalProperties": false,
        })
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        if !self.consent_granted {
            return Err(ToolError::handler("Email consent not granted"));
        }
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .map(|n| (n as usize).clamp(1, MAX_LIST_LIMIT))
            .unwrap_or(DEFAULT_LIST_LIMIT);
        let messages = self.transport.list_recent(limit).await?;
        Ok(serde_json::to_value(messages).unwrap_or_else(|_| json!([])))
    }
}

/// Send an email via the configured transport.
pub struct EmailSendTool {
    transport: Arc<dyn EmailTransport>,
    consent_granted: bool,
}

#[async_trait]
impl Tool for EmailSendTool {
    fn name(&self) -> &str {
        "email.send"
    }

    fn description(&self) -> &str {
        "Send an email via SMTP (high risk; requires approval)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to": {"type": "string"},
                "subject": {"type": "string"},
                "body": {"type": "string"},
            },
            "required": ["to", "subject", "body"],
            "additionalProperties": false,
        })
    }

    fn requires_write(&self) -> bool {
        true
    }

    fn requires_approval(&self) -> bool {
        true
    }

    fn approval_summary(&self) -> String {
        "Send an email".to_string()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        if !self.consent_granted {
            return Err(ToolError::handler("Email consent not granted"));
        }
        let to = require_str(&args, "to")?;
        let subject = require_str(&args, "subject")?;
        let body = require_str(&args, "body")?;
        self.transport.send(to, subject, body).await?;
        Ok(json!("sent"))
    }
}

/// Register the email tool family when a transport is configured.
pub fn register_email_tools(
    registry: &mut ToolRegistry,
    transport: Option<Arc<dyn EmailTransport>>,
    consent_granted: bool,
) {
    let Some(transport) = transport else {
        return;
    };
    registry.register(Arc::new(EmailListRecentTool {
        transport: transport.clone(),
        consent_granted,
    }));
    registry.register(Arc::new(EmailSendTool {
        transport,
        consent_granted,
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubTransport {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl StubTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl EmailTransport for StubTransport {
        async fn list_recent(&self, limit: usize) -> Result<Vec<EmailSummary>, ToolError> {
            Ok((0..limit.min(2))
                .map(|i| EmailSummary {
                    from: format!("sender{i}@example.com"),
                    subject: format!("subject {i}"),
                })
                .collect())
        }

        async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), ToolError> {
            self.sent.lock().unwrap().push((
                to.to_string(),
                subject.to_string(),
                body.to_string(),
            ));
            Ok(())
        }
    }

    #[tokio::test]
    async fn list_recent_respects_limit() {
        let tool = EmailListRecentTool {
            transport: StubTransport::new(),
            consent_granted: true,
        };
        let mut args = Map::new();
        args.insert("limit".to_string(), json!(1));
        let value = tool.execute(args).await.unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
        assert_eq!(value[0]["from"], "sender0@example.com");
    }

    #[tokio::test]
    async fn consent_gate_blocks_both_tools() {
        let transport = StubTransport::new();
        let list = EmailListRecentTool {
            transport: transport.clone(),
            consent_granted: false,
        };
        let send = EmailSendTool {
            transport: transport.clone(),
            consent_granted: false,
        };
        assert!(list
            .execute(Map::new())
            .await
            .unwrap_err()
            .to_string()
            .contains("consent"));

        let mut args = Map::new();
        args.insert("to".to_string(), json!("a@b.c"));
        args.insert("subject".to_string(), json!("s"));
        args.insert("body".to_string(), json!("b"));
        assert!(send.execute(args).await.is_err());
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_passes_fields_through() {
        let transport = StubTransport::new();
        let tool = EmailSendTool {
            transport: transport.clone(),
            consent_granted: true,
        };
        let mut args = Map::new();
        args.insert("to".to_string(), json!("a@b.c"));
        args.insert("subject".to_string(), json!("hello"));
        args.insert("body".to_string(), json!("world"));
        let value = tool.execute(args).await.unwrap();
        assert_eq!(value, json!("sent"));
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0], ("a@b.c".to_string(), "hello".to_string(), "world".to_string()));
    }
}
