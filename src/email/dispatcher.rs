use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::SmtpConfig;

/// One queued unit of outbound mail. At-least-once: a retried job may be
/// delivered twice, which is acceptable for transactional email.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub html: bool,
}

/// Delivery retry policy, carried by the worker rather than baked into the
/// transport.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(60),
        }
    }
}

/// Transport seam the worker delivers through. SMTP in production, a test
/// double in tests.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> anyhow::Result<Self> {
        let from: Mailbox = cfg.from.parse()?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.host)?
            .credentials(Credentials::new(cfg.username.clone(), cfg.password.clone()))
            .port(cfg.port)
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> anyhow::Result<()> {
        let content_type = if email.html {
            ContentType::TEXT_HTML
        } else {
            ContentType::TEXT_PLAIN
        };
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .header(content_type)
            .body(email.body.clone())?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Fire-and-forget entry point the orchestrator calls. Enqueueing never
/// blocks and never fails the caller.
pub trait EmailDispatcher: Send + Sync {
    fn enqueue(&self, email: OutboundEmail);
}

/// Channel-fed dispatcher with a single background delivery worker.
pub struct QueuedDispatcher {
    tx: mpsc::UnboundedSender<OutboundEmail>,
}

impl QueuedDispatcher {
    pub fn start(mailer: Arc<dyn Mailer>, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(rx, mailer, policy));
        Self { tx }
    }
}

impl EmailDispatcher for QueuedDispatcher {
    fn enqueue(&self, email: OutboundEmail) {
        if let Err(e) = self.tx.send(email) {
            // Worker gone; the job is dropped, the caller is unaffected.
            error!(error = %e, "email queue is closed, dropping job");
        }
    }
}

pub(crate) async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<OutboundEmail>,
    mailer: Arc<dyn Mailer>,
    policy: RetryPolicy,
) {
    while let Some(email) = rx.recv().await {
        deliver(mailer.as_ref(), &email, &policy).await;
    }
}

/// Attempt delivery with bounded retries. Exhaustion drops the job; only the
/// log sees the failure.
pub(crate) async fn deliver(mailer: &dyn Mailer, email: &OutboundEmail, policy: &RetryPolicy) {
    for attempt in 1..=policy.max_attempts {
        match mailer.send(email).await {
            Ok(()) => {
                info!(to = %email.to, subject = %email.subject, attempt, "email sent");
                return;
            }
            Err(e) if attempt < policy.max_attempts => {
                warn!(to = %email.to, attempt, error = %e, "email send failed, will retry");
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => {
                error!(to = %email.to, attempt, error = %e, "email send failed, dropping job");
            }
        }
    }
}
