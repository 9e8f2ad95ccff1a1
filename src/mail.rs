use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::observability;

const BODY_PLACEHOLDER: &str = "[%body%]";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub content: String,
    /// Template wrapped around `content` at its `[%body%]` marker.
    pub template: Option<String>,
}

impl MailMessage {
    /// The body as delivered: the content alone, or placed inside the template.
    pub fn render(&self) -> String {
        match &self.template {
            Some(template) if template.contains(BODY_PLACEHOLDER) => {
                template.replace(BODY_PLACEHOLDER, &self.content)
            }
            _ => self.content.clone(),
        }
    }
}

/// Delivery backend. Failures are reported to the listener, never the booker.
#[async_trait]
pub trait MailSink: Send + Sync {
    async fn deliver(&self, message: &MailMessage, body: &str) -> Result<(), String>;
}

/// Sink that logs each rendered message.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl MailSink for LogSink {
    async fn deliver(&self, message: &MailMessage, body: &str) -> Result<(), String> {
        let headers = serde_json::json!({
            "to": message.to,
            "from": message.from,
            "subject": message.subject,
        });
        tracing::info!(headers = %headers, bytes = body.len(), "mail delivered");
        Ok(())
    }
}

/// Fire-and-forget handle onto the outbound mail queue.
#[derive(Clone)]
pub struct Mailer {
    tx: mpsc::Sender<MailMessage>,
}

impl Mailer {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<MailMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a message. Never fails the caller: a full or closed queue is
    /// logged and counted.
    pub fn send(&self, message: MailMessage) {
        match self.tx.try_send(message) {
            Ok(()) => {
                metrics::counter!(observability::MAIL_QUEUED_TOTAL).increment(1);
            }
            Err(TrySendError::Full(message)) => {
                metrics::counter!(observability::MAIL_DROPPED_TOTAL, "reason" => "full").increment(1);
                tracing::warn!(to = %message.to, subject = %message.subject, "mail queue full, message dropped");
            }
            Err(TrySendError::Closed(message)) => {
                metrics::counter!(observability::MAIL_DROPPED_TOTAL, "reason" => "closed").increment(1);
                tracing::warn!(to = %message.to, subject = %message.subject, "mail queue closed, message dropped");
            }
        }
    }
}

/// Drain the queue into the sink until every `Mailer` is dropped.
pub async fn run_mail_listener(mut rx: mpsc::Receiver<MailMessage>, sink: Arc<dyn MailSink>) {
    while let Some(message) = rx.recv().await {
        let body = message.render();
        match sink.deliver(&message, &body).await {
            Ok(()) => metrics::counter!(observability::MAIL_SENT_TOTAL).increment(1),
            Err(e) => {
                metrics::counter!(observability::MAIL_DROPPED_TOTAL, "reason" => "delivery").increment(1);
                tracing::warn!(to = %message.to, error = %e, "mail delivery failed");
            }
        }
    }
    tracing::debug!("mail listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn message(to: &str) -> MailMessage {
        MailMessage {
            to: to.into(),
            from: "me@here.com".into(),
            subject: "Reservation Confirmation".into(),
            content: "<strong>Reserved</strong>".into(),
            template: None,
        }
    }

    #[derive(Default)]
    struct Capture {
        delivered: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl MailSink for Capture {
        async fn deliver(&self, message: &MailMessage, body: &str) -> Result<(), String> {
            if self.fail {
                return Err("smtp down".into());
            }
            self.delivered
                .lock()
                .unwrap()
                .push((message.to.clone(), body.to_string()));
            Ok(())
        }
    }

    #[test]
    fn render_fills_template() {
        let mut m = message("a@example.com");
        assert_eq!(m.render(), "<strong>Reserved</strong>");
        m.template = Some("<html>[%body%]</html>".into());
        assert_eq!(m.render(), "<html><strong>Reserved</strong></html>");
        m.template = Some("no marker".into());
        assert_eq!(m.render(), "<strong>Reserved</strong>");
    }

    #[tokio::test]
    async fn listener_delivers_in_order() {
        let (mailer, rx) = Mailer::new(8);
        let sink = Arc::new(Capture::default());
        let task = tokio::spawn(run_mail_listener(rx, sink.clone()));

        mailer.send(message("a@example.com"));
        mailer.send(message("b@example.com"));
        drop(mailer);
        task.await.unwrap();

        let delivered = sink.delivered.lock().unwrap();
        let to: Vec<_> = delivered.iter().map(|(to, _)| to.as_str()).collect();
        assert_eq!(to, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn full_queue_never_fails_sender() {
        let (mailer, _rx) = Mailer::new(1);
        mailer.send(message("a@example.com"));
        mailer.send(message("b@example.com"));
    }

    #[test]
    fn closed_queue_never_fails_sender() {
        let (mailer, rx) = Mailer::new(4);
        drop(rx);
        mailer.send(message("a@example.com"));
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let (mailer, rx) = Mailer::new(4);
        let sink = Arc::new(Capture {
            fail: true,
            ..Default::default()
        });
        let task = tokio::spawn(run_mail_listener(rx, sink.clone()));
        mailer.send(message("a@example.com"));
        drop(mailer);
        task.await.unwrap();
        assert!(sink.delivered.lock().unwrap().is_empty());
    }
}
