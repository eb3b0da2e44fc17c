//! Push notifications.
//!
//! [`NotifyLayer`] watches the log stream. ERROR events and events
//! carrying `notice = true` are queued for [`Pushover`], which posts them
//! to the Pushover API in the background. Delivery is best effort: a full
//! queue or a failed request drops the message.

use std::fmt::{self, Write as _};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::config::NotifyConfig;
use crate::tracing::prelude::*;

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

const QUEUE: usize = 32;

/// Targets whose events never trigger a notification, so failed deliveries
/// cannot feed back into the queue.
const IGNORED_TARGETS: [&str; 3] = ["reqwest", "hyper", "h2"];

/// Pushover message priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Lowest,
    Low,
    Normal,
    High,
}

impl Priority {
    pub fn value(self) -> i8 {
        match self {
            Priority::Lowest => -2,
            Priority::Low => -1,
            Priority::Normal => 0,
            Priority::High => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub message: String,
    pub priority: Priority,
}

/// Tracing layer selecting events worth a push notification.
pub struct NotifyLayer {
    tx: mpsc::Sender<Notification>,
}

impl NotifyLayer {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl<S: Subscriber> Layer<S> for NotifyLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if IGNORED_TARGETS
            .iter()
            .any(|target| meta.target().starts_with(target))
        {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let priority = if *meta.level() == Level::ERROR {
            Priority::High
        } else if visitor.notice {
            Priority::Normal
        } else {
            return;
        };

        let _ = self.tx.try_send(Notification {
            message: visitor.render(),
            priority,
        });
    }
}

/// Collects the message and fields of one event as `message key=value ...`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
    notice: bool,
}

impl MessageVisitor {
    fn render(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "notice" {
            self.notice = value;
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Pushover delivery task.
pub struct Pushover {
    http: reqwest::Client,
    token: String,
    user: String,
    title: String,
    rx: mpsc::Receiver<Notification>,
}

/// Build the layer and its delivery task when Pushover credentials are
/// configured.
pub fn pushover(config: &NotifyConfig, worker_name: &str) -> Option<(NotifyLayer, Pushover)> {
    let token = config.pushover_token.clone()?;
    let user = config.pushover_user.clone()?;
    let (tx, rx) = mpsc::channel(QUEUE);
    let task = Pushover {
        http: reqwest::Client::new(),
        token,
        user,
        title: format!("minewatch {worker_name}"),
        rx,
    };
    Some((NotifyLayer::new(tx), task))
}

impl Pushover {
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                notification = self.rx.recv() => match notification {
                    Some(notification) => self.send(&notification).await,
                    None => break,
                },
            }
        }
    }

    async fn send(&self, notification: &Notification) {
        let priority = notification.priority.value().to_string();
        let form = [
            ("token", self.token.as_str()),
            ("user", self.user.as_str()),
            ("title", self.title.as_str()),
            ("message", notification.message.as_str()),
            ("priority", priority.as_str()),
        ];
        match self.http.post(PUSHOVER_URL).form(&form).send().await {
            Ok(response) if !response.status().is_success() => {
                debug!(status = %response.status(), "Pushover rejected notification");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Pushover delivery failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing_subscriber::prelude::*;

    use super::*;

    fn capture(f: impl FnOnce()) -> Vec<Notification> {
        let (tx, mut rx) = mpsc::channel(QUEUE);
        let subscriber = tracing_subscriber::registry().with(NotifyLayer::new(tx));
        tracing::subscriber::with_default(subscriber, f);

        let mut out = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            out.push(notification);
        }
        out
    }

    #[test]
    fn errors_are_high_priority() {
        let sent = capture(|| {
            error!(watch = "Miner", invalid_for_secs = 92, "Restarting miner");
        });
        assert_eq!(
            sent,
            vec![Notification {
                message: "Restarting miner watch=Miner invalid_for_secs=92".into(),
                priority: Priority::High,
            }]
        );
    }

    #[test]
    fn notices_are_normal_priority() {
        let sent = capture(|| {
            info!(notice = true, "Starting miner");
            info!("Routine message");
            warn!("Just a warning");
        });
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message, "Starting miner");
        assert_eq!(sent[0].priority, Priority::Normal);
    }

    #[test]
    fn http_client_targets_are_ignored() {
        let sent = capture(|| {
            tracing::error!(target: "reqwest::connect", "connection refused");
        });
        assert!(sent.is_empty());
    }

    #[test]
    fn requires_both_credentials() {
        let mut config = NotifyConfig {
            pushover_token: Some("token".into()),
            pushover_user: None,
        };
        assert!(pushover(&config, "rig1").is_none());

        config.pushover_user = Some("user".into());
        let (_, task) = pushover(&config, "rig1").unwrap();
        assert_eq!(task.title, "minewatch rig1");
    }

    #[test]
    fn priorities_match_pushover_scale() {
        assert_eq!(Priority::Lowest.value(), -2);
        assert_eq!(Priority::High.value(), 1);
    }
}
