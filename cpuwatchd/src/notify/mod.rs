//! Alert delivery.
//!
//! A sink turns a subject/body pair into something a human will see. Sinks
//! are called one after another with a per-call timeout; a failing or slow
//! sink is reported and never blocks the remaining sinks for long.

use crate::config::Config;
use crate::error::EvalError;
use crate::types::Alert;
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;

pub mod email;
pub mod journal;
pub mod webhook;

pub use email::EmailSink;
pub use journal::AlertJournal;
pub use webhook::WebhookSink;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

/// Ordered set of sinks sharing one timeout.
#[derive(Clone)]
pub struct Notifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
    timeout: Duration,
}

impl Notifier {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sinks: Vec::new(),
            timeout,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Builds the sinks enabled in `cfg`: journal, email, webhook.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let mut notifier = Self::new(cfg.sink_timeout());

        if let Some(path) = &cfg.journal.path {
            notifier = notifier.with_sink(Arc::new(AlertJournal::new(path.clone())));
        }
        if cfg.email.enabled {
            notifier = notifier.with_sink(Arc::new(EmailSink::from_config(
                &cfg.email,
                cfg.sink_timeout(),
            )?));
        }
        if cfg.webhook.enabled {
            notifier = notifier.with_sink(Arc::new(WebhookSink::new(
                &cfg.webhook.url,
                cfg.sink_timeout(),
            )?));
        }

        if notifier.sinks.is_empty() {
            info!("[notify] no sinks configured; alerts go to the log only");
        } else {
            info!("[notify] sinks enabled: {}", notifier.sink_names().join(", "));
        }
        Ok(notifier)
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Hands `alert` to every sink. Failures are logged and returned.
    pub async fn dispatch(&self, alert: &Alert) -> Vec<EvalError> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            let sent = tokio::time::timeout(
                self.timeout,
                sink.send(&alert.subject, &alert.body),
            )
            .await;
            match sent {
                Ok(Ok(())) => debug!("[notify] {} delivered {}", sink.name(), alert.key),
                Ok(Err(err)) => {
                    error!("[notify] {} failed for {}: {err:#}", sink.name(), alert.key);
                    failures.push(EvalError::SinkFailed {
                        sink: sink.name(),
                        key: alert.key.clone(),
                        reason: format!("{err:#}"),
                    });
                }
                Err(_) => {
                    error!(
                        "[notify] {} timed out after {:?} for {}",
                        sink.name(),
                        self.timeout,
                        alert.key
                    );
                    failures.push(EvalError::SinkTimeout {
                        sink: sink.name(),
                        key: alert.key.clone(),
                    });
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlertKind;
    use anyhow::anyhow;
    use std::sync::Mutex;

    struct Recording {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn send(&self, subject: &str, _body: &str) -> Result<()> {
            self.sent.lock().unwrap().push(subject.to_string());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl NotificationSink for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn send(&self, _subject: &str, _body: &str) -> Result<()> {
            Err(anyhow!("smtp unreachable"))
        }
    }

    struct Hanging;

    #[async_trait]
    impl NotificationSink for Hanging {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn send(&self, _subject: &str, _body: &str) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn alert() -> Alert {
        Alert {
            kind: AlertKind::HostCpu,
            key: "host_cpu".to_string(),
            subject: "Host CPU Alert".to_string(),
            body: "Host CPU high: 95.0%".to_string(),
            value: 95.0,
            threshold: 90.0,
        }
    }

    #[tokio::test]
    async fn failing_sink_does_not_stop_later_sinks() {
        let recording = Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
        });
        let notifier = Notifier::new(Duration::from_secs(1))
            .with_sink(Arc::new(Failing))
            .with_sink(recording.clone());

        let failures = notifier.dispatch(&alert()).await;

        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0],
            EvalError::SinkFailed { sink: "failing", key, reason }
                if key == "host_cpu" && reason.contains("smtp unreachable")
        ));
        assert_eq!(
            *recording.sent.lock().unwrap(),
            vec!["Host CPU Alert".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_sink_is_cut_off_by_timeout() {
        let recording = Arc::new(Recording {
            sent: Mutex::new(Vec::new()),
        });
        let notifier = Notifier::new(Duration::from_secs(10))
            .with_sink(Arc::new(Hanging))
            .with_sink(recording.clone());

        let failures = notifier.dispatch(&alert()).await;

        assert_eq!(
            failures,
            vec![EvalError::SinkTimeout {
                sink: "hanging",
                key: "host_cpu".to_string()
            }]
        );
        assert_eq!(recording.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn default_config_has_no_sinks() {
        let notifier = Notifier::from_config(&Config::default()).unwrap();
        assert!(notifier.is_empty());
    }
}
