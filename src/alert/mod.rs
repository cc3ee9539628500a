//! Alert ingest
//!
//! Subscribes to the access-control topic and turns the two known message
//! bodies into [`AlertKind`]s. Alerts are dispatched one at a time, in
//! arrival order, to an [`AlertHandler`].

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS, Transport};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::AlertConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SystemEvent};

const MQTT_CHANNEL_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// Access denied: start recording
    Raised,
    /// Access restored: stop recording
    Cleared,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raised => "raised",
            Self::Cleared => "cleared",
        }
    }
}

/// Case-insensitive phrase matcher
#[derive(Debug, Clone)]
pub struct AlertClassifier {
    raise_phrase: String,
    clear_phrase: String,
}

impl AlertClassifier {
    pub fn new(raise_phrase: &str, clear_phrase: &str) -> Self {
        Self {
            raise_phrase: raise_phrase.trim().to_lowercase(),
            clear_phrase: clear_phrase.trim().to_lowercase(),
        }
    }

    pub fn from_config(config: &AlertConfig) -> Self {
        Self::new(&config.raise_phrase, &config.clear_phrase)
    }

    /// `None` for anything that is not one of the two phrases
    pub fn classify(&self, payload: &[u8]) -> Option<AlertKind> {
        let text = String::from_utf8_lossy(payload).trim().to_lowercase();
        if text.is_empty() {
            return None;
        }
        if !self.clear_phrase.is_empty() && text.contains(&self.clear_phrase) {
            Some(AlertKind::Cleared)
        } else if !self.raise_phrase.is_empty() && text.contains(&self.raise_phrase) {
            Some(AlertKind::Raised)
        } else {
            None
        }
    }
}

#[async_trait]
pub trait AlertHandler: Send + Sync {
    async fn on_alert(&self, kind: AlertKind) -> Result<()>;
}

/// Classify and dispatch one payload
pub async fn dispatch(
    classifier: &AlertClassifier,
    handler: &dyn AlertHandler,
    events: Option<&EventBus>,
    payload: &[u8],
) -> Option<AlertKind> {
    let Some(kind) = classifier.classify(payload) else {
        trace!("Ignoring message: {:?}", String::from_utf8_lossy(payload));
        return None;
    };

    info!("Alert {}", kind.as_str());
    if let Some(events) = events {
        events.publish(SystemEvent::AlertReceived {
            kind: kind.as_str().to_string(),
        });
    }
    if let Err(e) = handler.on_alert(kind).await {
        error!("Failed to handle {} alert: {}", kind.as_str(), e);
    }
    Some(kind)
}

/// MQTT subscription loop
pub struct AlertIngest {
    options: MqttOptions,
    topic: String,
    classifier: AlertClassifier,
    handler: Arc<dyn AlertHandler>,
    events: Option<Arc<EventBus>>,
    reconnect_delay: Duration,
}

impl AlertIngest {
    pub fn new(
        config: &AlertConfig,
        handler: Arc<dyn AlertHandler>,
        events: Option<Arc<EventBus>>,
    ) -> Result<Self> {
        let host = config
            .broker_host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AppError::Config("Alert broker host is not configured".into()))?;

        let client_id = format!("sentinel-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        // Either a bare host name or a full broker URL (mqtts://host:port)
        let mut options = if host.contains("://") {
            MqttOptions::parse_url(format!("{}?client_id={}", host, client_id))
                .map_err(|e| AppError::Config(format!("Invalid broker URL {}: {}", host, e)))?
        } else {
            let mut options = MqttOptions::new(client_id, host, config.broker_port);
            if config.use_tls {
                options.set_transport(Transport::tls_with_default_config());
            }
            options
        };
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        Ok(Self {
            options,
            topic: config.topic.clone(),
            classifier: AlertClassifier::from_config(config),
            handler,
            events,
            reconnect_delay: Duration::from_secs(config.reconnect_delay_secs.max(1)),
        })
    }

    /// Run until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) {
        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), MQTT_CHANNEL_CAPACITY);
        info!("Subscribing to alerts on '{}'", self.topic);

        loop {
            let notification = tokio::select! {
                _ = cancel.cancelled() => break,
                n = eventloop.poll() => n,
            };

            match notification {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("Connected to alert broker");
                    // Subscriptions do not survive a reconnect with a clean session
                    if let Err(e) = client.subscribe(&self.topic, QoS::AtMostOnce).await {
                        error!("Failed to subscribe to '{}': {}", self.topic, e);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    debug!("Message on '{}' ({} bytes)", publish.topic, publish.payload.len());
                    dispatch(
                        &self.classifier,
                        self.handler.as_ref(),
                        self.events.as_deref(),
                        &publish.payload,
                    )
                    .await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Alert broker connection error: {}; retrying in {:?}",
                        e, self.reconnect_delay
                    );
                    if let Some(events) = &self.events {
                        events.publish(SystemEvent::error("alert", e.to_string()));
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                    }
                }
            }
        }

        let _ = client.disconnect().await;
        info!("Alert ingest stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<AlertKind>>);

    #[async_trait]
    impl AlertHandler for Recorder {
        async fn on_alert(&self, kind: AlertKind) -> Result<()> {
            self.0.lock().push(kind);
            Ok(())
        }
    }

    fn classifier() -> AlertClassifier {
        AlertClassifier::from_config(&AlertConfig::default())
    }

    #[test]
    fn test_classify_phrases() {
        let c = classifier();
        assert_eq!(c.classify(b"Acesso Negado"), Some(AlertKind::Raised));
        assert_eq!(c.classify(b"  ACESSO NEGADO\n"), Some(AlertKind::Raised));
        assert_eq!(
            c.classify("Alerta cancelado, acesso liberado".as_bytes()),
            Some(AlertKind::Cleared)
        );
        assert_eq!(c.classify(b"acesso liberado"), None);
        assert_eq!(c.classify(b"hello"), None);
        assert_eq!(c.classify(b""), None);
    }

    #[test]
    fn test_dispatch_in_order() {
        let recorder = Recorder::default();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let c = classifier();

        tokio_test::block_on(async {
            for payload in [&b"acesso negado"[..], b"noise", b"alerta cancelado, acesso liberado"] {
                dispatch(&c, &recorder, Some(&events), payload).await;
            }
        });

        assert_eq!(*recorder.0.lock(), vec![AlertKind::Raised, AlertKind::Cleared]);
        assert_eq!(rx.try_recv().unwrap().name(), "alert.received");
        assert_eq!(rx.try_recv().unwrap().name(), "alert.received");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ingest_accepts_broker_url() {
        let handler: Arc<dyn AlertHandler> = Arc::new(Recorder::default());
        let config = AlertConfig {
            broker_host: Some("mqtt://broker.local:1883".into()),
            ..Default::default()
        };
        let ingest = AlertIngest::new(&config, handler, None).unwrap();
        assert_eq!(ingest.options.broker_address(), ("broker.local".to_string(), 1883));
    }

    #[test]
    fn test_ingest_requires_broker() {
        let handler: Arc<dyn AlertHandler> = Arc::new(Recorder::default());
        assert!(matches!(
            AlertIngest::new(&AlertConfig::default(), handler, None),
            Err(AppError::Config(_))
        ));
    }
}
