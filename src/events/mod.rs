//! Fire-and-forget event emission for ingest outcomes.
//!
//! Delivery is best-effort by contract: a sink failure is logged and never
//! fails or rolls back the ingest that produced the event.

use serde::Serialize;
use std::time::Duration;

use crate::config::EventsConfig;

/// Emitted event payloads, tagged for sink consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "document.ingested")]
    Ingested {
        work_id: String,
        source: Option<String>,
        title: Option<String>,
        author: Option<String>,
        content_sha256: String,
        chars: usize,
        scenes: usize,
        chunks: usize,
        profile: String,
        run_id: Option<String>,
        deduplicated: bool,
        created_at: String,
    },
    #[serde(rename = "document.failed")]
    Failed {
        path: String,
        reason: String,
        stage: String,
        profile: String,
        created_at: String,
    },
}

/// UTC timestamp in the event wire format.
pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Configured event destination.
pub enum EventEmitter {
    Stdout,
    Webhook {
        url: String,
        auth: Option<String>,
        client: reqwest::Client,
    },
    Null,
}

impl EventEmitter {
    /// Build an emitter from config. An unbuildable webhook client falls back
    /// to stdout so events are never silently lost at startup.
    pub fn from_config(config: &EventsConfig) -> Self {
        match config.sink.as_str() {
            "webhook" => match config.webhook_url.clone() {
                Some(url) => {
                    let client = reqwest::Client::builder()
                        .timeout(Duration::from_secs(2))
                        .build();
                    match client {
                        Ok(client) => EventEmitter::Webhook {
                            url,
                            auth: config.webhook_auth.clone(),
                            client,
                        },
                        Err(e) => {
                            log::warn!("webhook sink init failed ({e}), falling back to stdout");
                            EventEmitter::Stdout
                        }
                    }
                }
                None => {
                    log::warn!("webhook sink requires events.webhook_url, falling back to stdout");
                    EventEmitter::Stdout
                }
            },
            "none" => EventEmitter::Null,
            _ => EventEmitter::Stdout,
        }
    }

    /// Deliver an event. Never returns an error; failures are logged at warn.
    pub async fn emit(&self, event: &Event) {
        match self {
            EventEmitter::Stdout => match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(e) => log::warn!("event serialization failed: {e}"),
            },
            EventEmitter::Webhook { url, auth, client } => {
                let mut req = client.post(url).json(event);
                if let Some(auth) = auth {
                    req = req.header("authorization", auth.clone());
                }
                if let Err(e) = req.send().await {
                    log::warn!("event webhook delivery failed: {e}");
                }
            }
            EventEmitter::Null => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingested_event_serialization() {
        let event = Event::Ingested {
            work_id: "w1".to_string(),
            source: Some("story.txt".to_string()),
            title: Some("Story".to_string()),
            author: None,
            content_sha256: "abc".to_string(),
            chars: 100,
            scenes: 2,
            chunks: 3,
            profile: "default".to_string(),
            run_id: Some("r1".to_string()),
            deduplicated: false,
            created_at: now_iso(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"document.ingested\""));
        assert!(json.contains("\"work_id\":\"w1\""));
        assert!(json.contains("\"scenes\":2"));
    }

    #[test]
    fn test_failed_event_serialization() {
        let event = Event::Failed {
            path: "/inbox/bad.txt".to_string(),
            reason: "File too large".to_string(),
            stage: "admission".to_string(),
            profile: "default".to_string(),
            created_at: now_iso(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"document.failed\""));
        assert!(json.contains("\"stage\":\"admission\""));
    }

    #[test]
    fn test_emitter_from_config_fallbacks() {
        let config = EventsConfig {
            sink: "webhook".to_string(),
            webhook_url: None,
            webhook_auth: None,
        };
        assert!(matches!(
            EventEmitter::from_config(&config),
            EventEmitter::Stdout
        ));

        let config = EventsConfig {
            sink: "none".to_string(),
            webhook_url: None,
            webhook_auth: None,
        };
        assert!(matches!(
            EventEmitter::from_config(&config),
            EventEmitter::Null
        ));
    }

    #[tokio::test]
    async fn test_null_emitter_swallows_events() {
        let emitter = EventEmitter::Null;
        emitter
            .emit(&Event::Failed {
                path: "p".to_string(),
                reason: "r".to_string(),
                stage: "s".to_string(),
                profile: "default".to_string(),
                created_at: now_iso(),
            })
            .await;
    }

    #[test]
    fn test_now_iso_shape() {
        let ts = now_iso();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.len(), 20);
    }
}
