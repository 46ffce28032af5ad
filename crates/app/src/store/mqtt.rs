//! Realtime tree carried over MQTT retained messages.
//!
//! Path `a/b` lives at topic `<prefix>/a/b`. A write is a retained publish of
//! the JSON value; the absence marker is an empty retained payload, which the
//! broker treats as "clear this retained message". The store subscribes to
//! `<prefix>/#` and mirrors everything it hears into a local tree, so a write
//! only shows up in local snapshots once the broker has echoed it back.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Mirror, RemoteStore, Subscription};

/// Where one backend profile lives.
#[derive(Debug, Clone)]
pub struct MqttTarget {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub topic_prefix: String,
}

struct Inner {
    mirror: Mutex<Mirror>,
    connected: AtomicBool,
}

pub struct MqttStore {
    client: AsyncClient,
    prefix: String,
    inner: Arc<Inner>,
    event_loop: JoinHandle<()>,
}

impl MqttStore {
    /// Start the client and its event loop. Returns immediately; the
    /// connection comes up in the background and `is_connected` reports it.
    pub fn connect(target: &MqttTarget) -> Self {
        let mut options = MqttOptions::new(&target.client_id, &target.host, target.port);
        options.set_keep_alive(Duration::from_secs(30));

        let (client, mut eventloop) = AsyncClient::new(options, 20);
        let prefix = target.topic_prefix.trim_matches('/').to_string();
        let inner = Arc::new(Inner {
            mirror: Mutex::new(Mirror::new()),
            connected: AtomicBool::new(false),
        });

        let loop_client = client.clone();
        let loop_inner = Arc::clone(&inner);
        let loop_prefix = prefix.clone();
        let host = target.host.clone();

        let event_loop = tokio::spawn(async move {
            let filter = format!("{loop_prefix}/#");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(%host, %filter, "mqtt connected");
                        loop_inner.connected.store(true, Ordering::SeqCst);
                        // Non-blocking: the request queue is drained by this loop.
                        if let Err(e) = loop_client.try_subscribe(filter.as_str(), QoS::AtLeastOnce) {
                            warn!("mqtt subscribe {filter} failed: {e}");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let Some(path) = topic_to_path(&loop_prefix, &p.topic) else {
                            debug!(topic = %p.topic, "ignoring topic outside prefix");
                            continue;
                        };
                        let value = decode_payload(&p.payload);
                        if let Ok(mut mirror) = loop_inner.mirror.lock() {
                            mirror.apply(path, value);
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        info!(%host, "mqtt disconnected");
                        loop_inner.connected.store(false, Ordering::SeqCst);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(%host, "mqtt error: {e}. reconnecting...");
                        loop_inner.connected.store(false, Ordering::SeqCst);
                        sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        });

        Self {
            client,
            prefix,
            inner,
            event_loop,
        }
    }

    fn topic(&self, path: &str) -> String {
        format!("{}/{}", self.prefix, path.trim_matches('/'))
    }
}

impl Drop for MqttStore {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl RemoteStore for MqttStore {
    fn subscribe(&self, path: &str) -> Subscription {
        match self.inner.mirror.lock() {
            Ok(mut mirror) => mirror.subscribe(path),
            Err(poisoned) => poisoned.into_inner().subscribe(path),
        }
    }

    async fn set(&self, path: &str, value: Option<Value>) -> Result<()> {
        if !self.is_connected() {
            bail!("mqtt not connected");
        }
        let payload = match value {
            Some(v) if !v.is_null() => serde_json::to_vec(&v).context("encode payload")?,
            _ => Vec::new(),
        };
        let topic = self.topic(path);
        self.client
            .publish(topic.as_str(), QoS::AtLeastOnce, true, payload)
            .await
            .with_context(|| format!("publish to {topic} failed"))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Strip `<prefix>/` from a topic. Returns `None` for topics outside it.
pub(crate) fn topic_to_path<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let rest = topic.strip_prefix(prefix)?.strip_prefix('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}

/// Empty payload means the key was cleared. Anything that is not JSON is
/// kept as a plain string so firmware publishing bare `ON`/`1` still decodes.
pub(crate) fn decode_payload(payload: &[u8]) -> Option<Value> {
    if payload.is_empty() {
        return None;
    }
    match serde_json::from_slice::<Value>(payload) {
        Ok(v) => Some(v),
        Err(_) => Some(Value::String(
            String::from_utf8_lossy(payload).trim().to_string(),
        )),
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_to_path_strips_prefix() {
        assert_eq!(topic_to_path("nckh", "nckh/Control/MRTA"), Some("Control/MRTA"));
        assert_eq!(
            topic_to_path("iot/demo", "iot/demo/devices/relay1"),
            Some("devices/relay1")
        );
    }

    #[test]
    fn topic_to_path_rejects_foreign_topics() {
        assert_eq!(topic_to_path("nckh", "other/Control/MRTA"), None);
        assert_eq!(topic_to_path("nckh", "nckhx/Control/MRTA"), None);
        assert_eq!(topic_to_path("nckh", "nckh"), None);
        assert_eq!(topic_to_path("nckh", "nckh/"), None);
    }

    #[test]
    fn decode_payload_json() {
        assert_eq!(
            decode_payload(br#"{"message":"ON"}"#),
            Some(json!({"message": "ON"}))
        );
        assert_eq!(decode_payload(br#""1""#), Some(json!("1")));
        assert_eq!(decode_payload(b"7.5"), Some(json!(7.5)));
    }

    #[test]
    fn decode_payload_empty_is_absent() {
        assert_eq!(decode_payload(b""), None);
    }

    #[test]
    fn decode_payload_bare_text_kept_as_string() {
        assert_eq!(decode_payload(b"ON\n"), Some(json!("ON")));
    }

    #[tokio::test]
    async fn offline_store_refuses_writes() {
        let store = MqttStore::connect(&MqttTarget {
            client_id: "test-offline".into(),
            host: "127.0.0.1".into(),
            port: 1,
            topic_prefix: "test".into(),
        });
        assert!(!store.is_connected());
        assert!(store.set("Control/LED", Some(json!("1"))).await.is_err());
        assert_eq!(store.topic("/Control/LED/"), "test/Control/LED");
    }
}
