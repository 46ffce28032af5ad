mod sim;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{env, time::Duration};
use time::OffsetDateTime;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use sim::{PondSim, Scenario};

/// Relay paths whose state drives aeration, per backend profile.
fn aeration_paths(profile: &str) -> [&'static str; 2] {
    match profile {
        "firebase1" => ["devices/relay5", "devices/relay6"],
        _ => ["Control/OXI", "Control/FAN"],
    }
}

/// Both relay encodings: `{"message":"ON"}` and `"1"` / `1` / `true`.
fn relay_is_on(payload: &[u8]) -> bool {
    let value: Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(_) => Value::String(String::from_utf8_lossy(payload).trim().to_string()),
    };
    match &value {
        Value::Object(m) => m.get("message").and_then(Value::as_str) == Some("ON"),
        Value::String(s) => s == "1" || s == "ON",
        Value::Number(n) => n.as_i64() == Some(1),
        Value::Bool(b) => *b,
        _ => false,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Env config
    let broker = env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = env::var("MQTT_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1883);
    let profile = env::var("PROFILE").unwrap_or_else(|_| "firebase2".to_string());
    let prefix = env::var("TOPIC_PREFIX").unwrap_or_else(|_| "nckh".to_string());
    let sample_every_s: u64 = env::var("SAMPLE_EVERY_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);
    let scenario = Scenario::from_str_lossy(&env::var("SIM_SCENARIO").unwrap_or_default());
    let diurnal_period_s: f64 = env::var("SIM_DIURNAL_PERIOD_S")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(600.0);

    let mut mqttoptions = MqttOptions::new(format!("shrimptech-node-{profile}"), broker, port);
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

    // Relay topics we follow, each with its own on/off flag.
    let relays: Vec<(String, Arc<AtomicBool>)> = aeration_paths(&profile)
        .iter()
        .map(|p| (format!("{prefix}/{p}"), Arc::new(AtomicBool::new(false))))
        .collect();
    let flags: Vec<Arc<AtomicBool>> = relays.iter().map(|(_, f)| Arc::clone(f)).collect();

    let sub_client = client.clone();
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("node connected to mqtt");
                    for (topic, _) in &relays {
                        if let Err(e) = sub_client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                            warn!(%topic, "subscribe failed: {e}");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    if let Some((topic, flag)) = relays.iter().find(|(t, _)| *t == p.topic) {
                        let on = relay_is_on(&p.payload);
                        flag.store(on, Ordering::SeqCst);
                        info!(%topic, on, "relay state");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e}. retrying...");
                    sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    let topic = format!("{prefix}/sensors");
    info!(%topic, %scenario, every_s = sample_every_s, "publishing pond telemetry");

    let mut sim = PondSim::new(scenario, diurnal_period_s);
    loop {
        sim.set_aeration(flags.iter().any(|f| f.load(Ordering::SeqCst)));
        let mut reading = sim.tick();
        reading.ts = OffsetDateTime::now_utc().unix_timestamp();

        let payload = serde_json::to_vec(&reading).context("encode reading")?;
        match client.publish(&topic, QoS::AtLeastOnce, true, payload).await {
            Ok(()) => debug!(
                ts = reading.ts,
                dissolved_oxygen = reading.water.dissolved_oxygen,
                aerated = sim.is_aerated(),
                "published readings"
            ),
            Err(e) => warn!("publish error: {e}"),
        }

        sleep(Duration::from_secs(sample_every_s)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
