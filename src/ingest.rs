//! MQTT ingestion
//!
//! `sediment connect` subscribes to every topic on the broker and captures
//! each inbound message as a `raw` payload. Capture is best-effort: a failed
//! insert is logged and the subscription keeps running; nothing is retried
//! or requeued.
//!
//! The broker connection and the store writes run on separate threads joined
//! by a channel, so a slow disk write never stalls the network loop.

use crate::db::{Database, PayloadDraft, PayloadKind};
use rumqttc::{Client, Event, MqttOptions, Packet, QoS};
use std::sync::mpsc;
use std::time::Duration;

/// The `device` tag stamped on every captured payload.
pub const SUBSCRIBER_DEVICE: &str = "mqtt-dumper";

const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

/// Broker connection options for the subscriber
#[derive(Debug, Clone)]
pub struct SubscriberOptions {
    pub host: String,
    pub port: u16,
}

/// One message taken off the broker, pending a store write
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
}

/// Error type for subscriber startup failures
#[derive(Debug)]
pub enum IngestError {
    Client(rumqttc::ClientError),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Client(e) => write!(f, "MQTT client error: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<rumqttc::ClientError> for IngestError {
    fn from(e: rumqttc::ClientError) -> Self {
        IngestError::Client(e)
    }
}

/// Build the `raw` payload for one captured message.
pub fn raw_payload(message: &InboundMessage) -> PayloadDraft {
    PayloadDraft::new(
        PayloadKind::Raw,
        SUBSCRIBER_DEVICE,
        &message.topic,
        message.payload.clone(),
    )
}

/// Subscribe to all topics and capture messages until the process is
/// terminated. Only a dead client request channel ends the loop early.
pub fn run(db: &Database, options: &SubscriberOptions) -> Result<(), IngestError> {
    let host_tag =
        std::env::var("HOSTNAME").unwrap_or_else(|_| std::process::id().to_string());
    let client_id = format!("{}-{}", SUBSCRIBER_DEVICE, host_tag);

    let mut mqtt_options = MqttOptions::new(&client_id, &options.host, options.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut connection) = Client::new(mqtt_options, 64);
    let (tx, rx) = mpsc::channel::<InboundMessage>();

    log::info!(
        "connecting to MQTT broker at {}:{} as '{}'",
        options.host,
        options.port,
        client_id
    );

    std::thread::scope(|scope| -> Result<(), IngestError> {
        // Owned by this scope so any early return hangs up the writer.
        let tx = tx;
        scope.spawn(|| write_loop(db, rx));

        for event in connection.iter() {
            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    // Covers the initial connect and every reconnect: the
                    // broker does not remember our wildcard subscription.
                    client.subscribe("#", QoS::AtMostOnce)?;
                    log::info!("connected, subscribed to all topics");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: String::from_utf8_lossy(&publish.payload).into_owned(),
                    };
                    if tx.send(message).is_err() {
                        break;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("connection error: {} (retrying)", e);
                    std::thread::sleep(RECONNECT_PAUSE);
                }
            }
        }

        Ok(())
    })
}

/// Drain the channel and perform the store writes sequentially. Insert
/// failures are logged and skipped.
fn write_loop(db: &Database, rx: mpsc::Receiver<InboundMessage>) {
    for message in rx {
        match db.insert_payload(&raw_payload(&message)) {
            Ok(id) => log::info!("inserted raw payload {} from topic '{}'", id, message.topic),
            Err(e) => log::error!(
                "failed to insert message from topic '{}': {}",
                message.topic,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_payload_tags_subscriber_device() {
        let message = InboundMessage {
            topic: "sensor/x".to_string(),
            payload: r#"{"a":1}"#.to_string(),
        };

        let draft = raw_payload(&message);
        assert_eq!(draft.kind, PayloadKind::Raw);
        assert_eq!(draft.device, SUBSCRIBER_DEVICE);
        assert_eq!(draft.topic, "sensor/x");
        assert_eq!(draft.payload, r#"{"a":1}"#);
        assert!(!draft.disabled);
    }

    #[test]
    fn test_write_loop_captures_every_message() {
        let db = Database::open().unwrap();
        let (tx, rx) = mpsc::channel();

        for i in 0..3 {
            tx.send(InboundMessage {
                topic: format!("sensor/{}", i),
                payload: format!(r#"{{"n":{}}}"#, i),
            })
            .unwrap();
        }
        drop(tx);

        write_loop(&db, rx);

        let captured = db.list_payloads(PayloadKind::Raw).unwrap();
        assert_eq!(captured.len(), 3);
        let topics: Vec<&str> = captured.iter().map(|p| p.topic.as_str()).collect();
        assert_eq!(topics, vec!["sensor/0", "sensor/1", "sensor/2"]);
    }

    #[test]
    fn test_write_loop_accepts_non_json_payloads() {
        // Raw capture is content-agnostic; arbitrary text must store fine.
        let db = Database::open().unwrap();
        let (tx, rx) = mpsc::channel();

        tx.send(InboundMessage {
            topic: "plain".to_string(),
            payload: "not json at all".to_string(),
        })
        .unwrap();
        drop(tx);

        write_loop(&db, rx);

        let captured = db.list_payloads(PayloadKind::Raw).unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].payload, "not json at all");
    }
}
