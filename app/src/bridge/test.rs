use super::*;
use crate::error::{MQTTError, StoreError};
use crate::models::{MeasurementDao, MemoryStore};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct RecordingPublisher {
    disconnected: AtomicBool,
    published: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl CommandPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), MQTTError> {
        if !self.is_connected() {
            return Err(MQTTError::Disconnected);
        }
        self.published
            .lock()
            .push((topic.to_owned(), payload.to_owned()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::Relaxed)
    }
}

/// Never answers, like a database behind a dead connection
struct HangingStore;

#[async_trait]
impl MeasurementStore for HangingStore {
    async fn record(&self, _: i32, _: NaiveDateTime, _: f64) -> Result<(), StoreError> {
        std::future::pending().await
    }

    async fn history(&self, _: i32) -> Result<Vec<MeasurementDao>, StoreError> {
        std::future::pending().await
    }
}

struct Fixture {
    dispatcher: BridgeDispatcher,
    store: Arc<MemoryStore>,
    publisher: Arc<RecordingPublisher>,
    clients: ClientRegistry,
}

fn router() -> TopicRouter {
    TopicRouter::new(
        "gr1",
        vec![
            (SensorKind::Light, 1),
            (SensorKind::Fan, 2),
            (SensorKind::Temperature, 3),
            (SensorKind::Humidity, 4),
        ],
    )
}

fn fixture() -> Fixture {
    fixture_with(16)
}

fn fixture_with(buffer: usize) -> Fixture {
    let store = Arc::new(MemoryStore::new(250));
    let publisher = Arc::new(RecordingPublisher::default());
    let clients = ClientRegistry::new(buffer);
    let dispatcher = BridgeDispatcher::new(
        router(),
        ZoneClock::default(),
        store.clone(),
        store.clone(),
        publisher.clone(),
        clients.clone(),
    );
    Fixture {
        dispatcher,
        store,
        publisher,
        clients,
    }
}

impl Fixture {
    async fn connect(&self) -> (ClientId, mpsc::Receiver<String>) {
        let (client, sender, mut rx) = self.clients.channel();
        self.dispatcher
            .handle(BridgeMessage::ClientConnected { client, sender })
            .await;
        // drop the replay
        while rx.try_recv().is_ok() {}
        (client, rx)
    }

    async fn broker(&self, topic: &str, payload: &str) {
        self.dispatcher
            .handle(BridgeMessage::BrokerPublish {
                topic: topic.to_owned(),
                payload: payload.to_owned(),
            })
            .await;
    }

    async fn client(&self, client: ClientId, text: &str) {
        self.dispatcher
            .handle(BridgeMessage::ClientFrame {
                client,
                text: text.to_owned(),
            })
            .await;
    }
}

fn frames(rx: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(text) = rx.try_recv() {
        frames.push(serde_json::from_str(&text).unwrap());
    }
    frames
}

fn at(secs: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 6, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
        + Duration::seconds(secs)
}

#[tokio::test]
async fn test_reading_reaches_every_live_client() {
    let fixture = fixture();
    let mut receivers = Vec::new();
    for _ in 0..4 {
        receivers.push(fixture.connect().await.1);
    }
    drop(receivers.remove(0));

    fixture.broker("gr1/temperature", "21.456").await;

    for rx in receivers.iter_mut() {
        let frames = frames(rx);
        assert_eq!(1, frames.len());
        assert_eq!("new_temperature_data", frames[0]["event"]);
        assert_eq!(21.46, frames[0]["data"]["y"]);
        assert_eq!(5, frames[0]["data"]["x"].as_str().unwrap().len());
    }
    assert_eq!(3, fixture.clients.len());

    let history = fixture.store.history(3).await.unwrap();
    assert_eq!(1, history.len());
    assert_eq!(21.46, history[0].value());

    // a late client replays the same value it would have seen live
    let (client, sender, mut rx) = fixture.clients.channel();
    fixture
        .dispatcher
        .handle(BridgeMessage::ClientConnected { client, sender })
        .await;
    let replay = frames(&mut rx);
    assert_eq!(21.46, replay[1]["data"][0]["y"]);
}

#[tokio::test]
async fn test_humidity_is_broadcast_with_iso_time() {
    let fixture = fixture();
    let (_, mut rx) = fixture.connect().await;

    fixture.broker("gr1/wilgotnosc", "55").await;

    let frames = frames(&mut rx);
    assert_eq!("new_humidity_data", frames[0]["event"]);
    assert_eq!(19, frames[0]["data"]["x"].as_str().unwrap().len());
    assert_eq!(1, fixture.store.history(4).await.unwrap().len());
}

#[tokio::test]
async fn test_reading_is_broadcast_when_persisting_fails() {
    let fixture = fixture();
    let (_, mut rx) = fixture.connect().await;

    // same second, the second insert is a conflict
    let timestamp = ZoneClock::default().now();
    fixture.store.record(3, timestamp, 1.0).await.unwrap();
    fixture.store.record(3, timestamp + Duration::seconds(1), 1.0).await.unwrap();
    fixture.store.record(3, timestamp + Duration::seconds(2), 1.0).await.unwrap();
    fixture.broker("gr1/temperature", "30.0").await;

    let frames = frames(&mut rx);
    assert_eq!(1, frames.len());
    assert_eq!(30.0, frames[0]["data"]["y"]);
    let history = fixture.store.history(3).await.unwrap();
    assert_eq!(3, history.len());
    assert!(history.iter().all(|m| m.value() == 1.0));
}

#[tokio::test(start_paused = true)]
async fn test_hanging_store_does_not_stall_queue() {
    let states = Arc::new(MemoryStore::new(250));
    let clients = ClientRegistry::new(16);
    let dispatcher = BridgeDispatcher::new(
        router(),
        ZoneClock::default(),
        Arc::new(HangingStore),
        states.clone(),
        Arc::new(RecordingPublisher::default()),
        clients.clone(),
    )
    .with_store_timeout(std::time::Duration::from_millis(100));

    let (client, sender, mut rx) = clients.channel();
    let (tx, inbound) = mpsc::unbounded_channel();
    tx.send(BridgeMessage::ClientConnected { client, sender })
        .unwrap();
    tx.send(BridgeMessage::BrokerPublish {
        topic: "gr1/temperature".to_owned(),
        payload: "21.5".to_owned(),
    })
    .unwrap();
    tx.send(BridgeMessage::BrokerPublish {
        topic: "gr1/wiatrak".to_owned(),
        payload: "on".to_owned(),
    })
    .unwrap();
    drop(tx);

    dispatcher.run(inbound).await;

    let frames = frames(&mut rx);
    let events: Vec<&str> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
    assert_eq!(
        vec![
            "initial_states",
            "initial_temp_chart_data",
            "initial_humidity_chart_data",
            "new_temperature_data",
            "fan_state",
        ],
        events
    );
    assert!(frames[1]["data"].as_array().unwrap().is_empty());
    assert_eq!(21.5, frames[3]["data"]["y"]);
    let states = states.all_states().await.unwrap();
    assert_eq!(1, states.len());
    assert_eq!(2, states[0].sensor_id);
}

#[tokio::test]
async fn test_light_state_change() {
    let fixture = fixture();
    let (_, mut rx) = fixture.connect().await;

    fixture.broker("gr1/swiatlo", "on").await;

    let frames = frames(&mut rx);
    assert_eq!(
        serde_json::json!([{"event": "light_state", "data": {"state": "on"}}]),
        Value::Array(frames)
    );
    let states = fixture.store.all_states().await.unwrap();
    assert_eq!(1, states.len());
    assert_eq!(1, states[0].sensor_id);
    assert_eq!(SwitchState::On, states[0].state);
}

#[tokio::test]
async fn test_invalid_fan_state_is_dropped() {
    let fixture = fixture();
    let (_, mut rx) = fixture.connect().await;

    fixture.broker("gr1/wiatrak", "toggle").await;
    fixture.broker("gr2/wiatrak", "on").await;

    assert!(frames(&mut rx).is_empty());
    assert!(fixture.store.all_states().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_light_command_is_published_once() {
    let fixture = fixture();
    let (client, mut rx) = fixture.connect().await;
    let (_, mut other_rx) = fixture.connect().await;

    fixture
        .client(client, r#"{"event": "light_command", "data": {"command": "on"}}"#)
        .await;

    assert_eq!(
        vec![("gr1_ui/swiatlo".to_owned(), "on".to_owned())],
        *fixture.publisher.published.lock()
    );
    let frames = frames(&mut rx);
    assert_eq!(1, frames.len());
    assert_eq!("command_result", frames[0]["event"]);
    assert_eq!(true, frames[0]["data"]["accepted"]);
    assert_eq!("light_command", frames[0]["data"]["event"]);
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_invalid_command_is_not_published() {
    let fixture = fixture();
    let (client, mut rx) = fixture.connect().await;

    fixture
        .client(client, r#"{"event": "fan_command", "data": {"command": "toggle"}}"#)
        .await;

    assert!(fixture.publisher.published.lock().is_empty());
    let frames = frames(&mut rx);
    assert_eq!(false, frames[0]["data"]["accepted"]);
    assert_eq!("toggle", frames[0]["data"]["command"]);
    assert!(frames[0]["data"]["reason"].is_string());
}

#[tokio::test]
async fn test_command_while_disconnected_is_refused() {
    let fixture = fixture();
    fixture.publisher.disconnected.store(true, Ordering::Relaxed);
    let (client, mut rx) = fixture.connect().await;

    fixture
        .client(client, r#"{"event": "fan_command", "data": {"command": "off"}}"#)
        .await;

    assert!(fixture.publisher.published.lock().is_empty());
    let frames = frames(&mut rx);
    assert_eq!(false, frames[0]["data"]["accepted"]);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let fixture = fixture();
    let (client, mut rx) = fixture.connect().await;

    fixture.client(client, "not json").await;
    fixture.client(client, r#"{"event": "reboot"}"#).await;
    fixture.client(client, r#"{"event": "light_command"}"#).await;

    assert!(frames(&mut rx).is_empty());
    assert!(fixture.publisher.published.lock().is_empty());
}

#[tokio::test]
async fn test_new_client_replay_order() {
    let fixture = fixture();
    fixture.store.set_state(2, SwitchState::Off).await.unwrap();
    fixture.store.set_state(1, SwitchState::On).await.unwrap();
    // inserted newest first, replayed oldest first
    for n in (0..10).rev() {
        fixture.store.record(3, at(n), 20.0 + n as f64).await.unwrap();
    }
    for n in 0..5 {
        fixture.store.record(4, at(n), 50.0 + n as f64).await.unwrap();
    }

    let (client, sender, mut rx) = fixture.clients.channel();
    fixture
        .dispatcher
        .handle(BridgeMessage::ClientConnected { client, sender })
        .await;

    let frames = frames(&mut rx);
    assert_eq!(3, frames.len());

    assert_eq!("initial_states", frames[0]["event"]);
    assert_eq!(
        serde_json::json!([
            {"sensor_id": 2, "state": "off"},
            {"sensor_id": 1, "state": "on"}
        ]),
        frames[0]["data"]
    );

    assert_eq!("initial_temp_chart_data", frames[1]["event"]);
    let temperature = frames[1]["data"].as_array().unwrap();
    assert_eq!(10, temperature.len());
    assert_eq!("2024-06-01T08:00:00", temperature[0]["x"]);
    assert_eq!(20.0, temperature[0]["y"]);
    assert_eq!("2024-06-01T08:00:09", temperature[9]["x"]);

    assert_eq!("initial_humidity_chart_data", frames[2]["event"]);
    let humidity = frames[2]["data"].as_array().unwrap();
    assert_eq!(5, humidity.len());
    assert_eq!(54.0, humidity[4]["y"]);

    assert_eq!(1, fixture.clients.len());
}

#[tokio::test]
async fn test_replay_fits_smallest_buffer() {
    let fixture = fixture_with(1);
    fixture.store.set_state(1, SwitchState::On).await.unwrap();
    for n in 0..10 {
        fixture.store.record(3, at(n), 20.0).await.unwrap();
    }
    for n in 0..5 {
        fixture.store.record(4, at(n), 50.0).await.unwrap();
    }

    let (client, sender, mut rx) = fixture.clients.channel();
    fixture
        .dispatcher
        .handle(BridgeMessage::ClientConnected { client, sender })
        .await;
    // room for one live frame after the replay
    fixture.broker("gr1/swiatlo", "off").await;

    let frames = frames(&mut rx);
    let events: Vec<&str> = frames.iter().map(|f| f["event"].as_str().unwrap()).collect();
    assert_eq!(
        vec![
            "initial_states",
            "initial_temp_chart_data",
            "initial_humidity_chart_data",
            "light_state",
        ],
        events
    );
    assert_eq!(5, frames[2]["data"].as_array().unwrap().len());
}

#[tokio::test]
async fn test_get_states_answers_sender_only() {
    let fixture = fixture();
    fixture.store.set_state(2, SwitchState::On).await.unwrap();
    let (client, mut rx) = fixture.connect().await;
    let (_, mut other_rx) = fixture.connect().await;

    fixture.client(client, r#"{"event": "get_states", "data": {}}"#).await;

    let frames = frames(&mut rx);
    assert_eq!(1, frames.len());
    assert_eq!("initial_states", frames[0]["event"]);
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_client_disconnect_unregisters() {
    let fixture = fixture();
    let (client, _rx) = fixture.connect().await;
    assert_eq!(1, fixture.clients.len());

    fixture
        .dispatcher
        .handle(BridgeMessage::ClientDisconnected(client))
        .await;

    assert!(fixture.clients.is_empty());
}

#[tokio::test]
async fn test_run_drains_queue() {
    let Fixture {
        dispatcher, store, ..
    } = fixture();
    let (tx, rx) = mpsc::unbounded_channel();
    tx.send(BridgeMessage::BrokerConnected).unwrap();
    tx.send(BridgeMessage::BrokerPublish {
        topic: "gr1/wiatrak".to_owned(),
        payload: "on".to_owned(),
    })
    .unwrap();
    drop(tx);

    dispatcher.run(rx).await;

    assert_eq!(1, store.all_states().await.unwrap().len());
}
