#![cfg(unix)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use hubipc::events::{BaseEvent, ConsumerConfig, EventConsumer, EventProducer, SUBSCRIBE_ALL};
use hubipc::frame::{Envelope, PING_REQUEST, PING_RESPONSE, SUCCESS};
use hubipc::service::{
    HandlerStatus, Receiver, ReceiverConfig, ReceiverState, Sender, SenderConfig, ServiceError,
};
use hubipc::transport::EventChannelConfig;
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);

fn sender() -> Sender {
    Sender::new(SenderConfig::default()).expect("sender should start")
}

fn consumer(port: u16) -> EventConsumer {
    EventConsumer::new(ConsumerConfig {
        channel: EventChannelConfig {
            port,
            ..EventChannelConfig::default()
        },
        poll_interval: Duration::from_millis(200),
        ..ConsumerConfig::default()
    })
}

#[test]
fn request_reaches_handler_and_response_returns() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let handler = move |request: &Envelope, response: &mut Envelope| {
        recorded
            .lock()
            .expect("record lock")
            .push((request.code, request.payload_json().expect("json request")));
        *response = Envelope::json(SUCCESS, &json!({"ok": true}));
        HandlerStatus::Done
    };
    let receiver = Receiver::start("e2e-request", 0, handler, ReceiverConfig::default())
        .expect("receiver should start");

    let response = sender()
        .send_request(
            receiver.port(),
            &Envelope::json(42, &json!({"x": 1})),
            Some(WAIT),
        )
        .expect("request should be answered");

    assert_eq!(response.code, SUCCESS);
    assert_eq!(response.payload_json().expect("json response"), json!({"ok": true}));
    assert_eq!(*seen.lock().expect("record lock"), vec![(42, json!({"x": 1}))]);

    assert!(receiver.shutdown());
}

#[test]
fn ping_bypasses_handler() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let handler = move |_: &Envelope, _: &mut Envelope| {
        counted.fetch_add(1, Ordering::SeqCst);
        HandlerStatus::Done
    };
    let receiver = Receiver::start("e2e-ping", 0, handler, ReceiverConfig::default())
        .expect("receiver should start");
    let port = receiver.port();
    let sender = sender();

    assert!(sender.is_available(port));
    let pong = sender
        .send_request(port, &Envelope::empty(PING_REQUEST), Some(WAIT))
        .expect("ping should be answered");
    assert_eq!(pong.code, PING_RESPONSE);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    receiver.shutdown();
    assert!(!sender.is_available(port));
}

#[test]
fn failure_codes_surface_as_remote_errors() {
    let handler = |_: &Envelope, response: &mut Envelope| {
        *response = Envelope::new(hubipc::frame::INVALID_REQUEST, "bad field");
        HandlerStatus::Done
    };
    let receiver = Receiver::start("e2e-remote", 0, handler, ReceiverConfig::default())
        .expect("receiver should start");

    let err = sender()
        .send_request(receiver.port(), &Envelope::empty(10), Some(WAIT))
        .expect_err("failure code should be an error");
    match err {
        ServiceError::Remote { code, payload } => {
            assert_eq!(code, hubipc::frame::INVALID_REQUEST);
            assert_eq!(payload.as_ref(), b"bad field");
        }
        other => panic!("unexpected error: {other}"),
    }
    receiver.shutdown();
}

#[test]
fn shutdown_finishes_in_flight_requests() {
    let handler = |request: &Envelope, response: &mut Envelope| {
        thread::sleep(Duration::from_millis(300));
        response.payload = request.payload.clone();
        HandlerStatus::Done
    };
    let receiver = Receiver::start("e2e-drain", 0, handler, ReceiverConfig::default())
        .expect("receiver should start");
    let port = receiver.port();

    let clients: Vec<_> = (0..3)
        .map(|i| {
            thread::spawn(move || {
                sender().send_request(port, &Envelope::new(100 + i, format!("req-{i}")), Some(WAIT))
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(150));

    let waiter = receiver.clone();
    let watcher = thread::spawn(move || waiter.wait_for_shutdown());

    assert!(receiver.shutdown());
    assert!(!receiver.shutdown());
    assert_eq!(receiver.state(), ReceiverState::Dead);
    watcher.join().expect("waiter should return");

    for (i, client) in clients.into_iter().enumerate() {
        let response = client
            .join()
            .expect("client thread")
            .expect("in-flight request should be answered");
        assert_eq!(response.payload_str(), Some(format!("req-{i}").as_str()));
    }
    assert!(!sender().is_available(port));
}

#[test]
fn handler_can_stop_its_receiver() {
    let handler = |request: &Envelope, response: &mut Envelope| {
        response.code = request.code;
        if request.code == 999 {
            HandlerStatus::Shutdown
        } else {
            HandlerStatus::Done
        }
    };
    let receiver = Receiver::start("e2e-self-stop", 0, handler, ReceiverConfig::default())
        .expect("receiver should start");
    let (done_tx, done_rx) = mpsc::channel();
    receiver.on_shutdown(move || {
        let _ = done_tx.send(());
    });

    let response = sender()
        .send_request(receiver.port(), &Envelope::empty(999), Some(WAIT))
        .expect("stop request should be answered");
    assert_eq!(response.code, SUCCESS);

    done_rx.recv_timeout(WAIT).expect("shutdown callback should run");
    assert_eq!(receiver.state(), ReceiverState::Dead);
}

#[test]
fn event_reaches_adapter_over_multicast() {
    let consumer = consumer(23461);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let adapter = move |event: &BaseEvent, json: &Value| {
        let _ = tx.lock().expect("adapter lock").send((*event, json.clone()));
    };
    assert!(consumer
        .start_listener(7, Arc::new(adapter))
        .expect("listener should start"));

    let producer =
        EventProducer::init(7, &consumer.config().channel).expect("producer should start");
    producer
        .broadcast(&mut json!({"a": 1}))
        .expect("broadcast should succeed");

    let (event, json) = rx.recv_timeout(WAIT).expect("event should arrive");
    assert_eq!(json, json!({"a": 1, "_svcId": 7}));
    assert_eq!(event.code, 0);

    consumer.shutdown_listener();
    assert!(!consumer.is_running());
}

#[test]
fn events_fan_out_to_service_and_subscribe_all() {
    let consumer = consumer(23462);
    let (tx, rx) = mpsc::channel();
    let tx = Arc::new(Mutex::new(tx));

    for (id, tag) in [(3u16, "service"), (SUBSCRIBE_ALL, "all")] {
        let tx = Arc::clone(&tx);
        let adapter = move |event: &BaseEvent, json: &Value| {
            let _ = tx
                .lock()
                .expect("adapter lock")
                .send((tag, *event, json.clone()));
        };
        consumer
            .start_listener(id, Arc::new(adapter))
            .expect("listener should start");
    }

    let producer =
        EventProducer::init(3, &consumer.config().channel).expect("producer should start");
    let sent = producer
        .broadcast_event(&BaseEvent::new(21, 1), json!({"room": "hall"}))
        .expect("broadcast should succeed");

    let first = rx.recv_timeout(WAIT).expect("first delivery");
    let second = rx.recv_timeout(WAIT).expect("second delivery");
    assert_eq!(first.0, "service");
    assert_eq!(second.0, "all");
    assert_eq!(first.1, sent);
    assert_eq!(second.1, sent);
    assert_eq!(first.2, second.2);

    // Events from other services only reach the subscribe-all adapter.
    let other =
        EventProducer::init(4, &consumer.config().channel).expect("producer should start");
    other
        .broadcast(&mut json!({"room": "attic"}))
        .expect("broadcast should succeed");
    let only = rx.recv_timeout(WAIT).expect("subscribe-all delivery");
    assert_eq!(only.0, "all");
    assert_eq!(only.2["room"], json!("attic"));
}
