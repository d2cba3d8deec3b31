use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;

use crate::id::PackageId;
use crate::model::{
    CustomError, PackageType, Request, Response, TrafficPackage, WebsocketMessageType,
    WebsocketPayload,
};
use crate::registry::{
    CapturedPackage, PackageRegistry, PackageRegistryConfig, PackageSink, spawn_package_registry,
};

#[derive(Clone, Default)]
struct RecordingSink {
    packages: Arc<Mutex<Vec<CapturedPackage>>>,
}

impl PackageSink for RecordingSink {
    fn dispatch(&mut self, package: CapturedPackage) {
        self.packages.lock().unwrap().push(package);
    }
}

impl RecordingSink {
    fn taken(&self) -> Vec<CapturedPackage> {
        std::mem::take(&mut *self.packages.lock().unwrap())
    }
}

fn registry() -> (PackageRegistry, RecordingSink) {
    let sink = RecordingSink::default();
    let registry = spawn_package_registry(Box::new(sink.clone()), PackageRegistryConfig::default());
    (registry, sink)
}

fn get(url: &str) -> Request {
    Request::new(url, "GET", Vec::new())
}

#[test]
fn concurrent_starts_create_one_package() {
    let (registry, sink) = registry();
    let id = PackageId::from("same");
    let handles: Vec<_> = (0..16)
        .map(|n| {
            let registry = registry.clone();
            let id = id.clone();
            std::thread::spawn(move || {
                registry
                    .start(id, get(&format!("https://example.com/{n}")), PackageType::Http)
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len().unwrap(), 1);
    registry.completed(id.clone(), None);
    registry.flush().unwrap();
    assert_eq!(sink.taken().len(), 1);
    assert!(registry.is_empty().unwrap());
}

#[test]
fn body_length_counts_distinct_chunks() {
    let (registry, _sink) = registry();
    let id = PackageId::from("r1");
    registry.start(id.clone(), get("https://example.com"), PackageType::Http).unwrap();
    for chunk in [&b"aaa"[..], b"aaa", b"bb", b"c", b"c"] {
        registry.data(id.clone(), chunk.to_vec());
    }
    let package = registry.snapshot(&id).unwrap().unwrap();
    assert_eq!(package.response_body(), b"aaabbc");
}

#[test]
fn http_request_is_delivered_once_and_released() {
    let (registry, sink) = registry();
    let id = PackageId::from("r1");
    registry
        .start(id.clone(), get("https://example.com/get"), PackageType::Http)
        .unwrap();
    registry.response(id.clone(), Response::new(200, Vec::new()), None);
    registry.data(id.clone(), b"{\"a\":".to_vec());
    registry.data(id.clone(), b"1}".to_vec());
    registry.completed(id.clone(), None);
    registry.completed(id.clone(), None);
    registry.data(id.clone(), b"late".to_vec());
    registry.flush().unwrap();

    let delivered = sink.taken();
    assert_eq!(delivered.len(), 1);
    let package = assert_matches!(&delivered[0], CapturedPackage::Traffic(package) => package);
    assert_eq!(package.request().url, "https://example.com/get");
    assert_eq!(package.response().map(|r| r.status_code), Some(200));
    assert_eq!(package.response_body(), b"{\"a\":1}");
    assert!(package.is_completed());
    assert!(!registry.contains(&id).unwrap());
}

#[test]
fn completion_records_error() {
    let (registry, sink) = registry();
    let id = PackageId::from("r1");
    registry.start(id.clone(), get("https://example.com"), PackageType::Http).unwrap();
    registry.completed(id, Some(CustomError::new(-1001, "timed out")));
    registry.flush().unwrap();

    let delivered = sink.taken();
    assert_eq!(delivered[0].package().error().map(|e| e.code), Some(-1001));
}

#[test]
fn events_for_unknown_ids_are_dropped() {
    let (registry, sink) = registry();
    let id = PackageId::from("missing");
    registry.data(id.clone(), b"x".to_vec());
    registry.response(id.clone(), Response::new(200, Vec::new()), None);
    registry.completed(id.clone(), None);
    registry.websocket_frame(id.clone(), WebsocketMessageType::PingPong, None);
    registry.websocket_closed(id, 1000, None);
    registry.flush().unwrap();

    assert!(sink.taken().is_empty());
    assert!(registry.is_empty().unwrap());
}

#[test]
fn response_with_fallback_creates_package_lazily() {
    let (registry, sink) = registry();
    let id = PackageId::from("late-start");
    registry.response(
        id.clone(),
        Response::new(204, Vec::new()),
        Some(get("https://example.com/late")),
    );
    registry.upload_data(id.clone(), b"body".to_vec(), None);
    registry.completed(id, None);
    registry.flush().unwrap();

    let delivered = sink.taken();
    assert_eq!(delivered.len(), 1);
    let package = delivered[0].package();
    assert_eq!(package.request().url, "https://example.com/late");
    assert_eq!(package.request().body.as_deref(), Some(&b"body"[..]));
    assert_eq!(package.response().map(|r| r.status_code), Some(204));
}

#[test]
fn websocket_connection_lives_until_close() {
    let (registry, sink) = registry();
    let id = PackageId::from("ws1");
    registry
        .start(id.clone(), get("wss://example.com/socket"), PackageType::Websocket)
        .unwrap();
    registry.response(id.clone(), Response::new(101, Vec::new()), None);
    for n in 0..3 {
        registry.websocket_frame(
            id.clone(),
            WebsocketMessageType::Send,
            Some(WebsocketPayload::Text(format!("m{n}"))),
        );
        registry.websocket_frame(
            id.clone(),
            WebsocketMessageType::Receive,
            Some(WebsocketPayload::Binary(vec![n])),
        );
    }
    registry.flush().unwrap();
    assert!(registry.contains(&id).unwrap());

    let frames = sink.taken();
    assert_eq!(frames.len(), 6);
    assert!(frames.iter().all(|frame| matches!(frame, CapturedPackage::WebSocket(_))));
    assert_matches!(
        frames[0].package().websocket_message().and_then(|m| m.payload()),
        Some(WebsocketPayload::Text(text)) if text == "m0"
    );

    registry.websocket_closed(id.clone(), 1000, Some("done".to_string()));
    registry.flush().unwrap();
    assert!(!registry.contains(&id).unwrap());

    let closed = sink.taken();
    assert_eq!(closed.len(), 1);
    let message = closed[0].package().websocket_message().unwrap();
    assert_eq!(message.message_type(), WebsocketMessageType::SendCloseMessage);
}

#[test]
fn websocket_frames_wait_for_response() {
    let (registry, sink) = registry();
    let id = PackageId::from("ws2");
    registry
        .start(id.clone(), get("wss://example.com/socket"), PackageType::Websocket)
        .unwrap();
    registry.websocket_frame(id.clone(), WebsocketMessageType::Send, None);
    registry.websocket_frame(id.clone(), WebsocketMessageType::PingPong, None);
    registry.flush().unwrap();
    assert!(sink.taken().is_empty());

    registry.response(id.clone(), Response::new(101, Vec::new()), None);
    registry.flush().unwrap();
    let frames = sink.taken();
    assert_eq!(frames.len(), 2);
    let kinds: Vec<_> = frames
        .iter()
        .filter_map(|frame| frame.package().websocket_message().map(|m| m.message_type()))
        .collect();
    assert_eq!(
        kinds,
        vec![WebsocketMessageType::Send, WebsocketMessageType::PingPong]
    );
    assert!(frames.iter().all(|frame| frame.package().response().is_some()));
}

#[test]
fn websocket_close_flushes_queued_frames_first() {
    let (registry, sink) = registry();
    let id = PackageId::from("ws3");
    registry
        .start(id.clone(), get("wss://example.com/socket"), PackageType::Websocket)
        .unwrap();
    registry.websocket_frame(id.clone(), WebsocketMessageType::Send, None);
    registry.websocket_closed(id.clone(), 1001, None);
    registry.flush().unwrap();

    let frames = sink.taken();
    assert_eq!(frames.len(), 2);
    assert_eq!(
        frames[1].package().websocket_message().map(|m| m.message_type()),
        Some(WebsocketMessageType::SendCloseMessage)
    );
    assert!(registry.is_empty().unwrap());
}

#[test]
fn websocket_completion_keeps_connection() {
    let (registry, sink) = registry();
    let id = PackageId::from("ws4");
    registry
        .start(id.clone(), get("wss://example.com/socket"), PackageType::Websocket)
        .unwrap();
    registry.completed(id.clone(), None);
    registry.flush().unwrap();

    assert_eq!(sink.taken().len(), 1);
    assert!(registry.contains(&id).unwrap());
}

#[test]
fn injected_packages_are_completed_and_dispatched() {
    let (registry, sink) = registry();
    let package = TrafficPackage::assembled(
        PackageId::from("manual"),
        get("https://example.com/manual"),
        Some(Response::new(200, Vec::new())),
        Some(b"ok".to_vec()),
        PackageType::Http,
    );
    registry.inject(CapturedPackage::Traffic(package));
    registry.flush().unwrap();

    let delivered = sink.taken();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].package().is_completed());
    assert!(registry.is_empty().unwrap());
}

/// Holds the lane inside its first dispatch until released.
struct GatedSink {
    gate: Option<crossbeam_channel::Receiver<()>>,
    delivered: Arc<Mutex<usize>>,
}

impl PackageSink for GatedSink {
    fn dispatch(&mut self, _package: CapturedPackage) {
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv();
        }
        *self.delivered.lock().unwrap() += 1;
    }
}

#[test]
fn full_queue_waits_instead_of_dropping_completions() {
    let (release, gate) = crossbeam_channel::bounded(1);
    let delivered = Arc::new(Mutex::new(0));
    let registry = spawn_package_registry(
        Box::new(GatedSink {
            gate: Some(gate),
            delivered: Arc::clone(&delivered),
        }),
        PackageRegistryConfig { max_queue_size: 2 },
    );
    let ids: Vec<_> = (0..5).map(|n| PackageId::from(format!("r{n}"))).collect();
    for id in &ids {
        registry
            .start(id.clone(), get("https://example.com"), PackageType::Http)
            .unwrap();
    }

    let poster = {
        let registry = registry.clone();
        let ids = ids.clone();
        std::thread::spawn(move || {
            for id in ids {
                registry.completed(id, None);
            }
        })
    };
    std::thread::sleep(std::time::Duration::from_millis(50));
    release.send(()).unwrap();
    poster.join().unwrap();
    registry.flush().unwrap();

    assert!(registry.is_empty().unwrap());
    assert_eq!(*delivered.lock().unwrap(), 5);
}
