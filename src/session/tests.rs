use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{reason, Phase, TransferSession};
use crate::error::WriteError;
use crate::observer::{SessionEvent, SessionObserver};
use crate::transport::mock::{LinkDrop, MockBehavior, MockTransport, STATUS_GATT_ERROR};
use crate::transport::{event_channel, AdapterEvent, EventSink, PeerHandle};
use crate::Config;

/// 이벤트와 그 시점에 주변기기가 받은 청크 수를 기록
struct Recorder {
    mock: Arc<MockTransport>,
    log: Mutex<Vec<(SessionEvent, usize)>>,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Recorder {
    fn record(&self, event: SessionEvent) {
        let written = self.mock.written_chunks().len();
        self.log.lock().push((event.clone(), written));
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for Recorder {
    fn mtu_determined(&self, mtu: u16) {
        self.record(SessionEvent::MtuDetermined(mtu));
    }

    fn speed_determined(&self, bytes_per_second: u64) {
        self.record(SessionEvent::SpeedDetermined(bytes_per_second));
    }

    fn test_aborted(&self, reason: &str) {
        self.record(SessionEvent::Aborted(reason.to_string()));
    }

    fn test_finished(&self) {
        self.record(SessionEvent::Finished);
    }
}

struct Harness {
    session: TransferSession,
    mock: Arc<MockTransport>,
    /// 전송 계층 대신 이벤트를 직접 넣을 때 사용
    sink: EventSink,
    recorder: Arc<Recorder>,
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    fn new(config: Config, behavior: MockBehavior, payload: Bytes) -> Self {
        let (sink, stream) = event_channel();
        let mock = Arc::new(MockTransport::new(behavior, sink.clone()).unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            mock: mock.clone(),
            log: Mutex::new(Vec::new()),
            tx,
        });
        let session =
            TransferSession::new(config, mock.clone(), stream, recorder.clone(), payload).unwrap();

        Self {
            session,
            mock,
            sink,
            recorder,
            rx,
        }
    }

    fn with_behavior(behavior: MockBehavior, payload_len: usize) -> Self {
        Self::new(Config::default(), behavior, payload(payload_len))
    }

    async fn next_event(&mut self) -> SessionEvent {
        self.rx.recv().await.expect("observer channel closed")
    }

    async fn terminal(&mut self) -> SessionEvent {
        loop {
            let event = self.next_event().await;
            if event.is_terminal() {
                return event;
            }
        }
    }

    fn events(&self) -> Vec<SessionEvent> {
        self.recorder.log.lock().iter().map(|(e, _)| e.clone()).collect()
    }

    /// 남은 타이머/태스크가 모두 끝날 때까지 대기
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_secs(120)).await;
    }
}

fn payload(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>())
}

fn granting(mtu: u16) -> MockBehavior {
    MockBehavior {
        granted_mtu: mtu,
        ..MockBehavior::default()
    }
}

fn aborted(reason: &str) -> SessionEvent {
    SessionEvent::Aborted(reason.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_full_transfer_finishes() {
    let mut h = Harness::with_behavior(granting(300), 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);

    assert_eq!(
        h.events(),
        vec![
            SessionEvent::MtuDetermined(300),
            SessionEvent::SpeedDetermined(1000),
            SessionEvent::Finished,
        ]
    );

    let lens: Vec<usize> = h.mock.written_chunks().iter().map(|c| c.len()).collect();
    assert_eq!(lens, vec![300, 300, 300, 100]);
    assert_eq!(h.mock.received_crc(), crc32fast::hash(&payload(1000)));
    assert_eq!(h.session.phase(), Phase::Finished);

    let stats = h.session.stats();
    assert_eq!(stats.negotiated_mtu, Some(300));
    assert_eq!(stats.acked_chunks, 4);
    assert_eq!(stats.acked_bytes, 1000);

    h.settle().await;
    assert_eq!(h.events().len(), 3);
    assert_eq!(h.mock.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_throughput_uses_whole_seconds() {
    let behavior = MockBehavior {
        granted_mtu: 100,
        write_latency: Duration::from_millis(30),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 10_000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);

    // 100 청크 x 30ms = 3초 → 10000 / 3
    assert!(h.events().contains(&SessionEvent::SpeedDetermined(3333)));

    let sample = h.session.stats().throughput.unwrap();
    assert_eq!(sample.elapsed_secs, 3);
    assert_eq!(sample.total_bytes, 10_000);
}

#[tokio::test(start_paused = true)]
async fn test_mtu_reported_before_any_chunk() {
    let mut h = Harness::with_behavior(granting(200), 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);

    let log = h.recorder.log.lock().clone();
    assert_eq!(log[0], (SessionEvent::MtuDetermined(200), 0));
    assert_eq!(h.mock.requested_mtu(), Some(512));
    assert!(h.mock.written_chunks().iter().all(|c| c.len() <= 200));
    assert_eq!(h.mock.written_chunks().len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_without_server() {
    let mut h = Harness::with_behavior(MockBehavior::silent(), 1000);
    let started = Instant::now();

    h.session.start_session();
    assert_eq!(h.session.phase(), Phase::Scanning);

    assert_eq!(h.terminal().await, aborted(reason::NO_SERVER_FOUND));
    assert!(started.elapsed() >= Duration::from_secs(30));

    h.settle().await;
    assert_eq!(h.events(), vec![aborted(reason::NO_SERVER_FOUND)]);
    assert_eq!(h.mock.connect_calls(), 0);
    assert!(!h.mock.is_scanning());
    assert_eq!(h.session.phase(), Phase::Aborted);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_mid_stream() {
    let behavior = MockBehavior {
        granted_mtu: 200,
        drop_link_after: Some((3, LinkDrop::Disconnect)),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::DEVICE_DISCONNECTED));

    h.settle().await;
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::MtuDetermined(200),
            aborted(reason::DEVICE_DISCONNECTED),
        ]
    );
    assert_eq!(h.mock.written_chunks().len(), 3);
    assert!(h.session.stats().throughput.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_mid_stream() {
    let behavior = MockBehavior {
        granted_mtu: 100,
        drop_link_after: Some((2, LinkDrop::LinkLoss)),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::LINK_LOSS));
}

#[tokio::test(start_paused = true)]
async fn test_adapter_error_includes_code() {
    let behavior = MockBehavior {
        granted_mtu: 100,
        drop_link_after: Some((4, LinkDrop::Error { code: 8 })),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    let event = h.terminal().await;
    assert_eq!(event, SessionEvent::Aborted(reason::connection_error(8)));
    assert_eq!(
        event,
        aborted("An error has occurred in the BLE connection: 8")
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_aborts() {
    let behavior = MockBehavior {
        granted_mtu: 100,
        write_failure_at: Some((1, WriteError::Failed { status: 3 })),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::WRITE_FAILED));

    h.settle().await;
    assert!(!h.events().iter().any(|e| matches!(e, SessionEvent::SpeedDetermined(_))));
    assert_eq!(h.mock.written_chunks().len(), 1);
    assert_eq!(h.mock.disconnects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_write_aborts() {
    let behavior = MockBehavior {
        write_failure_at: Some((0, WriteError::Invalid)),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::WRITE_INVALID));
    assert!(h.mock.written_chunks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_abort_while_scanning() {
    let behavior = MockBehavior {
        discovery_delay: Duration::from_secs(10),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.session.phase(), Phase::Scanning);

    h.session.abort_session();
    assert_eq!(h.terminal().await, aborted(reason::ABORTED_SCAN));

    // 중단된 세션에 다시 중단: 콜백 없음
    h.session.abort_session();
    h.settle().await;

    assert_eq!(h.events(), vec![aborted(reason::ABORTED_SCAN)]);
    assert_eq!(h.mock.connect_calls(), 0);
    assert!(!h.mock.is_scanning());
}

#[tokio::test(start_paused = true)]
async fn test_abort_while_streaming() {
    let behavior = MockBehavior {
        granted_mtu: 100,
        write_latency: Duration::from_millis(100),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 10_000);

    h.session.start_session();
    assert_eq!(h.next_event().await, SessionEvent::MtuDetermined(100));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.session.phase(), Phase::Streaming);

    h.session.abort_session();
    assert_eq!(h.session.phase(), Phase::Aborted);
    assert_eq!(h.terminal().await, aborted(reason::ABORTED_CONNECTION));

    h.settle().await;
    assert_eq!(
        h.events(),
        vec![
            SessionEvent::MtuDetermined(100),
            aborted(reason::ABORTED_CONNECTION),
        ]
    );
    assert!(h.mock.written_chunks().len() < 100);
    assert!(!h.mock.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_abort_while_connecting() {
    let behavior = MockBehavior {
        connect_delay: Duration::from_secs(5),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.session.phase(), Phase::Connecting);

    h.session.abort_session();
    assert_eq!(h.terminal().await, aborted(reason::ABORTED_CONNECTION));

    h.settle().await;
    assert_eq!(h.events(), vec![aborted(reason::ABORTED_CONNECTION)]);
    assert_eq!(h.mock.connect_attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_without_session_is_silent() {
    let h = Harness::with_behavior(MockBehavior::default(), 1000);

    h.session.abort_session();
    h.settle().await;

    assert!(h.events().is_empty());
    assert_eq!(h.session.phase(), Phase::Idle);
    assert_eq!(h.mock.disconnects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_scan_once() {
    let behavior = MockBehavior {
        discovery_delay: Duration::from_secs(2),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    std::thread::scope(|s| {
        s.spawn(|| h.session.start_session());
        s.spawn(|| h.session.start_session());
    });
    h.session.start_session();

    assert_eq!(h.mock.scan_starts(), 1);
    assert_eq!(h.session.phase(), Phase::Scanning);

    assert_eq!(h.terminal().await, SessionEvent::Finished);
    assert_eq!(h.mock.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_connected_is_noop() {
    let behavior = MockBehavior {
        granted_mtu: 100,
        write_latency: Duration::from_millis(50),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 2000);

    h.session.start_session();
    assert_eq!(h.next_event().await, SessionEvent::MtuDetermined(100));

    h.session.start_session();
    assert_eq!(h.mock.scan_starts(), 1);

    assert_eq!(h.terminal().await, SessionEvent::Finished);
    assert_eq!(h.mock.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_finish_creates_fresh_run() {
    let mut h = Harness::with_behavior(granting(250), 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);

    assert_eq!(h.mock.scan_starts(), 2);
    assert_eq!(h.mock.received_bytes(), 2000);
    let finished = h
        .events()
        .iter()
        .filter(|e| **e == SessionEvent::Finished)
        .count();
    assert_eq!(finished, 2);
}

#[tokio::test(start_paused = true)]
async fn test_first_batch_match_wins() {
    let behavior = MockBehavior {
        peers: vec![PeerHandle::new("AA"), PeerHandle::new("BB")],
        batch_results: true,
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);
    assert_eq!(h.mock.connect_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_single_results_connect_once() {
    let behavior = MockBehavior {
        peers: vec![
            PeerHandle::new("AA"),
            PeerHandle::new("BB"),
            PeerHandle::new("CC"),
        ],
        batch_results: false,
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);
    assert_eq!(h.mock.connect_calls(), 1);
    assert_eq!(h.mock.scan_starts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_recovers_after_transient_failures() {
    let behavior = MockBehavior {
        transient_connect_failures: 2,
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);
    assert_eq!(h.mock.connect_calls(), 1);
    assert_eq!(h.mock.connect_attempts(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_connect_retries_exhausted() {
    let behavior = MockBehavior {
        transient_connect_failures: 10,
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(
        h.terminal().await,
        SessionEvent::Aborted(reason::connect_failed(STATUS_GATT_ERROR))
    );
    // 최초 시도 + 재시도 3회
    assert_eq!(h.mock.connect_attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_device_not_supported() {
    let behavior = MockBehavior {
        services: Vec::new(),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::DEVICE_NOT_SUPPORTED));
}

#[tokio::test(start_paused = true)]
async fn test_scan_failure_event() {
    let behavior = MockBehavior {
        scan_error: Some(2),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::SCAN_FAILED));

    h.settle().await;
    assert_eq!(h.events(), vec![aborted(reason::SCAN_FAILED)]);
}

#[tokio::test(start_paused = true)]
async fn test_scan_rejected_by_adapter() {
    let behavior = MockBehavior {
        reject_scan: true,
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::SCAN_FAILED));
    assert_eq!(h.session.phase(), Phase::Aborted);

    h.settle().await;
    assert_eq!(h.events().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_negotiation_failure_aborts() {
    let behavior = MockBehavior {
        fail_negotiation: true,
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::MTU_FAILED));
    assert!(h.mock.written_chunks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_empty_payload_finishes() {
    let mut h = Harness::with_behavior(granting(185), 0);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);

    assert_eq!(
        h.events(),
        vec![
            SessionEvent::MtuDetermined(185),
            SessionEvent::SpeedDetermined(0),
            SessionEvent::Finished,
        ]
    );
    assert!(h.mock.written_chunks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_notifications_are_counted() {
    let behavior = MockBehavior {
        granted_mtu: 100,
        notify_every: Some(2),
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);
    h.settle().await;

    assert!(h.session.stats().notifications > 0);
}

#[tokio::test(start_paused = true)]
async fn test_keep_link_open_after_finish() {
    let config = Config {
        disconnect_on_finish: false,
        ..Config::default()
    };
    let mut h = Harness::new(config, MockBehavior::default(), payload(500));

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);
    h.settle().await;

    assert_eq!(h.mock.disconnects(), 0);
    assert!(h.mock.is_connected());
}

fn discovered_after(delay: Duration) -> MockBehavior {
    MockBehavior {
        discovery_delay: delay,
        ..MockBehavior::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_discovery_just_before_timeout_wins() {
    let mut h = Harness::with_behavior(discovered_after(Duration::from_millis(29_999)), 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);
    h.settle().await;

    assert_eq!(h.mock.connect_calls(), 1);
    assert!(!h.events().iter().any(|e| matches!(e, SessionEvent::Aborted(_))));
}

#[tokio::test(start_paused = true)]
async fn test_discovery_just_after_timeout_loses() {
    let mut h = Harness::with_behavior(discovered_after(Duration::from_millis(30_001)), 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::NO_SERVER_FOUND));
    h.settle().await;

    assert_eq!(h.mock.connect_calls(), 0);
    assert_eq!(h.events(), vec![aborted(reason::NO_SERVER_FOUND)]);
}

#[tokio::test(start_paused = true)]
async fn test_link_events_before_connect_are_dropped() {
    let mut h = Harness::with_behavior(granting(250), 1000);

    h.session.start_session();
    h.sink.send(AdapterEvent::DeviceDisconnected).unwrap();
    h.sink.send(AdapterEvent::LinkLoss).unwrap();
    h.sink
        .send(AdapterEvent::Notification(Bytes::from_static(b"old")))
        .unwrap();

    assert_eq!(h.terminal().await, SessionEvent::Finished);
    assert_eq!(h.session.stats().notifications, 0);
    assert_eq!(h.mock.received_bytes(), 1000);
}

#[tokio::test(start_paused = true)]
async fn test_abort_after_finish_is_noop() {
    let mut h = Harness::with_behavior(MockBehavior::default(), 1000);

    h.session.start_session();
    assert_eq!(h.terminal().await, SessionEvent::Finished);

    h.session.abort_session();
    h.settle().await;

    assert_eq!(h.session.phase(), Phase::Finished);
    assert_eq!(h.events().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_missing_characteristic_not_supported() {
    let config = Config {
        write_characteristic: uuid::Uuid::from_u128(0xdead_beef),
        ..Config::default()
    };
    let mut h = Harness::new(config, MockBehavior::default(), payload(1000));

    h.session.start_session();
    assert_eq!(h.terminal().await, aborted(reason::DEVICE_NOT_SUPPORTED));
    assert!(h.mock.written_chunks().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_notification_failure_aborts() {
    let behavior = MockBehavior {
        fail_notifications: true,
        ..MockBehavior::default()
    };
    let mut h = Harness::with_behavior(behavior, 1000);

    h.session.start_session();
    assert_eq!(h.next_event().await, SessionEvent::MtuDetermined(247));
    assert_eq!(h.terminal().await, aborted(reason::NOTIFICATIONS_FAILED));
    assert!(h.mock.written_chunks().is_empty());
    assert_eq!(h.mock.disconnects(), 1);
}

/// 종료 콜백 안에서 바로 다음 측정을 시작하는 관찰자
struct Restarter {
    session: OnceLock<Weak<TransferSession>>,
    restarts_left: AtomicUsize,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Restarter {
    fn restart(&self) {
        let allowed = self
            .restarts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !allowed {
            return;
        }
        if let Some(session) = self.session.get().and_then(Weak::upgrade) {
            session.start_session();
        }
    }
}

impl SessionObserver for Restarter {
    fn mtu_determined(&self, _mtu: u16) {}

    fn speed_determined(&self, _bytes_per_second: u64) {}

    fn test_aborted(&self, reason: &str) {
        let _ = self.tx.send(SessionEvent::Aborted(reason.to_string()));
        self.restart();
    }

    fn test_finished(&self) {
        let _ = self.tx.send(SessionEvent::Finished);
        self.restart();
    }
}

fn restarting_session(
    behavior: MockBehavior,
) -> (
    Arc<TransferSession>,
    Arc<MockTransport>,
    mpsc::UnboundedReceiver<SessionEvent>,
) {
    let (sink, stream) = event_channel();
    let mock = Arc::new(MockTransport::new(behavior, sink).unwrap());
    let (tx, rx) = mpsc::unbounded_channel();
    let observer = Arc::new(Restarter {
        session: OnceLock::new(),
        restarts_left: AtomicUsize::new(1),
        tx,
    });

    let session = Arc::new(
        TransferSession::new(Config::default(), mock.clone(), stream, observer.clone(), payload(1000))
            .unwrap(),
    );
    let _ = observer.session.set(Arc::downgrade(&session));

    (session, mock, rx)
}

#[tokio::test(start_paused = true)]
async fn test_restart_from_finished_callback() {
    let (session, mock, mut rx) = restarting_session(granting(250));

    session.start_session();
    assert_eq!(rx.recv().await, Some(SessionEvent::Finished));
    assert_eq!(rx.recv().await, Some(SessionEvent::Finished));

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(mock.scan_starts(), 2);
    assert_eq!(mock.connect_calls(), 2);
    assert_eq!(mock.received_bytes(), 2000);
    assert_eq!(session.phase(), Phase::Finished);
}

#[tokio::test(start_paused = true)]
async fn test_restart_from_aborted_callback() {
    let (session, mock, mut rx) = restarting_session(MockBehavior::silent());

    session.start_session();
    assert_eq!(rx.recv().await, Some(aborted(reason::NO_SERVER_FOUND)));
    assert_eq!(rx.recv().await, Some(aborted(reason::NO_SERVER_FOUND)));
    assert_eq!(mock.scan_starts(), 2);
}

#[tokio::test]
async fn test_new_requires_valid_config() {
    let (sink, stream) = event_channel();
    let mock = Arc::new(MockTransport::new(MockBehavior::default(), sink).unwrap());
    let (observer, _rx) = crate::observer::ChannelObserver::new();

    let result = TransferSession::new(
        Config::default().with_mtu_request_size(0),
        mock,
        stream,
        Arc::new(observer),
        payload(10),
    );
    assert!(matches!(result, Err(crate::Error::InvalidInput(_))));
}
