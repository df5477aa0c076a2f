//! 인메모리 모의 주변기기
//!
//! 실제 무선 스택 없이 세션 상태 머신을 구동하기 위한 [`TransportAdapter`]
//! 구현. 발견/연결/MTU/쓰기 동작을 [`MockBehavior`] 로 조정한다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use super::{
    AdapterEvent, EventSink, GattProfile, PeerHandle, RetryPolicy, ScanFilter, TransportAdapter,
};
use crate::error::WriteError;
use crate::{Error, Result, NOTIFY_CHARACTERISTIC_UUID, SERVICE_UUID, WRITE_CHARACTERISTIC_UUID};

/// 연결 종료 상태 코드 (GATT_CONN_TERMINATED_LOCAL_HOST)
pub const STATUS_CONN_TERMINATED: i32 = 0x16;

/// 연결 실패 기본 상태 코드 (GATT_ERROR)
pub const STATUS_GATT_ERROR: i32 = 0x85;

/// 전송 중 링크가 끊기는 방식
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkDrop {
    Disconnect,
    LinkLoss,
    Error { code: i32 },
}

/// 모의 주변기기 동작 설정
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// 스캔으로 발견될 장치들 (비어 있으면 아무것도 못 찾음)
    pub peers: Vec<PeerHandle>,

    /// true면 한 번의 배치 결과로 전달
    pub batch_results: bool,

    /// 스캔 시작부터 결과까지 지연
    pub discovery_delay: Duration,

    /// 스캔 실패 이벤트 코드
    pub scan_error: Option<i32>,

    /// start_scan 호출 자체를 거부
    pub reject_scan: bool,

    /// 연결 시도 한 번에 걸리는 시간
    pub connect_delay: Duration,

    /// 앞에서부터 실패할 연결 시도 수
    pub transient_connect_failures: u32,

    /// 재시도 소진 시 상태 코드
    pub connect_error_code: i32,

    /// 주변기기가 제공하는 GATT 서비스
    pub services: Vec<Uuid>,

    /// 주변기기가 제공하는 특성
    pub characteristics: Vec<Uuid>,

    /// 주변기기가 허용하는 최대 MTU
    pub granted_mtu: u16,

    /// MTU 협상 실패
    pub fail_negotiation: bool,

    /// 알림 구독 실패
    pub fail_notifications: bool,

    /// 청크 하나의 ACK 지연
    pub write_latency: Duration,

    /// 지정한 청크 인덱스(0부터)에서 쓰기 실패
    pub write_failure_at: Option<(usize, WriteError)>,

    /// 지정한 수의 청크 ACK 후 링크 끊김
    pub drop_link_after: Option<(usize, LinkDrop)>,

    /// N 청크마다 수신 바이트 수를 알림으로 보냄
    pub notify_every: Option<usize>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            peers: vec![PeerHandle::new("00:11:22:33:44:55").with_name("speedtest-server")],
            batch_results: false,
            discovery_delay: Duration::from_millis(200),
            scan_error: None,
            reject_scan: false,
            connect_delay: Duration::from_millis(100),
            transient_connect_failures: 0,
            connect_error_code: STATUS_GATT_ERROR,
            services: vec![SERVICE_UUID],
            characteristics: vec![WRITE_CHARACTERISTIC_UUID, NOTIFY_CHARACTERISTIC_UUID],
            granted_mtu: 247,
            fail_negotiation: false,
            fail_notifications: false,
            write_latency: Duration::from_millis(5),
            write_failure_at: None,
            drop_link_after: None,
            notify_every: None,
        }
    }
}

impl MockBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    /// 아무 장치도 광고하지 않는 환경
    pub fn silent() -> Self {
        Self {
            peers: Vec::new(),
            ..Self::default()
        }
    }

    /// 연결 후 서비스 탐색 결과가 프로필을 만족하는지
    fn supports(&self, profile: &GattProfile) -> bool {
        self.services.contains(&profile.service_uuid)
            && self.characteristics.contains(&profile.write_characteristic)
            && self.characteristics.contains(&profile.notify_characteristic)
    }
}

#[derive(Default)]
struct LinkFlags {
    scanning: bool,
    connected: bool,
    notifications: bool,
    scan_task: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
}

/// 스폰된 태스크와 공유하는 상태
struct Shared {
    behavior: MockBehavior,
    events: EventSink,
    flags: Mutex<LinkFlags>,
    written: Mutex<Vec<Bytes>>,
    crc: Mutex<crc32fast::Hasher>,
    connect_attempts: AtomicUsize,
}

impl Shared {
    fn emit(&self, event: AdapterEvent) {
        // 세션이 사라졌으면 버림
        let _ = self.events.send(event);
    }
}

/// 모의 전송 계층
pub struct MockTransport {
    shared: Arc<Shared>,
    runtime: Handle,
    scan_starts: AtomicUsize,
    scan_stops: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnects: AtomicUsize,
    requested_mtu: Mutex<Option<u16>>,
}

impl MockTransport {
    /// tokio 런타임 안에서 생성해야 한다
    pub fn new(behavior: MockBehavior, events: EventSink) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        Ok(Self {
            shared: Arc::new(Shared {
                behavior,
                events,
                flags: Mutex::new(LinkFlags::default()),
                written: Mutex::new(Vec::new()),
                crc: Mutex::new(crc32fast::Hasher::new()),
                connect_attempts: AtomicUsize::new(0),
            }),
            runtime,
            scan_starts: AtomicUsize::new(0),
            scan_stops: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            requested_mtu: Mutex::new(None),
        })
    }

    /// 주변기기가 받은 청크들 (순서대로)
    pub fn written_chunks(&self) -> Vec<Bytes> {
        self.shared.written.lock().clone()
    }

    /// 주변기기가 받은 바이트 수
    pub fn received_bytes(&self) -> usize {
        self.shared.written.lock().iter().map(|c| c.len()).sum()
    }

    /// 받은 바이트 전체의 CRC32
    pub fn received_crc(&self) -> u32 {
        self.shared.crc.lock().clone().finalize()
    }

    pub fn scan_starts(&self) -> usize {
        self.scan_starts.load(Ordering::SeqCst)
    }

    pub fn scan_stops(&self) -> usize {
        self.scan_stops.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// 재시도 포함 실제 연결 시도 수
    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn requested_mtu(&self) -> Option<u16> {
        *self.requested_mtu.lock()
    }

    pub fn is_scanning(&self) -> bool {
        self.shared.flags.lock().scanning
    }

    pub fn is_connected(&self) -> bool {
        self.shared.flags.lock().connected
    }
}

#[async_trait]
impl TransportAdapter for MockTransport {
    fn start_scan(&self, filter: &ScanFilter) -> Result<()> {
        self.scan_starts.fetch_add(1, Ordering::SeqCst);

        if self.shared.behavior.reject_scan {
            return Err(Error::ScanFailed { code: STATUS_GATT_ERROR });
        }

        debug!("mock scan started: service={}", filter.service_uuid);

        let shared = self.shared.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(shared.behavior.discovery_delay).await;

            if !shared.flags.lock().scanning {
                return;
            }

            if let Some(code) = shared.behavior.scan_error {
                shared.flags.lock().scanning = false;
                shared.emit(AdapterEvent::ScanFailed { code });
                return;
            }

            let peers = shared.behavior.peers.clone();
            if peers.is_empty() {
                // 광고하는 장치 없음, 타임아웃까지 계속 스캔
                return;
            }

            if shared.behavior.batch_results {
                shared.emit(AdapterEvent::ScanResult(peers));
            } else {
                for peer in peers {
                    shared.emit(AdapterEvent::ScanResult(vec![peer]));
                }
            }
        });

        let mut flags = self.shared.flags.lock();
        flags.scanning = true;
        if let Some(old) = flags.scan_task.replace(task) {
            old.abort();
        }
        Ok(())
    }

    fn stop_scan(&self) {
        self.scan_stops.fetch_add(1, Ordering::SeqCst);

        let mut flags = self.shared.flags.lock();
        flags.scanning = false;
        if let Some(task) = flags.scan_task.take() {
            task.abort();
        }
    }

    fn connect(&self, peer: &PeerHandle, profile: &GattProfile, retry: RetryPolicy) {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let shared = self.shared.clone();
        let peer = peer.clone();
        let profile = profile.clone();
        let task = self.runtime.spawn(async move {
            let behavior = &shared.behavior;

            for attempt in 0..=retry.max_retries {
                tokio::time::sleep(behavior.connect_delay).await;
                shared.connect_attempts.fetch_add(1, Ordering::SeqCst);

                if attempt < behavior.transient_connect_failures {
                    debug!("mock connect attempt {} to {} failed", attempt + 1, peer);
                    if attempt == retry.max_retries {
                        shared.emit(AdapterEvent::ConnectFailed {
                            code: behavior.connect_error_code,
                        });
                        return;
                    }
                    tokio::time::sleep(retry.delay).await;
                    continue;
                }

                if !behavior.supports(&profile) {
                    debug!("mock peer {} lacks {:?}", peer, profile);
                    shared.emit(AdapterEvent::DeviceNotSupported);
                    return;
                }

                shared.flags.lock().connected = true;
                shared.emit(AdapterEvent::DeviceReady(peer));
                return;
            }
        });

        if let Some(old) = self.shared.flags.lock().connect_task.replace(task) {
            old.abort();
        }
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);

        let was_connected = {
            let mut flags = self.shared.flags.lock();
            if let Some(task) = flags.connect_task.take() {
                task.abort();
            }
            flags.notifications = false;
            std::mem::replace(&mut flags.connected, false)
        };

        // 해제 절차는 비동기로 완료됨
        tokio::task::yield_now().await;

        if was_connected {
            self.shared.emit(AdapterEvent::DeviceDisconnected);
        }
    }

    async fn negotiate_mtu(&self, requested: u16) -> Result<u16> {
        *self.requested_mtu.lock() = Some(requested);

        if !self.is_connected() {
            return Err(Error::NotConnected);
        }
        if self.shared.behavior.fail_negotiation {
            return Err(Error::NegotiationFailed { requested });
        }

        tokio::task::yield_now().await;
        Ok(requested.min(self.shared.behavior.granted_mtu))
    }

    async fn enable_notifications(&self) -> Result<()> {
        let mut flags = self.shared.flags.lock();
        if !flags.connected {
            return Err(Error::NotConnected);
        }
        if self.shared.behavior.fail_notifications {
            return Err(Error::NotificationsUnavailable);
        }
        flags.notifications = true;
        Ok(())
    }

    async fn write(&self, chunk: Bytes) -> std::result::Result<(), WriteError> {
        let behavior = &self.shared.behavior;
        // 최소 1ms: 끊김 이벤트가 실패한 쓰기보다 먼저 처리되도록
        let latency = behavior.write_latency.max(Duration::from_millis(1));

        if !self.is_connected() {
            tokio::time::sleep(latency).await;
            return Err(WriteError::Failed {
                status: STATUS_CONN_TERMINATED,
            });
        }

        let index = self.shared.written.lock().len();
        tokio::time::sleep(latency).await;

        if let Some((at, error)) = &behavior.write_failure_at {
            if *at == index {
                return Err(error.clone());
            }
        }

        self.shared.crc.lock().update(&chunk);
        let acked = {
            let mut written = self.shared.written.lock();
            written.push(chunk);
            written.len()
        };

        if let Some(every) = behavior.notify_every {
            let notifications = self.shared.flags.lock().notifications;
            if every > 0 && acked % every == 0 && notifications {
                let received = self.received_bytes() as u32;
                self.shared
                    .emit(AdapterEvent::Notification(Bytes::copy_from_slice(&received.to_le_bytes())));
            }
        }

        if let Some((after, kind)) = &behavior.drop_link_after {
            if *after == acked {
                {
                    let mut flags = self.shared.flags.lock();
                    flags.connected = false;
                    flags.notifications = false;
                }
                let event = match kind {
                    LinkDrop::Disconnect => AdapterEvent::DeviceDisconnected,
                    LinkDrop::LinkLoss => AdapterEvent::LinkLoss,
                    LinkDrop::Error { code } => AdapterEvent::Error {
                        code: *code,
                        message: "mock link error".into(),
                    },
                };
                self.shared.emit(event);
            }
        }

        Ok(())
    }
}
