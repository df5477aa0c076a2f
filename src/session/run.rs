//! 단일 측정 실행의 상태 머신
//!
//! 스캔 → 연결 → MTU 협상 → 청크 스트리밍 → 완료/중단.
//! 스캔 도메인과 연결 도메인은 각자의 락으로만 변경하며, 두 락을 동시에
//! 잡는 경로는 없다. 관찰자 호출은 항상 락 밖에서 한다.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::reason;
use super::reporter::Reporter;
use super::state::{LinkState, Phase, ScanState, Transfer};
use crate::chunk::{Chunk, ChunkQueue};
use crate::error::WriteError;
use crate::observer::SessionObserver;
use crate::stats::{ThroughputSample, TransferStats};
use crate::transport::{
    AdapterEvent, GattProfile, PeerHandle, RetryPolicy, ScanFilter, TransportAdapter,
};
use crate::Config;

/// 스트리밍 루프 한 단계
enum Step {
    Send(Chunk),
    /// 처리율, 완료 결과 선점 여부
    Done(ThroughputSample, bool),
    Stop,
}

/// 측정 한 번 (시작마다 새로 생성)
pub(crate) struct SessionRun {
    id: u64,
    config: Config,
    adapter: Arc<dyn TransportAdapter>,
    reporter: Reporter,
    payload: Bytes,
    runtime: Handle,

    /// 스캔 도메인
    scan: Mutex<ScanState>,

    /// 연결 도메인
    link: Mutex<LinkState>,

    /// 중단 요청 플래그 (스캔 종료와 연결 시작 사이의 중단 처리용)
    abort_requested: AtomicBool,

    stats: RwLock<TransferStats>,
}

impl SessionRun {
    pub fn new(
        id: u64,
        config: Config,
        adapter: Arc<dyn TransportAdapter>,
        observer: Arc<dyn SessionObserver>,
        payload: Bytes,
        runtime: Handle,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            config,
            adapter,
            reporter: Reporter::new(observer),
            payload,
            runtime,
            scan: Mutex::new(ScanState::Idle),
            link: Mutex::new(LinkState::Idle),
            abort_requested: AtomicBool::new(false),
            stats: RwLock::new(TransferStats::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// 현재 단계
    pub fn phase(&self) -> Phase {
        if let Some(outcome) = self.reporter.claimed() {
            return outcome;
        }

        let link_phase = match &*self.link.lock() {
            LinkState::Idle => None,
            LinkState::Connecting { .. } => Some(Phase::Connecting),
            LinkState::Connected { transfer: None, .. } => Some(Phase::Ready),
            LinkState::Connected { transfer: Some(_), .. } => Some(Phase::Streaming),
            // 닫힌 링크는 항상 결과가 선점된 상태
            LinkState::Closed => Some(Phase::Aborted),
        };
        if let Some(phase) = link_phase {
            return phase;
        }

        match &*self.scan.lock() {
            ScanState::Idle => Phase::Idle,
            ScanState::Scanning { .. } => Phase::Scanning,
            // 스캔 종료 후 연결 시작 직전
            ScanState::Concluded => Phase::Connecting,
        }
    }

    /// 종료 콜백까지 끝났는지
    pub fn is_settled(&self) -> bool {
        self.reporter.is_delivered()
    }

    pub fn stats(&self) -> TransferStats {
        self.stats.read().clone()
    }

    // ─────────────────────────────────────────────────────────────────
    // 스캔 도메인
    // ─────────────────────────────────────────────────────────────────

    /// Idle → Scanning
    pub fn begin_scan(self: &Arc<Self>) {
        let mut scan = self.scan.lock();

        match &*scan {
            ScanState::Scanning { .. } => {
                warn!("BLE scan not started, a scan is already in progress.");
                return;
            }
            ScanState::Concluded => {
                warn!("BLE scan not started, session #{} is already past scanning.", self.id);
                return;
            }
            ScanState::Idle => {}
        }

        let run = Arc::clone(self);
        let scan_timeout = self.config.scan_timeout;
        let timeout = self.runtime.spawn(async move {
            tokio::time::sleep(scan_timeout).await;
            run.on_scan_timeout();
        });
        *scan = ScanState::Scanning { timeout };

        let filter = ScanFilter::from_config(&self.config);
        info!("Session #{}: scanning for {} (timeout {:?})", self.id, filter.service_uuid, scan_timeout);

        if let Err(e) = self.adapter.start_scan(&filter) {
            warn!("스캔 시작 실패: {}", e);
            if let ScanState::Scanning { timeout } = std::mem::replace(&mut *scan, ScanState::Concluded) {
                timeout.abort();
            }
            let claimed = self.reporter.claim_abort();
            drop(scan);

            if claimed {
                self.reporter.deliver_abort(reason::SCAN_FAILED);
            }
        }
    }

    /// 스캔 타임아웃 만료
    fn on_scan_timeout(&self) {
        let claimed = {
            let mut scan = self.scan.lock();
            if !matches!(*scan, ScanState::Scanning { .. }) {
                // 발견 경로가 먼저 락을 잡음
                return;
            }
            *scan = ScanState::Concluded;
            self.adapter.stop_scan();
            self.reporter.claim_abort()
        };

        info!("Session #{}: scan timed out after {:?}", self.id, self.config.scan_timeout);
        if claimed {
            self.reporter.deliver_abort(reason::NO_SERVER_FOUND);
        }
    }

    /// Scanning → Connecting (첫 번째 발견 장치만 사용)
    fn on_scan_result(self: &Arc<Self>, peers: Vec<PeerHandle>) {
        let count = peers.len();
        let Some(peer) = peers.into_iter().next() else {
            debug!("Session #{}: empty batch scan result ignored", self.id);
            return;
        };

        {
            let mut scan = self.scan.lock();
            match std::mem::replace(&mut *scan, ScanState::Concluded) {
                ScanState::Scanning { timeout } => {
                    timeout.abort();
                    self.adapter.stop_scan();
                }
                other => {
                    *scan = other;
                    debug!("Session #{}: scan result for {} ignored, not scanning", self.id, peer);
                    return;
                }
            }
        }

        info!("Session #{}: found {} ({} match(es))", self.id, peer, count);
        self.open_connection(peer);
    }

    fn on_scan_failed(&self, code: i32) {
        let claimed = {
            let mut scan = self.scan.lock();
            match std::mem::replace(&mut *scan, ScanState::Concluded) {
                ScanState::Scanning { timeout } => {
                    timeout.abort();
                    self.adapter.stop_scan();
                    self.reporter.claim_abort()
                }
                other => {
                    *scan = other;
                    return;
                }
            }
        };

        warn!("Session #{}: BLE scan failed, code={}", self.id, code);
        if claimed {
            self.reporter.deliver_abort(reason::SCAN_FAILED);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // 연결 도메인
    // ─────────────────────────────────────────────────────────────────

    fn open_connection(&self, peer: PeerHandle) {
        let cancelled = {
            let mut link = self.link.lock();
            match &*link {
                LinkState::Connecting { .. } => {
                    warn!("BLE connection not started, a connection is already in progress.");
                    return;
                }
                LinkState::Connected { .. } => {
                    warn!("BLE connection not started, a connection is already open.");
                    return;
                }
                LinkState::Closed => {
                    debug!("Session #{}: connection already closed, {} ignored", self.id, peer);
                    return;
                }
                LinkState::Idle => {}
            }

            if self.abort_requested.load(Ordering::SeqCst) || self.reporter.claimed().is_some() {
                *link = LinkState::Closed;
                self.reporter.claim_abort()
            } else {
                info!("Session #{}: connecting to {}", self.id, peer);
                self.adapter.connect(
                    &peer,
                    &GattProfile::from_config(&self.config),
                    RetryPolicy::from_config(&self.config),
                );
                *link = LinkState::Connecting { peer };
                false
            }
        };

        if cancelled {
            self.reporter.deliver_abort(reason::ABORTED_CONNECTION);
        }
    }

    /// 연결 해제 후 중단 보고
    ///
    /// 플래그를 먼저 정리하므로 재진입 시 두 번째 호출은 무시된다. 보고는
    /// 전송 계층이 해제를 확인한 뒤에 한다.
    fn close_connection(self: &Arc<Self>, reason: impl Into<String>) {
        let reason = reason.into();

        let claimed = {
            let mut link = self.link.lock();
            match *link {
                LinkState::Connecting { .. } | LinkState::Connected { .. } => {
                    *link = LinkState::Closed;
                    self.reporter.claim_abort()
                }
                LinkState::Idle | LinkState::Closed => {
                    debug!("Session #{}: no open connection to close ({})", self.id, reason);
                    return;
                }
            }
        };

        info!("Session #{}: closing BLE connection: {}", self.id, reason);

        let run = Arc::clone(self);
        self.runtime.spawn(async move {
            run.adapter.disconnect().await;
            debug!("Session #{}: disconnect completed", run.id);
            if claimed {
                run.reporter.deliver_abort(&reason);
            }
        });
    }

    /// Connecting → Ready
    fn on_device_ready(self: &Arc<Self>, ready: PeerHandle) {
        {
            let mut link = self.link.lock();
            match std::mem::replace(&mut *link, LinkState::Closed) {
                LinkState::Connecting { peer } => {
                    if peer != ready {
                        warn!("Session #{}: ready device {} differs from {}", self.id, ready, peer);
                    }
                    *link = LinkState::Connected {
                        peer,
                        transfer: None,
                    };
                }
                other => {
                    *link = other;
                    debug!("Session #{}: device ready ignored, not connecting", self.id);
                    return;
                }
            }
        }

        info!("Session #{}: device {} ready", self.id, ready);

        let run = Arc::clone(self);
        self.runtime.spawn(async move {
            run.negotiate_and_stream().await;
        });
    }

    fn link_is_connected(&self) -> bool {
        matches!(*self.link.lock(), LinkState::Connected { .. })
    }

    // ─────────────────────────────────────────────────────────────────
    // MTU 협상 및 스트리밍
    // ─────────────────────────────────────────────────────────────────

    async fn negotiate_and_stream(self: Arc<Self>) {
        let requested = self.config.mtu_request_size;

        let mtu = match self.adapter.negotiate_mtu(requested).await {
            Ok(mtu) if mtu > 0 => mtu,
            Ok(_) => {
                warn!("Session #{}: peer granted an MTU of 0", self.id);
                self.close_connection(reason::MTU_FAILED);
                return;
            }
            Err(e) => {
                warn!("MTU 협상 실패: {}", e);
                self.close_connection(reason::MTU_FAILED);
                return;
            }
        };

        if !self.link_is_connected() {
            debug!("Session #{}: link closed during MTU negotiation", self.id);
            return;
        }

        info!("Session #{}: MTU negotiated: {} (requested {})", self.id, mtu, requested);
        self.stats.write().negotiated_mtu = Some(mtu);
        self.reporter.mtu(mtu);

        info!("Registering notification on read characteristic");
        if let Err(e) = self.adapter.enable_notifications().await {
            warn!("알림 구독 실패: {}", e);
            self.close_connection(reason::NOTIFICATIONS_FAILED);
            return;
        }

        // mtu > 0 이므로 실패하지 않음
        let queue = match ChunkQueue::split(&self.payload, mtu as usize) {
            Ok(queue) => queue,
            Err(e) => {
                warn!("청크 분할 실패: {}", e);
                self.close_connection(reason::MTU_FAILED);
                return;
            }
        };

        let total_bytes = queue.total_bytes() as u64;
        let total_chunks = queue.total_chunks() as u64;
        let chunk_size = queue.chunk_size();
        let started_at = Instant::now();

        {
            let mut link = self.link.lock();
            match &mut *link {
                LinkState::Connected { transfer, .. } => {
                    *transfer = Some(Transfer { queue, started_at });
                }
                _ => {
                    debug!("Session #{}: link closed before streaming", self.id);
                    return;
                }
            }
        }

        self.stats
            .write()
            .begin_stream(total_bytes, total_chunks, started_at);

        debug!(
            "Session #{}: streaming {} bytes in {} chunks of {} (crc32={:08X})",
            self.id,
            total_bytes,
            total_chunks,
            chunk_size,
            crc32fast::hash(&self.payload)
        );

        self.stream().await;
    }

    /// 한 번에 한 청크씩, ACK 후 다음 청크
    async fn stream(self: &Arc<Self>) {
        loop {
            let step = {
                let mut link = self.link.lock();
                let next = match &mut *link {
                    LinkState::Connected {
                        transfer: Some(transfer),
                        ..
                    } => match transfer.queue.pop() {
                        Some(chunk) => Ok(chunk),
                        None => Err(Some(ThroughputSample::measure(
                            transfer.queue.total_bytes() as u64,
                            transfer.started_at,
                            Instant::now(),
                        ))),
                    },
                    _ => Err(None),
                };

                match next {
                    Ok(chunk) => Step::Send(chunk),
                    Err(Some(sample)) => {
                        *link = LinkState::Closed;
                        Step::Done(sample, self.reporter.claim_finish())
                    }
                    Err(None) => Step::Stop,
                }
            };

            match step {
                Step::Send(chunk) => {
                    let size = chunk.len();
                    match self.adapter.write(chunk).await {
                        Ok(()) => self.stats.write().record_ack(size),
                        Err(e) => {
                            warn!("Session #{}: chunk write failed: {}", self.id, e);
                            let why = match e {
                                WriteError::Failed { .. } => reason::WRITE_FAILED,
                                WriteError::Invalid => reason::WRITE_INVALID,
                            };
                            self.close_connection(why);
                            return;
                        }
                    }
                }
                Step::Done(sample, claimed) => {
                    self.finish(sample, claimed).await;
                    return;
                }
                Step::Stop => {
                    debug!("Session #{}: streaming stopped, link no longer open", self.id);
                    return;
                }
            }
        }
    }

    /// Streaming → Finished
    async fn finish(&self, sample: ThroughputSample, claimed: bool) {
        let summary = {
            let mut stats = self.stats.write();
            stats.throughput = Some(sample);
            stats.summary()
        };
        info!(
            "Session #{}: transferred {} bytes in {:?} -> {} B/s",
            self.id, sample.total_bytes, sample.elapsed, sample.bytes_per_second
        );
        info!("{}", summary);

        // 해제 이벤트가 다음 실행보다 먼저 채널에 들어가도록 보고 전에 해제
        if self.config.disconnect_on_finish {
            self.adapter.disconnect().await;
        }

        if claimed {
            self.reporter.deliver_finish(&sample);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // 외부 트리거
    // ─────────────────────────────────────────────────────────────────

    /// 사용자 중단 요청 (블로킹 없음)
    pub fn abort(self: &Arc<Self>) {
        self.abort_requested.store(true, Ordering::SeqCst);

        let claimed = {
            let mut scan = self.scan.lock();
            match std::mem::replace(&mut *scan, ScanState::Concluded) {
                ScanState::Scanning { timeout } => {
                    timeout.abort();
                    self.adapter.stop_scan();
                    Some(self.reporter.claim_abort())
                }
                _ => None,
            }
        };

        if let Some(claimed) = claimed {
            info!("Session #{}: scan aborted by user", self.id);
            if claimed {
                self.reporter.deliver_abort(reason::ABORTED_SCAN);
            }
        }

        self.close_connection(reason::ABORTED_CONNECTION);
    }

    /// 전송 계층 이벤트 처리
    ///
    /// 연결을 요청하기 전에 받은 연결 도메인 이벤트는 이전 실행의 것이므로
    /// 버린다.
    pub fn handle_event(self: &Arc<Self>, event: AdapterEvent) {
        if event.is_link_event() && matches!(*self.link.lock(), LinkState::Idle) {
            debug!("Session #{}: stale {:?} dropped, no connection requested", self.id, event);
            return;
        }

        match event {
            AdapterEvent::ScanResult(peers) => self.on_scan_result(peers),
            AdapterEvent::ScanFailed { code } => self.on_scan_failed(code),
            AdapterEvent::DeviceReady(peer) => self.on_device_ready(peer),
            AdapterEvent::ConnectFailed { code } => {
                self.close_connection(reason::connect_failed(code));
            }
            AdapterEvent::DeviceDisconnected => {
                self.close_connection(reason::DEVICE_DISCONNECTED);
            }
            AdapterEvent::DeviceNotSupported => {
                self.close_connection(reason::DEVICE_NOT_SUPPORTED);
            }
            AdapterEvent::LinkLoss => {
                self.close_connection(reason::LINK_LOSS);
            }
            AdapterEvent::Error { code, message } => {
                warn!("Session #{}: BLE error {}: {}", self.id, code, message);
                self.close_connection(reason::connection_error(code));
            }
            AdapterEvent::Notification(data) => {
                self.stats.write().notifications += 1;
                info!("Received {:?} from BLE device", data);
            }
        }
    }
}
