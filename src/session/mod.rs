//! 전송 세션 (상태 머신 코어)
//!
//! [`TransferSession`] 이 외부 제어면이다. 시작 요청마다 새 실행을 만들고,
//! 전송 계층 이벤트는 이벤트 펌프 태스크가 현재 실행으로 전달한다.

mod reporter;
mod run;
mod state;

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::observer::SessionObserver;
use crate::stats::TransferStats;
use crate::transport::{EventStream, TransportAdapter};
use crate::{Config, Error, Result};

use run::SessionRun;
pub use state::Phase;

/// 관찰자에게 전달되는 중단 사유
pub mod reason {
    pub const NO_SERVER_FOUND: &str = "No suitable server found.";
    pub const ABORTED_SCAN: &str = "BLE test aborted.";
    pub const ABORTED_CONNECTION: &str = "BLE test aborted";
    pub const SCAN_FAILED: &str = "BLE scan has failed.";
    pub const DEVICE_DISCONNECTED: &str = "Device has disconnected";
    pub const DEVICE_NOT_SUPPORTED: &str = "Device is not supported";
    pub const LINK_LOSS: &str = "Link loss has occurred";
    pub const MTU_FAILED: &str = "MTU negotiation has failed";
    pub const NOTIFICATIONS_FAILED: &str = "Enabling notifications has failed";
    pub const WRITE_FAILED: &str = "BLE request has failed";
    pub const WRITE_INVALID: &str = "BLE request is invalid";

    pub fn connection_error(code: i32) -> String {
        format!("An error has occurred in the BLE connection: {}", code)
    }

    pub fn connect_failed(code: i32) -> String {
        format!("BLE connection has failed: {}", code)
    }
}

struct Inner {
    config: Config,
    adapter: Arc<dyn TransportAdapter>,
    observer: Arc<dyn SessionObserver>,
    payload: Bytes,
    runtime: Handle,

    /// 현재 실행 (한 번에 하나)
    current: Mutex<Option<Arc<SessionRun>>>,

    next_run_id: AtomicU64,
}

/// 속도 측정 세션 제어면
///
/// `start_session`/`abort_session` 은 블로킹하지 않으며 어느 스레드에서든
/// 호출할 수 있다.
pub struct TransferSession {
    inner: Arc<Inner>,
    pump: JoinHandle<()>,
}

impl TransferSession {
    /// 새 세션 생성 (tokio 런타임 안에서 호출)
    ///
    /// `events` 는 `adapter` 에 넘긴 [`crate::transport::EventSink`] 의
    /// 반대편이다.
    pub fn new(
        config: Config,
        adapter: Arc<dyn TransportAdapter>,
        events: EventStream,
        observer: Arc<dyn SessionObserver>,
        payload: Bytes,
    ) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let inner = Arc::new(Inner {
            config,
            adapter,
            observer,
            payload,
            runtime: runtime.clone(),
            current: Mutex::new(None),
            next_run_id: AtomicU64::new(1),
        });

        let pump = runtime.spawn(pump_events(Arc::downgrade(&inner), events));

        Ok(Self { inner, pump })
    }

    /// 측정 시작
    ///
    /// 진행 중인 실행이 있으면 아무것도 하지 않는다 (스캔 중이면 스캔 락이
    /// 중복을 걸러낸다).
    pub fn start_session(&self) {
        let run = {
            let mut current = self.inner.current.lock();

            match current.as_ref() {
                // 진행 중인 실행: 스캔 중이면 경고만 남김
                Some(run) if !run.is_settled() => run.clone(),
                _ => {
                    let id = self.inner.next_run_id.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "Starting BLE speed test #{} ({} bytes payload)",
                        id,
                        self.inner.payload.len()
                    );

                    let run = SessionRun::new(
                        id,
                        self.inner.config.clone(),
                        self.inner.adapter.clone(),
                        self.inner.observer.clone(),
                        self.inner.payload.clone(),
                        self.inner.runtime.clone(),
                    );
                    *current = Some(run.clone());
                    run
                }
            }
        };

        run.begin_scan();
    }

    /// 측정 중단 (시작 전이거나 이미 끝났으면 아무것도 안 함)
    pub fn abort_session(&self) {
        let run = self.inner.current.lock().clone();

        match run {
            Some(run) if run.phase().is_terminal() => {
                debug!("Abort requested after BLE speed test #{} ended", run.id());
            }
            Some(run) => {
                info!("Abort requested for BLE speed test #{}", run.id());
                run.abort();
            }
            None => debug!("Abort requested without a session"),
        }
    }

    /// 현재 단계
    pub fn phase(&self) -> Phase {
        let run = self.inner.current.lock().clone();
        run.map(|r| r.phase()).unwrap_or(Phase::Idle)
    }

    /// 현재 실행의 통계
    pub fn stats(&self) -> TransferStats {
        let run = self.inner.current.lock().clone();
        run.map(|r| r.stats()).unwrap_or_default()
    }

    /// 전송할 페이로드 크기
    pub fn payload_len(&self) -> usize {
        self.inner.payload.len()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Drop for TransferSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// 전송 계층 이벤트를 현재 실행으로 전달
async fn pump_events(inner: Weak<Inner>, mut events: EventStream) {
    while let Some(event) = events.recv().await {
        let Some(strong) = inner.upgrade() else {
            break;
        };

        let run = strong.current.lock().clone();
        match run {
            Some(run) => run.handle_event(event),
            None => warn!("Adapter event without an active session: {:?}", event),
        }
    }

    debug!("Adapter event stream closed");
}
