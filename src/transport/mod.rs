//! BLE 전송 계층 추상화
//!
//! 세션 코어가 사용하는 무선 스택 기본 동작만 정의한다.
//! - 요청/응답 동작 (MTU 협상, 쓰기, 연결 해제): async 메서드
//! - 비동기 통지 (스캔 결과, 연결 수명주기, 알림): [`AdapterEvent`] 채널

pub mod mock;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::WriteError;
use crate::{Config, Result};

pub use mock::{MockBehavior, MockTransport};

/// 발견된 원격 장치 식별자 (전송 계층 소유)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerHandle {
    /// 장치 주소
    pub address: String,

    /// 광고된 이름
    pub name: Option<String>,
}

impl PeerHandle {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.address, name),
            None => write!(f, "{}", self.address),
        }
    }
}

/// 스캔 필터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFilter {
    /// 광고에 포함되어야 하는 서비스 UUID
    pub service_uuid: Uuid,
}

impl ScanFilter {
    pub fn from_config(config: &Config) -> Self {
        Self {
            service_uuid: config.service_uuid,
        }
    }
}

/// 연결 후 확인할 GATT 프로필
///
/// 서비스나 특성 중 하나라도 없으면 전송 계층은 `DeviceNotSupported` 를
/// 보낸다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattProfile {
    pub service_uuid: Uuid,

    /// 청크를 쓰는 특성
    pub write_characteristic: Uuid,

    /// 서버 알림 특성
    pub notify_characteristic: Uuid,
}

impl GattProfile {
    pub fn from_config(config: &Config) -> Self {
        Self {
            service_uuid: config.service_uuid,
            write_characteristic: config.write_characteristic,
            notify_characteristic: config.notify_characteristic,
        }
    }
}

/// 연결 재시도 정책 (전송 계층에서 수행)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.connect_retries,
            delay: config.connect_retry_delay,
        }
    }
}

/// 전송 계층이 세션으로 올려 보내는 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// 스캔 결과 (단일 또는 배치)
    ScanResult(Vec<PeerHandle>),

    /// 스캔 실패
    ScanFailed { code: i32 },

    /// 연결 및 서비스 확인 완료
    DeviceReady(PeerHandle),

    /// 재시도까지 모두 실패
    ConnectFailed { code: i32 },

    /// 장치 연결 끊김
    DeviceDisconnected,

    /// 필요한 서비스/특성 없음
    DeviceNotSupported,

    /// 링크 손실
    LinkLoss,

    /// 연결 중 에러
    Error { code: i32, message: String },

    /// 알림 특성으로 받은 데이터
    Notification(Bytes),
}

impl AdapterEvent {
    /// 연결 도메인 이벤트 여부 (스캔 이벤트가 아닌 것)
    pub fn is_link_event(&self) -> bool {
        !matches!(self, AdapterEvent::ScanResult(_) | AdapterEvent::ScanFailed { .. })
    }
}

/// 이벤트 송신측 (전송 계층 보관)
pub type EventSink = mpsc::UnboundedSender<AdapterEvent>;

/// 이벤트 수신측 (세션 보관)
pub type EventStream = mpsc::UnboundedReceiver<AdapterEvent>;

/// 이벤트 채널 생성
pub fn event_channel() -> (EventSink, EventStream) {
    mpsc::unbounded_channel()
}

/// 세션 코어가 요구하는 전송 계층 기본 동작
///
/// 동기 메서드는 요청을 큐에 넣기만 하고 바로 반환해야 한다. 결과는
/// [`AdapterEvent`] 로 전달된다.
#[async_trait]
pub trait TransportAdapter: Send + Sync + 'static {
    /// 스캔 시작. 결과는 `ScanResult`/`ScanFailed` 이벤트로 전달
    fn start_scan(&self, filter: &ScanFilter) -> Result<()>;

    /// 스캔 중지 (스캔 중이 아니면 무시)
    fn stop_scan(&self);

    /// 연결 시작. 연결 후 `profile` 을 확인하고 결과는 `DeviceReady`/
    /// `ConnectFailed`/`DeviceNotSupported` 로 전달
    fn connect(&self, peer: &PeerHandle, profile: &GattProfile, retry: RetryPolicy);

    /// 연결 해제. 해제가 확인되면 반환
    ///
    /// 해제로 생기는 `DeviceDisconnected` 는 반환 전에 보내야 한다.
    async fn disconnect(&self);

    /// MTU 협상. 허용된 크기 반환 (요청보다 작을 수 있음)
    async fn negotiate_mtu(&self, requested: u16) -> Result<u16>;

    /// 알림 구독. 알림은 `Notification` 이벤트로 전달
    async fn enable_notifications(&self) -> Result<()>;

    /// 청크 쓰기. ACK 또는 실패가 올 때까지 대기
    async fn write(&self, chunk: Bytes) -> std::result::Result<(), WriteError>;
}
