//! # blespeed
//!
//! BLE 처리율 측정 (central 측)
//!
//! ## 흐름
//! - **스캔**: 서비스 UUID 로 서버 탐색, 타임아웃 시 중단
//! - **연결**: 전송 계층의 제한된 재시도
//! - **MTU 협상**: 512 요청, 허용된 크기로 청크 분할
//! - **스트리밍**: ACK 기반, 한 번에 한 청크
//! - **측정**: 스트리밍 구간의 초 단위 경과 시간으로 바이트/초 계산
//!
//! 사용자 중단은 어느 단계에서든 가능하며, 모든 실패는 관찰자에게 한 번의
//! `test_aborted` 로 전달된다.

pub mod chunk;
pub mod config;
pub mod error;
pub mod observer;
pub mod payload;
pub mod session;
pub mod stats;
pub mod transport;

use uuid::Uuid;

pub use chunk::{Chunk, ChunkQueue};
pub use config::Config;
pub use error::{Error, Result, WriteError};
pub use observer::{ChannelObserver, SessionEvent, SessionObserver};
pub use session::{reason, Phase, TransferSession};
pub use stats::{ThroughputSample, TransferStats};
pub use transport::{
    event_channel, AdapterEvent, EventSink, EventStream, GattProfile, MockBehavior, MockTransport,
    PeerHandle, RetryPolicy, ScanFilter, TransportAdapter,
};

/// 기본 MTU 요청 크기 (바이트)
pub const DEFAULT_MTU_REQUEST_SIZE: u16 = 512;

/// 기본 스캔 타임아웃 (초)
pub const DEFAULT_SCAN_TIMEOUT_SECS: u64 = 30;

/// 기본 연결 재시도 횟수
pub const DEFAULT_CONNECT_RETRIES: u32 = 3;

/// 기본 연결 재시도 간격 (밀리초)
pub const DEFAULT_CONNECT_RETRY_DELAY_MS: u64 = 500;

/// 속도 측정 서버 GATT 서비스
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x5fbfb456_a20b_478f_889c_b3fa3329cd7d);

/// 페이로드 쓰기 특성
pub const WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x6bebf1b3_e6fd_47a4_8ed9_b36365c3e654);

/// 서버 알림 특성
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xbc30689f_9105_4789_b2e9_8865637f50a0);
