//! 에러 타입 정의

use thiserror::Error;

/// 속도 측정 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("유효하지 않은 입력: {0}")]
    InvalidInput(String),

    #[error("BLE 스캔 실패: code={code}")]
    ScanFailed { code: i32 },

    #[error("MTU 협상 실패: requested={requested}")]
    NegotiationFailed { requested: u16 },

    #[error("알림 구독 실패")]
    NotificationsUnavailable,

    #[error("연결되지 않음")]
    NotConnected,

    #[error("tokio 런타임 없음")]
    NoRuntime,
}

/// 청크 쓰기 실패
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteError {
    /// 요청이 전송 계층에서 실패 (GATT status 포함)
    #[error("쓰기 요청 실패: status={status}")]
    Failed { status: i32 },

    /// 요청 자체가 유효하지 않음 (특성 없음 등)
    #[error("유효하지 않은 쓰기 요청")]
    Invalid,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
