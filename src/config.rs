//! 속도 측정 설정

use std::time::Duration;

use uuid::Uuid;

use crate::{
    Error, Result, DEFAULT_CONNECT_RETRIES, DEFAULT_CONNECT_RETRY_DELAY_MS, DEFAULT_MTU_REQUEST_SIZE,
    DEFAULT_SCAN_TIMEOUT_SECS, NOTIFY_CHARACTERISTIC_UUID, SERVICE_UUID, WRITE_CHARACTERISTIC_UUID,
};

/// 속도 측정 세션 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 스캔 타임아웃
    /// 이 시간 안에 서버를 찾지 못하면 세션 중단
    pub scan_timeout: Duration,

    /// 요청할 MTU 크기 (바이트)
    /// 피어가 더 작은 값을 허용할 수 있음
    pub mtu_request_size: u16,

    /// 연결 재시도 횟수 (전송 계층에서 처리)
    pub connect_retries: u32,

    /// 연결 재시도 간격
    pub connect_retry_delay: Duration,

    /// 스캔 필터에 사용할 GATT 서비스 UUID
    pub service_uuid: Uuid,

    /// 쓰기 특성 UUID
    pub write_characteristic: Uuid,

    /// 알림 특성 UUID
    pub notify_characteristic: Uuid,

    /// 전송 완료 후 연결 해제 여부
    pub disconnect_on_finish: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(DEFAULT_SCAN_TIMEOUT_SECS),
            mtu_request_size: DEFAULT_MTU_REQUEST_SIZE,
            connect_retries: DEFAULT_CONNECT_RETRIES,
            connect_retry_delay: Duration::from_millis(DEFAULT_CONNECT_RETRY_DELAY_MS),
            service_uuid: SERVICE_UUID,
            write_characteristic: WRITE_CHARACTERISTIC_UUID,
            notify_characteristic: NOTIFY_CHARACTERISTIC_UUID,
            disconnect_on_finish: true,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 짧은 타임아웃 설정 (데모/테스트용)
    pub fn quick() -> Self {
        Self {
            scan_timeout: Duration::from_secs(5),
            connect_retries: 1,
            connect_retry_delay: Duration::from_millis(100),
            ..Self::default()
        }
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_mtu_request_size(mut self, size: u16) -> Self {
        self.mtu_request_size = size;
        self
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.mtu_request_size == 0 {
            return Err(Error::InvalidInput("mtu_request_size must be > 0".into()));
        }
        if self.scan_timeout.is_zero() {
            return Err(Error::InvalidInput("scan_timeout must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.scan_timeout, Duration::from_secs(30));
        assert_eq!(config.mtu_request_size, 512);
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.connect_retry_delay, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_and_zero_timeout() {
        let config = Config::quick().with_scan_timeout(Duration::from_secs(12));
        assert_eq!(config.scan_timeout, Duration::from_secs(12));
        assert_eq!(config.connect_retries, 1);
        assert!(config.validate().is_ok());

        let config = config.with_scan_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_zero_mtu_rejected() {
        let config = Config::default().with_mtu_request_size(0);
        assert!(matches!(config.validate(), Err(Error::InvalidInput(_))));
    }
}
