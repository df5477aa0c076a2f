//! 세션 수명주기 관찰자

use tokio::sync::mpsc;

/// 세션 결과를 받는 외부 관찰자
///
/// 호출은 작업 컨텍스트에서 바로 이루어지므로 구현은 블로킹하면 안 된다.
/// UI 스레드로 넘겨야 하면 [`ChannelObserver`] 를 쓴다.
pub trait SessionObserver: Send + Sync {
    /// 협상된 MTU (세션당 최대 한 번)
    fn mtu_determined(&self, mtu: u16);

    /// 측정된 처리율 (세션당 최대 한 번, 완료 직전)
    fn speed_determined(&self, bytes_per_second: u64);

    /// 세션 중단 (종료 콜백, test_finished 와 배타적)
    fn test_aborted(&self, reason: &str);

    /// 세션 완료 (종료 콜백)
    fn test_finished(&self);
}

/// 관찰자 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    MtuDetermined(u16),
    SpeedDetermined(u64),
    Aborted(String),
    Finished,
}

impl SessionEvent {
    /// 종료 이벤트 여부
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Aborted(_) | SessionEvent::Finished)
    }
}

/// 채널로 이벤트를 넘기는 관찰자
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SessionEvent) {
        // 수신측이 사라졌으면 버림
        let _ = self.tx.send(event);
    }
}

impl SessionObserver for ChannelObserver {
    fn mtu_determined(&self, mtu: u16) {
        self.forward(SessionEvent::MtuDetermined(mtu));
    }

    fn speed_determined(&self, bytes_per_second: u64) {
        self.forward(SessionEvent::SpeedDetermined(bytes_per_second));
    }

    fn test_aborted(&self, reason: &str) {
        self.forward(SessionEvent::Aborted(reason.to_string()));
    }

    fn test_finished(&self) {
        self.forward(SessionEvent::Finished);
    }
}
