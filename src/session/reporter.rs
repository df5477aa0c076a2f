//! 관찰자 호출 게이트
//!
//! 종료 결과는 상태 전이 시점(락 안)에서 먼저 선점하고, 관찰자 호출은 락을
//! 놓은 뒤에 한다. 선점에 성공한 경로만 종료 콜백을 보낸다.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::state::Phase;
use crate::observer::SessionObserver;
use crate::stats::ThroughputSample;

const OPEN: u8 = 0;
const FINISHED: u8 = 1;
const ABORTED: u8 = 2;

pub(crate) struct Reporter {
    observer: Arc<dyn SessionObserver>,
    mtu_reported: AtomicBool,
    outcome: AtomicU8,
    delivered: AtomicBool,
}

impl Reporter {
    pub fn new(observer: Arc<dyn SessionObserver>) -> Self {
        Self {
            observer,
            mtu_reported: AtomicBool::new(false),
            outcome: AtomicU8::new(OPEN),
            delivered: AtomicBool::new(false),
        }
    }

    /// 중단 결과 선점
    pub fn claim_abort(&self) -> bool {
        self.claim(ABORTED)
    }

    /// 완료 결과 선점
    pub fn claim_finish(&self) -> bool {
        self.claim(FINISHED)
    }

    fn claim(&self, outcome: u8) -> bool {
        self.outcome
            .compare_exchange(OPEN, outcome, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// 선점된 결과
    pub fn claimed(&self) -> Option<Phase> {
        match self.outcome.load(Ordering::SeqCst) {
            FINISHED => Some(Phase::Finished),
            ABORTED => Some(Phase::Aborted),
            _ => None,
        }
    }

    /// 종료 콜백 전달 시작됨 (이후 새 실행 허용)
    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn mtu(&self, mtu: u16) {
        if self.claimed().is_some() || self.mtu_reported.swap(true, Ordering::SeqCst) {
            return;
        }
        self.observer.mtu_determined(mtu);
    }

    /// 선점한 중단 결과 전달
    pub fn deliver_abort(&self, reason: &str) {
        debug_assert!(!reason.is_empty());
        debug_assert_eq!(self.claimed(), Some(Phase::Aborted));

        // 콜백 안에서 새 실행을 시작할 수 있도록 호출 전에 표시
        if self.delivered.swap(true, Ordering::SeqCst) {
            return;
        }
        self.observer.test_aborted(reason);
    }

    /// 선점한 완료 결과 전달 (처리율 먼저)
    pub fn deliver_finish(&self, sample: &ThroughputSample) {
        debug_assert_eq!(self.claimed(), Some(Phase::Finished));

        if self.delivered.swap(true, Ordering::SeqCst) {
            return;
        }
        self.observer.speed_determined(sample.bytes_per_second);
        self.observer.test_finished();
    }

    /// 선점과 전달을 한 번에
    pub fn abort(&self, reason: &str) {
        if self.claim_abort() {
            self.deliver_abort(reason);
        } else {
            debug!("abort not reported, outcome already decided: {}", reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::{ChannelObserver, SessionEvent};
    use std::time::Duration;

    fn sample() -> ThroughputSample {
        ThroughputSample {
            total_bytes: 1000,
            elapsed: Duration::from_secs(2),
            elapsed_secs: 2,
            bytes_per_second: 500,
        }
    }

    #[test]
    fn test_abort_reported_once() {
        let (observer, mut rx) = ChannelObserver::new();
        let reporter = Reporter::new(Arc::new(observer));

        reporter.abort("first");
        reporter.abort("second");
        assert!(!reporter.claim_finish());

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Aborted("first".into()));
        assert!(rx.try_recv().is_err());
        assert!(reporter.is_delivered());
    }

    #[test]
    fn test_finish_blocks_abort_and_mtu() {
        let (observer, mut rx) = ChannelObserver::new();
        let reporter = Reporter::new(Arc::new(observer));

        reporter.mtu(185);
        reporter.mtu(23);
        assert!(reporter.claim_finish());
        assert!(!reporter.is_delivered());
        reporter.abort("late");
        reporter.deliver_finish(&sample());

        let events: Vec<SessionEvent> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(
            events,
            vec![
                SessionEvent::MtuDetermined(185),
                SessionEvent::SpeedDetermined(500),
                SessionEvent::Finished,
            ]
        );
        assert_eq!(reporter.claimed(), Some(Phase::Finished));
    }
}
