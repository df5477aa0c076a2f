//! 세션 상태 정의

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::chunk::ChunkQueue;
use crate::transport::PeerHandle;

/// 세션 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Idle,
    Scanning,
    Connecting,
    Ready,
    Streaming,
    Finished,
    Aborted,
}

impl Phase {
    /// 종료 상태 여부
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished | Phase::Aborted)
    }
}

/// 스캔 도메인 상태 (스캔 락으로 보호)
#[derive(Debug)]
pub(crate) enum ScanState {
    /// 아직 스캔 전
    Idle,

    /// 스캔 중, 타임아웃 타이머 보유
    Scanning { timeout: JoinHandle<()> },

    /// 스캔 종료 (발견/타임아웃/실패/중단)
    Concluded,
}

/// 연결 도메인 상태 (연결 락으로 보호)
///
/// 연결 중과 연결됨은 별개 variant 라서 동시에 참일 수 없다.
#[derive(Debug)]
pub(crate) enum LinkState {
    Idle,
    Connecting {
        peer: PeerHandle,
    },
    Connected {
        peer: PeerHandle,
        /// MTU 협상 후 채워짐
        transfer: Option<Transfer>,
    },
    /// 해제됨 (다시 열리지 않음)
    Closed,
}

/// 스트리밍 중인 전송
#[derive(Debug)]
pub(crate) struct Transfer {
    pub queue: ChunkQueue,
    pub started_at: Instant,
}
