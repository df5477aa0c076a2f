//! 전송 통계 및 처리율 계산

use std::time::Duration;

use tokio::time::Instant;

/// 처리율 샘플 (전송 완료 시 한 번 계산)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThroughputSample {
    /// 전송한 전체 바이트
    pub total_bytes: u64,

    /// 실제 경과 시간
    pub elapsed: Duration,

    /// 계산에 사용된 경과 초 (최소 1초)
    pub elapsed_secs: u64,

    /// 바이트/초 (정수 절삭)
    pub bytes_per_second: u64,
}

impl ThroughputSample {
    /// 시작 시점부터 `finished_at` 까지의 처리율
    ///
    /// 경과 시간은 초 단위로 절삭된다. 같은 초 안에 끝난 전송은 0으로 나누지
    /// 않도록 1초로 본다.
    pub fn measure(total_bytes: u64, started_at: Instant, finished_at: Instant) -> Self {
        let elapsed = finished_at.saturating_duration_since(started_at);
        let elapsed_secs = elapsed.as_secs().max(1);

        Self {
            total_bytes,
            elapsed,
            elapsed_secs,
            bytes_per_second: total_bytes / elapsed_secs,
        }
    }
}

/// 세션 전송 통계
#[derive(Debug, Clone, Default)]
pub struct TransferStats {
    /// 협상된 MTU
    pub negotiated_mtu: Option<u16>,

    /// 전송할 전체 바이트
    pub total_bytes: u64,

    /// 전체 청크 수
    pub total_chunks: u64,

    /// ACK 받은 청크 수
    pub acked_chunks: u64,

    /// ACK 받은 바이트
    pub acked_bytes: u64,

    /// 스트리밍 시작 시간
    pub started_at: Option<Instant>,

    /// 완료 시 처리율
    pub throughput: Option<ThroughputSample>,

    /// 수신한 알림 수
    pub notifications: u64,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 스트리밍 시작 기록
    pub fn begin_stream(&mut self, total_bytes: u64, total_chunks: u64, now: Instant) {
        self.total_bytes = total_bytes;
        self.total_chunks = total_chunks;
        self.acked_chunks = 0;
        self.acked_bytes = 0;
        self.started_at = Some(now);
    }

    /// 청크 ACK 기록
    pub fn record_ack(&mut self, size: usize) {
        self.acked_chunks += 1;
        self.acked_bytes += size as u64;
    }

    /// 진행률 (0.0 ~ 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.throughput.is_some() { 1.0 } else { 0.0 };
        }
        self.acked_bytes as f64 / self.total_bytes as f64
    }

    /// 스트리밍 경과 시간
    pub fn elapsed(&self) -> Duration {
        match (self.started_at, self.throughput) {
            (_, Some(sample)) => sample.elapsed,
            (Some(started), None) => started.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        let mtu = self
            .negotiated_mtu
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".into());
        let speed = self
            .throughput
            .map(|s| format!("{} B/s", s.bytes_per_second))
            .unwrap_or_else(|| "-".into());

        format!(
            "MTU: {} | Chunks: {}/{} | Bytes: {}/{} | Elapsed: {:.2}s | Throughput: {} | Notifications: {}",
            mtu,
            self.acked_chunks,
            self.total_chunks,
            self.acked_bytes,
            self.total_bytes,
            self.elapsed().as_secs_f64(),
            speed,
            self.notifications,
        )
    }
}
