//! BLE 속도 측정 CLI
//!
//! 모의 주변기기를 상대로 스캔 → 연결 → MTU 협상 → 전송 → 처리율 측정을
//! 실행한다. Ctrl-C 로 중단하면 세션 중단 경로를 그대로 탄다.
//!
//! 사용법:
//!   cargo run --release --bin blespeed -- [OPTIONS]
//!
//! 예시:
//!   # 1MB 무작위 페이로드, 주변기기 MTU 185
//!   cargo run --release --bin blespeed -- --size 1048576 --mtu 185
//!
//!   # 파일 전송
//!   cargo run --release --bin blespeed -- --file firmware.bin

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blespeed::transport::mock::{MockBehavior, MockTransport};
use blespeed::{event_channel, payload, ChannelObserver, Config, SessionEvent, TransferSession};

/// CLI 설정
struct CliConfig {
    file_path: Option<PathBuf>,
    payload_size: usize,
    behavior: MockBehavior,
    config: Config,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            file_path: None,
            payload_size: 100 * 1024,
            behavior: MockBehavior {
                write_latency: Duration::from_millis(2),
                ..MockBehavior::default()
            },
            config: Config::default(),
        }
    }
}

fn parse_args() -> CliConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = CliConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--file" | "-f" => {
                if i + 1 < args.len() {
                    config.file_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--size" | "-s" => {
                if i + 1 < args.len() {
                    config.payload_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--mtu" | "-m" => {
                if i + 1 < args.len() {
                    config.behavior.granted_mtu = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--request-mtu" => {
                if i + 1 < args.len() {
                    let mtu: u16 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.config = config.config.with_mtu_request_size(mtu);
                    i += 1;
                }
            }
            "--latency-ms" | "-l" => {
                if i + 1 < args.len() {
                    let ms: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.behavior.write_latency = Duration::from_millis(ms);
                    i += 1;
                }
            }
            "--timeout" | "-t" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.config = config.config.with_scan_timeout(Duration::from_secs(secs));
                    i += 1;
                }
            }
            "--no-server" => {
                config.behavior.peers.clear();
            }
            "--quick" | "-q" => {
                config.config = Config::quick();
            }
            "--help" | "-h" => {
                println!(
                    r#"blespeed - BLE 처리율 측정

모의 주변기기로 스캔/연결/MTU 협상/전송 과정을 실행하고 처리율을 출력

사용법:
  cargo run --release --bin blespeed -- [OPTIONS]

옵션:
  -f, --file <PATH>        전송할 파일 (기본: 무작위 데이터)
  -s, --size <BYTES>       무작위 페이로드 크기 (기본: 102400)
  -m, --mtu <N>            주변기기가 허용하는 MTU (기본: 247)
  --request-mtu <N>        요청할 MTU (기본: 512)
  -l, --latency-ms <MS>    청크당 ACK 지연 (기본: 2)
  -t, --timeout <SECS>     스캔 타임아웃 (기본: 30)
  --no-server              서버 광고 없음 (타임아웃 확인용)
  -q, --quick              짧은 타임아웃/재시도 설정
  -h, --help               이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (기본: info)
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = parse_args();

    let data = match &cli.file_path {
        Some(path) => payload::load(path)?,
        None => {
            info!("Using random test data ({} bytes)", cli.payload_size);
            payload::random(cli.payload_size)?
        }
    };

    info!("blespeed starting...");
    info!("Peripheral MTU: {} bytes", cli.behavior.granted_mtu);

    let (sink, stream) = event_channel();
    let transport = Arc::new(MockTransport::new(cli.behavior, sink)?);
    let (observer, mut events) = ChannelObserver::new();

    let session = TransferSession::new(cli.config, transport.clone(), stream, Arc::new(observer), data)?;
    info!("Payload: {} bytes", session.payload_len());
    info!("Requested MTU: {} bytes", session.config().mtu_request_size);
    info!("Scan timeout: {:?}", session.config().scan_timeout);
    session.start_session();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match &event {
                    SessionEvent::MtuDetermined(mtu) => info!("MTU determined: {} bytes", mtu),
                    SessionEvent::SpeedDetermined(bps) => {
                        info!("Speed determined: {} B/s ({:.2} kB/s)", bps, *bps as f64 / 1000.0)
                    }
                    SessionEvent::Aborted(reason) => warn!("Test aborted: {}", reason),
                    SessionEvent::Finished => info!("Test finished"),
                }
                if event.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, aborting...");
                session.abort_session();
            }
        }
    }

    info!("{}", session.stats().summary());
    info!(
        "Peripheral received {} bytes (crc32={:08X})",
        transport.received_bytes(),
        transport.received_crc()
    );

    Ok(())
}
