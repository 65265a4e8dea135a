//! RSL 루프백 데모 - Radio Session Layer
//!
//! 모뎀 대신 인프로세스 채널로 두 스테이션을 연결해
//! 세션 수립 → 청크 전송 → 정상 종료 전 과정을 시연함.
//! `--loss`로 프레임 유실을 흉내 내면 ARQ 재전송이 동작하는 것을 볼 수 있음
//!
//! 사용법:
//!   cargo run --bin rsl-loopback -- [OPTIONS]
//!
//! 예시:
//!   # 기본 전송 (5청크, 무손실)
//!   cargo run --bin rsl-loopback
//!
//!   # 청크 20개, 프레임 30% 유실
//!   cargo run --bin rsl-loopback -- --chunks 20 --loss 0.3

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use rsl::{Config, ConnectionEvent, Endpoint, Modem, TxMode};

/// 데모 설정
struct DemoConfig {
    chunks: usize,
    chunk_size: usize,
    loss: f64,
    config: Config,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            chunks: 5,
            chunk_size: 64,
            loss: 0.0,
            config: Config::local_loop(),
        }
    }
}

fn parse_args() -> DemoConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DemoConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--chunks" | "-c" => {
                if i + 1 < args.len() {
                    config.chunks = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--chunk-size" => {
                if i + 1 < args.len() {
                    config.chunk_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--loss" | "-l" => {
                if i + 1 < args.len() {
                    config.loss = args[i + 1].parse().expect("0.0~1.0 사이 값 필요");
                    i += 1;
                }
            }
            "--retries" => {
                if i + 1 < args.len() {
                    config.config.data_retries = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"RSL Loopback - Radio Session Layer 루프백 데모

두 스테이션을 인프로세스 채널로 연결해 세션 전 과정을 시연

사용법:
  cargo run --bin rsl-loopback -- [OPTIONS]

옵션:
  -c, --chunks <N>        전송할 청크 수 (기본: 5)
  --chunk-size <SIZE>     청크 크기 바이트 (기본: 64)
  -l, --loss <RATIO>      프레임 유실 확률 0.0~1.0 (기본: 0.0)
  --retries <N>           데이터 재시도 예산 (기본: 5)
  -h, --help              이 도움말 출력

예시:
  # 기본 전송
  cargo run --bin rsl-loopback

  # 불안정 채널 흉내 (30% 유실)
  cargo run --bin rsl-loopback -- --chunks 20 --loss 0.3
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

/// 유실 채널 모뎀: 전송 프레임을 확률적으로 버리고 나머지는 상대측에 전달
struct LossyChannelModem {
    tx: mpsc::UnboundedSender<Bytes>,
    loss: f64,
}

impl Modem for LossyChannelModem {
    fn transmit(&self, mode: TxMode, frame: Bytes) {
        if self.loss > 0.0 && rand::thread_rng().gen_bool(self.loss) {
            debug!("프레임 유실됨: mode={:?}, {} bytes", mode, frame.len());
            return;
        }
        let _ = self.tx.send(frame);
    }
}

// current_thread 런타임: open/enqueue가 첫 await 전에 끝나야
// CONNECT_ACK 도착 시점에 송신 큐가 채워져 있음
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let demo = parse_args();

    info!("RSL Loopback starting...");
    info!("Chunks: {} x {} bytes", demo.chunks, demo.chunk_size);
    info!("Frame loss: {:.0}%", demo.loss * 100.0);

    let (a_tx, mut a_out) = mpsc::unbounded_channel();
    let (b_tx, mut b_out) = mpsc::unbounded_channel();

    let (endpoint_a, _incoming_a) = Endpoint::new(
        demo.config.clone(),
        "DN1AAA-1",
        Arc::new(LossyChannelModem {
            tx: a_tx,
            loss: demo.loss,
        }),
    );
    let (endpoint_b, mut incoming_b) = Endpoint::new(
        demo.config.clone(),
        "DN2BBB-3",
        Arc::new(LossyChannelModem {
            tx: b_tx,
            loss: demo.loss,
        }),
    );
    let endpoint_a = Arc::new(endpoint_a);
    let endpoint_b = Arc::new(endpoint_b);

    // 양방향 펌프: 각 스테이션이 송신한 프레임을 상대측 수신 경로에 주입
    tokio::spawn({
        let endpoint_b = endpoint_b.clone();
        async move {
            while let Some(frame) = a_out.recv().await {
                endpoint_b.deliver(&frame);
            }
        }
    });
    tokio::spawn({
        let endpoint_a = endpoint_a.clone();
        async move {
            while let Some(frame) = b_out.recv().await {
                endpoint_a.deliver(&frame);
            }
        }
    });

    // A측: 연결 개시 + 청크 적재 (첫 await 전에 완료)
    let (conn_a, mut events_a) = endpoint_a.open("DN2BBB-3")?;
    for n in 0..demo.chunks {
        let chunk = vec![(n % 256) as u8; demo.chunk_size];
        conn_a.enqueue(Bytes::from(chunk))?;
    }
    info!("Session {} opened, {} chunks queued", conn_a.session_id(), demo.chunks);

    // B측: 수신 연결 이벤트 소비
    let receiver = tokio::spawn(async move {
        let Some((conn_b, mut events_b)) = incoming_b.recv().await else {
            return;
        };
        let mut received = 0usize;
        while let Some(event) = events_b.recv().await {
            match event {
                ConnectionEvent::Connected => {
                    info!("[B] Session {} connected", conn_b.session_id());
                }
                ConnectionEvent::DataReceived(chunk) => {
                    received += 1;
                    info!("[B] Chunk {} received ({} bytes)", received, chunk.len());
                }
                ConnectionEvent::Disconnected => {
                    info!("[B] Session closed, {} chunks total", received);
                    break;
                }
                ConnectionEvent::Failed(reason) => {
                    warn!("[B] Session failed: {:?}", reason);
                    break;
                }
            }
        }
    });

    // A측 이벤트 루프
    while let Some(event) = events_a.recv().await {
        match event {
            ConnectionEvent::Connected => info!("[A] Connected"),
            ConnectionEvent::DataReceived(_) => {}
            ConnectionEvent::Disconnected => {
                info!("[A] Session closed");
                break;
            }
            ConnectionEvent::Failed(reason) => {
                warn!("[A] Session failed: {:?}", reason);
                break;
            }
        }
    }

    let _ = tokio::time::timeout(Duration::from_secs(1), receiver).await;

    let stats = conn_a.stats();
    info!("Transfer stats:");
    info!("  Chunks sent: {}", stats.chunks_sent);
    info!("  Bytes sent: {}", stats.bytes_sent);
    info!("  Frames sent: {}", stats.frames_sent);
    info!("  Retransmits: {}", stats.retransmits);
    info!("  Elapsed: {:.2}s", stats.elapsed_secs());

    Ok(())
}
