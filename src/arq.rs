//! 재시도/타임아웃 엔진
//!
//! 프로토콜 지식 없는 재사용 프리미티브:
//! - **능동 대기** (`send_with_retry`): ISS측. 전송 후 응답을 기다리고
//!   타임아웃마다 재전송, 예산 소진 시 `Exhausted`
//! - **수동 대기** (`send_and_hold`): IRS측. 한 번만 전송하고 세션 상한
//!   타임아웃까지 대기, 절대 재전송하지 않음
//!
//! 재전송 책임은 교환을 진행시키는 쪽(ISS)에만 있음

use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::modem::{Modem, TxMode};

/// 프레임 수신 신호 슬롯
///
/// 재시도 사이클마다 `arm()`으로 새 핸들을 만들고 나서 전송해야 함.
/// 이전 사이클의 낡은 신호가 현재 사이클의 응답으로 오인되는
/// check-then-act 레이스를 핸들 교체로 차단함
#[derive(Debug, Default)]
pub struct AckSignal {
    slot: Mutex<Option<oneshot::Sender<()>>>,
}

impl AckSignal {
    /// 새 신호 슬롯 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 일회성 핸들 장전. 기존 핸들은 무효화됨
    pub fn arm(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.slot.lock() = Some(tx);
        rx
    }

    /// 대기 중인 핸들에 수신 신호 전달. 장전된 핸들이 없으면 no-op
    pub fn notify(&self) {
        if let Some(tx) = self.slot.lock().take() {
            let _ = tx.send(());
        }
    }
}

/// 재시도 수행 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqOutcome {
    /// 응답 수신. `attempts`는 수행한 전송 횟수 (1이면 재전송 없음)
    Acked { attempts: u32 },

    /// 재시도 예산 소진. 호출측이 연결을 FAILED로 이행시켜야 함
    Exhausted,

    /// 더 새로운 대기 사이클이 핸들을 교체함. 실패 아님
    Superseded,
}

/// 버스트 전송 후 응답 대기, 타임아웃 시 재전송 (능동 대기)
///
/// `retries = N`이고 응답이 전혀 없으면 정확히 N번 전송하고 `Exhausted`
pub async fn send_with_retry(
    modem: &dyn Modem,
    signal: &AckSignal,
    burst: &[Bytes],
    mode: TxMode,
    timeout: Duration,
    retries: u32,
) -> ArqOutcome {
    for attempt in 1..=retries {
        // 전송 전에 반드시 새 핸들 장전 (stale signal 방지)
        let rx = signal.arm();

        for frame in burst {
            modem.transmit(mode, frame.clone());
        }

        debug!("응답 대기: attempt={}/{}, timeout={:?}", attempt, retries, timeout);
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => return ArqOutcome::Acked { attempts: attempt },
            Ok(Err(_)) => {
                // 더 새로운 사이클이 핸들을 교체함 — 이 사이클은 물러남
                debug!("수신 신호 핸들이 교체됨, 대기 중단");
                return ArqOutcome::Superseded;
            }
            Err(_) => {
                debug!("타임아웃: attempt={}/{}", attempt, retries);
            }
        }
    }

    ArqOutcome::Exhausted
}

/// 한 번만 전송하고 세션 상한 타임아웃까지 대기 (수동 대기)
pub async fn send_and_hold(
    modem: &dyn Modem,
    signal: &AckSignal,
    frame: Bytes,
    mode: TxMode,
    hold: Duration,
) -> ArqOutcome {
    let rx = signal.arm();
    modem.transmit(mode, frame);

    match tokio::time::timeout(hold, rx).await {
        Ok(Ok(())) => ArqOutcome::Acked { attempts: 1 },
        // 다음 응답 전송이 새 hold를 시작하면 이전 hold는 조용히 물러남
        Ok(Err(_)) => ArqOutcome::Superseded,
        Err(_) => ArqOutcome::Exhausted,
    }
}
