//! 세션 전송 통계

use std::time::Instant;

/// 연결(세션) 단위 전송 통계
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// 송신 프레임 수 (재전송 포함)
    pub frames_sent: u64,

    /// 수신 프레임 수 (전이 테이블에 도달한 프레임 기준)
    pub frames_received: u64,

    /// 재전송 프레임 수
    pub retransmits: u64,

    /// 송신 페이로드 청크 수
    pub chunks_sent: u64,

    /// 애플리케이션으로 전달한 페이로드 청크 수
    pub chunks_delivered: u64,

    /// 송신 페이로드 바이트
    pub bytes_sent: u64,

    /// 수신 페이로드 바이트
    pub bytes_received: u64,

    /// 전이 테이블에 없어 무시한 프레임 수
    pub ignored_frames: u64,

    /// 세션 생성 시각
    pub created_at: Instant,
}

impl Default for SessionStats {
    fn default() -> Self {
        Self {
            frames_sent: 0,
            frames_received: 0,
            retransmits: 0,
            chunks_sent: 0,
            chunks_delivered: 0,
            bytes_sent: 0,
            bytes_received: 0,
            ignored_frames: 0,
            created_at: Instant::now(),
        }
    }
}

impl SessionStats {
    /// 세션 경과 시간 (초)
    pub fn elapsed_secs(&self) -> f64 {
        self.created_at.elapsed().as_secs_f64()
    }
}
