//! 세션 ID 레지스트리
//!
//! 한 스테이션에서 동시 활성 연결끼리 세션 ID(1~255)를 공유하지 않도록 보장.
//! ID는 예측 불가능하게 선택해 인접 스테이션 간 충돌 확률을 낮춤 (보안 목적 아님)

use std::collections::HashSet;

use parking_lot::Mutex;
use rand::Rng;
use tracing::warn;

use crate::{Error, Result, MAX_SESSIONS};

/// 활성 세션 ID 풀
#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<HashSet<u8>>,
}

impl SessionRegistry {
    /// 새 레지스트리 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 미사용 세션 ID 할당 (1~255, 무작위)
    ///
    /// 255개가 모두 사용 중이면 `SessionIdExhausted`
    pub fn allocate(&self) -> Result<u8> {
        let mut active = self.active.lock();
        if active.len() >= MAX_SESSIONS {
            return Err(Error::SessionIdExhausted);
        }

        let mut rng = rand::thread_rng();
        loop {
            let id: u8 = rng.gen_range(1..=255);
            if active.insert(id) {
                return Ok(id);
            }
        }
    }

    /// 상대방이 고른 세션 ID 등록 (IRS측 CONNECT 수신 시)
    pub fn adopt(&self, id: u8) -> Result<()> {
        if id == 0 {
            return Err(Error::SessionNotFound { session_id: 0 });
        }

        let mut active = self.active.lock();
        if active.insert(id) {
            Ok(())
        } else {
            Err(Error::SessionAlreadyActive { session_id: id })
        }
    }

    /// 세션 ID 반환
    ///
    /// 터미널 상태에 도달한 연결마다 정확히 한 번 호출되어야 함.
    /// 미등록 ID 반환은 호출측 계약 위반
    pub fn release(&self, id: u8) {
        let removed = self.active.lock().remove(&id);
        debug_assert!(removed, "미등록 세션 ID 반환: {}", id);
        if !removed {
            warn!("미등록 세션 ID 반환 시도: id={}", id);
        }
    }

    /// ID 사용 중 여부
    pub fn in_use(&self, id: u8) -> bool {
        self.active.lock().contains(&id)
    }

    /// 활성 세션 수
    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    /// 활성 세션 존재 여부
    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_unique_ids() {
        let registry = SessionRegistry::new();
        let a = registry.allocate().unwrap();
        let b = registry.allocate().unwrap();

        assert_ne!(a, b);
        assert!(registry.in_use(a));
        assert!(registry.in_use(b));
    }

    #[test]
    fn test_exhaustion_and_release() {
        let registry = SessionRegistry::new();
        let mut ids = Vec::new();
        for _ in 0..255 {
            ids.push(registry.allocate().unwrap());
        }

        // 256번째 할당은 실패
        assert!(matches!(
            registry.allocate(),
            Err(Error::SessionIdExhausted)
        ));

        // 하나 반환하면 정확히 한 번 더 할당 가능
        registry.release(ids[0]);
        let reused = registry.allocate().unwrap();
        assert_eq!(reused, ids[0]);
        assert!(matches!(
            registry.allocate(),
            Err(Error::SessionIdExhausted)
        ));
    }

    #[test]
    fn test_adopt_conflict() {
        let registry = SessionRegistry::new();
        registry.adopt(42).unwrap();
        assert!(matches!(
            registry.adopt(42),
            Err(Error::SessionAlreadyActive { session_id: 42 })
        ));
        assert!(registry.adopt(0).is_err());
    }
}
