//! 프레임 무결성 체크섬
//!
//! - 제어 프레임: CRC-8 (CCITT 계열, I-432-1)
//! - 페이로드 프레임: CRC-16 (CCITT-FALSE / IBM-3740)
//!
//! 바이트 열에 대해서만 동작하는 순수 함수이며 상위 프레임 의미는 모름

use crc::Crc;

const CRC8_ALGO: Crc<u8> = Crc::<u8>::new(&crc::CRC_8_I_432_1);
const CRC16_ALGO: Crc<u16> = Crc::<u16>::new(&crc::CRC_16_IBM_3740);

/// CRC-8 체크섬 계산
pub fn crc8(data: &[u8]) -> u8 {
    CRC8_ALGO.checksum(data)
}

/// CRC-16 체크섬 계산
pub fn crc16(data: &[u8]) -> u16 {
    CRC16_ALGO.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_check_value() {
        // CRC-8/I-432-1 표준 체크 값
        assert_eq!(crc8(b"123456789"), 0xA1);
    }

    #[test]
    fn test_crc16_check_value() {
        // CRC-16/CCITT-FALSE 표준 체크 값
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_different_data_differs() {
        assert_ne!(crc8(b"hello"), crc8(b"hellp"));
        assert_ne!(crc16(b"hello"), crc16(b"hellp"));
    }

    #[test]
    fn test_empty_input() {
        // 빈 입력도 결정적이어야 함
        assert_eq!(crc8(&[]), crc8(&[]));
        assert_eq!(crc16(&[]), crc16(&[]));
    }
}
