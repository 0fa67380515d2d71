//! Nordic UART Service (NUS) definitions.
//!
//! NUS is a simple BLE service that mimics a UART interface:
//!
//! - **Service**: `6E400001-B5A3-F393-E0A9-E50E24DCCA9E`
//! - **RX Characteristic**: `6E400002-B5A3-F393-E0A9-E50E24DCCA9E` (Write)
//!   - Host → Hub (program bytes)
//! - **TX Characteristic**: `6E400003-B5A3-F393-E0A9-E50E24DCCA9E` (Notify)
//!   - Hub → Host (text lines, checksum bytes)

/// NUS service UUID.
pub const NUS_SERVICE_UUID: u128 = 0x6e400001_b5a3_f393_e0a9_e50e24dcca9e;

/// NUS RX characteristic UUID (host writes here).
pub const NUS_RX_CHAR_UUID: u128 = 0x6e400002_b5a3_f393_e0a9_e50e24dcca9e;

/// NUS TX characteristic UUID (host subscribes here).
pub const NUS_TX_CHAR_UUID: u128 = 0x6e400003_b5a3_f393_e0a9_e50e24dcca9e;

/// Largest write accepted by the RX characteristic (default ATT MTU - 3).
pub const MAX_WRITE_SIZE: usize = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_characteristics_share_service_base() {
        let base = NUS_SERVICE_UUID & !(0xffff_u128 << 96);
        assert_eq!(NUS_RX_CHAR_UUID & !(0xffff_u128 << 96), base);
        assert_eq!(NUS_TX_CHAR_UUID & !(0xffff_u128 << 96), base);
        assert_eq!((NUS_RX_CHAR_UUID >> 96) & 0xffff, 0x0002);
        assert_eq!((NUS_TX_CHAR_UUID >> 96) & 0xffff, 0x0003);
    }
}
