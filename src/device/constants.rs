use uuid::Uuid;

/**
 * How long (milliseconds) a connection attempt may take before it is cancelled.
 */
pub const CONNECT_DEADLINE: u64 = 10000;

/**
 * How long (milliseconds) service or characteristic discovery may take.
 */
pub const DISCOVERY_DEADLINE: u64 = 5000;

/**
 * How long (milliseconds) a write to a characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How long (milliseconds) enabling or disabling notifications may take.
 */
pub const NOTIFY_DEADLINE: u64 = 2000;

pub const LED_ON: i8 = 1;
pub const LED_OFF: i8 = 0;

/**
 * The UUID of the Bluetooth BLE service exposed by the capsense/led board.
 */
pub const CAPSENSE_LED_SERVICE_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805F9B34F0);

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic that switches the led (1 signed byte).
 */
pub const LED_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805F9B34F1);

/**
 * The UUID of the Bluetooth BLE remote GATT characteristic that reports the capsense value.
 */
pub const CAPSENSE_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0x00000000_0000_1000_8000_00805F9B34F2);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuids_share_the_board_base() {
        assert_eq!(CAPSENSE_LED_SERVICE_UUID.to_string(), "00000000-0000-1000-8000-00805f9b34f0");
        assert_eq!(LED_CHARACTERISTIC_UUID.to_string(), "00000000-0000-1000-8000-00805f9b34f1");
        assert_eq!(CAPSENSE_CHARACTERISTIC_UUID.to_string(), "00000000-0000-1000-8000-00805f9b34f2");
    }
}
