use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::{
    CAPSENSE_CHARACTERISTIC_UUID, CAPSENSE_LED_SERVICE_UUID, CONNECT_DEADLINE, DISCOVERY_DEADLINE,
    LED_CHARACTERISTIC_UUID, NOTIFY_DEADLINE, WRITE_DEADLINE,
};
use crate::device::types::Operation;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub service_uuid: Uuid,
    pub control_uuid: Uuid,
    pub sensor_uuid: Uuid,
    // deadlines in milliseconds, 0 disables the deadline
    pub connect_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub notify_timeout_ms: u64,
}

impl Config {
    pub fn deadline(&self, operation: Operation) -> Option<Duration> {
        let millis = match operation {
            Operation::Radio | Operation::Connection => 0,
            Operation::Connect => self.connect_timeout_ms,
            Operation::DiscoverServices | Operation::DiscoverCharacteristics => self.discovery_timeout_ms,
            Operation::Write => self.write_timeout_ms,
            Operation::Notify => self.notify_timeout_ms,
        };

        if millis == 0 {
            None
        } else {
            Some(Duration::from_millis(millis))
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_uuid: CAPSENSE_LED_SERVICE_UUID,
            control_uuid: LED_CHARACTERISTIC_UUID,
            sensor_uuid: CAPSENSE_CHARACTERISTIC_UUID,
            connect_timeout_ms: CONNECT_DEADLINE,
            discovery_timeout_ms: DISCOVERY_DEADLINE,
            write_timeout_ms: WRITE_DEADLINE,
            notify_timeout_ms: NOTIFY_DEADLINE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: Config = serde_json::from_str(r#"{ "writeTimeoutMs": 500 }"#).unwrap();

        assert_eq!(config.write_timeout_ms, 500);
        assert_eq!(config.service_uuid, CAPSENSE_LED_SERVICE_UUID);
        assert_eq!(config.connect_timeout_ms, CONNECT_DEADLINE);
    }

    #[test]
    fn uuids_use_hyphenated_strings() {
        let json = serde_json::to_value(Config::default()).unwrap();

        assert_eq!(json["controlUuid"], "00000000-0000-1000-8000-00805f9b34f1");
    }

    #[test]
    fn zero_disables_a_deadline() {
        let config = Config { discovery_timeout_ms: 0, ..Config::default() };

        assert_eq!(config.deadline(Operation::DiscoverServices), None);
        assert_eq!(config.deadline(Operation::Write), Some(Duration::from_millis(WRITE_DEADLINE)));
        assert_eq!(config.deadline(Operation::Radio), None);
    }
}
