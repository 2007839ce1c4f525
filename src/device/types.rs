use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::DeviceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioState {
    Unknown,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

/// Opaque identity of a peripheral as reported by the radio adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralHandle(Arc<str>);

impl PeripheralHandle {
    pub fn new(id: impl Into<String>) -> Self {
        PeripheralHandle(Arc::from(id.into()))
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHandle {
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicRole {
    Control,
    Sensor,
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            CharacteristicRole::Control => "control",
            CharacteristicRole::Sensor => "sensor",
        };

        write!(f, "{}", result)
    }
}

/// A protocol handle slot: either nothing has been discovered yet, or the handle is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding<T> {
    Unbound,
    Bound(T),
}

impl<T> Binding<T> {
    pub fn is_bound(&self) -> bool {
        matches!(self, Binding::Bound(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Binding::Bound(value) => Some(value),
            Binding::Unbound => None,
        }
    }

    pub fn bind(&mut self, value: T) {
        *self = Binding::Bound(value);
    }

    pub fn clear(&mut self) {
        *self = Binding::Unbound;
    }
}

impl<T> Default for Binding<T> {
    fn default() -> Self {
        Binding::Unbound
    }
}

/// Everything the radio adapter reports back, delivered over a single channel.
#[derive(Debug)]
pub enum RadioEvent {
    RadioStateChanged(RadioState),
    AdvertisementSeen {
        peripheral: PeripheralHandle,
        services: Vec<Uuid>,
    },
    Connected(PeripheralHandle),
    Disconnected {
        peripheral: PeripheralHandle,
        error: Option<DeviceError>,
    },
    ServicesFound {
        peripheral: PeripheralHandle,
        services: Vec<ServiceHandle>,
        error: Option<DeviceError>,
    },
    CharacteristicsFound {
        service: ServiceHandle,
        characteristics: Vec<CharacteristicHandle>,
        error: Option<DeviceError>,
    },
    ValueUpdated {
        characteristic: CharacteristicHandle,
        value: Vec<u8>,
    },
    WriteCompleted {
        characteristic: CharacteristicHandle,
        error: Option<DeviceError>,
    },
    NotifyCompleted {
        characteristic: CharacteristicHandle,
        enabled: bool,
        error: Option<DeviceError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    RadioNotReady,
    RadioReady,
    Scanning,
    DeviceFound,
    Connecting,
    Connected,
    ServicesDiscovering,
    ServicesScanned,
    CharacteristicsDiscovering,
    CharacteristicsScanned,
    Disconnected,
}

impl Phase {
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            Phase::Connected
                | Phase::ServicesDiscovering
                | Phase::ServicesScanned
                | Phase::CharacteristicsDiscovering
                | Phase::CharacteristicsScanned
        )
    }

    pub fn services_scanned(&self) -> bool {
        matches!(
            self,
            Phase::ServicesScanned | Phase::CharacteristicsDiscovering | Phase::CharacteristicsScanned
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The adapter operations that can be outstanding while the session waits for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Radio,
    Connect,
    Connection,
    DiscoverServices,
    DiscoverCharacteristics,
    Write,
    Notify,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            Operation::Radio => "radio",
            Operation::Connect => "connect",
            Operation::Connection => "connection",
            Operation::DiscoverServices => "discover services",
            Operation::DiscoverCharacteristics => "discover characteristics",
            Operation::Write => "write",
            Operation::Notify => "notify",
        };

        write!(f, "{}", result)
    }
}

/// An adapter-reported failure or timeout, kept on the snapshot for observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub operation: Operation,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorValue(pub i32);

/// Immutable snapshot published after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub phase: Phase,
    pub radio_state: RadioState,
    pub radio_ready: bool,
    pub device_found: bool,
    pub connected: bool,
    pub services_scanned: bool,
    pub characteristics_scanned: bool,
    pub control_available: bool,
    pub sensor_available: bool,
    pub notify_enabled: bool,
    pub disconnected: bool,
    pub sensor_value: i32,
    pub last_error: Option<SessionFailure>,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            phase: Phase::RadioNotReady,
            radio_state: RadioState::Unknown,
            radio_ready: false,
            device_found: false,
            connected: false,
            services_scanned: false,
            characteristics_scanned: false,
            control_available: false,
            sensor_available: false,
            notify_enabled: false,
            disconnected: false,
            sensor_value: 0,
            last_error: None,
        }
    }
}
