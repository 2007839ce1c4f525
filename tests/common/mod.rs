#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use uuid::Uuid;

use capsense_central::config::types::Config;
use capsense_central::device::adapter::RadioAdapter;
use capsense_central::device::constants::{
    CAPSENSE_CHARACTERISTIC_UUID, CAPSENSE_LED_SERVICE_UUID, LED_CHARACTERISTIC_UUID,
};
use capsense_central::device::session::Session;
use capsense_central::device::types::{
    CharacteristicHandle, PeripheralHandle, RadioState, ServiceHandle,
};
use capsense_central::error::DeviceError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    SetReady,
    Scan(Uuid),
    StopScan,
    Connect(PeripheralHandle),
    CancelConnection(PeripheralHandle),
    DiscoverServices(PeripheralHandle),
    DiscoverCharacteristics(PeripheralHandle, ServiceHandle),
    Write(CharacteristicHandle, Vec<u8>),
    SetNotify(CharacteristicHandle, bool),
}

/// Records every command it receives; never produces events on its own.
#[derive(Clone, Default)]
pub struct RecordingRadio {
    calls: Arc<Mutex<Vec<RadioCall>>>,
    refuse: Arc<Mutex<bool>>,
}

impl RecordingRadio {
    pub fn calls(&self) -> Vec<RadioCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &RadioCall) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == call).count()
    }

    pub fn refuse_commands(&self, refuse: bool) {
        *self.refuse.lock().unwrap() = refuse;
    }

    fn record(&mut self, call: RadioCall) -> Result<(), DeviceError> {
        if *self.refuse.lock().unwrap() {
            return Err(DeviceError::NoAdapter);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl RadioAdapter for RecordingRadio {
    fn set_ready(&mut self) -> Result<(), DeviceError> {
        self.record(RadioCall::SetReady)
    }

    fn scan(&mut self, service_filter: Uuid) -> Result<(), DeviceError> {
        self.record(RadioCall::Scan(service_filter))
    }

    fn stop_scan(&mut self) -> Result<(), DeviceError> {
        self.record(RadioCall::StopScan)
    }

    fn connect(&mut self, peripheral: &PeripheralHandle) -> Result<(), DeviceError> {
        self.record(RadioCall::Connect(peripheral.clone()))
    }

    fn cancel_connection(&mut self, peripheral: &PeripheralHandle) -> Result<(), DeviceError> {
        self.record(RadioCall::CancelConnection(peripheral.clone()))
    }

    fn discover_services(&mut self, peripheral: &PeripheralHandle) -> Result<(), DeviceError> {
        self.record(RadioCall::DiscoverServices(peripheral.clone()))
    }

    fn discover_characteristics(&mut self, peripheral: &PeripheralHandle, service: &ServiceHandle) -> Result<(), DeviceError> {
        self.record(RadioCall::DiscoverCharacteristics(peripheral.clone(), service.clone()))
    }

    fn write(
        &mut self,
        _peripheral: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), DeviceError> {
        self.record(RadioCall::Write(characteristic.clone(), value.to_vec()))
    }

    fn set_notify(&mut self, _peripheral: &PeripheralHandle, characteristic: &CharacteristicHandle, enabled: bool) -> Result<(), DeviceError> {
        self.record(RadioCall::SetNotify(characteristic.clone(), enabled))
    }
}

pub fn board() -> PeripheralHandle {
    PeripheralHandle::new("capsense-board")
}

pub fn target_service() -> ServiceHandle {
    ServiceHandle { uuid: CAPSENSE_LED_SERVICE_UUID }
}

pub fn control() -> CharacteristicHandle {
    CharacteristicHandle { uuid: LED_CHARACTERISTIC_UUID, service_uuid: CAPSENSE_LED_SERVICE_UUID }
}

pub fn sensor() -> CharacteristicHandle {
    CharacteristicHandle { uuid: CAPSENSE_CHARACTERISTIC_UUID, service_uuid: CAPSENSE_LED_SERVICE_UUID }
}

pub fn new_session() -> (Session<RecordingRadio>, RecordingRadio) {
    let radio = RecordingRadio::default();
    (Session::new(radio.clone(), Config::default()), radio)
}

pub fn ready(session: &mut Session<RecordingRadio>) {
    session.start_radio().unwrap();
    session.on_radio_state(RadioState::PoweredOn);
}

pub fn found(session: &mut Session<RecordingRadio>) {
    ready(session);
    session.begin_scan().unwrap();
    session.on_advertisement(board(), &[CAPSENSE_LED_SERVICE_UUID]);
}

pub fn connected(session: &mut Session<RecordingRadio>) {
    found(session);
    session.connect().unwrap();
    session.on_connected(&board());
}

pub fn services_scanned(session: &mut Session<RecordingRadio>) {
    connected(session);
    session.discover_services().unwrap();
    session.on_services_discovered(&board(), vec![target_service()], None);
}

pub fn characteristics_scanned(session: &mut Session<RecordingRadio>, characteristics: Vec<CharacteristicHandle>) {
    services_scanned(session);
    session.discover_characteristics().unwrap();
    session.on_characteristics_discovered(&target_service(), characteristics, None);
}
