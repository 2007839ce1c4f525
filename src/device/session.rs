use log::{debug, info, warn};
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::types::Config;
use crate::device::adapter::RadioAdapter;
use crate::device::codec::{decode_sensor, encode_control};
use crate::device::types::{
    Binding, CharacteristicHandle, CharacteristicRole, Operation, PeripheralHandle, Phase, RadioEvent,
    RadioState, SensorValue, ServiceHandle, SessionFailure, SessionState,
};
use crate::error::{CommandError, DeviceError};

const SENSOR_VALUE_CAPACITY: usize = 64;

/// Commands an observer may issue to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    StartRadio,
    BeginScan,
    Connect,
    DiscoverServices,
    DiscoverCharacteristics,
    WriteControl(i8),
    SetNotify(bool),
    Disconnect,
}

#[derive(Debug, Clone)]
enum Pending {
    Connect,
    DiscoverServices,
    DiscoverCharacteristics,
    Write(CharacteristicHandle),
    Notify {
        characteristic: CharacteristicHandle,
        enabled: bool,
    },
}

impl Pending {
    fn operation(&self) -> Operation {
        match self {
            Pending::Connect => Operation::Connect,
            Pending::DiscoverServices => Operation::DiscoverServices,
            Pending::DiscoverCharacteristics => Operation::DiscoverCharacteristics,
            Pending::Write(_) => Operation::Write,
            Pending::Notify { .. } => Operation::Notify,
        }
    }
}

#[derive(Debug)]
struct PendingOperation {
    pending: Pending,
    deadline: Option<Instant>,
}

fn rejected(err: CommandError) -> CommandError {
    warn!("{}", err);
    err
}

/// The peripheral session controller.
///
/// Owns the lifecycle of one peripheral: radio readiness, scanning, connection, service and
/// characteristic discovery, and the two characteristic roles. Commands either fail immediately
/// or hand an operation to the [`RadioAdapter`]; the outcome arrives later through
/// [`Session::handle_event`]. A fresh [`SessionState`] is published after every transition.
pub struct Session<A: RadioAdapter> {
    adapter: A,
    config: Config,
    phase: Phase,
    radio_state: RadioState,
    peripheral: Binding<PeripheralHandle>,
    service: Binding<ServiceHandle>,
    control: Binding<CharacteristicHandle>,
    sensor: Binding<CharacteristicHandle>,
    notify_enabled: bool,
    // last subscription state the adapter acknowledged
    notify_confirmed: bool,
    sensor_value: i32,
    last_error: Option<SessionFailure>,
    pending: Vec<PendingOperation>,
    // a peripheral whose connect attempt timed out; its late events are dropped
    abandoned: Option<PeripheralHandle>,
    state_sender: watch::Sender<SessionState>,
    value_sender: broadcast::Sender<SensorValue>,
}

impl<A: RadioAdapter> Session<A> {
    pub fn new(adapter: A, config: Config) -> Self {
        let (state_sender, _) = watch::channel(SessionState::default());
        let (value_sender, _) = broadcast::channel(SENSOR_VALUE_CAPACITY);

        Session {
            adapter,
            config,
            phase: Phase::RadioNotReady,
            radio_state: RadioState::Unknown,
            peripheral: Binding::Unbound,
            service: Binding::Unbound,
            control: Binding::Unbound,
            sensor: Binding::Unbound,
            notify_enabled: false,
            notify_confirmed: false,
            sensor_value: 0,
            last_error: None,
            pending: Vec::new(),
            abandoned: None,
            state_sender,
            value_sender,
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.peripheral.get()
    }

    pub fn service(&self) -> Option<&ServiceHandle> {
        self.service.get()
    }

    pub fn characteristic(&self, role: CharacteristicRole) -> Option<&CharacteristicHandle> {
        match role {
            CharacteristicRole::Control => self.control.get(),
            CharacteristicRole::Sensor => self.sensor.get(),
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_sender.subscribe()
    }

    pub fn subscribe_values(&self) -> broadcast::Receiver<SensorValue> {
        self.value_sender.subscribe()
    }

    pub fn value_sender(&self) -> broadcast::Sender<SensorValue> {
        self.value_sender.clone()
    }

    pub fn snapshot(&self) -> SessionState {
        SessionState {
            phase: self.phase,
            radio_state: self.radio_state,
            radio_ready: self.radio_state == RadioState::PoweredOn,
            device_found: self.peripheral.is_bound(),
            connected: self.phase.is_connected(),
            services_scanned: self.phase.services_scanned(),
            characteristics_scanned: self.phase == Phase::CharacteristicsScanned,
            control_available: self.control.is_bound(),
            sensor_available: self.sensor.is_bound(),
            notify_enabled: self.notify_enabled,
            disconnected: self.phase == Phase::Disconnected,
            sensor_value: self.sensor_value,
            last_error: self.last_error.clone(),
        }
    }

    fn publish(&mut self) {
        let snapshot = self.snapshot();
        self.state_sender.send_replace(snapshot);
    }

    fn require_phase(&self, command: &'static str, allowed: &[Phase]) -> Result<(), CommandError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(rejected(CommandError::InvalidPhase { command, phase: self.phase }))
        }
    }

    fn tracked_peripheral(&self) -> Result<PeripheralHandle, CommandError> {
        self.peripheral.get().cloned().ok_or_else(|| rejected(CommandError::NoPeripheral))
    }

    fn target(&self, role: CharacteristicRole) -> Result<(PeripheralHandle, CharacteristicHandle), CommandError> {
        let characteristic = self.characteristic(role)
            .cloned()
            .ok_or_else(|| rejected(CommandError::MissingCharacteristic(role)))?;

        Ok((self.tracked_peripheral()?, characteristic))
    }

    fn is_tracked(&self, peripheral: &PeripheralHandle) -> bool {
        self.peripheral.get() == Some(peripheral)
    }

    fn track(&mut self, pending: Pending) {
        let deadline = self.config.deadline(pending.operation()).map(|timeout| Instant::now() + timeout);
        self.pending.push(PendingOperation { pending, deadline });
    }

    fn complete<F: Fn(&Pending) -> bool>(&mut self, matches: F) -> Option<Pending> {
        let index = self.pending.iter().position(|operation| matches(&operation.pending))?;
        Some(self.pending.remove(index).pending)
    }

    fn notify_pending(&self, characteristic: &CharacteristicHandle) -> bool {
        self.pending.iter().any(|operation| matches!(
            &operation.pending,
            Pending::Notify { characteristic: c, .. } if c == characteristic
        ))
    }

    fn fail(&mut self, operation: Operation, err: &DeviceError) {
        warn!("{} failed: {}", operation, err);
        self.last_error = Some(SessionFailure { operation, message: err.to_string() });
    }

    // clears every protocol handle in one step, so no partially cleared state is ever published
    fn reset(&mut self) {
        self.peripheral.clear();
        self.service.clear();
        self.control.clear();
        self.sensor.clear();
        self.notify_enabled = false;
        self.notify_confirmed = false;
        self.pending.clear();
    }

    /// Earliest deadline among the outstanding adapter operations.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.iter().filter_map(|operation| operation.deadline).min()
    }

    pub fn execute(&mut self, command: SessionCommand) -> Result<(), CommandError> {
        match command {
            SessionCommand::StartRadio => self.start_radio(),
            SessionCommand::BeginScan => self.begin_scan(),
            SessionCommand::Connect => self.connect(),
            SessionCommand::DiscoverServices => self.discover_services(),
            SessionCommand::DiscoverCharacteristics => self.discover_characteristics(),
            SessionCommand::WriteControl(value) => self.write_control(value),
            SessionCommand::SetNotify(enabled) => self.set_notify(enabled),
            SessionCommand::Disconnect => self.disconnect(),
        }
    }

    pub fn start_radio(&mut self) -> Result<(), CommandError> {
        self.require_phase("start radio", &[Phase::RadioNotReady, Phase::RadioReady, Phase::Disconnected])?;

        info!("Starting radio");
        self.adapter.set_ready().map_err(|err| rejected(err.into()))
    }

    pub fn begin_scan(&mut self) -> Result<(), CommandError> {
        if let Some(peripheral) = self.peripheral.get() {
            debug!("Not scanning, already tracking peripheral {}", peripheral);
            return Ok(());
        }
        self.require_phase("scan", &[Phase::RadioReady, Phase::Disconnected])?;

        let service_uuid = self.config.service_uuid;
        self.adapter.scan(service_uuid).map_err(|err| rejected(err.into()))?;

        info!("Scanning for peripherals advertising {}", service_uuid);
        self.phase = Phase::Scanning;
        self.last_error = None;
        self.publish();
        Ok(())
    }

    pub fn connect(&mut self) -> Result<(), CommandError> {
        let peripheral = self.tracked_peripheral()?;
        self.require_phase("connect", &[Phase::DeviceFound])?;

        self.adapter.connect(&peripheral).map_err(|err| rejected(err.into()))?;

        info!("Connecting to peripheral {}", peripheral);
        self.phase = Phase::Connecting;
        self.track(Pending::Connect);
        self.publish();
        Ok(())
    }

    pub fn discover_services(&mut self) -> Result<(), CommandError> {
        let peripheral = self.tracked_peripheral()?;
        self.require_phase("discover services", &[Phase::Connected])?;

        self.adapter.discover_services(&peripheral).map_err(|err| rejected(err.into()))?;

        info!("Discovering services");
        self.phase = Phase::ServicesDiscovering;
        self.track(Pending::DiscoverServices);
        self.publish();
        Ok(())
    }

    pub fn discover_characteristics(&mut self) -> Result<(), CommandError> {
        self.require_phase("discover characteristics", &[Phase::ServicesScanned])?;
        let service = self.service.get().cloned().ok_or_else(|| rejected(CommandError::MissingService))?;
        let peripheral = self.tracked_peripheral()?;

        self.adapter.discover_characteristics(&peripheral, &service).map_err(|err| rejected(err.into()))?;

        info!("Discovering characteristics of service {}", service.uuid);
        self.phase = Phase::CharacteristicsDiscovering;
        self.track(Pending::DiscoverCharacteristics);
        self.publish();
        Ok(())
    }

    pub fn write_control(&mut self, value: i8) -> Result<(), CommandError> {
        let (peripheral, characteristic) = self.target(CharacteristicRole::Control)?;
        let payload = encode_control(value);

        self.adapter.write(&peripheral, &characteristic, &payload)
            .map_err(|err| rejected(err.into()))?;

        info!("Writing {} to control characteristic", value);
        self.track(Pending::Write(characteristic));
        Ok(())
    }

    /// Toggles notifications on the sensor characteristic.
    ///
    /// The published notify flag changes right away. If the adapter reports a failure or does not
    /// answer in time, and no newer toggle is outstanding, the flag falls back to the last state
    /// the adapter acknowledged.
    pub fn set_notify(&mut self, enabled: bool) -> Result<(), CommandError> {
        let (peripheral, characteristic) = self.target(CharacteristicRole::Sensor)?;

        self.adapter.set_notify(&peripheral, &characteristic, enabled)
            .map_err(|err| rejected(err.into()))?;

        info!("Setting sensor notifications to {}", enabled);
        self.notify_enabled = enabled;
        self.track(Pending::Notify { characteristic, enabled });
        self.publish();
        Ok(())
    }

    /// Asks the adapter to drop the connection. State is only cleared once the adapter reports
    /// the disconnection.
    pub fn disconnect(&mut self) -> Result<(), CommandError> {
        let peripheral = self.tracked_peripheral()?;

        self.adapter.cancel_connection(&peripheral).map_err(|err| rejected(err.into()))?;

        info!("Disconnecting from peripheral {}", peripheral);
        Ok(())
    }

    pub fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::RadioStateChanged(state) => self.on_radio_state(state),
            RadioEvent::AdvertisementSeen { peripheral, services } => self.on_advertisement(peripheral, &services),
            RadioEvent::Connected(peripheral) => self.on_connected(&peripheral),
            RadioEvent::Disconnected { peripheral, error } => self.on_disconnected(&peripheral, error),
            RadioEvent::ServicesFound { peripheral, services, error } => {
                self.on_services_discovered(&peripheral, services, error)
            },
            RadioEvent::CharacteristicsFound { service, characteristics, error } => {
                self.on_characteristics_discovered(&service, characteristics, error)
            },
            RadioEvent::ValueUpdated { characteristic, value } => self.on_value_updated(&characteristic, &value),
            RadioEvent::WriteCompleted { characteristic, error } => self.on_write_completed(&characteristic, error),
            RadioEvent::NotifyCompleted { characteristic, enabled, error } => {
                self.on_notify_completed(&characteristic, enabled, error)
            },
        }
    }

    pub fn on_radio_state(&mut self, state: RadioState) {
        self.radio_state = state;

        if state == RadioState::PoweredOn {
            info!("Bluetooth is on");
            if self.phase == Phase::RadioNotReady {
                self.phase = Phase::RadioReady;
            }
        } else {
            warn!("Bluetooth is not available: {:?}", state);
            match state {
                RadioState::Unsupported => self.fail(Operation::Radio, &DeviceError::NoAdapter),
                RadioState::Unauthorized => self.fail(Operation::Radio, &DeviceError::PermissionDenied),
                _ => {},
            }
            self.reset();
            self.phase = Phase::RadioNotReady;
        }

        self.publish();
    }

    /// First match wins: once a peripheral is tracked, further advertisements are dropped.
    pub fn on_advertisement(&mut self, peripheral: PeripheralHandle, services: &[Uuid]) {
        if self.peripheral.is_bound() {
            debug!("Ignoring advertisement from {}, a peripheral is already tracked", peripheral);
            return;
        }

        if self.phase != Phase::Scanning {
            debug!("Ignoring advertisement from {} while {}", peripheral, self.phase);
            return;
        }

        if !services.contains(&self.config.service_uuid) {
            debug!("Ignoring advertisement from {} without the target service", peripheral);
            return;
        }

        info!("Found a peripheral advertising the capsense led service: {}", peripheral);
        if self.abandoned.as_ref() == Some(&peripheral) {
            // found again after a timed out connect, its events belong to this session again
            self.abandoned = None;
        }
        self.peripheral.bind(peripheral);
        if let Err(err) = self.adapter.stop_scan() {
            warn!("Failed to stop scanning: {}", err);
        }

        self.phase = Phase::DeviceFound;
        self.publish();
    }

    pub fn on_connected(&mut self, peripheral: &PeripheralHandle) {
        if self.abandoned.as_ref() == Some(peripheral) {
            debug!("Ignoring late connection of abandoned peripheral {}", peripheral);
            return;
        }

        if !self.is_tracked(peripheral) {
            warn!("Ignoring connection of untracked peripheral {}", peripheral);
            return;
        }

        if self.phase != Phase::Connecting {
            debug!("Ignoring connection event while {}", self.phase);
            return;
        }

        info!("Connection complete {}", peripheral);
        self.complete(|pending| matches!(pending, Pending::Connect));
        self.phase = Phase::Connected;
        self.publish();
    }

    /// Resets the session from whatever state it is in.
    pub fn on_disconnected(&mut self, peripheral: &PeripheralHandle, error: Option<DeviceError>) {
        if self.abandoned.as_ref() == Some(peripheral) {
            debug!("Abandoned peripheral {} is now disconnected", peripheral);
            self.abandoned = None;
            return;
        }

        if let Some(tracked) = self.peripheral.get() {
            if tracked != peripheral {
                warn!("Ignoring disconnection of untracked peripheral {}", peripheral);
                return;
            }
        }

        info!("Disconnected {}", peripheral);
        if let Some(err) = error {
            let operation = if self.phase == Phase::Connecting { Operation::Connect } else { Operation::Connection };
            self.fail(operation, &err);
        }

        self.reset();
        self.phase = Phase::Disconnected;
        self.publish();
    }

    /// The scanned transition always fires; a missing service handle is the failure signal.
    pub fn on_services_discovered(
        &mut self,
        peripheral: &PeripheralHandle,
        services: Vec<ServiceHandle>,
        error: Option<DeviceError>,
    ) {
        if self.phase != Phase::ServicesDiscovering || !self.is_tracked(peripheral) {
            debug!("Ignoring services of {} while {}", peripheral, self.phase);
            return;
        }

        self.complete(|pending| matches!(pending, Pending::DiscoverServices));
        if let Some(err) = error {
            self.fail(Operation::DiscoverServices, &err);
        }

        let service_uuid = self.config.service_uuid;
        match services.into_iter().find(|service| service.uuid == service_uuid) {
            Some(service) => {
                info!("Found service {}", service.uuid);
                self.service.bind(service);
            },
            None => warn!("Service {} not found; reconnect to try again", service_uuid),
        }

        self.phase = Phase::ServicesScanned;
        self.publish();
    }

    pub fn on_characteristics_discovered(
        &mut self,
        service: &ServiceHandle,
        characteristics: Vec<CharacteristicHandle>,
        error: Option<DeviceError>,
    ) {
        if self.phase != Phase::CharacteristicsDiscovering || self.service.get() != Some(service) {
            debug!("Ignoring characteristics of {} while {}", service.uuid, self.phase);
            return;
        }

        self.complete(|pending| matches!(pending, Pending::DiscoverCharacteristics));
        if let Some(err) = error {
            self.fail(Operation::DiscoverCharacteristics, &err);
        }

        for characteristic in characteristics {
            if characteristic.uuid == self.config.control_uuid {
                info!("Found control characteristic {}", characteristic.uuid);
                self.control.bind(characteristic);
            } else if characteristic.uuid == self.config.sensor_uuid {
                info!("Found sensor characteristic {}", characteristic.uuid);
                self.sensor.bind(characteristic);
            } else {
                debug!("Skipping characteristic {}", characteristic.uuid);
            }
        }

        self.phase = Phase::CharacteristicsScanned;
        self.publish();
    }

    pub fn on_value_updated(&mut self, characteristic: &CharacteristicHandle, value: &[u8]) {
        if self.sensor.get() != Some(characteristic) {
            debug!("Ignoring value of characteristic {}", characteristic.uuid);
            return;
        }

        match decode_sensor(value) {
            Ok(decoded) => {
                debug!("Sensor value {}", decoded);
                self.sensor_value = decoded;
                // no receivers is fine, the snapshot still carries the value
                let _ = self.value_sender.send(SensorValue(decoded));
                self.publish();
            },
            Err(err) => warn!("Failed to decode sensor value {:?}: {}", value, err),
        }
    }

    pub fn on_write_completed(&mut self, characteristic: &CharacteristicHandle, error: Option<DeviceError>) {
        let completed = self.complete(|pending| matches!(pending, Pending::Write(c) if c == characteristic));
        if completed.is_none() {
            debug!("Ignoring write completion for {} without a pending write", characteristic.uuid);
            return;
        }

        match error {
            None => debug!("Write to {} complete", characteristic.uuid),
            Some(err) => {
                self.fail(Operation::Write, &err);
                self.publish();
            },
        }
    }

    pub fn on_notify_completed(&mut self, characteristic: &CharacteristicHandle, enabled: bool, error: Option<DeviceError>) {
        let completed = self.complete(|pending| matches!(
            pending,
            Pending::Notify { characteristic: c, enabled: e } if c == characteristic && *e == enabled
        ));

        if completed.is_none() {
            debug!("Ignoring notify completion for {} without a pending request", characteristic.uuid);
            return;
        }

        match error {
            None => {
                debug!("Notifications for {} set to {}", characteristic.uuid, enabled);
                self.notify_confirmed = enabled;
            },
            Some(err) => {
                self.fail(Operation::Notify, &err);
                self.revert_notify(characteristic);
                self.publish();
            },
        }
    }

    fn revert_notify(&mut self, characteristic: &CharacteristicHandle) {
        // a newer request owns the flag
        if !self.notify_pending(characteristic) {
            self.notify_enabled = self.notify_confirmed;
        }
    }

    /// Fails every outstanding operation whose deadline is at or before `now`.
    pub fn expire_pending(&mut self, now: Instant) {
        let (expired, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|operation| operation.deadline.map_or(false, |deadline| deadline <= now));
        self.pending = pending;

        if expired.is_empty() {
            return;
        }

        for operation in expired {
            match operation.pending {
                Pending::Connect => self.expire_connect(),
                Pending::DiscoverServices => {
                    if self.phase == Phase::ServicesDiscovering {
                        self.fail(Operation::DiscoverServices, &DeviceError::TimedOut);
                        self.phase = Phase::ServicesScanned;
                    }
                },
                Pending::DiscoverCharacteristics => {
                    if self.phase == Phase::CharacteristicsDiscovering {
                        self.fail(Operation::DiscoverCharacteristics, &DeviceError::TimedOut);
                        self.phase = Phase::CharacteristicsScanned;
                    }
                },
                Pending::Write(_) => self.fail(Operation::Write, &DeviceError::TimedOut),
                Pending::Notify { characteristic, .. } => {
                    self.fail(Operation::Notify, &DeviceError::TimedOut);
                    self.revert_notify(&characteristic);
                },
            }
        }

        self.publish();
    }

    fn expire_connect(&mut self) {
        if self.phase != Phase::Connecting {
            return;
        }

        self.fail(Operation::Connect, &DeviceError::TimedOut);
        if let Some(peripheral) = self.peripheral.get().cloned() {
            if let Err(err) = self.adapter.cancel_connection(&peripheral) {
                warn!("Failed to cancel connection to {}: {}", peripheral, err);
            }
            self.abandoned = Some(peripheral);
        }

        self.reset();
        self.phase = Phase::Disconnected;
    }
}
