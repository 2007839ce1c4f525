use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use btleplug::api::{Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::{SinkExt, Stream, StreamExt};
use log::{debug, info, warn};
use tokio::spawn;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::adapter::RadioAdapter;
use crate::device::types::{
    CharacteristicHandle, PeripheralHandle, RadioEvent, RadioState, ServiceHandle,
};
use crate::error::DeviceError;

const EVENT_CAPACITY: usize = 128;

#[derive(Default)]
struct Shared {
    manager: Option<Manager>,
    adapter: Option<Adapter>,
    // set while scanning
    service_filter: Option<Uuid>,
    peripherals: HashMap<PeripheralHandle, Peripheral>,
    // peripherals whose disconnection should be reported from the central event stream
    connected: HashSet<PeripheralHandle>,
    // outstanding connect attempts, cancelled by cancel_connection
    connecting: HashMap<PeripheralHandle, CancellationToken>,
    event_pump: Option<CancellationToken>,
    notification_pump: Option<CancellationToken>,
}

type SharedState = Arc<Mutex<Shared>>;

fn lock(shared: &SharedState) -> std::sync::MutexGuard<'_, Shared> {
    shared.lock().expect("Failed to lock BtleRadio state")
}

fn peripheral_handle(id: &PeripheralId) -> PeripheralHandle {
    PeripheralHandle::new(format!("{:?}", id))
}

fn radio_state(state: CentralState) -> RadioState {
    match state {
        CentralState::PoweredOn => RadioState::PoweredOn,
        CentralState::PoweredOff => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}

// drops every connection the adapter knew about; the radio went away underneath them
fn forget_connections(shared: &SharedState) {
    let mut shared = lock(shared);
    if let Some(pump) = shared.notification_pump.take() {
        pump.cancel();
    }
    for (_, attempt) in shared.connecting.drain() {
        attempt.cancel();
    }
    shared.connected.clear();
    shared.service_filter = None;
}

async fn release(peripheral: &Peripheral, handle: &PeripheralHandle) {
    if let Ok(true) = peripheral.is_connected().await {
        debug!("Dropping link of cancelled connect attempt {}", handle);
        if let Err(err) = peripheral.disconnect().await {
            warn!("Failed to disconnect {}: {}", handle, err);
        }
    }
}

async fn report(mut events: Sender<RadioEvent>, event: RadioEvent) {
    if let Err(err) = events.send(event).await {
        debug!("Radio event dropped, session is gone: {}", err);
    }
}

/// [`RadioAdapter`] backed by the host's bluetooth stack through btleplug.
///
/// Uses the first adapter reported by the platform. Every command runs in its own task and
/// reports back on the event channel returned by [`BtleRadio::new`].
pub struct BtleRadio {
    cancel: CancellationToken,
    events: Sender<RadioEvent>,
    shared: SharedState,
}

impl BtleRadio {
    pub fn new(cancel: CancellationToken) -> (Self, Receiver<RadioEvent>) {
        let (events, receiver) = channel::<RadioEvent>(EVENT_CAPACITY);
        let radio = BtleRadio {
            cancel,
            events,
            shared: Arc::new(Mutex::new(Shared::default())),
        };

        (radio, receiver)
    }

    fn adapter(&self) -> Result<Adapter, DeviceError> {
        lock(&self.shared).adapter.clone().ok_or(DeviceError::NoAdapter)
    }

    fn peripheral(&self, handle: &PeripheralHandle) -> Result<Peripheral, DeviceError> {
        lock(&self.shared).peripherals
            .get(handle)
            .cloned()
            .ok_or_else(|| DeviceError::UnknownPeripheral(handle.to_string()))
    }

    fn stop_notification_pump(&self) {
        if let Some(pump) = lock(&self.shared).notification_pump.take() {
            pump.cancel();
        }
    }
}

async fn initialize(shared: SharedState, events: Sender<RadioEvent>, cancel: CancellationToken) -> Result<(), DeviceError> {
    let manager = Manager::new().await?;
    let adapter = manager.adapters().await?
        .into_iter()
        .next()
        .ok_or(DeviceError::NoAdapter)?;

    info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));
    let central_events = adapter.events().await?;
    let pump_cancel = cancel.child_token();

    {
        let mut shared = lock(&shared);
        if let Some(previous) = shared.event_pump.replace(pump_cancel.clone()) {
            previous.cancel();
        }
        shared.manager = Some(manager);
        shared.adapter = Some(adapter.clone());
    }

    spawn(central_event_pump(pump_cancel, adapter, central_events, shared, events));
    Ok(())
}

async fn central_event_pump(
    cancel: CancellationToken,
    adapter: Adapter,
    mut central_events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    shared: SharedState,
    events: Sender<RadioEvent>,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = central_events.next() => match event {
                None => break 'mainloop,
                Some(CentralEvent::DeviceDiscovered(id))
                | Some(CentralEvent::DeviceUpdated(id))
                | Some(CentralEvent::ServicesAdvertisement { id, .. }) => {
                    if let Some(event) = advertisement(&adapter, &shared, &id).await {
                        report(events.clone(), event).await;
                    }
                },
                Some(CentralEvent::DeviceDisconnected(id)) => {
                    let handle = peripheral_handle(&id);
                    let was_connected = {
                        let mut shared = lock(&shared);
                        if let Some(pump) = shared.notification_pump.take() {
                            pump.cancel();
                        }
                        shared.connected.remove(&handle)
                    };

                    if was_connected {
                        warn!("Connection lost {}", handle);
                        report(events.clone(), RadioEvent::Disconnected { peripheral: handle, error: None }).await;
                    }
                },
                Some(CentralEvent::StateUpdate(state)) => {
                    let state = radio_state(state);
                    if state != RadioState::PoweredOn {
                        forget_connections(&shared);
                    }
                    report(events.clone(), RadioEvent::RadioStateChanged(state)).await;
                },
                Some(_) => {},
            }
        }
    }

    debug!("Central event pump stopped");
}

async fn advertisement(adapter: &Adapter, shared: &SharedState, id: &PeripheralId) -> Option<RadioEvent> {
    let service_filter = lock(shared).service_filter?;

    let peripheral = match adapter.peripheral(id).await {
        Ok(peripheral) => peripheral,
        Err(err) => {
            warn!("Failed to query BLE adapter for peripheral: {}", err);
            return None;
        },
    };

    match peripheral.properties().await {
        Err(err) => {
            warn!("Could not query peripheral for properties: {:?}", err);
            None
        },
        Ok(None) => {
            debug!("Peripheral has no properties");
            None
        },
        Ok(Some(properties)) => {
            // Some environments ignore the filter, so make sure to check the service uuid again
            if !properties.services.contains(&service_filter) {
                return None;
            }

            let handle = peripheral_handle(id);
            debug!(
                "Advertisement {} {:?} {} {:?}",
                properties.address,
                properties.address_type,
                properties.local_name.unwrap_or(String::from("NONE")),
                properties.services,
            );
            lock(shared).peripherals.insert(handle.clone(), peripheral);

            Some(RadioEvent::AdvertisementSeen { peripheral: handle, services: properties.services })
        },
    }
}

fn find_characteristic(peripheral: &Peripheral, handle: &CharacteristicHandle) -> Result<Characteristic, DeviceError> {
    peripheral.characteristics()
        .into_iter()
        .find(|characteristic| characteristic.uuid == handle.uuid && characteristic.service_uuid == handle.service_uuid)
        .ok_or(DeviceError::MissingCharacteristic)
}

async fn notification_pump(cancel: CancellationToken, peripheral: Peripheral, events: Sender<RadioEvent>) -> Result<(), DeviceError> {
    let mut notification_stream = peripheral.notifications().await?;

    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            notification = notification_stream.next() => match notification {
                None => break 'mainloop,
                Some(data) => {
                    let service_uuid = peripheral.characteristics()
                        .into_iter()
                        .find(|characteristic| characteristic.uuid == data.uuid)
                        .map(|characteristic| characteristic.service_uuid)
                        .unwrap_or_default();

                    let characteristic = CharacteristicHandle { uuid: data.uuid, service_uuid };
                    report(events.clone(), RadioEvent::ValueUpdated { characteristic, value: data.value }).await;
                },
            }
        }
    }

    Ok(())
}

impl RadioAdapter for BtleRadio {
    fn set_ready(&mut self) -> Result<(), DeviceError> {
        let shared = self.shared.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        spawn(async move {
            let state = match initialize(shared, events.clone(), cancel).await {
                Ok(()) => RadioState::PoweredOn,
                Err(DeviceError::NoAdapter) => RadioState::Unsupported,
                Err(err) if err.is_permission_denied() => RadioState::Unauthorized,
                Err(err) => {
                    warn!("Initializing the bluetooth adapter failed: {}", err);
                    RadioState::Unknown
                },
            };

            report(events, RadioEvent::RadioStateChanged(state)).await;
        });

        Ok(())
    }

    fn scan(&mut self, service_filter: Uuid) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        lock(&self.shared).service_filter = Some(service_filter);
        let events = self.events.clone();

        spawn(async move {
            let filter = ScanFilter {
                services: vec![service_filter],
            };

            if let Err(err) = adapter.start_scan(filter).await {
                warn!("Scanning failed {:?}", err);
                if let btleplug::Error::PermissionDenied = err {
                    report(events, RadioEvent::RadioStateChanged(RadioState::Unauthorized)).await;
                }
            }
        });

        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), DeviceError> {
        let adapter = self.adapter()?;
        lock(&self.shared).service_filter = None;

        spawn(async move {
            if let Err(err) = adapter.stop_scan().await {
                warn!("Stopping the scan failed {:?}", err);
            }
        });

        Ok(())
    }

    fn connect(&mut self, handle: &PeripheralHandle) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(handle)?;
        let shared = self.shared.clone();
        let events = self.events.clone();
        let handle = handle.clone();
        let attempt = self.cancel.child_token();

        if let Some(previous) = lock(&self.shared).connecting.insert(handle.clone(), attempt.clone()) {
            previous.cancel();
        }

        spawn(async move {
            let result = tokio::select! {
                _ = attempt.cancelled() => None,
                result = peripheral.connect() => Some(result),
            };

            // a cancelled attempt is no longer in `connecting`; cancel_connection reports for it
            let event = result.and_then(|result| {
                let mut shared = lock(&shared);
                if attempt.is_cancelled() {
                    return None;
                }
                shared.connecting.remove(&handle);

                Some(match result {
                    Ok(()) => {
                        shared.connected.insert(handle.clone());
                        RadioEvent::Connected(handle.clone())
                    },
                    Err(err) => RadioEvent::Disconnected { peripheral: handle.clone(), error: Some(err.into()) },
                })
            });

            match event {
                Some(event) => report(events, event).await,
                None => release(&peripheral, &handle).await,
            }
        });

        Ok(())
    }

    fn cancel_connection(&mut self, handle: &PeripheralHandle) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(handle)?;
        self.stop_notification_pump();
        {
            let mut shared = lock(&self.shared);
            if let Some(attempt) = shared.connecting.remove(handle) {
                attempt.cancel();
            }
            // this task reports the disconnection, not the central event stream
            shared.connected.remove(handle);
        }
        let events = self.events.clone();
        let handle = handle.clone();

        spawn(async move {
            let error = match peripheral.is_connected().await {
                Ok(true) => peripheral.disconnect().await.err().map(DeviceError::from),
                Ok(false) => None,
                Err(err) => Some(err.into()),
            };

            report(events, RadioEvent::Disconnected { peripheral: handle, error }).await;
        });

        Ok(())
    }

    fn discover_services(&mut self, handle: &PeripheralHandle) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(handle)?;
        let events = self.events.clone();
        let handle = handle.clone();

        spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => RadioEvent::ServicesFound {
                    peripheral: handle,
                    services: peripheral.services()
                        .into_iter()
                        .map(|service| ServiceHandle { uuid: service.uuid })
                        .collect(),
                    error: None,
                },
                Err(err) => RadioEvent::ServicesFound { peripheral: handle, services: Vec::new(), error: Some(err.into()) },
            };

            report(events, event).await;
        });

        Ok(())
    }

    fn discover_characteristics(&mut self, handle: &PeripheralHandle, service: &ServiceHandle) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(handle)?;
        let events = self.events.clone();
        let service = service.clone();

        // btleplug resolves characteristics together with the services, so this only reads them back
        spawn(async move {
            let event = match peripheral.services().into_iter().find(|candidate| candidate.uuid == service.uuid) {
                None => RadioEvent::CharacteristicsFound {
                    service,
                    characteristics: Vec::new(),
                    error: Some(DeviceError::MissingService),
                },
                Some(found) => RadioEvent::CharacteristicsFound {
                    characteristics: found.characteristics
                        .iter()
                        .map(|characteristic| CharacteristicHandle {
                            uuid: characteristic.uuid,
                            service_uuid: characteristic.service_uuid,
                        })
                        .collect(),
                    service,
                    error: None,
                },
            };

            report(events, event).await;
        });

        Ok(())
    }

    fn write(
        &mut self,
        handle: &PeripheralHandle,
        characteristic: &CharacteristicHandle,
        value: &[u8],
    ) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(handle)?;
        let target = find_characteristic(&peripheral, characteristic)?;
        let events = self.events.clone();
        let characteristic = characteristic.clone();
        let value = value.to_vec();

        spawn(async move {
            let error = peripheral.write(&target, &value, WriteType::WithResponse).await.err().map(DeviceError::from);
            report(events, RadioEvent::WriteCompleted { characteristic, error }).await;
        });

        Ok(())
    }

    fn set_notify(&mut self, handle: &PeripheralHandle, characteristic: &CharacteristicHandle, enabled: bool) -> Result<(), DeviceError> {
        let peripheral = self.peripheral(handle)?;
        let target = find_characteristic(&peripheral, characteristic)?;
        let events = self.events.clone();
        let characteristic = characteristic.clone();

        if enabled {
            // start reading before subscribing so the first notification is not missed
            let mut shared = lock(&self.shared);
            if shared.notification_pump.is_none() {
                let pump_cancel = self.cancel.child_token();
                shared.notification_pump = Some(pump_cancel.clone());

                let pump_peripheral = peripheral.clone();
                let pump_events = self.events.clone();
                spawn(async move {
                    if let Err(err) = notification_pump(pump_cancel, pump_peripheral, pump_events).await {
                        warn!("Reading notifications failed: {}", err);
                    }
                });
            }
        }

        spawn(async move {
            let result = if enabled {
                info!("Subscribing to characteristic {:?} {:?}", target.service_uuid, target.uuid);
                peripheral.subscribe(&target).await
            } else {
                info!("Unsubscribing from characteristic {:?} {:?}", target.service_uuid, target.uuid);
                peripheral.unsubscribe(&target).await
            };

            let error = result.err().map(DeviceError::from);
            report(events, RadioEvent::NotifyCompleted { characteristic, enabled, error }).await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn central_state_maps_to_radio_state() {
        assert_eq!(radio_state(CentralState::PoweredOn), RadioState::PoweredOn);
        assert_eq!(radio_state(CentralState::PoweredOff), RadioState::PoweredOff);
        assert_eq!(radio_state(CentralState::Unknown), RadioState::Unknown);
    }

    #[test]
    fn losing_the_radio_forgets_connections() {
        let shared: SharedState = Arc::new(Mutex::new(Shared::default()));
        let attempt = CancellationToken::new();
        let pump = CancellationToken::new();
        {
            let mut shared = lock(&shared);
            shared.connecting.insert(PeripheralHandle::new("pending"), attempt.clone());
            shared.connected.insert(PeripheralHandle::new("board"));
            shared.notification_pump = Some(pump.clone());
            shared.service_filter = Some(Uuid::nil());
        }

        forget_connections(&shared);

        let shared = lock(&shared);
        assert!(attempt.is_cancelled());
        assert!(pump.is_cancelled());
        assert!(shared.connecting.is_empty());
        assert!(shared.connected.is_empty());
        assert!(shared.service_filter.is_none());
    }
}
