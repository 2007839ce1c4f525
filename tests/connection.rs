//! The session task: commands and radio events are serialized through one owner.

mod common;

use std::time::Duration;
use futures::channel::mpsc::{channel, Sender};
use futures::SinkExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use capsense_central::config::types::Config;
use capsense_central::device::connection::{spawn_session, SessionHandle};
use capsense_central::device::constants::CAPSENSE_LED_SERVICE_UUID;
use capsense_central::device::session::Session;
use capsense_central::device::types::{Operation, Phase, RadioEvent, RadioState, SensorValue};
use capsense_central::error::CommandError;
use common::*;

struct Harness {
    cancel: CancellationToken,
    radio: RecordingRadio,
    events: Sender<RadioEvent>,
    handle: SessionHandle,
    join_handle: JoinHandle<()>,
}

fn start() -> Harness {
    let cancel = CancellationToken::new();
    let radio = RecordingRadio::default();
    let (events, receiver) = channel::<RadioEvent>(16);
    let session = Session::new(radio.clone(), Config::default());
    let (handle, join_handle) = spawn_session(cancel.clone(), session, receiver);

    Harness { cancel, radio, events, handle, join_handle }
}

impl Harness {
    async fn emit(&mut self, event: RadioEvent) {
        self.events.send(event).await.expect("session stopped reading events");
    }

    async fn wait_for<F: FnMut(&capsense_central::device::types::SessionState) -> bool>(&self, predicate: F) {
        let mut state = self.handle.watch_state();
        state.wait_for(predicate).await.expect("session task stopped");
    }

    async fn found(&mut self) {
        self.handle.start_radio().await.unwrap();
        self.emit(RadioEvent::RadioStateChanged(RadioState::PoweredOn)).await;
        self.wait_for(|state| state.radio_ready).await;

        self.handle.begin_scan().await.unwrap();
        self.emit(RadioEvent::AdvertisementSeen { peripheral: board(), services: vec![CAPSENSE_LED_SERVICE_UUID] }).await;
        self.wait_for(|state| state.device_found).await;
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.join_handle.await.expect("Failed to join session task");
    }
}

#[tokio::test]
async fn end_to_end_through_the_handle() {
    let mut harness = start();
    let mut values = harness.handle.sensor_values();

    harness.found().await;

    harness.handle.connect().await.unwrap();
    harness.emit(RadioEvent::Connected(board())).await;
    harness.wait_for(|state| state.connected).await;

    harness.handle.discover_services().await.unwrap();
    harness.emit(RadioEvent::ServicesFound { peripheral: board(), services: vec![target_service()], error: None }).await;
    harness.wait_for(|state| state.services_scanned).await;

    harness.handle.discover_characteristics().await.unwrap();
    harness.emit(RadioEvent::CharacteristicsFound {
        service: target_service(),
        characteristics: vec![control(), sensor()],
        error: None,
    }).await;
    harness.wait_for(|state| state.characteristics_scanned).await;

    harness.handle.write_control(1).await.unwrap();
    harness.emit(RadioEvent::WriteCompleted { characteristic: control(), error: None }).await;

    harness.handle.set_notify(true).await.unwrap();
    harness.emit(RadioEvent::ValueUpdated { characteristic: sensor(), value: vec![7] }).await;

    assert_eq!(values.recv().await.unwrap(), SensorValue(7));
    harness.wait_for(|state| state.sensor_value == 7).await;

    let state = harness.handle.state();
    assert!(state.notify_enabled);
    assert!(state.control_available);
    assert!(state.last_error.is_none());

    harness.stop().await;
}

#[tokio::test]
async fn precondition_failures_are_returned_to_the_caller() {
    let harness = start();

    assert!(matches!(harness.handle.connect().await, Err(CommandError::NoPeripheral)));
    assert!(matches!(harness.handle.set_notify(true).await, Err(CommandError::MissingCharacteristic(_))));
    assert!(harness.radio.calls().is_empty());
    assert_eq!(harness.handle.state().phase, Phase::RadioNotReady);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn connect_deadline_fires_when_the_adapter_never_answers() {
    let mut harness = start();
    harness.found().await;

    harness.handle.connect().await.unwrap();
    harness.wait_for(|state| state.disconnected).await;

    let state = harness.handle.state();
    assert_eq!(state.last_error.map(|failure| failure.operation), Some(Operation::Connect));
    assert_eq!(harness.radio.count(&RadioCall::CancelConnection(board())), 1);

    harness.stop().await;
}

#[tokio::test]
async fn commands_fail_once_the_session_stopped() {
    let harness = start();
    let handle = harness.handle.clone();

    harness.stop().await;

    assert!(matches!(handle.begin_scan().await, Err(CommandError::SessionClosed)));
}

#[tokio::test]
async fn disconnect_and_wait_returns_once_the_adapter_reports() {
    let mut harness = start();
    harness.found().await;

    let mut events = harness.events.clone();
    let radio = harness.radio.clone();
    let (result, _) = tokio::join!(
        harness.handle.disconnect_and_wait(Duration::from_secs(5)),
        async move {
            while radio.count(&RadioCall::CancelConnection(board())) == 0 {
                tokio::task::yield_now().await;
            }
            events.send(RadioEvent::Disconnected { peripheral: board(), error: None }).await.unwrap();
        },
    );

    assert!(result.unwrap());
    let state = harness.handle.state();
    assert!(state.disconnected);
    assert!(!state.device_found);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn disconnect_and_wait_gives_up_after_the_limit() {
    let mut harness = start();
    harness.found().await;

    let confirmed = harness.handle.disconnect_and_wait(Duration::from_secs(2)).await.unwrap();

    assert!(!confirmed);
    assert!(harness.handle.state().device_found);
    assert_eq!(harness.radio.count(&RadioCall::CancelConnection(board())), 1);

    harness.stop().await;
}
