use futures::channel::mpsc::{channel, Receiver, Sender};
use futures::channel::oneshot;
use futures::future::pending;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use log::{debug, info, warn};
use tokio::spawn;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use crate::device::adapter::RadioAdapter;
use crate::device::session::{Session, SessionCommand};
use crate::device::types::{RadioEvent, SensorValue, SessionState};
use crate::error::CommandError;

const COMMAND_CAPACITY: usize = 32;

struct SessionRequest {
    command: SessionCommand,
    reply: oneshot::Sender<Result<(), CommandError>>,
}

/// Observer side of a running session: issue commands, read or watch the published state.
#[derive(Clone)]
pub struct SessionHandle {
    commands: Sender<SessionRequest>,
    state: watch::Receiver<SessionState>,
    values: broadcast::Sender<SensorValue>,
}

impl SessionHandle {
    pub async fn send(&self, command: SessionCommand) -> Result<(), CommandError> {
        let (reply, response) = oneshot::channel();
        let mut commands = self.commands.clone();

        commands.send(SessionRequest { command, reply })
            .await
            .map_err(|_| CommandError::SessionClosed)?;

        response.await.map_err(|_| CommandError::SessionClosed)?
    }

    pub async fn start_radio(&self) -> Result<(), CommandError> {
        self.send(SessionCommand::StartRadio).await
    }

    pub async fn begin_scan(&self) -> Result<(), CommandError> {
        self.send(SessionCommand::BeginScan).await
    }

    pub async fn connect(&self) -> Result<(), CommandError> {
        self.send(SessionCommand::Connect).await
    }

    pub async fn discover_services(&self) -> Result<(), CommandError> {
        self.send(SessionCommand::DiscoverServices).await
    }

    pub async fn discover_characteristics(&self) -> Result<(), CommandError> {
        self.send(SessionCommand::DiscoverCharacteristics).await
    }

    pub async fn write_control(&self, value: i8) -> Result<(), CommandError> {
        self.send(SessionCommand::WriteControl(value)).await
    }

    pub async fn set_notify(&self, enabled: bool) -> Result<(), CommandError> {
        self.send(SessionCommand::SetNotify(enabled)).await
    }

    pub async fn disconnect(&self) -> Result<(), CommandError> {
        self.send(SessionCommand::Disconnect).await
    }

    /// Disconnects and waits until the session has let go of the peripheral, for at most `limit`.
    ///
    /// Returns `false` if the adapter did not report the disconnection in time.
    pub async fn disconnect_and_wait(&self, limit: Duration) -> Result<bool, CommandError> {
        let mut state = self.watch_state();
        self.disconnect().await?;

        let result = match timeout(limit, state.wait_for(|state| !state.device_found)).await {
            Ok(Ok(_)) => Ok(true),
            Ok(Err(_)) => Err(CommandError::SessionClosed),
            Err(_) => {
                warn!("No disconnection reported within {:?}", limit);
                Ok(false)
            },
        };
        result
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn sensor_values(&self) -> broadcast::Receiver<SensorValue> {
        self.values.subscribe()
    }
}

async fn run_session<A: RadioAdapter>(
    cancel: CancellationToken,
    mut session: Session<A>,
    mut commands: Receiver<SessionRequest>,
    mut events: Receiver<RadioEvent>,
) {
    'mainloop: loop {
        let deadline = session.next_deadline();
        let timer = async move {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            Some(request) = commands.next() => {
                let result = session.execute(request.command);
                if request.reply.send(result).is_err() {
                    debug!("Command {:?} finished after its caller went away", request.command);
                }
            },
            Some(event) = events.next() => {
                session.handle_event(event);
            },
            _ = timer => {
                session.expire_pending(Instant::now());
            },
        }
    }

    info!("Session task stopped");
}

/// Moves `session` into its own task, which from then on is the only writer of its state.
///
/// Commands from any number of [`SessionHandle`] clones and events from the radio adapter are
/// handled one at a time, in arrival order. The task stops when `cancel` is cancelled.
pub fn spawn_session<A>(
    cancel: CancellationToken,
    session: Session<A>,
    events: Receiver<RadioEvent>,
) -> (SessionHandle, JoinHandle<()>)
where
    A: RadioAdapter + Send + 'static,
{
    let (command_sender, command_receiver) = channel::<SessionRequest>(COMMAND_CAPACITY);

    let handle = SessionHandle {
        commands: command_sender,
        state: session.subscribe_state(),
        values: session.value_sender(),
    };

    let join_handle = spawn(run_session(cancel, session, command_receiver, events));

    (handle, join_handle)
}
