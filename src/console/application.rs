use std::time::Duration;
use log::{error, info, warn};
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::spawn;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::types::Config;
use crate::console::types::{describe, AutoPilot, ConsoleCommand, HELP};
use crate::device::btle_radio::BtleRadio;
use crate::device::connection::{spawn_session, SessionHandle};
use crate::device::constants::CONNECT_DEADLINE;
use crate::device::session::Session;
use crate::device::types::Operation;
use crate::error::AppRunError;

pub struct ConsoleFlags {
    pub config: Config,
    pub auto: bool,
}

// prints every published state change and capsense value; in auto mode also drives the session
fn render_task(cancel: CancellationToken, handle: SessionHandle, auto: bool) -> JoinHandle<()> {
    spawn(async move {
        let mut state = handle.watch_state();
        let mut values = handle.sensor_values();
        let mut pilot = AutoPilot::default();
        let mut previous = String::new();

        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                changed = state.changed() => {
                    if changed.is_err() {
                        break 'mainloop;
                    }

                    let snapshot = state.borrow_and_update().clone();
                    let description = describe(&snapshot);
                    if description != previous {
                        println!("{}", description);
                        previous = description;
                    }

                    if auto {
                        for command in pilot.next_commands(&snapshot) {
                            if let Err(err) = handle.send(command).await {
                                warn!("Automatic {:?} failed: {}", command, err);
                            }
                        }
                    }
                },
                value = values.recv() => match value {
                    Ok(value) => println!("Capsense value = {}", value.0),
                    Err(RecvError::Lagged(skipped)) => warn!("Skipped {} capsense values", skipped),
                    Err(RecvError::Closed) => break 'mainloop,
                },
            }
        }
    })
}

async fn execute(handle: &SessionHandle, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Session(command) => {
            if let Err(err) = handle.send(command).await {
                println!("{}", err);
            }
        },
        ConsoleCommand::Status => println!("{}", describe(&handle.state())),
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Quit => return false,
    }

    true
}

pub async fn run_console(flags: ConsoleFlags) -> Result<(), AppRunError> {
    // this token is cancelled upon exit
    let app_cancel = CancellationToken::new();

    let disconnect_limit = flags.config.deadline(Operation::Connect)
        .unwrap_or(Duration::from_millis(CONNECT_DEADLINE));

    let (radio, events) = BtleRadio::new(app_cancel.clone());
    let session = Session::new(radio, flags.config);
    let (handle, session_handle) = spawn_session(app_cancel.clone(), session, events);
    let render_handle = render_task(app_cancel.clone(), handle.clone(), flags.auto);

    if let Err(err) = handle.start_radio().await {
        error!("Failed to start the radio: {}", err);
    }

    if !flags.auto {
        println!("{}", HELP);
    }

    let mut lines = BufReader::new(stdin()).lines();
    'mainloop: loop {
        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break 'mainloop,
        };

        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ConsoleCommand>() {
            Ok(command) => {
                if !execute(&handle, command).await {
                    break 'mainloop;
                }
            },
            Err(err) => println!("{}", err),
        }
    }

    info!("Exit requested");
    if handle.state().device_found {
        match handle.disconnect_and_wait(disconnect_limit).await {
            Ok(true) => info!("Disconnected"),
            Ok(false) => warn!("Exiting without a confirmed disconnection"),
            Err(err) => warn!("Failed to disconnect: {}", err),
        }
    }

    app_cancel.cancel();
    if let Err(err) = session_handle.await {
        error!("Failed to join session task: {}", err);
    }
    if let Err(err) = render_handle.await {
        error!("Failed to join render task: {}", err);
    }

    Ok(())
}
