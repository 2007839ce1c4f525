use std::path::PathBuf;
use std::str::FromStr;
use clap::Parser;

use crate::device::constants::{LED_OFF, LED_ON};
use crate::device::session::SessionCommand;
use crate::device::types::{Phase, SessionState};
use crate::error::ParseCommandError;

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Connects to a capsense/led board over bluetooth low energy")]
pub struct Cli {
    /// Path to the JSON config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log debug messages
    #[arg(short, long)]
    pub verbose: bool,

    /// Walk through scan, connect, discovery, led on and notify on without typed commands
    #[arg(long)]
    pub auto: bool,

    /// Write the effective config back to the config file
    #[arg(long)]
    pub save_config: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Session(SessionCommand),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  start                 start the bluetooth radio
  scan                  search for the capsense/led board
  connect               connect to the board that was found
  services              discover services
  characteristics       discover characteristics
  led on|off            switch the led
  write <value>         write a signed byte to the led characteristic
  notify on|off         enable or disable capsense notifications
  disconnect            disconnect from the board
  status                print the current state
  help                  print this help
  quit                  exit";

fn parse_switch(command: &'static str, argument: Option<&str>) -> Result<bool, ParseCommandError> {
    match argument {
        Some("on") | Some("1") | Some("true") => Ok(true),
        Some("off") | Some("0") | Some("false") => Ok(false),
        other => Err(ParseCommandError::InvalidArgument {
            command,
            argument: other.unwrap_or_default().to_string(),
        }),
    }
}

impl FromStr for ConsoleCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(ParseCommandError::Empty)?.to_lowercase();
        let argument = words.next();

        let command = match name.as_str() {
            "start" => ConsoleCommand::Session(SessionCommand::StartRadio),
            "scan" => ConsoleCommand::Session(SessionCommand::BeginScan),
            "connect" => ConsoleCommand::Session(SessionCommand::Connect),
            "services" => ConsoleCommand::Session(SessionCommand::DiscoverServices),
            "characteristics" | "chars" => ConsoleCommand::Session(SessionCommand::DiscoverCharacteristics),
            "led" => {
                let value = if parse_switch("led", argument)? { LED_ON } else { LED_OFF };
                ConsoleCommand::Session(SessionCommand::WriteControl(value))
            },
            "write" => {
                let argument = argument.unwrap_or_default();
                let value = argument.parse::<i8>().map_err(|_| ParseCommandError::InvalidArgument {
                    command: "write",
                    argument: argument.to_string(),
                })?;
                ConsoleCommand::Session(SessionCommand::WriteControl(value))
            },
            "notify" => ConsoleCommand::Session(SessionCommand::SetNotify(parse_switch("notify", argument)?)),
            "disconnect" => ConsoleCommand::Session(SessionCommand::Disconnect),
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            _ => return Err(ParseCommandError::Unknown(name)),
        };

        Ok(command)
    }
}

/// Issues the next commands of the walk-through once per phase it reaches.
#[derive(Debug, Default)]
pub struct AutoPilot {
    acted_on: Option<Phase>,
}

impl AutoPilot {
    pub fn next_commands(&mut self, state: &SessionState) -> Vec<SessionCommand> {
        if self.acted_on == Some(state.phase) {
            return Vec::new();
        }
        self.acted_on = Some(state.phase);

        match state.phase {
            Phase::RadioReady => vec![SessionCommand::BeginScan],
            Phase::DeviceFound => vec![SessionCommand::Connect],
            Phase::Connected => vec![SessionCommand::DiscoverServices],
            Phase::ServicesScanned => vec![SessionCommand::DiscoverCharacteristics],
            Phase::CharacteristicsScanned => {
                let mut commands = Vec::new();
                if state.control_available {
                    commands.push(SessionCommand::WriteControl(LED_ON));
                }
                if state.sensor_available && !state.notify_enabled {
                    commands.push(SessionCommand::SetNotify(true));
                }
                commands
            },
            _ => Vec::new(),
        }
    }
}

pub fn describe(state: &SessionState) -> String {
    let mut description = format!(
        "state={} radio={:?} found={} connected={} services={} characteristics={} led={} notify={} capsense={}",
        state.phase,
        state.radio_state,
        state.device_found,
        state.connected,
        state.services_scanned,
        state.characteristics_scanned,
        state.control_available,
        state.notify_enabled,
        state.sensor_value,
    );

    if let Some(failure) = &state.last_error {
        description.push_str(&format!(" last error: {} ({})", failure.message, failure.operation));
    }

    description
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_commands() {
        assert_eq!("scan".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Session(SessionCommand::BeginScan)));
        assert_eq!("  Connect ".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Session(SessionCommand::Connect)));
        assert_eq!("chars".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Session(SessionCommand::DiscoverCharacteristics)));
        assert_eq!("led on".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Session(SessionCommand::WriteControl(1))));
        assert_eq!("led off".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Session(SessionCommand::WriteControl(0))));
        assert_eq!("write -5".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Session(SessionCommand::WriteControl(-5))));
        assert_eq!("notify on".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Session(SessionCommand::SetNotify(true))));
        assert_eq!("quit".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<ConsoleCommand>(), Err(ParseCommandError::Empty));
        assert_eq!("fly".parse::<ConsoleCommand>(), Err(ParseCommandError::Unknown("fly".to_string())));
        assert_eq!(
            "write 300".parse::<ConsoleCommand>(),
            Err(ParseCommandError::InvalidArgument { command: "write", argument: "300".to_string() }),
        );
        assert!("notify maybe".parse::<ConsoleCommand>().is_err());
    }

    #[test]
    fn autopilot_acts_once_per_phase() {
        let mut pilot = AutoPilot::default();
        let ready = SessionState { phase: Phase::RadioReady, ..SessionState::default() };

        assert_eq!(pilot.next_commands(&ready), vec![SessionCommand::BeginScan]);
        assert!(pilot.next_commands(&ready).is_empty());
    }

    #[test]
    fn autopilot_finishes_with_led_and_notify() {
        let mut pilot = AutoPilot::default();
        let scanned = SessionState {
            phase: Phase::CharacteristicsScanned,
            control_available: true,
            sensor_available: true,
            ..SessionState::default()
        };

        assert_eq!(
            pilot.next_commands(&scanned),
            vec![SessionCommand::WriteControl(1), SessionCommand::SetNotify(true)],
        );
    }

    #[test]
    fn autopilot_skips_missing_characteristics() {
        let mut pilot = AutoPilot::default();
        let scanned = SessionState {
            phase: Phase::CharacteristicsScanned,
            sensor_available: true,
            ..SessionState::default()
        };

        assert_eq!(pilot.next_commands(&scanned), vec![SessionCommand::SetNotify(true)]);
    }
}
