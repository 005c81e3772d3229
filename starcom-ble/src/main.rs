//! Command-line client for Starcom BLE peripherals
//!
//! Connects to a peripheral, completes the challenge-response handshake,
//! sends catalog commands and prints whatever the device sends back.

use clap::{Parser, Subcommand};
use starcom_link::config::default_config_path;
use starcom_link::transport::btle::BtleTransport;
use starcom_link::{Link, LinkClient, LinkConfig, LinkEvent, LinkService};
use starcom_proto::{Attribute, Command};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "starcom-ble")]
#[command(about = "Command-line client for Starcom BLE peripherals")]
struct Cli {
    /// Config file (defaults to $STARCOM_HOME/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, authenticate and send commands
    Connect {
        /// Peripheral address, e.g. AA:BB:CC:DD:EE:FF
        address: String,
        /// Commands to send after authentication, by label or wire value
        #[arg(value_parser = parse_command)]
        commands: Vec<Command>,
        /// Seconds to keep listening after the last command
        #[arg(short, long, default_value = "5")]
        wait: u64,
    },
    /// List the command catalog
    Commands,
    /// List the UART service attributes
    Attributes,
    /// Compute the handshake token for a hex challenge with the configured key
    Token {
        /// Challenge bytes, e.g. "11 22 A0"
        challenge: String,
    },
}

fn parse_command(value: &str) -> Result<Command, String> {
    Command::by_label(value)
        .or_else(|| Command::by_wire_value(value))
        .ok_or_else(|| format!("unknown command {value:?}, see `starcom-ble commands`"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    match cli.command {
        Commands::Connect { address, commands, wait } => {
            let config = load_config(cli.config)?;
            run_session(&config, &address, commands, Duration::from_secs(wait)).await?;
        }
        Commands::Commands => {
            for command in Command::ALL {
                println!("  {:<28} {}", command.label(), command.wire_value());
            }
        }
        Commands::Attributes => {
            for attribute in Attribute::ALL {
                println!(
                    "  {:<8} {:<20} {}",
                    attribute.nickname(),
                    attribute.canonical_name(),
                    attribute.uuid()
                );
            }
        }
        Commands::Token { challenge } => {
            let config = load_config(cli.config)?;
            let compact: String = challenge.chars().filter(|c| !c.is_whitespace()).collect();
            let challenge = data_encoding::HEXLOWER_PERMISSIVE.decode(compact.as_bytes())?;
            let token = starcom_link::compute_token(&config.device_key()?, &challenge);
            println!("{}", starcom_proto::hex_spaced(&token));
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<LinkConfig, Box<dyn std::error::Error>> {
    let path = path.unwrap_or_else(default_config_path);
    log::debug!("loading config from {}", path.display());
    Ok(LinkConfig::load_or_create(&path)?)
}

async fn run_session(
    config: &LinkConfig,
    address: &str,
    commands: Vec<Command>,
    linger: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let (event_tx, mut events) = mpsc::unbounded_channel();

    let transport = BtleTransport::new(config, transport_tx).await;
    let mut link = Link::new(transport, config.device_key()?, event_tx);
    link.initialize()?;
    let (client, task) = LinkService::spawn(link, transport_rx);

    println!("Connecting to {address}...");
    client.connect(address).await?;
    let outcome = drive(&client, &mut events, commands, linger).await;

    client.close().await?;
    drop(client);
    task.await?;
    outcome
}

/// Print link events and send `commands` once authenticated. Returns after
/// the last command when nothing arrives for `linger`, on disconnect, or when
/// the handshake fails.
async fn drive(
    client: &LinkClient,
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    commands: Vec<Command>,
    linger: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut queue: VecDeque<Command> = commands.into();
    // Set once there is nothing left to send.
    let mut idle = false;
    let mut authenticated = false;
    let mut outcome = Ok(());

    loop {
        let event = if idle {
            match tokio::time::timeout(linger, events.recv()).await {
                Ok(event) => event,
                Err(_) => {
                    if !authenticated {
                        outcome = Err("handshake did not complete".into());
                    }
                    break;
                }
            }
        } else {
            events.recv().await
        };
        let Some(event) = event else { break };

        match event {
            LinkEvent::Connected { address } => println!("Connected to {address}"),
            LinkEvent::ServicesReady => println!("Services discovered, waiting for challenge"),
            LinkEvent::Authenticated => {
                println!("Authenticated");
                authenticated = true;
                idle = !send_next(client, &mut queue).await?;
            }
            LinkEvent::AuthenticationFailed => {
                outcome = Err("authentication failed".into());
                break;
            }
            LinkEvent::CommandDelivered(command) => {
                println!("Sent {command}");
                idle = !send_next(client, &mut queue).await?;
            }
            LinkEvent::CommandFailed(command) => {
                eprintln!("Failed to send {command}");
                idle = !send_next(client, &mut queue).await?;
            }
            LinkEvent::DataAvailable(data) => println!("{data}"),
            LinkEvent::Failure(e) => {
                eprintln!("Error: {e}");
                // Stalled before authentication: wait out the linger period.
                if !authenticated {
                    idle = true;
                }
            }
            LinkEvent::Disconnected { address } => {
                println!("Disconnected from {address}");
                break;
            }
        }
    }

    outcome
}

/// Send the next queued command. Returns false when the queue is empty.
async fn send_next(client: &LinkClient, queue: &mut VecDeque<Command>) -> Result<bool, Box<dyn std::error::Error>> {
    let Some(command) = queue.pop_front() else {
        return Ok(false);
    };
    println!("Sending {command} ({})...", command.wire_value());
    client.send_command(command).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use starcom_link::transport::{
        CharacteristicAddr, GattService, LinkId, Transport, TransportError, TransportEvent,
        TransportEventKind,
    };
    use uuid::Uuid;

    /// Accepts every request and reports an empty GATT table
    struct EmptyPeripheral;

    impl Transport for EmptyPeripheral {
        fn initialize(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
        fn open(&mut self, _address: &str) -> Result<LinkId, TransportError> {
            Ok(LinkId(1))
        }
        fn reopen(&mut self, _link: LinkId) -> Result<LinkId, TransportError> {
            Ok(LinkId(2))
        }
        fn discover_services(&mut self, _link: LinkId) -> Result<(), TransportError> {
            Ok(())
        }
        fn services(&self, _link: LinkId) -> Option<Vec<GattService>> {
            Some(Vec::new())
        }
        fn set_notification(&mut self, _: LinkId, _: CharacteristicAddr, _: bool) -> Result<(), TransportError> {
            Ok(())
        }
        fn write_descriptor(
            &mut self,
            _: LinkId,
            _: CharacteristicAddr,
            _: Uuid,
            _: &[u8],
        ) -> Result<(), TransportError> {
            Ok(())
        }
        fn read_characteristic(&mut self, _: LinkId, _: CharacteristicAddr) -> Result<(), TransportError> {
            Ok(())
        }
        fn write_characteristic(&mut self, _: LinkId, _: CharacteristicAddr, _: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }
        fn disconnect(&mut self, _link: LinkId) {}
        fn close(&mut self, _link: LinkId) {}
    }

    #[tokio::test]
    async fn stalled_handshake_gives_up_after_linger() {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let mut link = Link::new(EmptyPeripheral, vec![0x01], event_tx);
        link.initialize().unwrap();
        let (client, _task) = LinkService::spawn(link, transport_rx);

        client.connect("AA:BB:CC:DD:EE:FF").await.unwrap();
        for kind in [TransportEventKind::LinkUp, TransportEventKind::ServicesDiscovered { ok: true }] {
            transport_tx.send(TransportEvent::new(LinkId(1), kind)).unwrap();
        }

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            drive(&client, &mut events, vec![Command::ReadVersion], Duration::from_millis(50)),
        )
        .await
        .expect("drive returned");
        assert_eq!(outcome.unwrap_err().to_string(), "handshake did not complete");
    }

    #[test]
    fn commands_parse_by_label_or_wire_value() {
        assert_eq!(parse_command("restart"), Ok(Command::Restart));
        assert_eq!(parse_command("get_ver"), Ok(Command::ReadVersion));
        assert!(parse_command("reboot").is_err());
    }
}
