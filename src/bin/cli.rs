//! msg-relay CLI
//!
//! Command-line tools for working with a running relay:
//! - Send messages as a producer
//! - Listen as a subscriber
//! - Request a reset
//! - Generate a config file

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use msg_relay::{
    ClientConfig, Config, ConnectionState, Message, SubscriberClient, SubscriberEvents,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "msg-relay-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Producer and subscriber tools for msg-relay")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format for received messages (text, json)
    #[arg(short, long, default_value = "text", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a message as a producer
    Send {
        /// Message text
        text: String,
        /// Audio reference attached to the message
        #[arg(short, long)]
        audio: Option<String>,
        /// Producer address (default: from config)
        #[arg(long)]
        addr: Option<String>,
        /// Split the payload into writes of this many bytes
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Send the message this many times on one connection
        #[arg(short, long, default_value = "1")]
        repeat: usize,
    },

    /// Print messages as a subscriber until interrupted
    Listen {
        /// Relay WebSocket URL (default: from config)
        #[arg(long)]
        url: Option<String>,
    },

    /// Ask the relay to reset and wait for the acknowledgement
    Reset {
        /// Relay WebSocket URL (default: from config)
        #[arg(long)]
        url: Option<String>,
        /// Seconds to wait for the connection and the acknowledgement
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Generate default config file
    Config {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

enum Received {
    Message(Message),
    ResetAck,
    State(ConnectionState),
}

struct Forwarder(mpsc::UnboundedSender<Received>);

impl SubscriberEvents for Forwarder {
    fn on_message(&self, message: Message) {
        let _ = self.0.send(Received::Message(message));
    }

    fn on_reset_ack(&self) {
        let _ = self.0.send(Received::ResetAck);
    }

    fn on_state_change(&self, state: ConnectionState) {
        let _ = self.0.send(Received::State(state));
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::from_env(),
    };
    msg_relay::logging::init(&config.logging);

    match cli.command {
        Commands::Send {
            text,
            audio,
            addr,
            chunk_size,
            repeat,
        } => {
            let addr = addr.unwrap_or_else(|| producer_addr(&config));
            let mut message = Message::new(text);
            if let Some(audio) = audio {
                message = message.with_audio(audio);
            }
            let payload = serde_json::to_string(&message)?;

            let mut stream = TcpStream::connect(&addr)
                .await
                .with_context(|| format!("connecting to producer port {}", addr))?;

            for _ in 0..repeat {
                match chunk_size {
                    Some(size) if size > 0 => {
                        for chunk in payload.as_bytes().chunks(size) {
                            stream.write_all(chunk).await?;
                            stream.flush().await?;
                            tokio::time::sleep(Duration::from_millis(10)).await;
                        }
                    }
                    _ => stream.write_all(payload.as_bytes()).await?,
                }
            }
            stream.shutdown().await?;

            println!("Sent {} message(s) to {}", repeat, addr);
        }

        Commands::Listen { url } => {
            let client_config = client_config(&config, url);
            println!("Listening on {} (Ctrl+C to stop)", client_config.url);

            let (tx, mut rx) = mpsc::unbounded_channel();
            let client = SubscriberClient::connect_ws(client_config, Arc::new(Forwarder(tx)));

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    received = rx.recv() => match received {
                        Some(Received::Message(message)) => print_message(&message, &cli.format)?,
                        Some(Received::ResetAck) => println!("-- reset acknowledged --"),
                        Some(Received::State(state)) => eprintln!("[{}]", state),
                        None => break,
                    },
                }
            }

            client.shutdown().await;
        }

        Commands::Reset { url, timeout } => {
            let client_config = client_config(&config, url);
            let (tx, mut rx) = mpsc::unbounded_channel();
            let client = SubscriberClient::connect_ws(client_config, Arc::new(Forwarder(tx)));

            let acknowledged = tokio::time::timeout(Duration::from_secs(timeout), async {
                let mut requested = false;
                while let Some(received) = rx.recv().await {
                    match received {
                        Received::State(ConnectionState::Connected) if !requested => {
                            requested = client.send_reset();
                        }
                        Received::ResetAck if requested => return true,
                        _ => {}
                    }
                }
                false
            })
            .await
            .unwrap_or(false);

            client.shutdown().await;

            if !acknowledged {
                bail!("no reset acknowledgement within {}s", timeout);
            }
            println!("Reset acknowledged");
        }

        Commands::Config { output } => {
            let config = msg_relay::config::generate_default_config();

            match output {
                Some(path) => {
                    // Create parent directory if needed
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

/// Producer address from config, with a wildcard host mapped to loopback
fn producer_addr(config: &Config) -> String {
    let host = match config.ingest.host.as_str() {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    };
    format!("{}:{}", host, config.ingest.tcp_port)
}

fn client_config(config: &Config, url: Option<String>) -> ClientConfig {
    let mut client = config.client.clone();
    if let Some(url) = url {
        client.url = url;
    }
    client
}

fn print_message(message: &Message, format: &str) -> anyhow::Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string(message)?),
        _ => match &message.audio {
            Some(audio) => println!("{}  [{}]", message.text, audio),
            None => println!("{}", message.text),
        },
    }
    Ok(())
}
