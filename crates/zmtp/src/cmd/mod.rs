use clap::{Args, Subcommand};

use zmtp_frame::DEFAULT_MAX_PAYLOAD;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

/// Port used by the listen/send pair when none is given.
pub const DEFAULT_PORT: u16 = 9999;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Listen for a peer, run the handshake and print received messages.
    Listen(ListenArgs),
    /// Connect, run the handshake and send one multipart message.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Send(args) => send::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// TCP port to listen on (all local addresses).
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Send every received frame back to the peer.
    #[arg(long)]
    pub echo: bool,
    /// Largest frame payload accepted, in bytes.
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_PAYLOAD)]
    pub max_payload: usize,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Host name or IP address to connect to.
    pub host: String,
    /// TCP port to connect to.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Frame payload; repeat for a multipart message.
    #[arg(long, short = 'd', required = true)]
    pub data: Vec<String>,
    /// Mark every frame as a COMMAND frame.
    #[arg(long)]
    pub command: bool,
    /// Wait for one reply frame and print it.
    #[arg(long)]
    pub wait: bool,
    /// Limit for the handshake, each send and the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
