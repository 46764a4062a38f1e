use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};
use zmtp_frame::{MSG_COMMAND, MSG_MORE};
use zmtp_peer::{Context, PeerError};
use zmtp_transport::{TcpTransport, TransportError};

use crate::cmd::SendArgs;
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_message, OutputFormat};
use crate::scheduler::{install_ctrlc_handler, Scheduler, Stop};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let addr = resolve(&args.host, args.port)?;
    let scheduler = Scheduler::new(install_ctrlc_handler()?, Some(timeout));

    let mut ctx = Context::new(TcpTransport::new());
    let ch = ctx
        .channel_new()
        .map_err(|err| peer_error("channel setup failed", err))?;
    ctx.connect(&ch, addr.ip(), addr.port())
        .map_err(|err| peer_error("connect failed", err))?;

    // TCP connects complete in the background; a refusal shows up here.
    scheduler
        .run(|| ctx.poll_handshake(&ch))
        .map_err(|stop| match stop {
            Stop::Peer(err) if is_connect_failure(&err) => peer_error("connect failed", err),
            stop => stop.into_cli_error("handshake failed"),
        })?;
    debug!(peer = ?ctx.peer_greeting(&ch), "handshake complete");

    let last = args.data.len().saturating_sub(1);
    for (i, text) in args.data.iter().enumerate() {
        let flags = frame_flags(i < last, args.command);
        let msg = ctx
            .msg_from_data(flags, text.as_bytes().to_vec())
            .map_err(|err| peer_error("message setup failed", err))?;
        let sent = scheduler.run(|| ctx.poll_send(&ch, &msg));
        ctx.msg_destroy(msg)
            .map_err(|err| peer_error("message release failed", err))?;
        sent.map_err(|stop| stop.into_cli_error("send failed"))?;
    }
    info!(%addr, frames = args.data.len(), "sent");

    if args.wait {
        let reply = scheduler
            .run(|| ctx.poll_recv(&ch))
            .map_err(|stop| stop.into_cli_error("receive failed"))?;
        if let Some(msg) = ctx.msg(&reply) {
            print_message(msg, format);
        }
        ctx.msg_destroy(reply)
            .map_err(|err| peer_error("message release failed", err))?;
    }

    ctx.channel_destroy(ch)
        .map_err(|err| peer_error("close failed", err))?;
    Ok(SUCCESS)
}

fn is_connect_failure(err: &PeerError) -> bool {
    matches!(err.transport_error(), Some(TransportError::Connect { .. }))
}

fn frame_flags(more: bool, command: bool) -> u8 {
    let mut flags = 0;
    if more {
        flags |= MSG_MORE;
    }
    if command {
        flags |= MSG_COMMAND;
    }
    flags
}

fn resolve(host: &str, port: u16) -> CliResult<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .map_err(|err| CliError::new(USAGE, format!("cannot resolve {host}: {err}")))?
        .next()
        .ok_or_else(|| CliError::new(USAGE, format!("no address found for {host}")))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}
