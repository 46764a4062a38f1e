use tracing::{info, warn};
use zmtp_frame::FrameConfig;
use zmtp_peer::{ChannelHandle, Context, HandshakeConfig, PeerError};
use zmtp_transport::{TcpTransport, TransportError};

use crate::cmd::ListenArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};
use crate::scheduler::{install_ctrlc_handler, Scheduler, Stop};

type Ctx = Context<TcpTransport>;
type Channel = ChannelHandle<TcpTransport>;

/// How a single peer session ended.
enum Session {
    /// `--count` messages were printed.
    Done,
    /// The peer went away or failed the handshake; listen again.
    PeerLeft,
}

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let scheduler = Scheduler::new(install_ctrlc_handler()?, None);
    let frame = FrameConfig {
        max_payload_size: args.max_payload,
    };
    let handshake = HandshakeConfig {
        as_server: true,
        ..HandshakeConfig::default()
    };
    let mut ctx = Context::with_config(TcpTransport::new(), frame, handshake);
    let ch = ctx
        .channel_new()
        .map_err(|err| peer_error("channel setup failed", err))?;

    let mut printed = 0usize;
    while scheduler.is_running() {
        ctx.listen(&ch, args.port)
            .map_err(|err| peer_error("listen failed", err))?;
        info!(port = args.port, "waiting for peer");

        let session = serve(&mut ctx, &ch, &scheduler, &args, format, &mut printed);
        match session {
            Ok(Session::Done) => return Ok(SUCCESS),
            Ok(Session::PeerLeft) => {}
            Err(Stop::Interrupted) => break,
            Err(stop) => return Err(stop.into_cli_error("session failed")),
        }
        ctx.close(&ch)
            .map_err(|err| peer_error("close failed", err))?;
    }

    Ok(SUCCESS)
}

fn serve(
    ctx: &mut Ctx,
    ch: &Channel,
    scheduler: &Scheduler,
    args: &ListenArgs,
    format: OutputFormat,
    printed: &mut usize,
) -> Result<Session, Stop> {
    match scheduler.run(|| ctx.poll_handshake(ch)) {
        Ok(()) => info!(peer = ?ctx.peer_greeting(ch), "peer connected"),
        Err(Stop::Peer(err)) if err.is_protocol_violation() || is_disconnect(&err) => {
            warn!(error = %err, "handshake failed");
            return Ok(Session::PeerLeft);
        }
        Err(stop) => return Err(stop),
    }

    loop {
        let msg = match scheduler.run(|| ctx.poll_recv(ch)) {
            Ok(msg) => msg,
            Err(Stop::Peer(err)) if is_disconnect(&err) => {
                info!("peer disconnected");
                return Ok(Session::PeerLeft);
            }
            Err(stop) => return Err(stop),
        };

        if let Some(received) = ctx.msg(&msg) {
            print_message(received, format);
        }
        let echoed = if args.echo {
            scheduler.run(|| ctx.poll_send(ch, &msg))
        } else {
            Ok(())
        };
        ctx.msg_destroy(msg).map_err(Stop::Peer)?;
        echoed?;

        *printed = printed.saturating_add(1);
        if args.count.is_some_and(|count| *printed >= count) {
            return Ok(Session::Done);
        }
    }
}

fn is_disconnect(err: &PeerError) -> bool {
    matches!(
        err.transport_error(),
        Some(TransportError::Closed | TransportError::Aborted)
    )
}
