//! Two peers in one process: listen on 9999, connect, handshake, send "hello".
//!
//! Run with: cargo run -p zmtp --example hello

use std::net::{IpAddr, Ipv4Addr};
use std::task::Poll;

use zmtp::peer::{Context, Result};
use zmtp::transport::MemoryTransport;

fn main() -> Result<()> {
    let transport = MemoryTransport::new();
    let mut server = Context::new(transport.clone());
    let mut client = Context::new(transport);

    let a = server.channel_new()?;
    server.listen(&a, 9999)?;
    let b = client.channel_new()?;
    client.connect(&b, IpAddr::V4(Ipv4Addr::LOCALHOST), 9999)?;

    // A single-threaded scheduler: keep polling whatever is still pending.
    let (mut a_ready, mut b_ready) = (false, false);
    while !(a_ready && b_ready) {
        if let Poll::Ready(result) = server.poll_handshake(&a) {
            result?;
            a_ready = true;
        }
        if let Poll::Ready(result) = client.poll_handshake(&b) {
            result?;
            b_ready = true;
        }
    }
    println!("handshake complete: {:?}", server.peer_greeting(&a));

    let hello = client.msg_from_static(0, b"hello")?;
    while client.poll_send(&b, &hello).is_pending() {}
    client.msg_destroy(hello)?;

    let received = loop {
        if let Poll::Ready(result) = server.poll_recv(&a) {
            break result?;
        }
    };
    if let Some(msg) = server.msg(&received) {
        println!(
            "received {} bytes: {}",
            msg.size(),
            String::from_utf8_lossy(msg.data())
        );
    }
    server.msg_destroy(received)?;

    server.channel_destroy(a)?;
    client.channel_destroy(b)?;
    Ok(())
}
