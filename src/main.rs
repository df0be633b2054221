use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use peerlink::config::{Command, ProbeArgs, RequestArgs, SendOnceArgs, ServeArgs, Transport};
use peerlink::{
    Config, DatagramChannel, InboundMessage, NetError, NetResult, SessionOptions, StreamSessions,
    datagram, probe, stream,
};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const APP_NAME: &str = "🔗 peerlink";

// -----------------------------------------------------------------------------
// ----- Main ------------------------------------------------------------------

#[tokio::main]
async fn main() -> NetResult<()> {
    setup().await;
    run().await
}

// -----------------------------------------------------------------------------
// ----- Setup -----------------------------------------------------------------

async fn setup() {
    // This has to be the first thing we do, because it initializes the config
    Config::init().await;

    init_tracing();
}

fn init_tracing() {
    let config = Config::snapshot();
    let filter = EnvFilter::try_new(config.log_level.as_str())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

// -----------------------------------------------------------------------------
// ----- Run -------------------------------------------------------------------

async fn run() -> NetResult<()> {
    let config = Config::snapshot();
    let options = config.session;

    match config.command {
        Command::TcpEcho(args) => tcp_echo(args, options).await,
        Command::UdpEcho(args) => udp_echo(args, options).await,
        Command::TcpRequest(args) => tcp_request(args, options).await,
        Command::UdpRequest(args) => udp_request(args, options).await,
        Command::SendOnce(args) => send_once(args).await,
        Command::Probe(args) => probe_host(args).await,
    }
}

async fn tcp_echo(args: ServeArgs, options: SessionOptions) -> NetResult<()> {
    let server = StreamSessions::listen_on(SocketAddr::from((args.host, args.port)), options).await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();

    server.accepted().subscribe(|peer| info!("peer {peer} joined"));
    server.disconnected().subscribe(|peer| info!("peer {peer} left"));
    server.received().subscribe(move |message| {
        let _ = tx.send(message.clone());
    });

    // One replier keeps each peer's echoes in arrival order.
    let sender = server.sender();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Some(peer) = message.sender else { continue };
            if let Err(e) = sender.send_to(&message.payload, peer).await {
                warn!("echo to {peer} failed: {e}");
            }
        }
    });

    info!("{} echoing tcp on {}", APP_NAME, server.local_addr());
    tokio::select! {
        signal = signal::ctrl_c() => signal?,
        stopped = server.stopped() => {
            server.close().await;
            return stopped;
        }
    }

    info!("{} shutting down", APP_NAME);
    server.close().await;
    Ok(())
}

async fn udp_echo(args: ServeArgs, options: SessionOptions) -> NetResult<()> {
    let channel = DatagramChannel::bind_addr(SocketAddr::from((args.host, args.port)), options).await?;
    let (tx, mut rx) = mpsc::unbounded_channel::<InboundMessage>();

    channel.received().subscribe(move |message| {
        let _ = tx.send(message.clone());
    });

    let sender = channel.sender();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Some(peer) = message.sender else { continue };
            if let Err(e) = sender.send_to(&message.payload, peer).await {
                warn!("echo to {peer} failed: {e}");
            }
        }
    });

    info!("{} echoing udp on {}", APP_NAME, channel.local_addr());
    tokio::select! {
        signal = signal::ctrl_c() => signal?,
        stopped = channel.stopped() => {
            channel.close();
            return stopped;
        }
    }

    info!("{} shutting down", APP_NAME);
    channel.close();
    Ok(())
}

async fn tcp_request(args: RequestArgs, options: SessionOptions) -> NetResult<()> {
    let remote = resolve(&args.host, args.port).await?;
    let client = StreamSessions::connect_from(remote, args.local_port, options).await?;

    let reply = client
        .send_and_receive_paired(args.payload.as_bytes(), args.timeout)
        .await;

    client.close().await;
    print_reply(reply?, args.timeout.unwrap_or(client.options().response_timeout));
    Ok(())
}

async fn udp_request(args: RequestArgs, options: SessionOptions) -> NetResult<()> {
    let remote = resolve(&args.host, args.port).await?;
    let channel = DatagramChannel::paired(remote, args.local_port, options).await?;

    let reply = channel
        .send_and_receive_paired(args.payload.as_bytes(), args.timeout)
        .await;

    channel.close();
    print_reply(reply?, args.timeout.unwrap_or(channel.options().response_timeout));
    Ok(())
}

async fn send_once(args: SendOnceArgs) -> NetResult<()> {
    let remote = resolve(&args.host, args.port).await?;
    let bytes = args.payload.as_bytes();

    match args.transport {
        Transport::Tcp => stream::send_once(bytes, remote, args.local_port).await?,
        Transport::Udp => datagram::send_once(bytes, remote, args.local_port).await?,
    }

    info!("sent {} bytes over {} to {remote}", bytes.len(), args.transport.as_str());
    Ok(())
}

async fn probe_host(args: ProbeArgs) -> NetResult<()> {
    match probe::primary_local_address() {
        Some(addr) => println!("primary address: {addr}"),
        None => println!("primary address: none"),
    }
    println!("free tcp port:   {}", probe::free_tcp_port()?);
    println!("free udp port:   {}", probe::free_udp_port()?);

    if let Some(host) = args.host {
        for addr in probe::resolve_v4(&host).await? {
            println!("{host} v4: {addr}");
        }
        for addr in probe::resolve_v6(&host).await? {
            println!("{host} v6: {addr}");
        }
    }

    Ok(())
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

async fn resolve(host: &str, port: u16) -> NetResult<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    if let Some(v4) = probe::resolve_v4(host).await?.first() {
        return Ok(SocketAddr::from((*v4, port)));
    }

    if let Some(v6) = probe::resolve_v6(host).await?.first() {
        return Ok(SocketAddr::from((*v6, port)));
    }

    Err(NetError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no address found for {host}"),
    )))
}

fn print_reply(reply: Option<InboundMessage>, waited: Duration) {
    match reply {
        Some(message) => println!("{}", String::from_utf8_lossy(&message.payload)),
        None => warn!("no reply within {waited:?}"),
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
