use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use egress::api::proto::{
    self, list_sessions_response, start_session_response, stop_session_response,
};
use egress::api::{self, ApiState, HEALTH_INITIAL_DELAY, HEALTH_PERIOD, HealthMonitor};
use egress::upstream::udp::UdpConnector;
use egress::{Server, ServerConfig, SessionControl, StreamRegistry};
use prost::Message;
use reqwest::header::CONTENT_TYPE;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "rtsp-egress",
    version,
    about = "Serve conferencing-room video tracks to RTSP players"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the gateway: RTSP server plus HTTP control plane.
    Serve(ServeArgs),
    /// Talk to a running gateway's control plane.
    Client {
        /// Control plane base URL.
        #[arg(long, env = "RTSP_EGRESS_URL", default_value = "http://localhost:8008")]
        url: String,
        #[command(subcommand)]
        action: ClientAction,
    },
}

#[derive(Subcommand)]
enum ClientAction {
    /// Start relaying a room's track.
    Start {
        #[arg(long)]
        room_name: String,
        #[arg(long)]
        track_name: String,
    },
    /// Stop a session by sid (`room/track`).
    Stop {
        #[arg(long)]
        sid: String,
    },
    /// List running sessions.
    List,
}

#[derive(Args)]
struct ServeArgs {
    /// RTSP listen address.
    #[arg(long, env = "RTSP_EGRESS_RTSP_ADDR", default_value = "0.0.0.0:8554")]
    rtsp_addr: String,
    /// HTTP control plane listen address.
    #[arg(long, env = "RTSP_EGRESS_HTTP_ADDR", default_value = "0.0.0.0:8008")]
    http_addr: String,
    #[arg(long, env = "RTSP_EGRESS_RTP_PORT", default_value_t = 8000)]
    rtp_port: u16,
    #[arg(long, env = "RTSP_EGRESS_RTCP_PORT", default_value_t = 8001)]
    rtcp_port: u16,
    #[arg(long, env = "RTSP_EGRESS_MULTICAST_RANGE", default_value = "224.1.0.0/16")]
    multicast_range: String,
    #[arg(long, env = "RTSP_EGRESS_MULTICAST_RTP_PORT", default_value_t = 8002)]
    multicast_rtp_port: u16,
    #[arg(long, env = "RTSP_EGRESS_MULTICAST_RTCP_PORT", default_value_t = 8003)]
    multicast_rtcp_port: u16,
    #[arg(long, env = "RTSP_EGRESS_MULTICAST_TTL", default_value_t = 16)]
    multicast_ttl: u32,
    /// Host advertised in SDP instead of the one in the request URI.
    #[arg(long, env = "RTSP_EGRESS_PUBLIC_HOST")]
    public_host: Option<String>,
    /// Interface upstream RTP ingest sockets bind to.
    #[arg(long, env = "RTSP_EGRESS_INGEST_HOST", default_value = "0.0.0.0")]
    ingest_host: String,
}

impl ServeArgs {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            rtsp_addr: self.rtsp_addr.clone(),
            rtp_port: self.rtp_port,
            rtcp_port: self.rtcp_port,
            multicast_ip_range: self.multicast_range.clone(),
            multicast_rtp_port: self.multicast_rtp_port,
            multicast_rtcp_port: self.multicast_rtcp_port,
            multicast_ttl: self.multicast_ttl,
            public_host: self.public_host.clone(),
            ..ServerConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Client { url, action } => client(&url, action).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let registry = StreamRegistry::new();
    let connector = Arc::new(UdpConnector::new(&args.ingest_host));
    let control = SessionControl::new(registry.clone(), connector);

    let mut server = Server::with_config(registry.clone(), args.server_config());
    server.start().context("failed to start RTSP server")?;

    let health = HealthMonitor::new();
    let probe = health.spawn(control.clone(), HEALTH_INITIAL_DELAY, HEALTH_PERIOD);

    let listener = tokio::net::TcpListener::bind(&args.http_addr)
        .await
        .with_context(|| format!("failed to bind control plane on {}", args.http_addr))?;

    api::serve(listener, ApiState { control, health }, shutdown_signal())
        .await
        .context("control plane failed")?;

    probe.abort();
    let stopped = tokio::task::spawn_blocking(move || {
        let stopped = registry.clear();
        server.stop();
        stopped
    })
    .await?;
    tracing::info!(stopped, "gateway shut down");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("shutdown requested"),
        Err(e) => tracing::error!(error = %e, "failed to listen for shutdown signal"),
    }
}

async fn call<Req: Message, Resp: Message + Default>(
    http: &reqwest::Client,
    base: &str,
    path: &str,
    request: &Req,
) -> anyhow::Result<Resp> {
    let url = format!("{}{}", base.trim_end_matches('/'), path);
    let response = http
        .post(&url)
        .header(CONTENT_TYPE, api::PROTOBUF_CONTENT_TYPE)
        .body(request.encode_to_vec())
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;
    let status = response.status();
    let body = response.bytes().await?;
    Resp::decode(body).with_context(|| format!("undecodable response from {url} ({status})"))
}

fn print_session(session: &proto::Session) {
    println!(
        "{}\troom={}\ttrack={}\tidentity={}",
        session.sid, session.room_name, session.track_name, session.egress_identity
    );
}

async fn client(url: &str, action: ClientAction) -> anyhow::Result<()> {
    let http = reqwest::Client::new();
    match action {
        ClientAction::Start {
            room_name,
            track_name,
        } => {
            let request = proto::StartSessionRequest {
                room_name,
                track_name,
            };
            let response: proto::StartSessionResponse =
                call(&http, url, "/session/start", &request).await?;
            match response.result {
                Some(start_session_response::Result::Session(session)) => print_session(&session),
                Some(start_session_response::Result::Error(e)) => bail!(e),
                None => bail!("empty response"),
            }
        }
        ClientAction::Stop { sid } => {
            let response: proto::StopSessionResponse =
                call(&http, url, "/session/stop", &proto::StopSessionRequest { sid }).await?;
            match response.result {
                Some(stop_session_response::Result::Session(session)) => print_session(&session),
                Some(stop_session_response::Result::Error(e)) => bail!(e),
                None => bail!("empty response"),
            }
        }
        ClientAction::List => {
            let response: proto::ListSessionsResponse =
                call(&http, url, "/session/list", &proto::ListSessionsRequest {}).await?;
            match response.result {
                Some(list_sessions_response::Result::Sessions(list)) => {
                    if list.sessions.is_empty() {
                        println!("no sessions");
                    }
                    list.sessions.iter().for_each(print_session);
                }
                Some(list_sessions_response::Result::Error(e)) => bail!(e),
                None => bail!("empty response"),
            }
        }
    }
    Ok(())
}
