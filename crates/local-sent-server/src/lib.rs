//! local-sent-server: the receiver engine.
//!
//! [`start_receiver`] binds the transfer port, advertises over mDNS and the
//! UDP discovery responder, and spawns one session task per inbound
//! connection. The returned [`ReceiverHandle`] stops everything with a
//! 2-second grace for in-flight sessions.

mod session;
mod target;

pub use session::{ConfirmDecision, ConfirmFuture, ConfirmRequest, ConfirmTransfer};

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use local_sent_core::constants::{DEFAULT_TRANSFER_PORT, SHUTDOWN_GRACE};
use local_sent_core::discovery::{MdnsAdvertiser, UdpResponder};
use local_sent_core::error::{Error, Result};
use local_sent_core::pairing::{Pairing, PairingConfig, PairCodeGenerator, PairCodeListener};
use local_sent_core::progress::{stdout_sink, ProgressSink};
use local_sent_core::trust::{load_certs, load_private_key};

use session::SessionContext;

/// TLS material for the receiver.
#[derive(Debug, Clone)]
pub struct TlsServerConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Receiver configuration.
#[derive(Clone)]
pub struct ReceiverConfig {
    /// Transfer port; 0 picks a free port.
    pub port: u16,
    /// Directory received files land in; created if missing.
    pub output_dir: PathBuf,
    /// Advertised instance name; defaults to the machine hostname.
    pub service_name: Option<String>,
    /// Initial pair code; absent means open admission.
    pub pair_code: Option<String>,
    /// Rotate the pair code after every successful transfer.
    pub rotate_per_transfer: bool,
    /// Rotate the pair code on this period while idle.
    pub pair_ttl: Option<Duration>,
    /// Code generator; required when either rotation policy is on.
    pub generate_pair_code: Option<PairCodeGenerator>,
    /// Observer for rotated codes.
    pub on_pair_code_change: Option<PairCodeListener>,
    /// Out-of-band approval gate.
    pub confirm_transfer: Option<ConfirmTransfer>,
    /// Serve TLS instead of plain TCP.
    pub tls: Option<TlsServerConfig>,
    /// Progress and outcome line sink; stdout when absent.
    pub progress: Option<ProgressSink>,
    /// Publish mDNS and answer UDP probes.
    pub advertise: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_TRANSFER_PORT,
            output_dir: PathBuf::from("./received"),
            service_name: None,
            pair_code: None,
            rotate_per_transfer: false,
            pair_ttl: None,
            generate_pair_code: None,
            on_pair_code_change: None,
            confirm_transfer: None,
            tls: None,
            progress: None,
            advertise: true,
        }
    }
}

/// Running receiver; keep it alive for as long as the receiver should run.
#[derive(Debug)]
pub struct ReceiverHandle {
    local_addr: SocketAddr,
    pairing: Arc<Pairing>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReceiverHandle {
    /// Address the transfer listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Effective transfer port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The pair code currently required for admission.
    pub fn current_pair_code(&self) -> Option<String> {
        self.pairing.current_code()
    }

    /// Stop the receiver: close the listener, stop discovery and the TTL
    /// ticker, then give in-flight sessions [`SHUTDOWN_GRACE`] before they
    /// are aborted.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let mut task = self.task;
        // The accept loop enforces the grace itself; the margin here only
        // guards a wedged task.
        if tokio::time::timeout(SHUTDOWN_GRACE * 2, &mut task).await.is_err() {
            task.abort();
        }
    }
}

/// Start a receiver.
pub async fn start_receiver(config: ReceiverConfig) -> Result<ReceiverHandle> {
    tokio::fs::create_dir_all(&config.output_dir).await?;

    let acceptor = match &config.tls {
        Some(tls) => Some(build_acceptor(tls)?),
        None => None,
    };

    let pairing = Pairing::new(PairingConfig {
        code: config.pair_code.clone(),
        rotate_per_transfer: config.rotate_per_transfer,
        ttl: config.pair_ttl,
        generator: config.generate_pair_code.clone(),
        on_change: config.on_pair_code_change.clone(),
    })?;

    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
    let local_addr = listener.local_addr()?;

    let service_name = config
        .service_name
        .clone()
        .unwrap_or_else(default_service_name);

    let (advertiser, responder) = if config.advertise {
        let advertiser = match MdnsAdvertiser::register(&service_name, local_addr.port()) {
            Ok(advertiser) => Some(advertiser),
            Err(e) => {
                warn!(error = %e, "mDNS advertisement unavailable");
                None
            }
        };
        let responder = match UdpResponder::spawn(service_name.clone(), local_addr.port()).await {
            Ok(responder) => Some(responder),
            Err(e) => {
                warn!(error = %e, "UDP discovery responder unavailable");
                None
            }
        };
        (advertiser, responder)
    } else {
        (None, None)
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    let ttl_ticker = spawn_ttl_ticker(Arc::clone(&pairing), stop_rx.clone());

    let ctx = Arc::new(SessionContext {
        output_dir: config.output_dir.clone(),
        pairing: Arc::clone(&pairing),
        confirm: config.confirm_transfer.clone(),
        sink: config.progress.clone().unwrap_or_else(stdout_sink),
    });

    info!(
        addr = %local_addr,
        name = service_name,
        tls = acceptor.is_some(),
        "receiver listening"
    );

    let task = tokio::spawn(accept_loop(
        listener,
        acceptor,
        ctx,
        stop_rx,
        advertiser,
        responder,
        ttl_ticker,
    ));

    Ok(ReceiverHandle {
        local_addr,
        pairing,
        stop: stop_tx,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    ctx: Arc<SessionContext>,
    mut stop_rx: watch::Receiver<bool>,
    advertiser: Option<MdnsAdvertiser>,
    responder: Option<UdpResponder>,
    ttl_ticker: Option<JoinHandle<()>>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = stop_rx.changed() => break,

            // Reap finished sessions so the set stays small.
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}

            accepted = listener.accept() => match accepted {
                Ok((tcp, peer)) => {
                    debug!(%peer, "connection accepted");
                    let _ = tcp.set_nodelay(true);
                    let ctx = Arc::clone(&ctx);
                    match acceptor.clone() {
                        Some(acceptor) => {
                            sessions.spawn(async move {
                                match acceptor.accept(tcp).await {
                                    Ok(tls) => session::run_session(tls, peer, ctx).await,
                                    Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
                                }
                            });
                        }
                        None => {
                            sessions.spawn(session::run_session(tcp, peer, ctx));
                        }
                    }
                }
                Err(e) => debug!(error = %e, "accept error"),
            },
        }
    }

    // Stop taking new work, then drain with a grace period.
    drop(listener);
    if let Some(advertiser) = advertiser {
        advertiser.shutdown();
    }
    if let Some(responder) = responder {
        responder.shutdown();
    }
    if let Some(ticker) = ttl_ticker {
        ticker.abort();
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while sessions.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("forcing remaining sessions closed");
        sessions.shutdown().await;
    }
    info!("receiver stopped");
}

fn spawn_ttl_ticker(
    pairing: Arc<Pairing>,
    mut stop_rx: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let ttl = pairing.ttl()?;
    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + ttl, ttl);
        loop {
            tokio::select! {
                _ = stop_rx.changed() => break,
                _ = interval.tick() => {
                    pairing.ttl_tick();
                }
            }
        }
    }))
}

fn build_acceptor(tls: &TlsServerConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&tls.cert_path)?;
    let key = load_private_key(&tls.key_path)?;
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::config(format!("invalid TLS certificate/key: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn default_service_name() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "local-sent".to_string())
}
