//! SSH Tunnel Manager
//!
//! Forwards a local TCP port to the database host through a bastion, so the
//! pool can connect to `127.0.0.1:<local_port>` as if the database were local.

use async_trait::async_trait;
use russh::client;
use russh::Disconnect;
use russh_keys::key::KeyPair;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TunnelConfig;
use crate::error::{Error, Result};

type Session = Arc<Mutex<client::Handle<TunnelClient>>>;

fn tunnel_error(context: &str, e: impl Display) -> Error {
    Error::Tunnel(format!("{}: {}", context, e))
}

/// russh client callbacks
struct TunnelClient;

#[async_trait]
impl client::Handler for TunnelClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        // Host keys are not pinned
        Ok(true)
    }
}

struct ActiveTunnel {
    local_addr: SocketAddr,
    session: Session,
    cancel: CancellationToken,
    accept_loop: JoinHandle<()>,
}

/// Owns at most one forwarding tunnel
#[derive(Default)]
pub struct TunnelManager {
    active: Mutex<Option<ActiveTunnel>>,
}

impl TunnelManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the tunnel described by `config`
    ///
    /// Returns the local address to connect to, or `None` when tunneling is
    /// disabled. A second call while a tunnel is up returns the existing
    /// address.
    pub async fn connect(&self, config: Option<&TunnelConfig>) -> Result<Option<SocketAddr>> {
        let Some(config) = config else {
            tracing::debug!("SSH tunnel disabled");
            return Ok(None);
        };

        let mut active = self.active.lock().await;
        if let Some(existing) = active.as_ref() {
            tracing::warn!(local_addr = %existing.local_addr, "SSH tunnel already established");
            return Ok(Some(existing.local_addr));
        }

        tracing::info!(
            bastion = %config.bastion_host,
            port = config.bastion_port,
            user = %config.bastion_user,
            remote = %format!("{}:{}", config.remote_host, config.remote_port),
            "Establishing SSH tunnel"
        );

        let key = load_private_key(config).await?;

        let mut handle = tokio::time::timeout(
            config.connect_timeout,
            client::connect(
                Arc::new(client::Config::default()),
                (config.bastion_host.as_str(), config.bastion_port),
                TunnelClient,
            ),
        )
        .await
        .map_err(|_| {
            tunnel_error(
                "Failed to connect to bastion",
                format!("timed out after {}s", config.connect_timeout.as_secs()),
            )
        })?
        .map_err(|e| tunnel_error("Failed to connect to bastion", e))?;

        let authenticated = handle
            .authenticate_publickey(&config.bastion_user, key)
            .await
            .map_err(|e| tunnel_error("SSH authentication failed", e))?;
        if !authenticated {
            disconnect(&handle).await;
            return Err(Error::Tunnel(format!(
                "SSH authentication rejected for {}@{}",
                config.bastion_user, config.bastion_host
            )));
        }
        tracing::info!("SSH authentication successful");

        if let Err(e) = check_remote_reachable(&handle, config).await {
            disconnect(&handle).await;
            return Err(e);
        }

        let listener = match TcpListener::bind(("127.0.0.1", config.local_port)).await {
            Ok(listener) => listener,
            Err(e) => {
                disconnect(&handle).await;
                return Err(tunnel_error(
                    &format!("Failed to bind local port {}", config.local_port),
                    e,
                ));
            }
        };
        let local_addr = listener
            .local_addr()
            .map_err(|e| tunnel_error("Failed to read local address", e))?;

        let session: Session = Arc::new(Mutex::new(handle));
        let cancel = CancellationToken::new();
        let accept_loop = tokio::spawn(run_forwarding(
            listener,
            session.clone(),
            config.remote_host.clone(),
            config.remote_port,
            cancel.clone(),
        ));

        tracing::info!(%local_addr, "SSH tunnel established");
        *active = Some(ActiveTunnel {
            local_addr,
            session,
            cancel,
            accept_loop,
        });
        Ok(Some(local_addr))
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Stop forwarding and disconnect from the bastion
    ///
    /// Does nothing when no tunnel is up.
    pub async fn close(&self) -> Result<()> {
        let Some(tunnel) = self.active.lock().await.take() else {
            tracing::info!("SSH tunnel was not active, skipping closure");
            return Ok(());
        };

        tracing::info!(local_addr = %tunnel.local_addr, "Closing SSH tunnel");
        tunnel.cancel.cancel();
        if let Err(e) = tunnel.accept_loop.await {
            tracing::warn!(error = %e, "Tunnel accept loop ended abnormally");
        }

        let handle = tunnel.session.lock().await;
        handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| tunnel_error("Failed to disconnect from bastion", e))?;
        tracing::info!("SSH tunnel closed");
        Ok(())
    }
}

async fn load_private_key(config: &TunnelConfig) -> Result<Arc<KeyPair>> {
    let path = &config.private_key_path;
    let pem = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| tunnel_error(&format!("Failed to read SSH key {}", path.display()), e))?;
    let passphrase = config.passphrase.as_ref().map(|p| p.expose());
    let key = russh_keys::decode_secret_key(&pem, passphrase)
        .map_err(|e| tunnel_error(&format!("Failed to parse SSH key {}", path.display()), e))?;
    Ok(Arc::new(key))
}

/// Open and close one forwarding channel to prove the remote is reachable
async fn check_remote_reachable(
    handle: &client::Handle<TunnelClient>,
    config: &TunnelConfig,
) -> Result<()> {
    let opened = tokio::time::timeout(
        config.connect_timeout,
        handle.channel_open_direct_tcpip(
            config.remote_host.as_str(),
            u32::from(config.remote_port),
            "127.0.0.1",
            0,
        ),
    )
    .await;

    let context = format!(
        "Bastion cannot reach {}:{}",
        config.remote_host, config.remote_port
    );
    match opened {
        Ok(Ok(channel)) => {
            if let Err(e) = channel.close().await {
                tracing::debug!(error = %e, "Failed to close reachability check channel");
            }
            Ok(())
        }
        Ok(Err(e)) => Err(tunnel_error(&context, e)),
        Err(_) => Err(tunnel_error(&context, "timed out")),
    }
}

async fn disconnect(handle: &client::Handle<TunnelClient>) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, "", "English")
        .await
    {
        tracing::debug!(error = %e, "Failed to disconnect from bastion");
    }
}

async fn run_forwarding(
    listener: TcpListener,
    session: Session,
    remote_host: String,
    remote_port: u16,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(%peer, "Accepted tunnel connection");
                    let session = session.clone();
                    let remote_host = remote_host.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) =
                            forward_connection(stream, session, &remote_host, remote_port, cancel).await
                        {
                            tracing::warn!(error = %e, "Tunnel forwarding error");
                        }
                    });
                }
                Err(e) => tracing::error!(error = %e, "Failed to accept tunnel connection"),
            },
            _ = cancel.cancelled() => {
                tracing::debug!("Tunnel accept loop stopped");
                break;
            }
        }
    }
}

async fn forward_connection(
    mut local: TcpStream,
    session: Session,
    remote_host: &str,
    remote_port: u16,
    cancel: CancellationToken,
) -> Result<()> {
    let channel = {
        let handle = session.lock().await;
        handle
            .channel_open_direct_tcpip(remote_host, u32::from(remote_port), "127.0.0.1", 0)
            .await
            .map_err(|e| tunnel_error("Failed to open SSH channel", e))?
    };
    let mut remote = channel.into_stream();

    tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut local, &mut remote) => {
            let (up, down) = copied.map_err(|e| tunnel_error("Tunnel stream failed", e))?;
            tracing::debug!(bytes_up = up, bytes_down = down, "Tunnel connection finished");
        }
        _ = cancel.cancelled() => {}
    }
    Ok(())
}
