use log::{error, info, warn};
use std::collections::HashMap;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use crate::client::{CommandReader, ControlChannel, SessionContext, run_session};
use crate::config::ServerConfig;
use crate::error::FtpServerError;
use crate::error::handlers::handle_error;
use crate::protocol::handlers::standard_registry;
use crate::protocol::parser::CommandRegistry;
use crate::protocol::responses::{self, format_response, messages};
use crate::server::collaborators::Collaborators;

/// Connected clients and when they connected.
type ClientRegistry = Arc<Mutex<HashMap<SocketAddr, Instant>>>;

pub struct Server {
    client_registry: ClientRegistry,
    command_registry: Arc<CommandRegistry>,
    listener: TcpListener,
    config: Arc<ServerConfig>,
    collaborators: Collaborators,
}

impl Server {
    pub async fn new(
        config: ServerConfig,
        collaborators: Collaborators,
    ) -> Result<Self, FtpServerError> {
        let control_socket = config.server.control_socket();
        let listener = match TcpListener::bind(&control_socket).await {
            Ok(listener) => {
                info!("Server bound to {}", control_socket);
                listener
            }
            Err(e) => {
                error!("Failed to bind to {}: {}", control_socket, e);
                return Err(e.into());
            }
        };

        let server_root = config.server.server_root_path();
        if let Err(e) = std::fs::create_dir_all(&server_root) {
            warn!("Failed to create server root directory: {}", e);
        } else {
            info!("Server root directory: {}", server_root.display());
        }

        Ok(Self {
            client_registry: Arc::new(Mutex::new(HashMap::new())),
            command_registry: Arc::new(standard_registry()),
            listener,
            config: Arc::new(config),
            collaborators,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn start(&self) {
        info!(
            "Starting Rax FTP server on {} (max {} clients)",
            self.config.server.control_socket(),
            self.config.limits.max_clients
        );

        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let client_registry = Arc::clone(&self.client_registry);
                    let command_registry = Arc::clone(&self.command_registry);
                    let config = Arc::clone(&self.config);
                    let collaborators = self.collaborators.clone();

                    // Spawn a task for each client so accept loop doesn't block
                    tokio::spawn(async move {
                        if let Err(e) = handle_new_client(
                            stream,
                            addr,
                            client_registry,
                            command_registry,
                            config,
                            collaborators,
                        )
                        .await
                        {
                            warn!("Failed to handle client {}", addr);
                            handle_error(&e);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                }
            }
        }
    }
}

/// Registers a new client, serves its session and unregisters it.
async fn handle_new_client(
    mut stream: TcpStream,
    client_addr: SocketAddr,
    client_registry: ClientRegistry,
    command_registry: Arc<CommandRegistry>,
    config: Arc<ServerConfig>,
    collaborators: Collaborators,
) -> Result<(), FtpServerError> {
    {
        let mut clients = client_registry.lock().await;
        if clients.len() >= config.limits.max_clients {
            warn!("Rejecting {}: {} clients connected", client_addr, clients.len());
            let reply = format_response(responses::SERVICE_UNAVAILABLE, messages::TOO_MANY_USERS);
            stream.write_all(reply.as_bytes()).await?;
            return Ok(());
        }
        clients.insert(client_addr, Instant::now());
        info!(
            "Accepted client: {} ({}/{} clients)",
            client_addr,
            clients.len(),
            config.limits.max_clients
        );
    }

    let result = serve_session(stream, client_addr, command_registry, config, collaborators).await;

    client_registry.lock().await.remove(&client_addr);
    result
}

/// Greets the client, then hands the socket to a reader thread and a
/// blocking worker.
async fn serve_session(
    mut stream: TcpStream,
    client_addr: SocketAddr,
    command_registry: Arc<CommandRegistry>,
    config: Arc<ServerConfig>,
    collaborators: Collaborators,
) -> Result<(), FtpServerError> {
    let greeting = format_response(responses::READY, messages::GREETING);
    stream.write_all(greeting.as_bytes()).await?;
    stream.flush().await?;

    let stream = stream.into_std()?;
    stream.set_nonblocking(false)?;
    let local_ip = stream.local_addr()?.ip();

    let control = ControlChannel::new(stream.try_clone()?);
    let input = BufReader::new(stream.try_clone()?);

    collaborators.events.session_opened(client_addr);
    let session = SessionContext::new(
        client_addr,
        local_ip,
        Arc::clone(&config),
        collaborators.clone(),
        control.clone(),
    )
    .with_control_socket(stream);

    let reader = match CommandReader::spawn(
        Box::new(input),
        control,
        command_registry,
        config.server.max_command_length,
        client_addr,
    ) {
        Ok(reader) => reader,
        Err(e) => {
            collaborators.events.session_closed(client_addr);
            return Err(e.into());
        }
    };

    if let Err(e) = tokio::task::spawn_blocking(move || run_session(session, reader)).await {
        error!("Session worker for {} panicked: {}", client_addr, e);
    }
    Ok(())
}
