//! RAX FTP Server - Entry Point
//!
//! A Rust FTP server implementing RFC 959 with block mode, record structure
//! and charset-aware text transfers.

use log::{error, info};
use std::process;

use rax_ftpd::{Collaborators, Server, ServerConfig};

#[tokio::main]
async fn main() {
    // Initialize the logger (env_logger picks up RUST_LOG environment variable)
    env_logger::init();

    info!("Launching FTP server...");

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let server = match Server::new(config, Collaborators::standard()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server startup failed: {}", e);
            process::exit(1);
        }
    };
    server.start().await;
}
