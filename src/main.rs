use clap::Parser;
use log::{info, warn};

use room_broadcast::tls::load_tls_config;
use room_broadcast::{Config, Server};

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let routes = Server::new(config.kdf).routes();
    let addr = config.listen_addr();

    let tls_paths = config.tls_cert.as_deref().zip(config.tls_key.as_deref());
    let tls_paths = match tls_paths {
        Some((cert, key)) => match load_tls_config(cert, key) {
            Ok(_) => Some((cert, key)),
            Err(e) => {
                warn!("Failed to load TLS config ({}), falling back to WS", e);
                None
            }
        },
        None => None,
    };

    match tls_paths {
        Some((cert, key)) => {
            let (bound, server) = warp::serve(routes)
                .tls()
                .cert_path(cert)
                .key_path(key)
                .bind_with_graceful_shutdown(addr, shutdown_signal());
            info!("Serving WSS on {}", bound);
            server.await;
        }
        None => {
            let (bound, server) =
                warp::serve(routes).try_bind_with_graceful_shutdown(addr, shutdown_signal())?;
            info!("Serving WS on {}", bound);
            server.await;
        }
    }

    Ok(())
}
