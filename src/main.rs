use std::sync::Arc;

use tokio_util::sync::CancellationToken;

mod api;
mod config;
mod session;

use session::Session;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("decode_bus", log::LevelFilter::Debug)
        .filter_module("decode_pipe", log::LevelFilter::Debug)
        .init();
}

#[tokio::main]
async fn main() -> ! {
    init_logging();
    let config = config::config();

    let session = Session::new(config)
        .map(Arc::new)
        .unwrap_or_else(|e| {
            eprintln!("Error creating decode session: {:#}", e);
            std::process::exit(1);
        });
    if let Err(e) = session.start() {
        eprintln!("Error starting decode session: {:#}", e);
        std::process::exit(1);
    }

    let cancel = CancellationToken::new();

    let cancel_clone = cancel.clone();
    api::start_api_server(config.api_addr.clone(), Arc::clone(&session), cancel_clone);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            },
        }
    }

    session.shutdown().await;
    std::process::exit(0);
}
