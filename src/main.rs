//! fcgi-mux: a demo FastCGI responder.
//!
//! Answers every request with a small JSON document:
//! - requests without `REQUEST_URI` fail with application status 1
//! - request body bytes are echoed to stderr, each incremented by one
//! - a non-empty `REQUEST_BODY` parameter adds an `id` field to the reply

mod config;

use config::Config;
use fcgi_mux::{Handler, Request, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Demo application callbacks.
struct JsonResponder;

impl Handler for JsonResponder {
    fn on_params_ready(&mut self, request: &mut Request) -> i32 {
        if request.param("REQUEST_URI").is_some() {
            0
        } else {
            1
        }
    }

    fn on_data(&mut self, request: &mut Request) -> i32 {
        request
            .err
            .extend(request.input.iter().map(|b| b.wrapping_add(1)));
        request.input.clear();
        0
    }

    fn on_complete(&mut self, request: &mut Request) -> i32 {
        request
            .out
            .extend_from_slice(b"Content-Type: application/json\r\n\r\n{");
        if request.param("REQUEST_BODY").is_some_and(|body| !body.is_empty()) {
            request.out.extend_from_slice(br#""id":"FxAaGosSaM""#);
        }
        request.out.push(b'}');
        0
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        endpoints = config.endpoints.len(),
        timeout = ?config.timeout,
        abandon_files = config.abandon_files,
        "Starting fcgi-mux"
    );

    let mut server = Server::new(JsonResponder)?;
    for endpoint in &config.endpoints {
        server.listen(endpoint)?;
    }
    if config.abandon_files {
        server.abandon_files();
    }

    match config.timeout {
        None => server.process_forever()?,
        Some(timeout) => loop {
            server.process(Some(timeout))?;
        },
    }

    Ok(())
}
