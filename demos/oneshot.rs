//! One-shot request/response demo.
//!
//! Waits for at least 15 request bytes on each connection, then
//! answers with a fixed HTTP-ish payload.

use clap::Parser;
use log::{error, info};
use std::process;

use rivulet::{EventLoop, TcpServer};

/// 50-byte canned response, trailing NUL included.
const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\nContent-Length: 12\n\nHello World!\n\0";

/// Minimum request size before we answer.
const MIN_REQUEST_LEN: usize = 15;

#[derive(Parser)]
#[command(about = "One-shot TCP responder")]
struct Cli {
    /// TCP port to listen on.
    #[arg(value_parser = clap::value_parser!(u16).range(1..))]
    port: u16,
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };

    let ev_loop = match EventLoop::new() {
        Ok(ev_loop) => ev_loop,
        Err(e) => {
            error!("failed to create event loop: {e}");
            process::exit(2);
        }
    };

    let server = match TcpServer::new(ev_loop.clone()) {
        Ok(server) => server,
        Err(e) => {
            error!("{e}");
            process::exit(2);
        }
    };

    let started = server.start(cli.port, |conn| {
        info!("new connection fd {}", conn.fd());

        conn.set_close_callback(|fd| info!("connection fd {fd} closed"));

        conn.set_read_callback(|conn| {
            if conn.readable_size() < MIN_REQUEST_LEN {
                return -1; // wait for the rest of the request
            }
            let request = conn.read_all();
            info!("received {} request bytes", request.len());
            if let Err(e) = conn.send(RESPONSE) {
                error!("response failed: {e}");
            }
            0
        });
    });

    if let Err(e) = started {
        error!("{e}");
        process::exit(2);
    }

    ev_loop.run();
}
