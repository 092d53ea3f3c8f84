//! Line-oriented publish/subscribe demo.
//!
//! Protocol, newline-delimited:
//!   `SUB`           register the sender as a subscriber
//!   `UNSUB`         deregister it
//!   `PUB <payload>` send `<payload>` to every current subscriber
//! Anything else is ignored.

use clap::Parser;
use log::{error, info};
use std::process;

use rivulet::{EventLoop, TcpServer};

#[derive(Parser)]
#[command(about = "Line-oriented pub/sub server")]
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
            let Some(line) = conn.read_until(b'\n') else {
                return -1; // no full command yet
            };

            let cmd = String::from_utf8_lossy(&line);
            info!("cmd: {cmd}");

            if cmd == "SUB" {
                conn.subscribe();
            } else if cmd == "UNSUB" {
                conn.unsubscribe();
            } else if let Some(payload) = cmd.strip_prefix("PUB ") {
                if let Err(e) = conn.broadcast(payload.as_bytes()) {
                    error!("broadcast failed: {e}");
                }
            }
            // Unknown commands are ignored.
            0
        });
    });

    if let Err(e) = started {
        error!("{e}");
        process::exit(2);
    }

    ev_loop.run();
}
