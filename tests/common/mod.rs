//! Shared harness: runs an event loop + server on its own thread and
//! hands the test the bound port. The loop stops when the harness is
//! dropped, via a watchdog coroutine polling the stop flag.

use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use rivulet::{EventLoop, TcpConn, TcpServer, sched};

pub struct ServerHarness {
    pub port: u16,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// Starts a server on an ephemeral port with the given new-connection
/// callback and runs its loop on a dedicated thread.
pub fn start_server(on_conn: impl Fn(&Rc<TcpConn>) + Send + 'static) -> ServerHarness {
    let (port_tx, port_rx) = mpsc::channel();
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let thread = thread::spawn(move || {
        let ev_loop = EventLoop::new().expect("Failed to create event loop");
        let server = TcpServer::new(ev_loop.clone()).expect("Failed to create server");
        server.start(0, on_conn).expect("Failed to start server");

        let port = server.local_port().expect("Failed to query bound port");
        port_tx.send(port).expect("Port channel closed");

        let watchdog_loop = ev_loop.clone();
        sched::spawn(async move {
            loop {
                if stop_flag.load(Ordering::Relaxed) {
                    watchdog_loop.stop();
                    return;
                }
                sched::yield_now().await;
            }
        });

        ev_loop.run();
    });

    let port = port_rx.recv().expect("Server thread died before binding");
    ServerHarness {
        port,
        stop,
        thread: Some(thread),
    }
}

impl Drop for ServerHarness {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.join().expect("Loop thread panicked");
        }
    }
}
