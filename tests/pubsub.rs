mod common;

#[cfg(test)]
mod tests {
    use crate::common::start_server;
    use std::io::{ErrorKind, Read, Write};
    use std::net::TcpStream;
    use std::thread;
    use std::time::Duration;

    fn pubsub_handler(conn: &std::rc::Rc<rivulet::TcpConn>) {
        conn.set_read_callback(|conn| {
            let Some(line) = conn.read_until(b'\n') else {
                return -1;
            };
            if line == b"SUB" {
                conn.subscribe();
            } else if line == b"UNSUB" {
                conn.unsubscribe();
            } else if let Some(payload) = line.strip_prefix(b"PUB ") {
                let _ = conn.broadcast(payload);
            }
            0
        });
    }

    fn connect(port: u16) -> TcpStream {
        let stream =
            TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect to server");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("Failed to set read timeout");
        stream
    }

    /// Gives the loop time to process a just-written command before
    /// the next client races it.
    fn settle() {
        thread::sleep(Duration::from_millis(200));
    }

    #[test]
    fn test_subscribers_receive_broadcast_publisher_does_not() {
        let harness = start_server(pubsub_handler);

        let mut a = connect(harness.port);
        let mut b = connect(harness.port);
        let mut c = connect(harness.port);

        a.write_all(b"SUB\n").expect("Failed to subscribe A");
        b.write_all(b"SUB\n").expect("Failed to subscribe B");
        settle();

        c.write_all(b"PUB hello\n").expect("Failed to publish");

        let mut got_a = [0u8; 5];
        a.read_exact(&mut got_a).expect("A did not receive payload");
        assert_eq!(&got_a, b"hello");

        let mut got_b = [0u8; 5];
        b.read_exact(&mut got_b).expect("B did not receive payload");
        assert_eq!(&got_b, b"hello");

        // The publisher never subscribed, so it must receive nothing.
        c.set_read_timeout(Some(Duration::from_millis(300)))
            .expect("Failed to set read timeout");
        let mut nothing = [0u8; 1];
        match c.read(&mut nothing) {
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            other => panic!("Publisher unexpectedly received data: {other:?}"),
        }
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let harness = start_server(pubsub_handler);

        let mut a = connect(harness.port);
        let mut b = connect(harness.port);
        let mut c = connect(harness.port);

        a.write_all(b"SUB\n").expect("Failed to subscribe A");
        b.write_all(b"SUB\n").expect("Failed to subscribe B");
        settle();

        b.write_all(b"UNSUB\n").expect("Failed to unsubscribe B");
        settle();

        c.write_all(b"PUB again\n").expect("Failed to publish");

        let mut got_a = [0u8; 5];
        a.read_exact(&mut got_a).expect("A did not receive payload");
        assert_eq!(&got_a, b"again");

        b.set_read_timeout(Some(Duration::from_millis(300)))
            .expect("Failed to set read timeout");
        let mut nothing = [0u8; 1];
        match b.read(&mut nothing) {
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            other => panic!("Unsubscribed client received data: {other:?}"),
        }
    }

    #[test]
    fn test_disconnected_subscriber_is_skipped() {
        let harness = start_server(pubsub_handler);

        let mut a = connect(harness.port);
        let b = connect(harness.port);
        let mut c = connect(harness.port);

        a.write_all(b"SUB\n").expect("Failed to subscribe A");
        {
            let mut b = b;
            b.write_all(b"SUB\n").expect("Failed to subscribe B");
            settle();
            // B drops; its registry entry goes away with the FIN.
        }
        settle();

        c.write_all(b"PUB solo\n").expect("Failed to publish");

        let mut got_a = [0u8; 4];
        a.read_exact(&mut got_a).expect("A did not receive payload");
        assert_eq!(&got_a, b"solo");
    }
}
