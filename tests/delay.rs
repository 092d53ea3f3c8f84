mod common;

#[cfg(test)]
mod tests {
    use crate::common::start_server;
    use rivulet::sched;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::time::{Duration, Instant};

    /// A handler that answers through a coroutine which yields a few
    /// turns and then waits on the timed scheduler must not stall the
    /// loop: a concurrent client gets served in the interim, and the
    /// delayed response arrives after the deadline.
    #[test]
    fn test_delayed_coroutine_response_keeps_loop_responsive() {
        const DELAY: Duration = Duration::from_millis(400);

        let harness = start_server(move |conn| {
            conn.set_read_callback(move |conn| {
                let Some(line) = conn.read_until(b'\n') else {
                    return -1;
                };

                if line == b"slow" {
                    let conn = conn.clone();
                    sched::spawn(async move {
                        for _ in 0..10 {
                            sched::yield_now().await;
                        }
                        sched::sleep(DELAY).await;
                        let _ = conn.send_async(b"late\n").await;
                    });
                } else {
                    let _ = conn.send(b"now\n");
                }
                0
            });
        });

        let mut slow =
            TcpStream::connect(("127.0.0.1", harness.port)).expect("Failed to connect");
        slow.set_read_timeout(Some(Duration::from_secs(10)))
            .expect("Failed to set read timeout");

        let start = Instant::now();
        slow.write_all(b"slow\n").expect("Failed to write request");

        // While the slow response is pending, a second client must
        // round-trip immediately.
        let mut fast =
            TcpStream::connect(("127.0.0.1", harness.port)).expect("Failed to connect");
        fast.set_read_timeout(Some(Duration::from_secs(10)))
            .expect("Failed to set read timeout");
        fast.write_all(b"hi\n").expect("Failed to write request");

        let mut now = [0u8; 4];
        fast.read_exact(&mut now).expect("Failed to read fast reply");
        assert_eq!(&now, b"now\n");
        assert!(
            start.elapsed() < DELAY,
            "Fast client was stalled behind the delayed coroutine"
        );

        let mut late = [0u8; 5];
        slow.read_exact(&mut late).expect("Failed to read slow reply");
        assert_eq!(&late, b"late\n");

        let elapsed = start.elapsed();
        assert!(
            elapsed >= DELAY,
            "Delayed response arrived before the deadline: {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_secs(5),
            "Delayed response took too long: {elapsed:?}"
        );
    }
}
