mod common;

#[cfg(test)]
mod tests {
    use crate::common::start_server;
    use std::io::{Read, Write};
    use std::net::{Shutdown, TcpStream};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn connect(port: u16) -> TcpStream {
        let stream =
            TcpStream::connect(("127.0.0.1", port)).expect("Failed to connect to server");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .expect("Failed to set read timeout");
        stream
    }

    #[test]
    fn test_echo_roundtrip() {
        let harness = start_server(|conn| {
            conn.set_read_callback(|conn| {
                let msg = conn.read_all();
                let _ = conn.send(&msg);
                0
            });
        });

        let mut stream = connect(harness.port);

        // 1 MiB in 1 KiB chunks, write/read alternating so neither
        // side's buffers overflow.
        let chunk: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
        for _ in 0..1024 {
            stream.write_all(&chunk).expect("Failed to write chunk");
            let mut echoed = [0u8; 1024];
            stream
                .read_exact(&mut echoed)
                .expect("Failed to read echoed chunk");
            assert_eq!(&echoed[..], &chunk[..], "Echoed bytes differ");
        }
    }

    #[test]
    fn test_oneshot_response() {
        const RESPONSE_LEN: usize = 50;

        let harness = start_server(|conn| {
            conn.set_read_callback(|conn| {
                if conn.readable_size() < 15 {
                    return -1;
                }
                let _request = conn.read_all();
                let response = b"HTTP/1.1 200 OK\nContent-Length: 12\n\nHello World!\n\0";
                conn.send(&response[..]).expect("Response send failed");
                0
            });
        });

        let mut stream = connect(harness.port);
        stream
            .write_all(b"GET / HTTP/1.0\r\n\r\n")
            .expect("Failed to write request");

        let mut response = [0u8; RESPONSE_LEN];
        stream
            .read_exact(&mut response)
            .expect("Failed to read response");
        let expected = b"HTTP/1.1 200 OK\nContent-Length: 12\n\nHello World!\n\0";
        assert_eq!(&response[..], &expected[..]);
    }

    #[test]
    fn test_half_close_ping_pong() {
        let close_count = Arc::new(AtomicUsize::new(0));
        let close_counter = close_count.clone();

        let harness = start_server(move |conn| {
            let close_counter = close_counter.clone();
            conn.set_close_callback(move |_| {
                close_counter.fetch_add(1, Ordering::SeqCst);
            });
            conn.set_read_callback(|conn| {
                let Some(line) = conn.read_until(b'\n') else {
                    return -1;
                };
                if line == b"ping" {
                    conn.send(b"pong\n").expect("Pong send failed");
                }
                0
            });
        });

        let mut stream = connect(harness.port);
        stream.write_all(b"ping\n").expect("Failed to write ping");
        stream
            .shutdown(Shutdown::Write)
            .expect("Failed to half-close");

        let mut pong = [0u8; 5];
        stream.read_exact(&mut pong).expect("Failed to read pong");
        assert_eq!(&pong, b"pong\n");

        // After the pong the server observes our FIN with drained
        // buffers and closes; we must see EOF.
        let mut rest = Vec::new();
        stream
            .read_to_end(&mut rest)
            .expect("Failed to read to EOF");
        assert!(rest.is_empty(), "Unexpected bytes after pong: {rest:?}");

        drop(stream);
        // Give the loop a moment to finish the removal protocol.
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_callback_fires_once_on_double_close() {
        let close_count = Arc::new(AtomicUsize::new(0));
        let close_counter = close_count.clone();

        let harness = start_server(move |conn| {
            let close_counter = close_counter.clone();
            conn.set_close_callback(move |_| {
                close_counter.fetch_add(1, Ordering::SeqCst);
            });
            conn.set_read_callback(|conn| {
                let _ = conn.read_all();
                // Closing twice must be observationally identical to
                // closing once.
                conn.close();
                conn.close();
                0
            });
        });

        let mut stream = connect(harness.port);
        stream.write_all(b"x").expect("Failed to write");

        let mut rest = Vec::new();
        stream
            .read_to_end(&mut rest)
            .expect("Failed to read to EOF");
        assert!(rest.is_empty());

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(close_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_n_consumes_exact_chunks() {
        let harness = start_server(|conn| {
            conn.set_read_callback(|conn| {
                // Echo in fixed 4-byte frames; partial frames wait.
                let Some(chunk) = conn.read_n(4) else {
                    return -1;
                };
                conn.send(&chunk).expect("Echo send failed");
                0
            });
        });

        let mut stream = connect(harness.port);
        stream.write_all(b"abcdefgh").expect("Failed to write");

        let mut echoed = [0u8; 8];
        stream.read_exact(&mut echoed).expect("Failed to read echo");
        assert_eq!(&echoed, b"abcdefgh");

        // A trailing partial frame must not be echoed.
        stream.write_all(b"xy").expect("Failed to write partial");
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .expect("Failed to set read timeout");
        let mut nothing = [0u8; 1];
        assert!(
            stream.read(&mut nothing).is_err(),
            "Partial frame was echoed"
        );
    }

    #[test]
    fn test_read_until_crlf() {
        let harness = start_server(|conn| {
            conn.set_read_callback(|conn| {
                let Some(line) = conn.read_until_crlf() else {
                    return -1;
                };
                conn.send(&line).expect("Line send failed");
                conn.send(b"\n").expect("Separator send failed");
                0
            });
        });

        let mut stream = connect(harness.port);
        stream
            .write_all(b"one\r\ntwo\r\n")
            .expect("Failed to write lines");

        let mut lines = [0u8; 8];
        stream.read_exact(&mut lines).expect("Failed to read lines");
        assert_eq!(&lines, b"one\ntwo\n");
    }

    #[test]
    fn test_send_blocking_delivers_everything() {
        const PAYLOAD_LEN: usize = 256 * 1024;

        let harness = start_server(|conn| {
            conn.set_read_callback(|conn| {
                let _ = conn.read_all();
                let payload: Vec<u8> = (0..PAYLOAD_LEN).map(|i| (i % 199) as u8).collect();
                conn.send_blocking(&payload)
                    .expect("Blocking send failed");
                0
            });
        });

        let mut stream = connect(harness.port);
        stream.write_all(b"go").expect("Failed to write trigger");

        let mut received = vec![0u8; PAYLOAD_LEN];
        stream
            .read_exact(&mut received)
            .expect("Failed to read full payload");
        for (i, &b) in received.iter().enumerate() {
            assert_eq!(b, (i % 199) as u8, "Byte {i} corrupted");
        }
    }

    #[test]
    fn test_reads_after_close_return_nothing() {
        let verified = Arc::new(AtomicUsize::new(0));
        let verified_flag = verified.clone();

        let harness = start_server(move |conn| {
            let verified_flag = verified_flag.clone();
            conn.set_read_callback(move |conn| {
                // Close with bytes still buffered; the accessors must
                // not hand out the stale pre-close data.
                conn.close();
                if conn.read_all().is_empty()
                    && conn.read_until(b'\n').is_none()
                    && conn.read_until_crlf().is_none()
                    && conn.read_n(1).is_none()
                {
                    verified_flag.fetch_add(1, Ordering::SeqCst);
                }
                0
            });
        });

        let mut stream = connect(harness.port);
        stream
            .write_all(b"dangling\r\n")
            .expect("Failed to write");

        let mut rest = Vec::new();
        stream
            .read_to_end(&mut rest)
            .expect("Failed to read to EOF");
        assert!(rest.is_empty());

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(verified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_send_after_close_is_rejected() {
        let rejected = Arc::new(AtomicUsize::new(0));
        let rejected_flag = rejected.clone();

        let harness = start_server(move |conn| {
            let rejected_flag = rejected_flag.clone();
            conn.set_read_callback(move |conn| {
                let _ = conn.read_all();
                conn.close();
                if conn.send(b"too late").is_err() {
                    rejected_flag.fetch_add(1, Ordering::SeqCst);
                }
                0
            });
        });

        let mut stream = connect(harness.port);
        stream.write_all(b"x").expect("Failed to write");

        let mut rest = Vec::new();
        stream
            .read_to_end(&mut rest)
            .expect("Failed to read to EOF");

        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(rejected.load(Ordering::SeqCst), 1);
    }
}
