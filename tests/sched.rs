#[cfg(test)]
mod tests {
    use rivulet::{EventLoop, sched};
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    #[test]
    fn test_turns_are_fifo_and_bounded() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_out = order.clone();

        thread::spawn(move || {
            let ev_loop = EventLoop::new().expect("Failed to create event loop");

            for id in 0..3u8 {
                let order = order.clone();
                sched::spawn(async move {
                    order.lock().unwrap().push(id);
                    sched::yield_now().await;
                    order.lock().unwrap().push(id + 10);
                });
            }

            let order = order.clone();
            let watchdog_loop = ev_loop.clone();
            sched::spawn(async move {
                loop {
                    if order.lock().unwrap().len() >= 6 {
                        watchdog_loop.stop();
                        return;
                    }
                    sched::yield_now().await;
                }
            });

            ev_loop.run();
        })
        .join()
        .expect("Loop thread panicked");

        // First turn runs all first halves in spawn order; the yields
        // push the second halves to the next turn, again in order.
        assert_eq!(*order_out.lock().unwrap(), vec![0, 1, 2, 10, 11, 12]);
    }

    #[test]
    fn test_sleep_completes_after_deadline() {
        let elapsed = Arc::new(Mutex::new(None));
        let elapsed_out = elapsed.clone();

        thread::spawn(move || {
            let ev_loop = EventLoop::new().expect("Failed to create event loop");

            let start = Instant::now();
            let sleep_loop = ev_loop.clone();
            sched::spawn(async move {
                sched::sleep(Duration::from_millis(150)).await;
                *elapsed.lock().unwrap() = Some(start.elapsed());
                sleep_loop.stop();
            });

            ev_loop.run();
        })
        .join()
        .expect("Loop thread panicked");

        let elapsed = elapsed_out
            .lock()
            .unwrap()
            .expect("Sleep never completed");
        assert!(
            elapsed >= Duration::from_millis(150),
            "Sleep completed early: {elapsed:?}"
        );
        assert!(
            elapsed < Duration::from_secs(2),
            "Sleep took far too long: {elapsed:?}"
        );
    }

    #[test]
    fn test_equal_deadlines_fire_in_insertion_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let order_out = order.clone();

        thread::spawn(move || {
            let ev_loop = EventLoop::new().expect("Failed to create event loop");

            let deadline = Duration::from_millis(100);
            for id in 0..3u8 {
                let order = order.clone();
                sched::spawn(async move {
                    sched::sleep(deadline).await;
                    order.lock().unwrap().push(id);
                });
            }

            let order = order.clone();
            let watchdog_loop = ev_loop.clone();
            sched::spawn(async move {
                loop {
                    if order.lock().unwrap().len() >= 3 {
                        watchdog_loop.stop();
                        return;
                    }
                    sched::yield_now().await;
                }
            });

            ev_loop.run();
        })
        .join()
        .expect("Loop thread panicked");

        assert_eq!(*order_out.lock().unwrap(), vec![0, 1, 2]);
    }
}
