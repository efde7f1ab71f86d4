use super::*;
use crate::http::{Response, Status};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::io::{self, Read};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

const READ_TIMEOUT: Duration = Duration::from_secs(10);

fn loopback() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
}

fn test_config(pool_size: usize) -> DispatchConfig {
    DispatchConfig::default()
        .with_pool_size(pool_size)
        .with_handoff_timeout(Duration::from_millis(100))
        .with_grace_period(Duration::from_millis(200))
}

fn serve_ok(mut stream: TcpStream) -> io::Result<()> {
    Response::new(Status::Ok).with_body("served").send(&mut stream)
}

/// Connects without sending anything and reads until the server closes.
fn fetch(addr: SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(READ_TIMEOUT)).unwrap();
    let mut text = String::new();
    stream.read_to_string(&mut text).unwrap();
    text
}

fn is_served(text: &str) -> bool {
    text.starts_with("HTTP/1.1 200 OK\r\n") && text.ends_with("served")
}

fn is_overloaded(text: &str) -> bool {
    text.starts_with("HTTP/1.1 504 Gateway Timeout\r\n")
}

fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Handler that parks until the gate's sender is dropped, then serves.
fn gated() -> (Sender<()>, impl Fn(TcpStream) -> io::Result<()>) {
    let (open, gate): (Sender<()>, Receiver<()>) = bounded(0);
    let handler = move |stream: TcpStream| {
        let _ = gate.recv();
        serve_ok(stream)
    };
    (open, handler)
}

#[test]
fn idle_worker_takes_the_connection() {
    let dispatcher = Dispatcher::with_config(serve_ok, loopback(), test_config(1)).unwrap();
    dispatcher.listen().unwrap();

    let text = fetch(dispatcher.local_addr());
    assert!(is_served(&text), "unexpected response: {text:?}");

    let report = dispatcher.close().unwrap();
    assert!(report.all_stopped());

    let stats = dispatcher.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.overloaded, 0);
}

#[test]
fn acceptor_liveness_follows_listen_and_close() {
    let dispatcher = Dispatcher::with_config(serve_ok, loopback(), test_config(1)).unwrap();
    assert!(!dispatcher.is_accepting());
    dispatcher.listen().unwrap();
    assert!(dispatcher.is_accepting());
    dispatcher.close().unwrap();
    assert!(!dispatcher.is_accepting());
}

#[test]
fn close_without_clients_counts_nothing() {
    let dispatcher = Dispatcher::with_config(serve_ok, loopback(), test_config(1)).unwrap();
    dispatcher.listen().unwrap();
    dispatcher.close().unwrap();
    assert_eq!(dispatcher.stats(), StatsSnapshot::default());
}

#[test]
fn connection_pending_at_close_gets_service_unavailable() {
    let (open, handler) = gated();
    let config = test_config(1)
        .with_handoff_timeout(Duration::from_secs(30))
        .with_grace_period(Duration::from_secs(5));
    let dispatcher = Arc::new(Dispatcher::with_config(handler, loopback(), config).unwrap());
    dispatcher.listen().unwrap();
    let addr = dispatcher.local_addr();

    let first = thread::spawn(move || fetch(addr));
    wait_until("worker to be busy", || dispatcher.busy_workers() == 1);

    // The second connection waits in the handoff until close cuts it short.
    let second = thread::spawn(move || fetch(addr));
    wait_until("second connection to be accepted", || {
        dispatcher.stats().accepted == 2
    });

    let closer = {
        let dispatcher = Arc::clone(&dispatcher);
        thread::spawn(move || dispatcher.close().unwrap())
    };
    let second = second.join().unwrap();
    assert!(
        second.starts_with("HTTP/1.1 503 Service Unavailable\r\n"),
        "unexpected response: {second:?}"
    );

    drop(open);
    assert!(is_served(&first.join().unwrap()));
    let report = closer.join().unwrap();
    assert!(report.all_stopped());

    let stats = dispatcher.stats();
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.refused, 1);
    assert_eq!(stats.overloaded, 0);
}

#[test]
fn nothing_is_accepted_before_listen() {
    let dispatcher = Dispatcher::with_config(serve_ok, loopback(), test_config(1)).unwrap();
    assert!(!dispatcher.is_listening());
    assert_eq!(dispatcher.phase(), Phase::Running);

    let _client = TcpStream::connect(dispatcher.local_addr()).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(dispatcher.stats().accepted, 0);

    dispatcher.close().unwrap();
}

#[test]
fn busy_pool_answers_with_gateway_timeout() {
    let (open, handler) = gated();
    let dispatcher = Dispatcher::with_config(handler, loopback(), test_config(1)).unwrap();
    dispatcher.listen().unwrap();
    let addr = dispatcher.local_addr();

    let first = thread::spawn(move || fetch(addr));
    wait_until("worker to be busy", || dispatcher.busy_workers() == 1);

    let start = Instant::now();
    let second = fetch(addr);
    assert!(is_overloaded(&second), "unexpected response: {second:?}");
    assert!(start.elapsed() >= Duration::from_millis(100));

    drop(open);
    let first = first.join().unwrap();
    assert!(is_served(&first), "unexpected response: {first:?}");

    dispatcher.close().unwrap();
    let stats = dispatcher.stats();
    assert_eq!(stats.dispatched, 1);
    assert_eq!(stats.overloaded, 1);
}

#[test]
fn third_connection_overflows_a_pool_of_two() {
    let (open, handler) = gated();
    let dispatcher = Dispatcher::with_config(handler, loopback(), test_config(2)).unwrap();
    dispatcher.listen().unwrap();
    let addr = dispatcher.local_addr();

    let held: Vec<_> = (0..2).map(|_| thread::spawn(move || fetch(addr))).collect();
    wait_until("both workers to be busy", || dispatcher.busy_workers() == 2);

    let third = fetch(addr);
    assert!(is_overloaded(&third), "unexpected response: {third:?}");

    drop(open);
    for handle in held {
        let text = handle.join().unwrap();
        assert!(is_served(&text), "unexpected response: {text:?}");
    }

    dispatcher.close().unwrap();
}

#[test]
fn handler_faults_do_not_kill_the_worker() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = move |stream: TcpStream| match counter.fetch_add(1, Ordering::SeqCst) {
        0 => panic!("handler blew up"),
        1 => Err(io::Error::other("handler failed")),
        _ => serve_ok(stream),
    };

    let dispatcher = Dispatcher::with_config(handler, loopback(), test_config(1)).unwrap();
    dispatcher.listen().unwrap();
    let addr = dispatcher.local_addr();

    // The first two connections are dropped by the failing handler.
    assert_eq!(fetch(addr), "");
    assert_eq!(fetch(addr), "");
    let text = fetch(addr);
    assert!(is_served(&text), "unexpected response: {text:?}");

    dispatcher.close().unwrap();
    let stats = dispatcher.stats();
    assert_eq!(stats.dispatched, 3);
    assert_eq!(stats.handler_failures, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn every_connection_is_served_or_overloaded_exactly_once() {
    const CLIENTS: usize = 24;

    let handler = |stream: TcpStream| {
        thread::sleep(Duration::from_millis(30));
        serve_ok(stream)
    };
    let config = test_config(2).with_handoff_timeout(Duration::from_millis(40));
    let dispatcher = Dispatcher::with_config(handler, loopback(), config).unwrap();
    dispatcher.listen().unwrap();
    let addr = dispatcher.local_addr();

    let clients: Vec<_> = (0..CLIENTS)
        .map(|_| thread::spawn(move || fetch(addr)))
        .collect();

    let (mut served, mut overloaded) = (0_u64, 0_u64);
    for client in clients {
        let text = client.join().unwrap();
        match (is_served(&text), is_overloaded(&text)) {
            (true, false) => served += 1,
            (false, true) => overloaded += 1,
            _ => panic!("connection got neither or both: {text:?}"),
        }
    }

    let stats = dispatcher.stats();
    assert_eq!(served + overloaded, CLIENTS as u64);
    assert_eq!(stats.dispatched, served);
    assert_eq!(stats.overloaded, overloaded);
    assert_eq!(stats.accepted, CLIENTS as u64);
    assert!(served >= 2);

    dispatcher.close().unwrap();
    let stats = dispatcher.stats();
    assert_eq!(stats.settled(), stats.accepted);
}

#[test]
fn close_releases_the_port() {
    let dispatcher = Dispatcher::with_config(serve_ok, loopback(), test_config(2)).unwrap();
    dispatcher.listen().unwrap();
    let addr = dispatcher.local_addr();
    assert!(is_served(&fetch(addr)));

    let report = dispatcher.close().unwrap();
    assert_eq!(report.acceptor.outcome, Outcome::Graceful);
    assert_eq!(report.workers.outcome, Outcome::Graceful);
    assert_eq!(dispatcher.phase(), Phase::Closed);
    assert!(!dispatcher.is_listening());

    TcpListener::bind(addr).unwrap();
}

#[test]
fn close_without_listen_releases_the_port() {
    let dispatcher = Dispatcher::with_config(serve_ok, loopback(), test_config(1)).unwrap();
    let addr = dispatcher.local_addr();
    let report = dispatcher.close().unwrap();
    assert_eq!(report.acceptor.elapsed, Duration::ZERO);
    TcpListener::bind(addr).unwrap();
}

#[test]
fn close_forces_a_worker_blocked_on_its_connection() {
    let handler = |mut stream: TcpStream| {
        // The client never sends anything; only a forced shutdown of the
        // stream ends this read.
        let mut buf = [0_u8; 64];
        stream.read(&mut buf).map(|_| ())
    };
    let dispatcher = Dispatcher::with_config(handler, loopback(), test_config(1)).unwrap();
    dispatcher.listen().unwrap();
    let addr = dispatcher.local_addr();

    let _client = TcpStream::connect(addr).unwrap();
    wait_until("worker to be busy", || dispatcher.busy_workers() == 1);

    let report = dispatcher.close().unwrap();
    assert_eq!(report.acceptor.outcome, Outcome::Graceful);
    assert_eq!(report.workers.outcome, Outcome::Forced);
    assert!(report.elapsed < Duration::from_secs(2));

    TcpListener::bind(addr).unwrap();
}

#[test]
fn unstoppable_handler_is_reported_but_close_succeeds() {
    let handler = |stream: TcpStream| {
        thread::sleep(Duration::from_millis(600));
        drop(stream);
        Ok(())
    };
    let config = test_config(1).with_grace_period(Duration::from_millis(50));
    let dispatcher = Dispatcher::with_config(handler, loopback(), config).unwrap();
    dispatcher.listen().unwrap();
    let addr = dispatcher.local_addr();

    let _client = TcpStream::connect(addr).unwrap();
    wait_until("worker to be busy", || dispatcher.busy_workers() == 1);

    let report = dispatcher.close().unwrap();
    assert_eq!(report.workers.outcome, Outcome::Unstopped);
    assert!(!report.all_stopped());
    assert!(report.elapsed < Duration::from_millis(500));

    TcpListener::bind(addr).unwrap();
}

#[test]
fn close_is_idempotent_and_concurrent_calls_agree() {
    let dispatcher = Arc::new(
        Dispatcher::with_config(serve_ok, loopback(), test_config(2)).unwrap(),
    );
    dispatcher.listen().unwrap();

    let closers: Vec<_> = (0..4)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            thread::spawn(move || dispatcher.close().unwrap())
        })
        .collect();
    let reports: Vec<_> = closers.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(reports.windows(2).all(|pair| pair[0] == pair[1]));

    assert_eq!(dispatcher.close().unwrap(), reports[0]);
}

#[test]
fn listen_is_single_use() {
    let dispatcher = Dispatcher::with_config(serve_ok, loopback(), test_config(1)).unwrap();
    dispatcher.listen().unwrap();
    assert!(matches!(dispatcher.listen(), Err(Error::AlreadyListening)));

    dispatcher.close().unwrap();
    assert!(matches!(dispatcher.listen(), Err(Error::Closed)));
}

#[test]
fn bind_conflict_is_reported() {
    let taken = TcpListener::bind(loopback()).unwrap();
    let addr = taken.local_addr().unwrap();
    match Dispatcher::with_config(serve_ok, addr, test_config(1)) {
        Err(Error::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
        Err(other) => panic!("expected bind error, got {other}"),
        Ok(_) => panic!("expected bind error"),
    }
}

#[test]
fn drop_closes_the_dispatcher() {
    let addr = {
        let dispatcher = Dispatcher::with_config(serve_ok, loopback(), test_config(1)).unwrap();
        dispatcher.listen().unwrap();
        dispatcher.local_addr()
    };
    TcpListener::bind(addr).unwrap();
}
