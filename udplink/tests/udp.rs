use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use flume::Receiver;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use udplink::base::writer::Error as WriterError;
use udplink::config::Error as ConfigError;
use udplink::mock::{MockCatalog, MockWriter, Write};
use udplink::service::Error;
use udplink::{
    Config, ConsistencyLevel, FieldValue, Point, PointsWriter, Service, StatisticsSnapshot, State,
};

fn config(batch_size: usize, batch_pending: usize, batch_timeout: Duration) -> Config {
    Config {
        enabled: true,
        bind_address: "127.0.0.1:0".to_owned(),
        database: "db0".to_owned(),
        retention_policy: "rp0".to_owned(),
        batch_size,
        batch_pending,
        batch_timeout,
        ..Default::default()
    }
}

fn service(config: Config, writer: MockWriter, catalog: &Arc<MockCatalog>) -> Arc<Service> {
    Arc::new(Service::new(config, Arc::new(writer), catalog.clone()))
}

async fn send(addr: SocketAddr, payloads: &[String]) {
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for payload in payloads {
        client.send_to(payload.as_bytes(), addr).await.unwrap();
    }
}

fn lines(range: std::ops::Range<i64>) -> Vec<String> {
    range.map(|i| format!("cpu,host=server01 value={i}i {i}")).collect()
}

async fn wait_for(service: &Service, f: impl Fn(&StatisticsSnapshot) -> bool) -> StatisticsSnapshot {
    let wait = async {
        loop {
            let snapshot = service.snapshot();
            if f(&snapshot) {
                return snapshot;
            }
            sleep(Duration::from_millis(10)).await;
        }
    };

    timeout(Duration::from_secs(5), wait).await.expect("statistics never matched")
}

async fn next_write(writes: &Receiver<Write>) -> Write {
    timeout(Duration::from_secs(5), writes.recv_async()).await.unwrap().unwrap()
}

#[tokio::test]
async fn full_batch_is_delivered_once() {
    let (writer, writes) = MockWriter::new();
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(5, 1, Duration::from_secs(1)), writer, &catalog);
    let handle = service.open().await.unwrap();

    send(handle.addr(), &lines(0..5)).await;

    let write = next_write(&writes).await;
    assert!(!write.failed);
    assert_eq!(write.database, "db0");
    assert_eq!(write.retention_policy, "rp0");
    assert_eq!(write.consistency, ConsistencyLevel::Any);
    assert_eq!(write.points.len(), 5);
    for (i, point) in write.points.iter().enumerate() {
        assert_eq!(point.fields["value"], FieldValue::Integer(i as i64));
    }

    let stats = wait_for(&service, |s| s.batches_transmitted == 1).await;
    assert_eq!(stats.points_received, 5);
    assert_eq!(stats.points_transmitted, 5);
    assert_eq!(stats.batches_transmit_fail, 0);
    assert_eq!(catalog.calls(), 1);

    handle.close().await.unwrap();
}

#[tokio::test]
async fn malformed_payload_is_counted_and_dropped() {
    let (writer, writes) = MockWriter::new();
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(1, 1, Duration::from_secs(1)), writer, &catalog);
    let handle = service.open().await.unwrap();

    send(handle.addr(), &["this is invalid".to_owned()]).await;

    let stats = wait_for(&service, |s| s.points_parse_fail == 1).await;
    assert_eq!(stats.points_received, 0);
    assert_eq!(stats.bytes_received, 15);

    sleep(Duration::from_millis(100)).await;
    assert!(writes.try_recv().is_err());
    assert_eq!(catalog.calls(), 0);

    handle.close().await.unwrap();
}

#[tokio::test]
async fn failed_write_is_not_retried() {
    let (writer, writes) = MockWriter::new();
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(2, 1, Duration::from_secs(10)), writer.fail_next(1), &catalog);
    let handle = service.open().await.unwrap();

    send(handle.addr(), &lines(0..4)).await;

    let first = next_write(&writes).await;
    assert!(first.failed);
    assert_eq!(first.points.len(), 2);

    let second = next_write(&writes).await;
    assert!(!second.failed);
    assert_eq!(second.points[0].timestamp, 2);
    assert_eq!(second.points[1].timestamp, 3);

    let stats =
        wait_for(&service, |s| s.batches_transmitted == 1 && s.batches_transmit_fail == 1).await;
    assert_eq!(stats.points_transmitted, 2);

    sleep(Duration::from_millis(100)).await;
    assert!(writes.try_recv().is_err());

    handle.close().await.unwrap();
}

#[tokio::test]
async fn database_is_created_once() {
    let (writer, _writes) = MockWriter::new();
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(1, 1, Duration::from_secs(1)), writer, &catalog);
    let handle = service.open().await.unwrap();

    send(handle.addr(), &lines(0..3)).await;

    wait_for(&service, |s| s.batches_transmitted == 3).await;
    assert_eq!(catalog.calls(), 1);

    handle.close().await.unwrap();
}

#[tokio::test]
async fn failed_database_creation_drops_batch() {
    let (writer, writes) = MockWriter::new();
    let catalog = Arc::new(MockCatalog::new().fail_next(1));
    let service = service(config(1, 1, Duration::from_secs(1)), writer, &catalog);
    let handle = service.open().await.unwrap();

    send(handle.addr(), &lines(0..1)).await;
    timeout(Duration::from_secs(5), async {
        while catalog.calls() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    send(handle.addr(), &lines(1..2)).await;
    let write = next_write(&writes).await;
    assert_eq!(write.points.len(), 1);
    assert_eq!(write.points[0].timestamp, 1);

    let stats = wait_for(&service, |s| s.batches_transmitted == 1).await;
    assert_eq!(stats.points_received, 2);
    assert_eq!(stats.batches_transmit_fail, 0);
    assert_eq!(catalog.calls(), 2);

    handle.close().await.unwrap();
}

#[tokio::test]
async fn partial_batch_is_flushed_on_timeout() {
    let (writer, writes) = MockWriter::new();
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(100, 1, Duration::from_millis(100)), writer, &catalog);
    let handle = service.open().await.unwrap();

    send(handle.addr(), &lines(0..3)).await;

    let write = next_write(&writes).await;
    assert_eq!(write.points.len(), 3);

    let stats = wait_for(&service, |s| s.batches_transmitted == 1).await;
    assert_eq!(stats.points_transmitted, 3);

    handle.close().await.unwrap();
}

#[tokio::test]
async fn every_line_of_a_payload_is_a_point() {
    let (writer, writes) = MockWriter::new();
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(3, 1, Duration::from_secs(10)), writer, &catalog);
    let handle = service.open().await.unwrap();

    let payload = lines(0..3).join("\n");
    send(handle.addr(), &[payload.clone()]).await;

    let write = next_write(&writes).await;
    assert_eq!(write.points.len(), 3);
    assert_eq!(write.points[2].name, "cpu");
    assert_eq!(write.points[2].tags["host"], "server01");

    let stats = wait_for(&service, |s| s.batches_transmitted == 1).await;
    assert_eq!(stats.points_received, 3);
    assert_eq!(stats.bytes_received, payload.len() as u64);

    handle.close().await.unwrap();
}

#[tokio::test]
async fn shutdown_with_queued_payloads() {
    let (writer, _writes) = MockWriter::new();
    let writer = writer.with_delay(Duration::from_millis(200));
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(1, 1, Duration::from_secs(1)), writer, &catalog);
    let handle = service.open().await.unwrap();

    send(handle.addr(), &lines(0..50)).await;
    wait_for(&service, |s| s.points_received > 0).await;

    timeout(Duration::from_secs(5), handle.close()).await.unwrap().unwrap();
    assert_eq!(service.state(), State::Stopped);

    let stats = service.snapshot();
    assert!(stats.points_transmitted < 50);
    assert!(stats.points_transmitted <= stats.points_received);
}

#[tokio::test]
async fn bind_failure_is_fatal() {
    let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut config = config(1, 1, Duration::from_secs(1));
    config.bind_address = taken.local_addr().unwrap().to_string();

    let (writer, _writes) = MockWriter::new();
    let service = service(config, writer, &Arc::new(MockCatalog::new()));

    match service.open().await {
        Err(Error::Listener(_)) => {}
        Err(e) => panic!("unexpected error {e:?}"),
        Ok(_) => panic!("bound an address already in use"),
    }
    assert_eq!(service.state(), State::Stopped);
}

#[tokio::test]
async fn missing_required_config_is_fatal() {
    let (writer, _writes) = MockWriter::new();
    let mut c = config(1, 1, Duration::from_secs(1));
    c.database = String::new();
    let svc = service(c, writer, &Arc::new(MockCatalog::new()));
    assert!(matches!(svc.open().await, Err(Error::Config(ConfigError::MissingDatabase))));

    let (writer, _writes) = MockWriter::new();
    let mut c = config(1, 1, Duration::from_secs(1));
    c.bind_address = String::new();
    let svc = service(c, writer, &Arc::new(MockCatalog::new()));
    assert!(matches!(svc.open().await, Err(Error::Config(ConfigError::MissingBindAddress))));
}

#[tokio::test]
async fn unresolvable_address_is_fatal() {
    let (writer, _writes) = MockWriter::new();
    let mut c = config(1, 1, Duration::from_secs(1));
    c.bind_address = "not an address".to_owned();
    let service = service(c, writer, &Arc::new(MockCatalog::new()));
    assert!(matches!(service.open().await, Err(Error::Resolve { .. })));
}

#[tokio::test]
async fn lifecycle_transitions() {
    let (writer, _writes) = MockWriter::new();
    let service = service(config(1, 1, Duration::from_secs(1)), writer, &Arc::new(MockCatalog::new()));
    assert_eq!(service.state(), State::Unstarted);

    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    let s = service.clone();
    let token = cancel.clone();
    let task = tokio::spawn(async move { s.run_with_ready(token, Some(ready_tx)).await });

    let addr = ready_rx.await.unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(service.state(), State::Running);

    let mut states = service.subscribe();
    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(*states.borrow_and_update(), State::Stopped);

    // Stopped is terminal
    assert!(matches!(service.run(CancellationToken::new()).await, Err(Error::AlreadyStarted)));
}

#[tokio::test]
async fn statistics_are_tagged() {
    let (writer, _writes) = MockWriter::new();
    let service = service(config(1, 1, Duration::from_secs(1)), writer, &Arc::new(MockCatalog::new()));

    let tags = HashMap::from([("host".to_owned(), "h1".to_owned())]);
    let stats = service.statistics(&tags);
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].name, "udp");
    assert_eq!(stats[0].tags["bind"], "127.0.0.1:0");
    assert_eq!(stats[0].tags["host"], "h1");
    assert_eq!(stats[0].values, StatisticsSnapshot::default());
}

#[tokio::test]
async fn stalled_writer_stops_reads() {
    let (writer, _writes) = MockWriter::new();
    let writer = writer.with_delay(Duration::from_secs(60));
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(1, 1, Duration::from_secs(1)), writer, &catalog);
    let handle = service.open().await.unwrap();

    let payload = "cpu value=1i".to_owned();
    send(handle.addr(), &vec![payload.clone(); 5000]).await;
    sleep(Duration::from_millis(500)).await;

    let before = service.snapshot();
    sleep(Duration::from_millis(300)).await;
    let after = service.snapshot();

    // Relay channel plus the few points held by parser, batcher and delivery
    assert_eq!(before.bytes_received, after.bytes_received);
    assert!(after.bytes_received <= 1010 * payload.len() as u64);
    assert!(after.bytes_received >= after.points_received * payload.len() as u64);
    assert!(after.points_received < 10);
    assert_eq!(after.batches_transmitted, 0);

    // The write in flight never completes, the runtime drops the service with the test
}

struct CrashingWriter;

#[async_trait::async_trait]
impl PointsWriter for CrashingWriter {
    async fn write_points_privileged(
        &self,
        _: &str,
        _: &str,
        _: ConsistencyLevel,
        _: &[Point],
    ) -> Result<(), WriterError> {
        panic!("writer crashed")
    }
}

#[tokio::test]
async fn stage_failure_leaves_shared_token_alone() {
    let catalog: Arc<MockCatalog> = Arc::new(MockCatalog::new());
    let config = config(1, 1, Duration::from_secs(1));
    let crashing = Arc::new(Service::new(config.clone(), Arc::new(CrashingWriter), catalog.clone()));
    let (writer, _writes) = MockWriter::new();
    let healthy = service(config, writer, &catalog);

    let cancel = CancellationToken::new();
    let mut tasks = vec![];
    let mut addrs = vec![];
    for s in [crashing.clone(), healthy.clone()] {
        let (ready_tx, ready_rx) = oneshot::channel();
        let token = cancel.clone();
        tasks.push(tokio::spawn(async move { s.run_with_ready(token, Some(ready_tx)).await }));
        addrs.push(ready_rx.await.unwrap());
    }

    send(addrs[0], &lines(0..1)).await;
    timeout(Duration::from_secs(5), async {
        while crashing.state() != State::Stopped {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(!cancel.is_cancelled());
    assert_eq!(healthy.state(), State::Running);

    cancel.cancel();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(healthy.state(), State::Stopped);
}

#[tokio::test]
async fn close_waits_for_write_in_flight() {
    let (writer, writes) = MockWriter::new();
    let writer = writer.with_delay(Duration::from_millis(300));
    let catalog = Arc::new(MockCatalog::new());
    let service = service(config(1, 1, Duration::from_secs(1)), writer, &catalog);
    let handle = service.open().await.unwrap();

    send(handle.addr(), &lines(0..1)).await;
    timeout(Duration::from_secs(5), async {
        while catalog.calls() == 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    handle.close().await.unwrap();

    let write = writes.try_recv().unwrap();
    assert_eq!(write.points.len(), 1);
    assert_eq!(service.snapshot().batches_transmitted, 1);
}
