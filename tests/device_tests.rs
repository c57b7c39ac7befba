mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{kind_a, spawn_scheduler, write_frame, CLASS_A, CLASS_B};
use mm_sched::config::{SchedulerConfig, WorkerConfig};
use mm_sched::device::{Device, OpenMode};
use mm_sched::engine::{EngineClass, EngineRouter, EngineSet};
use mm_sched::error::SchedError;
use mm_sched::node::Node;
use mm_sched::scheduler::{JobKind, JobStatus, Priority};
use mm_sched::service::Scheduler;
use mm_sched::wire::ReadFrame;
use mm_sched::worker::{EngineWorker, JobHandler};
use tokio_util::sync::CancellationToken;

/// Echoes payloads and remembers the order they ran in.
#[derive(Default)]
struct OrderHandler {
    ran: Mutex<Vec<Vec<u8>>>,
}

impl JobHandler for OrderHandler {
    fn process(&self, _kind: JobKind, payload: Vec<u8>) -> (JobStatus, Vec<u8>) {
        self.ran.lock().unwrap().push(payload.clone());
        (JobStatus::Complete, payload)
    }
}

#[tokio::test]
async fn test_round_trip_framing() {
    let sched = spawn_scheduler();
    let device = Device::new(sched.handle.clone());
    let file = device.open_default(OpenMode::ReadWrite).await.unwrap();

    let job = file
        .write(&write_frame(JobKind(0x0002_0000), 7, b"abcd"))
        .await
        .unwrap()
        .unwrap();
    let payload = sched.engine.payload_of(job).unwrap();
    sched
        .handle
        .complete(job, JobStatus::Complete, Some(payload))
        .await
        .unwrap();

    let bytes = file.read().await.unwrap();
    let mut expected = Vec::new();
    expected.extend_from_slice(&3u32.to_le_bytes());
    expected.extend_from_slice(&7u32.to_le_bytes());
    expected.extend_from_slice(b"abcd");
    assert_eq!(bytes, expected);

    assert!(file.read().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_short_write_creates_no_job() {
    let sched = spawn_scheduler();
    let device = Device::new(sched.handle.clone());
    let file = device.open_default(OpenMode::ReadWrite).await.unwrap();

    assert_eq!(file.write(&[1, 2, 3, 4, 5]).await, Ok(None));
    assert_eq!(file.write(&write_frame(kind_a(), 1, b"")).await, Ok(None));

    assert!(sched.engine.admitted().is_empty());
    assert_eq!(sched.handle.stats().await.unwrap().jobs, 0);
    assert!(file.snapshot().await.unwrap().pending.is_empty());
}

#[tokio::test]
async fn test_unroutable_write_fails() {
    let sched = spawn_scheduler();
    let device = Device::new(sched.handle.clone());
    let file = device.open_default(OpenMode::ReadWrite).await.unwrap();

    let kind = JobKind::new(EngineClass(6), 1);
    assert_eq!(
        file.write(&write_frame(kind, 1, b"x")).await,
        Err(SchedError::InvalidRoute(EngineClass(6)))
    );
}

#[tokio::test]
async fn test_fire_and_forget_read_is_empty() {
    let sched = spawn_scheduler();
    let device = Device::new(sched.handle.clone());
    let file = device.open_default(OpenMode::ReadWrite).await.unwrap();

    let job = file.write(&write_frame(kind_a(), 0, b"x")).await.unwrap().unwrap();
    sched.handle.complete(job, JobStatus::Complete, None).await.unwrap();

    assert!(file.poll_readable());
    assert!(file.read().await.unwrap().is_empty());
    assert!(!file.poll_readable());
}

#[tokio::test]
async fn test_wait_readable_wakes_on_completion() {
    let sched = spawn_scheduler();
    let device = Device::new(sched.handle.clone());
    let mut file = device.open_default(OpenMode::ReadWrite).await.unwrap();
    let job = file.write(&write_frame(kind_a(), 5, b"x")).await.unwrap().unwrap();
    assert!(!file.poll_readable());

    let handle = sched.handle.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.complete(job, JobStatus::Complete, None).await
    });

    tokio::time::timeout(Duration::from_secs(1), file.wait_readable())
        .await
        .unwrap()
        .unwrap();
    assert!(file.poll_readable());
    let frame = ReadFrame::decode(&file.read().await.unwrap()).unwrap();
    assert_eq!(frame.id, 5);
}

#[tokio::test]
async fn test_wait_readable_fails_once_closed() {
    let sched = spawn_scheduler();
    let device = Device::new(sched.handle.clone());
    let mut file = device.open_default(OpenMode::ReadWrite).await.unwrap();

    let id = file.id();
    sched.handle.close_session(id).await.unwrap();

    assert_eq!(file.wait_readable().await, Err(SchedError::SessionClosed(id)));
}

#[tokio::test]
async fn test_fsync_after_release_of_other_file() {
    let sched = spawn_scheduler();
    let device = Device::new(sched.handle.clone());
    let first = device.open(Priority(10), OpenMode::ReadWrite).await.unwrap();
    let second = device.open(Priority(10), OpenMode::ReadWrite).await.unwrap();

    first.write(&write_frame(kind_a(), 1, b"a")).await.unwrap();
    second.interlock_after(&first).await.unwrap();
    second.write(&write_frame(kind_a(), 2, b"b")).await.unwrap();
    assert_eq!(sched.engine.admitted().len(), 1);

    let summary = first.release().await.unwrap();
    assert_eq!(summary.aborted, 1);
    assert_eq!(sched.engine.admitted().len(), 2);

    let job = sched.engine.admitted()[1];
    sched.handle.complete(job, JobStatus::Complete, None).await.unwrap();
    assert_eq!(second.fsync().await, Ok(JobStatus::Complete));
}

#[tokio::test]
async fn test_interlock_with_self_is_rejected() {
    let sched = spawn_scheduler();
    let device = Device::new(sched.handle.clone());
    let file = device.open_default(OpenMode::ReadWrite).await.unwrap();

    assert!(matches!(
        file.interlock_after(&file).await,
        Err(SchedError::InvalidInterlock(_))
    ));
}

#[tokio::test]
async fn test_worker_runs_interlock_chain_in_order() {
    let handler = Arc::new(OrderHandler::default());
    let worker = EngineWorker::with_handler(
        CLASS_A,
        WorkerConfig::new(2).with_latency(1, 3),
        handler.clone(),
    );
    let config = SchedulerConfig::default();
    let router: Arc<dyn EngineRouter> = Arc::new(worker.clone());
    let engines = EngineSet::new(config.max_engine_classes)
        .with_router(CLASS_A, router)
        .unwrap();
    let shutdown = CancellationToken::new();
    let (handle, _service) = Scheduler::spawn(&config, engines, shutdown.clone());
    let _lanes = worker.start(handle.clone(), shutdown.clone());

    let device = Device::new(handle.clone());
    let s1 = device.open(Priority(100), OpenMode::ReadWrite).await.unwrap();
    let s2 = device.open(Priority::NORMAL, OpenMode::ReadWrite).await.unwrap();
    let s3 = device.open(Priority(2), OpenMode::ReadWrite).await.unwrap();

    s1.write(&write_frame(kind_a(), 1, b"A")).await.unwrap();
    s2.interlock_after(&s1).await.unwrap();
    s2.write(&write_frame(kind_a(), 2, b"B")).await.unwrap();
    s3.interlock_after(&s2).await.unwrap();
    s3.write(&write_frame(kind_a(), 3, b"C")).await.unwrap();

    let status = tokio::time::timeout(Duration::from_secs(5), s3.fsync())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Complete);

    // Two lanes are available, yet the chain runs strictly in order.
    assert_eq!(
        *handler.ran.lock().unwrap(),
        vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]
    );
    for (file, id, payload) in [(&s1, 1, b"A"), (&s2, 2, b"B"), (&s3, 3, b"C")] {
        let frame = ReadFrame::decode(&file.read().await.unwrap()).unwrap();
        assert_eq!(frame.id, id);
        assert_eq!(frame.status, JobStatus::Complete);
        assert_eq!(frame.payload, payload.to_vec());
    }
    shutdown.cancel();
}

#[tokio::test]
async fn test_node_processes_writes_across_classes() {
    let node = Node::new(
        SchedulerConfig::default(),
        WorkerConfig::new(1).with_latency(1, 2),
        &[CLASS_A, CLASS_B],
    );
    let running = node.start(CancellationToken::new()).unwrap();
    let device = running.device();
    let file = device.open_default(OpenMode::ReadWrite).await.unwrap();

    for id in 1..=6u32 {
        let class = if id % 2 == 0 { CLASS_A } else { CLASS_B };
        file.write(&write_frame(JobKind::new(class, 1), id, &id.to_le_bytes()))
            .await
            .unwrap();
    }
    let status = tokio::time::timeout(Duration::from_secs(5), file.fsync())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, JobStatus::Complete);

    let mut ids = Vec::new();
    while let Some(frame) = ReadFrame::decode(&file.read().await.unwrap()) {
        assert_eq!(frame.status, JobStatus::Complete);
        assert_eq!(frame.payload, frame.id.to_le_bytes().to_vec());
        ids.push(frame.id);
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);

    file.release().await.unwrap();
    running.stop().await;
}

#[tokio::test]
async fn test_node_rejects_class_beyond_bound() {
    let node = Node::new(
        SchedulerConfig::default(),
        WorkerConfig::default(),
        &[EngineClass(200)],
    );
    assert!(matches!(
        node.start(CancellationToken::new()),
        Err(SchedError::InvalidRoute(EngineClass(200)))
    ));
}
