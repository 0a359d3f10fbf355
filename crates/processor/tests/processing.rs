use bag_processor::{JobArgsError, MemoryObjectStore, ProcessError, ProcessingJob, StoreError};

fn job() -> ProcessingJob {
    ProcessingJob::from_args([
        "raw-data",
        "robot_log_1.mcap",
        "processed-data",
        "robot_log_1.csv",
    ])
    .unwrap()
}

#[tokio::test]
async fn processes_raw_object_into_destination() {
    let store = MemoryObjectStore::new().with_object(
        "raw-data",
        "robot_log_1.mcap",
        "timestamp,topic,value\n1,/imu,0.25\n",
    );

    let summary = job().run(&store).await.unwrap();

    assert!(store.has_bucket("processed-data"));
    let out = String::from_utf8(store.get("processed-data", "robot_log_1.csv").unwrap()).unwrap();
    assert_eq!(
        out,
        "timestamp,topic,value,processed_flag,source_key\n1,/imu,0.25,true,robot_log_1.mcap\n"
    );
    assert_eq!(summary.bytes_out, out.len());
}

#[tokio::test]
async fn rerun_writes_identical_object() {
    let store = MemoryObjectStore::new().with_object("raw-data", "robot_log_1.mcap", "a,b\n1,2\n");

    job().run(&store).await.unwrap();
    let first = store.get("processed-data", "robot_log_1.csv").unwrap();
    job().run(&store).await.unwrap();
    let second = store.get("processed-data", "robot_log_1.csv").unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn missing_source_is_an_error() {
    let store = MemoryObjectStore::new();

    let err = job().run(&store).await.unwrap_err();
    assert!(matches!(err, ProcessError::Store(StoreError::NotFound { .. })));
    assert!(store.get("processed-data", "robot_log_1.csv").is_none());
}

#[tokio::test]
async fn empty_source_is_an_error() {
    let store = MemoryObjectStore::new().with_object("raw-data", "robot_log_1.mcap", "");

    let err = job().run(&store).await.unwrap_err();
    assert!(matches!(err, ProcessError::Transform { .. }));
}

#[test]
fn args_are_positional_and_required() {
    assert_eq!(
        ProcessingJob::from_args(["raw-data", "a.mcap", "processed-data"]),
        Err(JobArgsError::Usage)
    );
    assert_eq!(
        ProcessingJob::from_args(["raw-data", " ", "processed-data", "a.csv"]),
        Err(JobArgsError::Empty("source_key"))
    );
}
