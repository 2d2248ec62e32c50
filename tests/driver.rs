//! End-to-end tests against the public `Driver` API only.

use std::collections::HashMap;
use std::io::Write;

use docker_logstash_driver::{ContainerInfo, Driver, StartError};
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;

mod common;

fn container_info(config: HashMap<String, String>) -> ContainerInfo {
    ContainerInfo {
        id: "test-container".to_string(),
        name: "test".to_string(),
        image_name: "alpine:latest".to_string(),
        created: chrono::Utc::now(),
        log_path: None,
        config,
    }
}

async fn mock_sink() -> (std::net::SocketAddr, tokio::sync::mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut lines = tokio::io::BufReader::new(socket).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = tx.send(line);
                }
            });
        }
    });
    (addr, rx)
}

fn sink_config(addr: std::net::SocketAddr) -> HashMap<String, String> {
    let mut config = HashMap::new();
    config.insert("logstash-url".to_string(), format!("tcp://{addr}"));
    config
}

#[tokio::test]
async fn starting_the_same_pipe_twice_is_rejected() {
    common::trace_init();
    let (addr, _rx) = mock_sink().await;
    let driver = Driver::new();
    let pipe = tempfile::NamedTempFile::new().unwrap();

    driver
        .start_logging(pipe.path().to_path_buf(), container_info(sink_config(addr)))
        .await
        .unwrap();

    let err = driver
        .start_logging(pipe.path().to_path_buf(), container_info(sink_config(addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, StartError::AlreadyExists { .. }));

    driver.stop_logging(pipe.path()).await.unwrap();
}

#[tokio::test]
async fn stopping_an_unknown_pipe_succeeds() {
    common::trace_init();
    let driver = Driver::new();
    driver
        .stop_logging(std::path::Path::new("/no/such/pipe"))
        .await
        .unwrap();
}

#[tokio::test]
async fn stopping_a_known_pipe_twice_succeeds() {
    common::trace_init();
    let (addr, _rx) = mock_sink().await;
    let driver = Driver::new();
    let pipe = tempfile::NamedTempFile::new().unwrap();

    driver
        .start_logging(pipe.path().to_path_buf(), container_info(sink_config(addr)))
        .await
        .unwrap();

    driver.stop_logging(pipe.path()).await.unwrap();
    driver.stop_logging(pipe.path()).await.unwrap();
}

#[tokio::test]
async fn a_closed_fifo_ends_the_worker_but_the_pipe_stays_registered_until_stopped() {
    common::trace_init();
    let (addr, _rx) = mock_sink().await;
    let driver = Driver::new();
    let pipe = tempfile::NamedTempFile::new().unwrap();

    driver
        .start_logging(pipe.path().to_path_buf(), container_info(sink_config(addr)))
        .await
        .unwrap();

    // The file is empty and nothing else holds it open for writing, so the
    // worker observes eof almost immediately and exits on its own -- but
    // `StartLogging`'s "at most one stream per pipe path" invariant is only
    // released by an explicit `StopLogging`, so the host stays in control of
    // when the sink reference and pipe-path slot are actually freed.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let err = driver
        .start_logging(pipe.path().to_path_buf(), container_info(sink_config(addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, StartError::AlreadyExists { .. }));

    driver.stop_logging(pipe.path()).await.unwrap();

    driver
        .start_logging(pipe.path().to_path_buf(), container_info(sink_config(addr)))
        .await
        .expect("stop_logging should free the pipe path for reuse");
    driver.stop_logging(pipe.path()).await.unwrap();
}

#[tokio::test]
async fn delivers_a_record_written_before_start_logging() {
    common::trace_init();
    let (addr, mut rx) = mock_sink().await;
    let driver = Driver::new();
    let mut pipe = tempfile::NamedTempFile::new().unwrap();

    let entry = log_codec::proto::LogEntry {
        source: "stdout".into(),
        time_nano: 1,
        line: b"hello from disk\n".to_vec(),
        partial: false,
    };
    let payload = prost::Message::encode_to_vec(&entry);
    pipe.write_all(&(payload.len() as u32).to_be_bytes())
        .unwrap();
    pipe.write_all(&payload).unwrap();
    pipe.flush().unwrap();

    driver
        .start_logging(pipe.path().to_path_buf(), container_info(sink_config(addr)))
        .await
        .unwrap();

    let line = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
        .await
        .expect("record should be delivered")
        .unwrap();
    assert!(line.contains("hello from disk"));

    driver.stop_logging(pipe.path()).await.unwrap();
}
