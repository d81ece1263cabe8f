use std::time::Duration;

use codecell::runner::InteractiveEvent;
use codecell::service::ExecutionService;

use super::test_config;

/// Collect stdout from the stream until the program exits or the timeout
/// elapses. Returns (stdout, exit_code).
async fn drain(
    stream: &mut codecell::runner::InteractiveEventStream,
    timeout: Duration,
) -> (String, Option<Option<i32>>) {
    let mut stdout = String::new();
    let mut exit = None;
    let _ = tokio::time::timeout(timeout, async {
        while let Some(event) = stream.recv().await {
            match event {
                InteractiveEvent::Stdout(data) => {
                    stdout.push_str(&String::from_utf8_lossy(&data));
                }
                InteractiveEvent::Stderr(_) => {}
                InteractiveEvent::Exited(code) => {
                    exit = Some(code);
                    break;
                }
            }
        }
    })
    .await;
    (stdout, exit)
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_interactive_echo_program() {
    let service = ExecutionService::new(test_config()).unwrap();
    let source = "import sys\nfor line in sys.stdin:\n    print(line.strip().upper(), flush=True)";

    let (id, mut stream) = service
        .create_interactive_session("python3", source, None)
        .await
        .expect("failed to start session");

    service
        .send_interactive_input(id, b"hello\n")
        .await
        .unwrap();

    // stdin stays open, so the program is still running; read what arrived
    let (stdout, _) = drain(&mut stream, Duration::from_secs(5)).await;
    assert!(stdout.contains("HELLO"), "got: {stdout:?}");

    service.terminate_interactive_session(id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_interactive_session_exit_event() {
    let service = ExecutionService::new(test_config()).unwrap();

    let (id, mut stream) = service
        .create_interactive_session("python3", "print('bye')", None)
        .await
        .expect("failed to start session");

    let (stdout, exit) = drain(&mut stream, Duration::from_secs(10)).await;
    assert!(stdout.contains("bye"));
    assert_eq!(exit, Some(Some(0)));

    service.close_session(id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_interactive_rejects_forbidden_source() {
    let service = ExecutionService::new(test_config()).unwrap();
    let result = service
        .create_interactive_session("python3", "import socket", None)
        .await;
    assert!(result.is_err());
}
