use codecell::runner::{ExecuteError, Runner};
use codecell::types::ExecutionStatus;

use super::test_config;

#[tokio::test]
#[ignore = "requires docker"]
async fn test_python_arithmetic() {
    let runner = Runner::new(test_config()).unwrap();
    let result = runner
        .execute("python3", "print(2 + 2)", None, None)
        .await
        .expect("execution failed");

    assert!(result.is_success());
    assert_eq!(result.status, ExecutionStatus::Ok);
    assert_eq!(result.stdout, "4\n");
    assert_eq!(result.exit_code, Some(0));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_python_stdin() {
    let runner = Runner::new(test_config()).unwrap();
    let result = runner
        .execute(
            "python3",
            "print(input().upper())",
            Some(b"hello\n"),
            None,
        )
        .await
        .expect("execution failed");

    assert!(result.is_success());
    assert_eq!(result.stdout, "HELLO\n");
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_python_runtime_error() {
    let runner = Runner::new(test_config()).unwrap();
    let result = runner
        .execute("python3", "raise ValueError('boom')", None, None)
        .await
        .expect("execution failed");

    assert_eq!(result.status, ExecutionStatus::RuntimeError);
    assert_ne!(result.exit_code, Some(0));
    assert!(result.stderr.contains("ValueError"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_cpp_compile_and_run() {
    let runner = Runner::new(test_config()).unwrap();
    let source = r#"
#include <iostream>
int main() {
    std::cout << "Hello, World!" << std::endl;
    return 0;
}
"#;
    let result = runner
        .execute("cpp17", source, None, None)
        .await
        .expect("execution failed");

    assert!(result.is_success());
    assert!(result.stdout.contains("Hello, World!"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_cpp_compile_error_surfaces_diagnostics() {
    let runner = Runner::new(test_config()).unwrap();
    let result = runner
        .execute("cpp17", "int main() { this does not compile }", None, None)
        .await;

    match result {
        Err(ExecuteError::Compile(e)) => {
            let message = e.to_string();
            assert!(message.contains("error"), "no diagnostics in: {message}");
        }
        other => panic!("expected compile error, got {other:?}"),
    }
}

// Needs no docker: validation must reject before anything is spawned
#[tokio::test]
async fn test_validation_rejects_without_docker() {
    let mut config = test_config();
    config.docker_path = Some("/nonexistent/docker".into());
    let runner = Runner::new(config).unwrap();

    let result = runner
        .execute("python3", "import subprocess", None, None)
        .await;
    assert!(matches!(result, Err(ExecuteError::Validation(_))));
}
