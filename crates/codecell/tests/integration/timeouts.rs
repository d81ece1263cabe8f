use codecell::runner::Runner;
use codecell::types::{ExecutionStatus, ResourceLimits};

use super::test_config;

#[tokio::test]
#[ignore = "requires docker"]
async fn test_infinite_loop_times_out() {
    let runner = Runner::new(test_config()).unwrap();
    let limits = ResourceLimits::none().with_wall_time_ms(2_000);

    let result = runner
        .execute("python3", "while True:\n    pass", None, Some(&limits))
        .await
        .expect("execution failed");

    assert_eq!(result.status, ExecutionStatus::TimedOut);
    assert!(!result.is_success());
    // Wall limit plus the 500ms grace, with slack for container startup
    assert!(
        result.elapsed_ms >= 2_000 && result.elapsed_ms < 4_000,
        "elapsed {}ms outside expected window",
        result.elapsed_ms
    );
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_timeout_keeps_partial_output() {
    let runner = Runner::new(test_config()).unwrap();
    let limits = ResourceLimits::none().with_wall_time_ms(2_000);
    let source = "import sys\nprint('started', flush=True)\nwhile True:\n    pass";

    let result = runner
        .execute("python3", source, None, Some(&limits))
        .await
        .expect("execution failed");

    assert_eq!(result.status, ExecutionStatus::TimedOut);
    assert!(result.stdout.contains("started"));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_memory_ceiling_reported_distinctly() {
    let runner = Runner::new(test_config()).unwrap();
    let limits = ResourceLimits::none()
        .with_memory_bytes(32 * ResourceLimits::MB)
        .with_wall_time_ms(10_000);
    let source = "data = []\nwhile True:\n    data.append('x' * 1024 * 1024)";

    let result = runner
        .execute("python3", source, None, Some(&limits))
        .await
        .expect("execution failed");

    assert_eq!(result.status, ExecutionStatus::ResourceExceeded);
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_output_cap_bounds_stdout() {
    let runner = Runner::new(test_config()).unwrap();
    let limits = ResourceLimits::none().with_max_output_bytes(4 * ResourceLimits::KB);

    let result = runner
        .execute(
            "python3",
            "print('x' * 100_000)",
            None,
            Some(&limits),
        )
        .await
        .expect("execution failed");

    assert!(result.stdout.len() <= 4 * 1024);
}
