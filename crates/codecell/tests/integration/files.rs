use codecell::service::{ExecutionService, ServiceError};
use codecell::types::UploadedFile;
use codecell::workspace::WorkspaceError;

use super::test_config;

#[tokio::test]
#[ignore = "requires docker"]
async fn test_uploaded_file_readable_by_program() {
    let service = ExecutionService::new(test_config()).unwrap();
    let files = vec![UploadedFile::new("input.txt", b"hi\n".to_vec())];

    let (id, result) = service
        .execute_with_files(
            "python3",
            "print(open('input.txt').read(), end='')",
            None,
            &files,
            None,
        )
        .await
        .expect("execution failed");

    assert!(result.is_success());
    assert_eq!(result.stdout, "hi\n");
    service.close_session(id).await.unwrap();
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_generated_files_listed_and_downloadable() {
    let service = ExecutionService::new(test_config()).unwrap();
    let source = "open('result.txt', 'w').write('computed\\n')";

    let (id, result) = service
        .execute_with_files("python3", source, None, &[], None)
        .await
        .expect("execution failed");

    assert!(result.is_success());
    assert_eq!(result.generated_files.len(), 1);
    assert_eq!(result.generated_files[0].name, "result.txt");

    let listed = service.list_session_files(id).await.unwrap();
    assert_eq!(listed.len(), 1);

    let (content, truncated) = service
        .download_session_file(id, "result.txt")
        .await
        .unwrap();
    assert_eq!(content, b"computed\n");
    assert!(!truncated);

    service.close_session(id).await.unwrap();
    // The workspace is gone with the session
    assert!(matches!(
        service.list_session_files(id).await,
        Err(ServiceError::Session(_))
    ));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_inputs_not_reported_as_generated() {
    let service = ExecutionService::new(test_config()).unwrap();
    let files = vec![UploadedFile::new("data.csv", b"a,b\n1,2\n".to_vec())];

    let (id, result) = service
        .execute_with_files("python3", "print('done')", None, &files, None)
        .await
        .expect("execution failed");

    assert!(result.generated_files.is_empty());
    service.close_session(id).await.unwrap();
}

// Needs no docker: uploads are rejected as a set before anything is staged
#[tokio::test]
async fn test_oversized_upload_rejected() {
    let config = test_config();
    let oversized = vec![0u8; config.upload.max_file_bytes as usize + 1];
    let err = config
        .upload
        .check(&[UploadedFile::new("big.txt", oversized)])
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::FileTooLarge { .. }));
}

#[tokio::test]
async fn test_disallowed_extension_rejected() {
    let config = test_config();
    let err = config
        .upload
        .check(&[UploadedFile::new("payload.exe", b"MZ".to_vec())])
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::DisallowedExtension { .. }));
}
