use std::fs;

use tempfile::TempDir;

use sandfs::{Config, KindLimit, MutationExecutor, PasteMode, SandboxFsError};

fn executor(tmp: &TempDir) -> MutationExecutor {
    MutationExecutor::new(tmp.path().join("workspace"), Config::default()).unwrap()
}

#[tokio::test]
async fn create_folder_reports_directory_descriptor() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);

    let entry = fs.create_folder("/docs", PasteMode::Duplicate).await.unwrap();
    assert_eq!(entry.name, "docs");
    assert_eq!(entry.path, "/docs");
    assert!(entry.is_folder);
    assert!(entry.writable);
    assert!(entry.size.is_none());
    assert!(fs.root().join("docs").is_dir());
}

#[tokio::test]
async fn create_folder_duplicate_mode_auto_renames() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);

    fs.create_folder("/docs", PasteMode::Duplicate).await.unwrap();
    let second = fs.create_folder("/docs", PasteMode::Duplicate).await.unwrap();
    let third = fs.create_folder("/docs", PasteMode::Duplicate).await.unwrap();

    assert_eq!(second.name, "docs-copy1");
    assert_eq!(third.name, "docs-copy2");
}

#[tokio::test]
async fn create_folder_cover_mode_tolerates_existing() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);

    fs.create_folder("/docs", PasteMode::Cover).await.unwrap();
    let again = fs.create_folder("/docs", PasteMode::Cover).await.unwrap();
    assert_eq!(again.name, "docs");
}

#[tokio::test]
async fn untitled_files_take_successive_names() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);

    let first = fs.create_file("/").await.unwrap();
    let second = fs.create_file("/").await.unwrap();
    assert_eq!(first.name, "Untitled");
    assert_eq!(second.name, "Untitled1");

    let folder = fs.create_folder_default("/").await.unwrap();
    assert_eq!(folder.name, "Untitled2");
    assert!(folder.is_folder);
}

#[tokio::test]
async fn new_notebook_is_a_valid_empty_document() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);

    let entry = fs.create_notebook("/").await.unwrap();
    assert_eq!(entry.name, "Untitled.ipynb");
    assert_eq!(entry.mime_type, "application/x-ipynb+json");

    let body = fs::read_to_string(fs.root().join("Untitled.ipynb")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(doc["nbformat"], 4);
    assert!(doc["cells"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn copy_file_preserves_bytes_and_leaves_source() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("report.txt"), b"quarterly numbers").unwrap();

    let copy = fs.copy("/report.txt", "/report2.txt", PasteMode::Duplicate).await.unwrap();
    assert_eq!(copy.name, "report2.txt");
    assert_eq!(fs::read(fs.root().join("report.txt")).unwrap(), b"quarterly numbers");
    assert_eq!(fs::read(fs.root().join("report2.txt")).unwrap(), b"quarterly numbers");
}

#[tokio::test]
async fn copy_auto_renames_when_target_is_taken() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("report.txt"), b"v1").unwrap();

    let copy = fs.copy("/report.txt", "/report.txt", PasteMode::Duplicate).await.unwrap();
    assert_eq!(copy.name, "report-copy1.txt");
    assert_eq!(fs::read(fs.root().join("report-copy1.txt")).unwrap(), b"v1");
}

#[tokio::test]
async fn copy_directory_is_recursive() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir_all(fs.root().join("a/inner")).unwrap();
    fs::write(fs.root().join("a/inner/x.txt"), b"deep").unwrap();

    fs.copy("/a", "/b", PasteMode::Duplicate).await.unwrap();
    assert_eq!(fs::read(fs.root().join("b/inner/x.txt")).unwrap(), b"deep");
}

#[tokio::test]
async fn copy_into_own_subtree_is_rejected_before_any_mutation() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir_all(fs.root().join("a/inner")).unwrap();
    fs::write(fs.root().join("a/inner/x.txt"), b"deep").unwrap();

    let err = fs.copy("/a", "/a/b", PasteMode::Duplicate).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::SelfContainment { .. }));

    // the source tree is untouched
    assert!(!fs.root().join("a/b").exists());
    assert_eq!(fs::read(fs.root().join("a/inner/x.txt")).unwrap(), b"deep");
}

#[tokio::test]
async fn copy_cover_onto_itself_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("report.txt"), b"v1").unwrap();

    let entry = fs.copy("/report.txt", "/report.txt", PasteMode::Cover).await.unwrap();
    assert_eq!(entry.name, "report.txt");
    assert_eq!(fs::read(fs.root().join("report.txt")).unwrap(), b"v1");
}

#[tokio::test]
async fn move_relocates_file() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir(fs.root().join("dst")).unwrap();
    fs::write(fs.root().join("report.txt"), b"v1").unwrap();

    let moved = fs
        .move_entry("/report.txt", "/dst/report.txt", PasteMode::Duplicate)
        .await
        .unwrap();
    assert_eq!(moved.path, "/dst/report.txt");
    assert!(!fs.root().join("report.txt").exists());
    assert_eq!(fs::read(fs.root().join("dst/report.txt")).unwrap(), b"v1");
}

#[tokio::test]
async fn move_requires_existing_target_parent() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("report.txt"), b"v1").unwrap();

    let err = fs
        .move_entry("/report.txt", "/missing/report.txt", PasteMode::Duplicate)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxFsError::NotFound(_)));
    assert!(fs.root().join("report.txt").exists());
}

#[tokio::test]
async fn protected_folder_cannot_be_moved_renamed_or_deleted() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir(fs.root().join("CODE")).unwrap();

    let err = fs.move_entry("/CODE", "/elsewhere", PasteMode::Duplicate).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::ProtectedPath(_)));

    let err = fs.rename("/CODE", "CODE2", None).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::ProtectedPath(_)));

    let err = fs.delete_folder("/CODE").await.unwrap_err();
    assert!(matches!(err, SandboxFsError::ProtectedPath(_)));

    assert!(fs.root().join("CODE").is_dir());

    // nesting under the protected name is not protected
    fs::create_dir(fs.root().join("CODE/sub")).unwrap();
    fs.delete_folder("/CODE/sub").await.unwrap();
}

#[tokio::test]
async fn rename_changes_leaf_name_in_place() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir(fs.root().join("dir")).unwrap();
    fs::write(fs.root().join("dir/old.txt"), b"v1").unwrap();

    let entry = fs.rename("/dir/old.txt", "new.txt", Some(KindLimit::File)).await.unwrap();
    assert_eq!(entry.path, "/dir/new.txt");
    assert!(!fs.root().join("dir/old.txt").exists());
}

#[tokio::test]
async fn rename_onto_occupied_name_is_a_hard_error() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("a.txt"), b"a").unwrap();
    fs::write(fs.root().join("b.txt"), b"b").unwrap();

    let err = fs.rename("/a.txt", "b.txt", None).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::AlreadyExists { .. }));
    assert_eq!(fs::read(fs.root().join("b.txt")).unwrap(), b"b");
}

#[tokio::test]
async fn rename_kind_limit_is_enforced() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir(fs.root().join("dir")).unwrap();

    let err = fs.rename("/dir", "dir2", Some(KindLimit::File)).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::WrongKind { .. }));
}

#[tokio::test]
async fn rename_to_same_name_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("a.txt"), b"a").unwrap();

    let entry = fs.rename("/a.txt", "a.txt", None).await.unwrap();
    assert_eq!(entry.name, "a.txt");
}

#[tokio::test]
async fn rename_rejects_hidden_and_oversized_names() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("a.txt"), b"a").unwrap();

    let err = fs.rename("/a.txt", ".hidden", None).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::IllegalPath(_)));

    let long = "x".repeat(256);
    let err = fs.rename("/a.txt", &long, None).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::NameTooLong(_)));
}

#[tokio::test]
async fn delete_only_accepts_files() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir(fs.root().join("dir")).unwrap();
    fs::write(fs.root().join("a.txt"), b"a").unwrap();

    fs.delete("/a.txt").await.unwrap();
    assert!(!fs.root().join("a.txt").exists());

    let err = fs.delete("/dir").await.unwrap_err();
    assert!(matches!(err, SandboxFsError::WrongKind { .. }));
}

#[tokio::test]
async fn delete_folder_removes_nonempty_trees() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir_all(fs.root().join("dir/inner")).unwrap();
    fs::write(fs.root().join("dir/inner/x.txt"), b"x").unwrap();

    fs.delete_folder("/dir").await.unwrap();
    assert!(!fs.root().join("dir").exists());
}

#[tokio::test]
async fn list_children_is_sorted_and_content_free() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("b.txt"), b"b").unwrap();
    fs::write(fs.root().join("a.txt"), b"a").unwrap();
    fs::create_dir(fs.root().join("c")).unwrap();

    let entries = fs.list_children("/").await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "c"]);
    assert!(entries.iter().all(|e| e.content.is_none()));
}

#[tokio::test]
async fn list_children_refuses_oversized_directories() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = Config::default();
    cfg.storage.max_list_entries = 3;
    let fs = MutationExecutor::new(tmp.path().join("workspace"), cfg).unwrap();
    for i in 0..4 {
        fs::write(fs.root().join(format!("f{i}.txt")), b"x").unwrap();
    }

    let err = fs.list_children("/").await.unwrap_err();
    assert!(matches!(err, SandboxFsError::TooManyEntries { limit: 3, .. }));
}

#[tokio::test]
async fn growing_writes_respect_the_free_space_floor() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = Config::default();
    // a floor no volume can satisfy; must not overflow the requirement sum
    cfg.storage.min_free_bytes = u64::MAX;
    let fs = MutationExecutor::new(tmp.path().join("workspace"), cfg).unwrap();
    fs::write(fs.root().join("report.txt"), b"v1").unwrap();

    let err = fs.create_folder("/docs", PasteMode::Duplicate).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::InsufficientSpace { .. }));
    assert!(!fs.root().join("docs").exists());

    let err = fs.create_file("/").await.unwrap_err();
    assert!(matches!(err, SandboxFsError::InsufficientSpace { .. }));

    let err = fs.copy("/report.txt", "/report2.txt", PasteMode::Duplicate).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::InsufficientSpace { .. }));
    assert!(!fs.root().join("report2.txt").exists());
}

#[tokio::test]
async fn check_exists_in_folder_reports_kind() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::write(fs.root().join("a.txt"), b"a").unwrap();
    fs::create_dir(fs.root().join("dir")).unwrap();

    let file = fs.check_exists_in_folder("a.txt", "/").await.unwrap();
    assert!(file.has_same_file && !file.has_same_folder);

    let dir = fs.check_exists_in_folder("dir", "/").await.unwrap();
    assert!(!dir.has_same_file && dir.has_same_folder);

    let none = fs.check_exists_in_folder("missing", "/").await.unwrap();
    assert!(!none.has_same_file && !none.has_same_folder);
}

#[tokio::test]
async fn folder_size_sums_the_whole_tree() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);
    fs::create_dir_all(fs.root().join("dir/inner")).unwrap();
    fs::write(fs.root().join("dir/a.bin"), vec![0u8; 10]).unwrap();
    fs::write(fs.root().join("dir/inner/b.bin"), vec![0u8; 32]).unwrap();

    assert_eq!(fs.folder_size("/dir").await.unwrap(), 42);
}

#[tokio::test]
async fn traversal_segments_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);

    for path in ["/../etc", "/a/../../b", "a/relative", "/a/./b"] {
        let err = fs.describe(path, false).await.unwrap_err();
        assert!(matches!(err, SandboxFsError::IllegalPath(_)), "{path}");
    }
}

#[tokio::test]
async fn describe_missing_entry_is_not_found() {
    let tmp = TempDir::new().unwrap();
    let fs = executor(&tmp);

    let err = fs.describe("/missing.txt", false).await.unwrap_err();
    assert!(matches!(err, SandboxFsError::NotFound(_)));
}
