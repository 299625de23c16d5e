use std::io::Write;
use std::path::Path;

use asset_sync_core::asset::AssetMode;
use asset_sync_core::config::LoaderConfig;
use asset_sync_core::contract::Loader;
use asset_sync_core::loader::DefaultLoader;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tempfile::{tempdir, TempDir};
use zip::write::SimpleFileOptions;

struct Fixture {
    scratch: TempDir,
    objects: TempDir,
    sources: TempDir,
    loader: DefaultLoader,
}

fn fixture() -> Fixture {
    let scratch = tempdir().unwrap();
    let objects = tempdir().unwrap();
    let sources = tempdir().unwrap();
    let loader = DefaultLoader::new(&LoaderConfig {
        temporary_dir: Some(scratch.path().to_path_buf()),
        objects_dir: objects.path().to_path_buf(),
        verify_tls: true,
    })
    .unwrap();
    Fixture {
        scratch,
        objects,
        sources,
        loader,
    }
}

fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = std::fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, content) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

#[tokio::test]
async fn single_file_is_copied_into_a_fresh_scratch_dir() {
    let f = fixture();
    let source = f.sources.path().join("guide.md");
    std::fs::write(&source, "# guide").unwrap();

    let content = f
        .loader
        .load(&file_url(&source), "docs", AssetMode::Single, "ignored(")
        .await
        .unwrap();

    assert!(content.dir.starts_with(f.scratch.path()));
    assert_eq!(content.files, vec!["guide.md".to_string()]);
    assert_eq!(
        std::fs::read_to_string(content.dir.join("guide.md")).unwrap(),
        "# guide"
    );

    let other = f
        .loader
        .load(&file_url(&source), "docs", AssetMode::Single, "")
        .await
        .unwrap();
    assert_ne!(content.dir, other.dir, "every load gets its own directory");
}

#[tokio::test]
async fn missing_single_file_reports_scratch_dir() {
    let f = fixture();

    let err = f
        .loader
        .load("file:///definitely/not/here.md", "docs", AssetMode::Single, "")
        .await
        .unwrap_err();

    let dir = err.dir.expect("scratch dir should be reported");
    assert!(dir.exists());
    f.loader.clean(&dir).await.unwrap();
    assert!(!dir.exists());
}

#[tokio::test]
async fn package_is_extracted_and_filtered() {
    let f = fixture();
    let archive = f.sources.path().join("bundle.zip");
    write_zip(
        &archive,
        &[
            ("README.md", "readme"),
            ("docs/intro.md", "intro"),
            ("assets/logo.svg", "<svg/>"),
        ],
    );

    let content = f
        .loader
        .load(&file_url(&archive), "bundle", AssetMode::Package, r"\.md$")
        .await
        .unwrap();

    assert_eq!(
        content.files,
        vec!["README.md".to_string(), "docs/intro.md".to_string()]
    );
    assert_eq!(
        std::fs::read_to_string(content.dir.join("docs/intro.md")).unwrap(),
        "intro"
    );
    assert!(!content.dir.join("assets/logo.svg").exists());
}

#[tokio::test]
async fn invalid_filter_is_an_error() {
    let f = fixture();
    let archive = f.sources.path().join("bundle.zip");
    write_zip(&archive, &[("a.md", "a")]);

    let err = f
        .loader
        .load(&file_url(&archive), "bundle", AssetMode::Package, "(")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("filter"));
}

#[tokio::test]
async fn index_entries_become_files() {
    let f = fixture();
    std::fs::create_dir_all(f.objects.path().join("team")).unwrap();
    std::fs::write(
        f.objects.path().join("team/specs.json"),
        serde_json::json!({"api.yaml": "openapi: 3.0.0", "notes.txt": "skip me"}).to_string(),
    )
    .unwrap();

    let content = f
        .loader
        .load("team/specs", "specs", AssetMode::Index, r"\.yaml$")
        .await
        .unwrap();

    assert_eq!(content.files, vec!["api.yaml".to_string()]);
    assert_eq!(
        std::fs::read_to_string(content.dir.join("api.yaml")).unwrap(),
        "openapi: 3.0.0"
    );
}

#[tokio::test]
async fn index_source_must_be_namespace_and_name() {
    let f = fixture();

    let err = f
        .loader
        .load("just-a-name", "specs", AssetMode::Index, "")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("invalid source format"));
}

#[tokio::test]
async fn index_values_must_be_text() {
    let f = fixture();
    std::fs::create_dir_all(f.objects.path().join("team")).unwrap();
    std::fs::write(
        f.objects.path().join("team/specs.json"),
        serde_json::json!({"count": 3}).to_string(),
    )
    .unwrap();

    let err = f
        .loader
        .load("team/specs", "specs", AssetMode::Index, "")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("not a string"));
}

#[tokio::test]
async fn index_binary_section_is_decoded() {
    let f = fixture();
    std::fs::create_dir_all(f.objects.path().join("team")).unwrap();
    let logo: &[u8] = &[0x89, b'P', b'N', b'G', 0x00, 0xff];
    std::fs::write(
        f.objects.path().join("team/specs.json"),
        serde_json::json!({
            "data": {"api.yaml": "openapi: 3.0.0"},
            "binaryData": {"logo.png": STANDARD.encode(logo)},
        })
        .to_string(),
    )
    .unwrap();

    let content = f
        .loader
        .load("team/specs", "specs", AssetMode::Index, "")
        .await
        .unwrap();

    assert_eq!(
        content.files,
        vec!["api.yaml".to_string(), "logo.png".to_string()]
    );
    assert_eq!(std::fs::read(content.dir.join("logo.png")).unwrap(), logo);
    assert_eq!(
        std::fs::read_to_string(content.dir.join("api.yaml")).unwrap(),
        "openapi: 3.0.0"
    );
}

#[tokio::test]
async fn index_entry_cannot_be_both_text_and_binary() {
    let f = fixture();
    std::fs::create_dir_all(f.objects.path().join("team")).unwrap();
    std::fs::write(
        f.objects.path().join("team/specs.json"),
        serde_json::json!({
            "data": {"a.md": "text"},
            "binaryData": {"a.md": STANDARD.encode("bytes")},
        })
        .to_string(),
    )
    .unwrap();

    let err = f
        .loader
        .load("team/specs", "specs", AssetMode::Index, "")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("both text and binary"));
}

#[tokio::test]
async fn index_binary_values_must_be_base64() {
    let f = fixture();
    std::fs::create_dir_all(f.objects.path().join("team")).unwrap();
    std::fs::write(
        f.objects.path().join("team/specs.json"),
        serde_json::json!({"binaryData": {"logo.png": "%%%"}}).to_string(),
    )
    .unwrap();

    let err = f
        .loader
        .load("team/specs", "specs", AssetMode::Index, "")
        .await
        .unwrap_err();

    assert!(err.to_string().contains("logo.png"));
}
