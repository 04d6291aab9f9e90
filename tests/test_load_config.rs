use clap::Parser;
use gallery_sync::cli::{Cli, Commands, SyncArgs};
use gallery_sync::load_config::{load_config, read_config_file};
use serial_test::serial;
use std::env;
use std::fs::write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

fn parse_sync(args: &[&str]) -> SyncArgs {
    let mut argv = vec!["gallery-sync", "sync"];
    argv.extend_from_slice(args);
    let Commands::Sync(sync) = Cli::try_parse_from(argv).expect("arguments parse").command;
    sync
}

fn clear_gallery_env() {
    env::remove_var("GALLERY_URL");
    env::remove_var("GALLERY_USER");
    env::remove_var("GALLERY_PASSWORD");
}

/// A complete YAML file loads without flags or environment.
#[test]
#[serial]
fn test_load_config_from_file_only() {
    clear_gallery_env();
    let config_yaml = r#"
root_path: /srv/photos
cache_path: /var/lib/gallery-sync/state.db
gallery_url: https://gallery.example.org
gallery_user: alice
gallery_password: from-file
remove_images: true
parallel_uploads: 2
extensions: [jpg, JPEG]
ignore_dirs: ["@eaDir"]
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    let args = parse_sync(&[]);
    let config = load_config(Some(config_file.path()), args.to_layer()).expect("Config should load");

    assert_eq!(config.root_path, PathBuf::from("/srv/photos"));
    assert_eq!(config.cache_path, PathBuf::from("/var/lib/gallery-sync/state.db"));
    assert_eq!(config.gallery_password, "from-file");
    assert!(config.remove_images);
    assert!(!config.no_upload);
    assert_eq!(config.parallel_uploads, 2);
    assert_eq!(config.extensions, vec!["jpg", "jpeg"]);
    assert_eq!(config.ignore_dirs, vec!["@eaDir"]);
}

/// Environment overrides the file, flags override the environment.
#[test]
#[serial]
fn test_load_config_precedence() {
    clear_gallery_env();
    let config_yaml = r#"
root_path: /srv/photos
gallery_url: https://file.example.org
gallery_user: file-user
gallery_password: file-password
parallel_uploads: 2
"#;
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), config_yaml).unwrap();

    env::set_var("GALLERY_USER", "env-user");
    env::set_var("GALLERY_PASSWORD", "env-password");

    let args = parse_sync(&["--gallery-user", "flag-user", "--parallel-uploads", "6"]);
    let config = load_config(Some(config_file.path()), args.to_layer()).expect("Config should load");
    clear_gallery_env();

    assert_eq!(config.gallery_url, "https://file.example.org");
    assert_eq!(config.gallery_user, "flag-user");
    assert_eq!(config.gallery_password, "env-password");
    assert_eq!(config.parallel_uploads, 6);
}

/// Without any file, flags and environment alone are enough.
#[test]
#[serial]
fn test_load_config_without_file() {
    clear_gallery_env();
    env::set_var("GALLERY_URL", "http://localhost:8080");
    env::set_var("GALLERY_USER", "bob");
    env::set_var("GALLERY_PASSWORD", "pw");

    let args = parse_sync(&["--root-path", "/photos", "--no-upload"]);
    let config = load_config(None, args.to_layer()).expect("Config should load");
    clear_gallery_env();

    assert_eq!(config.gallery_url, "http://localhost:8080");
    assert!(config.no_upload);
    assert_eq!(config.cache_path, PathBuf::from("./localstate.db"));
    assert_eq!(config.extensions, vec!["jpg", "png"]);
}

/// Missing credentials are reported by name.
#[test]
#[serial]
fn test_load_config_errors_on_missing_fields() {
    clear_gallery_env();
    let args = parse_sync(&["--root-path", "/photos", "--gallery-url", "https://g.example.org"]);
    let err = load_config(None, args.to_layer()).unwrap_err();
    assert!(err.to_string().contains("gallery user"), "got: {err}");
}

/// This test ensures that if the config file is not valid YAML, loading errors and reports as such.
#[test]
#[serial]
fn test_load_config_errors_for_invalid_file() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), b"not-yaml: [:::").unwrap();

    let err = read_config_file(config_file.path()).unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("parse") || msg.contains("YAML"),
        "Parse error expected, got: {msg}"
    );
}

/// Unknown keys are rejected rather than silently ignored.
#[test]
#[serial]
fn test_load_config_rejects_unknown_keys() {
    let config_file = NamedTempFile::new().expect("temp file");
    write(config_file.path(), "root_path: /photos\nupload_everything: true\n").unwrap();

    assert!(read_config_file(config_file.path()).is_err());
}
