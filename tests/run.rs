use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{self, Command};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use site_backup_lib::config::Settings;
use site_backup_lib::coordinator::{
    self, Clients, RunContext, RunError, RunSummary, EXIT_FATAL, EXIT_INTERRUPTED,
};
use site_backup_lib::notify::{Notification, Notifier, NotifyError};
use site_backup_lib::remote::{RemoteError, RemoteObject, RemoteStore};
use site_backup_lib::util::{CancellationToken, LockError};
use tempfile::TempDir;

const S3_CONFIG: &str = r#"
[global.s3]
endpoint = "https://s3.example.com"
bucket = "backups"
access_key = "access"
secret_key = "secret"
"#;

#[derive(Default)]
struct Bucket {
    objects: BTreeMap<String, (Vec<u8>, DateTime<Utc>)>,
    fail_uploads: bool,
}

/// In-memory [RemoteStore] shared between the test and the run.
#[derive(Clone, Default)]
struct MemoryStore(Arc<Mutex<Bucket>>);

impl MemoryStore {
    fn seed(&self, key: &str, last_modified: DateTime<Utc>) {
        self.0
            .lock()
            .unwrap()
            .objects
            .insert(key.to_string(), (Vec::new(), last_modified));
    }

    fn keys(&self) -> Vec<String> {
        self.0.lock().unwrap().objects.keys().cloned().collect()
    }

    fn content(&self, key: &str) -> Vec<u8> {
        self.0.lock().unwrap().objects[key].0.clone()
    }
}

impl RemoteStore for MemoryStore {
    fn upload(&self, local_path: &Path, key: &str) -> Result<(), RemoteError> {
        let mut bucket = self.0.lock().unwrap();
        if bucket.fail_uploads {
            return Err(RemoteError::InvalidEndpoint("simulated outage".into()));
        }
        let content = fs::read(local_path)?;
        bucket.objects.insert(key.to_string(), (content, Utc::now()));
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, RemoteError> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (_, last_modified))| RemoteObject {
                key: key.clone(),
                last_modified: *last_modified,
            })
            .collect())
    }

    fn delete(&self, key: &str) -> Result<(), RemoteError> {
        self.0.lock().unwrap().objects.remove(key);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingNotifier(Arc<Mutex<Vec<Notification>>>);

impl RecordingNotifier {
    fn sent(&self) -> Vec<Notification> {
        self.0.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.0.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

struct Fixture {
    dir: TempDir,
    ctx: RunContext,
    store: MemoryStore,
    notifier: RecordingNotifier,
}

impl Fixture {
    /// A run configured with S3 settings but no sites.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        fs::write(&config_path, S3_CONFIG).unwrap();

        let ctx = RunContext {
            config_path,
            backup_dir: dir.path().join("backups"),
            lock_path: dir.path().join("backup.lock"),
            dump_program: PathBuf::from("echo"),
            tar_program: PathBuf::from("tar"),
        };

        Self {
            dir,
            ctx,
            store: MemoryStore::default(),
            notifier: RecordingNotifier::default(),
        }
    }

    /// Configure `sites` (TOML `[[sites]]` tables) next to the S3 settings.
    fn configure(&self, sites: &str) {
        fs::write(&self.ctx.config_path, format!("{S3_CONFIG}\n{sites}")).unwrap();
    }

    fn site_root(&self, name: &str) -> PathBuf {
        self.dir.path().join("sites").join(name)
    }

    fn create_site(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let root = self.site_root(name);
        for (path, content) in files {
            let path = root.join(path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        root
    }

    fn execute(&self, token: &CancellationToken) -> Result<RunSummary, RunError> {
        let store = self.store.clone();
        let notifier = self.notifier.clone();
        coordinator::execute(&self.ctx, token, move |_: &Settings| {
            Ok(Clients {
                store: Box::new(store),
                notifier: Box::new(notifier),
            })
        })
    }

    fn backup_dir_entries(&self) -> Vec<String> {
        fs::read_dir(&self.ctx.backup_dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }
}

fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, n, 3, 0, 0).unwrap()
}

fn archive_entries(content: &[u8]) -> Vec<String> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.tar.gz");
    fs::write(&path, content).unwrap();

    let output = Command::new("tar").arg("-tzf").arg(&path).output().unwrap();
    assert!(output.status.success());
    String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn backs_up_uploads_and_prunes_site() {
    let fixture = Fixture::new();
    let root = fixture.create_site(
        "blog",
        &[
            (".env", "DB_DATABASE=blogdb\nDB_USERNAME=blog\nDB_PASSWORD=secret\n"),
            ("public/index.php", "<?php echo 'hello';"),
            ("public/cache/page.tmp", "cached"),
        ],
    );
    fixture.configure(&format!(
        r#"
[[sites]]
name = "blog"
user_path = "{}"
retention_days = 2
exclude_patterns = ["*.tmp"]
"#,
        root.display()
    ));

    let store = &fixture.store;
    store.seed("blog/blog_20240101_030000.tar.gz", day(1));
    store.seed("blog/blog_20240102_030000.tar.gz", day(2));
    store.seed("blog/blog_20240103_030000.tar.gz", day(3));
    store.seed("blog/readme.txt", day(1));
    store.seed("blog2/blog2_20240101_030000.tar.gz", day(1));

    let summary = fixture.execute(&CancellationToken::new()).unwrap();

    assert_eq!(
        summary,
        RunSummary {
            processed: 1,
            succeeded: 1,
            failed: 0
        }
    );

    let keys = store.keys();
    let uploaded: Vec<_> = keys
        .iter()
        .filter(|key| key.starts_with("blog/blog_") && !key.starts_with("blog/blog_2024010"))
        .collect();
    assert_eq!(uploaded.len(), 1, "{keys:?}");
    let uploaded = uploaded[0].clone();
    assert_eq!(
        keys,
        vec![
            "blog/blog_20240103_030000.tar.gz".to_string(),
            uploaded.clone(),
            "blog/readme.txt".to_string(),
            "blog2/blog2_20240101_030000.tar.gz".to_string(),
        ]
    );

    let entries = archive_entries(&store.content(&uploaded));
    assert!(entries.iter().any(|e| e == "blog/public/index.php"), "{entries:?}");
    assert!(entries.iter().any(|e| e == "blog_database.sql"), "{entries:?}");
    assert!(!entries.iter().any(|e| e.ends_with("page.tmp")), "{entries:?}");

    let sent = fixture.notifier.sent();
    assert_eq!(sent.len(), 4, "{sent:?}");
    assert!(matches!(
        &sent[0],
        Notification::BackupSucceeded { site, file, size_bytes }
            if site == "blog" && uploaded.ends_with(file.as_str()) && *size_bytes > 0
    ));
    assert_eq!(
        sent[1..].to_vec(),
        vec![
            Notification::BackupDeleted {
                site: "blog".into(),
                file: "blog_20240101_030000.tar.gz".into()
            },
            Notification::BackupDeleted {
                site: "blog".into(),
                file: "blog_20240102_030000.tar.gz".into()
            },
            Notification::Summary(summary),
        ]
    );

    assert!(!fixture.ctx.lock_path.exists());
    assert!(fixture.backup_dir_entries().is_empty());
}

#[test]
fn missing_site_path_fails_only_that_site() {
    let fixture = Fixture::new();
    let root = fixture.create_site("wiki", &[("index.php", "<?php")]);
    let missing = fixture.site_root("blog");
    fixture.configure(&format!(
        r#"
[[sites]]
name = "blog"
user_path = "{}"

[[sites]]
name = "wiki"
user_path = "{}"
backup_database = false
"#,
        missing.display(),
        root.display(),
    ));

    let summary = fixture.execute(&CancellationToken::new()).unwrap();

    assert_eq!(
        summary,
        RunSummary {
            processed: 2,
            succeeded: 1,
            failed: 1
        }
    );
    let sent = fixture.notifier.sent();
    assert_eq!(
        sent[0],
        Notification::SiteMissing {
            site: "blog".into(),
            path: missing
        }
    );
    assert!(matches!(&sent[1], Notification::BackupSucceeded { site, .. } if site == "wiki"));
    assert_eq!(sent.last(), Some(&Notification::Summary(summary)));
    assert_eq!(
        sent.last().unwrap().title(),
        "⚠️ **Backup Complete with Errors**"
    );
    assert!(!fixture.ctx.lock_path.exists());
}

#[test]
fn unusable_credentials_skip_only_the_database() {
    let fixture = Fixture::new();
    let root = fixture.create_site("blog", &[("public/index.php", "<?php")]);
    fixture.configure(&format!(
        "[[sites]]\nname = \"blog\"\nuser_path = \"{}\"\n",
        root.display()
    ));

    let summary = fixture.execute(&CancellationToken::new()).unwrap();

    assert_eq!(summary.succeeded, 1);
    let key = fixture.store.keys().pop().unwrap();
    let entries = archive_entries(&fixture.store.content(&key));
    assert!(!entries.iter().any(|e| e.ends_with(".sql")), "{entries:?}");
}

#[test]
fn failed_upload_removes_local_archive() {
    let fixture = Fixture::new();
    let root = fixture.create_site("blog", &[("index.php", "<?php")]);
    fixture.configure(&format!(
        "[[sites]]\nname = \"blog\"\nuser_path = \"{}\"\nbackup_database = false\n",
        root.display()
    ));
    fixture.store.0.lock().unwrap().fail_uploads = true;

    let summary = fixture.execute(&CancellationToken::new()).unwrap();

    assert_eq!(summary.failed, 1);
    assert!(fixture.store.keys().is_empty());
    assert!(fixture.backup_dir_entries().is_empty());
    assert_eq!(fixture.notifier.sent(), vec![Notification::Summary(summary)]);
}

#[test]
fn missing_config_is_fatal() {
    let fixture = Fixture::new();
    fs::remove_file(&fixture.ctx.config_path).unwrap();

    let err = fixture.execute(&CancellationToken::new()).unwrap_err();

    assert_eq!(err.exit_code(), EXIT_FATAL);
    assert!(matches!(err, RunError::Config(_)), "{err:?}");
    assert!(!fixture.ctx.lock_path.exists());
    assert!(fixture.notifier.sent().is_empty());
}

#[test]
fn config_without_sites_is_fatal() {
    let fixture = Fixture::new();

    let err = fixture.execute(&CancellationToken::new()).unwrap_err();

    assert_eq!(err.exit_code(), EXIT_FATAL);
    assert!(!fixture.ctx.lock_path.exists());
}

#[test]
fn running_instance_blocks_run() {
    let fixture = Fixture::new();
    fs::write(&fixture.ctx.lock_path, process::id().to_string()).unwrap();

    let err = fixture.execute(&CancellationToken::new()).unwrap_err();

    assert!(matches!(err, RunError::Lock(LockError::AlreadyRunning(_))), "{err:?}");
    assert_eq!(err.exit_code(), EXIT_FATAL);
    assert_eq!(
        fs::read_to_string(&fixture.ctx.lock_path).unwrap(),
        process::id().to_string()
    );
    assert!(!fixture.ctx.backup_dir.exists());
}

#[test]
fn cancelled_run_stops_before_sites() {
    let fixture = Fixture::new();
    let root = fixture.create_site("blog", &[("index.php", "<?php")]);
    fixture.configure(&format!(
        "[[sites]]\nname = \"blog\"\nuser_path = \"{}\"\n",
        root.display()
    ));
    let token = CancellationToken::new();
    token.cancel();

    let err = fixture.execute(&token).unwrap_err();

    assert_eq!(err.exit_code(), EXIT_INTERRUPTED);
    assert!(fixture.store.keys().is_empty());
    assert!(fixture.notifier.sent().is_empty());
    assert!(!fixture.ctx.lock_path.exists());
}

#[test]
fn leftovers_of_interrupted_run_are_removed() {
    let fixture = Fixture::new();
    let root = fixture.create_site("blog", &[("index.php", "<?php")]);
    fixture.configure(&format!(
        "[[sites]]\nname = \"blog\"\nuser_path = \"{}\"\nbackup_database = false\n",
        root.display()
    ));

    let backup_dir = &fixture.ctx.backup_dir;
    fs::create_dir_all(backup_dir.join("backup_blog_x1y2z3")).unwrap();
    fs::write(backup_dir.join("backup_blog_x1y2z3/blog_database.sql"), "-- partial").unwrap();
    fs::write(backup_dir.join("blog_20240101_030000.tar.gz"), "partial").unwrap();
    fs::write(backup_dir.join("notes.txt"), "kept").unwrap();

    let summary = fixture.execute(&CancellationToken::new()).unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(fixture.backup_dir_entries(), vec!["notes.txt"]);
    assert_eq!(fixture.store.keys().len(), 1);
}
