//! Common utilities for integration tests

use cli_lib::{Config, Monitor};
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// A watch directory, a staging area and an SQLite database with the
/// `entries` table
pub struct Fixture {
    _temp: TempDir,
    pub watch_dir: PathBuf,
    staging: PathBuf,
    pub db_path: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let watch_dir = temp.path().join("inbox");
        let staging = temp.path().join("staging");
        fs::create_dir(&watch_dir).unwrap();
        fs::create_dir(&staging).unwrap();

        let db_path = temp.path().join("entries.db");
        Connection::open(&db_path)
            .unwrap()
            .execute_batch("CREATE TABLE entries (content TEXT, creation_date TEXT);")
            .unwrap();

        Self {
            watch_dir: watch_dir.canonicalize().unwrap(),
            staging,
            db_path,
            _temp: temp,
        }
    }

    pub fn config(&self) -> Config {
        Config::parse(&format!(
            r#"
[database]
url = "sqlite://{}"
table = "entries"
pool_size = 2

[monitor]
folder = "{}"
period = 20
time_unit = "milliseconds"
workers = 2
"#,
            self.db_path.display(),
            self.watch_dir.display()
        ))
        .unwrap()
    }

    /// Write `body` aside, then move it into the watch directory in one step
    pub fn drop_file(&self, name: &str, body: &str) {
        let staged = self.staging.join(name);
        fs::write(&staged, body).unwrap();
        fs::rename(&staged, self.watch_dir.join(name)).unwrap();
    }

    pub fn rows(&self) -> Vec<(String, String)> {
        let conn = Connection::open(&self.db_path).unwrap();
        let mut stmt = conn
            .prepare("SELECT content, creation_date FROM entries ORDER BY rowid")
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    /// Files directly inside `folder` of the watch directory
    pub fn files_in(&self, folder: &str) -> Vec<PathBuf> {
        let dir = self.watch_dir.join(folder);
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut files: Vec<_> = entries
            .map(|e| e.unwrap().path())
            .filter(|p| p.is_file())
            .collect();
        files.sort();
        files
    }
}

/// Poll `monitor` until `done` holds and nothing is in flight
pub fn poll_until(monitor: &Monitor, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        monitor.poll();
        if monitor.in_flight() == 0 && done() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

pub fn entry_xml(content: &str, creation_date: &str) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n<Entry>\n  <content>{}</content>\n  <creationDate>{}</creationDate>\n</Entry>\n",
        content, creation_date
    )
}
