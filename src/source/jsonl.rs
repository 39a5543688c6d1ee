//! JSONL event feed with file rotation detection
//!
//! One event per line, either a bare JSON body or `<topic> <json body>`.
//! Blank lines are skipped.

use super::EventSource;
use crate::pipeline::types::BrokerMessage;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub struct JsonlSource {
    path: PathBuf,
    name: String,
    file: Option<BufReader<File>>,
    inode: Option<u64>,
    position: u64,
    poll_interval: Duration,
    from_beginning: bool,
    follow: bool,
    opened: bool,
}

impl JsonlSource {
    /// Tail `path` from its current end, waiting for new lines
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("jsonl:{}", path.display()),
            path,
            file: None,
            inode: None,
            position: 0,
            poll_interval: Duration::from_millis(100),
            from_beginning: false,
            follow: true,
            opened: false,
        }
    }

    /// Replay existing lines before tailing
    pub fn from_beginning(mut self, from_beginning: bool) -> Self {
        self.from_beginning = from_beginning;
        self
    }

    /// When false, the source ends at EOF instead of waiting for more lines
    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn is_started(&self) -> bool {
        self.file.is_some()
    }

    /// Open the file
    ///
    /// The first open seeks to the end unless replaying from the beginning.
    /// Later opens resume after the last line handed out, or from the top
    /// if the file was rotated or truncated in between, so nothing written
    /// while disconnected is skipped.
    pub async fn start(&mut self) -> std::io::Result<()> {
        if self.opened {
            let seek = if self.detect_rotation().await? {
                SeekFrom::Start(0)
            } else {
                SeekFrom::Start(self.position)
            };
            self.open(seek).await?;
            log::info!(
                "📖 Resumed reading: {} at byte {}",
                self.path.display(),
                self.position
            );
            return Ok(());
        }

        let seek = if self.from_beginning {
            SeekFrom::Start(0)
        } else {
            SeekFrom::End(0)
        };
        self.open(seek).await?;
        self.opened = true;
        log::info!(
            "📖 Started reading: {} ({})",
            self.path.display(),
            if self.from_beginning { "from beginning" } else { "tailing" }
        );
        Ok(())
    }

    /// Byte offset just past the last line handed out
    pub fn position(&self) -> u64 {
        self.position
    }

    async fn open(&mut self, seek: SeekFrom) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        #[cfg(unix)]
        {
            let metadata = file.metadata().await?;
            self.inode = Some(metadata.ino());
        }

        let mut reader = BufReader::new(file);
        self.position = reader.seek(seek).await?;
        self.file = Some(reader);
        Ok(())
    }

    /// Read the next non-empty line, waiting if following
    pub async fn read_line(&mut self) -> std::io::Result<Option<String>> {
        if self.file.is_none() {
            self.start().await?;
        }

        loop {
            if self.detect_rotation().await? {
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                self.open(SeekFrom::Start(0)).await?;
            }

            let Some(reader) = self.file.as_mut() else {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "File not opened",
                ));
            };

            let mut line = String::new();
            let read = reader.read_line(&mut line).await?;
            if read == 0 {
                if !self.follow {
                    return Ok(None);
                }
                sleep(self.poll_interval).await;
                continue;
            }

            // A partial last line stays in the buffer until its newline lands
            if !line.ends_with('\n') && self.follow {
                reader.seek(SeekFrom::Start(self.position)).await?;
                sleep(self.poll_interval).await;
                continue;
            }

            self.position += read as u64;
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    /// Rotated means replaced (inode changed) or truncated below our offset
    async fn detect_rotation(&self) -> std::io::Result<bool> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            // Mid-rotation: keep reading the old handle until the new file appears
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };

        #[cfg(unix)]
        {
            if self.inode.is_some_and(|old| old != metadata.ino()) {
                return Ok(true);
            }
        }

        Ok(metadata.len() < self.position)
    }
}

/// Split a feed line into an optional topic and its JSON body
pub fn parse_line(line: &str) -> BrokerMessage {
    let line = line.trim();
    if line.starts_with('{') {
        return BrokerMessage::new(None, line);
    }
    match line.split_once(char::is_whitespace) {
        Some((topic, body)) => BrokerMessage::new(Some(topic.to_string()), body.trim_start()),
        None => BrokerMessage::new(None, line),
    }
}

#[async_trait]
impl EventSource for JsonlSource {
    async fn next_message(&mut self) -> std::io::Result<Option<BrokerMessage>> {
        Ok(self.read_line().await?.map(|line| parse_line(&line)))
    }

    async fn connect(&mut self) -> std::io::Result<()> {
        self.start().await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn append(path: &std::path::Path, content: &[u8]) {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .unwrap();
        file.write_all(content).await.unwrap();
        file.flush().await.unwrap();
    }

    #[test]
    fn test_parse_line_with_topic() {
        let message = parse_line("order.placed {\"data\":{\"orderId\":\"o1\"}}");
        assert_eq!(message.topic.as_deref(), Some("order.placed"));
        assert_eq!(message.payload, b"{\"data\":{\"orderId\":\"o1\"}}".to_vec());
    }

    #[test]
    fn test_parse_line_bare_json() {
        let message = parse_line("  {\"type\":\"user.activity\"}");
        assert_eq!(message.topic, None);
        assert_eq!(message.payload, b"{\"type\":\"user.activity\"}".to_vec());
    }

    #[tokio::test]
    async fn test_tail_reads_only_new_lines() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("events.jsonl");
        append(&file_path, b"{\"old\":1}\n").await;

        let mut source = JsonlSource::new(&file_path).poll_interval(Duration::from_millis(10));
        source.start().await.unwrap();

        append(&file_path, b"\n{\"new\":2}\n").await;

        let line = tokio::time::timeout(Duration::from_secs(2), source.read_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line, "{\"new\":2}");
    }

    #[tokio::test]
    async fn test_replay_without_follow_ends_at_eof() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("events.jsonl");
        append(&file_path, b"order.placed {\"a\":1}\n{\"b\":2}\n").await;

        let mut source = JsonlSource::new(&file_path)
            .from_beginning(true)
            .follow(false);

        let first = source.next_message().await.unwrap().unwrap();
        assert_eq!(first.topic.as_deref(), Some("order.placed"));
        let second = source.next_message().await.unwrap().unwrap();
        assert_eq!(second.topic, None);
        assert!(source.next_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncation_restarts_from_top() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("events.jsonl");
        append(&file_path, b"{\"a\":1}\n{\"b\":2}\n").await;

        let mut source = JsonlSource::new(&file_path)
            .from_beginning(true)
            .follow(false);
        assert_eq!(source.read_line().await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(source.read_line().await.unwrap().as_deref(), Some("{\"b\":2}"));

        tokio::fs::write(&file_path, b"{\"c\":3}\n").await.unwrap();

        assert_eq!(source.read_line().await.unwrap().as_deref(), Some("{\"c\":3}"));
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut source = JsonlSource::new(temp_dir.path().join("absent.jsonl"));
        let err = source.start().await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_restart_resumes_after_last_line() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("events.jsonl");
        append(&file_path, b"{\"a\":1}\n").await;

        let mut source = JsonlSource::new(&file_path)
            .from_beginning(true)
            .follow(false);
        assert_eq!(source.read_line().await.unwrap().as_deref(), Some("{\"a\":1}"));

        // Lines written while the reader is down are not skipped on reconnect
        source.file = None;
        append(&file_path, b"{\"b\":2}\n{\"c\":3}\n").await;
        source.start().await.unwrap();

        assert_eq!(source.read_line().await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(source.read_line().await.unwrap().as_deref(), Some("{\"c\":3}"));
        assert!(source.read_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_after_rotation_reads_new_file_from_top() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("events.jsonl");
        append(&file_path, b"{\"old\":1}\n{\"old\":2}\n").await;

        let mut source = JsonlSource::new(&file_path)
            .from_beginning(true)
            .follow(false);
        source.read_line().await.unwrap();
        source.read_line().await.unwrap();

        source.file = None;
        tokio::fs::remove_file(&file_path).await.unwrap();
        append(&file_path, b"{\"new\":1}\n").await;
        source.start().await.unwrap();

        assert_eq!(source.read_line().await.unwrap().as_deref(), Some("{\"new\":1}"));
    }
}
