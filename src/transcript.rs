use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::{ChatMessage, Sender};

/// Append-only record of every message in the session.
pub(crate) trait TranscriptStore {
    fn append(&mut self, message: ChatMessage) -> io::Result<()>;

    fn messages(&self) -> &[ChatMessage];
}

#[derive(Debug, Default)]
pub(crate) struct MemoryTranscript {
    messages: Vec<ChatMessage>,
}

impl TranscriptStore for MemoryTranscript {
    fn append(&mut self, message: ChatMessage) -> io::Result<()> {
        self.messages.push(message);
        Ok(())
    }

    fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// Keeps messages in memory and mirrors each one as a JSON line.
#[derive(Debug)]
pub(crate) struct JsonlTranscript {
    path: PathBuf,
    messages: Vec<ChatMessage>,
}

impl JsonlTranscript {
    /// Earlier lines in `path` are loaded so message ids keep increasing
    /// across runs. Unreadable lines are skipped.
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        let messages = match fs::File::open(path) {
            Ok(file) => BufReader::new(file)
                .lines()
                .map_while(Result::ok)
                .filter_map(|line| serde_json::from_str::<ChatMessage>(&line).ok())
                .collect(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err),
        };
        Ok(Self {
            path: path.to_path_buf(),
            messages,
        })
    }
}

impl TranscriptStore for JsonlTranscript {
    fn append(&mut self, message: ChatMessage) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(&message)?;
        writeln!(file, "{json}")?;
        self.messages.push(message);
        Ok(())
    }

    fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }
}

/// Prints agent messages to stdout as they arrive. The operator's own lines
/// are already on screen.
pub(crate) struct ConsoleTranscript<S> {
    inner: S,
}

impl<S: TranscriptStore> ConsoleTranscript<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S: TranscriptStore> TranscriptStore for ConsoleTranscript<S> {
    fn append(&mut self, message: ChatMessage) -> io::Result<()> {
        if message.sender == Sender::Bot {
            println!("{}> {}", message.sender, message.text);
        }
        self.inner.append(message)
    }

    fn messages(&self) -> &[ChatMessage] {
        self.inner.messages()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(id: u64, sender: Sender, text: &str) -> ChatMessage {
        ChatMessage {
            id,
            text: text.to_string(),
            sender,
            at: Utc::now(),
        }
    }

    #[test]
    fn memory_transcript_keeps_order() {
        let mut store = MemoryTranscript::default();
        store.append(message(1, Sender::User, "hi")).unwrap();
        store.append(message(2, Sender::Bot, "hello")).unwrap();
        let texts: Vec<&str> = store.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["hi", "hello"]);
    }

    #[test]
    fn jsonl_transcript_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("chat.jsonl");

        let mut store = JsonlTranscript::open(&path).unwrap();
        assert!(store.messages().is_empty());
        store.append(message(1, Sender::User, "first")).unwrap();
        store.append(message(2, Sender::Bot, "second\nline")).unwrap();

        let reopened = JsonlTranscript::open(&path).unwrap();
        assert_eq!(reopened.messages().len(), 2);
        assert_eq!(reopened.messages()[1].text, "second\nline");
        assert_eq!(reopened.messages()[1].sender, Sender::Bot);
    }

    #[test]
    fn jsonl_transcript_skips_garbage_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.jsonl");
        let good = serde_json::to_string(&message(4, Sender::Bot, "ok")).unwrap();
        fs::write(&path, format!("not json\n{good}\n")).unwrap();

        let store = JsonlTranscript::open(&path).unwrap();
        assert_eq!(store.messages().len(), 1);
        assert_eq!(store.messages()[0].id, 4);
    }
}
