//! Live tail of a growing instrument log.
//!
//! [`LineReader`] follows one open file handle and hands out complete lines
//! as they are appended. [`Tailer`] is the producer task of a session: it
//! decodes each line, runs it through the [`DerivationPipeline`] and appends
//! the results to the [`SeriesStore`].
//!
//! # State machine
//!
//! ```text
//! Idle → HeaderRead → Streaming ⇄ Paused → Closed
//!          (any state) → Error
//! ```
//!
//! End of file is not an error: the tailer sleeps one poll interval and
//! tries again. Pausing stops reads only; consumers keep polling and simply
//! see no new rows.

use crate::data::pipeline::DerivationPipeline;
use crate::data::series::SeriesStore;
use crate::error::{AppResult, MimsError};
use crate::ingest::decode::{self, Header};
use chrono::NaiveDateTime;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

/// Lifecycle of the ingest producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    /// Nothing opened yet.
    Idle,
    /// Header decoded and column layout resolved.
    HeaderRead,
    /// Reading rows.
    Streaming,
    /// Paused by the user; no reads.
    Paused,
    /// Stopped by the session, or end of file reached in one-shot mode.
    Closed,
    /// Stopped by a fatal error.
    Error,
}

impl TailerState {
    /// Whether the producer has stopped for good.
    pub fn is_terminal(self) -> bool {
        matches!(self, TailerState::Closed | TailerState::Error)
    }
}

/// How the tailer treats end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowMode {
    /// Keep polling for appended lines until closed.
    Follow,
    /// Stop at the first end of file.
    UntilEof,
}

/// Incremental line reader over a file that keeps growing.
///
/// A fragment without a trailing newline is held back. It is released once
/// it has stayed unchanged across one whole poll, since the instrument may
/// leave its last line unterminated.
pub struct LineReader {
    reader: BufReader<File>,
    pending: String,
    held: bool,
    line_no: usize,
}

impl LineReader {
    /// Open the file positioned at its start.
    pub async fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let file = File::open(path.as_ref()).await?;
        Ok(Self {
            reader: BufReader::new(file),
            pending: String::new(),
            held: false,
            line_no: 0,
        })
    }

    /// 1-based number of the last line returned.
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// Read the header line.
    ///
    /// In [`FollowMode::Follow`] a header still being written (no newline
    /// yet) is kept pending and reported as [`MimsError::EmptyDataFile`];
    /// the next call resumes it. [`FollowMode::UntilEof`] accepts an
    /// unterminated header as complete.
    pub async fn read_header(&mut self, mode: FollowMode) -> AppResult<Header> {
        self.reader.read_line(&mut self.pending).await?;
        let complete = self.pending.ends_with('\n');
        if self.pending.is_empty() || (!complete && mode == FollowMode::Follow) {
            return Err(MimsError::EmptyDataFile);
        }
        let line = std::mem::take(&mut self.pending);
        self.line_no = 1;
        decode::parse_header(&line)
    }

    /// Next complete line, or `None` when no new data is available yet.
    pub async fn next_line(&mut self) -> AppResult<Option<String>> {
        loop {
            let read = self.reader.read_line(&mut self.pending).await?;
            if read == 0 {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                if !self.held {
                    self.held = true;
                    return Ok(None);
                }
                debug!(line = self.line_no + 1, "Releasing unterminated line");
            } else if !self.pending.ends_with('\n') {
                self.held = false;
                continue;
            }

            self.held = false;
            self.line_no += 1;
            let line = std::mem::take(&mut self.pending);
            if line.trim().is_empty() {
                continue;
            }
            return Ok(Some(line));
        }
    }

    /// Release any held fragment immediately (end of a one-shot read).
    pub fn take_pending(&mut self) -> Option<String> {
        if self.pending.trim().is_empty() {
            return None;
        }
        self.line_no += 1;
        Some(std::mem::take(&mut self.pending))
    }
}

/// Producer task of one ingest session.
pub struct Tailer {
    reader: LineReader,
    channel_count: usize,
    pipeline: DerivationPipeline,
    store: Arc<SeriesStore>,
    state: watch::Sender<TailerState>,
    poll_interval: Duration,
    mode: FollowMode,
    t0: Option<NaiveDateTime>,
}

impl Tailer {
    /// Build a tailer whose header has already been read from `reader`.
    pub fn new(
        reader: LineReader,
        pipeline: DerivationPipeline,
        store: Arc<SeriesStore>,
        state: watch::Sender<TailerState>,
        poll_interval: Duration,
        mode: FollowMode,
    ) -> Self {
        let channel_count = pipeline.layout().channels().len();
        Self {
            reader,
            channel_count,
            pipeline,
            store,
            state,
            poll_interval,
            mode,
            t0: None,
        }
    }

    fn set_state(&self, next: TailerState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = ?*current, to = ?next, "Tailer state");
            *current = next;
            true
        });
    }

    /// Run until shutdown, end of file in one-shot mode, or a fatal error.
    ///
    /// Returns the number of rows ingested.
    #[instrument(skip_all, name = "tailer")]
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        mut pause: watch::Receiver<bool>,
    ) -> AppResult<usize> {
        self.set_state(TailerState::Streaming);

        loop {
            if *shutdown.borrow() {
                break;
            }

            if *pause.borrow() {
                if *self.state.borrow() != TailerState::Paused {
                    self.set_state(TailerState::Paused);
                    info!(rows = self.store.row_count(), "Ingest paused");
                }
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    changed = pause.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                continue;
            }
            if *self.state.borrow() == TailerState::Paused {
                info!("Ingest resumed");
                self.set_state(TailerState::Streaming);
            }

            let next = match self.reader.next_line().await {
                Ok(Some(line)) => Some(line),
                Ok(None) if self.mode == FollowMode::UntilEof => match self.reader.take_pending() {
                    Some(line) => Some(line),
                    None => break,
                },
                Ok(None) => None,
                Err(e) => return Err(self.fail(e)),
            };

            match next {
                Some(line) => {
                    if let Err(e) = self.ingest_line(&line) {
                        return Err(self.fail(e));
                    }
                }
                None => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }

        let rows = self.store.row_count();
        self.set_state(TailerState::Closed);
        info!(rows, "Ingest closed");
        Ok(rows)
    }

    fn fail(&self, err: MimsError) -> MimsError {
        error!(error = %err, rows = self.store.row_count(), "Ingest aborted");
        self.set_state(TailerState::Error);
        err
    }

    fn ingest_line(&mut self, line: &str) -> AppResult<()> {
        let line_no = self.reader.line_no();
        let row = decode::parse_row(line, line_no, self.channel_count)?;
        let t0 = *self.t0.get_or_insert(row.timestamp);

        let derived = self.pipeline.push(row.to_sample(t0));
        self.store.append(derived);

        let rows = self.store.row_count();
        if rows == 1 {
            info!(t0 = %t0, "First data row published");
        } else if rows == 2 {
            info!("Data file opened");
        } else {
            debug!(rows, line = line_no, "Row ingested");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn holds_unterminated_fragment_for_one_poll() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, ";Time;\"2\"\n;2024/01/01 00:00:00.0;1").unwrap();
        file.flush().unwrap();

        let mut reader = LineReader::open(file.path()).await.unwrap();
        reader.read_header(FollowMode::Follow).await.unwrap();

        // First poll: fragment seen, held back.
        assert_eq!(reader.next_line().await.unwrap(), None);
        // Unchanged across a poll: released.
        let line = reader.next_line().await.unwrap().unwrap();
        assert!(line.ends_with(";1"));
        assert_eq!(reader.line_no(), 2);
        assert_eq!(reader.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn completes_a_line_written_in_two_parts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, ";Time;\"2\"\n;2024/01/01 00:00:00.0;").unwrap();
        file.flush().unwrap();

        let mut reader = LineReader::open(file.path()).await.unwrap();
        reader.read_header(FollowMode::Follow).await.unwrap();
        assert_eq!(reader.next_line().await.unwrap(), None);

        writeln!(file, "2,5").unwrap();
        file.flush().unwrap();
        let line = reader.next_line().await.unwrap().unwrap();
        assert_eq!(line.trim_end(), ";2024/01/01 00:00:00.0;2,5");
    }

    #[tokio::test]
    async fn header_written_in_two_parts_is_waited_on() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, ";Time;\"2\";\"3").unwrap();
        file.flush().unwrap();

        let mut reader = LineReader::open(file.path()).await.unwrap();
        assert!(matches!(
            reader.read_header(FollowMode::Follow).await,
            Err(MimsError::EmptyDataFile)
        ));

        writeln!(file, "2\";\"44\";").unwrap();
        file.flush().unwrap();
        let header = reader.read_header(FollowMode::Follow).await.unwrap();
        assert_eq!(header.channels, ["2", "32", "44"]);
        assert_eq!(reader.line_no(), 1);
    }

    #[tokio::test]
    async fn one_shot_accepts_unterminated_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, ";Time;\"2\";\"32\"").unwrap();
        file.flush().unwrap();

        let mut reader = LineReader::open(file.path()).await.unwrap();
        let header = reader.read_header(FollowMode::UntilEof).await.unwrap();
        assert_eq!(header.channels, ["2", "32"]);
    }

    #[tokio::test]
    async fn empty_file_has_no_header() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut reader = LineReader::open(file.path()).await.unwrap();
        assert!(matches!(
            reader.read_header(FollowMode::Follow).await,
            Err(MimsError::EmptyDataFile)
        ));
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, ";Time;\"2\"\n\n;2024/01/01 00:00:00.0;1\n").unwrap();
        file.flush().unwrap();

        let mut reader = LineReader::open(file.path()).await.unwrap();
        reader.read_header(FollowMode::Follow).await.unwrap();
        let line = reader.next_line().await.unwrap().unwrap();
        assert!(line.contains("2024/01/01"));
        assert_eq!(reader.line_no(), 3);
    }
}
