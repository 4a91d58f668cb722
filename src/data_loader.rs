//! Discovery and streaming parse of Claude Code transcript files
//!
//! Transcripts live under `~/.claude/projects/<project-dir>/<session>.jsonl`,
//! one JSON object per line. The loader walks every discovered data root,
//! streams each file line by line, and yields [`UsageRecord`]s for assistant
//! messages that carry usage data. Malformed lines and non-usage events are
//! skipped with a warning, never a hard error: one corrupt line must not sink
//! a whole aggregation pass.
//!
//! The search root defaults to `~/.claude` and can be overridden with the
//! `CCTALLY_DATA_PATH` or `CLAUDE_DATA_PATH` environment variables
//! (colon-separated lists of directories).
//!
//! # Examples
//!
//! ```no_run
//! use cctally::data_loader::DataLoader;
//! use futures::StreamExt;
//!
//! # async fn example() -> cctally::Result<()> {
//! let loader = DataLoader::new().await?;
//! let records = loader.load_usage_records();
//! tokio::pin!(records);
//! while let Some(result) = records.next().await {
//!     let record = result?;
//!     println!("{}: {} tokens", record.session_id, record.tokens.total());
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{CctallyError, Result};
use crate::types::{RawTranscriptEntry, UsageRecord};
use futures::stream::Stream;
use futures::StreamExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Environment variables that override transcript discovery
const DATA_PATH_ENV_VARS: &[&str] = &["CCTALLY_DATA_PATH", "CLAUDE_DATA_PATH"];

/// Discovers transcript files and streams parsed usage records
pub struct DataLoader {
    /// Discovered Claude data roots
    data_paths: Vec<PathBuf>,
}

impl DataLoader {
    /// Create a new DataLoader by discovering Claude data directories
    ///
    /// # Errors
    ///
    /// Returns [`CctallyError::NoDataDirectory`] when no data directory
    /// exists, neither the default nor an environment override.
    pub async fn new() -> Result<Self> {
        let paths = Self::discover_data_paths();
        if paths.is_empty() {
            return Err(CctallyError::NoDataDirectory);
        }

        debug!("Discovered {} Claude data directories", paths.len());
        Ok(Self { data_paths: paths })
    }

    /// Create a loader over explicit data roots, bypassing discovery
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        Self { data_paths: paths }
    }

    fn discover_data_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        for var in DATA_PATH_ENV_VARS {
            if let Ok(value) = std::env::var(var) {
                for part in value.split(':').filter(|p| !p.is_empty()) {
                    let path = PathBuf::from(part);
                    if path.exists() {
                        paths.push(path);
                    }
                }
            }
        }

        // Environment overrides replace the default root entirely
        if !paths.is_empty() {
            return paths;
        }

        if let Some(home) = dirs::home_dir() {
            let claude_path = home.join(".claude");
            if claude_path.exists() {
                paths.push(claude_path);
            }
        }

        paths
    }

    /// Find all transcript files under the discovered roots
    ///
    /// Looks inside each root's `projects/` directory when one exists, and
    /// falls back to walking the root itself otherwise.
    pub fn find_transcript_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();

        for base_path in &self.data_paths {
            let projects = base_path.join("projects");
            let walk_root = if projects.is_dir() { projects } else { base_path.clone() };

            for entry in WalkDir::new(&walk_root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                    files.push(path.to_path_buf());
                }
            }
        }

        files.sort();
        debug!("Found {} transcript files", files.len());
        files
    }

    /// Load usage records as an async stream
    ///
    /// Records duplicated across files (transcript rewrites, resumed
    /// sessions) are emitted once, keyed on message ID and request ID.
    pub fn load_usage_records(&self) -> impl Stream<Item = Result<UsageRecord>> + '_ {
        async_stream::stream! {
            let mut seen: HashSet<String> = HashSet::new();

            for file_path in self.find_transcript_files() {
                let project = project_name(&file_path);
                let records = Self::parse_transcript(file_path, project);
                tokio::pin!(records);
                while let Some(result) = records.next().await {
                    match result {
                        Ok((record, dedup_key)) => {
                            if let Some(key) = dedup_key
                                && !seen.insert(key)
                            {
                                continue;
                            }
                            yield Ok(record);
                        }
                        Err(e) => yield Err(e),
                    }
                }
            }
        }
    }

    /// Parse a single transcript file as a stream
    ///
    /// Yields the record together with its dedup key; deduplication spans
    /// files so it happens in the caller.
    fn parse_transcript(
        path: PathBuf,
        project: Option<String>,
    ) -> impl Stream<Item = Result<(UsageRecord, Option<String>)>> {
        async_stream::stream! {
            let file = match tokio::fs::File::open(&path).await {
                Ok(f) => f,
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            };

            let reader = BufReader::new(file);
            let mut lines = reader.lines();
            let mut line_number = 0u64;

            while let Ok(Some(line)) = lines.next_line().await {
                line_number += 1;

                if line.trim().is_empty() {
                    continue;
                }

                match serde_json::from_str::<RawTranscriptEntry>(&line) {
                    Ok(raw) => {
                        let key = UsageRecord::dedup_key(&raw);
                        if let Some(record) = UsageRecord::from_raw(raw, project.as_deref()) {
                            yield Ok((record, key));
                        }
                    }
                    Err(e) => {
                        // Most lines are non-usage events and fail the
                        // RawTranscriptEntry shape; only log at debug.
                        debug!(
                            "Skipping line {} in {}: {}",
                            line_number,
                            path.display(),
                            e
                        );
                    }
                }
            }

            if line_number == 0 {
                warn!("Empty transcript file: {}", path.display());
            }
        }
    }

    /// Get the discovered data roots
    pub fn paths(&self) -> &[PathBuf] {
        &self.data_paths
    }
}

/// Derive the project name from a transcript file's parent directory
fn project_name(path: &Path) -> Option<String> {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        // The projects/ root itself is not a project
        .filter(|n| *n != "projects")
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncWriteExt;

    async fn write_transcript(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        let mut file = tokio::fs::File::create(&path).await.unwrap();
        for line in lines {
            file.write_all(line.as_bytes()).await.unwrap();
            file.write_all(b"\n").await.unwrap();
        }
        path
    }

    const ASSISTANT_LINE: &str = r#"{"sessionId":"s1","timestamp":"2024-01-01T00:00:00Z","type":"assistant","message":{"id":"msg_1","model":"claude-sonnet-4-20250514","usage":{"input_tokens":100,"output_tokens":50}},"requestId":"req_1"}"#;

    #[tokio::test]
    async fn test_parse_transcript_extracts_assistant_messages() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_transcript(
            temp_dir.path(),
            "session.jsonl",
            &[
                ASSISTANT_LINE,
                r#"{"sessionId":"s1","timestamp":"2024-01-01T00:01:00Z","type":"user","message":{"role":"user"}}"#,
                "this is not json",
                r#"{"sessionId":"s1","timestamp":"2024-01-01T00:02:00Z","type":"assistant","message":{"id":"msg_2","model":"claude-sonnet-4-20250514","usage":{"input_tokens":200,"output_tokens":80}},"requestId":"req_2"}"#,
            ],
        )
        .await;

        let stream = DataLoader::parse_transcript(path, Some("my-project".to_string()));
        tokio::pin!(stream);

        let (first, key1) = stream.next().await.unwrap().unwrap();
        assert_eq!(first.tokens.input_tokens, 100);
        assert_eq!(first.project.as_deref(), Some("my-project"));
        assert_eq!(key1.as_deref(), Some("msg_1-req_1"));

        let (second, _) = stream.next().await.unwrap().unwrap();
        assert_eq!(second.tokens.input_tokens, 200);

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_load_deduplicates_across_files() {
        let temp_dir = TempDir::new().unwrap();
        let projects = temp_dir.path().join("projects").join("proj-a");
        tokio::fs::create_dir_all(&projects).await.unwrap();

        // The same assistant message shows up in two transcript files
        write_transcript(&projects, "a.jsonl", &[ASSISTANT_LINE]).await;
        write_transcript(&projects, "b.jsonl", &[ASSISTANT_LINE]).await;

        let loader = DataLoader::with_paths(vec![temp_dir.path().to_path_buf()]);
        let records: Vec<_> = loader.load_usage_records().collect().await;

        assert_eq!(records.len(), 1);
        let record = records[0].as_ref().unwrap();
        assert_eq!(record.project.as_deref(), Some("proj-a"));
    }

    #[tokio::test]
    async fn test_find_transcript_files_walks_nested_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("projects").join("p1").join("deep");
        tokio::fs::create_dir_all(&nested).await.unwrap();
        write_transcript(&nested, "x.jsonl", &[ASSISTANT_LINE]).await;
        write_transcript(temp_dir.path(), "ignored.txt", &["hello"]).await;

        let loader = DataLoader::with_paths(vec![temp_dir.path().to_path_buf()]);
        assert_eq!(loader.paths(), &[temp_dir.path().to_path_buf()]);

        let files = loader.find_transcript_files();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("x.jsonl"));
    }

    #[test]
    fn test_project_name_from_parent_dir() {
        assert_eq!(
            project_name(Path::new("/data/projects/alpha/session.jsonl")).as_deref(),
            Some("alpha")
        );
        assert_eq!(
            project_name(Path::new("/data/projects/session.jsonl")),
            None
        );
    }
}
