//! Size-bounded bin packing of source files staged for the model's context.
//!
//! Packing is greedy and strictly in input order so repeated runs over the
//! same input produce the same chunks. Consecutive records sharing a parent
//! directory form a run; a run that does not fit the current chunk starts a
//! fresh one, so a directory stays together whenever it can.
//!
//! A [`ContentChunker`] is single-use and not meant to be shared across
//! concurrent uploads.

use std::future::Future;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::errors::{Error, MrResult};

/// Default chunk budget (5 MiB).
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 5 * 1024 * 1024;

/// One file offered for upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRecord {
    pub path: String,
    pub content: String,
    pub size_bytes: u64,
}

impl ChunkRecord {
    /// Record sized by the UTF-8 length of `content`.
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            path: path.into(),
            size_bytes: content.len() as u64,
            content,
        }
    }

    fn parent_dir(&self) -> &str {
        self.path.rsplit_once('/').map_or("", |(dir, _)| dir)
    }
}

/// Ordered `path -> content` mapping bounded by the chunk budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Chunk {
    files: Vec<(String, String)>,
    size_bytes: u64,
}

impl Chunk {
    pub fn files(&self) -> &[(String, String)] {
        &self.files
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|(p, _)| p.as_str())
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn push(&mut self, record: ChunkRecord) {
        self.size_bytes += record.size_bytes;
        self.files.push((record.path, record.content));
    }
}

#[derive(Debug)]
pub struct ContentChunker {
    max_chunk_size_bytes: u64,
    current: Chunk,
    sealed: Vec<Chunk>,
    oversized: usize,
}

impl ContentChunker {
    /// # Errors
    /// [`Error::Validation`] for a zero budget.
    pub fn new(max_chunk_size_bytes: u64) -> MrResult<Self> {
        if max_chunk_size_bytes == 0 {
            return Err(Error::Validation("chunk budget must be positive".into()));
        }
        Ok(Self {
            max_chunk_size_bytes,
            current: Chunk::default(),
            sealed: Vec::new(),
            oversized: 0,
        })
    }

    /// Packs `records` in order.
    pub fn add_files(&mut self, records: impl IntoIterator<Item = ChunkRecord>) {
        let mut run: Vec<ChunkRecord> = Vec::new();
        for record in records {
            if run.last().is_some_and(|r| r.parent_dir() != record.parent_dir()) {
                self.add_run(std::mem::take(&mut run));
            }
            run.push(record);
        }
        if !run.is_empty() {
            self.add_run(run);
        }
    }

    fn add_run(&mut self, run: Vec<ChunkRecord>) {
        let run_size: u64 = run.iter().map(|r| r.size_bytes).sum();
        if self.current.size_bytes + run_size > self.max_chunk_size_bytes {
            self.seal_current();
        }

        for record in run {
            if record.size_bytes > self.max_chunk_size_bytes {
                warn!(
                    path = %record.path,
                    size_bytes = record.size_bytes,
                    max_chunk_size_bytes = self.max_chunk_size_bytes,
                    "file exceeds chunk budget, uploading it alone"
                );
                self.seal_current();
                let mut alone = Chunk::default();
                alone.push(record);
                self.sealed.push(alone);
                self.oversized += 1;
                continue;
            }
            if self.current.size_bytes + record.size_bytes > self.max_chunk_size_bytes {
                self.seal_current();
            }
            self.current.push(record);
        }
    }

    fn seal_current(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let chunk = std::mem::take(&mut self.current);
        debug!(
            index = self.sealed.len(),
            files = chunk.len(),
            size_bytes = chunk.size_bytes,
            "chunk sealed"
        );
        self.sealed.push(chunk);
    }

    /// Flushes the in-progress chunk and returns all chunks. Idempotent.
    pub fn seal(&mut self) -> &[Chunk] {
        self.seal_current();
        &self.sealed
    }

    /// Number of records that exceeded the budget.
    pub fn oversized(&self) -> usize {
        self.oversized
    }

    /// Seals and takes ownership of the chunks.
    pub fn into_chunks(mut self) -> Vec<Chunk> {
        self.seal_current();
        self.sealed
    }
}

/// Destination of packed chunks (e.g. a model-side file store).
pub trait ChunkSink {
    /// Receives every chunk of one upload, in order.
    fn upload(&self, chunks: &[Chunk]) -> impl Future<Output = MrResult<()>> + Send;
}

/// Packs `records` and hands the chunks to `sink`; returns the chunk count.
pub async fn upload_in_chunks<S>(
    sink: &S,
    records: Vec<ChunkRecord>,
    max_chunk_size_bytes: u64,
) -> MrResult<usize>
where
    S: ChunkSink + Sync,
{
    let files = records.len();
    let mut chunker = ContentChunker::new(max_chunk_size_bytes)?;
    chunker.add_files(records);
    let oversized = chunker.oversized();
    let chunks = chunker.into_chunks();
    if chunks.is_empty() {
        debug!("nothing to upload");
        return Ok(0);
    }

    sink.upload(&chunks).await?;
    info!(files, chunks = chunks.len(), oversized, "chunks uploaded");
    Ok(chunks.len())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    const KB: u64 = 1024;
    const MB: u64 = 1024 * 1024;

    fn sized(path: &str, size: u64) -> ChunkRecord {
        ChunkRecord {
            path: path.to_string(),
            content: String::new(),
            size_bytes: size,
        }
    }

    #[test]
    fn oversized_file_gets_its_own_chunk() {
        let mut c = ContentChunker::new(MB).unwrap();
        c.add_files(vec![sized("big.bin", 2 * MB), sized("small.txt", 10 * KB)]);
        let chunks = c.seal();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].paths().collect::<Vec<_>>(), vec!["big.bin"]);
        assert_eq!(chunks[1].paths().collect::<Vec<_>>(), vec!["small.txt"]);
        assert_eq!(c.oversized(), 1);
    }

    #[test]
    fn seal_is_idempotent() {
        let mut c = ContentChunker::new(100).unwrap();
        c.add_files(vec![sized("a/1", 60), sized("a/2", 60)]);
        let once = c.seal().to_vec();
        let twice = c.seal().to_vec();
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);

        let mut empty = ContentChunker::new(100).unwrap();
        assert!(empty.seal().is_empty());
        assert!(empty.seal().is_empty());
    }

    #[test]
    fn directory_runs_stay_together_when_they_fit() {
        let mut c = ContentChunker::new(100).unwrap();
        c.add_files(vec![
            sized("src/main.rs", 50),
            sized("lib/a.rs", 30),
            sized("lib/b.rs", 30),
        ]);
        let chunks = c.seal();
        let paths: Vec<Vec<&str>> = chunks.iter().map(|c| c.paths().collect()).collect();
        assert_eq!(paths, vec![vec!["src/main.rs"], vec!["lib/a.rs", "lib/b.rs"]]);
    }

    #[test]
    fn records_are_conserved_and_budget_holds() {
        // deterministic pseudo-random sizes and directories
        let mut state = 0x2545_f491_u64;
        let mut records = Vec::new();
        for i in 0..300 {
            state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
            let size = (state >> 33) % 1_500;
            let dir = (state >> 20) % 7;
            records.push(sized(&format!("d{dir}/f{i}"), size));
        }

        let budget = 1_000;
        let mut c = ContentChunker::new(budget).unwrap();
        c.add_files(records.clone());
        let chunks = c.seal();

        let mut seen = HashSet::new();
        let mut total = 0usize;
        for chunk in chunks {
            assert!(!chunk.is_empty());
            assert!(chunk.size_bytes() <= budget || chunk.len() == 1);
            for p in chunk.paths() {
                assert!(seen.insert(p.to_string()), "duplicate {p}");
                total += 1;
            }
        }
        assert_eq!(total, records.len());
        let concatenated: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.paths().map(str::to_string))
            .collect();
        let input: Vec<String> = records.iter().map(|r| r.path.clone()).collect();
        assert_eq!(concatenated, input);
    }

    #[test]
    fn zero_budget_is_rejected() {
        assert!(matches!(ContentChunker::new(0), Err(Error::Validation(_))));
    }

    #[derive(Default)]
    struct RecordingSink {
        uploads: Mutex<Vec<Vec<Chunk>>>,
    }

    impl ChunkSink for RecordingSink {
        async fn upload(&self, chunks: &[Chunk]) -> MrResult<()> {
            self.uploads
                .lock()
                .map_err(|_| Error::Host("poisoned".into()))?
                .push(chunks.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn upload_hands_over_ordered_chunks() {
        let sink = RecordingSink::default();
        let n = upload_in_chunks(
            &sink,
            vec![ChunkRecord::new("a/x.py", "print(1)\n"), ChunkRecord::new("a/y.py", "")],
            DEFAULT_MAX_CHUNK_BYTES,
        )
        .await
        .unwrap();

        assert_eq!(n, 1);
        {
            let uploads = sink.uploads.lock().unwrap();
            assert_eq!(uploads.len(), 1);
            assert_eq!(uploads[0][0].files()[0], ("a/x.py".to_string(), "print(1)\n".to_string()));
        }

        assert_eq!(upload_in_chunks(&sink, vec![], 10).await.unwrap(), 0);
    }
}
