//! The two append-only outputs: a JSON array of payloads and a line-per-offset skip log.
//!
//! Every record is flushed as soon as it is written. A run that is killed without draining
//! leaves the results array without its closing bracket, but with every element intact.

use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{info_time, Payload, Result};

/// Companion path for skipped offsets: `out/posts.json` -> `out/posts_skipped.json`.
pub fn skipped_path(results: &Path) -> PathBuf {
    let stem = results
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    results.with_file_name(format!("{stem}_skipped.json"))
}

/// Creates `path` and streams every received payload into it as one JSON array.
pub async fn results_to_file(rx: mpsc::Receiver<Payload>, path: PathBuf) -> Result<u64> {
    let start_time = Local::now();
    let file = File::create(&path).await?;
    let written = write_results(rx, BufWriter::new(file)).await?;
    info_time!(start_time, "Wrote {written} results to {}", path.display());
    Ok(written)
}

/// Creates `path` and appends one decimal offset per line for every received failure.
pub async fn skipped_to_file(rx: mpsc::Receiver<i64>, path: PathBuf) -> Result<u64> {
    let start_time = Local::now();
    let file = File::create(&path).await?;
    let written = write_skipped(rx, BufWriter::new(file)).await?;
    info_time!(start_time, "Wrote {written} skipped offsets to {}", path.display());
    Ok(written)
}

/// Writes `[`, each payload verbatim with commas between, and `]` once `rx` closes.
pub async fn write_results<W>(mut rx: mpsc::Receiver<Payload>, mut out: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(b"[").await?;
    out.flush().await?;

    let mut written = 0u64;
    while let Some(payload) = rx.recv().await {
        if written > 0 {
            out.write_all(b",").await?;
        }
        out.write_all(payload.as_bytes()).await?;
        out.flush().await?;
        written += 1;
        debug!(written, "result stored");
    }

    out.write_all(b"]").await?;
    out.flush().await?;
    out.shutdown().await?;
    Ok(written)
}

pub async fn write_skipped<W>(mut rx: mpsc::Receiver<i64>, mut out: W) -> Result<u64>
where
    W: AsyncWrite + Unpin,
{
    let mut written = 0u64;
    while let Some(offset) = rx.recv().await {
        out.write_all(format!("{offset}\n").as_bytes()).await?;
        out.flush().await?;
        written += 1;
    }
    out.shutdown().await?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(body: &str) -> Payload {
        Payload::from_body(body.as_bytes().to_vec())
    }

    #[test]
    fn skipped_path_sits_next_to_results() {
        assert_eq!(
            skipped_path(Path::new("out/posts.json")),
            PathBuf::from("out/posts_skipped.json")
        );
        assert_eq!(
            skipped_path(Path::new("./scraped_posts.json")),
            PathBuf::from("./scraped_posts_skipped.json")
        );
    }

    #[tokio::test]
    async fn empty_stream_writes_empty_array() {
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let mut out = Vec::new();
        assert_eq!(write_results(rx, &mut out).await.unwrap(), 0);
        assert_eq!(out, b"[]");
    }

    #[tokio::test]
    async fn payloads_form_one_json_array() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(payload(r#"{"ok":true}"#)).await.unwrap();
        tx.send(payload("[1,2]")).await.unwrap();
        tx.send(payload("null")).await.unwrap();
        drop(tx);

        let mut out = Vec::new();
        assert_eq!(write_results(rx, &mut out).await.unwrap(), 3);
        assert_eq!(String::from_utf8(out.clone()).unwrap(), r#"[{"ok":true},[1,2],null]"#);
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.len(), 3);
    }

    #[tokio::test]
    async fn skipped_offsets_one_per_line_in_arrival_order() {
        let (tx, rx) = mpsc::channel(4);
        for offset in [300, 0, 300] {
            tx.send(offset).await.unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        assert_eq!(write_skipped(rx, &mut out).await.unwrap(), 3);
        assert_eq!(out, b"300\n0\n300\n");
    }
}
