use crate::error::Result;
use crate::executor::JobIo;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum StreamKind {
    #[serde(rename = "stdOut")]
    StdOut,
    #[serde(rename = "stdErr")]
    StdErr,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StreamChunk {
    #[serde(rename = "type")]
    pub kind: StreamKind,
    pub content: String,
    pub offset: u64,
    pub count: u64,
}

/// Creates per-run log files under one directory.
#[derive(Clone)]
pub struct StreamCapture {
    dir: PathBuf,
}

impl StreamCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Creates `<run_id>-out.txt` and `<run_id>-err.txt`. In quiet mode the
    /// files still exist but the job's own output is discarded.
    pub fn create(&self, run_id: &str, quiet: bool) -> Result<RunStreams> {
        std::fs::create_dir_all(&self.dir)?;
        let streams = RunStreams {
            out_path: self.dir.join(format!("{}-out.txt", run_id)),
            err_path: self.dir.join(format!("{}-err.txt", run_id)),
            quiet,
        };
        File::create(&streams.out_path)?;
        File::create(&streams.err_path)?;
        Ok(streams)
    }
}

/// The two log files owned by a single run.
#[derive(Debug)]
pub struct RunStreams {
    out_path: PathBuf,
    err_path: PathBuf,
    quiet: bool,
}

impl RunStreams {
    pub fn out_path(&self) -> &Path {
        &self.out_path
    }

    pub fn err_path(&self) -> &Path {
        &self.err_path
    }

    /// Append-mode handles for the job process.
    pub fn job_io(&self) -> Result<JobIo> {
        if self.quiet {
            return Ok(JobIo::default());
        }
        Ok(JobIo {
            stdout: Some(open_append(&self.out_path)?),
            stderr: Some(open_append(&self.err_path)?),
        })
    }

    /// Records a failure message in the error stream, even in quiet mode.
    pub fn append_error(&self, message: &str) -> Result<()> {
        let mut file = open_append(&self.err_path)?;
        writeln!(file, "{}", message)?;
        Ok(())
    }

    /// Reads both streams from `offset`, at most `limit` bytes each.
    pub fn read(&self, offset: u64, limit: Option<u64>) -> Result<Vec<StreamChunk>> {
        Ok(vec![
            read_chunk(StreamKind::StdOut, &self.out_path, offset, limit)?,
            read_chunk(StreamKind::StdErr, &self.err_path, offset, limit)?,
        ])
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn read_chunk(kind: StreamKind, path: &Path, offset: u64, limit: Option<u64>) -> Result<StreamChunk> {
    let mut buf = Vec::new();
    match File::open(path) {
        Ok(mut file) => {
            file.seek(SeekFrom::Start(offset))?;
            match limit {
                Some(limit) => file.take(limit).read_to_end(&mut buf)?,
                None => file.read_to_end(&mut buf)?,
            };
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    Ok(StreamChunk {
        kind,
        count: buf.len() as u64,
        content: String::from_utf8_lossy(&buf).into_owned(),
        offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_out(streams: &RunStreams, text: &str) {
        let mut io = streams.job_io().unwrap();
        io.stdout.as_mut().unwrap().write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn concurrent_runs_do_not_share_files() {
        let temp = TempDir::new().unwrap();
        let capture = StreamCapture::new(temp.path());
        let a = capture.create("1-1___act", false).unwrap();
        let b = capture.create("1-2___act", false).unwrap();

        write_out(&a, "from a");
        write_out(&b, "from b");
        b.append_error("b failed").unwrap();

        let a_chunks = a.read(0, None).unwrap();
        assert_eq!(a_chunks[0].content, "from a");
        assert_eq!(a_chunks[1].content, "");

        let b_chunks = b.read(0, None).unwrap();
        assert_eq!(b_chunks[0].content, "from b");
        assert_eq!(b_chunks[1].content, "b failed\n");
        assert_eq!(b_chunks[1].kind, StreamKind::StdErr);
    }

    #[test]
    fn offset_and_limit_select_a_window() {
        let temp = TempDir::new().unwrap();
        let streams = StreamCapture::new(temp.path()).create("r", false).unwrap();
        write_out(&streams, "0123456789");

        let chunk = &streams.read(3, Some(4)).unwrap()[0];
        assert_eq!(chunk.content, "3456");
        assert_eq!(chunk.offset, 3);
        assert_eq!(chunk.count, 4);

        let past_end = &streams.read(50, None).unwrap()[0];
        assert_eq!(past_end.count, 0);
    }

    #[test]
    fn quiet_mode_discards_job_output_but_keeps_errors() {
        let temp = TempDir::new().unwrap();
        let streams = StreamCapture::new(temp.path()).create("q", true).unwrap();
        let io = streams.job_io().unwrap();
        assert!(io.stdout.is_none() && io.stderr.is_none());

        streams.append_error("boom").unwrap();
        assert_eq!(streams.read(0, None).unwrap()[1].content, "boom\n");
        assert!(streams.out_path().exists());
    }

    #[test]
    fn chunk_serializes_with_stream_type() {
        let chunk = StreamChunk {
            kind: StreamKind::StdOut,
            content: "hi".to_string(),
            offset: 0,
            count: 2,
        };
        assert_eq!(
            serde_json::to_value(&chunk).unwrap(),
            serde_json::json!({"type": "stdOut", "content": "hi", "offset": 0, "count": 2})
        );
    }
}
