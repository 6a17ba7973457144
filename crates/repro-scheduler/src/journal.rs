//! Human-facing job lifecycle journal
//!
//! Plain text lines such as `Job 1 <id> queued`. Not a machine contract; use
//! the result document for that. Write failures are logged and swallowed.

use repro_core::{fail_open::fail_open_sync, JobResult, Output};
use repro_executor::JobId;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

/// Shared journal writer
#[derive(Clone)]
pub struct Journal {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Journal {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    pub fn queued(&self, n: usize, id: JobId) {
        self.line(format!("Job {} {} queued", n, id));
    }

    pub fn starting(&self, n: usize, id: JobId) {
        self.line(format!("Job {} {} starting", n, id));
    }

    pub fn failed(&self, n: usize, id: JobId, message: &str) {
        self.line(format!("Job {} {} failed with {}", n, id, message));
    }

    pub fn rejected(&self, n: usize, message: &str) {
        self.line(format!("Job {} rejected: {}", n, message));
    }

    pub fn finished(&self, n: usize, id: JobId, result: &JobResult) {
        self.line(format!(
            "Job {} {} finished with code {} and outputs {}",
            n,
            id,
            result.exit_code,
            format_outputs(&result.outputs)
        ));
    }

    /// Pass job output through untouched
    pub fn output(&self, data: &[u8]) {
        self.write(data);
    }

    fn line(&self, mut text: String) {
        text.push('\n');
        self.write(text.as_bytes());
    }

    fn write(&self, data: &[u8]) {
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        fail_open_sync("journal write", || {
            writer.write_all(data)?;
            writer.flush()?;
            Ok(())
        });
    }
}

/// `{location: hash, ...}`, with `-` for outputs that were never committed
pub fn format_outputs(outputs: &BTreeMap<String, Output>) -> String {
    let entries: Vec<String> = outputs
        .iter()
        .map(|(location, output)| {
            let hash = output.hash.as_ref().map(|h| h.as_str()).unwrap_or("-");
            format!("{}: {}", location, hash)
        })
        .collect();
    format!("{{{}}}", entries.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use repro_core::{ContentHash, OutputSpec};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_lifecycle_lines() {
        let buf = SharedBuf::default();
        let journal = Journal::new(buf.clone());
        let id = JobId::new();

        let mut outputs = BTreeMap::new();
        outputs.insert(
            "/out".to_string(),
            Output::committed(OutputSpec::new("dir", "/out"), ContentHash::new("abc")),
        );
        let result = JobResult {
            exit_code: 0,
            error: None,
            outputs,
            started_at: None,
            finished_at: None,
        };

        journal.queued(1, id);
        journal.starting(1, id);
        journal.output(b"hello\n");
        journal.finished(1, id, &result);
        journal.failed(2, id, "no sandbox");
        journal.rejected(3, "queue closed");

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], format!("Job 1 {} queued", id));
        assert_eq!(lines[1], format!("Job 1 {} starting", id));
        assert_eq!(lines[2], "hello");
        assert_eq!(
            lines[3],
            format!("Job 1 {} finished with code 0 and outputs {{/out: abc}}", id)
        );
        assert_eq!(lines[4], format!("Job 2 {} failed with no sandbox", id));
        assert_eq!(lines[5], "Job 3 rejected: queue closed");
    }

    #[test]
    fn test_format_pending_output() {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            "/a".to_string(),
            Output::pending(OutputSpec::new("dir", "/a")),
        );
        assert_eq!(format_outputs(&outputs), "{/a: -}");
        assert_eq!(format_outputs(&BTreeMap::new()), "{}");
    }
}
