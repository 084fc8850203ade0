use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use recall_core::{Error, Result};
use recall_experiment::LogSink;

/// `session_<n>/session.log` under the subject directory, one
/// `<ms>\t<message>` line per entry. Reruns of a session append.
pub struct FileLog {
    subject_dir: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl FileLog {
    pub fn new(subject_dir: impl AsRef<Path>) -> Self {
        Self {
            subject_dir: subject_dir.as_ref().to_path_buf(),
            writer: None,
        }
    }
}

impl LogSink for FileLog {
    fn begin_session(&mut self, session: usize) -> Result<()> {
        let dir = self.subject_dir.join(format!("session_{session}"));
        fs::create_dir_all(&dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("session.log"))?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn log_message(&mut self, message: &str, timestamp_ns: u64) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::config("session log written before the session began"))?;
        writeln!(writer, "{}\t{message}", timestamp_ns / 1_000_000)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_land_in_the_session_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileLog::new(dir.path());
        assert!(log.log_message("early", 0).is_err());

        log.begin_session(2).unwrap();
        log.log_message("SESS_START", 1_500_000_000).unwrap();
        let mut again = FileLog::new(dir.path());
        again.begin_session(2).unwrap();
        again.log_message("SESS_END", 3_000_000_000).unwrap();

        let text = fs::read_to_string(dir.path().join("session_2/session.log")).unwrap();
        assert_eq!(text, "1500\tSESS_START\n3000\tSESS_END\n");
    }
}
