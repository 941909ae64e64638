//! Office document to PDF conversion through headless LibreOffice.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::JobError;

/// Maximum number of stderr characters carried into a failure message.
const MAX_STDERR_CHARS: usize = 2000;

/// How long stderr may stay open after the converter exits.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// LibreOffice export filter selecting the PDF transform for a document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFilter {
    Writer,
    Impress,
    Calc,
}

impl ExportFilter {
    /// Maps a file extension (case-insensitive) to its export filter.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "doc" | "docx" => Some(ExportFilter::Writer),
            "ppt" | "pptx" => Some(ExportFilter::Impress),
            "xls" | "xlsx" => Some(ExportFilter::Calc),
            _ => None,
        }
    }

    /// Resolves the filter for a filename, rejecting unknown extensions.
    pub fn for_filename(filename: &str) -> Result<Self, JobError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        Self::from_extension(extension)
            .ok_or_else(|| JobError::UnsupportedFormat(extension.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFilter::Writer => "writer_pdf_Export",
            ExportFilter::Impress => "impress_pdf_Export",
            ExportFilter::Calc => "calc_pdf_Export",
        }
    }
}

impl fmt::Display for ExportFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one conversion attempt.
#[derive(Debug)]
pub enum ConversionOutcome {
    Success(Vec<u8>),
    Failure(JobError),
}

impl ConversionOutcome {
    pub fn into_result(self) -> Result<Vec<u8>, JobError> {
        match self {
            ConversionOutcome::Success(bytes) => Ok(bytes),
            ConversionOutcome::Failure(err) => Err(err),
        }
    }
}

/// Output filename for an input: the extension replaced with `pdf`.
pub fn output_filename(filename: &str) -> PathBuf {
    Path::new(filename).with_extension("pdf")
}

/// `-env:UserInstallation` argument pointing LibreOffice at a private profile.
///
/// Every instance sharing a profile funnels into one running office process,
/// so each job gets its own.
pub fn user_installation_arg(profile: &Path) -> io::Result<String> {
    let absolute = std::path::absolute(profile)?;
    let path = absolute
        .to_string_lossy()
        .replace('\\', "/")
        .replace('%', "%25")
        .replace(' ', "%20");
    let path = if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    };
    Ok(format!("-env:UserInstallation=file://{path}"))
}

/// Runs the LibreOffice binary against a file in a workspace.
#[derive(Debug, Clone)]
pub struct ConverterInvoker {
    timeout: Duration,
}

impl ConverterInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Converts `<workdir>/<filename>` to `<workdir>/<stem>.pdf`, with the
    /// converter's user profile kept in `profile`.
    ///
    /// The existence of the expected output file once the converter exits is
    /// the success signal; exit status only shapes the failure message.
    /// Spawn errors and timeouts are returned as failures, never raised.
    pub async fn convert(
        &self,
        binary: &Path,
        workdir: &Path,
        profile: &Path,
        filename: &str,
        filter: ExportFilter,
    ) -> ConversionOutcome {
        let input = workdir.join(filename);
        let output = workdir.join(output_filename(filename));

        let user_installation = match user_installation_arg(profile) {
            Ok(arg) => arg,
            Err(e) => return ConversionOutcome::Failure(JobError::Workspace(e)),
        };

        let mut cmd = Command::new(binary);
        cmd.arg(user_installation)
            .arg("--headless")
            .arg("--convert-to")
            .arg(format!("pdf:{filter}"))
            .arg("--outdir")
            .arg(workdir)
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // soffice hands the work to a forked soffice.bin; a fresh group lets
        // the whole tree be killed at once
        #[cfg(unix)]
        cmd.process_group(0);

        debug!(command = ?cmd.as_std(), "Running converter");
        let start = Instant::now();

        let process_error = match cmd.spawn() {
            Ok(child) => match self.wait(child, &input).await {
                Ok(process_error) => process_error,
                Err(timeout) => return ConversionOutcome::Failure(timeout),
            },
            Err(e) => Some(format!("failed to run {}: {e}", binary.display())),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match tokio::fs::try_exists(&output).await {
            Ok(true) => match tokio::fs::read(&output).await {
                Ok(bytes) => {
                    if let Some(err) = &process_error {
                        warn!(error = %err, "Converter reported an error but produced output");
                    }
                    info!(
                        output = %output.display(),
                        bytes = bytes.len(),
                        duration_ms,
                        "Conversion complete"
                    );
                    ConversionOutcome::Success(bytes)
                }
                Err(e) => ConversionOutcome::Failure(JobError::Workspace(e)),
            },
            Ok(false) => {
                let err = match process_error {
                    Some(reason) => JobError::ProcessExecution(reason),
                    None => JobError::OutputMissing(output_filename(filename).display().to_string()),
                };
                warn!(input = %input.display(), error = %err, duration_ms, "Conversion failed");
                ConversionOutcome::Failure(err)
            }
            Err(e) => ConversionOutcome::Failure(JobError::Workspace(e)),
        }
    }

    /// Waits for the direct child to exit within the deadline and returns
    /// its failure reason, if any.
    ///
    /// Waiting on exit rather than on the output pipes keeps a detached
    /// grandchild from holding the job open. Whatever is left of the
    /// process group afterwards is killed.
    async fn wait(&self, mut child: Child, input: &Path) -> Result<Option<String>, JobError> {
        let mut group = ProcessGroup::of(&child);
        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf).await;
                buf
            })
        });

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                group.kill();
                let _ = child.kill().await;
                if let Some(task) = stderr {
                    task.abort();
                }
                warn!(
                    input = %input.display(),
                    timeout = ?self.timeout,
                    "Converter timed out and was killed"
                );
                return Err(JobError::Timeout(self.timeout));
            }
        };
        group.kill();
        let stderr = collect_stderr(stderr).await;

        Ok(match status {
            Ok(status) if status.success() => None,
            Ok(status) => {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                Some(format!("exit code {code}: {stderr}"))
            }
            Err(e) => Some(format!("failed to wait for converter: {e}")),
        })
    }
}

async fn collect_stderr(task: Option<JoinHandle<Vec<u8>>>) -> String {
    let Some(mut task) = task else {
        return String::new();
    };
    match tokio::time::timeout(STDERR_GRACE, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes)
            .trim()
            .chars()
            .take(MAX_STDERR_CHARS)
            .collect(),
        Ok(Err(_)) => String::new(),
        Err(_) => {
            task.abort();
            String::new()
        }
    }
}

/// The converter's process group, killed on [`ProcessGroup::kill`] or drop.
///
/// Dropping covers the job task being aborted when its client disconnects.
struct ProcessGroup {
    pgid: Option<u32>,
}

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self { pgid: child.id() }
    }

    fn kill(&mut self) {
        let Some(pgid) = self.pgid.take() else {
            return;
        };
        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            match killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
                Ok(()) => debug!(pgid, "Converter process group killed"),
                Err(Errno::ESRCH) => {}
                Err(e) => warn!(pgid, error = %e, "Failed to kill converter process group"),
            }
        }
        #[cfg(not(unix))]
        let _ = pgid;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}
