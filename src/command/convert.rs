//! The `convert` command: one document in, one PDF out.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Command, Connection, Reply};
use crate::converter::{ConversionOutcome, ConverterInvoker, ExportFilter};
use crate::error::JobError;
use crate::job::ConversionJob;
use crate::locator::LocateBinary;
use crate::telemetry;
use crate::workspace::{validate_filename, Workspace, WorkspaceManager};

/// Name the handler is registered under.
pub const COMMAND_NAME: &str = "convert";

/// Payload of a convert request. Content is base64 on the wire.
#[derive(Debug, Default, Deserialize)]
pub struct ConvertRequest {
    pub filename: Option<String>,
    pub content: Option<String>,
}

/// Runs conversion jobs: locate binary, allocate workspace, write input,
/// invoke converter, read output, clean up.
pub struct ConvertCommand {
    locator: Arc<dyn LocateBinary>,
    workspaces: WorkspaceManager,
    invoker: ConverterInvoker,
}

impl ConvertCommand {
    pub fn new(
        locator: Arc<dyn LocateBinary>,
        workspaces: WorkspaceManager,
        invoker: ConverterInvoker,
    ) -> Self {
        Self {
            locator,
            workspaces,
            invoker,
        }
    }

    /// Converts `content` named `filename` for a connection.
    ///
    /// The job's workspace, if one was allocated, no longer exists when this
    /// returns.
    pub async fn execute(
        &self,
        connection_id: &str,
        filename: String,
        content: &[u8],
    ) -> Result<Vec<u8>, JobError> {
        let mut job = ConversionJob::new(connection_id, filename);
        info!(
            job_id = %job.job_id,
            connection_id = %job.connection_id,
            filename = %job.filename,
            bytes = content.len(),
            "Processing convert job"
        );

        let result = self.run(&mut job, content).await;
        if let Err(e) = &result {
            job.record_error(e.to_string());
        }
        job.mark_cleaned_up();

        telemetry::record_job_telemetry(&job);
        result
    }

    async fn run(&self, job: &mut ConversionJob, content: &[u8]) -> Result<Vec<u8>, JobError> {
        validate_filename(&job.filename)?;
        let filter = ExportFilter::for_filename(&job.filename)?;

        // The cached path may have been uninstalled since discovery
        let Some(binary) = self.locator.locate().filter(|path| path.exists()) else {
            let err = JobError::BinaryNotFound;
            job.binary_missing(err.to_string());
            return Err(err);
        };
        job.binary_located();

        let workspace = self
            .workspaces
            .allocate(&job.connection_id, &job.job_id)
            .await?;

        let result = self
            .convert_in(job, &workspace, &binary, filter, content)
            .await;

        let released = workspace.release().await;
        if let Err(e) = &released {
            warn!(job_id = %job.job_id, error = %e, "Failed to release workspace");
        }

        let bytes = result?;
        released?;
        Ok(bytes)
    }

    async fn convert_in(
        &self,
        job: &mut ConversionJob,
        workspace: &Workspace,
        binary: &Path,
        filter: ExportFilter,
        content: &[u8],
    ) -> Result<Vec<u8>, JobError> {
        workspace.write_input(&job.filename, content).await?;
        job.input_written();

        job.start_converting();
        match self
            .invoker
            .convert(
                binary,
                workspace.path(),
                workspace.profile_dir(),
                &job.filename,
                filter,
            )
            .await
        {
            ConversionOutcome::Success(bytes) => {
                job.mark_succeeded();
                Ok(bytes)
            }
            ConversionOutcome::Failure(err) => {
                job.mark_failed(err.to_string());
                Err(err)
            }
        }
    }
}

#[async_trait]
impl Command for ConvertCommand {
    async fn consume(&self, connection: &Connection, data: Value) -> Reply {
        let request = if data.is_null() {
            ConvertRequest::default()
        } else {
            match serde_json::from_value::<ConvertRequest>(data) {
                Ok(request) => request,
                Err(e) => return Reply::Error(JobError::InvalidRequest(e.to_string())),
            }
        };

        let filename = request.filename.filter(|f| !f.is_empty());
        let content = request.content.filter(|c| !c.is_empty());
        let (Some(filename), Some(content)) = (filename, content) else {
            return Reply::Empty;
        };

        let content = match BASE64.decode(content.as_bytes()) {
            Ok(content) => content,
            Err(e) => return Reply::Error(JobError::InvalidContent(e.to_string())),
        };

        match self
            .execute(&connection.id.to_string(), filename, &content)
            .await
        {
            Ok(bytes) => Reply::Result(bytes),
            Err(err) => Reply::Error(err),
        }
    }
}
