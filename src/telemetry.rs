//! Telemetry and structured logging for conversion jobs.

use crate::job::ConversionJob;
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{global, KeyValue};
use tracing::{info, warn};

/// Conversions slower than this are logged as warnings.
const SLOW_JOB_THRESHOLD_MS: i64 = 30_000;

const TRACER_NAME: &str = "pdf-convert";

/// Records telemetry for a finished job.
///
/// Emits a `pdf_convert_job` span and a structured log line carrying the job
/// and connection ids, the input extension, outcome, duration and error.
pub fn record_job_telemetry(job: &ConversionJob) {
    let tracer = global::tracer(TRACER_NAME);
    let mut span = tracer.start("pdf_convert_job");

    span.set_attribute(KeyValue::new("job_id", job.job_id.clone()));
    span.set_attribute(KeyValue::new("connection_id", job.connection_id.clone()));
    span.set_attribute(KeyValue::new("extension", job.extension()));
    span.set_attribute(KeyValue::new("status", job.status.to_string()));
    span.set_attribute(KeyValue::new("succeeded", job.succeeded));

    let duration_ms = job.processing_duration_ms().unwrap_or_default();
    span.set_attribute(KeyValue::new("duration_ms", duration_ms));

    match &job.error {
        None => {
            info!(
                job_id = %job.job_id,
                connection_id = %job.connection_id,
                filename = %job.filename,
                duration_ms,
                "Convert job completed"
            );
        }
        Some(error) => {
            span.set_attribute(KeyValue::new("error", error.clone()));
            warn!(
                job_id = %job.job_id,
                connection_id = %job.connection_id,
                filename = %job.filename,
                duration_ms,
                error = %error,
                "Convert job failed"
            );
        }
    }

    if duration_ms > SLOW_JOB_THRESHOLD_MS {
        warn!(
            job_id = %job.job_id,
            duration_ms,
            "Conversion exceeded performance threshold ({SLOW_JOB_THRESHOLD_MS}ms)"
        );
    }

    span.end();
}

/// Initializes OpenTelemetry with an OTLP exporter.
///
/// Reads configuration from environment variables:
/// - `OTEL_EXPORTER_OTLP_ENDPOINT` - Collector endpoint (default: http://localhost:4317)
/// - `OTEL_SERVICE_NAME` - Service name (default: pdf-convert)
///
/// Must run inside the tokio runtime.
pub fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::Config;

    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| TRACER_NAME.to_string());

    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&endpoint),
        )
        .with_trace_config(Config::default().with_resource(
            opentelemetry_sdk::Resource::new(vec![
                KeyValue::new("service.name", service_name),
                KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
            ]),
        ))
        .install_batch(opentelemetry_sdk::runtime::Tokio)?;

    if let Some(provider) = tracer.provider() {
        global::set_tracer_provider(provider);
    }

    info!("Telemetry initialized: endpoint={}", endpoint);
    Ok(())
}

/// Flushes pending spans on shutdown.
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

#[cfg(test)]
mod tests {
    use super::*;

    // The global tracer is a no-op until `init_telemetry` runs, so these only
    // exercise the recording paths.

    #[test]
    fn test_record_completed_job() {
        let mut job = ConversionJob::new("conn-1", "report.docx");
        job.binary_located();
        job.input_written();
        job.start_converting();
        job.mark_succeeded();
        job.mark_cleaned_up();

        record_job_telemetry(&job);
    }

    #[test]
    fn test_record_failed_job() {
        let mut job = ConversionJob::new("conn-2", "deck.pptx");
        job.binary_missing("not installed".to_string());
        job.mark_cleaned_up();

        record_job_telemetry(&job);
    }
}
