//! VictoriaMetrics publisher using the CSV import API.
//!
//! Every reading becomes a handful of single-row CSV imports: one per field
//! of the table and one per model-info descriptor. Each import is POSTed to
//! `<base>/api/v1/import/csv` with the column layout in the `format` query
//! parameter and the device id attached through `extra_label`.
//!
//! Submission happens on a background worker fed through a bounded channel,
//! so a slow or unreachable backend never holds up the reader. Failed
//! imports are logged and dropped.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ws90_adapters::victoriametrics::VictoriaMetricsPublisher;
//! use ws90_metrics::Broadcaster;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (publisher, _worker) = VictoriaMetricsPublisher::builder()
//!         .base_url("http://localhost:8428")
//!         .timeout(Duration::from_secs(10))
//!         .spawn()?;
//!
//!     let mut broadcaster = Broadcaster::new();
//!     broadcaster.subscribe(Arc::new(publisher));
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use reqwest::{Client, Url};
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use ws90_metrics::{PublishError, Subscriber};
use ws90_types::{
    DeviceId, FieldDescriptor, ModelInfoDescriptor, Reading, WS90_FIELDS, WS90_MODEL_INFO,
};

use crate::AdapterError;

/// Path of the CSV import endpoint, relative to the server root.
pub const IMPORT_PATH: &str = "/api/v1/import/csv";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Local-time layouts rtl_433 may print, tried in order.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// One CSV import request: a column layout and a single data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvImport {
    /// Device the row belongs to, sent as the `id` extra label.
    pub device_id: DeviceId,
    /// Column descriptions, e.g. `1:time:unix_s,2:metric:ws90_uvi`.
    pub format: String,
    /// The CSV row.
    pub row: String,
}

impl CsvImport {
    /// Import of one gauge sample.
    pub fn field(device_id: DeviceId, timestamp: i64, metric: &str, value: f64) -> Self {
        Self {
            device_id,
            format: format!("1:time:unix_s,2:metric:{}", metric),
            row: format!("{},{}", timestamp, value),
        }
    }

    /// Import of an info sample: value `1` with one label column per pair.
    pub fn model_info(
        device_id: DeviceId,
        timestamp: i64,
        name: &str,
        labels: &[(&str, String)],
    ) -> Self {
        let mut format = format!("1:time:unix_s,2:metric:{}_info", name);
        let mut row = format!("{},1", timestamp);

        for (column, (key, value)) in labels.iter().enumerate() {
            format.push_str(&format!(",{}:label:{}", column + 3, key));
            row.push(',');
            row.push_str(&csv_field(value));
        }

        Self {
            device_id,
            format,
            row,
        }
    }
}

/// Build every import for `reading`.
///
/// Fields absent from the reading are skipped. The reading must carry an `id`
/// and a parseable `time`.
pub fn build_imports(
    reading: &Reading,
    fields: &[FieldDescriptor],
    infos: &[ModelInfoDescriptor],
) -> Result<Vec<CsvImport>, PublishError> {
    let device_id = reading.device_id().ok_or(PublishError::MissingField("id"))?;
    let time = reading.time().ok_or(PublishError::MissingField("time"))?;
    let timestamp = parse_timestamp(time).map_err(|reason| PublishError::InvalidField {
        field: "time",
        reason,
    })?;

    let mut imports = Vec::with_capacity(fields.len() + infos.len());

    for descriptor in fields {
        if let Some(value) = descriptor.value(reading) {
            imports.push(CsvImport::field(device_id, timestamp, descriptor.name, value));
        }
    }

    for descriptor in infos {
        let labels = descriptor.label_values(reading);
        imports.push(CsvImport::model_info(
            device_id,
            timestamp,
            descriptor.name,
            &labels,
        ));
    }

    Ok(imports)
}

/// Parse a reading's `time` into unix seconds.
///
/// Accepts rtl_433's local `YYYY-MM-DD HH:MM:SS` (optionally with fractional
/// seconds or a `T` separator), RFC 3339, and plain unix seconds given as a
/// number or numeric string.
pub fn parse_timestamp(value: &Value) -> Result<i64, String> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| format!("unusable number {}", n)),
        Value::String(s) => parse_timestamp_str(s.trim()),
        other => Err(format!("expected a string or number, got {}", other)),
    }
}

fn parse_timestamp_str(s: &str) -> Result<i64, String> {
    if let Ok(seconds) = s.parse::<f64>() {
        if seconds.is_finite() {
            return Ok(seconds as i64);
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp());
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            // Ambiguous wall-clock times (DST fold) take the earlier instant.
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.timestamp())
                .ok_or_else(|| format!("`{}` does not exist in local time", s));
        }
    }

    Err(format!("unrecognised timestamp `{}`", s))
}

/// Quote a CSV value if it contains a separator, quote, or line break.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// HTTP client for the CSV import endpoint.
#[derive(Debug, Clone)]
pub struct VictoriaMetricsClient {
    client: Client,
    import_url: Url,
}

impl VictoriaMetricsClient {
    /// Create a client for the server at `base_url`.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AdapterError> {
        let base = Url::parse(base_url)
            .map_err(|e| AdapterError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        let import_url = base
            .join(IMPORT_PATH)
            .map_err(|e| AdapterError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self { client, import_url })
    }

    /// Full URL imports are POSTed to.
    pub fn import_url(&self) -> &Url {
        &self.import_url
    }

    /// Submit one import.
    pub async fn import(&self, import: &CsvImport) -> Result<(), AdapterError> {
        let extra_label = format!("id={}", import.device_id);

        let response = self
            .client
            .post(self.import_url.clone())
            .query(&[
                ("format", import.format.as_str()),
                ("extra_label", extra_label.as_str()),
            ])
            .body(import.row.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Status(status.as_u16()));
        }

        Ok(())
    }
}

/// Publishes readings to VictoriaMetrics from a background worker.
#[derive(Debug)]
pub struct VictoriaMetricsPublisher {
    fields: &'static [FieldDescriptor],
    infos: &'static [ModelInfoDescriptor],
    queue: mpsc::Sender<Vec<CsvImport>>,
}

impl VictoriaMetricsPublisher {
    /// Create a new builder.
    pub fn builder() -> VictoriaMetricsPublisherBuilder {
        VictoriaMetricsPublisherBuilder::default()
    }
}

impl Subscriber for VictoriaMetricsPublisher {
    fn name(&self) -> &str {
        "victoriametrics"
    }

    fn on_reading(&self, reading: &Reading) -> Result<(), PublishError> {
        let imports = build_imports(reading, self.fields, self.infos)?;

        self.queue.try_send(imports).map_err(|e| match e {
            TrySendError::Full(batch) => {
                error!(
                    device_id = ?reading.device_id(),
                    dropped = batch.len(),
                    "VictoriaMetrics queue is full"
                );
                PublishError::QueueFull
            }
            TrySendError::Closed(_) => PublishError::Closed,
        })
    }
}

/// Builder for VictoriaMetricsPublisher.
#[derive(Debug, Default)]
pub struct VictoriaMetricsPublisherBuilder {
    base_url: Option<String>,
    timeout: Option<Duration>,
    queue_capacity: Option<usize>,
    fields: Option<&'static [FieldDescriptor]>,
    infos: Option<&'static [ModelInfoDescriptor]>,
}

impl VictoriaMetricsPublisherBuilder {
    /// Set the server base URL (e.g., "http://localhost:8428").
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the request timeout (default: 10 seconds).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many readings may wait for submission (default: 256).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Set the field table (default: the WS90 table).
    pub fn fields(mut self, fields: &'static [FieldDescriptor]) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Set the model-info table (default: the WS90 table).
    pub fn model_info(mut self, infos: &'static [ModelInfoDescriptor]) -> Self {
        self.infos = Some(infos);
        self
    }

    /// Build the publisher and spawn its worker on the current runtime.
    pub fn spawn(self) -> Result<(VictoriaMetricsPublisher, JoinHandle<()>), AdapterError> {
        let base_url = self
            .base_url
            .ok_or_else(|| AdapterError::InvalidUrl("no base URL configured".to_string()))?;
        let client =
            VictoriaMetricsClient::new(&base_url, self.timeout.unwrap_or(DEFAULT_TIMEOUT))?;

        let (tx, rx) = mpsc::channel(self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY).max(1));
        let worker = tokio::spawn(run_worker(client, rx));

        let publisher = VictoriaMetricsPublisher {
            fields: self.fields.unwrap_or(WS90_FIELDS),
            infos: self.infos.unwrap_or(WS90_MODEL_INFO),
            queue: tx,
        };

        Ok((publisher, worker))
    }
}

async fn run_worker(client: VictoriaMetricsClient, mut rx: mpsc::Receiver<Vec<CsvImport>>) {
    while let Some(batch) = rx.recv().await {
        for import in batch {
            match client.import(&import).await {
                Ok(()) => debug!(
                    device_id = %import.device_id,
                    format = %import.format,
                    row = %import.row,
                    "Posted import to VictoriaMetrics"
                ),
                Err(e) => error!(
                    device_id = %import.device_id,
                    format = %import.format,
                    "Failed to post import to VictoriaMetrics: {}",
                    e
                ),
            }
        }
    }
    debug!("VictoriaMetrics worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading(json: Value) -> Reading {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn field_import_layout() {
        let import = CsvImport::field(DeviceId::new(100), 1_714_564_800, "ws90_battery_volts", 2.8);
        assert_eq!(import.format, "1:time:unix_s,2:metric:ws90_battery_volts");
        assert_eq!(import.row, "1714564800,2.8");
    }

    #[test]
    fn info_import_layout_uses_label_keys() {
        let labels = [
            ("firmware", "126".to_string()),
            ("model", "Fineoffset-WS90".to_string()),
        ];
        let import = CsvImport::model_info(DeviceId::new(100), 10, "ws90_model", &labels);

        assert_eq!(
            import.format,
            "1:time:unix_s,2:metric:ws90_model_info,3:label:firmware,4:label:model"
        );
        assert_eq!(import.row, "10,1,126,Fineoffset-WS90");
    }

    #[test]
    fn test_csv_field() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_field("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn builds_one_import_per_present_field_plus_info() {
        let r = reading(json!({
            "time": 1_714_564_800,
            "model": "Fineoffset-WS90",
            "id": 100,
            "firmware": 126,
            "battery_mV": 2800,
            "rain_mm": 1500
        }));

        let imports = build_imports(&r, WS90_FIELDS, WS90_MODEL_INFO).unwrap();
        let formats: Vec<_> = imports.iter().map(|i| i.format.as_str()).collect();

        assert_eq!(
            formats,
            vec![
                "1:time:unix_s,2:metric:ws90_battery_volts",
                "1:time:unix_s,2:metric:ws90_rain_m",
                "1:time:unix_s,2:metric:ws90_model_info,3:label:firmware,4:label:model",
            ]
        );
        assert_eq!(imports[0].row, "1714564800,2.8");
        assert_eq!(imports[1].row, "1714564800,1.5");
        assert!(imports.iter().all(|i| i.device_id == DeviceId::new(100)));
    }

    #[test]
    fn missing_id_or_time_is_an_error() {
        let no_id = reading(json!({ "time": 1, "model": "Fineoffset-WS90" }));
        assert!(matches!(
            build_imports(&no_id, WS90_FIELDS, WS90_MODEL_INFO),
            Err(PublishError::MissingField("id"))
        ));

        let no_time = reading(json!({ "id": 1, "model": "Fineoffset-WS90" }));
        assert!(matches!(
            build_imports(&no_time, WS90_FIELDS, WS90_MODEL_INFO),
            Err(PublishError::MissingField("time"))
        ));

        let bad_time = reading(json!({ "id": 1, "time": "yesterday" }));
        assert!(matches!(
            build_imports(&bad_time, WS90_FIELDS, WS90_MODEL_INFO),
            Err(PublishError::InvalidField { field: "time", .. })
        ));
    }

    #[test]
    fn parses_timestamp_forms() {
        assert_eq!(parse_timestamp(&json!(1714564800)), Ok(1714564800));
        assert_eq!(parse_timestamp(&json!(1714564800.75)), Ok(1714564800));
        assert_eq!(parse_timestamp(&json!("1714564800")), Ok(1714564800));
        assert_eq!(
            parse_timestamp(&json!("2024-05-01T12:00:00Z")),
            Ok(1714564800)
        );
        assert_eq!(
            parse_timestamp(&json!("2024-05-01T14:00:00+02:00")),
            Ok(1714564800)
        );
        assert!(parse_timestamp(&json!(true)).is_err());
        assert!(parse_timestamp(&json!("soon")).is_err());
    }

    #[test]
    fn rtl_433_time_is_local() {
        let naive =
            NaiveDateTime::parse_from_str("2024-05-01 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let expected = Local.from_local_datetime(&naive).earliest().unwrap().timestamp();

        assert_eq!(parse_timestamp(&json!("2024-05-01 12:00:00")), Ok(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01T12:00:00")), Ok(expected));
        assert_eq!(
            parse_timestamp(&json!("2024-05-01 12:00:00.250")),
            Ok(expected)
        );
    }

    #[test]
    fn client_joins_import_path_absolutely() {
        let client =
            VictoriaMetricsClient::new("http://vm.local:8428/some/prefix/", DEFAULT_TIMEOUT)
                .unwrap();
        assert_eq!(
            client.import_url().as_str(),
            "http://vm.local:8428/api/v1/import/csv"
        );

        assert!(matches!(
            VictoriaMetricsClient::new("not a url", DEFAULT_TIMEOUT),
            Err(AdapterError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn builder_requires_base_url() {
        assert!(matches!(
            VictoriaMetricsPublisher::builder().spawn(),
            Err(AdapterError::InvalidUrl(_))
        ));
    }

    #[test]
    fn full_queue_drops_reading() {
        let (tx, mut rx) = mpsc::channel(1);
        let publisher = VictoriaMetricsPublisher {
            fields: WS90_FIELDS,
            infos: WS90_MODEL_INFO,
            queue: tx,
        };
        let r = reading(json!({ "time": 1, "id": 7, "uvi": 1.0 }));

        publisher.on_reading(&r).unwrap();
        assert!(matches!(publisher.on_reading(&r), Err(PublishError::QueueFull)));

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 2);

        drop(rx);
        assert!(matches!(publisher.on_reading(&r), Err(PublishError::Closed)));
    }
}
