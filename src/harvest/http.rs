//! [`Reporter`] over HTTP.

use std::time::{Duration, Instant};

use reqwest::blocking::{Client, RequestBuilder, multipart};
use serde_json::Value as Json;
use tracing::{debug, error, info};

use crate::config::HarvesterSettings;
use crate::error::{HarvestError, HarvestResult};

use super::report::{Report, Reply, Reporter, Upload};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking HTTP client for the reporting service.
///
/// Reports and uploads are `POST`ed to `{url}report/`; mapping references are fetched with
/// `GET`. Every request carries `Authorization: Harvester {api_key}`.
#[derive(Debug, Clone)]
pub struct HttpReporter {
    client: Client,
    report_url: String,
    api_key: String,
}

impl HttpReporter {
    pub fn new(url: &str, api_key: &str) -> HarvestResult<Self> {
        Self::with_timeout(url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: &str, api_key: &str, timeout: Duration) -> HarvestResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarvestError::Config {
                message: format!("cannot build HTTP client: {e}"),
            })?;
        let base = if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{url}/")
        };
        Ok(Self {
            client,
            report_url: format!("{base}report/"),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_settings(settings: &HarvesterSettings) -> HarvestResult<Self> {
        Self::new(&settings.url, &settings.api_key)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(reqwest::header::AUTHORIZATION, format!("Harvester {}", self.api_key))
    }

    fn send(&self, what: &str, request: RequestBuilder) -> Reply {
        let started = Instant::now();
        let reply = interpret(request.send());
        info!(
            call = what,
            elapsed_ms = started.elapsed().as_millis() as u64,
            accepted = reply.is_accepted(),
            "API call finished"
        );
        reply
    }
}

fn interpret(result: reqwest::Result<reqwest::blocking::Response>) -> Reply {
    let response = match result {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "request failed");
            return Reply::NoResponse(e.to_string());
        }
    };
    let status = response.status();
    let text = match response.text() {
        Ok(t) => t,
        Err(e) => {
            error!(error = %e, "failed to read response body");
            return Reply::NoResponse(e.to_string());
        }
    };
    let body: Json = match serde_json::from_str(&text) {
        Ok(b) => b,
        Err(_) => {
            let mut preview: String = text.chars().take(100).collect::<String>().replace('\n', "\\n");
            if text.chars().count() > 100 {
                preview.push_str("...");
            }
            error!(status = status.as_u16(), body = %preview, "server returned invalid JSON");
            return Reply::NoResponse(format!("invalid JSON (HTTP {})", status.as_u16()));
        }
    };
    if status.is_success() {
        Reply::Accepted(body)
    } else {
        error!(status = status.as_u16(), body = %body, "server returned error");
        Reply::Rejected {
            status: status.as_u16(),
            error: body.get("error").map(|e| match e {
                Json::String(s) => s.clone(),
                other => other.to_string(),
            }),
        }
    }
}

impl Reporter for HttpReporter {
    fn report(&self, report: &Report) -> Reply {
        let payload = report.to_json();
        debug!(url = %self.report_url, %payload, "report");
        self.send(
            "report",
            self.authorized(self.client.post(&self.report_url).json(&payload)),
        )
    }

    fn upload(&self, upload: &Upload) -> Reply {
        let part = match multipart::Part::file(&upload.file) {
            Ok(p) => p.file_name(upload.fields.filename.clone()),
            Err(e) => {
                error!(file = %upload.file.display(), error = %e, "cannot open upload");
                return Reply::NoResponse(format!("cannot open {}: {e}", upload.file.display()));
            }
        };
        let form = upload
            .fields
            .form_pairs()
            .into_iter()
            .fold(multipart::Form::new(), |form, (k, v)| form.text(k, v))
            .part(upload.part, part);
        debug!(url = %self.report_url, filename = %upload.fields.filename, "upload");
        self.send(
            "upload",
            self.authorized(self.client.post(&self.report_url).multipart(form)),
        )
    }

    fn fetch_mapping(&self, reference: &str) -> Reply {
        self.send("fetch mapping", self.authorized(self.client.get(reference)))
    }
}
