//! Direct raster requests against a hub process API.
//!
//! Unlike catalog products these return a finished GeoTIFF for a bounding box,
//! so the time window is sent with full timestamps instead of day padding.

use crate::io::catalog::TimePadding;
use crate::io::transfer::{build_client, check_status, classify, persist_body, TransferOptions};
use crate::types::{sanitize_file_name, BoundingBox, SpratError, SpratResult, TimeWindow, TransferReason, TransferTicket};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_DISPOSITION};
use std::path::{Path, PathBuf};

/// Returns bands B01..B06 unchanged
pub const PASSTHROUGH_EVALSCRIPT: &str = "//VERSION=3\n\
function setup() {\n  return {\n    input: [\"B01\", \"B02\", \"B03\", \"B04\", \"B05\", \"B06\"],\n    output: { bands: 6 }\n  };\n}\n\n\
function evaluatePixel(sample) {\n  return [sample.B01, sample.B02, sample.B03, sample.B04, sample.B05, sample.B06];\n}";

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub bbox: BoundingBox,
    /// Hub collection, e.g. `sentinel-2-l2a`
    pub data_type: String,
    pub window: TimeWindow,
    pub evalscript: String,
    pub output_format: String,
}

impl ProcessRequest {
    pub fn new(bbox: BoundingBox, data_type: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            bbox,
            data_type: data_type.into(),
            window,
            evalscript: PASSTHROUGH_EVALSCRIPT.to_string(),
            output_format: "image/tiff".to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let (from, to) = TimePadding::Exact.bounds(&self.window);
        serde_json::json!({
            "input": {
                "bounds": {
                    "bbox": [self.bbox.min_lon, self.bbox.min_lat, self.bbox.max_lon, self.bbox.max_lat]
                },
                "data": [{
                    "dataFilter": { "timeRange": { "from": from, "to": to } },
                    "type": self.data_type
                }]
            },
            "output": {
                "responses": [{
                    "identifier": "default",
                    "format": { "type": self.output_format }
                }]
            },
            "evalscript": self.evalscript
        })
    }
}

static ATTACHMENT_NAME: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r#"filename\s*=\s*"?([^";]+)"?"#).ok());

/// File name from `Content-Disposition: attachment; filename=...`
pub fn attachment_file_name(header: &str) -> Option<String> {
    if !header.contains("attachment") {
        return None;
    }
    let name = ATTACHMENT_NAME.as_ref()?.captures(header)?.get(1)?.as_str().trim();
    Some(sanitize_file_name(name))
}

pub struct HubClient {
    client: Client,
    process_url: String,
    output_dir: PathBuf,
}

impl HubClient {
    pub fn new(
        process_url: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        options: &TransferOptions,
    ) -> SpratResult<Self> {
        Ok(Self {
            client: build_client(options)?,
            process_url: process_url.into(),
            output_dir: output_dir.into(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// POST the request and save the returned raster
    pub fn retrieve(&self, ticket: &TransferTicket, request: &ProcessRequest) -> SpratResult<PathBuf> {
        log::info!("Requesting {} raster for {:?}", request.data_type, request.bbox);

        let response = self
            .client
            .post(&self.process_url)
            .header(AUTHORIZATION, ticket.authorization())
            .json(&request.to_json())
            .send()
            .map_err(|e| SpratError::transfer(classify(&e), format!("POST {}: {}", self.process_url, e)))?;

        check_status(&response)?;

        let file_name = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(attachment_file_name)
            .unwrap_or_else(|| format!("product_{}.tiff", Utc::now().format("%Y%m%d%H%M%S")));
        let dest = self.output_dir.join(file_name);

        let bytes = persist_body(response, &dest)?;
        if bytes == 0 {
            return Err(SpratError::transfer(TransferReason::Io, "hub returned an empty body"));
        }
        log::info!("Data saved to {} ({} bytes)", dest.display(), bytes);
        Ok(dest)
    }
}
