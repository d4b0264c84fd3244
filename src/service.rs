// This file contains the client for the workflow-management service: job status updates,
// artifact lookup, job completion and the remote placement archive.

// Copyright 2024 The denoiseplace developers

// This file is part of denoiseplace. denoiseplace is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// denoiseplace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with denoiseplace. If not, see <http://www.gnu.org/licenses/>.

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::archive::{Archive, Observations};
use crate::error::{PipelineError, Result};
use crate::job::JobResult;


const ARCHIVE_ENDPOINT: &str = "/qiita_db/archive/observations/";


/// The parts of the workflow service a job talks to, other than the archive.
pub trait WorkflowService {
    fn update_job_step(&mut self, job_id: &str, step: &str) -> Result<()>;

    /// Returns the artifact's files, grouped by file type (e.g. "preprocessed_fastq").
    fn artifact_files(&mut self, artifact_id: &str) -> Result<BTreeMap<String, Vec<PathBuf>>>;

    fn complete_job(&mut self, job_id: &str, result: &JobResult) -> Result<()>;
}


pub struct HttpService {
    base_url: String,
    client: Client,
}

impl HttpService {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().build().map_err(|e| {
            PipelineError::Archive(format!("could not create HTTP client: {e}"))
        })?;
        Ok(HttpService { base_url: base_url.trim_end_matches('/').to_string(), client })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    fn check(&self, endpoint: &str, response: reqwest::Result<Response>) -> Result<Response> {
        let response = response.map_err(|e| {
            PipelineError::Archive(format!("request to {} failed: {e}", self.url(endpoint)))
        })?;
        if !response.status().is_success() {
            return Err(PipelineError::Archive(format!("request to {} failed: HTTP {}",
                                                      self.url(endpoint), response.status())));
        }
        Ok(response)
    }

    fn get<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T> {
        let response = self.client.get(self.url(endpoint)).send();
        self.parse(endpoint, self.check(endpoint, response)?)
    }

    fn post<T: DeserializeOwned>(&self, endpoint: &str, body: &Value) -> Result<T> {
        let response = self.client.post(self.url(endpoint)).json(body).send();
        self.parse(endpoint, self.check(endpoint, response)?)
    }

    fn patch(&self, endpoint: &str, body: &Value) -> Result<()> {
        let response = self.client.patch(self.url(endpoint)).json(body).send();
        self.check(endpoint, response).map(|_| ())
    }

    fn parse<T: DeserializeOwned>(&self, endpoint: &str, response: Response) -> Result<T> {
        response.json().map_err(|e| {
            PipelineError::Archive(format!("unexpected response from {}: {e}",
                                           self.url(endpoint)))
        })
    }
}

impl WorkflowService for HttpService {
    fn update_job_step(&mut self, job_id: &str, step: &str) -> Result<()> {
        let endpoint = format!("/qiita_db/jobs/{job_id}/step/");
        let _: Value = self.post(&endpoint, &json!({"step": step}))?;
        Ok(())
    }

    fn artifact_files(&mut self, artifact_id: &str) -> Result<BTreeMap<String, Vec<PathBuf>>> {
        let info: Map<String, Value> = self.get(&format!("/qiita_db/artifacts/{artifact_id}/"))?;
        parse_artifact_files(&info)
    }

    fn complete_job(&mut self, job_id: &str, result: &JobResult) -> Result<()> {
        let endpoint = format!("/qiita_db/jobs/{job_id}/complete/");
        let _: Value = self.post(&endpoint, &serde_json::to_value(result)?)?;
        Ok(())
    }
}

impl Archive for HttpService {
    fn lookup(&mut self, job_id: &str, fragments: &[String]) -> Result<Observations> {
        self.post(ARCHIVE_ENDPOINT, &json!({"job_id": job_id, "features": fragments}))
    }

    fn store(&mut self, job_id: &str, values: &Observations) -> Result<()> {
        // The archive's patch value is itself a JSON-encoded string.
        let value = serde_json::to_string(values)?;
        self.patch(ARCHIVE_ENDPOINT, &json!({"op": "add", "path": job_id, "value": value}))
    }
}


fn parse_artifact_files(info: &Map<String, Value>) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let files = info.get("files").and_then(|f| f.as_object()).ok_or_else(|| {
        PipelineError::InvalidInput("artifact information has no files".to_string())
    })?;
    let mut grouped = BTreeMap::new();
    for (file_type, paths) in files {
        let paths = paths.as_array().ok_or_else(|| {
            PipelineError::InvalidInput(format!("artifact files for {file_type} are not a list"))
        })?;
        let paths = paths.iter()
            .filter_map(|p| p.as_str().map(PathBuf::from))
            .collect::<Vec<_>>();
        grouped.insert(file_type.clone(), paths);
    }
    Ok(grouped)
}
