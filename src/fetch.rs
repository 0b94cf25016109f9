// Copyright 2025 Fernando Borretti
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use ankdown_core::ErrorReport;
use ankdown_core::Fallible;
use ankdown_core::MediaFetcher;
use ankdown_core::fail;
use reqwest::StatusCode;
use reqwest::blocking::Client;

/// Downloads remote images over HTTP. Requests block the build and are never
/// retried.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Fallible<Self> {
        Self::from_builder(Client::builder())
    }

    fn from_builder(builder: reqwest::blocking::ClientBuilder) -> Fallible<Self> {
        let client = builder
            .timeout(None)
            .build()
            .map_err(|err| ErrorReport::new(format!("failed to create HTTP client: {err}")))?;
        Ok(Self { client })
    }
}

impl MediaFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Fallible<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| ErrorReport::new(format!("request failed: {err}")))?;
        let status = response.status();
        if status != StatusCode::OK {
            return fail(format!("HTTP status {status}"));
        }
        let bytes = response
            .bytes()
            .map_err(|err| ErrorReport::new(format!("failed to read response body: {err}")))?;
        Ok(bytes.to_vec())
    }
}
