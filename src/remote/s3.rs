//! [RemoteStore] for S3-compatible object storage, using path-style requests.

use std::fs::File;
use std::io::{self, Seek};
use std::path::Path;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Body, Client, RequestBuilder, Response};
use reqwest::header::AUTHORIZATION;
use reqwest::{Method, Url};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::sigv4::{self, SigningKey, EMPTY_PAYLOAD_SHA256};
use super::{RemoteError, RemoteObject, RemoteStore};
use crate::config::S3Settings;

/// Client of one bucket.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    endpoint: Url,
    bucket: String,
    key: SigningKey,
}

impl S3Store {
    /// Create a client for the bucket in `settings`.
    ///
    /// Requests have no timeout, large uploads may take as long as they need.
    pub fn new(settings: &S3Settings) -> Result<Self, RemoteError> {
        let endpoint = Url::parse(&settings.endpoint)
            .map_err(|e| RemoteError::InvalidEndpoint(format!("{}: {e}", settings.endpoint)))?;
        if endpoint.cannot_be_a_base() || endpoint.host_str().is_none() {
            return Err(RemoteError::InvalidEndpoint(settings.endpoint.clone()));
        }

        let client = Client::builder().timeout(None).build()?;
        log::debug!(target: "remote::s3", "Using bucket {} at {endpoint}", settings.bucket);

        Ok(Self {
            client,
            endpoint,
            bucket: settings.bucket.clone(),
            key: SigningKey {
                access_key: settings.access_key.clone(),
                secret_key: settings.secret_key.clone(),
                region: settings.region.clone(),
            },
        })
    }

    /// URL of the bucket, or of `key` within it.
    fn url(&self, key: Option<&str>, query: Option<&str>) -> Url {
        let base_path = self.endpoint.path().trim_end_matches('/');
        let path = match key {
            Some(key) => format!("{base_path}/{}/{key}", self.bucket),
            None => format!("{base_path}/{}", self.bucket),
        };

        let mut url = self.endpoint.clone();
        url.set_path(&sigv4::encode_path(&path));
        url.set_query(query);
        url
    }

    fn signed(&self, method: Method, url: Url, payload_hash: &str) -> RequestBuilder {
        let now = Utc::now();
        let date = sigv4::amz_date(now);
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        };

        let authorization = sigv4::authorization(
            method.as_str(),
            url.path(),
            url.query().unwrap_or_default(),
            &[
                ("host", host.as_str()),
                ("x-amz-content-sha256", payload_hash),
                ("x-amz-date", date.as_str()),
            ],
            payload_hash,
            &self.key,
            now,
        );

        self.client
            .request(method, url)
            .header("x-amz-content-sha256", payload_hash)
            .header("x-amz-date", date)
            .header(AUTHORIZATION, authorization)
    }
}

fn check(method: &'static str, key: &str, response: Response) -> Result<Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().unwrap_or_default();
    Err(RemoteError::Status {
        method,
        key: key.to_string(),
        status,
        body: body.trim().to_string(),
    })
}

impl RemoteStore for S3Store {
    fn upload(&self, local_path: &Path, key: &str) -> Result<(), RemoteError> {
        let mut file = File::open(local_path)?;
        let size = file.metadata()?.len();

        let mut hasher = Sha256::new();
        io::copy(&mut file, &mut hasher)?;
        let payload_hash = hex::encode(hasher.finalize());
        file.rewind()?;

        log::debug!(target: "remote::s3", "PUT {key} ({size} bytes)");
        let response = self
            .signed(Method::PUT, self.url(Some(key), None), &payload_hash)
            .body(Body::sized(file, size))
            .send()?;
        check("PUT", key, response)?;

        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, RemoteError> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut params = vec![("list-type", "2"), ("prefix", prefix)];
            if let Some(token) = continuation_token.as_deref() {
                params.push(("continuation-token", token));
            }
            let query = sigv4::canonical_query(&params);

            log::debug!(target: "remote::s3", "LIST {prefix}");
            let response = self
                .signed(Method::GET, self.url(None, Some(&query)), EMPTY_PAYLOAD_SHA256)
                .send()?;
            let page = parse_list_page(&check("LIST", prefix, response)?.text()?)?;

            objects.extend(page.contents.into_iter().map(|entry| RemoteObject {
                key: entry.key,
                last_modified: entry.last_modified,
            }));

            match page.next_continuation_token {
                Some(token) if page.is_truncated => continuation_token = Some(token),
                _ => break,
            }
        }

        Ok(objects)
    }

    fn delete(&self, key: &str) -> Result<(), RemoteError> {
        log::debug!(target: "remote::s3", "DELETE {key}");
        let response = self
            .signed(Method::DELETE, self.url(Some(key), None), EMPTY_PAYLOAD_SHA256)
            .send()?;
        check("DELETE", key, response)?;

        Ok(())
    }
}

/// One page of a `ListObjectsV2` response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    contents: Vec<ListEntry>,
    #[serde(default)]
    is_truncated: bool,
    next_continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    key: String,
    last_modified: DateTime<Utc>,
}

fn parse_list_page(xml: &str) -> Result<ListBucketResult, RemoteError> {
    Ok(quick_xml::de::from_str(xml)?)
}
