// S3 mirror of the canonical workspace tree
//
// Keys are path-for-path mirrors under the `_repo/` prefix; there is no
// content addressing. Mirror writes are best-effort - Postgres stays the
// source of truth and a failed mirror is repaired by the next write.

use aws_sdk_s3::primitives::ByteStream;
use bifrost_core::settings::{S3Settings, REPO_PREFIX};
use bifrost_core::{Error, Result};

#[derive(Clone)]
pub struct S3Mirror {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Mirror {
    /// Build a client from settings; a custom endpoint switches to
    /// path-style addressing for MinIO-compatible stores.
    pub async fn from_settings(settings: &S3Settings) -> Self {
        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .load()
            .await;

        let client = match &settings.endpoint_url {
            Some(endpoint) => {
                let conf = aws_sdk_s3::config::Builder::from(&base)
                    .endpoint_url(endpoint)
                    .force_path_style(true)
                    .build();
                aws_sdk_s3::Client::from_conf(conf)
            }
            None => aws_sdk_s3::Client::new(&base),
        };

        Self {
            client,
            bucket: settings.bucket.clone(),
        }
    }

    fn key_for(path: &str) -> String {
        format!("{REPO_PREFIX}{path}")
    }

    pub async fn put(&self, path: &str, content: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key_for(path))
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| Error::transient(format!("s3 put failed for {path}: {e}")))?;
        Ok(())
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key_for(path))
            .send()
            .await
            .map_err(|e| Error::transient(format!("s3 get failed for {path}: {e}")))?;

        let bytes = object
            .body
            .collect()
            .await
            .map_err(|e| Error::transient(format!("s3 body read failed for {path}: {e}")))?;

        Ok(bytes.into_bytes().to_vec())
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(Self::key_for(path))
            .send()
            .await
            .map_err(|e| Error::transient(format!("s3 delete failed for {path}: {e}")))?;
        Ok(())
    }

    /// List every workspace path currently mirrored (repo prefix stripped).
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(REPO_PREFIX)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| Error::transient(format!("s3 list failed: {e}")))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    if let Some(path) = key.strip_prefix(REPO_PREFIX) {
                        if !path.is_empty() {
                            paths.push(path.to_string());
                        }
                    }
                }
            }
        }

        Ok(paths)
    }
}
