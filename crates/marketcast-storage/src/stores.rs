//! The pair of object stores an upload moves between.

use crate::{Storage, StorageResult};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

/// Temporary landing store, permanent store and the domain that user-facing
/// reference URLs are built on.
#[derive(Clone)]
pub struct ObjectStores {
    pub temporary: Arc<dyn Storage>,
    pub permanent: Arc<dyn Storage>,
    reference_domain: Option<String>,
}

impl ObjectStores {
    pub fn new(
        temporary: Arc<dyn Storage>,
        permanent: Arc<dyn Storage>,
        reference_domain: Option<String>,
    ) -> Self {
        Self {
            temporary,
            permanent,
            reference_domain: reference_domain.map(|d| d.trim_end_matches('/').to_string()),
        }
    }

    /// User-facing URL of a key in the permanent store.
    pub fn reference_url(&self, key: &str) -> String {
        match &self.reference_domain {
            Some(domain) => format!("{}/{}", domain, key),
            None => self.permanent.public_url(key),
        }
    }

    /// Copy `source_key` from the temporary store to `dest_key` in the
    /// permanent store and return the reference URL.
    ///
    /// The body is streamed, never fully buffered. The destination object only
    /// becomes visible once the copy completed, and copying the same source
    /// again overwrites it with identical content.
    pub async fn promote(
        &self,
        source_key: &str,
        dest_key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let start = std::time::Instant::now();

        let body = self.temporary.download_stream(source_key).await?;
        let reader: Pin<Box<dyn AsyncRead + Send + Unpin>> = Box::pin(StreamReader::new(body));

        self.permanent
            .upload_stream(dest_key, content_type, reader)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    source_key = %source_key,
                    dest_key = %dest_key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Promotion to permanent store failed"
                );
                e
            })?;

        let url = self.reference_url(dest_key);

        tracing::info!(
            source_key = %source_key,
            dest_key = %dest_key,
            content_type = %content_type,
            reference_url = %url,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object promoted"
        );

        Ok(url)
    }
}
