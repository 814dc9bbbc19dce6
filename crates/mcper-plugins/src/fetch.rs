//! Cache-or-download retrieval of plugin module bytes.

use std::path::Path;

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::cache::{IntegrityCache, Permissions};
use crate::error::{PluginError, PluginResult};
use crate::source::RegistryArtifact;

/// Maximum artifact download size (100 MiB).
pub const MAX_ARTIFACT_SIZE: u64 = 100 * 1024 * 1024;

/// Where fetched bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactOrigin {
    /// A verified cache entry.
    Cached,
    /// A fresh download.
    Downloaded,
}

/// Module bytes plus their origin.
#[derive(Debug, Clone)]
pub struct FetchedArtifact {
    /// Module bytes.
    pub bytes: Vec<u8>,
    /// Cache hit or download.
    pub origin: ArtifactOrigin,
}

/// Fetches registry artifacts through the integrity cache.
#[derive(Debug, Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    cache: IntegrityCache,
    max_size: u64,
}

impl ArtifactFetcher {
    /// Create a fetcher with the default HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(cache: IntegrityCache) -> PluginResult<Self> {
        Ok(Self::with_client(cache, crate::http_client()?))
    }

    /// Create a fetcher with an explicit HTTP client.
    #[must_use]
    pub fn with_client(cache: IntegrityCache, client: reqwest::Client) -> Self {
        Self {
            client,
            cache,
            max_size: MAX_ARTIFACT_SIZE,
        }
    }

    /// Override the download size limit.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// The underlying cache.
    #[must_use]
    pub fn cache(&self) -> &IntegrityCache {
        &self.cache
    }

    /// Return verified cached bytes for `artifact`, downloading on a miss or
    /// integrity mismatch.
    ///
    /// A failure to store the download is logged; the bytes are still used.
    ///
    /// # Errors
    ///
    /// Returns an error if the download fails or exceeds the size limit.
    pub async fn fetch(
        &self,
        artifact: &RegistryArtifact,
        permissions: Option<&Permissions>,
        env: &[String],
    ) -> PluginResult<FetchedArtifact> {
        if let Some(entry) = self.cache.lookup(artifact) {
            let cache = self.cache.clone();
            let path = entry.artifact_path.clone();
            match tokio::task::spawn_blocking(move || cache.read_verified(&entry)).await {
                Ok(Ok(bytes)) => {
                    info!(
                        artifact = %artifact.cache_key(),
                        path = %path.display(),
                        "using cached artifact"
                    );
                    return Ok(FetchedArtifact {
                        bytes,
                        origin: ArtifactOrigin::Cached,
                    });
                },
                Ok(Err(e)) => {
                    warn!(artifact = %artifact.cache_key(), error = %e, "cache entry invalid, re-downloading");
                },
                Err(e) => {
                    warn!(artifact = %artifact.cache_key(), error = %e, "cache check aborted, re-downloading");
                },
            }
        }

        info!(artifact = %artifact.cache_key(), url = %artifact.url, "downloading artifact");
        let bytes = self.download(&artifact.url).await?;

        let cache = self.cache.clone();
        let target = artifact.clone();
        let permissions = permissions.cloned();
        let env = env.to_vec();
        let (bytes, stored) = tokio::task::spawn_blocking(move || {
            let stored = cache.store(&target, &bytes, permissions.as_ref(), &env);
            (bytes, stored)
        })
        .await
        .map_err(|e| PluginError::io(self.cache.root(), std::io::Error::other(e)))?;
        if let Err(e) = stored {
            warn!(artifact = %artifact.cache_key(), error = %e, "failed to cache artifact");
        }

        Ok(FetchedArtifact {
            bytes,
            origin: ArtifactOrigin::Downloaded,
        })
    }

    /// GET `url` with the size limit applied.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, or a body
    /// larger than the limit.
    pub async fn download(&self, url: &str) -> PluginResult<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PluginError::Http(format!("failed to download {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(PluginError::Http(format!(
                "failed to download {url}: HTTP {}",
                response.status()
            )));
        }

        if let Some(len) = response.content_length()
            && len > self.max_size
        {
            return Err(PluginError::ArtifactTooLarge {
                size: len,
                limit: self.max_size,
            });
        }

        let bytes = download_with_limit(response, self.max_size).await?;
        debug!(url = %url, size = bytes.len(), "download complete");
        Ok(bytes)
    }
}

/// Read a local module file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn read_local(path: &Path) -> PluginResult<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| PluginError::io(path, e))
}

async fn download_with_limit(response: reqwest::Response, max_size: u64) -> PluginResult<Vec<u8>> {
    let capacity =
        usize::try_from(response.content_length().unwrap_or(0).min(max_size)).unwrap_or(0);
    let mut bytes = Vec::with_capacity(capacity);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| PluginError::Http(format!("download error: {e}")))?;
        bytes.extend_from_slice(&chunk);
        let current_size = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if current_size > max_size {
            return Err(PluginError::ArtifactTooLarge {
                size: current_size,
                limit: max_size,
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::Router;
    use axum::routing::get;

    async fn serve_artifact(body: &'static [u8]) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let app = Router::new().route(
            "/{version}/{file}",
            get(move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    body
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn artifact(base: &str) -> RegistryArtifact {
        RegistryArtifact {
            name: "echo".into(),
            version: "v1".into(),
            url: format!("{base}/v1/plugin-echo.wasm"),
        }
    }

    #[tokio::test]
    async fn test_second_fetch_uses_cache() {
        let (base, hits) = serve_artifact(b"module-bytes").await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            ArtifactFetcher::with_client(IntegrityCache::new(dir.path()), reqwest::Client::new());
        let a = artifact(&base);

        let first = fetcher.fetch(&a, None, &[]).await.unwrap();
        assert_eq!(first.origin, ArtifactOrigin::Downloaded);
        let second = fetcher.fetch(&a, None, &[]).await.unwrap();
        assert_eq!(second.origin, ArtifactOrigin::Cached);
        assert_eq!(second.bytes, b"module-bytes");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tampered_cache_triggers_redownload() {
        let (base, hits) = serve_artifact(b"module-bytes").await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            ArtifactFetcher::with_client(IntegrityCache::new(dir.path()), reqwest::Client::new());
        let a = artifact(&base);

        fetcher.fetch(&a, None, &[]).await.unwrap();
        std::fs::write(fetcher.cache().artifact_path(&a), b"evil").unwrap();

        let again = fetcher.fetch(&a, None, &[]).await.unwrap();
        assert_eq!(again.origin, ArtifactOrigin::Downloaded);
        assert_eq!(again.bytes, b"module-bytes");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        let entry = fetcher.cache().lookup(&a).unwrap();
        assert!(fetcher.cache().verify(&entry));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_concurrent_cached_fetches_on_one_thread() {
        static BODY: [u8; 1 << 20] = [7u8; 1 << 20];
        let (base, hits) = serve_artifact(&BODY).await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            ArtifactFetcher::with_client(IntegrityCache::new(dir.path()), reqwest::Client::new());
        let a = artifact(&base);
        fetcher.fetch(&a, None, &[]).await.unwrap();

        let (left, right) = tokio::join!(fetcher.fetch(&a, None, &[]), fetcher.fetch(&a, None, &[]));
        for fetched in [left.unwrap(), right.unwrap()] {
            assert_eq!(fetched.origin, ArtifactOrigin::Cached);
            assert_eq!(fetched.bytes.len(), BODY.len());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_size_limit() {
        let (base, _) = serve_artifact(b"0123456789").await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher =
            ArtifactFetcher::with_client(IntegrityCache::new(dir.path()), reqwest::Client::new())
                .with_max_size(4);

        let err = fetcher.fetch(&artifact(&base), None, &[]).await.unwrap_err();
        assert!(matches!(err, PluginError::ArtifactTooLarge { limit: 4, .. }));
    }

    #[tokio::test]
    async fn test_read_local_missing() {
        let err = read_local(Path::new("/no/such/plugin.wasm")).await.unwrap_err();
        assert!(matches!(err, PluginError::Io { .. }));
    }
}
