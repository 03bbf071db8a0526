use crate::error::{self, Result};
use bytes::Bytes;
use log::{debug, trace};
use serde::Deserialize;
use serde_json::Value;
use snafu::ResultExt;

/// Where an operator's manifests come from. The two variants are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestSource {
    /// `http://` or `https://` URLs, or local file paths. Each may hold several documents.
    Locations(Vec<String>),
    /// Manifests that were loaded ahead of time. Each may hold several documents.
    Buffers(Vec<Bytes>),
}

impl ManifestSource {
    /// Resolve every location or buffer into its documents, in order. Any fetch failure fails the
    /// whole call.
    pub async fn documents(&self) -> Result<Vec<Value>> {
        let mut documents = Vec::new();
        match self {
            ManifestSource::Locations(locations) => {
                for location in locations {
                    let data = load(location).await?;
                    documents.extend(split_documents(&data)?);
                }
            }
            ManifestSource::Buffers(buffers) => {
                for buffer in buffers {
                    documents.extend(split_documents(buffer)?);
                }
            }
        }
        debug!("Resolved {} manifest documents", documents.len());
        Ok(documents)
    }
}

/// Read the raw bytes of a manifest from a URL or a local file.
pub async fn load(location: &str) -> Result<Vec<u8>> {
    if is_url(location) {
        trace!("Fetching manifest from '{}'", location);
        let response = reqwest::get(location)
            .await
            .and_then(|response| response.error_for_status())
            .context(error::FetchSnafu { url: location })?;
        let body = response
            .bytes()
            .await
            .context(error::FetchSnafu { url: location })?;
        Ok(body.to_vec())
    } else {
        trace!("Reading manifest from '{}'", location);
        Ok(tokio::fs::read(location)
            .await
            .context(error::ReadFileSnafu { path: location })?)
    }
}

fn is_url(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}

/// Split a YAML or JSON buffer into its documents. Empty documents are dropped.
pub fn split_documents(data: &[u8]) -> Result<Vec<Value>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(strip_leading_comments(data)) {
        let value = Value::deserialize(document).context(error::ManifestParseSnafu)?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Drop the blank and comment-only lines that precede the first line of content. Format
/// detection looks at the first non-trivial byte, so these lines must not reach the decoder.
pub fn strip_leading_comments(data: &[u8]) -> &[u8] {
    let mut offset = 0;
    for line in data.split_inclusive(|byte| *byte == b'\n') {
        match line.iter().find(|byte| !byte.is_ascii_whitespace()) {
            None | Some(b'#') => offset += line.len(),
            Some(_) => break,
        }
    }
    &data[offset..]
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const TWO_DOCUMENTS: &str = r#"
# Service account used by the operator

# another comment
apiVersion: v1
kind: ServiceAccount
metadata:
  name: op
---
apiVersion: rbac.authorization.k8s.io/v1
kind: Role
metadata:
  name: op
rules: []
---
"#;

    #[test]
    fn leading_comments_are_stripped() {
        let stripped = strip_leading_comments(TWO_DOCUMENTS.as_bytes());
        assert!(stripped.starts_with(b"apiVersion: v1"));
    }

    #[test]
    fn comments_after_content_are_kept() {
        let data = b"kind: A\n# trailing\n";
        assert_eq!(strip_leading_comments(data), data);
    }

    #[test]
    fn only_comments_strip_to_nothing() {
        assert!(strip_leading_comments(b"# nothing\n\n   \n").is_empty());
    }

    #[test]
    fn documents_are_split_in_order() {
        let documents = split_documents(TWO_DOCUMENTS.as_bytes()).unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0]["kind"], "ServiceAccount");
        assert_eq!(documents[1]["kind"], "Role");
    }

    #[test]
    fn json_buffers_decode() {
        let data = br#"{"apiVersion": "v1", "kind": "ServiceAccount", "metadata": {"name": "op"}}"#;
        let documents = split_documents(data).unwrap();
        assert_eq!(
            documents,
            vec![json!({"apiVersion": "v1", "kind": "ServiceAccount", "metadata": {"name": "op"}})]
        );
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let err = split_documents(b"kind: [unterminated\n").unwrap_err();
        assert!(err.is_decode());
    }

    #[tokio::test]
    async fn buffers_resolve_to_documents() {
        let source = ManifestSource::Buffers(vec![
            Bytes::from_static(TWO_DOCUMENTS.as_bytes()),
            Bytes::from_static(b"apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: op\n"),
        ]);
        let kinds: Vec<Value> = source
            .documents()
            .await
            .unwrap()
            .into_iter()
            .map(|document| document["kind"].clone())
            .collect();
        assert_eq!(kinds, vec!["ServiceAccount", "Role", "Deployment"]);
    }

    #[tokio::test]
    async fn file_locations_are_read() {
        let dir = std::env::temp_dir().join(format!("harness-manifest-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("service_account.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(TWO_DOCUMENTS.as_bytes()).unwrap();

        let source = ManifestSource::Locations(vec![path.to_string_lossy().to_string()]);
        assert_eq!(source.documents().await.unwrap().len(), 2);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    /// Answer one HTTP request on a local port with `status` and `body`. Returns the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = vec![0; 4096];
            let _ = stream.read(&mut request).await.unwrap();
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();
        });
        format!("http://{}", address)
    }

    #[tokio::test]
    async fn url_locations_are_fetched() {
        let url = serve_once("200 OK", TWO_DOCUMENTS).await;
        let source = ManifestSource::Locations(vec![format!("{}/deploy/operator.yaml", url)]);
        let documents = source.documents().await.unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1]["kind"], "Role");
    }

    #[tokio::test]
    async fn http_error_status_fails_the_whole_source() {
        let url = serve_once("404 Not Found", "no such manifest").await;
        let location = format!("{}/deploy/missing.yaml", url);
        let source = ManifestSource::Locations(vec![location.clone()]);
        let err = source.documents().await.unwrap_err();
        assert!(!err.is_decode());
        assert!(err.to_string().contains(&location));
    }

    #[tokio::test]
    async fn missing_file_fails_the_whole_source() {
        let source = ManifestSource::Locations(vec!["/does/not/exist.yaml".to_string()]);
        assert!(source.documents().await.is_err());
    }
}
