use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::error::SyncError;

/// Read access to the landing container. The coordinator only ever lists and
/// downloads; writes belong to whatever produces the snapshots.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every blob key currently in the container.
    async fn list_keys(&self) -> Result<Vec<String>, SyncError>;

    /// Full contents of one blob.
    async fn fetch(&self, key: &str) -> Result<Bytes, SyncError>;
}

/// Azure Blob Storage over its REST API, authorized by SAS token.
pub struct AzureBlobStore {
    client: Client,
    endpoint: Url,
    container: String,
    sas_token: String,
}

impl AzureBlobStore {
    pub fn new(client: Client, endpoint: &str, container: &str, sas_token: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .with_context(|| format!("invalid storage endpoint `{endpoint}`"))?;
        Ok(AzureBlobStore {
            client,
            endpoint,
            container: container.to_string(),
            sas_token: sas_token.trim_start_matches('?').to_string(),
        })
    }

    fn list_url(&self, marker: Option<&str>) -> String {
        let mut url = format!(
            "{}/{}?restype=container&comp=list&{}",
            self.endpoint.as_str().trim_end_matches('/'),
            self.container,
            self.sas_token
        );
        if let Some(m) = marker {
            url.push_str("&marker=");
            url.push_str(m);
        }
        url
    }

    fn blob_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}?{}",
            self.endpoint.as_str().trim_end_matches('/'),
            self.container,
            key,
            self.sas_token
        )
    }
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn list_keys(&self) -> Result<Vec<String>, SyncError> {
        let mut keys = Vec::new();
        let mut marker: Option<String> = None;

        // The List Blobs operation pages via <NextMarker>.
        loop {
            let url = self.list_url(marker.as_deref());
            let page = async {
                let xml = self
                    .client
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .text()
                    .await?;
                parse_list_page(&xml)
            }
            .await
            .map_err(|e| SyncError::Listing {
                container: self.container.clone(),
                source: e.into(),
            })?;

            debug!(count = page.names.len(), "listed blob page");
            keys.extend(page.names);

            match page.next_marker {
                Some(m) => marker = Some(m),
                None => break,
            }
        }

        Ok(keys)
    }

    async fn fetch(&self, key: &str) -> Result<Bytes, SyncError> {
        let url = self.blob_url(key);
        let bytes = async {
            Ok::<_, anyhow::Error>(
                self.client
                    .get(&url)
                    .send()
                    .await?
                    .error_for_status()?
                    .bytes()
                    .await?,
            )
        }
        .await
        .map_err(|e| SyncError::Fetch {
            key: key.to_string(),
            source: e.into(),
        })?;
        Ok(bytes)
    }
}

/// One page of a List Blobs response.
pub struct ListPage {
    pub names: Vec<String>,
    pub next_marker: Option<String>,
}

/// Pulls `<Blob><Name>` values and the `<NextMarker>` out of a List Blobs
/// XML body.
pub fn parse_list_page(xml: &str) -> Result<ListPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut names = Vec::new();
    let mut next_marker = None;
    let mut in_blob = false;
    let mut current: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"Blob" => in_blob = true,
                b"Name" if in_blob => current = Some("name"),
                b"NextMarker" => current = Some("marker"),
                _ => {}
            },
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"Blob" => in_blob = false,
                b"Name" | b"NextMarker" => current = None,
                _ => {}
            },
            Ok(Event::Text(t)) => {
                let text = t.unescape()?.into_owned();
                match current {
                    Some("name") => names.push(text),
                    Some("marker") if !text.is_empty() => next_marker = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(anyhow!("malformed List Blobs response: {e}")),
        }
    }

    Ok(ListPage { names, next_marker })
}
