use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::Value;

use crate::dao::{
    kv_store::{KvStore, Revision, SwapResult, Versioned},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{CouchRecordDocument, RevisionOnly, WriteResponse, doc_id},
};

const MAX_REMOVE_ATTEMPTS: u32 = 5;

/// [`KvStore`] backed by CouchDB, using document `_rev` values as revisions.
///
/// CouchDB rejects a write whose `_rev` is not the document's current one with
/// `409 Conflict`, which is exactly the compare-and-swap contract.
#[derive(Clone)]
pub struct CouchKvStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchKvStore {
    /// Establish a connection to CouchDB and ensure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let base_url = Arc::<str>::from(config.base_url.trim_end_matches('/'));
        let database = Arc::<str>::from(config.database);
        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let store = Self {
            client,
            base_url,
            database,
            auth,
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn document_url(&self, key: &str) -> CouchResult<Url> {
        let mut url = self.database_url()?;
        url.path_segments_mut()
            .map_err(|_| CouchDaoError::RequestStatus {
                path: key.to_string(),
                status: StatusCode::BAD_REQUEST,
            })?
            .push(&doc_id(key));
        Ok(url)
    }

    fn database_url(&self) -> CouchResult<Url> {
        let mut url =
            Url::parse(&self.base_url).map_err(|_| CouchDaoError::DatabaseStatus {
                database: self.database.to_string(),
                status: StatusCode::BAD_REQUEST,
            })?;
        url.path_segments_mut()
            .map_err(|_| CouchDaoError::DatabaseStatus {
                database: self.database.to_string(),
                status: StatusCode::BAD_REQUEST,
            })?
            .pop_if_empty()
            .push(&self.database);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        if let Some((ref user, ref pass)) = self.auth {
            builder.basic_auth(user.as_ref(), Some(pass.as_ref()))
        } else {
            builder
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url()?;

        let response = self
            .request(Method::GET, url.clone())
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .request(Method::PUT, url)
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means another instance created it in the meantime.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn read(&self, key: &str) -> CouchResult<Option<CouchRecordDocument>> {
        let url = self.document_url(key)?;
        let response = self
            .request(Method::GET, url)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: key.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchRecordDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: key.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: key.to_string(),
                status: other,
            }),
        }
    }

    async fn put(
        &self,
        key: &str,
        expected: Option<Revision>,
        value: Value,
    ) -> CouchResult<SwapResult> {
        let url = self.document_url(key)?;
        let document = CouchRecordDocument {
            id: doc_id(key),
            rev: expected.map(|rev| rev.0),
            value,
        };

        let response = self
            .request(Method::PUT, url)
            .json(&document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: key.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::CONFLICT => Ok(SwapResult::Conflict),
            status if status.is_success() => {
                let written = response.json::<WriteResponse>().await.map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: key.to_string(),
                        source,
                    }
                })?;
                Ok(SwapResult::Swapped(Some(Revision(written.rev))))
            }
            other => Err(CouchDaoError::RequestStatus {
                path: key.to_string(),
                status: other,
            }),
        }
    }

    async fn delete(&self, key: &str, rev: &Revision) -> CouchResult<SwapResult> {
        let url = self.document_url(key)?;
        let response = self
            .request(Method::DELETE, url)
            .query(&[("rev", rev.0.as_str())])
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: key.to_string(),
                source,
            })?;

        match response.status() {
            // A concurrent delete also invalidates our view of the document.
            StatusCode::CONFLICT | StatusCode::NOT_FOUND => Ok(SwapResult::Conflict),
            status if status.is_success() => Ok(SwapResult::Swapped(None)),
            other => Err(CouchDaoError::RequestStatus {
                path: key.to_string(),
                status: other,
            }),
        }
    }

    async fn swap(
        &self,
        key: &str,
        expected: Option<Revision>,
        next: Option<Value>,
    ) -> CouchResult<SwapResult> {
        match (expected, next) {
            (expected, Some(value)) => self.put(key, expected, value).await,
            (Some(rev), None) => self.delete(key, &rev).await,
            (None, None) => match self.read(key).await? {
                None => Ok(SwapResult::Swapped(None)),
                Some(_) => Ok(SwapResult::Conflict),
            },
        }
    }

    async fn remove_any(&self, key: &str) -> CouchResult<()> {
        for _ in 0..MAX_REMOVE_ATTEMPTS {
            let url = self.document_url(key)?;
            let response = self
                .request(Method::GET, url)
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: key.to_string(),
                    source,
                })?;

            let rev = match response.status() {
                StatusCode::NOT_FOUND => return Ok(()),
                status if status.is_success() => {
                    response.json::<RevisionOnly>().await.map_err(|source| {
                        CouchDaoError::DecodeResponse {
                            path: key.to_string(),
                            source,
                        }
                    })?
                }
                other => {
                    return Err(CouchDaoError::RequestStatus {
                        path: key.to_string(),
                        status: other,
                    });
                }
            };

            if let SwapResult::Swapped(_) = self.delete(key, &Revision(rev.rev)).await? {
                return Ok(());
            }
        }

        Err(CouchDaoError::RemoveContended {
            path: key.to_string(),
            attempts: MAX_REMOVE_ATTEMPTS,
        })
    }
}

impl KvStore for CouchKvStore {
    fn get(&self, key: &str) -> BoxFuture<'static, StorageResult<Option<Versioned>>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move {
            let maybe_doc = store.read(&key).await?;
            Ok(maybe_doc.and_then(|doc| {
                doc.rev.map(|rev| Versioned {
                    revision: Revision(rev),
                    value: doc.value,
                })
            }))
        })
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Revision>,
        next: Option<Value>,
    ) -> BoxFuture<'static, StorageResult<SwapResult>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { store.swap(&key, expected, next).await.map_err(Into::into) })
    }

    fn remove(&self, key: &str) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let key = key.to_string();
        Box::pin(async move { store.remove_any(&key).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url()?;
            let path = url.to_string();
            let response = store
                .request(Method::GET, url)
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: path.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path,
                    status: response.status(),
                }
                .into())
            }
        })
    }
}
