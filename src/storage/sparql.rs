use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;

use crate::cli::config::StoreSettings;
use crate::error::StoreError;
use crate::storage::query::{ReadQuery, UpdateQuery};
use crate::storage::results::QueryResult;
use crate::storage::{Scope, StoreBackend};

/// Header that lifts mu-authorization checks for system scope queries
const SUDO_HEADER: &str = "mu-auth-sudo";

const RESULTS_JSON: &str = "application/sparql-results+json";

/// SPARQL 1.1 protocol backend over HTTP
pub struct SparqlBackend {
    client: Client,
    query_endpoint: String,
    update_endpoint: String,
    graph: String,
}

impl SparqlBackend {
    pub fn new(settings: &StoreSettings) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| StoreError::Backend(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            query_endpoint: settings.query_endpoint.clone(),
            update_endpoint: settings.update_endpoint.clone(),
            graph: settings.graph.clone(),
        })
    }

    fn scoped(request: RequestBuilder, scope: Scope) -> RequestBuilder {
        match scope {
            Scope::Dataset => request,
            Scope::System => request.header(SUDO_HEADER, "true"),
        }
    }

    async fn body(endpoint: &str, response: Response) -> Result<String, StoreError> {
        let status = response.status();
        let body = response.text().await.map_err(|source| StoreError::Http {
            endpoint: endpoint.to_string(),
            source,
        })?;

        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl StoreBackend for SparqlBackend {
    async fn query(&self, query: &ReadQuery, scope: Scope) -> Result<QueryResult, StoreError> {
        let sparql = query.to_sparql(&self.graph);
        debug!("Executing {} query:\n{}", query.kind(), sparql);

        let request = self
            .client
            .post(&self.query_endpoint)
            .header(header::ACCEPT, RESULTS_JSON)
            .form(&[("query", sparql.as_str())]);

        let response = Self::scoped(request, scope)
            .send()
            .await
            .map_err(|source| StoreError::Http {
                endpoint: self.query_endpoint.clone(),
                source,
            })?;

        let body = Self::body(&self.query_endpoint, response).await?;
        QueryResult::from_json(&body)
    }

    async fn update(&self, update: &UpdateQuery, scope: Scope) -> Result<(), StoreError> {
        let sparql = update.to_sparql(&self.graph);
        debug!("Executing {} update:\n{}", update.kind(), sparql);

        let request = self
            .client
            .post(&self.update_endpoint)
            .header(header::ACCEPT, RESULTS_JSON)
            .form(&[("update", sparql.as_str())]);

        let response = Self::scoped(request, scope)
            .send()
            .await
            .map_err(|source| StoreError::Http {
                endpoint: self.update_endpoint.clone(),
                source,
            })?;

        Self::body(&self.update_endpoint, response).await?;
        Ok(())
    }
}
