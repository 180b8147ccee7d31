use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{RetrievalBackend, RetrievalQuery};
use crate::{
   error::{Error, Result},
   types::{Filters, RetrievedFragment, SearchMode},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Remote index service speaking `POST {endpoint}/search`.
pub struct HttpBackend {
   client:   reqwest::Client,
   base_url: String,
}

impl HttpBackend {
   pub fn new(endpoint: &str) -> Result<Self> {
      let client = reqwest::Client::builder()
         .connect_timeout(CONNECT_TIMEOUT)
         .build()?;
      Ok(Self { client, base_url: endpoint.trim_end_matches('/').to_string() })
   }

   pub fn search_url(&self) -> String {
      format!("{}/search", self.base_url)
   }
}

fn unavailable(err: &reqwest::Error) -> bool {
   err.is_connect() || err.is_timeout()
}

#[async_trait::async_trait]
impl RetrievalBackend for HttpBackend {
   fn name(&self) -> &'static str {
      "http"
   }

   async fn search(&self, query: RetrievalQuery<'_>) -> Result<Vec<RetrievedFragment>> {
      #[derive(Serialize)]
      struct SearchRequest<'a> {
         query:       &'a str,
         top_k:       usize,
         search_type: SearchMode,
         filters:     &'a Filters,
      }

      #[derive(Deserialize)]
      struct SearchReply {
         results: Vec<RetrievedFragment>,
      }

      let response = self
         .client
         .post(self.search_url())
         .json(&SearchRequest {
            query:       query.text,
            top_k:       query.top_k,
            search_type: query.mode,
            filters:     query.filters,
         })
         .send()
         .await
         .map_err(|e| {
            if unavailable(&e) {
               Error::BackendUnavailable(e.to_string())
            } else {
               Error::Http(e)
            }
         })?;

      let status = response.status();
      if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
         return Err(Error::BackendUnavailable(format!("{} returned 503", self.base_url)));
      }
      if !status.is_success() {
         return Err(Error::Backend { backend: self.name(), reason: format!("status {status}") });
      }

      let reply: SearchReply = response
         .json()
         .await
         .map_err(|e| Error::Backend { backend: self.name(), reason: e.to_string() })?;
      Ok(reply.results)
   }
}
