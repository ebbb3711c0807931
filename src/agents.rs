//! Agent directory
//!
//! The agent list is fetched fresh every time a view needs it. A failed
//! fetch degrades to an empty listing that disables submission until the
//! caller retries.

use crate::api::types::Agent;
use crate::api::ApiClient;
use crate::error::{AionError, Result};
use crate::session::RequestContext;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct AgentDirectory {
    api: ApiClient,
    ctx: RequestContext,
}

/// What a submission form needs to render its agent picker
#[derive(Debug, Clone, Default)]
pub struct AgentListing {
    pub agents: Vec<Agent>,
    /// Why the list is empty, when the fetch failed
    pub error: Option<AionError>,
}

impl AgentListing {
    /// Submission is possible only with a successfully fetched, non-empty list
    pub fn can_submit(&self) -> bool {
        self.error.is_none() && !self.agents.is_empty()
    }

    /// Agent preselected in the form
    pub fn default_selection(&self) -> Option<&str> {
        self.agents.first().map(|a| a.id.as_str())
    }

    pub fn find(&self, id_or_name: &str) -> Option<&Agent> {
        self.agents
            .iter()
            .find(|a| a.id == id_or_name)
            .or_else(|| {
                self.agents
                    .iter()
                    .find(|a| a.name.eq_ignore_ascii_case(id_or_name))
            })
    }
}

impl AgentDirectory {
    pub fn new(api: ApiClient, ctx: RequestContext) -> Self {
        Self { api, ctx }
    }

    /// One `GET /agents`, no caching
    pub async fn list_agents(&self) -> Result<Vec<Agent>> {
        let agents = self.api.list_agents(&self.ctx).await?;
        debug!("Fetched {} agents", agents.len());
        Ok(agents)
    }

    /// Like [`list_agents`](Self::list_agents) but never fails
    pub async fn fetch(&self) -> AgentListing {
        match self.list_agents().await {
            Ok(agents) => AgentListing {
                agents,
                error: None,
            },
            Err(e) => {
                warn!("Failed to load agents: {}", e);
                AgentListing {
                    agents: Vec::new(),
                    error: Some(e),
                }
            }
        }
    }
}
