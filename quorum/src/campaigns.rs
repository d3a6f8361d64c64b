//! Campaigns — multi-step autonomous work tracking
//!
//! A campaign owns an ordered list of objectives and the skills promoted
//! while pursuing them. Progress is derived from objective completion.
//! State is held in memory with an optional JSON snapshot on disk.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Lifecycle status of an objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Lifecycle status of a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Failed,
}

/// One step of a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Objective {
    pub id: String,
    pub description: String,
    pub status: ObjectiveStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub assigned_skills: Vec<String>,
    /// Fractional progress, 0.0 to 1.0
    #[serde(default)]
    pub progress: f64,
}

/// Derived progress summary for a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub overall: f64,
    pub objectives_completed: usize,
    pub skills_created: usize,
}

/// A goal pursued across multiple objectives and promoted skills
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub objectives: Vec<Objective>,
    pub skills_generated: Vec<String>,
}

impl Campaign {
    /// Derived progress: completed objectives over total
    pub fn progress(&self) -> CampaignProgress {
        let total = self.objectives.len();
        let completed = self
            .objectives
            .iter()
            .filter(|o| o.status == ObjectiveStatus::Completed)
            .count();
        CampaignProgress {
            overall: if total == 0 {
                0.0
            } else {
                completed as f64 / total as f64
            },
            objectives_completed: completed,
            skills_created: self.skills_generated.len(),
        }
    }
}

/// Error type for campaign operations
#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Objective not found: {0}")]
    ObjectiveNotFound(String),
}

/// Result type for campaign operations
pub type CampaignResult<T> = Result<T, CampaignError>;

/// In-memory campaign manager with optional snapshot persistence
pub struct CampaignManager {
    campaigns: RwLock<BTreeMap<String, Campaign>>,
    snapshot_path: Option<PathBuf>,
}

impl CampaignManager {
    pub fn new(snapshot_path: Option<PathBuf>) -> Self {
        let manager = Self {
            campaigns: RwLock::new(BTreeMap::new()),
            snapshot_path,
        };
        manager.load_snapshot();
        manager
    }

    /// Create a campaign; an initial request becomes its first objective
    pub fn create_campaign(
        &self,
        name: &str,
        description: &str,
        initial_request: Option<&str>,
    ) -> Campaign {
        let mut campaign = Campaign {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: CampaignStatus::Active,
            created_at: Utc::now(),
            objectives: Vec::new(),
            skills_generated: Vec::new(),
        };

        if let Some(request) = initial_request {
            campaign.objectives.push(new_objective(request));
        }

        let mut campaigns = self.campaigns.write().unwrap_or_else(|e| e.into_inner());
        campaigns.insert(campaign.id.clone(), campaign.clone());
        drop(campaigns);

        self.save_snapshot();
        campaign
    }

    /// Append an objective to a campaign
    pub fn add_objective(&self, campaign_id: &str, description: &str) -> CampaignResult<Objective> {
        let objective = new_objective(description);
        {
            let mut campaigns = self.campaigns.write().unwrap_or_else(|e| e.into_inner());
            let campaign = campaigns
                .get_mut(campaign_id)
                .ok_or_else(|| CampaignError::CampaignNotFound(campaign_id.to_string()))?;
            campaign.objectives.push(objective.clone());
        }
        self.save_snapshot();
        Ok(objective)
    }

    /// Update objective status and progress
    pub fn update_objective(
        &self,
        campaign_id: &str,
        objective_id: &str,
        status: ObjectiveStatus,
        progress: Option<f64>,
    ) -> CampaignResult<()> {
        {
            let mut campaigns = self.campaigns.write().unwrap_or_else(|e| e.into_inner());
            let campaign = campaigns
                .get_mut(campaign_id)
                .ok_or_else(|| CampaignError::CampaignNotFound(campaign_id.to_string()))?;
            let objective = campaign
                .objectives
                .iter_mut()
                .find(|o| o.id == objective_id)
                .ok_or_else(|| CampaignError::ObjectiveNotFound(objective_id.to_string()))?;

            objective.status = status;
            if let Some(progress) = progress {
                objective.progress = progress.clamp(0.0, 1.0);
            }
            if status == ObjectiveStatus::Completed {
                objective.completed_at = Some(Utc::now());
                objective.progress = 1.0;
            }
        }
        self.save_snapshot();
        Ok(())
    }

    /// Associate a promoted skill with a campaign
    pub fn add_skill(&self, campaign_id: &str, skill_name: &str) -> CampaignResult<()> {
        {
            let mut campaigns = self.campaigns.write().unwrap_or_else(|e| e.into_inner());
            let campaign = campaigns
                .get_mut(campaign_id)
                .ok_or_else(|| CampaignError::CampaignNotFound(campaign_id.to_string()))?;
            if !campaign.skills_generated.iter().any(|s| s == skill_name) {
                campaign.skills_generated.push(skill_name.to_string());
            }
        }
        self.save_snapshot();
        Ok(())
    }

    /// Update a campaign's status
    pub fn set_status(&self, campaign_id: &str, status: CampaignStatus) -> CampaignResult<()> {
        {
            let mut campaigns = self.campaigns.write().unwrap_or_else(|e| e.into_inner());
            let campaign = campaigns
                .get_mut(campaign_id)
                .ok_or_else(|| CampaignError::CampaignNotFound(campaign_id.to_string()))?;
            campaign.status = status;
        }
        self.save_snapshot();
        Ok(())
    }

    /// Fetch a campaign snapshot
    pub fn get(&self, campaign_id: &str) -> Option<Campaign> {
        let campaigns = self.campaigns.read().unwrap_or_else(|e| e.into_inner());
        campaigns.get(campaign_id).cloned()
    }

    /// All campaigns, newest first, optionally filtered by status
    pub fn list(&self, status: Option<CampaignStatus>) -> Vec<Campaign> {
        let campaigns = self.campaigns.read().unwrap_or_else(|e| e.into_inner());
        let mut list: Vec<Campaign> = campaigns
            .values()
            .filter(|c| status.map(|s| c.status == s).unwrap_or(true))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    fn save_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let campaigns = self.campaigns.read().unwrap_or_else(|e| e.into_inner());
        let result = serde_json::to_string_pretty(&*campaigns)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                std::fs::write(path, raw).map_err(|e| e.to_string())
            });
        if let Err(e) = result {
            warn!("Failed to snapshot campaigns: {}", e);
        }
    }

    fn load_snapshot(&self) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let Ok(raw) = std::fs::read_to_string(path) else {
            return;
        };
        match serde_json::from_str::<BTreeMap<String, Campaign>>(&raw) {
            Ok(loaded) => {
                let mut campaigns = self.campaigns.write().unwrap_or_else(|e| e.into_inner());
                *campaigns = loaded;
            }
            Err(e) => warn!("Discarding unreadable campaign snapshot: {}", e),
        }
    }
}

fn new_objective(description: &str) -> Objective {
    Objective {
        id: uuid::Uuid::new_v4().to_string(),
        description: description.to_string(),
        status: ObjectiveStatus::Pending,
        created_at: Utc::now(),
        completed_at: None,
        assigned_skills: Vec::new(),
        progress: 0.0,
    }
}
