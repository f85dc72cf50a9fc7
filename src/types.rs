//! Core types for the eero test-case generator
//!
//! Everything that flows between the detector, the template store, the
//! selector and the orchestrator lives here:
//! - classification enums decoded from file names and rule rows
//! - step records parsed out of template files
//! - requirements and the documents delivered for them

use serde::{Deserialize, Serialize};

/// Customer segment of an account
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum CustomerType {
    #[serde(rename = "RESI")]
    Residential,
    #[serde(rename = "BUSI")]
    Business,
}

/// Whether the order is a fresh install or a change of service
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ScenarioType {
    #[serde(rename = "install")]
    Install,
    #[serde(rename = "cos")]
    ChangeOfService,
}

/// Whether a technician visit is part of the order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TruckRoll {
    #[serde(rename = "With")]
    Required,
    #[serde(rename = "No")]
    NotRequired,
}

/// Tier of the mesh service a request is about, used as a selection hint
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductVariant {
    #[default]
    Base,
    /// eero Plus / Secure
    Premium,
    /// Additional devices, mesh
    MultiDevice,
}

/// Account state a combination rule targets
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    New,
    ExistingHsd,
    ExistingHsdEero,
    ExistingHsdEeroPlus,
    ExistingHsdEeroAdditional,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
}

/// One numbered step of a test document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub number: u32,
    pub action: String,
    pub expected_result: Option<String>,
}

/// A stored test document usable as a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub title: String,
    pub customer_type: CustomerType,
    pub scenario_type: ScenarioType,
    pub truck_roll: TruckRoll,
    pub customer_status: CustomerStatus,
    pub content: String,
    pub steps: Vec<StepRecord>,
    /// Produced during this or an earlier run rather than authored by QA
    #[serde(default)]
    pub is_generated: bool,
    #[serde(default)]
    pub template_sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_reasoning: Option<String>,
}

/// A request for `count_needed` documents of one shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    /// Grouping key, e.g. `BUSI-cos-NoTruck`
    pub key: String,
    pub customer_type: CustomerType,
    pub scenario_type: ScenarioType,
    pub truck_roll: TruckRoll,
    pub count_needed: u32,
    pub priority: Priority,
    pub combination_id: Option<u16>,
    pub variant: Option<String>,
    pub service_code: Option<String>,
    pub customer_status: Option<CustomerStatus>,
    pub description: String,
    /// Rule description of the first grouped combination
    pub exact_description: String,
    pub match_score: f64,
    pub combination_ids: Vec<u16>,
}

/// Where a delivered document came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Taken unchanged from the template library
    Retrieved,
    /// Rewritten by the LLM adapter
    Generated,
    /// Rewritten locally after the adapter failed
    HeuristicFallback,
}

/// A document handed back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredDocument {
    pub id: String,
    pub title: String,
    pub customer_type: CustomerType,
    pub scenario_type: ScenarioType,
    pub truck_roll: TruckRoll,
    pub customer_status: CustomerStatus,
    pub steps: Vec<StepRecord>,
    pub content: String,
    pub origin: Origin,
    pub template_sources: Vec<String>,
    pub generation_reasoning: Option<String>,
    pub requirement_key: String,
}

impl CustomerType {
    pub fn code(&self) -> &'static str {
        match self {
            CustomerType::Residential => "RESI",
            CustomerType::Business => "BUSI",
        }
    }

    /// Wording used inside test documents
    pub fn wording(&self) -> &'static str {
        match self {
            CustomerType::Residential => "Residential",
            CustomerType::Business => "Commercial",
        }
    }
}

impl ScenarioType {
    pub fn code(&self) -> &'static str {
        match self {
            ScenarioType::Install => "install",
            ScenarioType::ChangeOfService => "cos",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScenarioType::Install => "Install",
            ScenarioType::ChangeOfService => "CoS",
        }
    }

    /// Truck roll assumed when a file name carries no explicit marker
    pub fn default_truck_roll(&self) -> TruckRoll {
        match self {
            ScenarioType::Install => TruckRoll::Required,
            ScenarioType::ChangeOfService => TruckRoll::NotRequired,
        }
    }

    pub fn default_customer_status(&self) -> CustomerStatus {
        match self {
            ScenarioType::Install => CustomerStatus::New,
            ScenarioType::ChangeOfService => CustomerStatus::ExistingHsd,
        }
    }
}

impl TruckRoll {
    pub fn label(&self) -> &'static str {
        match self {
            TruckRoll::Required => "With",
            TruckRoll::NotRequired => "No",
        }
    }
}

impl ProductVariant {
    /// Product tier implied by free text; premium wins over multi-device
    pub fn detect(text: &str) -> Self {
        let lower = text.to_lowercase();
        if ["plus", "secure", "premium", "enhanced"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            ProductVariant::Premium
        } else if ["multiple", "additional", "mesh", "more than one"]
            .iter()
            .any(|kw| lower.contains(kw))
        {
            ProductVariant::MultiDevice
        } else {
            ProductVariant::Base
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProductVariant::Base => "base",
            ProductVariant::Premium => "premium",
            ProductVariant::MultiDevice => "multi-device",
        }
    }
}

impl CustomerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CustomerStatus::New => "new",
            CustomerStatus::ExistingHsd => "existing_hsd",
            CustomerStatus::ExistingHsdEero => "existing_hsd_eero",
            CustomerStatus::ExistingHsdEeroPlus => "existing_hsd_eero_plus",
            CustomerStatus::ExistingHsdEeroAdditional => "existing_hsd_eero_additional",
        }
    }
}

impl Template {
    /// Usable as a selection candidate: has steps and real content
    pub fn is_matchable(&self) -> bool {
        !self.steps.is_empty() && self.content.trim().len() > 20
    }

    /// `RESI-cos-NoTruck` style key shared with requirements
    pub fn shape_key(&self) -> String {
        shape_key(self.customer_type, self.scenario_type, self.truck_roll)
    }
}

impl Requirement {
    pub fn shape_key(&self) -> String {
        shape_key(self.customer_type, self.scenario_type, self.truck_roll)
    }
}

pub fn shape_key(customer: CustomerType, scenario: ScenarioType, truck: TruckRoll) -> String {
    format!("{}-{}-{}Truck", customer.code(), scenario.code(), truck.label())
}

impl DeliveredDocument {
    pub fn from_template(template: &Template, origin: Origin, requirement_key: &str) -> Self {
        Self {
            id: template.id.clone(),
            title: template.title.clone(),
            customer_type: template.customer_type,
            scenario_type: template.scenario_type,
            truck_roll: template.truck_roll,
            customer_status: template.customer_status,
            steps: template.steps.clone(),
            content: template.content.clone(),
            origin,
            template_sources: template.template_sources.clone(),
            generation_reasoning: template.generation_reasoning.clone(),
            requirement_key: requirement_key.to_string(),
        }
    }
}

impl Origin {
    pub fn tag(&self) -> &'static str {
        match self {
            Origin::Retrieved => "[RET]",
            Origin::Generated => "[GEN]",
            Origin::HeuristicFallback => "[FBK]",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Origin::Retrieved => "RETRIEVED",
            Origin::Generated => "GENERATED",
            Origin::HeuristicFallback => "FALLBACK",
        }
    }
}
