//! Requirement Detector: user story → scored combination rules → requirements
//!
//! Three stages, all keyword heuristics over the lower-cased story text:
//!
//! 1. `analyze` pulls order types, segments, truck-roll preference and
//!    product-variant tags out of the text.
//! 2. `detect` scores every catalog rule against that analysis and keeps
//!    the ones above `MATCH_THRESHOLD`.
//! 3. `consolidate` groups detections into requirements with counts.
//!
//! The weights below are tunable policy, not a contract.

use crate::rules::{self, CombinationRule, VariantTag, SYNTHESIZED_RULE_ID};
use crate::types::{
    shape_key, CustomerStatus, CustomerType, Priority, Requirement, ScenarioType, TruckRoll,
};
use serde::Serialize;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashSet;

pub const ORDER_TYPE_WEIGHT: f64 = 0.25;
pub const SEGMENT_WEIGHT: f64 = 0.25;
pub const TRUCK_ROLL_WEIGHT: f64 = 0.2;
pub const VARIANT_EXACT_WEIGHT: f64 = 0.3;
pub const VARIANT_PARTIAL_WEIGHT: f64 = 0.15;
/// Added to removal rules when the story talks about device association
pub const ASSOCIATION_REMOVAL_BONUS: f64 = 0.4;
/// Added to non-removal change-of-service rules under the same condition
pub const ASSOCIATION_COS_BONUS: f64 = 0.2;
pub const LIFECYCLE_BUSINESS_BONUS: f64 = 0.15;

/// Detections must score strictly above this
pub const MATCH_THRESHOLD: f64 = 0.4;
pub const DEFAULT_DETECTION_SCORE: f64 = 0.5;

pub const MIN_TEST_CASES: u32 = 3;
pub const MAX_TEST_CASES: u32 = 31;

const INSTALL_KEYWORDS: &[&str] = &["install", "new customer", "first time", "setup"];
const COS_KEYWORDS: &[&str] = &["change", "modify", "add", "remove", "upgrade", "existing", "cos"];
const RESIDENTIAL_KEYWORDS: &[&str] = &["residential", "resi", "home"];
const BUSINESS_KEYWORDS: &[&str] = &["business", "commercial", "busi"];
const NO_TRUCK_KEYWORDS: &[&str] = &["no truck", "self install", "without technician"];
const WITH_TRUCK_KEYWORDS: &[&str] = &["truck roll", "technician", "installation visit"];
const ASSOCIATION_KEYWORDS: &[&str] = &[
    "association",
    "associate",
    "binding",
    "bind",
    "device management",
    "account-to-device",
    "partner account",
];
const PREMIUM_KEYWORDS: &[&str] = &["plus", "premium", "enhanced"];
const MULTI_DEVICE_KEYWORDS: &[&str] = &["additional", "multiple", "mesh", "more than one"];
const REMOVAL_KEYWORDS: &[&str] = &["remove", "delete"];
const BASE_KEYWORDS: &[&str] = &["basic", "standard"];

const FULL_COVERAGE_KEYWORDS: &[&str] = &[
    "comprehensive",
    "complete",
    "all scenarios",
    "full coverage",
    "entire workflow",
    "end-to-end",
    "all combinations",
    "thorough testing",
    "complete validation",
    "all test cases",
    "complete test suite",
    "exhaustive",
    "full suite",
];
const ASSOCIATION_PROCESS_KEYWORDS: &[&str] = &[
    "association process",
    "retrieve orders",
    "account to device",
    "partner account id",
    "eero cloud",
    "customer account",
    "device association",
    "process built",
    "cable one to eero",
    "association",
    "comprehensive device testing",
];
const CRITICALITY_KEYWORDS: &[&str] = &[
    "critical",
    "important",
    "priority",
    "business critical",
    "production",
    "essential",
    "mandatory",
    "required",
    "compliance",
    "validation",
];
const DEVICE_REMOVAL_KEYWORDS: &[&str] = &[
    "device removal",
    "remove device",
    "device lifecycle",
    "gateway removal",
    "service removal",
    "equipment removal",
];

fn mentions(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TruckRollPreference {
    Both,
    With,
    No,
}

impl TruckRollPreference {
    fn accepts(&self, truck: TruckRoll) -> bool {
        match self {
            TruckRollPreference::Both => true,
            TruckRollPreference::With => truck == TruckRoll::Required,
            TruckRollPreference::No => truck == TruckRoll::NotRequired,
        }
    }
}

/// What the story text implies
#[derive(Debug, Clone, Serialize)]
pub struct StoryAnalysis {
    pub order_types: Vec<ScenarioType>,
    pub segments: Vec<CustomerType>,
    pub truck_roll_preference: TruckRollPreference,
    pub variants: Vec<VariantTag>,
    pub specific_scenarios: Vec<&'static str>,
    pub device_lifecycle_required: bool,
    pub association_process_detected: bool,
}

impl StoryAnalysis {
    pub fn distinct_variants(&self) -> usize {
        self.variants.iter().collect::<HashSet<_>>().len()
    }
}

/// A catalog rule paired with how well the story matches it
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub rule: CombinationRule,
    pub score: f64,
    pub service_code: &'static str,
}

/// Extract order types, segments, truck roll and variants from story text
pub fn analyze(text: &str) -> StoryAnalysis {
    let story = text.to_lowercase();

    let mut order_types = Vec::new();
    if mentions(&story, INSTALL_KEYWORDS) {
        order_types.push(ScenarioType::Install);
    }
    if mentions(&story, COS_KEYWORDS) {
        order_types.push(ScenarioType::ChangeOfService);
    }
    if order_types.is_empty() {
        order_types = vec![ScenarioType::Install, ScenarioType::ChangeOfService];
    }

    let mut segments = Vec::new();
    if mentions(&story, RESIDENTIAL_KEYWORDS) {
        segments.push(CustomerType::Residential);
    }
    if mentions(&story, BUSINESS_KEYWORDS) {
        segments.push(CustomerType::Business);
    }
    if segments.is_empty() {
        segments = vec![CustomerType::Residential, CustomerType::Business];
    }

    let truck_roll_preference = if mentions(&story, NO_TRUCK_KEYWORDS) {
        TruckRollPreference::No
    } else if mentions(&story, WITH_TRUCK_KEYWORDS) {
        TruckRollPreference::With
    } else {
        TruckRollPreference::Both
    };

    let association = mentions(&story, ASSOCIATION_KEYWORDS);
    let mut specific_scenarios = Vec::new();
    if association {
        specific_scenarios.extend(["device_association", "device_removal", "lifecycle_management"]);
    }

    let mut variants = Vec::new();
    if mentions(&story, PREMIUM_KEYWORDS) {
        variants.extend([VariantTag::EeroPlus, VariantTag::AddEeroPlus]);
    }
    if mentions(&story, MULTI_DEVICE_KEYWORDS) {
        variants.extend([VariantTag::EeroAdditional, VariantTag::AddAdditional]);
    }
    if mentions(&story, REMOVAL_KEYWORDS) {
        variants.extend([
            VariantTag::RemoveEero,
            VariantTag::RemoveDeviceNotGateway,
            VariantTag::RemoveDeviceGateway,
        ]);
    }
    if mentions(&story, BASE_KEYWORDS) || variants.is_empty() {
        variants.extend([VariantTag::Eero, VariantTag::AddEero]);
    }
    if association {
        // Association stories need the whole device lifecycle, removals included
        variants.extend([
            VariantTag::RemoveDeviceNotGateway,
            VariantTag::RemoveDeviceGateway,
            VariantTag::RemoveEeroAlongDevice,
        ]);
    }

    StoryAnalysis {
        order_types,
        segments,
        truck_roll_preference,
        variants,
        specific_scenarios,
        device_lifecycle_required: association,
        association_process_detected: association,
    }
}

/// Number of test cases a story needs when the caller gave none
pub fn count(text: &str) -> u32 {
    infer_count(text, &analyze(text))
}

pub fn infer_count(text: &str, analysis: &StoryAnalysis) -> u32 {
    let story = text.to_lowercase();

    if mentions(&story, FULL_COVERAGE_KEYWORDS) {
        tracing::debug!("Full coverage vocabulary, using {} test cases", MAX_TEST_CASES);
        return MAX_TEST_CASES;
    }
    if mentions(&story, ASSOCIATION_PROCESS_KEYWORDS) {
        tracing::debug!("Association process vocabulary, using {} test cases", MAX_TEST_CASES);
        return MAX_TEST_CASES;
    }

    let score = complexity_score(&story, analysis);
    let count = match score {
        s if s >= 15 => s.clamp(20, MAX_TEST_CASES),
        s if s >= 12 => s.clamp(10, 15),
        s if s >= 8 => s.clamp(6, 12),
        s if s >= 5 => s.clamp(4, 8),
        s => s.max(MIN_TEST_CASES),
    };
    tracing::debug!("Complexity score {} → {} test cases", score, count);
    count
}

fn complexity_score(story: &str, analysis: &StoryAnalysis) -> u32 {
    let mut score = 0;

    score += if analysis.segments.len() >= 2 { 3 } else { 1 };
    score += if analysis.order_types.len() >= 2 { 3 } else { 1 };

    if analysis.device_lifecycle_required {
        score += 4;
    }
    if analysis.association_process_detected {
        score += 3;
    }

    score += match analysis.distinct_variants() {
        n if n >= 4 => 3,
        n if n >= 2 => 2,
        _ => 1,
    };

    if mentions(story, CRITICALITY_KEYWORDS) {
        score += 2;
    }
    if mentions(story, DEVICE_REMOVAL_KEYWORDS) {
        score += 2;
    }

    score
}

/// Weighted match of one rule against a story analysis
pub fn match_score(rule: &CombinationRule, analysis: &StoryAnalysis) -> f64 {
    let mut score = 0.0;

    if analysis.order_types.contains(&rule.order_type) {
        score += ORDER_TYPE_WEIGHT;
    }
    if analysis.segments.contains(&rule.segment) {
        score += SEGMENT_WEIGHT;
    }
    if analysis.truck_roll_preference.accepts(rule.truck_roll) {
        score += TRUCK_ROLL_WEIGHT;
    }

    let tag = rule.variant.as_str();
    if analysis.variants.contains(&rule.variant) {
        score += VARIANT_EXACT_WEIGHT;
    } else if analysis.variants.iter().any(|v| tag.contains(v.as_str())) {
        score += VARIANT_PARTIAL_WEIGHT;
    }

    if analysis.association_process_detected {
        if rule.variant.is_removal() {
            score += ASSOCIATION_REMOVAL_BONUS;
        } else if rule.order_type == ScenarioType::ChangeOfService {
            score += ASSOCIATION_COS_BONUS;
        }
    }

    if analysis.device_lifecycle_required && rule.segment == CustomerType::Business {
        score += LIFECYCLE_BUSINESS_BONUS;
    }

    score
}

/// Score every catalog rule against the story
///
/// Returns at most twice the requested (or inferred) count so the
/// consolidator has room to choose.
pub fn detect(text: &str, requested_count: Option<u32>) -> Vec<Detection> {
    let analysis = analyze(text);
    let count = requested_count.unwrap_or_else(|| infer_count(text, &analysis));
    detect_with(&analysis, count)
}

pub fn detect_with(analysis: &StoryAnalysis, count: u32) -> Vec<Detection> {
    let mut detections: Vec<Detection> = rules::rules()
        .iter()
        .filter_map(|rule| {
            let score = match_score(rule, analysis);
            (score > MATCH_THRESHOLD).then(|| Detection {
                rule: rule.clone(),
                score,
                service_code: rules::service_code_for(rule),
            })
        })
        .collect();

    detections.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.rule
                    .is_missing_priority()
                    .cmp(&a.rule.is_missing_priority())
            })
    });

    if detections.is_empty() {
        tracing::info!("No catalog rule cleared {}, synthesizing defaults", MATCH_THRESHOLD);
        detections = default_detections(analysis, count);
    }

    detections.truncate((count as usize).saturating_mul(2));
    tracing::info!("Detected {} matching combinations", detections.len());
    detections
}

/// Order types x segments x {eero, eero_plus}, truncated to `count`
pub fn default_detections(analysis: &StoryAnalysis, count: u32) -> Vec<Detection> {
    let mut defaults = Vec::new();

    for &order_type in &analysis.order_types {
        for &segment in &analysis.segments {
            for variant in [VariantTag::Eero, VariantTag::EeroPlus] {
                defaults.push(Detection {
                    rule: CombinationRule {
                        id: SYNTHESIZED_RULE_ID,
                        order_type,
                        customer_status: order_type.default_customer_status(),
                        segment,
                        truck_roll: TruckRoll::Required,
                        variant,
                        description: Cow::Owned(format!(
                            "Default {} {} {}",
                            order_type.code(),
                            segment.code(),
                            variant.as_str()
                        )),
                    },
                    score: DEFAULT_DETECTION_SCORE,
                    service_code: variant.service_code(),
                });
            }
        }
    }

    defaults.truncate(count as usize);
    defaults
}

/// Grouping key; the missing-priority rules get a key of their own
fn group_key(rule: &CombinationRule) -> String {
    let base = shape_key(rule.segment, rule.order_type, rule.truck_roll);
    if !rule.is_missing_priority() {
        return base;
    }

    let scenario = match rule.variant {
        VariantTag::RemoveDeviceNotGateway => {
            Cow::Borrowed("WithAdditionalEeroBusinessRemoveDeviceGatewayNo")
        }
        VariantTag::RemoveDeviceGateway => {
            Cow::Borrowed("WithAdditionalEeroBusinessRemoveDeviceGatewayYes")
        }
        VariantTag::RemoveEeroAlongDevice | VariantTag::RemoveEeroServiceDevice => {
            Cow::Borrowed("WithAdditionalEeroBusinessRemoveEeroServiceDevice")
        }
        other => Cow::Owned(format!("Rule{}{}", rule.id, camel_case(other.as_str()))),
    };
    format!("{}-{}", base, scenario)
}

fn camel_case(tag: &str) -> String {
    tag.split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// Group detections into requirements
///
/// Groups keep first-seen order, then missing-priority groups move to the
/// front so truncation never drops them.
pub fn consolidate(detections: &[Detection]) -> Vec<Requirement> {
    let mut groups: Vec<(String, Vec<&Detection>)> = Vec::new();

    for detection in detections {
        let key = group_key(&detection.rule);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(detection),
            None => groups.push((key, vec![detection])),
        }
    }

    let mut requirements: Vec<Requirement> = groups
        .into_iter()
        .map(|(key, members)| {
            let first = members[0];
            let rule = &first.rule;
            let priority = if rule.is_missing_priority() {
                Priority::High
            } else {
                Priority::Normal
            };

            Requirement {
                customer_type: rule.segment,
                scenario_type: rule.order_type,
                truck_roll: rule.truck_roll,
                count_needed: members.len() as u32,
                priority,
                combination_id: Some(rule.id),
                variant: Some(rule.variant.as_str().to_string()),
                service_code: Some(first.service_code.to_string()),
                customer_status: Some(rule.customer_status),
                description: format!("Consolidated: {} combinations for {}", members.len(), key),
                exact_description: rule.description.to_string(),
                match_score: first.score,
                combination_ids: members.iter().map(|d| d.rule.id).collect(),
                key,
            }
        })
        .collect();

    requirements.sort_by_key(|r| r.priority);

    tracing::info!(
        "Requirement consolidation: {} combinations → {} requirements",
        detections.len(),
        requirements.len()
    );
    for req in &requirements {
        tracing::debug!("  {}: need {}", req.key, req.count_needed);
    }

    requirements
}

/// Move requirement counts toward `target`
///
/// A shortfall is handed out at most two at a time per requirement, in
/// order; an excess is trimmed while keeping every requirement at one.
pub fn balance_counts(requirements: &mut [Requirement], target: u32) {
    if requirements.is_empty() {
        return;
    }

    let total: u32 = requirements.iter().map(|r| r.count_needed).sum();
    match total.cmp(&target) {
        Ordering::Equal => {}
        Ordering::Less => {
            let mut deficit = target - total;
            while deficit > 0 {
                for req in requirements.iter_mut() {
                    if deficit == 0 {
                        break;
                    }
                    let extra = deficit.min(2);
                    req.count_needed += extra;
                    deficit -= extra;
                }
            }
        }
        Ordering::Greater => {
            let mut excess = total - target;
            for req in requirements.iter_mut().rev() {
                if excess == 0 {
                    break;
                }
                let reduction = excess.min(req.count_needed.saturating_sub(1));
                req.count_needed -= reduction;
                excess -= reduction;
            }
        }
    }
}

/// Dual-scenario plan used when detection produced no requirement at all
pub fn fallback_requirements(text: &str, count: u32) -> Vec<Requirement> {
    let story = text.to_lowercase();

    let mut needs_install = !mentions(
        &story,
        &["only existing", "existing customers only", "current customers only"],
    );
    let mut needs_cos = !mentions(&story, &["only new", "new customers only", "first time only"]);
    if mentions(
        &story,
        &[
            "eero association process",
            "association process",
            "device setup",
            "account linking",
            "process built",
            "enable association",
        ],
    ) {
        needs_install = true;
        needs_cos = true;
    }

    let needs_resi = !mentions(&story, &["business only", "commercial only"]);
    let needs_busi = !mentions(&story, &["residential only", "resi only"]);

    let mut scenarios = Vec::new();
    if needs_install {
        scenarios.push(ScenarioType::Install);
    }
    if needs_cos {
        scenarios.push(ScenarioType::ChangeOfService);
    }
    let mut customers = Vec::new();
    if needs_resi {
        customers.push(CustomerType::Residential);
    }
    if needs_busi {
        customers.push(CustomerType::Business);
    }
    let trucks = [TruckRoll::NotRequired, TruckRoll::Required];

    let shapes = scenarios.len() * customers.len() * trucks.len();
    if shapes == 0 || count == 0 {
        return Vec::new();
    }
    let base = (count / shapes as u32).max(1);
    let mut remaining = count;
    let mut requirements = Vec::new();

    for &scenario in &scenarios {
        for &customer in &customers {
            for &truck in &trucks {
                if remaining == 0 {
                    continue;
                }
                let use_count = base.min(remaining);
                requirements.push(plain_requirement(customer, scenario, truck, use_count));
                remaining -= use_count;
            }
        }
    }

    if remaining > 0 {
        if let Some(first) = requirements.first_mut() {
            first.count_needed += remaining;
        }
    }

    tracing::info!(
        "Fallback plan: {} scenarios x {} segments x {} truck types → {} requirements",
        scenarios.len(),
        customers.len(),
        trucks.len(),
        requirements.len()
    );
    requirements
}

fn plain_requirement(
    customer: CustomerType,
    scenario: ScenarioType,
    truck: TruckRoll,
    count: u32,
) -> Requirement {
    let key = shape_key(customer, scenario, truck);
    Requirement {
        customer_type: customer,
        scenario_type: scenario,
        truck_roll: truck,
        count_needed: count,
        priority: Priority::High,
        combination_id: None,
        variant: None,
        service_code: None,
        customer_status: Some(match scenario {
            ScenarioType::Install => CustomerStatus::New,
            ScenarioType::ChangeOfService => CustomerStatus::ExistingHsd,
        }),
        description: format!("Fallback plan for {}", key),
        exact_description: String::new(),
        match_score: 0.0,
        combination_ids: Vec::new(),
        key,
    }
}
