//! Template Selector: pick the best stored template for a requirement
//!
//! Point-based ranking (relative only; the totals mean nothing on their own):
//! shape match, product-variant vocabulary, structural completeness and a
//! small bonus when the validation families are all present. Repeated
//! selection within one run is spread over the pool by a diversity penalty
//! that resets once every candidate has been used.
//!
//! Retrieval of stored documents uses a separate 0-100 workflow
//! completeness score.

use crate::types::{ProductVariant, Requirement, Template};
use serde::Serialize;
use std::collections::HashSet;

pub const CUSTOMER_MATCH_POINTS: i32 = 30;
pub const SCENARIO_MATCH_POINTS: i32 = 30;
pub const TRUCK_ROLL_MATCH_POINTS: i32 = 20;
pub const VARIANT_MATCH_POINTS: i32 = 15;
pub const BASE_VARIANT_POINTS: i32 = 10;
pub const DIVERSITY_PENALTY: i32 = 5;
pub const VALIDATION_FAMILY_BONUS: i32 = 5;

/// Retrieval only delivers templates scoring at least this, when any do
pub const GOOD_QUALITY_THRESHOLD: u32 = 70;

const PREMIUM_VOCABULARY: &[&str] = &["plus", "premium", "secure"];
const MULTI_DEVICE_VOCABULARY: &[&str] = &["multiple", "additional", "mesh"];

const QUEUE_FAMILY: &[&str] = &["kafka", "queue", "message bus"];
const API_FAMILY: &[&str] = &["api", "endpoint", "swagger"];
const NETWORK_FAMILY: &[&str] = &["network", "insight"];

fn mentions(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|kw| text.contains(kw))
}

/// A candidate with its selection score
#[derive(Debug, Clone, Serialize)]
pub struct ScoredTemplate<'a> {
    pub template: &'a Template,
    pub score: i32,
}

/// Score a template for a requirement, ignoring diversity
pub fn score_template(req: &Requirement, template: &Template, hint: ProductVariant) -> i32 {
    let mut score = 0;
    let content = template.content.to_lowercase();

    if template.customer_type == req.customer_type {
        score += CUSTOMER_MATCH_POINTS;
    }
    if template.scenario_type == req.scenario_type {
        score += SCENARIO_MATCH_POINTS;
    }
    if template.truck_roll == req.truck_roll {
        score += TRUCK_ROLL_MATCH_POINTS;
    }

    let premium = mentions(&content, PREMIUM_VOCABULARY);
    let multi = mentions(&content, MULTI_DEVICE_VOCABULARY);
    score += match hint {
        ProductVariant::Premium if premium => VARIANT_MATCH_POINTS,
        ProductVariant::MultiDevice if multi => VARIANT_MATCH_POINTS,
        ProductVariant::Base if !premium && !multi => BASE_VARIANT_POINTS,
        _ => 0,
    };

    score += match template.steps.len() {
        n if n >= 10 => 10,
        n if n >= 6 => 5,
        _ => 0,
    };
    score += match template.content.len() {
        n if n >= 2000 => 5,
        n if n >= 1000 => 3,
        _ => 0,
    };

    if mentions(&content, QUEUE_FAMILY)
        && mentions(&content, API_FAMILY)
        && mentions(&content, NETWORK_FAMILY)
    {
        score += VALIDATION_FAMILY_BONUS;
    }

    score
}

/// Matchable templates, narrowed to the closest shape available
///
/// Library templates matching customer + scenario first, then templates
/// generated earlier with that shape, then same-scenario library templates,
/// then everything. Generated templates of other shapes only count when
/// the library has nothing matchable.
fn candidate_pool<'a>(req: &Requirement, templates: &'a [Template]) -> Vec<&'a Template> {
    let matchable: Vec<&Template> = templates.iter().filter(|t| t.is_matchable()).collect();
    let is_exact = |t: &&Template| {
        t.customer_type == req.customer_type && t.scenario_type == req.scenario_type
    };

    let library_exact: Vec<&Template> = matchable
        .iter()
        .copied()
        .filter(|t| !t.is_generated)
        .filter(is_exact)
        .collect();
    if !library_exact.is_empty() {
        return library_exact;
    }

    let generated_exact: Vec<&Template> = matchable
        .iter()
        .copied()
        .filter(|t| t.is_generated)
        .filter(is_exact)
        .collect();
    if !generated_exact.is_empty() {
        tracing::debug!("No library match for {}, reusing generated templates", req.key);
        return generated_exact;
    }

    let library: Vec<&Template> = matchable
        .iter()
        .copied()
        .filter(|t| !t.is_generated)
        .collect();
    let base = if library.is_empty() { matchable } else { library };

    let same_scenario: Vec<&Template> = base
        .iter()
        .copied()
        .filter(|t| t.scenario_type == req.scenario_type)
        .collect();
    if !same_scenario.is_empty() {
        tracing::debug!("No exact match for {}, using same-scenario templates", req.key);
        return same_scenario;
    }

    tracing::debug!("No scenario match for {}, using any template", req.key);
    base
}

/// Selection state for one run
#[derive(Debug, Default)]
pub struct TemplateSelector {
    used: HashSet<String>,
}

impl TemplateSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct templates chosen since the last reset
    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    pub fn reset(&mut self) {
        self.used.clear();
    }

    /// Score the candidate pool, best first
    ///
    /// Already-used templates carry a penalty of `DIVERSITY_PENALTY` per used
    /// template. Ties go to the template with more steps.
    pub fn rank<'a>(
        &self,
        req: &Requirement,
        templates: &'a [Template],
        hint: ProductVariant,
    ) -> Vec<ScoredTemplate<'a>> {
        let penalty = DIVERSITY_PENALTY * self.used.len() as i32;

        let mut ranked: Vec<ScoredTemplate<'a>> = candidate_pool(req, templates)
            .into_iter()
            .map(|template| {
                let mut score = score_template(req, template, hint);
                if self.used.contains(&template.id) {
                    score -= penalty;
                }
                ScoredTemplate { template, score }
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| b.template.steps.len().cmp(&a.template.steps.len()))
        });
        ranked
    }

    /// Pick one template and mark it used
    pub fn select<'a>(
        &mut self,
        req: &Requirement,
        templates: &'a [Template],
        hint: ProductVariant,
    ) -> Option<&'a Template> {
        self.reset_if_exhausted(req, templates);

        let best = self.rank(req, templates, hint).into_iter().next()?;
        tracing::debug!(
            "Selected {} for {} (score {})",
            best.template.id,
            req.key,
            best.score
        );
        self.used.insert(best.template.id.clone());
        Some(best.template)
    }

    /// Up to `n` distinct templates from one ranking, all marked used
    pub fn select_many<'a>(
        &mut self,
        req: &Requirement,
        templates: &'a [Template],
        hint: ProductVariant,
        n: usize,
    ) -> Vec<&'a Template> {
        self.reset_if_exhausted(req, templates);

        let picked: Vec<&'a Template> = self
            .rank(req, templates, hint)
            .into_iter()
            .take(n)
            .map(|scored| scored.template)
            .collect();
        for t in &picked {
            self.used.insert(t.id.clone());
        }
        picked
    }

    fn reset_if_exhausted(&mut self, req: &Requirement, templates: &[Template]) {
        if self.used.is_empty() {
            return;
        }
        let pool = candidate_pool(req, templates);
        if !pool.is_empty() && pool.iter().all(|t| self.used.contains(&t.id)) {
            tracing::debug!("All {} candidates used, resetting diversity", pool.len());
            self.used.clear();
        }
    }
}

/// How complete a stored workflow looks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowQuality {
    Complete,
    Good,
    Partial,
    Incomplete,
}

impl WorkflowQuality {
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowQuality::Complete => "COMPLETE",
            WorkflowQuality::Good => "GOOD",
            WorkflowQuality::Partial => "PARTIAL",
            WorkflowQuality::Incomplete => "INCOMPLETE",
        }
    }
}

/// Workflow completeness on a 0-100 scale
///
/// Step richness (10-30), five validation families at 10 each, content
/// depth (2-10) and up to 10 for quality wording.
pub fn completeness_score(template: &Template) -> u32 {
    let content = template.content.to_lowercase();
    let mut score = 0;

    score += match template.steps.len() {
        n if n >= 10 => 30,
        n if n >= 8 => 25,
        n if n >= 6 => 20,
        n if n >= 4 => 15,
        _ => 10,
    };

    let families: [&[&str]; 5] = [
        &["kafka", "eero-order queue", "billing-system"],
        &["eero-provisioning", "swagger", "endpoint", "api"],
        &["banhammer", "mac address", "ldap"],
        &["eero insight", "network", "fleet summary", "insight"],
        &["final", "response", "validation", "verify"],
    ];
    score += 10 * families.iter().filter(|f| mentions(&content, f)).count() as u32;

    score += match template.content.len() {
        n if n > 4000 => 10,
        n if n > 2000 => 7,
        n if n > 1000 => 5,
        _ => 2,
    };

    let indicators = [
        "prerequisites",
        "expected result",
        "verification",
        "validate",
        "confirm",
        "ensure",
    ];
    let quality = 2 * indicators.iter().filter(|i| content.contains(*i)).count() as u32;
    score += quality.min(10);

    score
}

pub fn assess_workflow(template: &Template) -> WorkflowQuality {
    let content = template.content.to_lowercase();
    let steps = template.steps.len();

    let components = [
        mentions(&content, &["kafka", "queue"]),
        mentions(&content, &["api", "endpoint", "swagger"]),
        mentions(&content, &["insight", "network"]),
        mentions(&content, &["banhammer", "ldap"]),
    ]
    .iter()
    .filter(|present| **present)
    .count();

    if steps >= 10 && components >= 3 {
        WorkflowQuality::Complete
    } else if steps >= 8 && components >= 2 {
        WorkflowQuality::Good
    } else if steps >= 6 && components >= 1 {
        WorkflowQuality::Partial
    } else {
        WorkflowQuality::Incomplete
    }
}

/// Stored library documents that fit a requirement exactly
///
/// Same customer type, scenario and truck roll, authored rather than
/// generated, and not in `exclude`. Sorted by completeness; only the good
/// ones are returned when any exist.
pub fn retrieve_exact<'a>(
    req: &Requirement,
    templates: &'a [Template],
    exclude: &HashSet<String>,
) -> Vec<&'a Template> {
    let mut scored: Vec<(u32, &Template)> = templates
        .iter()
        .filter(|t| {
            t.customer_type == req.customer_type
                && t.scenario_type == req.scenario_type
                && t.truck_roll == req.truck_roll
                && !t.is_generated
                && t.is_matchable()
                && !exclude.contains(&t.id)
        })
        .map(|t| (completeness_score(t), t))
        .collect();

    if scored.is_empty() {
        return Vec::new();
    }
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    let good: Vec<&Template> = scored
        .iter()
        .filter(|(score, _)| *score >= GOOD_QUALITY_THRESHOLD)
        .map(|(_, t)| *t)
        .collect();
    if !good.is_empty() {
        return good;
    }

    tracing::warn!(
        "No complete workflow for {}, using best available templates",
        req.key
    );
    scored.into_iter().map(|(_, t)| t).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::template_from_content;
    use crate::types::{
        CustomerType, Priority, ScenarioType, StepRecord, TruckRoll,
    };

    fn requirement(customer: CustomerType, scenario: ScenarioType, truck: TruckRoll) -> Requirement {
        Requirement {
            key: crate::types::shape_key(customer, scenario, truck),
            customer_type: customer,
            scenario_type: scenario,
            truck_roll: truck,
            count_needed: 1,
            priority: Priority::Normal,
            combination_id: None,
            variant: None,
            service_code: None,
            customer_status: None,
            description: String::new(),
            exact_description: String::new(),
            match_score: 0.0,
            combination_ids: Vec::new(),
        }
    }

    fn steps_text(n: usize, body: &str) -> String {
        let mut out = String::from("Test_steps:\n");
        for i in 1..=n {
            out.push_str(&format!("{}.\n{} step {}\n", i, body, i));
        }
        out
    }

    fn template(stem: &str, steps: usize, body: &str) -> Template {
        template_from_content(stem, &steps_text(steps, body))
    }

    #[test]
    fn test_exact_match_beats_richer_mismatch() {
        let templates = vec![
            template("RESI_cos_NoTruck_rich", 12, "Check the api endpoint, kafka queue and network insight"),
            template("BUSI_cos_NoTruck_plain", 3, "Open the account"),
        ];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);

        let mut selector = TemplateSelector::new();
        let chosen = selector
            .select(&req, &templates, ProductVariant::Base)
            .unwrap();
        assert_eq!(chosen.id, "TC_BUSI_cos_NoTruck_plain");
    }

    #[test]
    fn test_falls_back_to_same_scenario() {
        let templates = vec![
            template("RESI_install_WithTruck", 5, "Install the gateway"),
            template("RESI_cos_NoTruck", 5, "Change the service"),
        ];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);

        let ranked = TemplateSelector::new().rank(&req, &templates, ProductVariant::Base);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].template.id, "TC_RESI_cos_NoTruck");
    }

    #[test]
    fn test_prefers_multi_device_vocabulary() {
        let templates = vec![
            template("BUSI_cos_plain", 5, "Add the eero service"),
            template("BUSI_cos_mesh", 5, "Add an additional mesh eero device"),
        ];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);

        let mut selector = TemplateSelector::new();
        let chosen = selector
            .select(&req, &templates, ProductVariant::MultiDevice)
            .unwrap();
        assert_eq!(chosen.id, "TC_BUSI_cos_mesh");

        // The plain one wins for a base hint
        let ranked = TemplateSelector::new().rank(&req, &templates, ProductVariant::Base);
        assert_eq!(ranked[0].template.id, "TC_BUSI_cos_plain");
    }

    #[test]
    fn test_tie_prefers_more_steps() {
        let templates = vec![
            template("BUSI_cos_short", 3, "Open the account"),
            template("BUSI_cos_long", 5, "Open the account"),
        ];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);
        let ranked = TemplateSelector::new().rank(&req, &templates, ProductVariant::Base);
        assert_eq!(ranked[0].score, ranked[1].score);
        assert_eq!(ranked[0].template.id, "TC_BUSI_cos_long");
    }

    #[test]
    fn test_diversity_cycles_then_resets() {
        let templates = vec![
            template("BUSI_cos_a", 3, "Open the account"),
            template("BUSI_cos_b", 3, "Open the account"),
            template("BUSI_cos_c", 3, "Open the account"),
        ];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);
        let mut selector = TemplateSelector::new();

        let picks: Vec<String> = (0..3)
            .map(|_| selector.select(&req, &templates, ProductVariant::Base).unwrap().id.clone())
            .collect();
        assert_eq!(picks, vec!["TC_BUSI_cos_a", "TC_BUSI_cos_b", "TC_BUSI_cos_c"]);
        assert_eq!(selector.used_count(), 3);

        // Pool exhausted: penalties reset and the order starts over
        let again = selector.select(&req, &templates, ProductVariant::Base).unwrap();
        assert_eq!(again.id, "TC_BUSI_cos_a");
        assert_eq!(selector.used_count(), 1);
    }

    #[test]
    fn test_used_template_penalized() {
        let templates = vec![
            template("BUSI_cos_a", 3, "Open the account"),
            template("BUSI_cos_b", 3, "Open the account"),
        ];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);
        let mut selector = TemplateSelector::new();
        selector.select(&req, &templates, ProductVariant::Base);

        let ranked = selector.rank(&req, &templates, ProductVariant::Base);
        assert_eq!(ranked[0].template.id, "TC_BUSI_cos_b");
        assert_eq!(ranked[0].score - ranked[1].score, DIVERSITY_PENALTY);
    }

    #[test]
    fn test_select_many_distinct() {
        let templates = vec![
            template("RESI_install_a", 4, "Install"),
            template("RESI_install_b", 4, "Install"),
        ];
        let req = requirement(CustomerType::Residential, ScenarioType::Install, TruckRoll::Required);
        let mut selector = TemplateSelector::new();
        let picked = selector.select_many(&req, &templates, ProductVariant::Base, 5);
        assert_eq!(picked.len(), 2);
        assert_ne!(picked[0].id, picked[1].id);
    }

    #[test]
    fn test_generated_exact_shape_beats_library_mismatch() {
        let mut generated = template("TC_GEN_BUSI_cos_NoTruck_x", 4, "Commercial account");
        generated.is_generated = true;
        let templates = vec![
            template("RESI_cos_NoTruck_a", 6, "Residential account"),
            template("BUSI_install_WithTruck", 6, "Commercial install"),
            generated,
        ];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);

        let chosen = TemplateSelector::new()
            .select(&req, &templates, ProductVariant::Base)
            .unwrap();
        assert_eq!(chosen.id, "TC_GEN_BUSI_cos_NoTruck_x");

        // A library document of the right shape still wins over generated ones
        let mut with_library = templates.clone();
        with_library.push(template("BUSI_cos_NoTruck_lib", 3, "Commercial account"));
        let ranked = TemplateSelector::new().rank(&req, &with_library, ProductVariant::Base);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].template.id, "TC_BUSI_cos_NoTruck_lib");
    }

    #[test]
    fn test_unmatchable_templates_ignored() {
        let mut empty = template("BUSI_cos_empty", 1, "x");
        empty.steps.clear();
        let templates = vec![empty];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);
        assert!(TemplateSelector::new()
            .select(&req, &templates, ProductVariant::Base)
            .is_none());
    }

    #[test]
    fn test_completeness_and_assessment() {
        let rich = template(
            "BUSI_cos_full",
            10,
            "Prerequisites ok. Check the kafka eero-order queue, call the swagger api endpoint, \
             search banhammer by mac address, open eero insight network view and verify the final response",
        );
        assert!(completeness_score(&rich) >= GOOD_QUALITY_THRESHOLD);
        assert_eq!(assess_workflow(&rich), WorkflowQuality::Complete);

        let thin = template("BUSI_cos_thin", 2, "Open the account");
        assert!(completeness_score(&thin) < GOOD_QUALITY_THRESHOLD);
        assert_eq!(assess_workflow(&thin), WorkflowQuality::Incomplete);
    }

    #[test]
    fn test_retrieve_exact_filters_and_orders() {
        let mut generated = template("BUSI_cos_NoTruck_gen", 10, "kafka api network");
        generated.is_generated = true;
        let templates = vec![
            template("BUSI_cos_NoTruck_thin", 2, "Open the account"),
            template(
                "BUSI_cos_NoTruck_rich",
                10,
                "Check kafka queue, api endpoint, banhammer ldap, insight network and verify the response",
            ),
            template("BUSI_cos_WithTruck", 10, "kafka api network"),
            generated,
        ];
        let req = requirement(CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired);

        let found = retrieve_exact(&req, &templates, &HashSet::new());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "TC_BUSI_cos_NoTruck_rich");

        let mut exclude = HashSet::new();
        exclude.insert("TC_BUSI_cos_NoTruck_rich".to_string());
        let rest = retrieve_exact(&req, &templates, &exclude);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, "TC_BUSI_cos_NoTruck_thin");
    }

    #[test]
    fn test_step_record_helper_shape() {
        let t = template("RESI_install", 3, "Do it");
        assert_eq!(
            t.steps[0],
            StepRecord {
                number: 1,
                action: "Do it step 1".to_string(),
                expected_result: None,
            }
        );
    }
}
