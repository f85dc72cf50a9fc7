//! Orchestrator: one request from story to delivered documents
//!
//! Count → detection → consolidation → per-requirement retrieval or
//! adaptation → de-duplication → summary and report. Sequential; the only
//! await points are adapter calls.

use crate::adapt::{
    adapt_with_recovery, heuristic_adapt, into_template, AdaptationRequest, Adapter,
};
use crate::detector::{self, MAX_TEST_CASES};
use crate::report;
use crate::rules;
use crate::selector::{retrieve_exact, TemplateSelector};
use crate::templates::TemplateStore;
use crate::types::{shape_key, DeliveredDocument, Origin, ProductVariant, Requirement};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// One generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub user_story: String,
    #[serde(default)]
    pub additional_requirements: Option<String>,
    /// Explicit count; inferred from the text when absent
    #[serde(default)]
    pub count: Option<u32>,
}

impl GenerationRequest {
    pub fn new(user_story: impl Into<String>) -> Self {
        Self {
            user_story: user_story.into(),
            ..Self::default()
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_requirements(mut self, requirements: impl Into<String>) -> Self {
        let requirements = requirements.into();
        if !requirements.trim().is_empty() {
            self.additional_requirements = Some(requirements);
        }
        self
    }

    /// Story plus additional requirements, as seen by the detector
    pub fn analysis_text(&self) -> String {
        match &self.additional_requirements {
            Some(extra) => format!("{}\n{}", self.user_story, extra),
            None => self.user_story.clone(),
        }
    }
}

/// A requirement that could not be filled completely
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unfulfilled {
    pub key: String,
    pub needed: u32,
    pub delivered: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub target_count: u32,
    /// The count came from the caller rather than the detector
    pub count_was_explicit: bool,
    pub total_delivered: usize,
    pub total_retrieved: usize,
    pub total_generated: usize,
    pub total_heuristic: usize,
    pub requirement_count: usize,
    /// Detection produced nothing and the dual-scenario plan was used
    pub used_fallback_plan: bool,
    /// Missing-priority rule ids that got at least one document
    pub missing_priority_covered: Vec<u16>,
    pub unfulfilled: Vec<Unfulfilled>,
    pub saved_files: Vec<PathBuf>,
    /// Delivered documents per `RESI-cos-NoTruck` shape
    pub breakdown: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub documents: Vec<DeliveredDocument>,
    pub requirements: Vec<Requirement>,
    pub summary: GenerationSummary,
    /// Markdown report
    pub report: String,
}

/// Plan requirements for a text and a target count
///
/// Returns the requirements and whether the dual-scenario fallback plan
/// was needed.
pub fn plan_requirements(text: &str, target: u32) -> (Vec<Requirement>, bool) {
    let analysis = detector::analyze(text);
    let detections = detector::detect_with(&analysis, target);
    let mut requirements = detector::consolidate(&detections);

    if requirements.is_empty() {
        tracing::warn!("No requirements detected, using dual-scenario plan");
        return (detector::fallback_requirements(text, target), true);
    }

    detector::balance_counts(&mut requirements, target);
    (requirements, false)
}

fn targets_missing_scenario(req: &Requirement) -> bool {
    req.combination_ids
        .iter()
        .any(|id| rules::is_missing_priority(*id))
}

/// Runs requests against one template store
pub struct Orchestrator<A: Adapter> {
    store: TemplateStore,
    adapter: A,
    selector: TemplateSelector,
    save_generated: bool,
}

impl<A: Adapter> Orchestrator<A> {
    pub fn new(store: TemplateStore, adapter: A) -> Self {
        Self {
            store,
            adapter,
            selector: TemplateSelector::new(),
            save_generated: true,
        }
    }

    pub fn with_save_generated(mut self, save: bool) -> Self {
        self.save_generated = save;
        self
    }

    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Explicit counts are clamped to 1..=31; otherwise inferred
    pub fn target_count(request: &GenerationRequest) -> u32 {
        match request.count {
            Some(n) => {
                let clamped = n.clamp(1, MAX_TEST_CASES);
                if clamped != n {
                    tracing::warn!("Requested {} test cases, using {}", n, clamped);
                }
                clamped
            }
            None => detector::count(&request.analysis_text()),
        }
    }

    pub async fn generate(&mut self, request: &GenerationRequest) -> Result<GenerationResult> {
        let text = request.analysis_text();
        let target = Self::target_count(request);
        tracing::info!("Generating {} test cases", target);

        let (requirements, used_fallback_plan) = plan_requirements(&text, target);
        tracing::info!("{} requirements to fill", requirements.len());

        let mut summary = GenerationSummary {
            target_count: target,
            count_was_explicit: request.count.is_some(),
            requirement_count: requirements.len(),
            used_fallback_plan,
            ..GenerationSummary::default()
        };

        let mut documents: Vec<DeliveredDocument> = Vec::new();
        let mut delivered_ids: HashSet<String> = HashSet::new();

        for req in &requirements {
            if documents.len() >= target as usize {
                break;
            }
            let before = documents.len();
            self.fill(req, &request.user_story, &mut documents, &mut delivered_ids, &mut summary)
                .await;
            let got = (documents.len() - before) as u32;

            if got < req.count_needed && documents.len() < target as usize {
                tracing::warn!("{}: delivered {} of {}", req.key, got, req.count_needed);
                summary.unfulfilled.push(Unfulfilled {
                    key: req.key.clone(),
                    needed: req.count_needed,
                    delivered: got,
                });
            }
            if got > 0 {
                summary.missing_priority_covered.extend(
                    req.combination_ids
                        .iter()
                        .filter(|id| rules::is_missing_priority(**id)),
                );
            }
        }

        documents.truncate(target as usize);

        summary.total_delivered = documents.len();
        for doc in &documents {
            match doc.origin {
                Origin::Retrieved => summary.total_retrieved += 1,
                Origin::Generated => summary.total_generated += 1,
                Origin::HeuristicFallback => summary.total_heuristic += 1,
            }
            let key = shape_key(doc.customer_type, doc.scenario_type, doc.truck_roll);
            *summary.breakdown.entry(key).or_insert(0) += 1;
        }

        tracing::info!(
            "Delivered {} test cases ({} retrieved, {} generated, {} fallback)",
            summary.total_delivered,
            summary.total_retrieved,
            summary.total_generated,
            summary.total_heuristic
        );

        let report = report::render(request, &requirements, &documents, &summary);
        Ok(GenerationResult {
            documents,
            requirements,
            summary,
            report,
        })
    }

    /// Deliver up to `req.count_needed` documents for one requirement
    async fn fill(
        &mut self,
        req: &Requirement,
        story: &str,
        documents: &mut Vec<DeliveredDocument>,
        delivered_ids: &mut HashSet<String>,
        summary: &mut GenerationSummary,
    ) {
        let mut remaining = req.count_needed as usize;

        // Missing-priority scenarios always get a document written for them
        if !targets_missing_scenario(req) {
            for template in retrieve_exact(req, self.store.templates(), delivered_ids)
                .into_iter()
                .take(remaining)
            {
                tracing::debug!("Retrieved {} for {}", template.id, req.key);
                delivered_ids.insert(template.id.clone());
                documents.push(DeliveredDocument::from_template(
                    template,
                    Origin::Retrieved,
                    &req.key,
                ));
                remaining -= 1;
            }
        }

        for _ in 0..remaining {
            match self.generate_one(req, story, summary).await {
                Some(doc) if delivered_ids.insert(doc.id.clone()) => documents.push(doc),
                Some(doc) => tracing::debug!("Dropping duplicate {}", doc.id),
                None => break,
            }
        }
    }

    /// Select, adapt and store one new document
    async fn generate_one(
        &mut self,
        req: &Requirement,
        story: &str,
        summary: &mut GenerationSummary,
    ) -> Option<DeliveredDocument> {
        let hint = match &req.variant {
            Some(tag) => ProductVariant::detect(tag),
            None => ProductVariant::detect(story),
        };

        let Some(source) = self
            .selector
            .select(req, self.store.templates(), hint)
            .cloned()
        else {
            tracing::warn!("No template available for {}", req.key);
            return None;
        };

        let request = AdaptationRequest::new(&source, req, story);
        let (adapted, origin) = match adapt_with_recovery(&self.adapter, &request).await {
            Ok(adaptation) => {
                tracing::info!(
                    "Adapted {} for {} in {} call(s)",
                    source.id,
                    req.key,
                    adaptation.attempts
                );
                (adaptation.document, Origin::Generated)
            }
            Err(e) => {
                tracing::warn!("Adaptation failed for {}: {}, using heuristic rewrite", req.key, e);
                (heuristic_adapt(&source, req), Origin::HeuristicFallback)
            }
        };

        let template = into_template(adapted, req, &source);
        if self.save_generated {
            match self.store.save_generated(&template) {
                Ok(path) => {
                    tracing::info!("Saved {:?}", path);
                    summary.saved_files.push(path);
                }
                Err(e) => tracing::warn!("Could not save {}: {:#}", template.id, e),
            }
        }

        let doc = DeliveredDocument::from_template(&template, origin, &req.key);
        self.store.push(template);
        Some(doc)
    }
}
