//! Markdown report for one generation run

use crate::orchestrator::{GenerationRequest, GenerationSummary};
use crate::rules::{self, MISSING_PRIORITY_IDS};
use crate::types::{DeliveredDocument, Origin, Requirement};
use std::fmt::Write;

/// Render the full report: request, plan, summary and every document
pub fn render(
    request: &GenerationRequest,
    requirements: &[Requirement],
    documents: &[DeliveredDocument],
    summary: &GenerationSummary,
) -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_report(&mut out, request, requirements, documents, summary, &now);
    out
}

fn write_report(
    out: &mut String,
    request: &GenerationRequest,
    requirements: &[Requirement],
    documents: &[DeliveredDocument],
    summary: &GenerationSummary,
    now: &str,
) -> std::fmt::Result {
    write_header(out, request, summary, now)?;
    write_requirements(out, requirements)?;
    write_missing_scenarios(out, summary)?;
    write_documents(out, documents)?;
    write_summary(out, summary)
}

fn write_header(
    out: &mut String,
    request: &GenerationRequest,
    summary: &GenerationSummary,
    now: &str,
) -> std::fmt::Result {
    writeln!(out, "# eero Test Case Generation Report")?;
    writeln!(out)?;
    writeln!(out, "## Request")?;
    writeln!(out, "**User Story**: {}", request.user_story)?;
    writeln!(
        out,
        "**Additional Requirements**: {}",
        request
            .additional_requirements
            .as_deref()
            .unwrap_or("None specified")
    )?;
    writeln!(
        out,
        "**Test Cases**: {} ({})",
        summary.target_count,
        if summary.count_was_explicit {
            "requested"
        } else {
            "inferred from the story"
        }
    )?;
    writeln!(out, "**Generated on**: {}", now)?;
    writeln!(out)
}

fn write_requirements(out: &mut String, requirements: &[Requirement]) -> std::fmt::Result {
    writeln!(out, "## Requirements")?;
    writeln!(out)?;
    if requirements.is_empty() {
        writeln!(out, "No requirements were planned.")?;
        return writeln!(out);
    }

    writeln!(out, "| # | Key | Count | Priority | Rules | Service code |")?;
    writeln!(out, "|---|-----|-------|----------|-------|--------------|")?;
    for (i, req) in requirements.iter().enumerate() {
        let ids = if req.combination_ids.is_empty() {
            "-".to_string()
        } else {
            req.combination_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(
            out,
            "| {} | {} | {} | {:?} | {} | {} |",
            i + 1,
            req.key,
            req.count_needed,
            req.priority,
            ids,
            req.service_code.as_deref().unwrap_or("-")
        )?;
    }
    writeln!(out)
}

fn write_missing_scenarios(out: &mut String, summary: &GenerationSummary) -> std::fmt::Result {
    writeln!(out, "## Missing Priority Scenarios")?;
    writeln!(out)?;
    for id in MISSING_PRIORITY_IDS {
        let status = if summary.missing_priority_covered.contains(&id) {
            "covered"
        } else {
            "not covered"
        };
        let description = rules::rule(id)
            .map(|r| &*r.description)
            .unwrap_or("");
        writeln!(out, "- **{}** ({}): {}", id, status, description)?;
    }
    writeln!(out)
}

fn write_documents(out: &mut String, documents: &[DeliveredDocument]) -> std::fmt::Result {
    writeln!(out, "## Test Cases")?;
    writeln!(out)?;

    for (i, doc) in documents.iter().enumerate() {
        writeln!(
            out,
            "### {} TC-{}: {} ({})",
            doc.origin.tag(),
            i + 1,
            doc.title,
            doc.origin.name()
        )?;
        writeln!(out, "**Id**: {}", doc.id)?;
        writeln!(
            out,
            "**Type**: {} {} - {} TruckRoll",
            doc.customer_type.code(),
            doc.scenario_type.code(),
            doc.truck_roll.label()
        )?;
        writeln!(out, "**Customer Status**: {}", doc.customer_status.as_str())?;
        writeln!(out, "**Steps**: {}", doc.steps.len())?;
        match doc.origin {
            Origin::Retrieved => writeln!(out, "**Source**: existing test case library")?,
            Origin::Generated | Origin::HeuristicFallback => {
                writeln!(out, "**Template Used**: {}", doc.template_sources.join(", "))?;
                if let Some(reasoning) = &doc.generation_reasoning {
                    writeln!(out, "**Generation Logic**: {}", reasoning)?;
                }
            }
        }
        writeln!(out)?;
        writeln!(out, "```")?;
        writeln!(out, "{}", doc.content.trim_end())?;
        writeln!(out, "```")?;
        writeln!(out)?;
    }
    Ok(())
}

fn write_summary(out: &mut String, summary: &GenerationSummary) -> std::fmt::Result {
    writeln!(out, "## Summary")?;
    writeln!(out, "- **Delivered**: {}", summary.total_delivered)?;
    writeln!(out, "- **Retrieved from library**: {}", summary.total_retrieved)?;
    writeln!(out, "- **Generated**: {}", summary.total_generated)?;
    writeln!(out, "- **Heuristic fallback**: {}", summary.total_heuristic)?;
    if summary.used_fallback_plan {
        writeln!(out, "- Detection found nothing; the dual-scenario plan was used")?;
    }
    for (key, count) in &summary.breakdown {
        writeln!(out, "- {}: {}", key, count)?;
    }
    if !summary.unfulfilled.is_empty() {
        writeln!(out)?;
        writeln!(out, "### Unfulfilled")?;
        for u in &summary.unfulfilled {
            writeln!(out, "- {}: {} of {}", u.key, u.delivered, u.needed)?;
        }
    }
    if !summary.saved_files.is_empty() {
        writeln!(out)?;
        writeln!(out, "### Saved Templates")?;
        for path in &summary.saved_files {
            writeln!(out, "- {}", path.display())?;
        }
    }
    Ok(())
}
