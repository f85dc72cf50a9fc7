//! testgen - eero QA test-case generator
//!
//! Run with: cargo run -- generate "<user story>" --count=5
//! Logs go to stderr; set RUST_LOG=debug for scoring detail.

use anyhow::{bail, Context, Result};
use eero_testgen::{
    config::AppConfig,
    detector, rules,
    orchestrator::{GenerationRequest, Orchestrator},
    selector::{assess_workflow, completeness_score},
    templates::{self, TemplateStore},
    LlmAdapter,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Usage:
  testgen generate <story...> [--count=N] [--requirements=TEXT]
                              [--templates=DIR] [--config=FILE]
                              [--output=FILE] [--json] [--no-save]
  testgen --detect <story...>     Story analysis, detections and requirements
  testgen --count <story...>      Inferred test-case count
  testgen --templates [DIR]       Loaded templates with workflow quality
  testgen --parse <file>          Parse one template file
  testgen --rules                 The combination rule table";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        println!("{}", USAGE);
        return Ok(());
    }

    match args[1].as_str() {
        "generate" => run_generate(&args[2..]).await,
        "--detect" => run_detect(&positional(&args[2..])),
        "--count" => {
            let story = positional(&args[2..]);
            println!("{}", detector::count(&story));
            Ok(())
        }
        "--templates" => run_templates(args.get(2).map(PathBuf::from)),
        "--parse" => {
            let path = args.get(2).context("Usage: testgen --parse <file>")?;
            run_parse(Path::new(path))
        }
        "--rules" => run_rules(),
        "--help" | "-h" => {
            println!("{}", USAGE);
            Ok(())
        }
        s if !s.starts_with("--") => {
            // Bare story: generate with defaults
            run_generate(&args[1..]).await
        }
        other => {
            eprintln!("Unknown option: {}\n", other);
            println!("{}", USAGE);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Value of a `--name=value` flag
fn flag_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .find_map(|a| a.strip_prefix(name).and_then(|rest| rest.strip_prefix('=')))
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

/// Everything that is not a flag, joined as the story text
fn positional(args: &[String]) -> String {
    args.iter()
        .filter(|a| !a.starts_with("--"))
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_header(title: &str) {
    println!("\n┌─────────────────────────────────────────────────────────────┐");
    println!("│ {:<59} │", title);
    println!("└─────────────────────────────────────────────────────────────┘\n");
}

async fn run_generate(args: &[String]) -> Result<()> {
    let story = positional(args);
    if story.trim().is_empty() {
        bail!("Usage: testgen generate <story...> [--count=N]");
    }

    let mut config = AppConfig::load(flag_value(args, "--config").map(Path::new))?;
    if let Some(dir) = flag_value(args, "--templates") {
        config.templates_dir = PathBuf::from(dir);
    }
    if has_flag(args, "--no-save") {
        config.save_generated = false;
    }

    let mut request = GenerationRequest::new(story);
    if let Some(raw) = flag_value(args, "--count") {
        let count: u32 = raw
            .parse()
            .with_context(|| format!("--count expects a number, got {:?}", raw))?;
        request = request.with_count(count);
    }
    if let Some(extra) = flag_value(args, "--requirements") {
        request = request.with_requirements(extra);
    }

    let store = TemplateStore::load(&config.templates_dir)?;
    tracing::info!(
        "Loaded {} templates from {:?}",
        store.len(),
        config.templates_dir
    );

    let adapter = LlmAdapter::new(config.llm.clone());
    if !adapter.has_api_key() {
        tracing::warn!("ANTHROPIC_API_KEY not set, new documents will use the heuristic rewrite");
    }

    let mut orchestrator =
        Orchestrator::new(store, adapter).with_save_generated(config.save_generated);
    let result = orchestrator.generate(&request).await?;

    if let Some(path) = flag_value(args, "--output") {
        std::fs::write(path, &result.report)
            .with_context(|| format!("writing report to {}", path))?;
        tracing::info!("Report written to {}", path);
    }

    if has_flag(args, "--json") {
        let output = serde_json::json!({
            "documents": result.documents,
            "summary": result.summary,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if flag_value(args, "--output").is_none() {
        println!("{}", result.report);
    } else {
        let s = &result.summary;
        println!(
            "Delivered {} of {} test cases ({} retrieved, {} generated, {} fallback)",
            s.total_delivered, s.target_count, s.total_retrieved, s.total_generated, s.total_heuristic
        );
    }

    Ok(())
}

fn run_detect(story: &str) -> Result<()> {
    if story.trim().is_empty() {
        bail!("Usage: testgen --detect <story...>");
    }
    print_header("REQUIREMENT DETECTION");

    let analysis = detector::analyze(story);
    let count = detector::infer_count(story, &analysis);

    println!("ANALYSIS:");
    println!(
        "   Order types: {}",
        analysis
            .order_types
            .iter()
            .map(|o| o.code())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!(
        "   Segments:    {}",
        analysis
            .segments
            .iter()
            .map(|s| s.code())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("   Truck roll:  {:?}", analysis.truck_roll_preference);
    println!(
        "   Variants:    {}",
        analysis
            .variants
            .iter()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if analysis.association_process_detected {
        println!("   Association process detected");
    }
    println!("   Test cases:  {}", count);
    println!();

    let detections = detector::detect_with(&analysis, count);
    println!("DETECTIONS ({}):", detections.len());
    for d in &detections {
        let flag = if d.rule.is_missing_priority() { " [MISSING]" } else { "" };
        println!(
            "   {:>3}  {:.2}  {:<26} {}{}",
            d.rule.id, d.score, d.service_code, d.rule.description, flag
        );
    }
    println!();

    let mut requirements = detector::consolidate(&detections);
    detector::balance_counts(&mut requirements, count);
    println!("REQUIREMENTS ({}):", requirements.len());
    for req in &requirements {
        println!(
            "   {:<68} x{}  {:?}  rules {:?}",
            req.key, req.count_needed, req.priority, req.combination_ids
        );
    }

    Ok(())
}

fn run_templates(dir: Option<PathBuf>) -> Result<()> {
    let dir = match dir {
        Some(d) => d,
        None => AppConfig::load(None)?.templates_dir,
    };
    let store = TemplateStore::load(&dir)?;

    print_header("TEMPLATE LIBRARY");
    println!("Directory: {}", dir.display());
    println!("Templates: {}\n", store.len());

    for (key, n) in store.breakdown() {
        println!("   {:<24} {}", key, n);
    }
    println!();

    for t in store.templates() {
        println!(
            "   {:<50} {:>3} steps  {:>3}/100  {}",
            t.id,
            t.steps.len(),
            completeness_score(t),
            assess_workflow(t).name()
        );
    }

    Ok(())
}

fn run_parse(path: &Path) -> Result<()> {
    let template = templates::parse_template_file(path)?;

    print_header("PARSED TEMPLATE");
    println!("Id:       {}", template.id);
    println!("Title:    {}", template.title);
    println!(
        "Shape:    {} ({})",
        template.shape_key(),
        template.customer_status.as_str()
    );
    println!("Steps:    {}", template.steps.len());
    for (expected, found) in templates::numbering_gaps(&template.steps) {
        println!("Gap:      expected step {}, found {}", expected, found);
    }
    println!();

    for step in &template.steps {
        let first_line = step.action.lines().next().unwrap_or("");
        println!("{:>3}. {}", step.number, first_line);
        if let Some(expected) = &step.expected_result {
            println!("     Expected: {}", expected);
        }
    }

    Ok(())
}

fn run_rules() -> Result<()> {
    print_header("COMBINATION RULES");

    for r in rules::rules() {
        let flag = if r.is_missing_priority() { " [MISSING]" } else { "" };
        println!(
            "{:>3}  {:<7} {:<4} {:<4}  {:<28} {:<26}{}",
            r.id,
            r.order_type.code(),
            r.segment.code(),
            r.truck_roll.label(),
            r.variant.as_str(),
            rules::service_code_for(r),
            flag
        );
    }

    Ok(())
}
