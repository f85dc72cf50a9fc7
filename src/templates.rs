//! Template Store: test documents loaded from a directory of text files
//!
//! File names carry the classification (`BUSI - CoS - ... - No TruckRoll.txt`),
//! file bodies carry a `Test_steps:` marker followed by numbered steps.
//!
//! Step extraction is a two-state line scanner:
//!
//! ```text
//!   SeekingMarker ──marker──▶ Accumulating ──marker──▶ Accumulating (next step)
//!        ▲                        │
//!        └──── 50 body lines ─────┘
//! ```
//!
//! A marker only opens a new step when its number is greater than the
//! previous one; lower numbers are sub-lists inside the current step.

use crate::types::{CustomerType, ScenarioType, StepRecord, Template, TruckRoll};
use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Body lines a single step may absorb before the scanner stops listening
pub const MAX_STEP_BODY_LINES: usize = 50;

const STEP_SECTION_MARKER: &str = "test_steps:";

/// Verbs whose clauses count as expected results
pub const VERIFICATION_VERBS: [&str; 5] = ["verify", "check", "ensure", "confirm", "validate"];

fn numbered_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `1.Login` is a marker, `1.5 GHz` is not
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,3})[.)](?:\s+(.*)|([^\d\s].*))?$").expect("valid regex")
    })
}

fn step_word_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^step\s*(\d{1,3})\s*[:.)\-]?\s*(.*)$").expect("valid regex")
    })
}

fn expected_result_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[-*\s]*expected\s+results?\s*[:\-]?\s*(.*)$").expect("valid regex")
    })
}

fn verification_clause() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:verify|check|ensure|confirm|validate)\b(?:\s+that)?[\s:]+(.+)$")
            .expect("valid regex")
    })
}

/// In-memory collection of templates backed by a directory
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
    templates: Vec<Template>,
}

impl TemplateStore {
    /// Load every `*.txt` file directly inside `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let templates = load_templates(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            templates,
        })
    }

    pub fn from_templates(dir: &Path, templates: Vec<Template>) -> Self {
        Self {
            dir: dir.to_path_buf(),
            templates,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }

    /// Make a freshly adapted document available as a template for the rest of the run
    pub fn push(&mut self, template: Template) {
        self.templates.push(template);
    }

    /// Write a generated document next to the library files as `<id>.txt`
    pub fn save_generated(&self, template: &Template) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating template directory {:?}", self.dir))?;
        let path = self.dir.join(format!("{}.txt", template.id));
        std::fs::write(&path, &template.content)
            .with_context(|| format!("writing generated template {:?}", path))?;
        Ok(path)
    }

    /// Library templates per `RESI-cos-NoTruck` shape
    pub fn breakdown(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for t in self.templates.iter().filter(|t| !t.is_generated) {
            *counts.entry(t.shape_key()).or_insert(0) += 1;
        }
        counts
    }
}

/// Load all templates from a directory; unreadable files are skipped
pub fn load_templates(dir: &Path) -> Result<Vec<Template>> {
    if !dir.is_dir() {
        tracing::warn!("Template directory {:?} does not exist, starting empty", dir);
        return Ok(Vec::new());
    }

    let mut templates = Vec::new();

    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| match e {
            Ok(e) => Some(e),
            Err(err) => {
                tracing::warn!("Skipping unreadable directory entry: {}", err);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "txt"))
    {
        let path = entry.path();
        match parse_template_file(path) {
            Ok(template) => {
                if template.steps.is_empty() {
                    tracing::warn!(
                        "{:?} has no numbered steps, excluded from matching",
                        path.file_name().unwrap_or_default()
                    );
                }
                tracing::debug!("Loaded {} ({} steps)", template.id, template.steps.len());
                templates.push(template);
            }
            Err(e) => tracing::warn!("Skipping {:?}: {:#}", path, e),
        }
    }

    tracing::info!("Loaded {} templates from {:?}", templates.len(), dir);
    Ok(templates)
}

/// Read and parse one template file
pub fn parse_template_file(path: &Path) -> Result<Template> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .with_context(|| format!("non UTF-8 file name {:?}", path))?;

    let template = template_from_content(stem, &content);
    for (expected, found) in numbering_gaps(&template.steps) {
        tracing::warn!(
            "{}: step numbering jumps to {} where {} was expected, keeping partial parse",
            template.id,
            found,
            expected
        );
    }
    Ok(template)
}

/// Build a template from a file stem and its content
pub fn template_from_content(stem: &str, content: &str) -> Template {
    let (customer_type, scenario_type, truck_roll) = classify_file_name(stem);
    let title = testcase_name(content).unwrap_or_else(|| {
        stem.replace(['_', '-'], " ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    });

    // Generated files are saved under their id, which already carries the prefix
    let id = if stem.starts_with("TC_") {
        stem.to_string()
    } else {
        format!("TC_{}", stem)
    };

    Template {
        id,
        title,
        customer_type,
        scenario_type,
        truck_roll,
        customer_status: scenario_type.default_customer_status(),
        content: content.to_string(),
        steps: parse_steps(content),
        is_generated: false,
        template_sources: Vec::new(),
        generation_reasoning: None,
    }
}

/// Derive (customer type, scenario type, truck roll) from a file name
///
/// Truck roll falls back to the scenario default when the name has no
/// marker: change of service assumes no visit, install assumes one.
pub fn classify_file_name(stem: &str) -> (CustomerType, ScenarioType, TruckRoll) {
    let customer = if stem.to_uppercase().contains("RESI") {
        CustomerType::Residential
    } else {
        CustomerType::Business
    };

    let scenario = if stem.to_lowercase().contains("cos") {
        ScenarioType::ChangeOfService
    } else {
        ScenarioType::Install
    };

    // Word-separated so markers never run across word boundaries
    let words = format!(
        " {} ",
        stem.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    );

    let truck = if [
        " no truck",
        " notruck",
        " without truck",
        " without technician",
        " truckroll no ",
        " truck roll no ",
    ]
    .iter()
    .any(|m| words.contains(m))
    {
        TruckRoll::NotRequired
    } else if [" with truck", " withtruck", " truckroll", " truck roll"]
        .iter()
        .any(|m| words.contains(m))
    {
        TruckRoll::Required
    } else {
        scenario.default_truck_roll()
    };

    (customer, scenario, truck)
}

fn testcase_name(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let line = line.trim();
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("testcase_name") && !value.trim().is_empty() {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}

/// Text following the `Test_steps:` marker, or the whole content without one
fn step_section(content: &str) -> &str {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.to_ascii_lowercase().starts_with(STEP_SECTION_MARKER) {
            let start = offset + (line.len() - trimmed.len()) + STEP_SECTION_MARKER.len();
            return &content[start..];
        }
        offset += line.len();
    }
    content
}

/// Step number and inline text if the line opens a step
fn match_marker(line: &str) -> Option<(u32, &str)> {
    let caps = numbered_marker()
        .captures(line)
        .or_else(|| step_word_marker().captures(line))?;
    let number = caps.get(1)?.as_str().parse().ok()?;
    let rest = caps
        .get(2)
        .or_else(|| caps.get(3))
        .map_or("", |m| m.as_str().trim());
    Some((number, rest))
}

struct PendingStep {
    number: u32,
    lines: Vec<String>,
    absorbed: usize,
}

impl PendingStep {
    fn open(number: u32, inline: &str) -> Self {
        let mut lines = Vec::new();
        if !inline.is_empty() {
            lines.push(inline.to_string());
        }
        Self {
            number,
            lines,
            absorbed: 0,
        }
    }

    /// Returns false once the body cap is reached
    fn absorb(&mut self, line: &str) -> bool {
        self.lines.push(line.to_string());
        self.absorbed += 1;
        self.absorbed < MAX_STEP_BODY_LINES
    }

    fn finish(self) -> StepRecord {
        let expected_result = extract_expected_result(&self.lines);
        StepRecord {
            number: self.number,
            action: self.lines.join("\n"),
            expected_result,
        }
    }
}

enum ScanState {
    SeekingMarker,
    Accumulating(PendingStep),
}

/// Parse ordered step records out of a document body
pub fn parse_steps(content: &str) -> Vec<StepRecord> {
    let mut steps = Vec::new();
    let mut state = ScanState::SeekingMarker;
    let mut last_number = 0u32;

    for raw in step_section(content).lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some((number, inline)) = match_marker(line) {
            if number > last_number {
                if let ScanState::Accumulating(step) =
                    std::mem::replace(&mut state, ScanState::SeekingMarker)
                {
                    steps.push(step.finish());
                }
                state = ScanState::Accumulating(PendingStep::open(number, inline));
                last_number = number;
                continue;
            }
        }

        state = match state {
            ScanState::SeekingMarker => ScanState::SeekingMarker,
            ScanState::Accumulating(mut step) => {
                if step.absorb(line) {
                    ScanState::Accumulating(step)
                } else {
                    tracing::debug!(
                        "Step {} reached {} body lines, ignoring text until the next marker",
                        step.number,
                        MAX_STEP_BODY_LINES
                    );
                    steps.push(step.finish());
                    ScanState::SeekingMarker
                }
            }
        };
    }

    if let ScanState::Accumulating(step) = state {
        steps.push(step.finish());
    }

    steps
}

/// Pairs of (expected, found) where step numbering is not 1, 2, 3, ...
pub fn numbering_gaps(steps: &[StepRecord]) -> Vec<(u32, u32)> {
    let mut gaps = Vec::new();
    let mut expected = 1;
    for step in steps {
        if step.number != expected {
            gaps.push((expected, step.number));
        }
        expected = step.number + 1;
    }
    gaps
}

/// Second pass: pull the expected result out of a step's lines
pub(crate) fn extract_expected_result(lines: &[String]) -> Option<String> {
    if let Some(explicit) = lines.iter().find_map(|l| {
        expected_result_line()
            .captures(l)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
    }) {
        return Some(explicit);
    }

    let clauses: Vec<String> = lines
        .iter()
        .filter(|l| {
            let lower = l.to_lowercase();
            VERIFICATION_VERBS.iter().any(|v| lower.contains(v))
        })
        .filter_map(|l| {
            verification_clause()
                .captures(l)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().trim_end_matches(['.', ';']).to_string())
        })
        .filter(|s| !s.is_empty())
        .collect();

    if clauses.is_empty() {
        None
    } else {
        Some(clauses.join("; "))
    }
}

impl Template {
    /// Serialize back to the on-disk template format
    pub fn to_file_format(&self) -> String {
        render_file_format(&self.title, &self.steps)
    }
}

pub fn render_file_format(title: &str, steps: &[StepRecord]) -> String {
    let mut out = format!("Testcase_name: {}\nTest_steps:\n", title);
    for step in steps {
        out.push_str(&format!("{}.\n", step.number));
        for line in step.action.lines() {
            // A body line that reads as a later marker would split the step on reload
            if matches!(match_marker(line.trim()), Some((n, _)) if n > step.number) {
                out.push_str("- ");
            }
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUSI_COS: &str = "Testcase_name: BUSI - CoS Customer adding Eero Service\n\
Test_steps:\n\
1.\n\
Prerequisites:\n\
- a commercial test customer with an active Internet Plan along with active HSD device;\n\
2.\n\
From the Common Search window:\n\
- Select customer type: Commercial;\n\
3.\n\
Add the Eero W2W service and complete the order.\n\
Verify that the order status is Completed.\n\
4.\n\
Open the kafka eero-order queue.\n\
Expected result: the message contains the account number\n";

    #[test]
    fn test_parse_steps_after_marker() {
        let steps = parse_steps(BUSI_COS);
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0].number, 1);
        assert!(steps[0].action.starts_with("Prerequisites:"));
        assert_eq!(steps[3].number, 4);
        // Header above Test_steps is not a step
        assert!(!steps[0].action.contains("Testcase_name"));
    }

    #[test]
    fn test_expected_result_extraction() {
        let steps = parse_steps(BUSI_COS);
        assert_eq!(
            steps[2].expected_result.as_deref(),
            Some("the order status is Completed")
        );
        assert_eq!(
            steps[3].expected_result.as_deref(),
            Some("the message contains the account number")
        );
        assert!(steps[1].expected_result.is_none());
    }

    #[test]
    fn test_parse_alternate_markers() {
        let content = "Step 1: Open ACSR\nStep 2: Search the account\n3) Submit the order\nConfirm the confirmation banner is shown";
        let steps = parse_steps(content);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].action, "Open ACSR");
        assert_eq!(steps[2].action, "Submit the order\nConfirm the confirmation banner is shown");
        assert_eq!(
            steps[2].expected_result.as_deref(),
            Some("the confirmation banner is shown")
        );
    }

    #[test]
    fn test_markers_without_space() {
        let steps = parse_steps("Test_steps:\n1.Login to ACSR\n2.Search account\nSpeed 1.5 GHz band\n3)Add eero\n");
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].action, "Login to ACSR");
        assert_eq!(steps[1].action, "Search account\nSpeed 1.5 GHz band");
        assert_eq!(steps[2].number, 3);
        assert_eq!(steps[2].action, "Add eero");

        // A decimal at the start of a line is body text, not a marker
        let steps = parse_steps("1. Check signal\n2.4 GHz radio enabled\n");
        assert_eq!(steps.len(), 1);
        assert!(steps[0].action.contains("2.4 GHz radio enabled"));
    }

    #[test]
    fn test_sub_list_past_step_number_survives_render() {
        let steps = vec![
            StepRecord {
                number: 1,
                action: "Prerequisites:\n1. account\n2. device\n3. plan".to_string(),
                expected_result: None,
            },
            StepRecord {
                number: 2,
                action: "Add eero".to_string(),
                expected_result: None,
            },
        ];
        let rendered = render_file_format("BUSI - CoS - Add Eero", &steps);
        let reparsed = parse_steps(&rendered);
        assert_eq!(reparsed.len(), 2);
        assert!(reparsed[0].action.contains("2. device"));
        assert_eq!(reparsed[1].action, "Add eero");
        // Rendering the reparsed steps is stable
        assert_eq!(render_file_format("BUSI - CoS - Add Eero", &reparsed), rendered);
    }

    #[test]
    fn test_sub_list_numbers_stay_in_step() {
        let content = "1. Prepare\n2. Configure devices\n1. first eero\n2. second eero\n3. Finish";
        let steps = parse_steps(content);
        assert_eq!(steps.len(), 3);
        assert!(steps[1].action.contains("1. first eero"));
        assert!(steps[1].action.contains("2. second eero"));
        assert_eq!(steps[2].action, "Finish");
    }

    #[test]
    fn test_body_absorption_is_capped() {
        let mut content = String::from("1. Long step\n");
        for i in 0..80 {
            content.push_str(&format!("line {}\n", i));
        }
        content.push_str("2. Next step\n");

        let steps = parse_steps(&content);
        assert_eq!(steps.len(), 2);
        // inline text + 50 body lines
        assert_eq!(steps[0].action.lines().count(), 1 + MAX_STEP_BODY_LINES);
        assert!(!steps[0].action.contains("line 79"));
        assert_eq!(steps[1].action, "Next step");
    }

    #[test]
    fn test_numbering_gaps_detected() {
        let steps = parse_steps("1. a\n2. b\n5. c");
        assert_eq!(steps.len(), 3);
        assert_eq!(numbering_gaps(&steps), vec![(3, 5)]);
        assert!(numbering_gaps(&parse_steps("1. a\n2. b")).is_empty());
    }

    #[test]
    fn test_classify_file_names() {
        assert_eq!(
            classify_file_name("BUSI - Install HSD along with Eero - No TruckRoll"),
            (CustomerType::Business, ScenarioType::Install, TruckRoll::NotRequired)
        );
        assert_eq!(
            classify_file_name("RESI - Install HSD along with Eero - With TruckRoll"),
            (CustomerType::Residential, ScenarioType::Install, TruckRoll::Required)
        );
        assert_eq!(
            classify_file_name("BUSI - CoS Customer adding Eero Service"),
            (CustomerType::Business, ScenarioType::ChangeOfService, TruckRoll::NotRequired)
        );
        assert_eq!(
            classify_file_name("RESI - Install Eero"),
            (CustomerType::Residential, ScenarioType::Install, TruckRoll::Required)
        );
    }

    #[test]
    fn test_truck_markers_respect_word_boundaries() {
        assert_eq!(
            classify_file_name("BUSI - CoS - Add eero - TruckRoll No").2,
            TruckRoll::NotRequired
        );
        assert_eq!(
            classify_file_name("RESI_install_truck_roll_no").2,
            TruckRoll::NotRequired
        );
        assert_eq!(
            classify_file_name("TC_GEN_BUSI_cos_NoTruck_20261019_101500_ab12cd34").2,
            TruckRoll::NotRequired
        );
        assert_eq!(classify_file_name("RESI_cos_WithTruck").2, TruckRoll::Required);
        assert_eq!(
            classify_file_name("BUSI - CoS - TruckRoll Notes").2,
            TruckRoll::Required
        );
    }

    #[test]
    fn test_cos_without_marker_defaults_to_no_truck() {
        let content = "Test_steps:\n1. Do X\n2. Do A\n3. Do B\n4. Do C\n5. Do Y\n";
        let t = template_from_content("RESI - CoS - Add Eero Plus", content);
        assert_eq!(t.scenario_type, ScenarioType::ChangeOfService);
        assert_eq!(t.truck_roll, TruckRoll::NotRequired);
        assert_eq!(t.truck_roll.label(), "No");
        assert_eq!(t.steps.len(), 5);
        assert_eq!(t.id, "TC_RESI - CoS - Add Eero Plus");
    }

    #[test]
    fn test_title_prefers_testcase_name() {
        let t = template_from_content("some_file", BUSI_COS);
        assert_eq!(t.title, "BUSI - CoS Customer adding Eero Service");
        let t = template_from_content("RESI_install-eero", "1. a");
        assert_eq!(t.title, "RESI install eero");
    }

    #[test]
    fn test_reserialized_steps_reparse_identically() {
        let original = template_from_content("BUSI - CoS Customer adding Eero Service", BUSI_COS);
        let rendered = original.to_file_format();
        let reparsed = parse_steps(&rendered);
        assert_eq!(reparsed.len(), original.steps.len());
        assert_eq!(parse_steps(BUSI_COS).len(), original.steps.len());
        for (a, b) in reparsed.iter().zip(&original.steps) {
            assert_eq!(a.number, b.number);
            assert_eq!(a.action, b.action);
        }
    }

    #[test]
    fn test_load_directory_skips_non_txt_and_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("BUSI - CoS Customer adding Eero Service.txt"),
            BUSI_COS,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.md"), "1. not a template").unwrap();
        std::fs::write(dir.path().join("RESI - Install - Empty.txt"), "no steps here").unwrap();

        let store = TemplateStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 2);
        let matchable: Vec<_> = store.templates().iter().filter(|t| t.is_matchable()).collect();
        assert_eq!(matchable.len(), 1);
        assert_eq!(store.breakdown().get("BUSI-cos-NoTruck"), Some(&1));
    }

    #[test]
    fn test_load_skips_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("BUSI - CoS Customer adding Eero Service.txt"),
            BUSI_COS,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("RESI - CoS - Broken.txt"),
            [0x31, 0x2e, 0x20, 0xff, 0xfe, 0xfd, 0x0a],
        )
        .unwrap();

        let store = TemplateStore::load(dir.path()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.templates()[0].id, "TC_BUSI - CoS Customer adding Eero Service");
    }

    #[test]
    fn test_load_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let templates = load_templates(&dir.path().join("absent")).unwrap();
        assert!(templates.is_empty());
    }

    #[test]
    fn test_save_generated_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TemplateStore::from_templates(dir.path(), Vec::new());
        let mut t = template_from_content("BUSI - CoS Customer adding Eero Service", BUSI_COS);
        t.id = "TC_GEN_BUSI_cos_NoTruck_test".to_string();
        t.content = t.to_file_format();

        let path = store.save_generated(&t).unwrap();
        let reloaded = parse_template_file(&path).unwrap();
        assert_eq!(reloaded.id, t.id);
        assert_eq!(reloaded.steps.len(), t.steps.len());
        assert_eq!(reloaded.truck_roll, TruckRoll::NotRequired);
        assert_eq!(reloaded.customer_type, CustomerType::Business);
    }
}
