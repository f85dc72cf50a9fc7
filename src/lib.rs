//! eero-testgen - Telecom QA test-case generator
//!
//! Turns a free-text user story about eero (mesh Wi-Fi) provisioning into
//! QA test-case documents, reusing a directory of existing test cases as
//! templates and asking an LLM to adapt one when nothing stored fits.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use eero_testgen::{AppConfig, GenerationRequest, LlmAdapter, Orchestrator, TemplateStore};
//!
//! let config = AppConfig::load(None)?;
//! let store = TemplateStore::load(&config.templates_dir)?;
//! let mut orchestrator = Orchestrator::new(store, LlmAdapter::new(config.llm.clone()));
//!
//! let request = GenerationRequest::new("Business customers removing an additional eero device")
//!     .with_count(5);
//! let result = orchestrator.generate(&request).await?;
//! println!("{}", result.report);
//! ```
//!
//! # Pipeline
//!
//! ```text
//! user story ──► detector ──► consolidate ──► requirements
//!                   │                              │
//!              rules (31)              ┌───────────┴───────────┐
//!                                      ▼                       ▼
//!                               retrieve_exact          selector + adapt
//!                               (library docs)       (LLM, re-ask, heuristic)
//!                                      └───────────┬───────────┘
//!                                                  ▼
//!                                      delivered documents + report
//! ```

pub mod adapt;
pub mod config;
pub mod detector;
pub mod orchestrator;
pub mod report;
pub mod rules;
pub mod selector;
pub mod templates;
pub mod types;

// Core types
pub use types::*;

// Template library
pub use templates::{load_templates, parse_steps, parse_template_file, TemplateStore};

// Rule table and detection
pub use detector::{analyze, detect, Detection, StoryAnalysis};
pub use rules::{CombinationRule, VariantTag, MISSING_PRIORITY_IDS};

// Selection and adaptation
pub use adapt::{AdaptationError, AdaptationRequest, Adapter, LlmAdapter};
pub use selector::{TemplateSelector, WorkflowQuality};

// Pipeline
pub use config::AppConfig;
pub use orchestrator::{GenerationRequest, GenerationResult, GenerationSummary, Orchestrator};
