//! CLI command implementations for `mweave`.
//!
//! Each subcommand is implemented in its own module:
//!
//! - [`solve`] -- Start a run and answer escalations interactively.
//! - [`resume`] -- Answer a suspended run's escalation; list pending ones.
//! - [`feedback`] -- Confirm or reject a completed answer.
//! - [`kb`] -- Knowledge store maintenance.
//! - [`audit_cmd`] -- Audit trail display.
//! - [`config_cmd`] -- Configuration display.

pub mod audit_cmd;
pub mod config_cmd;
pub mod feedback;
pub mod kb;
pub mod resume;
pub mod solve;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use comfy_table::{Table, presets::UTF8_FULL};

use mathweave_core::audit::JsonlAuditSink;
use mathweave_core::config::{load_config, load_config_or_default};
use mathweave_core::knowledge::InMemoryKnowledgeStore;
use mathweave_core::llm_adapter::LlmReasoner;
use mathweave_core::run_store::FileRunStore;
use mathweave_core::{Orchestrator, Pipeline, RunOutcome};
use mathweave_types::config::PipelineConfig;
use mathweave_types::escalation::{EscalationPayload, HitlRequest};

/// Options shared by every subcommand.
pub struct GlobalOpts {
    pub config: Option<String>,
    pub model: Option<String>,
}

/// Where mathweave keeps its state.
pub struct Paths {
    pub home: PathBuf,
}

impl Paths {
    /// `~/.mathweave`, or `./.mathweave` when no home directory is known.
    pub fn discover() -> Self {
        let home = dirs::home_dir()
            .map(|h| h.join(".mathweave"))
            .unwrap_or_else(|| PathBuf::from(".mathweave"));
        Self { home }
    }

    pub fn config(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    pub fn runs(&self) -> PathBuf {
        self.home.join("runs")
    }

    pub fn audit(&self) -> PathBuf {
        self.home.join("audit")
    }

    pub fn knowledge(&self) -> PathBuf {
        self.home.join("knowledge.jsonl")
    }
}

/// Load configuration from the given path override or from
/// `~/.mathweave/config.toml`, applying `--model` on top.
///
/// Returns the defaults if no config file is found and none was named.
pub fn resolve_config(opts: &GlobalOpts, paths: &Paths) -> anyhow::Result<PipelineConfig> {
    let mut config = match &opts.config {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!("config file not found: {path_str}");
            }
            load_config(path)?
        }
        None => load_config_or_default(&paths.config())?,
    };
    if let Some(model) = &opts.model {
        config.reasoner.model = model.clone();
    }
    Ok(config)
}

/// Everything a command needs to drive runs.
pub struct App {
    pub paths: Paths,
    pub config: PipelineConfig,
    pub store: Arc<InMemoryKnowledgeStore>,
    pub orchestrator: Orchestrator,
}

impl App {
    pub async fn open(opts: &GlobalOpts) -> anyhow::Result<Self> {
        let paths = Paths::discover();
        let config = resolve_config(opts, &paths)?;
        let store = open_store(&paths, &config).await?;
        let reasoner = LlmReasoner::from_config(&config.reasoner)?;
        let pipeline = Pipeline::new(&config, Arc::new(reasoner), store.clone());
        let orchestrator = Orchestrator::new(config.clone(), pipeline)?
            .with_run_store(Arc::new(FileRunStore::new(paths.runs())))
            .with_audit_sink(Arc::new(JsonlAuditSink::new(paths.audit())));
        Ok(Self {
            paths,
            config,
            store,
            orchestrator,
        })
    }
}

pub async fn open_store(paths: &Paths, config: &PipelineConfig) -> anyhow::Result<Arc<InMemoryKnowledgeStore>> {
    let store = InMemoryKnowledgeStore::open(paths.knowledge(), config.knowledge.embedding_dimension).await?;
    Ok(Arc::new(store))
}

/// Print what a run ended with.
pub fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(output) => {
            println!("{}", output.explanation.render());
            println!();
            println!(
                "run {} completed (agreement {:.2})",
                output.run_id, output.consensus.agreement_ratio
            );
        }
        RunOutcome::Suspended(request) => {
            print_request(request);
            println!();
            println!("answer with: mweave resume {} <action>", request.run_id);
        }
        RunOutcome::Failed(failure) => {
            eprintln!("run {} failed [{}]: {}", failure.run_id, failure.error.class(), failure.error);
        }
    }
}

/// Describe a pending escalation.
pub fn print_request(request: &HitlRequest) {
    println!("run {} needs input ({})", request.run_id, request.stage_origin);
    match &request.payload {
        EscalationPayload::Ambiguity { statement, findings, .. } => {
            println!("  statement: {statement}");
            for finding in findings {
                println!("  - {}: {}", finding.kind, finding.detail);
            }
            println!("  actions: --clarify <statement> | --dismiss");
        }
        EscalationPayload::Guardrail { plan, verdict } => {
            for (i, step) in plan.steps.iter().enumerate() {
                let expr = step.expression.as_deref().unwrap_or("");
                println!("  {}. {} {}", i + 1, step.operation, expr);
            }
            for finding in &verdict.findings {
                let at = finding.step_index.map(|i| format!(" (step {})", i + 1)).unwrap_or_default();
                println!("  ! {}{}: {}", finding.rule, at, finding.detail);
            }
            println!("  actions: --approve | --replan | --dismiss");
        }
        EscalationPayload::Verification {
            final_answer,
            verdicts,
            consensus,
        } => {
            println!("  executed answer: {final_answer}");
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(["VERIFIER", "JUDGMENT", "ANSWER", "CONFIDENCE"]);
            for v in verdicts {
                table.add_row([
                    v.verifier_id.clone(),
                    format!("{:?}", v.judgment).to_lowercase(),
                    v.claimed_answer.clone().unwrap_or_else(|| "-".into()),
                    format!("{:.2}", v.confidence),
                ]);
            }
            println!("{table}");
            println!("  agreement: {:.2}", consensus.agreement_ratio);
            println!("  actions: --answer <answer> | --reexecute | --dismiss");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_home() {
        let paths = Paths {
            home: PathBuf::from("/tmp/mw"),
        };
        assert_eq!(paths.config(), PathBuf::from("/tmp/mw/config.toml"));
        assert_eq!(paths.runs(), PathBuf::from("/tmp/mw/runs"));
        assert_eq!(paths.knowledge(), PathBuf::from("/tmp/mw/knowledge.jsonl"));
    }

    #[test]
    fn model_flag_overrides_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("c.toml");
        std::fs::write(&file, "[reasoner]\nmodel = \"openai/gpt-4o\"\n").unwrap();
        let paths = Paths {
            home: dir.path().to_path_buf(),
        };

        let opts = GlobalOpts {
            config: Some(file.display().to_string()),
            model: None,
        };
        assert_eq!(resolve_config(&opts, &paths).unwrap().reasoner.model, "openai/gpt-4o");

        let opts = GlobalOpts {
            config: Some(file.display().to_string()),
            model: Some("groq/llama-3.3-70b-versatile".into()),
        };
        assert_eq!(
            resolve_config(&opts, &paths).unwrap().reasoner.model,
            "groq/llama-3.3-70b-versatile"
        );
    }

    #[test]
    fn named_config_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths {
            home: dir.path().to_path_buf(),
        };
        let opts = GlobalOpts {
            config: Some(dir.path().join("missing.toml").display().to_string()),
            model: None,
        };
        assert!(resolve_config(&opts, &paths).is_err());
        let opts = GlobalOpts {
            config: None,
            model: None,
        };
        assert!(resolve_config(&opts, &paths).is_ok());
    }
}
