//! `mweave resume` and `mweave pending` -- answer suspended runs.

use clap::{ArgGroup, Args};
use comfy_table::{Table, presets::UTF8_FULL};
use tokio_util::sync::CancellationToken;

use mathweave_types::escalation::{EscalationPayload, HitlResponse};
use mathweave_types::run::RunId;

use super::{App, GlobalOpts, print_outcome};

/// Arguments for `mweave resume`. Exactly one action is required.
#[derive(Args)]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["clarify", "approve", "replan", "answer", "reexecute", "dismiss"])
))]
pub struct ResumeArgs {
    /// Run id of the suspended run.
    pub run_id: String,

    /// Restated problem, for an ambiguity escalation.
    #[arg(long, value_name = "STATEMENT")]
    pub clarify: Option<String>,

    /// Accept a guardrail-flagged plan anyway.
    #[arg(long)]
    pub approve: bool,

    /// Reason recorded with `--approve`.
    #[arg(long, requires = "approve")]
    pub note: Option<String>,

    /// Reject the flagged plan and plan again.
    #[arg(long)]
    pub replan: bool,

    /// Pick the final answer when the verifiers disagree.
    #[arg(long, value_name = "ANSWER")]
    pub answer: Option<String>,

    /// Execute the plan again and re-verify.
    #[arg(long)]
    pub reexecute: bool,

    /// Give up on the run.
    #[arg(long)]
    pub dismiss: bool,
}

impl ResumeArgs {
    fn response(&self) -> HitlResponse {
        if let Some(statement) = &self.clarify {
            HitlResponse::clarify(statement.clone())
        } else if self.approve {
            HitlResponse::approve_override(self.note.clone())
        } else if self.replan {
            HitlResponse::request_replan()
        } else if let Some(answer) = &self.answer {
            HitlResponse::select_answer(answer.clone())
        } else if self.reexecute {
            HitlResponse::request_reexecution()
        } else {
            HitlResponse::dismiss()
        }
    }
}

pub async fn run(opts: &GlobalOpts, args: ResumeArgs) -> anyhow::Result<()> {
    let app = App::open(opts).await?;
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let run_id = RunId::from(args.run_id.as_str());
    let outcome = app
        .orchestrator
        .resume_with_cancel(&run_id, args.response(), cancel)
        .await?;
    print_outcome(&outcome);
    Ok(())
}

/// List runs waiting on a human, expiring any that waited too long first.
pub async fn pending(opts: &GlobalOpts) -> anyhow::Result<()> {
    let app = App::open(opts).await?;
    let expired = app.orchestrator.expire_stale(chrono::Utc::now()).await?;
    for outcome in &expired {
        eprintln!("run {} timed out waiting for a response", outcome.run_id());
    }

    let requests = app.orchestrator.pending().await?;
    if requests.is_empty() {
        println!("No runs are waiting for input.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["RUN", "ORIGIN", "#", "WAITING SINCE", "SUMMARY"]);
    for request in &requests {
        table.add_row([
            request.run_id.to_string(),
            request.stage_origin.to_string(),
            request.sequence.to_string(),
            request.awaiting_since.format("%Y-%m-%d %H:%M:%S").to_string(),
            summarize(&request.payload),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn summarize(payload: &EscalationPayload) -> String {
    match payload {
        EscalationPayload::Ambiguity { flags, .. } => {
            let kinds: Vec<String> = flags.iter().map(|k| k.to_string()).collect();
            format!("ambiguous: {}", kinds.join(", "))
        }
        EscalationPayload::Guardrail { verdict, .. } => {
            let rules: Vec<String> = verdict.violated_rules.iter().map(|r| r.to_string()).collect();
            format!("flagged: {}", rules.join(", "))
        }
        EscalationPayload::Verification { consensus, .. } => {
            format!("verifiers split ({:.2} agreement)", consensus.agreement_ratio)
        }
    }
}
