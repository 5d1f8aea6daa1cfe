//! `mweave feedback` -- confirm or reject a completed run's answer.

use clap::{ArgGroup, Args};

use mathweave_core::FeedbackOutcome;
use mathweave_core::knowledge::AppendOutcome;
use mathweave_core::learning::Learned;
use mathweave_types::feedback::FeedbackRecord;
use mathweave_types::run::RunId;

use super::{App, GlobalOpts, print_outcome};

/// Arguments for `mweave feedback`.
#[derive(Args)]
#[command(group(ArgGroup::new("judgment").required(true).args(["correct", "incorrect"])))]
pub struct FeedbackArgs {
    /// Run id of a completed run.
    pub run_id: String,

    /// The answer was right; remember the solution.
    #[arg(long)]
    pub correct: bool,

    /// The answer was wrong.
    #[arg(long)]
    pub incorrect: bool,

    /// What the answer should have been, or a hint. Starts a new linked run.
    #[arg(long, requires = "incorrect")]
    pub correction: Option<String>,
}

pub async fn run(opts: &GlobalOpts, args: FeedbackArgs) -> anyhow::Result<()> {
    let app = App::open(opts).await?;
    let run_id = RunId::from(args.run_id.as_str());

    let snapshot = app.orchestrator.snapshot(&run_id).await?;
    let output = snapshot.final_output()?;
    let record = if args.correct {
        FeedbackRecord::correct(&output.final_answer)
    } else {
        FeedbackRecord::incorrect(&output.final_answer, args.correction)
    };

    match app.orchestrator.submit_feedback(&run_id, record).await? {
        FeedbackOutcome::Learned(Learned { entry_id, outcome }) => {
            let verb = if outcome == AppendOutcome::Inserted {
                "stored"
            } else {
                "already known"
            };
            println!("Solution {verb}: knowledge entry {entry_id}.");
        }
        FeedbackOutcome::Replanned(outcome) => {
            println!("Re-solving as run {} with your correction.", outcome.run_id());
            print_outcome(&outcome);
        }
        FeedbackOutcome::Reverified { verdicts, consensus } => {
            for v in &verdicts {
                println!(
                    "  {}: {:?} {}",
                    v.verifier_id,
                    v.judgment,
                    v.rationale.as_deref().unwrap_or("")
                );
            }
            if consensus.accepted {
                println!(
                    "Strict re-check still accepts the answer ({:.2} agreement).",
                    consensus.agreement_ratio
                );
            } else {
                println!(
                    "Strict re-check does not accept the answer ({:.2} agreement).",
                    consensus.agreement_ratio
                );
            }
        }
    }
    Ok(())
}
