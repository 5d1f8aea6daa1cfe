//! `mweave solve` -- solve a problem statement.
//!
//! By default escalations are answered on the terminal as they come up.
//! With `--detach` the run is left suspended at the first escalation and can
//! be picked up later with `mweave resume`.

use async_trait::async_trait;
use clap::Args;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use mathweave_core::HumanOperator;
use mathweave_types::error::PipelineError;
use mathweave_types::escalation::{HitlRequest, HitlResponse, StageOrigin};

use super::{App, GlobalOpts, print_outcome, print_request};

/// Arguments for `mweave solve`.
#[derive(Args)]
pub struct SolveArgs {
    /// The problem statement.
    pub text: String,

    /// Leave the run suspended at its first escalation instead of prompting.
    #[arg(long)]
    pub detach: bool,
}

pub async fn run(opts: &GlobalOpts, args: SolveArgs) -> anyhow::Result<()> {
    let app = App::open(opts).await?;
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let outcome = if args.detach {
        app.orchestrator.start_with_cancel(&args.text, cancel).await?
    } else {
        let operator = StdinOperator::new();
        app.orchestrator.run_interactive(&args.text, &operator, cancel).await?
    };

    print_outcome(&outcome);
    Ok(())
}

/// Answers escalations by prompting on stdout and reading stdin.
struct StdinOperator {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl StdinOperator {
    fn new() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }

    async fn ask(&self, prompt: &str) -> Result<String, PipelineError> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;
        let mut lines = self.lines.lock().await;
        match lines.next_line().await? {
            Some(line) => Ok(line.trim().to_string()),
            // Closed stdin means nobody is there to answer.
            None => Ok("dismiss".into()),
        }
    }
}

#[async_trait]
impl HumanOperator for StdinOperator {
    async fn respond(&self, request: &HitlRequest) -> Result<HitlResponse, PipelineError> {
        print_request(request);
        loop {
            let line = self.ask("> ").await?;
            if let Some(response) = parse_reply(request.stage_origin, &line) {
                return Ok(response);
            }
            println!("unrecognized reply: {line}");
        }
    }
}

/// Map a terminal reply onto a response for the given escalation.
///
/// Accepts the action keywords shown by [`print_request`]; for ambiguity and
/// verification escalations any other non-empty text is taken as the
/// restatement or the chosen answer.
fn parse_reply(origin: StageOrigin, line: &str) -> Option<HitlResponse> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (line, ""),
    };
    let word = word.trim_start_matches("--");
    let rest = (!rest.is_empty()).then(|| rest.to_string());

    match (origin, word) {
        (_, "dismiss") => Some(HitlResponse::dismiss()),
        (StageOrigin::Ambiguity, "clarify") => rest.map(HitlResponse::clarify),
        (StageOrigin::Ambiguity, _) => Some(HitlResponse::clarify(line)),
        (StageOrigin::Guardrail, "approve") => Some(HitlResponse::approve_override(rest)),
        (StageOrigin::Guardrail, "replan") => Some(HitlResponse::request_replan()),
        (StageOrigin::Guardrail, _) => None,
        (StageOrigin::Verification, "reexecute") => Some(HitlResponse::request_reexecution()),
        (StageOrigin::Verification, "answer") => rest.map(HitlResponse::select_answer),
        (StageOrigin::Verification, _) => Some(HitlResponse::select_answer(line)),
    }
}
