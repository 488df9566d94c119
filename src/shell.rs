//! Line-oriented interaction shell
//!
//! Reads user messages, prints answers, and collects approvals when a run
//! suspends. Works over any async reader/writer so it can be driven from
//! stdin/stdout or from in-memory buffers.

use crate::graph::ExecutionGraph;
use crate::models::RunResult;
use crate::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::{info, warn};

const APPROVAL_QUESTION: &str = "Approve (yes/no): ";

async fn emit<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Print the outcome of a run, asking for approvals until it settles.
/// Returns `false` when input ends while a decision is pending.
async fn settle<R, W>(
    graph: &ExecutionGraph,
    thread_id: &str,
    mut outcome: Result<RunResult>,
    lines: &mut Lines<R>,
    output: &mut W,
) -> Result<bool>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    loop {
        match outcome {
            Ok(RunResult::Completed { final_text }) => {
                emit(output, &format!("Agent: {}\n", final_text)).await?;
                return Ok(true);
            }
            Ok(RunResult::Suspended { prompt, .. }) => {
                emit(output, &format!("{}\n{}", prompt, APPROVAL_QUESTION)).await?;

                let Some(answer) = lines.next_line().await? else {
                    return Ok(false);
                };
                outcome = graph.resume(thread_id, answer.trim()).await;
            }
            Err(e) => {
                warn!(thread_id, error = %e, "Run failed");
                emit(output, &format!("Error: {}\n", e)).await?;
                return Ok(true);
            }
        }
    }
}

pub async fn run_shell<R, W>(
    graph: &ExecutionGraph,
    thread_id: &str,
    input: R,
    mut output: W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    info!(thread_id, "Shell session started");

    // A durable store may hand back a thread that is still waiting on a decision.
    let state = graph.thread_state(thread_id).await?;
    if let Some(pending) = state.pending_interrupt {
        let waiting = Ok(RunResult::Suspended {
            prompt: pending.prompt,
            call_id: pending.call_id,
        });
        if !settle(graph, thread_id, waiting, &mut lines, &mut output).await? {
            return Ok(());
        }
    }

    loop {
        emit(&mut output, "You: ").await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text.eq_ignore_ascii_case("exit") || text.eq_ignore_ascii_case("quit") {
            break;
        }

        let outcome = graph.submit(thread_id, text).await;
        if !settle(graph, thread_id, outcome, &mut lines, &mut output).await? {
            break;
        }
    }

    emit(&mut output, "\nGoodbye.\n").await?;
    info!(thread_id, "Shell session ended");
    Ok(())
}
