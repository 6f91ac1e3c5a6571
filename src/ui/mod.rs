use std::fmt::{Display, Formatter};
use std::io::Write;
use std::time::Instant;

use std::sync::mpsc::{channel, Sender};
use std::thread::ThreadId;

use console::{pad_str, pad_str_with, style, Alignment};
use std::io::BufWriter;

use crate::pricing::job::Escalation;
use crate::pricing::solver::SolveStatus;

/// Struct to hold the UI
/// Particulary the receiver channel
pub struct UI {
    sender: UISender,
}

#[derive(Clone)]
pub struct UISender {
    sender: Sender<UIMessage>,
}

// needed in stable rust, unstable auto detects
unsafe impl Send for UISender {}
unsafe impl Sync for UISender {}

impl UISender {
    /// Send typed UIMessage to internal channel
    pub fn send(&self, user_msg: UIUserMessage) {
        #[cfg(not(feature = "disable_ui"))]
        self.sender
            .send(UIMessage {
                thread_id: std::thread::current().id(),
                message: user_msg,
            })
            .unwrap();
    }
}

impl UI {
    pub fn get_sender(&self) -> UISender {
        self.sender.clone()
    }

    pub fn new() -> Self {
        let (sender, receiver) = channel();

        #[cfg(not(feature = "disable_ui"))]
        std::thread::spawn(move || {
            #[cfg(not(feature = "locked_out"))]
            let stdout = std::io::stdout();
            #[cfg(feature = "locked_out")]
            let stdout = std::io::stdout().lock();

            #[cfg(not(feature = "buffered_out"))]
            let mut buffered_out = stdout;
            #[cfg(feature = "buffered_out")]
            let mut buffered_out = BufWriter::with_capacity(512, stdout);

            let start_time = Instant::now();

            let mut total_heur_runtime = 0.0;
            let mut total_exact_runtime = 0.0;
            let mut finished_jobs: u64 = 0;
            let mut finished_rounds: u64 = 0;

            while let Ok(UIMessage { thread_id, message }) = receiver.recv() {
                match message {
                    UIUserMessage::TimeLimitReached => {
                        writeln!(
                            &mut buffered_out,
                            "{}",
                            style("Time Limit Reached").yellow().bold()
                        )
                        .unwrap();
                    }
                    UIUserMessage::Log(msg) => writeln!(
                        &mut buffered_out,
                        "[{:?}] {:>6.2}  {}",
                        thread_id,
                        start_time.elapsed().as_secs_f64(),
                        msg
                    )
                    .unwrap(),
                    UIUserMessage::LogS(msg) => writeln!(
                        &mut buffered_out,
                        "[{:?}] {:>6.2}  {}",
                        thread_id,
                        start_time.elapsed().as_secs_f64(),
                        msg
                    )
                    .unwrap(),
                    UIUserMessage::StartPricing { n_problems, n_solvers } => {
                        writeln!(
                            &mut buffered_out,
                            "{}",
                            pad_str_with(
                                &format!("{n_problems} blocks / {n_solvers} solvers"),
                                30,
                                Alignment::Center,
                                None,
                                '⎯'
                            )
                        )
                        .unwrap();
                        writeln!(
                            &mut buffered_out,
                            "{}",
                            style(pad_str("Pricing", 30, Alignment::Center, None)).green()
                        )
                        .unwrap();
                        writeln!(&mut buffered_out, "{}", "⎯".repeat(30)).unwrap();
                        buffered_out.flush().unwrap();
                    }
                    UIUserMessage::RoundStart(state) => {
                        writeln!(
                            &mut buffered_out,
                            "[{t:?}] {time:>6.2} started   round {state}",
                            t = thread_id,
                            time = start_time.elapsed().as_secs_f64(),
                            state = state
                        )
                        .unwrap();
                        buffered_out.flush().unwrap();
                    }
                    UIUserMessage::RoundFinish(state) => {
                        finished_rounds += 1;
                        writeln!(
                            &mut buffered_out,
                            "[{t:?}] {time:>6.2} completed round {state}",
                            t = thread_id,
                            time = start_time.elapsed().as_secs_f64(),
                            state = state
                        )
                        .unwrap();
                        buffered_out.flush().unwrap();
                    }
                    UIUserMessage::JobFinish(state) => {
                        // always needed for statistics
                        if state.heuristic {
                            total_heur_runtime += state.runtime;
                        } else {
                            total_exact_runtime += state.runtime;
                        }
                        finished_jobs += 1;

                        /* noisy */
                        writeln!(
                            &mut buffered_out,
                            "{}",
                            style(format!(
                                "[{t:?}] {time:>6.2} job {state}",
                                t = thread_id,
                                time = start_time.elapsed().as_secs_f64(),
                                state = state
                            ))
                            .dim()
                        )
                        .unwrap();
                    }
                    UIUserMessage::Escalated(state) => {
                        writeln!(
                            &mut buffered_out,
                            "{}",
                            style(format!(
                                "[{t:?}] {time:>6.2} escalated {state}",
                                t = thread_id,
                                time = start_time.elapsed().as_secs_f64(),
                                state = state
                            ))
                            .dim()
                        )
                        .unwrap();
                    }
                    UIUserMessage::EarlyStop { cols } => {
                        writeln!(
                            &mut buffered_out,
                            "[{:?}] {:>6.2}  {} {}",
                            thread_id,
                            start_time.elapsed().as_secs_f64(),
                            style("Early stop:").black().on_green().bold(),
                            style(format!("{cols} columns")).bold()
                        )
                        .unwrap();
                        buffered_out.flush().unwrap();
                    }
                    UIUserMessage::ExitUi { solver_summaries } => {
                        let final_time = start_time.elapsed().as_secs_f64();
                        writeln!(
                            &mut buffered_out,
                            "{}",
                            pad_str_with("Statistics", 30, Alignment::Center, None, '⎯')
                        )
                        .unwrap();
                        writeln!(
                            &mut buffered_out,
                            "total_heur_time: {total_heur_runtime:>8.2}s / total_exact_time: {total_exact_runtime:>8.2}s"
                        )
                        .unwrap();
                        writeln!(
                            &mut buffered_out,
                            "{finished_jobs} jobs in {finished_rounds} rounds ({final_time:>6.2}s wall)"
                        )
                        .unwrap();
                        for line in solver_summaries {
                            writeln!(&mut buffered_out, "{line}").unwrap();
                        }
                        writeln!(&mut buffered_out, "{}", "⎯".repeat(30)).unwrap();
                        buffered_out.flush().unwrap();
                        break;
                    }
                }
            }

            buffered_out.flush().unwrap();
        });

        Self {
            sender: UISender { sender },
        }
    }
}

impl Default for UI {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct RoundUIState {
    pub round: u32,
    pub farkas: bool,
    pub heuristic: bool,
    pub n_jobs: usize,
    pub n_chunks: usize,
    pub cols: usize,
    pub determined: bool,
    pub runtime: f64,
}

impl Display for RoundUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "r{round}  type=<{ptype}> mode=<{mode}> jobs=<{jobs}> chunks=<{chunks}> cols=<{cols}> determined=<{det}> runtime=<{runtime:>5.2}>",
            round = self.round,
            ptype = if self.farkas { "farkas" } else { "redcost" },
            mode = if self.heuristic { "heur" } else { "exact" },
            jobs = self.n_jobs,
            chunks = self.n_chunks,
            cols = self.cols,
            det = self.determined,
            runtime = self.runtime
        )
    }
}

#[derive(Clone)]
pub struct JobUIState {
    pub probnr: usize,
    pub solver: &'static str,
    pub status: SolveStatus,
    pub heuristic: bool,
    pub ncols: u32,
    pub runtime: f64,
}

impl Display for JobUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "block=<{probnr}> solver=<{solver}> status=<{status}> mode=<{mode}> cols=<{ncols}> runtime=<{runtime:>5.2}>",
            probnr = self.probnr,
            solver = self.solver,
            status = self.status,
            mode = if self.heuristic { "heur" } else { "exact" },
            ncols = self.ncols,
            runtime = self.runtime
        )
    }
}

#[derive(Clone)]
pub struct EscalationUIState {
    pub probnr: usize,
    pub escalation: Escalation,
}

impl Display for EscalationUIState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "block=<{}> {:?}", self.probnr, self.escalation)
    }
}

#[derive(Clone)]
/// Holds all state updates that can influence the UI
pub enum UIUserMessage {
    LogS(&'static str),
    Log(String),
    TimeLimitReached,
    StartPricing { n_problems: usize, n_solvers: usize },
    ExitUi { solver_summaries: Vec<String> },

    RoundStart(RoundUIState),
    RoundFinish(RoundUIState),

    JobFinish(JobUIState),
    Escalated(EscalationUIState),
    EarlyStop { cols: usize },
}

#[derive(Clone)]
pub struct UIMessage {
    pub thread_id: ThreadId,
    pub message: UIUserMessage,
}
