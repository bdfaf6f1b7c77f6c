//! Mock executor for testing
//!
//! Records every command instead of running it and answers from scripted
//! rules, so cluster interaction can be asserted without kubectl or a
//! cluster.

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{KubeError, Result};
use crate::exec::{Command, ExecContext, Executor};

/// A command seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCommand {
    /// Command line with secrets masked
    pub line: String,
    pub stdin: Option<String>,
    pub silent: bool,
}

/// Scripted answer
#[derive(Debug, Clone)]
enum Reply {
    Output(String),
    Fail { code: i32, output: String },
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    reply: Reply,
    /// Remaining uses, `None` for unlimited
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<RecordedCommand>,
    rules: Vec<Rule>,
}

/// In-memory executor for testing
///
/// Rules match when their pattern is a substring of the masked command
/// line; the first matching rule with uses left answers. Unmatched
/// commands succeed with empty output.
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    state: Arc<RwLock<MockState>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(&self, pattern: &str, reply: Reply, remaining: Option<usize>) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .push(Rule {
                pattern: pattern.to_string(),
                reply,
                remaining,
            });
    }

    /// Answer matching commands with `output`
    pub fn respond(&self, pattern: &str, output: &str) -> &Self {
        self.push_rule(pattern, Reply::Output(output.to_string()), None);
        self
    }

    /// Fail every matching command
    pub fn fail(&self, pattern: &str, code: i32, output: &str) -> &Self {
        self.push_rule(
            pattern,
            Reply::Fail {
                code,
                output: output.to_string(),
            },
            None,
        );
        self
    }

    /// Fail the next `times` matching commands, then fall through
    pub fn fail_times(&self, pattern: &str, times: usize, code: i32, output: &str) -> &Self {
        self.push_rule(
            pattern,
            Reply::Fail {
                code,
                output: output.to_string(),
            },
            Some(times),
        );
        self
    }

    /// Drop all rules, keeping the recorded calls
    pub fn clear_rules(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .rules
            .clear();
    }

    /// Every recorded command, oldest first
    pub fn calls(&self) -> Vec<RecordedCommand> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clone()
    }

    /// Recorded command lines, oldest first
    pub fn commands(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.line).collect()
    }

    /// Recorded commands whose line contains `pattern`
    pub fn calls_matching(&self, pattern: &str) -> Vec<RecordedCommand> {
        self.calls()
            .into_iter()
            .filter(|c| c.line.contains(pattern))
            .collect()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls_matching(pattern).len()
    }

    pub fn reset_calls(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
            .clear();
    }

    fn execute(&self, cmd: &Command, ctx: &ExecContext, silent: bool) -> Result<String> {
        ctx.check()?;
        let line = cmd.to_string();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.calls.push(RecordedCommand {
            line: line.clone(),
            stdin: cmd.stdin_content().map(str::to_string),
            silent,
        });

        let rule = state
            .rules
            .iter_mut()
            .find(|r| r.remaining != Some(0) && line.contains(&r.pattern));
        let Some(rule) = rule else {
            return Ok(String::new());
        };
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }

        match &rule.reply {
            Reply::Output(output) => Ok(output.clone()),
            Reply::Fail { code, output } => Err(KubeError::CommandFailed {
                command: line,
                code: Some(*code),
                output: output.clone(),
            }),
        }
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn run(&self, cmd: &Command, ctx: &ExecContext) -> Result<String> {
        self.execute(cmd, ctx, false)
    }

    async fn run_silent(&self, cmd: &Command, ctx: &ExecContext) -> Result<String> {
        self.execute(cmd, ctx, true)
    }
}
