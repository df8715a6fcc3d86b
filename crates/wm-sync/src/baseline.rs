//! First-run baseline selection.
//!
//! When no sync baseline exists yet, someone has to decide whether the local
//! files or the remote tracker are the starting point. The questions go
//! through a [`Prompter`] so the flow can be scripted in tests.

use std::collections::BTreeMap;
use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use wm_core::entities::EntityRecord;
use wm_core::enums::{BaselineSide, BaselineStrategy};

use crate::error::SyncError;

/// How many invalid strategy answers are tolerated before defaulting to local.
const MAX_STRATEGY_ATTEMPTS: usize = 3;

/// Line-oriented prompt channel.
pub trait Prompter {
    /// Show one line of output.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the line cannot be written.
    fn print_line(&mut self, line: &str) -> io::Result<()>;

    /// Show `prompt` and read one answer. `None` means the input is closed.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if reading or writing fails.
    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

/// [`Prompter`] over any buffered reader and writer.
pub struct IoPrompter<R, W> {
    reader: R,
    writer: W,
}

impl IoPrompter<io::StdinLock<'static>, io::Stdout> {
    /// Prompter bound to the process terminal.
    #[must_use]
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> IoPrompter<R, W> {
    pub const fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    pub const fn writer(&self) -> &W {
        &self.writer
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: BufRead, W: Write> Prompter for IoPrompter<R, W> {
    fn print_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{line}")
    }

    fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.writer, "{prompt}")?;
        self.writer.flush()?;

        let mut buf = String::new();
        if self.reader.read_line(&mut buf)? == 0 {
            return Ok(None);
        }
        Ok(Some(buf.trim_end_matches(['\r', '\n']).to_string()))
    }
}

/// An issue that differs between local and remote, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedIssue {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub changed_fields: Vec<String>,
}

impl ChangedIssue {
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            changed_fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_changed_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.changed_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

/// The chosen baseline strategy and, for `interactive`, the per-issue sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineSelectionResult {
    pub strategy: BaselineStrategy,
    #[serde(default)]
    pub choices: BTreeMap<String, BaselineSide>,
}

impl BaselineSelectionResult {
    #[must_use]
    pub const fn new(strategy: BaselineStrategy) -> Self {
        Self {
            strategy,
            choices: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_choice(mut self, id: impl Into<String>, side: BaselineSide) -> Self {
        self.choices.insert(id.into(), side);
        self
    }

    /// Side that provides the baseline for `id`. Unlisted ids in an
    /// interactive selection default to local.
    #[must_use]
    pub fn side_for(&self, id: &str) -> BaselineSide {
        match self.strategy {
            BaselineStrategy::Local => BaselineSide::Local,
            BaselineStrategy::Remote => BaselineSide::Remote,
            BaselineStrategy::Interactive => self.choices.get(id).copied().unwrap_or_default(),
        }
    }

    /// Pick `local` or `remote` for `id` according to the selection.
    #[must_use]
    pub fn get_baseline_for_issue<'v, T: ?Sized>(
        &self,
        id: &str,
        local: &'v T,
        remote: &'v T,
    ) -> &'v T {
        match self.side_for(id) {
            BaselineSide::Local => local,
            BaselineSide::Remote => remote,
        }
    }

    /// Resolve `(local, remote)` record pairs into the records that form the
    /// first baseline. Pairs are keyed by the local record's id.
    #[must_use]
    pub fn seed(
        &self,
        pairs: impl IntoIterator<Item = (EntityRecord, EntityRecord)>,
    ) -> Vec<EntityRecord> {
        pairs
            .into_iter()
            .map(|(local, remote)| match self.side_for(local.id()) {
                BaselineSide::Local => local,
                BaselineSide::Remote => remote,
            })
            .collect()
    }
}

/// Runs the baseline questions over a [`Prompter`].
pub struct BaselineSelector<P> {
    prompter: P,
}

impl<P: Prompter> BaselineSelector<P> {
    pub const fn new(prompter: P) -> Self {
        Self { prompter }
    }

    pub fn into_prompter(self) -> P {
        self.prompter
    }

    /// Decide the baseline. Without a `strategy`, the user is asked for one;
    /// an interactive choice then asks about each changed issue.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Prompt` if the prompt channel fails. Closed input
    /// is not an error and selects local.
    pub fn select_baseline(
        &mut self,
        issues_with_changes: &[ChangedIssue],
        strategy: Option<BaselineStrategy>,
    ) -> Result<BaselineSelectionResult, SyncError> {
        let strategy = match strategy {
            Some(strategy) => strategy,
            None => self.prompt_strategy()?,
        };
        let mut result = BaselineSelectionResult::new(strategy);

        if strategy == BaselineStrategy::Interactive && !issues_with_changes.is_empty() {
            self.prompter.print_line(&format!(
                "{} issue(s) differ between local and remote.",
                issues_with_changes.len()
            ))?;
            for issue in issues_with_changes {
                let side = self.prompt_issue(issue)?;
                result.choices.insert(issue.id.clone(), side);
            }
        }

        tracing::info!(
            %strategy,
            choices = result.choices.len(),
            "selected sync baseline"
        );
        Ok(result)
    }

    fn prompt_strategy(&mut self) -> Result<BaselineStrategy, SyncError> {
        self.prompter
            .print_line("No sync baseline exists yet. Which side should be the starting point?")?;
        self.prompter
            .print_line("  1) local        keep local files as they are")?;
        self.prompter
            .print_line("  2) remote       take the remote tracker's state")?;
        self.prompter
            .print_line("  3) interactive  choose for each changed issue")?;

        for _ in 0..MAX_STRATEGY_ATTEMPTS {
            let Some(answer) = self.prompter.read_line("Baseline [1-3]: ")? else {
                tracing::info!("prompt input closed, using local baseline");
                return Ok(BaselineStrategy::Local);
            };
            if let Some(strategy) = parse_strategy(&answer) {
                return Ok(strategy);
            }
            self.prompter
                .print_line(&format!("Unrecognized choice '{}'.", answer.trim()))?;
        }

        tracing::warn!(
            attempts = MAX_STRATEGY_ATTEMPTS,
            "no valid baseline choice, using local"
        );
        self.prompter.print_line("Using local as the baseline.")?;
        Ok(BaselineStrategy::Local)
    }

    fn prompt_issue(&mut self, issue: &ChangedIssue) -> Result<BaselineSide, SyncError> {
        let mut line = format!("{}: {}", issue.id, issue.title);
        if !issue.changed_fields.is_empty() {
            line.push_str(&format!(" (changed: {})", issue.changed_fields.join(", ")));
        }
        self.prompter.print_line(&line)?;

        let answer = self.prompter.read_line("Use [l]ocal or [r]emote? ")?;
        let side = match answer.as_deref().map(|a| a.trim().to_ascii_lowercase()) {
            Some(a) if a == "r" || a == "remote" => BaselineSide::Remote,
            Some(a) if a == "l" || a == "local" => BaselineSide::Local,
            other => {
                tracing::debug!(issue_id = %issue.id, answer = ?other, "defaulting issue baseline to local");
                BaselineSide::Local
            }
        };
        Ok(side)
    }
}

fn parse_strategy(answer: &str) -> Option<BaselineStrategy> {
    match answer.trim().to_ascii_lowercase().as_str() {
        "1" | "l" | "local" => Some(BaselineStrategy::Local),
        "2" | "r" | "remote" => Some(BaselineStrategy::Remote),
        "3" | "i" | "interactive" => Some(BaselineStrategy::Interactive),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use wm_core::entities::{Entity, Issue};

    use super::*;

    type Scripted = IoPrompter<&'static [u8], Vec<u8>>;

    fn selector(input: &'static str) -> BaselineSelector<Scripted> {
        BaselineSelector::new(IoPrompter::new(input.as_bytes(), Vec::new()))
    }

    fn output(selector: BaselineSelector<Scripted>) -> String {
        let (_, out) = selector.into_prompter().into_parts();
        String::from_utf8(out).unwrap()
    }

    fn changed() -> Vec<ChangedIssue> {
        vec![
            ChangedIssue::new("i1", "Login fails").with_changed_fields(["status"]),
            ChangedIssue::new("i2", "Slow search"),
            ChangedIssue::new("i3", "Typo"),
        ]
    }

    #[rstest]
    #[case("1\n", BaselineStrategy::Local)]
    #[case("R\n", BaselineStrategy::Remote)]
    #[case("  Remote  \n", BaselineStrategy::Remote)]
    #[case("interactive\n", BaselineStrategy::Interactive)]
    #[case("3\n", BaselineStrategy::Interactive)]
    #[case("nope\n2\n", BaselineStrategy::Remote)]
    #[case("x\ny\nz\n2\n", BaselineStrategy::Local)]
    #[case("", BaselineStrategy::Local)]
    fn strategy_prompt(#[case] input: &'static str, #[case] expected: BaselineStrategy) {
        let mut selector = selector(input);
        let result = selector.select_baseline(&[], None).unwrap();
        assert_eq!(result.strategy, expected);
        assert!(result.choices.is_empty());
    }

    #[test]
    fn given_strategy_skips_prompt() {
        let mut selector = selector("");
        let result = selector
            .select_baseline(&changed(), Some(BaselineStrategy::Remote))
            .unwrap();
        assert_eq!(result, BaselineSelectionResult::new(BaselineStrategy::Remote));
        assert!(output(selector).is_empty());
    }

    #[test]
    fn interactive_asks_per_issue() {
        // i1 remote, i2 blank, i3 unknown answer.
        let mut selector = selector("i\nremote\n\nmaybe\n");
        let result = selector.select_baseline(&changed(), None).unwrap();

        assert_eq!(result.strategy, BaselineStrategy::Interactive);
        assert_eq!(result.side_for("i1"), BaselineSide::Remote);
        assert_eq!(result.side_for("i2"), BaselineSide::Local);
        assert_eq!(result.side_for("i3"), BaselineSide::Local);
        assert_eq!(result.side_for("unlisted"), BaselineSide::Local);

        let out = output(selector);
        assert!(out.contains("i1: Login fails (changed: status)"));
        assert!(out.contains("3 issue(s) differ"));
    }

    #[test]
    fn interactive_closed_input_defaults_to_local() {
        let mut selector = selector("3\nr\n");
        let result = selector.select_baseline(&changed(), None).unwrap();
        assert_eq!(result.side_for("i1"), BaselineSide::Remote);
        assert_eq!(result.choices.get("i2"), Some(&BaselineSide::Local));
        assert_eq!(result.choices.get("i3"), Some(&BaselineSide::Local));
    }

    #[test]
    fn baseline_for_issue_follows_strategy() {
        let local = json!({"title": "local"});
        let remote = json!({"title": "remote"});

        let by_local = BaselineSelectionResult::new(BaselineStrategy::Local);
        assert_eq!(by_local.get_baseline_for_issue("i1", &local, &remote), &local);

        let by_remote = BaselineSelectionResult::new(BaselineStrategy::Remote);
        assert_eq!(by_remote.get_baseline_for_issue("i1", &local, &remote), &remote);

        let mixed = BaselineSelectionResult::new(BaselineStrategy::Interactive)
            .with_choice("i2", BaselineSide::Remote);
        assert_eq!(mixed.get_baseline_for_issue("i1", &local, &remote), &local);
        assert_eq!(mixed.get_baseline_for_issue("i2", &local, &remote), &remote);
        assert_eq!(mixed.get_baseline_for_issue("i2", "l", "r"), "r");
    }

    #[test]
    fn seed_picks_records_per_id() {
        let record = |id: &str, title: &str| {
            let issue: Issue = serde_json::from_value(json!({"id": id, "title": title})).unwrap();
            EntityRecord::new(issue)
        };
        let selection = BaselineSelectionResult::new(BaselineStrategy::Interactive)
            .with_choice("i2", BaselineSide::Remote);

        let seeded = selection.seed([
            (record("i1", "local one"), record("i1", "remote one")),
            (record("i2", "local two"), record("i2", "remote two")),
        ]);
        let titles: Vec<String> = seeded
            .iter()
            .map(|r| match &r.entity {
                Entity::Issue(issue) => issue.title.clone(),
                other => panic!("expected issue, got {other:?}"),
            })
            .collect();
        assert_eq!(titles, vec!["local one", "remote two"]);
    }

    #[test]
    fn read_line_strips_line_endings() {
        let mut prompter = IoPrompter::new("yes\r\n".as_bytes(), Vec::new());
        assert_eq!(prompter.read_line("? ").unwrap(), Some("yes".to_string()));
        assert_eq!(prompter.read_line("? ").unwrap(), None);
        assert_eq!(prompter.writer().as_slice(), b"? ? ");
    }
}
