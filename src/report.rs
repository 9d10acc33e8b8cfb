use crate::plan::Action;
use crate::Result;

/// One reported plan step, automation-friendly
#[derive(Serialize, Clone, Debug)]
pub struct ReportEntry {
    pub kind: String,
    pub target: String,
    pub reason: String,
    /// Whether the step actually (or, under dry-run, would have) changed
    /// anything on the engine
    pub changed: bool,
}

/// Structured rendering of an executed (or dry-run) plan
///
/// Emitted after the run so `changed` reflects real outcomes, e.g. an
/// `ensure_image` that found the image already present reports false.
#[derive(Serialize, Clone, Debug, Default)]
pub struct Report {
    pub actions: Vec<ReportEntry>,
}

impl Report {
    pub fn push(&mut self, action: &Action, changed: bool) {
        self.actions.push(ReportEntry {
            kind: action.op.kind().to_string(),
            target: action.target.clone(),
            reason: action.reason.clone(),
            changed,
        });
    }

    pub fn changed(&self) -> usize {
        self.actions.iter().filter(|a| a.changed).count()
    }

    /// Print the report to stdout as yaml
    pub fn print(&self) -> Result<()> {
        println!("{}", serde_yaml::to_string(self)?);
        Ok(())
    }
}
