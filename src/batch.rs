use crate::config::Config;
use crate::environment::Environment;
use crate::error::Result;
use crate::job::{Job, JobOutcome};
use crate::sheet::{check_file, expects_binary, read_sheet};
use std::rc::Rc;
use tracing::{error, info};

/// Counts of what happened to each row.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.done + self.skipped + self.failed
    }
}

/// Runs one job per row of every input file, strictly in order.
pub struct Runner {
    config: Config,
    env: Rc<Environment>,
}

impl Runner {
    pub fn new(config: Config) -> Self {
        Self::with_environment(config, Environment::new())
    }

    /// Uses `env` (extra filters and globals) for every job. Delimiters always
    /// come from `config.syntax`, the same ones the skip rule was checked with.
    pub fn with_environment(config: Config, env: Environment) -> Self {
        let env = env.with_syntax(config.syntax.clone());
        Self {
            config,
            env: Rc::new(env),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Fails on the first input that is missing, not a file, or whose content
    /// doesn't match its extension.
    pub fn check_inputs(&self) -> Result<()> {
        for input in &self.config.inputs {
            check_file(input, expects_binary(input))?;
        }
        Ok(())
    }

    /// Runs the whole batch.
    ///
    /// Input problems always abort. A failing job aborts too, unless
    /// `continue_on_error` is set, in which case it is logged and counted.
    pub fn run(&self) -> Result<BatchReport> {
        self.check_inputs()?;

        let mut report = BatchReport::default();
        let options = self.config.sheet_options();
        for input in &self.config.inputs {
            let sheet = read_sheet(input, &options)?;
            info!(input = %input.display(), rows = sheet.len(), "processing input file");

            for (row, vars) in sheet.records().enumerate() {
                let job = Job::new(self.env.clone(), &self.config, input, row, vars);
                match job.run() {
                    Ok(JobOutcome::Done(_)) => report.done += 1,
                    Ok(JobOutcome::Skipped) => report.skipped += 1,
                    Err(e) if self.config.continue_on_error => {
                        error!(row = row + 1, input = %input.display(), "{}", e);
                        report.failed += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        }
        info!(
            done = report.done,
            skipped = report.skipped,
            failed = report.failed,
            total = report.total(),
            "batch finished"
        );
        Ok(report)
    }
}
