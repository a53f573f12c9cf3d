//! Command line structure using clap

use clap::Parser;
use rowjinja::config::parse_extra_var;
use rowjinja::{Overrides, Syntax};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rowjinja")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// YAML config file; relative paths and hooks start from its directory
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Input spreadsheet (CSV, ODS, XLSX); repeatable
    #[arg(short, long = "input", value_name = "FILE")]
    pub inputs: Vec<PathBuf>,

    /// Template file path (may contain template markup)
    #[arg(short, long)]
    pub template: Option<String>,

    /// Output file path (may contain template markup)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Overwrite existing output files
    #[arg(short, long)]
    pub force: bool,

    /// Delete each output after the post hook ran
    #[arg(long)]
    pub delete: bool,

    /// Shell command run before rendering each row
    #[arg(long)]
    pub pre_hook: Option<String>,

    /// Shell command run after writing each output
    #[arg(long)]
    pub post_hook: Option<String>,

    /// Template deciding whether a row is skipped, e.g. "{{ not name }}"
    #[arg(long)]
    pub skip: Option<String>,

    /// Single character separating CSV fields
    #[arg(long)]
    pub csv_delimiter: Option<String>,

    /// Header position as "row,column" (zero-based)
    #[arg(long)]
    pub header_row_column: Option<String>,

    /// Extra template variables; values are read as YAML
    #[arg(short, long, value_name = "KEY=VALUE", num_args = 1.., value_parser = extra_var)]
    pub extra_vars: Vec<String>,

    /// Log failing rows and keep going
    #[arg(long)]
    pub continue_on_error: bool,

    /// More output per occurrence (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Rejects malformed pairs at parse time; the typed value is built later
/// since [`rowjinja::Value`] is not `Send`.
fn extra_var(pair: &str) -> Result<String, String> {
    parse_extra_var(pair, &Syntax::default()).map(|_| pair.to_string())
}

fn flag(set: bool) -> Option<bool> {
    set.then_some(true)
}

impl Cli {
    pub fn overrides(self) -> Overrides {
        let syntax = Syntax::default();
        Overrides {
            config_path: self.config,
            input: self.inputs,
            template: self.template,
            output: self.output,
            force: flag(self.force),
            delete: flag(self.delete),
            pre_hook: self.pre_hook,
            post_hook: self.post_hook,
            skip: self.skip,
            csv_delimiter: self.csv_delimiter,
            header_row_column: self.header_row_column,
            vars: self
                .extra_vars
                .iter()
                .filter_map(|pair| parse_extra_var(pair, &syntax).ok())
                .collect(),
            continue_on_error: flag(self.continue_on_error),
            syntax,
        }
    }
}
