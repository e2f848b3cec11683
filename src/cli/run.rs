//! `run` and `check` commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::config::SchedulerConfig;
use crate::log;
use crate::scenario::{Runner, Scenario};

/// Run one scenario file, printing every commit as it happens.
pub fn run_scenario(path: &Path, config: SchedulerConfig, strict: bool) -> Result<()> {
    let scenario = Scenario::from_path(path)
        .with_context(|| format!("failed to load scenario `{}`", path.display()))?;
    log!(
        "run"; "{} ({}, {})",
        path.display(),
        plural(scenario.nodes.len(), "node"),
        plural(scenario.steps.len(), "step")
    );

    let summary = Runner::new(&scenario, config)
        .with_context(|| format!("failed to build scenario `{}`", path.display()))?
        .run()
        .with_context(|| format!("scenario `{}` stopped", path.display()))?;

    log!(
        "run"; "{}, {}, {} blocked at {}",
        plural(summary.commits.len(), "commit"),
        plural(summary.failures.len(), "failure"),
        summary.blocked.len(),
        summary.now
    );

    if strict && (!summary.failures.is_empty() || !summary.blocked.is_empty()) {
        return Err(anyhow!("scenario did not settle cleanly"));
    }
    Ok(())
}

/// Validate scenario files. The config was already validated while loading.
pub fn check(config: Option<&Path>, scenarios: &[PathBuf]) -> Result<()> {
    match config {
        Some(path) => log!("check"; "{} ok", path.display()),
        None => log!("check"; "no config given, using defaults"),
    }

    let mut failed = 0;
    for path in scenarios {
        match Scenario::from_path(path) {
            Ok(scenario) => log!(
                "check"; "{} ok ({}, {})",
                path.display(),
                plural(scenario.nodes.len(), "node"),
                plural(scenario.steps.len(), "step")
            ),
            Err(err) => {
                failed += 1;
                log!("error"; "{}: {:#}", path.display(), anyhow::Error::from(err));
            }
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} invalid", plural(failed, "scenario")));
    }
    Ok(())
}

fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("1 {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn scenario_file(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "commit"), "1 commit");
        assert_eq!(plural(0, "commit"), "0 commits");
        assert_eq!(plural(3, "step"), "3 steps");
    }

    #[test]
    fn test_check_reports_invalid_files() {
        let good = scenario_file("[[node]]\nid = \"a\"\n[[step]]\nschedule = \"a\"");
        let bad = scenario_file("[[step]]\nschedule = \"missing\"");

        assert!(check(None, &[good.path().to_path_buf()]).is_ok());
        let err = check(None, &[good.path().to_path_buf(), bad.path().to_path_buf()]).unwrap_err();
        assert!(err.to_string().contains("1 scenario invalid"));
    }

    #[test]
    fn test_strict_run_fails_when_blocked() {
        let file = scenario_file(
            "[[node]]\nid = \"a\"\nresource = \"k\"\n\
             [[step]]\nschedule = \"a\"\n[[step]]\nflush = true",
        );
        assert!(run_scenario(file.path(), SchedulerConfig::default(), false).is_ok());
        assert!(run_scenario(file.path(), SchedulerConfig::default(), true).is_err());
    }
}
