//! Natural-language fallback: turn a line no command understood into a
//! command line by asking an external model runner.

use std::path::Path;
use std::time::Duration;

use tether_types::config::TranslatorConfig;
use tether_types::error::{Result, TetherError};

use crate::process::run_process;

/// Turns free text into a single command line.
pub trait Translator: Send + Sync {
    /// Returns `None` when no usable command came back.
    fn translate(&self, request: &str) -> Result<Option<String>>;
}

/// Runs `program args... <prompt>` and takes its stdout as the command.
pub struct ProcessTranslator {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
    vocabulary: Vec<String>,
}

impl ProcessTranslator {
    /// `vocabulary` is the list of command names the model may use.
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        timeout: Option<Duration>,
        vocabulary: Vec<String>,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            vocabulary,
        }
    }

    /// Build a translator from config, or `None` when none is configured.
    pub fn from_config(
        config: &TranslatorConfig,
        timeout: Option<Duration>,
        vocabulary: Vec<String>,
    ) -> Option<Self> {
        let program = config.program.as_deref()?;
        Some(Self::new(program, config.args.clone(), timeout, vocabulary))
    }

    fn prompt(&self, request: &str) -> String {
        format!(
            "You translate instructions into commands for a remote shell.\n\
             Reply with exactly ONE command line and nothing else: no explanation, \
             no quotes, no backticks.\n\
             Allowed commands: {}.\n\
             Pipes (|), redirection (> and >>) and the wildcards * and ? are available.\n\
             To sort unique lines of a file use: cat <file> | sort | uniq\n\n\
             Instruction: {request}",
            self.vocabulary.join(", ")
        )
    }
}

impl Translator for ProcessTranslator {
    fn translate(&self, request: &str) -> Result<Option<String>> {
        if request.trim().is_empty() {
            return Ok(None);
        }
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv.push(self.prompt(request));

        let output = run_process(&argv, Path::new("."), None, self.timeout)?;
        if !output.success() {
            return Err(TetherError::Process(format!(
                "{} failed: {}",
                self.program,
                output.stderr.trim()
            )));
        }
        Ok(clean_reply(&output.stdout))
    }
}

/// Strip whitespace, backticks and quotes a model wraps its answer in.
fn clean_reply(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_matches('`')
        .trim_matches('"')
        .trim_matches('\'')
        .trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_strips_wrapping() {
        assert_eq!(clean_reply("  `ls -l`\n"), Some("ls -l".to_string()));
        assert_eq!(clean_reply("\"pwd\""), Some("pwd".to_string()));
        assert_eq!(clean_reply(" `` \n"), None);
    }

    #[test]
    fn from_config_requires_program() {
        let config = TranslatorConfig::default();
        assert!(ProcessTranslator::from_config(&config, None, vec![]).is_none());
    }

    #[test]
    fn prompt_lists_vocabulary() {
        let t = ProcessTranslator::new("x", vec![], None, vec!["ls".into(), "pwd".into()]);
        let prompt = t.prompt("show files");
        assert!(prompt.contains("Allowed commands: ls, pwd."));
        assert!(prompt.ends_with("Instruction: show files"));
    }

    #[cfg(unix)]
    #[test]
    fn echo_program_acts_as_translator() {
        // The script ignores its prompt argument and answers with a wrapped command.
        let t = ProcessTranslator::new(
            "sh",
            vec!["-c".into(), "echo '`pwd`'".into(), "sh".into()],
            Some(Duration::from_secs(5)),
            vec![],
        );
        assert_eq!(t.translate("where am I").unwrap(), Some("pwd".to_string()));
        assert_eq!(t.translate("   ").unwrap(), None);
    }

    #[test]
    fn missing_program_is_error() {
        let t = ProcessTranslator::new("no-such-model-runner-zzz", vec![], None, vec![]);
        assert!(t.translate("anything").is_err());
    }
}
