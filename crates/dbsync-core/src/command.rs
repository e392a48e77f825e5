//! Shell-safe command rendering with secrets kept out of displays.

use crate::profile::Secret;
use serde::Serialize;
use std::fmt;

/// Quotes a word for POSIX `sh`.
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        return word.to_string();
    }
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// A program with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Renders as a single shell word sequence.
    pub fn render(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// A secret handed to a process through its environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretEnv {
    pub name: String,
    pub value: Secret,
}

/// A shell script run on the source host.
///
/// Secrets are exported at the top of the rendered script and never
/// appear in its `Display` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommand {
    script: String,
    secrets: Vec<SecretEnv>,
}

impl RemoteCommand {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            secrets: Vec::new(),
        }
    }

    pub fn from_line(line: &CommandLine) -> Self {
        Self::new(line.render())
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: Secret) -> Self {
        if !value.is_empty() {
            self.secrets.push(SecretEnv {
                name: name.into(),
                value,
            });
        }
        self
    }

    /// The script body, without secret exports.
    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn secrets(&self) -> &[SecretEnv] {
        &self.secrets
    }

    /// The full script to hand to `sh`, secrets included.
    pub fn render(&self) -> String {
        self.render_with(|s| shell_quote(s.expose()))
    }

    /// Same shape as [`render`](Self::render) with secret values masked.
    pub fn redacted(&self) -> String {
        self.render_with(|_| "'***'".to_string())
    }

    fn render_with(&self, value: impl Fn(&Secret) -> String) -> String {
        let mut out = String::new();
        for env in &self.secrets {
            out.push_str(&format!("export {}={}; ", env.name, value(&env.value)));
        }
        out.push_str(&self.script);
        out
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// A database client invocation on this machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCommand {
    pub line: CommandLine,
    pub env: Vec<SecretEnv>,
}

impl ClientCommand {
    pub fn new(line: CommandLine) -> Self {
        Self {
            line,
            env: Vec::new(),
        }
    }

    pub fn with_secret(mut self, name: impl Into<String>, value: Secret) -> Self {
        if !value.is_empty() {
            self.env.push(SecretEnv {
                name: name.into(),
                value,
            });
        }
        self
    }
}

impl fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}
