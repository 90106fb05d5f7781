//! Command template registry
//!
//! Reusable, parameterized step sequences. Resolution is pure substitution
//! of `<< parameters.NAME >>` tokens, performed once during plan
//! construction; the executor never sees an unresolved invocation.

use std::collections::HashMap;
use std::sync::OnceLock;

use gantry_core::domain::pipeline::{Command, PipelineDefinition, Step};
use regex::Regex;

use crate::error::{DefinitionError, Result};

fn param_token() -> &'static Regex {
    static PARAM_TOKEN: OnceLock<Regex> = OnceLock::new();
    PARAM_TOKEN.get_or_init(|| {
        Regex::new(r"<<\s*parameters\.([A-Za-z0-9_-]+)\s*>>").expect("parameter token regex")
    })
}

/// Registry of named command templates
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, Command>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_definition(definition: &PipelineDefinition) -> Self {
        Self {
            commands: definition.commands.clone(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, command: Command) {
        self.commands.insert(name.into(), command);
    }

    /// Resolve a command invocation into a concrete step list.
    ///
    /// Bindings must cover exactly the command's declared parameter names.
    /// Invocations nested inside the template are resolved recursively; a
    /// self-referential chain is an error.
    pub fn resolve(&self, name: &str, bindings: &HashMap<String, String>) -> Result<Vec<Step>> {
        let mut stack = Vec::new();
        self.resolve_inner(name, bindings, &mut stack)
    }

    /// Expand every `invoke` step in a job's step list, leaving other steps
    /// untouched.
    pub fn expand_steps(&self, steps: &[Step]) -> Result<Vec<Step>> {
        let mut expanded = Vec::with_capacity(steps.len());
        for step in steps {
            match step {
                Step::Invoke(invoke) => {
                    expanded.extend(self.resolve(&invoke.command, &invoke.params)?);
                }
                other => expanded.push(other.clone()),
            }
        }
        Ok(expanded)
    }

    fn resolve_inner(
        &self,
        name: &str,
        bindings: &HashMap<String, String>,
        stack: &mut Vec<String>,
    ) -> Result<Vec<Step>> {
        if stack.iter().any(|entry| entry == name) {
            return Err(DefinitionError::RecursiveCommand {
                command: name.to_string(),
            });
        }

        let command = self
            .commands
            .get(name)
            .ok_or_else(|| DefinitionError::UnknownCommand {
                command: name.to_string(),
            })?;

        check_bindings(name, command, bindings)?;

        stack.push(name.to_string());
        let mut steps = Vec::with_capacity(command.steps.len());
        for template in &command.steps {
            match template {
                Step::Invoke(invoke) => {
                    let mut inner_bindings = HashMap::with_capacity(invoke.params.len());
                    for (key, value) in &invoke.params {
                        inner_bindings.insert(key.clone(), substitute(name, value, bindings)?);
                    }
                    steps.extend(self.resolve_inner(&invoke.command, &inner_bindings, stack)?);
                }
                other => steps.push(substitute_step(name, other, bindings)?),
            }
        }
        stack.pop();

        Ok(steps)
    }
}

/// Verify the call site covers exactly the declared parameter set
fn check_bindings(
    name: &str,
    command: &Command,
    bindings: &HashMap<String, String>,
) -> Result<()> {
    let mut missing: Vec<&String> = command
        .parameters
        .iter()
        .filter(|parameter| !bindings.contains_key(*parameter))
        .collect();
    missing.sort_unstable();
    if let Some(parameter) = missing.first() {
        return Err(DefinitionError::UnresolvedParameter {
            command: name.to_string(),
            parameter: (*parameter).clone(),
        });
    }

    let mut unknown: Vec<&String> = bindings
        .keys()
        .filter(|key| !command.parameters.contains(*key))
        .collect();
    unknown.sort_unstable();
    if let Some(parameter) = unknown.first() {
        return Err(DefinitionError::UnknownParameter {
            command: name.to_string(),
            parameter: (*parameter).clone(),
        });
    }

    Ok(())
}

/// Substitute parameter tokens in one string.
///
/// A token referencing a parameter with no binding (declared or not) is an
/// error: the template would otherwise leak raw token text into a shell
/// command.
fn substitute(command: &str, input: &str, bindings: &HashMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in param_token().captures_iter(input) {
        let token = caps.get(0).expect("capture group 0");
        let parameter = &caps[1];
        let value =
            bindings
                .get(parameter)
                .ok_or_else(|| DefinitionError::UnresolvedParameter {
                    command: command.to_string(),
                    parameter: parameter.to_string(),
                })?;
        out.push_str(&input[last..token.start()]);
        out.push_str(value);
        last = token.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

fn substitute_step(command: &str, step: &Step, bindings: &HashMap<String, String>) -> Result<Step> {
    let sub = |input: &str| substitute(command, input, bindings);

    Ok(match step {
        Step::Run(run) => {
            let mut resolved = run.clone();
            resolved.name = run.name.as_deref().map(&sub).transpose()?;
            resolved.command = sub(&run.command)?;
            resolved.working_dir = run.working_dir.as_deref().map(&sub).transpose()?;
            resolved.env = run
                .env
                .iter()
                .map(|(key, value)| Ok((key.clone(), sub(value)?)))
                .collect::<Result<_>>()?;
            Step::Run(resolved)
        }
        Step::RestoreCache(restore) => {
            let mut resolved = restore.clone();
            resolved.keys = restore.keys.iter().map(|key| sub(key)).collect::<Result<_>>()?;
            Step::RestoreCache(resolved)
        }
        Step::SaveCache(save) => {
            let mut resolved = save.clone();
            resolved.key = sub(&save.key)?;
            resolved.paths = save.paths.iter().map(|path| sub(path)).collect::<Result<_>>()?;
            Step::SaveCache(resolved)
        }
        Step::AttachWorkspace(attach) => {
            let mut resolved = attach.clone();
            resolved.from = sub(&attach.from)?;
            resolved.at = attach.at.as_deref().map(&sub).transpose()?;
            Step::AttachWorkspace(resolved)
        }
        Step::PersistToWorkspace(persist) => {
            let mut resolved = persist.clone();
            resolved.root = persist.root.as_deref().map(&sub).transpose()?;
            resolved.paths = persist
                .paths
                .iter()
                .map(|path| sub(path))
                .collect::<Result<_>>()?;
            Step::PersistToWorkspace(resolved)
        }
        // Handled by the caller; invocations never reach substitution
        Step::Invoke(invoke) => Step::Invoke(invoke.clone()),
    })
}
