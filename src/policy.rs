//! Policy engine core.
//!
//! A policy pairs a selection filter with actions: the engine iterates the
//! fsentries a backend returns for the policy's filter and, for each entry,
//! scans the policy's rules in order. The first rule whose filter matches
//! wins; when none does, the policy's default action applies.
//!
//! Action strings use well-known prefixes: `common:delete` and `common:log`
//! dispatch through the backend plugin's [`CommonOperations`], so their
//! semantics stay backend-specific; `cmd:<template>` runs an external
//! command with `{}` replaced by the entry's path; `py:<name>` is reserved.
//!
//! Parsing an action is cached per policy, so a rule that matches a million
//! entries parses its action string once.

use std::process::Command;

use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::fsentry::Fsentry;
use crate::value::{Value, ValueMap};

/// The operation an action string resolves to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ActionKind {
    /// Remove the entry, through the backend's common operations.
    Delete,
    /// Log the entry, through the backend's common operations.
    Log,
    /// Run an external command.
    Cmd,
    /// Reserved; not implemented yet.
    Python,
    /// Anything else; reported as invalid at dispatch time.
    Unknown,
}

/// A parsed action, ready to dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct Action {
    /// What to do.
    pub kind: ActionKind,
    /// The part of the action string after the prefix (the command template
    /// for [`ActionKind::Cmd`], the function name for
    /// [`ActionKind::Python`]).
    pub value: Option<String>,
    /// The rule's parameters, parsed once on first use.
    pub parameters: Option<ValueMap>,
}

fn parse_action(action: &str, parameters: Option<&str>) -> Action {
    let (kind, value) = if let Some(template) = action.strip_prefix("cmd:") {
        (ActionKind::Cmd, Some(template.to_owned()))
    } else if let Some(name) = action.strip_prefix("py:") {
        (ActionKind::Python, Some(name.to_owned()))
    } else if action == "common:delete" {
        (ActionKind::Delete, None)
    } else if action == "common:log" {
        (ActionKind::Log, None)
    } else {
        (ActionKind::Unknown, Some(action.to_owned()))
    };

    let parameters = parameters.and_then(|parameters| match parse_parameters(parameters) {
        Ok(map) => Some(map),
        Err(err) => {
            warn!("ignoring unparsable action parameters '{parameters}': {err}");
            None
        }
    });

    Action {
        kind,
        value,
        parameters,
    }
}

/// Parse an action's parameters into a value map.
///
/// Parameters are a comma-separated list of `key=value` items; values are
/// kept as strings.
pub fn parse_parameters(parameters: &str) -> Result<ValueMap> {
    let mut map = ValueMap::new();
    for item in parameters.split(',') {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| Error::invalid(format!("parameter '{item}' is not of the form key=value")))?;
        map.insert(key.trim(), Value::String(value.trim().to_owned()));
    }
    Ok(map)
}

/// One rule of a policy.
#[derive(Clone, Debug)]
pub struct Rule {
    /// The rule's name, for reporting.
    pub name: String,
    /// The entries this rule applies to.
    pub filter: Filter,
    /// The action string.
    pub action: String,
    /// Optional action parameters.
    pub parameters: Option<String>,
}

/// A policy: a selection filter, a default action and ordered rules.
#[derive(Clone, Debug)]
pub struct Policy {
    /// The policy's name, for reporting.
    pub name: String,
    /// The entries this policy considers at all.
    pub filter: Filter,
    /// The action applied when no rule matches.
    pub action: String,
    /// Optional parameters of the default action.
    pub parameters: Option<String>,
    /// The rules, scanned in order; first match wins.
    pub rules: Vec<Rule>,
}

/// Caches parsed actions for one policy execution.
///
/// Each action string (default or per rule) is parsed at most once, however
/// many entries it ends up applied to.
#[derive(Debug)]
pub struct ActionCache {
    default_action: Option<Action>,
    rule_actions: Vec<Option<Action>>,
}

impl ActionCache {
    /// Create an empty cache sized for `policy`.
    pub fn new(policy: &Policy) -> Self {
        ActionCache {
            default_action: None,
            rule_actions: vec![None; policy.rules.len()],
        }
    }

    /// The action to apply for an entry that matched `rule` (or no rule).
    ///
    /// Parses and caches the action string on first use.
    pub fn select(&mut self, policy: &Policy, rule: Option<usize>) -> &Action {
        match rule {
            Some(index) => self.rule_actions[index].get_or_insert_with(|| {
                let rule = &policy.rules[index];
                parse_action(&rule.action, rule.parameters.as_deref())
            }),
            None => self
                .default_action
                .get_or_insert_with(|| parse_action(&policy.action, policy.parameters.as_deref())),
        }
    }
}

/// Operations common to every backend plugin, with backend-specific
/// semantics.
///
/// The policy engine dispatches `common:` actions through this trait so that
/// what "delete" and "log" mean stays up to the plugin serving the mirrored
/// filesystem.
pub trait CommonOperations {
    /// Remove `entry` from the filesystem.
    fn delete_entry(&self, entry: &Fsentry) -> Result<()>;

    /// Log `entry`.
    fn log_entry(&self, entry: &Fsentry) -> Result<()> {
        info!("{}", entry.path().unwrap_or("<entry without a path>"));
        Ok(())
    }
}

/// Substitute `{}` placeholders in a command template.
fn substitute_template(template: &str, path: &str) -> String {
    template.replace("{}", path)
}

fn entry_absolute_path(fs_root: &str, entry: &Fsentry) -> Result<String> {
    let relative = entry
        .relative_path()
        .ok_or_else(|| Error::invalid("entry has no path"))?;
    if relative == "." {
        Ok(fs_root.to_owned())
    } else {
        Ok(format!("{}/{}", fs_root.trim_end_matches('/'), relative))
    }
}

fn apply_action(
    action: &Action,
    entry: &Fsentry,
    fs_root: &str,
    common_ops: &dyn CommonOperations,
) -> Result<()> {
    match action.kind {
        ActionKind::Log => common_ops.log_entry(entry),
        ActionKind::Delete => {
            common_ops.delete_entry(entry)?;
            info!(
                "deleted '{}'",
                entry.relative_path().unwrap_or("<entry without a path>")
            );
            Ok(())
        }
        ActionKind::Cmd => {
            let template = action
                .value
                .as_deref()
                .filter(|template| !template.is_empty())
                .ok_or_else(|| Error::invalid("empty command action"))?;
            let command = substitute_template(template, &entry_absolute_path(fs_root, entry)?);
            let status = Command::new("sh")
                .arg("-c")
                .arg(&command)
                .status()
                .map_err(|err| Error::backend(format!("cannot run '{command}': {err}")))?;
            if status.success() {
                Ok(())
            } else {
                Err(Error::backend(format!("'{command}' exited with {status}")))
            }
        }
        ActionKind::Python => Err(Error::NotSupported),
        ActionKind::Unknown => Err(Error::invalid(format!(
            "unknown action '{}'",
            action.value.as_deref().unwrap_or("")
        ))),
    }
}

/// Execute `policy` over an iterator of fsentries.
///
/// For every entry, the first rule whose filter matches selects the action;
/// entries matched by no rule get the policy's default action. Action
/// failures are logged and counted, not fatal; iterator errors abort the
/// run.
///
/// Returns the number of entries whose action failed.
pub fn execute(
    entries: impl Iterator<Item = Result<Fsentry>>,
    policy: &Policy,
    fs_root: &str,
    common_ops: &dyn CommonOperations,
) -> Result<usize> {
    let mut cache = ActionCache::new(policy);
    let mut failed = 0;

    for entry in entries {
        let entry = entry?;
        let matched = policy
            .rules
            .iter()
            .position(|rule| rule.filter.matches(&entry));
        let action = cache.select(policy, matched);

        if let Err(err) = apply_action(action, &entry, fs_root, common_ops) {
            let rule_name = matched
                .map(|index| policy.rules[index].name.as_str())
                .unwrap_or(policy.name.as_str());
            error!(
                "policy '{}', rule '{rule_name}': action failed on '{}': {err}",
                policy.name,
                entry.path().unwrap_or("<entry without a path>"),
            );
            failed += 1;
        }
    }

    Ok(failed)
}
