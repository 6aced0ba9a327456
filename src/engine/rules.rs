//! Built-in ruleset evaluator.
//!
//! # Responsibilities
//! - Compile rule definitions from configuration once, at load time
//! - Evaluate rules of the current phase in declaration order
//! - Return the verdict of the first matching rule
//!
//! # Design Decisions
//! - Compilation validates everything (regexes, redirect targets), so a
//!   bad ruleset fails the whole reload instead of a transaction
//! - Header names match case-insensitively, everything else is exact
//! - `detection-only` mode logs matches but never returns an action

use std::borrow::Cow;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::config::schema::{EngineMode, Operator, RuleConfig, Transform};
use crate::engine::{
    arg_str, Arguments, EvaluationError, Evaluator, HeaderBlock, Phase, Verdict, VerdictAction,
};

const DEFAULT_DENY_STATUS: u16 = 403;
const DEFAULT_REDIRECT_STATUS: u16 = 302;

/// Error compiling a rule.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("rule {id}: unknown target '{target}'")]
    UnknownTarget { id: u32, target: String },

    #[error("rule {id}: operator {operator:?} needs a value")]
    MissingValue { id: u32, operator: Operator },

    #[error("rule {id}: operator {operator:?} needs an integer value")]
    NotAnInteger { id: u32, operator: Operator },

    #[error("rule {id}: invalid regex: {error}")]
    InvalidRegex { id: u32, error: String },

    #[error("rule {id}: redirect needs a data target")]
    RedirectWithoutTarget { id: u32 },

    #[error("duplicate rule id {0}")]
    DuplicateId(u32),
}

/// What a rule inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    /// A message argument by name (method, path, query, ...).
    Argument(&'static str),
    /// `path` plus `?query` when a query is present.
    Uri,
    Header(String),
    HeaderCount(String),
}

impl Target {
    fn parse(id: u32, raw: &str) -> Result<Self, RuleError> {
        if let Some(name) = raw.strip_prefix("header:") {
            return Ok(Target::Header(name.to_string()));
        }
        if let Some(name) = raw.strip_prefix("headers-count:") {
            return Ok(Target::HeaderCount(name.to_string()));
        }

        let argument = match raw {
            "method" => "method",
            "path" => "path",
            "query" => "query",
            "version" => "version",
            "body" => "body",
            "status" => "status",
            "src-ip" => "src-ip",
            "dst-ip" => "dst-ip",
            "src-port" => "src-port",
            "dst-port" => "dst-port",
            "uri" => return Ok(Target::Uri),
            _ => {
                return Err(RuleError::UnknownTarget {
                    id,
                    target: raw.to_string(),
                })
            }
        };
        Ok(Target::Argument(argument))
    }
}

/// Compiled comparison.
#[derive(Debug)]
enum Condition {
    Streq(String),
    Contains(String),
    BeginsWith(String),
    Rx(Regex),
    Present,
    Absent,
    Eq(i64),
    Gt(i64),
    Lt(i64),
}

impl Condition {
    fn compile(rule: &RuleConfig) -> Result<Self, RuleError> {
        let text = || {
            rule.value.clone().ok_or(RuleError::MissingValue {
                id: rule.id,
                operator: rule.operator,
            })
        };
        let number = || -> Result<i64, RuleError> {
            text()?.trim().parse().map_err(|_| RuleError::NotAnInteger {
                id: rule.id,
                operator: rule.operator,
            })
        };

        Ok(match rule.operator {
            Operator::Streq => Condition::Streq(text()?),
            Operator::Contains => Condition::Contains(text()?),
            Operator::BeginsWith => Condition::BeginsWith(text()?),
            Operator::Rx => {
                let pattern = text()?;
                let regex = Regex::new(&pattern).map_err(|e| RuleError::InvalidRegex {
                    id: rule.id,
                    error: e.to_string(),
                })?;
                Condition::Rx(regex)
            }
            Operator::Present => Condition::Present,
            Operator::Absent => Condition::Absent,
            Operator::Eq => Condition::Eq(number()?),
            Operator::Gt => Condition::Gt(number()?),
            Operator::Lt => Condition::Lt(number()?),
        })
    }

    fn matches(&self, candidates: &[Cow<'_, str>]) -> bool {
        match self {
            Condition::Present => !candidates.is_empty(),
            Condition::Absent => candidates.is_empty(),
            Condition::Streq(expected) => candidates.iter().any(|c| c == expected),
            Condition::Contains(needle) => candidates.iter().any(|c| c.contains(needle.as_str())),
            Condition::BeginsWith(prefix) => {
                candidates.iter().any(|c| c.starts_with(prefix.as_str()))
            }
            Condition::Rx(regex) => candidates.iter().any(|c| regex.is_match(c)),
            Condition::Eq(n) => any_number(candidates, |v| v == *n),
            Condition::Gt(n) => any_number(candidates, |v| v > *n),
            Condition::Lt(n) => any_number(candidates, |v| v < *n),
        }
    }
}

fn any_number(candidates: &[Cow<'_, str>], pred: impl Fn(i64) -> bool) -> bool {
    candidates
        .iter()
        .filter_map(|c| c.trim().parse::<i64>().ok())
        .any(pred)
}

/// A compiled rule.
#[derive(Debug)]
struct Rule {
    id: u32,
    phase: Phase,
    target: Target,
    transforms: Vec<Transform>,
    condition: Condition,
    verdict: Verdict,
    msg: Option<String>,
}

impl Rule {
    fn compile(config: &RuleConfig) -> Result<Self, RuleError> {
        let target = Target::parse(config.id, &config.target)?;
        let condition = Condition::compile(config)?;

        let verdict = match config.action {
            VerdictAction::Deny => Verdict::deny(config.status.unwrap_or(DEFAULT_DENY_STATUS)),
            VerdictAction::Redirect => {
                let location = config
                    .data
                    .clone()
                    .filter(|d| !d.is_empty())
                    .ok_or(RuleError::RedirectWithoutTarget { id: config.id })?;
                Verdict::redirect(config.status.unwrap_or(DEFAULT_REDIRECT_STATUS), location)
            }
            action => Verdict {
                action,
                status: config.status.unwrap_or(0),
                data: config.data.clone().unwrap_or_default(),
                ..Verdict::default()
            },
        };

        Ok(Self {
            id: config.id,
            phase: config.phase,
            target,
            transforms: config.transforms.clone(),
            condition,
            verdict,
            msg: config.msg.clone(),
        })
    }

    fn apply_transforms<'a>(&self, value: Cow<'a, str>) -> Cow<'a, str> {
        self.transforms.iter().fold(value, |value, transform| match transform {
            Transform::None => value,
            Transform::Lowercase => Cow::Owned(value.to_lowercase()),
            Transform::Trim => Cow::Owned(value.trim().to_string()),
        })
    }
}

/// Per-evaluation view over the message arguments.
struct Inputs<'a> {
    args: &'a Arguments,
    headers: Option<HeaderBlock>,
}

impl<'a> Inputs<'a> {
    fn new(args: &'a Arguments) -> Result<Self, EvaluationError> {
        let headers = match args.get("headers").and_then(|v| v.as_bytes()) {
            Some(raw) => Some(HeaderBlock::parse(raw).map_err(|e| {
                EvaluationError::InvalidArgument {
                    name: "headers".to_string(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        Ok(Self { args, headers })
    }

    fn collect(&self, target: &Target) -> Vec<Cow<'_, str>> {
        match target {
            Target::Argument(name) => arg_str(self.args, name).into_iter().collect(),
            Target::Uri => {
                let Some(path) = arg_str(self.args, "path") else {
                    return Vec::new();
                };
                match arg_str(self.args, "query").filter(|q| !q.is_empty()) {
                    Some(query) => vec![Cow::Owned(format!("{}?{}", path, query))],
                    None => vec![path],
                }
            }
            Target::Header(name) => self
                .headers
                .iter()
                .flat_map(|h| h.values(name))
                .map(Cow::Borrowed)
                .collect(),
            Target::HeaderCount(name) => {
                let count = self.headers.as_ref().map(|h| h.count(name)).unwrap_or(0);
                vec![Cow::Owned(count.to_string())]
            }
        }
    }
}

/// Ordered, compiled ruleset used as an application's evaluator.
#[derive(Debug)]
pub struct RuleSet {
    mode: EngineMode,
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Compile rule definitions.
    pub fn compile(mode: EngineMode, configs: &[RuleConfig]) -> Result<Self, RuleError> {
        let mut seen = std::collections::HashSet::new();
        let mut rules = Vec::with_capacity(configs.len());
        for config in configs {
            if !seen.insert(config.id) {
                return Err(RuleError::DuplicateId(config.id));
            }
            rules.push(Rule::compile(config)?);
        }
        Ok(Self { mode, rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Synchronous core of `evaluate`.
    pub fn check(&self, phase: Phase, args: &Arguments) -> Result<Verdict, EvaluationError> {
        if self.mode == EngineMode::Off {
            return Ok(Verdict::none());
        }

        let inputs = Inputs::new(args)?;

        for rule in self.rules.iter().filter(|r| r.phase == phase) {
            let candidates: Vec<Cow<'_, str>> = inputs
                .collect(&rule.target)
                .into_iter()
                .map(|c| rule.apply_transforms(c))
                .collect();

            if !rule.condition.matches(&candidates) {
                continue;
            }

            tracing::info!(
                rule_id = rule.id,
                phase = %phase,
                action = rule.verdict.action.as_str(),
                msg = rule.msg.as_deref().unwrap_or(""),
                detection_only = self.mode == EngineMode::DetectionOnly,
                "Rule matched"
            );

            if self.mode == EngineMode::DetectionOnly {
                return Ok(Verdict::none());
            }
            return Ok(rule.verdict.clone());
        }

        Ok(Verdict::none())
    }
}

#[async_trait]
impl Evaluator for RuleSet {
    async fn evaluate(&self, phase: Phase, args: &Arguments) -> Result<Verdict, EvaluationError> {
        self.check(phase, args)
    }
}
