// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runtime control of the tracing subscriber

use ordermap::OrderMap;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::str::FromStr;
use std::sync::{Mutex, OnceLock};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, fmt, reload};

use crate::targets::{TRACE_TARGETS, TraceTarget};

pub const DEFAULT_DEFAULT_LOGLEVEL: LevelFilter = LevelFilter::INFO;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TraceCtlError {
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    #[error("Invalid tracing directive '{0}': expected tag=level")]
    InvalidDirective(String),
    #[error("No tracing target or tag named '{0}'")]
    UnknownTarget(String),
    #[error("Failed to build tracing filter: {0}")]
    FilterError(String),
    #[error("Failed to reload tracing filter: {0}")]
    ReloadError(String),
    #[error("Tracing control lock is poisoned")]
    LockPoisoned,
}

#[derive(Debug)]
struct TargetCfg {
    target: &'static str,
    level: LevelFilter,
    tags: &'static [&'static str],
}

impl From<&TraceTarget> for TargetCfg {
    fn from(t: &TraceTarget) -> Self {
        Self {
            target: t.target,
            level: t.level,
            tags: t.tags,
        }
    }
}

#[derive(Debug)]
struct TraceCtlState {
    default: LevelFilter,
    targets: OrderMap<&'static str, TargetCfg>,
}

impl TraceCtlState {
    fn new() -> Self {
        let mut registered: Vec<&TraceTarget> = TRACE_TARGETS.iter().collect();
        registered.sort_by_key(|t| t.name);
        let targets = registered
            .into_iter()
            .map(|t| (t.name, TargetCfg::from(t)))
            .collect();
        Self {
            default: DEFAULT_DEFAULT_LOGLEVEL,
            targets,
        }
    }

    fn directives(&self) -> String {
        let mut out = self.default.to_string();
        for cfg in self.targets.values() {
            let _ = write!(out, ",{}={}", cfg.target, cfg.level);
        }
        out
    }

    /// Set the level of every target whose name or tags match `name`. Returns the number of targets changed.
    fn knows(&self, name: &str) -> bool {
        self.targets
            .iter()
            .any(|(tname, cfg)| *tname == name || cfg.tags.contains(&name))
    }

    fn set_level(&mut self, name: &str, level: LevelFilter) -> usize {
        let mut count = 0;
        for (tname, cfg) in &mut self.targets {
            if *tname == name || cfg.tags.contains(&name) {
                cfg.level = level;
                count += 1;
            }
        }
        count
    }
}

/// Controls the log level of the registered tracing targets
pub struct TracingControl {
    state: Mutex<TraceCtlState>,
    reload: Option<reload::Handle<EnvFilter, Registry>>,
}

fn parse_level(level: &str) -> Result<LevelFilter, TraceCtlError> {
    LevelFilter::from_str(level.trim()).map_err(|_| TraceCtlError::InvalidLevel(level.to_string()))
}

impl TracingControl {
    fn new() -> Self {
        let state = TraceCtlState::new();
        let filter = EnvFilter::try_new(state.directives())
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DEFAULT_LOGLEVEL.to_string()));
        let (filter, handle) = reload::Layer::new(filter);
        // a subscriber may already be installed (e.g. by tests). In that case
        // we keep track of levels but can't reload them.
        let reload = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
            .ok()
            .map(|()| handle);
        Self {
            state: Mutex::new(state),
            reload,
        }
    }

    fn with_state<T>(
        &self,
        f: impl FnOnce(&mut TraceCtlState) -> Result<T, TraceCtlError>,
    ) -> Result<T, TraceCtlError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| TraceCtlError::LockPoisoned)?;
        let out = f(&mut state)?;
        if let Some(handle) = &self.reload {
            let filter = EnvFilter::try_new(state.directives())
                .map_err(|e| TraceCtlError::FilterError(e.to_string()))?;
            handle
                .reload(filter)
                .map_err(|e| TraceCtlError::ReloadError(e.to_string()))?;
        }
        Ok(out)
    }

    /// Set the level for events not matching any registered target
    pub fn set_default_level(&self, level: LevelFilter) -> Result<(), TraceCtlError> {
        self.with_state(|state| {
            state.default = level;
            Ok(())
        })
    }

    /// Set the level of the target named `name` or of all targets tagged with `name`.
    pub fn set_level(&self, name: &str, level: LevelFilter) -> Result<(), TraceCtlError> {
        self.with_state(|state| match state.set_level(name, level) {
            0 => Err(TraceCtlError::UnknownTarget(name.to_string())),
            _ => Ok(()),
        })
    }

    /// Get the current level of the target named `name`
    pub fn level(&self, name: &str) -> Result<LevelFilter, TraceCtlError> {
        let state = self
            .state
            .lock()
            .map_err(|_| TraceCtlError::LockPoisoned)?;
        state
            .targets
            .get(name)
            .map(|cfg| cfg.level)
            .ok_or_else(|| TraceCtlError::UnknownTarget(name.to_string()))
    }

    /// Configure tracing from a comma-separated sequence of tag=level.
    /// `default=level` sets the default level and `all=level` sets the level of every target.
    /// Directives are applied in order, so later ones override earlier ones.
    pub fn setup_from_string(&self, config: &str) -> Result<(), TraceCtlError> {
        let mut directives = Vec::new();
        for item in config.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (tag, level) = item
                .split_once('=')
                .ok_or_else(|| TraceCtlError::InvalidDirective(item.to_string()))?;
            directives.push((tag.trim(), parse_level(level)?));
        }
        self.with_state(|state| {
            // nothing is changed unless every directive applies
            if let Some((tag, _)) = directives
                .iter()
                .find(|(tag, _)| !matches!(*tag, "default" | "all") && !state.knows(tag))
            {
                return Err(TraceCtlError::UnknownTarget((*tag).to_string()));
            }
            for (tag, level) in directives {
                match tag {
                    "default" => state.default = level,
                    "all" => state.targets.values_mut().for_each(|cfg| cfg.level = level),
                    tag => {
                        state.set_level(tag, level);
                    }
                }
            }
            Ok(())
        })
    }

    /// Dump the registered targets and their levels
    pub fn as_string(&self) -> Result<String, TraceCtlError> {
        let state = self
            .state
            .lock()
            .map_err(|_| TraceCtlError::LockPoisoned)?;
        let mut out = String::new();
        let _ = writeln!(out, " ━━━━━━━━━━━━━━━━━━━━ Tracing targets ━━━━━━━━━━━━━━━━━━━━");
        let _ = writeln!(out, " {:<16} {:<24} {:<6} tags", "name", "target", "level");
        for (name, cfg) in &state.targets {
            let _ = writeln!(
                out,
                " {:<16} {:<24} {:<6} {}",
                name,
                cfg.target,
                cfg.level.to_string(),
                cfg.tags.join(",")
            );
        }
        let _ = writeln!(out, " default level: {}", state.default);
        Ok(out)
    }

    /// Dump the known tags and the targets carrying each of them
    pub fn as_string_by_tag(&self) -> Result<String, TraceCtlError> {
        let state = self
            .state
            .lock()
            .map_err(|_| TraceCtlError::LockPoisoned)?;
        let mut by_tag: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (name, cfg) in &state.targets {
            for tag in cfg.tags {
                by_tag.entry(*tag).or_default().push(*name);
            }
        }
        let mut out = String::new();
        let _ = writeln!(out, " ━━━━━━━━━━━━━━━━━━━━ Tracing tags ━━━━━━━━━━━━━━━━━━━━");
        for (tag, names) in by_tag {
            let _ = writeln!(out, " {tag:<16} {}", names.join(","));
        }
        Ok(out)
    }
}

static TRACE_CTL: OnceLock<TracingControl> = OnceLock::new();

/// Get the process-wide tracing control. The tracing subscriber is installed on first use.
pub fn get_trace_ctl() -> &'static TracingControl {
    TRACE_CTL.get_or_init(TracingControl::new)
}
