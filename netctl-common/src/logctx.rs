//! Structured, per-task logging context.
//!
//! Not a global singleton: each reconcile/lease-evaluation call chain
//! carries its own [`LogContext`], cloned (and narrowed with `with_*`) as it
//! is threaded through, so two tasks running concurrently never share
//! mutable log fields. Lines are emitted in the logfmt-ish shape the spec
//! requires: `ts=... level=... msg="..." crd=... node=... ip=... zone=...
//! leader=... trace=...`.

use std::fmt;

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::colors::{FG1, FG2};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub leader: String,
    pub crd: Option<String>,
    pub node: Option<String>,
    pub ip: Option<String>,
    pub zone: Option<String>,
}

impl LogContext {
    pub fn new(leader_identity: impl Into<String>) -> Self {
        Self {
            leader: leader_identity.into(),
            ..Default::default()
        }
    }

    pub fn with_crd(&self, crd: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.crd = Some(crd.into());
        ctx
    }

    pub fn with_node(&self, node: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.node = Some(node.into());
        ctx
    }

    pub fn with_ip(&self, ip: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.ip = Some(ip.into());
        ctx
    }

    pub fn with_zone(&self, zone: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.zone = Some(zone.into());
        ctx
    }

    fn emit(&self, level: Level, msg: &str, trace: Option<&str>) {
        let line = format!(
            "ts={} level={level} msg=\"{msg}\" crd={} node={} ip={} zone={} leader={} trace={}",
            Utc::now().to_rfc3339(),
            self.crd.as_deref().unwrap_or(""),
            self.node.as_deref().unwrap_or(""),
            self.ip.as_deref().unwrap_or(""),
            self.zone.as_deref().unwrap_or(""),
            self.leader,
            trace.unwrap_or(""),
        );
        match level {
            Level::Error => eprintln!("{}", line.color(FG1)),
            Level::Warn => println!("{}", line.color(FG1)),
            Level::Info => println!("{}", line.color(FG2)),
            Level::Debug => println!("{line}"),
        }
    }

    pub fn debug(&self, msg: impl AsRef<str>) {
        self.emit(Level::Debug, msg.as_ref(), None);
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        self.emit(Level::Info, msg.as_ref(), None);
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        self.emit(Level::Warn, msg.as_ref(), None);
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        self.emit(Level::Error, msg.as_ref(), None);
    }

    pub fn error_trace(&self, msg: impl AsRef<str>, trace: impl AsRef<str>) {
        self.emit(Level::Error, msg.as_ref(), Some(trace.as_ref()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn narrowing_does_not_mutate_the_parent_context() {
        let base = LogContext::new("pod-a");
        let narrowed = base.with_crd("alloc-1").with_node("node-1");
        assert!(base.crd.is_none());
        assert_eq!(narrowed.crd.as_deref(), Some("alloc-1"));
        assert_eq!(narrowed.node.as_deref(), Some("node-1"));
        assert_eq!(narrowed.leader, "pod-a");
    }
}
