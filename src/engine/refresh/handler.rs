use super::RefreshDirective;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// What to do with a detected refresh directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshAction {
    /// Navigate now, before the navigation call that produced the directive returns.
    Execute,
    /// Navigate after the given delay on the window's background context.
    Defer(Duration),
    /// Stay on the current page.
    Suppress,
}

/// Decides how a refresh directive is followed.
pub trait RefreshHandler: Send + Sync + Debug {
    fn handle(&self, directive: &RefreshDirective) -> RefreshAction;
}

/// Follows every directive synchronously, ignoring its delay.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateRefreshHandler;

impl RefreshHandler for ImmediateRefreshHandler {
    fn handle(&self, _directive: &RefreshDirective) -> RefreshAction {
        RefreshAction::Execute
    }
}

/// Follows directives synchronously when their delay is at most `max_delay_secs`,
/// suppresses the rest.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdRefreshHandler {
    max_delay_secs: u64,
}

impl ThresholdRefreshHandler {
    pub fn new(max_delay_secs: u64) -> Self {
        Self { max_delay_secs }
    }
}

impl RefreshHandler for ThresholdRefreshHandler {
    fn handle(&self, directive: &RefreshDirective) -> RefreshAction {
        if directive.delay <= self.max_delay_secs {
            RefreshAction::Execute
        } else {
            RefreshAction::Suppress
        }
    }
}

/// Follows every directive after its delay, off the caller's thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct WaitingRefreshHandler;

impl RefreshHandler for WaitingRefreshHandler {
    fn handle(&self, directive: &RefreshDirective) -> RefreshAction {
        RefreshAction::Defer(Duration::from_secs(directive.delay))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoRefreshHandler;

impl RefreshHandler for NoRefreshHandler {
    fn handle(&self, _directive: &RefreshDirective) -> RefreshAction {
        RefreshAction::Suppress
    }
}

/// Built-in refresh policies, as selected in [`EngineConfig`](crate::EngineConfig).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPolicy {
    Immediate,
    Threshold { max_delay_secs: u64 },
    Waiting,
    /// Never follow refresh directives
    Disabled,
}

impl RefreshPolicy {
    pub fn handler(&self) -> Arc<dyn RefreshHandler> {
        match *self {
            RefreshPolicy::Immediate => Arc::new(ImmediateRefreshHandler),
            RefreshPolicy::Threshold { max_delay_secs } => Arc::new(ThresholdRefreshHandler::new(max_delay_secs)),
            RefreshPolicy::Waiting => Arc::new(WaitingRefreshHandler),
            RefreshPolicy::Disabled => Arc::new(NoRefreshHandler),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::refresh::DirectiveSource;
    use url::Url;

    fn directive(delay: u64) -> RefreshDirective {
        RefreshDirective {
            target: Url::parse("https://a.test/next").unwrap(),
            delay,
            source: DirectiveSource::Meta,
        }
    }

    #[test]
    fn immediate_ignores_delay() {
        let h = RefreshPolicy::Immediate.handler();
        assert_eq!(h.handle(&directive(0)), RefreshAction::Execute);
        assert_eq!(h.handle(&directive(3600)), RefreshAction::Execute);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let h = RefreshPolicy::Threshold { max_delay_secs: 2 }.handler();
        assert_eq!(h.handle(&directive(2)), RefreshAction::Execute);
        assert_eq!(h.handle(&directive(3)), RefreshAction::Suppress);
    }

    #[test]
    fn waiting_defers_by_delay() {
        let h = RefreshPolicy::Waiting.handler();
        assert_eq!(h.handle(&directive(4)), RefreshAction::Defer(Duration::from_secs(4)));
    }

    #[test]
    fn disabled_suppresses() {
        assert_eq!(RefreshPolicy::Disabled.handler().handle(&directive(0)), RefreshAction::Suppress);
    }
}
