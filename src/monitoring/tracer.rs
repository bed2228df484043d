/*!
 * Tracing
 * Subscriber setup and timed spans around allocator setup
 */

use crate::core::errors::AllocatorError;
use crate::core::types::ArenaIndex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Span};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Setup slower than this is reported at warn level
const SLOW_SETUP: Duration = Duration::from_millis(100);

fn json_enabled() -> bool {
    std::env::var("NODUMP_TRACE_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false)
}

/// Install the global subscriber
///
/// - RUST_LOG: filter directives (default: info)
/// - NODUMP_TRACE_JSON: one JSON object per event instead of compact text
///
/// A subscriber installed earlier, by this call or by the host, is kept.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = json_enabled();

    let (json_layer, text_layer) = if json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_span_events(FmtSpan::CLOSE);
        (Some(layer), None)
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE);
        (None, Some(layer))
    };

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();
    if installed {
        info!(json, "nodump tracing initialized");
    }
}

/// Timed span covering one setup step of a nodump allocator
///
/// Records the arena once it exists and the outcome when the step ends;
/// the elapsed time is recorded on drop.
pub struct OperationSpan {
    span: Span,
    started: Instant,
    operation: &'static str,
}

impl OperationSpan {
    pub fn new(operation: &'static str) -> Self {
        let span = tracing::debug_span!(
            "nodump",
            operation,
            arena = tracing::field::Empty,
            outcome = tracing::field::Empty,
            error = tracing::field::Empty,
            elapsed_us = tracing::field::Empty,
        );
        Self {
            span,
            started: Instant::now(),
            operation,
        }
    }

    pub fn record_arena(&self, arena: ArenaIndex) {
        self.span.record("arena", arena.get());
    }

    pub fn succeed(&self) {
        self.span.record("outcome", "ok");
    }

    pub fn fail(&self, error: &AllocatorError) {
        self.span.record("outcome", "failed");
        self.span.record("error", tracing::field::display(error));
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for OperationSpan {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        self.span.record("elapsed_us", elapsed.as_micros() as u64);
        let _entered = self.span.enter();
        if elapsed > SLOW_SETUP {
            warn!(
                operation = self.operation,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow nodump setup"
            );
        } else {
            debug!(operation = self.operation, "nodump setup finished");
        }
    }
}
